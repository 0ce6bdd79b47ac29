/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of camel-sandbox.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: No patent rights in camel-sandbox are granted by this license.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Declarative interpreter configuration loaded from JSON.

use crate::capabilities::can_readers_read_value;
use crate::eval::EvalMode;
use crate::policy::{
    base_security_policy, PolicyArgs, PolicyEngine, SecurityPolicyResult, NO_SIDE_EFFECT_TOOLS,
};
use crate::raw::RawValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Environment variable overriding the configured evaluation mode.
pub const EVAL_MODE_ENV: &str = "CAMEL_EVAL_MODE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown eval mode: {0}")]
    UnknownEvalMode(String),
    #[error("Invalid tool pattern '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PolicyRule {
    Allow,
    Deny {
        #[serde(default)]
        reason: Option<String>,
    },
    PublicArguments,
    /// Allowed iff the readers named by `recipients` may read `value`.
    ReadersInclude { value: String, recipients: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub tool: String,
    #[serde(flatten)]
    pub rule: PolicyRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default)]
    pub eval_mode: EvalMode,
    #[serde(default = "default_no_side_effect_tools")]
    pub no_side_effect_tools: Vec<String>,
    #[serde(default)]
    pub policies: Vec<PolicyEntry>,
}

fn default_no_side_effect_tools() -> Vec<String> {
    NO_SIDE_EFFECT_TOOLS.iter().map(|s| s.to_string()).collect()
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            eval_mode: EvalMode::default(),
            no_side_effect_tools: default_no_side_effect_tools(),
            policies: Vec::new(),
        }
    }
}

impl InterpreterConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: InterpreterConfig = serde_json::from_str(json)?;
        config.with_eval_mode_override(std::env::var(EVAL_MODE_ENV).ok())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading interpreter config");
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Replaces the eval mode when `value` is set (e.g. from the environment).
    pub fn with_eval_mode_override(mut self, value: Option<String>) -> Result<Self, ConfigError> {
        if let Some(mode) = value.filter(|v| !v.trim().is_empty()) {
            self.eval_mode = EvalMode::from_str(&mode)?;
        }
        Ok(self)
    }

    /// Builds an engine holding the configured rules in order.
    pub fn build_engine(&self) -> Result<PolicyEngine, ConfigError> {
        let mut engine = PolicyEngine::new(self.no_side_effect_tools.iter().cloned());
        for entry in &self.policies {
            let result = match entry.rule.clone() {
                PolicyRule::Allow => engine.add_policy(&entry.tool, |_: &str, _: &PolicyArgs| {
                    SecurityPolicyResult::Allowed
                }),
                PolicyRule::Deny { reason } => {
                    let reason = reason.unwrap_or_else(|| "Denied by configuration.".to_string());
                    engine.add_policy(&entry.tool, move |_: &str, _: &PolicyArgs| {
                        SecurityPolicyResult::denied(reason.clone())
                    })
                }
                PolicyRule::PublicArguments => {
                    let side_effect_free: BTreeSet<String> =
                        self.no_side_effect_tools.iter().cloned().collect();
                    engine.add_policy(&entry.tool, move |tool: &str, args: &PolicyArgs| {
                        base_security_policy(tool, args, &side_effect_free)
                    })
                }
                PolicyRule::ReadersInclude { value, recipients } => {
                    engine.add_policy(&entry.tool, move |_: &str, args: &PolicyArgs| {
                        readers_include(args, &value, &recipients)
                    })
                }
            };
            result.map_err(|source| ConfigError::InvalidGlob {
                pattern: entry.tool.clone(),
                source,
            })?;
        }
        debug!(policies = self.policies.len(), "policy engine built");
        Ok(engine)
    }
}

fn readers_include(args: &PolicyArgs, value: &str, recipients: &str) -> SecurityPolicyResult {
    let (Some(data), Some(targets)) = (args.get(value), args.get(recipients)) else {
        return SecurityPolicyResult::denied(format!(
            "Missing argument '{}' or '{}'.",
            value, recipients
        ));
    };
    let readers: BTreeSet<String> = match targets.to_raw() {
        RawValue::Str(s) => BTreeSet::from([s]),
        RawValue::List(items) | RawValue::Tuple(items) | RawValue::Set(items) => {
            items.iter().map(|r| r.py_str()).collect()
        }
        other => BTreeSet::from([other.py_str()]),
    };
    if can_readers_read_value(&readers, data) {
        SecurityPolicyResult::Allowed
    } else {
        SecurityPolicyResult::denied(format!(
            "The recipients can't read the value of '{}'.",
            value
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Capabilities, Readers, Source};
    use crate::policy::SecurityPolicyEngine;
    use crate::value::Value;

    fn args(pairs: Vec<(&str, Value)>) -> PolicyArgs {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn readable_by(text: &str, readers: &[&str]) -> Value {
        let caps = Capabilities::new(
            [Source::tool("read_email")],
            Readers::restricted(readers.iter().map(|r| r.to_string())),
        );
        Value::str(text, caps, vec![])
    }

    fn public(text: &str) -> Value {
        Value::str(text, Capabilities::default_user(), vec![])
    }

    #[test]
    fn test_defaults() {
        let config = InterpreterConfig::from_json("{}").unwrap();
        assert_eq!(config.no_side_effect_tools, vec!["query_ai_assistant"]);
        assert!(config.policies.is_empty());
    }

    #[test]
    fn test_parse_rules() {
        let json = r#"{
            "eval_mode": "STRICT",
            "policies": [
                {"tool": "send_*", "rule": "readers_include", "value": "body", "recipients": "to"},
                {"tool": "delete_file", "rule": "deny", "reason": "never"},
                {"tool": "*", "rule": "public_arguments"}
            ]
        }"#;
        let config: InterpreterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.eval_mode, EvalMode::Strict);
        assert_eq!(config.policies.len(), 3);
        assert!(matches!(
            &config.policies[0].rule,
            PolicyRule::ReadersInclude { value, recipients }
                if value == "body" && recipients == "to"
        ));
        assert_eq!(
            config.policies[1].rule,
            PolicyRule::Deny {
                reason: Some("never".to_string())
            }
        );
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let json = r#"{"policies": [{"tool": "x", "rule": "maybe"}]}"#;
        assert!(matches!(
            serde_json::from_str::<InterpreterConfig>(json),
            Err(_)
        ));
    }

    #[test]
    fn test_eval_mode_override() {
        let config = InterpreterConfig::default()
            .with_eval_mode_override(Some("STRICT".to_string()))
            .unwrap();
        assert_eq!(config.eval_mode, EvalMode::Strict);

        let unchanged = InterpreterConfig::default()
            .with_eval_mode_override(None)
            .unwrap();
        assert_eq!(unchanged.eval_mode, EvalMode::Normal);

        match InterpreterConfig::default().with_eval_mode_override(Some("FAST".to_string())) {
            Err(ConfigError::UnknownEvalMode(mode)) => assert_eq!(mode, "FAST"),
            other => panic!("Expected UnknownEvalMode, got {:?}", other),
        }
    }

    #[test]
    fn test_build_engine_order() {
        let json = r#"{"policies": [
            {"tool": "delete_*", "rule": "deny", "reason": "no deletes"},
            {"tool": "*", "rule": "allow"}
        ]}"#;
        let engine = serde_json::from_str::<InterpreterConfig>(json)
            .unwrap()
            .build_engine()
            .unwrap();
        assert_eq!(engine.patterns().collect::<Vec<_>>(), vec!["delete_*", "*"]);
        assert_eq!(
            engine.check_policy("delete_file", &PolicyArgs::new(), &[]),
            SecurityPolicyResult::denied("no deletes")
        );
        assert!(engine
            .check_policy("send_email", &PolicyArgs::new(), &[])
            .is_allowed());
    }

    #[test]
    fn test_readers_include_rule() {
        let json = r#"{"policies": [
            {"tool": "send_email", "rule": "readers_include", "value": "body", "recipients": "to"}
        ]}"#;
        let engine = serde_json::from_str::<InterpreterConfig>(json)
            .unwrap()
            .build_engine()
            .unwrap();
        let allowed = args(vec![
            ("to", public("bob@example.com")),
            ("body", readable_by("secret", &["bob@example.com"])),
        ]);
        assert!(engine.check_policy("send_email", &allowed, &[]).is_allowed());

        let denied = args(vec![
            ("to", public("eve@example.com")),
            ("body", readable_by("secret", &["bob@example.com"])),
        ]);
        assert!(!engine.check_policy("send_email", &denied, &[]).is_allowed());

        let missing = args(vec![("to", public("bob@example.com"))]);
        assert!(!engine.check_policy("send_email", &missing, &[]).is_allowed());
    }

    #[test]
    fn test_public_arguments_rule() {
        let json = r#"{"policies": [{"tool": "*", "rule": "public_arguments"}]}"#;
        let engine = serde_json::from_str::<InterpreterConfig>(json)
            .unwrap()
            .build_engine()
            .unwrap();
        let public_args = args(vec![("0", public("hi"))]);
        assert!(engine.check_policy("post", &public_args, &[]).is_allowed());
        let private_args = args(vec![("0", readable_by("hi", &["a@b.c"]))]);
        assert_eq!(
            engine.check_policy("post", &private_args, &[]),
            SecurityPolicyResult::denied("Data is not public.")
        );
    }

    #[test]
    fn test_from_file_missing() {
        match InterpreterConfig::from_file("/nonexistent/camel.json") {
            Err(ConfigError::Io(_)) => {}
            other => panic!("Expected Io error, got {:?}", other),
        }
    }
}
