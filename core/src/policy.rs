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

//! Tool-call security policies.
//!
//! A call is checked in a fixed order: side-effect-free tools pass, then any
//! non-public value among the call's accumulated dependencies denies it,
//! then the first policy whose glob matches the tool decides, and finally
//! the call is denied by default.

use crate::capabilities::{get_all_readers, is_public};
use crate::value::Value;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the quarantined-assistant tool.
pub const QUERY_AI_ASSISTANT: &str = "query_ai_assistant";

pub const NO_SIDE_EFFECT_TOOLS: &[&str] = &[QUERY_AI_ASSISTANT];

/// Arguments as seen by a policy: positional arguments under `"0"`, `"1"`,
/// ..., followed by keyword arguments.
pub type PolicyArgs = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason")]
pub enum SecurityPolicyResult {
    Allowed,
    Denied(String),
}

impl SecurityPolicyResult {
    pub fn denied(reason: impl Into<String>) -> Self {
        SecurityPolicyResult::Denied(reason.into())
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, SecurityPolicyResult::Allowed)
    }
}

impl fmt::Display for SecurityPolicyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityPolicyResult::Allowed => write!(f, "Allowed"),
            SecurityPolicyResult::Denied(reason) => write!(f, "Denied({})", reason),
        }
    }
}

/// Raised when a side-effecting tool is denied. Ends the whole evaluation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Execution of tool '{tool}' denied: {reason}")]
pub struct SecurityPolicyDeniedError {
    pub tool: String,
    pub reason: String,
}

/// A policy decides on a call from its tool name and arguments alone.
pub trait SecurityPolicy {
    fn check(&self, tool_name: &str, args: &PolicyArgs) -> SecurityPolicyResult;
}

impl<F> SecurityPolicy for F
where
    F: Fn(&str, &PolicyArgs) -> SecurityPolicyResult,
{
    fn check(&self, tool_name: &str, args: &PolicyArgs) -> SecurityPolicyResult {
        self(tool_name, args)
    }
}

pub trait SecurityPolicyEngine {
    fn check_policy(
        &self,
        tool_name: &str,
        args: &PolicyArgs,
        dependencies: &[Value],
    ) -> SecurityPolicyResult;

    fn no_side_effect_tools(&self) -> &BTreeSet<String>;
}

/// Denies unless every argument is public or the tool has no side effects.
pub fn base_security_policy(
    tool_name: &str,
    args: &PolicyArgs,
    no_side_effect_tools: &BTreeSet<String>,
) -> SecurityPolicyResult {
    let all_public = args.values().all(|v| get_all_readers(v).is_public());
    if !all_public && !no_side_effect_tools.contains(tool_name) {
        return SecurityPolicyResult::denied("Data is not public.");
    }
    SecurityPolicyResult::Allowed
}

// ============================================================================
// GLOB MATCHING
// ============================================================================

/// Shell-style pattern (`*`, `?`, `[seq]`, `[!seq]`) compiled to a regex.
#[derive(Debug, Clone)]
pub struct ToolPattern {
    pattern: String,
    regex: Regex,
}

impl ToolPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(ToolPattern {
            pattern: pattern.to_string(),
            regex: Regex::new(&glob_to_regex(pattern))?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        self.regex.is_match(tool_name)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                let negated = chars.peek() == Some(&'!');
                if negated {
                    chars.next();
                }
                for c in chars.by_ref() {
                    if c == ']' && !class.is_empty() {
                        closed = true;
                        break;
                    }
                    class.push(c);
                }
                if closed {
                    out.push('[');
                    if negated {
                        out.push('^');
                    }
                    for c in class.chars() {
                        if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                } else {
                    out.push_str(&regex::escape("["));
                    if negated {
                        out.push('!');
                    }
                    out.push_str(&regex::escape(&class));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

pub fn glob_matches(pattern: &str, tool_name: &str) -> bool {
    ToolPattern::new(pattern).is_ok_and(|p| p.matches(tool_name))
}

// ============================================================================
// ENGINES
// ============================================================================

/// Ordered `(pattern, policy)` pairs plus the side-effect-free tools.
pub struct PolicyEngine {
    policies: Vec<(ToolPattern, Box<dyn SecurityPolicy>)>,
    no_side_effect_tools: BTreeSet<String>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        PolicyEngine::new(NO_SIDE_EFFECT_TOOLS.iter().map(|s| s.to_string()))
    }
}

impl PolicyEngine {
    pub fn new(no_side_effect_tools: impl IntoIterator<Item = String>) -> Self {
        PolicyEngine {
            policies: Vec::new(),
            no_side_effect_tools: no_side_effect_tools.into_iter().collect(),
        }
    }

    /// Appends a policy; earlier policies take precedence.
    pub fn add_policy(
        &mut self,
        pattern: &str,
        policy: impl SecurityPolicy + 'static,
    ) -> Result<(), regex::Error> {
        self.policies.push((ToolPattern::new(pattern)?, Box::new(policy)));
        Ok(())
    }

    pub fn with_policy(
        mut self,
        pattern: &str,
        policy: impl SecurityPolicy + 'static,
    ) -> Result<Self, regex::Error> {
        self.add_policy(pattern, policy)?;
        Ok(self)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.policies.iter().map(|(p, _)| p.as_str())
    }
}

impl SecurityPolicyEngine for PolicyEngine {
    fn check_policy(
        &self,
        tool_name: &str,
        args: &PolicyArgs,
        dependencies: &[Value],
    ) -> SecurityPolicyResult {
        // Every branch computes the same inputs before deciding.
        let side_effect_free = self.no_side_effect_tools.contains(tool_name);
        let non_public: Vec<String> = dependencies
            .iter()
            .filter(|d| !is_public(d))
            .map(|d| d.to_raw().py_repr())
            .collect();
        let matched = self.policies.iter().find(|(p, _)| p.matches(tool_name));

        let result = if side_effect_free {
            SecurityPolicyResult::Allowed
        } else if !non_public.is_empty() {
            SecurityPolicyResult::denied(format!(
                "{} is state-changing and depends on private values [{}].",
                tool_name,
                non_public.join(", ")
            ))
        } else {
            match matched {
                Some((_, policy)) => policy.check(tool_name, args),
                None => SecurityPolicyResult::denied(
                    "No security policy matched for tool. Defaulting to denial.",
                ),
            }
        };
        match &result {
            SecurityPolicyResult::Allowed => debug!(tool = tool_name, "policy allowed"),
            SecurityPolicyResult::Denied(_) => warn!(
                tool = tool_name,
                private_dependencies = non_public.len(),
                "policy denied"
            ),
        }
        result
    }

    fn no_side_effect_tools(&self) -> &BTreeSet<String> {
        &self.no_side_effect_tools
    }
}

/// Allows everything.
#[derive(Debug, Default)]
pub struct NoSecurityPolicyEngine {
    no_side_effect_tools: BTreeSet<String>,
}

impl SecurityPolicyEngine for NoSecurityPolicyEngine {
    fn check_policy(&self, _: &str, _: &PolicyArgs, _: &[Value]) -> SecurityPolicyResult {
        SecurityPolicyResult::Allowed
    }

    fn no_side_effect_tools(&self) -> &BTreeSet<String> {
        &self.no_side_effect_tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Capabilities, Readers};

    fn public(i: i64) -> Value {
        Value::int(i, Capabilities::default_user(), vec![])
    }

    fn private(s: &str) -> Value {
        let caps = Capabilities::new(
            [crate::capabilities::Source::tool("read_email")],
            Readers::restricted(["alice@example.com"]),
        );
        Value::str(s, caps, vec![])
    }

    fn args(values: &[(&str, Value)]) -> PolicyArgs {
        values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_glob_matching() {
        assert!(glob_matches("send_*", "send_email"));
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("get_?", "get_x"));
        assert!(!glob_matches("get_?", "get_xy"));
        assert!(glob_matches("[ab]*", "approve"));
        assert!(!glob_matches("[!ab]*", "approve"));
        assert!(glob_matches("a.b", "a.b"));
        assert!(!glob_matches("a.b", "axb"));
    }

    #[test]
    fn test_side_effect_free_tool_always_allowed() {
        let engine = PolicyEngine::default();
        let result = engine.check_policy(QUERY_AI_ASSISTANT, &args(&[]), &[private("secret")]);
        assert_eq!(result, SecurityPolicyResult::Allowed);
    }

    #[test]
    fn test_private_dependency_denies() {
        let engine = PolicyEngine::default()
            .with_policy("*", |_: &str, _: &PolicyArgs| SecurityPolicyResult::Allowed)
            .unwrap();
        let call_args = args(&[("0", public(1))]);
        let result = engine.check_policy("send_email", &call_args, &[private("secret")]);
        match result {
            SecurityPolicyResult::Denied(reason) => assert_eq!(
                reason,
                "send_email is state-changing and depends on private values ['secret']."
            ),
            other => panic!("Expected denial, got {}", other),
        }
    }

    #[test]
    fn test_first_matching_policy_wins() {
        let engine = PolicyEngine::default()
            .with_policy("send_*", |_: &str, _: &PolicyArgs| {
                SecurityPolicyResult::denied("no sending")
            })
            .unwrap()
            .with_policy("*", |_: &str, _: &PolicyArgs| SecurityPolicyResult::Allowed)
            .unwrap();
        assert_eq!(
            engine.check_policy("send_email", &args(&[]), &[]),
            SecurityPolicyResult::denied("no sending")
        );
        assert!(engine.check_policy("get_balance", &args(&[]), &[]).is_allowed());
        assert_eq!(engine.patterns().collect::<Vec<_>>(), vec!["send_*", "*"]);
    }

    #[test]
    fn test_default_denial() {
        let engine = PolicyEngine::default();
        assert_eq!(
            engine.check_policy("delete_file", &args(&[]), &[]),
            SecurityPolicyResult::denied(
                "No security policy matched for tool. Defaulting to denial."
            )
        );
    }

    #[test]
    fn test_base_policy() {
        let side_effect_free: BTreeSet<String> = [QUERY_AI_ASSISTANT.to_string()].into();
        let private_args = args(&[("body", private("hi"))]);
        assert_eq!(
            base_security_policy("send_email", &private_args, &side_effect_free),
            SecurityPolicyResult::denied("Data is not public.")
        );
        let reader = base_security_policy(QUERY_AI_ASSISTANT, &private_args, &side_effect_free);
        assert!(reader.is_allowed());
        let public_args = args(&[("n", public(2))]);
        assert!(base_security_policy("send_email", &public_args, &side_effect_free).is_allowed());
    }

    #[test]
    fn test_denied_error_message() {
        let err = SecurityPolicyDeniedError {
            tool: "send_email".into(),
            reason: "Data is not public.".into(),
        };
        assert_eq!(err.to_string(), "Execution of tool 'send_email' denied: Data is not public.");
        assert!(NoSecurityPolicyEngine::default()
            .check_policy("send_email", &args(&[]), &[private("x")])
            .is_allowed());
    }
}
