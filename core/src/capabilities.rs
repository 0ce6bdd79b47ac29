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

//! Capability lattice: who produced a value (sources) and who may observe
//! it (readers).
//!
//! Every runtime [`Value`] carries a [`Capabilities`] record. The effective
//! capabilities of a value are obtained by walking its dependency graph:
//! readers intersect, sources union. The graph may contain cycles (instances
//! referencing each other), so every walk keeps a visited set keyed on value
//! identity.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

// ============================================================================
// SOURCES
// ============================================================================

/// Fixed provenance tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// Produced by the interpreter itself.
    Camel,
    User,
    Assistant,
    TrustedToolSource,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Camel => write!(f, "CAMEL"),
            SourceKind::User => write!(f, "USER"),
            SourceKind::Assistant => write!(f, "ASSISTANT"),
            SourceKind::TrustedToolSource => write!(f, "TRUSTED_TOOL_SOURCE"),
        }
    }
}

/// A source nested inside a tool source: either a fixed tag or a principal
/// such as an email address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InnerSource {
    Kind(SourceKind),
    Principal(String),
}

impl fmt::Display for InnerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerSource::Kind(kind) => write!(f, "{}", kind),
            InnerSource::Principal(p) => write!(f, "{}", p),
        }
    }
}

/// Provenance tag attached to a value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Source {
    Kind(SourceKind),
    /// Output of a specific tool, optionally carrying the tool's own sources.
    Tool {
        tool_name: String,
        inner_sources: BTreeSet<InnerSource>,
    },
}

impl Source {
    pub fn tool(name: impl Into<String>) -> Self {
        Source::Tool {
            tool_name: name.into(),
            inner_sources: BTreeSet::new(),
        }
    }

    pub fn tool_with_sources(
        name: impl Into<String>,
        inner_sources: impl IntoIterator<Item = InnerSource>,
    ) -> Self {
        Source::Tool {
            tool_name: name.into(),
            inner_sources: inner_sources.into_iter().collect(),
        }
    }
}

impl From<SourceKind> for Source {
    fn from(kind: SourceKind) -> Self {
        Source::Kind(kind)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Kind(kind) => write!(f, "{}", kind),
            Source::Tool {
                tool_name,
                inner_sources,
            } => {
                if inner_sources.is_empty() {
                    write!(f, "Tool({})", tool_name)
                } else {
                    let inner: Vec<String> = inner_sources.iter().map(|s| s.to_string()).collect();
                    write!(f, "Tool({}, {{{}}})", tool_name, inner.join(", "))
                }
            }
        }
    }
}

// ============================================================================
// READERS
// ============================================================================

/// The set of principals allowed to observe a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Readers {
    /// No restriction.
    Public,
    Restricted(BTreeSet<String>),
}

impl Readers {
    pub fn restricted<I, S>(readers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Readers::Restricted(readers.into_iter().map(Into::into).collect())
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Readers::Public)
    }

    /// Lattice meet. `Public` is the neutral element.
    pub fn intersect(&self, other: &Readers) -> Readers {
        match (self, other) {
            (Readers::Public, r) | (r, Readers::Public) => r.clone(),
            (Readers::Restricted(a), Readers::Restricted(b)) => {
                Readers::Restricted(a.intersection(b).cloned().collect())
            }
        }
    }

    /// Whether every candidate may read data guarded by these readers.
    pub fn allows_all<'a>(&self, candidates: impl IntoIterator<Item = &'a String>) -> bool {
        match self {
            Readers::Public => true,
            Readers::Restricted(allowed) => candidates.into_iter().all(|c| allowed.contains(c)),
        }
    }
}

impl fmt::Display for Readers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readers::Public => write!(f, "Public"),
            Readers::Restricted(set) => {
                let names: Vec<String> = set.iter().map(|r| format!("'{}'", r)).collect();
                write!(f, "{{{}}}", names.join(", "))
            }
        }
    }
}

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Sources and readers of a single value, without its dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    pub sources: BTreeSet<Source>,
    pub readers: Readers,
}

impl Capabilities {
    pub fn new(sources: impl IntoIterator<Item = Source>, readers: Readers) -> Self {
        Capabilities {
            sources: sources.into_iter().collect(),
            readers,
        }
    }

    /// User-originated public data (literals in the submitted code).
    pub fn default_user() -> Self {
        Capabilities::new([Source::Kind(SourceKind::User)], Readers::Public)
    }

    /// Interpreter-originated public data.
    pub fn camel() -> Self {
        Capabilities::new([Source::Kind(SourceKind::Camel)], Readers::Public)
    }

    /// Output of the named tool, readable by everyone.
    pub fn tool(name: &str) -> Self {
        Capabilities::new([Source::tool(name)], Readers::Public)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::default_user()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources: Vec<String> = self.sources.iter().map(|s| s.to_string()).collect();
        write!(
            f,
            "Capabilities(sources={{{}}}, readers={})",
            sources.join(", "),
            self.readers
        )
    }
}

// ============================================================================
// TRANSITIVE WALKS
// ============================================================================

/// Visits `value` and everything reachable from it exactly once.
fn walk(value: &Value, mut visit: impl FnMut(&Value)) {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut stack = vec![value.clone()];
    while let Some(current) = stack.pop() {
        if !visited.insert(current.identity()) {
            continue;
        }
        visit(&current);
        stack.extend(current.direct_dependencies());
    }
}

/// Effective readers of a value: the intersection over its dependency closure.
pub fn get_all_readers(value: &Value) -> Readers {
    let mut readers = Readers::Public;
    walk(value, |v| readers = readers.intersect(&v.capabilities().readers));
    readers
}

/// Effective sources of a value: the union over its dependency closure.
pub fn get_all_sources(value: &Value) -> BTreeSet<Source> {
    let mut sources = BTreeSet::new();
    walk(value, |v| sources.extend(v.capabilities().sources.iter().cloned()));
    sources
}

/// Every value in the dependency closure of `value`, the value itself
/// included, in discovery order.
pub fn get_dependencies(value: &Value) -> Vec<Value> {
    let mut closure = Vec::new();
    walk(value, |v| closure.push(v.clone()));
    closure
}

pub fn is_public(value: &Value) -> bool {
    get_all_readers(value).is_public()
}

/// True if the value is public or if every candidate is among its readers.
pub fn can_readers_read_value(candidates: &BTreeSet<String>, value: &Value) -> bool {
    get_all_readers(value).allows_all(candidates)
}

pub fn default_trusted_sources() -> BTreeSet<Source> {
    [
        SourceKind::User,
        SourceKind::Camel,
        SourceKind::Assistant,
        SourceKind::TrustedToolSource,
    ]
    .into_iter()
    .map(Source::Kind)
    .collect()
}

fn source_is_trusted(source: &Source, trusted: &BTreeSet<Source>) -> bool {
    if trusted.contains(source) {
        return true;
    }
    match source {
        Source::Tool { inner_sources, .. } => inner_sources.iter().all(|inner| match inner {
            InnerSource::Kind(kind) => trusted.contains(&Source::Kind(*kind)),
            InnerSource::Principal(_) => false,
        }),
        Source::Kind(_) => false,
    }
}

/// True iff every source in the closure is trusted. A tool source is trusted
/// when its inner sources are empty or all trusted.
pub fn is_trusted(value: &Value, trusted: Option<&BTreeSet<Source>>) -> bool {
    let defaults;
    let trusted = match trusted {
        Some(set) => set,
        None => {
            defaults = default_trusted_sources();
            &defaults
        }
    };
    get_all_sources(value)
        .iter()
        .all(|s| source_is_trusted(s, trusted))
}

/// Same check as [`is_trusted`] applied to a bare capability record.
pub fn capabilities_are_trusted(capabilities: &Capabilities) -> bool {
    let trusted = default_trusted_sources();
    capabilities
        .sources
        .iter()
        .all(|s| source_is_trusted(s, &trusted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn secret(readers: &[&str]) -> Value {
        let readers = Readers::restricted(readers.iter().copied());
        Value::int(47, Capabilities::new([Source::tool("search_document")], readers), vec![])
    }

    #[test]
    fn test_default_and_camel() {
        let d = Capabilities::default_user();
        assert!(d.sources.contains(&Source::Kind(SourceKind::User)));
        assert_eq!(d.readers, Readers::Public);
        let c = Capabilities::camel();
        assert!(c.sources.contains(&Source::Kind(SourceKind::Camel)));
        assert_ne!(c, d);
        assert_eq!(Capabilities::default(), d);
    }

    #[test]
    fn test_readers_intersection() {
        let a = Readers::restricted(["a", "b"]);
        let b = Readers::restricted(["b", "c"]);
        assert_eq!(a.intersect(&b), Readers::restricted(["b"]));
        assert_eq!(Readers::Public.intersect(&a), a);
        assert_eq!(a.intersect(&Readers::Public), a);
        assert_eq!(Readers::Public.intersect(&Readers::Public), Readers::Public);
    }

    #[test]
    fn test_leaf_value_has_own_capabilities() {
        let v = secret(&["trusted@fake-email-domain.com"]);
        assert_eq!(get_all_readers(&v), Readers::restricted(["trusted@fake-email-domain.com"]));
        assert_eq!(get_all_sources(&v).len(), 1);
        assert!(!is_public(&v));
    }

    #[test]
    fn test_derived_value_narrows_readers() {
        let s = secret(&["a@x.com", "b@x.com"]);
        let other = Capabilities::new([Source::tool("other")], Readers::restricted(["b@x.com"]));
        let t = Value::int(1, other, vec![]);
        let derived = Value::int(48, Capabilities::camel(), vec![s, t]);
        assert_eq!(get_all_readers(&derived), Readers::restricted(["b@x.com"]));
        let sources = get_all_sources(&derived);
        assert!(sources.contains(&Source::tool("search_document")));
        assert!(sources.contains(&Source::tool("other")));
        assert!(sources.contains(&Source::Kind(SourceKind::Camel)));
    }

    #[test]
    fn test_can_readers_read_value() {
        let v = secret(&["trusted@fake-email-domain.com"]);
        let trusted: BTreeSet<String> = ["trusted@fake-email-domain.com".to_string()].into();
        let evil: BTreeSet<String> = ["evil@fake-email-domain.com".to_string()].into();
        assert!(can_readers_read_value(&trusted, &v));
        assert!(!can_readers_read_value(&evil, &v));
        let public = Value::int(1, Capabilities::default_user(), vec![]);
        assert!(can_readers_read_value(&evil, &public));
    }

    #[test]
    fn test_is_trusted() {
        let plain_tool = Value::int(1, Capabilities::tool("get_time"), vec![]);
        assert!(is_trusted(&plain_tool, None));

        let tainted = Value::int(
            1,
            Capabilities::new(
                [Source::tool_with_sources(
                    "read_email",
                    [InnerSource::Principal("evil@fake-email-domain.com".into())],
                )],
                Readers::Public,
            ),
            vec![],
        );
        assert!(!is_trusted(&tainted, None));

        let derived = Value::int(2, Capabilities::camel(), vec![tainted]);
        assert!(!is_trusted(&derived, None));

        let only_user: BTreeSet<Source> = [Source::Kind(SourceKind::User)].into();
        let camel = Value::int(3, Capabilities::camel(), vec![]);
        assert!(!is_trusted(&camel, Some(&only_user)));
    }

    #[test]
    fn test_walk_terminates_on_cycle() {
        let inner = secret(&["a@x.com"]);
        let list = Value::list(vec![inner], Capabilities::default_user(), vec![]);
        // The list now contains itself.
        let index = Value::int(0, Capabilities::default_user(), vec![]);
        list.set_index(&index, list.clone()).unwrap();
        assert_eq!(get_all_readers(&list), Readers::restricted(["a@x.com"]));
        assert!(get_all_sources(&list).contains(&Source::Kind(SourceKind::User)));
        let closure = get_dependencies(&list);
        assert!(closure.len() >= 2);
        assert_eq!(get_dependencies(&list).len(), closure.len());
    }

    #[test]
    fn test_display() {
        let caps = Capabilities::new(
            [Source::tool_with_sources("t", [InnerSource::Kind(SourceKind::User)])],
            Readers::restricted(["x"]),
        );
        assert_eq!(caps.to_string(), "Capabilities(sources={Tool(t, {USER})}, readers={'x'})");
    }
}
