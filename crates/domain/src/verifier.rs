//! Verifier domain types.
//!
//! A verifier inspects one tool result and produces `pass`, `warn`, or
//! `block`. Verifiers are bound to tools (or to the `*` wildcard) and
//! execute in ascending ACIRU-order, tie-broken by verifier name.

use serde::{Deserialize, Serialize};

/// The outcome of a single verifier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierOutcome {
    Pass,
    Warn,
    Block,
}

impl VerifierOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifierOutcome::Pass => "pass",
            VerifierOutcome::Warn => "warn",
            VerifierOutcome::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(VerifierOutcome::Pass),
            "warn" => Some(VerifierOutcome::Warn),
            "block" => Some(VerifierOutcome::Block),
            _ => None,
        }
    }
}

/// A verifier's verdict: outcome plus optional operator-facing message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: VerifierOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            outcome: VerifierOutcome::Pass,
            message: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            outcome: VerifierOutcome::Warn,
            message: Some(message.into()),
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self {
            outcome: VerifierOutcome::Block,
            message: Some(message.into()),
        }
    }
}

/// The implementation family of a verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierKind {
    Schema,
    Pattern,
    Custom,
}

impl VerifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifierKind::Schema => "schema",
            VerifierKind::Pattern => "pattern",
            VerifierKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "schema" => Some(VerifierKind::Schema),
            "pattern" => Some(VerifierKind::Pattern),
            "custom" => Some(VerifierKind::Custom),
            _ => None,
        }
    }
}

/// A registered verifier.
///
/// `aciru_order` is a lexicographic execution key like `I-0001`; the
/// leading letter is one of A/C/I/R/U (Attribution, Compliance,
/// Interface, Risk, Uncertainty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verifier {
    pub name: String,
    pub display_name: String,
    pub kind: VerifierKind,
    pub aciru_category: String,
    pub aciru_order: String,
    /// Type-specific specification blob:
    /// - schema: `{required: [..], properties: {..}}`
    /// - pattern: `{match?, reject?, outcome?}`
    /// - custom: `{filePath, exportName}`
    pub spec: serde_json::Value,
    #[serde(default)]
    pub description: String,
}

/// A binding between a verifier and a tool. Tool name `*` binds the
/// verifier to every tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierBinding {
    pub verifier_name: String,
    pub tool_name: String,
}

pub const WILDCARD_TOOL: &str = "*";

/// Sort verifiers into execution order: ascending ACIRU key, then name.
pub fn sort_execution_order(verifiers: &mut [Verifier]) {
    verifiers.sort_by(|a, b| {
        a.aciru_order
            .cmp(&b.aciru_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str, order: &str) -> Verifier {
        Verifier {
            name: name.into(),
            display_name: name.into(),
            kind: VerifierKind::Pattern,
            aciru_category: order[..1].to_string(),
            aciru_order: order.into(),
            spec: serde_json::json!({}),
            description: String::new(),
        }
    }

    #[test]
    fn execution_order_sorts_by_aciru_key() {
        let mut list = vec![v("late", "U-0009"), v("first", "A-0001"), v("mid", "I-0003")];
        sort_execution_order(&mut list);
        let names: Vec<_> = list.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["first", "mid", "late"]);
    }

    #[test]
    fn equal_keys_tie_break_on_name() {
        let mut list = vec![v("zeta", "I-0001"), v("alpha", "I-0001")];
        sort_execution_order(&mut list);
        assert_eq!(list[0].name, "alpha");
        assert_eq!(list[1].name, "zeta");
    }

    #[test]
    fn outcome_round_trip() {
        for s in ["pass", "warn", "block"] {
            assert_eq!(VerifierOutcome::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(VerifierOutcome::parse("maybe"), None);
    }

    #[test]
    fn kind_round_trip() {
        for s in ["schema", "pattern", "custom"] {
            assert_eq!(VerifierKind::parse(s).unwrap().as_str(), s);
        }
    }
}
