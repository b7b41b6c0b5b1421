//! Pattern verifier: regex checks on the textual form of a result.
//!
//! Spec blob: `{match?, reject?, outcome?}`. The text under test is
//! `result.text` when present, otherwise the JSON encoding of the
//! whole result. A set `match` that fails to match, or a set `reject`
//! that matches, yields the spec's outcome (default `warn`).

use serde_json::Value;

use forge_domain::error::{Error, Result};
use forge_domain::verifier::{Verdict, VerifierOutcome};

pub fn check(spec: &Value, result: &Value) -> Result<Verdict> {
    let text = match result.get("text").and_then(|v| v.as_str()) {
        Some(t) => t.to_owned(),
        None => result.to_string(),
    };

    let outcome = spec
        .get("outcome")
        .and_then(|v| v.as_str())
        .and_then(VerifierOutcome::parse)
        .unwrap_or(VerifierOutcome::Warn);

    if let Some(pattern) = spec.get("match").and_then(|v| v.as_str()) {
        let re = compile(pattern)?;
        if !re.is_match(&text) {
            return Ok(Verdict {
                outcome,
                message: Some(format!("expected pattern /{pattern}/ did not match")),
            });
        }
    }

    if let Some(pattern) = spec.get("reject").and_then(|v| v.as_str()) {
        let re = compile(pattern)?;
        if re.is_match(&text) {
            return Ok(Verdict {
                outcome,
                message: Some(format!("rejected pattern /{pattern}/ matched")),
            });
        }
    }

    Ok(Verdict::pass())
}

fn compile(pattern: &str) -> Result<regex::Regex> {
    regex::Regex::new(pattern).map_err(|e| Error::Verifier(format!("bad pattern: {e}")))
}
