//! Schema verifier: structural checks on a tool result.
//!
//! Spec blob: `{required: [names], properties: {name: {type: ..}}}`.
//! Missing required keys block; a declared property with the wrong
//! JSON type warns.

use serde_json::Value;

use forge_domain::verifier::Verdict;

pub fn check(spec: &Value, result: &Value) -> Verdict {
    let Some(obj) = result.as_object() else {
        return Verdict::block("result is not an object".to_string());
    };

    if let Some(required) = spec.get("required").and_then(|v| v.as_array()) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|name| !obj.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Verdict::block(format!("missing required keys: {}", missing.join(", ")));
        }
    }

    if let Some(properties) = spec.get("properties").and_then(|v| v.as_object()) {
        for (name, decl) in properties {
            let Some(value) = obj.get(name) else { continue };
            let Some(expected) = decl.get("type").and_then(|v| v.as_str()) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Verdict::warn(format!(
                    "property \"{name}\" is not of type {expected}"
                ));
            }
        }
    }

    Verdict::pass()
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        // Unknown declared types never fail the check.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_domain::verifier::VerifierOutcome;

    fn spec() -> Value {
        serde_json::json!({
            "required": ["value", "count"],
            "properties": {
                "value": {"type": "string"},
                "count": {"type": "number"},
                "tags": {"type": "array"},
            }
        })
    }

    #[test]
    fn conforming_result_passes() {
        let verdict = check(
            &spec(),
            &serde_json::json!({"value": "ok", "count": 3, "tags": []}),
        );
        assert_eq!(verdict.outcome, VerifierOutcome::Pass);
    }

    #[test]
    fn missing_required_key_blocks() {
        let verdict = check(&spec(), &serde_json::json!({"value": "ok"}));
        assert_eq!(verdict.outcome, VerifierOutcome::Block);
        assert!(verdict.message.unwrap().contains("count"));
    }

    #[test]
    fn type_mismatch_warns() {
        let verdict = check(&spec(), &serde_json::json!({"value": 17, "count": 3}));
        assert_eq!(verdict.outcome, VerifierOutcome::Warn);
        assert!(verdict.message.unwrap().contains("value"));
    }

    #[test]
    fn non_object_result_blocks() {
        let verdict = check(&spec(), &serde_json::json!("just a string"));
        assert_eq!(verdict.outcome, VerifierOutcome::Block);
    }

    #[test]
    fn undeclared_extra_keys_are_fine() {
        let verdict = check(
            &spec(),
            &serde_json::json!({"value": "ok", "count": 1, "extra": true}),
        );
        assert_eq!(verdict.outcome, VerifierOutcome::Pass);
    }

    #[test]
    fn empty_spec_passes_any_object() {
        let verdict = check(&serde_json::json!({}), &serde_json::json!({"anything": 1}));
        assert_eq!(verdict.outcome, VerifierOutcome::Pass);
    }

    #[test]
    fn missing_declared_property_is_not_a_mismatch() {
        // "tags" is declared but not required; absence is fine.
        let verdict = check(&spec(), &serde_json::json!({"value": "x", "count": 0}));
        assert_eq!(verdict.outcome, VerifierOutcome::Pass);
    }
}
