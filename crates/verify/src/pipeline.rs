//! The verifier pipeline.
//!
//! For each tool result: collect the verifiers bound to the tool plus
//! the `*` wildcard, run them in ACIRU order, and stop at the first
//! `block`. Verifier failures never raise — they degrade to the
//! tool role's safe outcome (`warn` for read/analysis, `block` for
//! write).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::pool::{JobSpec, WorkerPool};
use crate::{pattern, schema};
use forge_domain::tool::{ToolRole, ToolSpec};
use forge_domain::verifier::{
    sort_execution_order, Verdict, Verifier, VerifierBinding, VerifierKind, VerifierOutcome,
    WILDCARD_TOOL,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-request verifier index
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `tool -> [verifier]` index built from the bindings table at the
/// start of each request.
#[derive(Default)]
pub struct VerifierIndex {
    by_tool: HashMap<String, Vec<Verifier>>,
    wildcard: Vec<Verifier>,
}

impl VerifierIndex {
    pub fn build(verifiers: &[Verifier], bindings: &[VerifierBinding]) -> Self {
        let catalog: HashMap<&str, &Verifier> =
            verifiers.iter().map(|v| (v.name.as_str(), v)).collect();

        let mut index = VerifierIndex::default();
        for binding in bindings {
            let Some(verifier) = catalog.get(binding.verifier_name.as_str()) else {
                tracing::warn!(
                    verifier = %binding.verifier_name,
                    tool = %binding.tool_name,
                    "binding references unknown verifier"
                );
                continue;
            };
            if binding.tool_name == WILDCARD_TOOL {
                index.wildcard.push((*verifier).clone());
            } else {
                index
                    .by_tool
                    .entry(binding.tool_name.clone())
                    .or_default()
                    .push((*verifier).clone());
            }
        }
        index
    }

    /// Bound + wildcard verifiers in execution order, one entry per
    /// verifier name.
    pub fn for_tool(&self, tool_name: &str) -> Vec<Verifier> {
        let mut merged: Vec<Verifier> = Vec::new();
        if let Some(bound) = self.by_tool.get(tool_name) {
            merged.extend(bound.iter().cloned());
        }
        for v in &self.wildcard {
            if !merged.iter().any(|m| m.name == v.name) {
                merged.push(v.clone());
            }
        }
        sort_execution_order(&mut merged);
        merged
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One verifier's contribution to a tool result.
#[derive(Debug, Clone)]
pub struct Finding {
    pub verifier: String,
    pub verdict: Verdict,
}

pub struct Pipeline {
    index: VerifierIndex,
    pool: Option<Arc<WorkerPool>>,
}

impl Pipeline {
    pub fn new(index: VerifierIndex, pool: Option<Arc<WorkerPool>>) -> Self {
        Self { index, pool }
    }

    /// Run every applicable verifier against one tool result. The
    /// returned findings are in execution order; a `block` finding is
    /// always last.
    pub async fn run(&self, tool: &ToolSpec, args: &Value, result: &Value) -> Vec<Finding> {
        let role = tool.role();
        let mut findings = Vec::new();

        for verifier in self.index.for_tool(&tool.name) {
            let verdict = self.run_verifier(&verifier, tool, args, result, role).await;
            let blocked = verdict.outcome == VerifierOutcome::Block;
            findings.push(Finding {
                verifier: verifier.name.clone(),
                verdict,
            });
            if blocked {
                break;
            }
        }
        findings
    }

    async fn run_verifier(
        &self,
        verifier: &Verifier,
        tool: &ToolSpec,
        args: &Value,
        result: &Value,
        role: ToolRole,
    ) -> Verdict {
        match verifier.kind {
            VerifierKind::Schema => schema::check(&verifier.spec, result),
            VerifierKind::Pattern => match pattern::check(&verifier.spec, result) {
                Ok(verdict) => verdict,
                Err(e) => degrade(role, e.to_string()),
            },
            VerifierKind::Custom => self.run_custom(verifier, tool, args, result, role).await,
        }
    }

    async fn run_custom(
        &self,
        verifier: &Verifier,
        tool: &ToolSpec,
        args: &Value,
        result: &Value,
        role: ToolRole,
    ) -> Verdict {
        let Some(pool) = &self.pool else {
            return degrade(role, "worker pool unavailable".to_string());
        };
        let (Some(file_path), Some(export_name)) = (
            verifier.spec.get("filePath").and_then(|v| v.as_str()),
            verifier.spec.get("exportName").and_then(|v| v.as_str()),
        ) else {
            return degrade(role, "custom verifier spec missing filePath/exportName".into());
        };

        let job = JobSpec {
            verifier_path: file_path.to_owned(),
            export_name: export_name.to_owned(),
            tool_name: tool.name.clone(),
            args: args.clone(),
            result: result.clone(),
        };
        match pool.submit(job).await {
            Ok(reply) => Verdict {
                outcome: reply.outcome,
                message: reply.message,
            },
            Err(e) => degrade(role, e.message()),
        }
    }
}

/// The safe outcome for a failed verifier: mutating tools fail closed.
fn degrade(role: ToolRole, message: String) -> Verdict {
    match role {
        ToolRole::Any => Verdict::warn(message),
        ToolRole::Write => Verdict::block(message),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
