//! Tool dispatch.
//!
//! Promoted tools route to capability endpoints over HTTP per their
//! `mcpRouting` spec. Execution is bounded by the per-tool timeout;
//! failures become an `{error}` observation for the model, never an
//! HTTP error for the client.

use std::time::Duration;

use serde_json::Value;

use forge_domain::error::{Error, Result};
use forge_domain::tool::ToolSpec;

const DEFAULT_TOOL_TIMEOUT_MS: u64 = 15_000;

#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, spec: &ToolSpec, args: &Value) -> Result<Value>;
}

pub struct HttpToolExecutor {
    client: reqwest::Client,
}

impl HttpToolExecutor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn execute(&self, spec: &ToolSpec, args: &Value) -> Result<Value> {
        let Some(routing) = &spec.mcp_routing else {
            return Err(Error::Other(format!(
                "tool \"{}\" has no routing endpoint",
                spec.name
            )));
        };

        let method: reqwest::Method = routing
            .method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| Error::Other(format!("bad method \"{}\"", routing.method)))?;

        let mut request = self.client.request(method.clone(), &routing.endpoint);
        if method == reqwest::Method::GET {
            // Scalar args travel as query parameters on reads.
            if let Some(obj) = args.as_object() {
                let query: Vec<(String, String)> = obj
                    .iter()
                    .filter_map(|(k, v)| match v {
                        Value::String(s) => Some((k.clone(), s.clone())),
                        Value::Number(n) => Some((k.clone(), n.to_string())),
                        Value::Bool(b) => Some((k.clone(), b.to_string())),
                        _ => None,
                    })
                    .collect();
                request = request.query(&query);
            }
        } else {
            request = request.json(args);
        }

        let timeout = Duration::from_millis(spec.timeout_ms.unwrap_or(DEFAULT_TOOL_TIMEOUT_MS));
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| Error::Timeout(format!("tool \"{}\" timed out", spec.name)))?
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let body = tokio::time::timeout(timeout, response.text())
            .await
            .map_err(|_| Error::Timeout(format!("tool \"{}\" timed out", spec.name)))?
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Http(format!(
                "tool \"{}\" returned HTTP {}",
                spec.name,
                status.as_u16()
            )));
        }

        // Non-JSON replies are still observations.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
