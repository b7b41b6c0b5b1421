//! Worker process entry point.
//!
//! Runs as a child of the sidecar (hidden `verifier-worker`
//! subcommand): reads [`WorkerJob`] frames from stdin, executes the
//! named verifier program, writes [`WorkerReply`] frames to stdout.
//! Everything that goes wrong inside a verifier becomes a `warn` reply
//! with the error message; the parent decides what that means for the
//! tool's role.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::Value;

use crate::protocol::{read_frame, write_frame, WorkerJob, WorkerReply};
use forge_domain::verifier::VerifierOutcome;

const INVALID_PATH_MESSAGE: &str = "Invalid verifier path";

/// Blocking frame loop. Returns when the parent closes stdin.
pub fn run_worker() -> std::io::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = stdin.lock();
    let mut writer = stdout.lock();
    let mut cache = ModuleCache::default();

    while let Some(job) = read_frame::<_, WorkerJob>(&mut reader)? {
        let reply = handle_job(&mut cache, &job);
        write_frame(&mut writer, &reply)?;
    }
    Ok(())
}

/// Resolved verifier programs, keyed by `(path, export)` to amortize
/// path resolution across calls.
#[derive(Default)]
pub struct ModuleCache {
    entries: HashMap<(String, String), PathBuf>,
}

impl ModuleCache {
    fn resolve(&mut self, path: &str, export: &str) -> Result<PathBuf, String> {
        let key = (path.to_owned(), export.to_owned());
        if let Some(resolved) = self.entries.get(&key) {
            return Ok(resolved.clone());
        }

        // Only absolute filesystem paths are verifier modules; data:
        // URLs and relative paths are refused outright.
        if !Path::new(path).is_absolute() {
            return Err(INVALID_PATH_MESSAGE.into());
        }
        let resolved = std::fs::canonicalize(path).map_err(|e| format!("{path}: {e}"))?;
        if !resolved.is_file() {
            return Err(format!("{path}: not a file"));
        }
        self.entries.insert(key, resolved.clone());
        Ok(resolved)
    }
}

pub fn handle_job(cache: &mut ModuleCache, job: &WorkerJob) -> WorkerReply {
    match execute(cache, job) {
        Ok((outcome, message)) => WorkerReply {
            id: job.id,
            outcome,
            message,
        },
        Err(message) => WorkerReply {
            id: job.id,
            outcome: VerifierOutcome::Warn,
            message: Some(message),
        },
    }
}

fn execute(
    cache: &mut ModuleCache,
    job: &WorkerJob,
) -> Result<(VerifierOutcome, Option<String>), String> {
    let program = cache.resolve(&job.verifier_path, &job.export_name)?;

    let mut child = Command::new(&program)
        .arg(&job.export_name)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("spawn {}: {e}", program.display()))?;

    let input = serde_json::json!({
        "exportName": job.export_name,
        "toolName": job.tool_name,
        "args": job.args,
        "result": job.result,
    });
    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(input.to_string().as_bytes())
            .map_err(|e| format!("write verifier stdin: {e}"))?;
    }
    drop(child.stdin.take());

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait verifier: {e}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "verifier exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().unwrap_or("");
    let parsed: Value =
        serde_json::from_str(line).map_err(|e| format!("unparsable verifier reply: {e}"))?;

    let outcome = parsed
        .get("outcome")
        .and_then(|v| v.as_str())
        .and_then(VerifierOutcome::parse)
        .ok_or_else(|| format!("verifier reply missing outcome: {line}"))?;
    let message = parsed
        .get("message")
        .and_then(|v| v.as_str())
        .map(String::from);
    Ok((outcome, message))
}
