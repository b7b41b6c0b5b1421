//! Out-of-process worker pool for custom verifiers.
//!
//! Fixed set of child processes, FIFO queue bounded by
//! `maxQueueDepth`, per-call timeout. A worker that times out or
//! crashes is killed and replaced; its inflight call resolves with the
//! matching pool error and the caller degrades it per tool role.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};

use crate::protocol::{read_frame_async, write_frame_async, WorkerJob, WorkerReply};
use forge_domain::config::VerificationConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration and errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub size: usize,
    pub custom_timeout: Duration,
    pub max_queue_depth: usize,
    /// argv of the worker process (normally the sidecar binary with
    /// the `verifier-worker` subcommand).
    pub worker_command: Vec<String>,
}

impl PoolConfig {
    pub fn from_verification(cfg: &VerificationConfig, worker_command: Vec<String>) -> Self {
        Self {
            size: cfg
                .worker_pool_size
                .unwrap_or_else(|| std::cmp::min(4, num_cpus::get()))
                .max(1),
            custom_timeout: Duration::from_millis(cfg.custom_timeout),
            max_queue_depth: cfg.max_queue_depth,
            worker_command,
        }
    }
}

/// Why a submission did not produce a verifier reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    QueueFull,
    Timeout,
    Crashed,
    Shutdown,
    Spawn(String),
}

impl PoolError {
    /// Operator-facing message used in degraded verdicts.
    pub fn message(&self) -> String {
        match self {
            PoolError::QueueFull => "queue full".into(),
            PoolError::Timeout => "timed out".into(),
            PoolError::Crashed => "crashed".into(),
            PoolError::Shutdown => "shutting down".into(),
            PoolError::Spawn(e) => format!("worker spawn failed: {e}"),
        }
    }
}

/// A custom-verifier invocation, before it gets a job id.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub verifier_path: String,
    pub export_name: String,
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
}

type Reply = std::result::Result<WorkerReply, PoolError>;

enum PoolCmd {
    Submit {
        job: JobSpec,
        reply: oneshot::Sender<Reply>,
    },
    Destroy,
}

struct Assignment {
    job: WorkerJob,
    reply: oneshot::Sender<Reply>,
}

enum WorkerEvent {
    Idle(usize),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkerPool {
    cmd_tx: mpsc::Sender<PoolCmd>,
}

impl WorkerPool {
    pub fn start(cfg: PoolConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(manager(cfg, cmd_rx));
        Self { cmd_tx }
    }

    /// Submit a job and wait for its reply (bounded by the pool's
    /// per-call timeout on the worker side).
    pub async fn submit(&self, job: JobSpec) -> Reply {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(PoolCmd::Submit {
                job,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return Err(PoolError::Shutdown);
        }
        reply_rx.await.unwrap_or(Err(PoolError::Shutdown))
    }

    /// Stop the pool. Queued and inflight submissions resolve with
    /// [`PoolError::Shutdown`]; later submissions fail the same way.
    pub async fn destroy(&self) {
        let _ = self.cmd_tx.send(PoolCmd::Destroy).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn manager(cfg: PoolConfig, mut cmd_rx: mpsc::Receiver<PoolCmd>) {
    let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(cfg.size.max(1) * 2);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers: Vec<mpsc::Sender<Assignment>> = Vec::with_capacity(cfg.size);
    for slot in 0..cfg.size {
        let (job_tx, job_rx) = mpsc::channel::<Assignment>(1);
        tokio::spawn(worker_task(
            slot,
            cfg.clone(),
            job_rx,
            event_tx.clone(),
            shutdown_rx.clone(),
        ));
        workers.push(job_tx);
    }

    let mut idle: VecDeque<usize> = (0..cfg.size).collect();
    let mut queue: VecDeque<(JobSpec, oneshot::Sender<Reply>)> = VecDeque::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(PoolCmd::Submit { job, reply }) => {
                    if let Some(slot) = idle.pop_front() {
                        next_id += 1;
                        dispatch(&workers[slot], job, next_id, reply).await;
                    } else if queue.len() >= cfg.max_queue_depth {
                        let _ = reply.send(Err(PoolError::QueueFull));
                    } else {
                        queue.push_back((job, reply));
                    }
                }
                Some(PoolCmd::Destroy) | None => break,
            },
            event = event_rx.recv() => match event {
                Some(WorkerEvent::Idle(slot)) => {
                    if let Some((job, reply)) = queue.pop_front() {
                        next_id += 1;
                        dispatch(&workers[slot], job, next_id, reply).await;
                    } else {
                        idle.push_back(slot);
                    }
                }
                None => break,
            },
        }
    }

    // Shutdown: unblock inflight calls, flush the queue, then answer
    // every late submission until the handle is dropped.
    let _ = shutdown_tx.send(true);
    for (_, reply) in queue.drain(..) {
        let _ = reply.send(Err(PoolError::Shutdown));
    }
    drop(workers);
    while let Some(cmd) = cmd_rx.recv().await {
        if let PoolCmd::Submit { reply, .. } = cmd {
            let _ = reply.send(Err(PoolError::Shutdown));
        }
    }
}

async fn dispatch(
    worker: &mpsc::Sender<Assignment>,
    spec: JobSpec,
    id: u64,
    reply: oneshot::Sender<Reply>,
) {
    let job = WorkerJob {
        id,
        verifier_path: spec.verifier_path,
        export_name: spec.export_name,
        tool_name: spec.tool_name,
        args: spec.args,
        result: spec.result,
    };
    if worker.send(Assignment { job, reply }).await.is_err() {
        // Worker task is gone entirely; nothing left to resolve this.
        tracing::error!("verifier worker channel closed during dispatch");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker task (one child process per slot)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ChildHandles {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

async fn worker_task(
    slot: usize,
    cfg: PoolConfig,
    mut jobs: mpsc::Receiver<Assignment>,
    events: mpsc::Sender<WorkerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut child: Option<ChildHandles> = None;

    while let Some(Assignment { job, reply }) = jobs.recv().await {
        let job_id = job.id;
        let outcome = run_one(&cfg, &mut child, &job, &mut shutdown).await;

        match &outcome {
            Err(PoolError::Timeout) => {
                tracing::warn!(slot, job_id, "verifier call timed out; replacing worker");
                kill_child(&mut child).await;
            }
            Err(PoolError::Crashed) => {
                tracing::warn!(slot, job_id, "verifier worker crashed; replacing worker");
                kill_child(&mut child).await;
            }
            Err(PoolError::Shutdown) => {
                kill_child(&mut child).await;
            }
            _ => {}
        }

        let _ = reply.send(outcome);
        if events.send(WorkerEvent::Idle(slot)).await.is_err() {
            break;
        }
    }

    kill_child(&mut child).await;
}

async fn run_one(
    cfg: &PoolConfig,
    child: &mut Option<ChildHandles>,
    job: &WorkerJob,
    shutdown: &mut watch::Receiver<bool>,
) -> Reply {
    if child.is_none() {
        *child = Some(spawn_child(&cfg.worker_command).map_err(|e| {
            PoolError::Spawn(e.to_string())
        })?);
    }
    let handles = child.as_mut().ok_or(PoolError::Crashed)?;

    if write_frame_async(&mut handles.stdin, job).await.is_err() {
        return Err(PoolError::Crashed);
    }

    tokio::select! {
        _ = shutdown.changed() => Err(PoolError::Shutdown),
        read = tokio::time::timeout(
            cfg.custom_timeout,
            read_frame_async::<_, WorkerReply>(&mut handles.stdout),
        ) => match read {
            Err(_) => Err(PoolError::Timeout),
            Ok(Ok(Some(reply))) => Ok(reply),
            // EOF or garbage on the pipe both mean the worker died on us.
            Ok(Ok(None)) | Ok(Err(_)) => Err(PoolError::Crashed),
        },
    }
}

fn spawn_child(command: &[String]) -> std::io::Result<ChildHandles> {
    let (program, args) = command.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty worker command")
    })?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    let stdin = child.stdin.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdin unavailable")
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdout unavailable")
    })?;
    Ok(ChildHandles {
        child,
        stdin,
        stdout,
    })
}

async fn kill_child(child: &mut Option<ChildHandles>) {
    if let Some(mut handles) = child.take() {
        let _ = handles.child.kill().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job() -> JobSpec {
        JobSpec {
            verifier_path: "/opt/verifiers/check".into(),
            export_name: "default".into(),
            tool_name: "get_data".into(),
            args: serde_json::json!({}),
            result: serde_json::json!({"value": "ok"}),
        }
    }

    fn config(cmd: Vec<&str>, timeout_ms: u64, size: usize, depth: usize) -> PoolConfig {
        PoolConfig {
            size,
            custom_timeout: Duration::from_millis(timeout_ms),
            max_queue_depth: depth,
            worker_command: cmd.into_iter().map(String::from).collect(),
        }
    }

    #[tokio::test]
    async fn unresponsive_worker_times_out() {
        // `sleep` never answers the protocol; the call must resolve
        // with Timeout within the configured bound.
        let pool = WorkerPool::start(config(vec!["sleep", "30"], 150, 1, 4));
        let got = pool.submit(job()).await;
        assert_eq!(got, Err(PoolError::Timeout));
        pool.destroy().await;
    }

    #[tokio::test]
    async fn garbage_reply_counts_as_crash() {
        // `cat` echoes the job frame back; it does not parse as a
        // WorkerReply, which is indistinguishable from a corrupted
        // worker.
        let pool = WorkerPool::start(config(vec!["cat"], 2_000, 1, 4));
        let got = pool.submit(job()).await;
        assert_eq!(got, Err(PoolError::Crashed));
        pool.destroy().await;
    }

    #[tokio::test]
    async fn worker_is_replaced_after_crash() {
        let pool = WorkerPool::start(config(vec!["cat"], 2_000, 1, 4));
        assert_eq!(pool.submit(job()).await, Err(PoolError::Crashed));
        // The slot is usable again with a fresh child.
        assert_eq!(pool.submit(job()).await, Err(PoolError::Crashed));
        pool.destroy().await;
    }

    #[tokio::test]
    async fn overflowing_queue_rejects_immediately() {
        let pool = Arc::new(WorkerPool::start(config(vec!["sleep", "30"], 10_000, 1, 1)));

        // Occupy the only worker, then fill the queue's single slot.
        let p1 = pool.clone();
        let first = tokio::spawn(async move { p1.submit(job()).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let p2 = pool.clone();
        let second = tokio::spawn(async move { p2.submit(job()).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Third submission has nowhere to go.
        assert_eq!(pool.submit(job()).await, Err(PoolError::QueueFull));

        // Destroy resolves both the inflight and the queued call.
        pool.destroy().await;
        assert_eq!(first.await.unwrap(), Err(PoolError::Shutdown));
        assert_eq!(second.await.unwrap(), Err(PoolError::Shutdown));
    }

    #[tokio::test]
    async fn submissions_after_destroy_fail_fast() {
        let pool = WorkerPool::start(config(vec!["cat"], 1_000, 1, 4));
        pool.destroy().await;
        assert_eq!(pool.submit(job()).await, Err(PoolError::Shutdown));
    }

    #[tokio::test]
    async fn unspawnable_worker_reports_spawn_error() {
        let pool = WorkerPool::start(config(vec!["/no/such/binary-zzz"], 1_000, 1, 4));
        match pool.submit(job()).await {
            Err(PoolError::Spawn(_)) => {}
            other => panic!("expected Spawn error, got {other:?}"),
        }
        pool.destroy().await;
    }

    #[test]
    fn pool_size_defaults_to_cpu_bounded_four() {
        let cfg = PoolConfig::from_verification(
            &VerificationConfig::default(),
            vec!["worker".into()],
        );
        assert!(cfg.size >= 1 && cfg.size <= 4);
    }
}
