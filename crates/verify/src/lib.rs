//! Verifier execution for the forge sidecar.
//!
//! Schema and pattern verifiers run in-process; custom verifiers run in
//! a fixed pool of child worker processes speaking length-prefixed JSON
//! over stdin/stdout, because a hostile verifier can burn unbounded CPU
//! and a thread cannot be killed.

pub mod pattern;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod schema;
pub mod worker;

pub use pipeline::{Finding, Pipeline, VerifierIndex};
pub use pool::{PoolConfig, PoolError, WorkerPool};
