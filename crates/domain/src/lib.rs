//! Shared domain types for the forge sidecar.
//!
//! Everything the other crates agree on lives here: the configuration
//! model, the shared error type, provider-agnostic message and tool
//! types, verifier types, and the streaming event vocabulary.

pub mod agent;
pub mod config;
pub mod error;
pub mod stream;
pub mod tool;
pub mod verifier;

pub use error::{Error, Result};
