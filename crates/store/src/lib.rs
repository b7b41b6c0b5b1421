//! Persistence for the forge sidecar.
//!
//! Three store families, each behind a small trait with tagged-variant
//! construction:
//! - [`conversation`] — append-only session transcripts (SQLite,
//!   Postgres, Redis, memory)
//! - [`registry`] — agents, user preferences, prompt versions, the tool
//!   registry, and verifier bindings (SQLite, Postgres)
//! - [`hitl`] — one-shot pause state for suspended loops (Redis >
//!   Postgres > SQLite > memory)
//!
//! Plus [`fixtures`], the tiny content-addressed output store consumed
//! by the external eval runner.

pub mod conversation;
pub mod fixtures;
pub mod hitl;
pub mod registry;

pub use conversation::{ConversationStore, IncompleteSession, Turn, COMPLETE_SENTINEL};
pub use hitl::HitlStore;
pub use registry::{PromptVersion, RegistryStore};
