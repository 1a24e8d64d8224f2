//! Per-conversation sessions.
//!
//! # Architecture
//!
//! ```text
//! transport ──(key, event)──▶ SessionRegistry::dispatch
//!                                   │
//!                       one queue + task per SessionKey
//!                                   │
//!                                   ▼
//!                        SessionStateMachine::handle ──▶ Vec<Effect>
//!                                   │
//!             ┌─────────────────────┼──────────────────────┐
//!             ▼                     ▼                      ▼
//!      ReplySink::deliver   InferenceExecutor::execute   abort job
//!                                   │
//!                                   └── JobFinished ──▶ same queue
//! ```
//!
//! Events for one key are applied strictly in arrival order; different keys
//! never wait on each other.

pub mod machine;
pub mod registry;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use machine::SessionStateMachine;
pub use registry::{RegistryError, SessionHandle, SessionRegistry};
pub use state::{Effect, JobToken, Reply, SessionEvent, SessionState};
