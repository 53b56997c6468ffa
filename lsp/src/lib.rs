//! Diagnostics synchronization engine and stdio language server.
//!
//! The engine keeps an in-memory view of the diagnostics produced by either
//! the compiler (`cargo clippy --message-format json`) or the export file a
//! background checker maintains, and reconciles it on saves, changes and
//! periodic sweeps. [`serve`] exposes that view over the language server
//! protocol.

pub mod backend;
pub mod backoff;
pub mod codec;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod parse;
pub mod preferences;
pub mod scheduler;
pub mod supervisor;
pub mod types;
pub mod watcher;

pub(crate) mod debounce;
pub(crate) mod protocol;
pub(crate) mod server;

pub use engine::DiagnosticsEngine;
pub use error::{BackendError, BackendErrorKind, ParseError};
pub use preferences::PreferenceIssue;
pub use server::serve;
pub use types::{EngineEvent, SupervisorState, SupervisorStatus};
