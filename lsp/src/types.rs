//! Public types consumed by the protocol layer.
//!
//! The server receives [`EngineEvent`]s from the engine and reads
//! [`SupervisorStatus`] when reporting checker health.

use std::path::PathBuf;

use crate::error::BackendError;
use crate::preferences::PreferenceIssue;

/// An event emitted by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A backend run changed the diagnostics of these documents.
    DiagnosticsChanged { paths: Vec<PathBuf> },
    /// Checker preferences are missing or incompatible.
    PreferenceIssue(PreferenceIssue),
    /// A backend run failed and will not be retried.
    BackendFailed(BackendError),
    /// The supervised checker crashed too often and was given up on.
    CheckerUnavailable { detail: String },
}

/// Lifecycle of the supervised checker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Running,
    /// Exited unexpectedly; a restart is scheduled.
    Crashed,
    /// Terminal until `reset`: shut down, or restart cap exceeded.
    Stopped,
}

impl SupervisorState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Stopped => "stopped",
        }
    }
}

/// Snapshot of the supervisor, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    /// Restarts performed since the last start or reset.
    pub restarts: u32,
    /// How the last process exit or launch failure looked.
    pub last_exit: Option<String>,
    /// Set when `Stopped` was reached by exceeding the restart cap.
    pub fatal: bool,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::NotStarted,
            restarts: 0,
            last_exit: None,
            fatal: false,
        }
    }
}

impl SupervisorStatus {
    /// True when the checker will not come back without a reset.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.state == SupervisorState::Stopped && self.fatal
    }
}
