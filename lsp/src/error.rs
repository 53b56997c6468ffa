//! Error taxonomy for the synchronization engine.

use std::fmt;

/// A malformed export line or compiler record.
///
/// Local and non-fatal: the offending record is skipped and logged.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("expected at least {required} fields, found {found}")]
    MissingFields { found: usize, required: usize },
    #[error("field `{field}` is not a line/column number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("file field is empty")]
    EmptyPath,
    #[error(transparent)]
    InvertedRange(#[from] lintlink_types::InvertedRange),
    #[error("not a JSON record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Category of a failed backend run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The build tool could not be started.
    Launch,
    /// The build tool exited without finishing its report.
    Exit,
    /// The run exceeded its time budget.
    Timeout,
    /// Reading the export file failed.
    Io,
    /// Every record in the export file was malformed.
    Parse,
    /// Checker preferences are missing or incompatible.
    Preferences,
    /// The supervised checker is stopped after repeated crashes.
    CheckerUnavailable,
}

impl BackendErrorKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Launch => "launch failure",
            Self::Exit => "unexpected exit",
            Self::Timeout => "timeout",
            Self::Io => "I/O error",
            Self::Parse => "unparseable output",
            Self::Preferences => "incompatible checker preferences",
            Self::CheckerUnavailable => "checker unavailable",
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub detail: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn launch(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Launch, detail)
    }

    pub fn exit(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Exit, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, detail)
    }

    pub fn io(detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Io, detail)
    }

    /// Whether a retry may succeed without user action: timeouts and exits
    /// that happen while the checker or a build lock is momentarily busy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::Timeout | BackendErrorKind::Exit | BackendErrorKind::Io
        )
    }
}
