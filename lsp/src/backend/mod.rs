//! Diagnostics backends.
//!
//! A backend turns a [`RunScope`] into diagnostics. There are two: the
//! compiler backend runs cargo directly; the export-file backend reads the
//! file a supervised checker keeps rewriting. Both produce the same
//! [`RunOutput`], so the scheduler and the store never know which is active.

mod compiler;
mod export_file;

pub use compiler::CompilerBackend;
pub use export_file::ExportFileBackend;

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};

use lintlink_types::Diagnostic;

use crate::error::BackendError;

/// What a run is asked to cover.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunScope {
    Workspace,
    Document(PathBuf),
}

impl RunScope {
    /// Whether `path` falls inside this scope.
    #[must_use]
    pub fn includes(&self, path: &Path) -> bool {
        match self {
            Self::Workspace => true,
            Self::Document(doc) => doc == path,
        }
    }
}

/// How much of the workspace a finished run is known to have analyzed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    /// Every file was analyzed; absence from the output means clean.
    Complete,
    /// Only `analyzed` files are known to be up to date.
    Partial { analyzed: BTreeSet<PathBuf> },
}

impl Coverage {
    #[must_use]
    pub fn none() -> Self {
        Self::Partial {
            analyzed: BTreeSet::new(),
        }
    }

    /// Whether `path` is known to have been analyzed.
    #[must_use]
    pub fn covers(&self, path: &Path) -> bool {
        match self {
            Self::Complete => true,
            Self::Partial { analyzed } => analyzed.contains(path),
        }
    }
}

/// Diagnostics produced by one backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub diagnostics: Vec<Diagnostic>,
    pub coverage: Coverage,
}

impl RunOutput {
    #[must_use]
    pub fn complete(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            coverage: Coverage::Complete,
        }
    }

    /// Keep only the diagnostics inside `scope`.
    #[must_use]
    pub fn restrict_to(mut self, scope: &RunScope) -> Self {
        if let RunScope::Document(_) = scope {
            self.diagnostics.retain(|d| scope.includes(d.file_path()));
        }
        self
    }
}

/// Capability shared by every backend.
pub trait DiagnosticsBackend: Send + Sync + 'static {
    fn run(&self, scope: RunScope) -> impl Future<Output = Result<RunOutput, BackendError>> + Send;

    /// The scope to actually run for a requested one. The compiler always
    /// checks the whole workspace, so it widens document requests.
    fn effective_scope(&self, requested: RunScope) -> RunScope {
        requested
    }

    /// Whether a superseded in-flight run may be aborted. Aborting drops the
    /// run's future, which kills any child process it owns.
    fn abort_superseded(&self) -> bool {
        false
    }

    /// Whether periodic sweeps are worth running on an idle workspace.
    fn sweep_when_idle(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// The configured backend. Selected once at startup from settings.
pub enum Backend {
    Compiler(CompilerBackend),
    ExportFile(ExportFileBackend),
}

impl DiagnosticsBackend for Backend {
    async fn run(&self, scope: RunScope) -> Result<RunOutput, BackendError> {
        match self {
            Self::Compiler(backend) => backend.run(scope).await,
            Self::ExportFile(backend) => backend.run(scope).await,
        }
    }

    fn effective_scope(&self, requested: RunScope) -> RunScope {
        match self {
            Self::Compiler(backend) => backend.effective_scope(requested),
            Self::ExportFile(backend) => backend.effective_scope(requested),
        }
    }

    fn abort_superseded(&self) -> bool {
        match self {
            Self::Compiler(backend) => backend.abort_superseded(),
            Self::ExportFile(backend) => backend.abort_superseded(),
        }
    }

    fn sweep_when_idle(&self) -> bool {
        match self {
            Self::Compiler(backend) => backend.sweep_when_idle(),
            Self::ExportFile(backend) => backend.sweep_when_idle(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Compiler(backend) => backend.name(),
            Self::ExportFile(backend) => backend.name(),
        }
    }
}
