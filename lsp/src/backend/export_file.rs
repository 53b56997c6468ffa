//! Export-file backend: read the file a supervised checker keeps rewriting.

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;

use super::{Coverage, DiagnosticsBackend, RunOutput, RunScope};
use crate::error::{BackendError, BackendErrorKind};
use crate::parse::parse_export;
use crate::preferences::PreferenceIssue;
use crate::types::SupervisorStatus;
use crate::watcher::WatchState;

pub struct ExportFileBackend {
    /// Absolute path of the export file.
    locations: PathBuf,
    root: PathBuf,
    watch: watch::Receiver<WatchState>,
    supervisor: Option<watch::Receiver<SupervisorStatus>>,
    /// Last preference validation result; `Some` blocks every run.
    preferences: watch::Receiver<Option<PreferenceIssue>>,
    timeout: Duration,
}

impl ExportFileBackend {
    #[must_use]
    pub fn new(
        locations: PathBuf,
        root: PathBuf,
        watch: watch::Receiver<WatchState>,
        timeout: Duration,
    ) -> Self {
        Self {
            locations,
            root,
            watch,
            supervisor: None,
            preferences: watch::channel(None).1,
            timeout,
        }
    }

    #[must_use]
    pub fn with_supervisor(mut self, status: watch::Receiver<SupervisorStatus>) -> Self {
        self.supervisor = Some(status);
        self
    }

    #[must_use]
    pub fn with_preferences(mut self, issue: watch::Receiver<Option<PreferenceIssue>>) -> Self {
        self.preferences = issue;
        self
    }

    fn check_ready(&self) -> Result<(), BackendError> {
        if let Some(issue) = self.preferences.borrow().as_ref() {
            return Err(BackendError::new(
                BackendErrorKind::Preferences,
                issue.to_string(),
            ));
        }
        if let Some(status) = &self.supervisor {
            let status = status.borrow();
            if status.is_unavailable() {
                return Err(BackendError::new(
                    BackendErrorKind::CheckerUnavailable,
                    status
                        .last_exit
                        .clone()
                        .unwrap_or_else(|| "checker stopped".to_string()),
                ));
            }
        }
        Ok(())
    }

    /// Wait until the watcher has seen the file quiet for its debounce window.
    async fn wait_until_settled(&self) -> Result<(), BackendError> {
        let mut state = self.watch.clone();
        match tokio::time::timeout(self.timeout, state.wait_for(|s| !s.pending)).await {
            Ok(Ok(_)) => Ok(()),
            // The watcher is gone; read whatever is on disk.
            Ok(Err(_)) => Ok(()),
            Err(_) => Err(BackendError::timeout(format!(
                "{} did not settle within {}s",
                self.locations.display(),
                self.timeout.as_secs_f32()
            ))),
        }
    }

    async fn read(&self) -> Result<RunOutput, BackendError> {
        let contents = match tokio::fs::read_to_string(&self.locations).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(
                    "Export file {} not written yet",
                    self.locations.display()
                );
                return Ok(RunOutput {
                    diagnostics: Vec::new(),
                    coverage: Coverage::none(),
                });
            }
            Err(e) => {
                return Err(BackendError::io(format!(
                    "failed to read {}: {e}",
                    self.locations.display()
                )));
            }
        };

        let parsed = parse_export(&contents, &self.root);
        for failure in &parsed.failures {
            tracing::warn!(
                "Skipping malformed record at {}:{}: {}",
                self.locations.display(),
                failure.line,
                failure.error
            );
        }
        if parsed.all_failed() {
            return Err(BackendError::new(
                BackendErrorKind::Parse,
                format!(
                    "none of the {} records in {} could be parsed",
                    parsed.records,
                    self.locations.display()
                ),
            ));
        }

        // A file whose only record was malformed must not be mistaken for clean.
        let coverage = if parsed.failures.is_empty() {
            Coverage::Complete
        } else {
            Coverage::Partial {
                analyzed: parsed
                    .diagnostics
                    .iter()
                    .map(|d| d.file_path().to_path_buf())
                    .collect::<BTreeSet<_>>(),
            }
        };
        Ok(RunOutput {
            diagnostics: parsed.diagnostics,
            coverage,
        })
    }
}

impl DiagnosticsBackend for ExportFileBackend {
    async fn run(&self, scope: RunScope) -> Result<RunOutput, BackendError> {
        self.check_ready()?;
        self.wait_until_settled().await?;
        Ok(self.read().await?.restrict_to(&scope))
    }

    fn name(&self) -> &'static str {
        "export"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SupervisorState;
    use lintlink_types::Severity;
    use std::path::Path;

    fn record(file: &str, line: u32, message: &str) -> String {
        format!("error|:|{file}|:|{line}|:|{line}|:|3|:|3|:|{message}|:||:|")
    }

    struct Fixture {
        dir: tempfile::TempDir,
        watch_tx: watch::Sender<WatchState>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                watch_tx: watch::channel(WatchState::default()).0,
            }
        }

        fn locations(&self) -> PathBuf {
            self.dir.path().join(".bacon-locations")
        }

        fn backend(&self, timeout: Duration) -> ExportFileBackend {
            ExportFileBackend::new(
                self.locations(),
                self.dir.path().to_path_buf(),
                self.watch_tx.subscribe(),
                timeout,
            )
        }
    }

    #[tokio::test]
    async fn test_reads_and_parses_export() {
        let fx = Fixture::new();
        std::fs::write(
            fx.locations(),
            format!("{}\n{}\n", record("src/main.rs", 10, "unused variable"), record("src/lib.rs", 1, "x")),
        )
        .unwrap();

        let output = fx.backend(Duration::from_secs(5)).run(RunScope::Workspace).await.unwrap();
        assert_eq!(output.coverage, Coverage::Complete);
        assert_eq!(output.diagnostics.len(), 2);
        let first = &output.diagnostics[0];
        assert_eq!(first.severity(), Severity::Error);
        assert_eq!(first.message(), "unused variable");
        assert_eq!(first.file_path(), fx.dir.path().join("src/main.rs"));
    }

    #[tokio::test]
    async fn test_document_scope_filters_other_files() {
        let fx = Fixture::new();
        std::fs::write(
            fx.locations(),
            format!("{}\n{}\n", record("src/main.rs", 1, "a"), record("src/lib.rs", 1, "b")),
        )
        .unwrap();
        let doc = fx.dir.path().join("src/lib.rs");
        let output = fx
            .backend(Duration::from_secs(5))
            .run(RunScope::Document(doc.clone()))
            .await
            .unwrap();
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].file_path(), doc);
    }

    #[tokio::test]
    async fn test_missing_file_covers_nothing() {
        let fx = Fixture::new();
        let output = fx.backend(Duration::from_secs(5)).run(RunScope::Workspace).await.unwrap();
        assert!(output.diagnostics.is_empty());
        assert!(!output.coverage.covers(Path::new("/anything")));
    }

    #[tokio::test]
    async fn test_partial_failure_narrows_coverage() {
        let fx = Fixture::new();
        std::fs::write(
            fx.locations(),
            format!("{}\nerror|:|src/lib.rs|:|oops\n", record("src/main.rs", 1, "a")),
        )
        .unwrap();
        let output = fx.backend(Duration::from_secs(5)).run(RunScope::Workspace).await.unwrap();
        assert_eq!(output.diagnostics.len(), 1);
        assert!(output.coverage.covers(&fx.dir.path().join("src/main.rs")));
        assert!(!output.coverage.covers(&fx.dir.path().join("src/lib.rs")));
    }

    #[tokio::test]
    async fn test_all_records_malformed_is_an_error() {
        let fx = Fixture::new();
        std::fs::write(fx.locations(), "garbage\nmore garbage\n").unwrap();
        let err = fx.backend(Duration::from_secs(5)).run(RunScope::Workspace).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_waits_for_pending_writes_to_settle() {
        let fx = Fixture::new();
        fx.watch_tx.send_modify(|s| s.pending = true);
        let backend = fx.backend(Duration::from_secs(5));

        let path = fx.locations();
        let tx = fx.watch_tx.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(&path, record("src/main.rs", 2, "late")).await.unwrap();
            tx.send_modify(|s| {
                s.pending = false;
                s.settled += 1;
            });
        });

        let output = backend.run(RunScope::Workspace).await.unwrap();
        writer.await.unwrap();
        assert_eq!(output.diagnostics.len(), 1);
        assert_eq!(output.diagnostics[0].message(), "late");
    }

    #[tokio::test]
    async fn test_never_settling_times_out() {
        let fx = Fixture::new();
        fx.watch_tx.send_modify(|s| s.pending = true);
        let err = fx
            .backend(Duration::from_millis(50))
            .run(RunScope::Workspace)
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_preference_issue_blocks_runs() {
        let fx = Fixture::new();
        let (issue_tx, issue_rx) = watch::channel(Some(PreferenceIssue::Missing {
            path: "/prefs.toml".to_string(),
            job: "lintlink".to_string(),
        }));
        let backend = fx.backend(Duration::from_secs(5)).with_preferences(issue_rx);
        let err = backend.run(RunScope::Workspace).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Preferences);

        issue_tx.send_replace(None);
        assert!(backend.run(RunScope::Workspace).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_checker_blocks_runs() {
        let fx = Fixture::new();
        let (_status_tx, status_rx) = watch::channel(SupervisorStatus {
            state: SupervisorState::Stopped,
            restarts: 3,
            last_exit: Some("exited with code 1".to_string()),
            fatal: true,
        });
        let err = fx
            .backend(Duration::from_secs(5))
            .with_supervisor(status_rx)
            .run(RunScope::Workspace)
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::CheckerUnavailable);
        assert_eq!(err.detail, "exited with code 1");
    }
}
