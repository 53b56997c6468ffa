//! Compiler backend: run cargo with JSON output and parse it as it streams.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use lintlink_types::{Diagnostic, Settings};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::{Coverage, DiagnosticsBackend, RunOutput, RunScope};
use crate::error::BackendError;
use crate::parse::{CompilerLine, parse_compiler_line};

/// Stderr lines kept for the error detail of a failed run.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct CompilerBackend {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    root: PathBuf,
    timeout: Duration,
}

struct StdoutReport {
    diagnostics: Vec<Diagnostic>,
    /// `Some(success)` once cargo's `build-finished` line was seen.
    finished: Option<bool>,
    skipped: usize,
}

impl StdoutReport {
    /// A failed build may stop before checking every crate, so only files it
    /// reported on are known to be current.
    fn into_output(self) -> RunOutput {
        if self.finished != Some(false) {
            return RunOutput::complete(self.diagnostics);
        }
        let analyzed: BTreeSet<PathBuf> = self
            .diagnostics
            .iter()
            .map(|d| d.file_path().to_path_buf())
            .collect();
        tracing::debug!("Build failed; coverage limited to {} files", analyzed.len());
        RunOutput {
            diagnostics: self.diagnostics,
            coverage: Coverage::Partial { analyzed },
        }
    }
}

impl CompilerBackend {
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: Vec<(String, String)>,
        root: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            root,
            timeout,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings, root: &Path) -> Self {
        Self::new(
            settings.cargo_command(),
            settings.cargo_command_arguments().to_vec(),
            settings.cargo_env().to_vec(),
            root.to_path_buf(),
            settings.run_timeout(),
        )
    }

    async fn collect(&self) -> Result<RunOutput, BackendError> {
        let resolved = which::which(&self.command).map_err(|e| {
            BackendError::launch(format!("`{}` not found in PATH: {e}", self.command))
        })?;
        tracing::debug!(
            "Running `{} {}` in {}",
            self.command,
            self.args.join(" "),
            self.root.display()
        );

        let mut child = Command::new(resolved)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::launch(format!("failed to start `{}`: {e}", self.command)))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(BackendError::launch("compiler output was not captured"));
        };
        let (report, stderr_tail) =
            tokio::join!(self.read_stdout(stdout), read_stderr(stderr, cargo_logging_enabled()));
        let report = report?;
        let status = child
            .wait()
            .await
            .map_err(|e| BackendError::io(format!("failed to wait for `{}`: {e}", self.command)))?;

        if report.skipped > 0 {
            tracing::debug!("Skipped {} unparseable compiler lines", report.skipped);
        }
        tracing::debug!(
            "`{}` finished with {status}: {} diagnostics",
            self.command,
            report.diagnostics.len()
        );

        // A failing build still reports; only an exit before the report is an error.
        if report.finished.is_none() && !status.success() {
            let mut detail = format!("`{}` {status}", self.command);
            if let Some(last) = stderr_tail.back() {
                detail.push_str(": ");
                detail.push_str(last);
            }
            return Err(BackendError::exit(detail));
        }
        Ok(report.into_output())
    }

    async fn read_stdout<R: AsyncRead + Unpin>(
        &self,
        stdout: R,
    ) -> Result<StdoutReport, BackendError> {
        let mut report = StdoutReport {
            diagnostics: Vec::new(),
            finished: None,
            skipped: 0,
        };
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| BackendError::io(format!("failed to read compiler output: {e}")))?
        {
            if line.trim().is_empty() {
                continue;
            }
            match parse_compiler_line(&line, &self.root) {
                Ok(CompilerLine::Diagnostics(found)) => report.diagnostics.extend(found),
                Ok(CompilerLine::BuildFinished { success }) => report.finished = Some(success),
                Ok(CompilerLine::Other) => {}
                Err(e) => {
                    report.skipped += 1;
                    tracing::debug!("Skipping compiler output line: {e}");
                }
            }
        }
        Ok(report)
    }
}

async fn read_stderr<R: AsyncRead + Unpin>(stderr: R, log: bool) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if log {
            tracing::debug!(target: "lintlink::cargo", "{line}");
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

fn cargo_logging_enabled() -> bool {
    env::var("LINTLINK_LOG_CARGO").is_ok_and(|v| v != "off")
}

impl DiagnosticsBackend for CompilerBackend {
    async fn run(&self, scope: RunScope) -> Result<RunOutput, BackendError> {
        match tokio::time::timeout(self.timeout, self.collect()).await {
            Ok(output) => output.map(|output| output.restrict_to(&scope)),
            Err(_) => Err(BackendError::timeout(format!(
                "`{}` did not finish within {}s",
                self.command,
                self.timeout.as_secs_f32()
            ))),
        }
    }

    fn effective_scope(&self, _requested: RunScope) -> RunScope {
        RunScope::Workspace
    }

    fn abort_superseded(&self) -> bool {
        true
    }

    fn sweep_when_idle(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "compiler"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend::Coverage;
    use crate::error::BackendErrorKind;
    use lintlink_types::Severity;
    use serde_json::json;

    fn shell(root: &Path, script: &str, timeout: Duration) -> CompilerBackend {
        CompilerBackend::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            vec![("LINTLINK_TEST_VAR".to_string(), "from-env".to_string())],
            root.to_path_buf(),
            timeout,
        )
    }

    fn write_output(root: &Path, lines: &[serde_json::Value]) {
        let body: Vec<String> = lines.iter().map(ToString::to_string).collect();
        std::fs::write(root.join("out.json"), body.join("\n") + "\n").unwrap();
    }

    fn compiler_message(file: &str, line: u32, message: &str) -> serde_json::Value {
        json!({
            "reason": "compiler-message",
            "message": {
                "$message_type": "diagnostic",
                "message": message,
                "level": "warning",
                "rendered": format!("warning: {message}\n"),
                "spans": [{
                    "file_name": file,
                    "line_start": line,
                    "line_end": line,
                    "column_start": 5,
                    "column_end": 9,
                    "is_primary": true,
                    "suggested_replacement": null
                }],
                "children": []
            }
        })
    }

    #[tokio::test]
    async fn test_failing_build_still_reports() {
        let dir = tempfile::tempdir().unwrap();
        write_output(
            dir.path(),
            &[
                json!({"reason": "compiler-artifact", "package_id": "x"}),
                compiler_message("src/main.rs", 3, "unused variable: `x`"),
                json!({"reason": "build-finished", "success": false}),
            ],
        );
        let backend = shell(dir.path(), "cat out.json; echo oops >&2; exit 101", Duration::from_secs(10));

        let output = backend.run(RunScope::Workspace).await.unwrap();
        // Crates after the failure were never checked.
        assert_eq!(
            output.coverage,
            Coverage::Partial {
                analyzed: BTreeSet::from([dir.path().join("src/main.rs")]),
            }
        );
        assert_eq!(output.diagnostics.len(), 1);
        let diag = &output.diagnostics[0];
        assert_eq!(diag.severity(), Severity::Warning);
        assert_eq!(diag.message(), "unused variable: `x`");
        assert_eq!(diag.file_path(), dir.path().join("src/main.rs"));
        assert_eq!(diag.range().start().line, 2);
        assert_eq!(diag.range().start().character, 4);
    }

    #[tokio::test]
    async fn test_successful_build_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        write_output(
            dir.path(),
            &[
                compiler_message("src/lib.rs", 1, "dead code"),
                json!({"reason": "build-finished", "success": true}),
            ],
        );
        let backend = shell(dir.path(), "cat out.json", Duration::from_secs(10));
        let output = backend.run(RunScope::Workspace).await.unwrap();
        assert_eq!(output.coverage, Coverage::Complete);
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_garbage_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_output(dir.path(), &[compiler_message("src/lib.rs", 1, "dead code")]);
        let backend = shell(
            dir.path(),
            "echo 'Compiling foo v0.1.0'; cat out.json",
            Duration::from_secs(10),
        );
        let output = backend.run(RunScope::Workspace).await.unwrap();
        assert_eq!(output.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_exit_before_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = shell(
            dir.path(),
            "echo 'error: could not find `Cargo.toml`' >&2; exit 101",
            Duration::from_secs(10),
        );
        let err = backend.run(RunScope::Workspace).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Exit);
        assert!(err.detail.contains("could not find `Cargo.toml`"), "{}", err.detail);
    }

    #[tokio::test]
    async fn test_env_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let backend = shell(
            dir.path(),
            r#"test "$LINTLINK_TEST_VAR" = from-env || exit 7"#,
            Duration::from_secs(10),
        );
        let output = backend.run(RunScope::Workspace).await.unwrap();
        assert!(output.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let backend = shell(dir.path(), "sleep 30", Duration::from_millis(100));
        let err = backend.run(RunScope::Workspace).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_launch_failure() {
        let backend = CompilerBackend::new(
            "lintlink-test-no-such-cargo",
            Vec::new(),
            Vec::new(),
            env::temp_dir(),
            Duration::from_secs(1),
        );
        let err = backend.run(RunScope::Workspace).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Launch);
    }

    #[test]
    fn test_document_requests_widen_to_workspace() {
        let backend = shell(Path::new("/"), "true", Duration::from_secs(1));
        assert_eq!(
            backend.effective_scope(RunScope::Document(PathBuf::from("/w/a.rs"))),
            RunScope::Workspace
        );
        assert!(backend.abort_superseded());
        assert!(!backend.sweep_when_idle());
    }
}
