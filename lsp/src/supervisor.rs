//! Supervision of the long-running external checker.
//!
//! The supervisor is the only component that starts, stops or restarts the
//! checker. Crashes are retried with capped exponential backoff; once the
//! restart cap is exceeded the supervisor stops, reports the checker as
//! unavailable exactly once, and stays stopped until [`Supervisor::reset`].

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::types::{EngineEvent, SupervisorState, SupervisorStatus};

/// How long a checker must stay up for its crash counter to reset.
pub const STABLE_AFTER: Duration = Duration::from_secs(60);
const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Restarts allowed after the first start before giving up.
    pub max_restarts: u32,
    pub backoff: Backoff,
    pub stable_after: Duration,
}

struct ActiveRun {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    config: SupervisorConfig,
    status: Arc<watch::Sender<SupervisorStatus>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    active: Option<ActiveRun>,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: SupervisorConfig, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        let (status, _) = watch::channel(SupervisorStatus::default());
        Self {
            config,
            status: Arc::new(status),
            events,
            active: None,
        }
    }

    /// Begin supervising. No-op while a supervision loop is already alive.
    pub fn start(&mut self) {
        if self
            .active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
        {
            return;
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(supervise(
            self.config.clone(),
            Arc::clone(&self.status),
            self.events.clone(),
            shutdown_rx,
        ));
        self.active = Some(ActiveRun { shutdown_tx, task });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    /// Bring a stopped supervisor back with a fresh restart counter.
    /// Returns whether a new supervision loop was started.
    pub fn reset(&mut self) -> bool {
        if self.status.borrow().state != SupervisorState::Stopped {
            return false;
        }
        tracing::info!("Resetting checker supervisor for '{}'", self.config.command);
        self.status.send_replace(SupervisorStatus::default());
        self.start();
        true
    }

    /// Stop supervising and kill the checker. No restarts follow.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown_tx.send(());
            let mut task = active.task;
            if tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), &mut task)
                .await
                .is_err()
            {
                tracing::debug!("Checker supervisor didn't stop in time, aborting");
                task.abort();
            }
        }
        self.status.send_modify(|status| {
            status.state = SupervisorState::Stopped;
        });
    }
}

async fn supervise(
    config: SupervisorConfig,
    status: Arc<watch::Sender<SupervisorStatus>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut failures: u32 = 0;
    loop {
        status.send_modify(|s| s.state = SupervisorState::Starting);

        let exit_detail = match spawn_checker(&config) {
            Ok(mut child) => {
                status.send_modify(|s| s.state = SupervisorState::Running);
                tracing::info!(
                    "Checker '{}' running (pid {:?})",
                    config.command,
                    child.id()
                );
                let started = Instant::now();
                tokio::select! {
                    exit = child.wait() => {
                        if started.elapsed() >= config.stable_after {
                            failures = 0;
                        }
                        describe_exit(exit)
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Stopping checker '{}'", config.command);
                        let _ = child.kill().await;
                        status.send_modify(|s| s.state = SupervisorState::Stopped);
                        return;
                    }
                }
            }
            Err(detail) => detail,
        };

        failures += 1;
        tracing::warn!(
            "Checker '{}' {exit_detail} (failure {failures} of {})",
            config.command,
            config.max_restarts + 1
        );
        status.send_modify(|s| {
            s.state = SupervisorState::Crashed;
            s.last_exit = Some(exit_detail.clone());
        });

        if failures > config.max_restarts {
            status.send_modify(|s| {
                s.state = SupervisorState::Stopped;
                s.fatal = true;
            });
            let detail = format!(
                "checker '{}' stopped after {failures} failed starts; last: {exit_detail}",
                config.command
            );
            tracing::error!("{detail}");
            let _ = events.send(EngineEvent::CheckerUnavailable { detail });
            return;
        }

        let delay = config.backoff.delay(failures - 1);
        tracing::debug!(delay_ms = delay.as_millis(), "Restarting checker after backoff");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = &mut shutdown_rx => {
                status.send_modify(|s| s.state = SupervisorState::Stopped);
                return;
            }
        }
        status.send_modify(|s| s.restarts += 1);
    }
}

fn spawn_checker(config: &SupervisorConfig) -> Result<Child, String> {
    let resolved = which::which(&config.command)
        .map_err(|e| format!("not found in PATH: {e}"))?;
    let log_output = checker_logging_enabled();
    let output = || if log_output { Stdio::piped() } else { Stdio::null() };
    let mut cmd = Command::new(resolved);
    cmd.args(&config.args)
        .current_dir(&config.cwd)
        .stdin(Stdio::null())
        .stdout(output())
        .stderr(output())
        .kill_on_drop(true);
    let mut child = cmd.spawn().map_err(|e| format!("failed to start: {e}"))?;

    if log_output {
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, true));
        }
    }
    Ok(child)
}

fn checker_logging_enabled() -> bool {
    env::var("LINTLINK_LOG_CHECKER").map_or(true, |v| v != "off")
}

async fn forward_lines<R: AsyncRead + Unpin>(stream: R, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            tracing::warn!(target: "lintlink::checker", "{line}");
        } else {
            tracing::info!(target: "lintlink::checker", "{line}");
        }
    }
}

fn describe_exit(exit: io::Result<ExitStatus>) -> String {
    match exit {
        Ok(status) => match status.code() {
            Some(code) => format!("exited with code {code}"),
            None => "was terminated by a signal".to_string(),
        },
        Err(e) => format!("could not be waited on: {e}"),
    }
}
