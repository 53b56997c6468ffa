//! Sync scheduler: turns triggers into backend runs.
//!
//! One actor task owns all scheduling state. Each scope has a lane that is
//! either debouncing (a pending deadline) or idle; runs execute as tasks in a
//! `JoinSet` so several may be in flight. Every trigger bumps a generation
//! counter and tags its scope with it. A finished run whose generation is
//! older than its scope's latest is superseded and its result dropped; the
//! store applies the rest. A watched export file that settles after a burst
//! of writes triggers one workspace run.

use std::collections::HashMap;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};

use crate::backend::{DiagnosticsBackend, RunOutput, RunScope};
use crate::backoff::Backoff;
use crate::debounce::Debouncer;
use crate::diagnostics::DiagnosticsStore;
use crate::error::{BackendError, BackendErrorKind};
use crate::types::EngineEvent;
use crate::watcher::WatchState;

/// What asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Save,
    Change,
    Open,
    Periodic,
    Manual,
    /// The watched export file settled after being written.
    ExportWritten,
}

impl Trigger {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Change => "change",
            Self::Open => "open",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
            Self::ExportWritten => "export",
        }
    }
}

/// A scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub trigger: Trigger,
    pub scope: RunScope,
    /// Supersession key: only the scope's latest generation is applied.
    pub generation: u64,
    /// Retries already spent on this request.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub save_wait: Duration,
    pub change_wait: Duration,
    pub sweep_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Backoff,
}

impl SchedulerConfig {
    fn wait_for(&self, trigger: Trigger) -> Duration {
        match trigger {
            Trigger::Save => self.save_wait,
            Trigger::Change => self.change_wait,
            // The watcher already waited for the writes to stop.
            Trigger::Open | Trigger::Periodic | Trigger::Manual | Trigger::ExportWritten => {
                Duration::ZERO
            }
        }
    }
}

enum Command {
    Trigger { trigger: Trigger, scope: RunScope },
    Shutdown,
}

/// Handle to the scheduler task. Dropping it stops the task.
pub struct SchedulerHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn trigger(&self, trigger: Trigger, scope: RunScope) {
        if self.commands.send(Command::Trigger { trigger, scope }).is_err() {
            tracing::debug!("Scheduler is gone, dropping {} trigger", trigger.label());
        }
    }

    /// Stop scheduling and abort runs still in flight.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            tracing::error!("Scheduler task panicked: {e}");
        }
    }
}

struct Lane {
    debouncer: Debouncer,
    trigger: Trigger,
    attempt: u32,
}

struct InFlight {
    scope: RunScope,
    generation: u64,
    handle: AbortHandle,
}

struct Finished {
    request: RunRequest,
    result: Result<RunOutput, BackendError>,
}

pub struct Scheduler<B: DiagnosticsBackend> {
    backend: Arc<B>,
    store: Arc<RwLock<DiagnosticsStore>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    config: SchedulerConfig,
    lanes: HashMap<RunScope, Lane>,
    running: JoinSet<Finished>,
    in_flight: Vec<InFlight>,
    latest: HashMap<RunScope, u64>,
    generation: u64,
    /// Something was opened, changed or saved since the last workspace run.
    dirty: bool,
    last_failure: Option<BackendError>,
    export_writes: Option<watch::Receiver<WatchState>>,
    /// `settled` count of the last export burst that was scheduled.
    export_settled: u64,
}

impl<B: DiagnosticsBackend> Scheduler<B> {
    /// Spawn the scheduler task. Must be called inside a tokio runtime.
    ///
    /// With `export_writes`, every settled burst of export file writes
    /// schedules a workspace run.
    pub fn spawn(
        backend: Arc<B>,
        store: Arc<RwLock<DiagnosticsStore>>,
        events: mpsc::UnboundedSender<EngineEvent>,
        config: SchedulerConfig,
        export_writes: Option<watch::Receiver<WatchState>>,
    ) -> SchedulerHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let export_settled = export_writes
            .as_ref()
            .map_or(0, |state| state.borrow().settled);
        let scheduler = Self {
            backend,
            store,
            events,
            config,
            lanes: HashMap::new(),
            running: JoinSet::new(),
            in_flight: Vec::new(),
            latest: HashMap::new(),
            generation: 0,
            dirty: false,
            last_failure: None,
            export_writes,
            export_settled,
        };
        let task = tokio::spawn(scheduler.run_loop(rx));
        SchedulerHandle { commands, task }
    }

    async fn run_loop(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let interval = self.config.sweep_interval;
        let mut sweep = interval_at(Instant::now() + interval, interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(backend = self.backend.name(), "Scheduler started");

        loop {
            let deadline = self.next_deadline();
            // Disabled branches are still constructed, so give it something valid.
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + interval);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Trigger { trigger, scope }) => self.on_trigger(trigger, scope),
                    Some(Command::Shutdown) | None => break,
                },
                () = sleep_until(wake_at), if deadline.is_some() => self.fire_due(Instant::now()),
                _ = sweep.tick() => self.on_trigger(Trigger::Periodic, RunScope::Workspace),
                Some(joined) = self.running.join_next() => self.on_joined(joined).await,
                state = export_changed(&mut self.export_writes) => self.on_export_state(state),
            }
        }

        self.running.shutdown().await;
        tracing::debug!("Scheduler stopped");
    }

    fn on_export_state(&mut self, state: Option<WatchState>) {
        let Some(state) = state else {
            tracing::debug!("Export watcher stopped");
            self.export_writes = None;
            return;
        };
        if state.settled > self.export_settled {
            self.export_settled = state.settled;
            self.on_trigger(Trigger::ExportWritten, RunScope::Workspace);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.lanes
            .values()
            .filter_map(|lane| lane.debouncer.deadline())
            .min()
    }

    fn on_trigger(&mut self, trigger: Trigger, requested: RunScope) {
        let scope = self.backend.effective_scope(requested);

        if trigger == Trigger::Periodic {
            if !self.dirty && !self.backend.sweep_when_idle() {
                return;
            }
            let debouncing = self
                .lanes
                .get(&scope)
                .is_some_and(|lane| lane.debouncer.is_pending());
            if debouncing || self.in_flight.iter().any(|run| run.scope == scope) {
                return;
            }
        } else {
            self.dirty = true;
        }

        self.generation += 1;
        let generation = self.generation;
        self.latest.insert(scope.clone(), generation);
        tracing::debug!(
            trigger = trigger.label(),
            ?scope,
            generation,
            "Scheduling backend run"
        );

        if self.backend.abort_superseded() {
            self.in_flight.retain(|run| {
                if run.scope == scope {
                    tracing::debug!(generation = run.generation, "Aborting superseded run");
                    run.handle.abort();
                    false
                } else {
                    true
                }
            });
        }

        let wait = self.config.wait_for(trigger);
        let lane = self.lanes.entry(scope).or_insert_with(|| Lane {
            debouncer: Debouncer::new(),
            trigger,
            attempt: 0,
        });
        lane.trigger = trigger;
        lane.attempt = 0;
        lane.debouncer.trigger(Instant::now(), wait);
    }

    fn fire_due(&mut self, now: Instant) {
        let due: Vec<(RunScope, Trigger, u32)> = self
            .lanes
            .iter_mut()
            .filter_map(|(scope, lane)| {
                lane.debouncer
                    .fire(now)
                    .then(|| (scope.clone(), lane.trigger, lane.attempt))
            })
            .collect();
        self.lanes.retain(|_, lane| lane.debouncer.is_pending());
        for (scope, trigger, attempt) in due {
            self.start_run(scope, trigger, attempt);
        }
    }

    fn start_run(&mut self, scope: RunScope, trigger: Trigger, attempt: u32) {
        let generation = self.latest.get(&scope).copied().unwrap_or(self.generation);
        let request = RunRequest {
            trigger,
            scope: scope.clone(),
            generation,
            attempt,
        };
        tracing::debug!(
            backend = self.backend.name(),
            trigger = trigger.label(),
            ?scope,
            generation,
            attempt,
            "Starting backend run"
        );
        let backend = Arc::clone(&self.backend);
        let handle = self.running.spawn(async move {
            let result = backend.run(request.scope.clone()).await;
            Finished { request, result }
        });
        self.in_flight.push(InFlight {
            scope,
            generation,
            handle,
        });
    }

    async fn on_joined(&mut self, joined: Result<Finished, JoinError>) {
        match joined {
            Ok(finished) => {
                let generation = finished.request.generation;
                self.in_flight.retain(|run| run.generation != generation);
                self.on_finished(finished).await;
            }
            Err(e) => {
                if e.is_panic() {
                    tracing::error!("Backend run panicked: {e}");
                }
                self.in_flight.retain(|run| !run.handle.is_finished());
            }
        }
    }

    async fn on_finished(&mut self, finished: Finished) {
        let Finished { request, result } = finished;
        let superseded = self
            .latest
            .get(&request.scope)
            .is_some_and(|latest| request.generation < *latest);
        if superseded {
            tracing::debug!(
                generation = request.generation,
                scope = ?request.scope,
                "Discarding superseded run"
            );
            return;
        }

        match result {
            Ok(output) => {
                self.last_failure = None;
                if request.scope == RunScope::Workspace {
                    self.dirty = false;
                }
                let outcome =
                    self.store
                        .write()
                        .await
                        .apply_run(&request.scope, output, request.generation);
                if !outcome.changed.is_empty() {
                    let _ = self.events.send(EngineEvent::DiagnosticsChanged {
                        paths: outcome.changed,
                    });
                }
            }
            Err(err) if err.is_transient() && request.attempt < self.config.max_retries => {
                let delay = self.config.retry_backoff.delay(request.attempt);
                tracing::warn!(
                    "Backend run failed ({err}), retrying in {}ms (attempt {} of {})",
                    delay.as_millis(),
                    request.attempt + 1,
                    self.config.max_retries
                );
                let lane = self.lanes.entry(request.scope).or_insert_with(|| Lane {
                    debouncer: Debouncer::new(),
                    trigger: request.trigger,
                    attempt: 0,
                });
                lane.trigger = request.trigger;
                lane.attempt = request.attempt + 1;
                lane.debouncer.trigger(Instant::now(), delay);
            }
            Err(err) => self.report_failure(err),
        }
    }

    fn report_failure(&mut self, err: BackendError) {
        if self.last_failure.as_ref() == Some(&err) {
            tracing::debug!("Backend still failing: {err}");
            return;
        }
        tracing::error!("Backend run failed: {err}");
        self.last_failure = Some(err.clone());
        // These already reach the user through their own events.
        if matches!(
            err.kind,
            BackendErrorKind::Preferences | BackendErrorKind::CheckerUnavailable
        ) {
            return;
        }
        let _ = self.events.send(EngineEvent::BackendFailed(err));
    }
}

/// The next export watcher state; `None` once the watcher is gone.
async fn export_changed(writes: &mut Option<watch::Receiver<WatchState>>) -> Option<WatchState> {
    match writes {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => future::pending().await,
    }
}
