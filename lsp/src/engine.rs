//! `DiagnosticsEngine` facade: the surface the protocol layer talks to.
//!
//! Construction is initialization: [`DiagnosticsEngine::start`] selects the
//! backend from settings, validates checker preferences, starts the checker
//! supervisor and export watcher when the export backend is active, and
//! spawns the scheduler. Every path crossing this boundary is normalized so
//! lookups never miss on separator or case differences.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lintlink_types::{
    DocumentDiagnostics, Edit, Range, Settings, WorkspaceSnapshot, normalize_path, resolve_path,
};
use tokio::sync::{RwLock, mpsc, watch};

use crate::backend::{Backend, CompilerBackend, ExportFileBackend, RunScope};
use crate::backoff::Backoff;
use crate::diagnostics::DiagnosticsStore;
use crate::preferences::{PreferenceIssue, PreferencesValidator, selected_job};
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, Trigger};
use crate::supervisor::{STABLE_AFTER, Supervisor, SupervisorConfig};
use crate::types::{EngineEvent, SupervisorStatus};
use crate::watcher::{ExportWatcher, WatchState};

/// Preference validation and the gate the export backend reads.
struct PreferencesGate {
    validator: PreferencesValidator,
    issue: watch::Sender<Option<PreferenceIssue>>,
}

pub struct DiagnosticsEngine {
    settings: Settings,
    store: Arc<RwLock<DiagnosticsStore>>,
    scheduler: SchedulerHandle,
    supervisor: Option<Supervisor>,
    _watcher: Option<ExportWatcher>,
    preferences: Option<PreferencesGate>,
    events: mpsc::UnboundedSender<EngineEvent>,
    open: BTreeSet<PathBuf>,
}

impl DiagnosticsEngine {
    /// Start the engine for the project at `root`.
    ///
    /// Problems with the checker are reported as events on the returned
    /// receiver; they never prevent the engine from starting.
    pub async fn start(
        settings: Settings,
        root: &Path,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let root = normalize_path(root);
        let (events, events_rx) = mpsc::unbounded_channel();
        let store = Arc::new(RwLock::new(DiagnosticsStore::new(settings.sweep_clearing())));

        let mut supervisor = None;
        let mut watcher = None;
        let mut preferences = None;
        let mut export_writes = None;

        let backend = if settings.use_export_backend() {
            let locations = resolve_path(&root, settings.locations_file());

            let initial_issue = if settings.validate_preferences() {
                let validator = PreferencesValidator::new(
                    settings.locations_file().clone(),
                    settings.run_checker_command().to_string(),
                    selected_job(settings.run_checker_arguments()),
                    settings.preferences_file().cloned(),
                    settings.create_preferences_file(),
                    root.clone(),
                );
                let issue = validator.validate().await.err();
                if let Some(issue) = &issue {
                    let _ = events.send(EngineEvent::PreferenceIssue(issue.clone()));
                }
                let (tx, _) = watch::channel(issue.clone());
                preferences = Some(PreferencesGate {
                    validator,
                    issue: tx,
                });
                issue
            } else {
                None
            };

            let watch_state = match ExportWatcher::start(&locations, settings.update_on_save_wait())
            {
                Ok(w) => {
                    let state = w.state();
                    export_writes = Some(state.clone());
                    watcher = Some(w);
                    state
                }
                Err(e) => {
                    tracing::warn!("Export file watcher unavailable, reading without it: {e}");
                    watch::channel(WatchState::default()).1
                }
            };

            let mut backend = ExportFileBackend::new(
                locations,
                root.clone(),
                watch_state,
                settings.run_timeout(),
            );
            if let Some(gate) = &preferences {
                backend = backend.with_preferences(gate.issue.subscribe());
            }
            if settings.run_checker_in_background() {
                let mut checker = Supervisor::new(supervisor_config(&settings, &root), events.clone());
                backend = backend.with_supervisor(checker.subscribe());
                if initial_issue.is_none() {
                    checker.start();
                } else {
                    tracing::warn!("Not starting the checker until its preferences are fixed");
                }
                supervisor = Some(checker);
            }
            Backend::ExportFile(backend)
        } else {
            Backend::Compiler(CompilerBackend::from_settings(&settings, &root))
        };

        tracing::info!(
            "Diagnostics engine started for {} with the {} backend",
            root.display(),
            if settings.use_export_backend() { "export" } else { "compiler" }
        );
        let scheduler = Scheduler::spawn(
            Arc::new(backend),
            Arc::clone(&store),
            events.clone(),
            scheduler_config(&settings),
            export_writes,
        );

        let engine = Self {
            settings,
            store,
            scheduler,
            supervisor,
            _watcher: watcher,
            preferences,
            events,
            open: BTreeSet::new(),
        };
        (engine, events_rx)
    }

    pub async fn get_document_diagnostics(&self, path: &Path) -> DocumentDiagnostics {
        self.store.read().await.get_document(&normalize_path(path))
    }

    pub async fn get_workspace_diagnostics(&self) -> WorkspaceSnapshot {
        self.store.read().await.get_workspace()
    }

    /// Suggested edits from diagnostics overlapping `range`.
    pub async fn get_code_actions(&self, path: &Path, range: &Range) -> Vec<Edit> {
        self.store
            .read()
            .await
            .code_actions(&normalize_path(path), range)
    }

    pub fn on_document_saved(&self, path: &Path) {
        if self.settings.update_on_save() {
            self.scheduler
                .trigger(Trigger::Save, RunScope::Document(normalize_path(path)));
        }
    }

    pub fn on_document_changed(&self, path: &Path) {
        if self.settings.update_on_change() {
            self.scheduler
                .trigger(Trigger::Change, RunScope::Document(normalize_path(path)));
        }
    }

    pub fn on_document_opened(&mut self, path: &Path) {
        let path = normalize_path(path);
        self.open.insert(path.clone());
        self.scheduler.trigger(Trigger::Open, RunScope::Document(path));
    }

    /// Forget an open document. Its diagnostics stay in the store.
    pub fn on_document_closed(&mut self, path: &Path) {
        self.open.remove(&normalize_path(path));
    }

    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.open.contains(&normalize_path(path))
    }

    /// Manual resync: re-validate preferences, bring a stopped checker back,
    /// then run over the whole workspace.
    pub async fn refresh(&mut self) {
        let mut preferences_ok = true;
        if let Some(gate) = &self.preferences {
            let issue = gate.validator.validate().await.err();
            if let Some(issue) = &issue {
                let _ = self.events.send(EngineEvent::PreferenceIssue(issue.clone()));
            }
            preferences_ok = issue.is_none();
            gate.issue.send_replace(issue);
        }

        // `start` is a no-op while the checker is already up.
        if let Some(supervisor) = &mut self.supervisor
            && preferences_ok
            && !supervisor.reset()
        {
            supervisor.start();
        }
        self.scheduler.trigger(Trigger::Manual, RunScope::Workspace);
    }

    /// Checker health updates, when the engine supervises one.
    #[must_use]
    pub fn supervisor_status(&self) -> Option<watch::Receiver<SupervisorStatus>> {
        self.supervisor.as_ref().map(Supervisor::subscribe)
    }

    /// Stop timers and runs, then kill the checker. No restarts follow.
    pub async fn shutdown(mut self) {
        self.scheduler.shutdown().await;
        if let Some(supervisor) = &mut self.supervisor {
            supervisor.shutdown().await;
        }
        tracing::info!("Diagnostics engine stopped");
    }
}

fn supervisor_config(settings: &Settings, root: &Path) -> SupervisorConfig {
    SupervisorConfig {
        command: settings.run_checker_command().to_string(),
        args: settings.run_checker_arguments().to_vec(),
        cwd: root.to_path_buf(),
        max_restarts: settings.max_checker_restarts(),
        backoff: Backoff::new(
            settings.checker_restart_delay(),
            settings.checker_restart_max_delay(),
        ),
        stable_after: STABLE_AFTER,
    }
}

fn scheduler_config(settings: &Settings) -> SchedulerConfig {
    SchedulerConfig {
        save_wait: settings.update_on_save_wait(),
        change_wait: settings.update_on_change_cooldown(),
        sweep_interval: settings.sweep_interval(),
        max_retries: settings.max_backend_retries(),
        retry_backoff: Backoff::new(
            settings.retry_initial_delay(),
            settings.run_timeout(),
        ),
    }
}
