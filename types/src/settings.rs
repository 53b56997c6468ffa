//! Validated settings supplied by the host.
//!
//! The client sends `initializationOptions` as a camelCase JSON object. The
//! raw deserialization struct stays private; [`Settings`] is built from it at
//! the parse boundary via `#[serde(try_from)]`, so holding a `Settings` value
//! proves every field is usable.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("locationsFile must not be empty")]
    EmptyLocationsFile,
    #[error("runCheckerCommand must not be empty")]
    EmptyCheckerCommand,
    #[error("cargoCommand must not be empty")]
    EmptyCargoCommand,
    #[error("cargoEnv entry `{0}` is not of the form KEY=VALUE")]
    InvalidCargoEnv(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// What a workspace sweep does with previously diagnosed files it did not
/// report on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SweepClearing {
    /// Drop them only when the run is known to cover the whole workspace.
    #[default]
    WhenComplete,
    /// Drop them after every workspace run.
    Always,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSettings {
    locations_file: String,
    update_on_save: bool,
    update_on_save_wait_millis: u64,
    update_on_change: bool,
    update_on_change_cooldown_millis: u64,
    use_export_backend: bool,
    validate_preferences: bool,
    create_preferences_file: bool,
    preferences_file: Option<PathBuf>,
    run_checker_in_background: bool,
    run_checker_command: String,
    run_checker_arguments: String,
    synchronize_all_open_files_wait_millis: u64,
    run_timeout_millis: u64,
    max_backend_retries: u32,
    retry_initial_delay_millis: u64,
    max_checker_restarts: u32,
    checker_restart_delay_millis: u64,
    checker_restart_max_delay_millis: u64,
    cargo_command: String,
    cargo_command_arguments: String,
    cargo_env: Vec<String>,
    sweep_clearing: SweepClearing,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            locations_file: ".bacon-locations".to_string(),
            update_on_save: true,
            update_on_save_wait_millis: 1000,
            update_on_change: false,
            update_on_change_cooldown_millis: 5000,
            use_export_backend: false,
            validate_preferences: true,
            create_preferences_file: true,
            preferences_file: None,
            run_checker_in_background: true,
            run_checker_command: "bacon".to_string(),
            run_checker_arguments: "--headless -j lintlink".to_string(),
            synchronize_all_open_files_wait_millis: 2000,
            run_timeout_millis: 120_000,
            max_backend_retries: 2,
            retry_initial_delay_millis: 500,
            max_checker_restarts: 3,
            checker_restart_delay_millis: 500,
            checker_restart_max_delay_millis: 8000,
            cargo_command: "cargo".to_string(),
            cargo_command_arguments:
                "clippy --tests --all-features --all-targets --message-format json-diagnostic-rendered-ansi"
                    .to_string(),
            cargo_env: Vec::new(),
            sweep_clearing: SweepClearing::WhenComplete,
        }
    }
}

/// Resolved engine settings.
///
/// Invariants (enforced at the deserialization boundary): commands and the
/// locations file are non-empty, the sweep interval and run timeout are
/// non-zero, every `cargoEnv` entry is split into a key/value pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSettings")]
pub struct Settings {
    locations_file: PathBuf,
    update_on_save: bool,
    update_on_save_wait: Duration,
    update_on_change: bool,
    update_on_change_cooldown: Duration,
    use_export_backend: bool,
    validate_preferences: bool,
    create_preferences_file: bool,
    preferences_file: Option<PathBuf>,
    run_checker_in_background: bool,
    run_checker_command: String,
    run_checker_arguments: Vec<String>,
    sweep_interval: Duration,
    run_timeout: Duration,
    max_backend_retries: u32,
    retry_initial_delay: Duration,
    max_checker_restarts: u32,
    checker_restart_delay: Duration,
    checker_restart_max_delay: Duration,
    cargo_command: String,
    cargo_command_arguments: Vec<String>,
    cargo_env: Vec<(String, String)>,
    sweep_clearing: SweepClearing,
}

impl TryFrom<RawSettings> for Settings {
    type Error = SettingsError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        if raw.locations_file.trim().is_empty() {
            return Err(SettingsError::EmptyLocationsFile);
        }
        if raw.run_checker_command.trim().is_empty() {
            return Err(SettingsError::EmptyCheckerCommand);
        }
        if raw.cargo_command.trim().is_empty() {
            return Err(SettingsError::EmptyCargoCommand);
        }
        if raw.synchronize_all_open_files_wait_millis == 0 {
            return Err(SettingsError::ZeroDuration(
                "synchronizeAllOpenFilesWaitMillis",
            ));
        }
        if raw.run_timeout_millis == 0 {
            return Err(SettingsError::ZeroDuration("runTimeoutMillis"));
        }
        let cargo_env = raw
            .cargo_env
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_string(), value.to_string()))
                }
                _ => Err(SettingsError::InvalidCargoEnv(entry.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::resolve(raw, cargo_env))
    }
}

impl Settings {
    fn resolve(raw: RawSettings, cargo_env: Vec<(String, String)>) -> Self {
        Self {
            locations_file: PathBuf::from(raw.locations_file),
            update_on_save: raw.update_on_save,
            update_on_save_wait: Duration::from_millis(raw.update_on_save_wait_millis),
            update_on_change: raw.update_on_change,
            update_on_change_cooldown: Duration::from_millis(
                raw.update_on_change_cooldown_millis,
            ),
            use_export_backend: raw.use_export_backend,
            validate_preferences: raw.validate_preferences,
            create_preferences_file: raw.create_preferences_file,
            preferences_file: raw.preferences_file,
            run_checker_in_background: raw.run_checker_in_background,
            run_checker_command: raw.run_checker_command,
            run_checker_arguments: split_args(&raw.run_checker_arguments),
            sweep_interval: Duration::from_millis(raw.synchronize_all_open_files_wait_millis),
            run_timeout: Duration::from_millis(raw.run_timeout_millis),
            max_backend_retries: raw.max_backend_retries,
            retry_initial_delay: Duration::from_millis(raw.retry_initial_delay_millis),
            max_checker_restarts: raw.max_checker_restarts,
            checker_restart_delay: Duration::from_millis(raw.checker_restart_delay_millis),
            checker_restart_max_delay: Duration::from_millis(
                raw.checker_restart_max_delay_millis,
            ),
            cargo_command: raw.cargo_command,
            cargo_command_arguments: split_args(&raw.cargo_command_arguments),
            cargo_env,
            sweep_clearing: raw.sweep_clearing,
        }
    }
}

fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(RawSettings::default(), Vec::new())
    }
}

impl Settings {
    /// Export file location, relative to the project root unless absolute.
    #[must_use]
    pub fn locations_file(&self) -> &PathBuf {
        &self.locations_file
    }

    #[must_use]
    pub fn update_on_save(&self) -> bool {
        self.update_on_save
    }

    #[must_use]
    pub fn update_on_save_wait(&self) -> Duration {
        self.update_on_save_wait
    }

    #[must_use]
    pub fn update_on_change(&self) -> bool {
        self.update_on_change
    }

    #[must_use]
    pub fn update_on_change_cooldown(&self) -> Duration {
        self.update_on_change_cooldown
    }

    #[must_use]
    pub fn use_export_backend(&self) -> bool {
        self.use_export_backend
    }

    #[must_use]
    pub fn validate_preferences(&self) -> bool {
        self.validate_preferences
    }

    #[must_use]
    pub fn create_preferences_file(&self) -> bool {
        self.create_preferences_file
    }

    #[must_use]
    pub fn preferences_file(&self) -> Option<&PathBuf> {
        self.preferences_file.as_ref()
    }

    #[must_use]
    pub fn run_checker_in_background(&self) -> bool {
        self.run_checker_in_background
    }

    #[must_use]
    pub fn run_checker_command(&self) -> &str {
        &self.run_checker_command
    }

    #[must_use]
    pub fn run_checker_arguments(&self) -> &[String] {
        &self.run_checker_arguments
    }

    /// Periodic sweep interval (`synchronizeAllOpenFilesWaitMillis`).
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    #[must_use]
    pub fn max_backend_retries(&self) -> u32 {
        self.max_backend_retries
    }

    #[must_use]
    pub fn retry_initial_delay(&self) -> Duration {
        self.retry_initial_delay
    }

    #[must_use]
    pub fn max_checker_restarts(&self) -> u32 {
        self.max_checker_restarts
    }

    #[must_use]
    pub fn checker_restart_delay(&self) -> Duration {
        self.checker_restart_delay
    }

    #[must_use]
    pub fn checker_restart_max_delay(&self) -> Duration {
        self.checker_restart_max_delay
    }

    #[must_use]
    pub fn cargo_command(&self) -> &str {
        &self.cargo_command
    }

    #[must_use]
    pub fn cargo_command_arguments(&self) -> &[String] {
        &self.cargo_command_arguments
    }

    #[must_use]
    pub fn cargo_env(&self) -> &[(String, String)] {
        &self.cargo_env
    }

    #[must_use]
    pub fn sweep_clearing(&self) -> SweepClearing {
        self.sweep_clearing
    }
}
