//! Checker preference validation.
//!
//! The export-file backend only works when the checker has a job that runs
//! cargo with JSON output and an export that writes [`LINE_FORMAT`] records
//! to the configured locations file. This module finds the checker's
//! preference files, checks that shape field by field, and creates a minimal
//! file when none exists. It never rewrites a file that is already there.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::parse::LINE_FORMAT;

pub const JOB_NAME: &str = "lintlink";
pub const EXPORT_NAME: &str = "cargo-json-spans";
const ANALYZER: &str = "cargo_json";
const EXPORTER: &str = "analyzer";
const MESSAGE_FORMAT: &str = "json-diagnostic-rendered-ansi";
const JOB_COMMAND: [&str; 7] = [
    "cargo",
    "clippy",
    "--tests",
    "--all-targets",
    "--all-features",
    "--message-format",
    MESSAGE_FORMAT,
];

/// Why the checker cannot produce a usable export.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreferenceIssue {
    #[error("could not locate checker preferences: {detail}")]
    Discovery { detail: String },
    #[error(
        "checker preferences not found at {path}; enable createPreferencesFile or add the \
         `jobs.{job}` job and `exports.cargo-json-spans` export yourself"
    )]
    Missing { path: String, job: String },
    #[error("could not read checker preferences {path}: {detail}")]
    Unreadable { path: String, detail: String },
    #[error("checker preferences {path} are not valid TOML: {detail}")]
    Malformed { path: String, detail: String },
    #[error("checker preferences {path}: `{field}` is missing")]
    MissingField { path: String, field: String },
    #[error("checker preferences {path}: `{field}` must be {expected}, found {found}")]
    IncompatibleField {
        path: String,
        field: String,
        expected: String,
        found: String,
    },
    #[error("could not create checker preferences {path}: {detail}")]
    CreateFailed { path: String, detail: String },
}

#[derive(Debug, Clone)]
pub struct PreferencesValidator {
    /// Value the export's `path` must have.
    locations_file: PathBuf,
    checker_command: String,
    /// Job the checker is started with.
    job: String,
    /// Skips discovery when set.
    explicit_path: Option<PathBuf>,
    create_if_missing: bool,
    cwd: PathBuf,
}

impl PreferencesValidator {
    #[must_use]
    pub fn new(
        locations_file: PathBuf,
        checker_command: String,
        job: String,
        explicit_path: Option<PathBuf>,
        create_if_missing: bool,
        cwd: PathBuf,
    ) -> Self {
        Self {
            locations_file,
            checker_command,
            job,
            explicit_path,
            create_if_missing,
            cwd,
        }
    }

    /// Validate every existing preference file, creating one if none exists.
    pub async fn validate(&self) -> Result<(), PreferenceIssue> {
        let candidates = match &self.explicit_path {
            Some(path) => vec![path.clone()],
            None => self.discover().await?,
        };
        let Some(first) = candidates.first() else {
            return Err(PreferenceIssue::Discovery {
                detail: format!("`{} --prefs` listed no files", self.checker_command),
            });
        };

        let mut found_any = false;
        for candidate in &candidates {
            if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
                found_any = true;
                self.validate_file(candidate).await?;
            } else {
                tracing::debug!("Skipping absent preference file {}", candidate.display());
            }
        }
        if found_any {
            return Ok(());
        }
        if !self.create_if_missing {
            return Err(PreferenceIssue::Missing {
                path: first.display().to_string(),
                job: self.job.clone(),
            });
        }
        match self.create(first).await {
            Ok(()) => Ok(()),
            // Someone else created it meanwhile; judge what they wrote.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => self.validate_file(first).await,
            Err(e) => Err(PreferenceIssue::CreateFailed {
                path: first.display().to_string(),
                detail: e.to_string(),
            }),
        }
    }

    /// Check one preference file against the required shape.
    pub async fn validate_file(&self, path: &Path) -> Result<(), PreferenceIssue> {
        let display = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PreferenceIssue::Unreadable {
                path: display.clone(),
                detail: e.to_string(),
            })?;
        let table: toml::value::Table =
            toml::from_str(&content).map_err(|e| PreferenceIssue::Malformed {
                path: display.clone(),
                detail: e.to_string(),
            })?;

        let issues = self.check(&display, &table);
        for issue in &issues {
            tracing::warn!("{issue}");
        }
        match issues.into_iter().next() {
            Some(issue) => Err(issue),
            None => {
                tracing::info!(path = %path.display(), "Checker preferences are compatible");
                Ok(())
            }
        }
    }

    /// Every violation in `table`, in field order.
    fn check(&self, path: &str, table: &toml::value::Table) -> Vec<PreferenceIssue> {
        let mut issues = Vec::new();
        let job_prefix = format!("jobs.{}", self.job);
        let export_prefix = format!("exports.{EXPORT_NAME}");
        let job = lookup(table, &["jobs", self.job.as_str()]);
        let export = lookup(table, &["exports", EXPORT_NAME]);

        let mut expect = |section: Option<&toml::Value>,
                          prefix: &str,
                          key: &str,
                          expected: String,
                          matches: &dyn Fn(&toml::Value) -> bool| {
            let field = format!("{prefix}.{key}");
            match section.and_then(|s| s.get(key)) {
                None => issues.push(PreferenceIssue::MissingField {
                    path: path.to_string(),
                    field,
                }),
                Some(value) if !matches(value) => issues.push(PreferenceIssue::IncompatibleField {
                    path: path.to_string(),
                    field,
                    expected,
                    found: describe(value),
                }),
                Some(_) => {}
            }
        };

        expect(job, &job_prefix, "analyzer", format!("{ANALYZER:?}"), &|v| {
            v.as_str() == Some(ANALYZER)
        });
        expect(job, &job_prefix, "need_stdout", "true".into(), &|v| {
            v.as_bool() == Some(true)
        });
        expect(export, &export_prefix, "auto", "true".into(), &|v| {
            v.as_bool() == Some(true)
        });
        expect(export, &export_prefix, "exporter", format!("{EXPORTER:?}"), &|v| {
            v.as_str() == Some(EXPORTER)
        });
        expect(export, &export_prefix, "line_format", format!("{LINE_FORMAT:?}"), &|v| {
            v.as_str() == Some(LINE_FORMAT)
        });
        let locations = self.locations_file.display().to_string();
        expect(export, &export_prefix, "path", format!("{locations:?}"), &|v| {
            v.as_str().is_some_and(|s| Path::new(s) == self.locations_file)
        });

        // The command is optional; the checker falls back to its own default.
        if let Some(command) = job.and_then(|j| j.get("command"))
            && !requests_json_output(command)
        {
            issues.push(PreferenceIssue::IncompatibleField {
                path: path.to_string(),
                field: format!("{job_prefix}.command"),
                expected: format!("a command passing `--message-format {MESSAGE_FORMAT}`"),
                found: describe(command),
            });
        }
        issues
    }

    /// Ask the checker where it keeps its preferences.
    async fn discover(&self) -> Result<Vec<PathBuf>, PreferenceIssue> {
        let resolved = which::which(&self.checker_command).map_err(|e| {
            PreferenceIssue::Discovery {
                detail: format!("`{}` not found in PATH: {e}", self.checker_command),
            }
        })?;
        let output = Command::new(resolved)
            .arg("--prefs")
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PreferenceIssue::Discovery {
                detail: format!("`{} --prefs` failed: {e}", self.checker_command),
            })?;
        if !output.status.success() {
            return Err(PreferenceIssue::Discovery {
                detail: format!(
                    "`{} --prefs` exited with {}",
                    self.checker_command, output.status
                ),
            });
        }
        Ok(candidate_paths(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn create(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(&minimal_preferences(&self.job, &self.locations_file))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        tracing::info!("Created checker preferences {}", path.display());
        Ok(())
    }
}

/// The job named by `-j`/`--job` in the checker arguments, else [`JOB_NAME`].
#[must_use]
pub fn selected_job(args: &[String]) -> String {
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        if let Some(job) = arg.strip_prefix("--job=") {
            return job.to_string();
        }
        if (arg == "-j" || arg == "--job")
            && let Some(job) = args.next()
        {
            return job.clone();
        }
    }
    JOB_NAME.to_string()
}

fn lookup<'a>(table: &'a toml::value::Table, keys: &[&str]) -> Option<&'a toml::Value> {
    let (first, rest) = keys.split_first()?;
    rest.iter()
        .try_fold(table.get(*first)?, |value, key| value.get(*key))
}

fn requests_json_output(command: &toml::Value) -> bool {
    let Some(parts) = command.as_array() else {
        return false;
    };
    let parts: Vec<&str> = parts.iter().filter_map(toml::Value::as_str).collect();
    let inline = format!("--message-format={MESSAGE_FORMAT}");
    parts.iter().any(|p| *p == inline)
        || parts
            .windows(2)
            .any(|w| w[0] == "--message-format" && w[1] == MESSAGE_FORMAT)
}

fn describe(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => format!("{s:?}"),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(describe).collect();
            format!("[{}]", items.join(", "))
        }
        other => format!("a {}", other.type_str()),
    }
}

fn candidate_paths(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[derive(Serialize)]
struct PreferencesFile {
    jobs: BTreeMap<String, JobSpec>,
    exports: BTreeMap<&'static str, ExportSpec>,
}

#[derive(Serialize)]
struct JobSpec {
    command: Vec<&'static str>,
    analyzer: &'static str,
    need_stdout: bool,
}

#[derive(Serialize)]
struct ExportSpec {
    auto: bool,
    exporter: &'static str,
    line_format: &'static str,
    path: String,
}

fn minimal_preferences(job: &str, locations_file: &Path) -> PreferencesFile {
    PreferencesFile {
        jobs: BTreeMap::from([(
            job.to_string(),
            JobSpec {
                command: JOB_COMMAND.to_vec(),
                analyzer: ANALYZER,
                need_stdout: true,
            },
        )]),
        exports: BTreeMap::from([(
            EXPORT_NAME,
            ExportSpec {
                auto: true,
                exporter: EXPORTER,
                line_format: LINE_FORMAT,
                path: locations_file.display().to_string(),
            },
        )]),
    }
}
