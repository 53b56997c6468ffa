//! Diagnostics store: the single source of truth published to the client.
//!
//! All mutation goes through [`DiagnosticsStore::apply_run`]. Each path
//! remembers the generation of the run that last wrote it, so a run that
//! finishes late can never overwrite a newer result.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use lintlink_types::{
    Diagnostic, DocumentDiagnostics, Edit, Range, SweepClearing, WorkspaceSnapshot,
};

use crate::backend::{RunOutput, RunScope};

/// What an `apply_run` call changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Paths whose diagnostics differ from before, sorted.
    pub changed: Vec<PathBuf>,
    /// True when the whole run was older than what the store already holds.
    pub discarded: bool,
}

pub struct DiagnosticsStore {
    data: HashMap<PathBuf, DocumentDiagnostics>,
    /// Generation of the run that last wrote (or cleared) each path.
    applied: HashMap<PathBuf, u64>,
    /// Generation of the last applied workspace-scope run.
    workspace_generation: u64,
    clearing: SweepClearing,
}

impl DiagnosticsStore {
    #[must_use]
    pub fn new(clearing: SweepClearing) -> Self {
        Self {
            data: HashMap::new(),
            applied: HashMap::new(),
            workspace_generation: 0,
            clearing,
        }
    }

    /// Fold one run's result into the store.
    pub fn apply_run(&mut self, scope: &RunScope, output: RunOutput, generation: u64) -> ApplyOutcome {
        if *scope == RunScope::Workspace && generation < self.workspace_generation {
            return ApplyOutcome {
                changed: Vec::new(),
                discarded: true,
            };
        }

        let mut grouped = group_by_path(output.diagnostics);
        let mut changed = Vec::new();

        match scope {
            RunScope::Document(path) => {
                if !self.is_fresh(path, generation) {
                    return ApplyOutcome {
                        changed,
                        discarded: true,
                    };
                }
                let doc = grouped.remove(path).unwrap_or_default();
                if self.replace(path.clone(), doc, generation) {
                    changed.push(path.clone());
                }
            }
            RunScope::Workspace => {
                self.workspace_generation = generation;

                let absent: Vec<PathBuf> = self
                    .data
                    .keys()
                    .filter(|path| !grouped.contains_key(*path))
                    .filter(|path| {
                        self.clearing == SweepClearing::Always || output.coverage.covers(path)
                    })
                    .cloned()
                    .collect();
                for path in absent {
                    if self.is_fresh(&path, generation)
                        && self.replace(path.clone(), DocumentDiagnostics::new(), generation)
                    {
                        changed.push(path);
                    }
                }

                for (path, doc) in grouped {
                    if self.is_fresh(&path, generation) && self.replace(path.clone(), doc, generation)
                    {
                        changed.push(path);
                    }
                }
            }
        }

        changed.sort();
        tracing::debug!(
            ?scope,
            generation,
            changed = changed.len(),
            files = self.data.len(),
            "Applied backend run"
        );
        ApplyOutcome {
            changed,
            discarded: false,
        }
    }

    #[must_use]
    pub fn get_document(&self, path: &Path) -> DocumentDiagnostics {
        self.data.get(path).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn get_workspace(&self) -> WorkspaceSnapshot {
        WorkspaceSnapshot::new(
            self.data
                .iter()
                .map(|(path, doc)| (path.clone(), doc.clone()))
                .collect(),
        )
    }

    /// Suggested edits from diagnostics in `path` overlapping `range`.
    #[must_use]
    pub fn code_actions(&self, path: &Path, range: &Range) -> Vec<Edit> {
        self.data
            .get(path)
            .map(|doc| doc.edits_overlapping(range))
            .unwrap_or_default()
    }

    fn is_fresh(&self, path: &Path, generation: u64) -> bool {
        self.applied.get(path).is_none_or(|applied| generation >= *applied)
    }

    /// Store `doc` for `path`; empty documents are removed. Returns whether
    /// the visible diagnostics changed.
    fn replace(&mut self, path: PathBuf, doc: DocumentDiagnostics, generation: u64) -> bool {
        self.applied.insert(path.clone(), generation);
        if doc.is_empty() {
            self.data.remove(&path).is_some()
        } else {
            self.data.insert(path, doc.clone()).as_ref() != Some(&doc)
        }
    }
}

fn group_by_path(diagnostics: Vec<Diagnostic>) -> BTreeMap<PathBuf, DocumentDiagnostics> {
    let mut grouped: BTreeMap<PathBuf, DocumentDiagnostics> = BTreeMap::new();
    for diagnostic in diagnostics {
        grouped
            .entry(diagnostic.file_path().to_path_buf())
            .or_default()
            .push(diagnostic);
    }
    grouped
}
