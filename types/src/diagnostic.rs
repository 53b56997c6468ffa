//! The diagnostic model shared by both backends.
//!
//! A [`Diagnostic`] is one issue at one location. Both the compiler backend
//! and the export-file backend produce exactly this shape, so everything
//! downstream (store, scheduler, protocol layer) is backend-agnostic.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::slice;

use crate::path::normalize_path;

/// Severity level for a diagnostic.
///
/// Discriminants match the LSP numeric severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error = 1,
    Warning = 2,
    Info = 3,
    Hint = 4,
}

impl Severity {
    /// Map a compiler or checker level string.
    ///
    /// Unknown levels map to `Error`.
    #[must_use]
    pub fn from_level(level: &str) -> Self {
        match level.trim() {
            "warning" | "failure-note" => Self::Warning,
            "note" | "info" | "information" => Self::Info,
            "help" | "hint" => Self::Hint,
            _ => Self::Error,
        }
    }

    /// LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    #[must_use]
    pub fn to_lsp(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Hint => "hint",
        }
    }
}

/// A 0-based (line, character) position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("range end {end_line}:{end_character} precedes start {start_line}:{start_character}")]
pub struct InvertedRange {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

/// A half-open range. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    start: Position,
    end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Result<Self, InvertedRange> {
        if end < start {
            return Err(InvertedRange {
                start_line: start.line,
                start_character: start.character,
                end_line: end.line,
                end_character: end.character,
            });
        }
        Ok(Self { start, end })
    }

    /// An empty range at `at`.
    #[must_use]
    pub fn point(at: Position) -> Self {
        Self { start: at, end: at }
    }

    #[must_use]
    pub fn start(&self) -> Position {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Position {
        self.end
    }

    /// Inclusive overlap, so a cursor sitting on either boundary of a
    /// diagnostic still counts as touching it.
    #[must_use]
    pub fn overlaps(&self, other: &Range) -> bool {
        !(self.end < other.start || other.end < self.start)
    }
}

/// A single diagnostic.
///
/// Fields are private; the path is normalized on construction so lookups by
/// document identity never miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: Severity,
    file_path: PathBuf,
    range: Range,
    message: String,
    detail: Option<String>,
    suggested_replacement: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: Severity,
        file_path: impl AsRef<Path>,
        range: Range,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            file_path: normalize_path(file_path.as_ref()),
            range,
            message: message.into(),
            detail: None,
            suggested_replacement: None,
        }
    }

    pub fn with_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_suggested_replacement(mut self, replacement: Option<String>) -> Self {
        self.suggested_replacement = replacement;
        self
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Long-form rendered text, ANSI-free.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    #[must_use]
    pub fn suggested_replacement(&self) -> Option<&str> {
        self.suggested_replacement.as_deref()
    }

    /// The edit this diagnostic suggests, if it carries a replacement.
    #[must_use]
    pub fn suggested_edit(&self) -> Option<Edit> {
        let new_text = self.suggested_replacement.clone()?;
        let title = if new_text.is_empty() {
            format!("Remove code: {}", self.message)
        } else {
            format!("Replace with: {new_text}")
        };
        Some(Edit {
            path: self.file_path.clone(),
            range: self.range,
            new_text,
            title,
        })
    }

    fn same_identity(&self, other: &Diagnostic) -> bool {
        self.range == other.range && self.message == other.message
    }
}

impl fmt::Display for Diagnostic {
    /// `path:line:col: severity: message`, 1-indexed for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file_path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.message,
        )
    }
}

/// A suggested text edit derived from a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub path: PathBuf,
    pub range: Range,
    pub new_text: String,
    pub title: String,
}

/// Diagnostics for one file, in parse order, deduplicated by `(range, message)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentDiagnostics {
    items: Vec<Diagnostic>,
}

impl DocumentDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless an item with the same identity exists. Returns whether
    /// the diagnostic was added.
    pub fn push(&mut self, diagnostic: Diagnostic) -> bool {
        if self.items.iter().any(|d| d.same_identity(&diagnostic)) {
            return false;
        }
        self.items.push(diagnostic);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    /// Edits from every diagnostic overlapping `range` that carries a
    /// suggested replacement.
    #[must_use]
    pub fn edits_overlapping(&self, range: &Range) -> Vec<Edit> {
        self.items
            .iter()
            .filter(|d| d.range.overlaps(range))
            .filter_map(Diagnostic::suggested_edit)
            .collect()
    }
}

impl FromIterator<Diagnostic> for DocumentDiagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        let mut doc = Self::new();
        for diagnostic in iter {
            doc.push(diagnostic);
        }
        doc
    }
}

impl<'a> IntoIterator for &'a DocumentDiagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Immutable view of every document the engine holds diagnostics for.
///
/// Counts are computed from `files` rather than cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    files: BTreeMap<PathBuf, DocumentDiagnostics>,
}

impl WorkspaceSnapshot {
    #[must_use]
    pub fn new(files: BTreeMap<PathBuf, DocumentDiagnostics>) -> Self {
        Self { files }
    }

    /// Per-file diagnostics keyed by normalized path.
    #[must_use]
    pub fn files(&self) -> &BTreeMap<PathBuf, DocumentDiagnostics> {
        &self.files
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&DocumentDiagnostics> {
        self.files.get(path)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.values().map(DocumentDiagnostics::len).sum()
    }
}
