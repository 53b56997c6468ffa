//! Core domain types for lintlink.
//!
//! This crate contains pure domain types with no IO and no async: the
//! diagnostic model shared by both backends, path normalization used for
//! document identity, and the validated settings supplied by the host.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod diagnostic;
mod path;
mod settings;

pub use diagnostic::{
    Diagnostic, DocumentDiagnostics, Edit, InvertedRange, Position, Range, Severity,
    WorkspaceSnapshot,
};
pub use path::{normalize_path, resolve_path};
pub use settings::{Settings, SettingsError, SweepClearing};
