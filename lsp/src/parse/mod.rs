//! Decoders turning checker and compiler output into [`Diagnostic`] records.
//!
//! [`Diagnostic`]: lintlink_types::Diagnostic

mod cargo;
mod export;

pub use cargo::{CompilerLine, parse_compiler_line, parse_compiler_record};
pub use export::{
    DELIMITER, ExportParse, LINE_FORMAT, RecordFailure, parse_export, parse_export_line,
};

use regex::Regex;
use std::sync::LazyLock;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)")
        .expect("valid ANSI escape regex")
});

/// Remove terminal color and hyperlink escapes, then trailing newlines.
pub(crate) fn clean_rendered(text: &str) -> String {
    ANSI_ESCAPE
        .replace_all(text, "")
        .trim_end_matches(['\n', '\r'])
        .to_string()
}
