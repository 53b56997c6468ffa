//! Cargo's `--message-format json-diagnostic-rendered-ansi` stream.

use std::path::Path;

use lintlink_types::{Diagnostic, Position, Range, Severity, resolve_path};
use serde::Deserialize;
use serde_json::Value;

use super::clean_rendered;
use crate::error::ParseError;

#[derive(Debug, Deserialize)]
struct CargoSpan {
    file_name: String,
    line_start: u32,
    line_end: u32,
    column_start: u32,
    column_end: u32,
    #[serde(default)]
    is_primary: bool,
    suggested_replacement: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CargoChild {
    message: String,
    level: String,
    #[serde(default)]
    spans: Vec<CargoSpan>,
}

#[derive(Debug, Deserialize)]
struct CargoMessage {
    #[serde(rename = "$message_type")]
    message_type: Option<String>,
    message: String,
    level: String,
    rendered: Option<String>,
    #[serde(default)]
    spans: Vec<CargoSpan>,
    #[serde(default)]
    children: Vec<CargoChild>,
}

#[derive(Debug, Deserialize)]
struct CompilerMessageLine {
    message: CargoMessage,
}

#[derive(Debug, Deserialize)]
struct BuildFinishedLine {
    success: bool,
}

/// One decoded line of compiler output.
#[derive(Debug)]
pub enum CompilerLine {
    Diagnostics(Vec<Diagnostic>),
    /// The final line cargo writes once the build is over.
    BuildFinished { success: bool },
    /// Artifacts, build-script output and anything else without diagnostics.
    Other,
}

/// Decode one stdout line from the compiler.
pub fn parse_compiler_line(line: &str, root: &Path) -> Result<CompilerLine, ParseError> {
    let value: Value = serde_json::from_str(line)?;
    match value.get("reason").and_then(Value::as_str) {
        Some("compiler-message") => parse_compiler_record(&value, root).map(CompilerLine::Diagnostics),
        Some("build-finished") => {
            let finished = BuildFinishedLine::deserialize(&value)?;
            Ok(CompilerLine::BuildFinished {
                success: finished.success,
            })
        }
        _ => Ok(CompilerLine::Other),
    }
}

/// Flatten one `compiler-message` record: one Diagnostic per primary span,
/// plus one per child span (these carry the suggested replacements).
pub fn parse_compiler_record(record: &Value, root: &Path) -> Result<Vec<Diagnostic>, ParseError> {
    let line = CompilerMessageLine::deserialize(record)?;
    let message = line.message;
    if message.message_type.as_deref().is_some_and(|t| t != "diagnostic") {
        return Ok(Vec::new());
    }

    let detail = message
        .rendered
        .as_deref()
        .map(clean_rendered)
        .filter(|rendered| !rendered.is_empty());
    let severity = Severity::from_level(&message.level);

    let mut diagnostics = Vec::new();
    for span in message.spans.iter().filter(|span| span.is_primary) {
        diagnostics.push(
            span_diagnostic(span, severity, &message.message, root)?.with_detail(detail.clone()),
        );
    }
    for child in &message.children {
        let severity = Severity::from_level(&child.level);
        for span in &child.spans {
            diagnostics.push(span_diagnostic(span, severity, &child.message, root)?);
        }
    }
    Ok(diagnostics)
}

fn span_diagnostic(
    span: &CargoSpan,
    severity: Severity,
    message: &str,
    root: &Path,
) -> Result<Diagnostic, ParseError> {
    if span.file_name.trim().is_empty() {
        return Err(ParseError::EmptyPath);
    }
    let range = Range::new(
        Position::new(
            span.line_start.saturating_sub(1),
            span.column_start.saturating_sub(1),
        ),
        Position::new(
            span.line_end.saturating_sub(1),
            span.column_end.saturating_sub(1),
        ),
    )?;
    Ok(Diagnostic::new(
        severity,
        resolve_path(root, Path::new(&span.file_name)),
        range,
        message,
    )
    .with_suggested_replacement(span.suggested_replacement.clone()))
}
