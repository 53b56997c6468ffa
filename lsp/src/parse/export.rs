//! The checker's export line format.
//!
//! One record per diagnostic span, fields joined by [`DELIMITER`] in the
//! order fixed by [`LINE_FORMAT`]. Line and column numbers are 1-based on
//! disk and converted to 0-based here.

use std::path::Path;

use lintlink_types::{Diagnostic, Position, Range, Severity, resolve_path};

use super::clean_rendered;
use crate::error::ParseError;

/// Field separator, chosen so it never appears in compiler messages.
pub const DELIMITER: &str = "|:|";

/// The `line_format` the checker must be configured with.
pub const LINE_FORMAT: &str = "{diagnostic.level}|:|{span.file_name}|:|{span.line_start}|:|{span.line_end}|:|{span.column_start}|:|{span.column_end}|:|{diagnostic.message}|:|{diagnostic.rendered}|:|{span.suggested_replacement}";

/// level, file, line_start, line_end, column_start, column_end, message,
/// rendered, suggested_replacement
const FIELD_COUNT: usize = 9;
/// Everything up to and including the message.
const REQUIRED_FIELDS: usize = 7;

/// A record that could not be decoded, with the 1-based line it starts on.
#[derive(Debug)]
pub struct RecordFailure {
    pub line: usize,
    pub error: ParseError,
}

/// Result of decoding a whole export file.
#[derive(Debug, Default)]
pub struct ExportParse {
    pub diagnostics: Vec<Diagnostic>,
    pub failures: Vec<RecordFailure>,
    /// Number of records seen, decoded or not.
    pub records: usize,
}

impl ExportParse {
    /// True when there was at least one record and none decoded.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.records > 0 && self.failures.len() == self.records
    }
}

/// Decode one record. Relative file names are resolved against `root`.
pub fn parse_export_line(line: &str, root: &Path) -> Result<Diagnostic, ParseError> {
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    if fields.len() < REQUIRED_FIELDS {
        return Err(ParseError::MissingFields {
            found: fields.len(),
            required: REQUIRED_FIELDS,
        });
    }

    let file = fields[1].trim();
    if file.is_empty() {
        return Err(ParseError::EmptyPath);
    }
    let line_start = coordinate("line_start", fields[2])?;
    let line_end = optional_coordinate("line_end", fields[3])?.unwrap_or(line_start);
    let column_start = coordinate("column_start", fields[4])?;
    let column_end = optional_coordinate("column_end", fields[5])?.unwrap_or(column_start);
    let range = Range::new(
        Position::new(line_start, column_start),
        Position::new(line_end, column_end),
    )?;

    let detail = fields
        .get(7)
        .map(|rendered| clean_rendered(rendered))
        .filter(|rendered| !rendered.is_empty());
    let replacement = fields
        .get(8)
        .filter(|replacement| !replacement.is_empty())
        .map(|replacement| (*replacement).to_string());

    Ok(Diagnostic::new(
        Severity::from_level(fields[0]),
        resolve_path(root, Path::new(file)),
        range,
        fields[6].trim(),
    )
    .with_detail(detail)
    .with_suggested_replacement(replacement))
}

/// Decode a whole export file. Malformed records are collected in
/// `failures` and never abort the rest of the file.
pub fn parse_export(contents: &str, root: &Path) -> ExportParse {
    let mut parsed = ExportParse::default();
    for (line, record) in split_records(contents) {
        parsed.records += 1;
        match parse_export_line(&record, root) {
            Ok(diagnostic) => parsed.diagnostics.push(diagnostic),
            Err(error) => parsed.failures.push(RecordFailure { line, error }),
        }
    }
    parsed
}

/// Group physical lines into records. The rendered field spans several
/// lines; a line continues the previous record while that record has
/// started its rendered field but not yet reached the replacement field.
fn split_records(contents: &str) -> Vec<(usize, String)> {
    let mut records: Vec<(usize, String)> = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if let Some((_, record)) = records.last_mut()
            && awaits_continuation(record)
            && !starts_record(line)
        {
            record.push('\n');
            record.push_str(line);
            continue;
        }
        if !line.trim().is_empty() {
            records.push((index + 1, line.to_string()));
        }
    }
    records
}

fn awaits_continuation(record: &str) -> bool {
    let fields = record.matches(DELIMITER).count() + 1;
    fields > REQUIRED_FIELDS && fields < FIELD_COUNT
}

fn starts_record(line: &str) -> bool {
    line.split_once(DELIMITER).is_some_and(|(level, _)| {
        !level.is_empty() && level.chars().all(|c| c.is_ascii_lowercase() || c == '-')
    })
}

fn coordinate(field: &'static str, value: &str) -> Result<u32, ParseError> {
    value
        .trim()
        .parse::<u32>()
        .map(|v| v.saturating_sub(1))
        .map_err(|_| ParseError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn optional_coordinate(field: &'static str, value: &str) -> Result<Option<u32>, ParseError> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        coordinate(field, value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn root() -> PathBuf {
        PathBuf::from("/work")
    }

    /// Write a diagnostic back out the way the checker would.
    fn to_export_line(d: &Diagnostic) -> String {
        let range = d.range();
        [
            d.severity().label().to_string(),
            d.file_path().display().to_string(),
            (range.start().line + 1).to_string(),
            (range.end().line + 1).to_string(),
            (range.start().character + 1).to_string(),
            (range.end().character + 1).to_string(),
            d.message().to_string(),
            d.detail().unwrap_or_default().to_string(),
            d.suggested_replacement().unwrap_or_default().to_string(),
        ]
        .join(DELIMITER)
    }

    // ── parse_export_line ──────────────────────────────────────────────

    #[test]
    fn parses_full_record() {
        let line = "warning|:|src/lib.rs|:|3|:|4|:|5|:|12|:|unused import|:|warning: unused import|:|";
        let d = parse_export_line(line, &root()).unwrap();
        assert_eq!(d.severity(), Severity::Warning);
        assert_eq!(d.file_path(), Path::new("/work/src/lib.rs"));
        assert_eq!(d.range().start(), Position::new(2, 4));
        assert_eq!(d.range().end(), Position::new(3, 11));
        assert_eq!(d.message(), "unused import");
        assert_eq!(d.detail(), Some("warning: unused import"));
        assert_eq!(d.suggested_replacement(), None);
    }

    #[test]
    fn missing_end_coordinates_default_to_start() {
        let line = "error|:|/src/main.rs|:|11|:||:|4|:||:|unused variable";
        let d = parse_export_line(line, &root()).unwrap();
        assert_eq!(d.severity(), Severity::Error);
        assert_eq!(d.range(), Range::point(Position::new(10, 3)));
        assert_eq!(d.message(), "unused variable");
        assert_eq!(d.detail(), None);
    }

    #[test]
    fn too_few_fields_is_an_error() {
        let err = parse_export_line("error:/src/main:10:3:unused variable", &root()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingFields {
                found: 1,
                required: 7
            }
        ));
    }

    #[test]
    fn non_numeric_coordinate_is_an_error() {
        let err = parse_export_line("error|:|a.rs|:|x|:|1|:|1|:|1|:|m", &root()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidNumber {
                field: "line_start",
                ..
            }
        ));
    }

    #[test]
    fn inverted_range_is_an_error() {
        let err = parse_export_line("error|:|a.rs|:|9|:|2|:|1|:|1|:|m", &root()).unwrap_err();
        assert!(matches!(err, ParseError::InvertedRange(_)));
    }

    #[test]
    fn empty_file_is_an_error() {
        let err = parse_export_line("error|:| |:|1|:|1|:|1|:|1|:|m", &root()).unwrap_err();
        assert!(matches!(err, ParseError::EmptyPath));
    }

    #[test]
    fn extra_trailing_fields_ignored() {
        let line = "help|:|a.rs|:|1|:|1|:|5|:|9|:|remove it|:||:|bar|:|future|:|fields";
        let d = parse_export_line(line, &root()).unwrap();
        assert_eq!(d.severity(), Severity::Hint);
        assert_eq!(d.suggested_replacement(), Some("bar"));
    }

    #[test]
    fn rendered_detail_is_ansi_stripped() {
        let line = "error|:|a.rs|:|1|:|1|:|1|:|2|:|m|:|\u{1b}[1merror\u{1b}[0m: m\n|:|";
        let d = parse_export_line(line, &root()).unwrap();
        assert_eq!(d.detail(), Some("error: m"));
    }

    #[test]
    fn round_trip_reconstruction() {
        let lines = [
            "error|:|/work/src/main.rs|:|10|:|12|:|3|:|7|:|mismatched types|:|error[E0308]: mismatched types|:|",
            "help|:|/work/src/lib.rs|:|2|:|2|:|1|:|15|:|remove the unused import|:||:|use std::fmt;",
            "warning|:|/work/src/a.rs|:|1|:|1|:|1|:|1|:|empty span|:||:|",
        ];
        for line in lines {
            let first = parse_export_line(line, &root()).unwrap();
            let second = parse_export_line(&to_export_line(&first), &root()).unwrap();
            assert_eq!(first, second, "round trip changed {line}");
        }
    }

    // ── parse_export ───────────────────────────────────────────────────

    #[test]
    fn one_malformed_line_among_valid_ones() {
        let mut contents = String::new();
        for i in 1..=9 {
            contents.push_str(&format!(
                "warning|:|src/lib.rs|:|{i}|:|{i}|:|1|:|4|:|issue {i}|:||:|\n"
            ));
            if i == 5 {
                contents.push_str("this line is not a record\n");
            }
        }
        let parsed = parse_export(&contents, &root());
        assert_eq!(parsed.diagnostics.len(), 9);
        assert_eq!(parsed.failures.len(), 1);
        assert_eq!(parsed.failures[0].line, 6);
        assert_eq!(parsed.records, 10);
        assert!(!parsed.all_failed());
    }

    #[test]
    fn all_malformed_is_reported() {
        let parsed = parse_export("garbage\nmore garbage\n", &root());
        assert!(parsed.diagnostics.is_empty());
        assert!(parsed.all_failed());
    }

    #[test]
    fn empty_file_is_not_a_failure() {
        let parsed = parse_export("", &root());
        assert_eq!(parsed.records, 0);
        assert!(!parsed.all_failed());
    }

    #[test]
    fn multi_line_rendered_detail() {
        let contents = "\
error|:|src/main.rs|:|2|:|2|:|9|:|10|:|expected `;`|:|error: expected `;`
 --> src/main.rs:2:9
  |
2 |     let x = 1
  |              ^ help: add `;` here|:|;
warning|:|src/main.rs|:|4|:|4|:|1|:|2|:|unused|:||:|
";
        let parsed = parse_export(contents, &root());
        assert!(parsed.failures.is_empty(), "{:?}", parsed.failures);
        assert_eq!(parsed.diagnostics.len(), 2);
        let first = &parsed.diagnostics[0];
        assert_eq!(
            first.detail(),
            Some(
                "error: expected `;`\n --> src/main.rs:2:9\n  |\n2 |     let x = 1\n  |              ^ help: add `;` here"
            )
        );
        assert_eq!(first.suggested_replacement(), Some(";"));
        assert_eq!(parsed.diagnostics[1].message(), "unused");
    }

    #[test]
    fn short_record_does_not_absorb_following_garbage() {
        let contents = "error|:|a.rs|:|1|:|1|:|1|:|1|:|short\nnot a record\n";
        let parsed = parse_export(contents, &root());
        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(parsed.diagnostics[0].message(), "short");
        assert_eq!(parsed.failures.len(), 1);
    }

    #[test]
    fn crlf_line_endings() {
        let contents = "error|:|a.rs|:|1|:|1|:|1|:|1|:|m|:||:|\r\nwarning|:|b.rs|:|2|:|2|:|1|:|1|:|n|:||:|\r\n";
        let parsed = parse_export(contents, &root());
        assert_eq!(parsed.diagnostics.len(), 2);
        assert_eq!(parsed.diagnostics[1].file_path(), Path::new("/work/b.rs"));
    }
}
