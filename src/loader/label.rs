//! Label file parsing.
//!
//! Each non-blank line is `class cx cy w h`, separated by whitespace. The
//! parser never fails: a field that is missing or not a number becomes 0
//! and the row is kept. Exported datasets may contain such zero-filled rows
//! and downstream tools tolerate them, so the behavior is intentional.
//! Every substitution is reported through [`Diagnostics`].

use log::debug;

use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticContext, Diagnostics};
use crate::model::{Annotation, AnnotationId, ClassId, MAX_CLASS_COUNT};

const FIELD_NAMES: [&str; 5] = ["class", "center_x", "center_y", "width", "height"];

/// One parsed line, before it becomes an [`Annotation`].
#[derive(Clone, Debug, PartialEq)]
pub struct LabelRow {
    pub class_id: ClassId,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    /// Indices (0..5) of fields that were zero-filled.
    pub defaulted: Vec<usize>,
    /// Tokens past the fifth.
    pub extra_fields: usize,
}

impl LabelRow {
    pub fn is_clean(&self) -> bool {
        self.defaulted.is_empty() && self.extra_fields == 0
    }
}

fn parse_number(token: Option<&str>) -> Option<f64> {
    token
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

// Ids at or past MAX_CLASS_COUNT are malformed like any other bad field.
fn parse_class(token: Option<&str>) -> Option<ClassId> {
    parse_number(token)
        .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v < MAX_CLASS_COUNT as f64)
        .map(|v| ClassId::new(v as usize))
}

/// Parses a single line. Returns `None` for blank lines.
pub fn parse_label_line(line: &str) -> Option<LabelRow> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut defaulted = Vec::new();

    let class_id = parse_class(tokens.first().copied()).unwrap_or_else(|| {
        defaulted.push(0);
        ClassId::new(0)
    });

    let mut values = [0.0f64; 4];
    for (i, value) in values.iter_mut().enumerate() {
        match parse_number(tokens.get(i + 1).copied()) {
            Some(v) => *value = v,
            None => defaulted.push(i + 1),
        }
    }

    Some(LabelRow {
        class_id,
        center_x: values[0],
        center_y: values[1],
        width: values[2],
        height: values[3],
        defaulted,
        extra_fields: tokens.len().saturating_sub(5),
    })
}

/// Parses a whole label file.
///
/// Annotation ids are the zero-based line index, blank lines included, so
/// they stay stable for a given file.
pub fn parse_label_text(text: &str, entry: &str, diagnostics: &mut Diagnostics) -> Vec<Annotation> {
    let mut annotations = Vec::new();

    for (index, line) in text.split('\n').enumerate() {
        let Some(row) = parse_label_line(line) else {
            continue;
        };

        if !row.is_clean() {
            report_row(&row, line, entry, index + 1, diagnostics);
        }

        annotations.push(Annotation::rectangle(
            AnnotationId::new(index as u64),
            row.class_id,
            row.center_x,
            row.center_y,
            row.width,
            row.height,
        ));
    }

    annotations
}

fn report_row(row: &LabelRow, line: &str, entry: &str, line_no: usize, diagnostics: &mut Diagnostics) {
    let present = line.split_whitespace().count();
    debug!("Degraded label row {}:{}: '{}'", entry, line_no, line.trim());

    if present < 5 {
        diagnostics.add(Diagnostic::info(
            DiagnosticCode::ShortLabelLine,
            format!("{} of 5 fields present; missing fields set to 0", present),
            DiagnosticContext::line(entry, line_no),
        ));
    }

    let malformed: Vec<&str> = row
        .defaulted
        .iter()
        .filter(|i| **i < present)
        .map(|i| FIELD_NAMES[*i])
        .collect();
    if !malformed.is_empty() {
        diagnostics.add(Diagnostic::info(
            DiagnosticCode::MalformedLabelField,
            format!("invalid {} set to 0", malformed.join(", ")),
            DiagnosticContext::line(entry, line_no),
        ));
    }

    if row.extra_fields > 0 {
        diagnostics.add(Diagnostic::info(
            DiagnosticCode::ExtraLabelFields,
            format!("{} extra field(s) ignored", row.extra_fields),
            DiagnosticContext::line(entry, line_no),
        ));
    }
}

/// Parses raw label bytes, reporting non-UTF-8 content instead of failing.
pub fn parse_label_bytes(bytes: &[u8], entry: &str, diagnostics: &mut Diagnostics) -> Vec<Annotation> {
    match std::str::from_utf8(bytes) {
        Ok(text) => parse_label_text(text, entry, diagnostics),
        Err(e) => {
            diagnostics.add(Diagnostic::warning(
                DiagnosticCode::UnreadableLabelFile,
                format!("not valid UTF-8 ({}); decoded lossily", e),
                DiagnosticContext::entry(entry),
            ));
            parse_label_text(&String::from_utf8_lossy(bytes), entry, diagnostics)
        }
    }
}

/// Formats an annotation as a label line.
///
/// Values use Rust's shortest round-trip float formatting, so parsing the
/// line back yields the same numbers.
pub fn format_label_line(annotation: &Annotation) -> String {
    format!(
        "{} {} {} {} {}",
        annotation.class_id,
        annotation.center_x,
        annotation.center_y,
        annotation.width,
        annotation.height
    )
}

#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(line: &str) -> Option<LabelRow> {
    parse_label_line(line)
}

#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_bytes(bytes: &[u8]) -> usize {
    let mut diagnostics = Diagnostics::new();
    parse_label_bytes(bytes, "fuzz.txt", &mut diagnostics).len()
}
