//! Side channel for recoverable conditions.
//!
//! Nothing reported here is a failure: malformed label fields still become
//! (zero-filled) annotations, a split that cannot be resolved leaves the
//! other splits intact, and so on. Callers decide whether to show them.

use serde::Serialize;
use std::fmt;

use crate::model::{ClassId, Split};

/// Everything noteworthy that happened during one operation.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Diagnostics {
    pub entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// Number of entries with the given code.
    pub fn count(&self, code: DiagnosticCode) -> usize {
        self.entries.iter().filter(|d| d.code == code).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return writeln!(f, "No diagnostics");
        }
        writeln!(
            f,
            "{} diagnostic(s), {} warning(s):",
            self.entries.len(),
            self.warning_count()
        )?;
        for entry in &self.entries {
            writeln!(f, "  {}", entry)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub context: DiagnosticContext,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        code: DiagnosticCode,
        message: impl Into<String>,
        context: DiagnosticContext,
    ) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            context,
        }
    }

    pub fn info(code: DiagnosticCode, message: impl Into<String>, context: DiagnosticContext) -> Self {
        Self::new(Severity::Info, code, message, context)
    }

    pub fn warning(
        code: DiagnosticCode,
        message: impl Into<String>,
        context: DiagnosticContext,
    ) -> Self {
        Self::new(Severity::Warning, code, message, context)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
        };
        write!(
            f,
            "[{}] {:?} in {}: {}",
            severity, self.code, self.context, self.message
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// Stable codes for filtering diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    /// A label field was not a usable number and became 0.
    MalformedLabelField,
    /// A label line had fewer than five fields; the rest became 0.
    ShortLabelLine,
    /// A label line had more than five fields; the extra ones were ignored.
    ExtraLabelFields,
    /// A label file was not valid UTF-8.
    UnreadableLabelFile,
    /// A label referenced a class past the end of the table.
    ClassTableExtended,
    /// A manifest listed the same class name twice; the repeat was renamed.
    DuplicateClassName,
    /// No folder was found for a split.
    SplitUnresolved,
    /// An image could not be decoded while loading. Its record is kept.
    ImageUndecodable,
    /// A second image with the same name was found in a split and skipped.
    DuplicateImageName,
    /// Memory use crossed the warning threshold.
    MemoryPressure,
    /// A thumbnail could not be produced.
    ThumbnailSkipped,
}

/// Where a diagnostic applies.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DiagnosticContext {
    Dataset,
    Split { split: Split },
    Entry { entry: String, line: Option<usize> },
    Class { id: ClassId },
}

impl DiagnosticContext {
    pub fn entry(entry: impl Into<String>) -> Self {
        DiagnosticContext::Entry {
            entry: entry.into(),
            line: None,
        }
    }

    pub fn line(entry: impl Into<String>, line: usize) -> Self {
        DiagnosticContext::Entry {
            entry: entry.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for DiagnosticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticContext::Dataset => write!(f, "dataset"),
            DiagnosticContext::Split { split } => write!(f, "split {}", split),
            DiagnosticContext::Entry { entry, line: None } => write!(f, "{}", entry),
            DiagnosticContext::Entry {
                entry,
                line: Some(line),
            } => write!(f, "{}:{}", entry, line),
            DiagnosticContext::Class { id } => write!(f, "class {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_diagnostics_display() {
        assert_eq!(Diagnostics::new().to_string(), "No diagnostics\n");
    }

    #[test]
    fn test_counts_by_code_and_severity() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.add(Diagnostic::info(
            DiagnosticCode::ShortLabelLine,
            "2 of 5 fields",
            DiagnosticContext::line("train/labels/a.txt", 3),
        ));
        diagnostics.add(Diagnostic::warning(
            DiagnosticCode::SplitUnresolved,
            "no folder",
            DiagnosticContext::Split { split: Split::Test },
        ));

        assert_eq!(diagnostics.warning_count(), 1);
        assert_eq!(diagnostics.count(DiagnosticCode::ShortLabelLine), 1);
        let rendered = diagnostics.to_string();
        assert!(rendered.contains("train/labels/a.txt:3"));
        assert!(rendered.contains("[WARN] SplitUnresolved in split test"));
    }
}
