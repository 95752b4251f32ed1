//! Accumulated diagnostics
//!
//! Resolution keeps going after partial failures. Everything that went wrong
//! (or was overridden) along the way is appended to a [`Diagnostics`] value
//! that travels with the result, so callers can decide what is fatal.

use crate::error::StackError;
use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational note
    Info,
    /// Something was degraded or overridden
    Warning,
    /// Failure-level; stops the calling command
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Diagnostic category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    ParseFailure,
    NotFound,
    CycleDetected,
    MissingVariable,
    ValidationFailure,
    /// A disabled service was forced on by a dependent
    DependencyConflict,
    /// Launch or IO trouble at the runtime boundary
    Runtime,
    Note,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::ParseFailure => "parse-failure",
            DiagnosticKind::NotFound => "not-found",
            DiagnosticKind::CycleDetected => "cycle-detected",
            DiagnosticKind::MissingVariable => "missing-variable",
            DiagnosticKind::ValidationFailure => "validation-failure",
            DiagnosticKind::DependencyConflict => "dependency-conflict",
            DiagnosticKind::Runtime => "runtime",
            DiagnosticKind::Note => "note",
        };
        write!(f, "{}", name)
    }
}

/// A single diagnostic entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub cause: Option<String>,
}

impl Diagnostic {
    /// Create a diagnostic without a cause
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying cause
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Downgrade an error into a diagnostic at the given severity
    pub fn from_error(severity: Severity, context: impl Into<String>, err: &StackError) -> Self {
        Self::new(severity, err.kind(), context).with_cause(err)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Append-only, ordered diagnostic collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic. It is traced at debug level only; callers
    /// report the collected entries themselves.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!("{} {}", diagnostic.severity, diagnostic);
        self.entries.push(diagnostic);
    }

    pub fn info(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Info, kind, message));
    }

    pub fn warn(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Warning, kind, message));
    }

    pub fn error(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Error, kind, message));
    }

    /// Record an error that was absorbed instead of propagated
    pub fn absorb(&mut self, severity: Severity, context: impl Into<String>, err: &StackError) {
        self.push(Diagnostic::from_error(severity, context, err));
    }

    /// Move every entry of `other` to the end of this collector
    pub fn append(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    /// Whether any failure-level entry was recorded
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    /// Whether any entry of the given kind was recorded
    pub fn contains_kind(&self, kind: DiagnosticKind) -> bool {
        self.entries.iter().any(|d| d.kind == kind)
    }

    pub fn count_kind(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    /// Entries grouped by severity, most severe first, insertion order kept
    /// within a group
    pub fn by_severity(&self) -> Vec<(Severity, Vec<&Diagnostic>)> {
        [Severity::Error, Severity::Warning, Severity::Info]
            .into_iter()
            .filter_map(|severity| {
                let group: Vec<&Diagnostic> = self
                    .entries
                    .iter()
                    .filter(|d| d.severity == severity)
                    .collect();
                (!group.is_empty()).then_some((severity, group))
            })
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A value together with the diagnostics produced while computing it
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub diagnostics: Diagnostics,
}

impl<T> Outcome<T> {
    pub fn new(value: T, diagnostics: Diagnostics) -> Self {
        Self { value, diagnostics }
    }

    /// Whether the value is usable without failure-level entries
    pub fn is_clean(&self) -> bool {
        !self.diagnostics.has_failures()
    }

    pub fn into_parts(self) -> (T, Diagnostics) {
        (self.value, self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_has_failures_only_on_error_level() {
        let mut diags = Diagnostics::new();
        diags.warn(DiagnosticKind::CycleDetected, "a -> b -> a");
        diags.info(DiagnosticKind::Note, "skipped x");
        assert!(!diags.has_failures());

        diags.error(DiagnosticKind::ParseFailure, "bad yaml");
        assert!(diags.has_failures());
        assert_eq!(diags.len(), 3);
    }

    #[test]
    fn test_by_severity_groups_most_severe_first() {
        let mut diags = Diagnostics::new();
        diags.info(DiagnosticKind::Note, "one");
        diags.error(DiagnosticKind::NotFound, "two");
        diags.info(DiagnosticKind::Note, "three");

        let groups = diags.by_severity();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Severity::Error);
        assert_eq!(groups[1].0, Severity::Info);
        let infos: Vec<&str> = groups[1].1.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(infos, vec!["one", "three"]);
    }

    #[test]
    fn test_absorb_keeps_cause_and_kind() {
        let mut diags = Diagnostics::new();
        let err = StackError::NotFound("compose.yaml".to_string());
        diags.absorb(Severity::Warning, "include skipped", &err);

        let entry = diags.iter().next().unwrap();
        assert_eq!(entry.kind, DiagnosticKind::NotFound);
        assert_eq!(entry.cause.as_deref(), Some("Not found: compose.yaml"));
        assert_eq!(
            entry.to_string(),
            "[not-found] include skipped: Not found: compose.yaml"
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record_at(level: tracing::Level) -> String {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut diags = Diagnostics::new();
            diags.warn(DiagnosticKind::CycleDetected, "a -> b -> a");
            diags.error(DiagnosticKind::ParseFailure, "bad yaml");
        });

        let bytes = log.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_push_is_quiet_above_debug() {
        assert!(record_at(tracing::Level::INFO).is_empty());

        let debug = record_at(tracing::Level::DEBUG);
        assert!(debug.contains("warning [cycle-detected] a -> b -> a"));
        assert!(debug.contains("error [parse-failure] bad yaml"));
    }

    #[test]
    fn test_append_preserves_order() {
        let mut first = Diagnostics::new();
        first.info(DiagnosticKind::Note, "a");
        let mut second = Diagnostics::new();
        second.info(DiagnosticKind::Note, "b");
        first.append(second);

        let messages: Vec<&str> = first.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }
}
