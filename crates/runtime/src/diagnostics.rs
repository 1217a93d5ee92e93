/// Severity of a recorded diagnostic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One recoverable problem noticed while parsing or resolving a document.
///
/// `kind` is a stable short tag (for example `"unknown-element"`) so callers can
/// filter without matching on message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn emit(&mut self, severity: Severity, kind: &'static str, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity,
            kind,
            message: message.into(),
        });
    }

    pub fn warn(&mut self, kind: &'static str, message: impl Into<String>) {
        self.emit(Severity::Warning, kind, message);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn count(&self, kind: &str) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::{Diagnostics, Severity};

    #[test]
    fn records_in_order_and_counts_by_kind() {
        let mut d = Diagnostics::new();
        d.warn("unknown-element", "Foo");
        d.emit(Severity::Error, "malformed-field", "width=abc");
        d.warn("unknown-element", "Bar");
        assert_eq!(d.entries().len(), 3);
        assert_eq!(d.count("unknown-element"), 2);
        assert_eq!(d.entries()[1].severity, Severity::Error);
    }

    #[test]
    fn drain_clears_entries() {
        let mut d = Diagnostics::new();
        d.warn("k", "m");
        assert_eq!(d.drain().len(), 1);
        assert!(d.is_empty());
    }
}
