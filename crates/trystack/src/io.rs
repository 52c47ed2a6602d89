use std::{
    io::{self, Write as _},
    sync::{Arc, Mutex, PoisonError},
};

/// Destination of the runtime's own diagnostics: uncaught-exception traces and
/// the dangling-block report.
///
/// The default [`StderrSink`] writes to stderr. Implement this trait to capture
/// or redirect the text.
pub trait DiagnosticSink {
    /// Writes `text` verbatim. Implementations add no separators or newlines.
    fn write_diagnostic(&mut self, text: &str);
}

/// Default `DiagnosticSink` that writes to stderr.
#[derive(Debug, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn write_diagnostic(&mut self, text: &str) {
        let mut stderr = io::stderr().lock();
        // nothing sensible to do if stderr is gone
        let _ = stderr.write_all(text.as_bytes());
        let _ = stderr.flush();
    }
}

/// A `DiagnosticSink` that collects all output into a shared string.
///
/// Clones share the buffer, so a test can keep one handle while the context
/// owns another, including across the thread that a fatal path terminates.
#[derive(Debug, Clone, Default)]
pub struct CollectDiagnostics(Arc<Mutex<String>>);

impl CollectDiagnostics {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl DiagnosticSink for CollectDiagnostics {
    fn write_diagnostic(&mut self, text: &str) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push_str(text);
    }
}

/// `DiagnosticSink` that ignores all output.
#[derive(Debug, Clone, Default)]
pub struct NoDiagnostics;

impl DiagnosticSink for NoDiagnostics {
    fn write_diagnostic(&mut self, _text: &str) {}
}
