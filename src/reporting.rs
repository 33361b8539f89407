use std::sync::Mutex;
use tracing::error;

/// Fire-and-forget error sink. Calculation failures are absorbed at the
/// calculator client boundary and handed here; reporting never fails and
/// never aborts the surrounding batch.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &str, context: &str);
}

/// Default reporter: structured log output.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &str, context: &str) {
        error!("{}: {}", context, error);
    }
}

/// Collects reports for inspection; used by the test-suite.
#[derive(Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<(String, String)>>
}

impl CollectingReporter {
    pub fn new() -> CollectingReporter {
        CollectingReporter::default()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: &str, context: &str) {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((error.to_string(), context.to_string()));
    }
}
