//! Structured progress reporting for index builds.
//!
//! Provides observable, incremental feedback while the embedder discovers
//! files, embeds them and prunes stale entries.

use std::sync::Arc;
use std::time::Instant;

/// Progress event emitted during indexing.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Phase of the operation: "discover", "embed", "index"
    pub phase: String,

    /// Current progress (files found, files embedded, entries pruned)
    pub current: u64,

    /// Total expected work (if known)
    pub total: Option<u64>,

    /// Percentage complete (0.0 - 100.0)
    pub percentage: Option<f64>,

    /// Human-readable message
    pub message: String,

    /// Elapsed time since the reporter was created
    pub elapsed_secs: Option<f64>,
}

impl ProgressEvent {
    pub fn new(
        phase: impl Into<String>,
        current: u64,
        total: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        let percentage = total.map(|t| {
            if t > 0 {
                (current as f64 / t as f64) * 100.0
            } else {
                0.0
            }
        });

        Self {
            phase: phase.into(),
            current,
            total,
            percentage,
            message: message.into(),
            elapsed_secs: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed_secs: f64) -> Self {
        self.elapsed_secs = Some(elapsed_secs);
        self
    }

    /// Format as a simple user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => format!("{}", self.current),
        };

        let pct = self
            .percentage
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress reporter that emits events through a callback.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Arc<Instant>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Arc::new(Instant::now()),
        }
    }

    /// A reporter that only traces.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Arc::new(Instant::now()),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let event = event.with_elapsed(elapsed);

        tracing::debug!(
            phase = %event.phase,
            current = event.current,
            total = ?event.total,
            message = %event.message,
            elapsed_secs = elapsed,
            "Index progress"
        );

        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    /// Files found by the initial walk.
    pub fn discover(&self, found: u64, root: &str) {
        self.emit(ProgressEvent::new(
            "discover",
            found,
            None,
            format!("scanned {}", root),
        ));
    }

    /// One file embedded (or skipped as unchanged).
    pub fn embed(&self, current: u64, total: Option<u64>, file: &str) {
        self.emit(ProgressEvent::new("embed", current, total, file.to_string()));
    }

    /// Stale entries queued for removal.
    pub fn index(&self, pruned: u64) {
        self.emit(ProgressEvent::new(
            "index",
            pruned,
            None,
            "pruning entries for deleted files",
        ));
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_event_format() {
        let event = ProgressEvent::new("embed", 5, Some(10), "src/app.ts");
        let formatted = event.format_simple();
        assert!(formatted.contains("[embed]"));
        assert!(formatted.contains("5/10"));
        assert!(formatted.contains("50%"));
        assert!(formatted.ends_with("src/app.ts"));
    }

    #[test]
    fn test_progress_reporter_emit() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let reporter = ProgressReporter::new(Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        }));

        reporter.discover(3, "/ws");

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].phase, "discover");
        assert_eq!(captured[0].current, 3);
        assert!(captured[0].elapsed_secs.is_some());
    }

    #[test]
    fn test_noop_reporter() {
        let reporter = ProgressReporter::noop();
        reporter.index(1);
    }
}
