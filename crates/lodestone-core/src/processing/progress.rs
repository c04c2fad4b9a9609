//! Progress reporting for [`SyncPipeline::run`](super::SyncPipeline::run).

use instant::Instant;

/// Snapshot handed to the progress callback after every operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// Operations finished, whatever their outcome
    pub files_completed: usize,
    pub files_total: usize,
    /// Content chunks written so far
    pub total_chunks: usize,
    pub files_failed: usize,
    /// Milliseconds since the batch started
    pub elapsed_ms: u64,
    /// Path of the operation that just finished
    pub current_file: Option<String>,
}

impl BatchProgress {
    pub fn new(files_total: usize) -> Self {
        Self {
            files_completed: 0,
            files_total,
            total_chunks: 0,
            files_failed: 0,
            elapsed_ms: 0,
            current_file: None,
        }
    }

    /// Marks the operation on `path` as finished.
    pub(crate) fn advance(&mut self, path: String, chunks: usize, failed: bool, elapsed_ms: u64) {
        self.files_completed += 1;
        self.total_chunks += chunks;
        if failed {
            self.files_failed += 1;
        }
        self.elapsed_ms = elapsed_ms;
        self.current_file = Some(path);
    }

    /// Finished share of the batch in `0.0..=1.0`. An empty batch is done.
    pub fn fraction(&self) -> f64 {
        if self.files_total == 0 {
            return 1.0;
        }
        (self.files_completed as f64 / self.files_total as f64).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.files_completed >= self.files_total
    }

    /// Remaining time extrapolated from the average so far.
    pub fn eta_ms(&self) -> Option<u64> {
        if self.files_completed == 0 || self.is_complete() {
            return None;
        }
        let remaining = (self.files_total - self.files_completed) as u64;
        Some(remaining * self.elapsed_ms / self.files_completed as u64)
    }
}

/// Wall-clock timer, also available on wasm through `instant`.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTimer {
    start: Instant,
}

impl ProgressTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for ProgressTimer {
    fn default() -> Self {
        Self::new()
    }
}
