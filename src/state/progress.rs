use std::time::{Duration, Instant};

/// Running totals for one harvest
///
/// Feeds the advisory progress line logged after every committed batch.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    target: u64,
    fetched: u64,
    pages: u64,
    started: Instant,
}

/// Point-in-time view of harvest progress
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub fetched: u64,
    pub target: u64,
    pub pages: u64,
    pub elapsed: Duration,
    /// Records per second since the start of the run
    pub rate: f64,
    /// Estimated time until the target is reached, if a rate is known
    pub eta: Option<Duration>,
}

impl ProgressTracker {
    pub fn new(target: u64) -> Self {
        Self {
            target,
            fetched: 0,
            pages: 0,
            started: Instant::now(),
        }
    }

    /// Adds a committed batch to the totals
    pub fn record_batch(&mut self, records: usize) {
        self.fetched += records as u64;
        self.pages += 1;
    }

    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn target_reached(&self) -> bool {
        self.fetched >= self.target
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Builds a report as of the current wall-clock time
    pub fn report(&self) -> ProgressReport {
        self.report_at(self.elapsed())
    }

    /// Builds a report for the given elapsed time
    pub fn report_at(&self, elapsed: Duration) -> ProgressReport {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.fetched as f64 / secs
        } else {
            0.0
        };

        let eta = if rate > 0.0 {
            let remaining = self.target.saturating_sub(self.fetched) as f64;
            Duration::try_from_secs_f64(remaining / rate).ok()
        } else {
            None
        };

        ProgressReport {
            fetched: self.fetched,
            target: self.target,
            pages: self.pages,
            elapsed,
            rate,
            eta,
        }
    }
}
