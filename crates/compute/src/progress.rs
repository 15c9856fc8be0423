use std::sync::atomic::{AtomicU64, Ordering};

use log::info;
use num_format::{Locale, ToFormattedString};

const PERCENT_STEP: u64 = 10;

/// Logs the progress of a task that is shared by many threads.
///
/// Progress is logged whenever another [`PERCENT_STEP`] percent of the total
/// volume are done. Each milestone is logged exactly once.
pub(crate) struct ProgressLogger {
    task: &'static str,
    total: u64,
    processed: AtomicU64,
    logged_percent: AtomicU64,
}

impl ProgressLogger {
    pub(crate) fn new(task: &'static str, total: u64) -> Self {
        Self {
            task,
            total,
            processed: AtomicU64::new(0),
            logged_percent: AtomicU64::new(0),
        }
    }

    pub(crate) fn log_progress(&self, delta: u64) {
        if self.total == 0 {
            return;
        }

        let processed = self.processed.fetch_add(delta, Ordering::Relaxed) + delta;
        let percent = u64::min(processed * 100 / self.total, 100);
        let milestone = percent - percent % PERCENT_STEP;

        let previous = self.logged_percent.fetch_max(milestone, Ordering::Relaxed);
        if milestone > previous {
            info!(
                "{} {}% ({} of {})",
                self.task,
                milestone,
                u64::min(processed, self.total).to_formatted_string(&Locale::en),
                self.total.to_formatted_string(&Locale::en)
            );
        }
    }

    /// Resets the progress to start another pass over the same volume.
    pub(crate) fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.logged_percent.store(0, Ordering::Relaxed);
    }

    #[cfg(test)]
    fn logged_percent(&self) -> u64 {
        self.logged_percent.load(Ordering::Relaxed)
    }
}
