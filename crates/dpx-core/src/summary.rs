//! Per-stage statistics for a harvest run.
//!
//! Pure bookkeeping, decoupled from I/O and CLI orchestration.

use crate::fetcher::BatchOutcome;

/// Counts for one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageStats {
    pub succeeded: usize,
    pub failed: usize,
    /// Units never dispatched because the run was cancelled.
    pub skipped: usize,
}

impl StageStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of units submitted.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Returns the number of units that ran, successfully or not.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl<K, R> From<&BatchOutcome<K, R>> for StageStats {
    fn from(outcome: &BatchOutcome<K, R>) -> Self {
        Self {
            succeeded: outcome.results.len(),
            failed: outcome.failures.len(),
            skipped: outcome.skipped(),
        }
    }
}

/// Result of one stage (extensions, tags, packages, ...).
#[derive(Debug, Clone)]
pub struct StageReport {
    /// Stage name, also used as the dump file name.
    pub name: String,
    pub stats: StageStats,
    /// Number of records written for the stage.
    pub records: usize,
    pub cancelled: bool,
}

impl StageReport {
    pub fn new(name: impl Into<String>, stats: StageStats, records: usize, cancelled: bool) -> Self {
        Self {
            name: name.into(),
            stats,
            records,
            cancelled,
        }
    }

    /// Returns true if every unit of the stage succeeded.
    pub fn is_clean(&self) -> bool {
        self.stats.failed == 0 && !self.cancelled
    }
}

/// Aggregated results of every stage of a run.
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub stages: Vec<StageReport>,
}

impl HarvestSummary {
    /// Creates a new empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stage report.
    pub fn add(&mut self, report: StageReport) {
        self.stages.push(report);
    }

    /// Returns the count of failed units across stages.
    pub fn failed_units(&self) -> usize {
        self.stages.iter().map(|s| s.stats.failed).sum()
    }

    /// Returns true if any stage was cut short.
    pub fn was_cancelled(&self) -> bool {
        self.stages.iter().any(|s| s.cancelled)
    }

    /// Returns the stage with the given name.
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}
