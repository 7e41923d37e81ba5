//! Progress reporting for harvest batches.
//!
//! The pipeline emits [`HarvestEvent`]s; how they are shown (log lines,
//! progress bars, nothing) is up to the [`ProgressReporter`] the caller
//! passes in.

use tracing::{info, warn};

/// Something observable happened in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestEvent {
    /// A batch of `total` units is about to be dispatched.
    BatchStarted { batch: String, total: usize },
    /// One more unit finished, successfully or not.
    UnitCompleted {
        batch: String,
        completed: usize,
        total: usize,
    },
    /// A unit failed; the batch carries on.
    UnitFailed {
        batch: String,
        unit: String,
        error: String,
    },
    /// The batch is over.
    BatchFinished {
        batch: String,
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
    /// A planning-level problem affecting one portal.
    PortalWarning { portal: String, message: String },
}

/// Receiver of [`HarvestEvent`]s. Called concurrently from workers.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: HarvestEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&self, _event: HarvestEvent) {}
}

/// Logs batch boundaries and failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::BatchStarted { batch, total } => {
                info!("{}: dispatching {} units", batch, total);
            }
            HarvestEvent::UnitCompleted { .. } => {}
            HarvestEvent::UnitFailed { batch, unit, error } => {
                warn!("{}: {} failed: {}", batch, unit, error);
            }
            HarvestEvent::BatchFinished {
                batch,
                succeeded,
                failed,
                cancelled,
            } => {
                if cancelled {
                    warn!(
                        "{}: cancelled after {} succeeded, {} failed",
                        batch, succeeded, failed
                    );
                } else {
                    info!("{}: {} succeeded, {} failed", batch, succeeded, failed);
                }
            }
            HarvestEvent::PortalWarning { portal, message } => {
                warn!("{}: {}", portal, message);
            }
        }
    }
}
