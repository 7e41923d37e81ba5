use std::sync::Mutex;
use std::time::Duration;

use dpx_core::{HarvestEvent, ProgressReporter};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{info, warn};

/// Shows one progress bar per batch on stderr.
///
/// Failures are logged above the bar so the bar keeps its place. Meant for
/// interactive terminals; non-interactive runs log through `TracingReporter`.
#[derive(Default)]
pub struct BarReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_bar(&self, batch: &str, total: usize) -> ProgressBar {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:>10} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        pb.set_prefix(batch.to_string());
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    /// Runs `f` with the bar cleared from the terminal.
    fn suspended(&self, f: impl FnOnce()) {
        match self.bar.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(pb) => pb.suspend(f),
                None => f(),
            },
            Err(_) => f(),
        }
    }
}

impl ProgressReporter for BarReporter {
    fn report(&self, event: HarvestEvent) {
        match event {
            HarvestEvent::BatchStarted { batch, total } => {
                info!("- Getting {} ({} requests)", batch, total);
                let pb = self.make_bar(&batch, total);
                if let Ok(mut guard) = self.bar.lock() {
                    if let Some(previous) = guard.replace(pb) {
                        previous.finish_and_clear();
                    }
                }
            }
            HarvestEvent::UnitCompleted { completed, .. } => {
                self.with_bar(|pb| pb.set_position(completed as u64));
            }
            HarvestEvent::UnitFailed { batch, unit, error } => {
                self.suspended(|| warn!(" ! error: get {} for {}: {}", batch, unit, error));
            }
            HarvestEvent::PortalWarning { portal, message } => {
                self.suspended(|| warn!(" ! {}: {}", portal, message));
            }
            HarvestEvent::BatchFinished {
                batch,
                succeeded,
                failed,
                cancelled,
            } => {
                if let Ok(mut guard) = self.bar.lock() {
                    if let Some(pb) = guard.take() {
                        pb.finish_and_clear();
                    }
                }
                if cancelled {
                    warn!(
                        "{} interrupted: {} succeeded, {} failed",
                        batch, succeeded, failed
                    );
                } else {
                    info!("{} done: {} succeeded, {} failed", batch, succeeded, failed);
                }
            }
        }
    }
}
