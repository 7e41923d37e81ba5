//! Bounded concurrent fan-out over independent work units.
//!
//! [`BoundedFetcher::run`] spawns one task per unit on the tokio runtime,
//! keeping at most `workers` of them in flight. Each unit's outcome is
//! recorded under its key, either in `results` or in `failures`; a failing
//! unit never affects its siblings.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::{self, Future};
use std::hash::Hash;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AppError, ErrorKind};
use crate::progress::{HarvestEvent, ProgressReporter};

/// Outcome of one batch.
///
/// `results` and `failures` never share a key. Unless the batch was
/// cancelled, together they cover every unit that was submitted.
#[derive(Debug)]
pub struct BatchOutcome<K, R> {
    pub results: HashMap<K, R>,
    pub failures: HashMap<K, AppError>,
    /// Units submitted, dispatched or not.
    pub total: usize,
    /// True when cancellation kept some units from being dispatched.
    pub cancelled: bool,
}

impl<K, R> BatchOutcome<K, R> {
    fn empty(total: usize) -> Self {
        Self {
            results: HashMap::new(),
            failures: HashMap::new(),
            total,
            cancelled: false,
        }
    }

    /// Units that finished, successfully or not.
    pub fn completed(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    /// Units never dispatched because of cancellation.
    pub fn skipped(&self) -> usize {
        self.total - self.completed()
    }
}

/// Executor with a fixed upper bound on concurrently running units.
#[derive(Debug, Clone, Copy)]
pub struct BoundedFetcher {
    workers: usize,
}

impl BoundedFetcher {
    /// Creates a fetcher running at most `workers` units at a time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidConfig` when `workers` is zero.
    pub fn new(workers: usize) -> Result<Self, AppError> {
        if workers == 0 {
            return Err(AppError::InvalidConfig(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `op` over every unit and collects the outcomes by key.
    ///
    /// Completion order is whatever finishes first. Once `cancel` fires no
    /// further unit is dispatched; units already running finish normally and
    /// their outcomes are kept.
    ///
    /// # Errors
    ///
    /// `AppError::ContractViolation` when two units share a key, checked
    /// before anything is dispatched. Otherwise only a contract violation
    /// raised by a unit aborts the batch; every other failure is recorded in
    /// `failures`.
    pub async fn run<U, K, R, KF, F, Fut>(
        &self,
        batch: &str,
        units: Vec<U>,
        key_of: KF,
        op: F,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome<K, R>, AppError>
    where
        U: Send + 'static,
        K: Eq + Hash + Clone + Display + Send,
        R: Send + 'static,
        KF: Fn(&U) -> K,
        F: Fn(U) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<R, AppError>> + Send + 'static,
    {
        let total = units.len();
        let mut outcome = BatchOutcome::empty(total);

        reporter.report(HarvestEvent::BatchStarted {
            batch: batch.to_string(),
            total,
        });

        if total > 0 {
            let keyed: Vec<(K, U)> = units.into_iter().map(|u| (key_of(&u), u)).collect();
            if let Some(key) = first_duplicate(&keyed) {
                return Err(AppError::ContractViolation(format!(
                    "{}: duplicate unit key {}",
                    batch, key
                )));
            }

            let token = cancel.clone();

            let mut in_flight = stream::iter(keyed)
                .take_while(move |_| future::ready(!token.is_cancelled()))
                .map(|(key, unit)| {
                    let op = op.clone();
                    let handle = tokio::spawn(async move { op(unit).await });
                    async move { (key, handle.await) }
                })
                .buffer_unordered(self.workers);

            let mut completed = 0;
            while let Some((key, joined)) = in_flight.next().await {
                completed += 1;

                let result = joined.unwrap_or_else(|e| {
                    Err(AppError::Generic(format!("worker task failed: {}", e)))
                });

                match result {
                    Ok(value) => {
                        outcome.results.insert(key, value);
                    }
                    Err(e) if e.kind() == ErrorKind::ContractViolation => {
                        return Err(e);
                    }
                    Err(e) => {
                        debug!("{}: {} failed: {}", batch, key, e);
                        reporter.report(HarvestEvent::UnitFailed {
                            batch: batch.to_string(),
                            unit: key.to_string(),
                            error: e.to_string(),
                        });
                        outcome.failures.insert(key, e);
                    }
                }

                reporter.report(HarvestEvent::UnitCompleted {
                    batch: batch.to_string(),
                    completed,
                    total,
                });
            }

            outcome.cancelled = completed < total;
        }

        debug!(
            "{}: {} ok, {} failed, {} skipped",
            batch,
            outcome.results.len(),
            outcome.failures.len(),
            outcome.skipped()
        );

        reporter.report(HarvestEvent::BatchFinished {
            batch: batch.to_string(),
            succeeded: outcome.results.len(),
            failed: outcome.failures.len(),
            cancelled: outcome.cancelled,
        });

        Ok(outcome)
    }
}

fn first_duplicate<K: Eq + Hash, U>(keyed: &[(K, U)]) -> Option<&K> {
    let mut seen = HashSet::with_capacity(keyed.len());
    keyed.iter().map(|(key, _)| key).find(|key| !seen.insert(*key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::testing::RecordingReporter;
    use crate::progress::SilentReporter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    async fn fail_multiples_of(n: u32, divisor: u32) -> Result<u32, AppError> {
        tokio::time::sleep(Duration::from_millis(u64::from(n % 5))).await;
        if divisor != 0 && n % divisor == 0 {
            if n % 2 == 0 {
                Err(AppError::RemoteApi(format!("unit {n}")))
            } else {
                Err(AppError::Connection(format!("unit {n}")))
            }
        } else {
            Ok(n * 10)
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            BoundedFetcher::new(0),
            Err(AppError::InvalidConfig(_))
        ));
        assert_eq!(BoundedFetcher::new(3).unwrap().workers(), 3);
        let unset = crate::config::HarvestConfig::default().worker_count();
        assert_eq!(BoundedFetcher::new(unset).unwrap().workers(), unset);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let fetcher = BoundedFetcher::new(4).unwrap();
        let outcome = fetcher
            .run(
                "empty",
                Vec::<u32>::new(),
                |u| *u,
                |u| fail_multiples_of(u, 0),
                &SilentReporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.results.is_empty());
        assert!(outcome.failures.is_empty());
        assert!(!outcome.cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_are_isolated() {
        let fetcher = BoundedFetcher::new(4).unwrap();
        let units: Vec<u32> = (1..=30).collect();

        let outcome = fetcher
            .run(
                "isolation",
                units.clone(),
                |u| *u,
                |u| fail_multiples_of(u, 3),
                &SilentReporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.failures.len(), 10);
        assert_eq!(outcome.results.len(), 20);

        let ok: HashSet<u32> = outcome.results.keys().copied().collect();
        let failed: HashSet<u32> = outcome.failures.keys().copied().collect();
        assert!(ok.is_disjoint(&failed));
        let all: HashSet<u32> = ok.union(&failed).copied().collect();
        assert_eq!(all, units.into_iter().collect());

        assert_eq!(outcome.results[&4], 40);
        assert_eq!(outcome.failures[&6].kind(), ErrorKind::RemoteApi);
        assert_eq!(outcome.failures[&9].kind(), ErrorKind::Connection);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let fetcher = BoundedFetcher::new(3).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let op = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            move |u: u32| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, AppError>(u)
                }
            }
        };

        let outcome = fetcher
            .run(
                "bounded",
                (0..20).collect(),
                |u| *u,
                op,
                &SilentReporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let fetcher = BoundedFetcher::new(2).unwrap();
        let reporter = RecordingReporter::default();

        fetcher
            .run(
                "progress",
                (1..=5).collect(),
                |u| *u,
                |u| fail_multiples_of(u, 5),
                &reporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = reporter.events();
        assert_eq!(
            events.first(),
            Some(&HarvestEvent::BatchStarted {
                batch: "progress".to_string(),
                total: 5
            })
        );

        let counts: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                HarvestEvent::UnitCompleted { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);

        let failed = events
            .iter()
            .filter(|e| matches!(e, HarvestEvent::UnitFailed { unit, .. } if unit == "5"))
            .count();
        assert_eq!(failed, 1);

        assert!(matches!(
            events.last(),
            Some(HarvestEvent::BatchFinished {
                succeeded: 4,
                failed: 1,
                cancelled: false,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fetcher = BoundedFetcher::new(2).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fetcher
            .run(
                "cancelled",
                (1..=5).collect(),
                |u| *u,
                |u| fail_multiples_of(u, 0),
                &SilentReporter,
                &cancel,
            )
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.completed(), 0);
        assert_eq!(outcome.skipped(), 5);
    }

    #[tokio::test]
    async fn test_cancel_keeps_in_flight_results() {
        let fetcher = BoundedFetcher::new(1).unwrap();
        let cancel = CancellationToken::new();

        let op = {
            let cancel = cancel.clone();
            move |u: u32| {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, AppError>(u)
                }
            }
        };

        let outcome = fetcher
            .run("abort", (1..=5).collect(), |u| *u, op, &SilentReporter, &cancel)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[&1], 1);
        assert_eq!(outcome.skipped(), 4);
    }

    #[tokio::test]
    async fn test_contract_violation_propagates() {
        let fetcher = BoundedFetcher::new(1).unwrap();

        let result = fetcher
            .run(
                "contract",
                vec![1u32, 2, 3],
                |u| *u,
                |u| async move {
                    if u == 2 {
                        Err(AppError::ContractViolation("missing package".into()))
                    } else {
                        Ok(u)
                    }
                },
                &SilentReporter,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(AppError::ContractViolation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_keys_rejected_before_dispatch() {
        let fetcher = BoundedFetcher::new(2).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let reporter = RecordingReporter::default();

        let op = {
            let calls = Arc::clone(&calls);
            move |u: u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                fail_multiples_of(u, 2)
            }
        };

        let result = fetcher
            .run(
                "duplicates",
                vec![1u32, 2],
                |_| 7u32,
                op,
                &reporter,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(AppError::ContractViolation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!reporter
            .events()
            .iter()
            .any(|e| matches!(e, HarvestEvent::UnitCompleted { .. })));
    }

    #[tokio::test]
    async fn test_panicking_unit_is_recorded() {
        let fetcher = BoundedFetcher::new(2).unwrap();

        let outcome = fetcher
            .run(
                "panic",
                vec![1u32, 2],
                |u| *u,
                |u| async move {
                    if u == 1 {
                        panic!("boom");
                    }
                    Ok::<_, AppError>(u)
                },
                &SilentReporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.failures.contains_key(&1));
    }
}
