//! Bounded-concurrency "settle all" fan-out for stage implementations.
//!
//! A stage that issues several external calls (one image per section, one
//! translation per locale) runs them through [`Fanout::settle_all`]. At most
//! `concurrency` units run at once, every unit is awaited, and one failure
//! never cancels its siblings.

use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Progress callback: `(completed, total)`.
pub type FanoutProgress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Result of one fan-out unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome<T, E> {
    /// Position of the unit in the input.
    pub index: usize,
    /// Caller-supplied label.
    pub label: String,
    /// The unit's own result.
    pub result: Result<T, E>,
}

/// Settled results of a fan-out, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReport<T, E> {
    /// Every unit's outcome, in input order.
    pub outcomes: Vec<UnitOutcome<T, E>>,
}

impl<T, E> FanoutReport<T, E> {
    /// Number of successful units.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Number of failed units.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Returns true if every unit succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Splits into `(successes, failures)` keeping labels.
    #[must_use]
    pub fn partition(self) -> (Vec<(String, T)>, Vec<(String, E)>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for outcome in self.outcomes {
            match outcome.result {
                Ok(value) => ok.push((outcome.label, value)),
                Err(error) => failed.push((outcome.label, error)),
            }
        }
        (ok, failed)
    }
}

/// Semaphore-guarded fan-out.
#[derive(Clone)]
pub struct Fanout {
    concurrency: usize,
    progress: Option<FanoutProgress>,
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("concurrency", &self.concurrency)
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

impl Fanout {
    /// Creates a fan-out limited to `concurrency` simultaneous units (at least 1).
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    /// Sets a progress callback invoked after each unit settles.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Concurrency limit.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every unit, at most `concurrency` at a time, and waits for all of them.
    pub async fn settle_all<T, E, Fut>(&self, units: Vec<(String, Fut)>) -> FanoutReport<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let total = units.len();
        if total == 0 {
            return FanoutReport {
                outcomes: Vec::new(),
            };
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let completed = AtomicUsize::new(0);

        let guarded = units.into_iter().enumerate().map(|(index, (label, unit))| {
            let semaphore = Arc::clone(&semaphore);
            let completed = &completed;
            let progress = self.progress.clone();

            async move {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = semaphore.acquire().await.ok();
                let result = unit.await;

                if let Err(error) = &result {
                    warn!(unit = %label, index, error = %error, "Fan-out unit failed");
                }
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = progress {
                    callback(done, total);
                }

                UnitOutcome {
                    index,
                    label,
                    result,
                }
            }
        });

        let outcomes = join_all(guarded).await;
        let report = FanoutReport { outcomes };
        debug!(
            total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Fan-out settled"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_settles_every_unit_in_order() {
        let fanout = Fanout::new(2);
        let units: Vec<(String, _)> = (0..5u64)
            .map(|i| {
                let unit = async move {
                    tokio::time::sleep(Duration::from_millis(50 * (5 - i))).await;
                    if i == 2 {
                        Err(format!("unit {i} failed"))
                    } else {
                        Ok(i * 10)
                    }
                };
                (format!("section-{i}"), unit)
            })
            .collect();

        let report = fanout.settle_all(units).await;

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        let indexes: Vec<usize> = report.outcomes.iter().map(|o| o.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.outcomes[3].result, Ok(30));

        let (ok, failed) = report.partition();
        assert_eq!(ok.len(), 4);
        assert_eq!(failed, vec![("section-2".to_string(), "unit 2 failed".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let fanout = Fanout::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let units: Vec<(String, _)> = (0..10)
            .map(|i| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let unit = async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(i)
                };
                (format!("unit-{i}"), unit)
            })
            .collect();

        let report = fanout.settle_all(units).await;

        assert!(report.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_progress_callback_counts_all_units() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let fanout = Fanout::new(4).with_progress(move |done, total| {
            assert!(done <= total);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        let units: Vec<(String, _)> = (0..6)
            .map(|i| (i.to_string(), async move { Ok::<_, String>(i) }))
            .collect();
        fanout.settle_all(units).await;

        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_empty_fanout() {
        let report = Fanout::new(0)
            .settle_all(Vec::<(String, futures::future::Ready<Result<(), String>>)>::new())
            .await;
        assert!(report.outcomes.is_empty());
        assert!(report.all_succeeded());
    }
}
