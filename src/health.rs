//! Shared, windowed health aggregation.
//!
//! A single [`HealthAggregator`] is shared by every plugin instance in the
//! process. Instances push classified failures through a bounded queue that
//! never blocks; a background task drains the queue once per period and
//! publishes an aggregate verdict.

use crate::classify::ErrorCategory;
use crate::kms::KmsError;
use crate::metrics;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default length of one evaluation window.
pub const DEFAULT_HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// Default capacity of the signal queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Shortest accepted evaluation window. Shorter periods are raised to it.
pub const MIN_HEALTH_CHECK_PERIOD: Duration = Duration::from_millis(1);

/// A remote failure together with its category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ClassifiedError {
    /// Category assigned by the classifier.
    pub category: ErrorCategory,
    /// Text of the originating error.
    pub message: String,
}

impl ClassifiedError {
    /// Attach a category to a remote error.
    #[must_use]
    pub fn new(category: ErrorCategory, err: &KmsError) -> Self {
        Self {
            category,
            message: err.to_string(),
        }
    }
}

/// Process-wide health collector fed by every plugin instance.
pub struct HealthAggregator {
    period: Duration,
    tx: mpsc::Sender<ClassifiedError>,
    rx: Mutex<Option<mpsc::Receiver<ClassifiedError>>>,
    verdict: ArcSwapOption<ClassifiedError>,
    stop_tx: watch::Sender<bool>,
}

impl HealthAggregator {
    /// Create an idle aggregator. Nothing runs until [`start`](Self::start).
    ///
    /// `period` is raised to [`MIN_HEALTH_CHECK_PERIOD`] and `queue_capacity`
    /// to one.
    #[must_use]
    pub fn new(period: Duration, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (stop_tx, _) = watch::channel(false);
        Self {
            period: period.max(MIN_HEALTH_CHECK_PERIOD),
            tx,
            rx: Mutex::new(Some(rx)),
            verdict: ArcSwapOption::empty(),
            stop_tx,
        }
    }

    /// Length of one evaluation window.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the periodic evaluation loop on the current tokio runtime.
    ///
    /// Only the first call starts a loop; later calls return a task that
    /// exits immediately.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let rx = self.rx.lock().take();
        let mut stop_rx = self.stop_tx.subscribe();
        let first_tick = Instant::now() + self.period;
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let Some(mut rx) = rx else {
                warn!("Health check loop already started");
                return;
            };
            info!(period = ?this.period, "Starting health check loop");

            let mut ticker = tokio::time::interval_at(first_tick, this.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => this.evaluate(&mut rx),
                    _ = stop_rx.wait_for(|stopped| *stopped) => {
                        info!("Stopping health check loop");
                        return;
                    }
                }
            }
        })
    }

    /// Stop the evaluation loop. In-flight plugin calls are unaffected.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Record a failure. Never blocks: a full queue drops the signal.
    pub fn push(&self, signal: ClassifiedError) {
        // Enqueue before publishing so a concurrent evaluation cannot clear
        // the verdict without also seeing the signal
        match self.tx.try_send(signal.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::record_health_signal_dropped();
                debug!(category = %signal.category, "Health queue full, dropping signal");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Health check loop stopped, signal not queued");
            }
        }
        self.verdict.store(Some(Arc::new(signal)));
    }

    /// Most recently published verdict.
    ///
    /// # Errors
    ///
    /// Returns the representative failure of the current window.
    pub fn verdict(&self) -> Result<(), ClassifiedError> {
        match self.verdict.load_full() {
            Some(err) => Err(err.as_ref().clone()),
            None => Ok(()),
        }
    }

    fn evaluate(&self, rx: &mut mpsc::Receiver<ClassifiedError>) {
        let mut drained = 0usize;
        let mut latest = None;
        while let Ok(signal) = rx.try_recv() {
            drained += 1;
            latest = Some(signal);
        }

        match latest {
            Some(signal) => {
                debug!(drained, category = %signal.category, "Health window saw failures");
                self.verdict.store(Some(Arc::new(signal)));
            }
            None => {
                self.verdict.store(None);
                if let Ok(signal) = rx.try_recv() {
                    self.verdict.store(Some(Arc::new(signal)));
                }
            }
        }

        let healthy = self.verdict.load().is_none();
        metrics::record_health_status(healthy);
    }
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_CHECK_PERIOD, DEFAULT_QUEUE_CAPACITY)
    }
}
