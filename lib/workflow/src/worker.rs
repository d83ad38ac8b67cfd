//! Wake-up consumer.
//!
//! The worker turns one delivered wake-up into one driver invocation and
//! decides what happens to the message afterwards:
//! 1. Acknowledge when the invocation finished or lost a race
//! 2. Retry when the store or queue failed transiently
//! 3. Discard when the document can never be scheduled

use crate::dispatch::BlockExecutor;
use crate::driver::{Driver, DriverError};
use crate::queue::{WakeupQueue, WakeupSignal};
use crate::store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, instrument, warn};

/// Consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Whether this process consumes wake-ups at all.
    pub enabled: bool,
    /// Maximum invocations in flight.
    pub concurrency: usize,
    /// How long a delivered message stays invisible before redelivery.
    pub ack_wait_secs: u64,
    /// Deliveries before a message is dropped.
    pub max_deliver: u32,
    /// Delay before a retried message is delivered again.
    pub retry_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 8,
            ack_wait_secs: 360,
            max_deliver: 5,
            retry_delay_ms: 1_000,
        }
    }
}

impl WorkerConfig {
    /// Returns the acknowledgement deadline.
    #[must_use]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    /// Returns the redelivery delay.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// What to do with a processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge; the message is done.
    Ack,
    /// Negatively acknowledge; deliver again later.
    Retry,
    /// Terminate; never deliver again.
    Discard,
}

/// Maps a driver failure to a message disposition.
#[must_use]
pub fn classify(error: &DriverError) -> Disposition {
    match error {
        DriverError::Conflict { .. } | DriverError::RunInProgress { .. } => Disposition::Ack,
        DriverError::MalformedDocument { .. } => Disposition::Discard,
        DriverError::Store { transient, .. } => {
            if *transient {
                Disposition::Retry
            } else {
                Disposition::Discard
            }
        }
        DriverError::Queue(_) => Disposition::Retry,
    }
}

/// Runs one driver invocation per wake-up.
pub struct Worker<S, E, Q> {
    driver: Arc<Driver<S, E, Q>>,
}

impl<S, E, Q> Clone for Worker<S, E, Q> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
        }
    }
}

impl<S, E, Q> Worker<S, E, Q>
where
    S: ObjectStore + 'static,
    E: BlockExecutor + 'static,
    Q: WakeupQueue + 'static,
{
    /// Creates a worker over a shared driver.
    pub fn new(driver: Arc<Driver<S, E, Q>>) -> Self {
        Self { driver }
    }

    /// Processes one wake-up.
    #[instrument(skip(self, signal), fields(workflow_id = %signal.workflow_id))]
    pub async fn process(&self, signal: &WakeupSignal) -> Disposition {
        match self.driver.step(&signal.workflow_id).await {
            Ok(outcome) => {
                debug!(?outcome, "wake-up handled");
                Disposition::Ack
            }
            Err(report) => {
                let error = report.current_context();
                let disposition = classify(error);
                match disposition {
                    Disposition::Ack => debug!(error = %error, "yielding to another invocation"),
                    Disposition::Retry => warn!(error = %error, "wake-up will be retried"),
                    Disposition::Discard => error!(error = %error, "dropping wake-up"),
                }
                disposition
            }
        }
    }

    /// Processes a wake-up, retrying in place up to `max_deliver` times.
    async fn deliver(&self, signal: &WakeupSignal, config: &WorkerConfig) {
        let attempts = config.max_deliver.max(1);
        for attempt in 1..=attempts {
            if self.process(signal).await != Disposition::Retry {
                return;
            }
            if attempt < attempts {
                tokio::time::sleep(config.retry_delay()).await;
            }
        }
        error!(
            workflow_id = %signal.workflow_id,
            attempts,
            "wake-up exhausted its deliveries"
        );
    }

    /// Consumes an in-process wake-up channel until it closes.
    ///
    /// Up to `concurrency` invocations run at once. Retries happen inside
    /// the task that received the signal.
    pub async fn run_channel(self, mut receiver: mpsc::UnboundedReceiver<WakeupSignal>, config: WorkerConfig) {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        info!(concurrency = config.concurrency, "wake-up consumer started");

        while let Some(signal) = receiver.recv().await {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let worker = self.clone();
            let config = config.clone();
            tokio::spawn(async move {
                worker.deliver(&signal, &config).await;
                drop(permit);
            });
        }
        info!("wake-up channel closed, consumer stopping");
    }
}
