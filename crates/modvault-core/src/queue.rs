//! Asynchronous downstream consumers: the scan job queue and the
//! integration notification sink.
//!
//! Notification delivery is detached from the request. The dispatcher hands
//! the committed version to a spawned task that retries on its own schedule;
//! its outcome never feeds back into the finalize result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::QueueError;
use crate::types::Version;

/// Queue for asynchronous virus scan jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a scan job. Awaits the submission, not the scan.
    async fn submit_virus_scan(
        &self,
        mod_id: &str,
        version_id: &str,
        notify_on_result: bool,
    ) -> Result<(), QueueError>;
}

/// Outbound integration events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Announce a newly published version.
    async fn notify_new_version(&self, version: &Version) -> Result<(), QueueError>;
}

/// Final state of a detached delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Abandoned { attempts: u32, last_error: String },
}

/// Hands committed versions to a sink on detached tasks.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    retry: RetryPolicy,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Spawn delivery and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, version: Version) -> JoinHandle<DeliveryOutcome> {
        let sink = Arc::clone(&self.sink);
        let retry = self.retry.clone();
        tokio::spawn(async move { deliver(sink.as_ref(), &version, &retry).await })
    }
}

async fn deliver(
    sink: &dyn NotificationSink,
    version: &Version,
    retry: &RetryPolicy,
) -> DeliveryOutcome {
    let mut attempts = 0;

    loop {
        attempts += 1;
        match sink.notify_new_version(version).await {
            Ok(()) => {
                debug!(version_id = %version.id, attempts, "notification delivered");
                return DeliveryOutcome::Delivered { attempts };
            }
            Err(e) if attempts <= retry.max_retries => {
                let base_ms = retry.backoff(attempts).as_millis() as u64;
                let jittered_ms = rand::thread_rng().gen_range(base_ms / 2..=base_ms);
                let backoff = Duration::from_millis(jittered_ms);

                warn!(
                    error = %e,
                    version_id = %version.id,
                    retry = attempts,
                    max_retries = retry.max_retries,
                    backoff_ms = backoff.as_millis(),
                    "retrying notification"
                );

                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    version_id = %version.id,
                    attempts,
                    "giving up on notification"
                );
                return DeliveryOutcome::Abandoned {
                    attempts,
                    last_error: e.to_string(),
                };
            }
        }
    }
}
