//! Lock event watching
//!
//! A [`LockEventSource`] delivers lock events at-least-once. The
//! [`LockWatcher`] runs each delivered event through the replay guard and
//! forwards only newly seen (recipient, nonce) keys to the release
//! pipeline's bounded queue. With a journal attached, events already
//! settled in a previous run are dropped here as well.

use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::{eyre, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::db::Journal;
use crate::guard::ReplayGuard;
use crate::metrics;
use crate::retry::RetryConfig;
use crate::types::{LockEvent, ReleaseStatus};

pub mod evm;

pub use evm::EvmLockSource;

/// Subscription to the source bridge's lock events
#[async_trait]
pub trait LockEventSource: Send {
    /// Wait for the next batch. `Ok(None)` means the subscription ended;
    /// `Err` is a transient delivery failure and the caller polls again.
    async fn next_batch(&mut self) -> Result<Option<Vec<LockEvent>>>;

    /// Acknowledge that the last batch was fully dispatched
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-process source fed through a channel, for callback-style producers
pub struct ChannelLockSource {
    rx: mpsc::Receiver<LockEvent>,
}

impl ChannelLockSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<LockEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl LockEventSource for ChannelLockSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<LockEvent>>> {
        Ok(self.rx.recv().await.map(|event| vec![event]))
    }
}

/// Deduplicates delivered events and forwards them downstream
pub struct LockWatcher<S> {
    source: S,
    guard: Arc<ReplayGuard>,
    retry: RetryConfig,
    journal: Option<(Arc<dyn Journal>, Address)>,
}

impl<S: LockEventSource> LockWatcher<S> {
    pub fn new(source: S, guard: Arc<ReplayGuard>) -> Self {
        Self {
            source,
            guard,
            retry: RetryConfig::default(),
            journal: None,
        }
    }

    /// Journal events as observed before forwarding them to `destination`
    pub fn with_journal(mut self, journal: Arc<dyn Journal>, destination: Address) -> Self {
        self.journal = Some((journal, destination));
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run until shutdown, source end, or the pipeline closes its queue.
    /// Delivery failures are logged and retried with backoff; they never
    /// end the loop.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<LockEvent>,
        mut shutdown: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut consecutive_failures = 0u32;

        loop {
            let batch = tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping lock watcher");
                    return Ok(());
                }
                batch = self.source.next_batch() => batch,
            };

            match batch {
                Ok(Some(events)) => {
                    consecutive_failures = 0;
                    for event in events {
                        self.dispatch(event, &tx).await?;
                    }
                    if let Err(e) = self.source.commit().await {
                        warn!(error = %e, "Failed to commit source progress; range will be redelivered");
                    }
                }
                Ok(None) => {
                    info!("Lock event source closed");
                    return Ok(());
                }
                Err(e) => {
                    let backoff = self.retry.backoff_for_attempt(consecutive_failures);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    metrics::record_delivery_error();
                    warn!(
                        error = %e,
                        consecutive_failures,
                        backoff_secs = backoff.as_secs_f64(),
                        "Transient delivery error from lock event source"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => {
                            info!("Shutdown signal received, stopping lock watcher");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// Guard check-and-insert, then forward. Blocks while the queue is full.
    async fn dispatch(&self, event: LockEvent, tx: &mpsc::Sender<LockEvent>) -> Result<()> {
        metrics::record_lock_event();

        if !self.guard.check_and_insert(event.guard_key()) {
            metrics::record_duplicate();
            debug!(
                recipient = %event.recipient,
                nonce = %event.nonce,
                "Duplicate lock event discarded"
            );
            return Ok(());
        }

        if let Some((journal, destination)) = &self.journal {
            match journal.record_observed(&event, *destination).await {
                Ok(None) | Ok(Some(ReleaseStatus::Observed)) | Ok(Some(ReleaseStatus::Signed)) => {}
                Ok(Some(status)) => {
                    metrics::record_duplicate();
                    debug!(
                        recipient = %event.recipient,
                        nonce = %event.nonce,
                        status = %status,
                        "Lock event already settled in journal, not forwarding"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(nonce = %event.nonce, error = %e, "Failed to journal observed lock event");
                }
            }
        }

        info!(
            sender = %event.sender,
            recipient = %event.recipient,
            amount = %event.amount,
            nonce = %event.nonce,
            source_tx = ?event.source_tx_hash,
            "Lock event observed"
        );

        tx.send(event)
            .await
            .map_err(|_| eyre!("release pipeline queue closed"))
    }
}
