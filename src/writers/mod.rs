//! Release writers
//!
//! The [`ReleasePipeline`] consumes forwarded lock events from a bounded
//! queue and runs each one as an independent unit of work on a bounded
//! worker pool: journal, sign, submit, journal the outcome. A failure on
//! one event is logged and recorded; it never stops the pipeline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use prometheus::IntGauge;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::db::Journal;
use crate::guard::ReplayGuard;
use crate::metrics;
use crate::retry::{classify_error, ErrorClass};
use crate::signer::AttestationSigner;
use crate::types::{Attestation, LockEvent, ReleaseOutcome};

pub mod evm;

pub use evm::EvmReleaseSubmitter;

/// Why a release submission did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// Recovered signer is not the destination's relayer (or it is disabled)
    #[error("Invalid signature")]
    InvalidSignature,
    /// Destination already released this nonce
    #[error("Nonce already processed")]
    DuplicateNonce,
    /// Any other on-chain rejection
    #[error("release reverted: {0}")]
    Reverted(String),
    /// Network or RPC failure; the destination gave no verdict
    #[error("transport error: {0}")]
    Transport(String),
}

impl SubmissionError {
    /// Map raw RPC / revert text onto a submission error
    pub fn from_message(message: &str) -> Self {
        match classify_error(message) {
            ErrorClass::InvalidSignature => SubmissionError::InvalidSignature,
            ErrorClass::DuplicateNonce => SubmissionError::DuplicateNonce,
            ErrorClass::Permanent => SubmissionError::Reverted(message.to_string()),
            ErrorClass::Transient | ErrorClass::Unknown => {
                SubmissionError::Transport(message.to_string())
            }
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SubmissionError::InvalidSignature => ErrorClass::InvalidSignature,
            SubmissionError::DuplicateNonce => ErrorClass::DuplicateNonce,
            SubmissionError::Reverted(_) => ErrorClass::Permanent,
            SubmissionError::Transport(_) => ErrorClass::Transient,
        }
    }
}

/// Write access to a destination bridge's release entrypoint
#[async_trait]
pub trait ReleaseSubmitter: Send + Sync {
    /// Destination deployment this submitter writes to
    fn destination(&self) -> Address;

    /// Submit and wait for finalization. Returns the release transaction
    /// hash when the ledger has one.
    async fn submit_release(&self, attestation: &Attestation)
        -> Result<Option<B256>, SubmissionError>;
}

pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Raises a gauge for as long as it is held, panics included
struct InFlightGuard {
    gauge: IntGauge,
}

impl InFlightGuard {
    fn new(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self {
            gauge: gauge.clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Bounded sign-and-submit worker pool
#[derive(Clone)]
pub struct ReleasePipeline {
    signer: AttestationSigner,
    submitter: Arc<dyn ReleaseSubmitter>,
    journal: Arc<dyn Journal>,
    max_in_flight: usize,
    /// A submission still pending after this frees its worker slot
    submit_timeout: Duration,
}

impl ReleasePipeline {
    pub fn new(
        signer: AttestationSigner,
        submitter: Arc<dyn ReleaseSubmitter>,
        journal: Arc<dyn Journal>,
        max_in_flight: usize,
    ) -> Result<Self> {
        if signer.destination() != submitter.destination() {
            return Err(eyre!(
                "Signer binds attestations to {} but submitter writes to {}",
                signer.destination(),
                submitter.destination()
            ));
        }
        if max_in_flight == 0 {
            return Err(eyre!("max_in_flight must be greater than 0"));
        }

        Ok(Self {
            signer,
            submitter,
            journal,
            max_in_flight,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        })
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn destination(&self) -> Address {
        self.submitter.destination()
    }

    /// Consume the queue until every sender is dropped, then drain
    /// in-flight submissions. At most `max_in_flight` events are processed
    /// concurrently; while all slots are busy the queue fills and the
    /// watcher blocks.
    pub async fn run(self, mut rx: mpsc::Receiver<LockEvent>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut workers = JoinSet::new();

        info!(
            destination = %self.destination(),
            relayer = %self.signer.address(),
            max_in_flight = self.max_in_flight,
            "Release pipeline started"
        );

        loop {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| eyre!("worker semaphore closed"))?;

            let event = loop {
                tokio::select! {
                    event = rx.recv() => break event,
                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "Release worker panicked");
                        }
                    }
                }
            };

            let Some(event) = event else {
                info!("Release queue closed");
                break;
            };

            let pipeline = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                let _in_flight = InFlightGuard::new(&metrics::IN_FLIGHT);
                pipeline.process_event(&event).await;
            });
        }

        if !workers.is_empty() {
            info!(in_flight = workers.len(), "Draining in-flight releases");
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Release worker panicked");
            }
        }

        info!("Release pipeline stopped");
        Ok(())
    }

    /// Process one lock event end to end. Never fails: every outcome is
    /// logged and journaled. Returns `None` when the journal shows the
    /// event was already settled.
    pub async fn process_event(&self, event: &LockEvent) -> Option<ReleaseOutcome> {
        let started = Instant::now();
        let destination = self.destination();

        match self.journal.record_observed(event, destination).await {
            Ok(Some(status)) if status.is_terminal() => {
                info!(
                    recipient = %event.recipient,
                    nonce = %event.nonce,
                    status = %status,
                    "Lock event already settled, skipping"
                );
                return None;
            }
            Ok(_) => {}
            Err(e) => warn!(nonce = %event.nonce, error = %e, "Failed to journal observed event"),
        }

        let attestation = match self.signer.attest(event) {
            Ok(attestation) => attestation,
            Err(e) => {
                let outcome = ReleaseOutcome::Failed {
                    reason: format!("signing failed: {}", e),
                };
                self.finish(event, &outcome, Some(ErrorClass::Unknown), started)
                    .await;
                return Some(outcome);
            }
        };
        metrics::record_attestation();

        if let Err(e) = self.journal.record_signed(&attestation).await {
            warn!(nonce = %event.nonce, error = %e, "Failed to journal attestation");
        }

        debug!(
            recipient = %attestation.recipient,
            amount = %attestation.amount,
            nonce = %attestation.nonce,
            digest = %attestation.digest,
            "Submitting release"
        );

        let submitted =
            tokio::time::timeout(self.submit_timeout, self.submitter.submit_release(&attestation))
                .await
                .unwrap_or_else(|_| {
                    Err(SubmissionError::Transport(format!(
                        "receipt timeout after {:?}",
                        self.submit_timeout
                    )))
                });

        let (outcome, class) = match submitted {
            Ok(tx_hash) => (ReleaseOutcome::Released { tx_hash }, None),
            Err(e) => {
                let class = e.class();
                let outcome = if class.is_terminal() {
                    ReleaseOutcome::Rejected {
                        reason: e.to_string(),
                    }
                } else {
                    ReleaseOutcome::Failed {
                        reason: e.to_string(),
                    }
                };
                (outcome, Some(class))
            }
        };

        self.finish(event, &outcome, class, started).await;
        Some(outcome)
    }

    async fn finish(
        &self,
        event: &LockEvent,
        outcome: &ReleaseOutcome,
        class: Option<ErrorClass>,
        started: Instant,
    ) {
        let class_label = class.map(|c| c.as_str()).unwrap_or("none");

        match outcome {
            ReleaseOutcome::Released { tx_hash } => info!(
                sender = %event.sender,
                recipient = %event.recipient,
                amount = %event.amount,
                nonce = %event.nonce,
                source_tx = ?event.source_tx_hash,
                dest_tx = ?tx_hash,
                "Tokens released"
            ),
            ReleaseOutcome::Rejected { reason } => warn!(
                sender = %event.sender,
                recipient = %event.recipient,
                amount = %event.amount,
                nonce = %event.nonce,
                source_tx = ?event.source_tx_hash,
                class = class_label,
                reason = %reason,
                "Release rejected by destination"
            ),
            ReleaseOutcome::Failed { reason } => error!(
                sender = %event.sender,
                recipient = %event.recipient,
                amount = %event.amount,
                nonce = %event.nonce,
                source_tx = ?event.source_tx_hash,
                class = class_label,
                reason = %reason,
                "Release failed"
            ),
        }

        if let Err(e) = self
            .journal
            .record_outcome(self.destination(), event.nonce, outcome, class)
            .await
        {
            warn!(nonce = %event.nonce, error = %e, "Failed to journal release outcome");
        }

        metrics::record_release(outcome.status().as_str(), class_label);
        metrics::record_latency(started.elapsed().as_secs_f64());
    }
}

/// Re-enqueue journaled work left over from a previous run. Guard keys are
/// inserted first so a redelivery from the source is discarded. Returns the
/// number of events enqueued.
pub async fn resume_pending(
    journal: &dyn Journal,
    destination: Address,
    guard: &ReplayGuard,
    tx: &mpsc::Sender<LockEvent>,
    include_failed: bool,
) -> Result<usize> {
    let entries = journal.resumable(destination, include_failed).await?;
    let mut enqueued = 0;

    for entry in entries {
        let event = match entry.to_lock_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(id = entry.id, nonce = %entry.nonce, error = %e, "Skipping unreadable journal entry");
                continue;
            }
        };

        if !guard.check_and_insert(event.guard_key()) {
            continue;
        }

        info!(
            recipient = %event.recipient,
            nonce = %event.nonce,
            status = %entry.status,
            "Resuming journaled release"
        );
        tx.send(event)
            .await
            .map_err(|_| eyre!("release pipeline queue closed"))?;
        enqueued += 1;
    }

    Ok(enqueued)
}
