//! Core bridge types shared by the watcher, signer and submitter.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `TokensLocked` event observed on the source bridge.
///
/// Immutable once emitted. `source_tx_hash` and `source_block` are
/// provenance for logging and the journal; they do not take part in
/// deduplication or in the release digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEvent {
    pub sender: Address,
    pub amount: U256,
    pub recipient: Address,
    pub nonce: U256,
    pub source_tx_hash: Option<B256>,
    pub source_block: Option<u64>,
}

impl LockEvent {
    pub fn new(sender: Address, amount: U256, recipient: Address, nonce: U256) -> Self {
        Self {
            sender,
            amount,
            recipient,
            nonce,
            source_tx_hash: None,
            source_block: None,
        }
    }

    /// Attach source-chain provenance
    pub fn with_source(mut self, tx_hash: B256, block: u64) -> Self {
        self.source_tx_hash = Some(tx_hash);
        self.source_block = Some(block);
        self
    }

    /// Replay guard key for this event
    pub fn guard_key(&self) -> GuardKey {
        GuardKey {
            recipient: self.recipient,
            nonce: self.nonce,
        }
    }
}

/// Deduplication key: (recipient, nonce)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuardKey {
    pub recipient: Address,
    pub nonce: U256,
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.recipient, self.nonce)
    }
}

/// Signed authorization to release `amount` to `recipient` under `nonce`
/// on exactly one destination deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub recipient: Address,
    pub amount: U256,
    pub nonce: U256,
    pub destination: Address,
    /// Packed keccak256 digest the signature covers (before EIP-191 prefixing)
    pub digest: B256,
    /// 65-byte r || s || v signature
    pub signature: Bytes,
}

/// Lifecycle of a lock event inside this relayer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Observed,
    Signed,
    Released,
    Rejected,
    Failed,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseStatus::Observed => "observed",
            ReleaseStatus::Signed => "signed",
            ReleaseStatus::Released => "released",
            ReleaseStatus::Rejected => "rejected",
            ReleaseStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "observed" => Some(ReleaseStatus::Observed),
            "signed" => Some(ReleaseStatus::Signed),
            "released" => Some(ReleaseStatus::Released),
            "rejected" => Some(ReleaseStatus::Rejected),
            "failed" => Some(ReleaseStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never leave the journal's final position
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReleaseStatus::Released | ReleaseStatus::Rejected)
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of processing one lock event end to end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Destination accepted the attestation
    Released { tx_hash: Option<B256> },
    /// Destination rejected terminally (InvalidSignature, DuplicateNonce)
    Rejected { reason: String },
    /// Signing or submission failed without a terminal verdict
    Failed { reason: String },
}

impl ReleaseOutcome {
    pub fn status(&self) -> ReleaseStatus {
        match self {
            ReleaseOutcome::Released { .. } => ReleaseStatus::Released,
            ReleaseOutcome::Rejected { .. } => ReleaseStatus::Rejected,
            ReleaseOutcome::Failed { .. } => ReleaseStatus::Failed,
        }
    }
}
