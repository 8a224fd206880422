use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use serde::Serialize;
use sqlx::FromRow;
use std::str::FromStr;

use crate::types::{LockEvent, ReleaseStatus};

// Note: amount and nonce are Strings to avoid BigDecimal/sqlx version conflicts.
// The database stores them as NUMERIC(78,0). When inserting, we cast text to NUMERIC
// in the SQL query (e.g., $1::NUMERIC). When reading, we select them as ::TEXT.

/// One journaled lock event and everything the relayer did with it
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JournalEntry {
    pub id: i64,
    pub destination: String,
    pub nonce: String,
    pub sender: String,
    pub recipient: String,
    pub amount: String,
    pub source_tx_hash: Option<String>,
    pub source_block: Option<i64>,
    pub digest: Option<String>,
    pub signature: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub error_class: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn status(&self) -> Option<ReleaseStatus> {
        ReleaseStatus::parse(&self.status)
    }

    /// Rebuild the lock event this entry was created from
    pub fn to_lock_event(&self) -> Result<LockEvent> {
        let sender = Address::from_str(&self.sender).wrap_err("Invalid journaled sender")?;
        let recipient =
            Address::from_str(&self.recipient).wrap_err("Invalid journaled recipient")?;
        let amount = U256::from_str(&self.amount)
            .map_err(|_| eyre!("Invalid journaled amount: {}", self.amount))?;
        let nonce = U256::from_str(&self.nonce)
            .map_err(|_| eyre!("Invalid journaled nonce: {}", self.nonce))?;

        let mut event = LockEvent::new(sender, amount, recipient, nonce);
        if let (Some(tx), Some(block)) = (&self.source_tx_hash, self.source_block) {
            let tx = B256::from_str(tx).wrap_err("Invalid journaled source tx hash")?;
            event = event.with_source(tx, block as u64);
        }
        Ok(event)
    }
}

/// Journal row counts by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JournalCounts {
    pub observed: i64,
    pub signed: i64,
    pub released: i64,
    pub rejected: i64,
    pub failed: i64,
}

impl JournalCounts {
    pub fn add(&mut self, status: ReleaseStatus, count: i64) {
        match status {
            ReleaseStatus::Observed => self.observed += count,
            ReleaseStatus::Signed => self.signed += count,
            ReleaseStatus::Released => self.released += count,
            ReleaseStatus::Rejected => self.rejected += count,
            ReleaseStatus::Failed => self.failed += count,
        }
    }
}

/// Lowercase 0x-prefixed address, the journal's canonical key format
pub fn address_key(address: &Address) -> String {
    format!("0x{:x}", address)
}
