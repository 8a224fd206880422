//! In-process journal used when no database is configured (and in tests).
//! Same semantics as the Postgres journal; nothing survives a restart.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use eyre::Result;

use super::models::{address_key, JournalCounts, JournalEntry};
use super::Journal;
use crate::retry::ErrorClass;
use crate::types::{Attestation, LockEvent, ReleaseOutcome, ReleaseStatus};

#[derive(Default)]
struct State {
    next_id: i64,
    entries: HashMap<(Address, U256), JournalEntry>,
    cursors: HashMap<Address, u64>,
}

#[derive(Default)]
pub struct MemoryJournal {
    state: Mutex<State>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of one entry
    pub fn entry(&self, destination: Address, nonce: U256) -> Option<JournalEntry> {
        self.lock().entries.get(&(destination, nonce)).cloned()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn record_observed(
        &self,
        event: &LockEvent,
        destination: Address,
    ) -> Result<Option<ReleaseStatus>> {
        let mut state = self.lock();
        let key = (destination, event.nonce);
        if let Some(existing) = state.entries.get(&key) {
            return Ok(existing.status());
        }

        state.next_id += 1;
        let now = Utc::now();
        let entry = JournalEntry {
            id: state.next_id,
            destination: address_key(&destination),
            nonce: event.nonce.to_string(),
            sender: address_key(&event.sender),
            recipient: address_key(&event.recipient),
            amount: event.amount.to_string(),
            source_tx_hash: event.source_tx_hash.map(|h| format!("0x{:x}", h)),
            source_block: event.source_block.map(|b| b as i64),
            digest: None,
            signature: None,
            status: ReleaseStatus::Observed.as_str().to_string(),
            error: None,
            error_class: None,
            dest_tx_hash: None,
            created_at: now,
            updated_at: now,
        };
        state.entries.insert(key, entry);
        Ok(None)
    }

    async fn record_signed(&self, attestation: &Attestation) -> Result<()> {
        let mut state = self.lock();
        if let Some(entry) = state
            .entries
            .get_mut(&(attestation.destination, attestation.nonce))
        {
            entry.digest = Some(format!("0x{:x}", attestation.digest));
            entry.signature = Some(format!("0x{}", hex::encode(&attestation.signature)));
            if entry.status() == Some(ReleaseStatus::Observed) {
                entry.status = ReleaseStatus::Signed.as_str().to_string();
            }
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_outcome(
        &self,
        destination: Address,
        nonce: U256,
        outcome: &ReleaseOutcome,
        error_class: Option<ErrorClass>,
    ) -> Result<()> {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&(destination, nonce)) else {
            return Ok(());
        };
        if entry.status() == Some(ReleaseStatus::Released) {
            return Ok(());
        }

        entry.status = outcome.status().as_str().to_string();
        entry.error_class = error_class.map(|c| c.as_str().to_string());
        match outcome {
            ReleaseOutcome::Released { tx_hash } => {
                entry.error = None;
                if let Some(h) = tx_hash {
                    entry.dest_tx_hash = Some(format!("0x{:x}", h));
                }
            }
            ReleaseOutcome::Rejected { reason } | ReleaseOutcome::Failed { reason } => {
                entry.error = Some(reason.clone());
            }
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn resumable(
        &self,
        destination: Address,
        include_failed: bool,
    ) -> Result<Vec<JournalEntry>> {
        let key = address_key(&destination);
        let mut rows: Vec<JournalEntry> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.destination == key)
            .filter(|e| match e.status() {
                Some(ReleaseStatus::Observed) | Some(ReleaseStatus::Signed) => true,
                Some(ReleaseStatus::Failed) => include_failed,
                _ => false,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.id);
        Ok(rows)
    }

    async fn counts(&self, destination: Address) -> Result<JournalCounts> {
        let key = address_key(&destination);
        let mut counts = JournalCounts::default();
        for entry in self.lock().entries.values().filter(|e| e.destination == key) {
            if let Some(status) = entry.status() {
                counts.add(status, 1);
            }
        }
        Ok(counts)
    }

    async fn unreleased(&self, destination: Address, limit: i64) -> Result<Vec<JournalEntry>> {
        let key = address_key(&destination);
        let mut rows: Vec<JournalEntry> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.destination == key && e.status() != Some(ReleaseStatus::Released))
            .cloned()
            .collect();
        rows.sort_by_key(|e| std::cmp::Reverse(e.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn source_cursor(&self, source: Address) -> Result<Option<u64>> {
        Ok(self.lock().cursors.get(&source).copied())
    }

    async fn set_source_cursor(&self, source: Address, block: u64) -> Result<()> {
        self.lock().cursors.insert(source, block);
        Ok(())
    }
}
