use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use url::Url;

use super::LockEventSource;
use crate::config::SourceConfig;
use crate::contracts::SourceBridge::TokensLocked;
use crate::db::Journal;
use crate::metrics;
use crate::types::LockEvent;

/// Polls the source bridge for finalized `TokensLocked` logs
pub struct EvmLockSource {
    provider: RootProvider<Http<Client>>,
    bridge_address: Address,
    finality_blocks: u64,
    poll_interval: Duration,
    cursor: BlockCursor,
    journal: Arc<dyn Journal>,
}

/// Inclusive block range starting at `next_block`, at most `max_range`
/// blocks long and never past `safe_block`. `None` once caught up.
pub fn next_range(next_block: u64, safe_block: u64, max_range: u64) -> Option<(u64, u64)> {
    if next_block > safe_block {
        return None;
    }
    let to_block = std::cmp::min(
        next_block.saturating_add(max_range.max(1) - 1),
        safe_block,
    );
    Some((next_block, to_block))
}

/// Source scan position. A claimed range is redelivered until committed.
#[derive(Debug, Clone)]
struct BlockCursor {
    /// First block of the next range to fetch
    next_block: Option<u64>,
    /// Last block of the range handed out but not yet committed
    uncommitted: Option<u64>,
    max_range: u64,
}

impl BlockCursor {
    fn new(next_block: Option<u64>, max_range: u64) -> Self {
        Self {
            next_block,
            uncommitted: None,
            max_range: max_range.max(1),
        }
    }

    /// With no known position the scan starts at the safe block
    fn claim(&mut self, safe_block: u64) -> Option<(u64, u64)> {
        let from_block = *self.next_block.get_or_insert(safe_block);
        let range = next_range(from_block, safe_block, self.max_range)?;
        self.uncommitted = Some(range.1);
        Some(range)
    }

    /// Returns the last block of the range just committed
    fn commit(&mut self) -> Option<u64> {
        let to_block = self.uncommitted.take()?;
        self.next_block = Some(to_block.saturating_add(1));
        Some(to_block)
    }
}

impl EvmLockSource {
    /// Create a new source watcher. Resumes from the journaled cursor when
    /// present, else from `start_block`, else from the current safe head.
    pub async fn new(config: &SourceConfig, journal: Arc<dyn Journal>) -> Result<Self> {
        let url: Url = config.rpc_url.parse().wrap_err("Failed to parse source RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);

        let bridge_address = Address::from_str(&config.bridge_address)
            .wrap_err("Invalid source bridge address")?;

        let next_block = match journal.source_cursor(bridge_address).await? {
            Some(last) => Some(last + 1),
            None => config.start_block,
        };

        tracing::info!(
            bridge = %bridge_address,
            next_block = ?next_block,
            finality_blocks = config.finality_blocks,
            "Source lock watcher initialized"
        );

        Ok(Self {
            provider,
            bridge_address,
            finality_blocks: config.finality_blocks,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            cursor: BlockCursor::new(next_block, config.max_block_range),
            journal,
        })
    }

    /// Current block minus the finality margin
    async fn get_safe_block(&self) -> Result<u64> {
        let block = self
            .provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")?;
        Ok(block.saturating_sub(self.finality_blocks))
    }

    async fn fetch_range(&self, from_block: u64, to_block: u64) -> Result<Vec<LockEvent>> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .event_signature(TokensLocked::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await.wrap_err_with(|| {
            format!("Failed to get logs from block {} to {}", from_block, to_block)
        })?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            match parse_lock_log(&log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::error!(
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Failed to parse lock log"
                    );
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl LockEventSource for EvmLockSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<LockEvent>>> {
        let safe_block = self.get_safe_block().await?;
        let Some((from_block, to_block)) = self.cursor.claim(safe_block) else {
            tokio::time::sleep(self.poll_interval).await;
            return Ok(Some(Vec::new()));
        };

        let events = self.fetch_range(from_block, to_block).await?;
        if !events.is_empty() {
            tracing::debug!(
                count = events.len(),
                from = from_block,
                to = to_block,
                "Found lock events"
            );
        }

        Ok(Some(events))
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(to_block) = self.cursor.commit() else {
            return Ok(());
        };
        metrics::record_source_block(to_block);
        self.journal
            .set_source_cursor(self.bridge_address, to_block)
            .await
    }
}

/// Decode a `TokensLocked` log into a lock event
pub fn parse_lock_log(log: &Log) -> Result<LockEvent> {
    let decoded = log
        .log_decode::<TokensLocked>()
        .map_err(|e| eyre!("Failed to decode TokensLocked: {}", e))?;
    let data = decoded.inner.data;

    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| eyre!("Missing transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or_else(|| eyre!("Missing block number"))?;

    Ok(
        LockEvent::new(data.sender, data.amount, data.recipientOnChainB, data.nonce)
            .with_source(tx_hash, block_number),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256, U256};

    fn lock_log(with_tx: bool) -> Log {
        let event = TokensLocked {
            sender: address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            amount: U256::from(50u64),
            recipientOnChainB: address!("3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"),
            nonce: U256::from(4u64),
        };
        let inner = alloy::primitives::Log {
            address: address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
            data: event.encode_log_data(),
        };
        Log {
            inner,
            block_number: Some(17),
            transaction_hash: if with_tx { Some(B256::repeat_byte(0x22)) } else { None },
            ..Default::default()
        }
    }

    #[test]
    fn test_next_range_caught_up() {
        assert_eq!(next_range(101, 100, 2000), None);
    }

    #[test]
    fn test_next_range_bounded_by_safe_block() {
        assert_eq!(next_range(90, 100, 2000), Some((90, 100)));
        assert_eq!(next_range(100, 100, 2000), Some((100, 100)));
    }

    #[test]
    fn test_next_range_chunked_by_max_range() {
        // Exactly full: ten blocks starting at 1
        assert_eq!(next_range(1, 100, 10), Some((1, 10)));
        assert_eq!(next_range(1, 10, 10), Some((1, 10)));
        assert_eq!(next_range(5, 100, 1), Some((5, 5)));
        assert_eq!(next_range(u64::MAX - 1, u64::MAX, 10), Some((u64::MAX - 1, u64::MAX)));
    }

    #[test]
    fn test_cursor_starts_at_safe_block_without_position() {
        let mut cursor = BlockCursor::new(None, 10);
        assert_eq!(cursor.claim(500), Some((500, 500)));
    }

    #[test]
    fn test_cursor_redelivers_until_commit() {
        let mut cursor = BlockCursor::new(Some(1), 10);

        assert_eq!(cursor.claim(25), Some((1, 10)));
        // No commit: the same range comes back
        assert_eq!(cursor.claim(25), Some((1, 10)));

        assert_eq!(cursor.commit(), Some(10));
        assert_eq!(cursor.claim(25), Some((11, 20)));
        assert_eq!(cursor.commit(), Some(20));
        assert_eq!(cursor.claim(25), Some((21, 25)));
        assert_eq!(cursor.commit(), Some(25));

        assert_eq!(cursor.claim(25), None);
        assert_eq!(cursor.commit(), None);
    }

    #[test]
    fn test_cursor_single_block_ranges() {
        let mut cursor = BlockCursor::new(Some(7), 1);
        assert_eq!(cursor.claim(8), Some((7, 7)));
        assert_eq!(cursor.commit(), Some(7));
        assert_eq!(cursor.claim(8), Some((8, 8)));
        assert_eq!(cursor.commit(), Some(8));
        assert_eq!(cursor.claim(8), None);
    }

    #[test]
    fn test_parse_lock_log() {
        let event = parse_lock_log(&lock_log(true)).unwrap();
        assert_eq!(event.sender, address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"));
        assert_eq!(event.recipient, address!("3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"));
        assert_eq!(event.amount, U256::from(50u64));
        assert_eq!(event.nonce, U256::from(4u64));
        assert_eq!(event.source_block, Some(17));
        assert_eq!(event.source_tx_hash, Some(B256::repeat_byte(0x22)));
    }

    #[test]
    fn test_parse_lock_log_requires_tx_hash() {
        assert!(parse_lock_log(&lock_log(false)).is_err());
    }

    #[test]
    fn test_lock_event_signature() {
        assert_eq!(
            TokensLocked::SIGNATURE_HASH,
            alloy::primitives::keccak256(b"TokensLocked(address,uint256,address,uint256)")
        );
    }
}
