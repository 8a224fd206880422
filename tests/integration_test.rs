//! Integration tests for the Lockbridge Relayer
//!
//! The `pipeline` tests run the full watcher → guard → signer → submitter
//! path against the in-process destination ledger and need no
//! infrastructure.
//!
//! The `infrastructure` tests require real services:
//! - Anvil running on localhost:8545 with the bridges deployed
//! - PostgreSQL reachable through DATABASE_URL
//!
//! Run with: cargo test --test integration_test -- --ignored --nocapture
//!
//! Environment variables:
//! - DEST_RPC_URL (default: http://localhost:8545)
//! - DEST_BRIDGE_ADDRESS (required for contract tests)
//! - DATABASE_URL (required for journal tests)

use std::env;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{address, Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::mpsc;

use lockbridge_relayer::db::{Journal, MemoryJournal};
use lockbridge_relayer::destination::{DestinationLedger, Released};
use lockbridge_relayer::guard::ReplayGuard;
use lockbridge_relayer::signer::AttestationSigner;
use lockbridge_relayer::types::{Attestation, LockEvent, ReleaseStatus};
use lockbridge_relayer::watchers::{ChannelLockSource, LockWatcher};
use lockbridge_relayer::writers::{
    resume_pending, ReleasePipeline, ReleaseSubmitter, SubmissionError,
};

// Anvil dev accounts #0 and #1
const RELAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const RELAYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

const ADMIN: Address = address!("00000000000000000000000000000000000000ad");
const DESTINATION: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
const SENDER: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
const RECIPIENT: Address = address!("3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");

fn lock(nonce: u64, amount: u64) -> LockEvent {
    LockEvent::new(SENDER, U256::from(amount), RECIPIENT, U256::from(nonce))
}

/// Run events through watcher and pipeline until the source closes and
/// every release has settled
async fn relay(
    events: Vec<LockEvent>,
    submitter: Arc<dyn ReleaseSubmitter>,
    journal: Arc<MemoryJournal>,
    guard: Arc<ReplayGuard>,
    signing_key: &str,
) {
    let destination = submitter.destination();
    let signer = AttestationSigner::from_private_key(signing_key, destination).unwrap();
    let pipeline = ReleasePipeline::new(signer, submitter, journal.clone(), 4).unwrap();

    let (event_tx, source) = ChannelLockSource::new(16);
    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let pipeline_handle = tokio::spawn(pipeline.run(rx));
    let watcher = LockWatcher::new(source, guard).with_journal(journal, destination);
    let watcher_handle = tokio::spawn(watcher.run(tx, shutdown_rx));

    for event in events {
        event_tx.send(event).await.unwrap();
    }
    drop(event_tx);

    watcher_handle.await.unwrap().unwrap();
    pipeline_handle.await.unwrap().unwrap();
}

// ============================================================================
// In-process pipeline tests
// ============================================================================

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn test_lock_to_release_end_to_end() {
        let ledger = Arc::new(DestinationLedger::new(DESTINATION, ADMIN, RELAYER));
        let journal = Arc::new(MemoryJournal::new());

        relay(
            vec![lock(1, 250)],
            ledger.clone(),
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            RELAYER_KEY,
        )
        .await;

        assert_eq!(
            ledger.released_events(),
            vec![Released {
                recipient: RECIPIENT,
                amount: U256::from(250),
                nonce: U256::from(1),
            }]
        );
        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(250));
        assert!(ledger.is_processed(U256::from(1)));
        assert_eq!(
            journal.entry(DESTINATION, U256::from(1)).unwrap().status(),
            Some(ReleaseStatus::Released)
        );
    }

    #[tokio::test]
    async fn test_redelivered_lock_released_once() {
        let ledger = Arc::new(DestinationLedger::new(DESTINATION, ADMIN, RELAYER));
        let journal = Arc::new(MemoryJournal::new());

        relay(
            vec![lock(1, 100), lock(1, 100), lock(2, 40), lock(1, 100)],
            ledger.clone(),
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            RELAYER_KEY,
        )
        .await;

        assert_eq!(ledger.released_events().len(), 2);
        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(140));
        assert_eq!(journal.counts(DESTINATION).await.unwrap().released, 2);
    }

    #[tokio::test]
    async fn test_wrong_relayer_key_rejected_without_halting() {
        let ledger = Arc::new(DestinationLedger::new(DESTINATION, ADMIN, RELAYER));
        let journal = Arc::new(MemoryJournal::new());

        relay(
            vec![lock(1, 10), lock(2, 20), lock(3, 30)],
            ledger.clone(),
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            OTHER_KEY,
        )
        .await;

        assert!(ledger.released_events().is_empty());
        let counts = journal.counts(DESTINATION).await.unwrap();
        assert_eq!(counts.rejected, 3);
        let entry = journal.entry(DESTINATION, U256::from(2)).unwrap();
        assert_eq!(entry.error_class.as_deref(), Some("invalid_signature"));
    }

    #[tokio::test]
    async fn test_disabled_relayer_fails_closed() {
        let ledger = Arc::new(DestinationLedger::new(DESTINATION, ADMIN, RELAYER));
        ledger.set_relayer_identity(ADMIN, Address::ZERO).unwrap();
        let journal = Arc::new(MemoryJournal::new());

        relay(
            vec![lock(1, 10)],
            ledger.clone(),
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            RELAYER_KEY,
        )
        .await;

        assert_eq!(ledger.balance_of(RECIPIENT), U256::ZERO);
        assert_eq!(
            journal.entry(DESTINATION, U256::from(1)).unwrap().status(),
            Some(ReleaseStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn test_attestation_for_other_deployment_rejected() {
        let other = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
        let ledger = DestinationLedger::new(DESTINATION, ADMIN, RELAYER);

        let attestation = AttestationSigner::from_private_key(RELAYER_KEY, other)
            .unwrap()
            .attest(&lock(1, 10))
            .unwrap();

        assert_eq!(
            ledger.submit_release(&attestation).await,
            Err(SubmissionError::InvalidSignature)
        );
        assert!(!ledger.is_processed(U256::from(1)));
    }

    /// Fails one nonce with a transport error, delegates the rest
    struct FlakySubmitter {
        inner: Arc<DestinationLedger>,
        broken_nonce: U256,
    }

    #[async_trait]
    impl ReleaseSubmitter for FlakySubmitter {
        fn destination(&self) -> Address {
            self.inner.address()
        }

        async fn submit_release(
            &self,
            attestation: &Attestation,
        ) -> Result<Option<B256>, SubmissionError> {
            if attestation.nonce == self.broken_nonce {
                tokio::time::sleep(Duration::from_millis(20)).await;
                return Err(SubmissionError::Transport("connection reset by peer".into()));
            }
            self.inner.submit_release(attestation).await
        }
    }

    #[tokio::test]
    async fn test_submission_failure_isolated_and_resumable() {
        let ledger = Arc::new(DestinationLedger::new(DESTINATION, ADMIN, RELAYER));
        let journal = Arc::new(MemoryJournal::new());
        let flaky = Arc::new(FlakySubmitter {
            inner: ledger.clone(),
            broken_nonce: U256::from(2),
        });

        relay(
            vec![lock(1, 10), lock(2, 20), lock(3, 30)],
            flaky,
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            RELAYER_KEY,
        )
        .await;

        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(40));
        assert_eq!(
            journal.entry(DESTINATION, U256::from(2)).unwrap().status(),
            Some(ReleaseStatus::Failed)
        );

        // Restart with the failed-release switch on: nonce 2 is recovered
        let guard = Arc::new(ReplayGuard::default());
        let signer = AttestationSigner::from_private_key(RELAYER_KEY, DESTINATION).unwrap();
        let pipeline = ReleasePipeline::new(signer, ledger.clone(), journal.clone(), 2).unwrap();
        let (tx, rx) = mpsc::channel(8);

        let resumed = resume_pending(journal.as_ref(), DESTINATION, &guard, &tx, true)
            .await
            .unwrap();
        assert_eq!(resumed, 1);
        drop(tx);
        pipeline.run(rx).await.unwrap();

        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(60));
        assert_eq!(journal.counts(DESTINATION).await.unwrap().released, 3);
    }

    #[tokio::test]
    async fn test_restart_does_not_resubmit_settled_locks() {
        let ledger = Arc::new(DestinationLedger::new(DESTINATION, ADMIN, RELAYER));
        let journal = Arc::new(MemoryJournal::new());

        relay(
            vec![lock(1, 10)],
            ledger.clone(),
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            RELAYER_KEY,
        )
        .await;

        // Fresh process: empty guard, same journal, source rescans the block
        relay(
            vec![lock(1, 10), lock(2, 5)],
            ledger.clone(),
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            RELAYER_KEY,
        )
        .await;

        assert_eq!(ledger.released_events().len(), 2);
        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(15));
        assert_eq!(journal.counts(DESTINATION).await.unwrap().rejected, 0);
    }

    #[tokio::test]
    async fn test_many_concurrent_locks_each_released_once() {
        let ledger = Arc::new(DestinationLedger::new(DESTINATION, ADMIN, RELAYER));
        let journal = Arc::new(MemoryJournal::new());

        let mut events = Vec::new();
        for n in 0..50u64 {
            events.push(lock(n, 1));
            if n % 5 == 0 {
                events.push(lock(n, 1));
            }
        }

        relay(
            events,
            ledger.clone(),
            journal.clone(),
            Arc::new(ReplayGuard::default()),
            RELAYER_KEY,
        )
        .await;

        assert_eq!(ledger.released_events().len(), 50);
        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(50));
    }
}

// ============================================================================
// Infrastructure Tests
// ============================================================================

/// Check if integration tests should run
fn should_run_integration() -> bool {
    env::var("INTEGRATION_TEST").is_ok() || env::var("CI").is_ok()
}

fn dest_rpc_url() -> String {
    env::var("DEST_RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string())
}

mod infrastructure {
    use super::*;
    use lockbridge_relayer::config::DestinationConfig;
    use lockbridge_relayer::db::PgJournal;
    use lockbridge_relayer::types::ReleaseOutcome;
    use lockbridge_relayer::writers::EvmReleaseSubmitter;

    #[tokio::test]
    #[ignore = "requires Anvil running"]
    async fn test_anvil_connectivity() {
        let client = reqwest::Client::new();
        let url = dest_rpc_url();

        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) => {
                assert!(resp.status().is_success(), "Anvil returned error status");
                let json: serde_json::Value = resp.json().await.unwrap();
                assert!(json["result"].is_string(), "Expected block number result");
            }
            Err(e) => panic!("Failed to connect to Anvil at {}: {}", url, e),
        }
    }

    #[tokio::test]
    #[ignore = "requires Anvil with deployed destination bridge"]
    async fn test_destination_relayer_identity() {
        if !should_run_integration() {
            return;
        }
        let Ok(bridge_address) = env::var("DEST_BRIDGE_ADDRESS") else {
            eprintln!("DEST_BRIDGE_ADDRESS not set, skipping");
            return;
        };

        let submitter = EvmReleaseSubmitter::new(&DestinationConfig {
            rpc_url: dest_rpc_url(),
            bridge_address,
            private_key: RELAYER_KEY.to_string(),
        })
        .unwrap();

        let relayer = submitter.configured_relayer().await.unwrap();
        println!("Destination relayer identity: {}", relayer);
        assert!(!submitter.is_processed(U256::MAX).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_postgres_journal_lifecycle() {
        if !should_run_integration() {
            return;
        }
        let Ok(url) = env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping");
            return;
        };

        let journal = PgJournal::connect(&url).await.unwrap();
        let nonce = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let event = lock(nonce, 1);
        let destination = Address::repeat_byte(0x5e);

        assert_eq!(journal.record_observed(&event, destination).await.unwrap(), None);
        assert_eq!(
            journal.record_observed(&event, destination).await.unwrap(),
            Some(ReleaseStatus::Observed)
        );

        journal
            .record_outcome(
                destination,
                event.nonce,
                &ReleaseOutcome::Released { tx_hash: None },
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            journal.record_observed(&event, destination).await.unwrap(),
            Some(ReleaseStatus::Released)
        );

        journal.set_source_cursor(destination, 42).await.unwrap();
        assert_eq!(journal.source_cursor(destination).await.unwrap(), Some(42));
    }
}
