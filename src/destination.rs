//! In-process destination bridge
//!
//! Authoritative release verifier with the same rules as the on-chain
//! destination: recompute the digest against its own address, recover the
//! signer, require it to be the configured relayer identity, then consume
//! the nonce exactly once. Used by the end-to-end tests and as a
//! [`ReleaseSubmitter`] for dry runs without a destination chain.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::hash::release_digest;
use crate::signer::recover_signer;
use crate::types::Attestation;
use crate::writers::{ReleaseSubmitter, SubmissionError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReleaseError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Nonce already processed")]
    DuplicateNonce,

    #[error("Unauthorized")]
    Unauthorized,
}

impl From<ReleaseError> for SubmissionError {
    fn from(err: ReleaseError) -> Self {
        match err {
            ReleaseError::InvalidSignature => SubmissionError::InvalidSignature,
            ReleaseError::DuplicateNonce => SubmissionError::DuplicateNonce,
            ReleaseError::Unauthorized => SubmissionError::Reverted(err.to_string()),
        }
    }
}

/// `Released(recipient, amount, nonce)` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Released {
    pub recipient: Address,
    pub amount: U256,
    pub nonce: U256,
}

struct LedgerState {
    relayer: Address,
    processed: HashSet<U256>,
    balances: HashMap<Address, U256>,
    released: Vec<Released>,
}

pub struct DestinationLedger {
    address: Address,
    admin: Address,
    state: Mutex<LedgerState>,
}

impl DestinationLedger {
    /// Deploy at `address`, administered by `admin`, accepting `relayer`
    pub fn new(address: Address, admin: Address, relayer: Address) -> Self {
        Self {
            address,
            admin,
            state: Mutex::new(LedgerState {
                relayer,
                processed: HashSet::new(),
                balances: HashMap::new(),
                released: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Verify and apply a release. The signature is checked before the
    /// nonce; the nonce check and its consumption happen under one lock.
    pub fn release_tokens(
        &self,
        recipient: Address,
        amount: U256,
        nonce: U256,
        signature: &[u8],
    ) -> Result<Released, ReleaseError> {
        let digest = release_digest(&recipient, &amount, &nonce, &self.address);
        let recovered = recover_signer(&digest, signature);

        let mut state = self.lock();

        // A zero relayer never matches: nothing recovers to the zero address
        if state.relayer == Address::ZERO || recovered != Some(state.relayer) {
            return Err(ReleaseError::InvalidSignature);
        }

        if !state.processed.insert(nonce) {
            return Err(ReleaseError::DuplicateNonce);
        }

        let balance = state.balances.entry(recipient).or_insert(U256::ZERO);
        *balance = balance.saturating_add(amount);

        let event = Released {
            recipient,
            amount,
            nonce,
        };
        state.released.push(event.clone());

        tracing::debug!(
            recipient = %recipient,
            amount = %amount,
            nonce = %nonce,
            "Destination released tokens"
        );
        Ok(event)
    }

    /// `release_tokens` with the fields of an attestation
    pub fn release(&self, attestation: &Attestation) -> Result<Released, ReleaseError> {
        self.release_tokens(
            attestation.recipient,
            attestation.amount,
            attestation.nonce,
            &attestation.signature,
        )
    }

    /// Admin-only. Setting the zero identity disables all releases.
    pub fn set_relayer_identity(
        &self,
        caller: Address,
        identity: Address,
    ) -> Result<(), ReleaseError> {
        if caller != self.admin {
            return Err(ReleaseError::Unauthorized);
        }
        self.lock().relayer = identity;
        Ok(())
    }

    pub fn relayer_identity(&self) -> Address {
        self.lock().relayer
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.lock()
            .balances
            .get(&account)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn is_processed(&self, nonce: U256) -> bool {
        self.lock().processed.contains(&nonce)
    }

    pub fn released_events(&self) -> Vec<Released> {
        self.lock().released.clone()
    }
}

#[async_trait]
impl ReleaseSubmitter for DestinationLedger {
    fn destination(&self) -> Address {
        self.address
    }

    async fn submit_release(
        &self,
        attestation: &Attestation,
    ) -> Result<Option<B256>, SubmissionError> {
        self.release(attestation)?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::AttestationSigner;
    use crate::types::LockEvent;
    use alloy::primitives::address;
    use std::sync::Arc;

    const RELAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const RELAYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    // anvil account #1
    const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const ADMIN: Address = address!("00000000000000000000000000000000000000ad");
    const DEST_X: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
    const DEST_Y: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
    const RECIPIENT: Address = address!("3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");

    fn lock(nonce: u64, amount: u64) -> LockEvent {
        LockEvent::new(
            address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            U256::from(amount),
            RECIPIENT,
            U256::from(nonce),
        )
    }

    fn attest(key: &str, destination: Address, event: &LockEvent) -> Attestation {
        AttestationSigner::from_private_key(key, destination)
            .unwrap()
            .attest(event)
            .unwrap()
    }

    #[test]
    fn test_valid_release_credits_once() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        let attestation = attest(RELAYER_KEY, DEST_X, &lock(1, 500));

        let released = ledger.release(&attestation).unwrap();
        assert_eq!(
            released,
            Released {
                recipient: RECIPIENT,
                amount: U256::from(500),
                nonce: U256::from(1)
            }
        );
        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(500));
        assert!(ledger.is_processed(U256::from(1)));

        assert_eq!(ledger.release(&attestation), Err(ReleaseError::DuplicateNonce));
        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(500));
        assert_eq!(ledger.released_events().len(), 1);
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        let attestation = attest(OTHER_KEY, DEST_X, &lock(1, 500));

        assert_eq!(ledger.release(&attestation), Err(ReleaseError::InvalidSignature));
        assert!(!ledger.is_processed(U256::from(1)));
        assert_eq!(ledger.balance_of(RECIPIENT), U256::ZERO);
    }

    #[test]
    fn test_other_deployment_signature_rejected() {
        let ledger_y = DestinationLedger::new(DEST_Y, ADMIN, RELAYER);
        let attestation = attest(RELAYER_KEY, DEST_X, &lock(1, 500));
        assert_eq!(ledger_y.release(&attestation), Err(ReleaseError::InvalidSignature));
    }

    #[test]
    fn test_signature_for_other_nonce_rejected() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        let attestation = attest(RELAYER_KEY, DEST_X, &lock(1, 500));
        let result = ledger.release_tokens(
            attestation.recipient,
            attestation.amount,
            U256::from(2),
            &attestation.signature,
        );
        assert_eq!(result, Err(ReleaseError::InvalidSignature));
        assert!(!ledger.is_processed(U256::from(2)));
    }

    #[test]
    fn test_tampered_amount_rejected() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        let attestation = attest(RELAYER_KEY, DEST_X, &lock(1, 500));
        let result = ledger.release_tokens(
            attestation.recipient,
            U256::from(5_000),
            attestation.nonce,
            &attestation.signature,
        );
        assert_eq!(result, Err(ReleaseError::InvalidSignature));
    }

    #[test]
    fn test_zero_identity_fails_closed() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        let first = attest(RELAYER_KEY, DEST_X, &lock(1, 500));
        ledger.release(&first).unwrap();

        ledger.set_relayer_identity(ADMIN, Address::ZERO).unwrap();
        let second = attest(RELAYER_KEY, DEST_X, &lock(2, 500));
        assert_eq!(ledger.release(&second), Err(ReleaseError::InvalidSignature));

        // Re-enabling restores releases
        ledger.set_relayer_identity(ADMIN, RELAYER).unwrap();
        assert!(ledger.release(&second).is_ok());
    }

    #[test]
    fn test_signature_checked_before_nonce() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        ledger.release(&attest(RELAYER_KEY, DEST_X, &lock(1, 500))).unwrap();

        let forged = attest(OTHER_KEY, DEST_X, &lock(1, 500));
        assert_eq!(ledger.release(&forged), Err(ReleaseError::InvalidSignature));
    }

    #[test]
    fn test_malformed_signature_rejected() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        let result = ledger.release_tokens(RECIPIENT, U256::from(1), U256::from(1), &[0u8; 12]);
        assert_eq!(result, Err(ReleaseError::InvalidSignature));
    }

    #[test]
    fn test_set_relayer_identity_admin_only() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        assert_eq!(
            ledger.set_relayer_identity(RELAYER, Address::ZERO),
            Err(ReleaseError::Unauthorized)
        );
        assert_eq!(ledger.relayer_identity(), RELAYER);
    }

    #[test]
    fn test_concurrent_submissions_release_once() {
        let ledger = Arc::new(DestinationLedger::new(DEST_X, ADMIN, RELAYER));
        let attestation = attest(RELAYER_KEY, DEST_X, &lock(9, 100));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let attestation = attestation.clone();
                std::thread::spawn(move || ledger.release(&attestation).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(ledger.balance_of(RECIPIENT), U256::from(100));
    }

    #[tokio::test]
    async fn test_submitter_maps_errors() {
        let ledger = DestinationLedger::new(DEST_X, ADMIN, RELAYER);
        let attestation = attest(RELAYER_KEY, DEST_X, &lock(1, 500));

        assert_eq!(ledger.submit_release(&attestation).await, Ok(None));
        assert_eq!(
            ledger.submit_release(&attestation).await,
            Err(SubmissionError::DuplicateNonce)
        );
    }
}
