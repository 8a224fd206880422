//! Attestation signer
//!
//! Builds the release digest over (recipient, amount, nonce, destination)
//! and signs it with the relayer key using EIP-191 personal-message
//! prefixing. Pure: no state beyond the key, same inputs give the same
//! attestation.

use alloy::primitives::{Address, Bytes, PrimitiveSignature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use eyre::{eyre, Result, WrapErr};

use crate::hash::{eth_signed_message_hash, release_digest};
use crate::types::{Attestation, LockEvent};

/// Signs release attestations for one destination deployment
#[derive(Clone)]
pub struct AttestationSigner {
    signer: PrivateKeySigner,
    destination: Address,
}

impl AttestationSigner {
    pub fn new(signer: PrivateKeySigner, destination: Address) -> Self {
        Self {
            signer,
            destination,
        }
    }

    /// Parse a 0x-prefixed hex private key
    pub fn from_private_key(private_key: &str, destination: Address) -> Result<Self> {
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;
        Ok(Self::new(signer, destination))
    }

    /// Relayer identity the destination must have configured
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Destination bridge this signer binds attestations to
    pub fn destination(&self) -> Address {
        self.destination
    }

    /// Build and sign the attestation for a forwarded lock event
    pub fn attest(&self, event: &LockEvent) -> Result<Attestation> {
        let digest = release_digest(
            &event.recipient,
            &event.amount,
            &event.nonce,
            &self.destination,
        );

        let signature = self
            .signer
            .sign_message_sync(digest.as_slice())
            .map_err(|e| eyre!("Failed to sign release digest: {}", e))?;

        Ok(Attestation {
            recipient: event.recipient,
            amount: event.amount,
            nonce: event.nonce,
            destination: self.destination,
            digest,
            signature: Bytes::from(signature.as_bytes().to_vec()),
        })
    }
}

impl std::fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("address", &self.signer.address())
            .field("destination", &self.destination)
            .finish()
    }
}

/// Recover the identity that signed `digest` (EIP-191 prefixed).
///
/// Returns `None` for malformed signatures; a malformed signature never
/// recovers to any identity.
pub fn recover_signer(digest: &B256, signature: &[u8]) -> Option<Address> {
    let signature = PrimitiveSignature::try_from(signature).ok()?;
    signature
        .recover_address_from_prehash(&eth_signed_message_hash(digest))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, U256};

    // Well-known anvil dev account #0
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const DESTINATION: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

    fn sample_event() -> LockEvent {
        LockEvent::new(
            address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            U256::from(10u64).pow(U256::from(19u64)),
            address!("70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            U256::from(1u64),
        )
    }

    #[test]
    fn test_signer_address_from_key() {
        let signer = AttestationSigner::from_private_key(DEV_KEY, DESTINATION).unwrap();
        assert_eq!(signer.address(), DEV_ADDRESS);
        assert_eq!(signer.destination(), DESTINATION);
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        assert!(AttestationSigner::from_private_key("0x1234", DESTINATION).is_err());
    }

    #[test]
    fn test_attestation_is_deterministic() {
        let signer = AttestationSigner::from_private_key(DEV_KEY, DESTINATION).unwrap();
        let a = signer.attest(&sample_event()).unwrap();
        let b = signer.attest(&sample_event()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.signature.len(), 65);
    }

    #[test]
    fn test_signature_recovers_to_relayer() {
        let signer = AttestationSigner::from_private_key(DEV_KEY, DESTINATION).unwrap();
        let attestation = signer.attest(&sample_event()).unwrap();
        assert_eq!(
            recover_signer(&attestation.digest, &attestation.signature),
            Some(DEV_ADDRESS)
        );
    }

    #[test]
    fn test_attestation_binds_destination() {
        let signer = AttestationSigner::from_private_key(DEV_KEY, DESTINATION).unwrap();
        let other = AttestationSigner::from_private_key(
            DEV_KEY,
            address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512"),
        )
        .unwrap();
        let a = signer.attest(&sample_event()).unwrap();
        let b = other.attest(&sample_event()).unwrap();
        assert_ne!(a.digest, b.digest);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_recover_against_wrong_digest_gives_other_identity() {
        let signer = AttestationSigner::from_private_key(DEV_KEY, DESTINATION).unwrap();
        let attestation = signer.attest(&sample_event()).unwrap();
        let recovered = recover_signer(&B256::repeat_byte(0x42), &attestation.signature);
        assert_ne!(recovered, Some(DEV_ADDRESS));
    }

    #[test]
    fn test_malformed_signature_recovers_nothing() {
        assert_eq!(recover_signer(&B256::ZERO, &[0u8; 10]), None);
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let signer = AttestationSigner::from_private_key(DEV_KEY, DESTINATION).unwrap();
        let debug = format!("{:?}", signer);
        assert!(!debug.contains("ac0974bec39a17e3"));
    }
}
