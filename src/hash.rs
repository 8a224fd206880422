//! Release digest computation
//!
//! Must match the destination bridge bit-for-bit:
//! keccak256(abi.encodePacked(recipient, amount, nonce, destinationBridge))
//!
//! The relayer signs this digest with the standard EIP-191 personal-message
//! prefix, so the destination recovers against
//! keccak256("\x19Ethereum Signed Message:\n32" || digest).

use alloy::primitives::{Address, B256, U256};
use tiny_keccak::{Hasher, Keccak};

/// Packed layout: address (20) + uint256 (32) + uint256 (32) + address (20)
const PACKED_LEN: usize = 20 + 32 + 32 + 20;

const EIP191_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Pack (recipient, amount, nonce, destination) the way
/// `abi.encodePacked(address, uint256, uint256, address)` does.
pub fn encode_release_packed(
    recipient: &Address,
    amount: &U256,
    nonce: &U256,
    destination: &Address,
) -> [u8; PACKED_LEN] {
    let mut data = [0u8; PACKED_LEN];
    data[0..20].copy_from_slice(recipient.as_slice());
    data[20..52].copy_from_slice(&amount.to_be_bytes::<32>());
    data[52..84].copy_from_slice(&nonce.to_be_bytes::<32>());
    data[84..104].copy_from_slice(destination.as_slice());
    data
}

/// Digest the relayer signs and the destination recomputes
pub fn release_digest(
    recipient: &Address,
    amount: &U256,
    nonce: &U256,
    destination: &Address,
) -> B256 {
    B256::from(keccak256(&encode_release_packed(
        recipient,
        amount,
        nonce,
        destination,
    )))
}

/// EIP-191 hash of a 32-byte digest (what ecrecover actually sees)
pub fn eth_signed_message_hash(digest: &B256) -> B256 {
    let mut data = [0u8; EIP191_PREFIX.len() + 32];
    data[..EIP191_PREFIX.len()].copy_from_slice(EIP191_PREFIX);
    data[EIP191_PREFIX.len()..].copy_from_slice(digest.as_slice());
    B256::from(keccak256(&data))
}
