//! EVM release submitter
//!
//! Calls `releaseTokens` on the destination bridge and waits for the
//! receipt. Revert reasons and RPC failures are mapped onto
//! [`SubmissionError`] so the pipeline can tell terminal rejections from
//! transport failures.

use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::{debug, info, warn};
use url::Url;

use super::{ReleaseSubmitter, SubmissionError};
use crate::config::DestinationConfig;
use crate::contracts::DestinationBridge;
use crate::types::Attestation;

/// Submits release attestations to an EVM destination bridge
pub struct EvmReleaseSubmitter {
    rpc_url: String,
    bridge_address: Address,
    /// Pays for release transactions
    signer: PrivateKeySigner,
}

impl EvmReleaseSubmitter {
    pub fn new(config: &DestinationConfig) -> Result<Self> {
        let bridge_address = Address::from_str(&config.bridge_address)
            .wrap_err("Invalid destination bridge address")?;
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .wrap_err("Invalid private key")?;

        info!(
            sender = %signer.address(),
            bridge_address = %bridge_address,
            "EVM release submitter initialized"
        );

        Ok(Self {
            rpc_url: config.rpc_url.clone(),
            bridge_address,
            signer,
        })
    }

    /// Relayer identity currently configured on the destination bridge
    pub async fn configured_relayer(&self) -> Result<Address> {
        let url: Url = self.rpc_url.parse().wrap_err("Invalid RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);
        let contract = DestinationBridge::new(self.bridge_address, provider);
        let relayer = contract
            .relayer()
            .call()
            .await
            .wrap_err("Failed to query destination relayer")?;
        Ok(relayer._0)
    }

    /// Whether the destination has already released `nonce`
    pub async fn is_processed(&self, nonce: alloy::primitives::U256) -> Result<bool> {
        let url: Url = self.rpc_url.parse().wrap_err("Invalid RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url);
        let contract = DestinationBridge::new(self.bridge_address, provider);
        let processed = contract
            .processedNonces(nonce)
            .call()
            .await
            .wrap_err("Failed to query processed nonce")?;
        Ok(processed._0)
    }

    /// Warn when the destination will reject everything this relayer signs.
    /// Never fails the caller; a query error is logged.
    pub async fn check_relayer_identity(&self, expected: Address) {
        match self.configured_relayer().await {
            Ok(configured) => log_identity_check(configured, expected),
            Err(e) => warn!(error = %e, "Could not verify destination relayer identity"),
        }
    }
}

fn log_identity_check(configured: Address, expected: Address) {
    if configured == Address::ZERO {
        warn!(
            expected = %expected,
            "Destination relayer identity is zero: releases are disabled until an admin sets it"
        );
    } else if configured != expected {
        warn!(
            configured = %configured,
            expected = %expected,
            "Destination relayer identity does not match this signer: every release will be rejected"
        );
    } else {
        info!(relayer = %configured, "Destination relayer identity matches signer");
    }
}

/// A release that mined and reverted while the destination already shows
/// its nonce as processed lost a race with another submission.
fn reverted_release_error(tx_hash: B256, nonce_processed: Option<bool>) -> SubmissionError {
    match nonce_processed {
        Some(true) => SubmissionError::DuplicateNonce,
        _ => SubmissionError::Reverted(format!("transaction {} reverted", tx_hash)),
    }
}

#[async_trait]
impl ReleaseSubmitter for EvmReleaseSubmitter {
    fn destination(&self) -> Address {
        self.bridge_address
    }

    async fn submit_release(
        &self,
        attestation: &Attestation,
    ) -> Result<Option<B256>, SubmissionError> {
        let url: Url = self
            .rpc_url
            .parse()
            .map_err(|e| SubmissionError::Transport(format!("Invalid RPC URL: {}", e)))?;

        // Build provider with signer
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(url);

        let contract = DestinationBridge::new(self.bridge_address, &provider);

        let call = contract.releaseTokens(
            attestation.recipient,
            attestation.amount,
            attestation.nonce,
            attestation.signature.clone(),
        );

        // Gas estimation surfaces the revert reason before anything is broadcast
        let pending_tx = call
            .send()
            .await
            .map_err(|e| SubmissionError::from_message(&e.to_string()))?;

        let tx_hash = *pending_tx.tx_hash();
        debug!(tx_hash = %tx_hash, nonce = %attestation.nonce, "Release sent, waiting for receipt");

        let receipt = pending_tx
            .get_receipt()
            .await
            .map_err(|e| SubmissionError::Transport(format!("Failed to get receipt: {}", e)))?;

        if !receipt.status() {
            let processed = match self.is_processed(attestation.nonce).await {
                Ok(processed) => Some(processed),
                Err(e) => {
                    warn!(
                        nonce = %attestation.nonce,
                        error = %e,
                        "Could not check nonce after revert"
                    );
                    None
                }
            };
            return Err(reverted_release_error(tx_hash, processed));
        }

        Ok(Some(tx_hash))
    }
}
