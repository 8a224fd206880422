//! Backoff and error classification
//!
//! Backoff paces re-polling after source delivery failures. Classification
//! maps raw RPC / revert text onto the bridge's error taxonomy so outcomes
//! are logged and journaled consistently. Releases themselves are never
//! retried automatically.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Error taxonomy for release submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network / RPC hiccup; a later manual resubmission may succeed
    Transient,
    /// Destination rejected the signer (wrong key, tampered payload, relayer disabled)
    InvalidSignature,
    /// Destination already released this nonce
    DuplicateNonce,
    /// Any other on-chain rejection
    Permanent,
    /// Unrecognized failure
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::InvalidSignature => "invalid_signature",
            ErrorClass::DuplicateNonce => "duplicate_nonce",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Terminal rejections: resubmitting the same attestation can never succeed
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorClass::InvalidSignature | ErrorClass::DuplicateNonce)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("invalid signature") || error_lower.contains("invalidsignature") {
        return ErrorClass::InvalidSignature;
    }

    if error_lower.contains("nonce already processed")
        || error_lower.contains("duplicatenonce")
        || error_lower.contains("duplicate nonce")
    {
        return ErrorClass::DuplicateNonce;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("nonce too low")
        || error_lower.contains("underpriced")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}
