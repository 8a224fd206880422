//! Lockbridge Relayer - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod config;
pub mod contracts;
pub mod db;
pub mod destination;
pub mod guard;
pub mod hash;
pub mod metrics;
pub mod retry;
pub mod signer;
pub mod types;
pub mod watchers;
pub mod writers;
