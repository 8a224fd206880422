//! Contract bindings for the source and destination bridges

pub mod bridge;

pub use bridge::{DestinationBridge, SourceBridge};
