//! LoRaWAN protocol implementation
//!
//! This module contains the core LoRaWAN 1.0.4 protocol implementation, including:
//! - Frame codec and join handling
//! - MAC layer and command state machine
//! - PHY layer operations
//! - Regional parameters

/// MAC command handling
pub mod commands;

/// PHYPayload encoding and decoding
pub mod frame;

/// Join request and join accept
pub mod join;

/// MAC layer implementation
pub mod mac;

/// PHY layer operations
pub mod phy;

/// Regional parameters and configurations
pub mod region;

pub use mac::{MacError, MacLayer};
pub use phy::{Clock, PhyError, PhyLayer, RadioSettings, TimingParams};
pub use region::FrequencyPlan;
