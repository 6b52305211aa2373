//! Device and network configuration
//!
//! This module contains types for configuring LoRaWAN devices and keeping
//! their session across restarts. It includes:
//! - Device configuration (DevEUI, AppEUI, keys, radio defaults)
//! - The device session learnt from join and MAC commands
//! - Session persistence through a byte store

/// Device configuration and identity types
pub mod device;

/// Device session state
pub mod session;

/// Session persistence
pub mod store;

pub use device::{Activation, DeviceClass, DeviceConfig};
pub use session::Session;
pub use store::{RamStore, SessionStore};
