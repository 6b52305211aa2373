//! LoRaWAN end-device engine in Rust
//!
//! This crate provides a `no_std` implementation of a LoRaWAN 1.0.4 end
//! device: OTAA join, secured uplinks and downlinks, MAC command handling,
//! and the Class A/C receive window scheduling on top of a LoRa transceiver.
//!
//! # Features
//! - OTAA and ABP activation
//! - Class A and Class C devices
//! - EU868 frequency plan, duty cycle and fair-use helpers
//! - Session persistence through a pluggable store
//! - SX127x driver over `embedded-hal` 0.2
//! - No heap allocation, no unsafe code
//!
//! # Example
//! ```ignore
//! use lorawan_node::{
//!     config::{device::{AESKey, DeviceConfig}, RamStore},
//!     device::Device,
//!     lorawan::region::FrequencyPlan,
//! };
//!
//! let config = DeviceConfig::new_otaa(
//!     [0x00; 8],              // DevEUI
//!     [0x00; 8],              // AppEUI
//!     AESKey::new([0x00; 16]), // AppKey
//! );
//!
//! // radio, clock and rng come from the board support crate
//! let mut device = Device::new(radio, config, FrequencyPlan::EU868, RamStore::new(), clock, rng)?;
//! device.join_with_retries(3)?;
//! device.send(1, b"Hello, LoRaWAN!")?;
//! let wait = device.duty_cycle_wait();
//! ```

#![warn(missing_docs)]
#![no_std]

#[cfg(feature = "std")]
extern crate std;

/// Device classes and the transmit/receive scheduler
pub mod class;

/// Device and network configuration
pub mod config;

/// Cryptographic functions
pub mod crypto;

/// High-level device interface
pub mod device;

/// LoRaWAN protocol implementation
pub mod lorawan;

/// Radio hardware abstraction layer
pub mod radio;
