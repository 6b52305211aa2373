//! Radio hardware abstraction layer

/// Transceiver trait and shared types
pub mod traits;

/// Semtech SX1276/77/78/79 driver
pub mod sx127x;

pub use traits::Radio;
pub use sx127x::SX127x;
