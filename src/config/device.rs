use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

/// EUI-64 (8 bytes, most significant byte first)
pub type EUI64 = [u8; 8];

/// AES-128 key (16 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AESKey([u8; 16]);

impl AESKey {
    /// Create a key from raw bytes
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Keys never end up in logs.
impl fmt::Debug for AESKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AESKey(..)")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AESKey {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "AESKey(..)")
    }
}

/// Device Address (4 bytes, stored most significant byte first)
///
/// On the wire the address travels little-endian; use [`DevAddr::to_wire`]
/// and [`DevAddr::from_wire`] at the frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DevAddr([u8; 4]);

impl DevAddr {
    /// Create an address from big-endian bytes
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Create an address from its little-endian wire representation
    pub fn from_wire(bytes: [u8; 4]) -> Self {
        Self([bytes[3], bytes[2], bytes[1], bytes[0]])
    }

    /// Little-endian wire representation
    pub fn to_wire(&self) -> [u8; 4] {
        [self.0[3], self.0[2], self.0[1], self.0[0]]
    }

    /// Big-endian bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// An all-zero address means no network address has been assigned
    pub fn is_unset(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl From<u32> for DevAddr {
    fn from(addr: u32) -> Self {
        Self(addr.to_be_bytes())
    }
}

/// LoRaWAN device class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceClass {
    /// Class A: Uplink followed by two receive windows
    A,
    /// Class C: Continuously listening on RX2 except when transmitting
    C,
}

/// How the device obtains its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// Over-the-air activation with the application root key
    Otaa {
        /// Application key
        app_key: AESKey,
    },
    /// Activation by personalization with provisioned session keys
    Abp {
        /// Device address
        dev_addr: DevAddr,
        /// Network session key
        nwk_skey: AESKey,
        /// Application session key
        app_skey: AESKey,
    },
}

/// Device configuration for both OTAA and ABP activation
///
/// Everything here is static: the live values are copied into the
/// [`Session`](super::session::Session) on first start and only the session
/// is mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device EUI (unique device identifier)
    pub dev_eui: EUI64,
    /// Application (join) EUI
    pub app_eui: EUI64,
    /// Activation method and its credentials
    pub activation: Activation,
    /// Receive profile
    pub class: DeviceClass,
    /// Uplink data rate index
    pub data_rate: u8,
    /// RX1 data rate offset
    pub rx1_dr_offset: u8,
    /// RX2 data rate index
    pub rx2_data_rate: u8,
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// Delay from end of uplink to RX1 in seconds
    pub rx1_delay: u8,
    /// Delay from end of uplink to RX2 in seconds
    pub rx2_delay: u8,
    /// Delay from end of join request to the first join-accept window
    pub join_accept_delay1: u8,
    /// Delay from end of join request to the second join-accept window
    pub join_accept_delay2: u8,
    /// How long each receive window stays open once reached
    pub rx_window: Duration,
    /// How long to wait for the radio to report transmit completion
    pub tx_timeout: Duration,
    /// TX power index (0 = max EIRP)
    pub tx_power: u8,
    /// Maximum EIRP in dBm
    pub max_eirp: u8,
    /// LoRa sync word
    pub sync_word: u8,
    /// Uplink frame counter a fresh session starts with
    pub fcnt_up: u32,
}

impl DeviceConfig {
    /// Default RX2 frequency (EU868)
    pub const DEFAULT_RX2_FREQUENCY: u32 = 869_525_000;
    /// Public LoRaWAN network sync word
    pub const PUBLIC_SYNC_WORD: u8 = 0x34;

    fn with_activation(dev_eui: EUI64, app_eui: EUI64, activation: Activation) -> Self {
        Self {
            dev_eui,
            app_eui,
            activation,
            class: DeviceClass::A,
            data_rate: 5,
            rx1_dr_offset: 0,
            rx2_data_rate: 0,
            rx2_frequency: Self::DEFAULT_RX2_FREQUENCY,
            rx1_delay: 1,
            rx2_delay: 2,
            join_accept_delay1: 5,
            join_accept_delay2: 6,
            rx_window: Duration::from_secs(1),
            tx_timeout: Duration::from_secs(5),
            tx_power: 0,
            max_eirp: 16,
            sync_word: Self::PUBLIC_SYNC_WORD,
            fcnt_up: 0,
        }
    }

    /// Create a new OTAA device configuration
    pub fn new_otaa(dev_eui: EUI64, app_eui: EUI64, app_key: AESKey) -> Self {
        Self::with_activation(dev_eui, app_eui, Activation::Otaa { app_key })
    }

    /// Create a new ABP device configuration
    pub fn new_abp(
        dev_eui: EUI64,
        app_eui: EUI64,
        dev_addr: DevAddr,
        nwk_skey: AESKey,
        app_skey: AESKey,
    ) -> Self {
        Self::with_activation(
            dev_eui,
            app_eui,
            Activation::Abp {
                dev_addr,
                nwk_skey,
                app_skey,
            },
        )
    }

    /// Set the device class
    pub fn with_class(mut self, class: DeviceClass) -> Self {
        self.class = class;
        self
    }

    /// Application root key, if the device joins over the air
    pub fn app_key(&self) -> Option<AESKey> {
        match self.activation {
            Activation::Otaa { app_key } => Some(app_key),
            Activation::Abp { .. } => None,
        }
    }
}
