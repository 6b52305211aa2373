//! LoRaWAN device class implementations
//!
//! The [`Scheduler`] drives one radio exchange at a time:
//! - Class A: an uplink followed by the RX1 and RX2 windows, then sleep
//! - Class C: the same exchange, then continuous listening on RX2 until the
//!   next uplink
//!
//! ```text
//! Idle -> Transmitting -> AwaitingRx1 -> AwaitingRx2 -> Idle
//!                                                    \-> ListeningRx2 (Class C)
//! ```

/// Class A exchange
pub mod class_a;

/// Class C continuous listening
pub mod class_c;

use core::time::Duration;

use heapless::Vec;

use crate::config::device::DeviceClass;
use crate::lorawan::frame::MAX_PHY_PAYLOAD;
use crate::lorawan::phy::{PhyLayer, TimingParams};
use crate::radio::traits::Radio;

/// Device operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingMode {
    /// Class A: receive windows only after an uplink
    ClassA,
    /// Class C: continuous receive
    ClassC,
}

impl From<DeviceClass> for OperatingMode {
    fn from(class: DeviceClass) -> Self {
        match class {
            DeviceClass::A => OperatingMode::ClassA,
            DeviceClass::C => OperatingMode::ClassC,
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Radio asleep or in standby
    Idle,
    /// Uplink on air
    Transmitting,
    /// Listening in RX1
    AwaitingRx1,
    /// Listening in RX2
    AwaitingRx2,
    /// Class C listening on RX2 between uplinks
    ListeningRx2,
}

/// Window a downlink arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxWindow {
    /// First receive window
    Rx1,
    /// Second receive window
    Rx2,
    /// Class C continuous RX2
    Continuous,
}

/// A raw downlink as received by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Window it arrived in
    pub window: RxWindow,
    /// PHYPayload bytes
    pub bytes: Vec<u8, MAX_PHY_PAYLOAD>,
    /// Packet SNR in dB
    pub snr: i8,
}

/// Outcome of one uplink with its receive windows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Time the uplink spent on air
    pub airtime: Duration,
    /// Downlink received in RX1 or RX2, if any
    pub downlink: Option<Downlink>,
}

/// Receive window timing of one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTiming {
    /// RX1 closes at `rx1_delay + rx_window` after the uplink ends
    pub rx1_delay: Duration,
    /// RX2 closes at `rx2_delay + rx_window` after the uplink ends
    pub rx2_delay: Duration,
    /// Window duration
    pub rx_window: Duration,
    /// Longest wait for transmit completion
    pub tx_timeout: Duration,
}

impl WindowTiming {
    /// Timing after a data uplink with the session's RX delays
    pub fn data(timing: &TimingParams, rx1_delay: u8, rx2_delay: u8) -> Self {
        Self {
            rx1_delay: Duration::from_secs(rx1_delay as u64),
            rx2_delay: Duration::from_secs(rx2_delay as u64),
            rx_window: timing.rx_window,
            tx_timeout: timing.tx_timeout,
        }
    }

    /// Timing after a join request
    pub fn join(timing: &TimingParams) -> Self {
        Self {
            rx1_delay: Duration::from_secs(timing.join_accept_delay1 as u64),
            rx2_delay: Duration::from_secs(timing.join_accept_delay2 as u64),
            rx_window: timing.rx_window,
            tx_timeout: timing.tx_timeout,
        }
    }
}

/// Transmit/receive scheduler
pub struct Scheduler<R: Radio> {
    phy: PhyLayer<R>,
    mode: OperatingMode,
    state: State,
}

impl<R: Radio> Scheduler<R> {
    /// Create a scheduler around an initialised PHY layer
    pub fn new(phy: PhyLayer<R>, mode: OperatingMode) -> Self {
        Self {
            phy,
            mode,
            state: State::Idle,
        }
    }

    /// Get current operating mode
    pub fn operating_mode(&self) -> OperatingMode {
        self.mode
    }

    /// Current state
    pub fn state(&self) -> State {
        self.state
    }

    /// PHY layer
    pub fn phy(&self) -> &PhyLayer<R> {
        &self.phy
    }

    /// Mutable PHY layer
    pub fn phy_mut(&mut self) -> &mut PhyLayer<R> {
        &mut self.phy
    }
}
