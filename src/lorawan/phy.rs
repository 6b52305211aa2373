//! PHY layer
//!
//! Thin layer over a [`Radio`] that knows about LoRaWAN radio settings, I/Q
//! polarity and deadlines. All waits are busy polls against a [`Clock`].

use core::fmt;
use core::time::Duration;

use log::{debug, trace, warn};

use super::region::DataRate;
use crate::config::device::DeviceConfig;
use crate::radio::traits::{IrqFlags, Mode, PaConfig, Radio};

/// Monotonic time source
pub trait Clock {
    /// Time since an arbitrary fixed origin
    fn now(&mut self) -> Duration;
}

/// PHY layer timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingParams {
    /// Join accept delay 1 in seconds
    pub join_accept_delay1: u32,
    /// Join accept delay 2 in seconds
    pub join_accept_delay2: u32,
    /// How long a receive window stays open past its delay
    pub rx_window: Duration,
    /// Longest wait for the transmit-complete flag
    pub tx_timeout: Duration,
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            join_accept_delay1: 5,
            join_accept_delay2: 6,
            rx_window: Duration::from_secs(1),
            tx_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&DeviceConfig> for TimingParams {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            join_accept_delay1: config.join_accept_delay1 as u32,
            join_accept_delay2: config.join_accept_delay2 as u32,
            rx_window: config.rx_window,
            tx_timeout: config.tx_timeout,
        }
    }
}

/// Everything the radio needs for one transmission or receive window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioSettings {
    /// Carrier frequency in Hz
    pub frequency: u32,
    /// Data rate index within the frequency plan
    pub data_rate: u8,
    /// Spreading factor and bandwidth of `data_rate`
    pub modulation: DataRate,
    /// Output power in dBm
    pub tx_power: i8,
}

/// PHY layer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhyError<E> {
    /// Radio driver error
    Radio(E),
    /// Transmit-complete flag not seen in time
    TxTimeout,
}

impl<E: fmt::Debug> fmt::Display for PhyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhyError::Radio(e) => write!(f, "radio error: {:?}", e),
            PhyError::TxTimeout => f.write_str("transmission timed out"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for PhyError<E> {}

/// PHY layer
pub struct PhyLayer<R: Radio> {
    radio: R,
}

impl<R: Radio> PhyLayer<R> {
    /// Create new PHY layer
    pub fn new(radio: R) -> Self {
        Self { radio }
    }

    /// Initialize radio
    pub fn init(&mut self, sync_word: u8) -> Result<(), PhyError<R::Error>> {
        self.radio.reset().map_err(PhyError::Radio)?;
        self.radio.set_mode(Mode::Sleep).map_err(PhyError::Radio)?;
        self.radio.set_sync_word(sync_word).map_err(PhyError::Radio)?;
        self.radio.set_mode(Mode::Standby).map_err(PhyError::Radio)
    }

    /// Tune frequency, modulation and output power
    pub fn configure(&mut self, settings: &RadioSettings) -> Result<(), PhyError<R::Error>> {
        trace!(
            "radio {} Hz SF{} {} Hz",
            settings.frequency,
            settings.modulation.spreading_factor,
            settings.modulation.bandwidth.hz()
        );
        let radio = &mut self.radio;
        radio.set_mode(Mode::Standby).map_err(PhyError::Radio)?;
        radio.set_frequency(settings.frequency).map_err(PhyError::Radio)?;
        radio
            .set_spreading_factor(settings.modulation.spreading_factor)
            .map_err(PhyError::Radio)?;
        radio
            .set_bandwidth(settings.modulation.bandwidth)
            .map_err(PhyError::Radio)?;
        radio
            .set_pa_config(PaConfig {
                pa_boost: true,
                output_power: settings.tx_power,
            })
            .map_err(PhyError::Radio)
    }

    /// Load `payload` and start transmitting with normal I/Q
    pub fn start_tx(&mut self, payload: &[u8]) -> Result<(), PhyError<R::Error>> {
        let radio = &mut self.radio;
        radio.set_invert_iq(false).map_err(PhyError::Radio)?;
        radio.clear_irq_flags(IrqFlags::ALL).map_err(PhyError::Radio)?;
        radio.write_payload(payload).map_err(PhyError::Radio)?;
        radio.set_mode(Mode::Transmit).map_err(PhyError::Radio)
    }

    /// Check for transmit completion
    pub fn poll_tx_done(&mut self) -> nb::Result<(), PhyError<R::Error>> {
        let flags = self
            .radio
            .irq_flags()
            .map_err(|e| nb::Error::Other(PhyError::Radio(e)))?;
        if !flags.tx_done() {
            return Err(nb::Error::WouldBlock);
        }
        self.radio
            .clear_irq_flags(IrqFlags::TX_DONE)
            .map_err(|e| nb::Error::Other(PhyError::Radio(e)))?;
        Ok(())
    }

    /// Transmit `payload`, busy-waiting for completion
    ///
    /// Returns the times transmission started and finished. On timeout the
    /// radio is put back to standby.
    pub fn transmit<C: Clock>(
        &mut self,
        clock: &mut C,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(Duration, Duration), PhyError<R::Error>> {
        self.start_tx(payload)?;
        let start = clock.now();
        loop {
            match self.poll_tx_done() {
                Ok(()) => {
                    let end = clock.now();
                    debug!("sent {} bytes in {} ms", payload.len(), (end - start).as_millis());
                    return Ok((start, end));
                }
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if clock.now().saturating_sub(start) > timeout {
                warn!("no transmit-complete after {} ms", timeout.as_millis());
                self.standby()?;
                return Err(PhyError::TxTimeout);
            }
        }
    }

    /// Open a continuous receive window with inverted I/Q
    pub fn start_rx(&mut self, settings: &RadioSettings) -> Result<(), PhyError<R::Error>> {
        self.configure(settings)?;
        let radio = &mut self.radio;
        radio.set_invert_iq(true).map_err(PhyError::Radio)?;
        radio.clear_irq_flags(IrqFlags::ALL).map_err(PhyError::Radio)?;
        radio.set_mode(Mode::ReceiveContinuous).map_err(PhyError::Radio)
    }

    /// Check for a received packet
    ///
    /// Packets that failed their CRC are dropped and the window keeps
    /// listening.
    pub fn poll_rx(&mut self, buffer: &mut [u8]) -> nb::Result<usize, PhyError<R::Error>> {
        let flags = self
            .radio
            .irq_flags()
            .map_err(|e| nb::Error::Other(PhyError::Radio(e)))?;
        if !flags.rx_done() {
            return Err(nb::Error::WouldBlock);
        }
        if flags.crc_error() {
            warn!("dropping packet with bad CRC");
            self.radio
                .clear_irq_flags(IrqFlags::RX_DONE.union(IrqFlags::CRC_ERROR))
                .map_err(|e| nb::Error::Other(PhyError::Radio(e)))?;
            return Err(nb::Error::WouldBlock);
        }
        let received = self
            .radio
            .read_payload(buffer, true)
            .map_err(|e| nb::Error::Other(PhyError::Radio(e)))?;
        self.radio
            .clear_irq_flags(IrqFlags::ALL)
            .map_err(|e| nb::Error::Other(PhyError::Radio(e)))?;
        received.ok_or(nb::Error::WouldBlock)
    }

    /// Listen until a packet arrives or `deadline` passes
    pub fn receive_until<C: Clock>(
        &mut self,
        clock: &mut C,
        buffer: &mut [u8],
        deadline: Duration,
    ) -> Result<Option<usize>, PhyError<R::Error>> {
        loop {
            match self.poll_rx(buffer) {
                Ok(len) => return Ok(Some(len)),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if clock.now() >= deadline {
                self.standby()?;
                return Ok(None);
            }
        }
    }

    /// Put the radio to sleep
    pub fn sleep(&mut self) -> Result<(), PhyError<R::Error>> {
        self.radio.set_mode(Mode::Sleep).map_err(PhyError::Radio)
    }

    /// Put the radio in standby
    pub fn standby(&mut self) -> Result<(), PhyError<R::Error>> {
        self.radio.set_mode(Mode::Standby).map_err(PhyError::Radio)
    }

    /// SNR of the last received packet
    pub fn snr(&mut self) -> Result<i8, PhyError<R::Error>> {
        self.radio.packet_snr().map_err(PhyError::Radio)
    }

    /// Radio driver
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable radio driver
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}
