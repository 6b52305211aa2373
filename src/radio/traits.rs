use core::fmt::Debug;

/// LoRa bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bandwidth {
    /// 7.8 kHz
    Khz7_8,
    /// 10.4 kHz
    Khz10_4,
    /// 15.6 kHz
    Khz15_6,
    /// 20.8 kHz
    Khz20_8,
    /// 31.25 kHz
    Khz31_25,
    /// 41.7 kHz
    Khz41_7,
    /// 62.5 kHz
    Khz62_5,
    /// 125 kHz
    Khz125,
    /// 250 kHz
    Khz250,
    /// 500 kHz
    Khz500,
}

impl Bandwidth {
    /// Bandwidth in Hz
    pub fn hz(&self) -> u32 {
        match self {
            Bandwidth::Khz7_8 => 7_800,
            Bandwidth::Khz10_4 => 10_400,
            Bandwidth::Khz15_6 => 15_600,
            Bandwidth::Khz20_8 => 20_800,
            Bandwidth::Khz31_25 => 31_250,
            Bandwidth::Khz41_7 => 41_700,
            Bandwidth::Khz62_5 => 62_500,
            Bandwidth::Khz125 => 125_000,
            Bandwidth::Khz250 => 250_000,
            Bandwidth::Khz500 => 500_000,
        }
    }
}

/// Transceiver operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Lowest power, registers retained
    Sleep,
    /// Oscillator running, ready to switch
    Standby,
    /// Transmit the FIFO contents
    Transmit,
    /// Receive until told otherwise
    ReceiveContinuous,
    /// Receive a single packet
    ReceiveSingle,
}

/// Interrupt flags as reported by the transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqFlags(u8);

impl IrqFlags {
    /// Receive timed out
    pub const RX_TIMEOUT: IrqFlags = IrqFlags(0x80);
    /// Packet received
    pub const RX_DONE: IrqFlags = IrqFlags(0x40);
    /// Payload CRC failed
    pub const CRC_ERROR: IrqFlags = IrqFlags(0x20);
    /// Valid header received
    pub const VALID_HEADER: IrqFlags = IrqFlags(0x10);
    /// Transmission complete
    pub const TX_DONE: IrqFlags = IrqFlags(0x08);
    /// Channel activity detection finished
    pub const CAD_DONE: IrqFlags = IrqFlags(0x04);
    /// Frequency hop requested
    pub const FHSS_CHANGE: IrqFlags = IrqFlags(0x02);
    /// Channel activity detected
    pub const CAD_DETECTED: IrqFlags = IrqFlags(0x01);
    /// Every flag
    pub const ALL: IrqFlags = IrqFlags(0xFF);

    /// Flags from a raw register value
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw register value
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// All flags of `other` are set
    pub const fn contains(&self, other: IrqFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets
    pub const fn union(self, other: IrqFlags) -> Self {
        Self(self.0 | other.0)
    }

    /// Transmission complete
    pub fn tx_done(&self) -> bool {
        self.contains(Self::TX_DONE)
    }

    /// Packet received
    pub fn rx_done(&self) -> bool {
        self.contains(Self::RX_DONE)
    }

    /// Payload CRC failed
    pub fn crc_error(&self) -> bool {
        self.contains(Self::CRC_ERROR)
    }

    /// Valid header received
    pub fn valid_header(&self) -> bool {
        self.contains(Self::VALID_HEADER)
    }

    /// Receive timed out
    pub fn rx_timeout(&self) -> bool {
        self.contains(Self::RX_TIMEOUT)
    }
}

/// Power amplifier configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PaConfig {
    /// Use the PA_BOOST pin instead of RFO
    pub pa_boost: bool,
    /// Output power in dBm
    pub output_power: i8,
}

/// LoRa transceiver as seen by the protocol engine
///
/// Modulation, frequency and FIFO access only; timing and protocol logic stay
/// in the engine.
pub trait Radio {
    /// Error type for radio operations
    type Error: Debug;

    /// Hardware reset
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Switch operating mode
    fn set_mode(&mut self, mode: Mode) -> Result<(), Self::Error>;

    /// Carrier frequency in Hz
    fn set_frequency(&mut self, frequency: u32) -> Result<(), Self::Error>;

    /// Spreading factor (6-12)
    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), Self::Error>;

    /// Signal bandwidth
    fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), Self::Error>;

    /// LoRa sync word
    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), Self::Error>;

    /// Power amplifier selection and output power
    fn set_pa_config(&mut self, config: PaConfig) -> Result<(), Self::Error>;

    /// Load a packet into the FIFO, returns the number of bytes written
    fn write_payload(&mut self, payload: &[u8]) -> Result<usize, Self::Error>;

    /// Copy the last received packet into `buffer`
    ///
    /// With `strict` set a packet that failed its CRC yields `None`.
    fn read_payload(&mut self, buffer: &mut [u8], strict: bool) -> Result<Option<usize>, Self::Error>;

    /// Current interrupt flags
    fn irq_flags(&mut self) -> Result<IrqFlags, Self::Error>;

    /// Clear the given interrupt flags
    fn clear_irq_flags(&mut self, flags: IrqFlags) -> Result<(), Self::Error>;

    /// Invert I/Q (receiving network downlinks) or restore normal I/Q (transmitting)
    fn set_invert_iq(&mut self, invert: bool) -> Result<(), Self::Error>;

    /// SNR of the last received packet in dB
    fn packet_snr(&mut self) -> Result<i8, Self::Error>;
}
