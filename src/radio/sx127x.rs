use embedded_hal::{
    blocking::{
        delay::DelayMs,
        spi::{Transfer, Write},
    },
    digital::v2::OutputPin,
};
use log::{debug, trace};

use crate::radio::traits::{Bandwidth, IrqFlags, Mode, PaConfig, Radio};

// SX127x Register Map (LoRa mode)
const REG_FIFO: u8 = 0x00;
const REG_OP_MODE: u8 = 0x01;
const REG_FRF_MSB: u8 = 0x06;
const REG_FRF_MID: u8 = 0x07;
const REG_FRF_LSB: u8 = 0x08;
const REG_PA_CONFIG: u8 = 0x09;
const REG_LNA: u8 = 0x0C;
const REG_FIFO_ADDR_PTR: u8 = 0x0D;
const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
const REG_IRQ_FLAGS: u8 = 0x12;
const REG_RX_NB_BYTES: u8 = 0x13;
const REG_PKT_SNR_VALUE: u8 = 0x19;
const REG_MODEM_CONFIG_1: u8 = 0x1D;
const REG_MODEM_CONFIG_2: u8 = 0x1E;
const REG_PAYLOAD_LENGTH: u8 = 0x22;
const REG_MODEM_CONFIG_3: u8 = 0x26;
const REG_DETECTION_OPTIMIZE: u8 = 0x31;
const REG_INVERTIQ: u8 = 0x33;
const REG_DETECTION_THRESHOLD: u8 = 0x37;
const REG_SYNC_WORD: u8 = 0x39;
const REG_INVERTIQ2: u8 = 0x3B;
const REG_VERSION: u8 = 0x42;

// Operating Mode bits
const MODE_LONG_RANGE_MODE: u8 = 0x80;
const MODE_SLEEP: u8 = 0x00;
const MODE_STDBY: u8 = 0x01;
const MODE_TX: u8 = 0x03;
const MODE_RX_CONTINUOUS: u8 = 0x05;
const MODE_RX_SINGLE: u8 = 0x06;

// PA Config
const PA_BOOST: u8 = 0x80;
const PA_MAX_POWER: u8 = 0x70;

// Modem config 3
const LOW_DATA_RATE_OPTIMIZE: u8 = 0x08;
const AGC_AUTO_ON: u8 = 0x04;

const SILICON_VERSION: u8 = 0x12;
const FXOSC: u64 = 32_000_000;
const FIFO_SIZE: usize = 255;

/// Possible errors in radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// SPI transfer error
    Spi,
    /// GPIO error
    Gpio,
    /// Silicon version register did not read 0x12
    Version(u8),
    /// Payload larger than the FIFO
    PayloadTooLarge,
}

fn bandwidth_bits(bandwidth: Bandwidth) -> u8 {
    match bandwidth {
        Bandwidth::Khz7_8 => 0,
        Bandwidth::Khz10_4 => 1,
        Bandwidth::Khz15_6 => 2,
        Bandwidth::Khz20_8 => 3,
        Bandwidth::Khz31_25 => 4,
        Bandwidth::Khz41_7 => 5,
        Bandwidth::Khz62_5 => 6,
        Bandwidth::Khz125 => 7,
        Bandwidth::Khz250 => 8,
        Bandwidth::Khz500 => 9,
    }
}

/// SX1276/77/78/79 driver
pub struct SX127x<SPI, CS, RESET, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DELAY: DelayMs<u8>,
{
    spi: SPI,
    cs: CS,
    reset: RESET,
    delay: DELAY,
    frequency: u32,
}

impl<SPI, CS, RESET, DELAY> SX127x<SPI, CS, RESET, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DELAY: DelayMs<u8>,
{
    /// Create new instance of SX127x driver
    ///
    /// Resets the chip, checks its silicon version and puts it in LoRa sleep
    /// mode with both FIFO halves starting at address 0.
    pub fn new(spi: SPI, cs: CS, reset: RESET, delay: DELAY) -> Result<Self, RadioError> {
        let mut radio = Self {
            spi,
            cs,
            reset,
            delay,
            frequency: 0,
        };

        radio.hard_reset()?;

        let version = radio.read_register(REG_VERSION)?;
        if version != SILICON_VERSION {
            return Err(RadioError::Version(version));
        }

        // LoRa mode can only be entered from sleep
        radio.write_register(REG_OP_MODE, MODE_SLEEP)?;
        radio.write_mode(MODE_SLEEP)?;
        radio.write_register(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        radio.write_register(REG_FIFO_RX_BASE_ADDR, 0x00)?;
        let lna = radio.read_register(REG_LNA)?;
        radio.write_register(REG_LNA, lna | 0x03)?;
        radio.write_register(REG_MODEM_CONFIG_3, AGC_AUTO_ON)?;

        debug!("SX127x version {:#04x} ready", version);
        Ok(radio)
    }

    /// Last frequency set, in Hz
    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    /// Give back the bus and pins
    pub fn release(self) -> (SPI, CS, RESET, DELAY) {
        (self.spi, self.cs, self.reset, self.delay)
    }

    fn hard_reset(&mut self) -> Result<(), RadioError> {
        self.reset.set_low().map_err(|_| RadioError::Gpio)?;
        self.delay.delay_ms(1);
        self.reset.set_high().map_err(|_| RadioError::Gpio)?;
        self.delay.delay_ms(10);
        Ok(())
    }

    fn select(&mut self) -> Result<(), RadioError> {
        self.cs.set_low().map_err(|_| RadioError::Gpio)
    }

    fn deselect(&mut self) -> Result<(), RadioError> {
        self.cs.set_high().map_err(|_| RadioError::Gpio)
    }

    /// Read a radio register
    fn read_register(&mut self, addr: u8) -> Result<u8, RadioError> {
        let mut buffer = [addr & 0x7F, 0];
        self.select()?;
        let result = self.spi.transfer(&mut buffer).map(|_| ()).map_err(|_| RadioError::Spi);
        self.deselect()?;
        result?;
        Ok(buffer[1])
    }

    /// Write to a radio register
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), RadioError> {
        self.select()?;
        let result = self.spi.write(&[addr | 0x80, value]).map_err(|_| RadioError::Spi);
        self.deselect()?;
        result
    }

    fn update_register(&mut self, addr: u8, mask: u8, bits: u8) -> Result<(), RadioError> {
        let value = self.read_register(addr)?;
        self.write_register(addr, (value & !mask) | (bits & mask))
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), RadioError> {
        self.select()?;
        let result = self
            .spi
            .write(&[REG_FIFO | 0x80])
            .and_then(|_| self.spi.write(data))
            .map_err(|_| RadioError::Spi);
        self.deselect()?;
        result
    }

    fn read_fifo(&mut self, buffer: &mut [u8]) -> Result<(), RadioError> {
        buffer.iter_mut().for_each(|b| *b = 0);
        self.select()?;
        let result = match self.spi.write(&[REG_FIFO & 0x7F]) {
            Ok(()) => self.spi.transfer(buffer).map(|_| ()).map_err(|_| RadioError::Spi),
            Err(_) => Err(RadioError::Spi),
        };
        self.deselect()?;
        result
    }

    fn write_mode(&mut self, mode: u8) -> Result<(), RadioError> {
        self.write_register(REG_OP_MODE, MODE_LONG_RANGE_MODE | mode)
    }

    /// Low data rate optimisation is mandatory for symbols longer than 16 ms
    fn update_low_data_rate_optimize(&mut self) -> Result<(), RadioError> {
        let sf = self.read_register(REG_MODEM_CONFIG_2)? >> 4;
        let bw = self.read_register(REG_MODEM_CONFIG_1)? >> 4;
        let ldro = sf >= 11 && bw <= bandwidth_bits(Bandwidth::Khz125);
        self.update_register(
            REG_MODEM_CONFIG_3,
            LOW_DATA_RATE_OPTIMIZE,
            if ldro { LOW_DATA_RATE_OPTIMIZE } else { 0 },
        )
    }
}

impl<SPI, CS, RESET, DELAY> Radio for SX127x<SPI, CS, RESET, DELAY>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
    RESET: OutputPin,
    DELAY: DelayMs<u8>,
{
    type Error = RadioError;

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.hard_reset()?;
        self.write_register(REG_OP_MODE, MODE_SLEEP)?;
        self.write_mode(MODE_SLEEP)
    }

    fn set_mode(&mut self, mode: Mode) -> Result<(), Self::Error> {
        let bits = match mode {
            Mode::Sleep => MODE_SLEEP,
            Mode::Standby => MODE_STDBY,
            Mode::Transmit => MODE_TX,
            Mode::ReceiveContinuous => MODE_RX_CONTINUOUS,
            Mode::ReceiveSingle => MODE_RX_SINGLE,
        };
        trace!("SX127x mode {:?}", mode);
        self.write_mode(bits)
    }

    fn set_frequency(&mut self, frequency: u32) -> Result<(), Self::Error> {
        self.frequency = frequency;
        let frf = (frequency as u64 * (1 << 19) / FXOSC) as u32;
        self.write_register(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.write_register(REG_FRF_MID, (frf >> 8) as u8)?;
        self.write_register(REG_FRF_LSB, frf as u8)
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), Self::Error> {
        let sf = sf.clamp(6, 12);
        if sf == 6 {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC5)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0C)?;
        } else {
            self.write_register(REG_DETECTION_OPTIMIZE, 0xC3)?;
            self.write_register(REG_DETECTION_THRESHOLD, 0x0A)?;
        }
        self.update_register(REG_MODEM_CONFIG_2, 0xF0, sf << 4)?;
        self.update_low_data_rate_optimize()
    }

    fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), Self::Error> {
        self.update_register(REG_MODEM_CONFIG_1, 0xF0, bandwidth_bits(bandwidth) << 4)?;
        self.update_low_data_rate_optimize()
    }

    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), Self::Error> {
        self.write_register(REG_SYNC_WORD, sync_word)
    }

    fn set_pa_config(&mut self, config: PaConfig) -> Result<(), Self::Error> {
        let value = if config.pa_boost {
            // Pout = 17 - (15 - OutputPower)
            PA_BOOST | PA_MAX_POWER | (config.output_power.clamp(2, 17) - 2) as u8
        } else {
            // Pout = 15 - (15 - OutputPower) with MaxPower = 7
            PA_MAX_POWER | config.output_power.clamp(0, 15) as u8
        };
        self.write_register(REG_PA_CONFIG, value)
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<usize, Self::Error> {
        if payload.len() > FIFO_SIZE {
            return Err(RadioError::PayloadTooLarge);
        }
        let base = self.read_register(REG_FIFO_TX_BASE_ADDR)?;
        self.write_register(REG_FIFO_ADDR_PTR, base)?;
        self.write_fifo(payload)?;
        self.write_register(REG_PAYLOAD_LENGTH, payload.len() as u8)?;
        Ok(payload.len())
    }

    fn read_payload(&mut self, buffer: &mut [u8], strict: bool) -> Result<Option<usize>, Self::Error> {
        let flags = self.irq_flags()?;
        if !flags.rx_done() || (strict && flags.crc_error()) {
            return Ok(None);
        }
        let len = (self.read_register(REG_RX_NB_BYTES)? as usize).min(buffer.len());
        let current = self.read_register(REG_FIFO_RX_CURRENT_ADDR)?;
        self.write_register(REG_FIFO_ADDR_PTR, current)?;
        self.read_fifo(&mut buffer[..len])?;
        Ok(Some(len))
    }

    fn irq_flags(&mut self) -> Result<IrqFlags, Self::Error> {
        Ok(IrqFlags::from_bits(self.read_register(REG_IRQ_FLAGS)?))
    }

    fn clear_irq_flags(&mut self, flags: IrqFlags) -> Result<(), Self::Error> {
        // Flags clear on writing 1
        self.write_register(REG_IRQ_FLAGS, flags.bits())
    }

    fn set_invert_iq(&mut self, invert: bool) -> Result<(), Self::Error> {
        let value = self.read_register(REG_INVERTIQ)? & 0xBE;
        if invert {
            self.write_register(REG_INVERTIQ, value | 0x40)?;
            self.write_register(REG_INVERTIQ2, 0x19)
        } else {
            self.write_register(REG_INVERTIQ, value | 0x01)?;
            self.write_register(REG_INVERTIQ2, 0x1D)
        }
    }

    fn packet_snr(&mut self) -> Result<i8, Self::Error> {
        // Two's complement in quarter dB
        Ok(self.read_register(REG_PKT_SNR_VALUE)? as i8 / 4)
    }
}
