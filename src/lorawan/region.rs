//! Regional parameters
//!
//! A [`FrequencyPlan`] is an immutable table of channels, data rates and
//! regulatory limits. Only EU868 is shipped.

pub use crate::radio::traits::Bandwidth;

/// Data rate: a spreading factor / bandwidth pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataRate {
    /// Spreading factor (7-12)
    pub spreading_factor: u8,
    /// Bandwidth
    pub bandwidth: Bandwidth,
}

impl DataRate {
    /// Data rate from its parts
    pub const fn new(spreading_factor: u8, bandwidth: Bandwidth) -> Self {
        Self {
            spreading_factor,
            bandwidth,
        }
    }
}

/// Maximum duty cycle for a frequency sub-band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubBand {
    /// Lowest frequency in Hz (inclusive)
    pub min_frequency: u32,
    /// Highest frequency in Hz (inclusive)
    pub max_frequency: u32,
    /// Duty cycle limit in percent
    pub duty_cycle: f32,
}

/// Frequency plan of a region
#[derive(Debug, Clone, Copy)]
pub struct FrequencyPlan {
    /// Channels a join request may be sent on
    pub join_frequencies: &'static [u32],
    /// Default uplink channels
    pub uplink_frequencies: &'static [u32],
    /// Default RX1 channels, index-aligned with the uplink channels
    pub rx1_frequencies: &'static [u32],
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// RX2 data rate index
    pub rx2_data_rate: u8,
    /// Data rate table, indexed by DR
    pub data_rates: &'static [DataRate],
    /// RX1 data rate, indexed by `[uplink DR][RX1 DR offset]`
    pub rx1_dr_table: &'static [[u8; 6]],
    /// Maximum application payload size, indexed by DR
    pub max_payload: &'static [u8],
    /// Duty cycle sub-bands
    pub sub_bands: &'static [SubBand],
    /// Duty cycle used when a frequency falls outside all sub-bands
    pub fallback_duty_cycle: f32,
    /// Lowest legal frequency in Hz
    pub min_frequency: u32,
    /// Highest legal frequency in Hz
    pub max_frequency: u32,
    /// Highest valid TX power index
    pub max_tx_power_index: u8,
    /// Number of channels that may not be modified by the network
    pub default_channels: u8,
}

const EU868_DATA_RATES: [DataRate; 7] = [
    DataRate::new(12, Bandwidth::Khz125),
    DataRate::new(11, Bandwidth::Khz125),
    DataRate::new(10, Bandwidth::Khz125),
    DataRate::new(9, Bandwidth::Khz125),
    DataRate::new(8, Bandwidth::Khz125),
    DataRate::new(7, Bandwidth::Khz125),
    DataRate::new(7, Bandwidth::Khz250),
];

const EU868_CHANNELS: [u32; 8] = [
    868_100_000,
    868_300_000,
    868_500_000,
    867_100_000,
    867_300_000,
    867_500_000,
    867_700_000,
    867_900_000,
];

const EU868_SUB_BANDS: [SubBand; 5] = [
    SubBand { min_frequency: 863_000_000, max_frequency: 867_999_999, duty_cycle: 1.0 },
    SubBand { min_frequency: 868_000_000, max_frequency: 868_600_000, duty_cycle: 1.0 },
    SubBand { min_frequency: 868_700_000, max_frequency: 869_200_000, duty_cycle: 0.1 },
    SubBand { min_frequency: 869_400_000, max_frequency: 869_650_000, duty_cycle: 10.0 },
    SubBand { min_frequency: 869_700_000, max_frequency: 870_000_000, duty_cycle: 1.0 },
];

const EU868_RX1_DR: [[u8; 6]; 7] = [
    [0, 0, 0, 0, 0, 0],
    [1, 0, 0, 0, 0, 0],
    [2, 1, 0, 0, 0, 0],
    [3, 2, 1, 0, 0, 0],
    [4, 3, 2, 1, 0, 0],
    [5, 4, 3, 2, 1, 0],
    [6, 5, 4, 3, 2, 1],
];

impl FrequencyPlan {
    /// EU863-870
    pub const EU868: FrequencyPlan = FrequencyPlan {
        join_frequencies: &[868_100_000, 868_300_000, 868_500_000],
        uplink_frequencies: &EU868_CHANNELS,
        rx1_frequencies: &EU868_CHANNELS,
        rx2_frequency: 869_525_000,
        rx2_data_rate: 0,
        data_rates: &EU868_DATA_RATES,
        rx1_dr_table: &EU868_RX1_DR,
        max_payload: &[51, 51, 51, 115, 222, 222, 222],
        sub_bands: &EU868_SUB_BANDS,
        fallback_duty_cycle: 0.1,
        min_frequency: 863_000_000,
        max_frequency: 870_000_000,
        max_tx_power_index: 7,
        default_channels: 3,
    };

    /// Spreading factor and bandwidth of a data rate index
    pub fn data_rate(&self, index: u8) -> Option<DataRate> {
        self.data_rates.get(index as usize).copied()
    }

    /// RX1 data rate for an uplink data rate and the negotiated offset
    pub fn rx1_data_rate(&self, uplink_dr: u8, offset: u8) -> u8 {
        self.rx1_dr_table
            .get(uplink_dr as usize)
            .and_then(|row| row.get(offset as usize))
            .copied()
            .unwrap_or(uplink_dr)
    }

    /// Whether the frequency lies inside the regional band
    pub fn in_band(&self, frequency: u32) -> bool {
        (self.min_frequency..=self.max_frequency).contains(&frequency)
    }

    /// Duty cycle limit in percent for a frequency
    pub fn duty_cycle(&self, frequency: u32) -> f32 {
        self.sub_bands
            .iter()
            .find(|band| (band.min_frequency..=band.max_frequency).contains(&frequency))
            .map(|band| band.duty_cycle)
            .unwrap_or(self.fallback_duty_cycle)
    }

    /// Maximum application payload size in bytes for a data rate
    pub fn max_payload(&self, data_rate: u8) -> usize {
        self.max_payload
            .get(data_rate as usize)
            .copied()
            .unwrap_or(0) as usize
    }

    /// Conducted TX power in dBm for a TX power index
    pub fn tx_power_dbm(&self, max_eirp: u8, index: u8) -> i8 {
        max_eirp as i8 - 2 * index.min(self.max_tx_power_index) as i8
    }
}
