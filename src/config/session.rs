use heapless::Vec;
use serde::{Deserialize, Serialize};

use super::device::{AESKey, Activation, DevAddr, DeviceConfig, EUI64};
use crate::crypto::SessionKeys;
use crate::lorawan::region::FrequencyPlan;

/// Channel slots a session can hold
pub const MAX_CHANNELS: usize = 16;

/// DevNonces remembered to avoid reusing one within a short window
pub const RECENT_NONCES: usize = 8;

/// Aggregated LinkCheckAns results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkCheck {
    /// Lowest demodulation margin reported, in dB
    pub min_margin: u8,
    /// Highest number of gateways that received an uplink
    pub max_gateways: u8,
}

/// Allowed data rate span of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DrRange {
    /// Lowest data rate index
    pub min: u8,
    /// Highest data rate index
    pub max: u8,
}

/// Device session
///
/// Everything the engine learns from the network lives here. The value is
/// owned by the MAC layer and written to the session store after every
/// mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Network address, all-zero until assigned
    pub dev_addr: DevAddr,
    /// Network session key
    pub nwk_skey: Option<AESKey>,
    /// Application session key
    pub app_skey: Option<AESKey>,
    /// Application root key (OTAA only)
    pub app_key: Option<AESKey>,
    /// Application (join) EUI
    pub app_eui: EUI64,
    /// Device EUI
    pub dev_eui: EUI64,
    /// Counter of the next uplink
    pub fcnt_up: u32,
    /// Counter of the last accepted downlink, `None` until one is accepted
    pub fcnt_dn: Option<u32>,
    /// Uplink data rate index
    pub data_rate: u8,
    /// RX1 data rate offset
    pub rx1_dr_offset: u8,
    /// RX2 data rate index
    pub rx2_data_rate: u8,
    /// RX1 frequency pinned by DlChannelReq
    pub rx1_frequency: Option<u32>,
    /// RX2 frequency in Hz
    pub rx2_frequency: u32,
    /// RX1 delay in seconds
    pub rx1_delay: u8,
    /// RX2 delay in seconds
    pub rx2_delay: u8,
    /// Aggregated duty cycle exponent from DutyCycleReq (limit is 1/2^n)
    pub max_duty_cycle: u8,
    /// Join channels
    pub join_frequencies: Vec<u32, MAX_CHANNELS>,
    /// Uplink channels, 0 marks an unused slot
    pub uplink_frequencies: Vec<u32, MAX_CHANNELS>,
    /// RX1 channels, index-aligned with the uplink channels
    pub rx1_frequencies: Vec<u32, MAX_CHANNELS>,
    /// Data rate range of each uplink channel
    pub channel_data_rates: Vec<DrRange, MAX_CHANNELS>,
    /// Enabled uplink channels, bit per slot
    pub channel_mask: u16,
    /// TX power index
    pub tx_power: u8,
    /// Maximum EIRP in dBm
    pub max_eirp: u8,
    /// Transmissions per unconfirmed uplink
    pub nb_trans: u8,
    /// Uplink dwell time limit in force
    pub uplink_dwell_time: bool,
    /// Downlink dwell time limit in force
    pub downlink_dwell_time: bool,
    /// Link check accumulators
    pub link_check: Option<LinkCheck>,
    /// Most recent DevNonces, oldest first
    pub recent_dev_nonces: Vec<u16, RECENT_NONCES>,
}

fn channel_list(frequencies: &[u32]) -> Vec<u32, MAX_CHANNELS> {
    frequencies.iter().take(MAX_CHANNELS).copied().collect()
}

impl Session {
    /// Fresh session from static configuration and the regional defaults
    pub fn from_config(config: &DeviceConfig, plan: &FrequencyPlan) -> Self {
        let uplink_frequencies = channel_list(plan.uplink_frequencies);
        let max_dr = plan.data_rates.len().saturating_sub(1) as u8;
        let channel_data_rates = uplink_frequencies
            .iter()
            .map(|_| DrRange { min: 0, max: max_dr })
            .collect();
        let channel_mask = mask_for(&uplink_frequencies);

        let mut session = Self {
            dev_addr: DevAddr::default(),
            nwk_skey: None,
            app_skey: None,
            app_key: config.app_key(),
            app_eui: config.app_eui,
            dev_eui: config.dev_eui,
            fcnt_up: config.fcnt_up,
            fcnt_dn: None,
            data_rate: config.data_rate,
            rx1_dr_offset: config.rx1_dr_offset,
            rx2_data_rate: config.rx2_data_rate,
            rx1_frequency: None,
            rx2_frequency: config.rx2_frequency,
            rx1_delay: config.rx1_delay,
            rx2_delay: config.rx2_delay,
            max_duty_cycle: 0,
            join_frequencies: channel_list(plan.join_frequencies),
            uplink_frequencies,
            rx1_frequencies: channel_list(plan.rx1_frequencies),
            channel_data_rates,
            channel_mask,
            tx_power: config.tx_power,
            max_eirp: config.max_eirp,
            nb_trans: 1,
            uplink_dwell_time: false,
            downlink_dwell_time: false,
            link_check: None,
            recent_dev_nonces: Vec::new(),
        };

        if let Activation::Abp {
            dev_addr,
            nwk_skey,
            app_skey,
        } = config.activation
        {
            session.dev_addr = dev_addr;
            session.nwk_skey = Some(nwk_skey);
            session.app_skey = Some(app_skey);
        }

        session
    }

    /// A network address has been assigned
    pub fn registered(&self) -> bool {
        !self.dev_addr.is_unset()
    }

    /// Session keys, if both are present
    pub fn keys(&self) -> Option<SessionKeys> {
        Some(SessionKeys {
            nwk_skey: self.nwk_skey?,
            app_skey: self.app_skey?,
        })
    }

    /// Application data may be sent
    pub fn can_transmit(&self) -> bool {
        self.registered() && self.keys().is_some()
    }

    /// Whether a DevNonce was used recently
    pub fn nonce_used(&self, nonce: u16) -> bool {
        self.recent_dev_nonces.contains(&nonce)
    }

    /// Remember a DevNonce, forgetting the oldest when full
    pub fn record_dev_nonce(&mut self, nonce: u16) {
        if self.recent_dev_nonces.is_full() {
            self.recent_dev_nonces.remove(0);
        }
        // cannot fail after the removal above
        let _ = self.recent_dev_nonces.push(nonce);
    }

    /// Frequency of an uplink channel slot, `None` if the slot is unused
    pub fn uplink_frequency(&self, channel: usize) -> Option<u32> {
        self.uplink_frequencies
            .get(channel)
            .copied()
            .filter(|f| *f != 0)
    }

    /// Channel slots that are defined and enabled by the channel mask
    pub fn enabled_channels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.uplink_frequencies.len())
            .filter(move |i| self.channel_mask & (1 << i) != 0)
            .filter(move |i| self.uplink_frequencies[*i] != 0)
    }

    /// Mask with a bit set for every defined channel
    pub fn defined_mask(&self) -> u16 {
        mask_for(&self.uplink_frequencies)
    }

    /// Define, redefine or (with frequency 0) remove a channel
    pub fn set_channel(&mut self, index: usize, frequency: u32, range: DrRange) {
        if index >= MAX_CHANNELS {
            return;
        }
        // Slots are filled up to `index` so all lists stay aligned; capacity
        // is MAX_CHANNELS so the resizes cannot fail.
        let len = self.uplink_frequencies.len().max(index + 1);
        let _ = self.uplink_frequencies.resize(len, 0);
        let _ = self.rx1_frequencies.resize(len, 0);
        let _ = self
            .channel_data_rates
            .resize(len, DrRange { min: 0, max: 0 });

        self.uplink_frequencies[index] = frequency;
        self.rx1_frequencies[index] = frequency;
        self.channel_data_rates[index] = range;
        if frequency == 0 {
            self.channel_mask &= !(1 << index);
        } else {
            self.channel_mask |= 1 << index;
        }
    }

    /// Record a LinkCheckAns
    pub fn record_link_check(&mut self, margin: u8, gateways: u8) {
        self.link_check = Some(match self.link_check {
            Some(prev) => LinkCheck {
                min_margin: prev.min_margin.min(margin),
                max_gateways: prev.max_gateways.max(gateways),
            },
            None => LinkCheck {
                min_margin: margin,
                max_gateways: gateways,
            },
        });
    }
}

fn mask_for(frequencies: &[u32]) -> u16 {
    frequencies
        .iter()
        .enumerate()
        .filter(|(_, f)| **f != 0)
        .fold(0, |mask, (i, _)| mask | (1 << i))
}
