//! MAC layer
//!
//! [`MacLayer`] owns the device [`Session`] and is the only place that
//! mutates it. Every mutation is followed by a write to the session store;
//! store failures are logged and the layer carries on with its in-memory
//! state.

use core::fmt;

use heapless::Vec;
use log::{debug, error, info, warn};
use rand_core::RngCore;

use super::commands::{self, CommandContext, DeviceTime, DEVICE_TIME_REQ, LINK_CHECK_REQ};
use super::frame::{Frame, MAX_FOPTS};
use super::join::JoinAccept;
use super::phy::RadioSettings;
use super::region::{Bandwidth, DataRate, FrequencyPlan};
use crate::config::device::DeviceConfig;
use crate::config::session::{DrRange, Session};
use crate::config::store::{self, SessionStore};

/// Outbound MAC command buffer size
///
/// Larger than what fits in FOpts so an overflowing batch is detected rather
/// than silently truncated.
const REPLY_BUFFER: usize = 32;

/// Draws before `next_dev_nonce` settles for a recently used nonce
pub const DEV_NONCE_DRAWS: usize = 32;

/// MAC layer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacError {
    /// Length or structure of a frame is invalid
    MalformedFrame,
    /// Message integrity code mismatch
    InvalidMic,
    /// MAC command identifier not known
    UnknownCommand(u8),
    /// Downlink frame counter replayed or stale
    FrameCounter,
    /// Frame is addressed to another device
    AddressMismatch,
    /// Buffer too small
    BufferTooSmall,
    /// No session keys
    MissingKeys,
    /// Join accept received without an outstanding join request
    NoPendingJoin,
    /// No uplink channel is enabled
    NoChannel,
}

impl fmt::Display for MacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacError::MalformedFrame => f.write_str("malformed frame"),
            MacError::InvalidMic => f.write_str("invalid MIC"),
            MacError::UnknownCommand(cid) => write!(f, "unknown MAC command 0x{:02x}", cid),
            MacError::FrameCounter => f.write_str("frame counter replayed"),
            MacError::AddressMismatch => f.write_str("frame addressed to another device"),
            MacError::BufferTooSmall => f.write_str("buffer too small"),
            MacError::MissingKeys => f.write_str("no session keys"),
            MacError::NoPendingJoin => f.write_str("no join request outstanding"),
            MacError::NoChannel => f.write_str("no uplink channel enabled"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MacError {}

/// MAC command processing state for the current downlink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandState {
    /// No downlink processed yet
    Idle,
    /// Batch received, read index at the start
    ParsingOptions,
    /// Executing the command at the read index
    Dispatching,
    /// Batch finished (fully consumed or aborted)
    Done,
}

/// MAC layer state
pub struct MacLayer<S: SessionStore> {
    session: Session,
    plan: FrequencyPlan,
    store: S,
    replies: Vec<u8, REPLY_BUFFER>,
    replies_overflowed: bool,
    state: CommandState,
    battery: u8,
    last_snr: i8,
    channel: Option<usize>,
    device_time: Option<DeviceTime>,
}

impl<S: SessionStore> MacLayer<S> {
    /// Create a MAC layer, restoring the stored session if there is one
    pub fn new(config: &DeviceConfig, plan: FrequencyPlan, store: S) -> Self {
        let mut mac = Self {
            session: Session::from_config(config, &plan),
            plan,
            store,
            replies: Vec::new(),
            replies_overflowed: false,
            state: CommandState::Idle,
            battery: 255,
            last_snr: 0,
            channel: None,
            device_time: None,
        };

        match mac.restore() {
            Some(session) => {
                info!("restored session, fcnt_up {}", session.fcnt_up);
                mac.session = session;
            }
            None => info!("starting a new session"),
        }
        mac.persist();
        mac
    }

    fn restore(&mut self) -> Option<Session> {
        let blob = match self.store.load() {
            Ok(blob) => blob?,
            Err(e) => {
                error!("session store read failed: {:?}", e);
                return None;
            }
        };
        match store::decode_session(&blob) {
            Ok(session) => session,
            Err(e) => {
                warn!("discarding stored session: {}", e);
                None
            }
        }
    }

    /// Write the session to the store
    pub fn persist(&mut self) {
        let blob = match store::encode_session(&self.session) {
            Ok(blob) => blob,
            Err(e) => {
                error!("session encode failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.save(&blob) {
            error!("session store write failed: {:?}", e);
        }
    }

    /// Forget everything learnt from the network and start over from configuration
    pub fn reset_session(&mut self, config: &DeviceConfig) {
        self.session = Session::from_config(config, &self.plan);
        self.replies.clear();
        self.replies_overflowed = false;
        self.persist();
    }

    /// Current session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Frequency plan
    pub fn plan(&self) -> &FrequencyPlan {
        &self.plan
    }

    /// Session store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// MAC command processing state
    pub fn command_state(&self) -> CommandState {
        self.state
    }

    /// Battery level reported in DevStatusAns
    pub fn set_battery_level(&mut self, level: u8) {
        self.battery = level;
    }

    /// Record the SNR of the last received frame
    pub fn set_last_snr(&mut self, snr: i8) {
        self.last_snr = snr;
    }

    /// Network time from the last DeviceTimeAns
    pub fn device_time(&self) -> Option<DeviceTime> {
        self.device_time
    }

    /// Process a batch of MAC commands
    ///
    /// Commands run in order. An unknown or truncated command stops the batch;
    /// answers queued before it are kept.
    pub fn process_commands(&mut self, commands: &[u8]) -> Result<(), MacError> {
        self.state = CommandState::ParsingOptions;
        let mut index = 0;

        let result = loop {
            if index >= commands.len() {
                break Ok(());
            }
            self.state = CommandState::Dispatching;

            let mut ctx = CommandContext {
                session: &mut self.session,
                plan: &self.plan,
                battery: self.battery,
                snr: self.last_snr,
                device_time: &mut self.device_time,
            };
            match commands::dispatch(&commands[index..], &mut ctx) {
                Ok((consumed, reply)) => {
                    index += consumed;
                    if let Some(reply) = reply {
                        self.queue(&reply);
                    }
                }
                Err(e) => {
                    warn!("MAC command batch aborted at byte {}: {}", index, e);
                    break Err(e);
                }
            }
        };

        self.state = CommandState::Done;
        self.persist();
        result
    }

    fn queue(&mut self, bytes: &[u8]) {
        if self.replies.extend_from_slice(bytes).is_err() {
            self.replies_overflowed = true;
        }
    }

    /// Ask the network for a link check in the next uplink
    pub fn request_link_check(&mut self) {
        self.queue(&[LINK_CHECK_REQ]);
    }

    /// Ask the network for the current time in the next uplink
    pub fn request_device_time(&mut self) {
        self.queue(&[DEVICE_TIME_REQ]);
    }

    /// Queued MAC commands for the next uplink
    ///
    /// The queue is emptied on every call. A queue that does not fit FOpts is
    /// dropped as a whole.
    pub fn take_fopts(&mut self) -> Vec<u8, MAX_FOPTS> {
        let overflowed = core::mem::take(&mut self.replies_overflowed);
        let fopts = Vec::from_slice(&self.replies);
        self.replies.clear();
        match (overflowed, fopts) {
            (false, Ok(fopts)) => fopts,
            _ => {
                warn!("MAC answers exceed FOpts, dropping them");
                Vec::new()
            }
        }
    }

    /// Counter for the next uplink; the stored counter moves past it
    pub fn next_fcnt_up(&mut self) -> u32 {
        let fcnt = self.session.fcnt_up;
        self.session.fcnt_up = fcnt.wrapping_add(1);
        self.persist();
        fcnt
    }

    /// Verify a downlink and accept its frame counter
    ///
    /// The 16 transmitted bits are extended with the upper half of the last
    /// accepted counter. If that would not move the counter forward, a
    /// rollover is accepted only when the MIC checks out under it. On success
    /// the full counter is stored and returned; on failure the session is
    /// unchanged.
    pub fn authenticate(&mut self, frame: &Frame) -> Result<u32, MacError> {
        if frame.dev_addr() != self.session.dev_addr {
            return Err(MacError::AddressMismatch);
        }
        let keys = self.session.keys().ok_or(MacError::MissingKeys)?;
        let low = frame.f_cnt() as u32;

        let fcnt = match self.session.fcnt_dn {
            None => {
                frame.verify(&keys, low)?;
                low
            }
            Some(last) => {
                let same = (last & 0xFFFF_0000) | low;
                if same > last {
                    frame.verify(&keys, same)?;
                    same
                } else {
                    let rolled = same.checked_add(0x1_0000).ok_or(MacError::FrameCounter)?;
                    if frame.verify(&keys, rolled).is_ok() {
                        rolled
                    } else if frame.verify(&keys, same).is_ok() {
                        return Err(MacError::FrameCounter);
                    } else {
                        return Err(MacError::InvalidMic);
                    }
                }
            }
        };

        self.session.fcnt_dn = Some(fcnt);
        self.persist();
        Ok(fcnt)
    }

    /// Take over a verified join accept
    pub fn apply_join(&mut self, accept: &JoinAccept, dev_nonce: u16) -> Result<(), MacError> {
        let app_key = self.session.app_key.ok_or(MacError::MissingKeys)?;
        let keys = accept.session_keys(&app_key, dev_nonce);

        let session = &mut self.session;
        session.dev_addr = accept.dev_addr;
        session.nwk_skey = Some(keys.nwk_skey);
        session.app_skey = Some(keys.app_skey);
        session.fcnt_up = 1;
        session.fcnt_dn = None;
        session.rx1_delay = accept.rx1_delay();
        session.rx2_delay = accept.rx1_delay() + 1;
        session.rx1_dr_offset = accept.dl_settings.rx1_dr_offset;
        if self.plan.data_rate(accept.dl_settings.rx2_data_rate).is_some() {
            session.rx2_data_rate = accept.dl_settings.rx2_data_rate;
        }
        session.rx1_frequency = None;
        let max_dr = self.plan.data_rates.len().saturating_sub(1) as u8;
        if let Some(cf_list) = accept.cf_list {
            for (slot, frequency) in cf_list.iter().enumerate() {
                let index = self.plan.default_channels as usize + slot;
                session.set_channel(index, *frequency, DrRange { min: 0, max: max_dr });
            }
        }
        self.replies.clear();
        self.replies_overflowed = false;

        info!("joined as {:02x?}", session.dev_addr.as_bytes());
        self.persist();
        Ok(())
    }

    /// Draw a DevNonce not used recently and remember it
    ///
    /// Gives up after [`DEV_NONCE_DRAWS`] draws and uses the last one.
    pub fn next_dev_nonce<G: RngCore>(&mut self, rng: &mut G) -> u16 {
        let mut nonce = rng.next_u32() as u16;
        let mut draws = 1;
        while self.session.nonce_used(nonce) {
            if draws >= DEV_NONCE_DRAWS {
                warn!("RNG keeps repeating DevNonce {}, reusing it", nonce);
                break;
            }
            debug!("DevNonce {} used recently, drawing again", nonce);
            nonce = rng.next_u32() as u16;
            draws += 1;
        }
        self.session.record_dev_nonce(nonce);
        self.persist();
        nonce
    }

    fn settings(&self, frequency: u32, data_rate: u8) -> RadioSettings {
        let (data_rate, modulation) = match self.plan.data_rate(data_rate) {
            Some(modulation) => (data_rate, modulation),
            None => {
                warn!("DR{} not in the frequency plan, using DR0", data_rate);
                (
                    0,
                    self.plan
                        .data_rate(0)
                        .unwrap_or(DataRate::new(12, Bandwidth::Khz125)),
                )
            }
        };
        RadioSettings {
            frequency,
            data_rate,
            modulation,
            tx_power: self
                .plan
                .tx_power_dbm(self.session.max_eirp, self.session.tx_power),
        }
    }

    /// Radio settings for a join request: one of the join channels at random
    pub fn join_settings<G: RngCore>(&mut self, rng: &mut G) -> Result<RadioSettings, MacError> {
        let channels = &self.session.join_frequencies;
        if channels.is_empty() {
            return Err(MacError::NoChannel);
        }
        let frequency = channels[rng.next_u32() as usize % channels.len()];
        self.channel = None;
        Ok(self.settings(frequency, self.session.data_rate))
    }

    /// Radio settings for a data uplink: one of the enabled channels at random
    pub fn uplink_settings<G: RngCore>(&mut self, rng: &mut G) -> Result<RadioSettings, MacError> {
        let count = self.session.enabled_channels().count();
        if count == 0 {
            return Err(MacError::NoChannel);
        }
        let pick = rng.next_u32() as usize % count;
        let channel = self
            .session
            .enabled_channels()
            .nth(pick)
            .ok_or(MacError::NoChannel)?;
        let frequency = self
            .session
            .uplink_frequency(channel)
            .ok_or(MacError::NoChannel)?;
        self.channel = Some(channel);
        Ok(self.settings(frequency, self.session.data_rate))
    }

    /// RX1 settings following an uplink sent with `tx`
    pub fn rx1_settings(&self, tx: &RadioSettings) -> RadioSettings {
        let frequency = self
            .session
            .rx1_frequency
            .or_else(|| {
                self.channel
                    .and_then(|c| self.session.rx1_frequencies.get(c).copied())
                    .filter(|f| *f != 0)
            })
            .unwrap_or(tx.frequency);
        let data_rate = self
            .plan
            .rx1_data_rate(tx.data_rate, self.session.rx1_dr_offset);
        self.settings(frequency, data_rate)
    }

    /// RX2 settings (also the Class C listening channel)
    pub fn rx2_settings(&self) -> RadioSettings {
        self.settings(self.session.rx2_frequency, self.session.rx2_data_rate)
    }

    /// Maximum duty cycle in percent for a frequency
    ///
    /// The lower of the sub-band limit and the network's aggregated limit.
    pub fn max_duty_cycle(&self, frequency: u32) -> f32 {
        let band = self.plan.duty_cycle(frequency);
        let aggregated = 100.0 / (1u32 << self.session.max_duty_cycle.min(15)) as f32;
        band.min(aggregated)
    }

    /// Maximum application payload for the current data rate
    pub fn max_payload(&self) -> usize {
        self.plan.max_payload(self.session.data_rate)
    }
}
