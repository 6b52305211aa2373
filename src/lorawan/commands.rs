//! MAC command handlers (LoRaWAN 1.0.4)
//!
//! Every downlink command has a fixed-size argument block. [`dispatch`]
//! decodes the command at the start of a slice, applies it to the session and
//! returns how many bytes it consumed together with the answer to queue, if
//! any.

use heapless::Vec;
use log::{debug, info, warn};

use super::join::decode_frequency;
use super::mac::MacError;
use super::region::FrequencyPlan;
use crate::config::session::{DrRange, Session, MAX_CHANNELS};

/// Longest answer a device produces (DevStatusAns)
pub const MAX_ANSWER_LEN: usize = 3;

/// Encoded answer command
pub type Answer = Vec<u8, MAX_ANSWER_LEN>;

/// Device-originated LinkCheckReq
pub const LINK_CHECK_REQ: u8 = 0x02;

/// Device-originated DeviceTimeReq
pub const DEVICE_TIME_REQ: u8 = 0x0D;

/// Max EIRP in dBm, indexed by the TxParamSetupReq MaxEIRP field
const MAX_EIRP_TABLE: [u8; 16] = [8, 10, 12, 13, 14, 16, 18, 20, 21, 24, 26, 27, 29, 30, 33, 36];

/// Downlink MAC command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandIdentifier {
    /// Answer to LinkCheckReq
    LinkCheckAns = 0x02,
    /// Data rate, power and channel mask
    LinkADRReq = 0x03,
    /// Aggregated duty cycle limit
    DutyCycleReq = 0x04,
    /// RX1 offset, RX2 data rate and frequency
    RXParamSetupReq = 0x05,
    /// Battery and margin query
    DevStatusReq = 0x06,
    /// Create, modify or remove a channel
    NewChannelReq = 0x07,
    /// RX1 delay
    RXTimingSetupReq = 0x08,
    /// Dwell time and max EIRP
    TxParamSetupReq = 0x09,
    /// RX1 frequency for a channel
    DlChannelReq = 0x0A,
    /// Answer to DeviceTimeReq
    DeviceTimeAns = 0x0D,
}

impl CommandIdentifier {
    /// Look up a command identifier
    pub fn from_cid(cid: u8) -> Option<Self> {
        Some(match cid {
            0x02 => CommandIdentifier::LinkCheckAns,
            0x03 => CommandIdentifier::LinkADRReq,
            0x04 => CommandIdentifier::DutyCycleReq,
            0x05 => CommandIdentifier::RXParamSetupReq,
            0x06 => CommandIdentifier::DevStatusReq,
            0x07 => CommandIdentifier::NewChannelReq,
            0x08 => CommandIdentifier::RXTimingSetupReq,
            0x09 => CommandIdentifier::TxParamSetupReq,
            0x0A => CommandIdentifier::DlChannelReq,
            0x0D => CommandIdentifier::DeviceTimeAns,
            _ => return None,
        })
    }

    /// Argument bytes following the identifier
    pub fn payload_len(self) -> usize {
        match self {
            CommandIdentifier::LinkCheckAns => 2,
            CommandIdentifier::LinkADRReq => 4,
            CommandIdentifier::DutyCycleReq => 1,
            CommandIdentifier::RXParamSetupReq => 4,
            CommandIdentifier::DevStatusReq => 0,
            CommandIdentifier::NewChannelReq => 5,
            CommandIdentifier::RXTimingSetupReq => 1,
            CommandIdentifier::TxParamSetupReq => 1,
            CommandIdentifier::DlChannelReq => 4,
            CommandIdentifier::DeviceTimeAns => 5,
        }
    }
}

/// Network time from DeviceTimeAns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceTime {
    /// Whole seconds since the GPS epoch
    pub seconds: u32,
    /// Fractional second in 1/256 s steps
    pub fraction: u8,
}

impl DeviceTime {
    /// Time since the GPS epoch
    pub fn as_duration(&self) -> core::time::Duration {
        core::time::Duration::from_secs(self.seconds as u64)
            + core::time::Duration::from_micros(self.fraction as u64 * 1_000_000 / 256)
    }
}

/// What a handler may read and change
pub struct CommandContext<'a> {
    /// Live session
    pub session: &'a mut Session,
    /// Regional limits used for validation
    pub plan: &'a FrequencyPlan,
    /// Battery level for DevStatusAns (0 external, 1..254 level, 255 unknown)
    pub battery: u8,
    /// SNR of the last received downlink in dB
    pub snr: i8,
    /// Where DeviceTimeAns is recorded
    pub device_time: &'a mut Option<DeviceTime>,
}

fn answer(bytes: &[u8]) -> Answer {
    // every answer is at most MAX_ANSWER_LEN bytes
    Vec::from_slice(bytes).unwrap_or_default()
}

fn status(bits: [bool; 3]) -> u8 {
    (bits[0] as u8) << 2 | (bits[1] as u8) << 1 | bits[2] as u8
}

/// Decode and apply the command at the start of `bytes`
///
/// Returns `(consumed, answer)` where `consumed` counts the identifier too.
pub fn dispatch(
    bytes: &[u8],
    ctx: &mut CommandContext<'_>,
) -> Result<(usize, Option<Answer>), MacError> {
    let cid = *bytes.first().ok_or(MacError::MalformedFrame)?;
    let command = CommandIdentifier::from_cid(cid).ok_or(MacError::UnknownCommand(cid))?;
    let len = command.payload_len();
    let args = bytes.get(1..1 + len).ok_or(MacError::MalformedFrame)?;

    debug!("MAC command {:?} {:02x?}", command, args);
    let reply = match command {
        CommandIdentifier::LinkCheckAns => link_check_ans(args, ctx),
        CommandIdentifier::LinkADRReq => Some(link_adr_req(args, ctx)),
        CommandIdentifier::DutyCycleReq => Some(duty_cycle_req(args, ctx)),
        CommandIdentifier::RXParamSetupReq => Some(rx_param_setup_req(args, ctx)),
        CommandIdentifier::DevStatusReq => Some(dev_status_req(ctx)),
        CommandIdentifier::NewChannelReq => Some(new_channel_req(args, ctx)),
        CommandIdentifier::RXTimingSetupReq => Some(rx_timing_setup_req(args, ctx)),
        CommandIdentifier::TxParamSetupReq => Some(tx_param_setup_req(args, ctx)),
        CommandIdentifier::DlChannelReq => Some(dl_channel_req(args, ctx)),
        CommandIdentifier::DeviceTimeAns => device_time_ans(args, ctx),
    };
    Ok((1 + len, reply))
}

fn link_check_ans(args: &[u8], ctx: &mut CommandContext<'_>) -> Option<Answer> {
    let (margin, gateways) = (args[0], args[1]);
    info!("link check: margin {} dB, {} gateway(s)", margin, gateways);
    ctx.session.record_link_check(margin, gateways);
    None
}

fn link_adr_req(args: &[u8], ctx: &mut CommandContext<'_>) -> Answer {
    let data_rate = (args[0] >> 4) & 0x0F;
    let tx_power = args[0] & 0x0F;
    let ch_mask = u16::from_le_bytes([args[1], args[2]]);
    let ch_mask_cntl = (args[3] >> 4) & 0x07;
    let nb_trans = args[3] & 0x0F;

    let defined = ctx.session.defined_mask();
    let mask = match ch_mask_cntl {
        0 => Some(ch_mask),
        6 => Some(defined),
        _ => None,
    };
    let mask_ack = matches!(mask, Some(m) if m != 0 && m & !defined == 0);
    // 0xF keeps the current value
    let dr_ack = data_rate == 0x0F || ctx.plan.data_rate(data_rate).is_some();
    let power_ack = tx_power == 0x0F || tx_power <= ctx.plan.max_tx_power_index;

    if let (true, true, true, Some(mask)) = (power_ack, dr_ack, mask_ack, mask) {
        let session = &mut *ctx.session;
        session.channel_mask = mask;
        if data_rate != 0x0F {
            session.data_rate = data_rate;
        }
        if tx_power != 0x0F {
            session.tx_power = tx_power;
        }
        if nb_trans != 0 {
            session.nb_trans = nb_trans;
        }
        info!(
            "LinkADRReq applied: DR{} power {} mask {:04x} nb_trans {}",
            session.data_rate, session.tx_power, mask, session.nb_trans
        );
    } else {
        warn!(
            "LinkADRReq rejected: power {} DR {} mask {}",
            power_ack, dr_ack, mask_ack
        );
    }

    answer(&[
        CommandIdentifier::LinkADRReq as u8,
        status([power_ack, dr_ack, mask_ack]),
    ])
}

fn duty_cycle_req(args: &[u8], ctx: &mut CommandContext<'_>) -> Answer {
    ctx.session.max_duty_cycle = args[0] & 0x0F;
    info!("aggregated duty cycle limit 1/{}", 1u32 << ctx.session.max_duty_cycle);
    answer(&[CommandIdentifier::DutyCycleReq as u8])
}

fn rx_param_setup_req(args: &[u8], ctx: &mut CommandContext<'_>) -> Answer {
    let rx1_dr_offset = (args[0] >> 4) & 0x07;
    let rx2_data_rate = args[0] & 0x0F;
    let frequency = decode_frequency(&args[1..4]);

    let offset_ack = (rx1_dr_offset as usize) < 6;
    let dr_ack = ctx.plan.data_rate(rx2_data_rate).is_some();
    let channel_ack = ctx.plan.in_band(frequency);

    if offset_ack && dr_ack && channel_ack {
        ctx.session.rx1_dr_offset = rx1_dr_offset;
        ctx.session.rx2_data_rate = rx2_data_rate;
        ctx.session.rx2_frequency = frequency;
        info!(
            "RXParamSetupReq applied: RX1 offset {} RX2 DR{} @ {} Hz",
            rx1_dr_offset, rx2_data_rate, frequency
        );
    } else {
        warn!("RXParamSetupReq rejected");
    }

    answer(&[
        CommandIdentifier::RXParamSetupReq as u8,
        status([offset_ack, dr_ack, channel_ack]),
    ])
}

fn dev_status_req(ctx: &mut CommandContext<'_>) -> Answer {
    // Margin is a 6-bit signed value
    let margin = (ctx.snr.clamp(-32, 31) as u8) & 0x3F;
    answer(&[CommandIdentifier::DevStatusReq as u8, ctx.battery, margin])
}

fn new_channel_req(args: &[u8], ctx: &mut CommandContext<'_>) -> Answer {
    let index = args[0] as usize;
    let frequency = decode_frequency(&args[1..4]);
    let range = DrRange {
        min: args[4] & 0x0F,
        max: (args[4] >> 4) & 0x0F,
    };

    let index_ok = index < MAX_CHANNELS && index >= ctx.plan.default_channels as usize;
    let freq_ack = index_ok && (frequency == 0 || ctx.plan.in_band(frequency));
    let dr_ack = index_ok
        && (frequency == 0
            || (range.min <= range.max && ctx.plan.data_rate(range.max).is_some()));

    if freq_ack && dr_ack {
        ctx.session.set_channel(index, frequency, range);
        info!("channel {} set to {} Hz", index, frequency);
    } else {
        warn!("NewChannelReq for channel {} rejected", index);
    }

    let mut status_byte = 0;
    if dr_ack {
        status_byte |= 0x02;
    }
    if freq_ack {
        status_byte |= 0x01;
    }
    answer(&[CommandIdentifier::NewChannelReq as u8, status_byte])
}

fn rx_timing_setup_req(args: &[u8], ctx: &mut CommandContext<'_>) -> Answer {
    let delay = (args[0] & 0x0F).max(1);
    ctx.session.rx1_delay = delay;
    ctx.session.rx2_delay = delay + 1;
    info!("RX1 delay {} s", delay);
    answer(&[CommandIdentifier::RXTimingSetupReq as u8])
}

fn tx_param_setup_req(args: &[u8], ctx: &mut CommandContext<'_>) -> Answer {
    ctx.session.downlink_dwell_time = args[0] & 0x20 != 0;
    ctx.session.uplink_dwell_time = args[0] & 0x10 != 0;
    ctx.session.max_eirp = MAX_EIRP_TABLE[(args[0] & 0x0F) as usize];
    answer(&[CommandIdentifier::TxParamSetupReq as u8])
}

fn dl_channel_req(args: &[u8], ctx: &mut CommandContext<'_>) -> Answer {
    let index = args[0] as usize;
    let frequency = decode_frequency(&args[1..4]);

    let freq_ack = ctx.plan.in_band(frequency);
    let uplink_exists = ctx.session.uplink_frequency(index).is_some();

    if freq_ack && uplink_exists {
        // A plan may list fewer RX1 than uplink frequencies; 0 falls back to
        // the uplink frequency.
        let rx1 = &mut ctx.session.rx1_frequencies;
        if rx1.len() <= index {
            let _ = rx1.resize(index + 1, 0);
        }
        if let Some(slot) = rx1.get_mut(index) {
            *slot = frequency;
        }
        ctx.session.rx1_frequency = Some(frequency);
        info!("RX1 fixed to {} Hz", frequency);
    } else {
        warn!("DlChannelReq for channel {} rejected", index);
    }

    let mut status_byte = 0;
    if uplink_exists {
        status_byte |= 0x02;
    }
    if freq_ack {
        status_byte |= 0x01;
    }
    answer(&[CommandIdentifier::DlChannelReq as u8, status_byte])
}

fn device_time_ans(args: &[u8], ctx: &mut CommandContext<'_>) -> Option<Answer> {
    let time = DeviceTime {
        seconds: u32::from_le_bytes([args[0], args[1], args[2], args[3]]),
        fraction: args[4],
    };
    info!("network time {} s + {}/256", time.seconds, time.fraction);
    *ctx.device_time = Some(time);
    None
}
