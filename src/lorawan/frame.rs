//! PHY payload codec
//!
//! ```text
//! MHDR(1) | DevAddr(4) | FCtrl(1) | FCnt(2) | FOpts(0..15) | [FPort(1) | FRMPayload] | MIC(4)
//! ```
//!
//! [`Frame`] owns a received data frame and exposes its header fields as
//! accessors; [`Frame::encode`] builds a secured frame from its parts.

use heapless::Vec;

use super::mac::MacError;
use crate::config::device::DevAddr;
use crate::crypto::{self, Direction, SessionKeys, MIC_SIZE};

/// Largest PHY payload the codec handles
pub const MAX_PHY_PAYLOAD: usize = 256;

/// Largest FRMPayload that fits a PHY payload together with the headers
pub const MAX_FRM_PAYLOAD: usize = MAX_PHY_PAYLOAD - 13;

/// FOptsLen is a 4-bit field
pub const MAX_FOPTS: usize = 15;

/// Shortest valid frame header: DevAddr, FCtrl, FCnt
pub const MIN_FHDR_LEN: usize = 7;

/// Shortest valid data frame: MHDR, frame header, MIC
pub const MIN_FRAME_LEN: usize = 1 + MIN_FHDR_LEN + MIC_SIZE;

/// LoRaWAN R1 major version in the low MHDR bits
pub const MAJOR_LORAWAN_R1: u8 = 0x00;

/// MAC header types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MType {
    /// Join request
    JoinRequest = 0x00,
    /// Join accept
    JoinAccept = 0x20,
    /// Unconfirmed data uplink
    UnconfirmedDataUp = 0x40,
    /// Unconfirmed data downlink
    UnconfirmedDataDown = 0x60,
    /// Confirmed data uplink
    ConfirmedDataUp = 0x80,
    /// Confirmed data downlink
    ConfirmedDataDown = 0xA0,
    /// Rejoin request (LoRaWAN 1.1, not used by this device)
    RejoinRequest = 0xC0,
    /// Proprietary
    Proprietary = 0xE0,
}

impl MType {
    /// Message type from the top three bits of an MHDR
    pub fn from_mhdr(mhdr: u8) -> Self {
        match mhdr & 0xE0 {
            0x00 => MType::JoinRequest,
            0x20 => MType::JoinAccept,
            0x40 => MType::UnconfirmedDataUp,
            0x60 => MType::UnconfirmedDataDown,
            0x80 => MType::ConfirmedDataUp,
            0xA0 => MType::ConfirmedDataDown,
            0xC0 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    /// MHDR byte for this message type
    pub fn mhdr(self) -> u8 {
        self as u8 | MAJOR_LORAWAN_R1
    }

    /// Direction of a data message, `None` for everything else
    pub fn data_direction(self) -> Option<Direction> {
        match self {
            MType::UnconfirmedDataUp | MType::ConfirmedDataUp => Some(Direction::Up),
            MType::UnconfirmedDataDown | MType::ConfirmedDataDown => Some(Direction::Down),
            _ => None,
        }
    }
}

/// Frame header flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FCtrl {
    /// Adaptive data rate enabled
    pub adr: bool,
    /// ADR acknowledgement request (uplink only)
    pub adr_ack_req: bool,
    /// Acknowledges the last confirmed frame
    pub ack: bool,
    /// Downlink: more data pending
    pub f_pending: bool,
    /// Number of FOpts bytes
    pub f_opts_len: u8,
}

impl FCtrl {
    /// Encode to the wire byte
    pub fn to_byte(&self) -> u8 {
        let mut byte = self.f_opts_len & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    /// Decode from the wire byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            adr_ack_req: (byte & 0x40) != 0,
            ack: (byte & 0x20) != 0,
            f_pending: (byte & 0x10) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FHDR {
    /// Device address
    pub dev_addr: DevAddr,
    /// Control flags; `f_opts_len` is recomputed on encode
    pub f_ctrl: FCtrl,
    /// Low 16 bits of the frame counter
    pub f_cnt: u16,
    /// Piggybacked MAC commands
    pub f_opts: Vec<u8, MAX_FOPTS>,
}

impl FHDR {
    /// Frame header for the given counter with no options
    pub fn new(dev_addr: DevAddr, f_cnt: u32) -> Self {
        Self {
            dev_addr,
            f_ctrl: FCtrl::default(),
            f_cnt: f_cnt as u16,
            f_opts: Vec::new(),
        }
    }

    fn serialize_into<const N: usize>(&self, buffer: &mut Vec<u8, N>) -> Result<(), MacError> {
        let f_ctrl = FCtrl {
            f_opts_len: self.f_opts.len() as u8,
            ..self.f_ctrl
        };
        buffer
            .extend_from_slice(&self.dev_addr.to_wire())
            .map_err(|_| MacError::BufferTooSmall)?;
        buffer
            .push(f_ctrl.to_byte())
            .map_err(|_| MacError::BufferTooSmall)?;
        buffer
            .extend_from_slice(&self.f_cnt.to_le_bytes())
            .map_err(|_| MacError::BufferTooSmall)?;
        buffer
            .extend_from_slice(&self.f_opts)
            .map_err(|_| MacError::BufferTooSmall)
    }
}

/// A received data frame
///
/// Holds the raw bytes so the MIC can be recomputed over exactly what came
/// off the air, plus the parsed header.
#[derive(Debug, Clone)]
pub struct Frame {
    raw: Vec<u8, MAX_PHY_PAYLOAD>,
    fhdr: FHDR,
    f_port: Option<u8>,
    payload_start: usize,
}

impl Frame {
    /// Parse a data frame
    ///
    /// Only structure is checked here; call [`Frame::verify`] before trusting
    /// any field.
    pub fn parse(bytes: &[u8]) -> Result<Self, MacError> {
        if bytes.len() < MIN_FRAME_LEN || bytes.len() > MAX_PHY_PAYLOAD {
            return Err(MacError::MalformedFrame);
        }
        if MType::from_mhdr(bytes[0]).data_direction().is_none() {
            return Err(MacError::MalformedFrame);
        }

        let mic_start = bytes.len() - MIC_SIZE;
        let dev_addr = DevAddr::from_wire([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let f_ctrl = FCtrl::from_byte(bytes[5]);
        let f_cnt = u16::from_le_bytes([bytes[6], bytes[7]]);

        let opts_end = 8 + f_ctrl.f_opts_len as usize;
        if opts_end > mic_start {
            return Err(MacError::MalformedFrame);
        }
        let f_opts = Vec::from_slice(&bytes[8..opts_end]).map_err(|_| MacError::MalformedFrame)?;

        let (f_port, payload_start) = if opts_end < mic_start {
            (Some(bytes[opts_end]), opts_end + 1)
        } else {
            (None, mic_start)
        };

        Ok(Self {
            raw: Vec::from_slice(bytes).map_err(|_| MacError::MalformedFrame)?,
            fhdr: FHDR {
                dev_addr,
                f_ctrl,
                f_cnt,
                f_opts,
            },
            f_port,
            payload_start,
        })
    }

    /// Build a secured data frame
    ///
    /// `payload` is the plaintext FRMPayload; it is encrypted under the key
    /// selected by `f_port` and the MIC is appended. `f_cnt` is the full
    /// 32-bit counter; only its low 16 bits are transmitted.
    pub fn encode(
        mtype: MType,
        fhdr: &FHDR,
        f_port: Option<u8>,
        payload: &[u8],
        keys: &SessionKeys,
        f_cnt: u32,
    ) -> Result<Vec<u8, MAX_PHY_PAYLOAD>, MacError> {
        let dir = mtype.data_direction().ok_or(MacError::MalformedFrame)?;
        if f_port.is_none() && !payload.is_empty() {
            return Err(MacError::MalformedFrame);
        }

        let mut buffer: Vec<u8, MAX_PHY_PAYLOAD> = Vec::new();
        buffer
            .push(mtype.mhdr())
            .map_err(|_| MacError::BufferTooSmall)?;
        fhdr.serialize_into(&mut buffer)?;

        if let Some(port) = f_port {
            buffer.push(port).map_err(|_| MacError::BufferTooSmall)?;
            let start = buffer.len();
            buffer
                .extend_from_slice(payload)
                .map_err(|_| MacError::BufferTooSmall)?;
            crypto::encrypt_payload(
                keys.payload_key(port),
                fhdr.dev_addr,
                f_cnt,
                dir,
                &mut buffer[start..],
            );
        }

        let mic = crypto::compute_mic(&keys.nwk_skey, &buffer, fhdr.dev_addr, f_cnt, dir);
        buffer
            .extend_from_slice(&mic)
            .map_err(|_| MacError::BufferTooSmall)?;
        Ok(buffer)
    }

    /// Message type
    pub fn mtype(&self) -> MType {
        MType::from_mhdr(self.raw[0])
    }

    /// Frame header
    pub fn fhdr(&self) -> &FHDR {
        &self.fhdr
    }

    /// Device address
    pub fn dev_addr(&self) -> DevAddr {
        self.fhdr.dev_addr
    }

    /// Frame control flags
    pub fn f_ctrl(&self) -> FCtrl {
        self.fhdr.f_ctrl
    }

    /// Low 16 bits of the frame counter as transmitted
    pub fn f_cnt(&self) -> u16 {
        self.fhdr.f_cnt
    }

    /// MAC commands carried in the header
    pub fn f_opts(&self) -> &[u8] {
        &self.fhdr.f_opts
    }

    /// Port, absent on frames without payload
    pub fn f_port(&self) -> Option<u8> {
        self.f_port
    }

    /// Encrypted FRMPayload
    pub fn frm_payload(&self) -> &[u8] {
        &self.raw[self.payload_start..self.raw.len() - MIC_SIZE]
    }

    /// Received MIC
    pub fn mic(&self) -> &[u8] {
        &self.raw[self.raw.len() - MIC_SIZE..]
    }

    fn direction(&self) -> Direction {
        self.mtype().data_direction().unwrap_or(Direction::Down)
    }

    /// Check the MIC against the network session key and the full counter
    pub fn verify(&self, keys: &SessionKeys, f_cnt: u32) -> Result<(), MacError> {
        let signed = &self.raw[..self.raw.len() - MIC_SIZE];
        if crypto::verify_mic(
            &keys.nwk_skey,
            signed,
            self.mic(),
            self.fhdr.dev_addr,
            f_cnt,
            self.direction(),
        ) {
            Ok(())
        } else {
            Err(MacError::InvalidMic)
        }
    }

    /// Decrypt the FRMPayload
    pub fn decrypt(&self, keys: &SessionKeys, f_cnt: u32) -> Vec<u8, MAX_FRM_PAYLOAD> {
        let mut out: Vec<u8, MAX_FRM_PAYLOAD> = Vec::new();
        let Some(port) = self.f_port else {
            return out;
        };
        // parse() bounds the payload below MAX_FRM_PAYLOAD
        let _ = out.extend_from_slice(self.frm_payload());
        crypto::encrypt_payload(
            keys.payload_key(port),
            self.fhdr.dev_addr,
            f_cnt,
            self.direction(),
            &mut out,
        );
        out
    }
}
