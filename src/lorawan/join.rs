//! Over-the-air activation messages
//!
//! - [`JoinRequest`] encoding with its MIC
//! - [`JoinAccept`] decryption, verification and session key derivation

use heapless::Vec;

use super::frame::MType;
use super::mac::MacError;
use crate::config::device::{AESKey, DevAddr, EUI64};
use crate::crypto::{self, SessionKeys, BLOCK_SIZE, MIC_SIZE};

/// Encoded join request length
pub const JOIN_REQUEST_LEN: usize = 23;

/// Join accept length without CFList
pub const JOIN_ACCEPT_LEN: usize = 1 + BLOCK_SIZE;

/// Join accept length with CFList
pub const JOIN_ACCEPT_CFLIST_LEN: usize = 1 + 2 * BLOCK_SIZE;

/// Extra channels a type 0 CFList can announce
pub const CFLIST_CHANNELS: usize = 5;

fn reversed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    for (dst, src) in out.iter_mut().zip(bytes.iter().rev()) {
        *dst = *src;
    }
    out
}

/// Frequency encoded as 3 bytes little-endian in units of 100 Hz
pub fn decode_frequency(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) * 100
}

/// Join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequest {
    /// Application (join) EUI, most significant byte first
    pub app_eui: EUI64,
    /// Device EUI, most significant byte first
    pub dev_eui: EUI64,
    /// Device nonce
    pub dev_nonce: u16,
}

impl JoinRequest {
    /// Encode and sign with the application key
    pub fn encode(&self, app_key: &AESKey) -> [u8; JOIN_REQUEST_LEN] {
        let mut buffer = [0u8; JOIN_REQUEST_LEN];
        buffer[0] = MType::JoinRequest.mhdr();
        buffer[1..9].copy_from_slice(&reversed::<8>(&self.app_eui));
        buffer[9..17].copy_from_slice(&reversed::<8>(&self.dev_eui));
        buffer[17..19].copy_from_slice(&self.dev_nonce.to_le_bytes());
        let mic = crypto::compute_join_mic(app_key, &buffer[..19]);
        buffer[19..].copy_from_slice(&mic);
        buffer
    }
}

/// Downlink settings carried by a join accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DlSettings {
    /// RX1 data rate offset
    pub rx1_dr_offset: u8,
    /// RX2 data rate index
    pub rx2_data_rate: u8,
}

impl DlSettings {
    /// Decode the DLSettings byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            rx1_dr_offset: (byte >> 4) & 0x07,
            rx2_data_rate: byte & 0x0F,
        }
    }
}

/// Decrypted and verified join accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccept {
    /// Network-chosen nonce, most significant byte first
    pub app_nonce: [u8; 3],
    /// Network identifier, most significant byte first
    pub net_id: [u8; 3],
    /// Assigned device address
    pub dev_addr: DevAddr,
    /// RX1 offset and RX2 data rate
    pub dl_settings: DlSettings,
    /// Raw RxDelay field (0 means 1 second)
    pub rx_delay: u8,
    /// Type 0 CFList, one frequency per channel slot (0 disables the slot)
    pub cf_list: Option<[u32; CFLIST_CHANNELS]>,
}

impl JoinAccept {
    /// Decrypt and verify a received join accept
    ///
    /// `bytes` is the full PHY payload starting with the MHDR.
    pub fn decrypt(bytes: &[u8], app_key: &AESKey) -> Result<Self, MacError> {
        if bytes.len() != JOIN_ACCEPT_LEN && bytes.len() != JOIN_ACCEPT_CFLIST_LEN {
            return Err(MacError::MalformedFrame);
        }
        if MType::from_mhdr(bytes[0]) != MType::JoinAccept {
            return Err(MacError::MalformedFrame);
        }

        let mut clear: Vec<u8, JOIN_ACCEPT_CFLIST_LEN> =
            Vec::from_slice(bytes).map_err(|_| MacError::MalformedFrame)?;
        crypto::decrypt_join_accept(app_key, &mut clear[1..]);

        let mic_start = clear.len() - MIC_SIZE;
        if !crypto::verify_join_mic(app_key, &clear[..mic_start], &clear[mic_start..]) {
            return Err(MacError::InvalidMic);
        }

        let body = &clear[1..mic_start];
        let cf_list = if body.len() == 12 + BLOCK_SIZE && body[12 + 15] == 0 {
            let mut slots = [0u32; CFLIST_CHANNELS];
            for (slot, chunk) in slots.iter_mut().zip(body[12..].chunks_exact(3)) {
                *slot = decode_frequency(chunk);
            }
            Some(slots)
        } else {
            None
        };

        Ok(Self {
            app_nonce: reversed(&body[0..3]),
            net_id: reversed(&body[3..6]),
            dev_addr: DevAddr::from_wire([body[6], body[7], body[8], body[9]]),
            dl_settings: DlSettings::from_byte(body[10]),
            rx_delay: body[11] & 0x0F,
            cf_list,
        })
    }

    /// RX1 delay in seconds
    pub fn rx1_delay(&self) -> u8 {
        self.rx_delay.max(1)
    }

    /// Derive the session keys for the nonce used in the matching join request
    pub fn session_keys(&self, app_key: &AESKey, dev_nonce: u16) -> SessionKeys {
        let (nwk_skey, app_skey) = crypto::derive_session_keys(
            app_key,
            &reversed(&self.app_nonce),
            &reversed(&self.net_id),
            dev_nonce,
        );
        SessionKeys { nwk_skey, app_skey }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::{BlockDecrypt, KeyInit};
    use aes::Aes128;

    const APP_KEY: AESKey = AESKey::new([
        0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F,
        0x3C,
    ]);

    /// What a network server sends: MIC over the clear message, then AES decrypt
    fn server_join_accept(clear_body: &[u8]) -> Vec<u8, JOIN_ACCEPT_CFLIST_LEN> {
        let mut msg: Vec<u8, JOIN_ACCEPT_CFLIST_LEN> = Vec::new();
        msg.push(0x20).unwrap();
        msg.extend_from_slice(clear_body).unwrap();
        let mic = crypto::compute_join_mic(&APP_KEY, &msg);
        msg.extend_from_slice(&mic).unwrap();

        let cipher = Aes128::new(APP_KEY.as_bytes().into());
        for chunk in msg[1..].chunks_exact_mut(16) {
            cipher.decrypt_block(chunk.into());
        }
        msg
    }

    #[test]
    fn join_request_layout() {
        let req = JoinRequest {
            app_eui: [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01],
            dev_eui: [0x00, 0x04, 0xA3, 0x0B, 0x00, 0x1C, 0x05, 0x30],
            dev_nonce: 0x1234,
        };
        let bytes = req.encode(&APP_KEY);
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[8], 0x70);
        assert_eq!(bytes[9], 0x30);
        assert_eq!(&bytes[17..19], &[0x34, 0x12]);
        assert_eq!(&bytes[19..], &crypto::compute_join_mic(&APP_KEY, &bytes[..19]));
    }

    #[test]
    fn join_accept_without_cflist() {
        // AppNonce, NetID, DevAddr 0x26011234, DLSettings, RxDelay
        let body = [
            0x01, 0x02, 0x03, 0x13, 0x00, 0x00, 0x34, 0x12, 0x01, 0x26, 0x32, 0x00,
        ];
        let wire = server_join_accept(&body);
        let accept = JoinAccept::decrypt(&wire, &APP_KEY).unwrap();

        assert_eq!(accept.app_nonce, [0x03, 0x02, 0x01]);
        assert_eq!(accept.net_id, [0x00, 0x00, 0x13]);
        assert_eq!(accept.dev_addr, DevAddr::from(0x2601_1234));
        assert_eq!(accept.dl_settings.rx1_dr_offset, 3);
        assert_eq!(accept.dl_settings.rx2_data_rate, 2);
        assert_eq!(accept.rx1_delay(), 1);
        assert_eq!(accept.cf_list, None);

        let keys = accept.session_keys(&APP_KEY, 0xBEEF);
        let (nwk, app) = crypto::derive_session_keys(&APP_KEY, &[1, 2, 3], &[0x13, 0, 0], 0xBEEF);
        assert_eq!(keys.nwk_skey, nwk);
        assert_eq!(keys.app_skey, app);
    }

    #[test]
    fn join_accept_with_cflist() {
        let mut body = [0u8; 28];
        body[6..10].copy_from_slice(&[4, 3, 2, 1]);
        body[11] = 5;
        // 867.1 MHz and 867.3 MHz, then three empty slots, type 0
        body[12..15].copy_from_slice(&(8_671_000u32.to_le_bytes()[..3]));
        body[15..18].copy_from_slice(&(8_673_000u32.to_le_bytes()[..3]));
        let wire = server_join_accept(&body);

        let accept = JoinAccept::decrypt(&wire, &APP_KEY).unwrap();
        assert_eq!(accept.dev_addr, DevAddr::from(0x0102_0304));
        assert_eq!(accept.rx1_delay(), 5);
        assert_eq!(
            accept.cf_list,
            Some([867_100_000, 867_300_000, 0, 0, 0])
        );
    }

    #[test]
    fn cflist_keeps_slot_positions() {
        let mut body = [0u8; 28];
        // slot 0 empty, slot 1 at 867.3 MHz
        body[15..18].copy_from_slice(&(8_673_000u32.to_le_bytes()[..3]));
        let wire = server_join_accept(&body);

        let accept = JoinAccept::decrypt(&wire, &APP_KEY).unwrap();
        assert_eq!(accept.cf_list, Some([0, 867_300_000, 0, 0, 0]));
    }

    #[test]
    fn join_accept_rejects_tampering_and_bad_length() {
        let body = [0u8; 12];
        let mut wire = server_join_accept(&body);
        wire[5] ^= 0x01;
        assert_eq!(JoinAccept::decrypt(&wire, &APP_KEY), Err(MacError::InvalidMic));
        assert_eq!(
            JoinAccept::decrypt(&wire[..12], &APP_KEY),
            Err(MacError::MalformedFrame)
        );
    }
}
