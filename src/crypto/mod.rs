//! LoRaWAN cryptographic operations
//!
//! This module provides the block-cipher building blocks of LoRaWAN 1.0.x security:
//! - Message Integrity Code (MIC) computation and verification for data frames
//! - Payload encryption/decryption (AES-128 keystream)
//! - Join request / join accept MIC and join accept decryption
//! - Session key derivation

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::config::device::{AESKey, DevAddr};

/// MIC size in bytes
pub const MIC_SIZE: usize = 4;

/// Block size for AES-128
pub const BLOCK_SIZE: usize = 16;

/// Direction identifiers for cryptographic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Uplink (device to network)
    Up = 0,
    /// Downlink (network to device)
    Down = 1,
}

/// Session keys established by a join or provisioned for ABP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
    /// Network session key (MIC, port 0 payloads)
    pub nwk_skey: AESKey,
    /// Application session key (application payloads)
    pub app_skey: AESKey,
}

impl SessionKeys {
    /// Key protecting the FRMPayload on the given port
    pub fn payload_key(&self, f_port: u8) -> &AESKey {
        if f_port == 0 {
            &self.nwk_skey
        } else {
            &self.app_skey
        }
    }
}

/// Encrypt a single block in place with AES-128 (ECB)
pub fn aes_encrypt(key: &AESKey, block: &mut [u8; BLOCK_SIZE]) {
    let cipher = Aes128::new(key.as_bytes().into());
    cipher.encrypt_block(block.into());
}

fn cmac_over(key: &AESKey, parts: &[&[u8]]) -> Cmac<Aes128> {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(key.as_bytes().into());
    for part in parts {
        mac.update(part);
    }
    mac
}

fn truncate(mac: Cmac<Aes128>) -> [u8; MIC_SIZE] {
    let full = mac.finalize().into_bytes();
    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(&full[..MIC_SIZE]);
    mic
}

/// Build the B0 block that prefixes the CMAC input of a data frame
fn b0_block(dev_addr: DevAddr, fcnt: u32, dir: Direction, len: usize) -> [u8; BLOCK_SIZE] {
    let mut b0 = [0u8; BLOCK_SIZE];
    b0[0] = 0x49;
    b0[5] = dir as u8;
    b0[6..10].copy_from_slice(&dev_addr.to_wire());
    b0[10..14].copy_from_slice(&fcnt.to_le_bytes());
    b0[15] = len as u8;
    b0
}

/// Compute Message Integrity Code (MIC) for a LoRaWAN data frame
///
/// # Arguments
/// * `key` - Network session key
/// * `data` - `MHDR | MACPayload` (everything but the MIC)
/// * `dev_addr` - Device address
/// * `fcnt` - Full 32-bit frame counter
/// * `dir` - Message direction
pub fn compute_mic(
    key: &AESKey,
    data: &[u8],
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
) -> [u8; MIC_SIZE] {
    let b0 = b0_block(dev_addr, fcnt, dir, data.len());
    truncate(cmac_over(key, &[&b0, data]))
}

/// Check a data frame MIC without short-circuiting on the first differing byte
pub fn verify_mic(
    key: &AESKey,
    data: &[u8],
    mic: &[u8],
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
) -> bool {
    let b0 = b0_block(dev_addr, fcnt, dir, data.len());
    cmac_over(key, &[&b0, data])
        .verify_truncated_left(mic)
        .is_ok()
}

/// Encrypt or decrypt a FRMPayload in place
///
/// The keystream block `i` (counted from 1) is
/// `0x01 | 0x00×4 | dir | DevAddr | FCnt | 0x00 | i` encrypted under `key`.
/// XOR with the keystream is its own inverse, so the same call decrypts.
pub fn encrypt_payload(
    key: &AESKey,
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
    payload: &mut [u8],
) {
    let cipher = Aes128::new(key.as_bytes().into());

    for (i, chunk) in payload.chunks_mut(BLOCK_SIZE).enumerate() {
        let mut s = [0u8; BLOCK_SIZE];
        s[0] = 0x01;
        s[5] = dir as u8;
        s[6..10].copy_from_slice(&dev_addr.to_wire());
        s[10..14].copy_from_slice(&fcnt.to_le_bytes());
        s[15] = (i + 1) as u8;
        cipher.encrypt_block((&mut s).into());

        for (b, k) in chunk.iter_mut().zip(s.iter()) {
            *b ^= k;
        }
    }
}

/// MIC of a join request or a (decrypted) join accept
///
/// Both are a plain CMAC under the application key over the message minus its MIC.
pub fn compute_join_mic(key: &AESKey, data: &[u8]) -> [u8; MIC_SIZE] {
    truncate(cmac_over(key, &[data]))
}

/// Check a join accept MIC
pub fn verify_join_mic(key: &AESKey, data: &[u8], mic: &[u8]) -> bool {
    cmac_over(key, &[data]).verify_truncated_left(mic).is_ok()
}

/// Decrypt a join accept body (everything after the MHDR, MIC included) in place
///
/// The network encrypts with AES decrypt, so the device recovers the plaintext
/// by running AES encrypt over each block. `data` must be a whole number of
/// blocks; a trailing partial block is left untouched.
pub fn decrypt_join_accept(key: &AESKey, data: &mut [u8]) {
    let cipher = Aes128::new(key.as_bytes().into());
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(chunk.into());
    }
}

/// Derive network and application session keys from join accept
///
/// # Arguments
/// * `app_key` - Application key
/// * `app_nonce` - Application nonce, wire (little-endian) order
/// * `net_id` - Network ID, wire (little-endian) order
/// * `dev_nonce` - Device nonce from join request
pub fn derive_session_keys(
    app_key: &AESKey,
    app_nonce: &[u8; 3],
    net_id: &[u8; 3],
    dev_nonce: u16,
) -> (AESKey, AESKey) {
    let derive = |prefix: u8| {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = prefix;
        block[1..4].copy_from_slice(app_nonce);
        block[4..7].copy_from_slice(net_id);
        block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
        aes_encrypt(app_key, &mut block);
        AESKey::new(block)
    };

    (derive(0x01), derive(0x02))
}
