//! Session persistence
//!
//! The session is kept as `len(2, big-endian) | body`, with the body a bincode
//! encoding of [`Session`]. A length of `0x0000` or `0xFFFF` (erased flash)
//! means nothing was ever written.

use core::fmt;

use heapless::Vec;

use super::session::Session;

/// Largest blob a store must be able to hold
pub const MAX_SESSION_BLOB: usize = 512;

const HEADER_LEN: usize = 2;

/// Byte storage for the persisted session
///
/// Each `save` is assumed atomic.
pub trait SessionStore {
    /// Error type of the backing storage
    type Error: fmt::Debug;

    /// Read the stored blob, `None` if the store is empty
    fn load(&mut self) -> Result<Option<Vec<u8, MAX_SESSION_BLOB>>, Self::Error>;

    /// Replace the stored blob
    fn save(&mut self, blob: &[u8]) -> Result<(), Self::Error>;
}

/// Session blob encoding errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Session does not fit the blob
    Encode,
    /// Blob body is not a valid session
    Decode,
    /// Length header points past the end of the blob
    Truncated,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Encode => f.write_str("session does not fit the store"),
            StoreError::Decode => f.write_str("stored session is corrupt"),
            StoreError::Truncated => f.write_str("stored session is truncated"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StoreError {}

/// Serialize a session into a length-prefixed blob
pub fn encode_session(session: &Session) -> Result<Vec<u8, MAX_SESSION_BLOB>, StoreError> {
    let mut buffer = [0u8; MAX_SESSION_BLOB];
    let len = bincode::serde::encode_into_slice(
        session,
        &mut buffer[HEADER_LEN..],
        bincode::config::standard(),
    )
    .map_err(|_| StoreError::Encode)?;
    if len >= 0xFFFF {
        return Err(StoreError::Encode);
    }
    buffer[..HEADER_LEN].copy_from_slice(&(len as u16).to_be_bytes());
    Vec::from_slice(&buffer[..HEADER_LEN + len]).map_err(|_| StoreError::Encode)
}

/// Deserialize a length-prefixed blob, `Ok(None)` for an empty store
pub fn decode_session(blob: &[u8]) -> Result<Option<Session>, StoreError> {
    if blob.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u16::from_be_bytes([blob[0], blob[1]]);
    if len == 0 || len == 0xFFFF {
        return Ok(None);
    }
    let body = blob
        .get(HEADER_LEN..HEADER_LEN + len as usize)
        .ok_or(StoreError::Truncated)?;
    let (session, _) = bincode::serde::decode_from_slice(body, bincode::config::standard())
        .map_err(|_| StoreError::Decode)?;
    Ok(Some(session))
}

/// Session store kept in RAM
///
/// Useful on hosts and for devices that rejoin after every power cycle.
#[derive(Debug, Default, Clone)]
pub struct RamStore {
    blob: Option<Vec<u8, MAX_SESSION_BLOB>>,
    writes: usize,
}

impl RamStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Drop the stored blob
    pub fn wipe(&mut self) {
        self.blob = None;
    }
}

impl SessionStore for RamStore {
    type Error = StoreError;

    fn load(&mut self) -> Result<Option<Vec<u8, MAX_SESSION_BLOB>>, Self::Error> {
        Ok(self.blob.clone())
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), Self::Error> {
        self.blob = Some(Vec::from_slice(blob).map_err(|_| StoreError::Encode)?);
        self.writes += 1;
        Ok(())
    }
}
