#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use std::vec::Vec;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use rand_core::RngCore;

use lorawan_node::{
    config::{device::AESKey, SessionStore},
    device::Clock,
    radio::traits::{Bandwidth, IrqFlags, Mode, PaConfig, Radio},
};

/// Mock radio error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockError {
    /// Generic error
    Error,
}

/// What the air delivers when a receive window opens
#[derive(Debug, Clone)]
pub enum Air {
    /// Nothing
    Silence,
    /// A good packet
    Packet(Vec<u8>),
    /// A packet with a failed CRC
    CrcError(Vec<u8>),
}

/// A receive window as the radio saw it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxWindowLog {
    pub frequency: u32,
    pub spreading_factor: u8,
    pub bandwidth: Bandwidth,
    pub invert_iq: bool,
}

/// Radio state shared between the test and the device under test
#[derive(Debug)]
pub struct RadioState {
    pub mode: Mode,
    pub frequency: u32,
    pub spreading_factor: u8,
    pub bandwidth: Bandwidth,
    pub sync_word: u8,
    pub pa: Option<PaConfig>,
    pub invert_iq: bool,
    pub flags: u8,
    pub fifo: Vec<u8>,
    pub rx: Vec<u8>,
    pub snr: i8,
    pub sent: Vec<Vec<u8>>,
    pub tx_invert_iq: Vec<bool>,
    pub tx_frequencies: Vec<u32>,
    pub windows: Vec<RxWindowLog>,
    pub air: VecDeque<Air>,
    pub tx_stuck: bool,
    pub resets: usize,
}

/// Mock radio for testing
#[derive(Clone)]
pub struct MockRadio {
    state: Rc<RefCell<RadioState>>,
}

impl MockRadio {
    /// Create new mock radio
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(RadioState {
                mode: Mode::Sleep,
                frequency: 0,
                spreading_factor: 7,
                bandwidth: Bandwidth::Khz125,
                sync_word: 0,
                pa: None,
                invert_iq: false,
                flags: 0,
                fifo: Vec::new(),
                rx: Vec::new(),
                snr: 7,
                sent: Vec::new(),
                tx_invert_iq: Vec::new(),
                tx_frequencies: Vec::new(),
                windows: Vec::new(),
                air: VecDeque::new(),
                tx_stuck: false,
                resets: 0,
            })),
        }
    }

    /// Queue what the next receive window will hear
    pub fn push_air(&self, air: Air) {
        self.state.borrow_mut().air.push_back(air);
    }

    /// Deliver a packet to a receiver that is already open
    pub fn inject(&self, packet: &[u8]) {
        let mut state = self.state.borrow_mut();
        state.rx = packet.to_vec();
        state.flags |= IrqFlags::RX_DONE.bits() | IrqFlags::VALID_HEADER.bits();
    }

    /// Never raise TX_DONE
    pub fn set_tx_stuck(&self, stuck: bool) {
        self.state.borrow_mut().tx_stuck = stuck;
    }

    /// SNR reported for received packets
    pub fn set_snr(&self, snr: i8) {
        self.state.borrow_mut().snr = snr;
    }

    /// Every packet transmitted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.borrow().sent.clone()
    }

    /// Last transmitted packet
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.state.borrow().sent.last().cloned()
    }

    /// Every receive window opened so far
    pub fn windows(&self) -> Vec<RxWindowLog> {
        self.state.borrow().windows.clone()
    }

    /// Inspect the full state
    pub fn state(&self) -> std::cell::Ref<'_, RadioState> {
        self.state.borrow()
    }
}

impl Radio for MockRadio {
    type Error = MockError;

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.state.borrow_mut().resets += 1;
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.mode = mode;
        match mode {
            Mode::Transmit => {
                let packet = state.fifo.clone();
                let invert_iq = state.invert_iq;
                let frequency = state.frequency;
                state.sent.push(packet);
                state.tx_invert_iq.push(invert_iq);
                state.tx_frequencies.push(frequency);
                if !state.tx_stuck {
                    state.flags |= IrqFlags::TX_DONE.bits();
                }
            }
            Mode::ReceiveContinuous | Mode::ReceiveSingle => {
                let window = RxWindowLog {
                    frequency: state.frequency,
                    spreading_factor: state.spreading_factor,
                    bandwidth: state.bandwidth,
                    invert_iq: state.invert_iq,
                };
                state.windows.push(window);
                let air = state.air.pop_front().unwrap_or(Air::Silence);
                match air {
                    Air::Silence => {}
                    Air::Packet(packet) => {
                        state.rx = packet;
                        state.flags |= IrqFlags::RX_DONE.bits() | IrqFlags::VALID_HEADER.bits();
                    }
                    Air::CrcError(packet) => {
                        state.rx = packet;
                        state.flags |= IrqFlags::RX_DONE.bits() | IrqFlags::CRC_ERROR.bits();
                    }
                }
            }
            Mode::Sleep | Mode::Standby => {}
        }
        Ok(())
    }

    fn set_frequency(&mut self, frequency: u32) -> Result<(), Self::Error> {
        self.state.borrow_mut().frequency = frequency;
        Ok(())
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), Self::Error> {
        self.state.borrow_mut().spreading_factor = sf;
        Ok(())
    }

    fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), Self::Error> {
        self.state.borrow_mut().bandwidth = bandwidth;
        Ok(())
    }

    fn set_sync_word(&mut self, sync_word: u8) -> Result<(), Self::Error> {
        self.state.borrow_mut().sync_word = sync_word;
        Ok(())
    }

    fn set_pa_config(&mut self, config: PaConfig) -> Result<(), Self::Error> {
        self.state.borrow_mut().pa = Some(config);
        Ok(())
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<usize, Self::Error> {
        self.state.borrow_mut().fifo = payload.to_vec();
        Ok(payload.len())
    }

    fn read_payload(&mut self, buffer: &mut [u8], strict: bool) -> Result<Option<usize>, Self::Error> {
        let state = self.state.borrow();
        let flags = IrqFlags::from_bits(state.flags);
        if !flags.rx_done() || (strict && flags.crc_error()) {
            return Ok(None);
        }
        let len = state.rx.len().min(buffer.len());
        buffer[..len].copy_from_slice(&state.rx[..len]);
        Ok(Some(len))
    }

    fn irq_flags(&mut self) -> Result<IrqFlags, Self::Error> {
        Ok(IrqFlags::from_bits(self.state.borrow().flags))
    }

    fn clear_irq_flags(&mut self, flags: IrqFlags) -> Result<(), Self::Error> {
        self.state.borrow_mut().flags &= !flags.bits();
        Ok(())
    }

    fn set_invert_iq(&mut self, invert: bool) -> Result<(), Self::Error> {
        self.state.borrow_mut().invert_iq = invert;
        Ok(())
    }

    fn packet_snr(&mut self) -> Result<i8, Self::Error> {
        Ok(self.state.borrow().snr)
    }
}

/// Clock that moves forward a fixed step on every reading
#[derive(Clone)]
pub struct MockClock {
    now: Rc<Cell<Duration>>,
    step: Duration,
}

impl MockClock {
    pub fn new(step: Duration) -> Self {
        Self {
            now: Rc::new(Cell::new(Duration::ZERO)),
            step,
        }
    }

    /// Current reading without advancing
    pub fn elapsed(&self) -> Duration {
        self.now.get()
    }
}

impl Clock for MockClock {
    fn now(&mut self) -> Duration {
        let now = self.now.get() + self.step;
        self.now.set(now);
        now
    }
}

/// Deterministic random numbers
pub struct TestRng(pub u32);

impl RngCore for TestRng {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.0
    }

    fn next_u64(&mut self) -> u64 {
        ((self.next_u32() as u64) << 32) | self.next_u32() as u64
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for b in dest {
            *b = self.next_u32() as u8;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Store whose every access fails
#[derive(Default)]
pub struct BrokenStore;

impl SessionStore for BrokenStore {
    type Error = MockError;

    fn load(&mut self) -> Result<Option<heapless::Vec<u8, 512>>, MockError> {
        Err(MockError::Error)
    }

    fn save(&mut self, _blob: &[u8]) -> Result<(), MockError> {
        Err(MockError::Error)
    }
}

/// AES-CMAC truncated to a MIC, computed outside the crate
pub fn cmac4(key: &[u8; 16], data: &[u8]) -> [u8; 4] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).unwrap();
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    [tag[0], tag[1], tag[2], tag[3]]
}

/// Network-side join accept
///
/// `app_nonce` and `net_id` are given most significant byte first and
/// `dev_addr` as a number. Returns the encrypted PHYPayload.
pub fn join_accept(
    app_key: &[u8; 16],
    app_nonce: [u8; 3],
    net_id: [u8; 3],
    dev_addr: u32,
    dl_settings: u8,
    rx_delay: u8,
    cf_list: Option<[u8; 16]>,
) -> Vec<u8> {
    let mut plain = vec![0x20];
    plain.extend(app_nonce.iter().rev());
    plain.extend(net_id.iter().rev());
    plain.extend_from_slice(&dev_addr.to_le_bytes());
    plain.push(dl_settings);
    plain.push(rx_delay);
    if let Some(cf_list) = cf_list {
        plain.extend_from_slice(&cf_list);
    }
    let mic = cmac4(app_key, &plain);
    plain.extend_from_slice(&mic);

    let cipher = Aes128::new(app_key.into());
    for block in plain[1..].chunks_exact_mut(16) {
        cipher.decrypt_block(block.into());
    }
    plain
}

/// Session key as derived on the network side
pub fn derive_key(app_key: &[u8; 16], prefix: u8, app_nonce: [u8; 3], net_id: [u8; 3], dev_nonce: u16) -> AESKey {
    let mut block = [0u8; 16];
    block[0] = prefix;
    for (i, b) in app_nonce.iter().rev().enumerate() {
        block[1 + i] = *b;
    }
    for (i, b) in net_id.iter().rev().enumerate() {
        block[4 + i] = *b;
    }
    block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
    let cipher = Aes128::new(app_key.into());
    cipher.encrypt_block((&mut block).into());
    AESKey::new(block)
}
