//! High-level LoRaWAN device interface
//!
//! [`Device`] ties the MAC layer, the scheduler and the application together:
//! it builds join requests and uplinks, runs the receive windows and routes
//! whatever comes back. Downlink problems (bad MIC, replays, garbage) are
//! logged and dropped here; they never reach the caller as errors.

/// Duty cycle and fair-use accounting
pub mod airtime;

use core::fmt;
use core::time::Duration;

use log::{debug, info, warn};
use rand_core::RngCore;

use crate::{
    class::{Downlink, OperatingMode, Scheduler, WindowTiming},
    config::{device::DeviceConfig, session::LinkCheck, Session, SessionStore},
    lorawan::{
        commands::DeviceTime,
        frame::{Frame, MType, FHDR, MIN_FRAME_LEN},
        join::{JoinAccept, JoinRequest},
        mac::{MacError, MacLayer},
        phy::{PhyError, PhyLayer, TimingParams},
        region::FrequencyPlan,
    },
    radio::traits::Radio,
};

pub use crate::lorawan::phy::Clock;

/// Highest application port
pub const MAX_APP_PORT: u8 = 223;

/// LoRaWAN device error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError<E> {
    /// Radio driver error
    Radio(E),
    /// MAC layer error
    Mac(MacError),
    /// The radio never reported transmit completion
    TxTimeout,
    /// No session yet, join first
    NotRegistered,
    /// No join accept received
    JoinFailed,
    /// Port outside 1..=223
    InvalidPort(u8),
    /// Payload exceeds the maximum for the current data rate
    PayloadTooLarge,
    /// Invalid configuration
    InvalidConfig,
}

impl<E> From<MacError> for DeviceError<E> {
    fn from(error: MacError) -> Self {
        DeviceError::Mac(error)
    }
}

impl<E> From<PhyError<E>> for DeviceError<E> {
    fn from(error: PhyError<E>) -> Self {
        match error {
            PhyError::Radio(e) => DeviceError::Radio(e),
            PhyError::TxTimeout => DeviceError::TxTimeout,
        }
    }
}

impl<E: fmt::Debug> fmt::Display for DeviceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Radio(e) => write!(f, "radio error: {:?}", e),
            DeviceError::Mac(e) => write!(f, "{}", e),
            DeviceError::TxTimeout => f.write_str("transmission timed out"),
            DeviceError::NotRegistered => f.write_str("device has not joined"),
            DeviceError::JoinFailed => f.write_str("join failed"),
            DeviceError::InvalidPort(port) => write!(f, "invalid port {}", port),
            DeviceError::PayloadTooLarge => f.write_str("payload too large for data rate"),
            DeviceError::InvalidConfig => f.write_str("invalid configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for DeviceError<E> {}

/// Receives application payloads from verified downlinks
///
/// Called synchronously inside the receive path; keep it short.
pub trait DownlinkHandler {
    /// Decrypted payload, message type and port (1..=223)
    fn on_downlink(&mut self, payload: &[u8], mtype: MType, port: u8);
}

impl<F: FnMut(&[u8], MType, u8)> DownlinkHandler for F {
    fn on_downlink(&mut self, payload: &[u8], mtype: MType, port: u8) {
        self(payload, mtype, port)
    }
}

/// Handler that ignores every payload
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl DownlinkHandler for NoopHandler {
    fn on_downlink(&mut self, _payload: &[u8], _mtype: MType, _port: u8) {}
}

/// LoRaWAN device implementation
pub struct Device<R, S, C, G, H = NoopHandler>
where
    R: Radio,
    S: SessionStore,
    C: Clock,
    G: RngCore,
    H: DownlinkHandler,
{
    config: DeviceConfig,
    timing: TimingParams,
    mac: MacLayer<S>,
    scheduler: Scheduler<R>,
    clock: C,
    rng: G,
    handler: H,
    pending_nonce: Option<u16>,
    ack_next: bool,
    last_airtime: Duration,
    last_frequency: Option<u32>,
}

impl<R, S, C, G> Device<R, S, C, G, NoopHandler>
where
    R: Radio,
    S: SessionStore,
    C: Clock,
    G: RngCore,
{
    /// Create new LoRaWAN device
    ///
    /// Restores the session from `store` if one was saved, otherwise starts
    /// from `config`. A Class C device with a session starts listening
    /// right away.
    pub fn new(
        radio: R,
        config: DeviceConfig,
        plan: FrequencyPlan,
        store: S,
        clock: C,
        rng: G,
    ) -> Result<Self, DeviceError<R::Error>> {
        if plan.data_rate(config.data_rate).is_none()
            || plan.data_rate(config.rx2_data_rate).is_none()
            || !plan.in_band(config.rx2_frequency)
        {
            return Err(DeviceError::InvalidConfig);
        }

        let mut phy = PhyLayer::new(radio);
        phy.init(config.sync_word)?;
        let scheduler = Scheduler::new(phy, OperatingMode::from(config.class));
        let mac = MacLayer::new(&config, plan, store);

        let mut device = Self {
            timing: TimingParams::from(&config),
            config,
            mac,
            scheduler,
            clock,
            rng,
            handler: NoopHandler,
            pending_nonce: None,
            ack_next: false,
            last_airtime: Duration::ZERO,
            last_frequency: None,
        };
        device.resume_listening()?;
        Ok(device)
    }
}

impl<R, S, C, G, H> Device<R, S, C, G, H>
where
    R: Radio,
    S: SessionStore,
    C: Clock,
    G: RngCore,
    H: DownlinkHandler,
{
    /// Replace the downlink handler
    pub fn with_downlink_handler<H2: DownlinkHandler>(self, handler: H2) -> Device<R, S, C, G, H2> {
        Device {
            config: self.config,
            timing: self.timing,
            mac: self.mac,
            scheduler: self.scheduler,
            clock: self.clock,
            rng: self.rng,
            handler,
            pending_nonce: self.pending_nonce,
            ack_next: self.ack_next,
            last_airtime: self.last_airtime,
            last_frequency: self.last_frequency,
        }
    }

    /// Send one join request and wait through both join-accept windows
    pub fn join(&mut self) -> Result<(), DeviceError<R::Error>> {
        let app_key = self.config.app_key().ok_or(DeviceError::InvalidConfig)?;
        self.scheduler.stop_listening()?;

        let tx = self.mac.join_settings(&mut self.rng)?;
        let dev_nonce = self.mac.next_dev_nonce(&mut self.rng);
        let request = JoinRequest {
            app_eui: self.config.app_eui,
            dev_eui: self.config.dev_eui,
            dev_nonce,
        };
        let bytes = request.encode(&app_key);
        let rx1 = self.mac.rx1_settings(&tx);
        let rx2 = self.mac.rx2_settings();
        let timing = WindowTiming::join(&self.timing);

        info!("join request, DevNonce {}", dev_nonce);
        self.pending_nonce = Some(dev_nonce);
        let result = self
            .scheduler
            .exchange(&mut self.clock, &bytes, &tx, &rx1, &rx2, &timing);
        let exchange = match result {
            Ok(exchange) => exchange,
            Err(e) => {
                self.pending_nonce = None;
                return Err(e.into());
            }
        };
        self.last_airtime = exchange.airtime;
        self.last_frequency = Some(tx.frequency);

        let joined = match exchange.downlink {
            Some(downlink) => {
                self.handle_downlink(&downlink);
                self.pending_nonce.is_none()
            }
            None => false,
        };
        self.pending_nonce = None;
        self.resume_listening()?;

        if joined {
            Ok(())
        } else {
            info!("no join accept");
            Err(DeviceError::JoinFailed)
        }
    }

    /// Join, trying up to `attempts` times
    ///
    /// Each attempt draws a new DevNonce and a new join channel. Radio errors
    /// and transmit timeouts end the loop early.
    pub fn join_with_retries(&mut self, attempts: u8) -> Result<(), DeviceError<R::Error>> {
        for attempt in 1..=attempts {
            match self.join() {
                Ok(()) => return Ok(()),
                Err(DeviceError::JoinFailed) => debug!("join attempt {} of {} failed", attempt, attempts),
                Err(e) => return Err(e),
            }
        }
        Err(DeviceError::JoinFailed)
    }

    /// Send an unconfirmed uplink and process any downlink
    ///
    /// Queued MAC answers ride along in FOpts, and the ACK bit is set if the
    /// last downlink was confirmed.
    pub fn send(&mut self, port: u8, data: &[u8]) -> Result<(), DeviceError<R::Error>> {
        if !self.mac.session().registered() {
            return Err(DeviceError::NotRegistered);
        }
        if port == 0 || port > MAX_APP_PORT {
            return Err(DeviceError::InvalidPort(port));
        }
        if data.len() > self.mac.max_payload() {
            return Err(DeviceError::PayloadTooLarge);
        }
        let keys = self.mac.session().keys().ok_or(MacError::MissingKeys)?;

        self.scheduler.stop_listening()?;
        let tx = self.mac.uplink_settings(&mut self.rng)?;
        let fcnt = self.mac.next_fcnt_up();

        let mut fhdr = FHDR::new(self.mac.session().dev_addr, fcnt);
        fhdr.f_opts = self.mac.take_fopts();
        fhdr.f_ctrl.ack = core::mem::take(&mut self.ack_next);
        let bytes = Frame::encode(MType::UnconfirmedDataUp, &fhdr, Some(port), data, &keys, fcnt)?;

        let rx1 = self.mac.rx1_settings(&tx);
        let rx2 = self.mac.rx2_settings();
        let session = self.mac.session();
        let timing = WindowTiming::data(&self.timing, session.rx1_delay, session.rx2_delay);

        debug!("uplink FCnt {} port {}, {} bytes", fcnt, port, data.len());
        let exchange = self
            .scheduler
            .exchange(&mut self.clock, &bytes, &tx, &rx1, &rx2, &timing)?;
        self.last_airtime = exchange.airtime;
        self.last_frequency = Some(tx.frequency);

        if let Some(downlink) = exchange.downlink {
            self.handle_downlink(&downlink);
            self.resume_listening()?;
        }
        Ok(())
    }

    /// Poll the Class C receiver
    ///
    /// Returns whether a downlink was received and accepted. Always `false`
    /// for a Class A device.
    pub fn receive(&mut self) -> Result<bool, DeviceError<R::Error>> {
        match self.scheduler.poll()? {
            Some(downlink) => Ok(self.handle_downlink(&downlink)),
            None => Ok(false),
        }
    }

    fn resume_listening(&mut self) -> Result<(), DeviceError<R::Error>> {
        if self.scheduler.operating_mode() == OperatingMode::ClassC && self.mac.session().registered() {
            let rx2 = self.mac.rx2_settings();
            self.scheduler.listen_rx2(&rx2)?;
        }
        Ok(())
    }

    fn handle_downlink(&mut self, downlink: &Downlink) -> bool {
        match self.route(downlink) {
            Ok(()) => true,
            Err(e) => {
                warn!("discarding downlink: {}", e);
                false
            }
        }
    }

    fn route(&mut self, downlink: &Downlink) -> Result<(), MacError> {
        let bytes = downlink.bytes.as_slice();
        if bytes.len() < MIN_FRAME_LEN {
            return Err(MacError::MalformedFrame);
        }

        match MType::from_mhdr(bytes[0]) {
            MType::JoinAccept => {
                let dev_nonce = self.pending_nonce.ok_or(MacError::NoPendingJoin)?;
                let app_key = self.config.app_key().ok_or(MacError::MissingKeys)?;
                let accept = JoinAccept::decrypt(bytes, &app_key)?;
                self.mac.apply_join(&accept, dev_nonce)?;
                self.pending_nonce = None;
                self.ack_next = false;
                Ok(())
            }
            MType::UnconfirmedDataDown | MType::ConfirmedDataDown => {
                let frame = Frame::parse(bytes)?;
                let fcnt = self.mac.authenticate(&frame)?;
                self.mac.set_last_snr(downlink.snr);
                let keys = self.mac.session().keys().ok_or(MacError::MissingKeys)?;
                let payload = frame.decrypt(&keys, fcnt);

                if frame.mtype() == MType::ConfirmedDataDown {
                    self.ack_next = true;
                }

                let commands = match frame.f_port() {
                    Some(0) => payload.as_slice(),
                    Some(port) => {
                        if !payload.is_empty() {
                            self.handler.on_downlink(&payload, frame.mtype(), port);
                        }
                        frame.f_opts()
                    }
                    None => frame.f_opts(),
                };
                if !commands.is_empty() {
                    // The batch is logged by the MAC layer; the frame itself stays accepted
                    let _ = self.mac.process_commands(commands);
                }
                Ok(())
            }
            _ => Err(MacError::MalformedFrame),
        }
    }

    /// Queue a LinkCheckReq for the next uplink
    pub fn request_link_check(&mut self) {
        self.mac.request_link_check();
    }

    /// Queue a DeviceTimeReq for the next uplink
    pub fn request_device_time(&mut self) {
        self.mac.request_device_time();
    }

    /// Battery level for DevStatusAns (0 external power, 1..=254 level, 255 unknown)
    pub fn set_battery_level(&mut self, level: u8) {
        self.mac.set_battery_level(level);
    }

    /// Result of the last link check
    pub fn link_check(&self) -> Option<LinkCheck> {
        self.mac.session().link_check
    }

    /// Network time from the last DeviceTimeAns
    pub fn device_time(&self) -> Option<DeviceTime> {
        self.mac.device_time()
    }

    /// Airtime of the most recent transmission
    pub fn last_airtime(&self) -> Duration {
        self.last_airtime
    }

    /// Duty cycle limit in percent on the channel last transmitted on
    pub fn duty_cycle(&self) -> Option<f32> {
        self.last_frequency.map(|f| self.mac.max_duty_cycle(f))
    }

    /// Silence required before the next transmission
    pub fn duty_cycle_wait(&self) -> Duration {
        self.duty_cycle()
            .map(|percent| airtime::duty_cycle_wait(percent, self.last_airtime))
            .unwrap_or(Duration::ZERO)
    }

    /// Whether a session exists
    pub fn registered(&self) -> bool {
        self.mac.session().registered()
    }

    /// Current session
    pub fn session(&self) -> &Session {
        self.mac.session()
    }

    /// MAC layer
    pub fn mac(&self) -> &MacLayer<S> {
        &self.mac
    }

    /// Scheduler and radio
    pub fn scheduler(&self) -> &Scheduler<R> {
        &self.scheduler
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Drop the session and start over from configuration
    pub fn reset_session(&mut self) -> Result<(), DeviceError<R::Error>> {
        self.scheduler.stop_listening()?;
        self.mac.reset_session(&self.config);
        self.pending_nonce = None;
        self.ack_next = false;
        self.resume_listening()
    }
}
