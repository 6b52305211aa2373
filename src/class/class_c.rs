use log::debug;

use super::{Downlink, RxWindow, Scheduler, State};
use crate::lorawan::frame::MAX_PHY_PAYLOAD;
use crate::lorawan::phy::{PhyError, RadioSettings};
use crate::radio::traits::Radio;

impl<R: Radio> Scheduler<R> {
    /// Keep the receiver open on the RX2 channel until the next uplink
    pub fn listen_rx2(&mut self, rx2: &RadioSettings) -> Result<(), PhyError<R::Error>> {
        self.phy.start_rx(rx2)?;
        self.state = State::ListeningRx2;
        debug!("listening on {} Hz DR{}", rx2.frequency, rx2.data_rate);
        Ok(())
    }

    /// Check for a packet received while listening
    ///
    /// Returns `None` when nothing arrived or the scheduler is not listening.
    /// The receiver stays open either way.
    pub fn poll(&mut self) -> Result<Option<Downlink>, PhyError<R::Error>> {
        if self.state != State::ListeningRx2 {
            return Ok(None);
        }
        let mut buffer = [0u8; MAX_PHY_PAYLOAD];
        match self.phy.poll_rx(&mut buffer) {
            Ok(len) => self.downlink(RxWindow::Continuous, &buffer[..len]).map(Some),
            Err(nb::Error::WouldBlock) => Ok(None),
            Err(nb::Error::Other(e)) => Err(e),
        }
    }

    /// Close the continuous receiver
    pub fn stop_listening(&mut self) -> Result<(), PhyError<R::Error>> {
        if self.state == State::ListeningRx2 {
            self.phy.standby()?;
            self.state = State::Idle;
        }
        Ok(())
    }
}
