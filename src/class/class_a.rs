use heapless::Vec;
use log::{debug, info};

use super::{Downlink, Exchange, OperatingMode, RxWindow, Scheduler, State, WindowTiming};
use crate::lorawan::frame::MAX_PHY_PAYLOAD;
use crate::lorawan::phy::{Clock, PhyError, RadioSettings};
use crate::radio::traits::Radio;

impl<R: Radio> Scheduler<R> {
    /// Send `payload` and listen in RX1 then RX2
    ///
    /// The first packet received ends the exchange. Afterwards a Class A
    /// radio is put to sleep and a Class C radio listens on RX2. A transmit
    /// timeout aborts the exchange with the radio in standby.
    pub fn exchange<C: Clock>(
        &mut self,
        clock: &mut C,
        payload: &[u8],
        tx: &RadioSettings,
        rx1: &RadioSettings,
        rx2: &RadioSettings,
        timing: &WindowTiming,
    ) -> Result<Exchange, PhyError<R::Error>> {
        match self.run_windows(clock, payload, tx, rx1, rx2, timing) {
            Ok(exchange) => {
                self.finish(rx2)?;
                Ok(exchange)
            }
            Err(e) => {
                self.state = State::Idle;
                Err(e)
            }
        }
    }

    fn run_windows<C: Clock>(
        &mut self,
        clock: &mut C,
        payload: &[u8],
        tx: &RadioSettings,
        rx1: &RadioSettings,
        rx2: &RadioSettings,
        timing: &WindowTiming,
    ) -> Result<Exchange, PhyError<R::Error>> {
        self.state = State::Transmitting;
        self.phy.configure(tx)?;
        let (start, end) = self.phy.transmit(clock, payload, timing.tx_timeout)?;
        let airtime = end.saturating_sub(start);
        info!("uplink on {} Hz DR{}", tx.frequency, tx.data_rate);

        let mut buffer = [0u8; MAX_PHY_PAYLOAD];

        self.state = State::AwaitingRx1;
        self.phy.start_rx(rx1)?;
        let deadline = end + timing.rx1_delay + timing.rx_window;
        if let Some(len) = self.phy.receive_until(clock, &mut buffer, deadline)? {
            let downlink = self.downlink(RxWindow::Rx1, &buffer[..len])?;
            return Ok(Exchange {
                airtime,
                downlink: Some(downlink),
            });
        }

        debug!("RX1 closed, switching to RX2");
        self.state = State::AwaitingRx2;
        self.phy.start_rx(rx2)?;
        let deadline = end + timing.rx2_delay + timing.rx_window;
        if let Some(len) = self.phy.receive_until(clock, &mut buffer, deadline)? {
            let downlink = self.downlink(RxWindow::Rx2, &buffer[..len])?;
            return Ok(Exchange {
                airtime,
                downlink: Some(downlink),
            });
        }

        debug!("no downlink");
        Ok(Exchange {
            airtime,
            downlink: None,
        })
    }

    fn finish(&mut self, rx2: &RadioSettings) -> Result<(), PhyError<R::Error>> {
        match self.mode {
            OperatingMode::ClassA => {
                self.phy.sleep()?;
                self.state = State::Idle;
                Ok(())
            }
            OperatingMode::ClassC => self.listen_rx2(rx2),
        }
    }

    pub(super) fn downlink(
        &mut self,
        window: RxWindow,
        bytes: &[u8],
    ) -> Result<Downlink, PhyError<R::Error>> {
        let snr = self.phy.snr()?;
        debug!("{} bytes in {:?}, SNR {} dB", bytes.len(), window, snr);
        Ok(Downlink {
            window,
            // The receive buffer is MAX_PHY_PAYLOAD long
            bytes: Vec::from_slice(bytes).unwrap_or_default(),
            snr,
        })
    }
}
