use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use lorawan_node::{
    class::{OperatingMode, RxWindow, Scheduler, State, WindowTiming},
    config::{
        device::{AESKey, DevAddr, DeviceClass, DeviceConfig},
        RamStore,
    },
    crypto::SessionKeys,
    device::Device,
    lorawan::{
        frame::{Frame, MType, FHDR},
        phy::{PhyError, PhyLayer, RadioSettings, TimingParams},
        region::{Bandwidth, DataRate, FrequencyPlan},
    },
    radio::traits::Mode,
};

mod mock;
use mock::{Air, MockClock, MockError, MockRadio, TestRng};

const NWK_SKEY: [u8; 16] = [0x11; 16];
const APP_SKEY: [u8; 16] = [0x22; 16];
const DEV_ADDR: u32 = 0x2601_1234;

fn settings(frequency: u32, data_rate: u8) -> RadioSettings {
    let modulation = FrequencyPlan::EU868.data_rate(data_rate).unwrap();
    RadioSettings {
        frequency,
        data_rate,
        modulation,
        tx_power: 14,
    }
}

fn scheduler(mode: OperatingMode) -> (Scheduler<MockRadio>, MockRadio) {
    let radio = MockRadio::new();
    let mut phy = PhyLayer::new(radio.clone());
    phy.init(0x34).unwrap();
    (Scheduler::new(phy, mode), radio)
}

fn timing() -> WindowTiming {
    WindowTiming::data(&TimingParams::default(), 1, 2)
}

fn exchange(
    scheduler: &mut Scheduler<MockRadio>,
    clock: &mut MockClock,
) -> Result<lorawan_node::class::Exchange, PhyError<MockError>> {
    let tx = settings(868_300_000, 5);
    let rx2 = settings(869_525_000, 0);
    scheduler.exchange(clock, b"uplink", &tx, &tx, &rx2, &timing())
}

#[test]
fn test_class_a_downlink_in_rx1() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassA);
    let mut clock = MockClock::new(Duration::from_millis(100));
    radio.push_air(Air::Packet(vec![0x60; 20]));

    let result = exchange(&mut scheduler, &mut clock).unwrap();
    let downlink = result.downlink.unwrap();
    assert_eq!(downlink.window, RxWindow::Rx1);
    assert_eq!(downlink.bytes.as_slice(), &[0x60; 20]);
    assert_eq!(downlink.snr, 7);

    let windows = radio.windows();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].frequency, 868_300_000);
    assert_eq!(windows[0].spreading_factor, 7);
    assert!(windows[0].invert_iq);
    assert_eq!(radio.state().mode, Mode::Sleep);
    assert_eq!(scheduler.state(), State::Idle);
}

#[test]
fn test_class_a_falls_through_to_rx2() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassA);
    let mut clock = MockClock::new(Duration::from_millis(100));
    radio.push_air(Air::Silence);
    radio.push_air(Air::Packet(vec![0xA0; 14]));

    let result = exchange(&mut scheduler, &mut clock).unwrap();
    assert_eq!(result.downlink.unwrap().window, RxWindow::Rx2);

    let windows = radio.windows();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[1].frequency, 869_525_000);
    assert_eq!(windows[1].spreading_factor, 12);
    assert_eq!(windows[1].bandwidth, Bandwidth::Khz125);
    assert!(windows[1].invert_iq);

    // RX1 stays open for RX1Delay + window
    assert!(clock.elapsed() >= Duration::from_secs(2));
}

#[test]
fn test_class_a_no_downlink() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassA);
    let mut clock = MockClock::new(Duration::from_millis(100));

    let result = exchange(&mut scheduler, &mut clock).unwrap();
    assert!(result.downlink.is_none());
    assert_eq!(result.airtime, Duration::from_millis(100));
    assert!(clock.elapsed() >= Duration::from_secs(3));
    assert_eq!(radio.windows().len(), 2);
    assert_eq!(radio.state().mode, Mode::Sleep);
}

#[test]
fn test_crc_error_keeps_window_open() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassA);
    let mut clock = MockClock::new(Duration::from_millis(100));
    radio.push_air(Air::CrcError(vec![0x60; 20]));
    radio.push_air(Air::Packet(vec![0x60; 16]));

    let result = exchange(&mut scheduler, &mut clock).unwrap();
    let downlink = result.downlink.unwrap();
    assert_eq!(downlink.window, RxWindow::Rx2);
    assert_eq!(downlink.bytes.len(), 16);
}

#[test]
fn test_tx_timeout_aborts_exchange() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassA);
    let mut clock = MockClock::new(Duration::from_millis(100));
    radio.set_tx_stuck(true);

    let result = exchange(&mut scheduler, &mut clock);
    assert_eq!(result, Err(PhyError::TxTimeout));
    assert_eq!(radio.state().mode, Mode::Standby);
    assert!(radio.windows().is_empty());
    assert_eq!(scheduler.state(), State::Idle);
}

#[test]
fn test_tx_and_rx_settings() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassA);
    let mut clock = MockClock::new(Duration::from_millis(100));
    let tx = RadioSettings {
        frequency: 868_100_000,
        data_rate: 6,
        modulation: DataRate::new(7, Bandwidth::Khz250),
        tx_power: 10,
    };
    let rx2 = settings(869_525_000, 0);
    scheduler
        .exchange(&mut clock, b"x", &tx, &tx, &rx2, &timing())
        .unwrap();

    let state = radio.state();
    assert_eq!(state.sent[0], b"x".to_vec());
    assert_eq!(state.tx_frequencies[0], 868_100_000);
    assert!(!state.tx_invert_iq[0]);
    assert_eq!(state.windows[0].bandwidth, Bandwidth::Khz250);
    assert_eq!(state.sync_word, 0x34);
    assert_eq!(state.pa.unwrap().output_power, 14);
}

#[test]
fn test_class_c_listens_after_exchange() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassC);
    let mut clock = MockClock::new(Duration::from_millis(100));

    let result = exchange(&mut scheduler, &mut clock).unwrap();
    assert!(result.downlink.is_none());
    assert_eq!(scheduler.state(), State::ListeningRx2);
    assert_eq!(radio.state().mode, Mode::ReceiveContinuous);
    let windows = radio.windows();
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[2].frequency, 869_525_000);

    assert_eq!(scheduler.poll().unwrap(), None);
    radio.inject(&[0x60; 12]);
    let downlink = scheduler.poll().unwrap().unwrap();
    assert_eq!(downlink.window, RxWindow::Continuous);
    assert_eq!(scheduler.poll().unwrap(), None);

    scheduler.stop_listening().unwrap();
    assert_eq!(scheduler.state(), State::Idle);
    assert_eq!(radio.state().mode, Mode::Standby);
}

#[test]
fn test_class_a_poll_is_empty() {
    let (mut scheduler, radio) = scheduler(OperatingMode::ClassA);
    radio.inject(&[0x60; 12]);
    assert_eq!(scheduler.poll().unwrap(), None);
}

#[test]
fn test_class_c_device_receives_between_uplinks() {
    let radio = MockRadio::new();
    let config = DeviceConfig::new_abp(
        [1; 8],
        [2; 8],
        DevAddr::from(DEV_ADDR),
        AESKey::new(NWK_SKEY),
        AESKey::new(APP_SKEY),
    )
    .with_class(DeviceClass::C);
    let device = Device::new(
        radio.clone(),
        config,
        FrequencyPlan::EU868,
        RamStore::new(),
        MockClock::new(Duration::from_millis(100)),
        TestRng(3),
    )
    .unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    let mut device = device.with_downlink_handler(move |payload: &[u8], _: MType, port: u8| {
        sink.borrow_mut().push((payload.to_vec(), port));
    });

    // A session exists, so the receiver opens right away
    assert_eq!(device.scheduler().operating_mode(), OperatingMode::ClassC);
    assert_eq!(device.scheduler().state(), State::ListeningRx2);
    assert_eq!(radio.windows()[0].frequency, 869_525_000);
    assert!(!device.receive().unwrap());

    let keys = SessionKeys {
        nwk_skey: AESKey::new(NWK_SKEY),
        app_skey: AESKey::new(APP_SKEY),
    };
    let fhdr = FHDR::new(DevAddr::from(DEV_ADDR), 4);
    let packet = Frame::encode(MType::UnconfirmedDataDown, &fhdr, Some(9), b"on", &keys, 4).unwrap();
    radio.inject(&packet);
    assert!(device.receive().unwrap());
    assert_eq!(received.borrow().as_slice(), &[(b"on".to_vec(), 9)]);
    assert_eq!(device.session().fcnt_dn, Some(4));

    // Uplink, then back to listening
    device.send(1, b"ok").unwrap();
    assert_eq!(device.scheduler().state(), State::ListeningRx2);
    assert_eq!(radio.state().mode, Mode::ReceiveContinuous);
}
