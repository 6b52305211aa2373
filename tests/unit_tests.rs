use std::time::Duration;

use lorawan_node::{
    config::device::{AESKey, DevAddr},
    crypto::SessionKeys,
    device::airtime::{duty_cycle_wait, AirtimeLedger},
    lorawan::{
        frame::{Frame, MType, FHDR},
        join::{JoinAccept, JoinRequest},
        region::FrequencyPlan,
    },
};

mod mock;
use mock::{cmac4, derive_key, join_accept};

const NWK_SKEY: [u8; 16] = [
    0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C,
];
const APP_SKEY: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
];

fn keys() -> SessionKeys {
    SessionKeys {
        nwk_skey: AESKey::new(NWK_SKEY),
        app_skey: AESKey::new(APP_SKEY),
    }
}

/// "Hello" from 26011234 with FCnt 5 on port 1
const HELLO_UPLINK: [u8; 18] = [
    0x40, 0x34, 0x12, 0x01, 0x26, 0x00, 0x05, 0x00, 0x01, 0x7C, 0x75, 0x91, 0x22, 0xF0, 0x7D,
    0x2E, 0xEA, 0x32,
];

fn reference_uplink() -> Vec<u8> {
    HELLO_UPLINK.to_vec()
}

#[test]
fn test_uplink_matches_reference() {
    let fhdr = FHDR::new(DevAddr::from(0x2601_1234), 5);
    let encoded =
        Frame::encode(MType::UnconfirmedDataUp, &fhdr, Some(1), b"Hello", &keys(), 5).unwrap();
    assert_eq!(encoded.as_slice(), &HELLO_UPLINK);
    assert_eq!(&encoded[14..], &[0x7D, 0x2E, 0xEA, 0x32]);
}

#[test]
fn test_altered_mic_is_rejected() {
    for i in 14..18 {
        let mut tampered = HELLO_UPLINK;
        tampered[i] ^= 0x80;
        let frame = Frame::parse(&tampered).unwrap();
        assert!(frame.verify(&keys(), 5).is_err());
    }
}

#[test]
fn test_uplink_round_trip() {
    let bytes = reference_uplink();
    let frame = Frame::parse(&bytes).unwrap();
    assert_eq!(frame.mtype(), MType::UnconfirmedDataUp);
    assert_eq!(frame.dev_addr(), DevAddr::from(0x2601_1234));
    assert_eq!(frame.f_cnt(), 5);
    assert_eq!(frame.f_port(), Some(1));
    assert!(frame.verify(&keys(), 5).is_ok());
    assert_eq!(frame.decrypt(&keys(), 5).as_slice(), b"Hello");
}

#[test]
fn test_any_flipped_byte_is_rejected() {
    let bytes = reference_uplink();
    for i in 0..bytes.len() {
        let mut tampered = bytes.clone();
        tampered[i] ^= 0x01;
        let accepted = Frame::parse(&tampered)
            .map(|frame| frame.verify(&keys(), frame.f_cnt() as u32).is_ok())
            .unwrap_or(false);
        assert!(!accepted, "flipped byte {} was accepted", i);
    }
}

#[test]
fn test_wrong_counter_fails_mic() {
    let frame = Frame::parse(&reference_uplink()).unwrap();
    assert!(frame.verify(&keys(), 6).is_err());
    assert!(frame.verify(&keys(), 0x1_0005).is_err());
}

#[test]
fn test_join_request_layout() {
    let app_key = [0x03; 16];
    let request = JoinRequest {
        app_eui: [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01],
        dev_eui: [0x00, 0x04, 0xA3, 0x0B, 0x00, 0x1C, 0x05, 0x30],
        dev_nonce: 0xBEEF,
    };
    let bytes = request.encode(&AESKey::new(app_key));

    assert_eq!(bytes[0], 0x00);
    assert_eq!(&bytes[1..9], &[0x01, 0x00, 0x00, 0xD0, 0x7E, 0xD5, 0xB3, 0x70]);
    assert_eq!(&bytes[9..17], &[0x30, 0x05, 0x1C, 0x00, 0x0B, 0xA3, 0x04, 0x00]);
    assert_eq!(&bytes[17..19], &[0xEF, 0xBE]);
    assert_eq!(&bytes[19..], &cmac4(&app_key, &bytes[..19]));
}

#[test]
fn test_join_accept_from_network() {
    let app_key = [0x42; 16];
    let bytes = join_accept(&app_key, [0x00, 0x00, 0x01], [0x00, 0x00, 0x13], 0x2601_5678, 0x21, 3, None);
    let accept = JoinAccept::decrypt(&bytes, &AESKey::new(app_key)).unwrap();

    assert_eq!(accept.dev_addr, DevAddr::from(0x2601_5678));
    assert_eq!(accept.dl_settings.rx1_dr_offset, 2);
    assert_eq!(accept.dl_settings.rx2_data_rate, 1);
    assert_eq!(accept.rx1_delay(), 3);
    assert_eq!(accept.cf_list, None);

    let derived = accept.session_keys(&AESKey::new(app_key), 0x0102);
    assert_eq!(derived.nwk_skey, derive_key(&app_key, 0x01, [0, 0, 1], [0, 0, 0x13], 0x0102));
    assert_eq!(derived.app_skey, derive_key(&app_key, 0x02, [0, 0, 1], [0, 0, 0x13], 0x0102));
}

#[test]
fn test_join_accept_known_vector() {
    let app_key = AESKey::new([
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
        0xFF,
    ]);
    let wire = [
        0x20, 0x49, 0x3E, 0xEB, 0x51, 0xFB, 0xA2, 0x11, 0x6F, 0x81, 0x0E, 0xDB, 0x37, 0x42, 0x97,
        0x51, 0x42,
    ];
    let accept = JoinAccept::decrypt(&wire, &app_key).unwrap();

    assert_eq!(accept.app_nonce, [0x57, 0x0B, 0xC7]);
    assert_eq!(accept.net_id, [0x22, 0x11, 0x01]);
    assert_eq!(accept.dev_addr, DevAddr::from(0x0203_1980));
    assert_eq!(accept.dl_settings.rx1_dr_offset, 0);
    assert_eq!(accept.dl_settings.rx2_data_rate, 0);
    assert_eq!(accept.rx1_delay(), 1);
    assert_eq!(accept.cf_list, None);

    let keys = accept.session_keys(&app_key, 0x102D);
    assert_eq!(
        keys.nwk_skey,
        AESKey::new([
            0x7B, 0xB2, 0x5F, 0x89, 0xE0, 0xD1, 0x37, 0x1E, 0x1F, 0xBF, 0x4D, 0x99, 0x7E, 0x14,
            0x68, 0xA3,
        ])
    );
    assert_eq!(
        keys.app_skey,
        AESKey::new([
            0x14, 0x88, 0x20, 0xDF, 0xB1, 0xE0, 0xC9, 0xD6, 0x28, 0x9C, 0xDE, 0x16, 0xC1, 0xAF,
            0x24, 0x9F,
        ])
    );
}

#[test]
fn test_join_accept_wrong_key() {
    let bytes = join_accept(&[0x42; 16], [0, 0, 1], [0, 0, 0x13], 0x2601_5678, 0, 1, None);
    assert!(JoinAccept::decrypt(&bytes, &AESKey::new([0x43; 16])).is_err());
    assert!(JoinAccept::decrypt(&bytes[..16], &AESKey::new([0x42; 16])).is_err());
}

#[test]
fn test_duty_cycle_wait() {
    let plan = FrequencyPlan::EU868;
    let wait = duty_cycle_wait(plan.duty_cycle(868_100_000), Duration::from_millis(500));
    assert_eq!(wait, Duration::from_millis(49_500));
}

#[test]
fn test_fair_use_ledger() {
    let mut ledger = AirtimeLedger::new(Duration::from_secs(1));
    ledger.record(Duration::from_millis(600));
    assert!(!ledger.exhausted());
    ledger.record(Duration::from_millis(600));
    assert!(ledger.exhausted());
    assert_eq!(ledger.remaining(), Duration::ZERO);
}
