//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip, net};
use holo_lisp::packet::auth::{compute_auth, insert_auth, verify_auth};
use holo_lisp::packet::{
    EidPrefix, InfoMessage, KeyId, LocatorFlags, LocatorRecord, MapRegister,
    MapReplyAction, MappingRecord, Message,
};

fn map_register(key_id: KeyId) -> MapRegister {
    MapRegister {
        proxy_map_reply: false,
        for_rtr: false,
        want_map_notify: true,
        nonce: 0x1122334455667788,
        key_id,
        auth_data: vec![],
        records: vec![MappingRecord::new(
            1440,
            MapReplyAction::NoAction,
            true,
            0,
            EidPrefix::new(None, net!("37.77.56.32/31")),
            vec![LocatorRecord::new(
                1,
                100,
                255,
                0,
                LocatorFlags::REACHABLE,
                ip!("192.0.2.1"),
            )],
        )],
        xtr_id_present: true,
        xtr_id: 0x1234,
        site_id: 1,
    }
}

#[test]
fn test_auth_hmac_sha1() {
    let mut register = map_register(KeyId::HmacSha1_96);
    insert_auth(&mut register, b"K");
    assert_eq!(register.auth_data.len(), 20);
    assert!(verify_auth(&register, b"K"));
    assert!(!verify_auth(&register, b"wrong"));
}

#[test]
fn test_auth_hmac_sha256() {
    let mut register = map_register(KeyId::HmacSha256_128);
    insert_auth(&mut register, b"K");
    assert_eq!(register.auth_data.len(), 32);
    assert!(verify_auth(&register, b"K"));
}

#[test]
fn test_auth_none() {
    let register = map_register(KeyId::None);
    assert!(compute_auth(&register, b"K").is_empty());
    assert!(verify_auth(&register, b"K"));
}

#[test]
fn test_auth_survives_encoding() {
    let mut register = map_register(KeyId::HmacSha1_96);
    insert_auth(&mut register, b"K");

    let bytes = Message::MapRegister(register).encode();
    let register = Message::decode(&bytes)
        .unwrap()
        .into_map_register()
        .unwrap();
    assert!(verify_auth(&register, b"K"));
}

#[test]
fn test_auth_zero_xtr_id_trailer() {
    // I flag set with all-zero xTR-ID and site-ID: the trailer is part of
    // the signed message and must survive decoding.
    let mut register = map_register(KeyId::HmacSha1_96);
    register.xtr_id = 0;
    register.site_id = 0;
    insert_auth(&mut register, b"K");

    let bytes = Message::MapRegister(register).encode();
    let register = Message::decode(&bytes)
        .unwrap()
        .into_map_register()
        .unwrap();
    assert!(register.xtr_id_present);
    assert!(verify_auth(&register, b"K"));
    assert_eq!(Message::MapRegister(register).encode(), bytes);
}

#[test]
fn test_auth_mutation() {
    let mut register = map_register(KeyId::HmacSha1_96);
    insert_auth(&mut register, b"K");

    let mut mutated = register.clone();
    mutated.nonce += 1;
    assert!(!verify_auth(&mutated, b"K"));

    let mut mutated = register.clone();
    mutated.want_map_notify = false;
    assert!(!verify_auth(&mutated, b"K"));

    let mut mutated = register.clone();
    mutated.records[0].locators[0].address = ip!("192.0.2.2");
    assert!(!verify_auth(&mutated, b"K"));

    let mut mutated = register.clone();
    mutated.site_id = 2;
    assert!(!verify_auth(&mutated, b"K"));
}

#[test]
fn test_auth_info_request() {
    let mut request = InfoMessage {
        nonce: 42,
        key_id: KeyId::HmacSha1_96,
        auth_data: vec![],
        ttl: InfoMessage::DFLT_TTL,
        eid_prefix: EidPrefix::new(None, net!("10.1.0.0/16")),
        reply: None,
    };
    insert_auth(&mut request, b"secret");
    assert!(verify_auth(&request, b"secret"));

    request.ttl = 0;
    assert!(!verify_auth(&request, b"secret"));
}
