//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use const_addrs::{ip, net};
use holo_lisp::config::Config;
use holo_lisp::instance::{
    Instance, InstanceChannelsTx, ProtocolInputChannelsRx,
    protocol_input_channels,
};
use holo_lisp::map_server::MapServerNode;
use holo_lisp::network::select_destination;
use holo_lisp::packet::auth::{insert_auth, verify_auth};
use holo_lisp::packet::{
    DecodeError, Ecm, EidPrefix, InfoMessage, KeyId, LocatorFlags,
    MapNotify, MapReplyAction, MapRequest, Message, ReferralAction,
};
use holo_lisp::tasks::messages::ProtocolInputMsg;
use holo_lisp::tasks::messages::input::{
    ExchangeMsg, MsCleanupMsg, RtrUpdateMsg, UdpRxMsg,
};
use holo_lisp::tasks::messages::output::UdpTxMsg;
use holo_lisp::tree::NodeKind;
use holo_utils::UnboundedReceiver;
use holo_utils::ip::IpNetworkExt;
use ipnetwork::IpNetwork;
use tokio::sync::{mpsc, oneshot};

use super::{
    MS_KEY, TOPOLOGY, etr_rloc, map_register, mapping_record, ms_eid,
};

//
// Helper functions.
//

struct TestInstance {
    instance: Instance,
    udp_tx: UnboundedReceiver<UdpTxMsg>,
    _rx: ProtocolInputChannelsRx,
}

fn local_rloc() -> IpAddr {
    ip!("192.0.2.1")
}

fn itr_rloc() -> IpAddr {
    ip!("203.0.113.20")
}

fn ms_local() -> IpAddr {
    ip!("192.0.2.100")
}

fn instance() -> TestInstance {
    let config = Config::parse(TOPOLOGY).unwrap();
    let (protocol_input, rx) = protocol_input_channels();
    let (udp_txp, udp_txc) = mpsc::unbounded_channel();
    let tx = InstanceChannelsTx {
        protocol_input,
        udp_tx: udp_txp,
    };
    let sockets = vec![
        SocketAddr::new(local_rloc(), 4342),
        sockaddr("[2001:db8::1]:4342"),
    ];
    let instance = Instance::new(config, sockets, tx).unwrap();

    TestInstance {
        instance,
        udp_tx: udp_txc,
        _rx: rx,
    }
}

impl TestInstance {
    fn udp_rx(&mut self, socket: usize, source: SocketAddr, msg: Message) {
        let destination = match source.ip() {
            IpAddr::V4(_) => ms_local(),
            IpAddr::V6(_) => ip!("2001:db8::1"),
        };
        let msg = UdpRxMsg {
            socket,
            source,
            destination,
            msg: Ok(msg),
        };
        self.instance
            .process_protocol_msg(ProtocolInputMsg::UdpRx(msg));
    }

    fn expect_tx(&mut self) -> UdpTxMsg {
        self.udp_tx.try_recv().unwrap()
    }

    fn expect_no_tx(&mut self) {
        assert!(self.udp_tx.try_recv().is_err());
    }

    fn map_server(&self, iid: u32, prefix: IpNetwork) -> &MapServerNode {
        let af = prefix.address_family();
        let node = self.instance.trees[&iid]
            .root(af)
            .resolve(&prefix)
            .unwrap();
        let NodeKind::MapServer(ms) = &node.kind else {
            panic!("unexpected node type");
        };
        ms
    }

    fn registration_count(&self) -> usize {
        self.map_server(0, ms_eid().prefix)
            .registrations
            .values()
            .map(|registrations| registrations.len())
            .sum()
    }

    fn register_etr(&mut self, proxy_map_reply: bool) {
        let record = mapping_record(ms_eid(), &[etr_rloc()]);
        let mut register = map_register(vec![record], 0x1234, MS_KEY);
        register.proxy_map_reply = proxy_map_reply;
        register.want_map_notify = false;
        insert_auth(&mut register, MS_KEY);
        self.udp_rx(0, etr_source(), register.into());
        self.expect_no_tx();
    }
}

fn sockaddr(addr: &str) -> SocketAddr {
    addr.parse().unwrap()
}

fn etr_source() -> SocketAddr {
    SocketAddr::new(etr_rloc(), 4342)
}

fn itr_source() -> SocketAddr {
    SocketAddr::new(itr_rloc(), 40000)
}

fn map_request(eid_prefix: EidPrefix) -> MapRequest {
    MapRequest {
        nonce: 0xdeadbeef,
        itr_rlocs: vec![itr_rloc()],
        eid_prefixes: vec![eid_prefix],
        ..Default::default()
    }
}

fn enc_map_request(eid_prefix: EidPrefix, ddt: bool) -> Message {
    let mut ecm = Ecm::new(
        map_request(eid_prefix).into(),
        itr_source(),
        sockaddr("37.77.56.33:4342"),
        64,
    );
    ecm.ddt_originated = ddt;
    ecm.into()
}

//
// Map-Server.
//

#[test]
fn test_map_register_notify() {
    let mut test = instance();
    let record = mapping_record(ms_eid(), &[etr_rloc()]);
    let register = map_register(vec![record.clone()], 0x1234, MS_KEY);
    test.udp_rx(0, etr_source(), register.clone().into());

    let msg = test.expect_tx();
    assert_eq!(msg.socket, Some(0));
    assert_eq!(msg.dst, vec![etr_rloc()]);
    assert_eq!(msg.port, 4342);
    let notify = msg.msg.into_map_notify().unwrap();
    assert_eq!(notify.nonce, register.nonce);
    assert_eq!(notify.records, vec![record]);
    assert!(verify_auth(&notify, MS_KEY));
    test.expect_no_tx();

    assert_eq!(test.registration_count(), 1);
}

#[test]
fn test_map_register_partial() {
    let mut test = instance();
    let accepted = mapping_record(ms_eid(), &[etr_rloc()]);
    let hole = mapping_record(
        EidPrefix::new(None, net!("37.77.57.0/30")),
        &[etr_rloc()],
    );
    let register =
        map_register(vec![hole, accepted.clone()], 0x1234, MS_KEY);
    test.udp_rx(0, etr_source(), register.into());

    // Only the accepted record is acknowledged.
    let notify = test.expect_tx().msg.into_map_notify().unwrap();
    assert_eq!(notify.records, vec![accepted]);
    test.expect_no_tx();
}

#[test]
fn test_map_register_rejected() {
    let mut test = instance();

    // Not covered by any Map-Server node.
    let eid_prefix = EidPrefix::new(None, net!("37.77.57.0/30"));
    let record = mapping_record(eid_prefix, &[etr_rloc()]);
    let register = map_register(vec![record], 0x1234, MS_KEY);
    test.udp_rx(0, etr_source(), register.into());
    test.expect_no_tx();

    // Wrong key.
    let record = mapping_record(ms_eid(), &[etr_rloc()]);
    let register = map_register(vec![record], 0x1234, b"wrong");
    test.udp_rx(0, etr_source(), register.into());
    test.expect_no_tx();

    assert_eq!(test.registration_count(), 0);
}

#[test]
fn test_map_register_ipv6_instance() {
    let mut test = instance();
    let eid_prefix = EidPrefix::new(Some(100), net!("2001:db8:1::/48"));
    let record = mapping_record(eid_prefix, &[ip!("2001:db8:ffff::1")]);
    let mut register = map_register(vec![record.clone()], 0x1234, b"K6");
    register.key_id = KeyId::HmacSha256_128;
    insert_auth(&mut register, b"K6");
    test.udp_rx(1, sockaddr("[2001:db8:ffff::1]:4342"), register.into());

    let msg = test.expect_tx();
    assert_eq!(msg.socket, Some(1));
    assert_eq!(msg.dst, vec![ip!("2001:db8:ffff::1")]);
    let notify = msg.msg.into_map_notify().unwrap();
    assert_eq!(notify.key_id, KeyId::HmacSha256_128);
    assert!(verify_auth(&notify, b"K6"));
    assert_eq!(notify.records, vec![record]);

    let ms = test.map_server(100, net!("2001:db8:1::/48"));
    assert_eq!(ms.registrations.len(), 1);

    // Unknown instance.
    let eid_prefix = EidPrefix::new(Some(200), net!("2001:db8:1::/48"));
    let record = mapping_record(eid_prefix, &[ip!("2001:db8:ffff::1")]);
    let register = map_register(vec![record], 0x1234, b"K6");
    test.udp_rx(1, sockaddr("[2001:db8:ffff::1]:4342"), register.into());
    test.expect_no_tx();
}

#[tokio::test(start_paused = true)]
async fn test_registration_cleanup() {
    let mut test = instance();
    test.register_etr(false);
    assert_eq!(test.registration_count(), 1);

    tokio::time::advance(Duration::from_secs(120)).await;
    test.instance
        .process_protocol_msg(ProtocolInputMsg::MsCleanup(MsCleanupMsg {}));
    assert_eq!(test.registration_count(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    test.instance
        .process_protocol_msg(ProtocolInputMsg::MsCleanup(MsCleanupMsg {}));
    assert_eq!(test.registration_count(), 0);
}

#[test]
fn test_info_request() {
    let mut test = instance();
    let mut request = InfoMessage {
        nonce: 0x55,
        key_id: KeyId::HmacSha1_96,
        auth_data: vec![],
        ttl: InfoMessage::DFLT_TTL,
        eid_prefix: ms_eid(),
        reply: None,
    };
    insert_auth(&mut request, MS_KEY);
    let source = sockaddr("203.0.113.50:61000");
    test.udp_rx(0, source, request.clone().into());

    let msg = test.expect_tx();
    assert_eq!(msg.socket, Some(0));
    assert_eq!(msg.dst, vec![ip!("203.0.113.50")]);
    assert_eq!(msg.port, 61000);
    let reply = msg.msg.into_info().unwrap();
    assert!(reply.is_reply());
    assert_eq!(reply.nonce, 0x55);
    let nat_info = reply.reply.unwrap();
    assert_eq!(nat_info.global_etr_rloc, ip!("203.0.113.50"));
    assert_eq!(nat_info.etr_port, 61000);
    assert_eq!(nat_info.map_server_rloc, ms_local());
    assert_eq!(nat_info.rtr_rlocs, vec![ip!("198.51.100.7")]);

    // Bad authentication: silently dropped.
    insert_auth(&mut request, b"wrong");
    test.udp_rx(0, source, request.into());
    test.expect_no_tx();
}

#[test]
fn test_enc_map_request_negative() {
    let mut test = instance();
    let eid_prefix = EidPrefix::new(None, net!("37.77.56.33/32"));
    test.udp_rx(0, itr_source(), enc_map_request(eid_prefix, false));

    let msg = test.expect_tx();
    assert_eq!(msg.dst, vec![itr_rloc()]);
    assert_eq!(msg.port, 40000);
    let reply = msg.msg.into_map_reply().unwrap();
    assert_eq!(reply.nonce, 0xdeadbeef);
    let record = &reply.records[0];
    assert_eq!(record.action, MapReplyAction::NativelyForward);
    assert_eq!(record.ttl, MapServerNode::NEGATIVE_TTL);
    assert_eq!(record.eid_prefix, eid_prefix);
}

#[test]
fn test_enc_map_request_proxy() {
    let mut test = instance();
    test.register_etr(true);

    let eid_prefix = EidPrefix::new(None, net!("37.77.56.33/32"));
    test.udp_rx(0, itr_source(), enc_map_request(eid_prefix, false));

    let msg = test.expect_tx();
    assert_eq!(msg.dst, vec![itr_rloc()]);
    let reply = msg.msg.into_map_reply().unwrap();
    let record = &reply.records[0];
    assert!(!record.authoritative);
    assert_eq!(record.locators[0].address, etr_rloc());
}

#[test]
fn test_enc_map_request_forward() {
    let mut test = instance();
    test.register_etr(false);

    let eid_prefix = EidPrefix::new(None, net!("37.77.56.33/32"));
    let request = enc_map_request(eid_prefix, false);
    test.udp_rx(0, itr_source(), request.clone());

    // The request is passed on, still encapsulated, to the ETR.
    let msg = test.expect_tx();
    assert_eq!(msg.dst, vec![etr_rloc()]);
    assert_eq!(msg.port, 4342);
    assert_eq!(msg.msg, request);
}

#[test]
fn test_enc_map_request_dropped() {
    let mut test = instance();

    // Security bit set.
    let eid_prefix = EidPrefix::new(None, net!("37.77.56.33/32"));
    let mut ecm = enc_map_request(eid_prefix, false).into_ecm().unwrap();
    ecm.security = true;
    test.udp_rx(0, itr_source(), ecm.into());
    test.expect_no_tx();

    // Not a Map-Request.
    let notify = MapNotify {
        for_rtr: false,
        nonce: 1,
        key_id: KeyId::None,
        auth_data: vec![],
        records: vec![],
        xtr_id_present: false,
        xtr_id: 0,
        site_id: 0,
    };
    let ecm = Ecm::new(
        notify.into(),
        itr_source(),
        sockaddr("37.77.56.33:4342"),
        64,
    );
    test.udp_rx(0, itr_source(), ecm.into());
    test.expect_no_tx();

    // Not covered by a Map-Server.
    let eid_prefix = EidPrefix::new(None, net!("37.77.57.1/32"));
    test.udp_rx(0, itr_source(), enc_map_request(eid_prefix, false));
    test.expect_no_tx();
}

//
// DDT.
//

#[test]
fn test_ddt_referral() {
    let mut test = instance();
    let eid_prefix = EidPrefix::new(None, net!("37.77.57.0/30"));
    test.udp_rx(0, itr_source(), enc_map_request(eid_prefix, true));

    let msg = test.expect_tx();
    assert_eq!(msg.socket, Some(0));
    assert_eq!(msg.dst, vec![itr_rloc()]);
    assert_eq!(msg.port, 40000);
    let referral = msg.msg.into_map_referral().unwrap();
    assert_eq!(referral.nonce, 0xdeadbeef);
    assert_eq!(referral.records[0].action, ReferralAction::DelegationHole);
    assert_eq!(referral.records[0].eid_prefix, eid_prefix);

    let eid_prefix = EidPrefix::new(None, net!("10.1.0.0/16"));
    test.udp_rx(0, itr_source(), enc_map_request(eid_prefix, true));
    let referral = test.expect_tx().msg.into_map_referral().unwrap();
    assert_eq!(referral.records[0].action, ReferralAction::NodeReferral);
    assert_eq!(referral.records[0].locators.len(), 2);
}

//
// ETR.
//

#[test]
fn test_map_request_origin() {
    let mut test = instance();
    let eid_prefix = EidPrefix::new(None, net!("100.64.1.5/32"));
    let request = map_request(eid_prefix);
    test.udp_rx(0, itr_source(), request.into());

    let msg = test.expect_tx();
    assert_eq!(msg.dst, vec![itr_rloc()]);
    assert_eq!(msg.port, 40000);
    let reply = msg.msg.into_map_reply().unwrap();
    assert_eq!(reply.nonce, 0xdeadbeef);
    let record = &reply.records[0];
    assert_eq!(record.eid_prefix.prefix, net!("100.64.1.0/24"));
    assert!(record.authoritative);
    let addrs = record
        .locators
        .iter()
        .map(|locator| locator.address)
        .collect::<Vec<_>>();
    assert_eq!(addrs, vec![local_rloc(), ip!("198.51.100.1")]);
    assert!(record.locators[0].flags.contains(LocatorFlags::LOCAL));

    // Not an origin prefix.
    test.udp_rx(0, itr_source(), map_request(ms_eid()).into());
    test.expect_no_tx();
}

#[test]
fn test_rtr_update() {
    let mut test = instance();
    let rtrs = BTreeSet::from([ip!("198.51.100.7")]);
    let msg = RtrUpdateMsg {
        instance_id: 0,
        prefix: net!("100.64.1.0/24"),
        peer: ms_local(),
        rtrs,
    };
    test.instance
        .process_protocol_msg(ProtocolInputMsg::RtrUpdate(msg));

    // The local locator is now advertised through the RTR.
    let eid_prefix = EidPrefix::new(None, net!("100.64.1.5/32"));
    test.udp_rx(0, itr_source(), map_request(eid_prefix).into());
    let reply = test.expect_tx().msg.into_map_reply().unwrap();
    let addrs = reply.records[0]
        .locators
        .iter()
        .map(|locator| locator.address)
        .collect::<Vec<_>>();
    assert_eq!(addrs, vec![ip!("198.51.100.7"), ip!("198.51.100.1")]);
}

//
// Exchanges.
//

#[test]
fn test_exchange_delivery() {
    let mut test = instance();
    let (responder, mut reply_rx) = oneshot::channel();
    let msg = ExchangeMsg::Register {
        nonce: 0x0a0b0c0d,
        sources: vec![ms_local()],
        responder,
    };
    test.instance
        .process_protocol_msg(ProtocolInputMsg::Exchange(msg));
    assert_eq!(test.instance.exchanges.len(), 1);

    let notify = MapNotify {
        for_rtr: false,
        nonce: 0x0a0b0c0d,
        key_id: KeyId::None,
        auth_data: vec![],
        records: vec![],
        xtr_id_present: false,
        xtr_id: 0,
        site_id: 0,
    };

    // Unexpected source: ignored.
    test.udp_rx(0, itr_source(), notify.clone().into());
    assert!(reply_rx.try_recv().is_err());
    assert_eq!(test.instance.exchanges.len(), 1);

    let source = SocketAddr::new(ms_local(), 4342);
    test.udp_rx(0, source, notify.clone().into());
    let reply = reply_rx.try_recv().unwrap();
    assert_eq!(reply.source, source);
    assert_eq!(reply.destination, ms_local());
    assert_eq!(reply.message, Message::MapNotify(notify));
    assert!(test.instance.exchanges.is_empty());
    test.expect_no_tx();
}

#[test]
fn test_exchange_cancel() {
    let mut test = instance();
    let (responder, mut reply_rx) = oneshot::channel();
    let msg = ExchangeMsg::Register {
        nonce: 7,
        sources: vec![ms_local()],
        responder,
    };
    test.instance
        .process_protocol_msg(ProtocolInputMsg::Exchange(msg));
    let msg = ExchangeMsg::Cancel { nonce: 7 };
    test.instance
        .process_protocol_msg(ProtocolInputMsg::Exchange(msg));

    assert!(test.instance.exchanges.is_empty());
    assert!(reply_rx.try_recv().is_err());
}

#[test]
fn test_decode_error() {
    let mut test = instance();
    let msg = UdpRxMsg {
        socket: 0,
        source: itr_source(),
        destination: ms_local(),
        msg: Err(DecodeError::ReadOutOfBounds),
    };
    test.instance
        .process_protocol_msg(ProtocolInputMsg::UdpRx(msg));
    test.expect_no_tx();
}

//
// Destination selection.
//

#[test]
fn test_select_destination() {
    let sockets = [sockaddr("192.0.2.1:4342"), sockaddr("[2001:db8::1]:4342")];

    // First destination matching a socket's address family.
    let dst = [ip!("2001:db8::2"), ip!("192.0.2.2")];
    assert_eq!(
        select_destination(&sockets, None, &dst),
        Some((1, ip!("2001:db8::2")))
    );

    // Fixed socket.
    assert_eq!(
        select_destination(&sockets, Some(0), &dst),
        Some((0, ip!("192.0.2.2")))
    );

    // No usable destination.
    assert_eq!(select_destination(&sockets[..1], None, &dst[..1]), None);
    assert_eq!(select_destination(&sockets, Some(5), &dst), None);
    assert_eq!(select_destination(&sockets, None, &[]), None);
}
