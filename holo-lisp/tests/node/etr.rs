//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use const_addrs::{ip, net};
use holo_lisp::config::{LocatorCfg, MapServerPeerCfg};
use holo_lisp::error::NotifyError;
use holo_lisp::etr::worker::{
    self, MAX_ATTEMPTS, REGISTER_INTERVAL, REPLY_TIMEOUT, Worker,
    WorkerChannels, WorkerCtx, WorkerMsg, validate_notify,
};
use holo_lisp::etr::{OriginNode, get_etr_locators};
use holo_lisp::exchange::ExchangeReply;
use holo_lisp::map_server::MapServerNode;
use holo_lisp::packet::auth::{insert_auth, verify_auth};
use holo_lisp::packet::{
    EidPrefix, KeyId, LocatorFlags, MapRegister, MapReplyAction, MapRequest,
    Message,
};
use holo_lisp::tasks::messages::input::{ExchangeMsg, RtrUpdateMsg};
use holo_lisp::tasks::messages::output::UdpTxMsg;
use holo_utils::{Receiver, Responder, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{MS_KEY, etr_rloc, map_register, mapping_record};

//
// Helper functions.
//

fn locator(address: IpAddr, priority: u8) -> LocatorCfg {
    LocatorCfg {
        address,
        priority,
        weight: 100,
        m_priority: 255,
        m_weight: 0,
    }
}

fn map_server_addr() -> IpAddr {
    ip!("192.0.2.100")
}

fn origin_eid() -> EidPrefix {
    EidPrefix::new(None, net!("37.77.56.32/31"))
}

fn rtr() -> IpAddr {
    ip!("198.51.100.7")
}

// Map-Server the workers register with, as seen from the ETR.
fn map_server() -> MapServerNode {
    let mut ms = MapServerNode::new(KeyId::HmacSha1_96, MS_KEY);
    ms.rtrs = vec![rtr()];
    ms
}

struct TestWorker {
    inbox: UnboundedSender<WorkerMsg>,
    exchange: Receiver<ExchangeMsg>,
    rtr_update: Receiver<RtrUpdateMsg>,
    udp_tx: UnboundedReceiver<UdpTxMsg>,
    task: JoinHandle<()>,
}

fn spawn_worker(use_rtr: Option<bool>) -> TestWorker {
    let (exchangep, exchangec) = mpsc::channel(4);
    let (rtr_updatep, rtr_updatec) = mpsc::channel(4);
    let (udp_txp, udp_txc) = mpsc::unbounded_channel();
    let (inboxp, inboxc) = mpsc::unbounded_channel();

    let ctx = WorkerCtx {
        eid_prefix: origin_eid(),
        peer: MapServerPeerCfg {
            address: map_server_addr(),
            key_id: KeyId::HmacSha1_96,
            key: "K".to_owned(),
            proxy_map_reply: false,
            use_rtr,
        },
        locators: vec![locator(etr_rloc(), 1), locator(ip!("203.0.113.9"), 2)],
        local_addrs: vec![etr_rloc()],
        rtrs: Default::default(),
        xtr_id: 0x1234,
        site_id: 1,
        map_notify_probability: 0.0,
    };
    let channels = WorkerChannels {
        exchange: exchangep,
        rtr_update: rtr_updatep,
        udp_tx: udp_txp,
    };
    let worker = Worker::new(ctx, channels);
    let task = tokio::spawn(worker::run(worker, inboxc));

    TestWorker {
        inbox: inboxp,
        exchange: exchangec,
        rtr_update: rtr_updatec,
        udp_tx: udp_txc,
        task,
    }
}

impl TestWorker {
    // Waits for the next exchange registration.
    async fn expect_exchange(
        &mut self,
    ) -> (u64, Vec<IpAddr>, Responder<ExchangeReply>) {
        match self.exchange.recv().await.unwrap() {
            ExchangeMsg::Register {
                nonce,
                sources,
                responder,
            } => (nonce, sources, responder),
            msg => panic!("unexpected exchange message: {:?}", msg),
        }
    }

    async fn expect_cancel(&mut self) -> u64 {
        match self.exchange.recv().await.unwrap() {
            ExchangeMsg::Cancel { nonce } => nonce,
            msg => panic!("unexpected exchange message: {:?}", msg),
        }
    }

    async fn expect_tx(&mut self) -> UdpTxMsg {
        self.udp_tx.recv().await.unwrap()
    }

    // Answers the NAT check as a Map-Server would, with the ETR appearing
    // at `global`.
    async fn answer_nat_check(&mut self, global: SocketAddr) {
        let (nonce, sources, responder) = self.expect_exchange().await;
        assert_eq!(sources, vec![map_server_addr()]);

        let msg = self.expect_tx().await;
        assert_eq!(msg.dst, vec![map_server_addr()]);
        assert_eq!(msg.port, 4342);
        let request = msg.msg.into_info().unwrap();
        assert_eq!(request.nonce, nonce);
        assert!(!request.is_reply());
        assert_eq!(request.eid_prefix, origin_eid());
        assert!(verify_auth(&request, MS_KEY));

        let reply =
            map_server().info_reply(&request, global, map_server_addr());
        let _ = responder.send(ExchangeReply {
            source: SocketAddr::new(map_server_addr(), 4342),
            destination: etr_rloc(),
            message: reply.into(),
        });
    }

    // Acknowledges the next Map-Register, returning it.
    async fn answer_register(
        &mut self,
        expected_sources: Vec<IpAddr>,
    ) -> (UdpTxMsg, MapRegister) {
        let (nonce, sources, responder) = self.expect_exchange().await;
        assert_eq!(sources, expected_sources);

        let msg = self.expect_tx().await;
        let register = match &msg.msg {
            Message::MapRegister(register) => register.clone(),
            Message::Ecm(ecm) => {
                ecm.message.as_map_register().unwrap().clone()
            }
            msg => panic!("unexpected message: {:?}", msg),
        };
        assert_eq!(register.nonce, nonce);
        assert!(register.want_map_notify);
        assert!(verify_auth(&register, MS_KEY));

        let notify =
            map_server().map_notify(&register, register.records.clone());
        let _ = responder.send(ExchangeReply {
            source: SocketAddr::new(map_server_addr(), 4342),
            destination: etr_rloc(),
            message: notify.into(),
        });

        (msg, register)
    }

    async fn stop(self) {
        let _ = self.inbox.send(WorkerMsg::Stop);
        self.task.await.unwrap();
    }
}

fn locator_addrs(register: &MapRegister) -> Vec<IpAddr> {
    register.records[0]
        .locators
        .iter()
        .map(|locator| locator.address)
        .collect()
}

//
// Locator computation.
//

#[test]
fn test_etr_locators() {
    let locators = vec![
        locator(etr_rloc(), 1),
        locator(ip!("198.51.100.1"), 2),
        locator(ip!("0.0.0.0"), 3),
    ];
    let records =
        get_etr_locators(&locators, &[etr_rloc()], &Default::default());

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].address, etr_rloc());
    assert_eq!(
        records[0].flags,
        LocatorFlags::LOCAL | LocatorFlags::REACHABLE
    );
    assert_eq!(records[1].address, ip!("198.51.100.1"));
    assert_eq!(records[1].flags, LocatorFlags::REACHABLE);
    assert_eq!(records[1].priority, 2);
}

#[test]
fn test_etr_locators_nat() {
    let locators = vec![
        locator(etr_rloc(), 1),
        locator(ip!("192.0.2.2"), 1),
        locator(ip!("198.51.100.1"), 2),
    ];
    let rtrs = BTreeSet::from([ip!("203.0.113.1"), ip!("203.0.113.2")]);
    let records =
        get_etr_locators(&locators, &[etr_rloc(), ip!("192.0.2.2")], &rtrs);

    let addrs = records
        .iter()
        .map(|record| record.address)
        .collect::<Vec<_>>();
    assert_eq!(
        addrs,
        vec![ip!("203.0.113.1"), ip!("203.0.113.2"), ip!("198.51.100.1")]
    );
    for record in &records[..2] {
        assert_eq!(record.flags, LocatorFlags::REACHABLE);
        assert_eq!(record.priority, 1);
        assert_eq!(record.weight, 100);
    }
}

#[test]
fn test_origin_map_reply() {
    let origin = OriginNode::new(
        vec![locator(etr_rloc(), 1), locator(ip!("198.51.100.1"), 2)],
        vec![],
    );
    let request = MapRequest {
        probe: true,
        nonce: 0x77,
        itr_rlocs: vec![ip!("203.0.113.20")],
        eid_prefixes: vec![origin_eid()],
        ..Default::default()
    };

    let reply =
        origin.map_reply(origin_eid(), &request, etr_rloc(), &[etr_rloc()]);
    assert!(reply.probe);
    assert_eq!(reply.nonce, 0x77);
    let record = &reply.records[0];
    assert_eq!(record.ttl, OriginNode::RECORD_TTL);
    assert_eq!(record.action, MapReplyAction::NoAction);
    assert!(record.authoritative);
    assert!(record.locators[0].flags.contains(LocatorFlags::PROBED));
    assert!(!record.locators[1].flags.contains(LocatorFlags::PROBED));

    let origin = OriginNode::new(vec![], vec![]);
    let reply =
        origin.map_reply(origin_eid(), &request, etr_rloc(), &[etr_rloc()]);
    let record = &reply.records[0];
    assert_eq!(record.action, MapReplyAction::NativelyForward);
    assert!(record.locators.is_empty());
}

#[test]
fn test_origin_update_rtrs() {
    let mut origin = OriginNode::new(vec![locator(etr_rloc(), 1)], vec![]);
    let ms1 = ip!("192.0.2.100");
    let ms2 = ip!("192.0.2.101");

    assert!(origin.update_rtrs(ms1, BTreeSet::from([rtr()])));
    assert!(!origin.update_rtrs(ms2, BTreeSet::from([rtr()])));
    assert!(!origin.update_rtrs(ms1, BTreeSet::new()));
    assert_eq!(origin.rtr_union(), BTreeSet::from([rtr()]));
    assert!(origin.update_rtrs(ms2, BTreeSet::new()));
    assert!(origin.rtr_union().is_empty());
}

//
// Map-Notify validation.
//

#[test]
fn test_validate_notify() {
    let ms = map_server();
    let record = mapping_record(origin_eid(), &[etr_rloc()]);
    let register = map_register(vec![record.clone()], 0x1234, MS_KEY);

    let notify = ms.map_notify(&register, vec![record.clone()]);
    assert_eq!(validate_notify(&register, &notify, MS_KEY), Ok(()));

    // Wrong nonce.
    let mut bad = notify.clone();
    bad.nonce += 1;
    insert_auth(&mut bad, MS_KEY);
    assert_eq!(
        validate_notify(&register, &bad, MS_KEY),
        Err(NotifyError::NonceMismatch)
    );

    // Wrong key.
    assert_eq!(
        validate_notify(&register, &notify, b"other"),
        Err(NotifyError::AuthFailed)
    );

    // Wrong xTR-ID.
    let mut bad = notify.clone();
    bad.xtr_id = 0x9999;
    insert_auth(&mut bad, MS_KEY);
    assert_eq!(
        validate_notify(&register, &bad, MS_KEY),
        Err(NotifyError::XtrIdMismatch)
    );

    // Zero xTR-ID and site-ID are accepted.
    let mut ok = notify.clone();
    ok.xtr_id = 0;
    ok.site_id = 0;
    insert_auth(&mut ok, MS_KEY);
    assert_eq!(validate_notify(&register, &ok, MS_KEY), Ok(()));

    // Missing locator.
    let mut bad = notify.clone();
    bad.records[0].locators[0].address = ip!("192.0.2.99");
    insert_auth(&mut bad, MS_KEY);
    assert_eq!(
        validate_notify(&register, &bad, MS_KEY),
        Err(NotifyError::RecordMismatch(origin_eid()))
    );

    // Missing record.
    let bad = ms.map_notify(&register, vec![]);
    assert_eq!(
        validate_notify(&register, &bad, MS_KEY),
        Err(NotifyError::RecordCountMismatch)
    );
}

//
// Registration worker.
//

#[tokio::test(start_paused = true)]
async fn test_worker_register_no_nat() {
    let mut worker = spawn_worker(None);

    // The ETR isn't behind a NAT.
    worker
        .answer_nat_check(SocketAddr::new(etr_rloc(), 4342))
        .await;

    // First registration asks for a Map-Notify.
    let (msg, register) =
        worker.answer_register(vec![map_server_addr()]).await;
    assert_eq!(msg.dst, vec![map_server_addr()]);
    assert!(!register.for_rtr);
    assert_eq!(register.xtr_id, 0x1234);
    assert_eq!(register.site_id, 1);
    assert_eq!(register.records[0].eid_prefix, origin_eid());
    assert_eq!(
        locator_addrs(&register),
        vec![etr_rloc(), ip!("203.0.113.9")]
    );
    assert!(register.records[0].locators[0].is_local());
    let registered = Instant::now();

    // Periodic registration, without Map-Notify.
    let msg = worker.expect_tx().await;
    assert!(Instant::now() > registered + REGISTER_INTERVAL);
    let register = msg.msg.into_map_register().unwrap();
    assert!(!register.want_map_notify);
    assert!(worker.exchange.try_recv().is_err());
    assert!(worker.rtr_update.try_recv().is_err());

    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_register_nat() {
    let mut worker = spawn_worker(None);

    // The Map-Server sees the ETR at another address and port.
    worker
        .answer_nat_check("203.0.113.50:61000".parse().unwrap())
        .await;

    // Registration goes through the RTR, encapsulated.
    let (msg, register) =
        worker.answer_register(vec![map_server_addr(), rtr()]).await;
    assert_eq!(msg.dst, vec![rtr()]);
    let ecm = msg.msg.into_ecm().unwrap();
    assert_eq!(ecm.source, SocketAddr::new(etr_rloc(), 4342));
    assert_eq!(ecm.destination, SocketAddr::new(map_server_addr(), 4342));
    assert!(register.for_rtr);

    // The private locator is replaced by the RTR.
    assert_eq!(locator_addrs(&register), vec![rtr(), ip!("203.0.113.9")]);
    assert!(!register.records[0].locators[0].is_local());

    // The RTRs in use are reported.
    let update = worker.rtr_update.recv().await.unwrap();
    assert_eq!(update.instance_id, 0);
    assert_eq!(update.prefix, origin_eid().prefix);
    assert_eq!(update.peer, map_server_addr());
    assert_eq!(update.rtrs, BTreeSet::from([rtr()]));

    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_never_use_rtr() {
    let mut worker = spawn_worker(Some(false));

    // No NAT check: the first message is a plain Map-Register.
    let (msg, register) =
        worker.answer_register(vec![map_server_addr()]).await;
    assert_eq!(msg.dst, vec![map_server_addr()]);
    assert!(!register.for_rtr);

    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_no_reply() {
    let mut worker = spawn_worker(None);
    let start = Instant::now();

    // The Info-Request is retransmitted, then given up on.
    let (nonce, _, _responder) = worker.expect_exchange().await;
    for _ in 0..MAX_ATTEMPTS {
        let msg = worker.expect_tx().await;
        assert_eq!(msg.msg.nonce(), Some(nonce));
    }
    assert_eq!(worker.expect_cancel().await, nonce);
    assert!(Instant::now() >= start + REPLY_TIMEOUT * MAX_ATTEMPTS as u32);

    // Same for the Map-Register.
    let (nonce, _, _responder) = worker.expect_exchange().await;
    for _ in 0..MAX_ATTEMPTS {
        let msg = worker.expect_tx().await;
        let register = msg.msg.into_map_register().unwrap();
        assert_eq!(register.nonce, nonce);
        assert!(register.want_map_notify);
    }
    assert_eq!(worker.expect_cancel().await, nonce);

    // The next cycle starts over with a NAT check.
    let (_, _, _responder) = worker.expect_exchange().await;
    let msg = worker.expect_tx().await;
    assert!(msg.msg.as_info().is_some());

    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_invalid_notify() {
    let mut worker = spawn_worker(Some(false));

    // Map-Notify signed with another key.
    let (_, _, responder) = worker.expect_exchange().await;
    let msg = worker.expect_tx().await;
    let register = msg.msg.into_map_register().unwrap();
    let mut notify =
        map_server().map_notify(&register, register.records.clone());
    insert_auth(&mut notify, b"other");
    let _ = responder.send(ExchangeReply {
        source: SocketAddr::new(map_server_addr(), 4342),
        destination: etr_rloc(),
        message: notify.into(),
    });

    // The registration failed: the next one asks for a Map-Notify again.
    let (_, register) =
        worker.answer_register(vec![map_server_addr()]).await;
    assert!(register.want_map_notify);

    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_locators_changed() {
    let mut worker = spawn_worker(Some(false));
    worker.answer_register(vec![map_server_addr()]).await;
    let registered = Instant::now();

    // Another worker of the same node started using an RTR.
    let rtrs = BTreeSet::from([rtr()]);
    worker
        .inbox
        .send(WorkerMsg::LocatorsChanged { rtrs })
        .unwrap();

    let msg = worker.expect_tx().await;
    assert!(Instant::now() < registered + REGISTER_INTERVAL);
    let register = msg.msg.into_map_register().unwrap();
    assert_eq!(locator_addrs(&register), vec![rtr(), ip!("203.0.113.9")]);

    worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_stop_while_waiting() {
    let mut worker = spawn_worker(None);
    let (nonce, _, _responder) = worker.expect_exchange().await;
    let _ = worker.expect_tx().await;

    // The worker withdraws the pending exchange and exits without waiting
    // for the reply.
    worker.inbox.send(WorkerMsg::Stop).unwrap();
    assert_eq!(worker.expect_cancel().await, nonce);
    worker.task.await.unwrap();
}
