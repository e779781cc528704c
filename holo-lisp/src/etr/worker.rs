//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use holo_utils::ip::IpAddrExt;
use holo_utils::{Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};

use crate::config::{LocatorCfg, MapServerPeerCfg};
use crate::debug::Debug;
use crate::error::{Error, NotifyError};
use crate::etr::{OriginNode, get_etr_locators};
use crate::exchange::ExchangeReply;
use crate::network;
use crate::packet::auth::{insert_auth, verify_auth};
use crate::packet::{
    Ecm, EidPrefix, InfoMessage, LISP_CONTROL_PORT, LocatorRecord,
    MapNotify, MapRegister, MapReplyAction, MappingRecord, NatInfo,
};
use crate::tasks::messages::input::{ExchangeMsg, RtrUpdateMsg};
use crate::tasks::messages::output::UdpTxMsg;

// Time between two wake-ups of an idle worker.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(5);
// Maximum time between two NAT checks.
pub const NAT_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);
// Maximum time between two registrations.
pub const REGISTER_INTERVAL: Duration = Duration::from_secs(60);
// Time to wait for a reply before sending the request again.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(1);
// Number of times a request is sent before giving up.
pub const MAX_ATTEMPTS: usize = 3;
// TTL of the inner IP header of encapsulated Map-Registers.
const ECM_TTL: u8 = 63;

// Messages sent to a worker by the instance.
#[derive(Debug)]
pub enum WorkerMsg {
    // The set of RTRs in use by the Origin node changed.
    LocatorsChanged { rtrs: BTreeSet<IpAddr> },
    Stop,
}

// Registration worker for one (Origin node, Map-Server) pair.
#[derive(Debug)]
pub struct Worker {
    pub ctx: WorkerCtx,
    pub state: PeerRegistrationState,
    pub need_new_registration: bool,
    channels: WorkerChannels,
}

#[derive(Clone, Debug)]
pub struct WorkerCtx {
    pub eid_prefix: EidPrefix,
    pub peer: MapServerPeerCfg,
    pub locators: Vec<LocatorCfg>,
    pub local_addrs: Vec<IpAddr>,
    // RTRs in use by all workers of the same Origin node.
    pub rtrs: BTreeSet<IpAddr>,
    pub xtr_id: u128,
    pub site_id: u64,
    pub map_notify_probability: f64,
}

#[derive(Clone, Debug)]
pub struct WorkerChannels {
    pub exchange: Sender<ExchangeMsg>,
    pub rtr_update: Sender<RtrUpdateMsg>,
    pub udp_tx: UnboundedSender<UdpTxMsg>,
}

#[derive(Debug, Default)]
pub struct PeerRegistrationState {
    pub last_nat_check: Option<Instant>,
    pub last_registration: Option<Instant>,
    pub last_registration_ok: bool,
    // RTRs used for the last registration.
    pub rtrs: BTreeSet<IpAddr>,
    pub last_nonce: Option<u64>,
    pub last_notify: Option<Instant>,
    // NAT information from the last Info-Reply, kept only when RTRs are to
    // be used.
    pub nat_info: Option<NatInfo>,
}

// The worker was asked to stop.
#[derive(Debug)]
struct Stopped;

// ===== impl Worker =====

impl Worker {
    pub fn new(ctx: WorkerCtx, channels: WorkerChannels) -> Worker {
        Worker {
            ctx,
            state: Default::default(),
            need_new_registration: false,
            channels,
        }
    }

    async fn wake(
        &mut self,
        inbox: &mut UnboundedReceiver<WorkerMsg>,
    ) -> Result<(), Stopped> {
        let now = Instant::now();

        // Refresh NAT detection.
        if !self.state.last_registration_ok
            || elapsed(self.state.last_nat_check, NAT_CHECK_INTERVAL, now)
        {
            self.state.nat_info = self.nat_check(inbox).await?;
            self.state.last_nat_check = Some(now);

            // Force a Map-Notify on the next registration.
            self.state.last_registration_ok = false;
        }

        if !self.state.last_registration_ok
            || self.need_new_registration
            || elapsed(self.state.last_registration, REGISTER_INTERVAL, now)
        {
            self.need_new_registration = false;
            let force_map_notify = !self.state.last_registration_ok;
            self.state.last_registration_ok =
                self.register(inbox, force_map_notify).await?;
            self.state.last_registration = Some(now);

            // Report the RTRs in use.
            let rtrs = self.nat_rtrs();
            if rtrs != self.state.rtrs {
                self.state.rtrs = rtrs.clone();
                let msg = RtrUpdateMsg {
                    instance_id: self.ctx.eid_prefix.iid(),
                    prefix: self.ctx.eid_prefix.prefix,
                    peer: self.ctx.peer.address,
                    rtrs,
                };
                let _ = self.channels.rtr_update.send(msg).await;
            }
        }

        Ok(())
    }

    // Sends an Info-Request to the Map-Server to find out whether we're
    // behind a NAT. Returns the NAT information only if RTRs should be used.
    async fn nat_check(
        &mut self,
        inbox: &mut UnboundedReceiver<WorkerMsg>,
    ) -> Result<Option<NatInfo>, Stopped> {
        let peer = self.ctx.peer.clone();
        if peer.use_rtr == Some(false) {
            return Ok(None);
        }

        Debug::NatCheck.log();
        let mut request = InfoMessage {
            nonce: rand::random(),
            key_id: peer.key_id,
            auth_data: vec![],
            ttl: InfoMessage::DFLT_TTL,
            eid_prefix: self.ctx.eid_prefix,
            reply: None,
        };
        insert_auth(&mut request, peer.key.as_bytes());
        let msg = UdpTxMsg {
            socket: None,
            dst: vec![peer.address],
            port: LISP_CONTROL_PORT,
            msg: request.clone().into(),
        };

        let reply = self
            .exchange(inbox, request.nonce, vec![peer.address], msg)
            .await?
            .and_then(|reply| self.process_info_reply(&request, reply));
        let Some(nat_info) = reply else {
            Error::EtrNatCheckNoReply(peer.address).log();
            if peer.use_rtr == Some(true) {
                Error::EtrRtrNotAvailable(peer.address).log();
            }
            return Ok(None);
        };

        let behind_nat = nat_info.private_etr_rloc
            != Some(nat_info.global_etr_rloc)
            || nat_info.etr_port != LISP_CONTROL_PORT;
        if behind_nat {
            Debug::NatDetected(&nat_info).log();
        } else {
            Debug::NatNotDetected.log();
        }

        if behind_nat || peer.use_rtr == Some(true) {
            Ok(Some(nat_info))
        } else {
            Ok(None)
        }
    }

    // Validates an Info-Reply, filling in our private RLOC.
    fn process_info_reply(
        &self,
        request: &InfoMessage,
        reply: ExchangeReply,
    ) -> Option<NatInfo> {
        let info = reply.message.into_info().ok()?;
        if info.nonce != request.nonce
            || !verify_auth(&info, self.ctx.peer.key.as_bytes())
        {
            return None;
        }
        let mut nat_info = info.reply?;

        // Use the address the reply was received on, falling back to the
        // routing table when unknown.
        let private = if reply.destination.is_unspecified() {
            match network::source_address(self.ctx.peer.address) {
                Ok(addr) => addr,
                Err(_) => {
                    Error::EtrNoSourceAddress(self.ctx.peer.address).log();
                    return None;
                }
            }
        } else {
            reply.destination
        };
        nat_info.private_etr_rloc = Some(private);

        Some(nat_info)
    }

    // Registers our prefix at the Map-Server. Returns whether the
    // registration succeeded.
    async fn register(
        &mut self,
        inbox: &mut UnboundedReceiver<WorkerMsg>,
        force_map_notify: bool,
    ) -> Result<bool, Stopped> {
        let peer = self.ctx.peer.clone();
        let rtrs = self.nat_rtrs();

        // Build Map-Register.
        let mut all_rtrs = self.ctx.rtrs.clone();
        all_rtrs.extend(rtrs.iter().copied());
        let locators = get_etr_locators(
            &self.ctx.locators,
            &self.ctx.local_addrs,
            &all_rtrs,
        );
        let want_map_notify = force_map_notify
            || !rtrs.is_empty()
            || rand::random::<f64>() < self.ctx.map_notify_probability;
        let register = self.map_register(locators, want_map_notify, &rtrs);
        self.state.last_nonce = Some(register.nonce);

        let Some(msg) = self.register_msg(&register, &rtrs) else {
            return Ok(false);
        };

        Debug::RegisterSend(want_map_notify).log();
        if !want_map_notify {
            let _ = self.channels.udp_tx.send(msg);
            return Ok(true);
        }

        // Wait for the Map-Notify.
        let mut sources = vec![peer.address];
        sources.extend(rtrs.iter().copied());
        let Some(reply) =
            self.exchange(inbox, register.nonce, sources, msg).await?
        else {
            Error::EtrRegisterNoNotify(peer.address).log();
            return Ok(false);
        };
        let Ok(notify) = reply.message.into_map_notify() else {
            Error::EtrRegisterNoNotify(peer.address).log();
            return Ok(false);
        };
        if let Err(error) =
            validate_notify(&register, &notify, peer.key.as_bytes())
        {
            Error::EtrInvalidNotify(peer.address, error).log();
            return Ok(false);
        }

        Debug::RegisterConfirmed.log();
        self.state.last_notify = Some(Instant::now());
        Ok(true)
    }

    fn map_register(
        &self,
        locators: Vec<LocatorRecord>,
        want_map_notify: bool,
        rtrs: &BTreeSet<IpAddr>,
    ) -> MapRegister {
        let record = MappingRecord::new(
            OriginNode::RECORD_TTL,
            MapReplyAction::NoAction,
            true,
            0,
            self.ctx.eid_prefix,
            locators,
        );
        let mut register = MapRegister {
            proxy_map_reply: self.ctx.peer.proxy_map_reply,
            for_rtr: !rtrs.is_empty(),
            want_map_notify,
            nonce: rand::random(),
            key_id: self.ctx.peer.key_id,
            auth_data: vec![],
            records: vec![record],
            xtr_id_present: self.ctx.xtr_id != 0 || self.ctx.site_id != 0,
            xtr_id: self.ctx.xtr_id,
            site_id: self.ctx.site_id,
        };
        insert_auth(&mut register, self.ctx.peer.key.as_bytes());
        register
    }

    // Returns the message to send for the given Map-Register: sent as is to
    // the Map-Server, or encapsulated and sent through the RTRs when behind
    // a NAT.
    fn register_msg(
        &self,
        register: &MapRegister,
        rtrs: &BTreeSet<IpAddr>,
    ) -> Option<UdpTxMsg> {
        let map_server = self.ctx.peer.address;
        let private = self
            .state
            .nat_info
            .as_ref()
            .and_then(|nat_info| nat_info.private_etr_rloc);
        let (Some(private), false) = (private, rtrs.is_empty()) else {
            return Some(UdpTxMsg {
                socket: None,
                dst: vec![map_server],
                port: LISP_CONTROL_PORT,
                msg: register.clone().into(),
            });
        };

        if private.address_family() != map_server.address_family() {
            Error::EtrAddressFamilyMismatch(private, map_server).log();
            return None;
        }
        let ecm = Ecm::new(
            register.clone().into(),
            SocketAddr::new(private, LISP_CONTROL_PORT),
            SocketAddr::new(map_server, LISP_CONTROL_PORT),
            ECM_TTL,
        );
        Some(UdpTxMsg {
            socket: None,
            dst: rtrs.iter().copied().collect(),
            port: LISP_CONTROL_PORT,
            msg: ecm.into(),
        })
    }

    // Sends a request and waits for the matching reply, sending the request
    // again on timeout.
    async fn exchange(
        &mut self,
        inbox: &mut UnboundedReceiver<WorkerMsg>,
        nonce: u64,
        sources: Vec<IpAddr>,
        msg: UdpTxMsg,
    ) -> Result<Option<ExchangeReply>, Stopped> {
        let (responder, mut reply_rx) = oneshot::channel();
        let register = ExchangeMsg::Register {
            nonce,
            sources,
            responder,
        };
        if self.channels.exchange.send(register).await.is_err() {
            return Err(Stopped);
        }

        for _ in 0..MAX_ATTEMPTS {
            let _ = self.channels.udp_tx.send(msg.clone());
            let deadline = Instant::now() + REPLY_TIMEOUT;
            loop {
                tokio::select! {
                    reply = &mut reply_rx => {
                        return Ok(reply.ok());
                    }
                    _ = sleep_until(deadline) => break,
                    msg = inbox.recv() => {
                        if let Err(stopped) = self.process_inbox_msg(msg) {
                            self.cancel_exchange(nonce).await;
                            return Err(stopped);
                        }
                    }
                }
            }
        }

        self.cancel_exchange(nonce).await;
        Ok(None)
    }

    async fn cancel_exchange(&self, nonce: u64) {
        let cancel = ExchangeMsg::Cancel { nonce };
        let _ = self.channels.exchange.send(cancel).await;
    }

    // Waits until the next wake-up, which happens early if the locators
    // change.
    async fn idle(
        &mut self,
        inbox: &mut UnboundedReceiver<WorkerMsg>,
    ) -> Result<(), Stopped> {
        let deadline = Instant::now() + IDLE_INTERVAL;
        tokio::select! {
            _ = sleep_until(deadline) => Ok(()),
            msg = inbox.recv() => self.process_inbox_msg(msg),
        }
    }

    fn process_inbox_msg(
        &mut self,
        msg: Option<WorkerMsg>,
    ) -> Result<(), Stopped> {
        match msg {
            Some(WorkerMsg::LocatorsChanged { rtrs }) => {
                self.ctx.rtrs = rtrs;
                self.need_new_registration = true;
                Ok(())
            }
            Some(WorkerMsg::Stop) | None => Err(Stopped),
        }
    }

    // RTRs to register through, as learned from the last NAT check.
    fn nat_rtrs(&self) -> BTreeSet<IpAddr> {
        self.state
            .nat_info
            .as_ref()
            .map(|nat_info| nat_info.rtr_rlocs.iter().copied().collect())
            .unwrap_or_default()
    }
}

// ===== global functions =====

// Runs the registration worker until it's told to stop.
pub async fn run(mut worker: Worker, mut inbox: UnboundedReceiver<WorkerMsg>) {
    Debug::WorkerStart.log();
    loop {
        if worker.wake(&mut inbox).await.is_err()
            || worker.idle(&mut inbox).await.is_err()
        {
            break;
        }
    }
    Debug::WorkerStop.log();
}

// Checks that a Map-Notify acknowledges the given Map-Register.
pub fn validate_notify(
    register: &MapRegister,
    notify: &MapNotify,
    key: &[u8],
) -> Result<(), NotifyError> {
    if notify.nonce != register.nonce {
        return Err(NotifyError::NonceMismatch);
    }
    if notify.key_id != register.key_id {
        return Err(NotifyError::KeyIdMismatch);
    }
    if !verify_auth(notify, key) {
        return Err(NotifyError::AuthFailed);
    }
    if notify.xtr_id != 0 && notify.xtr_id != register.xtr_id {
        return Err(NotifyError::XtrIdMismatch);
    }
    if notify.site_id != 0 && notify.site_id != register.site_id {
        return Err(NotifyError::SiteIdMismatch);
    }
    if notify.records.len() != register.records.len() {
        return Err(NotifyError::RecordCountMismatch);
    }

    for sent in &register.records {
        if !notify.records.iter().any(|record| record_matches(sent, record)) {
            return Err(NotifyError::RecordMismatch(sent.eid_prefix));
        }
    }

    Ok(())
}

// ===== helper functions =====

fn elapsed(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    match last {
        Some(last) => now > last + interval,
        None => true,
    }
}

fn record_matches(sent: &MappingRecord, record: &MappingRecord) -> bool {
    sent.eid_prefix == record.eid_prefix
        && sent.ttl == record.ttl
        && sent.action == record.action
        && sent.map_version == record.map_version
        && sent.locators.len() == record.locators.len()
        && sent.locators.iter().all(|sent| {
            record
                .locators
                .iter()
                .any(|locator| locator_matches(sent, locator))
        })
}

fn locator_matches(sent: &LocatorRecord, locator: &LocatorRecord) -> bool {
    sent.priority == locator.priority
        && sent.weight == locator.weight
        && sent.m_priority == locator.m_priority
        && sent.m_weight == locator.m_weight
        && sent.is_reachable() == locator.is_reachable()
        && sent.address == locator.address
}
