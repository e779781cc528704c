//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};

use ipnetwork::IpNetwork;
use tracing::{debug, debug_span};

use crate::map_server::SourceId;
use crate::packet::{EidPrefix, Message, NatInfo, ReferralAction};
use crate::tasks::messages::output::UdpTxMsg;

// LISP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceStop,
    NodeAdd(u32, &'a IpNetwork, &'static str),
    PduRx(&'a SocketAddr, &'a Message),
    PduTx(&'a UdpTxMsg),
    DdtReferral(&'a EidPrefix, &'a ReferralAction),
    MapRequestAnswer(&'a EidPrefix, &'a SocketAddr),
    MsRegistrationUpdate(&'a EidPrefix, &'a SourceId, &'a String),
    MsRegistrationExpire(&'a IpNetwork, &'a SourceId),
    MsCleanup(usize),
    WorkerStart,
    WorkerStop,
    NatCheck,
    NatDetected(&'a NatInfo),
    NatNotDetected,
    RegisterSend(bool),
    RegisterConfirmed,
    RtrSetChange(&'a IpNetwork, &'a BTreeSet<IpAddr>),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                // Parent span(s): lisp-instance
                debug!("{}", self);
            }
            Debug::NodeAdd(instance_id, prefix, kind) => {
                // Parent span(s): lisp-instance
                debug!(%instance_id, %prefix, %kind, "{}", self);
            }
            Debug::PduRx(source, msg) => {
                // Parent span(s): lisp-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("input", %source).in_scope(|| {
                        let data = serde_json::to_string(&msg).unwrap();
                        debug!(%data, "{}", self);
                    });
                });
            }
            Debug::PduTx(msg) => {
                // Parent span(s): lisp-instance
                debug_span!("network").in_scope(|| {
                    debug_span!("output", destinations = ?msg.dst).in_scope(
                        || {
                            let data =
                                serde_json::to_string(&msg.msg).unwrap();
                            debug!(%data, "{}", self);
                        },
                    );
                });
            }
            Debug::DdtReferral(eid_prefix, action) => {
                // Parent span(s): lisp-instance
                debug!(%eid_prefix, ?action, "{}", self);
            }
            Debug::MapRequestAnswer(eid_prefix, source) => {
                // Parent span(s): lisp-instance
                debug!(%eid_prefix, %source, "{}", self);
            }
            Debug::MsRegistrationUpdate(eid_prefix, source_id, locators) => {
                // Parent span(s): lisp-instance
                debug!(
                    %eid_prefix, source = %source_id, %locators,
                    "{}", self
                );
            }
            Debug::MsRegistrationExpire(prefix, source_id) => {
                // Parent span(s): lisp-instance
                debug!(%prefix, source = %source_id, "{}", self);
            }
            Debug::MsCleanup(removed) => {
                // Parent span(s): lisp-instance
                debug!(%removed, "{}", self);
            }
            Debug::WorkerStart
            | Debug::WorkerStop
            | Debug::NatCheck
            | Debug::NatNotDetected
            | Debug::RegisterConfirmed => {
                // Parent span(s): etr-worker
                debug!("{}", self);
            }
            Debug::NatDetected(info) => {
                // Parent span(s): etr-worker
                debug!(
                    global = %info.global_etr_rloc,
                    port = %info.etr_port,
                    rtrs = ?info.rtr_rlocs,
                    "{}", self
                );
            }
            Debug::RegisterSend(want_map_notify) => {
                // Parent span(s): etr-worker
                debug!(%want_map_notify, "{}", self);
            }
            Debug::RtrSetChange(prefix, rtrs) => {
                // Parent span(s): lisp-instance
                debug!(%prefix, ?rtrs, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::NodeAdd(..) => {
                write!(f, "node added")
            }
            Debug::PduRx(..) => {
                write!(f, "message")
            }
            Debug::PduTx(..) => {
                write!(f, "message")
            }
            Debug::DdtReferral(..) => {
                write!(f, "sending Map-Referral")
            }
            Debug::MapRequestAnswer(..) => {
                write!(f, "answering Map-Request")
            }
            Debug::MsRegistrationUpdate(..) => {
                write!(f, "registration updated")
            }
            Debug::MsRegistrationExpire(..) => {
                write!(f, "registration expired")
            }
            Debug::MsCleanup(..) => {
                write!(f, "registration cleanup")
            }
            Debug::WorkerStart => {
                write!(f, "starting worker")
            }
            Debug::WorkerStop => {
                write!(f, "stopping worker")
            }
            Debug::NatCheck => {
                write!(f, "checking for NAT")
            }
            Debug::NatDetected(..) => {
                write!(f, "NAT detected")
            }
            Debug::NatNotDetected => {
                write!(f, "NAT not detected")
            }
            Debug::RegisterSend(..) => {
                write!(f, "sending Map-Register")
            }
            Debug::RegisterConfirmed => {
                write!(f, "registration confirmed")
            }
            Debug::RtrSetChange(..) => {
                write!(f, "RTR set changed")
            }
        }
    }
}
