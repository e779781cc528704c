//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use holo_utils::ip::IpNetworkExt;
use ipnetwork::IpNetwork;
use tokio::time::Instant;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{Instance, node_eid_prefix};
use crate::map_server::MapRequestAction;
use crate::packet::{
    Ecm, EidPrefix, InfoMessage, LISP_CONTROL_PORT, MapRegister, MapRequest,
    Message,
};
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{ExchangeMsg, RtrUpdateMsg, UdpRxMsg};
use crate::tasks::messages::output::UdpTxMsg;
use crate::tree::{InstanceTree, Node, NodeKind, TreeError};
use crate::{ddt, network};

// ===== global functions =====

pub(crate) fn process_protocol_msg(
    instance: &mut Instance,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        ProtocolInputMsg::UdpRx(msg) => process_udp_msg(instance, msg),
        ProtocolInputMsg::Exchange(msg) => {
            process_exchange_msg(instance, msg);
            Ok(())
        }
        ProtocolInputMsg::RtrUpdate(msg) => {
            process_rtr_update(instance, msg);
            Ok(())
        }
        ProtocolInputMsg::MsCleanup(_) => {
            process_ms_cleanup(instance);
            Ok(())
        }
    }
}

// ===== UDP message receipt =====

pub(crate) fn process_udp_msg(
    instance: &mut Instance,
    msg: UdpRxMsg,
) -> Result<(), Error> {
    let UdpRxMsg {
        socket,
        source,
        destination,
        msg,
    } = msg;
    let msg = msg.map_err(|error| Error::UdpPduDecodeError(source, error))?;

    Debug::PduRx(&source, &msg).log();

    match msg {
        Message::MapRequest(request) => {
            process_map_request(instance, source, destination, &request)
        }
        Message::Ecm(ecm) => {
            process_ecm(instance, socket, source, destination, ecm)
        }
        Message::MapRegister(register) => {
            process_map_register(instance, socket, source, &register);
            Ok(())
        }
        Message::Info(info) if !info.is_reply() => {
            process_info_request(instance, socket, source, destination, &info)
        }
        msg @ (Message::MapNotify(_) | Message::Info(_)) => {
            instance.exchanges.deliver(source, destination, msg)
        }
        msg @ (Message::MapReply(_) | Message::MapReferral(_)) => {
            Err(Error::UnexpectedMessage(source, msg.msg_type()))
        }
    }
}

// Answers a Map-Request for an EID we originate.
fn process_map_request(
    instance: &mut Instance,
    source: SocketAddr,
    destination: IpAddr,
    request: &MapRequest,
) -> Result<(), Error> {
    let Some(eid_prefix) = request.eid_prefixes.first() else {
        return Ok(());
    };

    let node = resolve(&instance.trees, eid_prefix)
        .map_err(|_| Error::EtrNotFound(source, *eid_prefix))?;
    let NodeKind::Origin(origin) = &node.kind else {
        return Err(Error::EtrNotFound(source, *eid_prefix));
    };

    Debug::MapRequestAnswer(eid_prefix, &source).log();
    let reply = origin.map_reply(
        node_eid_prefix(eid_prefix.iid(), node),
        request,
        destination,
        &instance.local_addrs,
    );
    instance.tx.send_udp(UdpTxMsg {
        socket: None,
        dst: request.itr_rlocs.clone(),
        port: source.port(),
        msg: reply.into(),
    });

    Ok(())
}

fn process_ecm(
    instance: &mut Instance,
    socket: usize,
    source: SocketAddr,
    destination: IpAddr,
    ecm: Ecm,
) -> Result<(), Error> {
    if ecm.security {
        return Err(Error::EcmSecurityUnsupported(source));
    }
    let Some(request) = ecm.message.as_map_request() else {
        let msg_type = ecm.message.msg_type();
        return Err(Error::UnexpectedEncapsulatedMessage(source, msg_type));
    };

    if ecm.ddt_originated {
        // Map-Referrals go back to where the request came from, over the
        // same socket.
        let Some(referral) = ddt::map_referral(&instance.trees, request)
        else {
            return Ok(());
        };
        for record in &referral.records {
            Debug::DdtReferral(&record.eid_prefix, &record.action).log();
        }
        instance.tx.send_udp(UdpTxMsg {
            socket: Some(socket),
            dst: vec![source.ip()],
            port: source.port(),
            msg: referral.into(),
        });
        return Ok(());
    }

    process_enc_map_request(instance, source, destination, &ecm, request)
}

// Handles an encapsulated Map-Request sent to us as Map-Server or ETR.
fn process_enc_map_request(
    instance: &mut Instance,
    source: SocketAddr,
    destination: IpAddr,
    ecm: &Ecm,
    request: &MapRequest,
) -> Result<(), Error> {
    let Some(eid_prefix) = request.eid_prefixes.first() else {
        return Ok(());
    };
    let node = resolve(&instance.trees, eid_prefix)
        .map_err(|_| Error::MsNotFound(source, *eid_prefix))?;

    // Replies go to the ITR, at the port the request was sent from.
    let itr_port = ecm.source.port();
    let msg = match &node.kind {
        NodeKind::MapServer(ms) => {
            match ms.handle_map_request(eid_prefix, request.nonce) {
                MapRequestAction::ProxyReply(reply)
                | MapRequestAction::NegativeReply(reply) => UdpTxMsg {
                    socket: None,
                    dst: request.itr_rlocs.clone(),
                    port: itr_port,
                    msg: reply.into(),
                },
                MapRequestAction::Forward(etr) => UdpTxMsg {
                    socket: None,
                    dst: vec![etr],
                    port: LISP_CONTROL_PORT,
                    msg: ecm.clone().into(),
                },
            }
        }
        NodeKind::Origin(origin) => {
            let destination = if ecm.destination.ip().is_unspecified() {
                destination
            } else {
                ecm.destination.ip()
            };
            let reply = origin.map_reply(
                node_eid_prefix(eid_prefix.iid(), node),
                request,
                destination,
                &instance.local_addrs,
            );
            UdpTxMsg {
                socket: None,
                dst: request.itr_rlocs.clone(),
                port: itr_port,
                msg: reply.into(),
            }
        }
        _ => return Err(Error::MsNotFound(source, *eid_prefix)),
    };

    Debug::MapRequestAnswer(eid_prefix, &source).log();
    instance.tx.send_udp(msg);
    Ok(())
}

// Processes the records of a Map-Register, acknowledging the accepted ones
// when a Map-Notify was requested.
fn process_map_register(
    instance: &mut Instance,
    socket: usize,
    source: SocketAddr,
    register: &MapRegister,
) {
    let now = Instant::now();
    let reject_log_level = instance.config.reject_log_level;

    // Accepted records, grouped by the Map-Server node that accepted them.
    let mut accepted = BTreeMap::<(u32, IpNetwork), Vec<_>>::new();
    for record in &register.records {
        let eid_prefix = record.eid_prefix;
        let result = resolve_mut(&mut instance.trees, &eid_prefix)
            .map_err(|_| Error::MsNotFound(source, eid_prefix))
            .and_then(|node| {
                let prefix = node.prefix;
                let NodeKind::MapServer(ms) = &mut node.kind else {
                    return Err(Error::MsNotFound(source, eid_prefix));
                };
                ms.handle_register(&prefix, register, record, source, now)?;
                Ok(prefix)
            });

        match result {
            Ok(prefix) => {
                accepted
                    .entry((eid_prefix.iid(), prefix))
                    .or_default()
                    .push(record.clone());
            }
            Err(error) if error.is_rejection() => {
                error.log_rejection(reject_log_level);
            }
            Err(error) => error.log(),
        }
    }

    if !register.want_map_notify {
        return;
    }
    for ((instance_id, prefix), records) in accepted {
        let Some(node) = instance
            .trees
            .get(&instance_id)
            .and_then(|tree| {
                tree.root(prefix.address_family()).resolve(&prefix).ok()
            })
        else {
            continue;
        };
        let NodeKind::MapServer(ms) = &node.kind else {
            continue;
        };

        let notify = ms.map_notify(register, records);
        instance.tx.send_udp(UdpTxMsg {
            socket: Some(socket),
            dst: vec![source.ip()],
            port: source.port(),
            msg: notify.into(),
        });
    }
}

// Answers an Info-Request with our view of the requester's address.
fn process_info_request(
    instance: &mut Instance,
    socket: usize,
    source: SocketAddr,
    destination: IpAddr,
    request: &InfoMessage,
) -> Result<(), Error> {
    let eid_prefix = request.eid_prefix;
    let node = resolve(&instance.trees, &eid_prefix)
        .map_err(|_| Error::MsNotFound(source, eid_prefix))?;
    let NodeKind::MapServer(ms) = &node.kind else {
        return Err(Error::MsNotFound(source, eid_prefix));
    };

    if !ms.authenticate(request) {
        let error = Error::MsAuthFailed(source, eid_prefix);
        error.log_rejection(instance.config.reject_log_level);
        return Ok(());
    }

    // Report the address the request was sent to.
    let local = if destination.is_unspecified() {
        network::source_address(source.ip()).unwrap_or(destination)
    } else {
        destination
    };
    let reply = ms.info_reply(request, source, local);
    instance.tx.send_udp(UdpTxMsg {
        socket: Some(socket),
        dst: vec![source.ip()],
        port: source.port(),
        msg: reply.into(),
    });

    Ok(())
}

// ===== exchange registration =====

pub(crate) fn process_exchange_msg(instance: &mut Instance, msg: ExchangeMsg) {
    match msg {
        ExchangeMsg::Register {
            nonce,
            sources,
            responder,
        } => {
            instance.exchanges.register(nonce, sources, responder);
        }
        ExchangeMsg::Cancel { nonce } => {
            instance.exchanges.cancel(nonce);
        }
    }
}

// ===== RTR set update =====

pub(crate) fn process_rtr_update(instance: &mut Instance, msg: RtrUpdateMsg) {
    let Some(tree) = instance.trees.get_mut(&msg.instance_id) else {
        return;
    };
    let af = msg.prefix.address_family();
    let Ok(node) = tree.root_mut(af).resolve_mut(&msg.prefix) else {
        return;
    };
    if node.prefix != msg.prefix {
        return;
    }
    let NodeKind::Origin(origin) = &mut node.kind else {
        return;
    };

    if origin.update_rtrs(msg.peer, msg.rtrs) {
        Debug::RtrSetChange(&msg.prefix, &origin.rtr_union()).log();
    }
}

// ===== Map-Server registration cleanup =====

pub(crate) fn process_ms_cleanup(instance: &mut Instance) {
    let now = Instant::now();
    let mut removed = 0;
    for tree in instance.trees.values_mut() {
        for root in tree.roots_mut() {
            root.for_each_mut(&mut |node| {
                if let NodeKind::MapServer(ms) = &mut node.kind {
                    removed += ms.cleanup(now);
                }
            });
        }
    }

    if removed > 0 {
        Debug::MsCleanup(removed).log();
    }
}

// ===== helper functions =====

fn resolve<'a>(
    trees: &'a BTreeMap<u32, InstanceTree>,
    eid_prefix: &EidPrefix,
) -> Result<&'a Node, TreeError> {
    trees
        .get(&eid_prefix.iid())
        .ok_or(TreeError::UnknownInstance(eid_prefix.iid()))?
        .root(eid_prefix.address_family())
        .resolve(&eid_prefix.prefix)
}

fn resolve_mut<'a>(
    trees: &'a mut BTreeMap<u32, InstanceTree>,
    eid_prefix: &EidPrefix,
) -> Result<&'a mut Node, TreeError> {
    trees
        .get_mut(&eid_prefix.iid())
        .ok_or(TreeError::UnknownInstance(eid_prefix.iid()))?
        .root_mut(eid_prefix.address_family())
        .resolve_mut(&eid_prefix.prefix)
}
