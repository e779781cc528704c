//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use holo_utils::ip::IpNetworkExt;
use ipnetwork::IpNetwork;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::config::MapServerCfg;
use crate::debug::Debug;
use crate::error::Error;
use crate::packet::auth::{insert_auth, verify_auth};
use crate::packet::{
    EidPrefix, InfoMessage, KeyId, LISP_CONTROL_PORT, LocatorFlags,
    MapNotify, MapRegister, MapReply, MapReplyAction, MappingRecord, NatInfo,
};

// Map-Server node.
#[derive(Debug)]
pub struct MapServerNode {
    pub key_id: KeyId,
    pub key: Vec<u8>,
    pub allow_more_specifics: bool,
    pub registration_lifetime: Duration,
    // RTRs advertised to ETRs behind NAT.
    pub rtrs: Vec<IpAddr>,
    pub registrations: BTreeMap<IpNetwork, HashMap<SourceId, Registration>>,
}

// Identity of a registering ETR.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Serialize)]
pub enum SourceId {
    Xtr { site_id: u64, xtr_id: u128 },
    Address(IpAddr),
}

#[derive(Debug)]
pub struct Registration {
    pub record: MappingRecord,
    pub proxy_map_reply: bool,
    pub source: SocketAddr,
    pub ttl: Duration,
    pub deadline: Instant,
    pub last_registered: Instant,
}

// Outcome of a Map-Request handled by a Map-Server.
#[derive(Debug, Eq, PartialEq)]
pub enum MapRequestAction {
    // Answer on behalf of the ETR.
    ProxyReply(MapReply),
    // Forward the encapsulated Map-Request to the given ETR locator.
    Forward(IpAddr),
    // No registration covers the requested EID.
    NegativeReply(MapReply),
}

// ===== impl MapServerNode =====

impl MapServerNode {
    // TTL of negative Map-Replies, in minutes.
    pub const NEGATIVE_TTL: u32 = 15;

    pub fn new(key_id: KeyId, key: impl Into<Vec<u8>>) -> MapServerNode {
        MapServerNode {
            key_id,
            key: key.into(),
            allow_more_specifics: true,
            registration_lifetime: Duration::from_secs(180),
            rtrs: vec![],
            registrations: Default::default(),
        }
    }

    pub fn from_cfg(cfg: &MapServerCfg) -> MapServerNode {
        MapServerNode {
            key_id: cfg.key_id,
            key: cfg.key.as_bytes().to_vec(),
            allow_more_specifics: cfg.allow_more_specifics,
            registration_lifetime: Duration::from_secs(
                cfg.registration_lifetime,
            ),
            rtrs: cfg.rtrs.clone(),
            registrations: Default::default(),
        }
    }

    // Checks that a message was authenticated with this node's key.
    pub fn authenticate<M>(&self, msg: &M) -> bool
    where
        M: crate::packet::auth::Authenticated,
    {
        msg.key_id() == self.key_id && verify_auth(msg, &self.key)
    }

    // Processes one record of a Map-Register.
    //
    // `prefix` is the prefix of this node. Returns whether a new registration
    // was created.
    pub fn handle_register(
        &mut self,
        prefix: &IpNetwork,
        register: &MapRegister,
        record: &MappingRecord,
        source: SocketAddr,
        now: Instant,
    ) -> Result<bool, Error> {
        let eid_prefix = record.eid_prefix;

        // Check authentication data.
        if !self.authenticate(register) {
            return Err(Error::MsAuthFailed(source, eid_prefix));
        }

        // Check the registration's scope.
        if !prefix.contains_prefix(&eid_prefix.prefix) {
            return Err(Error::MsScopeError(source, eid_prefix, *prefix));
        }
        if eid_prefix.prefix.prefix() > prefix.prefix()
            && !self.allow_more_specifics
        {
            return Err(Error::MsMoreSpecificNotAllowed(
                source, eid_prefix, *prefix,
            ));
        }

        let source_id = SourceId::new(register, source);
        let registration = Registration {
            record: record.clone(),
            proxy_map_reply: register.proxy_map_reply,
            source,
            ttl: self.registration_lifetime,
            deadline: now + self.registration_lifetime,
            last_registered: now,
        };

        let registrations =
            self.registrations.entry(eid_prefix.prefix).or_default();
        let new = registrations.insert(source_id, registration).is_none();
        let locators = locators_to_string(record);
        if new {
            info!(
                %eid_prefix, source = %source_id, %locators,
                "new registration"
            );
        } else {
            Debug::MsRegistrationUpdate(&eid_prefix, &source_id, &locators)
                .log();
        }

        Ok(new)
    }

    // Removes registrations past their deadline, returning how many were
    // removed.
    pub fn cleanup(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        self.registrations.retain(|prefix, registrations| {
            registrations.retain(|source_id, registration| {
                let expired = now > registration.deadline;
                if expired {
                    Debug::MsRegistrationExpire(prefix, source_id).log();
                    removed += 1;
                }
                !expired
            });
            !registrations.is_empty()
        });
        removed
    }

    // Returns the most specific registrations covering the given EID
    // prefix, most recent first.
    pub fn lookup(&self, eid: &IpNetwork) -> Vec<&Registration> {
        let Some(registrations) = self
            .registrations
            .iter()
            .filter(|(prefix, _)| prefix.contains_prefix(eid))
            .max_by_key(|(prefix, _)| prefix.prefix())
            .map(|(_, registrations)| registrations)
        else {
            return vec![];
        };

        let mut registrations = registrations.values().collect::<Vec<_>>();
        registrations.sort_by_key(|registration| {
            std::cmp::Reverse(registration.last_registered)
        });
        registrations
    }

    // Decides how to answer a Map-Request for the given EID prefix.
    pub fn handle_map_request(
        &self,
        eid_prefix: &EidPrefix,
        nonce: u64,
    ) -> MapRequestAction {
        let registrations = self.lookup(&eid_prefix.prefix);
        let Some(registration) = registrations.first() else {
            return MapRequestAction::NegativeReply(negative_map_reply(
                eid_prefix, nonce,
            ));
        };

        if registration.proxy_map_reply {
            let mut record = registration.record.clone();
            record.authoritative = false;
            for locator in &mut record.locators {
                locator.flags.remove(LocatorFlags::LOCAL);
            }
            return MapRequestAction::ProxyReply(MapReply::new(
                false,
                nonce,
                vec![record],
            ));
        }

        // Forward to the first reachable locator, falling back to the
        // address the registration came from.
        let etr = registration
            .record
            .locators
            .iter()
            .filter(|locator| locator.is_reachable())
            .min_by_key(|locator| locator.priority)
            .map(|locator| locator.address)
            .unwrap_or(registration.source.ip());
        MapRequestAction::Forward(etr)
    }

    // Builds the Map-Notify acknowledging the accepted records of a
    // Map-Register.
    pub fn map_notify(
        &self,
        register: &MapRegister,
        records: Vec<MappingRecord>,
    ) -> MapNotify {
        let mut notify = MapNotify::from(register);
        notify.key_id = self.key_id;
        notify.records = records;
        insert_auth(&mut notify, &self.key);
        notify
    }

    // Builds the Info-Reply to an Info-Request received from `source` on
    // the local address `local`.
    pub fn info_reply(
        &self,
        request: &InfoMessage,
        source: SocketAddr,
        local: IpAddr,
    ) -> InfoMessage {
        let mut reply = InfoMessage {
            nonce: request.nonce,
            key_id: self.key_id,
            auth_data: vec![],
            ttl: request.ttl,
            eid_prefix: request.eid_prefix,
            reply: Some(NatInfo {
                ms_port: LISP_CONTROL_PORT,
                etr_port: source.port(),
                global_etr_rloc: source.ip(),
                map_server_rloc: local,
                private_etr_rloc: None,
                rtr_rlocs: self.rtrs.clone(),
            }),
        };
        insert_auth(&mut reply, &self.key);
        reply
    }
}

// ===== impl SourceId =====

impl SourceId {
    // Registrations carrying an xTR-ID are identified by it. Others are
    // identified by their source address.
    pub fn new(register: &MapRegister, source: SocketAddr) -> SourceId {
        if register.xtr_id != 0 {
            SourceId::Xtr {
                site_id: register.site_id,
                xtr_id: register.xtr_id,
            }
        } else {
            SourceId::Address(source.ip())
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceId::Xtr { site_id, xtr_id } => {
                write!(f, "{:x}-{:x}", site_id, xtr_id)
            }
            SourceId::Address(addr) => addr.fmt(f),
        }
    }
}

// ===== global functions =====

pub fn negative_map_reply(eid_prefix: &EidPrefix, nonce: u64) -> MapReply {
    let record = MappingRecord::new(
        MapServerNode::NEGATIVE_TTL,
        MapReplyAction::NativelyForward,
        true,
        0,
        *eid_prefix,
        vec![],
    );
    MapReply::new(false, nonce, vec![record])
}

// ===== helper functions =====

fn locators_to_string(record: &MappingRecord) -> String {
    record
        .locators
        .iter()
        .map(|locator| locator.address.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
