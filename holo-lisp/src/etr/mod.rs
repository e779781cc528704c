//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod worker;

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use holo_utils::UnboundedSender;
use holo_utils::task::Task;
use tokio::sync::mpsc;

use crate::config::{Config, LocatorCfg, MapServerPeerCfg, OriginCfg};
use crate::etr::worker::{Worker, WorkerChannels, WorkerCtx, WorkerMsg};
use crate::packet::{
    EidPrefix, LocatorFlags, LocatorRecord, MapReply, MapReplyAction,
    MapRequest, MappingRecord,
};
use crate::tasks;

// Origin (ETR) node: a prefix we originate and register at one or more
// Map-Servers.
#[derive(Debug)]
pub struct OriginNode {
    pub locators: Vec<LocatorCfg>,
    pub map_servers: Vec<MapServerPeerCfg>,
    // RTRs in use by each worker, indexed by Map-Server address.
    pub rtrs: BTreeMap<IpAddr, BTreeSet<IpAddr>>,
    pub workers: Vec<WorkerHandle>,
}

// Handle to a running registration worker. Dropping it stops the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub peer: IpAddr,
    tx: UnboundedSender<WorkerMsg>,
    _task: Task<()>,
}

// ===== impl OriginNode =====

impl OriginNode {
    // TTL of the mappings we originate, in minutes.
    pub const RECORD_TTL: u32 = 1440;

    pub fn new(
        locators: Vec<LocatorCfg>,
        map_servers: Vec<MapServerPeerCfg>,
    ) -> OriginNode {
        OriginNode {
            locators,
            map_servers,
            rtrs: Default::default(),
            workers: vec![],
        }
    }

    pub fn from_cfg(cfg: &OriginCfg) -> OriginNode {
        OriginNode::new(cfg.locators.clone(), cfg.map_servers.clone())
    }

    // Starts one registration worker per configured Map-Server.
    pub(crate) fn start_workers(
        &mut self,
        eid_prefix: EidPrefix,
        config: &Config,
        local_addrs: &[IpAddr],
        channels: &WorkerChannels,
    ) {
        let rtrs = self.rtr_union();
        for peer in &self.map_servers {
            let ctx = WorkerCtx {
                eid_prefix,
                peer: peer.clone(),
                locators: self.locators.clone(),
                local_addrs: local_addrs.to_vec(),
                rtrs: rtrs.clone(),
                xtr_id: config.xtr_id,
                site_id: config.site_id,
                map_notify_probability: config.map_notify_probability,
            };
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = Worker::new(ctx, channels.clone());
            let task = tasks::etr_worker(worker, rx);
            self.workers.push(WorkerHandle {
                peer: peer.address,
                tx,
                _task: task,
            });
        }
    }

    // Returns the RTRs in use by any of this node's workers.
    pub fn rtr_union(&self) -> BTreeSet<IpAddr> {
        self.rtrs.values().flatten().copied().collect()
    }

    // Records the RTRs in use by the worker of the given Map-Server.
    //
    // When the overall RTR set changes, all workers are told to register
    // again. Returns whether that happened.
    pub fn update_rtrs(
        &mut self,
        peer: IpAddr,
        rtrs: BTreeSet<IpAddr>,
    ) -> bool {
        let old = self.rtr_union();
        if rtrs.is_empty() {
            self.rtrs.remove(&peer);
        } else {
            self.rtrs.insert(peer, rtrs);
        }
        let new = self.rtr_union();
        if old == new {
            return false;
        }

        for worker in &self.workers {
            let msg = WorkerMsg::LocatorsChanged { rtrs: new.clone() };
            let _ = worker.tx.send(msg);
        }
        true
    }

    // Builds the Map-Reply answering a Map-Request for this node's prefix.
    //
    // `destination` is the local address the request was sent to.
    pub fn map_reply(
        &self,
        eid_prefix: EidPrefix,
        request: &MapRequest,
        destination: IpAddr,
        local_addrs: &[IpAddr],
    ) -> MapReply {
        let mut locators =
            get_etr_locators(&self.locators, local_addrs, &self.rtr_union());
        for locator in &mut locators {
            locator.flags.insert(LocatorFlags::REACHABLE);
            if request.probe && locator.address == destination {
                locator.flags.insert(LocatorFlags::PROBED);
            }
        }

        let action = if locators.is_empty() {
            MapReplyAction::NativelyForward
        } else {
            MapReplyAction::NoAction
        };
        let record = MappingRecord::new(
            Self::RECORD_TTL,
            action,
            true,
            0,
            eid_prefix,
            locators,
        );
        MapReply::new(request.probe, request.nonce, vec![record])
    }
}

// ===== impl WorkerHandle =====

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerMsg::Stop);
    }
}

// ===== global functions =====

// Computes the locators to advertise for an Origin node.
//
// Locators with an unspecified address are skipped. When RTRs are in use,
// the first local locator is replaced by one locator per RTR, and any other
// local locator is left out.
pub fn get_etr_locators(
    locators: &[LocatorCfg],
    local_addrs: &[IpAddr],
    rtrs: &BTreeSet<IpAddr>,
) -> Vec<LocatorRecord> {
    let mut records = vec![];
    let mut rtrs_included = false;

    for locator in locators {
        if locator.address.is_unspecified() {
            continue;
        }

        let local = local_addrs.contains(&locator.address);
        if local && !rtrs.is_empty() {
            if !rtrs_included {
                for rtr in rtrs {
                    let record = locator_record(
                        locator,
                        *rtr,
                        LocatorFlags::REACHABLE,
                    );
                    push_unique(&mut records, record);
                }
                rtrs_included = true;
            }
            continue;
        }

        let mut flags = LocatorFlags::REACHABLE;
        if local {
            flags.insert(LocatorFlags::LOCAL);
        }
        let record = locator_record(locator, locator.address, flags);
        push_unique(&mut records, record);
    }

    records
}

// ===== helper functions =====

fn locator_record(
    locator: &LocatorCfg,
    address: IpAddr,
    flags: LocatorFlags,
) -> LocatorRecord {
    LocatorRecord::new(
        locator.priority,
        locator.weight,
        locator.m_priority,
        locator.m_weight,
        flags,
        address,
    )
}

fn push_unique(records: &mut Vec<LocatorRecord>, record: LocatorRecord) {
    if !records.contains(&record) {
        records.push(record);
    }
}
