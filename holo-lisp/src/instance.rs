//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use holo_utils::ip::IpNetworkExt;
use holo_utils::socket::UdpSocket;
use holo_utils::task::{IntervalTask, Task};
use holo_utils::{Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc;
use tracing::{Instrument, debug_span};

use crate::config::{Config, ConfigError, InstanceCfg, NodeCfg};
use crate::debug::Debug;
use crate::error::IoError;
use crate::etr::OriginNode;
use crate::etr::worker::WorkerChannels;
use crate::exchange::ExchangeTable;
use crate::map_server::MapServerNode;
use crate::packet::EidPrefix;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    ExchangeMsg, MsCleanupMsg, RtrUpdateMsg, UdpRxMsg,
};
use crate::tasks::messages::output::UdpTxMsg;
use crate::tree::{InstanceTree, Node, NodeKind, TreeError};
use crate::{events, network, tasks};

#[derive(Debug)]
pub struct Instance {
    // Instance configuration data.
    pub config: Config,
    // Address trees, indexed by instance-id.
    pub trees: BTreeMap<u32, InstanceTree>,
    // Outstanding request/reply exchanges.
    pub exchanges: ExchangeTable,
    // Addresses the sockets are bound to, indexed by socket.
    pub sockets: Vec<SocketAddr>,
    // Local addresses we can receive traffic on.
    pub local_addrs: Vec<IpAddr>,
    // Registration cleanup task.
    pub cleanup_task: Option<IntervalTask>,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
}

#[derive(Clone, Debug)]
pub struct InstanceChannelsTx {
    pub protocol_input: ProtocolInputChannelsTx,
    // UDP Tx output channel.
    pub udp_tx: UnboundedSender<UdpTxMsg>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // UDP Rx event.
    pub udp_rx: Sender<UdpRxMsg>,
    // Exchange registration event.
    pub exchange: Sender<ExchangeMsg>,
    // RTR set update event.
    pub rtr_update: Sender<RtrUpdateMsg>,
    // Registration cleanup interval.
    pub ms_cleanup: Sender<MsCleanupMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    // UDP Rx event.
    pub udp_rx: Receiver<UdpRxMsg>,
    // Exchange registration event.
    pub exchange: Receiver<ExchangeMsg>,
    // RTR set update event.
    pub rtr_update: Receiver<RtrUpdateMsg>,
    // Registration cleanup interval.
    pub ms_cleanup: Receiver<MsCleanupMsg>,
}

// Instance sockets and their Tx/Rx tasks.
#[derive(Debug)]
pub struct InstanceNet {
    pub sockets: Vec<SocketAddr>,
    _udp_rx_tasks: Vec<Task<()>>,
    _udp_tx_task: Task<()>,
}

// ===== impl Instance =====

impl Instance {
    pub fn new(
        config: Config,
        sockets: Vec<SocketAddr>,
        tx: InstanceChannelsTx,
    ) -> Result<Instance, ConfigError> {
        let trees = build_trees(&config.instances)?;
        let bound = sockets.iter().map(|addr| addr.ip()).collect::<Vec<_>>();
        let local_addrs = network::local_addresses(&bound);

        Ok(Instance {
            config,
            trees,
            exchanges: Default::default(),
            sockets,
            local_addrs,
            cleanup_task: None,
            tx,
        })
    }

    // Starts the registration cleanup task and the ETR workers.
    pub fn start(&mut self) {
        Debug::InstanceStart.log();

        let interval = Duration::from_secs(self.config.cleanup_interval);
        let task = tasks::ms_cleanup_interval(
            interval,
            &self.tx.protocol_input.ms_cleanup,
        );
        self.cleanup_task = Some(task);

        let channels = WorkerChannels {
            exchange: self.tx.protocol_input.exchange.clone(),
            rtr_update: self.tx.protocol_input.rtr_update.clone(),
            udp_tx: self.tx.udp_tx.clone(),
        };
        let config = &self.config;
        let local_addrs = &self.local_addrs;
        for tree in self.trees.values_mut() {
            let instance_id = tree.instance_id;
            for root in tree.roots_mut() {
                root.for_each_mut(&mut |node| {
                    let eid_prefix = node_eid_prefix(instance_id, node);
                    if let NodeKind::Origin(origin) = &mut node.kind {
                        origin.start_workers(
                            eid_prefix,
                            config,
                            local_addrs,
                            &channels,
                        );
                    }
                });
            }
        }
    }

    // Stops all tasks, dropping the address trees.
    pub fn stop(&mut self) {
        Debug::InstanceStop.log();

        self.cleanup_task = None;
        self.trees.clear();
        self.exchanges = Default::default();
    }

    pub fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        if let Err(error) = events::process_protocol_msg(self, msg) {
            error.log();
        }
    }

    // Runs the instance event loop until a stop signal is received.
    pub async fn run(
        mut self,
        mut rx: ProtocolInputChannelsRx,
        mut signal_rx: Receiver<()>,
    ) {
        let span = debug_span!("lisp-instance");
        async move {
            self.start();
            loop {
                tokio::select! {
                    Some(msg) = rx.recv() => {
                        self.process_protocol_msg(msg);
                    }
                    _ = signal_rx.recv() => break,
                }
            }
            self.stop();
        }
        .instrument(span)
        .await
    }
}

// ===== impl InstanceChannelsTx =====

impl InstanceChannelsTx {
    pub(crate) fn send_udp(&self, msg: UdpTxMsg) {
        Debug::PduTx(&msg).log();
        let _ = self.udp_tx.send(msg);
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl ProtocolInputChannelsRx {
    pub async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        // Exchanges are registered before their request is sent, so they
        // must be processed ahead of received messages.
        tokio::select! {
            biased;
            msg = self.exchange.recv() => {
                msg.map(ProtocolInputMsg::Exchange)
            }
            msg = self.udp_rx.recv() => {
                msg.map(ProtocolInputMsg::UdpRx)
            }
            msg = self.rtr_update.recv() => {
                msg.map(ProtocolInputMsg::RtrUpdate)
            }
            msg = self.ms_cleanup.recv() => {
                msg.map(ProtocolInputMsg::MsCleanup)
            }
        }
    }
}

// ===== impl InstanceNet =====

impl InstanceNet {
    // Binds one socket per listen address and starts the UDP Tx/Rx tasks.
    pub fn new(
        listen: &[IpAddr],
        udp_rxp: &Sender<UdpRxMsg>,
        udp_txc: UnboundedReceiver<UdpTxMsg>,
    ) -> Result<InstanceNet, IoError> {
        let sockets = listen
            .iter()
            .map(|addr| {
                network::socket(*addr)
                    .map(Arc::new)
                    .map_err(IoError::UdpSocketError)
            })
            .collect::<Result<Vec<Arc<UdpSocket>>, IoError>>()?;
        let addrs = sockets
            .iter()
            .map(|socket| socket.local_addr().map_err(IoError::UdpSocketError))
            .collect::<Result<Vec<_>, IoError>>()?;

        let udp_rx_tasks = sockets
            .iter()
            .enumerate()
            .map(|(idx, socket)| tasks::udp_rx(socket, idx, udp_rxp))
            .collect();
        let udp_tx_task = tasks::udp_tx(sockets, udp_txc);

        Ok(InstanceNet {
            sockets: addrs,
            _udp_rx_tasks: udp_rx_tasks,
            _udp_tx_task: udp_tx_task,
        })
    }
}

// ===== global functions =====

pub fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (udp_rxp, udp_rxc) = mpsc::channel(4);
    let (exchangep, exchangec) = mpsc::channel(4);
    let (rtr_updatep, rtr_updatec) = mpsc::channel(4);
    let (ms_cleanupp, ms_cleanupc) = mpsc::channel(4);

    let tx = ProtocolInputChannelsTx {
        udp_rx: udp_rxp,
        exchange: exchangep,
        rtr_update: rtr_updatep,
        ms_cleanup: ms_cleanupp,
    };
    let rx = ProtocolInputChannelsRx {
        udp_rx: udp_rxc,
        exchange: exchangec,
        rtr_update: rtr_updatec,
        ms_cleanup: ms_cleanupc,
    };

    (tx, rx)
}

// Builds the address trees of all configured instances.
pub fn build_trees(
    instances: &[InstanceCfg],
) -> Result<BTreeMap<u32, InstanceTree>, ConfigError> {
    let mut trees = BTreeMap::new();
    for cfg in instances {
        let instance_id = cfg.instance_id;
        let mut tree = InstanceTree::new(instance_id);
        for node_cfg in &cfg.nodes {
            let node = build_node(instance_id, node_cfg)
                .map_err(|error| ConfigError::Tree(instance_id, error))?;
            tree.root_mut(node.prefix.address_family())
                .add(node)
                .map_err(|error| ConfigError::Tree(instance_id, error))?;
        }
        if trees.insert(instance_id, tree).is_some() {
            return Err(ConfigError::DuplicateInstance(instance_id));
        }
    }
    Ok(trees)
}

// Returns the EID prefix of a node, as carried in messages.
pub fn node_eid_prefix(instance_id: u32, node: &Node) -> EidPrefix {
    let instance_id = (instance_id != 0).then_some(instance_id);
    EidPrefix::new(instance_id, node.prefix)
}

// ===== helper functions =====

fn build_node(instance_id: u32, cfg: &NodeCfg) -> Result<Node, TreeError> {
    let mut node = match cfg {
        NodeCfg::Container(cfg) => Node::container(cfg.prefix),
        NodeCfg::AuthContainer(cfg) => {
            Node::auth_container(cfg.prefix, cfg.peers.iter().copied())
        }
        NodeCfg::DelegationReferral(cfg) => Node::delegation_referral(
            cfg.prefix,
            cfg.delegates.iter().copied(),
        ),
        NodeCfg::MapServer(cfg) => Node::new(
            cfg.prefix,
            NodeKind::MapServer(MapServerNode::from_cfg(cfg)),
        ),
        NodeCfg::Origin(cfg) => {
            Node::new(cfg.prefix, NodeKind::Origin(OriginNode::from_cfg(cfg)))
        }
    };
    Debug::NodeAdd(instance_id, &node.prefix, node.kind.name()).log();

    let children = match cfg {
        NodeCfg::Container(cfg) => &cfg.children[..],
        NodeCfg::AuthContainer(cfg) => &cfg.children[..],
        _ => &[],
    };
    for child in children {
        let child = build_node(instance_id, child)?;
        node.add(child)?;
    }

    Ok(node)
}
