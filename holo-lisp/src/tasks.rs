//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use holo_utils::socket::UdpSocket;
use holo_utils::task::{IntervalTask, Task};
use holo_utils::{Sender, UnboundedReceiver};
use tracing::{Instrument, debug_span};

use crate::etr::worker::{self, Worker, WorkerMsg};
use crate::network;

//
// LISP tasks diagram:
//
//                                 +--------------+
//                  udp_rx (Nx) -> |              | -> (1x) udp_tx
//              ms_cleanup (1x) -> |   instance   |
//                                 |              | -> (Nx) worker inbox
//                                 +--------------+
//                                       ^ ^
//                          exchange (Nx)| |(Nx) rtr_update
//                                       | |
//                                 +--------------+
//                                 |  etr_worker  | -> (Nx) udp_tx
//                                 +--------------+
//

// LISP inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use std::collections::BTreeSet;
        use std::net::{IpAddr, SocketAddr};

        use holo_utils::Responder;
        use ipnetwork::IpNetwork;

        use super::*;
        use crate::exchange::ExchangeReply;
        use crate::packet::{DecodeResult, Message};

        #[derive(Debug)]
        pub enum ProtocolMsg {
            UdpRx(UdpRxMsg),
            Exchange(ExchangeMsg),
            RtrUpdate(RtrUpdateMsg),
            MsCleanup(MsCleanupMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UdpRxMsg {
            // Index of the socket the message was received on.
            pub socket: usize,
            pub source: SocketAddr,
            pub destination: IpAddr,
            pub msg: DecodeResult<Message>,
        }

        #[derive(Debug)]
        pub enum ExchangeMsg {
            Register {
                nonce: u64,
                sources: Vec<IpAddr>,
                responder: Responder<ExchangeReply>,
            },
            Cancel {
                nonce: u64,
            },
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct RtrUpdateMsg {
            pub instance_id: u32,
            pub prefix: IpNetwork,
            pub peer: IpAddr,
            pub rtrs: BTreeSet<IpAddr>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct MsCleanupMsg {}
    }

    // Output messages (main task -> child task).
    pub mod output {
        use std::net::IpAddr;

        use super::*;
        use crate::packet::Message;

        #[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
        pub struct UdpTxMsg {
            // Socket to send the message on. When unset, the first socket
            // whose address family matches a destination is used.
            pub socket: Option<usize>,
            // Candidate destinations, in order of preference. The message is
            // sent to the first usable one only.
            pub dst: Vec<IpAddr>,
            pub port: u16,
            pub msg: Message,
        }
    }
}

// ===== LISP tasks =====

// UDP Rx task.
pub(crate) fn udp_rx(
    socket: &Arc<UdpSocket>,
    socket_idx: usize,
    udp_rxp: &Sender<messages::input::UdpRxMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let socket = socket.clone();
    let udp_rxp = udp_rxp.clone();
    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let udp_rxp = udp_rxp.clone();
        async move {
            let _ = network::read_loop(socket, socket_idx, udp_rxp).await;
        }
        .in_current_span()
    })
}

// UDP Tx task.
pub(crate) fn udp_tx(
    sockets: Vec<Arc<UdpSocket>>,
    udp_txc: UnboundedReceiver<messages::output::UdpTxMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            network::write_loop(sockets, udp_txc).await;
        }
        .in_current_span(),
    )
}

// Map-Server registration cleanup interval.
pub(crate) fn ms_cleanup_interval(
    interval: Duration,
    ms_cleanupp: &Sender<messages::input::MsCleanupMsg>,
) -> IntervalTask {
    let ms_cleanupp = ms_cleanupp.clone();
    IntervalTask::new(interval, false, move || {
        let ms_cleanupp = ms_cleanupp.clone();
        async move {
            let msg = messages::input::MsCleanupMsg {};
            let _ = ms_cleanupp.send(msg).await;
        }
    })
}

// ETR registration worker task.
pub(crate) fn etr_worker(
    worker: Worker,
    inbox: UnboundedReceiver<WorkerMsg>,
) -> Task<()> {
    let span = debug_span!(
        "etr-worker",
        prefix = %worker.ctx.eid_prefix,
        map_server = %worker.ctx.peer.address,
    );
    Task::spawn(worker::run(worker, inbox).instrument(span))
}
