//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use holo_utils::Responder;

use crate::error::Error;
use crate::packet::Message;

// Outstanding request/reply exchanges, indexed by nonce.
//
// A reply is matched only when both its nonce and its source address match
// the registered exchange.
#[derive(Debug, Default)]
pub struct ExchangeTable {
    exchanges: HashMap<u64, Exchange>,
}

#[derive(Debug)]
pub struct Exchange {
    // Addresses the reply may come from.
    pub sources: Vec<IpAddr>,
    pub responder: Responder<ExchangeReply>,
}

// Reply delivered to the task waiting on an exchange.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExchangeReply {
    pub source: SocketAddr,
    pub destination: IpAddr,
    pub message: Message,
}

// ===== impl ExchangeTable =====

impl ExchangeTable {
    pub fn register(
        &mut self,
        nonce: u64,
        sources: Vec<IpAddr>,
        responder: Responder<ExchangeReply>,
    ) {
        self.exchanges.insert(nonce, Exchange { sources, responder });
    }

    pub fn cancel(&mut self, nonce: u64) {
        self.exchanges.remove(&nonce);
    }

    // Delivers a reply to the matching exchange, consuming it.
    pub fn deliver(
        &mut self,
        source: SocketAddr,
        destination: IpAddr,
        message: Message,
    ) -> Result<(), Error> {
        let Some(nonce) = message.nonce() else {
            return Err(Error::UnexpectedMessage(source, message.msg_type()));
        };

        match self.exchanges.get(&nonce) {
            Some(exchange) if exchange.sources.contains(&source.ip()) => {}
            _ => return Err(Error::UnmatchedReply(source, nonce)),
        }

        // The waiting task might have given up in the meantime.
        if let Some(exchange) = self.exchanges.remove(&nonce) {
            let reply = ExchangeReply {
                source,
                destination,
                message,
            };
            let _ = exchange.responder.send(reply);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}
