//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod address;
pub mod auth;
pub mod consts;
pub mod ecm;
pub mod error;
pub mod info;
pub mod map_referral;
pub mod map_register;
pub mod map_reply;
pub mod map_request;
pub mod record;

use bytes::{Buf, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

pub use crate::packet::address::EidPrefix;
pub use crate::packet::consts::{
    KeyId, LISP_CONTROL_PORT, LocatorFlags, MapReplyAction, MessageType,
    ReferralAction,
};
pub use crate::packet::ecm::Ecm;
pub use crate::packet::error::{DecodeError, DecodeResult};
pub use crate::packet::info::{InfoMessage, NatInfo};
pub use crate::packet::map_referral::MapReferral;
pub use crate::packet::map_register::{MapNotify, MapRegister};
pub use crate::packet::map_reply::MapReply;
pub use crate::packet::map_request::MapRequest;
pub use crate::packet::record::{LocatorRecord, MappingRecord, ReferralRecord};

// LISP control message.
//
// Every message starts with a 4-bit type field, followed by type-specific
// flags and fields.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Message {
    MapRequest(MapRequest),
    MapReply(MapReply),
    MapRegister(MapRegister),
    MapNotify(MapNotify),
    MapReferral(MapReferral),
    Info(InfoMessage),
    Ecm(Ecm),
}

// ===== impl Message =====

impl Message {
    // Encodes LISP message into a bytes buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128);
        match self {
            Message::MapRequest(msg) => msg.encode(&mut buf),
            Message::MapReply(msg) => msg.encode(&mut buf),
            Message::MapRegister(msg) => msg.encode(&mut buf),
            Message::MapNotify(msg) => msg.encode(&mut buf),
            Message::MapReferral(msg) => msg.encode(&mut buf),
            Message::Info(msg) => msg.encode(&mut buf),
            Message::Ecm(msg) => msg.encode(&mut buf),
        }
        buf
    }

    // Decodes LISP message from a bytes buffer.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);
        Self::decode_buf(&mut buf)
    }

    pub(crate) fn decode_buf(buf: &mut Bytes) -> DecodeResult<Self> {
        // Peek at the message type without consuming the first byte, since it
        // also carries message-specific flags.
        if !buf.has_remaining() {
            return Err(DecodeError::ReadOutOfBounds);
        }
        let msg_type = buf[0] >> 4;
        let msg_type = MessageType::from_u8(msg_type)
            .ok_or(DecodeError::UnknownMessageType(msg_type))?;

        let msg = match msg_type {
            MessageType::MapRequest => {
                Message::MapRequest(MapRequest::decode(buf)?)
            }
            MessageType::MapReply => Message::MapReply(MapReply::decode(buf)?),
            MessageType::MapRegister => {
                Message::MapRegister(MapRegister::decode(buf)?)
            }
            MessageType::MapNotify => {
                Message::MapNotify(MapNotify::decode(buf)?)
            }
            MessageType::MapReferral => {
                Message::MapReferral(MapReferral::decode(buf)?)
            }
            MessageType::Info => Message::Info(InfoMessage::decode(buf)?),
            MessageType::EncapsulatedControl => {
                Message::Ecm(Ecm::decode(buf)?)
            }
        };

        Ok(msg)
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::MapRequest(_) => MessageType::MapRequest,
            Message::MapReply(_) => MessageType::MapReply,
            Message::MapRegister(_) => MessageType::MapRegister,
            Message::MapNotify(_) => MessageType::MapNotify,
            Message::MapReferral(_) => MessageType::MapReferral,
            Message::Info(_) => MessageType::Info,
            Message::Ecm(_) => MessageType::EncapsulatedControl,
        }
    }

    // Returns the message's nonce, if it has one.
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Message::MapRequest(msg) => Some(msg.nonce),
            Message::MapReply(msg) => Some(msg.nonce),
            Message::MapRegister(msg) => Some(msg.nonce),
            Message::MapNotify(msg) => Some(msg.nonce),
            Message::MapReferral(msg) => Some(msg.nonce),
            Message::Info(msg) => Some(msg.nonce),
            Message::Ecm(_) => None,
        }
    }
}

impl From<MapRequest> for Message {
    fn from(msg: MapRequest) -> Message {
        Message::MapRequest(msg)
    }
}

impl From<MapReply> for Message {
    fn from(msg: MapReply) -> Message {
        Message::MapReply(msg)
    }
}

impl From<MapRegister> for Message {
    fn from(msg: MapRegister) -> Message {
        Message::MapRegister(msg)
    }
}

impl From<MapNotify> for Message {
    fn from(msg: MapNotify) -> Message {
        Message::MapNotify(msg)
    }
}

impl From<MapReferral> for Message {
    fn from(msg: MapReferral) -> Message {
        Message::MapReferral(msg)
    }
}

impl From<InfoMessage> for Message {
    fn from(msg: InfoMessage) -> Message {
        Message::Info(msg)
    }
}

impl From<Ecm> for Message {
    fn from(msg: Ecm) -> Message {
        Message::Ecm(msg)
    }
}
