//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::bytes::BytesExt;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::address::{
    EidPrefix, LcafHdr, decode_afi_address, encode_afi_address,
};
use crate::packet::auth::{
    Authenticated, decode_auth_fields, encode_auth_fields,
};
use crate::packet::consts::{Afi, KeyId, LcafType, MessageType};
use crate::packet::error::{DecodeError, DecodeResult};

//
// Info-Request and Info-Reply messages (RFC 9735).
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Type=7 |R|               Reserved                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Nonce . . .                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      . . . Nonce                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            Key ID             |  Authentication Data Length   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// ~                     Authentication Data                       ~
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              TTL                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Reserved    | EID mask-len  |        EID-Prefix-AFI         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          EID-Prefix                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |             AFI = 0           |   <Nothing Follows AFI=0>     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// In an Info-Reply, the trailing AFI 0 is replaced by a NAT-Traversal LCAF:
//
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           AFI = 16387         |    Rsvd1      |     Flags     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |    Type = 7   |     Rsvd2     |             4 + n             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |        MS UDP Port Number     |      ETR UDP Port Number      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |              AFI = x          | Global ETR RLOC Address  ...  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |              AFI = x          |       MS RLOC Address  ...    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |              AFI = x          | Private ETR RLOC Address ...  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |              AFI = x          |      RTR RLOC Address 1 ...   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |              AFI = x          |      RTR RLOC Address n ...   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InfoMessage {
    pub nonce: u64,
    pub key_id: KeyId,
    pub auth_data: Vec<u8>,
    pub ttl: u32,
    pub eid_prefix: EidPrefix,
    // Present only in Info-Replies.
    pub reply: Option<NatInfo>,
}

// NAT-Traversal information carried in an Info-Reply.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NatInfo {
    pub ms_port: u16,
    pub etr_port: u16,
    pub global_etr_rloc: IpAddr,
    pub map_server_rloc: IpAddr,
    // The Map-Server can't know this address. It's sent as AFI 0 and filled
    // in by the ETR with its own source address.
    pub private_etr_rloc: Option<IpAddr>,
    pub rtr_rlocs: Vec<IpAddr>,
}

// ===== impl InfoMessage =====

impl InfoMessage {
    const FLAG_R: u8 = 0x08;

    // Default TTL of Info-Requests, in minutes.
    pub const DFLT_TTL: u32 = 1440;

    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.encode_with_auth(&self.auth_data, buf);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = buf.try_get_u8()?;
        let is_reply = flags & Self::FLAG_R != 0;
        let _reserved = buf.try_get_u24()?;
        let nonce = buf.try_get_u64()?;
        let (key_id, auth_data) = decode_auth_fields(buf)?;
        let ttl = buf.try_get_u32()?;
        let _reserved = buf.try_get_u8()?;
        let mask_len = buf.try_get_u8()?;
        let eid_prefix = EidPrefix::decode(buf, mask_len)?;

        let afi = buf.try_get_u16()?;
        let reply = match Afi::from_u16(afi) {
            Some(Afi::Lcaf) if is_reply => Some(NatInfo::decode(buf)?),
            Some(Afi::None) if !is_reply => None,
            Some(_) => return Err(DecodeError::UnexpectedAfi(afi)),
            None => return Err(DecodeError::UnknownAfi(afi)),
        };

        Ok(InfoMessage {
            nonce,
            key_id,
            auth_data,
            ttl,
            eid_prefix,
            reply,
        })
    }
}

impl Authenticated for InfoMessage {
    fn key_id(&self) -> KeyId {
        self.key_id
    }

    fn auth_data(&self) -> &[u8] {
        &self.auth_data
    }

    fn set_auth_data(&mut self, auth_data: Vec<u8>) {
        self.auth_data = auth_data;
    }

    fn encode_with_auth(&self, auth_data: &[u8], buf: &mut BytesMut) {
        let mut flags = (MessageType::Info as u8) << 4;
        if self.is_reply() {
            flags |= Self::FLAG_R;
        }
        buf.put_u8(flags);
        buf.put_u8(0);
        buf.put_u16(0);
        buf.put_u64(self.nonce);
        encode_auth_fields(buf, self.key_id, auth_data);
        buf.put_u32(self.ttl);
        buf.put_u8(0);
        buf.put_u8(self.eid_prefix.mask_len());
        self.eid_prefix.encode(buf);
        match &self.reply {
            Some(nat_info) => nat_info.encode(buf),
            None => encode_afi_address(buf, None),
        }
    }
}

// ===== impl NatInfo =====

impl NatInfo {
    fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        body.put_u16(self.ms_port);
        body.put_u16(self.etr_port);
        encode_afi_address(&mut body, Some(&self.global_etr_rloc));
        encode_afi_address(&mut body, Some(&self.map_server_rloc));
        encode_afi_address(&mut body, self.private_etr_rloc.as_ref());
        for rloc in &self.rtr_rlocs {
            encode_afi_address(&mut body, Some(rloc));
        }

        LcafHdr {
            lcaf_type: LcafType::NatTraversal,
            type_data: 0,
            length: body.len() as u16,
        }
        .encode(buf);
        buf.put_slice(&body);
    }

    // Decodes the NAT-Traversal LCAF. The LCAF AFI must have been consumed
    // already.
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let hdr = LcafHdr::decode(buf)?;
        if hdr.lcaf_type != LcafType::NatTraversal {
            return Err(DecodeError::UnknownLcafType(hdr.lcaf_type as u8));
        }
        let mut buf_lcaf = buf.try_split_to(hdr.length as usize)?;

        let ms_port = buf_lcaf.try_get_u16()?;
        let etr_port = buf_lcaf.try_get_u16()?;
        let global_etr_rloc = decode_afi_address(&mut buf_lcaf)?
            .ok_or(DecodeError::UnexpectedAfi(Afi::None as u16))?;
        let map_server_rloc = decode_afi_address(&mut buf_lcaf)?
            .ok_or(DecodeError::UnexpectedAfi(Afi::None as u16))?;
        let private_etr_rloc = decode_afi_address(&mut buf_lcaf)?;
        let mut rtr_rlocs = vec![];
        while buf_lcaf.has_remaining() {
            if let Some(rloc) = decode_afi_address(&mut buf_lcaf)? {
                rtr_rlocs.push(rloc);
            }
        }

        Ok(NatInfo {
            ms_port,
            etr_port,
            global_etr_rloc,
            map_server_rloc,
            private_etr_rloc,
            rtr_rlocs,
        })
    }
}
