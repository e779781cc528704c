//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::packet::address::{
    EidPrefix, decode_afi_address, encode_afi_address,
};
use crate::packet::consts::MessageType;
use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::record::MappingRecord;

//
// Map-Request message.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Type=1 |A|M|P|S|p|s|R|I|  Rsvd   |L|D|   IRC   | Record Count  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Nonce . . .                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         . . . Nonce                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Source-EID-AFI        |   Source EID Address  ...     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         ITR-RLOC-AFI 1        |    ITR-RLOC Address 1  ...    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Reserved    | EID mask-len  |        EID-Prefix-AFI         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       EID-Prefix  ...                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                   Map-Reply Record  ...                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MapRequest {
    pub authoritative: bool,
    pub probe: bool,
    pub smr: bool,
    pub pitr: bool,
    pub smr_invoked: bool,
    pub nonce: u64,
    pub source_eid: Option<IpAddr>,
    pub itr_rlocs: Vec<IpAddr>,
    pub eid_prefixes: Vec<EidPrefix>,
    pub map_reply: Option<MappingRecord>,
}

// ===== impl MapRequest =====

impl MapRequest {
    const FLAG_A: u8 = 0x08;
    const FLAG_M: u8 = 0x04;
    const FLAG_P: u8 = 0x02;
    const FLAG_S: u8 = 0x01;
    const FLAG_PITR: u8 = 0x80;
    const FLAG_SMR_INVOKED: u8 = 0x40;
    const IRC_MASK: u8 = 0x1f;

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let mut flags = (MessageType::MapRequest as u8) << 4;
        if self.authoritative {
            flags |= Self::FLAG_A;
        }
        if self.map_reply.is_some() {
            flags |= Self::FLAG_M;
        }
        if self.probe {
            flags |= Self::FLAG_P;
        }
        if self.smr {
            flags |= Self::FLAG_S;
        }
        buf.put_u8(flags);

        let mut flags = 0;
        if self.pitr {
            flags |= Self::FLAG_PITR;
        }
        if self.smr_invoked {
            flags |= Self::FLAG_SMR_INVOKED;
        }
        buf.put_u8(flags);

        // At least one ITR-RLOC is mandatory. Send AFI 0 when none is known.
        let irc = self.itr_rlocs.len().saturating_sub(1) as u8;
        buf.put_u8(irc & Self::IRC_MASK);
        buf.put_u8(self.eid_prefixes.len() as u8);
        buf.put_u64(self.nonce);
        encode_afi_address(buf, self.source_eid.as_ref());
        if self.itr_rlocs.is_empty() {
            encode_afi_address(buf, None);
        }
        for rloc in &self.itr_rlocs {
            encode_afi_address(buf, Some(rloc));
        }
        for eid_prefix in &self.eid_prefixes {
            buf.put_u8(0);
            buf.put_u8(eid_prefix.mask_len());
            eid_prefix.encode(buf);
        }
        if let Some(record) = &self.map_reply {
            record.encode(buf);
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = buf.try_get_u8()?;
        let authoritative = flags & Self::FLAG_A != 0;
        let map_data_present = flags & Self::FLAG_M != 0;
        let probe = flags & Self::FLAG_P != 0;
        let smr = flags & Self::FLAG_S != 0;
        let flags = buf.try_get_u8()?;
        let pitr = flags & Self::FLAG_PITR != 0;
        let smr_invoked = flags & Self::FLAG_SMR_INVOKED != 0;
        let irc = (buf.try_get_u8()? & Self::IRC_MASK) as usize + 1;
        let record_count = buf.try_get_u8()?;
        let nonce = buf.try_get_u64()?;
        let source_eid = decode_afi_address(buf)?;

        let mut itr_rlocs = Vec::with_capacity(irc);
        for _ in 0..irc {
            if let Some(rloc) = decode_afi_address(buf)? {
                itr_rlocs.push(rloc);
            }
        }

        let mut eid_prefixes = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            let _reserved = buf.try_get_u8()?;
            let mask_len = buf.try_get_u8()?;
            eid_prefixes.push(EidPrefix::decode(buf, mask_len)?);
        }
        if eid_prefixes.is_empty() {
            return Err(DecodeError::MissingRecords);
        }

        let map_reply = if map_data_present {
            Some(MappingRecord::decode(buf)?)
        } else {
            None
        };

        Ok(MapRequest {
            authoritative,
            probe,
            smr,
            pitr,
            smr_invoked,
            nonce,
            source_eid,
            itr_rlocs,
            eid_prefixes,
            map_reply,
        })
    }
}
