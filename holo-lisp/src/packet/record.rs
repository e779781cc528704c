//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::address::{
    EidPrefix, decode_afi_address, encode_afi_address,
};
use crate::packet::consts::{LocatorFlags, MapReplyAction, ReferralAction};
use crate::packet::error::{DecodeError, DecodeResult};

//
// Locator record.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |    Priority   |    Weight     |  M Priority   |   M Weight    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |        Unused Flags     |L|p|R|           Loc-AFI             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             Locator                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, Hash, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LocatorRecord {
    pub priority: u8,
    pub weight: u8,
    pub m_priority: u8,
    pub m_weight: u8,
    pub flags: LocatorFlags,
    pub address: IpAddr,
}

//
// Mapping record, as carried by Map-Reply, Map-Register and Map-Notify
// messages.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Record TTL                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Locator Count | EID mask-len  | ACT |A|      Reserved         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Rsvd  |  Map-Version Number   |       EID-Prefix-AFI          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          EID-Prefix                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Locator records ...                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MappingRecord {
    // Record TTL, in minutes.
    pub ttl: u32,
    pub action: MapReplyAction,
    pub authoritative: bool,
    pub map_version: u16,
    pub eid_prefix: EidPrefix,
    pub locators: Vec<LocatorRecord>,
}

//
// Map-Referral record (RFC 8111).
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Record TTL                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Referral Count| EID mask-len  | ACT |A|I|     Reserved        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |SigCnt |   Map Version Number  |            EID-AFI            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          EID-Prefix                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Referral records ...                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, new, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ReferralRecord {
    // Record TTL, in minutes.
    pub ttl: u32,
    pub action: ReferralAction,
    pub authoritative: bool,
    pub incomplete: bool,
    pub map_version: u16,
    pub eid_prefix: EidPrefix,
    pub locators: Vec<LocatorRecord>,
}

// ===== impl LocatorRecord =====

impl LocatorRecord {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.priority);
        buf.put_u8(self.weight);
        buf.put_u8(self.m_priority);
        buf.put_u8(self.m_weight);
        buf.put_u16(self.flags.bits());
        encode_afi_address(buf, Some(&self.address));
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let priority = buf.try_get_u8()?;
        let weight = buf.try_get_u8()?;
        let m_priority = buf.try_get_u8()?;
        let m_weight = buf.try_get_u8()?;
        let flags = LocatorFlags::from_bits_truncate(buf.try_get_u16()?);
        let address = decode_afi_address(buf)?
            .ok_or(DecodeError::UnexpectedAfi(0))?;

        Ok(LocatorRecord {
            priority,
            weight,
            m_priority,
            m_weight,
            flags,
            address,
        })
    }

    pub fn is_local(&self) -> bool {
        self.flags.contains(LocatorFlags::LOCAL)
    }

    pub fn is_reachable(&self) -> bool {
        self.flags.contains(LocatorFlags::REACHABLE)
    }
}

// ===== impl MappingRecord =====

impl MappingRecord {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ttl);
        buf.put_u8(self.locators.len() as u8);
        buf.put_u8(self.eid_prefix.mask_len());
        let mut flags = (self.action as u16) << 13;
        if self.authoritative {
            flags |= 0x1000;
        }
        buf.put_u16(flags);
        buf.put_u16(self.map_version & 0x0fff);
        self.eid_prefix.encode(buf);
        for locator in &self.locators {
            locator.encode(buf);
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let ttl = buf.try_get_u32()?;
        let locator_count = buf.try_get_u8()?;
        let mask_len = buf.try_get_u8()?;
        let flags = buf.try_get_u16()?;
        let action = (flags >> 13) as u8;
        let action = MapReplyAction::from_u8(action)
            .ok_or(DecodeError::UnknownAction(action))?;
        let authoritative = flags & 0x1000 != 0;
        let map_version = buf.try_get_u16()? & 0x0fff;
        let eid_prefix = EidPrefix::decode(buf, mask_len)?;
        let locators = (0..locator_count)
            .map(|_| LocatorRecord::decode(buf))
            .collect::<DecodeResult<Vec<_>>>()?;

        Ok(MappingRecord {
            ttl,
            action,
            authoritative,
            map_version,
            eid_prefix,
            locators,
        })
    }
}

// ===== impl ReferralRecord =====

impl ReferralRecord {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ttl);
        buf.put_u8(self.locators.len() as u8);
        buf.put_u8(self.eid_prefix.mask_len());
        let mut flags = (self.action as u16) << 13;
        if self.authoritative {
            flags |= 0x1000;
        }
        if self.incomplete {
            flags |= 0x0800;
        }
        buf.put_u16(flags);
        // Signatures are never included.
        buf.put_u16(self.map_version & 0x0fff);
        self.eid_prefix.encode(buf);
        for locator in &self.locators {
            locator.encode(buf);
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let ttl = buf.try_get_u32()?;
        let referral_count = buf.try_get_u8()?;
        let mask_len = buf.try_get_u8()?;
        let flags = buf.try_get_u16()?;
        let action = (flags >> 13) as u8;
        let action = ReferralAction::from_u8(action)
            .ok_or(DecodeError::UnknownAction(action))?;
        let authoritative = flags & 0x1000 != 0;
        let incomplete = flags & 0x0800 != 0;
        let version = buf.try_get_u16()?;
        let sig_count = (version >> 12) as u8;
        if sig_count != 0 {
            return Err(DecodeError::UnsupportedSignature(sig_count));
        }
        let map_version = version & 0x0fff;
        let eid_prefix = EidPrefix::decode(buf, mask_len)?;
        let locators = (0..referral_count)
            .map(|_| LocatorRecord::decode(buf))
            .collect::<DecodeResult<Vec<_>>>()?;

        Ok(ReferralRecord {
            ttl,
            action,
            authoritative,
            incomplete,
            map_version,
            eid_prefix,
            locators,
        })
    }
}
