//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use holo_utils::bytes::{BytesExt, BytesMutExt};
use holo_utils::ip::{AddressFamily, IpAddrExt, IpNetworkExt};
use ipnetwork::IpNetwork;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{Afi, LcafType};
use crate::packet::error::{DecodeError, DecodeResult};

//
// EID prefix.
//
// Encoded either as a plain AFI address or wrapped in an Instance ID LCAF:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           AFI = 16387         |     Rsvd1     |     Flags     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Type = 2    | IID mask-len  |             Length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Instance ID                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |              AFI = x          |         Address  ...          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// The mask length is carried by the enclosing record, not by the address.
//
#[derive(Clone, Copy, Debug, Eq, Hash, new, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct EidPrefix {
    pub instance_id: Option<u32>,
    pub prefix: IpNetwork,
}

// LCAF common header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct LcafHdr {
    pub lcaf_type: LcafType,
    // Type-specific byte (IID mask-len for the Instance ID type).
    pub type_data: u8,
    pub length: u16,
}

// ===== impl EidPrefix =====

impl EidPrefix {
    // Returns an EID prefix with the host bits cleared.
    pub fn masked(instance_id: Option<u32>, prefix: IpNetwork) -> EidPrefix {
        EidPrefix {
            instance_id,
            prefix: prefix.apply_mask(),
        }
    }

    // Returns the instance-id, where the absence of an Instance ID LCAF means
    // the default instance.
    pub fn iid(&self) -> u32 {
        self.instance_id.unwrap_or(0)
    }

    pub fn address_family(&self) -> AddressFamily {
        self.prefix.address_family()
    }

    pub fn mask_len(&self) -> u8 {
        self.prefix.prefix()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let addr = self.prefix.ip();
        if let Some(instance_id) = self.instance_id {
            let length = 4 + 2 + addr.address_family().addr_len();
            LcafHdr {
                lcaf_type: LcafType::InstanceId,
                type_data: 0,
                length: length as u16,
            }
            .encode(buf);
            buf.put_u32(instance_id);
        }
        encode_afi_address(buf, Some(&addr));
    }

    pub(crate) fn decode(buf: &mut Bytes, mask_len: u8) -> DecodeResult<Self> {
        let afi = buf.try_get_u16()?;
        let instance_id;
        let addr = match Afi::from_u16(afi) {
            Some(Afi::Ipv4 | Afi::Ipv6) => {
                instance_id = None;
                decode_ip(buf, afi)?
            }
            Some(Afi::Lcaf) => {
                let hdr = LcafHdr::decode(buf)?;
                if hdr.lcaf_type != LcafType::InstanceId {
                    return Err(DecodeError::UnexpectedAfi(afi));
                }
                let mut buf_lcaf = buf.try_split_to(hdr.length as usize)?;
                instance_id = Some(buf_lcaf.try_get_u32()?);
                let afi = buf_lcaf.try_get_u16()?;
                decode_ip(&mut buf_lcaf, afi)?
            }
            Some(Afi::None) => return Err(DecodeError::UnexpectedAfi(afi)),
            None => return Err(DecodeError::UnknownAfi(afi)),
        };

        let prefix = IpNetwork::new(addr, mask_len)
            .map_err(|_| DecodeError::InvalidMaskLength(mask_len))?;
        Ok(EidPrefix::masked(instance_id, prefix))
    }
}

impl std::fmt::Display for EidPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.instance_id {
            Some(instance_id) => write!(f, "[{}]{}", instance_id, self.prefix),
            None => write!(f, "{}", self.prefix),
        }
    }
}

// ===== impl LcafHdr =====

impl LcafHdr {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(Afi::Lcaf as u16);
        // Rsvd1.
        buf.put_u8(0);
        // Flags.
        buf.put_u8(0);
        buf.put_u8(self.lcaf_type as u8);
        buf.put_u8(self.type_data);
        buf.put_u16(self.length);
    }

    // Decodes the LCAF header. The LCAF AFI must have been consumed already.
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let _rsvd1 = buf.try_get_u8()?;
        let _flags = buf.try_get_u8()?;
        let lcaf_type = buf.try_get_u8()?;
        let lcaf_type = LcafType::from_u8(lcaf_type)
            .ok_or(DecodeError::UnknownLcafType(lcaf_type))?;
        let type_data = buf.try_get_u8()?;
        let length = buf.try_get_u16()?;
        if length as usize > buf.remaining() {
            return Err(DecodeError::InvalidLcafLength(length));
        }

        Ok(LcafHdr {
            lcaf_type,
            type_data,
            length,
        })
    }
}

// ===== global functions =====

pub(crate) fn afi(addr: &IpAddr) -> Afi {
    match addr.address_family() {
        AddressFamily::Ipv4 => Afi::Ipv4,
        AddressFamily::Ipv6 => Afi::Ipv6,
    }
}

// Encodes an AFI-prefixed address, using AFI 0 for a missing address.
pub(crate) fn encode_afi_address(buf: &mut BytesMut, addr: Option<&IpAddr>) {
    match addr {
        Some(addr) => {
            buf.put_u16(afi(addr) as u16);
            buf.put_ip(addr);
        }
        None => buf.put_u16(Afi::None as u16),
    }
}

// Decodes an AFI-prefixed address. AFI 0 yields `None`. An Instance ID LCAF
// is unwrapped and its instance-id discarded.
pub(crate) fn decode_afi_address(
    buf: &mut Bytes,
) -> DecodeResult<Option<IpAddr>> {
    let afi = buf.try_get_u16()?;
    match Afi::from_u16(afi) {
        Some(Afi::None) => Ok(None),
        Some(Afi::Ipv4 | Afi::Ipv6) => decode_ip(buf, afi).map(Some),
        Some(Afi::Lcaf) => {
            let hdr = LcafHdr::decode(buf)?;
            let mut buf_lcaf = buf.try_split_to(hdr.length as usize)?;
            match hdr.lcaf_type {
                LcafType::InstanceId => {
                    let _instance_id = buf_lcaf.try_get_u32()?;
                    decode_afi_address(&mut buf_lcaf)
                }
                _ => Err(DecodeError::UnexpectedAfi(afi)),
            }
        }
        None => Err(DecodeError::UnknownAfi(afi)),
    }
}

fn decode_ip(buf: &mut Bytes, afi: u16) -> DecodeResult<IpAddr> {
    match Afi::from_u16(afi) {
        Some(Afi::Ipv4) => Ok(buf.try_get_ipv4()?.into()),
        Some(Afi::Ipv6) => Ok(buf.try_get_ipv6()?.into()),
        _ => Err(DecodeError::UnexpectedAfi(afi)),
    }
}
