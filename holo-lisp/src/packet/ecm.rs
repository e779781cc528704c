//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use holo_utils::bytes::{BytesExt, BytesMutExt};
use internet_checksum::Checksum;
use serde::{Deserialize, Serialize};

use crate::packet::Message;
use crate::packet::consts::{LISP_CONTROL_PORT, MessageType};
use crate::packet::error::{DecodeError, DecodeResult};

//
// Encapsulated Control Message.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Type=8 |S|D|E|M|            Reserved                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       IPv4 or IPv6 Header                     |
// |                  (uses RLOC or EID addresses)                 |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |       Source Port = xxxx      |       Dest Port = 4342        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           UDP Length          |        UDP Checksum           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      LISP Control Message                     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// The inner IP and UDP headers are reduced to the fields that matter to the
// control plane: the inner addresses, ports and TTL.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Ecm {
    pub security: bool,
    pub ddt_originated: bool,
    pub ttl: u8,
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub message: Box<Message>,
}

// ===== impl Ecm =====

impl Ecm {
    const FLAG_S: u8 = 0x08;
    const FLAG_D: u8 = 0x04;
    const IPV4_HDR_LEN: usize = 20;
    const UDP_HDR_LEN: usize = 8;
    const IPPROTO_UDP: u8 = 17;

    pub fn new(
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
        ttl: u8,
    ) -> Ecm {
        Ecm {
            security: false,
            ddt_originated: false,
            ttl,
            source,
            destination,
            message: Box::new(message),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let mut flags = (MessageType::EncapsulatedControl as u8) << 4;
        if self.security {
            flags |= Self::FLAG_S;
        }
        if self.ddt_originated {
            flags |= Self::FLAG_D;
        }
        buf.put_u8(flags);
        buf.put_u24(0);

        let payload = self.message.encode();
        let udp_len = (Self::UDP_HDR_LEN + payload.len()) as u16;
        let (src, dst) = self.inner_addresses();

        // Inner IP header.
        let ip_start = buf.len();
        match (src, dst) {
            (IpAddr::V4(src), IpAddr::V4(dst)) => {
                buf.put_u8(0x45);
                buf.put_u8(0);
                buf.put_u16(Self::IPV4_HDR_LEN as u16 + udp_len);
                buf.put_u16(0);
                buf.put_u16(0);
                buf.put_u8(self.ttl);
                buf.put_u8(Self::IPPROTO_UDP);
                buf.put_u16(0);
                buf.put_ipv4(&src);
                buf.put_ipv4(&dst);

                let mut cksum = Checksum::new();
                cksum.add_bytes(&buf[ip_start..]);
                let cksum = u16::from_be_bytes(cksum.checksum());
                buf.set_u16_at(ip_start + 10, cksum);
            }
            (src, dst) => {
                buf.put_u32(0x6000_0000);
                buf.put_u16(udp_len);
                buf.put_u8(Self::IPPROTO_UDP);
                buf.put_u8(self.ttl);
                buf.put_ip(&src);
                buf.put_ip(&dst);
            }
        }

        // Inner UDP header.
        let udp_start = buf.len();
        buf.put_u16(self.source.port());
        buf.put_u16(self.destination.port());
        buf.put_u16(udp_len);
        buf.put_u16(0);
        buf.put_slice(&payload);

        let mut cksum = Checksum::new();
        add_pseudo_header(&mut cksum, &src, &dst, udp_len);
        cksum.add_bytes(&buf[udp_start..]);
        let cksum = match u16::from_be_bytes(cksum.checksum()) {
            // A computed checksum of zero is transmitted as all ones.
            0 => 0xffff,
            cksum => cksum,
        };
        buf.set_u16_at(udp_start + 6, cksum);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = buf.try_get_u8()?;
        let security = flags & Self::FLAG_S != 0;
        let ddt_originated = flags & Self::FLAG_D != 0;
        let _reserved = buf.try_get_u24()?;

        // Inner IP header.
        if !buf.has_remaining() {
            return Err(DecodeError::ReadOutOfBounds);
        }
        let (src, dst, ttl) = match buf[0] >> 4 {
            4 => {
                let ihl = (buf.try_get_u8()? & 0x0f) as usize * 4;
                if ihl < Self::IPV4_HDR_LEN {
                    return Err(DecodeError::InvalidInnerHeader);
                }
                let _tos = buf.try_get_u8()?;
                let _total_len = buf.try_get_u16()?;
                let _id = buf.try_get_u16()?;
                let _flags_offset = buf.try_get_u16()?;
                let ttl = buf.try_get_u8()?;
                let proto = buf.try_get_u8()?;
                let _cksum = buf.try_get_u16()?;
                let src = IpAddr::from(buf.try_get_ipv4()?);
                let dst = IpAddr::from(buf.try_get_ipv4()?);
                let _options = buf.try_split_to(ihl - Self::IPV4_HDR_LEN)?;
                if proto != Self::IPPROTO_UDP {
                    return Err(DecodeError::InvalidInnerHeader);
                }
                (src, dst, ttl)
            }
            6 => {
                let _ver_tc_flow = buf.try_get_u32()?;
                let _payload_len = buf.try_get_u16()?;
                let next_header = buf.try_get_u8()?;
                let hop_limit = buf.try_get_u8()?;
                let src = IpAddr::from(buf.try_get_ipv6()?);
                let dst = IpAddr::from(buf.try_get_ipv6()?);
                if next_header != Self::IPPROTO_UDP {
                    return Err(DecodeError::InvalidInnerHeader);
                }
                (src, dst, hop_limit)
            }
            _ => return Err(DecodeError::InvalidInnerHeader),
        };

        // Inner UDP header.
        let sport = buf.try_get_u16()?;
        let dport = buf.try_get_u16()?;
        let _udp_len = buf.try_get_u16()?;
        let _cksum = buf.try_get_u16()?;
        if dport != LISP_CONTROL_PORT {
            return Err(DecodeError::InvalidInnerPort(dport));
        }

        // Inner LISP message.
        if buf.has_remaining()
            && buf[0] >> 4 == MessageType::EncapsulatedControl as u8
        {
            return Err(DecodeError::NestedEncapsulation);
        }
        let message = Message::decode_buf(buf)?;

        Ok(Ecm {
            security,
            ddt_originated,
            ttl,
            source: SocketAddr::new(src, sport),
            destination: SocketAddr::new(dst, dport),
            message: Box::new(message),
        })
    }

    // Returns the inner source and destination addresses. Mixed address
    // families are encoded as IPv6 using IPv4-mapped addresses.
    fn inner_addresses(&self) -> (IpAddr, IpAddr) {
        match (self.source.ip(), self.destination.ip()) {
            (IpAddr::V4(src), IpAddr::V6(dst)) => {
                (IpAddr::V6(src.to_ipv6_mapped()), IpAddr::V6(dst))
            }
            (IpAddr::V6(src), IpAddr::V4(dst)) => {
                (IpAddr::V6(src), IpAddr::V6(dst.to_ipv6_mapped()))
            }
            (src, dst) => (src, dst),
        }
    }
}

// ===== helper functions =====

fn add_pseudo_header(
    cksum: &mut Checksum,
    src: &IpAddr,
    dst: &IpAddr,
    udp_len: u16,
) {
    let mut pseudo = BytesMut::new();
    pseudo.put_ip(src);
    pseudo.put_ip(dst);
    match src {
        IpAddr::V4(_) => {
            pseudo.put_u8(0);
            pseudo.put_u8(Ecm::IPPROTO_UDP);
            pseudo.put_u16(udp_len);
        }
        IpAddr::V6(_) => {
            pseudo.put_u32(udp_len as u32);
            pseudo.put_u24(0);
            pseudo.put_u8(Ecm::IPPROTO_UDP);
        }
    }
    cksum.add_bytes(&pseudo);
}
