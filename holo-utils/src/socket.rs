//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;

use nix::sys::socket::{setsockopt, sockopt};
use socket2::{Domain, Socket, Type};
pub use tokio::net::UdpSocket;

use crate::ip::{AddressFamily, IpAddrExt};

// Useful type definition.
type Result<T> = std::io::Result<T>;

// Extension methods for UdpSocket.
pub trait UdpSocketExt {
    // Creates a UDP socket from the given address.
    //
    // This is the same as [`UdpSocket::bind`], except that the `SO_REUSEADDR`
    // option is set before binding, and IPv6 sockets are restricted to IPv6
    // traffic so that an IPv4 socket can share the same port.
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket>;

    // Sets the value of the IP_PKTINFO option for this socket.
    fn set_ipv4_pktinfo(&self, value: bool) -> Result<()>;

    // Sets the value of the IPV6_RECVPKTINFO option for this socket.
    fn set_ipv6_pktinfo(&self, value: bool) -> Result<()>;
}

// ===== impl UdpSocket =====

impl UdpSocketExt for UdpSocket {
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket> {
        let af = addr.ip().address_family();
        let domain = match af {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        if af == AddressFamily::Ipv6 {
            socket.set_only_v6(true)?;
        }
        socket.bind(&addr.into())?;
        UdpSocket::from_std(socket.into())
    }

    fn set_ipv4_pktinfo(&self, value: bool) -> Result<()> {
        setsockopt(self, sockopt::Ipv4PacketInfo, &value)?;
        Ok(())
    }

    fn set_ipv6_pktinfo(&self, value: bool) -> Result<()> {
        setsockopt(self, sockopt::Ipv6RecvPacketInfo, &value)?;
        Ok(())
    }
}
