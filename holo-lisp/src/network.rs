//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::IoSliceMut;
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6,
};
use std::ops::Deref;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use holo_utils::ip::{AddressFamily, IpAddrExt};
use holo_utils::socket::{UdpSocket, UdpSocketExt};
use holo_utils::{Sender, UnboundedReceiver};
use nix::sys::socket::{self, ControlMessageOwned};
use tokio::sync::mpsc::error::SendError;

use crate::error::{Error, IoError};
use crate::packet::{LISP_CONTROL_PORT, Message};
use crate::tasks::messages::input::UdpRxMsg;
use crate::tasks::messages::output::UdpTxMsg;

// ===== global functions =====

// Creates a LISP control socket bound to the given address.
pub(crate) fn socket(addr: IpAddr) -> Result<UdpSocket, std::io::Error> {
    let sockaddr = SocketAddr::new(addr, LISP_CONTROL_PORT);
    let socket = UdpSocket::bind_reuseaddr(sockaddr)?;
    match addr.address_family() {
        AddressFamily::Ipv4 => socket.set_ipv4_pktinfo(true)?,
        AddressFamily::Ipv6 => socket.set_ipv6_pktinfo(true)?,
    }
    Ok(socket)
}

// Returns the addresses assigned to the system that the given sockets can
// receive traffic on.
pub fn local_addresses(bound: &[IpAddr]) -> Vec<IpAddr> {
    let mut addrs = vec![];
    for addr in bound {
        if !addr.is_unspecified() {
            addrs.push(*addr);
            continue;
        }

        // Wildcard socket: use all addresses of the same family.
        let ifaddrs = match nix::ifaddrs::getifaddrs() {
            Ok(ifaddrs) => ifaddrs,
            Err(error) => {
                IoError::UdpSocketError(error.into()).log();
                continue;
            }
        };
        addrs.extend(
            ifaddrs
                .filter_map(|ifaddr| ifaddr.address)
                .filter_map(|sa| sockaddr_ip(&sa))
                .filter(|ifaddr| {
                    ifaddr.address_family() == addr.address_family()
                }),
        );
    }
    addrs.sort();
    addrs.dedup();
    addrs
}

// Returns the local address the system would use to reach `dst`.
pub fn source_address(dst: IpAddr) -> Result<IpAddr, std::io::Error> {
    let bind_addr = IpAddr::unspecified(dst.address_family());
    let socket = std::net::UdpSocket::bind(SocketAddr::new(bind_addr, 0))?;
    socket.connect(SocketAddr::new(dst, LISP_CONTROL_PORT))?;
    Ok(socket.local_addr()?.ip())
}

// Selects the socket and destination to send a message to.
//
// Candidate destinations are tried in order and the first one matching the
// address family of an available socket is used.
pub fn select_destination(
    local: &[SocketAddr],
    socket: Option<usize>,
    dst: &[IpAddr],
) -> Option<(usize, IpAddr)> {
    dst.iter().find_map(|addr| {
        let af = addr.address_family();
        match socket {
            Some(idx) => local
                .get(idx)
                .filter(|local| local.ip().address_family() == af)
                .map(|_| (idx, *addr)),
            None => local
                .iter()
                .position(|local| local.ip().address_family() == af)
                .map(|idx| (idx, *addr)),
        }
    })
}

pub(crate) async fn send_packet(
    socket: &UdpSocket,
    sockaddr: SocketAddr,
    msg: &Message,
) -> Result<(), std::io::Error> {
    // Encode message.
    let buf = msg.encode();

    // Send packet.
    socket.send_to(&buf, sockaddr).await?;

    Ok(())
}

pub(crate) async fn write_loop(
    sockets: Vec<Arc<UdpSocket>>,
    mut udp_txc: UnboundedReceiver<UdpTxMsg>,
) {
    let local = sockets
        .iter()
        .filter_map(|socket| socket.local_addr().ok())
        .collect::<Vec<_>>();

    while let Some(UdpTxMsg {
        socket,
        dst,
        port,
        msg,
    }) = udp_txc.recv().await
    {
        let Some((idx, addr)) = select_destination(&local, socket, &dst)
        else {
            Error::NoUsableSocket(dst).log();
            continue;
        };

        let sockaddr = SocketAddr::new(addr, port);
        if let Err(error) = send_packet(&sockets[idx], sockaddr, &msg).await
        {
            IoError::UdpSendError(error).log();
        }
    }
}

pub(crate) async fn read_loop(
    socket: Arc<UdpSocket>,
    socket_idx: usize,
    udp_rxp: Sender<UdpRxMsg>,
) -> Result<(), SendError<UdpRxMsg>> {
    let mut buf = [0; 16384];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsgspace = nix::cmsg_space!(nix::libc::in6_pktinfo);
    let local_addr = socket
        .local_addr()
        .map(|addr| addr.ip())
        .unwrap_or(Ipv4Addr::UNSPECIFIED.into());

    loop {
        // Receive data from the network.
        match socket
            .async_io(tokio::io::Interest::READABLE, || {
                match socket::recvmsg::<socket::SockaddrStorage>(
                    socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsgspace),
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        // Retrieve source and destination addresses.
                        let src = msg.address.as_ref().and_then(sockaddr);
                        let dst = msg.cmsgs().ok().and_then(get_packet_dst);
                        Ok((src, dst, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, dst, bytes)) => {
                let Some(source) = src else {
                    continue;
                };
                let destination = dst.unwrap_or(local_addr);

                // Decode message.
                let msg = Message::decode(&iov[0].deref()[0..bytes]);
                let msg = UdpRxMsg {
                    socket: socket_idx,
                    source,
                    destination,
                    msg,
                };
                udp_rxp.send(msg).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::UdpRecvError(error).log();
            }
        }
    }
}

// ===== helper functions =====

fn sockaddr(sa: &socket::SockaddrStorage) -> Option<SocketAddr> {
    sa.as_sockaddr_in()
        .map(|sa| SocketAddrV4::from(*sa).into())
        .or_else(|| {
            sa.as_sockaddr_in6()
                .map(|sa| SocketAddrV6::from(*sa).into())
        })
}

fn sockaddr_ip(sa: &socket::SockaddrStorage) -> Option<IpAddr> {
    sockaddr(sa).map(|sa| sa.ip())
}

fn get_packet_dst(cmsgs: socket::CmsgIterator<'_>) -> Option<IpAddr> {
    for cmsg in cmsgs {
        match cmsg {
            ControlMessageOwned::Ipv4PacketInfo(pktinfo) => {
                return Some(
                    Ipv4Addr::from(u32::from_be(pktinfo.ipi_addr.s_addr))
                        .into(),
                );
            }
            ControlMessageOwned::Ipv6PacketInfo(pktinfo) => {
                return Some(Ipv6Addr::from(pktinfo.ipi6_addr.s6_addr).into());
            }
            _ => {}
        }
    }

    None
}
