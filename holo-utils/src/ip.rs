//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns the address family of the address.
    fn address_family(&self) -> AddressFamily;

    // Returns the unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;

    // Returns a host prefix for the address.
    fn to_host_prefix(&self) -> IpNetwork;
}

// Extension methods for IpNetwork.
pub trait IpNetworkExt {
    // Returns the address family of the prefix.
    fn address_family(&self) -> AddressFamily;

    // Returns the prefix with all host bits cleared.
    fn apply_mask(&self) -> IpNetwork;

    // Returns the prefix that covers the entire address family.
    fn default_route(af: AddressFamily) -> IpNetwork;

    // Returns whether `other` is fully contained within `self`.
    fn contains_prefix(&self, other: &IpNetwork) -> bool;

    // Returns whether the address ranges of `self` and `other` intersect.
    fn overlaps(&self, other: &IpNetwork) -> bool;
}

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn addr_len(&self) -> usize {
        match self {
            AddressFamily::Ipv4 => 4,
            AddressFamily::Ipv6 => 16,
        }
    }

    pub fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    fn to_host_prefix(&self) -> IpNetwork {
        let plen = self.address_family().max_prefixlen();
        IpNetwork::new(*self, plen).unwrap()
    }
}

// ===== impl IpNetwork =====

impl IpNetworkExt for IpNetwork {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn apply_mask(&self) -> IpNetwork {
        IpNetwork::new(self.network(), self.prefix()).unwrap()
    }

    fn default_route(af: AddressFamily) -> IpNetwork {
        IpNetwork::new(IpAddr::unspecified(af), 0).unwrap()
    }

    fn contains_prefix(&self, other: &IpNetwork) -> bool {
        match (self, other) {
            (IpNetwork::V4(net), IpNetwork::V4(other)) => {
                net.prefix() <= other.prefix() && net.contains(other.network())
            }
            (IpNetwork::V6(net), IpNetwork::V6(other)) => {
                net.prefix() <= other.prefix() && net.contains(other.network())
            }
            _ => false,
        }
    }

    fn overlaps(&self, other: &IpNetwork) -> bool {
        // Two aligned prefixes either nest or are disjoint.
        self.contains_prefix(other) || other.contains_prefix(self)
    }
}

// ===== unit tests =====
