//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// UDP port used by the LISP control plane.
pub const LISP_CONTROL_PORT: u16 = 4342;

// LISP Packet Types.
//
// IANA registry:
// https://www.iana.org/assignments/lisp-parameters/lisp-parameters.xhtml#lisp-packet-types
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum MessageType {
    MapRequest = 1,
    MapReply = 2,
    MapRegister = 3,
    MapNotify = 4,
    // RFC 8111
    MapReferral = 6,
    // RFC 9735
    Info = 7,
    EncapsulatedControl = 8,
}

// Address Family Numbers.
//
// IANA registry:
// https://www.iana.org/assignments/address-family-numbers/address-family-numbers.xhtml
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Afi {
    None = 0,
    Ipv4 = 1,
    Ipv6 = 2,
    // RFC 8060
    Lcaf = 16387,
}

// LISP Canonical Address Format (LCAF) Types.
//
// IANA registry:
// https://www.iana.org/assignments/lisp-lcaf/lisp-lcaf.xhtml
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum LcafType {
    InstanceId = 2,
    NatTraversal = 7,
}

// Map-Reply Record actions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum MapReplyAction {
    NoAction = 0,
    NativelyForward = 1,
    SendMapRequest = 2,
    Drop = 3,
}

// Map-Referral Record actions (RFC 8111).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum ReferralAction {
    NodeReferral = 0,
    MsReferral = 1,
    MsAck = 2,
    MsNotRegistered = 3,
    DelegationHole = 4,
    NotAuthoritative = 5,
}

// LISP Key IDs.
//
// IANA registry:
// https://www.iana.org/assignments/lisp-parameters/lisp-parameters.xhtml#lisp-key-ids
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyId {
    #[default]
    None = 0,
    HmacSha1_96 = 1,
    HmacSha256_128 = 2,
}

// Locator record flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LocatorFlags: u16 {
        const LOCAL = 0x0004;
        const PROBED = 0x0002;
        const REACHABLE = 0x0001;
    }
}
