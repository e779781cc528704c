//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// LISP message decoding errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    UnknownMessageType(u8),
    MissingRecords,
    UnknownAfi(u16),
    UnknownLcafType(u8),
    UnexpectedAfi(u16),
    InvalidLcafLength(u16),
    InvalidMaskLength(u8),
    UnknownKeyId(u16),
    InvalidAuthLength(u16),
    UnknownAction(u8),
    UnsupportedSignature(u8),
    InvalidInnerHeader,
    InvalidInnerPort(u16),
    NestedEncapsulation,
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::UnknownMessageType(msg_type) => {
                write!(f, "unknown message type: {msg_type}")
            }
            DecodeError::MissingRecords => {
                write!(f, "message carries no records")
            }
            DecodeError::UnknownAfi(afi) => {
                write!(f, "unknown address family: {afi}")
            }
            DecodeError::UnknownLcafType(lcaf_type) => {
                write!(f, "unknown LCAF type: {lcaf_type}")
            }
            DecodeError::UnexpectedAfi(afi) => {
                write!(f, "unexpected address family: {afi}")
            }
            DecodeError::InvalidLcafLength(length) => {
                write!(f, "invalid LCAF length: {length}")
            }
            DecodeError::InvalidMaskLength(mask_len) => {
                write!(f, "invalid EID mask length: {mask_len}")
            }
            DecodeError::UnknownKeyId(key_id) => {
                write!(f, "unknown key ID: {key_id}")
            }
            DecodeError::InvalidAuthLength(length) => {
                write!(f, "invalid authentication data length: {length}")
            }
            DecodeError::UnknownAction(action) => {
                write!(f, "unknown record action: {action}")
            }
            DecodeError::UnsupportedSignature(count) => {
                write!(f, "unsupported referral signatures: {count}")
            }
            DecodeError::InvalidInnerHeader => {
                write!(f, "invalid encapsulated IP/UDP header")
            }
            DecodeError::InvalidInnerPort(port) => {
                write!(f, "invalid encapsulated destination port: {port}")
            }
            DecodeError::NestedEncapsulation => {
                write!(f, "nested encapsulated control message")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}
