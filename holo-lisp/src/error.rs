//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, SocketAddr};

use ipnetwork::IpNetwork;
use tracing::{debug, error, warn};

use crate::config::RejectLogLevel;
use crate::packet::{DecodeError, EidPrefix, MessageType};

// LISP errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    UdpPduDecodeError(SocketAddr, DecodeError),
    UnexpectedMessage(SocketAddr, MessageType),
    UnexpectedEncapsulatedMessage(SocketAddr, MessageType),
    EcmSecurityUnsupported(SocketAddr),
    UnmatchedReply(SocketAddr, u64),
    NoUsableSocket(Vec<IpAddr>),
    // Map-Server
    MsNotFound(SocketAddr, EidPrefix),
    MsAuthFailed(SocketAddr, EidPrefix),
    MsScopeError(SocketAddr, EidPrefix, IpNetwork),
    MsMoreSpecificNotAllowed(SocketAddr, EidPrefix, IpNetwork),
    // ETR
    EtrNotFound(SocketAddr, EidPrefix),
    EtrNatCheckNoReply(IpAddr),
    EtrRegisterNoNotify(IpAddr),
    EtrInvalidNotify(IpAddr, NotifyError),
    EtrNoSourceAddress(IpAddr),
    EtrAddressFamilyMismatch(IpAddr, IpAddr),
    EtrRtrNotAvailable(IpAddr),
}

// LISP I/O errors.
#[derive(Debug)]
pub enum IoError {
    UdpSocketError(std::io::Error),
    UdpRecvError(std::io::Error),
    UdpSendError(std::io::Error),
}

// Reasons for rejecting a Map-Notify received in response to a Map-Register.
#[derive(Debug, Eq, PartialEq)]
pub enum NotifyError {
    NonceMismatch,
    KeyIdMismatch,
    AuthFailed,
    XtrIdMismatch,
    SiteIdMismatch,
    RecordCountMismatch,
    RecordMismatch(EidPrefix),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::UdpPduDecodeError(source, error) => {
                warn!(%source, %error, "{}", self);
            }
            Error::UnexpectedMessage(source, msg_type)
            | Error::UnexpectedEncapsulatedMessage(source, msg_type) => {
                warn!(%source, ?msg_type, "{}", self);
            }
            Error::EcmSecurityUnsupported(source) => {
                warn!(%source, "{}", self);
            }
            Error::UnmatchedReply(source, nonce) => {
                debug!(%source, %nonce, "{}", self);
            }
            Error::NoUsableSocket(destinations) => {
                warn!(?destinations, "{}", self);
            }
            Error::MsNotFound(source, eid_prefix)
            | Error::MsAuthFailed(source, eid_prefix) => {
                warn!(%source, %eid_prefix, "{}", self);
            }
            Error::MsScopeError(source, eid_prefix, node)
            | Error::MsMoreSpecificNotAllowed(source, eid_prefix, node) => {
                warn!(%source, %eid_prefix, %node, "{}", self);
            }
            Error::EtrNotFound(source, eid_prefix) => {
                debug!(%source, %eid_prefix, "{}", self);
            }
            Error::EtrNatCheckNoReply(map_server) => {
                debug!(%map_server, "{}", self);
            }
            Error::EtrRegisterNoNotify(map_server)
            | Error::EtrNoSourceAddress(map_server) => {
                warn!(%map_server, "{}", self);
            }
            Error::EtrInvalidNotify(map_server, reason) => {
                warn!(%map_server, ?reason, "{}", self);
            }
            Error::EtrAddressFamilyMismatch(source, map_server) => {
                error!(%source, %map_server, "{}", self);
            }
            Error::EtrRtrNotAvailable(map_server) => {
                error!(%map_server, "{}", self);
            }
        }
    }

    // Logs a rejected registration or Info-Request at the configured level.
    pub(crate) fn log_rejection(&self, level: RejectLogLevel) {
        match level {
            RejectLogLevel::Warn => self.log(),
            RejectLogLevel::Debug => debug!(error = %self, "rejected"),
        }
    }

    // Returns whether the error corresponds to an authentication or scope
    // check failure at the Map-Server.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::MsAuthFailed(..)
                | Error::MsScopeError(..)
                | Error::MsMoreSpecificNotAllowed(..)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::UdpPduDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::UnexpectedMessage(..) => {
                write!(f, "unexpected message")
            }
            Error::UnexpectedEncapsulatedMessage(..) => {
                write!(f, "unexpected encapsulated message")
            }
            Error::EcmSecurityUnsupported(..) => {
                write!(f, "LISP-Security is not supported")
            }
            Error::UnmatchedReply(..) => {
                write!(f, "reply doesn't match any outstanding request")
            }
            Error::NoUsableSocket(..) => {
                write!(f, "no socket available for the destination")
            }
            Error::MsNotFound(..) => {
                write!(f, "no Map-Server found for EID prefix")
            }
            Error::MsAuthFailed(..) => {
                write!(f, "authentication failed")
            }
            Error::MsScopeError(..) => {
                write!(f, "EID prefix outside of the Map-Server's prefix")
            }
            Error::MsMoreSpecificNotAllowed(..) => {
                write!(f, "more-specific EID prefix not allowed")
            }
            Error::EtrNotFound(..) => {
                write!(f, "no ETR found for EID prefix")
            }
            Error::EtrNatCheckNoReply(..) => {
                write!(f, "no Info-Reply received, assuming no NAT")
            }
            Error::EtrRegisterNoNotify(..) => {
                write!(f, "no Map-Notify received")
            }
            Error::EtrInvalidNotify(..) => {
                write!(f, "invalid Map-Notify")
            }
            Error::EtrNoSourceAddress(..) => {
                write!(f, "failed to determine local source address")
            }
            Error::EtrAddressFamilyMismatch(..) => {
                write!(f, "address family mismatch with the Map-Server")
            }
            Error::EtrRtrNotAvailable(..) => {
                write!(f, "RTR use forced but no Info-Reply received")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::UdpPduDecodeError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::UdpSocketError(..) => {
                write!(f, "failed to create UDP socket")
            }
            IoError::UdpRecvError(..) => {
                write!(f, "failed to receive UDP packet")
            }
            IoError::UdpSendError(..) => {
                write!(f, "failed to send UDP packet")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error) => Some(error),
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
