/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Reject, termination and reply status codes.
//!
//! Every code is a single `u8` on the wire. The `Display` form is the
//! upper-snake protocol name (`ALREADY_NEGOTIATED`, `OUT_OF_RANGE`, ...).

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Common behaviour of the wire-level code enums.
pub trait WireCode: Copy + Sized {
    /// Decodes the code from its wire value.
    fn from_wire(value: u8) -> Option<Self>;

    /// Returns the wire value.
    fn to_wire(self) -> u8;

    /// Returns the protocol name of the code.
    fn name(self) -> &'static str;
}

macro_rules! wire_code {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl WireCode for $ty {
            fn from_wire(value: u8) -> Option<Self> {
                <Self as FromPrimitive>::from_u8(value)
            }

            fn to_wire(self) -> u8 {
                ToPrimitive::to_u8(&self).unwrap_or_default()
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

/// Reasons a Negotiate is rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NegotiationRejectCode {
    /// No specific reason.
    Unspecified = 0,
    /// Authentication failed.
    Credentials = 1,
    /// Firm is not permitted.
    InvalidFirm = 2,
    /// Identity already negotiated with an equal or higher version, or in use.
    AlreadyNegotiated = 3,
    /// Request timestamp missing or invalid.
    InvalidTimestamp = 4,
    /// Session version not acceptable.
    InvalidSessionVerId = 5,
}

wire_code!(NegotiationRejectCode {
    Unspecified => "UNSPECIFIED",
    Credentials => "CREDENTIALS",
    InvalidFirm => "INVALID_FIRM",
    AlreadyNegotiated => "ALREADY_NEGOTIATED",
    InvalidTimestamp => "INVALID_TIMESTAMP",
    InvalidSessionVerId => "INVALID_SESSIONVERID",
});

/// Reasons an Establish is rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstablishRejectCode {
    /// No specific reason.
    Unspecified = 0,
    /// Authentication failed.
    Credentials = 1,
    /// No valid negotiation exists for the identity.
    Unnegotiated = 2,
    /// The transport already carries an established session.
    AlreadyEstablished = 3,
    /// Request timestamp missing or invalid.
    InvalidTimestamp = 4,
    /// Keep-alive interval outside the configured bounds.
    InvalidKeepAliveInterval = 5,
    /// Requested next sequence number is zero or below what was received.
    InvalidNextSeqNo = 6,
    /// Too many establishment attempts.
    EstablishAttemptsExceeded = 7,
}

wire_code!(EstablishRejectCode {
    Unspecified => "UNSPECIFIED",
    Credentials => "CREDENTIALS",
    Unnegotiated => "UNNEGOTIATED",
    AlreadyEstablished => "ALREADY_ESTABLISHED",
    InvalidTimestamp => "INVALID_TIMESTAMP",
    InvalidKeepAliveInterval => "INVALID_KEEPALIVE_INTERVAL",
    InvalidNextSeqNo => "INVALID_NEXTSEQNO",
    EstablishAttemptsExceeded => "ESTABLISH_ATTEMPTS_EXCEEDED",
});

/// Reasons a RetransmitRequest is rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetransmitRejectCode {
    /// Requested range is not retransmittable.
    OutOfRange = 0,
    /// Request names a session other than the bound one.
    InvalidSession = 1,
    /// Range or request-rate limit exceeded.
    RequestLimitExceeded = 2,
}

wire_code!(RetransmitRejectCode {
    OutOfRange => "OUT_OF_RANGE",
    InvalidSession => "INVALID_SESSION",
    RequestLimitExceeded => "REQUEST_LIMIT_EXCEEDED",
});

/// Reason carried by a Terminate frame.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationCode {
    /// Protocol violation or unspecified reason.
    Unspecified = 0,
    /// Normal end of session.
    Finished = 1,
    /// Terminate for an identity that was never negotiated.
    Unnegotiated = 2,
    /// Terminate for an identity that is not established on this transport.
    NotEstablished = 3,
    /// Nothing received within the liveness interval.
    KeepAliveIntervalLapsed = 4,
}

wire_code!(TerminationCode {
    Unspecified => "UNSPECIFIED",
    Finished => "FINISHED",
    Unnegotiated => "UNNEGOTIATED",
    NotEstablished => "NOT_ESTABLISHED",
    KeepAliveIntervalLapsed => "KEEPALIVE_INTERVAL_LAPSED",
});

/// Result of a session ownership request or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionReplyStatus {
    /// Request applied.
    Ok,
    /// Another consumer holds the session (or it is not acquirable).
    OtherSessionOwner,
    /// No session with that id is known.
    UnknownSession,
}

impl fmt::Display for SessionReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::OtherSessionOwner => "OTHER_SESSION_OWNER",
            Self::UnknownSession => "UNKNOWN_SESSION",
        })
    }
}

/// Result of a throttle reconfiguration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrottleConfigurationStatus {
    /// New limit will apply from the next window.
    Ok,
    /// Window or limit was zero.
    InvalidArguments,
    /// No session with that id is known.
    UnknownSession,
    /// The session has no established transport.
    NotEstablished,
}

impl fmt::Display for ThrottleConfigurationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::InvalidArguments => "INVALID_ARGUMENTS",
            Self::UnknownSession => "UNKNOWN_SESSION",
            Self::NotEstablished => "NOT_ESTABLISHED",
        })
    }
}
