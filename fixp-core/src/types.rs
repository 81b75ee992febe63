/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Core types for FIXP session operations.
//!
//! This module provides fundamental types used throughout the engine:
//! - [`SessionIdentity`]: `(session_id, session_ver_id)` pair naming a negotiated session
//! - [`SeqNo`]: 1-based message sequence number
//! - [`ConnectionId`] / [`ConsumerId`]: transport instance and consumer process handles
//! - [`Timestamp`]: nanosecond wall-clock timestamp carried in control frames
//! - [`Credentials`]: authentication fields presented in Negotiate and Establish

use arrayvec::ArrayString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for the short identifying strings (sub id, location id).
pub const SHORT_STRING_MAX_LEN: usize = 32;

/// Identity of a negotiated session.
///
/// `session_ver_id` distinguishes successive negotiations of the same
/// `session_id`. It must strictly increase for ordinary renegotiation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SessionIdentity {
    /// Session identifier assigned to the client.
    pub session_id: u64,
    /// Version of the session identifier.
    pub session_ver_id: u64,
}

impl SessionIdentity {
    /// Creates a new session identity.
    #[inline]
    #[must_use]
    pub const fn new(session_id: u64, session_ver_id: u64) -> Self {
        Self {
            session_id,
            session_ver_id,
        }
    }

    /// Returns the same session with a different version.
    #[inline]
    #[must_use]
    pub const fn with_ver(self, session_ver_id: u64) -> Self {
        Self {
            session_id: self.session_id,
            session_ver_id,
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/v{}", self.session_id, self.session_ver_id)
    }
}

/// FIXP message sequence number.
///
/// Sequence numbers start at 1 and increment for each business message
/// sent in one direction of a session version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SeqNo(u64);

impl SeqNo {
    /// Creates a new sequence number.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence number value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Checks if this sequence number is valid (>= 1).
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 1
    }
}

impl Default for SeqNo {
    fn default() -> Self {
        Self(1)
    }
}

impl From<u64> for SeqNo {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SeqNo> for u64 {
    fn from(seq: SeqNo) -> Self {
        seq.0
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one transport connection.
///
/// A new id is allocated for every accepted socket; it never names a
/// session, only the physical connection currently carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of a consumer ("library") process that can own sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(pub u32);

impl ConsumerId {
    /// The engine itself; sessions held by it have no consumer owner.
    pub const ENGINE: Self = Self(0);
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Wall-clock timestamp with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
    nanos_since_epoch: u64,
}

impl Timestamp {
    /// Creates a timestamp from nanoseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self {
            nanos_since_epoch: nanos,
        }
    }

    /// Creates a timestamp from milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos_since_epoch: millis * 1_000_000,
        }
    }

    /// Returns the current UTC timestamp.
    #[inline]
    #[must_use]
    pub fn now() -> Self {
        let dt = Utc::now();
        Self {
            nanos_since_epoch: dt.timestamp_nanos_opt().unwrap_or(0) as u64,
        }
    }

    /// Returns nanoseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.nanos_since_epoch
    }

    /// Returns milliseconds since Unix epoch.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.nanos_since_epoch / 1_000_000
    }

    /// Returns true for the zero timestamp, which peers must never send.
    #[inline]
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.nanos_since_epoch == 0
    }

    /// Converts to a chrono `DateTime<Utc>`.
    #[must_use]
    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.nanos_since_epoch as i64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y%m%d-%H:%M:%S%.9f"))
    }
}

/// Bounded string used for the optional identifying credential fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ShortString(ArrayString<SHORT_STRING_MAX_LEN>);

impl ShortString {
    /// Creates a new string, `None` if it exceeds [`SHORT_STRING_MAX_LEN`].
    #[must_use]
    pub fn new(s: &str) -> Option<Self> {
        ArrayString::from(s).ok().map(Self)
    }

    /// Returns the string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the string is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for ShortString {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ShortString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ShortString {
    type Err = arrayvec::CapacityError<()>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArrayString::try_from(s)
            .map(Self)
            .map_err(|_| arrayvec::CapacityError::new(()))
    }
}

/// Authentication fields carried by Negotiate and Establish.
///
/// `sub_id` and `location_id` are optional on the wire; when absent they
/// decode as empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Firm (entering firm) code.
    pub firm_id: u32,
    /// Opaque access key checked by the authentication strategy.
    pub access_key: String,
    /// Optional sub identifier.
    pub sub_id: ShortString,
    /// Optional location identifier.
    pub location_id: ShortString,
}

impl Credentials {
    /// Creates credentials with empty optional fields.
    #[must_use]
    pub fn new(firm_id: u32, access_key: impl Into<String>) -> Self {
        Self {
            firm_id,
            access_key: access_key.into(),
            sub_id: ShortString::default(),
            location_id: ShortString::default(),
        }
    }

    /// Sets the sub identifier.
    #[must_use]
    pub fn with_sub_id(mut self, sub_id: ShortString) -> Self {
        self.sub_id = sub_id;
        self
    }

    /// Sets the location identifier.
    #[must_use]
    pub fn with_location_id(mut self, location_id: ShortString) -> Self {
        self.location_id = location_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_no_operations() {
        let seq = SeqNo::new(5);
        assert_eq!(seq.value(), 5);
        assert_eq!(seq.next().value(), 6);
        assert!(seq.is_valid());
        assert!(!SeqNo::new(0).is_valid());
        assert_eq!(SeqNo::default().value(), 1);
    }

    #[test]
    fn test_session_identity_display_and_order() {
        let v1 = SessionIdentity::new(42, 1);
        let v2 = v1.with_ver(2);
        assert_eq!(v1.to_string(), "42/v1");
        assert!(v1 < v2);
        assert_eq!(v2.session_id, 42);
    }

    #[test]
    fn test_timestamp_conversions() {
        let ts = Timestamp::from_millis(1000);
        assert_eq!(ts.as_millis(), 1000);
        assert_eq!(ts.as_nanos(), 1_000_000_000);
        assert!(!ts.is_unset());
        assert!(Timestamp::from_nanos(0).is_unset());
    }

    #[test]
    fn test_timestamp_display() {
        let ts = Timestamp::from_millis(0);
        assert!(ts.to_string().starts_with("19700101-00:00:00"));
    }

    #[test]
    fn test_short_string_capacity() {
        assert_eq!(ShortString::new("DESK1").map(|s| s.len()), Some(5));
        let long = "A".repeat(SHORT_STRING_MAX_LEN + 1);
        assert!(ShortString::new(&long).is_none());
        assert!(ShortString::default().is_empty());
    }

    #[test]
    fn test_credentials_defaults_empty_optional_fields() {
        let creds = Credentials::new(7, "key");
        assert_eq!(creds.sub_id.as_str(), "");
        assert_eq!(creds.location_id.as_str(), "");
    }
}
