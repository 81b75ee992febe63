/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Persisted per-session sequencing record.

use fixp_core::types::{ConsumerId, SessionIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the version stored in a [`SessionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VersionStatus {
    /// Negotiated version; may be re-established.
    #[default]
    Active,
    /// Pre-provisioned next version; the first Negotiate with exactly this
    /// version keeps the stored sequence numbers.
    Provisioned,
    /// Sequence numbers were reset; a new version must be negotiated.
    Superseded,
    /// Both directions finished sending; a new version must be negotiated.
    Retired,
}

impl VersionStatus {
    /// Returns true if an Establish may bind to this version.
    #[must_use]
    pub const fn is_establishable(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns the wire tag used by persistent ledgers.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Provisioned => 1,
            Self::Superseded => 2,
            Self::Retired => 3,
        }
    }

    /// Parses a persisted tag.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Active),
            1 => Some(Self::Provisioned),
            2 => Some(Self::Superseded),
            3 => Some(Self::Retired),
            _ => None,
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Provisioned => "PROVISIONED",
            Self::Superseded => "SUPERSEDED",
            Self::Retired => "RETIRED",
        };
        write!(f, "{s}")
    }
}

/// Durable sequencing state of one session.
///
/// There is one record per `session_id`, holding the most recent version.
/// Records outlive transports: a session without a connection is an offline
/// record that can be re-established, acquired or reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Current identity of the session.
    pub identity: SessionIdentity,
    /// Next sequence number expected from the peer.
    pub next_recv_seq_no: u64,
    /// Next sequence number to assign to an outbound message.
    pub next_sent_seq_no: u64,
    /// Last accepted keep-alive interval in milliseconds.
    pub keep_alive_ms: u64,
    /// Consumer that last owned the session, if any.
    pub last_owner: Option<ConsumerId>,
    /// Lifecycle of `identity.session_ver_id`.
    pub status: VersionStatus,
    /// We sent FinishedSending for this version.
    pub finished_sending_local: bool,
    /// The peer sent FinishedSending for this version.
    pub finished_sending_remote: bool,
}

impl SessionRecord {
    /// Creates a fresh record with both sequences at 1.
    #[must_use]
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity,
            next_recv_seq_no: 1,
            next_sent_seq_no: 1,
            keep_alive_ms: 0,
            last_owner: None,
            status: VersionStatus::Active,
            finished_sending_local: false,
            finished_sending_remote: false,
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: VersionStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets both sequence numbers.
    #[must_use]
    pub fn with_sequences(mut self, next_recv: u64, next_sent: u64) -> Self {
        self.next_recv_seq_no = next_recv;
        self.next_sent_seq_no = next_sent;
        self
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.identity.session_id
    }

    /// Returns true once both directions have finished sending.
    #[inline]
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished_sending_local && self.finished_sending_remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_starts_at_one() {
        let record = SessionRecord::new(SessionIdentity::new(42, 1));
        assert_eq!(record.next_recv_seq_no, 1);
        assert_eq!(record.next_sent_seq_no, 1);
        assert_eq!(record.status, VersionStatus::Active);
        assert!(!record.is_finished());
    }

    #[test]
    fn test_status_tags() {
        for status in [
            VersionStatus::Active,
            VersionStatus::Provisioned,
            VersionStatus::Superseded,
            VersionStatus::Retired,
        ] {
            assert_eq!(VersionStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(VersionStatus::from_u8(9), None);
        assert!(VersionStatus::Active.is_establishable());
        assert!(!VersionStatus::Retired.is_establishable());
    }
}
