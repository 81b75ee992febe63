/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Connection states and the per-session state record.
//!
//! [`State`] is the protocol phase of a transport. [`ConnectionState`] is the
//! live form of a session, kept whether or not a transport is bound; it
//! converts to and from the persisted [`SessionRecord`] explicitly.

use crate::sequence::SequenceManager;
use fixp_core::types::{ConnectionId, ConsumerId, SessionIdentity};
use fixp_store::record::{SessionRecord, VersionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Protocol phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Transport connected, nothing negotiated yet.
    AwaitingNegotiate,
    /// Negotiate accepted, waiting for Establish.
    Negotiated,
    /// Business traffic flows in both directions.
    Established,
    /// We sent FinishedSending; the peer may still send.
    FinishingSend,
    /// The peer sent FinishedSending; we may still send.
    FinishingRecv,
    /// Both directions finished sending.
    Finished,
    /// We sent Terminate and wait for it to be flushed.
    SentTerminate,
    /// Terminate flushed; waiting for the peer's reply or the timeout.
    Unbinding,
    /// No transport bound.
    Unbound,
}

impl State {
    /// Returns true if the transition `self -> to` is legal.
    #[must_use]
    pub const fn can_transition_to(self, to: State) -> bool {
        use State::*;
        match (self, to) {
            (_, Unbound) => true,
            (Unbound, Negotiated | Established) => true,
            (AwaitingNegotiate, Negotiated | Established | SentTerminate | Unbinding) => true,
            (Negotiated, Established | SentTerminate | Unbinding) => true,
            (Established, FinishingSend | FinishingRecv | SentTerminate | Unbinding) => true,
            (FinishingSend | FinishingRecv, Finished | SentTerminate | Unbinding) => true,
            (Finished, SentTerminate | Unbinding) => true,
            (SentTerminate, Unbinding) => true,
            _ => false,
        }
    }

    /// Returns true while an Establish has been accepted and not torn down.
    #[must_use]
    pub const fn is_established(self) -> bool {
        matches!(
            self,
            Self::Established | Self::FinishingSend | Self::FinishingRecv | Self::Finished
        )
    }

    /// Returns true once termination has started.
    #[must_use]
    pub const fn is_terminating(self) -> bool {
        matches!(self, Self::SentTerminate | Self::Unbinding | Self::Unbound)
    }

    /// Returns the state name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AwaitingNegotiate => "AWAITING_NEGOTIATE",
            Self::Negotiated => "NEGOTIATED",
            Self::Established => "ESTABLISHED",
            Self::FinishingSend => "FINISHING_SEND",
            Self::FinishingRecv => "FINISHING_RECV",
            Self::Finished => "FINISHED",
            Self::SentTerminate => "SENT_TERMINATE",
            Self::Unbinding => "UNBINDING",
            Self::Unbound => "UNBOUND",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Live or offline state of one session.
#[derive(Debug)]
pub struct ConnectionState {
    identity: SessionIdentity,
    sequences: SequenceManager,
    /// Phase of the bound transport, `Unbound` when offline.
    pub state: State,
    /// Accepted keep-alive interval.
    pub keep_alive: Duration,
    /// Consumer currently owning the session.
    pub owner: Option<ConsumerId>,
    /// Consumer that owned the session most recently.
    pub last_owner: Option<ConsumerId>,
    /// Transport the session is bound to.
    pub connection: Option<ConnectionId>,
    /// Lifecycle of the current version.
    pub status: VersionStatus,
    /// We sent FinishedSending.
    pub finished_sending_local: bool,
    /// The peer sent FinishedSending.
    pub finished_sending_remote: bool,
    /// Our FinishedSending has not been acknowledged yet.
    pub awaiting_finished_receiving: bool,
}

impl ConnectionState {
    /// Creates a fresh offline session at sequence 1/1.
    #[must_use]
    pub fn new(identity: SessionIdentity) -> Self {
        Self::from_record(&SessionRecord::new(identity))
    }

    /// Rebuilds the offline form of a persisted record.
    #[must_use]
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            identity: record.identity,
            sequences: SequenceManager::with_initial(
                record.next_recv_seq_no,
                record.next_sent_seq_no,
            ),
            state: State::Unbound,
            keep_alive: Duration::from_millis(record.keep_alive_ms),
            owner: None,
            last_owner: record.last_owner,
            connection: None,
            status: record.status,
            finished_sending_local: record.finished_sending_local,
            finished_sending_remote: record.finished_sending_remote,
            awaiting_finished_receiving: false,
        }
    }

    /// Produces the persisted form.
    #[must_use]
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            identity: self.identity,
            next_recv_seq_no: self.sequences.next_recv().value(),
            next_sent_seq_no: self.sequences.next_sent().value(),
            keep_alive_ms: u64::try_from(self.keep_alive.as_millis()).unwrap_or(u64::MAX),
            last_owner: self.owner.or(self.last_owner),
            status: self.status,
            finished_sending_local: self.finished_sending_local,
            finished_sending_remote: self.finished_sending_remote,
        }
    }

    /// Returns the session identity.
    #[inline]
    #[must_use]
    pub const fn identity(&self) -> SessionIdentity {
        self.identity
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.identity.session_id
    }

    /// Returns the sequence numbers.
    #[inline]
    #[must_use]
    pub const fn sequences(&self) -> &SequenceManager {
        &self.sequences
    }

    /// Returns true if no transport is bound.
    #[inline]
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.connection.is_none()
    }

    /// Switches to a new version with fresh sequence numbers.
    pub fn renegotiate(&mut self, identity: SessionIdentity) {
        self.identity = identity;
        self.sequences.reset();
        self.status = VersionStatus::Active;
        self.finished_sending_local = false;
        self.finished_sending_remote = false;
        self.awaiting_finished_receiving = false;
    }

    /// Assigns an owner, remembering it for later reconnects.
    pub fn set_owner(&mut self, owner: Option<ConsumerId>) {
        if owner.is_some() {
            self.last_owner = owner;
        }
        self.owner = owner;
    }

    /// Marks both directions finished when they are, retiring the version.
    pub fn retire_if_finished(&mut self) -> bool {
        if self.finished_sending_local && self.finished_sending_remote {
            self.status = VersionStatus::Retired;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(State::AwaitingNegotiate.can_transition_to(State::Negotiated));
        assert!(State::Negotiated.can_transition_to(State::Established));
        assert!(State::Established.can_transition_to(State::FinishingSend));
        assert!(State::FinishingRecv.can_transition_to(State::Finished));
        assert!(State::SentTerminate.can_transition_to(State::Unbinding));
        assert!(State::Unbinding.can_transition_to(State::Unbound));
        assert!(State::Unbound.can_transition_to(State::Established));

        assert!(!State::AwaitingNegotiate.can_transition_to(State::FinishingSend));
        assert!(!State::Unbinding.can_transition_to(State::Established));
        assert!(!State::SentTerminate.can_transition_to(State::Established));
    }

    #[test]
    fn test_state_classification() {
        assert!(State::FinishingSend.is_established());
        assert!(!State::Negotiated.is_established());
        assert!(State::Unbinding.is_terminating());
        assert_eq!(State::SentTerminate.to_string(), "SENT_TERMINATE");
    }

    #[test]
    fn test_record_conversion() {
        let mut record = SessionRecord::new(SessionIdentity::new(42, 2)).with_sequences(5, 7);
        record.keep_alive_ms = 500;
        record.last_owner = Some(ConsumerId(3));

        let state = ConnectionState::from_record(&record);
        assert!(state.is_offline());
        assert_eq!(state.state, State::Unbound);
        assert_eq!(state.sequences().next_recv().value(), 5);
        assert_eq!(state.sequences().next_sent().value(), 7);
        assert_eq!(state.owner, None);
        assert_eq!(state.to_record(), record);
    }

    #[test]
    fn test_renegotiate_resets() {
        let record = SessionRecord::new(SessionIdentity::new(42, 1)).with_sequences(5, 5);
        let mut state = ConnectionState::from_record(&record);
        state.finished_sending_local = true;
        state.renegotiate(SessionIdentity::new(42, 2));
        assert_eq!(state.identity().session_ver_id, 2);
        assert_eq!(state.sequences().next_sent().value(), 1);
        assert!(!state.finished_sending_local);
    }

    #[test]
    fn test_retire_when_both_finished() {
        let mut state = ConnectionState::new(SessionIdentity::new(1, 1));
        state.finished_sending_local = true;
        assert!(!state.retire_if_finished());
        state.finished_sending_remote = true;
        assert!(state.retire_if_finished());
        assert_eq!(state.status, VersionStatus::Retired);
    }
}
