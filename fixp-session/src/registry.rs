/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session registry and consumer ownership.
//!
//! The registry maps a session id to its [`ConnectionState`], live or
//! offline, and arbitrates which consumer owns each session. It is owned by
//! the engine run loop and mutated only from there; other tasks reach it
//! through the engine's command channel.

use crate::state::{ConnectionState, State};
use fixp_core::codes::SessionReplyStatus;
use fixp_core::error::SessionError;
use fixp_core::types::{ConnectionId, ConsumerId, SessionIdentity};
use fixp_store::record::{SessionRecord, VersionStatus};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Read-only view of one session for administrative listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Current identity.
    pub identity: SessionIdentity,
    /// Protocol phase of the bound transport.
    pub state: State,
    /// Owning consumer, `None` when owned by the engine.
    pub owner: Option<ConsumerId>,
    /// Next sequence number expected from the peer.
    pub next_recv_seq_no: u64,
    /// Next sequence number to send.
    pub next_sent_seq_no: u64,
    /// Bound transport, if any.
    pub connection_id: Option<ConnectionId>,
    /// True when no transport is bound.
    pub offline: bool,
    /// Version lifecycle.
    pub status: VersionStatus,
}

impl From<&ConnectionState> for SessionInfo {
    fn from(state: &ConnectionState) -> Self {
        Self {
            identity: state.identity(),
            state: state.state,
            owner: state.owner,
            next_recv_seq_no: state.sequences().next_recv().value(),
            next_sent_seq_no: state.sequences().next_sent().value(),
            connection_id: state.connection,
            offline: state.is_offline(),
            status: state.status,
        }
    }
}

/// Who should hear about a newly bound session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// The session already has a registered owner; it acquires directly.
    Owner(ConsumerId),
    /// Every registered consumer is told the session exists.
    Broadcast(Vec<ConsumerId>),
    /// No consumer is registered.
    Nobody,
}

/// Result of provisioning a follower session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerOutcome {
    /// A new record was written at this identity.
    Created(SessionIdentity),
    /// The session already exists at the requested version.
    Existing(SessionIdentity),
}

impl FollowerOutcome {
    /// Returns the session id.
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        match self {
            Self::Created(identity) | Self::Existing(identity) => identity.session_id,
        }
    }
}

/// Sessions keyed by id, plus the set of registered consumers.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<u64, ConnectionState>,
    consumers: BTreeSet<ConsumerId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from persisted records, every session offline.
    #[must_use]
    pub fn load(records: impl IntoIterator<Item = SessionRecord>) -> Self {
        let sessions = records
            .into_iter()
            .map(|record| (record.session_id(), ConnectionState::from_record(&record)))
            .collect();
        Self {
            sessions,
            consumers: BTreeSet::new(),
        }
    }

    /// Returns the session with the given id.
    #[must_use]
    pub fn get(&self, session_id: u64) -> Option<&ConnectionState> {
        self.sessions.get(&session_id)
    }

    /// Returns the session with the given id mutably.
    pub fn get_mut(&mut self, session_id: u64) -> Option<&mut ConnectionState> {
        self.sessions.get_mut(&session_id)
    }

    /// Inserts or replaces a session.
    pub fn insert(&mut self, state: ConnectionState) {
        self.sessions.insert(state.session_id(), state);
    }

    /// Removes a session.
    pub fn remove(&mut self, session_id: u64) -> Option<ConnectionState> {
        self.sessions.remove(&session_id)
    }

    /// Removes every session; consumers stay registered.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registers a consumer. Returns false if it was already present.
    pub fn add_consumer(&mut self, consumer: ConsumerId) -> bool {
        self.consumers.insert(consumer)
    }

    /// Returns true if `consumer` is registered.
    #[must_use]
    pub fn has_consumer(&self, consumer: ConsumerId) -> bool {
        self.consumers.contains(&consumer)
    }

    /// Unregisters a consumer and releases every session it owned.
    ///
    /// Returns the ids of the released sessions.
    pub fn remove_consumer(&mut self, consumer: ConsumerId) -> Vec<u64> {
        self.consumers.remove(&consumer);
        let mut released = Vec::new();
        for state in self.sessions.values_mut() {
            if state.owner == Some(consumer) {
                state.owner = None;
                released.push(state.session_id());
            }
            if state.last_owner == Some(consumer) {
                state.last_owner = None;
            }
        }
        if !released.is_empty() {
            info!(consumer = consumer.0, sessions = ?released, "consumer removed, sessions released");
        }
        released
    }

    /// Acquires ownership of a session for `consumer`.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownConsumer` if `consumer` is not registered.
    pub fn request_session(
        &mut self,
        consumer: ConsumerId,
        session_id: u64,
    ) -> Result<SessionReplyStatus, SessionError> {
        if !self.has_consumer(consumer) {
            return Err(SessionError::UnknownConsumer(consumer.0));
        }
        let Some(state) = self.sessions.get_mut(&session_id) else {
            return Ok(SessionReplyStatus::UnknownSession);
        };
        if state.owner.is_some() {
            debug!(
                session_id,
                consumer = consumer.0,
                owner = ?state.owner,
                "session already owned"
            );
            return Ok(SessionReplyStatus::OtherSessionOwner);
        }
        state.set_owner(Some(consumer));
        info!(session_id, consumer = consumer.0, "session acquired");
        Ok(SessionReplyStatus::Ok)
    }

    /// Returns a session owned by `consumer` to the engine.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownConsumer` if `consumer` is not registered.
    pub fn release_session(
        &mut self,
        consumer: ConsumerId,
        session_id: u64,
    ) -> Result<SessionReplyStatus, SessionError> {
        if !self.has_consumer(consumer) {
            return Err(SessionError::UnknownConsumer(consumer.0));
        }
        let Some(state) = self.sessions.get_mut(&session_id) else {
            return Ok(SessionReplyStatus::UnknownSession);
        };
        if state.owner != Some(consumer) {
            return Ok(SessionReplyStatus::OtherSessionOwner);
        }
        state.owner = None;
        state.last_owner = None;
        info!(session_id, consumer = consumer.0, "session released");
        Ok(SessionReplyStatus::Ok)
    }

    /// Decides who is offered a session that just became bound.
    ///
    /// A registered current or previous owner takes the session directly.
    pub fn offer(&mut self, session_id: u64) -> Offer {
        let Some(state) = self.sessions.get_mut(&session_id) else {
            return Offer::Nobody;
        };
        let previous = state
            .owner
            .or(state.last_owner)
            .filter(|owner| self.consumers.contains(owner));
        if let Some(owner) = previous {
            state.set_owner(Some(owner));
            return Offer::Owner(owner);
        }
        state.owner = None;
        if self.consumers.is_empty() {
            Offer::Nobody
        } else {
            Offer::Broadcast(self.consumers.iter().copied().collect())
        }
    }

    /// Creates or confirms a follower session without a transport.
    ///
    /// The session is written at `next_ver` when given, otherwise at
    /// `identity.session_ver_id`. A `next_ver` record is marked provisioned
    /// and waits for a Negotiate at exactly that version.
    ///
    /// # Errors
    /// Returns `SessionError::Provisioning` when the session is connected
    /// with another version or when the target is below the stored version,
    /// and `SessionError::UnknownConsumer` for an unregistered consumer.
    pub fn provision_follower(
        &mut self,
        consumer: ConsumerId,
        identity: SessionIdentity,
        next_ver: Option<u64>,
    ) -> Result<FollowerOutcome, SessionError> {
        if !self.has_consumer(consumer) {
            return Err(SessionError::UnknownConsumer(consumer.0));
        }
        let target = identity.with_ver(next_ver.unwrap_or(identity.session_ver_id));
        let status = if next_ver.is_some() {
            VersionStatus::Provisioned
        } else {
            VersionStatus::Active
        };

        if let Some(existing) = self.sessions.get_mut(&target.session_id) {
            let stored = existing.identity().session_ver_id;
            if !existing.is_offline() && stored != target.session_ver_id {
                return Err(SessionError::Provisioning {
                    session_id: target.session_id,
                    reason: "currently connected with a different session version".to_string(),
                });
            }
            if stored == target.session_ver_id {
                if existing.owner.is_none() {
                    existing.set_owner(Some(consumer));
                }
                return Ok(FollowerOutcome::Existing(target));
            }
            if target.session_ver_id < stored {
                return Err(SessionError::Provisioning {
                    session_id: target.session_id,
                    reason: format!(
                        "version {} is below the stored version {stored}",
                        target.session_ver_id
                    ),
                });
            }
        }

        let mut state = ConnectionState::from_record(&SessionRecord::new(target).with_status(status));
        state.set_owner(Some(consumer));
        info!(
            session_id = target.session_id,
            session_ver_id = target.session_ver_id,
            consumer = consumer.0,
            %status,
            "follower session provisioned"
        );
        self.insert(state);
        Ok(FollowerOutcome::Created(target))
    }

    /// Returns a snapshot of every session.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sessions.values().map(SessionInfo::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ConsumerId = ConsumerId(1);
    const B: ConsumerId = ConsumerId(2);

    fn registry() -> SessionRegistry {
        let mut registry =
            SessionRegistry::load(vec![SessionRecord::new(SessionIdentity::new(42, 1))
                .with_sequences(5, 5)]);
        registry.add_consumer(A);
        registry.add_consumer(B);
        registry
    }

    #[test]
    fn test_load_is_offline() {
        let registry = registry();
        let state = registry.get(42).unwrap();
        assert!(state.is_offline());
        assert_eq!(state.sequences().next_recv().value(), 5);
        assert_eq!(state.to_record().next_sent_seq_no, 5);
    }

    #[test]
    fn test_request_session_exactly_one_wins() {
        let mut registry = registry();
        assert_eq!(
            registry.request_session(A, 42).unwrap(),
            SessionReplyStatus::Ok
        );
        assert_eq!(
            registry.request_session(B, 42).unwrap(),
            SessionReplyStatus::OtherSessionOwner
        );
        assert_eq!(
            registry.request_session(A, 42).unwrap(),
            SessionReplyStatus::OtherSessionOwner
        );
        assert_eq!(
            registry.request_session(A, 7).unwrap(),
            SessionReplyStatus::UnknownSession
        );
        assert!(matches!(
            registry.request_session(ConsumerId(9), 42),
            Err(SessionError::UnknownConsumer(9))
        ));
    }

    #[test]
    fn test_release_session() {
        let mut registry = registry();
        registry.request_session(A, 42).unwrap();
        assert_eq!(
            registry.release_session(B, 42).unwrap(),
            SessionReplyStatus::OtherSessionOwner
        );
        assert_eq!(
            registry.release_session(A, 42).unwrap(),
            SessionReplyStatus::Ok
        );
        assert_eq!(registry.get(42).unwrap().owner, None);
        assert_eq!(
            registry.request_session(B, 42).unwrap(),
            SessionReplyStatus::Ok
        );
    }

    #[test]
    fn test_offer_prefers_previous_owner() {
        let mut registry = registry();
        registry.get_mut(42).unwrap().last_owner = Some(B);
        assert_eq!(registry.offer(42), Offer::Owner(B));
        assert_eq!(registry.get(42).unwrap().owner, Some(B));
    }

    #[test]
    fn test_offer_broadcasts_without_owner() {
        let mut registry = registry();
        assert_eq!(registry.offer(42), Offer::Broadcast(vec![A, B]));
        registry.remove_consumer(A);
        registry.remove_consumer(B);
        assert_eq!(registry.offer(42), Offer::Nobody);
    }

    #[test]
    fn test_remove_consumer_releases() {
        let mut registry = registry();
        registry.request_session(A, 42).unwrap();
        assert_eq!(registry.remove_consumer(A), vec![42]);
        let state = registry.get(42).unwrap();
        assert_eq!(state.owner, None);
        assert_eq!(state.last_owner, None);
    }

    #[test]
    fn test_follower_rules() {
        let mut registry = registry();

        let outcome = registry
            .provision_follower(A, SessionIdentity::new(42, 1), None)
            .unwrap();
        assert_eq!(outcome, FollowerOutcome::Existing(SessionIdentity::new(42, 1)));

        registry.get_mut(42).unwrap().connection = Some(ConnectionId(3));
        let err = registry
            .provision_follower(A, SessionIdentity::new(42, 2), None)
            .unwrap_err();
        assert!(err.to_string().contains("different session version"));

        registry.get_mut(42).unwrap().connection = None;
        let outcome = registry
            .provision_follower(A, SessionIdentity::new(42, 1), Some(4))
            .unwrap();
        assert_eq!(outcome, FollowerOutcome::Created(SessionIdentity::new(42, 4)));
        let state = registry.get(42).unwrap();
        assert_eq!(state.status, VersionStatus::Provisioned);
        assert_eq!(state.sequences().next_sent().value(), 1);

        assert!(registry
            .provision_follower(A, SessionIdentity::new(42, 3), None)
            .is_err());
    }

    #[test]
    fn test_follower_new_session_owned_by_creator() {
        let mut registry = registry();
        let outcome = registry
            .provision_follower(B, SessionIdentity::new(7, 1), None)
            .unwrap();
        assert_eq!(outcome.session_id(), 7);
        let state = registry.get(7).unwrap();
        assert_eq!(state.owner, Some(B));
        assert_eq!(state.status, VersionStatus::Active);
    }

    #[test]
    fn test_snapshot() {
        let mut registry = registry();
        registry.request_session(A, 42).unwrap();
        let info = registry.snapshot();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].owner, Some(A));
        assert_eq!(info[0].next_recv_seq_no, 5);
        assert!(info[0].offline);
        assert_eq!(info[0].state, State::Unbound);
    }
}
