/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Single-threaded FIXP acceptor engine.
//!
//! The [`Engine`] owns every connection state machine, the session
//! registry and the consumer callbacks. Inbound frames, timer ticks and
//! consumer commands are all handled sequentially through `&mut self`, so
//! no session state is shared or locked. Every entry point takes the
//! current instant explicitly.

use crate::application::{Authenticator, Consumer};
use crate::connection::{Consumers, Context, ConnectionStateMachine, sequence_outbound};
use bytes::Bytes;
use fixp_core::codes::{SessionReplyStatus, TerminationCode, ThrottleConfigurationStatus};
use fixp_core::error::{FixpError, Result, SessionError};
use fixp_core::frame::Frame;
use fixp_core::types::{ConnectionId, ConsumerId, SessionIdentity};
use fixp_session::config::{RateLimit, SessionConfig};
use fixp_session::registry::{FollowerOutcome, SessionInfo, SessionRegistry};
use fixp_session::state::ConnectionState;
use fixp_store::record::VersionStatus;
use fixp_store::traits::{MessageLog, SequenceLedger};
use fixp_transport::Transport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// FIXP session engine.
pub struct Engine {
    config: SessionConfig,
    log: Arc<dyn MessageLog>,
    ledger: Arc<dyn SequenceLedger>,
    authenticator: Box<dyn Authenticator>,
    consumers: Consumers,
    registry: SessionRegistry,
    connections: BTreeMap<ConnectionId, ConnectionStateMachine>,
    next_connection_id: u64,
    next_consumer_id: u32,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.registry.len())
            .field("connections", &self.connections.len())
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

impl Engine {
    /// Creates an engine, loading every persisted session as offline.
    ///
    /// A session whose log runs ahead of its ledger record resumes after the
    /// last logged frame.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the ledger
    /// cannot be read or updated.
    pub fn new(
        config: SessionConfig,
        log: Arc<dyn MessageLog>,
        ledger: Arc<dyn SequenceLedger>,
        authenticator: Box<dyn Authenticator>,
    ) -> Result<Self> {
        config.validate()?;
        let mut records = ledger.load_all()?;
        for record in &mut records {
            let logged = log.next_seq_no(record.identity);
            if logged > record.next_sent_seq_no {
                warn!(
                    session_id = record.identity.session_id,
                    ledger = record.next_sent_seq_no,
                    log = logged,
                    "ledger behind message log, resuming after last logged frame"
                );
                record.next_sent_seq_no = logged;
                ledger.persist(record)?;
            }
        }
        info!(sessions = records.len(), "engine started");
        Ok(Self {
            config,
            log,
            ledger,
            authenticator,
            consumers: BTreeMap::new(),
            registry: SessionRegistry::load(records),
            connections: BTreeMap::new(),
            next_connection_id: 0,
            next_consumer_id: ConsumerId::ENGINE.0,
        })
    }

    fn parts(&mut self) -> (&mut BTreeMap<ConnectionId, ConnectionStateMachine>, Context<'_>) {
        (
            &mut self.connections,
            Context {
                config: &self.config,
                registry: &mut self.registry,
                log: self.log.as_ref(),
                ledger: self.ledger.as_ref(),
                authenticator: self.authenticator.as_mut(),
                consumers: &mut self.consumers,
            },
        )
    }

    fn reap(&mut self) {
        self.connections.retain(|_, connection| !connection.is_closed());
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the number of open transports.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accepts a new transport.
    pub fn connect(&mut self, transport: Box<dyn Transport>, now: Instant) -> ConnectionId {
        self.next_connection_id += 1;
        let id = ConnectionId(self.next_connection_id);
        info!(connection_id = id.0, peer = %transport.peer(), "transport connected");
        let machine = ConnectionStateMachine::new(id, transport, &self.config, now);
        self.connections.insert(id, machine);
        id
    }

    /// Handles one complete inbound frame.
    ///
    /// A frame that fails to decode disconnects the transport without reply.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownConnection` for a closed or unknown
    /// transport, or a collaborator failure.
    pub fn on_frame(&mut self, connection_id: ConnectionId, frame: &Bytes, now: Instant) -> Result<()> {
        let (connections, mut ctx) = self.parts();
        let connection = connections
            .get_mut(&connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id.0))?;
        let result = match Frame::decode(frame) {
            Ok(decoded) => {
                debug!(connection_id = connection_id.0, frame = decoded.name(), "frame received");
                connection.on_frame(&mut ctx, decoded, now)
            }
            Err(err) => {
                warn!(connection_id = connection_id.0, error = %err, "malformed frame");
                connection.close(&mut ctx, "malformed frame");
                Ok(())
            }
        };
        self.reap();
        result
    }

    /// Handles the transport going away.
    pub fn on_disconnected(&mut self, connection_id: ConnectionId) {
        let (connections, mut ctx) = self.parts();
        if let Some(connection) = connections.get_mut(&connection_id) {
            connection.close(&mut ctx, "peer disconnected");
        }
        self.reap();
    }

    /// Runs timers and resumes output suspended by backpressure.
    ///
    /// A connection whose poll fails is disconnected; the others are still
    /// polled.
    ///
    /// # Errors
    /// Returns the first collaborator failure.
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        let (connections, mut ctx) = self.parts();
        let mut result = Ok(());
        for connection in connections.values_mut() {
            if let Err(err) = connection.poll(&mut ctx, now) {
                warn!(connection_id = connection.id().0, error = %err, "connection poll failed");
                connection.close(&mut ctx, "poll failed");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        self.reap();
        result
    }

    /// Registers a consumer and returns its id.
    pub fn add_consumer(&mut self, consumer: Box<dyn Consumer>) -> ConsumerId {
        self.next_consumer_id += 1;
        let id = ConsumerId(self.next_consumer_id);
        self.consumers.insert(id, consumer);
        self.registry.add_consumer(id);
        info!(consumer = id.0, "consumer added");
        id
    }

    /// Unregisters a consumer, releasing every session it owned.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownConsumer` if `consumer` is not registered.
    pub fn remove_consumer(&mut self, consumer: ConsumerId) -> Result<Vec<u64>> {
        if !self.registry.has_consumer(consumer) {
            return Err(SessionError::UnknownConsumer(consumer.0).into());
        }
        self.consumers.remove(&consumer);
        Ok(self.registry.remove_consumer(consumer))
    }

    /// Acquires a session for `consumer`.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownConsumer` if `consumer` is not registered.
    pub fn request_session(
        &mut self,
        consumer: ConsumerId,
        session_id: u64,
    ) -> Result<SessionReplyStatus> {
        Ok(self.registry.request_session(consumer, session_id)?)
    }

    /// Returns a session owned by `consumer` to the engine.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownConsumer` if `consumer` is not registered.
    pub fn release_session(
        &mut self,
        consumer: ConsumerId,
        session_id: u64,
    ) -> Result<SessionReplyStatus> {
        Ok(self.registry.release_session(consumer, session_id)?)
    }

    /// Provisions a follower session without a transport.
    ///
    /// # Errors
    /// Returns `SessionError::Provisioning` when refused, or a ledger failure,
    /// in which case the previous record is restored.
    pub fn follower_session(
        &mut self,
        consumer: ConsumerId,
        identity: SessionIdentity,
        next_session_ver_id: Option<u64>,
    ) -> Result<u64> {
        let previous = self.registry.get(identity.session_id).map(ConnectionState::to_record);
        let outcome = self
            .registry
            .provision_follower(consumer, identity, next_session_ver_id)?;
        if let FollowerOutcome::Created(created) = outcome {
            let persisted = self
                .registry
                .get(created.session_id)
                .map(|session| self.ledger.persist(&session.to_record()))
                .unwrap_or(Ok(()));
            if let Err(err) = persisted {
                match previous {
                    Some(record) => self.registry.insert(ConnectionState::from_record(&record)),
                    None => {
                        self.registry.remove(created.session_id);
                    }
                }
                return Err(err.into());
            }
        }
        Ok(outcome.session_id())
    }

    /// Changes the inbound throttle of an established session.
    ///
    /// The new limit applies from the next window.
    pub fn throttle_messages_at(
        &mut self,
        session_id: u64,
        limit: RateLimit,
    ) -> ThrottleConfigurationStatus {
        if !limit.is_valid() {
            return ThrottleConfigurationStatus::InvalidArguments;
        }
        let Some(session) = self.registry.get(session_id) else {
            return ThrottleConfigurationStatus::UnknownSession;
        };
        let Some(connection) = session
            .connection
            .and_then(|id| self.connections.get_mut(&id))
        else {
            return ThrottleConfigurationStatus::NotEstablished;
        };
        let status = connection.reconfigure_throttle(limit);
        if status == ThrottleConfigurationStatus::Ok {
            info!(
                session_id,
                limit = limit.limit,
                window = ?limit.window,
                "throttle reconfigured"
            );
        }
        status
    }

    fn owned(&self, consumer: ConsumerId, session_id: u64) -> Result<&ConnectionState> {
        let session = self
            .registry
            .get(session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        if session.owner != Some(consumer) {
            return Err(SessionError::NotOwner {
                consumer: consumer.0,
                session_id,
            }
            .into());
        }
        Ok(session)
    }

    /// Sends a business message on a session owned by `consumer`.
    ///
    /// An offline session sequences and logs the message; it becomes
    /// retransmittable once a transport re-establishes.
    ///
    /// # Errors
    /// Returns `SessionError::NotOwner`, `SessionError::IllegalState` after
    /// finishing sending or while terminating, or a collaborator failure.
    pub fn send(
        &mut self,
        consumer: ConsumerId,
        session_id: u64,
        template_id: u16,
        body: Bytes,
        now: Instant,
    ) -> Result<u64> {
        let session = self.owned(consumer, session_id)?;
        let illegal = |session: &ConnectionState| -> FixpError {
            SessionError::IllegalState {
                operation: "send",
                session_id,
                state: session.state.to_string(),
            }
            .into()
        };
        if session.finished_sending_local {
            return Err(illegal(session));
        }
        match session.connection {
            Some(connection_id) => {
                let (connections, mut ctx) = self.parts();
                let connection = connections
                    .get_mut(&connection_id)
                    .ok_or(SessionError::UnknownConnection(connection_id.0))?;
                let result = connection.send_business(&mut ctx, template_id, body, now);
                self.reap();
                result
            }
            None => {
                if !matches!(
                    session.status,
                    VersionStatus::Active | VersionStatus::Provisioned
                ) {
                    return Err(illegal(session));
                }
                let (_, mut ctx) = self.parts();
                let (seq_no, _) = sequence_outbound(&mut ctx, session_id, template_id, body)?;
                Ok(seq_no)
            }
        }
    }

    /// Declares that `consumer` will send nothing more on a session.
    ///
    /// # Errors
    /// Returns `SessionError::NotOwner`, or `SessionError::IllegalState` if
    /// the session is not established.
    pub fn finish_sending(
        &mut self,
        consumer: ConsumerId,
        session_id: u64,
        now: Instant,
    ) -> Result<()> {
        let session = self.owned(consumer, session_id)?;
        let Some(connection_id) = session.connection else {
            return Err(SessionError::IllegalState {
                operation: "finish sending",
                session_id,
                state: session.state.to_string(),
            }
            .into());
        };
        let (connections, mut ctx) = self.parts();
        let connection = connections
            .get_mut(&connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id.0))?;
        let result = connection.finish_sending(&mut ctx, now);
        self.reap();
        result
    }

    /// Starts a graceful termination of a session owned by `consumer`.
    ///
    /// Terminating an offline session is a no-op.
    ///
    /// # Errors
    /// Returns `SessionError::NotOwner` or a collaborator failure.
    pub fn terminate(
        &mut self,
        consumer: ConsumerId,
        session_id: u64,
        code: TerminationCode,
        now: Instant,
    ) -> Result<()> {
        let Some(connection_id) = self.owned(consumer, session_id)?.connection else {
            return Ok(());
        };
        let (connections, mut ctx) = self.parts();
        let result = match connections.get_mut(&connection_id) {
            Some(connection) => connection.terminate(&mut ctx, code, now),
            None => Ok(()),
        };
        self.reap();
        result
    }

    /// Resets an offline session to sequence numbers 1/1.
    ///
    /// The current version is superseded, so the next connection must
    /// negotiate a higher version.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownSession`, `SessionError::IllegalState`
    /// for a connected session, or a ledger failure.
    pub fn reset_sequence_numbers(&mut self, session_id: u64) -> Result<()> {
        let session = self
            .registry
            .get(session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        if !session.is_offline() {
            return Err(SessionError::IllegalState {
                operation: "reset sequence numbers",
                session_id,
                state: session.state.to_string(),
            }
            .into());
        }
        let mut record = session.to_record();
        record.next_recv_seq_no = 1;
        record.next_sent_seq_no = 1;
        record.status = VersionStatus::Superseded;
        record.finished_sending_local = false;
        record.finished_sending_remote = false;
        self.ledger.persist(&record)?;

        if let Some(session) = self.registry.get_mut(session_id) {
            session.sequences().reset();
            session.status = VersionStatus::Superseded;
            session.finished_sending_local = false;
            session.finished_sending_remote = false;
        }
        info!(session_id, "sequence numbers reset");
        Ok(())
    }

    /// Purges every session record and logged message.
    ///
    /// Open transports are disconnected first. Calling it again is harmless.
    ///
    /// # Errors
    /// Returns a store failure.
    pub fn reset_state(&mut self) -> Result<()> {
        let (connections, mut ctx) = self.parts();
        for connection in connections.values_mut() {
            connection.close(&mut ctx, "state reset");
        }
        self.reap();
        self.registry.clear();
        self.ledger.clear()?;
        self.log.clear()?;
        info!("engine state reset");
        Ok(())
    }

    /// Returns a snapshot of every session.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.snapshot()
    }

    /// Returns the safe prune boundary of every logged version of a session.
    ///
    /// Versions other than the current one, and a current version that is
    /// superseded or retired, can be pruned entirely. The current version
    /// keeps everything still retransmittable.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownSession` if the session is unknown.
    pub fn prune_boundaries(&self, session_id: u64) -> Result<Vec<(SessionIdentity, u64)>> {
        let session = self
            .registry
            .get(session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        let current = session.identity();
        let current_done = matches!(
            session.status,
            VersionStatus::Superseded | VersionStatus::Retired
        );
        Ok(self
            .log
            .versions(session_id)
            .into_iter()
            .map(|version| {
                let boundary = if version == current && !current_done {
                    self.log.lowest_retained(version)
                } else {
                    self.log.next_seq_no(version)
                };
                (version, boundary)
            })
            .collect())
    }

    /// Advises the log of each version's boundary and prunes up to it.
    ///
    /// # Errors
    /// Returns `SessionError::UnknownSession` or a store failure.
    pub fn prune(&mut self, session_id: u64) -> Result<usize> {
        let mut removed = 0;
        for (version, boundary) in self.prune_boundaries(session_id)? {
            self.log.advise_prune_boundary(version, boundary);
            removed += self.log.prune(version, boundary)?;
        }
        if removed > 0 {
            info!(session_id, removed, "message log pruned");
        }
        Ok(removed)
    }

    /// Closes every transport.
    ///
    /// Established sessions receive `Terminate(FINISHED)` first; the rest are
    /// disconnected silently.
    ///
    /// # Errors
    /// Returns a store failure while flushing.
    pub fn close(&mut self, now: Instant) -> Result<()> {
        let (connections, mut ctx) = self.parts();
        let mut result = Ok(());
        for connection in connections.values_mut() {
            if let Err(err) = connection.shutdown(&mut ctx, now) {
                connection.close(&mut ctx, "engine closing");
                result = Err(err);
            }
        }
        self.reap();
        info!("engine closed");
        result
    }
}
