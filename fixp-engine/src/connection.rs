/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Per-transport protocol state machine.
//!
//! A [`ConnectionStateMachine`] owns one transport from accept to
//! disconnect. It drives negotiation, establishment, sequencing,
//! retransmission, the finished-sending handshake and termination for the
//! session it binds, reading and writing that session's
//! [`ConnectionState`] in the registry. The machine's own [`State`] is
//! authoritative and mirrored into the registry while bound.
//!
//! Every sequence change is persisted to the ledger before it is applied in
//! memory and before anything acknowledging it is sent.

use crate::application::{AuthContext, Authenticator, Consumer, Outbox, RetransmitDecision};
use bytes::Bytes;
use fixp_core::codes::{
    EstablishRejectCode, NegotiationRejectCode, RetransmitRejectCode, SessionReplyStatus,
    TerminationCode, ThrottleConfigurationStatus,
};
use fixp_core::error::{FixpError, SessionError};
use fixp_core::frame::{BusinessMessage, BusinessReject, Frame};
use fixp_core::types::{ConnectionId, ConsumerId, Credentials, SessionIdentity, Timestamp};
use fixp_session::config::{RateLimit, SessionConfig};
use fixp_session::keepalive::{Deadline, KeepAliveTimer};
use fixp_session::registry::{Offer, SessionInfo, SessionRegistry};
use fixp_session::retransmit::{
    DrainOutcome, OutboundQueue, ReplayCursor, RetransmissionInfo, RetransmitRequest,
    RetransmitValidator,
};
use fixp_session::sequence::SequenceResult;
use fixp_session::state::{ConnectionState, State};
use fixp_session::throttle::{Admission, ThrottleWindow};
use fixp_store::record::{SessionRecord, VersionStatus};
use fixp_store::traits::{MessageLog, SequenceLedger};
use fixp_transport::Transport;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub(crate) type Consumers = BTreeMap<ConsumerId, Box<dyn Consumer>>;

/// Engine state a connection reads and writes while handling an event.
pub(crate) struct Context<'a> {
    pub config: &'a SessionConfig,
    pub registry: &'a mut SessionRegistry,
    pub log: &'a dyn MessageLog,
    pub ledger: &'a dyn SequenceLedger,
    pub authenticator: &'a mut dyn Authenticator,
    pub consumers: &'a mut Consumers,
}

/// Assigns the next outbound sequence number, logs the encoded frame and
/// persists the new counter. Nothing is sent.
///
/// The log is consulted too so a frame that was logged but whose counter
/// never reached the ledger is not overwritten. If the ledger refuses the
/// new counter the frame is taken back out of the log.
pub(crate) fn sequence_outbound(
    ctx: &mut Context<'_>,
    session_id: u64,
    template_id: u16,
    body: Bytes,
) -> Result<(u64, Bytes), FixpError> {
    let session = ctx
        .registry
        .get(session_id)
        .ok_or(SessionError::UnknownSession(session_id))?;
    let identity = session.identity();
    let seq_no = session
        .sequences()
        .next_sent()
        .value()
        .max(ctx.log.next_seq_no(identity));
    let frame = Frame::Business(BusinessMessage::new(template_id, seq_no, body)).to_bytes()?;

    ctx.log.append(identity, seq_no, frame.clone())?;
    let mut record = session.to_record();
    record.next_sent_seq_no = seq_no + 1;
    if let Err(err) = ctx.ledger.persist(&record) {
        if let Err(rollback) = ctx.log.truncate_from(identity, seq_no) {
            warn!(session_id, seq_no, error = %rollback, "failed to drop unpersisted frame");
        }
        return Err(err.into());
    }
    session.sequences().advance_sent_to(seq_no + 1);

    debug!(session_id, seq_no, template_id, "business message sequenced");
    Ok((seq_no, frame))
}

/// Offers a newly bound session to the consumers.
pub(crate) fn offer(ctx: &mut Context<'_>, session_id: u64) {
    match ctx.registry.offer(session_id) {
        Offer::Owner(owner) => {
            let Some(info) = session_info(ctx.registry, session_id) else {
                return;
            };
            if let Some(consumer) = ctx.consumers.get_mut(&owner) {
                info!(session_id, consumer = owner.0, "connection acquired by previous owner");
                consumer.on_connection_acquired(&info);
            }
        }
        Offer::Broadcast(candidates) => {
            let Some(info) = session_info(ctx.registry, session_id) else {
                return;
            };
            let mut winner = None;
            for candidate in candidates {
                let Some(consumer) = ctx.consumers.get_mut(&candidate) else {
                    continue;
                };
                if !consumer.on_session_exists(&info) || winner.is_some() {
                    continue;
                }
                if matches!(
                    ctx.registry.request_session(candidate, session_id),
                    Ok(SessionReplyStatus::Ok)
                ) {
                    winner = Some(candidate);
                }
            }
            if let Some(owner) = winner
                && let Some(info) = session_info(ctx.registry, session_id)
                && let Some(consumer) = ctx.consumers.get_mut(&owner)
            {
                info!(session_id, consumer = owner.0, "connection acquired");
                consumer.on_connection_acquired(&info);
            }
        }
        Offer::Nobody => debug!(session_id, "no consumer to offer session to"),
    }
}

fn session_info(registry: &SessionRegistry, session_id: u64) -> Option<SessionInfo> {
    registry.get(session_id).map(SessionInfo::from)
}

fn owner_of<'c>(
    registry: &SessionRegistry,
    consumers: &'c mut Consumers,
    session_id: u64,
) -> Option<&'c mut Box<dyn Consumer>> {
    let owner = registry.get(session_id)?.owner?;
    consumers.get_mut(&owner)
}

/// Protocol state of one transport.
pub struct ConnectionStateMachine {
    id: ConnectionId,
    transport: Box<dyn Transport>,
    state: State,
    identity: Option<SessionIdentity>,
    negotiated_here: bool,
    logon_deadline: Option<Deadline>,
    terminate_deadline: Option<Deadline>,
    keep_alive: Option<KeepAliveTimer>,
    throttle: Option<ThrottleWindow>,
    retransmit: RetransmitValidator,
    outbound: OutboundQueue,
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("id", &self.id)
            .field("peer", &self.transport.peer())
            .field("state", &self.state)
            .field("identity", &self.identity)
            .field("outbound", &self.outbound.len())
            .finish()
    }
}

impl ConnectionStateMachine {
    /// Creates a machine for a freshly accepted transport.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        transport: Box<dyn Transport>,
        config: &SessionConfig,
        now: Instant,
    ) -> Self {
        Self {
            id,
            transport,
            state: State::AwaitingNegotiate,
            identity: None,
            negotiated_here: false,
            logon_deadline: Some(Deadline::after(now, config.no_logon_disconnect_timeout)),
            terminate_deadline: None,
            keep_alive: None,
            throttle: None,
            retransmit: RetransmitValidator::new(config),
            outbound: OutboundQueue::new(),
        }
    }

    /// Returns the connection id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the protocol phase.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Returns the negotiated or established identity.
    #[must_use]
    pub const fn identity(&self) -> Option<SessionIdentity> {
        self.identity
    }

    /// Returns true once the transport was disconnected.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == State::Unbound
    }

    /// Returns the number of queued outbound entries.
    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    fn bound<'r>(&self, registry: &'r SessionRegistry) -> Option<&'r ConnectionState> {
        let identity = self.identity?;
        registry
            .get(identity.session_id)
            .filter(|session| session.connection == Some(self.id))
    }

    fn bound_or_err<'r>(
        &self,
        registry: &'r SessionRegistry,
        operation: &'static str,
    ) -> Result<&'r ConnectionState, FixpError> {
        self.bound(registry).ok_or_else(|| {
            SessionError::IllegalState {
                operation,
                session_id: self.identity.map_or(0, |id| id.session_id),
                state: self.state.to_string(),
            }
            .into()
        })
    }

    fn illegal(&self, operation: &'static str, session_id: u64) -> FixpError {
        SessionError::IllegalState {
            operation,
            session_id,
            state: self.state.to_string(),
        }
        .into()
    }

    fn peer_finished(&self, registry: &SessionRegistry) -> bool {
        self.bound(registry)
            .is_some_and(|session| session.finished_sending_remote)
    }

    fn transition(&mut self, ctx: &mut Context<'_>, to: State) {
        if !self.state.can_transition_to(to) {
            warn!(
                connection_id = self.id.0,
                from = %self.state,
                to = %to,
                "illegal state transition ignored"
            );
            return;
        }
        debug!(connection_id = self.id.0, from = %self.state, to = %to, "state transition");
        self.state = to;
        if let Some(identity) = self.identity
            && let Some(session) = ctx.registry.get_mut(identity.session_id)
            && session.connection == Some(self.id)
        {
            session.state = to;
        }
    }

    fn push(&mut self, frame: &Frame) -> Result<(), FixpError> {
        self.outbound.push_frame(frame.to_bytes()?);
        Ok(())
    }

    /// Offers queued frames to the transport.
    pub(crate) fn flush(&mut self, ctx: &mut Context<'_>, now: Instant) -> Result<(), FixpError> {
        if self.is_closed() {
            return Ok(());
        }
        let (outcome, sent) = self.outbound.drain(self.transport.as_mut(), ctx.log)?;
        if sent > 0
            && let Some(timer) = &mut self.keep_alive
        {
            timer.on_sent(now);
        }
        match outcome {
            DrainOutcome::Closed => {
                self.close(ctx, "transport closed");
                return Ok(());
            }
            DrainOutcome::Backpressured => {
                debug!(
                    connection_id = self.id.0,
                    queued = self.outbound.len(),
                    "transport backpressured"
                );
            }
            DrainOutcome::Flushed => {}
        }
        if self.state == State::SentTerminate && self.outbound.is_empty() {
            self.transition(ctx, State::Unbinding);
        }
        Ok(())
    }

    /// Disconnects the transport and leaves the session offline.
    ///
    /// Calling it again is a no-op.
    pub(crate) fn close(&mut self, ctx: &mut Context<'_>, reason: &'static str) {
        if self.is_closed() {
            return;
        }
        self.transport.disconnect();
        self.outbound.clear();
        self.keep_alive = None;
        self.throttle = None;
        self.logon_deadline = None;
        self.terminate_deadline = None;
        info!(
            connection_id = self.id.0,
            peer = %self.transport.peer(),
            from = %self.state,
            reason,
            "connection closed"
        );
        self.state = State::Unbound;

        let Some(identity) = self.identity else {
            return;
        };
        let Some(session) = ctx.registry.get_mut(identity.session_id) else {
            return;
        };
        if session.connection != Some(self.id) {
            return;
        }
        session.connection = None;
        session.state = State::Unbound;
        session.awaiting_finished_receiving = false;
        info!(
            session_id = identity.session_id,
            session_ver_id = identity.session_ver_id,
            "session offline"
        );
        if let Some(consumer) = owner_of(ctx.registry, ctx.consumers, identity.session_id) {
            consumer.on_unbound(identity);
        }
    }

    /// Sends Terminate with `code` and disconnects at once.
    fn fail(
        &mut self,
        ctx: &mut Context<'_>,
        code: TerminationCode,
        reason: &'static str,
        now: Instant,
    ) -> Result<(), FixpError> {
        warn!(
            connection_id = self.id.0,
            session_id = self.identity.map(|id| id.session_id),
            %code,
            reason,
            "terminating connection"
        );
        if let Some(identity) = self.identity {
            self.push(&Frame::Terminate { identity, code })?;
            self.flush(ctx, now)?;
        }
        self.close(ctx, reason);
        Ok(())
    }

    /// Handles a frame that needs an established session on a transport
    /// that has none.
    fn not_established(
        &mut self,
        ctx: &mut Context<'_>,
        what: &'static str,
        now: Instant,
    ) -> Result<(), FixpError> {
        if self.identity.is_none() {
            info!(connection_id = self.id.0, frame = what, "frame before negotiation");
            self.close(ctx, "frame before negotiation");
            return Ok(());
        }
        if self.state.is_terminating() {
            debug!(connection_id = self.id.0, frame = what, "frame ignored while terminating");
            return Ok(());
        }
        self.fail(ctx, TerminationCode::NotEstablished, "frame before establishment", now)
    }

    /// Handles one decoded inbound frame.
    pub(crate) fn on_frame(
        &mut self,
        ctx: &mut Context<'_>,
        frame: Frame,
        now: Instant,
    ) -> Result<(), FixpError> {
        if self.is_closed() {
            return Ok(());
        }
        if let Some(timer) = &mut self.keep_alive {
            timer.on_received(now);
        }
        match frame {
            Frame::Negotiate {
                identity,
                timestamp,
                credentials,
            } => self.on_negotiate(ctx, identity, timestamp, &credentials, now)?,
            Frame::Establish {
                identity,
                timestamp,
                keep_alive_ms,
                next_seq_no,
                credentials,
            } => self.on_establish(
                ctx,
                EstablishRequest {
                    identity,
                    timestamp,
                    keep_alive_ms,
                    next_seq_no,
                    credentials: &credentials,
                },
                now,
            )?,
            Frame::Terminate { identity, code } => self.on_terminate(ctx, identity, code, now)?,
            Frame::Sequence { next_seq_no } => self.on_sequence(ctx, next_seq_no, now)?,
            Frame::Business(message) => self.on_business(ctx, message, now)?,
            Frame::RetransmitRequest {
                identity,
                timestamp,
                from_seq_no,
                count,
            } => self.on_retransmit_request(
                ctx,
                RetransmitRequest {
                    identity,
                    timestamp,
                    from_seq_no,
                    count,
                },
                now,
            )?,
            Frame::FinishedSending {
                identity,
                last_seq_no,
            } => self.on_finished_sending(ctx, identity, last_seq_no, now)?,
            Frame::FinishedReceiving { identity } => self.on_finished_receiving(ctx, identity),
            Frame::NotApplied { from_seq_no, count } => {
                debug!(
                    connection_id = self.id.0,
                    from_seq_no, count, "peer reported messages not applied"
                );
            }
            other => {
                warn!(
                    connection_id = self.id.0,
                    frame = other.name(),
                    "unexpected frame from initiator"
                );
                if self.identity.is_some() {
                    self.fail(ctx, TerminationCode::Unspecified, "unexpected frame", now)?;
                } else {
                    self.close(ctx, "unexpected frame");
                }
            }
        }
        self.flush(ctx, now)
    }

    fn reject_negotiate(
        &mut self,
        ctx: &mut Context<'_>,
        identity: SessionIdentity,
        request_timestamp: Timestamp,
        code: NegotiationRejectCode,
        now: Instant,
    ) -> Result<(), FixpError> {
        warn!(
            connection_id = self.id.0,
            session_id = identity.session_id,
            session_ver_id = identity.session_ver_id,
            %code,
            "negotiate rejected"
        );
        self.push(&Frame::NegotiateReject {
            identity,
            request_timestamp,
            code,
        })?;
        self.flush(ctx, now)?;
        self.close(ctx, "negotiate rejected");
        Ok(())
    }

    fn on_negotiate(
        &mut self,
        ctx: &mut Context<'_>,
        identity: SessionIdentity,
        timestamp: Timestamp,
        credentials: &Credentials,
        now: Instant,
    ) -> Result<(), FixpError> {
        if self.state.is_established() && self.peer_finished(ctx.registry) {
            return self.fail(
                ctx,
                TerminationCode::Unspecified,
                "negotiate after finished sending",
                now,
            );
        }
        if self.state != State::AwaitingNegotiate {
            return self.reject_negotiate(
                ctx,
                identity,
                timestamp,
                NegotiationRejectCode::AlreadyNegotiated,
                now,
            );
        }
        if timestamp.is_unset() {
            return self.reject_negotiate(
                ctx,
                identity,
                timestamp,
                NegotiationRejectCode::InvalidTimestamp,
                now,
            );
        }

        let decision = ctx.authenticator.authenticate(&AuthContext {
            identity,
            credentials,
            timestamp,
            from_negotiate: true,
            connection_id: self.id,
        })?;
        if let Some(code) = decision.negotiation_code() {
            return self.reject_negotiate(ctx, identity, timestamp, code, now);
        }

        let session_id = identity.session_id;
        let (record, fresh) = match ctx.registry.get(session_id) {
            Some(existing) => {
                let stored = existing.identity().session_ver_id;
                let requested = identity.session_ver_id;
                let conflict = !existing.is_offline()
                    || requested < stored
                    || (requested == stored && existing.status != VersionStatus::Provisioned);
                if conflict {
                    return self.reject_negotiate(
                        ctx,
                        identity,
                        timestamp,
                        NegotiationRejectCode::AlreadyNegotiated,
                        now,
                    );
                }
                if requested == stored {
                    (existing.to_record().with_status(VersionStatus::Active), false)
                } else {
                    let mut record = SessionRecord::new(identity);
                    record.last_owner = existing.owner.or(existing.last_owner);
                    (record, true)
                }
            }
            None => (SessionRecord::new(identity), true),
        };
        ctx.ledger.persist(&record)?;

        match ctx.registry.get_mut(session_id) {
            Some(existing) if fresh => existing.renegotiate(identity),
            Some(existing) => existing.status = VersionStatus::Active,
            None => ctx.registry.insert(ConnectionState::new(identity)),
        }
        if let Some(session) = ctx.registry.get_mut(session_id) {
            session.connection = Some(self.id);
        }
        self.identity = Some(identity);
        self.negotiated_here = true;
        self.logon_deadline = Some(Deadline::after(now, ctx.config.no_logon_disconnect_timeout));
        self.transition(ctx, State::Negotiated);
        info!(
            connection_id = self.id.0,
            session_id,
            session_ver_id = identity.session_ver_id,
            firm_id = credentials.firm_id,
            renegotiated = fresh,
            "session negotiated"
        );

        self.push(&Frame::NegotiateResponse {
            identity,
            request_timestamp: timestamp,
        })?;
        offer(ctx, session_id);
        Ok(())
    }

    fn reject_establish(
        &mut self,
        ctx: &mut Context<'_>,
        request: &EstablishRequest<'_>,
        code: EstablishRejectCode,
        last_incoming_seq_no: u64,
        now: Instant,
    ) -> Result<(), FixpError> {
        warn!(
            connection_id = self.id.0,
            session_id = request.identity.session_id,
            session_ver_id = request.identity.session_ver_id,
            next_seq_no = request.next_seq_no,
            %code,
            "establish rejected"
        );
        self.push(&Frame::EstablishReject {
            identity: request.identity,
            request_timestamp: request.timestamp,
            code,
            last_incoming_seq_no,
        })?;
        self.flush(ctx, now)?;
        self.close(ctx, "establish rejected");
        Ok(())
    }

    fn on_establish(
        &mut self,
        ctx: &mut Context<'_>,
        request: EstablishRequest<'_>,
        now: Instant,
    ) -> Result<(), FixpError> {
        let identity = request.identity;
        let session_id = identity.session_id;

        if self.state.is_established() {
            if self.peer_finished(ctx.registry) {
                return self.fail(
                    ctx,
                    TerminationCode::Unspecified,
                    "establish after finished sending",
                    now,
                );
            }
            let last_incoming_seq_no = self
                .bound(ctx.registry)
                .map_or(0, |session| session.sequences().last_received());
            warn!(
                connection_id = self.id.0,
                session_id,
                "establish on an established connection ignored"
            );
            return self.push(&Frame::EstablishReject {
                identity,
                request_timestamp: request.timestamp,
                code: EstablishRejectCode::AlreadyEstablished,
                last_incoming_seq_no,
            });
        }
        if self.state.is_terminating() {
            return Ok(());
        }

        let negotiated = match ctx.registry.get(session_id) {
            _ if self.negotiated_here && self.identity != Some(identity) => false,
            None => false,
            Some(session) => {
                session.connection.is_none_or(|bound| bound == self.id)
                    && session.identity() == identity
                    && session.status.is_establishable()
            }
        };
        if !negotiated {
            return self.reject_establish(ctx, &request, EstablishRejectCode::Unnegotiated, 0, now);
        }
        if request.timestamp.is_unset() {
            return self.reject_establish(
                ctx,
                &request,
                EstablishRejectCode::InvalidTimestamp,
                0,
                now,
            );
        }

        if !self.negotiated_here {
            let decision = ctx.authenticator.authenticate(&AuthContext {
                identity,
                credentials: request.credentials,
                timestamp: request.timestamp,
                from_negotiate: false,
                connection_id: self.id,
            })?;
            if let Some(code) = decision.establish_code() {
                return self.reject_establish(ctx, &request, code, 0, now);
            }
        }

        let Some(session) = ctx.registry.get(session_id) else {
            return self.reject_establish(ctx, &request, EstablishRejectCode::Unnegotiated, 0, now);
        };
        let next_recv = session.sequences().next_recv().value();
        let last_incoming_seq_no = next_recv - 1;
        if request.next_seq_no == 0 || request.next_seq_no < next_recv {
            return self.reject_establish(
                ctx,
                &request,
                EstablishRejectCode::InvalidNextSeqNo,
                last_incoming_seq_no,
                now,
            );
        }
        let keep_alive = Duration::from_millis(request.keep_alive_ms);
        if !ctx.config.accepts_keep_alive(keep_alive) {
            return self.reject_establish(
                ctx,
                &request,
                EstablishRejectCode::InvalidKeepAliveInterval,
                last_incoming_seq_no,
                now,
            );
        }

        let mut record = session.to_record();
        record.next_recv_seq_no = request.next_seq_no;
        record.keep_alive_ms = request.keep_alive_ms;
        ctx.ledger.persist(&record)?;

        let Some(session) = ctx.registry.get_mut(session_id) else {
            return Ok(());
        };
        session.sequences().advance_recv_to(request.next_seq_no);
        session.keep_alive = keep_alive;
        session.connection = Some(self.id);
        let finishing = (
            session.finished_sending_local,
            session.finished_sending_remote,
        );
        session.awaiting_finished_receiving = session.finished_sending_local;
        let should_offer = !self.negotiated_here || session.owner.is_none();

        self.identity = Some(identity);
        self.logon_deadline = None;
        self.keep_alive = Some(KeepAliveTimer::new(
            keep_alive,
            ctx.config.liveness_multiplier,
            now,
        ));
        self.throttle = ctx.config.throttle.map(ThrottleWindow::new);
        self.transition(ctx, State::Established);
        match finishing {
            (true, false) => self.transition(ctx, State::FinishingSend),
            (false, true) => self.transition(ctx, State::FinishingRecv),
            _ => {}
        }
        info!(
            connection_id = self.id.0,
            session_id,
            session_ver_id = identity.session_ver_id,
            keep_alive_ms = request.keep_alive_ms,
            next_seq_no = request.next_seq_no,
            last_incoming_seq_no,
            "session established"
        );

        self.push(&Frame::EstablishAck {
            identity,
            request_timestamp: request.timestamp,
            keep_alive_ms: request.keep_alive_ms,
            next_seq_no: request.next_seq_no,
            last_incoming_seq_no,
        })?;
        if should_offer {
            offer(ctx, session_id);
        }
        Ok(())
    }

    fn on_terminate(
        &mut self,
        ctx: &mut Context<'_>,
        identity: SessionIdentity,
        code: TerminationCode,
        now: Instant,
    ) -> Result<(), FixpError> {
        let Some(bound) = self.identity else {
            self.close(ctx, "terminate before negotiation");
            return Ok(());
        };
        if bound != identity {
            warn!(
                connection_id = self.id.0,
                session_id = identity.session_id,
                session_ver_id = identity.session_ver_id,
                "terminate for a session not established here"
            );
            return self.push(&Frame::Terminate {
                identity,
                code: TerminationCode::NotEstablished,
            });
        }
        if matches!(self.state, State::SentTerminate | State::Unbinding) {
            info!(connection_id = self.id.0, session_id = bound.session_id, "terminate acknowledged");
            self.close(ctx, "terminated");
            return Ok(());
        }

        info!(
            connection_id = self.id.0,
            session_id = bound.session_id,
            %code,
            "peer terminated session"
        );
        self.transition(ctx, State::SentTerminate);
        self.push(&Frame::Terminate {
            identity: bound,
            code,
        })?;
        self.flush(ctx, now)?;
        self.close(ctx, "terminated by peer");
        Ok(())
    }

    /// Persists and applies a higher next-expected inbound sequence number.
    fn advance_recv(&mut self, ctx: &mut Context<'_>, next: u64) -> Result<(), FixpError> {
        let session = self.bound_or_err(ctx.registry, "receive")?;
        if next <= session.sequences().next_recv().value() {
            return Ok(());
        }
        let mut record = session.to_record();
        record.next_recv_seq_no = next;
        ctx.ledger.persist(&record)?;
        session.sequences().advance_recv_to(next);
        Ok(())
    }

    /// Classifies an inbound sequence number, reporting gaps.
    ///
    /// Returns false if the connection was terminated.
    fn check_inbound(
        &mut self,
        ctx: &mut Context<'_>,
        seq_no: u64,
        now: Instant,
    ) -> Result<bool, FixpError> {
        let session = self.bound_or_err(ctx.registry, "receive")?;
        match session.sequences().validate_incoming(seq_no) {
            SequenceResult::Ok => Ok(true),
            SequenceResult::TooLow { expected, received } => {
                warn!(
                    connection_id = self.id.0,
                    session_id = session.session_id(),
                    expected,
                    received,
                    "sequence number too low"
                );
                self.fail(ctx, TerminationCode::Unspecified, "sequence number too low", now)?;
                Ok(false)
            }
            gap @ SequenceResult::Gap { expected, received } => {
                let (from_seq_no, count) = gap.missing_range().unwrap_or((expected, 0));
                info!(
                    connection_id = self.id.0,
                    session_id = session.session_id(),
                    expected,
                    received,
                    "sequence gap"
                );
                self.push(&Frame::NotApplied { from_seq_no, count })?;
                Ok(true)
            }
        }
    }

    fn on_sequence(
        &mut self,
        ctx: &mut Context<'_>,
        next_seq_no: u64,
        now: Instant,
    ) -> Result<(), FixpError> {
        if !self.state.is_established() {
            return self.not_established(ctx, "Sequence", now);
        }
        if self.peer_finished(ctx.registry) {
            return self.fail(
                ctx,
                TerminationCode::Unspecified,
                "sequence after finished sending",
                now,
            );
        }
        if self.check_inbound(ctx, next_seq_no, now)? {
            self.advance_recv(ctx, next_seq_no)?;
        }
        Ok(())
    }

    fn on_business(
        &mut self,
        ctx: &mut Context<'_>,
        message: BusinessMessage,
        now: Instant,
    ) -> Result<(), FixpError> {
        if !self.state.is_established() {
            return self.not_established(ctx, "business", now);
        }
        if self.peer_finished(ctx.registry) {
            return self.fail(
                ctx,
                TerminationCode::Unspecified,
                "business message after finished sending",
                now,
            );
        }
        let Some(next_recv) = message.seq_no.checked_add(1) else {
            return self.fail(ctx, TerminationCode::Unspecified, "sequence number overflow", now);
        };
        if !self.check_inbound(ctx, message.seq_no, now)? {
            return Ok(());
        }

        let admission = self
            .throttle
            .as_mut()
            .map_or(Admission::Accepted, |throttle| throttle.admit(now));
        self.advance_recv(ctx, next_recv)?;
        let session = self.bound_or_err(ctx.registry, "receive")?;
        let identity = session.identity();

        if admission == Admission::Rejected {
            warn!(
                connection_id = self.id.0,
                session_id = identity.session_id,
                seq_no = message.seq_no,
                template_id = message.template_id,
                "business message throttled"
            );
            let reject = BusinessReject::throttled(message.template_id, message.seq_no);
            let reply = reject.to_message(0);
            let (_, frame) =
                sequence_outbound(ctx, identity.session_id, reply.template_id, reply.body)?;
            self.outbound.push_frame(frame);
            return Ok(());
        }

        let mut outbox = Outbox::new();
        match owner_of(ctx.registry, ctx.consumers, identity.session_id) {
            Some(consumer) => consumer.on_business_message(identity, &message, &mut outbox),
            None => debug!(
                session_id = identity.session_id,
                seq_no = message.seq_no,
                "business message without owner"
            ),
        }
        for (template_id, body) in outbox.drain() {
            if !self.can_send() {
                warn!(
                    session_id = identity.session_id,
                    template_id,
                    state = %self.state,
                    "consumer reply dropped"
                );
                continue;
            }
            let (_, frame) = sequence_outbound(ctx, identity.session_id, template_id, body)?;
            self.outbound.push_frame(frame);
        }
        Ok(())
    }

    fn on_retransmit_request(
        &mut self,
        ctx: &mut Context<'_>,
        request: RetransmitRequest,
        now: Instant,
    ) -> Result<(), FixpError> {
        if !self.state.is_established() {
            if self.identity.is_none() {
                self.close(ctx, "retransmit request before negotiation");
                return Ok(());
            }
            return self.push(&Frame::RetransmitReject {
                identity: request.identity,
                request_timestamp: request.timestamp,
                code: RetransmitRejectCode::InvalidSession,
            });
        }
        let session = self.bound_or_err(ctx.registry, "retransmit")?;
        let bound = session.identity();
        let next_sent = session.sequences().next_sent().value();
        let lowest_retained = ctx.log.lowest_retained(bound);

        let mut rejection =
            self.retransmit
                .validate(&request, bound, lowest_retained, next_sent, now);
        let info = RetransmissionInfo {
            from_seq_no: request.from_seq_no,
            count: request.count,
            timestamp: request.timestamp,
            rejection,
        };
        if let Some(consumer) = owner_of(ctx.registry, ctx.consumers, bound.session_id)
            && let RetransmitDecision::Reject(code) = consumer.on_retransmit_request(bound, &info)
            && rejection.is_none()
        {
            rejection = Some(code);
        }

        match rejection {
            Some(code) => {
                warn!(
                    connection_id = self.id.0,
                    session_id = bound.session_id,
                    from_seq_no = request.from_seq_no,
                    count = request.count,
                    %code,
                    "retransmit request rejected"
                );
                self.push(&Frame::RetransmitReject {
                    identity: request.identity,
                    request_timestamp: request.timestamp,
                    code,
                })
            }
            None => {
                info!(
                    connection_id = self.id.0,
                    session_id = bound.session_id,
                    from_seq_no = request.from_seq_no,
                    count = request.count,
                    "retransmission started"
                );
                self.outbound
                    .push_replay(ReplayCursor::new(&request, next_sent));
                Ok(())
            }
        }
    }

    fn on_finished_sending(
        &mut self,
        ctx: &mut Context<'_>,
        identity: SessionIdentity,
        last_seq_no: u64,
        now: Instant,
    ) -> Result<(), FixpError> {
        if !self.state.is_established() {
            return self.not_established(ctx, "FinishedSending", now);
        }
        if self.identity != Some(identity) {
            warn!(
                connection_id = self.id.0,
                session_id = identity.session_id,
                "finished sending for another session ignored"
            );
            return Ok(());
        }
        let session = self.bound_or_err(ctx.registry, "finished sending")?;
        if session.finished_sending_remote {
            return self.push(&Frame::FinishedReceiving { identity });
        }

        let Some(after_last) = last_seq_no.checked_add(1) else {
            return self.fail(ctx, TerminationCode::Unspecified, "sequence number overflow", now);
        };
        let next_recv = session.sequences().next_recv().value();
        if after_last > next_recv {
            self.push(&Frame::NotApplied {
                from_seq_no: next_recv,
                count: after_last - next_recv,
            })?;
        }
        let mut record = session.to_record();
        record.next_recv_seq_no = next_recv.max(after_last);
        record.finished_sending_remote = true;
        if record.finished_sending_local {
            record.status = VersionStatus::Retired;
        }
        ctx.ledger.persist(&record)?;

        let Some(session) = ctx.registry.get_mut(identity.session_id) else {
            return Ok(());
        };
        session.sequences().advance_recv_to(after_last);
        session.finished_sending_remote = true;
        let retired = session.retire_if_finished();
        info!(
            connection_id = self.id.0,
            session_id = identity.session_id,
            last_seq_no,
            retired,
            "peer finished sending"
        );

        self.push(&Frame::FinishedReceiving { identity })?;
        let next = if self.state == State::FinishingSend {
            State::Finished
        } else {
            State::FinishingRecv
        };
        self.transition(ctx, next);
        if let Some(consumer) = owner_of(ctx.registry, ctx.consumers, identity.session_id) {
            consumer.on_finished_sending(identity);
        }
        Ok(())
    }

    fn on_finished_receiving(&mut self, ctx: &mut Context<'_>, identity: SessionIdentity) {
        if self.identity != Some(identity) || !self.state.is_established() {
            debug!(connection_id = self.id.0, "unexpected finished receiving ignored");
            return;
        }
        if let Some(session) = ctx.registry.get_mut(identity.session_id)
            && session.awaiting_finished_receiving
        {
            session.awaiting_finished_receiving = false;
            info!(
                connection_id = self.id.0,
                session_id = identity.session_id,
                "finished sending acknowledged"
            );
        }
    }

    fn can_send(&self) -> bool {
        matches!(self.state, State::Established | State::FinishingRecv)
    }

    /// Sequences, logs and sends a business message from the owner.
    pub(crate) fn send_business(
        &mut self,
        ctx: &mut Context<'_>,
        template_id: u16,
        body: Bytes,
        now: Instant,
    ) -> Result<u64, FixpError> {
        let session = self.bound_or_err(ctx.registry, "send")?;
        let session_id = session.session_id();
        if !self.can_send() || session.finished_sending_local {
            return Err(self.illegal("send", session_id));
        }
        let (seq_no, frame) = sequence_outbound(ctx, session_id, template_id, body)?;
        self.outbound.push_frame(frame);
        self.flush(ctx, now)?;
        Ok(seq_no)
    }

    /// Declares that no further business messages will be sent.
    pub(crate) fn finish_sending(
        &mut self,
        ctx: &mut Context<'_>,
        now: Instant,
    ) -> Result<(), FixpError> {
        let session = self.bound_or_err(ctx.registry, "finish sending")?;
        let identity = session.identity();
        if session.finished_sending_local {
            return Ok(());
        }
        if !self.can_send() {
            return Err(self.illegal("finish sending", identity.session_id));
        }

        let last_seq_no = session.sequences().last_sent();
        let mut record = session.to_record();
        record.finished_sending_local = true;
        if record.finished_sending_remote {
            record.status = VersionStatus::Retired;
        }
        ctx.ledger.persist(&record)?;

        if let Some(session) = ctx.registry.get_mut(identity.session_id) {
            session.finished_sending_local = true;
            session.awaiting_finished_receiving = true;
            session.retire_if_finished();
        }
        info!(
            connection_id = self.id.0,
            session_id = identity.session_id,
            last_seq_no,
            "finished sending"
        );
        self.push(&Frame::FinishedSending {
            identity,
            last_seq_no,
        })?;
        let next = if self.state == State::FinishingRecv {
            State::Finished
        } else {
            State::FinishingSend
        };
        self.transition(ctx, next);
        self.flush(ctx, now)
    }

    /// Starts a graceful local termination.
    ///
    /// Calling it again once termination started is a no-op.
    pub(crate) fn terminate(
        &mut self,
        ctx: &mut Context<'_>,
        code: TerminationCode,
        now: Instant,
    ) -> Result<(), FixpError> {
        if self.state.is_terminating() {
            return Ok(());
        }
        let Some(identity) = self.identity else {
            self.close(ctx, "terminated before negotiation");
            return Ok(());
        };
        info!(
            connection_id = self.id.0,
            session_id = identity.session_id,
            %code,
            "terminating session"
        );
        self.transition(ctx, State::SentTerminate);
        self.terminate_deadline = Some(Deadline::after(now, ctx.config.terminate_timeout));
        self.push(&Frame::Terminate { identity, code })?;
        self.flush(ctx, now)
    }

    /// Sends Terminate and disconnects without waiting for a reply.
    pub(crate) fn shutdown(
        &mut self,
        ctx: &mut Context<'_>,
        now: Instant,
    ) -> Result<(), FixpError> {
        if self.state.is_established() {
            return self.fail(ctx, TerminationCode::Finished, "engine closing", now);
        }
        self.close(ctx, "engine closing");
        Ok(())
    }

    /// Applies a new throttle limit from the next window on.
    pub(crate) fn reconfigure_throttle(&mut self, limit: RateLimit) -> ThrottleConfigurationStatus {
        if !limit.is_valid() {
            return ThrottleConfigurationStatus::InvalidArguments;
        }
        if !self.state.is_established() {
            return ThrottleConfigurationStatus::NotEstablished;
        }
        match &mut self.throttle {
            Some(throttle) => throttle.reconfigure(limit),
            None => {
                self.throttle = Some(ThrottleWindow::new(limit));
                ThrottleConfigurationStatus::Ok
            }
        }
    }

    /// Runs timers and resumes suspended output.
    pub(crate) fn poll(&mut self, ctx: &mut Context<'_>, now: Instant) -> Result<(), FixpError> {
        match self.state {
            State::Unbound => return Ok(()),
            State::AwaitingNegotiate | State::Negotiated => {
                if self.logon_deadline.is_some_and(|d| d.has_expired(now)) {
                    info!(
                        connection_id = self.id.0,
                        state = %self.state,
                        "no establishment within timeout"
                    );
                    self.close(ctx, "logon timeout");
                    return Ok(());
                }
            }
            State::SentTerminate | State::Unbinding => {
                if self.terminate_deadline.is_some_and(|d| d.has_expired(now)) {
                    self.close(ctx, "terminate timeout");
                    return Ok(());
                }
            }
            State::Established | State::FinishingSend | State::FinishingRecv | State::Finished => {
                self.poll_keep_alive(ctx, now)?;
                if self.is_closed() {
                    return Ok(());
                }
            }
        }
        self.flush(ctx, now)
    }

    fn poll_keep_alive(&mut self, ctx: &mut Context<'_>, now: Instant) -> Result<(), FixpError> {
        let Some(timer) = &self.keep_alive else {
            return Ok(());
        };
        if timer.is_lapsed(now) {
            debug!(
                connection_id = self.id.0,
                silent_for = ?timer.time_since_last_received(now),
                "liveness lapsed"
            );
            return self.fail(
                ctx,
                TerminationCode::KeepAliveIntervalLapsed,
                "keep-alive interval lapsed",
                now,
            );
        }
        if !timer.should_send_keep_alive(now) || !self.outbound.is_empty() {
            return Ok(());
        }
        let Some(session) = self.bound(ctx.registry) else {
            return Ok(());
        };
        let frame = if session.awaiting_finished_receiving {
            Frame::FinishedSending {
                identity: session.identity(),
                last_seq_no: session.sequences().last_sent(),
            }
        } else {
            Frame::Sequence {
                next_seq_no: session.sequences().next_sent().value(),
            }
        };
        self.push(&frame)
    }
}

/// Fields of an inbound Establish.
struct EstablishRequest<'a> {
    identity: SessionIdentity,
    timestamp: Timestamp,
    keep_alive_ms: u64,
    next_seq_no: u64,
    credentials: &'a Credentials,
}
