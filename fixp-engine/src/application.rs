/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Consumer and authentication callback interfaces.
//!
//! The engine invokes these synchronously from its run loop, so
//! implementations must not block. A consumer replies to business traffic
//! by filling the [`Outbox`] it is handed; the engine sequences and sends
//! those messages once the callback returns.

use bytes::Bytes;
use fixp_core::codes::{EstablishRejectCode, NegotiationRejectCode, RetransmitRejectCode};
use fixp_core::error::FixpError;
use fixp_core::frame::BusinessMessage;
use fixp_core::types::{ConnectionId, Credentials, SessionIdentity, Timestamp};
use fixp_session::registry::SessionInfo;
use fixp_session::retransmit::RetransmissionInfo;
use smallvec::SmallVec;

/// What the authenticator sees for one Negotiate or Establish.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    /// Identity presented by the peer.
    pub identity: SessionIdentity,
    /// Credentials presented by the peer.
    pub credentials: &'a Credentials,
    /// Request timestamp.
    pub timestamp: Timestamp,
    /// True for a Negotiate, false for an Establish without one.
    pub from_negotiate: bool,
    /// Transport the request arrived on.
    pub connection_id: ConnectionId,
}

/// Authentication outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Credentials accepted.
    Accept,
    /// Rejected with the default `CREDENTIALS` code.
    Reject,
    /// Negotiate rejected with a specific code.
    RejectNegotiate(NegotiationRejectCode),
    /// Establish rejected with a specific code.
    RejectEstablish(EstablishRejectCode),
}

impl AuthDecision {
    /// Returns the Negotiate reject code, if this is a rejection.
    #[must_use]
    pub const fn negotiation_code(self) -> Option<NegotiationRejectCode> {
        match self {
            Self::Accept => None,
            Self::RejectNegotiate(code) => Some(code),
            Self::Reject | Self::RejectEstablish(_) => Some(NegotiationRejectCode::Credentials),
        }
    }

    /// Returns the Establish reject code, if this is a rejection.
    #[must_use]
    pub const fn establish_code(self) -> Option<EstablishRejectCode> {
        match self {
            Self::Accept => None,
            Self::RejectEstablish(code) => Some(code),
            Self::Reject | Self::RejectNegotiate(_) => Some(EstablishRejectCode::Credentials),
        }
    }
}

/// Pluggable authentication strategy.
pub trait Authenticator: Send {
    /// Decides whether the peer may negotiate or establish.
    ///
    /// # Errors
    /// An error is a collaborator failure; it propagates out of the engine
    /// and nothing about the session is changed.
    fn authenticate(&mut self, context: &AuthContext<'_>) -> Result<AuthDecision, FixpError>;
}

/// Accepts every peer.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&mut self, _context: &AuthContext<'_>) -> Result<AuthDecision, FixpError> {
        Ok(AuthDecision::Accept)
    }
}

/// Consumer verdict on a retransmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetransmitDecision {
    /// Service the request.
    #[default]
    Allow,
    /// Refuse it with the given code.
    Reject(RetransmitRejectCode),
}

/// Business messages a consumer wants sent on a session.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: SmallVec<[(u16, Bytes); 4]>,
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a business message for sending.
    pub fn send(&mut self, template_id: u16, body: impl Into<Bytes>) {
        self.messages.push((template_id, body.into()));
    }

    /// Returns true if nothing was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (u16, Bytes)> + '_ {
        self.messages.drain(..)
    }
}

/// Callbacks delivered to a consumer process.
///
/// Every method has a default so implementations override only what they
/// need. A consumer that never acquires a session receives nothing but
/// [`on_session_exists`](Self::on_session_exists).
pub trait Consumer: Send {
    /// A session became bound and has no registered owner.
    ///
    /// Returning true asks to acquire it; the first consumer to do so wins.
    fn on_session_exists(&mut self, _session: &SessionInfo) -> bool {
        false
    }

    /// This consumer now owns a bound session.
    fn on_connection_acquired(&mut self, _session: &SessionInfo) {}

    /// The peer asked for a retransmission.
    ///
    /// `info.rejection` is set when the engine already refused the request;
    /// the returned decision is then ignored.
    fn on_retransmit_request(
        &mut self,
        _identity: SessionIdentity,
        _info: &RetransmissionInfo,
    ) -> RetransmitDecision {
        RetransmitDecision::Allow
    }

    /// The peer declared it will send nothing more.
    fn on_finished_sending(&mut self, _identity: SessionIdentity) {}

    /// A sequenced business message arrived.
    fn on_business_message(
        &mut self,
        _identity: SessionIdentity,
        _message: &BusinessMessage,
        _outbox: &mut Outbox,
    ) {
    }

    /// The session's transport went away; the session is now offline.
    fn on_unbound(&mut self, _identity: SessionIdentity) {}
}

/// Consumer that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpConsumer;

impl Consumer for NoOpConsumer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_decision_codes() {
        assert_eq!(AuthDecision::Accept.negotiation_code(), None);
        assert_eq!(
            AuthDecision::Reject.negotiation_code(),
            Some(NegotiationRejectCode::Credentials)
        );
        assert_eq!(
            AuthDecision::Reject.establish_code(),
            Some(EstablishRejectCode::Credentials)
        );
        assert_eq!(
            AuthDecision::RejectEstablish(EstablishRejectCode::EstablishAttemptsExceeded)
                .establish_code(),
            Some(EstablishRejectCode::EstablishAttemptsExceeded)
        );
        assert_eq!(
            AuthDecision::RejectNegotiate(NegotiationRejectCode::InvalidFirm).negotiation_code(),
            Some(NegotiationRejectCode::InvalidFirm)
        );
    }

    #[test]
    fn test_outbox() {
        let mut outbox = Outbox::new();
        assert!(outbox.is_empty());
        outbox.send(300, Bytes::from_static(b"ack"));
        outbox.send(301, "fill");
        assert_eq!(outbox.len(), 2);
        let drained: Vec<(u16, Bytes)> = outbox.drain().collect();
        assert_eq!(drained[1], (301, Bytes::from_static(b"fill")));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_noop_consumer_defaults() {
        let mut consumer = NoOpConsumer;
        let info = RetransmissionInfo {
            from_seq_no: 1,
            count: 1,
            timestamp: Timestamp::from_millis(1),
            rejection: None,
        };
        assert_eq!(
            consumer.on_retransmit_request(SessionIdentity::new(1, 1), &info),
            RetransmitDecision::Allow
        );
    }
}
