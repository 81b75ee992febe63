/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Fixtures shared by the engine tests.

use crate::application::{
    AuthContext, AuthDecision, Authenticator, Consumer, Outbox, RetransmitDecision,
};
use crate::engine::Engine;
use bytes::Bytes;
use fixp_core::codes::RetransmitRejectCode;
use fixp_core::error::{FixpError, StoreError};
use fixp_core::frame::{BusinessMessage, Frame};
use fixp_core::types::{ConnectionId, ConsumerId, Credentials, SessionIdentity, Timestamp};
use fixp_session::config::SessionConfig;
use fixp_session::registry::SessionInfo;
use fixp_session::retransmit::RetransmissionInfo;
use fixp_store::memory::{MemoryLedger, MemoryMessageLog};
use fixp_store::record::SessionRecord;
use fixp_store::traits::SequenceLedger;
use fixp_transport::memory::{MemoryTransport, MemoryTransportProbe};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const ORDER_TEMPLATE_ID: u16 = 300;
pub const REPORT_TEMPLATE_ID: u16 = 301;

const REQUEST_TIME: Timestamp = Timestamp::from_millis(1_760_000_000_000);

pub fn credentials() -> Credentials {
    Credentials::new(7, "secret")
}

pub fn negotiate(identity: SessionIdentity) -> Frame {
    Frame::Negotiate {
        identity,
        timestamp: REQUEST_TIME,
        credentials: credentials(),
    }
}

pub fn establish(identity: SessionIdentity, next_seq_no: u64, keep_alive_ms: u64) -> Frame {
    Frame::Establish {
        identity,
        timestamp: REQUEST_TIME,
        keep_alive_ms,
        next_seq_no,
        credentials: credentials(),
    }
}

pub fn order(seq_no: u64) -> Frame {
    Frame::Business(BusinessMessage::new(
        ORDER_TEMPLATE_ID,
        seq_no,
        Bytes::from(format!("order-{seq_no}")),
    ))
}

pub fn retransmit_request(identity: SessionIdentity, from_seq_no: u64, count: u64) -> Frame {
    Frame::RetransmitRequest {
        identity,
        timestamp: REQUEST_TIME,
        from_seq_no,
        count,
    }
}

#[derive(Debug, Default)]
struct AuthScript {
    next: Option<AuthDecision>,
    calls: Vec<bool>,
}

/// Authenticator accepting everyone unless told to reject the next request.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAuth {
    script: Arc<Mutex<AuthScript>>,
}

impl ScriptedAuth {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn reject_next(&self, decision: AuthDecision) {
        self.script.lock().next = Some(decision);
    }

    /// `from_negotiate` of every request seen so far.
    pub fn calls(&self) -> Vec<bool> {
        self.script.lock().calls.clone()
    }
}

impl Authenticator for ScriptedAuth {
    fn authenticate(&mut self, context: &AuthContext<'_>) -> Result<AuthDecision, FixpError> {
        let mut script = self.script.lock();
        script.calls.push(context.from_negotiate);
        Ok(script.next.take().unwrap_or(AuthDecision::Accept))
    }
}

#[derive(Debug, Default)]
struct EchoState {
    exists: usize,
    acquired: usize,
    unbound: usize,
    retransmissions: Vec<RetransmissionInfo>,
    finished: Vec<SessionIdentity>,
    veto: Option<RetransmitRejectCode>,
}

/// Consumer that acquires every session and answers each order with a report.
#[derive(Debug, Clone, Default)]
pub struct EchoConsumer {
    state: Arc<Mutex<EchoState>>,
}

impl EchoConsumer {
    pub fn exists(&self) -> usize {
        self.state.lock().exists
    }

    pub fn acquired(&self) -> usize {
        self.state.lock().acquired
    }

    pub fn unbound(&self) -> usize {
        self.state.lock().unbound
    }

    pub fn retransmissions(&self) -> Vec<RetransmissionInfo> {
        self.state.lock().retransmissions.clone()
    }

    pub fn finished(&self) -> Vec<SessionIdentity> {
        self.state.lock().finished.clone()
    }

    pub fn veto_next(&self, code: RetransmitRejectCode) {
        self.state.lock().veto = Some(code);
    }
}

impl Consumer for EchoConsumer {
    fn on_session_exists(&mut self, _session: &SessionInfo) -> bool {
        self.state.lock().exists += 1;
        true
    }

    fn on_connection_acquired(&mut self, _session: &SessionInfo) {
        self.state.lock().acquired += 1;
    }

    fn on_retransmit_request(
        &mut self,
        _identity: SessionIdentity,
        info: &RetransmissionInfo,
    ) -> RetransmitDecision {
        let mut state = self.state.lock();
        state.retransmissions.push(*info);
        match state.veto.take() {
            Some(code) => RetransmitDecision::Reject(code),
            None => RetransmitDecision::Allow,
        }
    }

    fn on_finished_sending(&mut self, identity: SessionIdentity) {
        self.state.lock().finished.push(identity);
    }

    fn on_business_message(
        &mut self,
        _identity: SessionIdentity,
        message: &BusinessMessage,
        outbox: &mut Outbox,
    ) {
        outbox.send(REPORT_TEMPLATE_ID, message.body.clone());
    }

    fn on_unbound(&mut self, _identity: SessionIdentity) {
        self.state.lock().unbound += 1;
    }
}

/// Ledger that can be switched to fail every write.
#[derive(Debug, Default)]
pub struct FlakyLedger {
    inner: MemoryLedger,
    failing: AtomicBool,
}

impl FlakyLedger {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn record(&self, session_id: u64) -> Option<SessionRecord> {
        self.inner.record(session_id)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

impl SequenceLedger for FlakyLedger {
    fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        self.inner.load_all()
    }

    fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.persist(record)
    }

    fn remove(&self, session_id: u64) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(session_id)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.clear()
    }
}

/// Initiator side of one in-memory transport.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ConnectionId,
    pub probe: MemoryTransportProbe,
}

/// Engine wired to in-memory stores and transports with a manual clock.
pub struct Harness {
    pub engine: Engine,
    pub log: Arc<MemoryMessageLog>,
    pub ledger: Arc<FlakyLedger>,
    pub auth: ScriptedAuth,
    pub echo: EchoConsumer,
    pub clients: Vec<Client>,
    pub now: Instant,
    consumer: Option<ConsumerId>,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        let log = Arc::new(MemoryMessageLog::new());
        let ledger = Arc::new(FlakyLedger::default());
        let auth = ScriptedAuth::accept_all();
        let engine = Engine::new(
            config,
            log.clone(),
            ledger.clone(),
            Box::new(auth.clone()),
        )
        .unwrap();
        Self {
            engine,
            log,
            ledger,
            auth,
            echo: EchoConsumer::default(),
            clients: Vec::new(),
            now: Instant::now(),
            consumer: None,
        }
    }

    pub fn add_echo_consumer(&mut self) -> ConsumerId {
        let id = self.engine.add_consumer(Box::new(self.echo.clone()));
        self.consumer = Some(id);
        id
    }

    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer.expect("echo consumer not added")
    }

    pub fn connect(&mut self) -> Client {
        let (transport, probe) = MemoryTransport::new();
        let id = self.engine.connect(Box::new(transport), self.now);
        let client = Client { id, probe };
        self.clients.push(client.clone());
        client
    }

    pub fn send(&mut self, client: &Client, frame: Frame) {
        let bytes = frame.to_bytes().unwrap();
        match self.engine.on_frame(client.id, &bytes, self.now) {
            Ok(()) => {}
            Err(FixpError::Session(fixp_core::error::SessionError::UnknownConnection(_))) => {}
            Err(err) => panic!("frame failed: {err}"),
        }
    }

    pub fn take(&self, client: &Client) -> Vec<Frame> {
        client.probe.take_frames().unwrap()
    }

    pub fn disconnect(&mut self, client: &Client) {
        client.probe.close_remote();
        self.engine.on_disconnected(client.id);
    }

    pub fn disconnect_all(&mut self) {
        for client in std::mem::take(&mut self.clients) {
            self.disconnect(&client);
        }
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn ledger_fails(&self, failing: bool) {
        self.ledger.set_failing(failing);
    }
}

/// Session 42 version 1 established with an echo consumer and `orders`
/// orders exchanged; all output already taken.
pub fn established_with_traffic(orders: u64) -> Harness {
    let mut h = Harness::new(SessionConfig::new());
    h.add_echo_consumer();
    let client = h.connect();
    h.send(&client, negotiate(SessionIdentity::new(42, 1)));
    h.send(&client, establish(SessionIdentity::new(42, 1), 1, 1000));
    for seq in 1..=orders {
        h.send(&client, order(seq));
    }
    h.take(&client);
    h
}
