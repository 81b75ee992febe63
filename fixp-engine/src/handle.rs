/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Async command/reply front end for an [`Engine`] task.
//!
//! The engine runs on one task that owns it exclusively. Socket tasks and
//! consumer processes talk to it through a cloneable [`EngineHandle`]; each
//! request carries a `oneshot` reply and is bounded by the configured reply
//! timeout. A timed-out request is indeterminate: it may or may not have
//! been applied, and every command is safe to retry.

use crate::application::Consumer;
use crate::engine::Engine;
use bytes::Bytes;
use fixp_core::codes::{SessionReplyStatus, TerminationCode, ThrottleConfigurationStatus};
use fixp_core::error::{FixpError, Result, SessionError};
use fixp_core::types::{ConnectionId, ConsumerId, SessionIdentity};
use fixp_session::config::RateLimit;
use fixp_session::registry::SessionInfo;
use fixp_transport::Transport;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<T>;

/// Request sent to the engine task.
pub enum Command {
    /// Attach a freshly accepted transport.
    Connect {
        transport: Box<dyn Transport>,
        reply: Reply<ConnectionId>,
    },
    /// One complete inbound frame.
    Inbound {
        connection_id: ConnectionId,
        frame: Bytes,
    },
    /// The transport's socket went away.
    Disconnected { connection_id: ConnectionId },
    AddConsumer {
        consumer: Box<dyn Consumer>,
        reply: Reply<ConsumerId>,
    },
    RemoveConsumer {
        consumer: ConsumerId,
        reply: Reply<Result<Vec<u64>>>,
    },
    RequestSession {
        consumer: ConsumerId,
        session_id: u64,
        reply: Reply<Result<SessionReplyStatus>>,
    },
    ReleaseSession {
        consumer: ConsumerId,
        session_id: u64,
        reply: Reply<Result<SessionReplyStatus>>,
    },
    FollowerSession {
        consumer: ConsumerId,
        identity: SessionIdentity,
        next_session_ver_id: Option<u64>,
        reply: Reply<Result<u64>>,
    },
    ThrottleMessagesAt {
        session_id: u64,
        limit: RateLimit,
        reply: Reply<ThrottleConfigurationStatus>,
    },
    Send {
        consumer: ConsumerId,
        session_id: u64,
        template_id: u16,
        body: Bytes,
        reply: Reply<Result<u64>>,
    },
    FinishSending {
        consumer: ConsumerId,
        session_id: u64,
        reply: Reply<Result<()>>,
    },
    Terminate {
        consumer: ConsumerId,
        session_id: u64,
        code: TerminationCode,
        reply: Reply<Result<()>>,
    },
    ResetSequenceNumbers {
        session_id: u64,
        reply: Reply<Result<()>>,
    },
    ResetState { reply: Reply<Result<()>> },
    Sessions { reply: Reply<Vec<SessionInfo>> },
    Prune {
        session_id: u64,
        reply: Reply<Result<usize>>,
    },
    /// Terminate every transport and stop the task.
    Close { reply: Reply<Result<()>> },
}

impl Command {
    /// Returns the command name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Inbound { .. } => "inbound",
            Self::Disconnected { .. } => "disconnected",
            Self::AddConsumer { .. } => "add_consumer",
            Self::RemoveConsumer { .. } => "remove_consumer",
            Self::RequestSession { .. } => "request_session",
            Self::ReleaseSession { .. } => "release_session",
            Self::FollowerSession { .. } => "follower_session",
            Self::ThrottleMessagesAt { .. } => "throttle_messages_at",
            Self::Send { .. } => "send",
            Self::FinishSending { .. } => "finish_sending",
            Self::Terminate { .. } => "terminate",
            Self::ResetSequenceNumbers { .. } => "reset_sequence_numbers",
            Self::ResetState { .. } => "reset_state",
            Self::Sessions { .. } => "sessions",
            Self::Prune { .. } => "prune",
            Self::Close { .. } => "close",
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Command").field(&self.name()).finish()
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Handles one command. Returns false once the engine closed.
fn dispatch(engine: &mut Engine, command: Command) -> bool {
    match command {
        Command::Connect { transport, reply } => {
            let _ = reply.send(engine.connect(transport, now()));
        }
        Command::Inbound {
            connection_id,
            frame,
        } => match engine.on_frame(connection_id, &frame, now()) {
            Ok(()) => {}
            Err(FixpError::Session(SessionError::UnknownConnection(_))) => {
                debug!(connection_id = connection_id.0, "frame for closed connection dropped");
            }
            Err(err) => {
                error!(connection_id = connection_id.0, error = %err, "inbound frame failed");
                engine.on_disconnected(connection_id);
            }
        },
        Command::Disconnected { connection_id } => engine.on_disconnected(connection_id),
        Command::AddConsumer { consumer, reply } => {
            let _ = reply.send(engine.add_consumer(consumer));
        }
        Command::RemoveConsumer { consumer, reply } => {
            let _ = reply.send(engine.remove_consumer(consumer));
        }
        Command::RequestSession {
            consumer,
            session_id,
            reply,
        } => {
            let _ = reply.send(engine.request_session(consumer, session_id));
        }
        Command::ReleaseSession {
            consumer,
            session_id,
            reply,
        } => {
            let _ = reply.send(engine.release_session(consumer, session_id));
        }
        Command::FollowerSession {
            consumer,
            identity,
            next_session_ver_id,
            reply,
        } => {
            let _ = reply.send(engine.follower_session(consumer, identity, next_session_ver_id));
        }
        Command::ThrottleMessagesAt {
            session_id,
            limit,
            reply,
        } => {
            let _ = reply.send(engine.throttle_messages_at(session_id, limit));
        }
        Command::Send {
            consumer,
            session_id,
            template_id,
            body,
            reply,
        } => {
            let _ = reply.send(engine.send(consumer, session_id, template_id, body, now()));
        }
        Command::FinishSending {
            consumer,
            session_id,
            reply,
        } => {
            let _ = reply.send(engine.finish_sending(consumer, session_id, now()));
        }
        Command::Terminate {
            consumer,
            session_id,
            code,
            reply,
        } => {
            let _ = reply.send(engine.terminate(consumer, session_id, code, now()));
        }
        Command::ResetSequenceNumbers { session_id, reply } => {
            let _ = reply.send(engine.reset_sequence_numbers(session_id));
        }
        Command::ResetState { reply } => {
            let _ = reply.send(engine.reset_state());
        }
        Command::Sessions { reply } => {
            let _ = reply.send(engine.sessions());
        }
        Command::Prune { session_id, reply } => {
            let _ = reply.send(engine.prune(session_id));
        }
        Command::Close { reply } => {
            let _ = reply.send(engine.close(now()));
            return false;
        }
    }
    true
}

/// Runs `engine` until a `Close` command arrives or every handle is dropped.
///
/// Timers and suspended replays are serviced every `tick`.
pub async fn run_engine(mut engine: Engine, mut receiver: mpsc::Receiver<Command>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(tick = ?tick, "engine task started");
    loop {
        tokio::select! {
            command = receiver.recv() => {
                let Some(command) = command else {
                    if let Err(err) = engine.close(now()) {
                        warn!(error = %err, "engine close failed");
                    }
                    break;
                };
                if !dispatch(&mut engine, command) {
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(err) = engine.poll(now()) {
                    error!(error = %err, "engine poll failed");
                }
            }
        }
    }
    info!("engine task stopped");
}

/// Cloneable handle onto a running engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<Command>,
    reply_timeout: Duration,
}

impl EngineHandle {
    /// Wraps the sending side of an engine task's command channel.
    #[must_use]
    pub const fn new(sender: mpsc::Sender<Command>, reply_timeout: Duration) -> Self {
        Self {
            sender,
            reply_timeout,
        }
    }

    /// Spawns `engine` on the current runtime.
    #[must_use]
    pub fn spawn(engine: Engine, capacity: usize, tick: Duration) -> (Self, JoinHandle<()>) {
        let reply_timeout = engine.config().reply_timeout;
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_engine(engine, receiver, tick));
        (Self::new(sender, reply_timeout), task)
    }

    /// Returns the reply timeout.
    #[must_use]
    pub const fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    async fn post(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::Closed.into())
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        let command = make(reply);
        let name = command.name();
        let exchange = async {
            self.sender
                .send(command)
                .await
                .map_err(|_| SessionError::Closed)?;
            response.await.map_err(|_| SessionError::Closed)
        };
        match tokio::time::timeout(self.reply_timeout, exchange).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(command = name, timeout = ?self.reply_timeout, "engine reply timed out");
                Err(SessionError::Timeout(self.reply_timeout).into())
            }
        }
    }

    /// Attaches a transport, returning its connection id.
    ///
    /// # Errors
    /// Returns `SessionError::Timeout` or `SessionError::Closed`.
    pub async fn connect(&self, transport: Box<dyn Transport>) -> Result<ConnectionId> {
        self.request(|reply| Command::Connect { transport, reply }).await
    }

    /// Forwards one complete inbound frame.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the engine task stopped.
    pub async fn inbound(&self, connection_id: ConnectionId, frame: Bytes) -> Result<()> {
        self.post(Command::Inbound {
            connection_id,
            frame,
        })
        .await
    }

    /// Reports that a transport's socket closed.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the engine task stopped.
    pub async fn disconnected(&self, connection_id: ConnectionId) -> Result<()> {
        self.post(Command::Disconnected { connection_id }).await
    }

    /// Registers a consumer.
    ///
    /// # Errors
    /// Returns `SessionError::Timeout` or `SessionError::Closed`.
    pub async fn add_consumer(&self, consumer: Box<dyn Consumer>) -> Result<ConsumerId> {
        self.request(|reply| Command::AddConsumer { consumer, reply })
            .await
    }

    /// Unregisters a consumer and releases its sessions.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn remove_consumer(&self, consumer: ConsumerId) -> Result<Vec<u64>> {
        self.request(|reply| Command::RemoveConsumer { consumer, reply })
            .await?
    }

    /// Acquires a session.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn request_session(
        &self,
        consumer: ConsumerId,
        session_id: u64,
    ) -> Result<SessionReplyStatus> {
        self.request(|reply| Command::RequestSession {
            consumer,
            session_id,
            reply,
        })
        .await?
    }

    /// Releases a session back to the engine.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn release_session(
        &self,
        consumer: ConsumerId,
        session_id: u64,
    ) -> Result<SessionReplyStatus> {
        self.request(|reply| Command::ReleaseSession {
            consumer,
            session_id,
            reply,
        })
        .await?
    }

    /// Provisions a follower session.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn follower_session(
        &self,
        consumer: ConsumerId,
        identity: SessionIdentity,
        next_session_ver_id: Option<u64>,
    ) -> Result<u64> {
        self.request(|reply| Command::FollowerSession {
            consumer,
            identity,
            next_session_ver_id,
            reply,
        })
        .await?
    }

    /// Changes a session's inbound throttle.
    ///
    /// # Errors
    /// Returns `SessionError::Timeout` or `SessionError::Closed`.
    pub async fn throttle_messages_at(
        &self,
        session_id: u64,
        limit: RateLimit,
    ) -> Result<ThrottleConfigurationStatus> {
        self.request(|reply| Command::ThrottleMessagesAt {
            session_id,
            limit,
            reply,
        })
        .await
    }

    /// Sends a business message, returning its sequence number.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn send(
        &self,
        consumer: ConsumerId,
        session_id: u64,
        template_id: u16,
        body: Bytes,
    ) -> Result<u64> {
        self.request(|reply| Command::Send {
            consumer,
            session_id,
            template_id,
            body,
            reply,
        })
        .await?
    }

    /// Declares that no further messages will be sent on a session.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn finish_sending(&self, consumer: ConsumerId, session_id: u64) -> Result<()> {
        self.request(|reply| Command::FinishSending {
            consumer,
            session_id,
            reply,
        })
        .await?
    }

    /// Starts a graceful termination.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn terminate(
        &self,
        consumer: ConsumerId,
        session_id: u64,
        code: TerminationCode,
    ) -> Result<()> {
        self.request(|reply| Command::Terminate {
            consumer,
            session_id,
            code,
            reply,
        })
        .await?
    }

    /// Resets an offline session to 1/1.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn reset_sequence_numbers(&self, session_id: u64) -> Result<()> {
        self.request(|reply| Command::ResetSequenceNumbers { session_id, reply })
            .await?
    }

    /// Purges every session record and logged message.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn reset_state(&self) -> Result<()> {
        self.request(|reply| Command::ResetState { reply }).await?
    }

    /// Returns a snapshot of every session.
    ///
    /// # Errors
    /// Returns `SessionError::Timeout` or `SessionError::Closed`.
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>> {
        self.request(|reply| Command::Sessions { reply }).await
    }

    /// Prunes a session's message log.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn prune(&self, session_id: u64) -> Result<usize> {
        self.request(|reply| Command::Prune { session_id, reply })
            .await?
    }

    /// Closes every transport and stops the engine task.
    ///
    /// # Errors
    /// Returns the engine's error, `SessionError::Timeout` or
    /// `SessionError::Closed`.
    pub async fn close(&self) -> Result<()> {
        self.request(|reply| Command::Close { reply }).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedAuth, establish, negotiate};
    use fixp_core::frame::Frame;
    use fixp_session::config::SessionConfig;
    use fixp_session::state::State;
    use fixp_store::memory::{MemoryLedger, MemoryMessageLog};
    use fixp_transport::memory::MemoryTransport;
    use std::sync::Arc;

    fn spawn_engine() -> (EngineHandle, JoinHandle<()>) {
        let engine = Engine::new(
            SessionConfig::new().with_reply_timeout(Duration::from_secs(2)),
            Arc::new(MemoryMessageLog::new()),
            Arc::new(MemoryLedger::new()),
            Box::new(ScriptedAuth::accept_all()),
        )
        .unwrap();
        EngineHandle::spawn(engine, 16, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_handle_drives_session() {
        let (handle, task) = spawn_engine();
        let (transport, probe) = MemoryTransport::new();
        let id = handle.connect(Box::new(transport)).await.unwrap();

        let identity = SessionIdentity::new(9, 1);
        handle
            .inbound(id, negotiate(identity).to_bytes().unwrap())
            .await
            .unwrap();
        handle
            .inbound(id, establish(identity, 1, 1000).to_bytes().unwrap())
            .await
            .unwrap();

        let sessions = handle.sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].state, State::Established);
        let frames = probe.take_frames().unwrap();
        assert!(matches!(frames[..], [
            Frame::NegotiateResponse { .. },
            Frame::EstablishAck { .. }
        ]));

        handle.close().await.unwrap();
        task.await.unwrap();
        assert!(probe.is_disconnected());
        assert!(matches!(
            handle.sessions().await,
            Err(FixpError::Session(SessionError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_consumer_commands() {
        let (handle, _task) = spawn_engine();
        let consumer = handle
            .add_consumer(Box::new(crate::application::NoOpConsumer))
            .await
            .unwrap();
        let session_id = handle
            .follower_session(consumer, SessionIdentity::new(5, 1), None)
            .await
            .unwrap();
        assert_eq!(session_id, 5);
        assert_eq!(
            handle.release_session(consumer, 5).await.unwrap(),
            SessionReplyStatus::Ok
        );
        assert_eq!(
            handle.request_session(consumer, 5).await.unwrap(),
            SessionReplyStatus::Ok
        );
        assert_eq!(
            handle.send(consumer, 5, 300, Bytes::from_static(b"x")).await.unwrap(),
            1
        );
        assert_eq!(
            handle
                .throttle_messages_at(5, RateLimit::new(1, Duration::from_secs(1)))
                .await
                .unwrap(),
            ThrottleConfigurationStatus::NotEstablished
        );
        handle.reset_state().await.unwrap();
        assert!(handle.sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_have_one_winner() {
        let (handle, _task) = spawn_engine();
        let creator = handle
            .add_consumer(Box::new(crate::application::NoOpConsumer))
            .await
            .unwrap();
        handle
            .follower_session(creator, SessionIdentity::new(5, 1), None)
            .await
            .unwrap();
        handle.release_session(creator, 5).await.unwrap();

        let mut requests = Vec::new();
        for _ in 0..8 {
            let consumer = handle
                .add_consumer(Box::new(crate::application::NoOpConsumer))
                .await
                .unwrap();
            let handle = handle.clone();
            requests.push(tokio::spawn(async move {
                handle.request_session(consumer, 5).await
            }));
        }
        let mut statuses = Vec::new();
        for request in requests {
            statuses.push(request.await.unwrap().unwrap());
        }
        assert_eq!(
            statuses
                .iter()
                .filter(|status| **status == SessionReplyStatus::Ok)
                .count(),
            1
        );
        assert!(statuses.iter().all(|status| matches!(
            status,
            SessionReplyStatus::Ok | SessionReplyStatus::OtherSessionOwner
        )));
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (sender, _receiver) = mpsc::channel(4);
        let handle = EngineHandle::new(sender, Duration::from_millis(20));
        let err = handle.sessions().await.unwrap_err();
        assert!(matches!(
            err,
            FixpError::Session(SessionError::Timeout(timeout)) if timeout == Duration::from_millis(20)
        ));
    }

    #[tokio::test]
    async fn test_stopped_engine_is_closed() {
        let (sender, receiver) = mpsc::channel(4);
        drop(receiver);
        let handle = EngineHandle::new(sender, Duration::from_secs(1));
        assert!(matches!(
            handle.request_session(ConsumerId(1), 1).await,
            Err(FixpError::Session(SessionError::Closed))
        ));
        assert!(matches!(
            handle.inbound(ConnectionId(1), Bytes::new()).await,
            Err(FixpError::Session(SessionError::Closed))
        ));
    }
}
