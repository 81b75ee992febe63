/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Engine builder for fluent configuration.
//!
//! This module provides a builder API for assembling an engine from its
//! configuration, stores and authenticator.

use crate::application::{AcceptAll, Authenticator};
use crate::engine::Engine;
use crate::handle::EngineHandle;
use fixp_core::error::Result;
use fixp_session::config::SessionConfig;
use fixp_store::memory::{MemoryLedger, MemoryMessageLog};
use fixp_store::traits::{MessageLog, SequenceLedger};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Builder for configuring a FIXP engine.
pub struct EngineBuilder {
    /// Session configuration.
    config: SessionConfig,
    /// Outbound message log, in-memory when unset.
    log: Option<Arc<dyn MessageLog>>,
    /// Sequence ledger, in-memory when unset.
    ledger: Option<Arc<dyn SequenceLedger>>,
    /// Authentication strategy.
    authenticator: Box<dyn Authenticator>,
    /// Capacity of the engine task's command channel.
    channel_capacity: usize,
    /// Interval between timer polls.
    tick: Duration,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("persistent_log", &self.log.is_some())
            .field("persistent_ledger", &self.ledger.is_some())
            .field("channel_capacity", &self.channel_capacity)
            .field("tick", &self.tick)
            .finish()
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Creates a new engine builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SessionConfig::new(),
            log: None,
            ledger: None,
            authenticator: Box::new(AcceptAll),
            channel_capacity: 1024,
            tick: Duration::from_millis(10),
        }
    }

    /// Sets the session configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the message log.
    #[must_use]
    pub fn with_message_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Sets the sequence ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn SequenceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Sets the authentication strategy.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Box::new(authenticator);
        self
    }

    /// Sets the command channel capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the timer poll interval.
    #[must_use]
    pub const fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the command channel capacity.
    #[must_use]
    pub const fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Returns the timer poll interval.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        self.tick
    }

    /// Builds the engine, loading persisted sessions.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the ledger
    /// cannot be loaded.
    pub fn build(self) -> Result<Engine> {
        let log = self
            .log
            .unwrap_or_else(|| Arc::new(MemoryMessageLog::new()));
        let ledger = self.ledger.unwrap_or_else(|| Arc::new(MemoryLedger::new()));
        Engine::new(self.config, log, ledger, self.authenticator)
    }

    /// Builds the engine and spawns it on the current runtime.
    ///
    /// # Errors
    /// Returns the same errors as [`build`](Self::build).
    pub fn spawn(self) -> Result<(EngineHandle, JoinHandle<()>)> {
        let capacity = self.channel_capacity;
        let tick = self.tick;
        let engine = self.build()?;
        Ok(EngineHandle::spawn(engine, capacity, tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixp_core::error::{FixpError, SessionError};
    use fixp_core::types::SessionIdentity;
    use fixp_store::record::SessionRecord;

    #[test]
    fn test_engine_builder_default() {
        let builder = EngineBuilder::new();
        assert_eq!(builder.channel_capacity(), 1024);
        assert_eq!(builder.tick(), Duration::from_millis(10));
        assert_eq!(
            builder.config().no_logon_disconnect_timeout,
            Duration::from_secs(5)
        );
        let engine = builder.build().unwrap();
        assert!(engine.sessions().is_empty());
    }

    #[test]
    fn test_engine_builder_loads_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .persist(&SessionRecord::new(SessionIdentity::new(3, 2)).with_sequences(4, 6))
            .unwrap();
        let engine = EngineBuilder::new()
            .with_ledger(ledger)
            .with_channel_capacity(8)
            .build()
            .unwrap();
        let sessions = engine.sessions();
        assert_eq!(sessions[0].identity, SessionIdentity::new(3, 2));
        assert_eq!(sessions[0].next_recv_seq_no, 4);
        assert_eq!(sessions[0].next_sent_seq_no, 6);
    }

    #[test]
    fn test_engine_builder_rejects_invalid_config() {
        let config = SessionConfig::new()
            .with_keep_alive_bounds(Duration::from_secs(2), Duration::from_secs(1));
        let err = EngineBuilder::new().with_config(config).build().unwrap_err();
        assert!(matches!(
            err,
            FixpError::Session(SessionError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_builder_spawn() {
        let (handle, task) = EngineBuilder::new()
            .with_tick(Duration::from_millis(1))
            .spawn()
            .unwrap();
        assert!(handle.sessions().await.unwrap().is_empty());
        handle.close().await.unwrap();
        task.await.unwrap();
    }
}
