/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Session configuration.
//!
//! This module provides the acceptor-side options shared by every session
//! an engine serves.

use fixp_core::error::SessionError;
use std::time::Duration;

/// A message count allowed per time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum number of messages per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimit {
    /// Creates a rate limit.
    #[must_use]
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Returns true if both parameters are non-zero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.limit > 0 && !self.window.is_zero()
    }
}

/// Configuration for FIXP sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Smallest keep-alive interval a client may request.
    pub min_keep_alive_interval: Duration,
    /// Largest keep-alive interval a client may request.
    pub max_keep_alive_interval: Duration,
    /// Time allowed from connect to Negotiate/Establish, and from Negotiate
    /// to Establish, before the transport is dropped without reply.
    pub no_logon_disconnect_timeout: Duration,
    /// Inbound silence allowed, in keep-alive intervals.
    pub liveness_multiplier: u32,
    /// Time to wait for the peer's Terminate after sending ours.
    pub terminate_timeout: Duration,
    /// Largest `count` accepted in one RetransmitRequest.
    pub max_retransmission_range: Option<u64>,
    /// RetransmitRequests allowed per window.
    pub retransmit_rate_limit: Option<RateLimit>,
    /// Inbound business messages allowed per window.
    pub throttle: Option<RateLimit>,
    /// Time a consumer command waits for the engine's reply.
    pub reply_timeout: Duration,
    /// Maximum frame size in bytes.
    pub max_message_size: usize,
}

impl SessionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_keep_alive_interval: Duration::from_millis(100),
            max_keep_alive_interval: Duration::from_secs(60),
            no_logon_disconnect_timeout: Duration::from_secs(5),
            liveness_multiplier: 2,
            terminate_timeout: Duration::from_secs(5),
            max_retransmission_range: None,
            retransmit_rate_limit: None,
            throttle: None,
            reply_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024,
        }
    }

    /// Sets the accepted keep-alive bounds.
    #[must_use]
    pub fn with_keep_alive_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_keep_alive_interval = min;
        self.max_keep_alive_interval = max;
        self
    }

    /// Sets the no-logon disconnect timeout.
    #[must_use]
    pub fn with_no_logon_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.no_logon_disconnect_timeout = timeout;
        self
    }

    /// Sets the liveness multiplier.
    #[must_use]
    pub const fn with_liveness_multiplier(mut self, multiplier: u32) -> Self {
        self.liveness_multiplier = multiplier;
        self
    }

    /// Sets the terminate reply timeout.
    #[must_use]
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Sets the maximum retransmission range.
    #[must_use]
    pub const fn with_max_retransmission_range(mut self, count: u64) -> Self {
        self.max_retransmission_range = Some(count);
        self
    }

    /// Sets the retransmit request rate limit.
    #[must_use]
    pub const fn with_retransmit_rate_limit(mut self, limit: RateLimit) -> Self {
        self.retransmit_rate_limit = Some(limit);
        self
    }

    /// Sets the inbound business message throttle.
    #[must_use]
    pub const fn with_throttle(mut self, limit: RateLimit) -> Self {
        self.throttle = Some(limit);
        self
    }

    /// Sets the consumer command reply timeout.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Returns true if `keep_alive` lies within the configured bounds.
    #[must_use]
    pub fn accepts_keep_alive(&self, keep_alive: Duration) -> bool {
        keep_alive >= self.min_keep_alive_interval && keep_alive <= self.max_keep_alive_interval
    }

    /// Returns the inbound silence allowed for a keep-alive interval.
    #[must_use]
    pub fn liveness_timeout(&self, keep_alive: Duration) -> Duration {
        keep_alive * self.liveness_multiplier
    }

    /// Checks the configuration for inconsistent values.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` describing the first problem.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.min_keep_alive_interval > self.max_keep_alive_interval {
            return Err(SessionError::Configuration(format!(
                "min keep-alive {:?} exceeds max {:?}",
                self.min_keep_alive_interval, self.max_keep_alive_interval
            )));
        }
        if self.liveness_multiplier == 0 {
            return Err(SessionError::Configuration(
                "liveness multiplier must be at least 1".to_string(),
            ));
        }
        if self.max_retransmission_range == Some(0) {
            return Err(SessionError::Configuration(
                "max retransmission range must be at least 1".to_string(),
            ));
        }
        for (name, limit) in [
            ("throttle", self.throttle),
            ("retransmit rate limit", self.retransmit_rate_limit),
        ] {
            if limit.is_some_and(|l| !l.is_valid()) {
                return Err(SessionError::Configuration(format!(
                    "{name} needs a non-zero limit and window"
                )));
            }
        }
        if self.max_message_size < fixp_core::frame::HEADER_LEN {
            return Err(SessionError::Configuration(format!(
                "max message size {} is below the frame header size",
                self.max_message_size
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for session configuration.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    keep_alive_bounds: Option<(Duration, Duration)>,
    no_logon_disconnect_timeout: Option<Duration>,
    liveness_multiplier: Option<u32>,
    terminate_timeout: Option<Duration>,
    max_retransmission_range: Option<u64>,
    retransmit_rate_limit: Option<RateLimit>,
    throttle: Option<RateLimit>,
    reply_timeout: Option<Duration>,
    max_message_size: Option<usize>,
}

impl SessionConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the accepted keep-alive bounds.
    #[must_use]
    pub fn keep_alive_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.keep_alive_bounds = Some((min, max));
        self
    }

    /// Sets the no-logon disconnect timeout.
    #[must_use]
    pub fn no_logon_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.no_logon_disconnect_timeout = Some(timeout);
        self
    }

    /// Sets the liveness multiplier.
    #[must_use]
    pub const fn liveness_multiplier(mut self, multiplier: u32) -> Self {
        self.liveness_multiplier = Some(multiplier);
        self
    }

    /// Sets the terminate reply timeout.
    #[must_use]
    pub fn terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = Some(timeout);
        self
    }

    /// Sets the maximum retransmission range.
    #[must_use]
    pub const fn max_retransmission_range(mut self, count: u64) -> Self {
        self.max_retransmission_range = Some(count);
        self
    }

    /// Sets the retransmit request rate limit.
    #[must_use]
    pub const fn retransmit_rate_limit(mut self, limit: RateLimit) -> Self {
        self.retransmit_rate_limit = Some(limit);
        self
    }

    /// Sets the inbound throttle.
    #[must_use]
    pub const fn throttle(mut self, limit: RateLimit) -> Self {
        self.throttle = Some(limit);
        self
    }

    /// Sets the consumer command reply timeout.
    #[must_use]
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    /// Returns `SessionError::Configuration` if the result is inconsistent.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        let mut config = SessionConfig::new();
        if let Some((min, max)) = self.keep_alive_bounds {
            config = config.with_keep_alive_bounds(min, max);
        }
        if let Some(timeout) = self.no_logon_disconnect_timeout {
            config.no_logon_disconnect_timeout = timeout;
        }
        if let Some(multiplier) = self.liveness_multiplier {
            config.liveness_multiplier = multiplier;
        }
        if let Some(timeout) = self.terminate_timeout {
            config.terminate_timeout = timeout;
        }
        config.max_retransmission_range = self.max_retransmission_range;
        config.retransmit_rate_limit = self.retransmit_rate_limit;
        config.throttle = self.throttle;
        if let Some(timeout) = self.reply_timeout {
            config.reply_timeout = timeout;
        }
        if let Some(size) = self.max_message_size {
            config.max_message_size = size;
        }
        config.validate()?;
        Ok(config)
    }
}
