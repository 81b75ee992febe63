/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # FIXP
//!
//! Acceptor-side session layer for the FIX Performance Session Layer
//! (FIXP), binary entry point profile.
//!
//! ## Features
//!
//! - **Recoverable sessions**: sequence numbers are persisted before any
//!   frame acknowledging them is sent, so sessions survive restarts
//! - **Retransmission**: gap-free replay of logged messages that resumes
//!   exactly where transport backpressure suspended it
//! - **Flow control**: per-session inbound throttling and retransmit limits
//! - **Async support**: Built on Tokio, with a single-threaded engine task
//!   driven through a cloneable handle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fixp::prelude::*;
//!
//! let (handle, _task) = EngineBuilder::new()
//!     .with_config(SessionConfig::new().with_throttle(RateLimit::new(100, Duration::from_secs(1))))
//!     .spawn()?;
//! let consumer = handle.add_consumer(Box::new(MyConsumer)).await?;
//! Acceptor::bind("0.0.0.0:9000", handle, FixpCodec::new(), 1024).await?.run().await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`]: Identity types, code taxonomy, frames and errors
//! - [`store`]: Message log and sequence ledger
//! - [`transport`]: Transport trait, framing codec and transports
//! - [`session`]: Session state, sequencing, timers and ownership
//! - [`engine`]: Engine, async handle and TCP acceptor

pub mod core {
    //! Identity types, code taxonomy, frames and errors.
    pub use fixp_core::*;
}

pub mod store {
    //! Message log and sequence ledger.
    pub use fixp_store::*;
}

pub mod transport {
    //! Transport trait, framing codec and transports.
    pub use fixp_transport::*;
}

pub mod session {
    //! Session state, sequencing, timers and ownership.
    pub use fixp_session::*;
}

pub mod engine {
    //! Engine, async handle and TCP acceptor.
    pub use fixp_engine::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Core types
    pub use fixp_core::{
        BusinessMessage, ConnectionId, ConsumerId, Credentials, EstablishRejectCode, FixpError,
        Frame, NegotiationRejectCode, Result, RetransmitRejectCode, SessionError,
        SessionIdentity, SessionReplyStatus, StoreError, TerminationCode,
        ThrottleConfigurationStatus, Timestamp,
    };

    // Session
    pub use fixp_session::{RateLimit, SessionConfig, SessionInfo, State};

    // Store
    pub use fixp_store::{FileLedger, MemoryLedger, MemoryMessageLog, MessageLog, SequenceLedger};

    // Transport
    pub use fixp_transport::{FixpCodec, MemoryTransport, Transport};

    // Engine
    pub use fixp_engine::{
        AcceptAll, Acceptor, AuthContext, AuthDecision, Authenticator, Consumer, Engine,
        EngineBuilder, EngineHandle, Outbox, RetransmitDecision,
    };
}
