/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # FIXP Session
//!
//! Session layer state for the FIXP binary entry point engine.
//!
//! This crate provides:
//! - **Connection states**: Runtime protocol phases and the live/offline session record
//! - **Sequence management**: Inbound and outbound sequence numbers with gap detection
//! - **Keep-alive**: Outbound keep-alive cadence and inbound liveness
//! - **Throttling**: Windowed rate limiting of inbound business traffic
//! - **Retransmission**: Request validation and backpressure-aware replay
//! - **Registry**: Session lookup and consumer ownership
//! - **Configuration**: Session configuration options

pub mod config;
pub mod keepalive;
pub mod registry;
pub mod retransmit;
pub mod sequence;
pub mod state;
pub mod throttle;

pub use config::{RateLimit, SessionConfig, SessionConfigBuilder};
pub use keepalive::{Deadline, KeepAliveTimer};
pub use registry::{FollowerOutcome, Offer, SessionInfo, SessionRegistry};
pub use retransmit::{
    DrainOutcome, Outbound, OutboundQueue, ReplayCursor, RetransmissionInfo, RetransmitRequest,
    RetransmitValidator,
};
pub use sequence::{SequenceManager, SequenceResult};
pub use state::{ConnectionState, State};
pub use throttle::{Admission, ThrottleWindow};
