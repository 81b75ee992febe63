/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # FIXP Transport
//!
//! Transport layer for the FIXP session engine.
//!
//! This crate provides:
//! - **Transport trait**: non-blocking frame sink with a backpressure signal
//! - **Codec**: Tokio codec for Simple Open Framing Header framing
//! - **ChannelTransport**: bounded-channel sink feeding a socket writer task
//! - **MemoryTransport**: in-memory sink with injectable backpressure for tests

pub mod channel;
pub mod codec;
pub mod memory;

pub use channel::{ChannelTransport, WriterHalf};
pub use codec::{CodecError, FixpCodec};
pub use memory::{MemoryTransport, MemoryTransportProbe};

use bytes::Bytes;

/// Result of offering a frame to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was accepted in full.
    Sent,
    /// The transport is temporarily full; offer the same frame again later.
    Backpressured,
    /// The transport is gone; nothing further will be accepted.
    Closed,
}

/// Outbound side of one connection as seen by the engine.
///
/// Implementations never block: a full transport reports
/// [`SendOutcome::Backpressured`] and the engine retries on a later tick.
pub trait Transport: Send {
    /// Offers one complete frame.
    fn try_send(&mut self, frame: &Bytes) -> SendOutcome;

    /// Closes the connection. Calling it again is a no-op.
    fn disconnect(&mut self);

    /// Returns true until the connection is closed by either side.
    fn is_connected(&self) -> bool;

    /// Returns a description of the remote end, for logging.
    fn peer(&self) -> String {
        String::from("unknown")
    }
}
