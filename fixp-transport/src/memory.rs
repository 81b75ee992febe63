/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! In-memory transport for tests.
//!
//! Every accepted frame is recorded; a [`MemoryTransportProbe`] clone can
//! inspect them, inject backpressure and observe disconnection.

use crate::{SendOutcome, Transport};
use bytes::Bytes;
use fixp_core::error::DecodeError;
use fixp_core::frame::Frame;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    sent: Vec<Bytes>,
    accepted: usize,
    rejected: usize,
    blocked: bool,
    block_after: Option<usize>,
    disconnected: bool,
}

/// Transport recording sent frames in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Inspection handle onto a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct MemoryTransportProbe {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// Creates a connected transport and its probe.
    #[must_use]
    pub fn new() -> (Self, MemoryTransportProbe) {
        let transport = Self::default();
        let probe = MemoryTransportProbe {
            shared: Arc::clone(&transport.shared),
        };
        (transport, probe)
    }
}

impl Transport for MemoryTransport {
    fn try_send(&mut self, frame: &Bytes) -> SendOutcome {
        let mut shared = self.shared.lock();
        if shared.disconnected {
            return SendOutcome::Closed;
        }
        if shared.block_after == Some(shared.accepted) {
            shared.blocked = true;
            shared.block_after = None;
        }
        if shared.blocked {
            shared.rejected += 1;
            return SendOutcome::Backpressured;
        }
        shared.accepted += 1;
        shared.sent.push(frame.clone());
        SendOutcome::Sent
    }

    fn disconnect(&mut self) {
        self.shared.lock().disconnected = true;
    }

    fn is_connected(&self) -> bool {
        !self.shared.lock().disconnected
    }

    fn peer(&self) -> String {
        String::from("memory")
    }
}

impl MemoryTransportProbe {
    /// Returns every frame accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Bytes> {
        self.shared.lock().sent.clone()
    }

    /// Removes and returns every frame accepted so far.
    #[must_use]
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.shared.lock().sent)
    }

    /// Returns how many frames were accepted in total.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.shared.lock().accepted
    }

    /// Removes and decodes every frame accepted so far.
    pub fn take_frames(&self) -> Result<Vec<Frame>, DecodeError> {
        self.take_sent().iter().map(Frame::decode).collect()
    }

    /// Rejects every send until [`unblock`](Self::unblock).
    pub fn block(&self) {
        self.shared.lock().blocked = true;
    }

    /// Starts rejecting once `total` frames have been accepted in all.
    pub fn block_after(&self, total: usize) {
        self.shared.lock().block_after = Some(total);
    }

    /// Accepts sends again.
    pub fn unblock(&self) {
        self.shared.lock().blocked = false;
    }

    /// Returns how many sends were refused with backpressure.
    #[must_use]
    pub fn rejected(&self) -> usize {
        self.shared.lock().rejected
    }

    /// Returns true once the engine disconnected the transport.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.shared.lock().disconnected
    }

    /// Simulates the peer closing the connection.
    pub fn close_remote(&self) {
        self.shared.lock().disconnected = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_frames() {
        let (mut transport, probe) = MemoryTransport::new();
        let frame = Frame::Sequence { next_seq_no: 4 }.to_bytes().unwrap();
        assert_eq!(transport.try_send(&frame), SendOutcome::Sent);
        assert_eq!(probe.take_frames().unwrap(), vec![Frame::Sequence {
            next_seq_no: 4
        }]);
        assert!(probe.sent().is_empty());
    }

    #[test]
    fn test_block_after() {
        let (mut transport, probe) = MemoryTransport::new();
        probe.block_after(1);
        let frame = Bytes::from_static(b"x");
        assert_eq!(transport.try_send(&frame), SendOutcome::Sent);
        assert_eq!(transport.try_send(&frame), SendOutcome::Backpressured);
        assert_eq!(transport.try_send(&frame), SendOutcome::Backpressured);
        assert_eq!(probe.rejected(), 2);
        probe.unblock();
        assert_eq!(transport.try_send(&frame), SendOutcome::Sent);
        assert_eq!(probe.sent().len(), 2);
    }

    #[test]
    fn test_disconnect() {
        let (mut transport, probe) = MemoryTransport::new();
        transport.disconnect();
        assert!(probe.is_disconnected());
        assert!(!transport.is_connected());
        assert_eq!(
            transport.try_send(&Bytes::from_static(b"x")),
            SendOutcome::Closed
        );
    }
}
