/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Sequence number management.
//!
//! This module provides sequence number tracking for both directions of a
//! FIXP session version.

use fixp_core::types::SeqNo;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks the next inbound and outbound sequence numbers of a session.
///
/// Values never decrease except through [`reset`](Self::reset).
#[derive(Debug)]
pub struct SequenceManager {
    /// Next sequence number expected from the peer.
    next_recv: AtomicU64,
    /// Next sequence number to assign to an outbound message.
    next_sent: AtomicU64,
}

impl SequenceManager {
    /// Creates a new sequence manager with sequence numbers starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_initial(1, 1)
    }

    /// Creates a new sequence manager with specified starting values.
    #[must_use]
    pub fn with_initial(next_recv: u64, next_sent: u64) -> Self {
        Self {
            next_recv: AtomicU64::new(next_recv),
            next_sent: AtomicU64::new(next_sent),
        }
    }

    /// Returns the next expected inbound sequence number.
    #[inline]
    #[must_use]
    pub fn next_recv(&self) -> SeqNo {
        SeqNo::new(self.next_recv.load(Ordering::SeqCst))
    }

    /// Returns the next outbound sequence number without allocating it.
    #[inline]
    #[must_use]
    pub fn next_sent(&self) -> SeqNo {
        SeqNo::new(self.next_sent.load(Ordering::SeqCst))
    }

    /// Returns the last sequence number sent, 0 if none.
    #[inline]
    #[must_use]
    pub fn last_sent(&self) -> u64 {
        self.next_sent.load(Ordering::SeqCst) - 1
    }

    /// Returns the number of messages received so far.
    #[inline]
    #[must_use]
    pub fn last_received(&self) -> u64 {
        self.next_recv.load(Ordering::SeqCst) - 1
    }

    /// Classifies an inbound sequence number against the expected one.
    #[must_use]
    pub fn validate_incoming(&self, received: u64) -> SequenceResult {
        let expected = self.next_recv.load(Ordering::SeqCst);

        if received == expected {
            SequenceResult::Ok
        } else if received < expected {
            SequenceResult::TooLow { expected, received }
        } else {
            SequenceResult::Gap { expected, received }
        }
    }

    /// Raises the next expected inbound value to `next` if it is higher.
    #[inline]
    pub fn advance_recv_to(&self, next: u64) {
        self.next_recv.fetch_max(next, Ordering::SeqCst);
    }

    /// Raises the next outbound value to `next` if it is higher.
    #[inline]
    pub fn advance_sent_to(&self, next: u64) {
        self.next_sent.fetch_max(next, Ordering::SeqCst);
    }

    /// Resets both sequence numbers to 1.
    #[inline]
    pub fn reset(&self) {
        self.next_recv.store(1, Ordering::SeqCst);
        self.next_sent.store(1, Ordering::SeqCst);
    }
}

impl Default for SequenceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of sequence number validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceResult {
    /// Sequence number is as expected.
    Ok,
    /// Sequence number is lower than expected; fatal for the connection.
    TooLow {
        /// Expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },
    /// Sequence number is higher than expected.
    Gap {
        /// Expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },
}

impl SequenceResult {
    /// Returns true if the sequence is valid.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if there's a gap.
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        matches!(self, Self::Gap { .. })
    }

    /// Returns true if the sequence is too low.
    #[must_use]
    pub const fn is_too_low(&self) -> bool {
        matches!(self, Self::TooLow { .. })
    }

    /// Returns `(from, count)` of the missing range for a gap.
    #[must_use]
    pub const fn missing_range(&self) -> Option<(u64, u64)> {
        match *self {
            Self::Gap { expected, received } => Some((expected, received - expected)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_manager_new() {
        let mgr = SequenceManager::new();
        assert_eq!(mgr.next_sent().value(), 1);
        assert_eq!(mgr.next_recv().value(), 1);
        assert_eq!(mgr.last_sent(), 0);
        assert_eq!(mgr.last_received(), 0);
    }

    #[test]
    fn test_validate_incoming() {
        let mgr = SequenceManager::with_initial(5, 1);
        assert!(mgr.validate_incoming(4).is_too_low());
        assert!(mgr.validate_incoming(5).is_ok());

        let gap = mgr.validate_incoming(8);
        assert!(gap.is_gap());
        assert_eq!(gap.missing_range(), Some((5, 3)));
    }

    #[test]
    fn test_advance_never_decreases() {
        let mgr = SequenceManager::new();
        mgr.advance_recv_to(2);
        assert_eq!(mgr.next_recv().value(), 2);
        mgr.advance_recv_to(8);
        assert_eq!(mgr.next_recv().value(), 8);
        mgr.advance_recv_to(3);
        assert_eq!(mgr.next_recv().value(), 8);
        mgr.advance_sent_to(4);
        mgr.advance_sent_to(2);
        assert_eq!(mgr.last_sent(), 3);
    }

    #[test]
    fn test_reset() {
        let mgr = SequenceManager::with_initial(100, 200);
        mgr.reset();
        assert_eq!(mgr.next_sent().value(), 1);
        assert_eq!(mgr.next_recv().value(), 1);
    }
}
