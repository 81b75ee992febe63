/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Retransmit request validation and backpressure-aware replay.
//!
//! A validated request becomes a [`ReplayCursor`] queued in an
//! [`OutboundQueue`] behind any frames already waiting. The cursor emits a
//! Retransmission header, each logged frame verbatim and a trailing
//! Sequence frame. When the transport refuses a frame the cursor keeps its
//! position and the same frame is offered again on the next drain; frames
//! queued after the cursor wait until it completes.

use crate::config::SessionConfig;
use crate::throttle::{Admission, ThrottleWindow};
use bytes::Bytes;
use fixp_core::codes::RetransmitRejectCode;
use fixp_core::error::{FixpError, StoreError};
use fixp_core::frame::Frame;
use fixp_core::types::{SessionIdentity, Timestamp};
use fixp_store::traits::MessageLog;
use fixp_transport::{SendOutcome, Transport};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

/// Record of one retransmit request, reported to the owning consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmissionInfo {
    /// First requested sequence number.
    pub from_seq_no: u64,
    /// Number of requested messages.
    pub count: u64,
    /// Request timestamp.
    pub timestamp: Timestamp,
    /// Reject code, `None` when the request is serviced.
    pub rejection: Option<RetransmitRejectCode>,
}

/// Decoded RetransmitRequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// Identity named by the request.
    pub identity: SessionIdentity,
    /// Request timestamp.
    pub timestamp: Timestamp,
    /// First requested sequence number.
    pub from_seq_no: u64,
    /// Number of requested messages.
    pub count: u64,
}

/// Range and rate checks applied to retransmit requests.
#[derive(Debug, Clone)]
pub struct RetransmitValidator {
    max_range: Option<u64>,
    rate: Option<ThrottleWindow>,
}

impl RetransmitValidator {
    /// Creates a validator from the configured limits.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            max_range: config.max_retransmission_range,
            rate: config.retransmit_rate_limit.map(ThrottleWindow::new),
        }
    }

    /// Validates `request` against the bound session and the retained log.
    ///
    /// Checks run in order: identity, range, then limits. Every request
    /// that passes the identity and range checks counts against the rate.
    pub fn validate(
        &mut self,
        request: &RetransmitRequest,
        bound: SessionIdentity,
        lowest_retained: u64,
        next_sent: u64,
        now: Instant,
    ) -> Option<RetransmitRejectCode> {
        if request.identity != bound {
            return Some(RetransmitRejectCode::InvalidSession);
        }
        let end = request.from_seq_no.checked_add(request.count);
        let in_range = request.count > 0
            && request.from_seq_no >= lowest_retained.max(1)
            && end.is_some_and(|end| end <= next_sent);
        if !in_range {
            return Some(RetransmitRejectCode::OutOfRange);
        }
        if self.max_range.is_some_and(|max| request.count > max) {
            return Some(RetransmitRejectCode::RequestLimitExceeded);
        }
        match self.rate.as_mut().map(|rate| rate.admit(now)) {
            Some(Admission::Rejected) => Some(RetransmitRejectCode::RequestLimitExceeded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayStage {
    Header,
    Message(u64),
    Trailer,
    Done,
}

/// Resumable position within one retransmission.
#[derive(Debug, Clone)]
pub struct ReplayCursor {
    identity: SessionIdentity,
    request_timestamp: Timestamp,
    from_seq_no: u64,
    count: u64,
    next_sent: u64,
    stage: ReplayStage,
    current: Option<Bytes>,
}

impl ReplayCursor {
    /// Creates a cursor replaying `count` messages from `from_seq_no`,
    /// ending with `Sequence(next_sent)`.
    #[must_use]
    pub fn new(request: &RetransmitRequest, next_sent: u64) -> Self {
        Self {
            identity: request.identity,
            request_timestamp: request.timestamp,
            from_seq_no: request.from_seq_no,
            count: request.count,
            next_sent,
            stage: ReplayStage::Header,
            current: None,
        }
    }

    /// Returns true once the trailing Sequence was accepted.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == ReplayStage::Done
    }

    /// Returns the sequence number about to be replayed, if in the body.
    #[must_use]
    pub fn position(&self) -> Option<u64> {
        match self.stage {
            ReplayStage::Message(seq) => Some(seq),
            _ => None,
        }
    }

    /// Returns the frame for the current position, loading it once.
    fn current_frame(&mut self, log: &dyn MessageLog) -> Result<Option<Bytes>, FixpError> {
        if let Some(frame) = &self.current {
            return Ok(Some(frame.clone()));
        }
        let frame = match self.stage {
            ReplayStage::Header => Frame::Retransmission {
                identity: self.identity,
                request_timestamp: self.request_timestamp,
                from_seq_no: self.from_seq_no,
                count: self.count,
            }
            .to_bytes()?,
            ReplayStage::Message(seq) => log
                .get(self.identity, seq)?
                .ok_or(StoreError::NotFound { seq_no: seq })?,
            ReplayStage::Trailer => Frame::Sequence {
                next_seq_no: self.next_sent,
            }
            .to_bytes()?,
            ReplayStage::Done => return Ok(None),
        };
        self.current = Some(frame.clone());
        Ok(Some(frame))
    }

    fn advance(&mut self) {
        self.current = None;
        let end = self.from_seq_no + self.count;
        self.stage = match self.stage {
            ReplayStage::Header if self.count > 0 => ReplayStage::Message(self.from_seq_no),
            ReplayStage::Header => ReplayStage::Trailer,
            ReplayStage::Message(seq) if seq + 1 < end => ReplayStage::Message(seq + 1),
            ReplayStage::Message(_) => ReplayStage::Trailer,
            ReplayStage::Trailer | ReplayStage::Done => ReplayStage::Done,
        };
    }
}

/// One entry of the outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A ready frame.
    Frame(Bytes),
    /// A retransmission in progress.
    Replay(ReplayCursor),
}

/// Result of draining the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Everything queued was accepted.
    Flushed,
    /// The transport is full; the head entry is retried next time.
    Backpressured,
    /// The transport is closed.
    Closed,
}

/// Strictly ordered outbound frames of one connection.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<Outbound>,
}

impl OutboundQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a ready frame.
    pub fn push_frame(&mut self, frame: Bytes) {
        self.items.push_back(Outbound::Frame(frame));
    }

    /// Queues a retransmission.
    pub fn push_replay(&mut self, cursor: ReplayCursor) {
        self.items.push_back(Outbound::Replay(cursor));
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if a retransmission is queued or in progress.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, Outbound::Replay(_)))
    }

    /// Drops everything queued.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Offers queued frames to `transport` in order until it refuses one.
    ///
    /// # Errors
    /// Returns an error if a replayed frame cannot be read from `log`.
    pub fn drain(
        &mut self,
        transport: &mut dyn Transport,
        log: &dyn MessageLog,
    ) -> Result<(DrainOutcome, usize), FixpError> {
        let mut sent = 0;
        while let Some(head) = self.items.front_mut() {
            match head {
                Outbound::Frame(frame) => match transport.try_send(frame) {
                    SendOutcome::Sent => {
                        sent += 1;
                        self.items.pop_front();
                    }
                    SendOutcome::Backpressured => return Ok((DrainOutcome::Backpressured, sent)),
                    SendOutcome::Closed => return Ok((DrainOutcome::Closed, sent)),
                },
                Outbound::Replay(cursor) => {
                    while let Some(frame) = cursor.current_frame(log)? {
                        match transport.try_send(&frame) {
                            SendOutcome::Sent => {
                                sent += 1;
                                cursor.advance();
                            }
                            SendOutcome::Backpressured => {
                                debug!(
                                    session_id = cursor.identity.session_id,
                                    seq_no = cursor.position(),
                                    "replay suspended by backpressure"
                                );
                                return Ok((DrainOutcome::Backpressured, sent));
                            }
                            SendOutcome::Closed => return Ok((DrainOutcome::Closed, sent)),
                        }
                    }
                    debug!(
                        session_id = cursor.identity.session_id,
                        from_seq_no = cursor.from_seq_no,
                        count = cursor.count,
                        "replay complete"
                    );
                    self.items.pop_front();
                }
            }
        }
        Ok((DrainOutcome::Flushed, sent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimit;
    use fixp_core::frame::BusinessMessage;
    use fixp_store::memory::MemoryMessageLog;
    use fixp_transport::memory::MemoryTransport;
    use std::time::Duration;

    fn id() -> SessionIdentity {
        SessionIdentity::new(42, 1)
    }

    fn request(from: u64, count: u64) -> RetransmitRequest {
        RetransmitRequest {
            identity: id(),
            timestamp: Timestamp::from_millis(5),
            from_seq_no: from,
            count,
        }
    }

    fn logged(n: u64) -> MemoryMessageLog {
        let log = MemoryMessageLog::new();
        for seq in 1..=n {
            let frame = Frame::Business(BusinessMessage::new(
                300,
                seq,
                Bytes::from(format!("report{seq}")),
            ))
            .to_bytes()
            .unwrap();
            log.append(id(), seq, frame).unwrap();
        }
        log
    }

    #[test]
    fn test_validation_order() {
        let mut validator = RetransmitValidator::new(&SessionConfig::new());
        let now = Instant::now();

        let mut other = request(1, 1);
        other.identity = SessionIdentity::new(42, 2);
        assert_eq!(
            validator.validate(&other, id(), 1, 5, now),
            Some(RetransmitRejectCode::InvalidSession)
        );
        assert_eq!(
            validator.validate(&request(3, 3), id(), 1, 5, now),
            Some(RetransmitRejectCode::OutOfRange)
        );
        assert_eq!(
            validator.validate(&request(1, 2), id(), 2, 5, now),
            Some(RetransmitRejectCode::OutOfRange)
        );
        assert_eq!(
            validator.validate(&request(1, 0), id(), 1, 5, now),
            Some(RetransmitRejectCode::OutOfRange)
        );
        assert_eq!(validator.validate(&request(2, 3), id(), 1, 5, now), None);
    }

    #[test]
    fn test_limits() {
        let config = SessionConfig::new()
            .with_max_retransmission_range(2)
            .with_retransmit_rate_limit(RateLimit::new(1, Duration::from_secs(1)));
        let mut validator = RetransmitValidator::new(&config);
        let now = Instant::now();
        assert_eq!(
            validator.validate(&request(1, 3), id(), 1, 10, now),
            Some(RetransmitRejectCode::RequestLimitExceeded)
        );
        assert_eq!(validator.validate(&request(1, 2), id(), 1, 10, now), None);
        assert_eq!(
            validator.validate(&request(1, 2), id(), 1, 10, now),
            Some(RetransmitRejectCode::RequestLimitExceeded)
        );
        assert_eq!(
            validator.validate(&request(1, 2), id(), 1, 10, now + Duration::from_secs(1)),
            None
        );
    }

    #[test]
    fn test_replay_output() {
        let log = logged(4);
        let (mut transport, probe) = MemoryTransport::new();
        let mut queue = OutboundQueue::new();
        queue.push_replay(ReplayCursor::new(&request(2, 2), 5));

        let (outcome, sent) = queue.drain(&mut transport, &log).unwrap();
        assert_eq!(outcome, DrainOutcome::Flushed);
        assert_eq!(sent, 4);

        let sent = probe.take_sent();
        assert!(matches!(
            Frame::decode(&sent[0]).unwrap(),
            Frame::Retransmission {
                from_seq_no: 2,
                count: 2,
                ..
            }
        ));
        assert_eq!(sent[1], log.get(id(), 2).unwrap().unwrap());
        assert_eq!(sent[2], log.get(id(), 3).unwrap().unwrap());
        assert_eq!(
            Frame::decode(&sent[3]).unwrap(),
            Frame::Sequence { next_seq_no: 5 }
        );
    }

    #[test]
    fn test_backpressure_resumes_without_gap_or_interleave() {
        let log = logged(4);
        let (mut transport, probe) = MemoryTransport::new();
        let mut queue = OutboundQueue::new();
        queue.push_replay(ReplayCursor::new(&request(1, 3), 5));
        let live = Bytes::from_static(b"live");
        queue.push_frame(live.clone());

        probe.block_after(2);
        let (outcome, _) = queue.drain(&mut transport, &log).unwrap();
        assert_eq!(outcome, DrainOutcome::Backpressured);
        assert!(queue.is_replaying());

        probe.unblock();
        let (outcome, _) = queue.drain(&mut transport, &log).unwrap();
        assert_eq!(outcome, DrainOutcome::Flushed);
        assert!(queue.is_empty());

        let sent = probe.take_sent();
        assert_eq!(sent.len(), 6);
        assert_eq!(sent[1], log.get(id(), 1).unwrap().unwrap());
        assert_eq!(sent[2], log.get(id(), 2).unwrap().unwrap());
        assert_eq!(sent[3], log.get(id(), 3).unwrap().unwrap());
        assert_eq!(
            Frame::decode(&sent[4]).unwrap(),
            Frame::Sequence { next_seq_no: 5 }
        );
        assert_eq!(sent[5], live);
    }

    #[test]
    fn test_repeated_replay_is_identical() {
        let log = logged(3);
        let mut outputs = Vec::new();
        for _ in 0..2 {
            let (mut transport, probe) = MemoryTransport::new();
            let mut queue = OutboundQueue::new();
            queue.push_replay(ReplayCursor::new(&request(1, 3), 4));
            queue.drain(&mut transport, &log).unwrap();
            outputs.push(probe.take_sent());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn test_missing_frame_is_an_error() {
        let log = logged(1);
        let (mut transport, _probe) = MemoryTransport::new();
        let mut queue = OutboundQueue::new();
        queue.push_replay(ReplayCursor::new(&request(1, 2), 3));
        let err = queue.drain(&mut transport, &log).unwrap_err();
        assert!(matches!(
            err,
            FixpError::Store(StoreError::NotFound { seq_no: 2 })
        ));
    }
}
