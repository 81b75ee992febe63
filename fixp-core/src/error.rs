/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Error types for the FIXP session engine.
//!
//! This module provides a unified error hierarchy using `thiserror` for typed,
//! domain-specific errors across all engine operations.
//!
//! Protocol rejections (a bad Establish, an out-of-range retransmit request)
//! are not errors: they are reject frames sent to the peer. Errors here are
//! framing failures, local API misuse and collaborator failures.

use std::ops::Range;
use thiserror::Error;

/// Result type alias using [`FixpError`] as the error type.
pub type Result<T> = std::result::Result<T, FixpError>;

/// Top-level error type for all engine operations.
#[derive(Debug, Error)]
pub enum FixpError {
    /// Error during frame decoding.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error during frame encoding.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Error in session layer operations.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Error in message log or sequence ledger operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Failure reported by an authentication or consumer collaborator.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// I/O error from underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while decoding framed binary input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer is incomplete, need more data.
    #[error("incomplete frame, need more data")]
    Incomplete,

    /// Framing header declares a length outside the accepted range.
    #[error("invalid frame length {length}: must be within {min}..={max}")]
    InvalidLength {
        /// Declared frame length.
        length: usize,
        /// Minimum accepted length.
        min: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Framing header carries an unsupported encoding type.
    #[error("invalid encoding type 0x{0:04X}")]
    InvalidEncodingType(u16),

    /// Template id is not a known control frame nor a business template.
    #[error("unknown template id {0}")]
    UnknownTemplate(u16),

    /// Frame body ends before all fields were read.
    #[error("truncated body for template {template_id}: need {needed} bytes, have {available}")]
    Truncated {
        /// Template being decoded.
        template_id: u16,
        /// Bytes needed for the next field.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },

    /// A code field holds a value outside its enumeration.
    #[error("invalid {field} code {value}")]
    InvalidCode {
        /// Name of the code field.
        field: &'static str,
        /// Raw wire value.
        value: u8,
    },

    /// A string field exceeds its capacity.
    #[error("string field {field} too long: {length} bytes")]
    StringTooLong {
        /// Name of the field.
        field: &'static str,
        /// Decoded length.
        length: usize,
    },

    /// Invalid UTF-8 in string field.
    #[error("invalid utf-8 in field: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Errors that occur during frame encoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// String value exceeds the one-byte length prefix.
    #[error("field {field} too long: {length} exceeds max {max_length}")]
    FieldTooLong {
        /// Name of the field.
        field: &'static str,
        /// Actual length of the value.
        length: usize,
        /// Maximum allowed length.
        max_length: usize,
    },

    /// Encoded frame does not fit in the framing header length.
    #[error("frame too large: {size} bytes exceeds maximum {max_size}")]
    FrameTooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max_size: usize,
    },
}

/// Errors in session layer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation is not permitted in the current session state.
    #[error("illegal state for {operation}: session {session_id} is {state}")]
    IllegalState {
        /// Operation attempted.
        operation: &'static str,
        /// Session the operation targeted.
        session_id: u64,
        /// Current state name.
        state: String,
    },

    /// No session with the given id is known.
    #[error("unknown session {0}")]
    UnknownSession(u64),

    /// No connection with the given id is known.
    #[error("unknown connection {0}")]
    UnknownConnection(u64),

    /// No consumer registered under this id.
    #[error("unknown consumer {0}")]
    UnknownConsumer(u32),

    /// Operation requires ownership the caller does not hold.
    #[error("consumer {consumer} does not own session {session_id}")]
    NotOwner {
        /// Consumer making the request.
        consumer: u32,
        /// Session targeted.
        session_id: u64,
    },

    /// Sequence number lower than already applied.
    #[error("sequence too low: expected >= {expected}, received {received}")]
    SequenceTooLow {
        /// Minimum expected sequence number.
        expected: u64,
        /// Received sequence number.
        received: u64,
    },

    /// Follower session provisioning refused.
    #[error("cannot provision session {session_id}: {reason}")]
    Provisioning {
        /// Session targeted.
        session_id: u64,
        /// Reason for refusal.
        reason: String,
    },

    /// Session configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Engine did not answer within the reply timeout.
    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),

    /// Engine task has stopped.
    #[error("engine closed")]
    Closed,
}

/// Errors in message log and sequence ledger operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Failed to append a message.
    #[error("failed to append message seq={seq_no}: {reason}")]
    AppendFailed {
        /// Sequence number of the message.
        seq_no: u64,
        /// Reason for failure.
        reason: String,
    },

    /// Message not found in the log.
    #[error("message not found: seq={seq_no}")]
    NotFound {
        /// Sequence number of the missing message.
        seq_no: u64,
    },

    /// Range of messages not available.
    #[error("messages not available for range: {range:?}")]
    RangeNotAvailable {
        /// The requested range of sequence numbers.
        range: Range<u64>,
    },

    /// Prune requested above the advised safe boundary.
    #[error("prune to {requested} exceeds safe boundary {boundary}")]
    PruneBeyondBoundary {
        /// Requested prune point.
        requested: u64,
        /// Advised boundary.
        boundary: u64,
    },

    /// Persisted data is corrupted.
    #[error("store corrupted: {reason}")]
    Corrupted {
        /// Description of the corruption.
        reason: String,
    },

    /// I/O error in persistent store.
    #[error("store i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::InvalidEncodingType(0x5BE0);
        assert_eq!(err.to_string(), "invalid encoding type 0x5BE0");
    }

    #[test]
    fn test_fixp_error_from_decode() {
        let decode_err = DecodeError::Incomplete;
        let err: FixpError = decode_err.into();
        assert!(matches!(err, FixpError::Decode(DecodeError::Incomplete)));
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::IllegalState {
            operation: "send",
            session_id: 42,
            state: "FINISHING_SEND".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "illegal state for send: session 42 is FINISHING_SEND"
        );
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::PruneBeyondBoundary {
            requested: 9,
            boundary: 4,
        };
        assert_eq!(err.to_string(), "prune to 9 exceeds safe boundary 4");
        let err: FixpError = StoreError::NotFound { seq_no: 42 }.into();
        assert_eq!(err.to_string(), "store error: message not found: seq=42");
    }
}
