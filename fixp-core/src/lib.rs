/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # FIXP Core
//!
//! Core types, codes, frames and error definitions for the FIXP session engine.
//!
//! This crate provides the fundamental building blocks used across all fixp crates:
//! - **Error types**: Unified error handling with `thiserror`
//! - **Codes**: negotiation, establishment, retransmission and termination reasons
//! - **Frames**: the session-layer control frames and their binary encoding
//! - **Core types**: `SessionIdentity`, `SeqNo`, `Timestamp`, `Credentials`
//!
//! ## Framing
//!
//! Frames are self-delimiting through the Simple Open Framing Header, so a
//! frame encoded once can be stored and replayed byte-for-byte.

pub mod codes;
pub mod error;
pub mod frame;
pub mod types;

pub use codes::{
    EstablishRejectCode, NegotiationRejectCode, RetransmitRejectCode, SessionReplyStatus,
    TerminationCode, ThrottleConfigurationStatus, WireCode,
};
pub use error::{DecodeError, EncodeError, FixpError, Result, SessionError, StoreError};
pub use frame::{BusinessMessage, BusinessReject, Frame, Sofh};
pub use types::{
    ConnectionId, ConsumerId, Credentials, SeqNo, SessionIdentity, ShortString, Timestamp,
};
