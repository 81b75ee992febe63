/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # FIXP Store
//!
//! Sequence persistence and sent-message storage for the FIXP session engine.
//!
//! This crate provides:
//! - **MessageLog trait**: append-only replayable log of sent frames with a prunable lower bound
//! - **SequenceLedger trait**: durable per-session sequence numbers
//! - **SessionRecord**: the persisted form of a session
//! - **MemoryMessageLog / MemoryLedger**: in-memory implementations
//! - **FileLedger**: file-backed ledger with atomic rewrite

pub mod file;
pub mod memory;
pub mod record;
pub mod traits;

pub use file::FileLedger;
pub use memory::{MemoryLedger, MemoryMessageLog};
pub use record::{SessionRecord, VersionStatus};
pub use traits::{MessageLog, SequenceLedger};
