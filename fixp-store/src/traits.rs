/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Message log and sequence ledger trait definitions.
//!
//! Both traits are synchronous: the engine drives them from its single
//! run loop and treats every call as a durable commit point.

use crate::record::SessionRecord;
use bytes::Bytes;
use fixp_core::error::StoreError;
use fixp_core::types::SessionIdentity;

/// Append-only, replayable store of sent business frames.
///
/// Frames are stored fully encoded, framing header included, so a replay
/// is byte-identical to the original transmission. Each session version
/// has its own sequence space.
pub trait MessageLog: Send + Sync {
    /// Appends a frame and returns its log position.
    ///
    /// # Errors
    /// Returns `StoreError::AppendFailed` if `seq_no` is not greater than the
    /// last appended sequence number for `identity`.
    fn append(&self, identity: SessionIdentity, seq_no: u64, frame: Bytes)
    -> Result<u64, StoreError>;

    /// Drops every frame from `seq_no` on, so the next append may reuse it.
    ///
    /// Used to take back a frame whose sequence number never became
    /// durable. Returns how many frames were removed.
    ///
    /// # Errors
    /// Returns a store error if the frames cannot be removed.
    fn truncate_from(&self, identity: SessionIdentity, seq_no: u64) -> Result<usize, StoreError>;

    /// Returns the frame stored for `seq_no`, if retained.
    fn get(&self, identity: SessionIdentity, seq_no: u64) -> Result<Option<Bytes>, StoreError>;

    /// Reads `count` consecutive frames starting at `from_seq_no`.
    ///
    /// # Errors
    /// Returns `StoreError::RangeNotAvailable` if any frame in the range is
    /// missing or pruned.
    fn read_range(
        &self,
        identity: SessionIdentity,
        from_seq_no: u64,
        count: u64,
    ) -> Result<Vec<Bytes>, StoreError>;

    /// Returns the lowest sequence number not yet pruned (1 if nothing was).
    fn lowest_retained(&self, identity: SessionIdentity) -> u64;

    /// Returns the sequence number after the last appended frame.
    fn next_seq_no(&self, identity: SessionIdentity) -> u64;

    /// Records the highest point below which pruning is safe.
    fn advise_prune_boundary(&self, identity: SessionIdentity, seq_no: u64);

    /// Discards every frame below `seq_no` and returns how many were removed.
    ///
    /// # Errors
    /// Returns `StoreError::PruneBeyondBoundary` if `seq_no` exceeds the
    /// advised boundary.
    fn prune(&self, identity: SessionIdentity, seq_no: u64) -> Result<usize, StoreError>;

    /// Returns every identity with logged frames for `session_id`.
    fn versions(&self, session_id: u64) -> Vec<SessionIdentity>;

    /// Drops every frame of every version of `session_id`.
    fn remove_session(&self, session_id: u64) -> Result<(), StoreError>;

    /// Drops every frame.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Durable per-session sequence numbers.
///
/// `persist` must be durable when it returns: the engine acknowledges
/// nothing to the peer before it does.
pub trait SequenceLedger: Send + Sync {
    /// Loads every persisted record.
    fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError>;

    /// Inserts or replaces the record for `record.identity.session_id`.
    fn persist(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Removes the record for `session_id`.
    fn remove(&self, session_id: u64) -> Result<(), StoreError>;

    /// Removes every record.
    fn clear(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingLedger {
        persisted: Mutex<Vec<SessionRecord>>,
    }

    impl SequenceLedger for RecordingLedger {
        fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
            Ok(self.persisted.lock().clone())
        }

        fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
            self.persisted.lock().push(record.clone());
            Ok(())
        }

        fn remove(&self, _session_id: u64) -> Result<(), StoreError> {
            Ok(())
        }

        fn clear(&self) -> Result<(), StoreError> {
            self.persisted.lock().clear();
            Ok(())
        }
    }

    #[test]
    fn test_ledger_is_object_safe() {
        let ledger: Box<dyn SequenceLedger> = Box::new(RecordingLedger {
            persisted: Mutex::new(Vec::new()),
        });
        ledger
            .persist(&SessionRecord::new(SessionIdentity::new(1, 1)))
            .unwrap();
        assert_eq!(ledger.load_all().unwrap().len(), 1);
        ledger.clear().unwrap();
        assert!(ledger.load_all().unwrap().is_empty());
    }
}
