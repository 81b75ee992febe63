/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! In-memory message log and sequence ledger.
//!
//! Suitable for tests and for deployments that accept losing state on
//! restart. Both types are cheap to share behind an `Arc`.

use crate::record::SessionRecord;
use crate::traits::{MessageLog, SequenceLedger};
use bytes::Bytes;
use fixp_core::error::StoreError;
use fixp_core::types::SessionIdentity;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct VersionLog {
    frames: BTreeMap<u64, Bytes>,
    lowest_retained: u64,
    prune_boundary: u64,
    next_seq_no: u64,
}

impl VersionLog {
    fn new() -> Self {
        Self {
            frames: BTreeMap::new(),
            lowest_retained: 1,
            prune_boundary: 1,
            next_seq_no: 1,
        }
    }
}

/// In-memory message log.
///
/// Stores frames in a `BTreeMap` per session version for efficient range
/// reads. Positions are cumulative byte offsets, as in an append-only file.
#[derive(Debug, Default)]
pub struct MemoryMessageLog {
    versions: RwLock<HashMap<SessionIdentity, VersionLog>>,
    position: AtomicU64,
}

impl MemoryMessageLog {
    /// Creates a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of retained frames for `identity`.
    #[must_use]
    pub fn message_count(&self, identity: SessionIdentity) -> usize {
        self.versions
            .read()
            .get(&identity)
            .map_or(0, |log| log.frames.len())
    }

    /// Returns the advised prune boundary for `identity`.
    #[must_use]
    pub fn prune_boundary(&self, identity: SessionIdentity) -> u64 {
        self.versions
            .read()
            .get(&identity)
            .map_or(1, |log| log.prune_boundary)
    }
}

impl MessageLog for MemoryMessageLog {
    fn append(
        &self,
        identity: SessionIdentity,
        seq_no: u64,
        frame: Bytes,
    ) -> Result<u64, StoreError> {
        let mut versions = self.versions.write();
        let log = versions.entry(identity).or_insert_with(VersionLog::new);
        if seq_no < log.next_seq_no {
            return Err(StoreError::AppendFailed {
                seq_no,
                reason: format!("already logged up to {}", log.next_seq_no - 1),
            });
        }
        let len = frame.len() as u64;
        log.frames.insert(seq_no, frame);
        log.next_seq_no = seq_no + 1;
        Ok(self.position.fetch_add(len, Ordering::SeqCst))
    }

    fn truncate_from(&self, identity: SessionIdentity, seq_no: u64) -> Result<usize, StoreError> {
        let mut versions = self.versions.write();
        let Some(log) = versions.get_mut(&identity) else {
            return Ok(0);
        };
        let removed = log.frames.split_off(&seq_no).len();
        log.next_seq_no = log.next_seq_no.min(seq_no.max(log.lowest_retained));
        Ok(removed)
    }

    fn get(&self, identity: SessionIdentity, seq_no: u64) -> Result<Option<Bytes>, StoreError> {
        Ok(self
            .versions
            .read()
            .get(&identity)
            .and_then(|log| log.frames.get(&seq_no).cloned()))
    }

    fn read_range(
        &self,
        identity: SessionIdentity,
        from_seq_no: u64,
        count: u64,
    ) -> Result<Vec<Bytes>, StoreError> {
        let end = from_seq_no.saturating_add(count);
        let versions = self.versions.read();
        let unavailable = || StoreError::RangeNotAvailable {
            range: from_seq_no..end,
        };
        let log = versions.get(&identity).ok_or_else(unavailable)?;
        let frames: Vec<Bytes> = log
            .frames
            .range(from_seq_no..end)
            .map(|(_, frame)| frame.clone())
            .collect();
        if frames.len() as u64 != count {
            return Err(unavailable());
        }
        Ok(frames)
    }

    fn lowest_retained(&self, identity: SessionIdentity) -> u64 {
        self.versions
            .read()
            .get(&identity)
            .map_or(1, |log| log.lowest_retained)
    }

    fn next_seq_no(&self, identity: SessionIdentity) -> u64 {
        self.versions
            .read()
            .get(&identity)
            .map_or(1, |log| log.next_seq_no)
    }

    fn advise_prune_boundary(&self, identity: SessionIdentity, seq_no: u64) {
        let mut versions = self.versions.write();
        let log = versions.entry(identity).or_insert_with(VersionLog::new);
        log.prune_boundary = seq_no.max(log.lowest_retained);
    }

    fn prune(&self, identity: SessionIdentity, seq_no: u64) -> Result<usize, StoreError> {
        let mut versions = self.versions.write();
        let Some(log) = versions.get_mut(&identity) else {
            return Ok(0);
        };
        if seq_no > log.prune_boundary {
            return Err(StoreError::PruneBeyondBoundary {
                requested: seq_no,
                boundary: log.prune_boundary,
            });
        }
        if seq_no <= log.lowest_retained {
            return Ok(0);
        }
        let kept = log.frames.split_off(&seq_no);
        let removed = log.frames.len();
        log.frames = kept;
        log.lowest_retained = seq_no;
        Ok(removed)
    }

    fn versions(&self, session_id: u64) -> Vec<SessionIdentity> {
        let mut ids: Vec<SessionIdentity> = self
            .versions
            .read()
            .keys()
            .filter(|id| id.session_id == session_id)
            .copied()
            .collect();
        ids.sort();
        ids
    }

    fn remove_session(&self, session_id: u64) -> Result<(), StoreError> {
        self.versions
            .write()
            .retain(|id, _| id.session_id != session_id);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.versions.write().clear();
        Ok(())
    }
}

/// In-memory sequence ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: RwLock<BTreeMap<u64, SessionRecord>>,
}

impl MemoryLedger {
    /// Creates a new empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored record for `session_id`.
    #[must_use]
    pub fn record(&self, session_id: u64) -> Option<SessionRecord> {
        self.records.read().get(&session_id).cloned()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl SequenceLedger for MemoryLedger {
    fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.session_id(), record.clone());
        Ok(())
    }

    fn remove(&self, session_id: u64) -> Result<(), StoreError> {
        self.records.write().remove(&session_id);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.records.write().clear();
        Ok(())
    }
}
