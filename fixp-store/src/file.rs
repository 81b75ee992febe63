/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! File-backed sequence ledger.
//!
//! The whole ledger is rewritten on every change: records are encoded into
//! a temporary file which is synced and then renamed over the ledger file,
//! so a crash leaves either the old or the new contents.

use crate::record::{SessionRecord, VersionStatus};
use crate::traits::SequenceLedger;
use bytes::{Buf, BufMut, BytesMut};
use fixp_core::error::StoreError;
use fixp_core::types::{ConsumerId, SessionIdentity};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const MAGIC: &[u8; 4] = b"FXPL";
const FORMAT_VERSION: u8 = 1;
const RECORD_LEN: usize = 8 * 5 + 4 + 1 + 1 + 1;

/// Sequence ledger persisted to a single file.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    records: Mutex<BTreeMap<u64, SessionRecord>>,
}

impl FileLedger {
    /// Opens the ledger at `path`, loading existing records.
    ///
    /// A missing file is treated as an empty ledger.
    ///
    /// # Errors
    /// Returns `StoreError::Corrupted` if the file cannot be parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read(&path) {
            Ok(raw) => decode(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), records = records.len(), "opened ledger");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Returns the ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, records: &BTreeMap<u64, SessionRecord>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&encode(records))?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl SequenceLedger for FileLedger {
    fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }

    fn persist(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let previous = records.insert(record.session_id(), record.clone());
        if let Err(err) = self.flush(&records) {
            match previous {
                Some(prev) => records.insert(prev.session_id(), prev),
                None => records.remove(&record.session_id()),
            };
            return Err(err);
        }
        Ok(())
    }

    fn remove(&self, session_id: u64) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if let Some(prev) = records.remove(&session_id) {
            if let Err(err) = self.flush(&records) {
                records.insert(session_id, prev);
                return Err(err);
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let empty = BTreeMap::new();
        self.flush(&empty)?;
        records.clear();
        Ok(())
    }
}

fn encode(records: &BTreeMap<u64, SessionRecord>) -> BytesMut {
    let mut buf = BytesMut::with_capacity(9 + records.len() * RECORD_LEN);
    buf.put_slice(MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_u32_le(records.len() as u32);
    for record in records.values() {
        buf.put_u64_le(record.identity.session_id);
        buf.put_u64_le(record.identity.session_ver_id);
        buf.put_u64_le(record.next_recv_seq_no);
        buf.put_u64_le(record.next_sent_seq_no);
        buf.put_u64_le(record.keep_alive_ms);
        // Owner 0 is the engine, stored as "no owner".
        buf.put_u32_le(record.last_owner.map_or(0, |owner| owner.0));
        buf.put_u8(record.status.as_u8());
        buf.put_u8(u8::from(record.finished_sending_local));
        buf.put_u8(u8::from(record.finished_sending_remote));
    }
    buf
}

fn decode(mut raw: &[u8]) -> Result<BTreeMap<u64, SessionRecord>, StoreError> {
    let corrupted = |reason: &str| StoreError::Corrupted {
        reason: reason.to_string(),
    };
    if raw.len() < 9 || &raw[..4] != MAGIC {
        return Err(corrupted("missing ledger header"));
    }
    raw.advance(4);
    let version = raw.get_u8();
    if version != FORMAT_VERSION {
        return Err(corrupted(&format!("unsupported format version {version}")));
    }
    let count = raw.get_u32_le() as usize;
    if raw.remaining() != count * RECORD_LEN {
        return Err(corrupted("record count does not match file length"));
    }

    let mut records = BTreeMap::new();
    for _ in 0..count {
        let identity = SessionIdentity::new(raw.get_u64_le(), raw.get_u64_le());
        let next_recv_seq_no = raw.get_u64_le();
        let next_sent_seq_no = raw.get_u64_le();
        let keep_alive_ms = raw.get_u64_le();
        let owner = raw.get_u32_le();
        let status = VersionStatus::from_u8(raw.get_u8())
            .ok_or_else(|| corrupted("unknown version status"))?;
        let finished_sending_local = raw.get_u8() != 0;
        let finished_sending_remote = raw.get_u8() != 0;
        records.insert(identity.session_id, SessionRecord {
            identity,
            next_recv_seq_no,
            next_sent_seq_no,
            keep_alive_ms,
            last_owner: (owner != 0).then_some(ConsumerId(owner)),
            status,
            finished_sending_local,
            finished_sending_remote,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(session_id: u64) -> SessionRecord {
        let mut record =
            SessionRecord::new(SessionIdentity::new(session_id, 3)).with_sequences(5, 7);
        record.keep_alive_ms = 1_000;
        record.last_owner = Some(ConsumerId(2));
        record.finished_sending_local = true;
        record
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.bin");
        {
            let ledger = FileLedger::open(&path).unwrap();
            ledger.persist(&sample(42)).unwrap();
            ledger
                .persist(&SessionRecord::new(SessionIdentity::new(7, 1)))
                .unwrap();
        }

        let reopened = FileLedger::open(&path).unwrap();
        let records = reopened.load_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], sample(42));
        assert_eq!(records[0].last_owner, None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::open(dir.path().join("absent.bin")).unwrap();
        assert!(ledger.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_no_temp_file_after_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.bin");
        let ledger = FileLedger::open(&path).unwrap();
        ledger.persist(&sample(1)).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.bin");
        let ledger = FileLedger::open(&path).unwrap();
        ledger.persist(&sample(1)).unwrap();
        ledger.persist(&sample(2)).unwrap();
        ledger.remove(1).unwrap();
        assert_eq!(FileLedger::open(&path).unwrap().load_all().unwrap().len(), 1);
        ledger.clear().unwrap();
        assert!(FileLedger::open(&path).unwrap().load_all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupted_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.bin");
        fs::write(&path, b"garbage").unwrap();
        assert!(matches!(
            FileLedger::open(&path),
            Err(StoreError::Corrupted { .. })
        ));
    }
}
