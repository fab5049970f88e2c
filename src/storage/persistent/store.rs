//! WAL-backed `AttentionStore`.
//!
//! Reads are served from an in-memory index. Writes validate against the
//! index, append to the WAL, then apply to the index, all under the index
//! write lock so log order and id order always agree.
//!
//! Every run starts by clearing attentions, so the log would otherwise grow by
//! a full run per run. Clearing compacts the log once it passes the configured
//! size threshold.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info, warn};

use crate::attention::{Attention, AttentionId, NewAttention};
use crate::doctor::{Doctor, DoctorId, NewDoctor};
use crate::storage::memory::{lock_err, HospitalIndex};
use crate::storage::traits::{AttentionStore, StorageError};

use super::file_lock::FileLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "hospital.wal";

/// Outcome of [`PersistentStore::compact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// WAL entries before compaction.
    pub entries_before: u64,
    /// WAL entries after compaction.
    pub entries_after: u64,
    pub wal_size_before: u64,
    pub wal_size_after: u64,
}

/// Durable store rooted at a directory.
pub struct PersistentStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    index: RwLock<HospitalIndex>,
    compact_threshold: Option<u64>,
}

impl PersistentStore {
    /// Open or create a store in `dir`, replaying its WAL.
    pub fn open(dir: &Path, config: &PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let lock = FileLock::acquire(dir)?;
        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)?;

        let store = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            index: RwLock::new(HospitalIndex::default()),
            compact_threshold: config.compact_threshold_bytes,
        };
        store.replay()?;
        Ok(store)
    }

    /// The data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    fn replay(&self) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("replay"))?;
        let mut count = 0u64;

        for entry in self.wal.iter()? {
            let entry = entry?;
            apply(&mut index, entry.kind).map_err(|e| {
                StorageError::BackendError(format!(
                    "WAL entry {} does not apply cleanly: {e}",
                    entry.sequence
                ))
            })?;
            count += 1;
        }

        if count > 0 {
            info!(
                entries = count,
                doctors = index.doctors().len(),
                attentions = index.attention_count(),
                "replayed WAL"
            );
        }
        Ok(())
    }

    /// Rewrite the WAL as a snapshot of the current state.
    ///
    /// Deleted and cleared records disappear from the log; the id watermark
    /// is kept so identifiers are never reused after reopening.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        // The write lock keeps writers out while the log is swapped.
        let index = self.index.write().map_err(|_| lock_err("compact"))?;
        self.compact_locked(&index)
    }

    fn compaction_due(&self) -> bool {
        match self.compact_threshold {
            Some(threshold) => self.wal_size() >= threshold,
            None => false,
        }
    }

    fn compact_locked(&self, index: &HospitalIndex) -> Result<CompactionResult, StorageError> {
        let entries_before = self.wal.current_sequence();
        let wal_size_before = self.wal.size_bytes()?;

        let mut entries = Vec::with_capacity(1 + index.doctors().len() + index.attention_count());
        entries.push(WalEntryKind::Watermark {
            next_doctor: index.next_doctor_id(),
            next_attention: index.next_attention_id(),
        });
        entries.extend(index.doctors().into_iter().map(WalEntryKind::DoctorInsert));
        entries.extend(index.attentions().into_iter().map(WalEntryKind::AttentionInsert));

        let entries_after = self.wal.rewrite(entries)?;
        let wal_size_after = self.wal.size_bytes()?;
        debug!(entries_before, entries_after, wal_size_before, wal_size_after, "compacted WAL");

        Ok(CompactionResult {
            entries_before,
            entries_after,
            wal_size_before,
            wal_size_after,
        })
    }
}

fn apply(index: &mut HospitalIndex, kind: WalEntryKind) -> Result<(), StorageError> {
    match kind {
        WalEntryKind::DoctorInsert(doctor) => index.insert_doctor(doctor),
        WalEntryKind::DoctorDelete { id } => {
            index.remove_doctor(id)?;
        }
        WalEntryKind::AttentionInsert(attention) => index.insert_attention(attention)?,
        WalEntryKind::AttentionDelete { id } => {
            index.remove_attention(id)?;
        }
        WalEntryKind::AttentionsCleared => {
            index.clear_attentions();
        }
        WalEntryKind::Watermark {
            next_doctor,
            next_attention,
        } => index.raise_watermark(next_doctor, next_attention),
    }
    Ok(())
}

impl AttentionStore for PersistentStore {
    fn save_doctor(&self, doctor: NewDoctor) -> Result<DoctorId, StorageError> {
        doctor.validate()?;
        let mut index = self.index.write().map_err(|_| lock_err("doctor.save"))?;
        let doctor = doctor.with_id(index.next_doctor_id());
        let id = doctor.id;
        self.wal.append(WalEntryKind::DoctorInsert(doctor.clone()))?;
        index.insert_doctor(doctor);
        Ok(id)
    }

    fn find_doctor(&self, id: DoctorId) -> Result<Option<Doctor>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("doctor.find"))?;
        Ok(index.doctor(id))
    }

    fn list_doctors(&self) -> Result<Vec<Doctor>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("doctor.list"))?;
        Ok(index.doctors())
    }

    fn delete_doctor(&self, id: DoctorId) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("doctor.delete"))?;
        if !index.contains_doctor(id) {
            return Err(StorageError::DoctorNotFound(id));
        }
        self.wal.append(WalEntryKind::DoctorDelete { id })?;
        index.remove_doctor(id)?;
        Ok(())
    }

    fn save_attention(&self, attention: NewAttention) -> Result<AttentionId, StorageError> {
        attention.validate()?;
        let mut index = self.index.write().map_err(|_| lock_err("attention.save"))?;
        if !index.contains_doctor(attention.doctor_id) {
            return Err(StorageError::DoctorNotFound(attention.doctor_id));
        }
        let attention = attention.with_id(index.next_attention_id());
        let id = attention.id;
        self.wal.append(WalEntryKind::AttentionInsert(attention.clone()))?;
        index.insert_attention(attention)?;
        Ok(id)
    }

    fn find_attention(&self, id: AttentionId) -> Result<Option<Attention>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("attention.find"))?;
        Ok(index.attention(id))
    }

    fn list_attentions(&self) -> Result<Vec<Attention>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("attention.list"))?;
        Ok(index.attentions())
    }

    fn list_attentions_for_doctor(&self, doctor: DoctorId) -> Result<Vec<Attention>, StorageError> {
        let index = self
            .index
            .read()
            .map_err(|_| lock_err("attention.list_for_doctor"))?;
        Ok(index.attentions_for(doctor))
    }

    fn delete_attention(&self, id: AttentionId) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("attention.delete"))?;
        if !index.contains_attention(id) {
            return Err(StorageError::AttentionNotFound(id));
        }
        self.wal.append(WalEntryKind::AttentionDelete { id })?;
        index.remove_attention(id)?;
        Ok(())
    }

    fn clear_attentions(&self) -> Result<usize, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("attention.clear"))?;
        if index.attention_count() == 0 {
            return Ok(0);
        }
        self.wal.append(WalEntryKind::AttentionsCleared)?;
        let removed = index.clear_attentions();

        if self.compaction_due() {
            // The clear is already durable; a failed rewrite keeps the old log.
            match self.compact_locked(&index) {
                Ok(result) => info!(
                    entries_before = result.entries_before,
                    entries_after = result.entries_after,
                    "compacted WAL after clearing attentions"
                ),
                Err(e) => warn!(error = %e, "WAL compaction after clear failed"),
            }
        }
        Ok(removed)
    }

    fn count_attentions(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("attention.count"))?;
        Ok(index.attention_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctor::Specialty;
    use tempfile::tempdir;

    fn config() -> PersistentConfig {
        PersistentConfig {
            sync_on_write: false,
            compact_threshold_bytes: None,
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let (doctor, kept);
        {
            let store = PersistentStore::open(dir.path(), &config()).unwrap();
            doctor = store.save_doctor(NewDoctor::seeded(Specialty::Cardiology)).unwrap();
            let dropped = store.save_attention(NewAttention::new(doctor, 3).unwrap()).unwrap();
            kept = store.save_attention(NewAttention::new(doctor, 5).unwrap()).unwrap();
            store.delete_attention(dropped).unwrap();
        }

        let store = PersistentStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.list_doctors().unwrap().len(), 1);
        let attentions = store.list_attentions_for_doctor(doctor).unwrap();
        assert_eq!(attentions.len(), 1);
        assert_eq!(attentions[0].id, kept);
        assert_eq!(attentions[0].minutes, 5);
    }

    #[test]
    fn test_clear_is_logged_once() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path(), &config()).unwrap();
        let doctor = store.save_doctor(NewDoctor::seeded(Specialty::Neurology)).unwrap();
        store.save_attention(NewAttention::new(doctor, 2).unwrap()).unwrap();

        assert_eq!(store.clear_attentions().unwrap(), 1);
        let seq = store.wal.current_sequence();
        assert_eq!(store.clear_attentions().unwrap(), 0);
        assert_eq!(store.wal.current_sequence(), seq);
    }

    #[test]
    fn test_rejected_writes_are_not_logged() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path(), &config()).unwrap();
        let err = store
            .save_attention(NewAttention::new(DoctorId::new(4), 2).unwrap())
            .unwrap_err();
        assert!(matches!(err, StorageError::DoctorNotFound(_)));
        assert_eq!(store.wal.current_sequence(), 0);
    }

    #[test]
    fn test_compaction_keeps_state_and_watermark() {
        let dir = tempdir().unwrap();
        let last;
        {
            let store = PersistentStore::open(dir.path(), &config()).unwrap();
            let doctor = store.save_doctor(NewDoctor::seeded(Specialty::Dermatology)).unwrap();
            for minutes in 1..=10 {
                store.save_attention(NewAttention::new(doctor, minutes).unwrap()).unwrap();
            }
            store.clear_attentions().unwrap();
            last = store.save_attention(NewAttention::new(doctor, 4).unwrap()).unwrap();

            let result = store.compact().unwrap();
            assert_eq!(result.entries_before, 13);
            assert_eq!(result.entries_after, 3);
            assert!(result.wal_size_after < result.wal_size_before);
        }

        let store = PersistentStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.count_attentions().unwrap(), 1);
        let doctor = store.list_doctors().unwrap()[0].id;
        let next = store.save_attention(NewAttention::new(doctor, 4).unwrap()).unwrap();
        assert!(next > last);
    }

    #[test]
    fn test_failed_write_is_not_replayed() {
        let dir = tempdir().unwrap();
        let (first, second, kept);
        {
            let store = PersistentStore::open(dir.path(), &config()).unwrap();
            first = store.save_doctor(NewDoctor::seeded(Specialty::Cardiology)).unwrap();
            second = store.save_doctor(NewDoctor::seeded(Specialty::Pediatrics)).unwrap();

            store.wal.fail_next_append();
            assert!(store.save_attention(NewAttention::new(first, 1).unwrap()).is_err());
            kept = store.save_attention(NewAttention::new(second, 2).unwrap()).unwrap();

            assert!(store.list_attentions_for_doctor(first).unwrap().is_empty());
            assert_eq!(store.count_attentions().unwrap(), 1);
        }

        let store = PersistentStore::open(dir.path(), &config()).unwrap();
        assert!(store.list_attentions_for_doctor(first).unwrap().is_empty());
        let attentions = store.list_attentions_for_doctor(second).unwrap();
        assert_eq!(attentions.len(), 1);
        assert_eq!(attentions[0].id, kept);
        assert_eq!(attentions[0].doctor_id, second);
        assert_eq!(store.count_attentions().unwrap(), 1);
    }

    #[test]
    fn test_clear_compacts_large_log() {
        let dir = tempdir().unwrap();
        let cfg = PersistentConfig {
            compact_threshold_bytes: Some(1),
            ..config()
        };
        let last;
        {
            let store = PersistentStore::open(dir.path(), &cfg).unwrap();
            let doctor = store.save_doctor(NewDoctor::seeded(Specialty::Traumatology)).unwrap();
            let mut ids = Vec::new();
            for minutes in 1..=10 {
                ids.push(store.save_attention(NewAttention::new(doctor, minutes).unwrap()).unwrap());
            }
            last = ids[9];
            let before = store.wal_size();

            assert_eq!(store.clear_attentions().unwrap(), 10);
            assert!(store.wal_size() < before);
            // Watermark plus the one doctor.
            assert_eq!(store.wal.current_sequence(), 2);
        }

        let store = PersistentStore::open(dir.path(), &cfg).unwrap();
        assert_eq!(store.count_attentions().unwrap(), 0);
        let doctor = store.list_doctors().unwrap()[0].id;
        let next = store.save_attention(NewAttention::new(doctor, 3).unwrap()).unwrap();
        assert!(next > last);
    }

    #[test]
    fn test_clear_below_threshold_keeps_log() {
        let dir = tempdir().unwrap();
        let store = PersistentStore::open(dir.path(), &PersistentConfig::default()).unwrap();
        let doctor = store.save_doctor(NewDoctor::seeded(Specialty::Neurology)).unwrap();
        store.save_attention(NewAttention::new(doctor, 2).unwrap()).unwrap();

        store.clear_attentions().unwrap();
        assert_eq!(store.wal.current_sequence(), 3);
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _store = PersistentStore::open(dir.path(), &config()).unwrap();
        let err = PersistentStore::open(dir.path(), &config()).err().unwrap();
        assert!(matches!(err, StorageError::Io(ref e) if e.kind() == std::io::ErrorKind::WouldBlock));
    }
}
