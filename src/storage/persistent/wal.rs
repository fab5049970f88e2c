//! Write-ahead log for the persistent store.
//!
//! Every mutation is appended here before it is applied to the in-memory
//! index; on open the log is replayed to rebuild the index.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: codec-framed WalEntry]
//! [RECORD 2: codec-framed WalEntry]
//! ...
//! ```
//!
//! A record cut short at the end of the file (a crash mid-append) is dropped
//! on open. A checksum failure anywhere else is reported as corruption.
//!
//! An append that fails is rolled back by truncating the file to its length
//! before the append, so a failed write never reappears on replay. If the
//! truncation itself fails the log refuses all further appends.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::attention::{Attention, AttentionId};
use crate::doctor::{Doctor, DoctorId};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: WalEntryKind,
}

/// The mutation recorded by a WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    DoctorInsert(Doctor),
    DoctorDelete { id: DoctorId },
    AttentionInsert(Attention),
    AttentionDelete { id: AttentionId },
    AttentionsCleared,
    /// Id counters at the time of a rewrite, so compaction never lets an id be reused.
    Watermark {
        next_doctor: DoctorId,
        next_attention: AttentionId,
    },
}

struct WalWriter {
    file: File,
    /// File length after the last successful append.
    len: u64,
    sequence: u64,
    /// Set when a failed append could not be rolled back.
    failed: bool,
}

impl WalWriter {
    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            warn!(error = %e, "cannot roll back failed WAL append; refusing further writes");
            self.failed = true;
        }
    }
}

/// Append-only mutation log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
    #[cfg(test)]
    fail_next_append: AtomicBool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

impl WriteAheadLog {
    /// Open or create a log file.
    ///
    /// An existing file is scanned to find the last sequence number; a torn
    /// final record is truncated away.
    ///
    /// # Errors
    /// Fails with `ErrorKind::InvalidData` if a record before the tail is corrupted.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let has_header = path.exists() && fs::metadata(path)?.len() >= codec::HEADER_LEN;

        let sequence = if has_header {
            let scan = scan(path)?;
            let len = fs::metadata(path)?.len();
            if scan.valid_end < len {
                warn!(
                    path = %path.display(),
                    dropped_bytes = len - scan.valid_end,
                    "dropping torn record at end of WAL"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(scan.valid_end)?;
                file.sync_all()?;
            }
            scan.last_sequence
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file,
                len,
                sequence,
                failed: false,
            }),
            sync_on_write,
            #[cfg(test)]
            fail_next_append: AtomicBool::new(false),
        })
    }

    /// Append an entry, returning its sequence number.
    ///
    /// On error nothing of the entry remains in the log.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        if writer.failed {
            return Err(IoError::new(
                ErrorKind::Other,
                "WAL is read-only after a failed append could not be rolled back",
            ));
        }

        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        if let Err(e) = self.write_record(&mut writer, &encoded) {
            writer.rollback();
            return Err(e);
        }

        writer.len += encoded.len() as u64;
        writer.sequence = sequence;
        Ok(sequence)
    }

    fn write_record(&self, writer: &mut WalWriter, record: &[u8]) -> IoResult<()> {
        #[cfg(test)]
        if self.fail_next_append.swap(false, Ordering::SeqCst) {
            writer.file.write_all(&record[..record.len() / 2])?;
            return Err(IoError::new(ErrorKind::Other, "injected write failure"));
        }

        writer.file.write_all(record)?;
        if self.sync_on_write {
            writer.file.sync_data()?;
        }
        Ok(())
    }

    /// Makes the next append write half its record and then fail.
    #[cfg(test)]
    pub(crate) fn fail_next_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    /// Iterate over all entries, oldest first.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry (0 for an empty log).
    pub fn current_sequence(&self) -> u64 {
        self.writer.lock().map(|w| w.sequence).unwrap_or(0)
    }

    /// Size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Atomically replace the log contents with `entries`.
    ///
    /// The new log is written beside the old one, synced, then renamed over
    /// it, so a crash leaves either the old or the new log intact. Appends
    /// are blocked for the duration.
    pub fn rewrite(&self, entries: impl IntoIterator<Item = WalEntryKind>) -> IoResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;

        let tmp_path = self.path.with_extension("wal.compact");
        let mut sequence = 0;
        {
            let mut out = BufWriter::new(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)?,
            );
            codec::write_header(&mut out)?;
            let timestamp = Utc::now();
            for kind in entries {
                sequence += 1;
                out.write_all(&codec::encode(&WalEntry {
                    sequence,
                    timestamp,
                    kind,
                })?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        writer.len = file.metadata()?.len();
        writer.file = file;
        writer.sequence = sequence;
        writer.failed = false;
        Ok(sequence)
    }
}

struct ScanResult {
    last_sequence: u64,
    valid_end: u64,
}

fn scan(path: &Path) -> IoResult<ScanResult> {
    let mut iter = WalIterator::new(path)?;
    let mut last_sequence = 0;
    let mut valid_end = codec::HEADER_LEN;

    loop {
        match iter.next_entry() {
            Ok(Some(entry)) => {
                last_sequence = entry.sequence;
                valid_end = iter.position()?;
            }
            Ok(None) => break,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                return Err(IoError::new(
                    ErrorKind::InvalidData,
                    format!("corrupted WAL record after sequence {last_sequence}: {e}"),
                ));
            }
        }
    }

    Ok(ScanResult {
        last_sequence,
        valid_end,
    })
}

/// Iterator over WAL entries.
///
/// Yields `Err` for a corrupted record and stops silently at a torn tail.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let version = codec::read_header(&mut reader)?;
        if version != codec::CODEC_VERSION {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("unsupported WAL version {version}"),
            ));
        }
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }

    fn next_entry(&mut self) -> IoResult<Option<WalEntry>> {
        if self.position()? >= self.file_size {
            return Ok(None);
        }
        codec::decode(&mut self.reader).map(Some)
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doctor::{NewDoctor, Specialty};
    use tempfile::tempdir;

    fn doctor(id: u64) -> Doctor {
        NewDoctor::seeded(Specialty::Pediatrics).with_id(DoctorId::new(id))
    }

    #[test]
    fn test_append_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let wal = WriteAheadLog::open(&path, false).unwrap();
            wal.append(WalEntryKind::DoctorInsert(doctor(1))).unwrap();
            wal.append(WalEntryKind::AttentionsCleared).unwrap();
            assert_eq!(wal.current_sequence(), 2);
        }

        let wal = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[0].kind, WalEntryKind::DoctorInsert(_)));
        assert!(matches!(entries[1].kind, WalEntryKind::AttentionsCleared));
    }

    #[test]
    fn test_torn_tail_is_truncated_and_appends_continue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.wal");

        {
            let wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append(WalEntryKind::DoctorInsert(doctor(1))).unwrap();
            wal.append(WalEntryKind::DoctorInsert(doctor(2))).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 3).unwrap();

        let wal = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(wal.current_sequence(), 1);
        wal.append(WalEntryKind::DoctorDelete { id: DoctorId::new(1) }).unwrap();
        drop(wal);

        let wal = WriteAheadLog::open(&path, true).unwrap();
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[1].kind, WalEntryKind::DoctorDelete { .. }));
    }

    #[test]
    fn test_failed_append_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.wal");

        let wal = WriteAheadLog::open(&path, false).unwrap();
        wal.append(WalEntryKind::DoctorInsert(doctor(1))).unwrap();
        let len = wal.size_bytes().unwrap();

        wal.fail_next_append();
        assert!(wal.append(WalEntryKind::DoctorInsert(doctor(2))).is_err());
        assert_eq!(wal.size_bytes().unwrap(), len);
        assert_eq!(wal.current_sequence(), 1);

        assert_eq!(wal.append(WalEntryKind::DoctorInsert(doctor(3))).unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&path, false).unwrap();
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        let ids: Vec<_> = entries
            .iter()
            .map(|e| match &e.kind {
                WalEntryKind::DoctorInsert(d) => (e.sequence, d.id.get()),
                other => panic!("unexpected entry {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![(1, 1), (2, 3)]);
    }

    #[test]
    fn test_rewrite_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rewrite.wal");

        let wal = WriteAheadLog::open(&path, false).unwrap();
        for id in 1..=5 {
            wal.append(WalEntryKind::DoctorInsert(doctor(id))).unwrap();
        }
        wal.append(WalEntryKind::AttentionsCleared).unwrap();
        let before = wal.size_bytes().unwrap();

        let seq = wal.rewrite(vec![WalEntryKind::DoctorInsert(doctor(5))]).unwrap();
        assert_eq!(seq, 1);
        assert!(wal.size_bytes().unwrap() < before);

        wal.append(WalEntryKind::AttentionsCleared).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        assert_eq!(wal.iter().unwrap().count(), 2);
        assert!(!path.with_extension("wal.compact").exists());
    }
}
