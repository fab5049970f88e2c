//! Persistent storage backend for hospitalsim.
//!
//! This module provides durable, crash-safe storage with:
//! - Write-Ahead Logging (WAL) replayed on open
//! - File locking for single-process access
//! - CRC32 checksums for corruption detection
//! - Compaction that rewrites the log as a snapshot
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               PersistentStore                 │
//! ├──────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐    │
//! │  │ WriteAheadLog   │  │ HospitalIndex   │    │
//! │  │ (append-only)   │  │ (reads)         │    │
//! │  └────────┬────────┘  └────────┬────────┘    │
//! │           └──────────┬─────────┘             │
//! │                      ↓                       │
//! │           ┌─────────────────────┐            │
//! │           │   FileLock (flock)  │            │
//! │           └─────────────────────┘            │
//! └──────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use store::{CompactionResult, PersistentStore};
pub use wal::{WalEntry, WalEntryKind, WalIterator, WriteAheadLog};

use std::path::Path;

use crate::storage::StorageError;

/// WAL size at which clearing attentions also compacts the log.
pub const DEFAULT_COMPACT_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
    /// Compact the WAL after `clear_attentions` once it reaches this many
    /// bytes. `None` leaves compaction to explicit `compact` calls.
    pub compact_threshold_bytes: Option<u64>,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_threshold_bytes: Some(DEFAULT_COMPACT_THRESHOLD_BYTES),
        }
    }
}

/// Open or create a persistent store at the given directory.
///
/// # Errors
/// - If the directory cannot be created or accessed
/// - If another process holds the lock (`ErrorKind::WouldBlock`)
/// - If WAL replay hits a corrupted record
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use hospitalsim::storage::open_store;
/// use hospitalsim::{AttentionStore, SimulationConfig, SimulationSupervisor};
///
/// let store: Arc<dyn AttentionStore> = Arc::new(open_store("./hospital.db", None)?);
/// let supervisor = SimulationSupervisor::new(store, SimulationConfig::default());
/// # Ok::<(), hospitalsim::StorageError>(())
/// ```
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentStore, StorageError> {
    PersistentStore::open(path.as_ref(), &config.unwrap_or_default())
}
