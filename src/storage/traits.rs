//! Abstract storage trait for hospitalsim.
//!
//! The simulation core only ever talks to an `AttentionStore`. Backends:
//! - In-memory, for tests and throwaway runs
//! - Persistent (WAL-backed), for data that survives restarts

use thiserror::Error;

use crate::attention::{Attention, AttentionId, NewAttention};
use crate::doctor::{Doctor, DoctorId, NewDoctor};
use crate::error::ValidationError;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Doctor not found.
    #[error("Doctor not found: {0}")]
    DoctorNotFound(DoctorId),

    /// Attention not found.
    #[error("Attention not found: {0}")]
    AttentionNotFound(AttentionId),

    /// Record rejected by validation.
    #[error("Invalid record: {0}")]
    Invalid(#[from] ValidationError),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence boundary for doctors and their attentions.
///
/// # Concurrency
/// Every doctor worker calls `save_attention` from its own thread. Implementations
/// must make concurrent writes safe; the simulation does not serialize them.
///
/// # Ordering
/// Identifiers are assigned in ascending order and listings return records
/// sorted by identifier.
pub trait AttentionStore: Send + Sync {
    /// Persist a new doctor and return its assigned identifier.
    fn save_doctor(&self, doctor: NewDoctor) -> Result<DoctorId, StorageError>;

    /// Get a doctor by ID.
    fn find_doctor(&self, id: DoctorId) -> Result<Option<Doctor>, StorageError>;

    /// List all doctors.
    fn list_doctors(&self) -> Result<Vec<Doctor>, StorageError>;

    /// Delete a doctor together with all of its attentions.
    ///
    /// Returns `DoctorNotFound` if the doctor does not exist.
    fn delete_doctor(&self, id: DoctorId) -> Result<(), StorageError>;

    /// Persist a new attention and return its assigned identifier.
    ///
    /// Returns `DoctorNotFound` if the referenced doctor does not exist.
    fn save_attention(&self, attention: NewAttention) -> Result<AttentionId, StorageError>;

    /// Get an attention by ID.
    fn find_attention(&self, id: AttentionId) -> Result<Option<Attention>, StorageError>;

    /// List all attentions.
    fn list_attentions(&self) -> Result<Vec<Attention>, StorageError>;

    /// List the attentions recorded by one doctor.
    fn list_attentions_for_doctor(&self, doctor: DoctorId) -> Result<Vec<Attention>, StorageError>;

    /// Delete a single attention.
    fn delete_attention(&self, id: AttentionId) -> Result<(), StorageError>;

    /// Delete every attention. Idempotent; returns how many were removed.
    fn clear_attentions(&self) -> Result<usize, StorageError>;

    /// Count stored attentions.
    fn count_attentions(&self) -> Result<usize, StorageError> {
        Ok(self.list_attentions()?.len())
    }
}
