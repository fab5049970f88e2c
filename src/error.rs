//! Error types for hospitalsim.
//!
//! All errors are strongly typed using thiserror. Store failures keep their
//! own enum (`StorageError`) so call sites can decide whether a failure is
//! recoverable (a worker's write) or fatal (seeding at startup).

use thiserror::Error;

use crate::doctor::DoctorId;
use crate::storage::StorageError;

/// Validation errors for individual records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Attention duration {minutes} is out of range [{min}, {max}] minutes")]
    MinutesOutOfRange {
        minutes: u32,
        min: u32,
        max: u32,
    },

    #[error("Doctor name cannot be empty")]
    EmptyDoctorName,
}

/// Configuration errors, rejected before any worker starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Per-doctor quota must be positive")]
    NonPositiveQuota,

    #[error("Simulation deadline must be positive")]
    NonPositiveDeadline,

    #[error("Invalid service duration range: min ({min}) must not exceed max ({max})")]
    InvalidServiceRange {
        min: u32,
        max: u32,
    },

    #[error("Service duration range [{min}, {max}] falls outside the allowed [{policy_min}, {policy_max}] minutes")]
    ServiceRangeOutOfPolicy {
        min: u32,
        max: u32,
        policy_min: u32,
        policy_max: u32,
    },

    #[error("Invalid delay range: min ({min}ms) must not exceed max ({max}ms)")]
    InvalidDelayRange {
        min: u64,
        max: u64,
    },
}

/// Errors raised by the simulation supervisor itself.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("A simulation is already running on this supervisor")]
    AlreadyRunning,

    #[error("Failed to seed initial doctors: {source}")]
    Seeding {
        #[source]
        source: StorageError,
    },

    #[error("Failed to list doctors: {source}")]
    DoctorListing {
        #[source]
        source: StorageError,
    },

    #[error("Failed to clear attentions from the previous run: {source}")]
    Reset {
        #[source]
        source: StorageError,
    },

    #[error("Failed to start worker for doctor {doctor}: {message}")]
    WorkerSpawn {
        doctor: DoctorId,
        message: String,
    },
}

/// Top-level error type for hospitalsim.
#[derive(Debug, Error)]
pub enum HospitalError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),
}

/// Result type alias for hospitalsim operations.
pub type HospitalResult<T> = Result<T, HospitalError>;
