//! # hospitalsim - concurrent hospital attention simulation
//!
//! A hospital is staffed by doctors who work independently. Each doctor runs
//! on its own thread and keeps attending patients, persisting one
//! [`Attention`] per visit, until it reaches its quota or a global deadline
//! passes. A [`SimulationSupervisor`] starts the doctors, waits for whichever
//! comes first, stops everyone cooperatively, waits for every doctor to
//! acknowledge, and then aggregates per-doctor statistics.
//!
//! ## Core Concepts
//!
//! - **Doctor**: a worker identity with a [`Specialty`]
//! - **Attention**: one patient visit with a duration in minutes
//! - **AttentionStore**: the storage capability the simulation depends on
//! - **Completion barrier**: the gate the supervisor waits on before reading
//!   statistics
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hospitalsim::{InMemoryStore, SimulationConfig, SimulationSupervisor};
//!
//! let config = SimulationConfig::default()
//!     .with_max_duration(Duration::from_secs(5))
//!     .with_quota(2)
//!     .with_delay_ms(1..=5);
//! let supervisor = SimulationSupervisor::new(Arc::new(InMemoryStore::new()), config);
//!
//! let report = supervisor.run_simulation()?;
//! assert_eq!(report.total_completed(), 12);
//! println!("{}", report.statistics);
//! # Ok::<(), hospitalsim::HospitalError>(())
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod attention;
pub mod config;
pub mod doctor;
pub mod error;

// Storage
pub mod storage;

// Simulation
pub mod stats;
pub mod supervisor;
pub mod worker;

pub use attention::{Attention, AttentionId, NewAttention};
pub use config::SimulationConfig;
pub use doctor::{Doctor, DoctorId, NewDoctor, Specialty};
pub use error::{ConfigError, HospitalError, HospitalResult, SimulationError, ValidationError};
pub use stats::{DoctorStatistics, StatisticsAggregator, StatisticsReport};
pub use storage::{AttentionStore, InMemoryStore, StorageError};
pub use supervisor::{SimulationPhase, SimulationReport, SimulationSupervisor, StopReason, WorkerSummary};
pub use worker::{CompletionBarrier, DoctorWorker, ExitReason, StopSignal, WorkerProgress};

#[cfg(feature = "persistent")]
pub use storage::{open_store, PersistentConfig, PersistentStore};
