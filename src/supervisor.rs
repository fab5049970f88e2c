//! Simulation supervisor: seeds doctors, runs one worker per doctor, stops
//! them on deadline or completion, and aggregates the results.
//!
//! A run moves through [`SimulationPhase`]s:
//!
//! ```text
//! Idle -> Seeding -> Running -> Stopping -> Aggregating -> Idle
//! ```
//!
//! The phase goes back to `Idle` on every exit path, including errors.
//! While a run is active, a second run, statistics, and clearing are rejected
//! with [`SimulationError::AlreadyRunning`].

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, select};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::doctor::{Doctor, NewDoctor, Specialty};
use crate::error::{HospitalResult, SimulationError};
use crate::stats::{StatisticsAggregator, StatisticsReport};
use crate::storage::AttentionStore;
use crate::worker::{
    CompletionBarrier, DoctorWorker, ExitReason, StopSignal, WorkerExit, WorkerProgress, WorkerSettings,
};

/// Observable state of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPhase {
    /// Nothing running.
    Idle,
    /// Ensuring doctors exist and clearing the previous run's attentions.
    Seeding,
    /// Workers are attending patients.
    Running,
    /// Stop signalled; waiting for workers to finish their current patient.
    Stopping,
    /// Computing statistics.
    Aggregating,
    /// Clearing attentions outside a run.
    Clearing,
}

/// What ended the running phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every worker reported before the deadline.
    AllWorkersFinished,
    /// The deadline fired first.
    DeadlineElapsed,
}

/// How one worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub doctor: Doctor,
    pub completed: u32,
    pub exit: ExitReason,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub run_id: Uuid,
    pub stop_reason: StopReason,
    /// Wall-clock time from worker start to the end of aggregation.
    pub elapsed: Duration,
    /// One entry per doctor, in doctor id order.
    pub workers: Vec<WorkerSummary>,
    pub statistics: StatisticsReport,
}

impl SimulationReport {
    /// Attentions completed across all workers.
    #[must_use]
    pub fn total_completed(&self) -> u64 {
        self.workers.iter().map(|w| u64::from(w.completed)).sum()
    }
}

struct CrewMember {
    doctor: Doctor,
    progress: Arc<WorkerProgress>,
    handle: JoinHandle<ExitReason>,
}

/// Resets the phase to `Idle` when dropped.
struct PhaseGuard<'a> {
    phase: &'a Mutex<SimulationPhase>,
}

impl PhaseGuard<'_> {
    fn set(&self, next: SimulationPhase) {
        debug!(phase = ?next, "phase change");
        *lock_phase(self.phase) = next;
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *lock_phase(self.phase) = SimulationPhase::Idle;
    }
}

fn lock_phase(phase: &Mutex<SimulationPhase>) -> MutexGuard<'_, SimulationPhase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

type SpawnFn = dyn Fn(DoctorWorker) -> io::Result<JoinHandle<ExitReason>> + Send + Sync;

/// Coordinates simulation runs against a shared store.
pub struct SimulationSupervisor {
    store: Arc<dyn AttentionStore>,
    config: SimulationConfig,
    phase: Mutex<SimulationPhase>,
    spawn: Box<SpawnFn>,
}

impl SimulationSupervisor {
    /// Creates a supervisor. The configuration is validated when a run starts.
    #[must_use]
    pub fn new(store: Arc<dyn AttentionStore>, config: SimulationConfig) -> Self {
        Self {
            store,
            config,
            phase: Mutex::new(SimulationPhase::Idle),
            spawn: Box::new(DoctorWorker::spawn),
        }
    }

    /// Replaces how worker threads are started.
    #[cfg(test)]
    fn with_spawn(
        mut self,
        spawn: impl Fn(DoctorWorker) -> io::Result<JoinHandle<ExitReason>> + Send + Sync + 'static,
    ) -> Self {
        self.spawn = Box::new(spawn);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn AttentionStore> {
        &self.store
    }

    #[must_use]
    pub fn phase(&self) -> SimulationPhase {
        *lock_phase(&self.phase)
    }

    /// Runs one simulation with the supervisor's configuration.
    ///
    /// # Errors
    /// - `Config` if the configuration is invalid; nothing is touched.
    /// - `Simulation(AlreadyRunning)` if this supervisor is busy.
    /// - `Simulation(Seeding | DoctorListing | Reset)` if the store cannot be
    ///   prepared; no worker is started.
    /// - `Simulation(WorkerSpawn)` if a worker thread cannot be started; the
    ///   workers already running are stopped and joined first.
    /// - `Storage` if the doctor list cannot be read for statistics.
    pub fn run_simulation(&self) -> HospitalResult<SimulationReport> {
        self.run(self.config.clone())
    }

    /// Runs one simulation with the deadline and quota overridden.
    ///
    /// # Errors
    /// Same as [`SimulationSupervisor::run_simulation`].
    pub fn run_simulation_with(
        &self,
        max_duration_minutes: u64,
        max_attentions_per_doctor: u32,
    ) -> HospitalResult<SimulationReport> {
        self.run(
            self.config
                .clone()
                .with_max_duration_minutes(max_duration_minutes)
                .with_quota(max_attentions_per_doctor),
        )
    }

    /// Computes statistics over the current store contents.
    ///
    /// # Errors
    /// Fails with `AlreadyRunning` during a run, or if doctors cannot be listed.
    pub fn compute_statistics(&self) -> HospitalResult<StatisticsReport> {
        let _phase = self.enter(SimulationPhase::Aggregating)?;
        StatisticsAggregator::new(&*self.store).compute()
    }

    /// Removes every attention, returning how many were removed.
    ///
    /// # Errors
    /// Fails with `AlreadyRunning` during a run, or if the store fails.
    pub fn clear_attentions(&self) -> HospitalResult<usize> {
        let _phase = self.enter(SimulationPhase::Clearing)?;
        let cleared = self.store.clear_attentions()?;
        info!(cleared, "cleared attentions");
        Ok(cleared)
    }

    fn enter(&self, next: SimulationPhase) -> Result<PhaseGuard<'_>, SimulationError> {
        let mut phase = lock_phase(&self.phase);
        if *phase != SimulationPhase::Idle {
            return Err(SimulationError::AlreadyRunning);
        }
        *phase = next;
        Ok(PhaseGuard { phase: &self.phase })
    }

    fn run(&self, config: SimulationConfig) -> HospitalResult<SimulationReport> {
        let config = config.validate()?;
        let phase = self.enter(SimulationPhase::Seeding)?;

        let run_id = Uuid::new_v4();
        let span = info_span!("simulation", %run_id);
        let _enter = span.enter();

        let doctors = self.prepare_roster()?;
        if doctors.is_empty() {
            warn!("no doctors available after seeding");
        }

        phase.set(SimulationPhase::Running);
        info!(
            doctors = doctors.len(),
            quota = config.quota,
            deadline = ?config.max_duration,
            "simulation started"
        );
        let started = Instant::now();
        let stop = Arc::new(StopSignal::new());
        let mut barrier = CompletionBarrier::new();
        let crew = self.spawn_crew(doctors, &WorkerSettings::from(&config), &stop, &mut barrier)?;

        let exits = barrier.receiver();
        let deadline = after(config.max_duration);
        let stop_reason = loop {
            if barrier.is_complete() {
                info!("all doctors completed their attentions");
                break StopReason::AllWorkersFinished;
            }
            select! {
                recv(exits) -> msg => match msg {
                    Ok(exit) => barrier.record(exit),
                    Err(_) => break StopReason::AllWorkersFinished,
                },
                recv(deadline) -> _ => {
                    stop.trigger();
                    info!("time's up, stopping all doctors");
                    break StopReason::DeadlineElapsed;
                }
            }
        };

        phase.set(SimulationPhase::Stopping);
        stop.trigger();
        let remaining = barrier.remaining();
        if remaining > 0 {
            debug!(remaining, "waiting for doctors to finish their current patient");
        }
        barrier.wait_all();
        drop(deadline);
        let workers = join_crew(crew, barrier.exits());

        phase.set(SimulationPhase::Aggregating);
        let statistics = StatisticsAggregator::new(&*self.store).compute()?;
        let elapsed = started.elapsed();

        info!(
            stop_reason = ?stop_reason,
            elapsed = ?elapsed,
            patients = statistics.total_patients(),
            "simulation finished"
        );

        Ok(SimulationReport {
            run_id,
            stop_reason,
            elapsed,
            workers,
            statistics,
        })
    }

    /// Makes sure doctors exist and the previous run's attentions are gone.
    fn prepare_roster(&self) -> Result<Vec<Doctor>, SimulationError> {
        let listed = self
            .store
            .list_doctors()
            .map_err(|source| SimulationError::DoctorListing { source })?;

        let doctors = if listed.is_empty() {
            self.seed_doctors()?;
            self.store
                .list_doctors()
                .map_err(|source| SimulationError::DoctorListing { source })?
        } else {
            listed
        };

        let cleared = self
            .store
            .clear_attentions()
            .map_err(|source| SimulationError::Reset { source })?;
        if cleared > 0 {
            info!(cleared, "cleared attentions from the previous run");
        }
        Ok(doctors)
    }

    fn seed_doctors(&self) -> Result<(), SimulationError> {
        for specialty in Specialty::ALL {
            let id = self
                .store
                .save_doctor(NewDoctor::seeded(specialty))
                .map_err(|source| SimulationError::Seeding { source })?;
            debug!(doctor = %id, %specialty, "seeded doctor");
        }
        info!(doctors = Specialty::ALL.len(), "seeded initial doctors");
        Ok(())
    }

    fn spawn_crew(
        &self,
        doctors: Vec<Doctor>,
        settings: &WorkerSettings,
        stop: &Arc<StopSignal>,
        barrier: &mut CompletionBarrier,
    ) -> Result<Vec<CrewMember>, SimulationError> {
        let mut crew = Vec::with_capacity(doctors.len());
        for doctor in doctors {
            let progress = Arc::new(WorkerProgress::new(doctor.id, settings.quota));
            let worker = DoctorWorker::new(
                doctor.clone(),
                Arc::clone(&self.store),
                settings.clone(),
                Arc::clone(stop),
                barrier.slot(Arc::clone(&progress)),
            );

            match (self.spawn)(worker) {
                Ok(handle) => crew.push(CrewMember {
                    doctor,
                    progress,
                    handle,
                }),
                Err(e) => {
                    // The unspawned worker's slot reports `NotStarted` as it drops.
                    error!(doctor = %doctor.id, error = %e, "failed to spawn worker; stopping the run");
                    stop.trigger();
                    barrier.wait_all();
                    join_crew(crew, barrier.exits());
                    return Err(SimulationError::WorkerSpawn {
                        doctor: doctor.id,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(crew)
    }
}

fn join_crew(crew: Vec<CrewMember>, exits: &[WorkerExit]) -> Vec<WorkerSummary> {
    crew.into_iter()
        .map(|member| {
            let joined = member.handle.join();
            if joined.is_err() {
                error!(doctor = %member.doctor.id, "worker thread panicked");
            }
            let exit = exits
                .iter()
                .find(|e| e.doctor_id == member.doctor.id)
                .map(|e| e.reason)
                .or_else(|| joined.ok())
                .unwrap_or(ExitReason::Panicked);

            WorkerSummary {
                completed: member.progress.completed(),
                exit,
                doctor: member.doctor,
            }
        })
        .collect()
}
