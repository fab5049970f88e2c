//! Doctor workers and the primitives that coordinate them.
//!
//! Each doctor runs on its own thread and loops: attend a patient, persist
//! the attention, pause. Three shared pieces tie the workers to the supervisor:
//!
//! - [`StopSignal`]: cooperative stop flag. Setting it also wakes every worker
//!   that is sleeping between patients.
//! - [`CompletionBarrier`]: countdown the supervisor waits on. Each worker owns
//!   a [`CompletionGuard`] that reports to the barrier exactly once when dropped,
//!   so the barrier is satisfied even if a worker panics.
//! - [`WorkerProgress`]: per-worker attention counter, written only by its worker.
//!
//! A worker checks the stop flag at the top of every iteration and never starts
//! a write after observing it. Its completion report is sent only after the
//! iteration in flight, including its write, has finished.

use std::io;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, info_span, warn};

use crate::attention::NewAttention;
use crate::config::SimulationConfig;
use crate::doctor::{Doctor, DoctorId};
use crate::storage::AttentionStore;

/// Cooperative, idempotent stop flag with wake-up for sleeping workers.
///
/// Sleepers block on a channel that never carries a message; triggering the
/// signal drops the only sender, which disconnects the channel and releases
/// every sleeper at once.
#[derive(Debug)]
pub struct StopSignal {
    stopped: AtomicBool,
    wake_tx: Mutex<Option<Sender<()>>>,
    wake_rx: Receiver<()>,
}

/// How a [`StopSignal::sleep`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration passed.
    Elapsed,
    /// The stop signal fired first.
    Interrupted,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            stopped: AtomicBool::new(false),
            wake_tx: Mutex::new(Some(tx)),
            wake_rx: rx,
        }
    }

    /// Sets the flag and wakes all sleepers.
    ///
    /// Returns true only for the call that actually flipped the flag.
    pub fn trigger(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::AcqRel);
        self.wake_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        first
    }

    /// Returns true once the signal has been triggered.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` unless the signal fires first.
    pub fn sleep(&self, duration: Duration) -> SleepOutcome {
        if self.is_set() {
            return SleepOutcome::Interrupted;
        }
        match self.wake_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => SleepOutcome::Elapsed,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => SleepOutcome::Interrupted,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Attentions completed by one worker.
///
/// Only the owning worker increments the counter. Other threads may read it
/// at any time, but the value is final only after the worker has reported to
/// the completion barrier.
#[derive(Debug)]
pub struct WorkerProgress {
    doctor_id: DoctorId,
    quota: u32,
    completed: AtomicU32,
}

impl WorkerProgress {
    #[must_use]
    pub fn new(doctor_id: DoctorId, quota: u32) -> Self {
        Self {
            doctor_id,
            quota,
            completed: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn doctor_id(&self) -> DoctorId {
        self.doctor_id
    }

    #[must_use]
    pub fn quota(&self) -> u32 {
        self.quota
    }

    /// Attentions persisted so far.
    #[must_use]
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn quota_reached(&self) -> bool {
        self.completed() >= self.quota
    }

    /// Records one persisted attention and returns the new count.
    fn record_attention(&self) -> u32 {
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The worker reached its quota.
    QuotaReached,
    /// The stop flag was observed at the top of an iteration.
    Stopped,
    /// The stop signal cut a sleep short.
    Interrupted,
    /// The worker thread panicked.
    Panicked,
    /// The worker was dropped before its loop ran (e.g. the thread failed to spawn).
    NotStarted,
}

/// A worker's report to the completion barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub doctor_id: DoctorId,
    pub completed: u32,
    pub reason: ExitReason,
}

/// Countdown gate satisfied once every issued [`CompletionGuard`] has reported.
#[derive(Debug)]
pub struct CompletionBarrier {
    tx: Sender<WorkerExit>,
    rx: Receiver<WorkerExit>,
    issued: usize,
    exits: Vec<WorkerExit>,
}

impl CompletionBarrier {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            issued: 0,
            exits: Vec::new(),
        }
    }

    /// Issues a slot for one worker. The barrier is not complete until the
    /// returned guard has been dropped.
    #[must_use]
    pub fn slot(&mut self, progress: Arc<WorkerProgress>) -> CompletionGuard {
        self.issued += 1;
        CompletionGuard {
            tx: self.tx.clone(),
            progress,
            reason: ExitReason::NotStarted,
        }
    }

    /// Channel the reports arrive on, for use in `select!`.
    #[must_use]
    pub fn receiver(&self) -> Receiver<WorkerExit> {
        self.rx.clone()
    }

    /// Counts a report received through [`CompletionBarrier::receiver`].
    pub fn record(&mut self, exit: WorkerExit) {
        debug!(doctor = %exit.doctor_id, completed = exit.completed, reason = ?exit.reason, "worker reported");
        self.exits.push(exit);
    }

    /// Slots that have not reported yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.issued.saturating_sub(self.exits.len())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Blocks until every issued slot has reported, then returns all reports
    /// in arrival order.
    pub fn wait_all(&mut self) -> &[WorkerExit] {
        while !self.is_complete() {
            // The barrier holds a sender itself, so the channel cannot disconnect.
            let Ok(exit) = self.rx.recv() else { break };
            self.record(exit);
        }
        &self.exits
    }

    /// Reports received so far.
    #[must_use]
    pub fn exits(&self) -> &[WorkerExit] {
        &self.exits
    }
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// One worker's slot in a [`CompletionBarrier`]. Reports exactly once, on drop.
#[derive(Debug)]
pub struct CompletionGuard {
    tx: Sender<WorkerExit>,
    progress: Arc<WorkerProgress>,
    reason: ExitReason,
}

impl CompletionGuard {
    /// Sets the reason reported on drop.
    pub fn set_reason(&mut self, reason: ExitReason) {
        self.reason = reason;
    }

    #[must_use]
    pub fn progress(&self) -> &Arc<WorkerProgress> {
        &self.progress
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let reason = if thread::panicking() {
            ExitReason::Panicked
        } else {
            self.reason
        };
        // The barrier may already be gone if the supervisor itself bailed out.
        let _ = self.tx.send(WorkerExit {
            doctor_id: self.progress.doctor_id(),
            completed: self.progress.completed(),
            reason,
        });
    }
}

/// Per-worker knobs, taken from the validated [`SimulationConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub quota: u32,
    pub service_minutes: RangeInclusive<u32>,
    pub delay_ms: RangeInclusive<u64>,
}

impl From<&SimulationConfig> for WorkerSettings {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            quota: config.quota,
            service_minutes: config.service_minutes.clone(),
            delay_ms: config.delay_ms.clone(),
        }
    }
}

/// One doctor's unit of work.
pub struct DoctorWorker {
    doctor: Doctor,
    store: Arc<dyn AttentionStore>,
    settings: WorkerSettings,
    stop: Arc<StopSignal>,
    guard: CompletionGuard,
    rng: SmallRng,
}

impl DoctorWorker {
    /// Builds a worker reporting to `guard`. The guard's progress counter
    /// becomes the worker's counter.
    #[must_use]
    pub fn new(
        doctor: Doctor,
        store: Arc<dyn AttentionStore>,
        settings: WorkerSettings,
        stop: Arc<StopSignal>,
        guard: CompletionGuard,
    ) -> Self {
        Self {
            doctor,
            store,
            settings,
            stop,
            guard,
            rng: SmallRng::from_entropy(),
        }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<WorkerProgress> {
        Arc::clone(self.guard.progress())
    }

    /// Runs the worker on a named thread.
    pub fn spawn(self) -> io::Result<JoinHandle<ExitReason>> {
        thread::Builder::new()
            .name(format!("doctor-{}", self.doctor.id))
            .spawn(move || self.run())
    }

    /// Runs the attend/persist/pause loop on the current thread until the
    /// quota is reached or the stop signal is observed.
    pub fn run(mut self) -> ExitReason {
        let span = info_span!("doctor", id = %self.doctor.id, name = %self.doctor.name);
        let _enter = span.enter();

        let progress = self.progress();
        let reason = loop {
            if self.stop.is_set() {
                break ExitReason::Stopped;
            }
            if progress.quota_reached() {
                break ExitReason::QuotaReached;
            }

            self.attend_patient(&progress);

            // No point pausing after the last patient.
            if progress.quota_reached() {
                break ExitReason::QuotaReached;
            }
            let pause = Duration::from_millis(self.rng.gen_range(self.settings.delay_ms.clone()));
            if self.stop.sleep(pause) == SleepOutcome::Interrupted {
                break ExitReason::Interrupted;
            }
        };

        info!(
            completed = progress.completed(),
            quota = progress.quota(),
            reason = ?reason,
            "{} completed {} attentions",
            self.doctor.name,
            progress.completed()
        );
        self.guard.set_reason(reason);
        reason
    }

    fn attend_patient(&mut self, progress: &WorkerProgress) {
        let minutes = self.rng.gen_range(self.settings.service_minutes.clone());
        let attention = match NewAttention::new(self.doctor.id, minutes) {
            Ok(attention) => attention,
            Err(e) => {
                warn!(error = %e, "discarding invalid attention");
                return;
            }
        };

        match self.store.save_attention(attention) {
            Ok(id) => {
                let completed = progress.record_attention();
                info!(
                    attention = %id,
                    completed,
                    quota = progress.quota(),
                    minutes,
                    "{} attended patient {}/{} ({} min)",
                    self.doctor.name,
                    completed,
                    progress.quota(),
                    minutes
                );
            }
            Err(e) => {
                warn!(error = %e, "failed to save attention; skipping this patient");
            }
        }
    }
}
