use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hospitalsim::{
    Attention, AttentionId, AttentionStore, Doctor, DoctorId, ExitReason, HospitalError, InMemoryStore,
    NewAttention, NewDoctor, SimulationConfig, SimulationError, SimulationPhase, SimulationSupervisor,
    Specialty, StopReason, StorageError,
};

/// In-memory store with switchable failures.
#[derive(Default)]
struct ScriptedStore {
    inner: InMemoryStore,
    fail_seeding: AtomicBool,
    fail_clear: AtomicBool,
    /// Attention writes for this doctor id always fail (0 = none).
    failing_doctor: AtomicUsize,
    attention_attempts: AtomicUsize,
}

impl ScriptedStore {
    fn failing_for(&self, doctor: DoctorId) {
        self.failing_doctor
            .store(usize::try_from(doctor.get()).unwrap(), Ordering::SeqCst);
    }
}

impl AttentionStore for ScriptedStore {
    fn save_doctor(&self, doctor: NewDoctor) -> Result<DoctorId, StorageError> {
        if self.fail_seeding.load(Ordering::SeqCst) {
            return Err(StorageError::BackendError("doctor table unavailable".to_string()));
        }
        self.inner.save_doctor(doctor)
    }

    fn find_doctor(&self, id: DoctorId) -> Result<Option<Doctor>, StorageError> {
        self.inner.find_doctor(id)
    }

    fn list_doctors(&self) -> Result<Vec<Doctor>, StorageError> {
        self.inner.list_doctors()
    }

    fn delete_doctor(&self, id: DoctorId) -> Result<(), StorageError> {
        self.inner.delete_doctor(id)
    }

    fn save_attention(&self, attention: NewAttention) -> Result<AttentionId, StorageError> {
        self.attention_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_doctor.load(Ordering::SeqCst);
        if failing != 0 && attention.doctor_id.get() == failing as u64 {
            return Err(StorageError::BackendError("disk full".to_string()));
        }
        self.inner.save_attention(attention)
    }

    fn find_attention(&self, id: AttentionId) -> Result<Option<Attention>, StorageError> {
        self.inner.find_attention(id)
    }

    fn list_attentions(&self) -> Result<Vec<Attention>, StorageError> {
        self.inner.list_attentions()
    }

    fn list_attentions_for_doctor(&self, doctor: DoctorId) -> Result<Vec<Attention>, StorageError> {
        self.inner.list_attentions_for_doctor(doctor)
    }

    fn delete_attention(&self, id: AttentionId) -> Result<(), StorageError> {
        self.inner.delete_attention(id)
    }

    fn clear_attentions(&self) -> Result<usize, StorageError> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(StorageError::BackendError("truncate failed".to_string()));
        }
        self.inner.clear_attentions()
    }
}

fn fast_config(quota: u32) -> SimulationConfig {
    SimulationConfig::default()
        .with_max_duration(Duration::from_secs(30))
        .with_quota(quota)
        .with_delay_ms(1..=5)
}

#[test]
fn quota_bounds_every_doctor() {
    let store = Arc::new(InMemoryStore::new());
    let sup = SimulationSupervisor::new(store.clone(), fast_config(4));

    let report = sup.run_simulation().unwrap();

    assert_eq!(report.stop_reason, StopReason::AllWorkersFinished);
    assert_eq!(report.workers.len(), Specialty::ALL.len());
    for worker in &report.workers {
        assert_eq!(worker.completed, 4);
        assert_eq!(worker.exit, ExitReason::QuotaReached);
        let stored = store.list_attentions_for_doctor(worker.doctor.id).unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|a| (1..=10).contains(&a.minutes)));
    }
    assert_eq!(store.count_attentions().unwrap(), 4 * Specialty::ALL.len());
}

#[test]
fn deadline_stops_workers_promptly_and_for_good() {
    let store = Arc::new(InMemoryStore::new());
    let config = SimulationConfig::default()
        .with_max_duration(Duration::from_millis(300))
        .with_quota(10_000)
        .with_delay_ms(40..=60);
    let sup = SimulationSupervisor::new(store.clone(), config);

    let started = Instant::now();
    let report = sup.run_simulation().unwrap();
    let took = started.elapsed();

    assert_eq!(report.stop_reason, StopReason::DeadlineElapsed);
    assert!(took < Duration::from_secs(5), "run took {took:?}");
    assert!(report
        .workers
        .iter()
        .all(|w| w.completed < 10_000 && w.exit != ExitReason::QuotaReached));

    // No worker writes after the run has returned.
    let count = store.count_attentions().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(store.count_attentions().unwrap(), count);
    assert_eq!(report.total_completed() as usize, count);
}

#[test]
fn stored_counts_match_worker_progress() {
    let store = Arc::new(InMemoryStore::new());
    let config = SimulationConfig::default()
        .with_max_duration(Duration::from_millis(250))
        .with_quota(10_000)
        .with_delay_ms(5..=15);
    let sup = SimulationSupervisor::new(store.clone(), config);

    let report = sup.run_simulation().unwrap();
    for worker in &report.workers {
        let stored = store.list_attentions_for_doctor(worker.doctor.id).unwrap().len();
        assert_eq!(stored, worker.completed as usize, "doctor {}", worker.doctor.name);
        let stats = report.statistics.for_doctor(worker.doctor.id).unwrap();
        assert_eq!(stats.patients, stored);
    }
}

#[test]
fn failing_doctor_does_not_hold_back_the_others() {
    let store = Arc::new(ScriptedStore::default());
    let doctors: Vec<_> = Specialty::ALL
        .iter()
        .map(|s| store.inner.save_doctor(NewDoctor::seeded(*s)).unwrap())
        .collect();
    let unlucky = doctors[2];
    store.failing_for(unlucky);

    let config = SimulationConfig::default()
        .with_max_duration(Duration::from_millis(800))
        .with_quota(3)
        .with_delay_ms(1..=5);
    let sup = SimulationSupervisor::new(store.clone(), config);
    let report = sup.run_simulation().unwrap();

    // The unlucky doctor keeps trying until the deadline, so the run ends there.
    assert_eq!(report.stop_reason, StopReason::DeadlineElapsed);
    for worker in &report.workers {
        if worker.doctor.id == unlucky {
            assert_eq!(worker.completed, 0);
        } else {
            assert_eq!(worker.completed, 3);
            assert_eq!(worker.exit, ExitReason::QuotaReached);
        }
    }
    assert!(store.attention_attempts.load(Ordering::SeqCst) > 15);

    let stats = report.statistics.for_doctor(unlucky).unwrap();
    assert_eq!(stats.patients, 0);
    assert!(stats.average_minutes.abs() < f64::EPSILON);
}

#[test]
fn clearing_twice_is_harmless() {
    let store = Arc::new(InMemoryStore::new());
    let sup = SimulationSupervisor::new(store.clone(), fast_config(2));
    sup.run_simulation().unwrap();

    assert_eq!(sup.clear_attentions().unwrap(), 2 * Specialty::ALL.len());
    assert_eq!(sup.clear_attentions().unwrap(), 0);
    assert_eq!(store.count_attentions().unwrap(), 0);
    assert_eq!(store.list_doctors().unwrap().len(), Specialty::ALL.len());

    let stats = sup.compute_statistics().unwrap();
    assert_eq!(stats.total_patients(), 0);
}

#[test]
fn each_run_starts_from_an_empty_attention_table() {
    let store = Arc::new(InMemoryStore::new());
    let sup = SimulationSupervisor::new(store.clone(), fast_config(3));

    let first = sup.run_simulation().unwrap();
    let second = sup.run_simulation().unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(store.count_attentions().unwrap(), 3 * Specialty::ALL.len());
    assert_eq!(second.statistics.total_patients(), 3 * Specialty::ALL.len());
    assert_eq!(sup.phase(), SimulationPhase::Idle);
}

#[test]
fn seeding_failure_aborts_before_any_work() {
    let store = Arc::new(ScriptedStore::default());
    store.fail_seeding.store(true, Ordering::SeqCst);
    let sup = SimulationSupervisor::new(store.clone(), fast_config(3));

    let err = sup.run_simulation().unwrap_err();
    assert!(matches!(err, HospitalError::Simulation(SimulationError::Seeding { .. })));
    assert_eq!(store.attention_attempts.load(Ordering::SeqCst), 0);
    assert!(store.list_attentions().unwrap().is_empty());
    assert_eq!(sup.phase(), SimulationPhase::Idle);

    store.fail_seeding.store(false, Ordering::SeqCst);
    assert!(sup.run_simulation().is_ok());
}

#[test]
fn reset_failure_aborts_the_run() {
    let store = Arc::new(ScriptedStore::default());
    let sup = SimulationSupervisor::new(store.clone(), fast_config(2));
    sup.run_simulation().unwrap();
    let attempts = store.attention_attempts.load(Ordering::SeqCst);

    store.fail_clear.store(true, Ordering::SeqCst);
    let err = sup.run_simulation().unwrap_err();
    assert!(matches!(err, HospitalError::Simulation(SimulationError::Reset { .. })));
    assert_eq!(store.attention_attempts.load(Ordering::SeqCst), attempts);
    assert_eq!(sup.phase(), SimulationPhase::Idle);
}
