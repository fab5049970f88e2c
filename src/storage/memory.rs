//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory implementation of
//! `AttentionStore`. It is intended for tests and throwaway runs, and its
//! index doubles as the read side of the persistent backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use crate::attention::{Attention, AttentionId, NewAttention};
use crate::doctor::{Doctor, DoctorId, NewDoctor};
use crate::storage::traits::{AttentionStore, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Doctors, attentions and the per-doctor attention index.
///
/// Identifiers start at 1 and only move forward; deleting a record never
/// frees its identifier for reuse.
#[derive(Debug)]
pub(crate) struct HospitalIndex {
    doctors: BTreeMap<DoctorId, Doctor>,
    attentions: BTreeMap<AttentionId, Attention>,
    by_doctor: HashMap<DoctorId, BTreeSet<AttentionId>>,
    next_doctor: u64,
    next_attention: u64,
}

impl Default for HospitalIndex {
    fn default() -> Self {
        Self {
            doctors: BTreeMap::new(),
            attentions: BTreeMap::new(),
            by_doctor: HashMap::new(),
            next_doctor: 1,
            next_attention: 1,
        }
    }
}

impl HospitalIndex {
    pub(crate) fn next_doctor_id(&self) -> DoctorId {
        DoctorId::new(self.next_doctor)
    }

    pub(crate) fn next_attention_id(&self) -> AttentionId {
        AttentionId::new(self.next_attention)
    }

    /// Moves the id counters forward to at least the given values.
    pub(crate) fn raise_watermark(&mut self, next_doctor: DoctorId, next_attention: AttentionId) {
        self.next_doctor = self.next_doctor.max(next_doctor.get());
        self.next_attention = self.next_attention.max(next_attention.get());
    }

    pub(crate) fn contains_doctor(&self, id: DoctorId) -> bool {
        self.doctors.contains_key(&id)
    }

    pub(crate) fn contains_attention(&self, id: AttentionId) -> bool {
        self.attentions.contains_key(&id)
    }

    /// Inserts a doctor whose identity is already fixed (fresh or replayed).
    pub(crate) fn insert_doctor(&mut self, doctor: Doctor) {
        self.next_doctor = self.next_doctor.max(doctor.id.get() + 1);
        self.by_doctor.entry(doctor.id).or_default();
        self.doctors.insert(doctor.id, doctor);
    }

    /// Removes a doctor and cascades to its attentions.
    pub(crate) fn remove_doctor(&mut self, id: DoctorId) -> Result<Doctor, StorageError> {
        let doctor = self.doctors.remove(&id).ok_or(StorageError::DoctorNotFound(id))?;
        if let Some(ids) = self.by_doctor.remove(&id) {
            for attention_id in ids {
                self.attentions.remove(&attention_id);
            }
        }
        Ok(doctor)
    }

    /// Inserts an attention whose identity is already fixed.
    pub(crate) fn insert_attention(&mut self, attention: Attention) -> Result<(), StorageError> {
        let Some(ids) = self.by_doctor.get_mut(&attention.doctor_id) else {
            return Err(StorageError::DoctorNotFound(attention.doctor_id));
        };
        ids.insert(attention.id);
        self.next_attention = self.next_attention.max(attention.id.get() + 1);
        self.attentions.insert(attention.id, attention);
        Ok(())
    }

    pub(crate) fn remove_attention(&mut self, id: AttentionId) -> Result<Attention, StorageError> {
        let attention = self
            .attentions
            .remove(&id)
            .ok_or(StorageError::AttentionNotFound(id))?;
        if let Some(ids) = self.by_doctor.get_mut(&attention.doctor_id) {
            ids.remove(&id);
        }
        Ok(attention)
    }

    pub(crate) fn clear_attentions(&mut self) -> usize {
        let removed = self.attentions.len();
        self.attentions.clear();
        for ids in self.by_doctor.values_mut() {
            ids.clear();
        }
        removed
    }

    pub(crate) fn doctor(&self, id: DoctorId) -> Option<Doctor> {
        self.doctors.get(&id).cloned()
    }

    pub(crate) fn doctors(&self) -> Vec<Doctor> {
        self.doctors.values().cloned().collect()
    }

    pub(crate) fn attention(&self, id: AttentionId) -> Option<Attention> {
        self.attentions.get(&id).cloned()
    }

    pub(crate) fn attentions(&self) -> Vec<Attention> {
        self.attentions.values().cloned().collect()
    }

    pub(crate) fn attention_count(&self) -> usize {
        self.attentions.len()
    }

    pub(crate) fn attentions_for(&self, doctor: DoctorId) -> Vec<Attention> {
        self.by_doctor
            .get(&doctor)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.attentions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Thread-safe in-memory attention store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<HospitalIndex>,
}

impl InMemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttentionStore for InMemoryStore {
    fn save_doctor(&self, doctor: NewDoctor) -> Result<DoctorId, StorageError> {
        doctor.validate()?;
        let mut state = self.state.write().map_err(|_| lock_err("doctor.save"))?;
        let id = state.next_doctor_id();
        state.insert_doctor(doctor.with_id(id));
        Ok(id)
    }

    fn find_doctor(&self, id: DoctorId) -> Result<Option<Doctor>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("doctor.find"))?;
        Ok(state.doctor(id))
    }

    fn list_doctors(&self) -> Result<Vec<Doctor>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("doctor.list"))?;
        Ok(state.doctors())
    }

    fn delete_doctor(&self, id: DoctorId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("doctor.delete"))?;
        state.remove_doctor(id)?;
        Ok(())
    }

    fn save_attention(&self, attention: NewAttention) -> Result<AttentionId, StorageError> {
        attention.validate()?;
        let mut state = self.state.write().map_err(|_| lock_err("attention.save"))?;
        let id = state.next_attention_id();
        state.insert_attention(attention.with_id(id))?;
        Ok(id)
    }

    fn find_attention(&self, id: AttentionId) -> Result<Option<Attention>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("attention.find"))?;
        Ok(state.attention(id))
    }

    fn list_attentions(&self) -> Result<Vec<Attention>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("attention.list"))?;
        Ok(state.attentions())
    }

    fn list_attentions_for_doctor(&self, doctor: DoctorId) -> Result<Vec<Attention>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("attention.list_for_doctor"))?;
        Ok(state.attentions_for(doctor))
    }

    fn delete_attention(&self, id: AttentionId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("attention.delete"))?;
        state.remove_attention(id)?;
        Ok(())
    }

    fn clear_attentions(&self) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("attention.clear"))?;
        Ok(state.clear_attentions())
    }

    fn count_attentions(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("attention.count"))?;
        Ok(state.attention_count())
    }
}
