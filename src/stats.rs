//! Per-doctor statistics over stored attentions.

use std::fmt;

use tracing::warn;

use crate::attention::Attention;
use crate::doctor::{Doctor, DoctorId};
use crate::error::HospitalResult;
use crate::storage::AttentionStore;

/// Summary of one doctor's attentions.
#[derive(Debug, Clone, PartialEq)]
pub struct DoctorStatistics {
    pub doctor: Doctor,
    /// Number of attentions (patients attended).
    pub patients: usize,
    /// Sum of attention minutes.
    pub total_minutes: u64,
    /// `total_minutes / patients`, or `0.0` when there are no patients.
    pub average_minutes: f64,
}

impl DoctorStatistics {
    /// Summarizes `attentions`, all of which are assumed to belong to `doctor`.
    #[must_use]
    pub fn from_attentions(doctor: Doctor, attentions: &[Attention]) -> Self {
        let patients = attentions.len();
        let total_minutes: u64 = attentions.iter().map(|a| u64::from(a.minutes)).sum();
        #[allow(clippy::cast_precision_loss)]
        let average_minutes = if patients == 0 {
            0.0
        } else {
            total_minutes as f64 / patients as f64
        };

        Self {
            doctor,
            patients,
            total_minutes,
            average_minutes,
        }
    }
}

/// Statistics for every doctor, in ascending doctor id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsReport {
    pub doctors: Vec<DoctorStatistics>,
    /// Doctors whose attentions could not be read.
    pub skipped: Vec<DoctorId>,
}

impl StatisticsReport {
    #[must_use]
    pub fn for_doctor(&self, id: DoctorId) -> Option<&DoctorStatistics> {
        self.doctors.iter().find(|s| s.doctor.id == id)
    }

    /// Patients attended across all doctors.
    #[must_use]
    pub fn total_patients(&self) -> usize {
        self.doctors.iter().map(|s| s.patients).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doctors.is_empty()
    }
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== FINAL STATISTICS ===")?;
        if self.doctors.is_empty() {
            writeln!(f)?;
            writeln!(f, "No doctors registered.")?;
        }
        for stats in &self.doctors {
            writeln!(f)?;
            writeln!(f, "{} ({}):", stats.doctor.name, stats.doctor.specialty)?;
            writeln!(f, "- Patients attended: {}", stats.patients)?;
            writeln!(f, "- Total attention time: {} minutes", stats.total_minutes)?;
            writeln!(f, "- Average time per patient: {:.2} minutes", stats.average_minutes)?;
        }
        for id in &self.skipped {
            writeln!(f)?;
            writeln!(f, "Doctor {id}: statistics unavailable")?;
        }
        Ok(())
    }
}

/// Reads the store and builds a [`StatisticsReport`].
///
/// Only meaningful once no worker is writing; the supervisor calls it after
/// every worker has reported to the completion barrier.
pub struct StatisticsAggregator<'a> {
    store: &'a dyn AttentionStore,
}

impl<'a> StatisticsAggregator<'a> {
    #[must_use]
    pub fn new(store: &'a dyn AttentionStore) -> Self {
        Self { store }
    }

    /// Computes statistics for every stored doctor.
    ///
    /// # Errors
    /// Fails if the doctor list cannot be read. A doctor whose attentions
    /// cannot be read is logged and listed in [`StatisticsReport::skipped`].
    pub fn compute(&self) -> HospitalResult<StatisticsReport> {
        let mut report = StatisticsReport::default();
        for doctor in self.store.list_doctors()? {
            match self.store.list_attentions_for_doctor(doctor.id) {
                Ok(attentions) => report
                    .doctors
                    .push(DoctorStatistics::from_attentions(doctor, &attentions)),
                Err(e) => {
                    warn!(doctor = %doctor.id, error = %e, "skipping doctor in statistics");
                    report.skipped.push(doctor.id);
                }
            }
        }
        Ok(report)
    }
}
