//! Doctor records and the fixed specialty roster.
//!
//! Doctors are created by the store (which assigns their identity) and stay
//! immutable for the duration of a simulation run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Store-assigned doctor identifier.
///
/// Identifiers are handed out in ascending order by the store on
/// `save_doctor`, so sorting by id preserves creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoctorId(u64);

impl DoctorId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DoctorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Medical specialty. The set is fixed; seeding creates one doctor per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    /// General practice
    GeneralMedicine,
    /// Heart and circulatory system
    Cardiology,
    /// Children
    Pediatrics,
    /// Injuries and the musculoskeletal system
    Traumatology,
    /// Nervous system
    Neurology,
    /// Skin
    Dermatology,
}

impl Specialty {
    /// Every specialty, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::GeneralMedicine,
        Self::Cardiology,
        Self::Pediatrics,
        Self::Traumatology,
        Self::Neurology,
        Self::Dermatology,
    ];

    /// Lowercase snake_case name, as used in seeded doctor names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GeneralMedicine => "general_medicine",
            Self::Cardiology => "cardiology",
            Self::Pediatrics => "pediatrics",
            Self::Traumatology => "traumatology",
            Self::Neurology => "neurology",
            Self::Dermatology => "dermatology",
        }
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A doctor as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    pub specialty: Specialty,
}

/// A doctor that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDoctor {
    pub name: String,
    pub specialty: Specialty,
}

impl NewDoctor {
    /// Creates a doctor with an explicit display name.
    #[must_use]
    pub fn new(name: impl Into<String>, specialty: Specialty) -> Self {
        Self {
            name: name.into(),
            specialty,
        }
    }

    /// The doctor seeded for `specialty` when the store has no doctors.
    #[must_use]
    pub fn seeded(specialty: Specialty) -> Self {
        Self::new(format!("Dr. {}", specialty.as_str()), specialty)
    }

    /// Rejects blank names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyDoctorName);
        }
        Ok(())
    }

    /// Attaches the store-assigned identity.
    #[must_use]
    pub fn with_id(self, id: DoctorId) -> Doctor {
        Doctor {
            id,
            name: self.name,
            specialty: self.specialty,
        }
    }
}
