//! Attention records: one simulated patient visit.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{MAX_SERVICE_MINUTES, MIN_SERVICE_MINUTES};
use crate::doctor::DoctorId;
use crate::error::ValidationError;

/// Store-assigned attention identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttentionId(u64);

impl AttentionId {
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

impl fmt::Display for AttentionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted patient visit.
///
/// Created by exactly one doctor worker and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attention {
    pub id: AttentionId,
    pub doctor_id: DoctorId,
    /// Service duration in whole minutes.
    pub minutes: u32,
    pub attended_at: DateTime<Utc>,
}

/// An attention that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttention {
    pub doctor_id: DoctorId,
    pub minutes: u32,
    pub attended_at: DateTime<Utc>,
}

impl NewAttention {
    /// Creates an attention for `doctor_id` stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MinutesOutOfRange` if `minutes` is outside
    /// `[MIN_SERVICE_MINUTES, MAX_SERVICE_MINUTES]`.
    pub fn new(doctor_id: DoctorId, minutes: u32) -> Result<Self, ValidationError> {
        Self::at(doctor_id, minutes, Utc::now())
    }

    /// Creates an attention with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Same as [`NewAttention::new`].
    pub fn at(
        doctor_id: DoctorId,
        minutes: u32,
        attended_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let attention = Self {
            doctor_id,
            minutes,
            attended_at,
        };
        attention.validate()?;
        Ok(attention)
    }

    /// Checks the duration against the service-minutes policy.
    ///
    /// Fields are public, so stores call this again before accepting a record.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_SERVICE_MINUTES..=MAX_SERVICE_MINUTES).contains(&self.minutes) {
            return Err(ValidationError::MinutesOutOfRange {
                minutes: self.minutes,
                min: MIN_SERVICE_MINUTES,
                max: MAX_SERVICE_MINUTES,
            });
        }
        Ok(())
    }

    /// Attaches the store-assigned identity.
    #[must_use]
    pub fn with_id(self, id: AttentionId) -> Attention {
        Attention {
            id,
            doctor_id: self.doctor_id,
            minutes: self.minutes,
            attended_at: self.attended_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_attention_within_policy() {
        let a = NewAttention::new(DoctorId::new(1), 1).unwrap();
        assert_eq!(a.minutes, 1);
        let b = NewAttention::new(DoctorId::new(1), 10).unwrap();
        assert!(b.attended_at >= a.attended_at);
    }

    #[test]
    fn test_new_attention_rejects_out_of_policy() {
        let err = NewAttention::new(DoctorId::new(1), 0).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MinutesOutOfRange {
                minutes: 0,
                min: 1,
                max: 10
            }
        );
        assert!(NewAttention::new(DoctorId::new(1), 11).is_err());
    }

    #[test]
    fn test_with_id_preserves_fields() {
        let draft = NewAttention::new(DoctorId::new(3), 4).unwrap();
        let stamped = draft.attended_at;
        let attention = draft.with_id(AttentionId::new(42));
        assert_eq!(attention.id.get(), 42);
        assert_eq!(attention.doctor_id, DoctorId::new(3));
        assert_eq!(attention.minutes, 4);
        assert_eq!(attention.attended_at, stamped);
    }
}
