//! Core domain types for the pillbox system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Recurring schedules and their per-period doses
//! - Medications and prescriptions
//! - Regimens and the concrete dose occurrences they own
//! - Users (patients)

use crate::duration::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type MedicationId = u64;
pub type PrescriptionId = u64;
pub type RegimenId = u64;
pub type DoseId = u64;

// ============================================================================
// Schedule Types
// ============================================================================

/// One dose within a repeating period
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduledDose {
    pub offset_into_period: Duration,
    pub amount: f64,
    pub unit: String,
}

/// A repeating dosing pattern.
///
/// Per period the doses restart. No offset may exceed the period.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub period: Duration,
    pub doses: Vec<ScheduledDose>,
}

impl Schedule {
    /// Check the schedule invariants
    ///
    /// A schedule needs a positive period, at least one dose, and every
    /// offset in `0..=period`.
    pub fn validate(&self) -> crate::Result<()> {
        if self.period.is_negative() || self.period.is_zero() {
            return Err(crate::Error::InvalidSchedule(format!(
                "period must be positive, got {}",
                self.period
            )));
        }

        if self.doses.is_empty() {
            return Err(crate::Error::InvalidSchedule(
                "schedule has no doses".into(),
            ));
        }

        for (idx, dose) in self.doses.iter().enumerate() {
            if dose.offset_into_period.is_negative() {
                return Err(crate::Error::InvalidSchedule(format!(
                    "dose {} has negative offset {}",
                    idx, dose.offset_into_period
                )));
            }
            if dose.offset_into_period > self.period {
                return Err(crate::Error::InvalidSchedule(format!(
                    "dose {} offset {} exceeds period {}",
                    idx, dose.offset_into_period, self.period
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Medication and Prescription Types
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    pub id: MedicationId,
    pub name: String,
    pub generic: bool,
    pub brand: String,
}

/// Medication as supplied by a prescribing request (no id yet)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewMedication {
    pub name: String,
    #[serde(default)]
    pub generic: bool,
    #[serde(default)]
    pub brand: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: PrescriptionId,
    pub medication: Medication,
    pub schedule: Schedule,
    /// Doses dispensed per refill cycle
    pub dose_count: u32,
    /// Additional refills; total cycles are `refill_count + 1`
    pub refill_count: u32,
    pub schedule_start: Option<DateTime<Utc>>,
}

/// Prescribing request payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewPrescription {
    pub medication: NewMedication,
    pub schedule: Schedule,
    pub dose_count: u32,
    #[serde(default)]
    pub refill_count: u32,
    #[serde(default)]
    pub schedule_start: Option<DateTime<Utc>>,
}

// ============================================================================
// Regimen and Dose Types
// ============================================================================

/// The per-patient execution record of a prescription
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Regimen {
    pub id: RegimenId,
    pub medication_id: MedicationId,
    pub patient_id: UserId,
    pub prescription_id: PrescriptionId,
    pub doses: Vec<Dose>,
}

/// One concrete scheduled administration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Dose {
    pub id: DoseId,
    pub regimen_id: RegimenId,
    pub refill: u32,
    pub time: DateTime<Utc>,
    pub amount: f64,
    pub unit: String,
    pub taken: Option<bool>,
    pub time_taken: Option<DateTime<Utc>>,
}

/// Observable state of a dose.
///
/// `taken` alone is three-valued: unset means nobody addressed the dose yet,
/// `false` means it was explicitly skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoseState {
    Pending,
    Taken { at: Option<DateTime<Utc>> },
    Skipped { at: Option<DateTime<Utc>> },
}

impl Dose {
    pub fn state(&self) -> DoseState {
        match self.taken {
            None => DoseState::Pending,
            Some(true) => DoseState::Taken {
                at: self.time_taken,
            },
            Some(false) => DoseState::Skipped {
                at: self.time_taken,
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        self.taken.is_none()
    }
}

impl DoseState {
    pub fn label(&self) -> &'static str {
        match self {
            DoseState::Pending => "pending",
            DoseState::Taken { .. } => "taken",
            DoseState::Skipped { .. } => "skipped",
        }
    }
}

/// A regimen's doses joined with its medication, as returned by queries
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegimenDoses {
    pub regimen_id: RegimenId,
    pub prescription_id: PrescriptionId,
    pub patient_id: UserId,
    pub medication: Medication,
    pub doses: Vec<Dose>,
}

// ============================================================================
// User Types
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(period: Duration, offsets: &[Duration]) -> Schedule {
        Schedule {
            period,
            doses: offsets
                .iter()
                .map(|o| ScheduledDose {
                    offset_into_period: *o,
                    amount: 1.0,
                    unit: "mg".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_valid_schedule() {
        let s = schedule(Duration::hours(24), &[Duration::ZERO, Duration::hours(24)]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_offset_beyond_period_rejected() {
        let s = schedule(Duration::hours(12), &[Duration::hours(13)]);
        assert!(matches!(
            s.validate(),
            Err(crate::Error::InvalidSchedule(_))
        ));
    }

    #[test]
    fn test_empty_and_zero_period_rejected() {
        assert!(schedule(Duration::hours(24), &[]).validate().is_err());
        assert!(schedule(Duration::ZERO, &[Duration::ZERO]).validate().is_err());
        assert!(schedule(Duration::hours(24), &[Duration::hours(-1)])
            .validate()
            .is_err());
    }

    #[test]
    fn test_dose_states() {
        let mut dose = Dose {
            id: 1,
            regimen_id: 1,
            refill: 0,
            time: Utc::now(),
            amount: 5.0,
            unit: "mg".into(),
            taken: None,
            time_taken: None,
        };
        assert_eq!(dose.state(), DoseState::Pending);

        let at = Utc::now();
        dose.taken = Some(false);
        dose.time_taken = Some(at);
        assert_eq!(dose.state(), DoseState::Skipped { at: Some(at) });
        assert!(!dose.is_pending());
        assert_eq!(dose.state().label(), "skipped");
    }

    #[test]
    fn test_new_prescription_defaults() {
        let json = r#"{
            "medication": {"name": "Amoxicillin"},
            "schedule": {"period": "8h", "doses": [{"offset_into_period": "0s", "amount": 500, "unit": "mg"}]},
            "dose_count": 21
        }"#;
        let rx: NewPrescription = serde_json::from_str(json).unwrap();
        assert_eq!(rx.refill_count, 0);
        assert!(rx.schedule_start.is_none());
        assert!(!rx.medication.generic);
        assert_eq!(rx.schedule.period, Duration::hours(8));
    }
}
