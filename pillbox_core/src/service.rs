//! Service facade over a [`Store`].
//!
//! Every call takes an explicit [`RequestContext`] carrying the request id and
//! the reference time, and runs inside a tracing span named after the call.

use crate::engine::expand;
use crate::remaining::{remaining_doses, RemainingQuery};
use crate::{
    tracker, Config, Dose, DoseId, Error, NewPrescription, Prescription, PrescriptionId, Regimen,
    RegimenDoses, Result, Store, User, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-call metadata passed in by the caller
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Context with a fixed reference time
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            now,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a prescribing request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CreatedPrescription {
    pub prescription: Prescription,
    pub regimen: Regimen,
}

/// The logical calls of the system, backed by an injected store
///
/// `S` is any [`Store`]: an owned backend, or a borrowed `&MemoryStore`.
pub struct PrescriptionService<S: Store> {
    store: S,
    config: Config,
}

impl<S: Store> PrescriptionService<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn register_user(&self, ctx: &RequestContext, name: &str) -> Result<User> {
        let _span = tracing::info_span!("register_user", request_id = %ctx.request_id).entered();

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("user name must not be empty".into()));
        }

        let user = self.store.put_user(name)?;
        tracing::info!("Registered user {} ({})", user.id, user.name);
        Ok(user)
    }

    pub fn get_user(&self, ctx: &RequestContext, id: UserId) -> Result<User> {
        let _span = tracing::info_span!("get_user", request_id = %ctx.request_id, id).entered();
        self.store.get_user(id)
    }

    /// Validate a prescribing request, expand its schedule and store the
    /// prescription, its regimen and every dose as one unit
    ///
    /// A zero period falls back to the configured default period; a missing
    /// start anchors the schedule at `ctx.now`.
    pub fn create_prescription(
        &self,
        ctx: &RequestContext,
        patient: UserId,
        mut rx: NewPrescription,
    ) -> Result<CreatedPrescription> {
        let _span = tracing::info_span!(
            "create_prescription",
            request_id = %ctx.request_id,
            patient
        )
        .entered();

        self.store.get_user(patient)?;

        if rx.medication.name.trim().is_empty() {
            return Err(Error::Validation("medication name must not be empty".into()));
        }
        if rx.schedule.period.is_zero() {
            rx.schedule.period = self.config.schedule.default_period;
        }

        let anchor = rx.schedule_start.unwrap_or(ctx.now);
        let occurrences = expand(&rx.schedule, rx.dose_count, rx.refill_count, anchor)?;

        let (prescription, regimen) =
            self.store
                .create_prescription(patient, &rx, Some(anchor), &occurrences)?;

        tracing::info!(
            "Created prescription {} ({}) for patient {}: {} doses over {} cycles",
            prescription.id,
            prescription.medication.name,
            patient,
            regimen.doses.len(),
            u64::from(prescription.refill_count) + 1
        );

        Ok(CreatedPrescription {
            prescription,
            regimen,
        })
    }

    pub fn get_prescription(&self, ctx: &RequestContext, id: PrescriptionId) -> Result<Prescription> {
        let _span =
            tracing::info_span!("get_prescription", request_id = %ctx.request_id, id).entered();
        self.store.get_prescription(id)
    }

    pub fn list_prescriptions(&self, ctx: &RequestContext) -> Result<Vec<Prescription>> {
        let _span =
            tracing::info_span!("list_prescriptions", request_id = %ctx.request_id).entered();
        self.store.list_prescriptions()
    }

    /// Mark a dose taken or skipped, at `at` or else `ctx.now`
    pub fn mark_dose(
        &self,
        ctx: &RequestContext,
        dose: DoseId,
        taken: bool,
        at: Option<DateTime<Utc>>,
    ) -> Result<Dose> {
        let _span =
            tracing::info_span!("mark_dose", request_id = %ctx.request_id, dose).entered();
        tracker::mark_dose(&self.store, dose, taken, at.unwrap_or(ctx.now))
    }

    /// Pending doses of a patient, earliest first, at most `limit` in total
    pub fn remaining_doses(
        &self,
        ctx: &RequestContext,
        patient: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<RegimenDoses>> {
        let _span = tracing::info_span!(
            "remaining_doses",
            request_id = %ctx.request_id,
            patient
        )
        .entered();

        self.store.get_user(patient)?;

        let query = RemainingQuery {
            limit: limit.unwrap_or(self.config.remaining.default_limit),
            now: ctx.now,
            overdue_grace: self.config.remaining.grace(),
        };
        remaining_doses(&self.store, patient, &query)
    }

    /// Every regimen of a patient with all of its doses, whatever their state
    pub fn patient_regimens(
        &self,
        ctx: &RequestContext,
        patient: UserId,
    ) -> Result<Vec<RegimenDoses>> {
        let _span = tracing::info_span!(
            "patient_regimens",
            request_id = %ctx.request_id,
            patient
        )
        .entered();

        self.store.get_user(patient)?;

        self.store
            .regimens_for_patient(patient)?
            .into_iter()
            .map(|regimen| {
                let medication = self.store.get_prescription(regimen.prescription_id)?.medication;
                Ok(RegimenDoses {
                    regimen_id: regimen.id,
                    prescription_id: regimen.prescription_id,
                    patient_id: regimen.patient_id,
                    medication,
                    doses: regimen.doses,
                })
            })
            .collect()
    }
}
