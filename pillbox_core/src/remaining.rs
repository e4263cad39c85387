//! Remaining-dose query.
//!
//! Collects a patient's pending doses, drops the ones that are too far
//! overdue, keeps the earliest `limit` of them and groups the survivors by
//! regimen with the regimen's medication attached.

use crate::{Dose, Duration, Error, Medication, Regimen, RegimenDoses, Result, Store, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Parameters of a remaining-dose lookup
#[derive(Clone, Debug)]
pub struct RemainingQuery {
    /// Maximum number of doses returned, counted across all regimens
    pub limit: usize,
    /// Reference time for the overdue window
    pub now: DateTime<Utc>,
    /// Doses older than `now - grace` are dropped; `None` keeps every pending dose
    pub overdue_grace: Option<Duration>,
}

/// Pending doses of a patient, grouped by regimen
///
/// Doses are selected in `(time, id)` order before truncation, so the result
/// is deterministic. Each group is sorted by time and groups are ordered by
/// their earliest dose. A patient without regimens yields an empty list.
pub fn remaining_doses<S: Store + ?Sized>(
    store: &S,
    patient: UserId,
    query: &RemainingQuery,
) -> Result<Vec<RegimenDoses>> {
    if query.limit == 0 {
        return Err(Error::Validation("limit must be at least 1".into()));
    }

    let regimens = store.regimens_for_patient(patient)?;
    if regimens.is_empty() {
        tracing::debug!("Patient {} has no regimens", patient);
        return Ok(Vec::new());
    }

    let mut pending: Vec<&Dose> = regimens
        .iter()
        .flat_map(|r| r.doses.iter())
        .filter(|d| d.is_pending() && within_window(d, query))
        .collect();

    pending.sort_by(|a, b| a.time.cmp(&b.time).then(a.id.cmp(&b.id)));
    pending.truncate(query.limit);

    let by_id: HashMap<_, &Regimen> = regimens.iter().map(|r| (r.id, r)).collect();
    let mut medications: HashMap<_, Medication> = HashMap::new();
    let mut groups: Vec<RegimenDoses> = Vec::new();
    let mut group_index = HashMap::new();

    // `pending` is time-ordered, so groups appear in order of their first dose
    for dose in pending {
        let idx = match group_index.get(&dose.regimen_id).copied() {
            Some(idx) => idx,
            None => {
                let regimen = by_id
                    .get(&dose.regimen_id)
                    .ok_or_else(|| Error::Store(format!("dose {} lost its regimen", dose.id)))?;

                let medication = match medications.get(&regimen.prescription_id) {
                    Some(m) => m.clone(),
                    None => {
                        let m = store.get_prescription(regimen.prescription_id)?.medication;
                        medications.insert(regimen.prescription_id, m.clone());
                        m
                    }
                };

                groups.push(RegimenDoses {
                    regimen_id: regimen.id,
                    prescription_id: regimen.prescription_id,
                    patient_id: regimen.patient_id,
                    medication,
                    doses: Vec::new(),
                });
                group_index.insert(dose.regimen_id, groups.len() - 1);
                groups.len() - 1
            }
        };

        groups[idx].doses.push(dose.clone());
    }

    tracing::debug!(
        "Patient {} has {} remaining doses across {} regimens",
        patient,
        groups.iter().map(|g| g.doses.len()).sum::<usize>(),
        groups.len()
    );

    Ok(groups)
}

fn within_window(dose: &Dose, query: &RemainingQuery) -> bool {
    match query.overdue_grace {
        // A grace reaching past the calendar's end keeps the dose
        Some(grace) => dose
            .time
            .checked_add_signed(grace.to_chrono())
            .map_or(true, |deadline| deadline > query.now),
        None => true,
    }
}
