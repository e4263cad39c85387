//! Schedule expansion engine.
//!
//! Turns an abstract recurring [`Schedule`] into the concrete, time-ordered
//! list of dose occurrences a patient has to follow:
//! - One cycle per refill (`refill_count + 1` cycles in total)
//! - Each cycle walks the schedule until `dose_count` doses were emitted
//! - A period cursor advances by `period` after every pass, full or partial,
//!   and keeps running across refills

use crate::{Error, Result, Schedule, ScheduledDose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on `dose_count * (refill_count + 1)` for a single expansion
///
/// Enough for a dose every hour for more than eleven years.
pub const MAX_DOSES: u64 = 100_000;

/// A materialized dose before the repository assigns ids
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Occurrence {
    pub refill: u32,
    pub time: DateTime<Utc>,
    pub amount: f64,
    pub unit: String,
}

/// Expand a schedule into its dose occurrences
///
/// The occurrence for entry `k` of pass `p` lands at
/// `anchor + period * p + offset[k]`, where `p` counts every pass since the
/// anchor (it is not reset per refill). Entries are walked in offset order,
/// so the output is non-decreasing in time.
///
/// # Errors
/// - [`Error::Validation`] if `dose_count` is zero or the total exceeds
///   [`MAX_DOSES`]
/// - [`Error::InvalidSchedule`] if the schedule fails [`Schedule::validate`]
pub fn expand(
    schedule: &Schedule,
    dose_count: u32,
    refill_count: u32,
    anchor: DateTime<Utc>,
) -> Result<Vec<Occurrence>> {
    if dose_count == 0 {
        return Err(Error::Validation("dose count must be at least 1".into()));
    }
    schedule.validate()?;

    let entries = ordered_entries(schedule);
    let cycles = u64::from(refill_count) + 1;
    let total = u64::from(dose_count) * cycles;
    if total > MAX_DOSES {
        return Err(Error::Validation(format!(
            "{} doses exceed the limit of {} per prescription",
            total, MAX_DOSES
        )));
    }

    let mut occurrences = Vec::with_capacity(total as usize);
    let mut pass: i64 = 0;

    for refill in 0..=refill_count {
        let mut emitted = 0;
        while emitted < dose_count {
            let cursor = schedule
                .period
                .checked_mul(pass)
                .ok_or_else(|| overflow(anchor))?;

            for entry in &entries {
                if emitted >= dose_count {
                    break;
                }

                let time = anchor
                    .checked_add_signed(cursor.to_chrono())
                    .and_then(|t| t.checked_add_signed(entry.offset_into_period.to_chrono()))
                    .ok_or_else(|| overflow(anchor))?;

                occurrences.push(Occurrence {
                    refill,
                    time,
                    amount: entry.amount,
                    unit: entry.unit.clone(),
                });
                emitted += 1;
            }

            pass += 1;
        }
    }

    tracing::debug!(
        "Expanded schedule into {} doses over {} cycles ({} periods)",
        occurrences.len(),
        cycles,
        pass
    );

    Ok(occurrences)
}

/// Schedule entries sorted by offset; ties keep their declared order
fn ordered_entries(schedule: &Schedule) -> Vec<&ScheduledDose> {
    let mut entries: Vec<_> = schedule.doses.iter().collect();
    entries.sort_by_key(|d| d.offset_into_period);
    entries
}

fn overflow(anchor: DateTime<Utc>) -> Error {
    Error::InvalidSchedule(format!(
        "dose times overflow the calendar when anchored at {}",
        anchor
    ))
}
