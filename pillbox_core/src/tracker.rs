//! Dose state tracking.
//!
//! A dose starts out pending and is addressed by marking it taken or skipped.
//! Re-marking is allowed and the last write wins; there is no way back to
//! pending.

use crate::{Dose, DoseId, Result, Store};
use chrono::{DateTime, Utc};

/// Record that a dose was taken (`taken = true`) or skipped (`taken = false`)
///
/// Fails with [`crate::Error::NotFound`] if no regimen owns the dose, in
/// which case nothing is modified.
pub fn mark_dose<S: Store + ?Sized>(
    store: &S,
    dose: DoseId,
    taken: bool,
    at: DateTime<Utc>,
) -> Result<Dose> {
    let updated = store.mark_taken(dose, taken, at)?;

    tracing::info!(
        "Marked dose {} of regimen {} as {} at {}",
        updated.id,
        updated.regimen_id,
        updated.state().label(),
        at
    );

    Ok(updated)
}
