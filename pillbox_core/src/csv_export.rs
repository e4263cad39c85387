//! CSV export of a patient's dose schedule.

use crate::{RegimenDoses, Result};
use std::io::Write;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow<'a> {
    dose_id: u64,
    regimen_id: u64,
    prescription_id: u64,
    medication: &'a str,
    refill: u32,
    time: String,
    amount: f64,
    unit: &'a str,
    status: &'static str,
    time_taken: Option<String>,
}

/// Write every dose of the given regimens as CSV, ordered by time
///
/// Returns the number of rows written.
pub fn write_schedule<W: Write>(regimens: &[RegimenDoses], out: W) -> Result<usize> {
    let mut rows: Vec<CsvRow<'_>> = regimens
        .iter()
        .flat_map(|r| {
            r.doses.iter().map(move |dose| CsvRow {
                dose_id: dose.id,
                regimen_id: r.regimen_id,
                prescription_id: r.prescription_id,
                medication: &r.medication.name,
                refill: dose.refill,
                time: dose.time.to_rfc3339(),
                amount: dose.amount,
                unit: &dose.unit,
                status: dose.state().label(),
                time_taken: dose.time_taken.map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    // RFC 3339 strings in UTC sort chronologically
    rows.sort_by(|a, b| a.time.cmp(&b.time).then(a.dose_id.cmp(&b.dose_id)));

    let mut writer = csv::Writer::from_writer(out);
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    tracing::info!("Exported {} doses to CSV", rows.len());
    Ok(rows.len())
}
