//! CSV bodies in, CSV files out.
//!
//! Cells stay untyped strings; coercion belongs to whoever consumes the sample.

use std::io::{Read, Write};

use crate::constants::query::COUNT_TOTAL_COLUMN;
use crate::data::{AssembledSample, Row, StratumCount};
use crate::errors::SamplingError;

/// Parse a CSV body (header row first) into rows.
///
/// Short records are padded with empty cells; an empty body yields no rows.
pub fn parse_rows<R: Read>(body: R) -> Result<Vec<Row>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(idx, column)| (column, record.get(idx).unwrap_or_default()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Parse a count-query body into per-stratum totals, keeping response order.
pub fn parse_counts<R: Read>(body: R, group_by: &str) -> Result<Vec<StratumCount>, SamplingError> {
    let mut counts = Vec::new();
    for row in parse_rows(body)? {
        let Some(stratum) = row.get(group_by) else {
            return Err(SamplingError::InvalidInput(format!(
                "count response is missing the '{group_by}' column"
            )));
        };
        let raw_total = row.get(COUNT_TOTAL_COLUMN).ok_or_else(|| {
            SamplingError::InvalidInput(format!(
                "count response is missing the '{COUNT_TOTAL_COLUMN}' column"
            ))
        })?;
        let total = raw_total.trim().parse::<u64>().map_err(|_| {
            SamplingError::InvalidInput(format!(
                "count for '{stratum}' is not a non-negative integer: '{raw_total}'"
            ))
        })?;
        counts.push(StratumCount::new(stratum, total));
    }
    Ok(counts)
}

/// Write `sample` as CSV using its column union as the header.
///
/// An empty sample with no columns writes nothing.
pub fn write_sample<W: Write>(sample: &AssembledSample, out: W) -> Result<(), SamplingError> {
    if sample.columns.is_empty() {
        return Ok(());
    }
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&sample.columns)?;
    for row in &sample.rows {
        writer.write_record(
            sample
                .columns
                .iter()
                .map(|column| row.get(column).unwrap_or_default()),
        )?;
    }
    writer.flush()?;
    Ok(())
}
