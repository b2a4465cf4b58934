//! One-off utility: sort a transactions CSV by its `timestamp` column.
//!
//! The importer relies on the input being pre-sorted ascending so per-record
//! pacing replays events in order; this produces that file.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::info;

use crate::transactions::TIMESTAMP_FORMAT;

pub fn handle_sort_csv(input: &Path, output: &Path) -> Result<()> {
    let mut reader = csv::Reader::from_path(input)
        .with_context(|| format!("Failed to open CSV file {}", input.display()))?;
    let headers = reader
        .headers()
        .context("Failed to read CSV header")?
        .clone();
    let timestamp_index = headers
        .iter()
        .position(|name| name == "timestamp")
        .context("CSV has no timestamp column")?;

    let mut rows: Vec<(NaiveDateTime, csv::StringRecord)> = Vec::new();
    for record in reader.records() {
        let record = record.context("Failed to read CSV record")?;
        let raw = record
            .get(timestamp_index)
            .context("Row is missing the timestamp column")?;
        let timestamp = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .with_context(|| format!("Invalid timestamp {:?}", raw))?;
        rows.push((timestamp, record));
    }

    // Stable sort keeps equal-timestamp rows in file order.
    rows.sort_by_key(|(timestamp, _)| *timestamp);

    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    writer.write_record(&headers)?;
    for (_, record) in &rows {
        writer.write_record(record)?;
    }
    writer.flush().context("Failed to flush sorted CSV")?;

    info!(
        "Sorted {} rows from {} into {}",
        rows.len(),
        input.display(),
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sort_csv_orders_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("unsorted.csv");
        let output = dir.path().join("sorted.csv");

        let mut file = std::fs::File::create(&input).unwrap();
        writeln!(file, "timestamp,type,payment_method,amount,sleep_ms").unwrap();
        writeln!(file, "2026-01-02T00:00:00,deposit,card,2.00,0").unwrap();
        writeln!(file, "2026-01-01T00:00:00,deposit,card,1.00,0").unwrap();
        writeln!(file, "2026-01-01T12:00:00,withdrawal,wire,3.00,5").unwrap();
        drop(file);

        handle_sort_csv(&input, &output).unwrap();

        let sorted = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = sorted.lines().collect();
        assert_eq!(lines[0], "timestamp,type,payment_method,amount,sleep_ms");
        assert_eq!(lines[1], "2026-01-01T00:00:00,deposit,card,1.00,0");
        assert_eq!(lines[2], "2026-01-01T12:00:00,withdrawal,wire,3.00,5");
        assert_eq!(lines[3], "2026-01-02T00:00:00,deposit,card,2.00,0");
    }

    #[test]
    fn test_sort_csv_rejects_bad_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.csv");
        let output = dir.path().join("sorted.csv");

        let mut file = std::fs::File::create(&input).unwrap();
        writeln!(file, "timestamp,type,payment_method,amount,sleep_ms").unwrap();
        writeln!(file, "yesterday,deposit,card,1.00,0").unwrap();
        drop(file);

        let err = handle_sort_csv(&input, &output).unwrap_err();
        assert!(err.to_string().contains("Invalid timestamp"));
    }

    #[test]
    fn test_sort_csv_missing_timestamp_column() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("no-ts.csv");
        let output = dir.path().join("sorted.csv");

        let mut file = std::fs::File::create(&input).unwrap();
        writeln!(file, "type,payment_method,amount,sleep_ms").unwrap();
        drop(file);

        let err = handle_sort_csv(&input, &output).unwrap_err();
        assert!(err.to_string().contains("timestamp column"));
    }
}
