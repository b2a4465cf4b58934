//! CSV importer: replays a pre-sorted transactions file onto the stream,
//! honoring each record's declared inter-arrival delay.
//!
//! One blocking producer reads the file record-by-record and hands rows to a
//! bounded channel; a pool of async workers sleeps out each row's `sleep_ms`
//! and appends it to the stream. The bounded channel is the backpressure that
//! keeps the file from being slurped into memory, so delivery order can skew
//! from file order by at most max(sleep_ms) x worker count.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::stream_bus::TransactionStream;

/// A CSV row as ordered (column, value) pairs, exactly as read from the file.
pub type Row = Vec<(String, String)>;

pub struct CsvImporter {
    file_path: PathBuf,
    stream: TransactionStream,
    concurrency: usize,
}

impl CsvImporter {
    /// Fails fast when the file is absent; everything else is reported from
    /// `run`.
    pub fn new(
        file_path: impl Into<PathBuf>,
        stream: TransactionStream,
        concurrency: usize,
    ) -> Result<Self> {
        let file_path = file_path.into();
        if !file_path.exists() {
            bail!("CSV file not found: {}", file_path.display());
        }

        Ok(Self {
            file_path,
            stream,
            concurrency,
        })
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "CSV importer started (file: {}, concurrency: {})",
            self.file_path.display(),
            self.concurrency
        );

        let (row_tx, row_rx) = flume::bounded::<Row>(self.concurrency * 2);

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let rx = row_rx.clone();
            let stream = self.stream.clone();
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(worker_loop(worker_id, rx, stream, shutdown)));
        }
        drop(row_rx);

        let file_path = self.file_path.clone();
        let produced = tokio::task::spawn_blocking(move || produce_rows(&file_path, row_tx))
            .await
            .context("CSV producer task panicked")??;

        // The producer dropped its sender, so workers drain the channel and
        // exit on disconnect.
        for worker in workers {
            worker.await.context("CSV worker task panicked")?;
        }

        if shutdown.is_cancelled() {
            info!("CSV importer cancelled");
        } else {
            info!("CSV importer finished successfully ({} rows)", produced);
        }
        Ok(())
    }
}

/// Sequential blocking reader. Runs on the blocking pool; the bounded `send`
/// blocks this thread whenever all workers are busy sleeping or appending.
fn produce_rows(path: &Path, row_tx: flume::Sender<Row>) -> Result<u64> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let headers = reader
        .headers()
        .context("Failed to read CSV header")?
        .clone();
    debug!("CSV header loaded: {:?}", headers);

    let mut produced = 0u64;
    for record in reader.records() {
        let record = record.context("Failed to read CSV record")?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        if row_tx.send(row).is_err() {
            // Workers are gone, which only happens on shutdown.
            warn!("Row channel closed, stopping CSV producer");
            break;
        }
        produced += 1;
        metrics::counter!("importer.rows.produced").increment(1);

        if produced % 1_000 == 0 {
            info!("Produced {} rows", produced);
        }
    }

    info!("CSV producer finished. Total rows: {}", produced);
    Ok(produced)
}

async fn worker_loop(
    worker_id: usize,
    row_rx: flume::Receiver<Row>,
    stream: TransactionStream,
    shutdown: CancellationToken,
) {
    debug!("Importer worker {} started", worker_id);

    loop {
        let row = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Importer worker {} cancelled", worker_id);
                return;
            }
            row = row_rx.recv_async() => match row {
                Ok(row) => row,
                Err(_) => break, // producer done and channel drained
            },
        };

        process_row(worker_id, row, &stream, &shutdown).await;
    }

    debug!("Importer worker {} finished", worker_id);
}

async fn process_row(
    worker_id: usize,
    row: Row,
    stream: &TransactionStream,
    shutdown: &CancellationToken,
) {
    let sleep_ms = match parse_sleep_ms(&row) {
        Some(ms) => ms,
        None => {
            warn!(
                "Invalid sleep_ms value {:?}, skipping row (timestamp={:?})",
                row_field(&row, "sleep_ms"),
                row_field(&row, "timestamp"),
            );
            metrics::counter!("importer.rows.invalid_sleep_ms").increment(1);
            return;
        }
    };

    // Pacing delay declared by the record itself. Cancellation aborts the
    // sleep rather than letting it run out.
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
    }

    match stream.append(&row).await {
        Ok(id) => {
            debug!("Transaction appended (worker={}, id={})", worker_id, id);
            metrics::counter!("importer.rows.appended").increment(1);
        }
        Err(e) => {
            // A single failed append must not take the importer down.
            error!(
                "Failed to append transaction to stream (worker={}, timestamp={:?}): {:#}",
                worker_id,
                row_field(&row, "timestamp"),
                e
            );
            metrics::counter!("importer.rows.append_failed").increment(1);
        }
    }
}

/// `sleep_ms` must be a non-negative integer; anything else disqualifies the
/// row.
fn parse_sleep_ms(row: &Row) -> Option<u64> {
    row_field(row, "sleep_ms")?.parse().ok()
}

fn row_field<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.iter()
        .find(|(field, _)| field == name)
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn row(entries: &[(&str, &str)]) -> Row {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_sleep_ms_valid() {
        assert_eq!(parse_sleep_ms(&row(&[("sleep_ms", "0")])), Some(0));
        assert_eq!(parse_sleep_ms(&row(&[("sleep_ms", "250")])), Some(250));
    }

    #[test]
    fn test_parse_sleep_ms_rejects_garbage() {
        assert_eq!(parse_sleep_ms(&row(&[("sleep_ms", "abc")])), None);
        assert_eq!(parse_sleep_ms(&row(&[("sleep_ms", "-5")])), None);
        assert_eq!(parse_sleep_ms(&row(&[("sleep_ms", "1.5")])), None);
        assert_eq!(parse_sleep_ms(&row(&[("timestamp", "x")])), None);
    }

    #[test]
    fn test_produce_rows_preserves_columns_and_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,type,payment_method,amount,sleep_ms").unwrap();
        writeln!(file, "2026-01-01T00:00:00,deposit,card,10.00,0").unwrap();
        writeln!(file, "2026-01-01T00:00:01,withdrawal,wire,5.55,20").unwrap();
        file.flush().unwrap();

        let (tx, rx) = flume::unbounded::<Row>();
        let produced = produce_rows(file.path(), tx).unwrap();
        assert_eq!(produced, 2);

        let rows: Vec<Row> = rx.drain().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            row(&[
                ("timestamp", "2026-01-01T00:00:00"),
                ("type", "deposit"),
                ("payment_method", "card"),
                ("amount", "10.00"),
                ("sleep_ms", "0"),
            ])
        );
        assert_eq!(row_field(&rows[1], "payment_method"), Some("wire"));
    }

    #[test]
    fn test_produce_rows_empty_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,type,payment_method,amount,sleep_ms").unwrap();
        file.flush().unwrap();

        let (tx, rx) = flume::unbounded::<Row>();
        let produced = produce_rows(file.path(), tx).unwrap();
        assert_eq!(produced, 0);
        assert!(rx.is_empty());
    }
}
