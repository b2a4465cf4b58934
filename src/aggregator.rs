//! Aggregation worker: consumes the transaction stream through a consumer
//! group and folds each message into the hot per-day aggregates.
//!
//! Every batch is applied as one Redis pipeline that carries the aggregate
//! increments, the tracked-day registration, the virtual-clock write and the
//! acks together. The pipeline is a batching optimization, not a transaction:
//! a crash between apply and ack can replay a batch and double-count a
//! (day, method) cell. That skew is tolerated.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::keys;
use crate::stream_bus::{StreamMessage, TransactionStream};
use crate::transactions::{Transaction, format_timestamp, parse_timestamp};

const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_BLOCK_MS: usize = 5_000;

pub struct AggregationWorker {
    conn: ConnectionManager,
    stream: TransactionStream,
    consumer_name: String,
    batch_size: usize,
    block_ms: usize,
    /// Authoritative while the worker runs; the hot-store copy is only a
    /// hand-off between restarts.
    local_clock: Option<NaiveDateTime>,
}

impl AggregationWorker {
    pub fn new(conn: ConnectionManager, consumer_name: impl Into<String>) -> Self {
        Self {
            stream: TransactionStream::new(conn.clone()),
            conn,
            consumer_name: consumer_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            block_ms: DEFAULT_BLOCK_MS,
            local_clock: None,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.stream.ensure_group().await?;

        // Pick the clock back up from the previous run. This is the only time
        // it is read from the hot store.
        let stored: Option<String> = self
            .conn
            .get(keys::VIRTUAL_CLOCK_KEY)
            .await
            .context("Failed to read virtual clock at startup")?;
        if let Some(raw) = stored {
            match parse_timestamp(&raw) {
                Ok(clock) => self.local_clock = Some(clock),
                Err(e) => warn!("Ignoring unreadable stored virtual clock: {:#}", e),
            }
        }

        info!(
            "Aggregation worker started. Group: {}, consumer: {}, clock: {:?}",
            keys::GROUP_NAME,
            self.consumer_name,
            self.local_clock
        );

        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Aggregation worker shut down");
                    return Ok(());
                }
                batch = self.stream.read_group(
                    &self.consumer_name,
                    self.batch_size,
                    self.block_ms,
                ) => batch.context("Aggregation worker failed to read the stream")?,
            };

            if batch.is_empty() {
                continue;
            }
            self.apply_batch(&batch).await?;
        }
    }

    /// Apply one batch in a single pipeline. Malformed messages are logged and
    /// acked without touching any aggregate so they never redeliver.
    async fn apply_batch(&mut self, batch: &[StreamMessage]) -> Result<()> {
        let mut pipe = redis::pipe();
        let mut applied = 0usize;

        for message in batch {
            match Transaction::from_fields(&message.fields) {
                Ok(tx) => {
                    let day = tx.day();
                    pipe.cmd("HINCRBYFLOAT")
                        .arg(keys::agg_key(&day, tx.tx_type))
                        .arg(&tx.payment_method)
                        .arg(tx.amount)
                        .ignore();
                    pipe.sadd(keys::TRACKED_DAYS_KEY, &day).ignore();

                    if advance_clock(&mut self.local_clock, tx.timestamp) {
                        pipe.set(keys::VIRTUAL_CLOCK_KEY, format_timestamp(tx.timestamp))
                            .ignore();
                    }
                    applied += 1;
                }
                Err(e) => {
                    warn!("Skipping malformed message {}: {:#}", message.id, e);
                    metrics::counter!("aggregator.messages.malformed").increment(1);
                }
            }

            pipe.xack(keys::STREAM_NAME, keys::GROUP_NAME, &[&message.id])
                .ignore();
        }

        pipe.query_async::<_, ()>(&mut self.conn)
            .await
            .context("Failed to execute aggregation pipeline")?;

        metrics::counter!("aggregator.messages.applied").increment(applied as u64);
        info!(
            "Aggregated {} of {} messages. Clock: {}",
            applied,
            batch.len(),
            self.local_clock.map(format_timestamp).unwrap_or_default()
        );
        Ok(())
    }
}

/// Advance the clock on strict increase only. Returns whether it moved, in
/// which case the caller writes the new value through to the hot store.
fn advance_clock(clock: &mut Option<NaiveDateTime>, observed: NaiveDateTime) -> bool {
    match clock {
        Some(current) if observed <= *current => false,
        _ => {
            *clock = Some(observed);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    #[test]
    fn test_advance_clock_from_unset() {
        let mut clock = None;
        assert!(advance_clock(&mut clock, ts("2026-01-01T00:00:00")));
        assert_eq!(clock, Some(ts("2026-01-01T00:00:00")));
    }

    #[test]
    fn test_advance_clock_strict_increase_only() {
        let mut clock = Some(ts("2026-01-01T00:00:01"));

        assert!(!advance_clock(&mut clock, ts("2026-01-01T00:00:01")));
        assert!(!advance_clock(&mut clock, ts("2025-12-31T23:59:59")));
        assert_eq!(clock, Some(ts("2026-01-01T00:00:01")));

        assert!(advance_clock(&mut clock, ts("2026-01-01T00:00:02")));
        assert_eq!(clock, Some(ts("2026-01-01T00:00:02")));
    }

    #[test]
    fn test_advance_clock_monotone_over_shuffled_input() {
        let observations = [
            "2026-01-03T12:00:00",
            "2026-01-01T00:00:00",
            "2026-01-05T08:30:00",
            "2026-01-02T23:59:59",
            "2026-01-05T08:29:59",
        ];

        let mut clock = None;
        let mut high_water = None;
        for raw in observations {
            let observed = ts(raw);
            advance_clock(&mut clock, observed);
            high_water = high_water.max(Some(observed));
            assert_eq!(clock, high_water);
        }
    }
}
