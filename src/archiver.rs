//! Archive worker: periodically moves days that fell out of the retention
//! window from the hot store into the cold store.
//!
//! The cold write is an `$inc` upsert and the hot delete happens strictly
//! after it, so a reader never sees a day missing from both tiers. A crash
//! between the upsert and the delete re-adds the same values on the next pass;
//! the worker is single-tasked and finishes a cycle before starting the next,
//! which keeps that window to one crash, not one per tick.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use mongodb::Collection;
use mongodb::bson::{Document, doc};
use mongodb::options::UpdateOptions;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::keys;
use crate::transactions::{TxType, parse_timestamp, round2};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Pause between migrated days so a large backlog does not monopolize the hot
/// store.
const DAY_PACING: Duration = Duration::from_millis(10);

pub struct ArchiveWorker {
    conn: ConnectionManager,
    collection: Collection<Document>,
    interval: Duration,
    retention_days: i64,
}

impl ArchiveWorker {
    pub fn new(conn: ConnectionManager, collection: Collection<Document>) -> Self {
        Self {
            conn,
            collection,
            interval: DEFAULT_INTERVAL,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Archive worker started. Interval: {:?}, retention: {} days",
            self.interval, self.retention_days
        );

        loop {
            // One failed cycle must not stop future cycles; the next tick is
            // the retry.
            if let Err(e) = self.archive_aged_days().await {
                error!("Archive cycle failed: {:#}", e);
                metrics::counter!("archiver.cycles.failed").increment(1);
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Archive worker shut down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn archive_aged_days(&mut self) -> Result<()> {
        debug!("Archive heartbeat: checking for aged days");

        let stored: Option<String> = self
            .conn
            .get(keys::VIRTUAL_CLOCK_KEY)
            .await
            .context("Failed to read virtual clock")?;
        let Some(raw) = stored else {
            // No clock means nothing has been aggregated yet; there is no
            // notion of time to archive against.
            debug!("No virtual clock yet, nothing to archive");
            return Ok(());
        };

        let virtual_today = parse_timestamp(&raw)?.date();
        let boundary = virtual_today - chrono::Duration::days(self.retention_days);

        let tracked: Vec<String> = self
            .conn
            .smembers(keys::TRACKED_DAYS_KEY)
            .await
            .context("Failed to read tracked days")?;

        for day in aged_days(tracked, boundary) {
            info!("Day {} is past the retention boundary {}, moving", day, boundary);
            self.archive_day(&day).await?;
            tokio::time::sleep(DAY_PACING).await;
        }
        Ok(())
    }

    /// Move one day: fetch both hot hashes, upsert the cold document, then
    /// delete the hot side. Step order is what keeps the day visible in at
    /// least one tier throughout.
    async fn archive_day(&mut self, day: &str) -> Result<()> {
        let deposit_key = keys::agg_key(day, TxType::Deposit);
        let withdrawal_key = keys::agg_key(day, TxType::Withdrawal);

        let (deposits, withdrawals): (HashMap<String, String>, HashMap<String, String>) =
            redis::pipe()
                .hgetall(&deposit_key)
                .hgetall(&withdrawal_key)
                .query_async(&mut self.conn)
                .await
                .context("Failed to fetch hot aggregates")?;

        if deposits.is_empty() && withdrawals.is_empty() {
            // Tracked but empty: registration leftover, nothing to move.
            let _: () = self
                .conn
                .srem(keys::TRACKED_DAYS_KEY, day)
                .await
                .context("Failed to untrack empty day")?;
            return Ok(());
        }

        let increments = build_increments(&deposits, &withdrawals);
        if !increments.is_empty() {
            self.collection
                .update_one(
                    doc! { "date": day },
                    doc! {
                        "$inc": increments,
                        "$set": { "last_updated": mongodb::bson::DateTime::now() },
                    },
                    UpdateOptions::builder().upsert(true).build(),
                )
                .await
                .with_context(|| format!("Failed to upsert cold document for {}", day))?;
            info!("Archived {} to the cold store", day);
            metrics::counter!("archiver.days.archived").increment(1);
        }

        let _: () = redis::pipe()
            .del(&[deposit_key.as_str(), withdrawal_key.as_str()])
            .ignore()
            .srem(keys::TRACKED_DAYS_KEY, day)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .context("Failed to delete archived hot aggregates")?;
        Ok(())
    }
}

/// Tracked days at or past the boundary, oldest first. Unparseable members
/// are reported and left alone rather than deleted blind.
fn aged_days(tracked: Vec<String>, boundary: NaiveDate) -> Vec<String> {
    let mut aged: Vec<(NaiveDate, String)> = tracked
        .into_iter()
        .filter_map(|day| match day.parse::<NaiveDate>() {
            Ok(date) if date <= boundary => Some((date, day)),
            Ok(_) => None,
            Err(_) => {
                warn!("Ignoring malformed tracked day {:?}", day);
                None
            }
        })
        .collect();
    aged.sort();
    aged.into_iter().map(|(_, day)| day).collect()
}

/// Dotted `$inc` paths for every observed (type, method) cell, values rounded
/// to two decimals.
fn build_increments(
    deposits: &HashMap<String, String>,
    withdrawals: &HashMap<String, String>,
) -> Document {
    let mut increments = Document::new();
    for (tx_type, cells) in [(TxType::Deposit, deposits), (TxType::Withdrawal, withdrawals)] {
        for (method, value) in cells {
            match value.parse::<f64>() {
                Ok(amount) => {
                    increments.insert(
                        format!("{}.{}", tx_type.field_name(), method),
                        round2(amount),
                    );
                }
                Err(_) => {
                    warn!(
                        "Ignoring unparseable {} cell {}={:?}",
                        tx_type, method, value
                    );
                }
            }
        }
    }
    increments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(raw: &str) -> NaiveDate {
        raw.parse().unwrap()
    }

    fn cells(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_aged_days_boundary_is_inclusive() {
        let tracked = vec![
            "2026-01-10".to_string(),
            "2026-01-03".to_string(),
            "2026-01-02".to_string(),
            "2026-01-04".to_string(),
        ];

        let aged = aged_days(tracked, day("2026-01-03"));
        assert_eq!(aged, vec!["2026-01-02", "2026-01-03"]);
    }

    #[test]
    fn test_aged_days_skips_malformed_members() {
        let tracked = vec!["garbage".to_string(), "2026-01-01".to_string()];
        assert_eq!(aged_days(tracked, day("2026-01-05")), vec!["2026-01-01"]);
    }

    #[test]
    fn test_aged_days_empty_when_everything_recent() {
        let tracked = vec!["2026-01-09".to_string(), "2026-01-10".to_string()];
        assert!(aged_days(tracked, day("2026-01-03")).is_empty());
    }

    #[test]
    fn test_build_increments_dotted_paths_and_rounding() {
        let increments = build_increments(
            &cells(&[("card", "15.554"), ("wire", "3")]),
            &cells(&[("card", "2.006")]),
        );

        assert_eq!(increments.get_f64("deposits.card").unwrap(), 15.55);
        assert_eq!(increments.get_f64("deposits.wire").unwrap(), 3.0);
        assert_eq!(increments.get_f64("withdrawals.card").unwrap(), 2.01);
    }

    #[test]
    fn test_build_increments_skips_unparseable_cells() {
        let increments = build_increments(&cells(&[("card", "oops")]), &cells(&[]));
        assert!(increments.is_empty());
    }
}
