//! Range queries over per-day aggregates, merged across both storage tiers.
//!
//! The split point between tiers is the hot boundary derived from the current
//! virtual clock, so the same day can be served from the hot store in one
//! request and from the cold store in a later one. The response is a
//! point-in-time snapshot, not a cross-store transaction.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::FindOptions;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::keys;
use crate::transactions::{TxType, parse_timestamp};

const DEFAULT_HOT_DAYS: i64 = 7;

/// Per-day totals as returned to API consumers. A day with only deposits gets
/// an empty withdrawals map, never an omitted field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DayStats {
    pub deposits: HashMap<String, f64>,
    pub withdrawals: HashMap<String, f64>,
}

pub struct StatsService {
    redis: ConnectionManager,
    collection: Collection<Document>,
    hot_days: i64,
}

impl StatsService {
    pub fn new(redis: ConnectionManager, collection: Collection<Document>) -> Self {
        Self {
            redis,
            collection,
            hot_days: DEFAULT_HOT_DAYS,
        }
    }

    /// Totals for every day in `[from, to]` that has data in either tier.
    /// Days without data are omitted, never zero-filled. Callers validate
    /// `from <= to`; an inverted range simply yields nothing here.
    pub async fn get_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<String, DayStats>> {
        let days = date_range(from, to);
        let (hot_boundary, virtual_today) = self.hot_boundary().await?;
        let (hot_days, cold_days): (Vec<NaiveDate>, Vec<NaiveDate>) =
            days.into_iter().partition(|day| *day >= hot_boundary);

        info!(
            "Stats query [{} -> {}] virtual_today={} hot_boundary={} hot_days={} cold_days={}",
            from,
            to,
            virtual_today,
            hot_boundary,
            hot_days.len(),
            cold_days.len()
        );

        let mut result = BTreeMap::new();
        if !cold_days.is_empty() {
            result.extend(self.read_cold(&cold_days).await?);
        }
        // Merged second so the hot tier wins should a day ever appear in both.
        if !hot_days.is_empty() {
            result.extend(self.read_hot(&hot_days).await?);
        }

        metrics::counter!("stats.queries.served").increment(1);
        Ok(result)
    }

    /// Boundary between tiers, derived from the virtual clock. Falls back to
    /// the wall clock when nothing has been aggregated yet.
    async fn hot_boundary(&self) -> Result<(NaiveDate, NaiveDate)> {
        let mut conn = self.redis.clone();
        let stored: Option<String> = conn
            .get(keys::VIRTUAL_CLOCK_KEY)
            .await
            .context("Failed to read virtual clock")?;

        let virtual_today = match stored {
            Some(raw) => parse_timestamp(&raw)?.date(),
            None => {
                let today = chrono::Local::now().date_naive();
                warn!(
                    "Virtual clock not set, falling back to wall-clock today ({})",
                    today
                );
                today
            }
        };

        Ok((virtual_today - chrono::Duration::days(self.hot_days), virtual_today))
    }

    /// One pipelined fetch of both type-hashes for every requested day.
    async fn read_hot(&self, days: &[NaiveDate]) -> Result<BTreeMap<String, DayStats>> {
        debug!("Reading {} days from the hot store (pipeline)", days.len());

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for day in days {
            let day = day.to_string();
            pipe.hgetall(keys::agg_key(&day, TxType::Deposit));
            pipe.hgetall(keys::agg_key(&day, TxType::Withdrawal));
        }

        let raw: Vec<HashMap<String, String>> = pipe
            .query_async(&mut conn)
            .await
            .context("Failed to fetch hot aggregates")?;

        let mut result = BTreeMap::new();
        for (i, day) in days.iter().enumerate() {
            let deposits = &raw[2 * i];
            let withdrawals = &raw[2 * i + 1];
            if deposits.is_empty() && withdrawals.is_empty() {
                continue;
            }
            result.insert(
                day.to_string(),
                DayStats {
                    deposits: to_floats(deposits),
                    withdrawals: to_floats(withdrawals),
                },
            );
        }
        Ok(result)
    }

    /// One `$in` query for every requested day.
    async fn read_cold(&self, days: &[NaiveDate]) -> Result<BTreeMap<String, DayStats>> {
        debug!("Reading {} days from the cold store (single query)", days.len());

        let day_strings: Vec<String> = days.iter().map(NaiveDate::to_string).collect();
        let options = FindOptions::builder()
            .projection(doc! { "_id": 0, "date": 1, "deposits": 1, "withdrawals": 1 })
            .build();
        let mut cursor = self
            .collection
            .find(doc! { "date": { "$in": day_strings } }, options)
            .await
            .context("Failed to query cold documents")?;

        let mut result = BTreeMap::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .context("Failed to read cold document")?
        {
            let Ok(date) = document.get_str("date") else {
                warn!("Skipping cold document without a date field");
                continue;
            };
            result.insert(
                date.to_string(),
                DayStats {
                    deposits: nested_sums(&document, TxType::Deposit),
                    withdrawals: nested_sums(&document, TxType::Withdrawal),
                },
            );
        }
        Ok(result)
    }
}

/// Inclusive day range, empty when `from > to`.
fn date_range(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = from;
    while current <= to {
        days.push(current);
        current += chrono::Duration::days(1);
    }
    days
}

/// Hot hash cells are decimal strings; coerce them, dropping anything that
/// does not parse.
fn to_floats(cells: &HashMap<String, String>) -> HashMap<String, f64> {
    cells
        .iter()
        .filter_map(|(method, value)| match value.parse::<f64>() {
            Ok(amount) => Some((method.clone(), amount)),
            Err(_) => {
                warn!("Dropping unparseable aggregate cell {}={:?}", method, value);
                None
            }
        })
        .collect()
}

/// Pull one of the nested method->sum maps out of a cold document.
fn nested_sums(document: &Document, tx_type: TxType) -> HashMap<String, f64> {
    let Ok(nested) = document.get_document(tx_type.field_name()) else {
        return HashMap::new();
    };
    nested
        .iter()
        .filter_map(|(method, value)| bson_number(value).map(|n| (method.clone(), n)))
        .collect()
}

fn bson_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}
