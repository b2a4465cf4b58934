//! Transaction records as they travel through the pipeline.
//!
//! A stream message carries the CSV row verbatim as a string field map; this
//! module is the single place that turns that map into a typed record.

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Second-precision naive local datetime used in the CSV, on the stream and
/// in the virtual clock key.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Transaction direction. The string form is part of the hot-store key layout
/// and the cold-store document layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    Deposit,
    Withdrawal,
}

impl TxType {
    pub const ALL: [TxType; 2] = [TxType::Deposit, TxType::Withdrawal];

    /// Singular form used in aggregate keys: `agg:{day}:{type}`.
    pub fn as_str(self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Withdrawal => "withdrawal",
        }
    }

    /// Plural form used in cold documents and query responses.
    pub fn field_name(self) -> &'static str {
        match self {
            TxType::Deposit => "deposits",
            TxType::Withdrawal => "withdrawals",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deposit" => Ok(TxType::Deposit),
            "withdrawal" => Ok(TxType::Withdrawal),
            other => bail!("Unknown transaction type: {:?}", other),
        }
    }
}

/// One parsed transaction. `sleep_ms` never leaves the importer, so it is not
/// carried here.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub timestamp: NaiveDateTime,
    pub tx_type: TxType,
    pub payment_method: String,
    pub amount: f64,
}

impl Transaction {
    /// Parse a stream field map into a transaction. The amount is rounded to
    /// two decimals here so every downstream increment sees the rounded value.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let timestamp = parse_timestamp(field(fields, "timestamp")?)?;
        let tx_type = field(fields, "type")?.parse()?;
        let payment_method = field(fields, "payment_method")?.to_string();
        let amount: f64 = field(fields, "amount")?
            .parse()
            .context("Invalid amount")?;

        Ok(Self {
            timestamp,
            tx_type,
            payment_method,
            amount: round2(amount),
        })
    }

    /// Calendar day this transaction lands on, as `YYYY-MM-DD`.
    pub fn day(&self) -> String {
        self.timestamp.date().to_string()
    }
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .with_context(|| format!("Missing field {:?}", name))
}

/// Round to two decimal places. Applied on every increment, not just on read,
/// so the hot and cold stores only ever see two-decimal values.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .with_context(|| format!("Invalid timestamp {:?}", raw))
}

pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.234), 1.23);
        assert_eq!(round2(2.001), 2.00);
        assert_eq!(round2(10.006), 10.01);
        assert_eq!(round2(-1.236), -1.24);
        assert_eq!(round2(15.55), 15.55);
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = parse_timestamp("2026-01-01T00:00:01").unwrap();
        assert_eq!(format_timestamp(ts), "2026-01-01T00:00:01");
    }

    #[test]
    fn test_timestamp_rejects_date_only() {
        assert!(parse_timestamp("2026-01-01").is_err());
        assert!(parse_timestamp("not-a-timestamp").is_err());
    }

    #[test]
    fn test_from_fields_valid() {
        let tx = Transaction::from_fields(&fields(&[
            ("timestamp", "2026-01-01T12:30:00"),
            ("type", "deposit"),
            ("payment_method", "card"),
            ("amount", "10.00"),
            ("sleep_ms", "5"),
        ]))
        .unwrap();

        assert_eq!(tx.tx_type, TxType::Deposit);
        assert_eq!(tx.payment_method, "card");
        assert_eq!(tx.amount, 10.00);
        assert_eq!(tx.day(), "2026-01-01");
    }

    #[test]
    fn test_from_fields_rounds_amount() {
        let tx = Transaction::from_fields(&fields(&[
            ("timestamp", "2026-01-01T00:00:00"),
            ("type", "withdrawal"),
            ("payment_method", "wire"),
            ("amount", "1.234"),
        ]))
        .unwrap();

        assert_eq!(tx.amount, 1.23);
    }

    #[test]
    fn test_from_fields_missing_field() {
        let err = Transaction::from_fields(&fields(&[
            ("timestamp", "2026-01-01T00:00:00"),
            ("type", "deposit"),
            ("amount", "1.00"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("payment_method"));
    }

    #[test]
    fn test_from_fields_unknown_type() {
        let result = Transaction::from_fields(&fields(&[
            ("timestamp", "2026-01-01T00:00:00"),
            ("type", "transfer"),
            ("payment_method", "card"),
            ("amount", "1.00"),
        ]));

        assert!(result.is_err());
    }

    #[test]
    fn test_from_fields_bad_amount() {
        let result = Transaction::from_fields(&fields(&[
            ("timestamp", "2026-01-01T00:00:00"),
            ("type", "deposit"),
            ("payment_method", "card"),
            ("amount", "ten"),
        ]));

        assert!(result.is_err());
    }

    #[test]
    fn test_tx_type_strings() {
        assert_eq!(TxType::Deposit.as_str(), "deposit");
        assert_eq!(TxType::Withdrawal.field_name(), "withdrawals");
        assert_eq!("withdrawal".parse::<TxType>().unwrap(), TxType::Withdrawal);
        assert!("Deposit".parse::<TxType>().is_err());
    }
}
