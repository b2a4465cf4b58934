//! Key naming shared by every component.
//!
//! These strings are part of the wire contract between the importer, the
//! aggregator, the archiver and the query service. A drifted key name is a
//! silent data-loss bug, so no component builds them anywhere else.

use crate::transactions::TxType;

/// Stream the importer appends to and the aggregator consumes from.
pub const STREAM_NAME: &str = "transactions";

/// Consumer group the aggregator reads the stream with.
pub const GROUP_NAME: &str = "aggregators";

/// Set of day strings that have at least one hot aggregate.
pub const TRACKED_DAYS_KEY: &str = "system:tracked_days";

/// Maximum event timestamp ever acknowledged, ISO-8601.
pub const VIRTUAL_CLOCK_KEY: &str = "system:virtual_clock";

const AGG_PREFIX: &str = "agg";

/// Hot aggregate hash for one (day, type) pair: `agg:YYYY-MM-DD:type`.
pub fn agg_key(day: &str, tx_type: TxType) -> String {
    format!("{}:{}:{}", AGG_PREFIX, day, tx_type.as_str())
}

/// Extract the day segment from an aggregate key.
pub fn parse_day(key: &str) -> Option<&str> {
    key.split(':').nth(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agg_key_format() {
        assert_eq!(
            agg_key("2026-01-01", TxType::Deposit),
            "agg:2026-01-01:deposit"
        );
        assert_eq!(
            agg_key("2026-01-01", TxType::Withdrawal),
            "agg:2026-01-01:withdrawal"
        );
    }

    #[test]
    fn test_parse_day_roundtrip() {
        for tx_type in TxType::ALL {
            let key = agg_key("2026-03-15", tx_type);
            assert_eq!(parse_day(&key), Some("2026-03-15"));
        }
    }

    #[test]
    fn test_parse_day_malformed() {
        assert_eq!(parse_day("no-separator"), None);
        assert_eq!(parse_day("agg:2026-01-01"), Some("2026-01-01"));
    }
}
