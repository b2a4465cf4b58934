//! txstream - transaction stream aggregation pipeline
//!
//! Replays a pre-sorted transactions CSV onto a Redis stream in virtual real
//! time, folds each message into per-day aggregates behind a durable consumer
//! group, ages old days out of Redis into MongoDB, and serves range queries
//! that merge both storage tiers.

pub mod actions;
pub mod aggregator;
pub mod archiver;
pub mod commands;
pub mod config;
pub mod importer;
pub mod keys;
pub mod log_format;
pub mod metrics;
pub mod stats;
pub mod stream_bus;
pub mod transactions;
pub mod web;

pub use aggregator::AggregationWorker;
pub use archiver::ArchiveWorker;
pub use importer::CsvImporter;
pub use stats::StatsService;
pub use stream_bus::TransactionStream;
pub use transactions::{Transaction, TxType};
