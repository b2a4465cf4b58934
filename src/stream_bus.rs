//! Thin wrapper around the Redis stream the pipeline rides on.
//!
//! The importer appends rows here; the aggregator reads them back through a
//! durable consumer group. Acknowledgement is issued by the aggregator inside
//! its update pipeline, not here, so a crash cannot ack what it did not apply.

use anyhow::{Context, Result};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::keys;

/// One message pulled from the stream: the server-assigned id plus the row's
/// field map.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

#[derive(Clone)]
pub struct TransactionStream {
    conn: ConnectionManager,
}

impl TransactionStream {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Create the consumer group (and the stream) if they do not exist yet.
    /// A group that already exists is not an error.
    pub async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<String> = conn
            .xgroup_create_mkstream(keys::STREAM_NAME, keys::GROUP_NAME, "0")
            .await;

        match created {
            Ok(_) => {
                info!(
                    "Created consumer group '{}' on stream '{}'",
                    keys::GROUP_NAME,
                    keys::STREAM_NAME
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group '{}' already exists", keys::GROUP_NAME);
                Ok(())
            }
            Err(e) => Err(e).context("Failed to create consumer group"),
        }
    }

    /// Append one row to the stream, field names verbatim. Returns the
    /// server-assigned message id.
    pub async fn append(&self, fields: &[(String, String)]) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(keys::STREAM_NAME, "*", fields)
            .await
            .context("Failed to append transaction to stream")?;
        Ok(id)
    }

    /// One blocking group read of up to `count` new messages. Returns an empty
    /// vec when the block timeout elapses without traffic.
    pub async fn read_group(
        &self,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(keys::GROUP_NAME, consumer)
            .count(count)
            .block(block_ms);

        let reply: StreamReadReply = conn
            .xread_options(&[keys::STREAM_NAME], &[">"], &options)
            .await
            .context("Failed to read from stream group")?;

        let mut messages = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let fields = entry
                    .map
                    .iter()
                    .filter_map(|(name, value)| {
                        redis::from_redis_value::<String>(value)
                            .ok()
                            .map(|v| (name.clone(), v))
                    })
                    .collect();
                messages.push(StreamMessage {
                    id: entry.id.clone(),
                    fields,
                });
            }
        }
        Ok(messages)
    }
}
