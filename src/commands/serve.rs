//! The serve command: wires up both stores, spawns the pipeline workers and
//! runs the HTTP API until ctrl-c.

use anyhow::{Context, Result};
use mongodb::bson::Document;
use redis::aio::ConnectionManager;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregator::AggregationWorker;
use crate::archiver::ArchiveWorker;
use crate::config::Settings;
use crate::importer::CsvImporter;
use crate::stream_bus::TransactionStream;
use crate::web::{self, AppState};

pub async fn handle_serve(settings: Settings) -> Result<()> {
    if let Some(port) = settings.metrics_port {
        let handle = crate::metrics::init_metrics();
        tokio::spawn(crate::metrics::start_metrics_server(port, handle));
    }

    // One hot-store connection per role so the aggregator's blocking group
    // reads never sit in front of short archiver or query commands.
    let redis_client = redis::Client::open(settings.redis.url())
        .context("Invalid Redis connection settings")?;
    let producer_conn = connect_redis(&redis_client, "producer").await?;
    let consumer_conn = connect_redis(&redis_client, "consumer").await?;
    let archiver_conn = connect_redis(&redis_client, "archiver").await?;
    let query_conn = connect_redis(&redis_client, "query").await?;

    let mongo_client = mongodb::Client::with_uri_str(&settings.mongo.uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let database = mongo_client.database(&settings.mongo.database);
    let writer_collection = database.collection::<Document>(&settings.mongo.collection);
    let reader_collection = database.collection::<Document>(&settings.mongo.collection);

    let importer = CsvImporter::new(
        &settings.csv_path,
        TransactionStream::new(producer_conn),
        settings.batch_size,
    )?;
    let aggregator = AggregationWorker::new(consumer_conn, "aggregator-1");
    let archiver = ArchiveWorker::new(archiver_conn, writer_collection);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal (Ctrl+C), initiating graceful shutdown...");
                    shutdown.cancel();
                }
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
        });
    }

    let workers = vec![
        spawn_logged("importer", importer.run(shutdown.clone())),
        spawn_logged("aggregator", aggregator.run(shutdown.clone())),
        spawn_logged("archiver", archiver.run(shutdown.clone())),
    ];

    let state = AppState {
        redis: query_conn,
        mongo: reader_collection,
    };
    let server_result = web::start_web_server(
        &settings.http_host,
        settings.http_port,
        state,
        shutdown.clone(),
    )
    .await;

    // The server only returns once shutdown fired (or it failed outright, in
    // which case the workers are told to stop too).
    shutdown.cancel();
    for worker in workers {
        let _ = worker.await;
    }

    info!("System offline");
    server_result
}

async fn connect_redis(client: &redis::Client, role: &str) -> Result<ConnectionManager> {
    ConnectionManager::new(client.clone())
        .await
        .with_context(|| format!("Failed to connect to Redis ({})", role))
}

/// Background tasks fail loudly but never take the process down; the outcome
/// is logged the moment the task finishes.
fn spawn_logged(
    name: &'static str,
    task: impl Future<Output = Result<()>> + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match task.await {
            Ok(()) => info!("Background task {} completed", name),
            Err(e) => error!("Background task {} failed: {:#}", name, e),
        }
    })
}
