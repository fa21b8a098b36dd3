// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `buildscribe serve` command implementation.
//!
//! Wires SQLite storage, the OpenAI-compatible analyst and the engine, then
//! reads NDJSON events from a file or stdin until the input is exhausted or
//! a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use buildscribe_bus::EventBus;
use buildscribe_config::model::BuildscribeConfig;
use buildscribe_core::{BuildscribeError, ConversationStore, EventSource};
use buildscribe_openai::OpenAiAnalyst;
use buildscribe_pipeline::{Engine, NdjsonSource, install_signal_handler};
use buildscribe_storage::SqliteStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runs the `buildscribe serve` command.
pub async fn run_serve(
    config: BuildscribeConfig,
    input: Option<PathBuf>,
) -> Result<(), BuildscribeError> {
    init_tracing(&config.engine.log_level);

    info!(engine = %config.engine.name, "starting buildscribe serve");

    #[cfg(feature = "prometheus")]
    let _prometheus = if config.prometheus.enabled {
        match buildscribe_prometheus::PrometheusAdapter::with_listener(
            &config.prometheus.listen_address,
        ) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!(error = %e, "prometheus initialization failed, continuing without metrics");
                None
            }
        }
    } else {
        None
    };

    let store = open_store(&config).await?;
    let engine = build_engine(&config, store.clone()).await?;

    let max_redeliveries = config.ingest.max_redeliveries;
    let source: Arc<dyn EventSource> = match input {
        Some(path) => Arc::new(NdjsonSource::open(&path, max_redeliveries).await?),
        None => {
            info!("reading events from stdin");
            Arc::new(NdjsonSource::stdin(max_redeliveries))
        }
    };

    let logger = spawn_event_logger(engine.bus());
    let cancel = install_signal_handler();

    let result = engine.run(source, cancel).await;

    logger.abort();
    if let Err(e) = store.close().await {
        warn!(error = %e, "failed to close storage cleanly");
    }

    match &result {
        Ok(()) => info!("buildscribe serve stopped"),
        Err(e) => error!(error = %e, "buildscribe serve stopped with error"),
    }
    result
}

/// Opens and migrates the configured SQLite store.
pub(crate) async fn open_store(
    config: &BuildscribeConfig,
) -> Result<Arc<SqliteStore>, BuildscribeError> {
    if let Some(parent) = std::path::Path::new(&config.storage.database_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| BuildscribeError::Storage { source: e.into() })?;
    }
    let store = SqliteStore::new(config.storage.clone());
    store.initialize().await?;
    Ok(Arc::new(store))
}

/// Wires an engine over `store` with the remote analyst.
pub(crate) async fn build_engine(
    config: &BuildscribeConfig,
    store: Arc<SqliteStore>,
) -> Result<Engine, BuildscribeError> {
    let analyst = OpenAiAnalyst::new(&config.openai).inspect_err(|e| {
        error!(error = %e, "failed to initialize analysis provider");
    })?;
    let store: Arc<dyn ConversationStore> = store;
    Engine::new(config, store, Arc::new(analyst), EventBus::default()).await
}

/// Logs every bus event at debug level.
fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(
                    id = %event.id,
                    kind = event.event.kind(),
                    event = ?event.event,
                    "engine event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Initializes the tracing subscriber. `RUST_LOG` wins over the configured level.
pub(crate) fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("buildscribe={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
