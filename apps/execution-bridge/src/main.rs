//! Execution Bridge Binary
//!
//! Receives trading alerts over HTTP and executes them at the broker.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin execution-bridge -- --config config.yaml
//! ```
//!
//! # Environment Variables
//!
//! - `BRIDGE_CONFIG`: config file path when `--config` is absent (default: config.yaml)
//! - `ALPACA_API_KEY` / `ALPACA_API_SECRET`: broker credentials the config leaves blank
//! - `BRIDGE_WEBHOOK_SECRET`: webhook passphrase the config leaves unset
//! - `RUST_LOG`: overrides the configured log level

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use execution_bridge::application::ports::{BrokerPort, PositionViewPort};
use execution_bridge::application::services::{
    ExecutionEngine, ReconciliationEngine, SessionManager, UpdateDispatcher, translator_for,
};
use execution_bridge::application::use_cases::{
    CancelIntentUseCase, IngestAlertUseCase, QueryIntentsUseCase,
};
use execution_bridge::config::{BrokerKind, Config, load_config};
use execution_bridge::domain::order_intent::IntentStore;
use execution_bridge::infrastructure::broker::{AlpacaBroker, SimulatedBroker};
use execution_bridge::infrastructure::http::{AppState, create_router};
use execution_bridge::infrastructure::messaging::TracingEventPublisher;
use execution_bridge::infrastructure::persistence::{InMemoryIntentStore, SqliteIntentStore};
use execution_bridge::observability::{init_logging, init_metrics};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout for background services.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable naming the config file.
const CONFIG_PATH_VAR: &str = "BRIDGE_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS operations; a second
    // install attempt only reports the provider already in place
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let config_path = config_path();
    let config = load_config(config_path.as_deref()).context("loading configuration")?;

    init_logging(&config.logging.level, config.logging.format);
    if config.metrics.enabled {
        init_metrics(&config.metrics.to_metrics_config()).context("starting metrics exporter")?;
        tracing::info!(addr = %config.metrics.listen_addr, "Prometheus exporter listening");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = ?config.broker.kind,
        rules = ?config.ingestion.rules,
        in_memory = config.persistence.in_memory,
        "Starting execution bridge"
    );

    if config.persistence.in_memory {
        tracing::warn!("In-memory intent store: intents will not survive a restart");
        with_broker(config, Arc::new(InMemoryIntentStore::new())).await
    } else {
        let store = SqliteIntentStore::connect(&config.persistence.database_url)
            .await
            .with_context(|| format!("opening {}", config.persistence.database_url))?;
        let store = Arc::new(store);
        let result = with_broker(config, Arc::clone(&store)).await;
        store.close().await;
        result
    }
}

/// Pick the broker adapter and run.
async fn with_broker<S>(config: Config, store: Arc<S>) -> anyhow::Result<()>
where
    S: IntentStore + 'static,
{
    match config.broker.kind {
        BrokerKind::Alpaca => {
            let alpaca = config.broker.to_alpaca_config();
            let broker = AlpacaBroker::new(alpaca).context("creating Alpaca adapter")?;
            tracing::info!(
                environment = %broker.environment(),
                "Alpaca broker initialized for {} trading",
                broker.environment()
            );
            run(config, store, Arc::new(broker)).await
        }
        BrokerKind::Simulated => {
            tracing::warn!("Simulated broker: no orders reach a real brokerage");
            run(config, store, Arc::new(SimulatedBroker::new())).await
        }
    }
}

/// Wire the services, serve HTTP and wait for shutdown.
async fn run<S, B>(config: Config, store: Arc<S>, broker: Arc<B>) -> anyhow::Result<()>
where
    S: IntentStore + 'static,
    B: BrokerPort + 'static,
{
    let shutdown = CancellationToken::new();

    let session = Arc::new(SessionManager::new(
        broker,
        config
            .session
            .to_session_config(config.broker.call_timeout()),
    ));
    let execution_config = config.execution.to_execution_config();
    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&store),
        Arc::clone(&session),
        Arc::new(TracingEventPublisher::new()),
        execution_config,
    ));
    let reconciliation = Arc::new(ReconciliationEngine::new(
        Arc::clone(&store),
        Arc::clone(&session),
        Arc::clone(&engine),
        config
            .reconciliation
            .to_reconciliation_config(execution_config.max_submit_attempts),
    ));
    let positions: Arc<dyn PositionViewPort> = reconciliation.clone();
    let ingest = IngestAlertUseCase::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        translator_for(config.ingestion.rules),
        config.ingestion_config(),
    )
    .with_positions(positions);

    // Background services
    let updates = session
        .take_update_stream()
        .context("taking the session update stream")?;
    let mut tasks = JoinSet::new();
    tasks.spawn(Arc::clone(&session).run(shutdown.clone()));
    tasks.spawn({
        let dispatcher = UpdateDispatcher::new(Arc::clone(&engine), updates);
        let cancel = shutdown.clone();
        async move {
            dispatcher.run(cancel).await;
        }
    });
    tasks.spawn(Arc::clone(&engine).run(shutdown.clone()));
    tasks.spawn(Arc::clone(&reconciliation).run(shutdown.clone()));

    // HTTP
    let state = AppState {
        ingest: Arc::new(ingest),
        cancel: Arc::new(CancelIntentUseCase::new(Arc::clone(&engine))),
        query: Arc::new(QueryIntentsUseCase::new(Arc::clone(&store))),
        session: Arc::clone(&session),
        reconciliation,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let app = create_router(state);
    let listener = TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;

    tracing::info!(addr = %config.server.bind_addr, "HTTP server starting");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  POST /webhook");
    tracing::info!("  GET  /api/v1/intents[/{{id}}]");
    tracing::info!("  POST /api/v1/intents/{{id}}/cancel");
    tracing::info!("  GET  /api/v1/session");
    tracing::info!("  GET  /api/v1/positions");
    tracing::info!("  GET  /api/v1/reconciliation/orphans");
    tracing::info!("  POST /api/v1/reconciliation/run");

    tokio::spawn(shutdown_signal(shutdown.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "HTTP server error");
    }

    // Stop background services
    shutdown.cancel();
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Background task failed");
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background services did not stop in time"
        );
        tasks.abort_all();
    }

    if let Err(e) = session.disconnect().await {
        tracing::warn!(error = %e, "Broker disconnect failed");
    }
    tracing::info!("Execution bridge stopped");
    served.context("serving HTTP")
}

/// `--config <path>`, then `BRIDGE_CONFIG`.
fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    std::env::var(CONFIG_PATH_VAR).ok().filter(|p| !p.is_empty())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
        () = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
