//! busnotify server entry point.
//!
//! Wires the stores, the local bus, the dispatcher and the orchestrator,
//! then serves the administrative API until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use busnotify::api;
use busnotify::app_state::AppState;
use busnotify::bus::LocalBus;
use busnotify::config::{LogFormat, RouterConfig, TransportKind};
use busnotify::engine::{Dispatcher, Orchestrator, OrchestratorError};
use busnotify::service::AdminService;
use busnotify::store::{MemoryStore, PostgresStore, Stores};
use busnotify::transport::{LogTransport, NotificationTransport, WebhookTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = RouterConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    init_tracing(config.log_format);
    tracing::info!(addr = %config.listen_addr, "starting busnotify");

    // Build storage layer
    let stores = if config.persistence_enabled {
        let store = PostgresStore::connect(&config)
            .await
            .context("failed to connect to PostgreSQL")?;
        tracing::info!("using PostgreSQL store");
        Stores::from_backend(&Arc::new(store))
    } else {
        tracing::info!("using in-memory store");
        Stores::from_backend(&Arc::new(MemoryStore::new(config.change_feed_capacity)))
    };

    // Build routing engine
    let bus = LocalBus::new(config.bus_queue_capacity);
    let transport = build_transport(&config)?;
    let dispatcher = Dispatcher::new(
        Arc::clone(&stores.templates),
        transport,
        config.send_timeout(),
    );
    let orchestrator = Orchestrator::new(
        &stores,
        Arc::new(bus.clone()),
        dispatcher,
        config.reconcile_queue_capacity,
    );

    // Build service layer
    let service = AdminService::new(stores, Arc::clone(&orchestrator), bus);
    if config.seed_demo_data {
        service
            .seed_demo_data()
            .await
            .context("failed to seed demo data")?;
    }

    let mut engine = tokio::spawn(Arc::clone(&orchestrator).run());

    // Start server
    let app = api::app(AppState::new(service), config.request_timeout());
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    let outcome = tokio::select! {
        served = server => served.context("server error"),
        stopped = &mut engine => match stopped {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ OrchestratorError::StoreDisconnect)) => {
                Err(anyhow::Error::new(e).context("lost the subscription store"))
            }
            Ok(Err(e)) => Err(anyhow::Error::new(e)),
            Err(e) => Err(anyhow::Error::new(e).context("orchestrator task failed")),
        },
    };

    orchestrator.shutdown().await;
    engine.abort();
    tracing::info!("busnotify stopped");
    outcome
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn build_transport(config: &RouterConfig) -> anyhow::Result<Arc<dyn NotificationTransport>> {
    let transport: Arc<dyn NotificationTransport> = match config.transport {
        TransportKind::Log => Arc::new(LogTransport),
        TransportKind::Webhook => {
            let url = config
                .webhook_url
                .clone()
                .context("NOTIFY_TRANSPORT=webhook requires WEBHOOK_URL")?;
            Arc::new(WebhookTransport::new(url))
        }
    };
    tracing::info!(transport = ?config.transport, "notification transport ready");
    Ok(transport)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
