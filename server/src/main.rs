//! Commerce HTTP server.

use commerce_core::environment::{Clock, SystemClock};
use commerce_postgres::PostgresStore;
use commerce_server::{Config, LogNotifier, build_state};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired rate-limit windows are deleted.
const COUNTER_PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,commerce=debug,sqlx=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting commerce server");

    let config = Config::from_env();
    info!(
        http = %format!("{}:{}", config.server.host, config.server.port),
        metrics_port = config.server.metrics_port,
        stripe = config.stripe.is_some(),
        paypal = config.paypal.is_some(),
        "Configuration loaded"
    );

    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr()?)
        .install()?;
    info!(addr = %config.metrics_addr()?, "Metrics exporter listening");

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await?;
    info!("PostgreSQL connected");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(PostgresStore::new(pool).with_clock(clock.clone()));
    store.migrate().await?;
    info!("Migrations complete");

    let http = reqwest::Client::builder()
        .timeout(config.provider_timeout())
        .build()?;
    let state = build_state(
        &config,
        store.clone(),
        store.clone(),
        clock.clone(),
        Arc::new(LogNotifier),
        &http,
    );

    spawn_counter_purge(store, clock);

    let addr = config.http_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let stop = Arc::new(Notify::new());
    let stopped = stop.clone();
    let mut server = tokio::spawn(
        axum::serve(listener, commerce_web::router(state))
            .with_graceful_shutdown(async move { stopped.notified().await })
            .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            result??;
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    stop.notify_one();
    match tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout), server).await {
        Ok(result) => result??,
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Shutdown timed out with requests in flight"
        ),
    }

    info!("Server stopped");
    Ok(())
}

fn spawn_counter_purge(store: Arc<PostgresStore>, clock: Arc<dyn Clock>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(COUNTER_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_rate_limit_counters(clock.now()).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired rate-limit counters"),
                Err(e) => error!(error = %e, "Rate-limit counter purge failed"),
            }
        }
    });
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
