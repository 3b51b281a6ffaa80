pub mod absolute_numbering;
pub mod api;
pub mod availability;
pub mod background;
pub mod config;
pub mod constants;
pub mod db;
pub mod domain;
pub mod entities;
pub mod fetcher;
pub mod metadata;
pub mod resolver;
pub mod scheduler;
pub mod sites;
pub mod specials;
pub mod state;
pub mod strm;
pub mod title_index;

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use config::Config;
use state::SharedState;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    run_with_config(config).await
}

pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let prometheus_handle = init_prometheus(&config)?;
    init_logging(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "AniBridge starting");

    let shared = Arc::new(SharedState::new(config.clone(), prometheus_handle).await?);

    let recovered = shared.scheduler.recover_and_start().await?;
    if recovered > 0 {
        info!(count = recovered, "recovered interrupted jobs on startup");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background_handles = background::spawn_all(Arc::clone(&shared), shutdown_rx).await;

    let app_state = api::create_app_state(Arc::clone(&shared)).await;
    let app = api::router(app_state).await;

    let listen_addr = config.server.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!(addr = %listen_addr, "HTTP server listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(err) = server.await {
        error!(%err, "HTTP server error");
    }

    let _ = shutdown_tx.send(true);
    for handle in background_handles {
        handle.abort();
    }

    shared.scheduler.shutdown().await;
    info!("AniBridge stopped");

    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => error!(%err, "error listening for shutdown signal"),
    }
}

fn init_prometheus(config: &Config) -> anyhow::Result<Option<metrics_exporter_prometheus::PrometheusHandle>> {
    if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus recorder")?;
        Ok(Some(handle))
    } else {
        Ok(None)
    }
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    let use_json = config.observability.loki_url.is_some() || config.observability.log_format == "json";

    if use_json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false);

        if let Some(loki_url) = &config.observability.loki_url {
            let url = url::Url::parse(loki_url).context("invalid LOKI_URL")?;
            let (loki_layer, task) = tracing_loki::builder()
                .label("app", "anibridge")?
                .extra_field("version", env!("CARGO_PKG_VERSION"))?
                .build_url(url)?;

            tokio::spawn(task);
            registry.with(fmt_layer).with(loki_layer).init();
            info!(url = %loki_url, "Loki logging initialized");
        } else {
            registry.with(fmt_layer).init();
        }
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }

    Ok(())
}
