use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use kobs_http::{AppState, Auth};
use kobs_k8s_clusters::Registry;
use kobs_k8s_index::Index;
use kobs_plugins::Dispatcher;

use crate::Config;

#[derive(Debug, Parser)]
#[clap(name = "kobs", about = "An observability aggregator for Kubernetes")]
pub struct Args {
    #[clap(long, default_value = "config.yaml", env = "KOBS_CONFIG")]
    config: String,

    #[clap(long, default_value = "info", env = "KOBS_LOG_LEVEL")]
    log_level: String,

    #[clap(long, default_value = "plain", env = "KOBS_LOG_FORMAT")]
    log_format: LogFormat,

    #[clap(long, default_value = "0.0.0.0:15220", env = "KOBS_API_ADDRESS")]
    api_address: SocketAddr,

    /// How long cached namespace lists stay fresh.
    #[clap(long, default_value = "5m", env = "KOBS_CLUSTERS_CACHE_DURATION")]
    clusters_cache_duration: String,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> anyhow::Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let filter = tracing_subscriber::EnvFilter::try_new(&self.log_level)
            .with_context(|| format!("invalid log level: {}", self.log_level))?;
        match self.log_format {
            LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init(),
        }

        let cache_duration = humantime::parse_duration(&self.clusters_cache_duration)
            .context("invalid clusters cache duration")?;
        let config = Config::load(&self.config)
            .with_context(|| format!("could not load {}", self.config))?;

        let registry = Registry::load(&config.clusters.providers, cache_duration).await?;
        info!(clusters = registry.get_clusters().len(), "loaded clusters");

        let index = Index::new(registry.clone());
        let dispatcher = Dispatcher::new(config.plugins, registry.clone())?;
        let auth = Auth::new(config.auth)?;

        let state = Arc::new(AppState {
            registry,
            index,
            dispatcher,
            auth,
        });

        let listener = tokio::net::TcpListener::bind(self.api_address)
            .await
            .with_context(|| format!("could not bind {}", self.api_address))?;
        info!(address = %self.api_address, "serving the API");

        axum::serve(listener, kobs_http::router(state))
            .with_graceful_shutdown(shutdown())
            .await?;
        Ok(())
    }
}

async fn shutdown() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(sigterm) => sigterm,
        Err(error) => {
            tracing::error!(%error, "could not install the SIGTERM handler");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}
