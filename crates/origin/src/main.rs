//! DCDN origin server binary.

use anyhow::{Context, Result};
use clap::Parser;
use dcdn_core::config::OriginConfig;
use dcdn_origin::{HashCache, OriginState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serve a directory over HTTP with DCDN fingerprint headers.
#[derive(Parser, Debug)]
#[command(name = "dcdn-origind")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DCDN_ORIGIN_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("dcdn-origind v{}", env!("CARGO_PKG_VERSION"));

    let mut figment = Figment::from(Serialized::defaults(OriginConfig::default()));
    if let Some(path) = &args.config {
        tracing::info!(config_path = %path, "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }
    let config: OriginConfig = figment
        .merge(Env::prefixed("DCDN_ORIGIN_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    let cache = Arc::new(
        HashCache::new(&config.dir)
            .await
            .with_context(|| format!("failed to open content directory {}", config.dir.display()))?,
    );
    cache
        .set_algorithm(&config.algorithm)
        .context("invalid fingerprint algorithm")?;
    tracing::info!(
        dir = %config.dir.display(),
        algorithm = %config.algorithm,
        "hash cache initialized"
    );

    let app = create_router(OriginState { cache });

    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
