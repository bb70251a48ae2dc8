//! DCDN cache proxy binary.

use anyhow::{Context, Result};
use clap::Parser;
use dcdn_client::{Client, StaticSelector};
use dcdn_core::HashRegistry;
use dcdn_core::config::ProxyConfig;
use dcdn_proxy::{CacheIndex, ProxyState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

/// Run a DCDN cache proxy.
#[derive(Parser, Debug)]
#[command(name = "dcdn-proxyd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DCDN_PROXY_CONFIG")]
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

    tracing::info!("dcdn-proxyd v{}", env!("CARGO_PKG_VERSION"));

    let mut figment = Figment::from(Serialized::defaults(ProxyConfig::default()));
    if let Some(path) = &args.config {
        tracing::info!(config_path = %path, "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }
    let config: ProxyConfig = figment
        .merge(Env::prefixed("DCDN_PROXY_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    let index = CacheIndex::new(&config.cache_dir)
        .await
        .with_context(|| format!("failed to open cache dir {}", config.cache_dir.display()))?;
    tracing::info!(cache_dir = %config.cache_dir.display(), "cache index initialized");

    let client = Client::new();
    if !config.peers.is_empty() {
        let peers = config
            .peers
            .iter()
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid peer URL {raw}")))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(peers = peers.len(), "using static peer selector");
        client.set_selector(Arc::new(StaticSelector::new(peers)));
    }

    let state = ProxyState {
        index,
        client: Arc::new(client),
        registry: HashRegistry::global(),
    };
    let app = create_router(state);

    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
