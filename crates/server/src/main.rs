//! tonindex server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Serialized};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonindex_core::Config;
use tonindex_ingest::ToncenterClient;
use tonindex_metadata::MetadataStore;
use tonindex_server::resolve::{SiteResolver, StaticResolver};
use tonindex_server::{AppState, Checker, Crawler, create_api_router, create_gateway_router};
use tonindex_storage::BagProvider;
use tonindex_storage::memory::MemoryBagConnector;
use tonindex_transport::memory::MemoryNetwork;
use tonindex_transport::{RldpConnector, WireCodec};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variables the process reads.
const ENV_KEYS: &[&str] = &[
    "API_LISTEN",
    "GATEWAY_LISTEN",
    "TON_CONFIG_URL",
    "BAG_TTL",
    "DATABASE_URL",
    "TONCENTER_URL",
    "TONCENTER_KEY",
    "DOMAIN_SOURCES",
    "NETWORK",
];

const CHECKER_WORKERS: usize = 100;
const CHECKER_STALE: Duration = Duration::from_secs(2 * 3600);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// tonindex - indexing gateway for TON sites
#[derive(Parser, Debug)]
#[command(name = "tonindexd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Print the resolved configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("tonindex v{}", env!("CARGO_PKG_VERSION"));

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(
            Env::raw()
                .only(ENV_KEYS)
                .map(|key| key.as_str().to_lowercase().into()),
        )
        .extract()
        .context("failed to load configuration")?;
    let sources = config
        .sources()
        .context("invalid DOMAIN_SOURCES configuration")?;

    if args.check_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let store: Arc<dyn MetadataStore> = Arc::new(
        tonindex_metadata::connect(&config.database_url)
            .await
            .context("failed to connect to the metadata store")?,
    );
    store
        .health_check()
        .await
        .context("metadata store health check failed")?;
    tracing::info!("metadata store initialized");

    // The overlay stack (datagram substrate, DHT, on-chain resolver, piece
    // downloader) plugs in at these seams; the in-tree backend is the
    // in-memory loopback.
    if config.network != "memory" {
        anyhow::bail!(
            "unknown network backend {:?}: only \"memory\" ships in-tree",
            config.network
        );
    }
    tracing::warn!("memory network backend selected; no overlay peers are reachable");
    let network = MemoryNetwork::new();
    let seeder = MemoryBagConnector::new();
    let resolver: Arc<dyn SiteResolver> = Arc::new(StaticResolver::new());

    let bags = BagProvider::new(Arc::new(seeder.clone()), config.bag_ttl());
    bags.start();
    let codec = Arc::new(WireCodec::new());
    let rldp = RldpConnector::new(
        Arc::new(network.clone()),
        Arc::new(network.clone()),
        codec,
    );

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        config.clone(),
        store.clone(),
        bags.clone(),
        rldp.clone(),
        resolver.clone(),
        shutdown.clone(),
    );

    let toncenter = ToncenterClient::new(&config.toncenter_url, &config.toncenter_key);
    let crawler = Crawler::new(store.clone(), toncenter);
    crawler
        .start(shutdown.child_token(), sources.clone())
        .await
        .context("failed to start crawler")?;
    tracing::info!(sources = sources.len(), "crawler started");

    let checker = Checker::new(
        store.clone(),
        resolver.clone(),
        bags.clone(),
        rldp.clone(),
        CHECKER_STALE,
    );
    checker.start(shutdown.child_token(), CHECKER_WORKERS);
    tracing::info!(workers = CHECKER_WORKERS, "checker started");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        });
    }

    let api_listener = TcpListener::bind(&config.api_listen)
        .await
        .with_context(|| format!("failed to bind api to {}", config.api_listen))?;
    tracing::info!(addr = %config.api_listen, "api is now listening");
    let gateway_listener = TcpListener::bind(&config.gateway_listen)
        .await
        .with_context(|| format!("failed to bind gateway to {}", config.gateway_listen))?;
    tracing::info!(addr = %config.gateway_listen, "gateway is now listening");

    let api = axum::serve(api_listener, create_api_router(state.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let gateway = axum::serve(gateway_listener, create_gateway_router(state.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let drain = async { tokio::try_join!(api, gateway) };
    tokio::select! {
        result = drain => {
            result.context("server error")?;
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(DRAIN_TIMEOUT).await;
        } => {
            tracing::warn!(timeout = ?DRAIN_TIMEOUT, "servers did not drain in time");
        }
    }

    bags.close();
    tracing::info!("bye bye");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
