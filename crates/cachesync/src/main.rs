use anyhow::Result;
use cachesync::{
    bus::CacheEventBus,
    config::{BrokerBackend, Config},
    CacheNode,
};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// cachesync - Two-level cache node with cross-process invalidation
#[derive(Parser, Debug)]
#[command(name = "cachesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Service identity stamped on published events
    #[arg(long, short, global = true, env = "SERVICE_NAME")]
    service: Option<String>,

    /// Event transport: memory, pubsub or stream
    #[arg(long, short, global = true, env = "BROKER_BACKEND")]
    backend: Option<BrokerBackend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Listen for cache and domain events until interrupted
    Run,

    /// Publish an EVICT event for one key
    Evict {
        /// Cache name
        #[arg(long, short)]
        cache: String,

        /// Key within the cache
        #[arg(long, short)]
        key: String,

        /// Source identity of the published event
        #[arg(long, default_value = "cachesync-admin")]
        source: String,
    },

    /// Publish a CLEAR event for a whole cache
    Clear {
        /// Cache name
        #[arg(long, short)]
        cache: String,

        /// Source identity of the published event
        #[arg(long, default_value = "cachesync-admin")]
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachesync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env()?;
    if let Some(service) = cli.service {
        // Consumer identity follows the service unless set explicitly.
        if config.consumer_group == config.service_name {
            config.consumer_group = service.clone();
        }
        if config.consumer_name == config.service_name {
            config.consumer_name = service.clone();
        }
        config.service_name = service;
    }
    if let Some(backend) = cli.backend {
        config.broker_backend = backend;
    }

    let node = CacheNode::build(&config).await?;

    match cli.command {
        Command::Run => {
            let subscriptions = node.start_listeners().await?;
            tracing::info!(
                service = %node.service_name(),
                subscriptions = subscriptions.len(),
                "Listening for events"
            );

            shutdown_signal().await;

            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        }
        Command::Evict { cache, key, source } => {
            let bus = CacheEventBus::new(node.cache_broker(), source);
            bus.publish_evict(&cache, &key).await?;
            tracing::info!(cache = %cache, key = %key, "Published EVICT");
        }
        Command::Clear { cache, source } => {
            let bus = CacheEventBus::new(node.cache_broker(), source);
            bus.publish_clear(&cache).await?;
            tracing::info!(cache = %cache, "Published CLEAR");
        }
    }

    node.shutdown().await;
    tracing::info!("Node stopped");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
