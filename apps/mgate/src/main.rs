use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod cli;
mod keys;
mod providers;
mod recorder;

use mgate_core::bridge::StreamBridge;
use mgate_core::caller::{CallerDirectory, MemoryDirectory, OpenDirectory};
use mgate_core::dispatch::Dispatcher;
use mgate_core::recorder::UsageRecorder;
use mgate_core::registry::ProviderRegistry;
use mgate_core::tokens::TokenEstimator;
use mgate_core::upstream::{UpstreamClientConfig, WreqUpstreamClient};
use mgate_router::{GatewayState, gateway_router};

use crate::cli::Cli;
use crate::keys::load_caller_entries;
use crate::providers::providers_from_env;
use crate::recorder::LogRecorder;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("mgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let registry = Arc::new(ProviderRegistry::new(providers_from_env()));
    if registry.is_empty() {
        info!("no providers configured; every call will fail resolution");
    } else {
        info!(providers = registry.len(), "registry ready");
    }

    let directory: Arc<dyn CallerDirectory> = match cli.keys_file.as_deref() {
        Some(path) => {
            let entries = load_caller_entries(Path::new(path))?;
            info!(callers = entries.len(), path = %path, "caller directory loaded");
            Arc::new(MemoryDirectory::new(entries))
        }
        None => {
            info!("no keys file; running open and unmetered");
            Arc::new(OpenDirectory)
        }
    };

    let client = WreqUpstreamClient::new(UpstreamClientConfig {
        proxy: cli.proxy.clone(),
        ..UpstreamClientConfig::default()
    })?;
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(client)));
    let estimator = Arc::new(TokenEstimator::new()?);
    let recorder: Arc<dyn UsageRecorder> = Arc::new(LogRecorder);
    let bridge = Arc::new(StreamBridge::new(
        dispatcher.clone(),
        estimator.clone(),
        recorder.clone(),
    ));

    let app = gateway_router(GatewayState {
        registry,
        dispatcher,
        bridge,
        directory,
        recorder,
        estimator,
    });

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("mgate=info,mgate_core=info,mgate_router=info")
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
