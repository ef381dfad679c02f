use anyhow::Result;
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cost_router::api::{self, AppState};
use cost_router::config::Config;
use cost_router::ledger::UsageLedger;
use cost_router::metrics;
use cost_router::router::Router;

#[derive(Parser)]
#[command(name = "cost-router")]
#[command(about = "Cost-optimized routing gateway for upstream LLM providers", long_about = None)]
struct Cli {
    /// Path to the providers config file
    #[arg(short, long, env = "ROUTER_CONFIG", default_value = "providers.yaml")]
    config: String,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "8000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cost_router=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = shellexpand::tilde(&cli.config).to_string();
    let config = Config::from_file(&config_path)?;
    tracing::info!("loaded config from {}", config_path);
    tracing::info!(
        providers = ?config.providers().iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        "configured providers"
    );

    let ledger = Arc::new(UsageLedger::new(config.usage_log_path()));
    let router = Arc::new(Router::new(
        config.providers().to_vec(),
        ledger.clone(),
        config.http_client(),
    ));
    let state = AppState { router, ledger };

    let app = AxumRouter::new()
        .route("/generate", post(api::generate))
        .route("/stats", get(api::stats))
        .route("/health", get(api::health))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from((cli.host.parse::<std::net::IpAddr>()?, cli.port));
    tracing::info!("cost-router listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
