//! # Wiki Search Proxy - Main Application Entry Point
//!
//! Initializes logging, loads configuration, connects the query log store
//! and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -- --port 3000
//! cargo run -- --variants variants.json
//! ```
//!
//! ## Environment Variables
//!
//! See [`Config::from_env`] for the full list. `STORAGE_BACKEND=memory` runs
//! without a Cosmos DB account.

use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wiki_search_proxy::{create_router, storage, AppState, Args, Config, SearchProxy};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("Starting Wiki Search Proxy on port {}", args.port);

    let mut config = Config::from_env()?;
    if let Some(path) = &args.variants {
        config = config.with_variants(Config::load_variants(path)?)?;
    }
    let config = Arc::new(config);
    info!(
        "Loaded configuration for environment: {} ({} search variants)",
        config.environment,
        config.variants.len()
    );

    // Initialize services
    let store = storage::connect(&config).await?;
    let proxy = Arc::new(SearchProxy::new(&config, store.clone())?);

    for variant in &config.variants {
        info!(
            "Mounted '{}' at {} (logs to '{}')",
            variant.name, variant.route, variant.collection
        );
    }

    let app = create_router(AppState {
        config,
        proxy,
        store,
    })
    .layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", args.port)).await?;
    info!("Server listening on http://0.0.0.0:{}", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
