//! # Wiki Search Proxy
//!
//! A Rust search proxy that forwards queries to Wikipedia's public APIs and
//! records every successfully forwarded query in a document database.
//!
//! ## Features
//!
//! - **Search Variants**: Several Wikipedia endpoints served by one configurable pipeline
//! - **Query Logging**: Append-only `{query, timestamp}` records per variant collection
//! - **Article Scraping**: Structured extraction of article title, infobox and text
//! - **Azure Integration**: Uses Azure CosmosDB for durable query logs
//! - **REST API**: Small JSON API with fixed error bodies
//!
//! ## Architecture
//!
//! - [`SearchProxy`]: Validates, forwards, logs and shapes one request
//! - [`storage::QueryLogStore`]: Append-only query log persistence
//! - [`Config`]: Application configuration and [`SearchVariant`] records
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use wiki_search_proxy::{create_router, storage, AppState, Config, SearchProxy};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load configuration
//!     let config = Arc::new(Config::from_env()?);
//!
//!     // Initialize services
//!     let store = storage::connect(&config).await?;
//!     let proxy = Arc::new(SearchProxy::new(&config, store.clone())?);
//!
//!     // Create router and start server
//!     let app = create_router(AppState { config, proxy, store });
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
pub mod scrape;
mod search;
pub mod storage;

pub use config::{
    Config, CosmosSettings, ResponseShape, SearchVariant, StorageConfig, UpstreamConfig,
};
pub use search::{ProxyError, SearchProxy, UpstreamError};
pub use storage::{QueryLogEntry, QueryLogStore, StoreError};

/// Command-line arguments for the Wiki Search Proxy application.
#[derive(Parser)]
#[command(name = "wiki-search-proxy")]
#[command(about = "A Wikipedia search proxy that logs queries to Cosmos DB")]
pub struct Args {
    /// Port number to run the HTTP server on
    #[arg(short, long, default_value = "3000")]
    pub port: u16,

    /// JSON file with search variants, replacing the built-in ones
    #[arg(short, long)]
    pub variants: Option<PathBuf>,
}

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Search pipeline
    pub proxy: Arc<SearchProxy>,
    /// Query log store, also held by the proxy
    pub store: Arc<dyn QueryLogStore>,
}

/// Query parameters for search requests.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    /// The search query string
    query: Option<String>,
}

/// Successful search response.
#[derive(Serialize)]
pub struct SearchResponse {
    /// Provider payload, shaped per variant
    results: serde_json::Value,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// Caller-visible errors. Bodies are fixed; details stay in the server log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    MissingQuery,
    Internal,
}

impl ApiError {
    fn status_and_message(self) -> (StatusCode, &'static str) {
        match self {
            Self::MissingQuery => (StatusCode::BAD_REQUEST, "Query parameter is required"),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_message();
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::MissingQuery => Self::MissingQuery,
            ProxyError::Upstream(_) => Self::Internal,
        }
    }
}

/// HTTP handler shared by every search variant.
///
/// # Query Parameters
/// - `query`: Search term (required, must not be empty)
///
/// # Returns
/// - `200 OK`: `{"results": ...}` shaped per variant
/// - `400 Bad Request`: `{"error": "Query parameter is required"}`
/// - `500 Internal Server Error`: `{"error": "Internal server error"}`
///
/// # Example
/// ```text
/// GET /v1/search?query=Humans
/// ```
pub async fn search_handler(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
    variant: Arc<SearchVariant>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Query(params) = params.map_err(|rejection| {
        warn!(
            "Rejected '{}' request with malformed query string: {}",
            variant.name, rejection
        );
        ApiError::MissingQuery
    })?;

    info!(
        "🔍 SEARCH: variant='{}' query={:?}",
        variant.name, params.query
    );

    match state.proxy.handle(&variant, params.query.as_deref()).await {
        Ok(results) => Ok(Json(SearchResponse { results })),
        Err(ProxyError::MissingQuery) => {
            warn!("Rejected '{}' request without a query", variant.name);
            Err(ApiError::MissingQuery)
        }
        Err(e) => {
            warn!("Search failed for variant '{}': {}", variant.name, e);
            Err(e.into())
        }
    }
}

/// HTTP handler for health check operations.
///
/// Always returns `200 OK` with the service status, current timestamp,
/// query log backend and configured search routes.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let routes: Vec<&str> = state
        .config
        .variants
        .iter()
        .map(|variant| variant.route.as_str())
        .collect();

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "service": "wiki-search-proxy",
        "storage": state.store.backend(),
        "routes": routes,
    }))
}

/// Creates the application router.
///
/// - `GET /health` - Health check endpoint
/// - `GET <variant.route>` - One search endpoint per configured variant
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health_handler));

    for variant in &state.config.variants {
        let route = variant.route.clone();
        let variant = Arc::new(variant.clone());
        router = router.route(
            &route,
            get(
                move |state: State<AppState>,
                      params: Result<Query<SearchParams>, QueryRejection>| {
                    search_handler(state, params, variant.clone())
                },
            ),
        );
    }

    router.with_state(state)
}
