//! # Search Proxy
//!
//! This module forwards validated search queries to the configured provider,
//! records a query log entry for every successful forward and shapes the
//! provider payload for the caller.
//!
//! ## Key Components
//!
//! - [`SearchProxy`]: The request pipeline shared by every search variant
//! - [`ProxyError`]: Caller-visible failure taxonomy (bad request vs upstream failure)
//! - [`UpstreamError`]: Details of a failed provider call, logged but never returned
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wiki_search_proxy::{Config, SearchProxy, storage::MemoryQueryLogStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let proxy = SearchProxy::new(&config, Arc::new(MemoryQueryLogStore::new()))?;
//!
//!     // Perform a search with the first configured variant
//!     let _results = proxy.handle(&config.variants[0], Some("Humans")).await?;
//!     Ok(())
//! }
//! ```

use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ResponseShape, SearchVariant};
use crate::scrape::scrape_article;
use crate::storage::{QueryLogEntry, QueryLogStore};
use crate::Config;

/// Failure of a single provider call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid provider endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider responded with status {0}")]
    Status(StatusCode),
    #[error("provider returned an undecodable body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Terminal failure outcomes of the pipeline.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("query parameter is required")]
    MissingQuery,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Returns the query when it is present and non-empty.
pub fn validate_query(raw_query: Option<&str>) -> Result<&str, ProxyError> {
    match raw_query {
        Some(query) if !query.is_empty() => Ok(query),
        _ => Err(ProxyError::MissingQuery),
    }
}

/// Provider body after a successful call.
#[derive(Debug)]
enum ProviderBody {
    Json(Value),
    Text { body: String, url: String },
}

pub struct SearchProxy {
    client: Client,
    base_url: String,
    store: Arc<dyn QueryLogStore>,
}

impl SearchProxy {
    /// Creates the proxy with a pooled HTTP client bounded by the configured timeout.
    pub fn new(config: &Config, store: Arc<dyn QueryLogStore>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(&config.upstream.user_agent)
            .timeout(Duration::from_secs(config.upstream.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.upstream.base_url.clone(),
            store,
        })
    }

    /// Runs the pipeline for one request and returns the shaped payload.
    ///
    /// The query log write runs in the background; its failure is reported to
    /// the operator log only.
    pub async fn handle(
        &self,
        variant: &SearchVariant,
        raw_query: Option<&str>,
    ) -> Result<Value, ProxyError> {
        let (payload, _log_write) = self.dispatch(variant, raw_query).await?;
        Ok(payload)
    }

    /// Like [`handle`](Self::handle), also returning the pending log write.
    pub(crate) async fn dispatch(
        &self,
        variant: &SearchVariant,
        raw_query: Option<&str>,
    ) -> Result<(Value, JoinHandle<()>), ProxyError> {
        let query = validate_query(raw_query)?;

        let body = self.fetch(variant, query).await.map_err(|e| {
            error!(
                "❌ SEARCH FAILED: variant='{}' query='{}' - {}",
                variant.name, query, e
            );
            ProxyError::Upstream(e)
        })?;

        let log_write = self.schedule_log(&variant.collection, query);
        Ok((shape(&variant.response, body), log_write))
    }

    async fn fetch(
        &self,
        variant: &SearchVariant,
        query: &str,
    ) -> Result<ProviderBody, UpstreamError> {
        let url = variant.request_url(&self.base_url, query)?;
        debug!("🔍 SEARCH API: Sending request to provider at {}", url);

        let start_time = std::time::Instant::now();
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(UpstreamError::Status(status));
        }

        let text = response.text().await?;
        info!(
            "✅ SEARCH RESPONSE: variant='{}' received {} bytes in {}ms",
            variant.name,
            text.len(),
            start_time.elapsed().as_millis()
        );

        if variant.response.expects_json() {
            Ok(ProviderBody::Json(serde_json::from_str(&text)?))
        } else {
            Ok(ProviderBody::Text {
                body: text,
                url: url.to_string(),
            })
        }
    }

    fn schedule_log(&self, collection: &str, query: &str) -> JoinHandle<()> {
        let entry = QueryLogEntry::new(query);
        let collection = collection.to_string();
        let store = self.store.clone();

        tokio::spawn(async move {
            match store.record(&collection, &entry).await {
                Ok(()) => debug!("Logged query '{}' to '{}'", entry.query, collection),
                Err(e) => warn!(
                    "Failed to store query log '{}' in '{}': {}",
                    entry.query, collection, e
                ),
            }
        })
    }
}

fn shape(response: &ResponseShape, body: ProviderBody) -> Value {
    match (response, body) {
        (ResponseShape::Pointer { pointer }, ProviderBody::Json(json)) => json
            .pointer(pointer)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
        (ResponseShape::Article, ProviderBody::Text { body, url }) => {
            serde_json::to_value(scrape_article(&body, &url)).unwrap_or(Value::Null)
        }
        (_, ProviderBody::Json(json)) => json,
        (_, ProviderBody::Text { body, .. }) => Value::String(body),
    }
}
