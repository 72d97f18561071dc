//! # Storage Service
//!
//! This module provides the query log store. Every successfully forwarded search
//! is appended as one [`QueryLogEntry`] to a logical collection; entries are
//! never updated or removed by this service.
//!
//! ## Key Components
//!
//! - [`QueryLogStore`]: Append-only store abstraction shared by all handlers
//! - [`CosmosQueryLogStore`]: Azure CosmosDB implementation (one container per collection)
//! - [`MemoryQueryLogStore`]: In-process implementation for development and tests
//! - [`StoreError`]: Persistence failures surfaced to the caller of `record`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wiki_search_proxy::{Config, storage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = storage::connect(&config).await?;
//!
//!     // Store is now ready for use
//!     Ok(())
//! }
//! ```

use anyhow::Context;
use async_trait::async_trait;
use azure_data_cosmos::{
    models::{ContainerProperties, PartitionKeyDefinition},
    CosmosClient, PartitionKey,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{CosmosSettings, StorageConfig};
use crate::Config;

/// Azure Cosmos DB REST API version
const COSMOS_API_VERSION: &str = "2018-12-31";

/// Partition key path for every query log container
const QUERY_PARTITION_PATH: &str = "/query";

/// Failures while appending a query log entry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entry rejected: {0}")]
    Rejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("cosmos sdk error: {0}")]
    Sdk(String),
    #[error("cosmos request failed with status {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("cosmos request could not be sent: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to sign cosmos request: {0}")]
    Signing(String),
    #[error("failed to serialize entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One logged search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    /// Document id
    pub id: String,
    /// Query text exactly as the caller sent it
    pub query: String,
    /// When the entry was created
    pub timestamp: DateTime<Utc>,
}

impl QueryLogEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(query: impl Into<String>) -> Self {
        Self::at(query, Utc::now())
    }

    /// Creates an entry with an explicit timestamp.
    pub fn at(query: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            timestamp,
        }
    }
}

/// Append-only persistence for query logs.
///
/// Implementations must tolerate concurrent `record` calls from many requests.
#[async_trait]
pub trait QueryLogStore: Send + Sync {
    /// Appends `entry` to `collection`. Never retries internally.
    async fn record(&self, collection: &str, entry: &QueryLogEntry) -> Result<(), StoreError>;

    /// Short backend name for health reporting.
    fn backend(&self) -> &'static str;
}

fn ensure_query_present(entry: &QueryLogEntry) -> Result<(), StoreError> {
    if entry.query.is_empty() {
        return Err(StoreError::Rejected("query must not be empty".to_string()));
    }
    Ok(())
}

/// Builds the store selected by the configuration and prepares its collections.
pub async fn connect(config: &Config) -> anyhow::Result<Arc<dyn QueryLogStore>> {
    match &config.storage {
        StorageConfig::Memory => {
            info!("💾 STORAGE: Using in-memory query log store");
            Ok(Arc::new(MemoryQueryLogStore::new()))
        }
        StorageConfig::Cosmos(settings) => {
            let store = CosmosQueryLogStore::new(settings.clone(), &config.upstream.user_agent)?;
            store.ensure_collections(&config.log_collections()).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Query log store backed by Azure CosmosDB.
///
/// Writes go through the official SDK first and fall back to the signed REST API
/// when the SDK call fails.
pub struct CosmosQueryLogStore {
    /// HTTP client for the REST fallback
    client: Client,
    /// Azure Cosmos DB client (official SDK)
    cosmos_client: CosmosClient,
    settings: CosmosSettings,
}

impl CosmosQueryLogStore {
    /// Creates the SDK and REST clients. Performs no network I/O.
    pub fn new(settings: CosmosSettings, user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        info!("🚀 STORAGE: Initializing Azure Cosmos DB SDK client");
        let cosmos_client = Self::create_cosmos_client(&settings)?;

        Ok(Self {
            client,
            cosmos_client,
            settings,
        })
    }

    fn create_cosmos_client(settings: &CosmosSettings) -> anyhow::Result<CosmosClient> {
        CosmosClient::with_key(&settings.endpoint, settings.key.clone().into(), None)
            .context("Failed to create Cosmos client with master key")
    }

    /// Ensures the database and one container per collection exist.
    pub async fn ensure_collections(&self, collections: &[String]) -> anyhow::Result<()> {
        self.ensure_database_exists().await?;
        for collection in collections {
            self.ensure_container_exists(collection).await?;
        }
        info!(
            "✅ STORAGE: Cosmos database '{}' ready with {} log collections",
            self.settings.database,
            collections.len()
        );
        Ok(())
    }

    async fn ensure_database_exists(&self) -> anyhow::Result<()> {
        match self
            .cosmos_client
            .create_database(&self.settings.database, None)
            .await
        {
            Ok(_) => {
                info!("Database '{}' created via SDK", self.settings.database);
                return Ok(());
            }
            Err(e) if is_conflict(&e) => {
                debug!("Database '{}' already exists", self.settings.database);
                return Ok(());
            }
            Err(e) => {
                info!(
                    "Database creation via SDK failed: {}. Falling back to REST API",
                    e
                );
            }
        }

        let body = serde_json::json!({ "id": self.settings.database });
        self.rest_post("dbs", "dbs", "", &body, None)
            .await
            .or_else(accept_conflict)
            .with_context(|| format!("Failed to ensure database '{}'", self.settings.database))
    }

    async fn ensure_container_exists(&self, collection: &str) -> anyhow::Result<()> {
        let db_client = self.cosmos_client.database_client(&self.settings.database);
        let properties = ContainerProperties {
            id: collection.to_string().into(),
            partition_key: PartitionKeyDefinition::new(vec![QUERY_PARTITION_PATH.to_string()]),
            ..Default::default()
        };

        match db_client.create_container(properties, None).await {
            Ok(_) => {
                info!("Container '{}' created via SDK", collection);
                return Ok(());
            }
            Err(e) if is_conflict(&e) => {
                debug!("Container '{}' already exists", collection);
                return Ok(());
            }
            Err(e) => {
                info!(
                    "Container creation via SDK failed: {}. Falling back to REST API",
                    e
                );
            }
        }

        let body = serde_json::json!({
            "id": collection,
            "partitionKey": {
                "paths": [QUERY_PARTITION_PATH],
                "kind": "Hash"
            }
        });
        let resource_id = format!("dbs/{}", self.settings.database);
        self.rest_post(
            &format!("{}/colls", resource_id),
            "colls",
            &resource_id,
            &body,
            None,
        )
        .await
        .or_else(accept_conflict)
        .with_context(|| format!("Failed to ensure container '{}'", collection))
    }

    /// Issues a signed REST `POST`. `path` is relative to the account endpoint.
    async fn rest_post(
        &self,
        path: &str,
        resource_type: &str,
        resource_id: &str,
        body: &serde_json::Value,
        partition_key: Option<&str>,
    ) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.settings.endpoint.trim_end_matches('/'), path);
        let date = rfc1123_date(Utc::now());
        let authorization = master_key_authorization(
            "post",
            resource_type,
            resource_id,
            &date,
            &self.settings.key,
        )?;

        let mut request = self
            .client
            .post(&url)
            .header("Authorization", authorization)
            .header("x-ms-date", &date)
            .header("x-ms-version", COSMOS_API_VERSION)
            .json(body);
        if let Some(key) = partition_key {
            request = request.header(
                "x-ms-documentdb-partitionkey",
                serde_json::to_string(&[key])?,
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Http { status, body })
    }
}

#[async_trait]
impl QueryLogStore for CosmosQueryLogStore {
    async fn record(&self, collection: &str, entry: &QueryLogEntry) -> Result<(), StoreError> {
        ensure_query_present(entry)?;

        let container_client = self
            .cosmos_client
            .database_client(&self.settings.database)
            .container_client(collection);

        match container_client
            .create_item(PartitionKey::from(&entry.query), entry, None)
            .await
        {
            Ok(_) => {
                debug!(
                    "Stored query log '{}' in '{}' via SDK",
                    entry.query, collection
                );
                return Ok(());
            }
            Err(e) => {
                debug!(
                    "Query log storage via SDK failed: {}. Falling back to REST API",
                    e
                );
            }
        }

        let resource_id = format!("dbs/{}/colls/{}", self.settings.database, collection);
        let document = serde_json::to_value(entry)?;
        // A conflict means the SDK attempt already created this id.
        self.rest_post(
            &format!("{}/docs", resource_id),
            "docs",
            &resource_id,
            &document,
            Some(&entry.query),
        )
        .await
        .or_else(accept_conflict)
    }

    fn backend(&self) -> &'static str {
        "cosmos"
    }
}

fn is_conflict(error: &impl std::fmt::Debug) -> bool {
    let error_string = format!("{:?}", error);
    error_string.contains("409") || error_string.contains("Conflict")
}

fn accept_conflict(error: StoreError) -> Result<(), StoreError> {
    match error {
        StoreError::Http { status, .. } if status == StatusCode::CONFLICT => Ok(()),
        other => Err(other),
    }
}

/// Formats `now` as an RFC 1123 date for the `x-ms-date` header.
fn rfc1123_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Builds the URL-encoded master key `Authorization` header value.
///
/// The signed payload is `verb\nresourceType\nresourceLink\ndate\n\n` with the
/// verb, resource type and date lowercased.
fn master_key_authorization(
    verb: &str,
    resource_type: &str,
    resource_id: &str,
    date: &str,
    master_key: &str,
) -> Result<String, StoreError> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_id,
        date.to_lowercase()
    );

    let key = base64::engine::general_purpose::STANDARD
        .decode(master_key)
        .map_err(|e| StoreError::Signing(format!("master key is not valid base64: {}", e)))?;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| StoreError::Signing(format!("invalid key length: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    let token = format!("type=master&ver=1.0&sig={}", signature);
    Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
}

/// In-process query log store.
#[derive(Default)]
pub struct MemoryQueryLogStore {
    entries: Mutex<Vec<(String, QueryLogEntry)>>,
    failing: AtomicBool,
}

impl MemoryQueryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `record` call fail with [`StoreError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of all `(collection, entry)` pairs in insertion order.
    pub fn entries(&self) -> Vec<(String, QueryLogEntry)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the entries in one collection.
    pub fn entries_in(&self, collection: &str) -> Vec<QueryLogEntry> {
        self.entries()
            .into_iter()
            .filter(|(name, _)| name == collection)
            .map(|(_, entry)| entry)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueryLogStore for MemoryQueryLogStore {
    async fn record(&self, collection: &str, entry: &QueryLogEntry) -> Result<(), StoreError> {
        ensure_query_present(entry)?;
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store is in failing mode".to_string(),
            ));
        }

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        entries.push((collection.to_string(), entry.clone()));
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
