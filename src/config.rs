//! # Configuration Management
//!
//! This module handles application configuration loading from environment variables
//! and describes the search variants served by the proxy.
//!
//! Every variant is plain data: which provider endpoint to call, how to build its
//! parameters, how to shape the response and which log collection records it.
//! Adding an endpoint means adding a [`SearchVariant`], never a new handler.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::Path;
use url::Url;

/// Placeholder replaced by the caller's query in endpoints and parameter values.
pub const QUERY_PLACEHOLDER: &str = "{query}";

/// Main application configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Environment name (e.g., "development", "production")
    pub environment: String,
    /// Outbound provider settings
    pub upstream: UpstreamConfig,
    /// Where query logs are written
    pub storage: StorageConfig,
    /// Search endpoints exposed by the proxy
    pub variants: Vec<SearchVariant>,
}

/// Settings for the outbound search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Provider base URL that variant endpoints are resolved against
    pub base_url: String,
    /// User-Agent string for provider requests
    pub user_agent: String,
    /// Upper bound for a single provider call, in seconds
    pub timeout_secs: u64,
}

/// Query log storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Azure Cosmos DB document store
    Cosmos(CosmosSettings),
    /// In-process store, lost on restart
    Memory,
}

/// Connection details for the Cosmos DB account holding the query logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct CosmosSettings {
    /// CosmosDB account endpoint URL
    pub endpoint: String,
    /// CosmosDB primary access key
    #[serde(skip_serializing)]
    pub key: String,
    /// CosmosDB database name
    pub database: String,
}

impl fmt::Debug for CosmosSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosmosSettings")
            .field("endpoint", &self.endpoint)
            .field("key", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl CosmosSettings {
    /// Parses a Cosmos DB connection string of the form
    /// `AccountEndpoint=https://...;AccountKey=...;`.
    ///
    /// Keys are matched case-insensitively and unknown segments are ignored.
    /// The account key is base64 and may itself end in `=`, so each segment is
    /// split on the first `=` only.
    pub fn from_connection_string(connection_string: &str, database: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut key = None;

        for segment in connection_string.split(';').map(str::trim) {
            let Some((name, value)) = segment.split_once('=') else {
                continue;
            };
            match name.trim().to_ascii_lowercase().as_str() {
                "accountendpoint" => endpoint = Some(value.trim().to_string()),
                "accountkey" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }

        Ok(Self {
            endpoint: endpoint.context("Connection string is missing AccountEndpoint")?,
            key: key.context("Connection string is missing AccountKey")?,
            database: database.to_string(),
        })
    }
}

/// How a provider response is turned into the `results` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseShape {
    /// Relay the provider's JSON body unchanged
    Verbatim,
    /// Relay the JSON value at a pointer, or `[]` when it is absent
    Pointer { pointer: String },
    /// Relay the provider's body as a string
    Html,
    /// Scrape the HTML body into a structured article
    Article,
}

impl ResponseShape {
    /// Whether the provider body must decode as JSON.
    pub fn expects_json(&self) -> bool {
        matches!(self, Self::Verbatim | Self::Pointer { .. })
    }
}

/// One search endpoint of the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchVariant {
    /// Variant identifier used in logs
    pub name: String,
    /// Path the variant is mounted on, e.g. `/v1/search`
    pub route: String,
    /// Provider path relative to the base URL; may contain `{query}`
    pub endpoint: String,
    /// Provider query parameters; values may contain `{query}`
    #[serde(default)]
    pub params: Vec<(String, String)>,
    /// Response shaping strategy
    pub response: ResponseShape,
    /// Logical collection that successful queries are logged to
    pub collection: String,
}

impl SearchVariant {
    /// Builds the provider URL for `query`.
    ///
    /// Path segments are percent-encoded individually, so a title such as
    /// `Salman Khan` becomes `/wiki/Salman%20Khan`. Parameter values are
    /// form-encoded.
    pub fn request_url(&self, base_url: &str, query: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(base_url)?;

        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(
                self.endpoint
                    .split('/')
                    .filter(|segment| !segment.is_empty())
                    .map(|segment| segment.replace(QUERY_PLACEHOLDER, query)),
            );

        if !self.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.params {
                pairs.append_pair(name, &value.replace(QUERY_PLACEHOLDER, query));
            }
        }

        Ok(url)
    }

    /// Variants mirroring the Wikipedia endpoints the service has always exposed.
    pub fn defaults() -> Vec<Self> {
        fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        }

        vec![
            Self {
                name: "search".to_string(),
                route: "/v1/search".to_string(),
                endpoint: "/w/api.php".to_string(),
                params: params(&[
                    ("action", "query"),
                    ("list", "search"),
                    ("srsearch", QUERY_PLACEHOLDER),
                    ("format", "json"),
                    ("origin", "*"),
                ]),
                response: ResponseShape::Pointer {
                    pointer: "/query/search".to_string(),
                },
                collection: "search-logs".to_string(),
            },
            Self {
                name: "shortSearch".to_string(),
                route: "/v1/shortSearch".to_string(),
                endpoint: "/w/api.php".to_string(),
                params: params(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("prop", "extracts"),
                    ("titles", QUERY_PLACEHOLDER),
                    ("formatversion", "2"),
                    ("exsentences", "10"),
                    ("exlimit", "1"),
                    ("explaintext", "1"),
                ]),
                response: ResponseShape::Verbatim,
                collection: "short-search-logs".to_string(),
            },
            Self {
                name: "longSearchWiki".to_string(),
                route: "/v1/longSearchWiki".to_string(),
                endpoint: "/w/index.php".to_string(),
                params: params(&[("title", QUERY_PLACEHOLDER), ("action", "view")]),
                response: ResponseShape::Html,
                collection: "long-search-logs".to_string(),
            },
            Self {
                name: "longSearch".to_string(),
                route: "/v1/longSearch".to_string(),
                endpoint: "/wiki/{query}".to_string(),
                params: Vec::new(),
                response: ResponseShape::Article,
                collection: "long-search-logs".to_string(),
            },
        ]
    }
}

impl Config {
    /// Creates a new configuration instance from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required (cosmos backend only)
    /// - `COSMOS_CONNECTION_STRING`, or both `AZURE_COSMOS_ENDPOINT` and `AZURE_COSMOS_KEY`
    ///
    /// ## Optional (with defaults)
    /// - `ENVIRONMENT`: Environment name (default: "development")
    /// - `WIKIPEDIA_BASE_URL`: Provider base URL (default: "https://en.wikipedia.org")
    /// - `USER_AGENT`: HTTP User-Agent (default: "WikiSearchProxy/0.1.0")
    /// - `UPSTREAM_TIMEOUT_SECS`: Provider call timeout (default: 10)
    /// - `STORAGE_BACKEND`: "cosmos" or "memory" (default: "cosmos")
    /// - `AZURE_COSMOS_DATABASE_NAME`: Database name (default: "wiki-search")
    /// - `SEARCH_VARIANTS_FILE`: JSON file replacing the default variants
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let upstream = UpstreamConfig {
            base_url: lookup("WIKIPEDIA_BASE_URL")
                .unwrap_or_else(|| "https://en.wikipedia.org".to_string()),
            user_agent: lookup("USER_AGENT")
                .unwrap_or_else(|| "WikiSearchProxy/0.1.0".to_string()),
            timeout_secs: lookup("UPSTREAM_TIMEOUT_SECS")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .context("UPSTREAM_TIMEOUT_SECS must be a valid number")?,
        };
        Url::parse(&upstream.base_url).context("WIKIPEDIA_BASE_URL must be a valid URL")?;

        let backend = lookup("STORAGE_BACKEND").unwrap_or_else(|| "cosmos".to_string());
        let storage = match backend.to_ascii_lowercase().as_str() {
            "memory" => StorageConfig::Memory,
            "cosmos" => {
                let database = lookup("AZURE_COSMOS_DATABASE_NAME")
                    .unwrap_or_else(|| "wiki-search".to_string());
                let settings = match lookup("COSMOS_CONNECTION_STRING") {
                    Some(connection_string) => {
                        CosmosSettings::from_connection_string(&connection_string, &database)?
                    }
                    None => CosmosSettings {
                        endpoint: lookup("AZURE_COSMOS_ENDPOINT").context(
                            "COSMOS_CONNECTION_STRING or AZURE_COSMOS_ENDPOINT is required",
                        )?,
                        key: lookup("AZURE_COSMOS_KEY").context(
                            "COSMOS_CONNECTION_STRING or AZURE_COSMOS_KEY is required",
                        )?,
                        database,
                    },
                };
                StorageConfig::Cosmos(settings)
            }
            other => bail!("STORAGE_BACKEND must be 'cosmos' or 'memory', got '{}'", other),
        };

        let variants = match lookup("SEARCH_VARIANTS_FILE") {
            Some(path) => Self::load_variants(Path::new(&path))?,
            None => SearchVariant::defaults(),
        };
        Self::validate_variants(&variants)?;

        Ok(Config {
            environment,
            upstream,
            storage,
            variants,
        })
    }

    /// Reads a JSON array of [`SearchVariant`] records.
    pub fn load_variants(path: &Path) -> Result<Vec<SearchVariant>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read variants file {}", path.display()))?;
        let variants: Vec<SearchVariant> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse variants file {}", path.display()))?;
        Self::validate_variants(&variants)?;
        Ok(variants)
    }

    /// Replaces the configured variants after validating them.
    pub fn with_variants(mut self, variants: Vec<SearchVariant>) -> Result<Self> {
        Self::validate_variants(&variants)?;
        self.variants = variants;
        Ok(self)
    }

    fn validate_variants(variants: &[SearchVariant]) -> Result<()> {
        if variants.is_empty() {
            bail!("At least one search variant must be configured");
        }

        let mut routes = HashSet::new();
        for variant in variants {
            if !variant.route.starts_with('/') {
                bail!(
                    "Variant '{}' route must start with '/', got '{}'",
                    variant.name,
                    variant.route
                );
            }
            if variant.collection.trim().is_empty() {
                bail!("Variant '{}' has an empty log collection", variant.name);
            }
            if !routes.insert(variant.route.as_str()) {
                bail!("Route '{}' is configured more than once", variant.route);
            }
        }
        Ok(())
    }

    /// Distinct log collections across all variants, in declaration order.
    pub fn log_collections(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.variants
            .iter()
            .filter(|variant| seen.insert(variant.collection.as_str()))
            .map(|variant| variant.collection.clone())
            .collect()
    }

    /// Checks if the application is running in production environment.
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn variant(name: &str) -> SearchVariant {
        SearchVariant::defaults()
            .into_iter()
            .find(|v| v.name == name)
            .unwrap()
    }

    #[test]
    fn test_memory_backend_defaults() {
        let config = Config::from_lookup(lookup_from(&[("STORAGE_BACKEND", "memory")])).unwrap();

        assert_eq!(config.environment, "development");
        assert_eq!(config.upstream.base_url, "https://en.wikipedia.org");
        assert_eq!(config.upstream.timeout_secs, 10);
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.variants.len(), 4);
        assert!(!config.is_production());
    }

    #[test]
    fn test_cosmos_backend_requires_credentials() {
        let result = Config::from_lookup(lookup_from(&[]));
        assert!(result.is_err());

        let config = Config::from_lookup(lookup_from(&[
            ("AZURE_COSMOS_ENDPOINT", "https://acct.documents.azure.com:443/"),
            ("AZURE_COSMOS_KEY", "dGVzdGtleQ=="),
        ]))
        .unwrap();

        match config.storage {
            StorageConfig::Cosmos(settings) => {
                assert_eq!(settings.endpoint, "https://acct.documents.azure.com:443/");
                assert_eq!(settings.key, "dGVzdGtleQ==");
                assert_eq!(settings.database, "wiki-search");
            }
            StorageConfig::Memory => panic!("expected cosmos backend"),
        }
    }

    #[test]
    fn test_connection_string_takes_precedence() {
        let config = Config::from_lookup(lookup_from(&[
            (
                "COSMOS_CONNECTION_STRING",
                "AccountEndpoint=https://conn.documents.azure.com:443/;AccountKey=a2V5PQ==;",
            ),
            ("AZURE_COSMOS_ENDPOINT", "https://ignored.documents.azure.com:443/"),
            ("AZURE_COSMOS_DATABASE_NAME", "logs"),
        ]))
        .unwrap();

        let StorageConfig::Cosmos(settings) = config.storage else {
            panic!("expected cosmos backend");
        };
        assert_eq!(settings.endpoint, "https://conn.documents.azure.com:443/");
        assert_eq!(settings.key, "a2V5PQ==");
        assert_eq!(settings.database, "logs");
    }

    #[test]
    fn test_connection_string_missing_parts() {
        assert!(CosmosSettings::from_connection_string("AccountKey=abc;", "db").is_err());
        assert!(
            CosmosSettings::from_connection_string("AccountEndpoint=https://x/;", "db").is_err()
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let settings = CosmosSettings {
            endpoint: "https://acct".to_string(),
            key: "super-secret".to_string(),
            database: "db".to_string(),
        };
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[
            ("STORAGE_BACKEND", "memory"),
            ("UPSTREAM_TIMEOUT_SECS", "soon"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup_from(&[("STORAGE_BACKEND", "mongo")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("STORAGE_BACKEND", "memory"),
            ("WIKIPEDIA_BASE_URL", "not a url"),
        ]))
        .is_err());
    }

    #[test]
    fn test_search_url_construction() {
        let url = variant("search")
            .request_url("https://en.wikipedia.org", "C++ programming")
            .unwrap();

        assert_eq!(url.path(), "/w/api.php");
        assert_eq!(
            url.query(),
            Some("action=query&list=search&srsearch=C%2B%2B+programming&format=json&origin=*")
        );
    }

    #[test]
    fn test_path_placeholder_is_percent_encoded() {
        let url = variant("longSearch")
            .request_url("https://en.wikipedia.org/", "Salman Khan")
            .unwrap();

        assert_eq!(url.as_str(), "https://en.wikipedia.org/wiki/Salman%20Khan");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_base_url_path_is_preserved() {
        let url = variant("longSearchWiki")
            .request_url("http://127.0.0.1:8080/mirror/", "Humans")
            .unwrap();

        assert_eq!(url.path(), "/mirror/w/index.php");
        assert_eq!(url.query(), Some("title=Humans&action=view"));
    }

    #[test]
    fn test_log_collections_are_deduplicated() {
        let config = Config::from_lookup(lookup_from(&[("STORAGE_BACKEND", "memory")])).unwrap();
        assert_eq!(
            config.log_collections(),
            vec!["search-logs", "short-search-logs", "long-search-logs"]
        );
    }

    #[test]
    fn test_duplicate_routes_are_rejected() {
        let config = Config::from_lookup(lookup_from(&[("STORAGE_BACKEND", "memory")])).unwrap();
        let mut variants = SearchVariant::defaults();
        variants.push(variant("search"));

        assert!(config.clone().with_variants(variants).is_err());
        assert!(config.clone().with_variants(Vec::new()).is_err());
    }

    #[test]
    fn test_variants_file_replaces_defaults() {
        let path = std::env::temp_dir().join(format!("variants-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"[{
                "name": "summary",
                "route": "/v1/summary",
                "endpoint": "/api/rest_v1/page/summary/{query}",
                "response": {"kind": "verbatim"},
                "collection": "summary-logs"
            }]"#,
        )
        .unwrap();

        let config = Config::from_lookup(lookup_from(&[
            ("STORAGE_BACKEND", "memory"),
            ("SEARCH_VARIANTS_FILE", path.to_str().unwrap()),
        ]))
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.variants.len(), 1);
        assert_eq!(config.variants[0].route, "/v1/summary");
        assert!(config.variants[0].params.is_empty());
        assert_eq!(config.variants[0].response, ResponseShape::Verbatim);
    }
}
