//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (optional, TOML)
//! 3. Environment variables (`FEDBOX_*`, override)

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Federation core configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FederationConfig {
    #[serde(default)]
    pub signature: SignatureConfig,
    #[serde(default)]
    pub collections: CollectionConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Which signature scheme(s) authenticate an inbound request
    #[serde(default)]
    pub auth_policy: AuthPolicy,
}

/// Transport signature configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureConfig {
    /// Accepted clock skew for the `Date` header, in seconds
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            clock_skew_secs: default_clock_skew_secs(),
        }
    }
}

fn default_clock_skew_secs() -> u64 {
    300
}

/// Collection expansion limits
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Maximum number of pages fetched for a single collection
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Maximum number of items kept from a single collection
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_items: default_max_items(),
        }
    }
}

fn default_max_pages() -> usize {
    16
}

fn default_max_items() -> usize {
    4096
}

/// Outbound delivery configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum number of concurrent deliveries per outbox post
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

/// Remote fetch configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header sent on outbound fetches
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Allow fetching loopback/private hosts (tests and local development)
    #[serde(default)]
    pub allow_local: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout_secs(),
            allow_local: false,
        }
    }
}

fn default_user_agent() -> String {
    format!("Fedbox/{}", env!("CARGO_PKG_VERSION"))
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

/// Inbound authentication policy
///
/// Selects which signature scheme(s) may authenticate an inbound
/// activity. With `Either`, a request passing either the transport-level
/// or the document-level check is accepted.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthPolicy {
    #[default]
    Either,
    Transport,
    Document,
}

impl FederationConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// # Example
    /// ```ignore
    /// let config = FederationConfig::load(Some(Path::new("config/local.toml")))?;
    /// ```
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("FEDBOX").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
