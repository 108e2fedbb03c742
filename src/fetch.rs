//! Remote object fetching
//!
//! Default [`Fetcher`] implementation over `reqwest`, with URL safety
//! checks to keep attacker-controlled IRIs from reaching loopback or
//! private-network hosts (SSRF), and HTTP status mapping onto the error
//! taxonomy.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::backend::Fetcher;
use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::object::ApObject;

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

/// Validate an IRI before fetching it.
///
/// Rejects non-HTTP(S) schemes and obvious local/private hosts. Set
/// `allow_local` to skip the host check (tests, local development).
pub fn check_url(iri: &str, allow_local: bool) -> Result<()> {
    let parsed = url::Url::parse(iri)
        .map_err(|e| Error::NotAnObject(format!("invalid IRI {}: {}", iri, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::NotAnObject(format!(
                "unsupported IRI scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::NotAnObject(format!("missing host in IRI {}", iri)))?;

    if !allow_local && is_disallowed_host(host) {
        return Err(Error::Unreachable(format!(
            "refusing to fetch local/private host {}",
            host
        )));
    }

    Ok(())
}

/// HTTP fetcher for remote ActivityPub resources
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(e.into()))?;
        Ok(Self { client, config })
    }

    /// Reuse an existing client (connection pools, instrumentation).
    pub fn with_client(client: reqwest::Client, config: FetchConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, iri: &str) -> Result<ApObject> {
        check_url(iri, self.config.allow_local)?;

        let response = self
            .client
            .get(iri)
            .header("Accept", "application/activity+json")
            .send()
            .await
            .map_err(|e| Error::Unreachable(format!("failed to fetch {}: {}", iri, e)))?;

        match response.status().as_u16() {
            404 => return Err(Error::NotFound(iri.to_string())),
            410 => return Err(Error::Gone(iri.to_string())),
            // The resource has no ActivityPub representation.
            406 => return Err(Error::NotAnObject(iri.to_string())),
            status if status >= 400 => {
                return Err(Error::Unreachable(format!(
                    "failed to fetch {}: HTTP {}",
                    iri, status
                )));
            }
            _ => {}
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|_| Error::NotAnObject(format!("{} is not JSON", iri)))?;

        ApObject::from_value(value)
    }
}
