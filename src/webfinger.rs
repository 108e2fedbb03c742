//! WebFinger account discovery
//!
//! Maps `user@domain` handles to actor IRIs through the well-known JRD
//! discovery document. This module only builds discovery URLs and parses
//! JRD documents; performing the HTTP request is the caller's concern.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A parsed account handle (`user@domain`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    pub username: String,
    pub domain: String,
}

impl Handle {
    /// Parse a handle, accepting `user@domain`, `@user@domain`, and
    /// `acct:user@domain` forms.
    pub fn parse(address: &str) -> Result<Self> {
        let trimmed = address.trim();
        let trimmed = trimmed.strip_prefix("acct:").unwrap_or(trimmed);
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);

        let (username, domain) = trimmed
            .split_once('@')
            .ok_or(Error::MalformedObject { field: "acct" })?;
        if username.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(Error::MalformedObject { field: "acct" });
        }

        Ok(Self {
            username: username.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    /// The `acct:` subject for this handle.
    pub fn subject(&self) -> String {
        format!("acct:{}@{}", self.username, self.domain)
    }

    /// The well-known discovery URL for this handle.
    pub fn discovery_url(&self) -> String {
        format!(
            "https://{}/.well-known/webfinger?resource=acct:{}@{}",
            self.domain, self.username, self.domain
        )
    }
}

/// WebFinger JRD document
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JrdDocument {
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<JrdLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JrdLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

const ACTIVITY_MEDIA_TYPES: [&str; 2] = [
    "application/activity+json",
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"",
];

impl JrdDocument {
    /// Parse a fetched JRD response body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::NotAnObject(format!("invalid JRD document: {}", e)))
    }

    /// The actor IRI advertised by the `self` link.
    pub fn actor_iri(&self) -> Option<&str> {
        self.links
            .iter()
            .filter(|link| link.rel == "self")
            .find(|link| {
                link.link_type
                    .as_deref()
                    .is_some_and(|t| ACTIVITY_MEDIA_TYPES.contains(&t))
            })
            .or_else(|| self.links.iter().find(|link| link.rel == "self"))
            .and_then(|link| link.href.as_deref())
    }
}

/// Build the JRD document served for a local account.
pub fn jrd_for_actor(username: &str, domain: &str, actor_iri: &str) -> JrdDocument {
    JrdDocument {
        subject: format!("acct:{}@{}", username, domain),
        aliases: Some(vec![actor_iri.to_string()]),
        links: vec![
            JrdLink {
                rel: "self".to_string(),
                link_type: Some("application/activity+json".to_string()),
                href: Some(actor_iri.to_string()),
                template: None,
            },
            JrdLink {
                rel: "http://webfinger.net/rel/profile-page".to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(actor_iri.to_string()),
                template: None,
            },
        ],
    }
}
