//! HTTP Signatures for ActivityPub
//!
//! Transport-level request signing and verification. The canonical
//! signing string concatenates `<lowercased-header-name>: <value>` lines
//! for the headers named by the `Signature` header, in their declared
//! order, with `(request-target)` standing in for the method and path.
//!
//! Error mapping: a missing or garbled `Signature` header is
//! `Unauthorized`, a cryptographic mismatch is `InvalidSignature`, and a
//! `Date` header outside the tolerance window is `StaleSignature`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::actor::{fetch_public_key, key_owner_iri};
use crate::backend::Fetcher;
use crate::config::SignatureConfig;
use crate::error::{Error, Result};
use crate::key::{verify_with_pem, KeyPair};

/// Headers to attach to a signed outgoing request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2822)
    pub date: String,
    /// Digest header value (if a body is present)
    pub digest: Option<String>,
    /// Host header value, derived from the target URL
    pub host: String,
}

/// A serialized activity plus its transport signature, ready for delivery
#[derive(Debug, Clone)]
pub struct SignedPayload {
    /// Serialized activity JSON
    pub body: String,
    /// Signed headers for the POST to the target inbox
    pub headers: SignatureHeaders,
}

/// Sign an outgoing request.
///
/// Builds the canonical string over `(request-target)`, `host`, `date`,
/// and `digest` (when a body is present), signs it with the sender's
/// private key, and returns the headers to attach.
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    key: &KeyPair,
) -> Result<SignatureHeaders> {
    let parsed_url = url::Url::parse(url)
        .map_err(|e| Error::NotAnObject(format!("invalid URL {}: {}", url, e)))?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| Error::NotAnObject(format!("missing host in URL {}", url)))?
        .to_string();

    let path = parsed_url.path();
    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    };

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let digest = body.map(generate_digest);

    let request_target = format!("{} {}", method.to_lowercase(), path_and_query);

    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");
    let signature_b64 = key.sign_base64(signing_string.as_bytes());

    let signature = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key.key_id(),
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature,
        date,
        digest,
        host,
    })
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names, lowercased
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse a Signature header value.
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {} // Ignore unknown fields
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or(Error::Unauthorized)?,
        algorithm: algorithm.unwrap_or_else(|| "rsa-sha256".to_string()),
        headers: headers.ok_or(Error::Unauthorized)?,
        signature: signature.ok_or(Error::Unauthorized)?,
    })
}

/// Extract keyId from the Signature header of an inbound request.
pub fn extract_signature_key_id(headers: &HeaderMap) -> Result<String> {
    let signature_header = headers
        .get("signature")
        .ok_or(Error::Unauthorized)?
        .to_str()
        .map_err(|_| Error::Unauthorized)?;
    Ok(parse_signature_header(signature_header)?.key_id)
}

/// Whether a signature keyId points at the same actor as `actor_id`.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    key_owner_iri(key_id) == key_owner_iri(actor_id)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or(Error::Unauthorized)?
        .to_str()
        .map_err(|_| Error::Unauthorized)
}

/// Verify an inbound request against a known public key.
///
/// Recomputes the canonical string from the *received* headers, checks
/// the `Digest` header against the body, and enforces the `Date`
/// freshness window from `config`.
pub fn verify_request(
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
    config: &SignatureConfig,
) -> Result<()> {
    let signature_header = header_value(headers, "signature")?;
    let parsed = parse_signature_header(signature_header)?;

    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(Error::InvalidSignature);
    }

    // The minimum signed set guards against replaying a signature over a
    // different request.
    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(Error::InvalidSignature);
        }
    }
    if body.is_some() && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(Error::InvalidSignature);
    }

    // Freshness window.
    let date_str = header_value(headers, "date")?;
    let date = DateTime::parse_from_rfc2822(date_str).map_err(|_| Error::Unauthorized)?;
    let skew = (Utc::now().timestamp() - date.timestamp()).unsigned_abs();
    if skew > config.clock_skew_secs {
        return Err(Error::StaleSignature);
    }

    // Body digest.
    if let Some(body_data) = body {
        let digest_str = header_value(headers, "digest")?;
        if digest_str != generate_digest(body_data) {
            return Err(Error::InvalidSignature);
        }
    }

    // Reconstruct the canonical string from the received headers.
    let mut signing_parts = Vec::new();
    for header_name in &parsed.headers {
        let line = if header_name == "(request-target)" {
            format!("(request-target): {} {}", method.to_lowercase(), path)
        } else {
            format!("{}: {}", header_name, header_value(headers, header_name)?)
        };
        signing_parts.push(line);
    }
    let signing_string = signing_parts.join("\n");

    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| Error::InvalidSignature)?;

    verify_with_pem(public_key_pem, signing_string.as_bytes(), &signature_bytes)
}

/// Verify an inbound request, resolving the public key by its keyId.
///
/// Returns the IRI of the actor owning the key on success. Fails with
/// `UnknownActor` when the key cannot be resolved.
pub async fn verify_request_with_fetcher(
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: Option<&[u8]>,
    fetcher: &dyn Fetcher,
    config: &SignatureConfig,
) -> Result<String> {
    let key_id = extract_signature_key_id(headers)?;
    let key = fetch_public_key(&key_id, fetcher).await?;
    verify_request(method, path, headers, body, &key.public_key_pem, config)?;
    Ok(key.owner)
}

/// Generate the SHA-256 digest header value for a body.
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("SHA-256={}", BASE64.encode(hasher.finalize()))
}
