//! Embedded document signatures
//!
//! Signs an activity's semantic content and embeds the result as a
//! `signature` object inside the document, so the payload stays
//! verifiable after being relayed between servers.
//!
//! Canonicalization is deliberately restricted: JSON with recursively
//! sorted keys and the embedded `signature` member removed. The signature
//! options block (creator + created timestamp) is hashed separately and
//! prepended to the document hash, and the concatenated hex digests are
//! what gets signed. Identical inputs always produce the identical
//! canonical form regardless of key ordering.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::actor::fetch_public_key;
use crate::backend::Fetcher;
use crate::error::{Error, Result};
use crate::key::{verify_with_pem, KeyPair};
use crate::object::{ApObject, CTX_SECURITY};

/// Scheme identifier embedded in the `signature.type` field
pub const SIGNATURE_TYPE: &str = "RsaSignature2017";

/// The embedded `signature` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSignature {
    #[serde(rename = "type")]
    pub signature_type: String,
    /// Signing key IRI
    pub creator: String,
    /// Signature creation timestamp (RFC 3339)
    pub created: String,
    #[serde(rename = "signatureValue")]
    pub signature_value: String,
}

/// Outcome of verifying a document's embedded signature
///
/// An absent `signature` field is not an error; whether to accept an
/// unsigned document is the caller's policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// No `signature` field present
    Unsigned,
    /// Signature checked out against the creator's key
    Verified { creator: String },
}

/// Serialize a JSON value with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are JSON strings; reuse serde's escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// The byte string that actually gets signed: the hex digest of the
/// canonicalized options block followed by the hex digest of the
/// canonicalized document (with `signature` removed).
fn signing_input(document: &Value, creator: &str, created: &str) -> Vec<u8> {
    let mut document = document.clone();
    if let Some(map) = document.as_object_mut() {
        map.remove("signature");
    }

    let options = json!({
        "@context": CTX_SECURITY,
        "creator": creator,
        "created": created,
    });

    let options_hash = sha256_hex(canonical_json(&options).as_bytes());
    let document_hash = sha256_hex(canonical_json(&document).as_bytes());

    format!("{}{}", options_hash, document_hash).into_bytes()
}

/// Sign a document, embedding the `signature` object.
///
/// Returns a new snapshot; the input is untouched.
pub fn generate_signature(activity: &ApObject, key: &KeyPair) -> Result<ApObject> {
    let created = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    generate_signature_at(activity, key, &created)
}

/// Sign a document with an explicit creation timestamp.
pub fn generate_signature_at(
    activity: &ApObject,
    key: &KeyPair,
    created: &str,
) -> Result<ApObject> {
    let creator = key.key_id();
    let input = signing_input(&activity.to_value(), &creator, created);

    let signature = DocumentSignature {
        signature_type: SIGNATURE_TYPE.to_string(),
        creator,
        created: created.to_string(),
        signature_value: key.sign_base64(&input),
    };

    let value = serde_json::to_value(&signature)
        .map_err(|e| Error::Internal(anyhow::anyhow!("signature serialization: {}", e)))?;
    Ok(activity.with_field("signature", value))
}

fn embedded_signature(activity: &ApObject) -> Result<Option<DocumentSignature>> {
    match activity.get("signature") {
        None => Ok(None),
        Some(value) => {
            let signature: DocumentSignature = serde_json::from_value(value.clone())
                .map_err(|_| Error::InvalidSignature)?;
            if signature.signature_type != SIGNATURE_TYPE {
                return Err(Error::InvalidSignature);
            }
            Ok(Some(signature))
        }
    }
}

/// Verify an embedded signature against a known public key PEM.
///
/// Recomputes the canonical form with the *stated* `created` timestamp.
pub fn verify_with_public_key_pem(activity: &ApObject, pem: &str) -> Result<Verification> {
    let Some(signature) = embedded_signature(activity)? else {
        return Ok(Verification::Unsigned);
    };

    let input = signing_input(&activity.to_value(), &signature.creator, &signature.created);
    let raw = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        &signature.signature_value,
    )
    .map_err(|_| Error::InvalidSignature)?;

    verify_with_pem(pem, &input, &raw)?;
    Ok(Verification::Verified {
        creator: signature.creator,
    })
}

/// Verify an embedded signature, resolving the creator's key by IRI.
pub async fn verify_signature(
    activity: &ApObject,
    fetcher: &dyn Fetcher,
) -> Result<Verification> {
    let Some(signature) = embedded_signature(activity)? else {
        return Ok(Verification::Unsigned);
    };

    let key = fetch_public_key(&signature.creator, fetcher).await?;
    verify_with_public_key_pem(activity, &key.public_key_pem)
}
