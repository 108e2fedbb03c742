//! Actor documents
//!
//! An actor is any object whose type is Person, Service, Application,
//! Group, or Organization. The core never stores actors; they are fetched
//! on demand through the [`Fetcher`] and may be cached by the caller.

use crate::backend::Fetcher;
use crate::error::{Error, Result};
use crate::object::{ApObject, ObjectRef};

/// A validated actor document
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    object: ApObject,
}

/// An actor's advertised public key
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKeyDescriptor {
    /// Key IRI, typically `<actor-iri>#main-key`
    pub id: String,
    /// Owning actor IRI
    pub owner: String,
    /// PEM-encoded public key
    pub public_key_pem: String,
}

impl Actor {
    /// Validate an object as an actor document.
    ///
    /// Requires an actor `type`, an `id`, and an `inbox`.
    pub fn from_object(object: ApObject) -> Result<Self> {
        let kind = object.kind().ok_or(Error::MalformedObject { field: "type" })?;
        if !kind.is_actor() {
            return Err(Error::UnexpectedKind {
                expected: "an actor type".to_string(),
                got: object.types().join(", "),
            });
        }
        object.validate()?;
        Ok(Self { object })
    }

    /// Resolve an actor reference, fetching only when given a bare IRI.
    pub async fn resolve(reference: &ObjectRef, fetcher: &dyn Fetcher) -> Result<Self> {
        let object = reference.resolve(fetcher).await?;
        Self::from_object(object)
    }

    /// Fetch an actor by IRI.
    pub async fn fetch(iri: &str, fetcher: &dyn Fetcher) -> Result<Self> {
        let object = fetcher
            .fetch(iri)
            .await
            .map_err(|e| match e {
                Error::NotFound(_) | Error::Gone(_) => Error::UnknownActor(iri.to_string()),
                other => other,
            })?;
        Self::from_object(object)
    }

    pub fn id(&self) -> &str {
        // from_object guarantees id is present
        self.object.id().unwrap_or_default()
    }

    pub fn inbox(&self) -> &str {
        self.object.get_str("inbox").unwrap_or_default()
    }

    pub fn outbox(&self) -> Option<&str> {
        self.object.get_str("outbox")
    }

    /// The actor's followers collection IRI, when advertised.
    pub fn followers(&self) -> Option<&str> {
        self.object.get_str("followers")
    }

    pub fn preferred_username(&self) -> Option<&str> {
        self.object.get_str("preferredUsername")
    }

    /// The shared inbox endpoint, when the actor's server advertises one.
    pub fn shared_inbox(&self) -> Option<&str> {
        self.object
            .get("endpoints")
            .and_then(|endpoints| endpoints.get("sharedInbox"))
            .and_then(serde_json::Value::as_str)
    }

    /// Where deliveries for this actor should be posted.
    ///
    /// Prefers the shared inbox endpoint over the personal inbox.
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox().unwrap_or_else(|| self.inbox())
    }

    /// The actor's `publicKey` descriptor.
    pub fn public_key(&self) -> Result<PublicKeyDescriptor> {
        let key = self
            .object
            .get("publicKey")
            .ok_or(Error::MalformedObject { field: "publicKey" })?;
        descriptor_from_value(key, self.id())
    }

    pub fn as_object(&self) -> &ApObject {
        &self.object
    }

    pub fn into_object(self) -> ApObject {
        self.object
    }
}

fn descriptor_from_value(key: &serde_json::Value, owner_fallback: &str) -> Result<PublicKeyDescriptor> {
    let id = key
        .get("id")
        .and_then(serde_json::Value::as_str)
        .ok_or(Error::MalformedObject { field: "publicKey.id" })?;
    let pem = key
        .get("publicKeyPem")
        .and_then(serde_json::Value::as_str)
        .ok_or(Error::MalformedObject {
            field: "publicKey.publicKeyPem",
        })?;
    let owner = key
        .get("owner")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(owner_fallback);
    Ok(PublicKeyDescriptor {
        id: id.to_string(),
        owner: owner.to_string(),
        public_key_pem: pem.to_string(),
    })
}

/// Resolve a public key by key id.
///
/// Dereferencing a key id may return either the actor document with an
/// embedded `publicKey`, or a bare `Key` object. In both cases the
/// advertised key id must match the requested one; a mismatched or
/// unresolvable key is an authentication failure, not a fetch error.
pub async fn fetch_public_key(
    key_id: &str,
    fetcher: &dyn Fetcher,
) -> Result<PublicKeyDescriptor> {
    let document = fetcher
        .fetch(key_id)
        .await
        .map_err(|e| match e {
            Error::NotFound(_) | Error::Gone(_) | Error::Unreachable(_) => {
                Error::UnknownActor(key_id.to_string())
            }
            other => other,
        })?;

    let descriptor = if document.has_type("Key") {
        let owner = document
            .get_str("owner")
            .ok_or(Error::MalformedObject { field: "owner" })?
            .to_string();
        descriptor_from_value(&document.to_value(), &owner)?
    } else {
        let key = document
            .get("publicKey")
            .ok_or(Error::UnknownActor(key_id.to_string()))?;
        descriptor_from_value(key, document.id().unwrap_or_default())?
    };

    // When a fragment was requested, the actor must advertise exactly
    // that key id.
    if key_id.contains('#') && descriptor.id != key_id {
        return Err(Error::InvalidSignature);
    }

    Ok(descriptor)
}

/// The actor IRI a key id belongs to (the part before the fragment).
pub fn key_owner_iri(key_id: &str) -> &str {
    key_id.split('#').next().unwrap_or(key_id)
}
