//! ActivityPub object model
//!
//! Activities and objects are open JSON maps with a `type` discriminator.
//! [`ApObject`] wraps the raw map and layers typed accessors and
//! validation on top; unknown types and extension keys are preserved so
//! that round-tripping a remote payload never loses fields.

use serde_json::{Map, Value};

use crate::backend::Fetcher;
use crate::error::{Error, Result};

/// The ActivityStreams public addressing marker.
///
/// Signals public visibility; never a deliverable recipient.
pub const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// ActivityStreams JSON-LD context IRI
pub const CTX_ACTIVITYSTREAMS: &str = "https://www.w3.org/ns/activitystreams";

/// Security vocabulary context IRI (publicKey, signature)
pub const CTX_SECURITY: &str = "https://w3id.org/security/v1";

/// Addressing fields, in the order they are unioned during resolution
pub const ADDRESSING_FIELDS: [&str; 5] = ["to", "cc", "bto", "bcc", "audience"];

/// Recognized activity verbs
///
/// The set is closed, with `Unknown` carrying anything an unrecognized
/// remote extension sends. Dispatch is by exhaustive matching; unknown
/// verbs are stored/forwarded, never rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Reject,
    Add,
    Remove,
    Like,
    Announce,
    Undo,
    Block,
    Unknown(String),
}

impl ActivityKind {
    pub fn from_type(s: &str) -> Self {
        match s {
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            "Follow" => Self::Follow,
            "Accept" => Self::Accept,
            "Reject" => Self::Reject,
            "Add" => Self::Add,
            "Remove" => Self::Remove,
            "Like" => Self::Like,
            "Announce" => Self::Announce,
            "Undo" => Self::Undo,
            "Block" => Self::Block,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Undo => "Undo",
            Self::Block => "Block",
            Self::Unknown(other) => other,
        }
    }

    /// Whether the verb is in the recognized (closed) set.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Verbs whose `object` field is required by validation.
    pub fn requires_object(&self) -> bool {
        self.is_recognized()
    }
}

/// Non-verb object types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Person,
    Service,
    Application,
    Group,
    Organization,
    Collection,
    OrderedCollection,
    CollectionPage,
    OrderedCollectionPage,
    Note,
    Article,
    Image,
    Tombstone,
    Other(String),
}

impl ObjectKind {
    pub fn from_type(s: &str) -> Self {
        match s {
            "Person" => Self::Person,
            "Service" => Self::Service,
            "Application" => Self::Application,
            "Group" => Self::Group,
            "Organization" => Self::Organization,
            "Collection" => Self::Collection,
            "OrderedCollection" => Self::OrderedCollection,
            "CollectionPage" => Self::CollectionPage,
            "OrderedCollectionPage" => Self::OrderedCollectionPage,
            "Note" => Self::Note,
            "Article" => Self::Article,
            "Image" => Self::Image,
            "Tombstone" => Self::Tombstone,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_actor(&self) -> bool {
        matches!(
            self,
            Self::Person | Self::Service | Self::Application | Self::Group | Self::Organization
        )
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection | Self::OrderedCollection)
    }

    pub fn is_collection_page(&self) -> bool {
        matches!(self, Self::CollectionPage | Self::OrderedCollectionPage)
    }
}

/// A reference to another object: either a bare IRI or an embedded object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRef {
    Iri(String),
    Embedded(Box<ApObject>),
}

impl ObjectRef {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(iri) => Some(Self::Iri(iri.clone())),
            Value::Object(map) => Some(Self::Embedded(Box::new(ApObject::from_map(map.clone())))),
            _ => None,
        }
    }

    /// The referenced IRI, whether bare or taken from the embedded `id`.
    pub fn iri(&self) -> Option<&str> {
        match self {
            Self::Iri(iri) => Some(iri),
            Self::Embedded(obj) => obj.id(),
        }
    }

    /// Resolve to a full object, fetching only when given a bare IRI.
    pub async fn resolve(&self, fetcher: &dyn Fetcher) -> Result<ApObject> {
        match self {
            Self::Iri(iri) => fetcher.fetch(iri).await,
            Self::Embedded(obj) => Ok((**obj).clone()),
        }
    }
}

/// Convert a single-value-or-array field into a list of values.
///
/// ActivityStreams allows most fields in both forms.
pub fn to_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// A raw ActivityPub object: an open JSON map with typed accessors
///
/// Mutating operations (`with_id`, `with_published`, ...) produce a new
/// snapshot instead of editing in place, so a caller-held reference is
/// never aliased by the processing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ApObject {
    data: Map<String, Value>,
}

impl ApObject {
    /// Parse a raw JSON value; must be a JSON object carrying `type`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::NotAnObject("payload is not a JSON object".into()));
        };
        let obj = Self::from_map(map);
        if obj.get("type").is_none() {
            return Err(Error::MalformedObject { field: "type" });
        }
        Ok(obj)
    }

    /// Parse a raw JSON byte payload.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::NotAnObject(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub(crate) fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// The object `id` IRI; absent for transient/unpublished objects.
    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    /// All `type` tags (an object may carry more than one).
    pub fn types(&self) -> Vec<&str> {
        self.get("type")
            .map(|t| to_list(t).into_iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_type(&self, wanted: &str) -> bool {
        self.types().iter().any(|t| *t == wanted)
    }

    /// The first `type` tag interpreted as an object kind.
    pub fn kind(&self) -> Option<ObjectKind> {
        self.types().first().map(|t| ObjectKind::from_type(t))
    }

    /// The first `type` tag interpreted as an activity verb.
    ///
    /// Returns `None` when the object is not an activity at all (its type
    /// names an actor, collection, or plain object).
    pub fn activity_kind(&self) -> Option<ActivityKind> {
        let first = *self.types().first()?;
        match ObjectKind::from_type(first) {
            ObjectKind::Other(_) => Some(ActivityKind::from_type(first)),
            _ => None,
        }
    }

    pub fn actor_ref(&self) -> Option<ObjectRef> {
        self.get("actor").and_then(ObjectRef::from_value)
    }

    pub fn object_ref(&self) -> Option<ObjectRef> {
        self.get("object").and_then(ObjectRef::from_value)
    }

    /// String entries of one addressing field (`to`, `cc`, `bto`, `bcc`,
    /// `audience`), accepting both single-value and array forms.
    pub fn addressing(&self, field: &str) -> Vec<String> {
        self.get(field)
            .map(|v| {
                to_list(v)
                    .into_iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Union of all addressing fields, duplicates preserved.
    pub fn all_addressing(&self) -> Vec<String> {
        ADDRESSING_FIELDS
            .iter()
            .flat_map(|field| self.addressing(field))
            .collect()
    }

    /// Whether the public marker appears in any addressing field.
    pub fn is_public(&self) -> bool {
        self.all_addressing().iter().any(|iri| iri == AS_PUBLIC)
    }

    /// Validate per-kind required fields.
    ///
    /// Recognized activity verbs require `actor` and `object`; actor
    /// documents require `id` and `inbox`; notes/articles require
    /// `attributedTo`. Unknown types validate trivially (open-world
    /// tolerance).
    pub fn validate(&self) -> Result<()> {
        if self.types().is_empty() {
            return Err(Error::MalformedObject { field: "type" });
        }

        if let Some(verb) = self.activity_kind() {
            if verb.is_recognized() {
                if self.actor_ref().is_none() {
                    return Err(Error::MalformedObject { field: "actor" });
                }
                if verb.requires_object() && self.object_ref().is_none() {
                    return Err(Error::MalformedObject { field: "object" });
                }
            }
            return Ok(());
        }

        match self.kind() {
            Some(kind) if kind.is_actor() => {
                if self.id().is_none() {
                    return Err(Error::MalformedObject { field: "id" });
                }
                if self.get_str("inbox").is_none() {
                    return Err(Error::MalformedObject { field: "inbox" });
                }
            }
            Some(ObjectKind::Note) | Some(ObjectKind::Article) => {
                if self.get("attributedTo").is_none() {
                    return Err(Error::MalformedObject {
                        field: "attributedTo",
                    });
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// New snapshot with `id` assigned.
    pub fn with_id(&self, id: &str) -> Self {
        let mut data = self.data.clone();
        data.insert("id".to_string(), Value::String(id.to_string()));
        Self { data }
    }

    /// New snapshot with `published` assigned if absent.
    pub fn with_published(&self, published: &str) -> Self {
        let mut data = self.data.clone();
        data.entry("published".to_string())
            .or_insert_with(|| Value::String(published.to_string()));
        Self { data }
    }

    /// New snapshot with one field replaced.
    pub fn with_field(&self, key: &str, value: Value) -> Self {
        let mut data = self.data.clone();
        data.insert(key.to_string(), value);
        Self { data }
    }

    /// Strip fields that must never be transmitted to recipients.
    ///
    /// Removes `bto`, `bcc`, and `source` from the activity and from an
    /// embedded Create object.
    pub fn strip_hidden_fields(&self) -> Self {
        let mut data = self.data.clone();
        for field in ["bto", "bcc", "source"] {
            data.remove(field);
        }
        if self.activity_kind() == Some(ActivityKind::Create) {
            if let Some(Value::Object(object)) = data.get_mut("object") {
                for field in ["bto", "bcc", "source"] {
                    object.remove(field);
                }
            }
        }
        Self { data }
    }

    /// Resolve the `actor` field to a full object.
    pub async fn resolve_actor(&self, fetcher: &dyn Fetcher) -> Result<ApObject> {
        let actor = self
            .actor_ref()
            .ok_or(Error::MalformedObject { field: "actor" })?;
        actor.resolve(fetcher).await
    }

    /// Resolve the `object` field to a full object.
    pub async fn resolve_object(&self, fetcher: &dyn Fetcher) -> Result<ApObject> {
        let object = self
            .object_ref()
            .ok_or(Error::MalformedObject { field: "object" })?;
        object.resolve(fetcher).await
    }
}
