//! Outbox pipeline
//!
//! Drives a locally authored activity through validation, enrichment,
//! backend side effects, recipient resolution, and delivery:
//!
//! constructed -> validated -> enriched -> side-effects-applied
//!             -> recipients-resolved -> delivered (delegated)
//!
//! A validation failure halts before any backend call, so malformed
//! input never causes partial side effects.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::actor::Actor;
use crate::backend::{Backend, Fetcher};
use crate::config::FederationConfig;
use crate::error::{Error, Result};
use crate::key::KeyPair;
use crate::object::{ActivityKind, ApObject, ObjectRef};
use crate::recipients::{DeliveryTarget, RecipientResolver};
use crate::signature::{sign_request, SignedPayload};

/// Result of a delivery attempt to one recipient
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Recipient actor IRI
    pub recipient: String,
    /// Target inbox URI
    pub inbox: String,
    /// Whether delivery succeeded
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
}

/// Outcome of a successful outbox post
#[derive(Debug)]
pub struct OutboxReceipt {
    /// The enriched activity snapshot, as published
    pub activity: ApObject,
    /// Resolved recipient actor IRIs
    pub recipients: BTreeSet<String>,
    /// Per-recipient delivery outcomes; a failed delivery to one
    /// recipient never cancels the others
    pub deliveries: Vec<DeliveryResult>,
}

/// Outbox processor
pub struct Outbox {
    backend: Arc<dyn Backend>,
    fetcher: Arc<dyn Fetcher>,
    config: FederationConfig,
}

impl Outbox {
    pub fn new(
        backend: Arc<dyn Backend>,
        fetcher: Arc<dyn Fetcher>,
        config: FederationConfig,
    ) -> Self {
        Self {
            backend,
            fetcher,
            config,
        }
    }

    /// Post an activity as `as_actor`.
    ///
    /// A plain object (a Note, an Article) is wrapped in a Create first.
    /// The activity must belong to `as_actor`; posting someone else's
    /// activity fails with `Unauthorized`.
    pub async fn post(
        &self,
        as_actor: &Actor,
        key: &KeyPair,
        activity: ApObject,
    ) -> Result<OutboxReceipt> {
        let activity = if activity.activity_kind().is_none() {
            builder::create_from_object(as_actor.id(), &activity)
        } else {
            activity
        };

        activity.validate()?;

        let actor_iri = activity
            .actor_ref()
            .and_then(|a| a.iri().map(str::to_string))
            .ok_or(Error::MalformedObject { field: "actor" })?;
        if actor_iri != as_actor.id() {
            tracing::warn!(
                actor = %actor_iri,
                outbox = %as_actor.id(),
                "rejecting post into another actor's outbox"
            );
            return Err(Error::Unauthorized);
        }

        let activity = self.enrich(as_actor, activity);
        let verb = activity
            .activity_kind()
            .unwrap_or_else(|| ActivityKind::Unknown(String::new()));

        // Outbound Undo/Delete/Update must reference something we own.
        if matches!(
            verb,
            ActivityKind::Undo | ActivityKind::Delete | ActivityKind::Update
        ) && !self.backend.owns_activity(as_actor, &activity).await?
        {
            return Err(Error::NotFromOutbox(
                activity.id().unwrap_or_default().to_string(),
            ));
        }

        self.apply_side_effects(as_actor, &activity, &verb).await?;

        let resolver =
            RecipientResolver::new(&*self.backend, &*self.fetcher, &self.config.collections);
        let resolution = resolver.resolve(as_actor, &activity).await?;
        let targets = resolver.delivery_targets(as_actor, &resolution).await;

        let deliveries = self
            .deliver(as_actor, key, &activity, targets)
            .await;

        Ok(OutboxReceipt {
            recipients: resolution.recipients().clone(),
            activity,
            deliveries,
        })
    }

    /// Assign a fresh id and `published` timestamp on a new snapshot.
    fn enrich(&self, as_actor: &Actor, activity: ApObject) -> ApObject {
        let object_id = self.backend.random_object_id();
        let iri = self.backend.activity_iri(&object_id);
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let mut enriched = activity.with_id(&iri).with_published(&now);

        // A Create mirrors identity and timestamp onto its embedded object.
        if enriched.activity_kind() == Some(ActivityKind::Create) {
            if let Some(Value::Object(mut object)) = enriched.get("object").cloned() {
                object
                    .entry("id".to_string())
                    .or_insert_with(|| Value::String(format!("{}/activity", iri)));
                object
                    .entry("attributedTo".to_string())
                    .or_insert_with(|| Value::String(as_actor.id().to_string()));
                object
                    .entry("published".to_string())
                    .or_insert_with(|| Value::String(now.clone()));
                enriched = enriched.with_field("object", Value::Object(object));
            }
        }

        enriched
    }

    async fn apply_side_effects(
        &self,
        as_actor: &Actor,
        activity: &ApObject,
        verb: &ActivityKind,
    ) -> Result<()> {
        self.backend.outbox_new(as_actor, activity).await?;

        match verb {
            ActivityKind::Create => self.backend.outbox_create(as_actor, activity).await,
            ActivityKind::Update => self.backend.outbox_update(as_actor, activity).await,
            ActivityKind::Delete => self.backend.outbox_delete(as_actor, activity).await,
            ActivityKind::Follow => self.backend.outbox_follow(as_actor, activity).await,
            ActivityKind::Like => self.backend.outbox_like(as_actor, activity).await,
            ActivityKind::Announce => self.backend.outbox_announce(as_actor, activity).await,
            ActivityKind::Undo => {
                let Some(wrapped) = self.resolve_wrapped(activity).await else {
                    return Err(Error::MalformedObject { field: "object" });
                };
                match wrapped.activity_kind() {
                    Some(ActivityKind::Follow) => {
                        self.backend.outbox_undo_follow(as_actor, &wrapped).await
                    }
                    Some(ActivityKind::Like) => {
                        self.backend.outbox_undo_like(as_actor, &wrapped).await
                    }
                    Some(ActivityKind::Announce) => {
                        self.backend.outbox_undo_announce(as_actor, &wrapped).await
                    }
                    _ => Ok(()),
                }
            }
            ActivityKind::Accept | ActivityKind::Reject => {
                // An Accept/Reject of a follow request records the outcome.
                let Some(wrapped) = self.resolve_wrapped(activity).await else {
                    return Err(Error::MalformedObject { field: "object" });
                };
                if wrapped.activity_kind() != Some(ActivityKind::Follow) {
                    return Ok(());
                }
                if *verb == ActivityKind::Accept {
                    self.backend.outbox_accept_follow(as_actor, &wrapped).await
                } else {
                    self.backend.outbox_reject_follow(as_actor, &wrapped).await
                }
            }
            // Block and unrecognized verbs only hit the generic hook above.
            _ => Ok(()),
        }
    }

    async fn resolve_wrapped(&self, activity: &ApObject) -> Option<ApObject> {
        match activity.object_ref()? {
            ObjectRef::Embedded(object) => Some(*object),
            ObjectRef::Iri(iri) => match self.fetcher.fetch(&iri).await {
                Ok(object) => Some(object),
                Err(e) => {
                    tracing::debug!(%iri, error = %e, "could not resolve wrapped activity");
                    None
                }
            },
        }
    }

    /// Sign and hand the payload to the backend for each target inbox,
    /// in parallel under the configured concurrency limit.
    async fn deliver(
        &self,
        as_actor: &Actor,
        key: &KeyPair,
        activity: &ApObject,
        targets: Vec<DeliveryTarget>,
    ) -> Vec<DeliveryResult> {
        let cleaned = activity.strip_hidden_fields();
        let body = cleaned.to_value().to_string();

        tracing::info!(
            activity = activity.id().unwrap_or_default(),
            targets = targets.len(),
            "delivering activity"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.delivery.max_concurrent.max(1)));
        let mut tasks = Vec::new();

        for target in targets {
            let semaphore = semaphore.clone();
            let backend = self.backend.clone();
            let as_actor = as_actor.clone();
            let key = key.clone();
            let body = body.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;

                let result = async {
                    let headers =
                        sign_request("POST", &target.inbox, Some(body.as_bytes()), &key)?;
                    let payload = SignedPayload {
                        body: body.clone(),
                        headers,
                    };
                    backend
                        .post_to_remote_inbox(&as_actor, &payload, &target.inbox)
                        .await
                }
                .await;

                match result {
                    Ok(()) => {
                        tracing::debug!(inbox = %target.inbox, "delivered");
                        DeliveryResult {
                            recipient: target.recipient,
                            inbox: target.inbox,
                            success: true,
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(inbox = %target.inbox, error = %e, "delivery failed");
                        DeliveryResult {
                            recipient: target.recipient,
                            inbox: target.inbox,
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }));
        }

        let results: Vec<DeliveryResult> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter_map(|task| task.ok())
            .collect();

        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(
            delivered = results.len() - failed,
            failed,
            "delivery complete"
        );

        results
    }
}

/// Build ActivityPub activity JSON
///
/// Ids and `published` timestamps are assigned by the outbox on post;
/// builders only shape the payload.
pub mod builder {
    use super::*;
    use crate::object::ADDRESSING_FIELDS;

    fn from_json(value: Value) -> ApObject {
        match value {
            Value::Object(map) => ApObject::from_map(map),
            _ => unreachable!("builders always produce JSON objects"),
        }
    }

    /// Build a Follow activity
    pub fn follow(actor: &str, object: &str) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Follow",
            "actor": actor,
            "object": object
        }))
    }

    /// Build an Accept activity wrapping another activity (usually a Follow)
    pub fn accept(actor: &str, object: Value) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Accept",
            "actor": actor,
            "object": object
        }))
    }

    /// Build a Reject activity.
    pub fn reject(actor: &str, object: Value) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Reject",
            "actor": actor,
            "object": object
        }))
    }

    /// Build a Create activity
    pub fn create(actor: &str, object: Value, to: Vec<&str>, cc: Vec<&str>) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Create",
            "actor": actor,
            "object": object,
            "to": to,
            "cc": cc
        }))
    }

    /// Wrap a plain object in a Create, mirroring its addressing fields.
    pub fn create_from_object(actor: &str, object: &ApObject) -> ApObject {
        let attributed_to = object.get_str("attributedTo").unwrap_or(actor);
        let mut payload = serde_json::Map::new();
        payload.insert(
            "@context".to_string(),
            json!("https://www.w3.org/ns/activitystreams"),
        );
        payload.insert("type".to_string(), json!("Create"));
        payload.insert("actor".to_string(), json!(attributed_to));
        payload.insert("object".to_string(), object.to_value());
        for field in ADDRESSING_FIELDS
            .iter()
            .copied()
            .chain(std::iter::once("published"))
        {
            if let Some(value) = object.get(field) {
                payload.insert(field.to_string(), value.clone());
            }
        }
        ApObject::from_map(payload)
    }

    /// Build a Delete activity with a Tombstone for the deleted object
    pub fn delete(actor: &str, object: &str, to: Vec<&str>, cc: Vec<&str>) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Delete",
            "actor": actor,
            "object": {
                "type": "Tombstone",
                "id": object
            },
            "to": to,
            "cc": cc
        }))
    }

    /// Build a Like activity
    pub fn like(actor: &str, object: &str) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Like",
            "actor": actor,
            "object": object
        }))
    }

    /// Build an Announce activity (boost)
    pub fn announce(actor: &str, object: &str, to: Vec<&str>, cc: Vec<&str>) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Announce",
            "actor": actor,
            "object": object,
            "to": to,
            "cc": cc
        }))
    }

    /// Build an Undo activity wrapping a previously published one
    pub fn undo(actor: &str, object: Value) -> ApObject {
        from_json(json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Undo",
            "actor": actor,
            "object": object
        }))
    }

    /// Build a Note object
    pub fn note(attributed_to: &str, content: &str, to: Vec<&str>, cc: Vec<&str>) -> ApObject {
        from_json(json!({
            "type": "Note",
            "attributedTo": attributed_to,
            "content": content,
            "to": to,
            "cc": cc,
            "sensitive": false
        }))
    }
}
