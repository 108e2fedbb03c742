//! Inbox pipeline
//!
//! Authenticates, validates, and applies an inbound activity:
//! signature verification runs before any parsing side effects, and no
//! backend hook fires until the sender is authenticated and resolved.
//!
//! Drops are not errors: activities from blocked actors and duplicate
//! deliveries are discarded silently (logged), mirroring how federation
//! peers expect an inbox to behave.

use std::sync::Arc;

use http::HeaderMap;

use crate::actor::Actor;
use crate::backend::{Backend, Fetcher};
use crate::config::{AuthPolicy, FederationConfig};
use crate::error::{Error, Result};
use crate::key::KeyPair;
use crate::ldsig;
use crate::object::{ActivityKind, ApObject, ObjectKind, ObjectRef};
use crate::outbox::{builder, Outbox};
use crate::signature::{key_id_matches_actor, verify_request_with_fetcher};

/// A raw inbound HTTP request, as the embedding server received it
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

/// How an inbound activity was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    /// Backend side effects were applied
    Processed,
    /// Discarded without side effects (blocked actor, duplicate, ...)
    Dropped,
}

/// Outcome of receiving an inbound payload
#[derive(Debug)]
pub struct InboxReceipt {
    /// The parsed activity
    pub activity: ApObject,
    pub outcome: InboxOutcome,
}

/// Inbox processor
pub struct Inbox {
    backend: Arc<dyn Backend>,
    fetcher: Arc<dyn Fetcher>,
    config: FederationConfig,
}

impl Inbox {
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

    /// Receive a raw inbound request addressed to `as_actor`'s inbox.
    ///
    /// Authentication runs first; a payload failing every scheme allowed
    /// by the configured policy is rejected with `Unauthorized` (or the
    /// more specific `StaleSignature`/`InvalidSignature`) and never
    /// reaches the backend. `key` is the local actor's keypair, used when
    /// an inbound Follow is auto-accepted.
    pub async fn receive(
        &self,
        as_actor: &Actor,
        key: &KeyPair,
        request: InboundRequest<'_>,
    ) -> Result<InboxReceipt> {
        let activity = ApObject::from_slice(request.body)?;

        self.authenticate(&activity, &request).await?;

        activity.validate()?;

        let outcome = self.process(as_actor, key, &activity).await?;
        Ok(InboxReceipt { activity, outcome })
    }

    /// Authenticate an inbound request against the configured policy.
    ///
    /// Either the transport signature or the embedded document signature
    /// suffices under the default policy; the signing key must belong to
    /// the activity's claimed actor in both cases.
    async fn authenticate(
        &self,
        activity: &ApObject,
        request: &InboundRequest<'_>,
    ) -> Result<()> {
        let actor_iri = activity
            .actor_ref()
            .and_then(|a| a.iri().map(str::to_string))
            .ok_or(Error::MalformedObject { field: "actor" })?;

        let transport = match self.config.auth_policy {
            AuthPolicy::Document => None,
            AuthPolicy::Either | AuthPolicy::Transport => Some(
                self.verify_transport(request, &actor_iri).await,
            ),
        };

        match transport {
            Some(Ok(())) => return Ok(()),
            Some(Err(e)) if self.config.auth_policy == AuthPolicy::Transport => return Err(e),
            _ => {}
        }

        let document = self.verify_document(activity, &actor_iri).await;
        match (transport, document) {
            (_, Ok(())) => Ok(()),
            // Prefer the transport error; it is usually the more
            // actionable one (stale date, digest mismatch).
            (Some(Err(te)), Err(de)) => {
                tracing::info!(
                    transport_error = %te,
                    document_error = %de,
                    "inbound request failed both authentication schemes"
                );
                Err(te)
            }
            (_, Err(de)) => Err(de),
        }
    }

    async fn verify_transport(
        &self,
        request: &InboundRequest<'_>,
        actor_iri: &str,
    ) -> Result<()> {
        let owner = verify_request_with_fetcher(
            request.method,
            request.path,
            request.headers,
            Some(request.body),
            &*self.fetcher,
            &self.config.signature,
        )
        .await?;

        if !key_id_matches_actor(&owner, actor_iri) {
            tracing::warn!(key_owner = %owner, actor = %actor_iri, "signature key does not belong to actor");
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    async fn verify_document(&self, activity: &ApObject, actor_iri: &str) -> Result<()> {
        match ldsig::verify_signature(activity, &*self.fetcher).await? {
            ldsig::Verification::Verified { creator } => {
                if !key_id_matches_actor(&creator, actor_iri) {
                    tracing::warn!(%creator, actor = %actor_iri, "document signature creator does not match actor");
                    return Err(Error::Unauthorized);
                }
                Ok(())
            }
            ldsig::Verification::Unsigned => Err(Error::Unauthorized),
        }
    }

    /// Apply an already-authenticated activity to the backend.
    ///
    /// Exposed separately so embedders with their own authentication
    /// layer (or trusted local queues) can reuse the dispatch logic.
    pub async fn process(
        &self,
        as_actor: &Actor,
        key: &KeyPair,
        activity: &ApObject,
    ) -> Result<InboxOutcome> {
        let actor_ref = activity
            .actor_ref()
            .ok_or(Error::MalformedObject { field: "actor" })?;
        let remote = Actor::resolve(&actor_ref, &*self.fetcher).await?;

        if self.backend.is_blocked(as_actor, remote.id()).await? {
            tracing::info!(actor = %remote.id(), "dropping activity from blocked actor");
            return Ok(InboxOutcome::Dropped);
        }

        if let Some(id) = activity.id() {
            if self.backend.is_duplicate(as_actor, id).await? {
                tracing::info!(activity = %id, "dropping duplicate activity");
                return Ok(InboxOutcome::Dropped);
            }
        }

        let verb = activity
            .activity_kind()
            .unwrap_or_else(|| ActivityKind::Unknown(String::new()));

        // Announce of a non-IRI object reference cannot be resolved on
        // this network; drop it before storing anything.
        if verb == ActivityKind::Announce {
            if let Some(ObjectRef::Iri(iri)) = activity.object_ref() {
                if !iri.starts_with("http") {
                    tracing::info!(object = %iri, "dropping Announce of unresolvable reference");
                    return Ok(InboxOutcome::Dropped);
                }
            }
        }

        self.backend.inbox_new(as_actor, activity).await?;

        match verb {
            ActivityKind::Create => self.backend.inbox_create(as_actor, activity).await?,
            ActivityKind::Update => {
                self.require_same_actor(&remote, activity).await?;
                self.backend.inbox_update(as_actor, activity).await?;
            }
            ActivityKind::Delete => {
                if delete_target(activity).is_none() {
                    return Err(Error::MalformedObject { field: "object" });
                }
                self.backend.inbox_delete(as_actor, activity).await?;
            }
            ActivityKind::Follow => {
                return self.handle_follow(as_actor, key, &remote, activity).await;
            }
            ActivityKind::Accept => {
                let follow = self.wrapped_follow(activity).await?;
                self.backend.accept_follow(as_actor, &follow).await?;
            }
            ActivityKind::Reject => {
                let follow = self.wrapped_follow(activity).await?;
                self.backend.reject_follow(as_actor, &follow).await?;
            }
            ActivityKind::Undo => {
                self.handle_undo(as_actor, &remote, activity).await?;
            }
            ActivityKind::Like => self.backend.inbox_like(as_actor, activity).await?,
            ActivityKind::Announce => self.backend.inbox_announce(as_actor, activity).await?,
            // Blocks and unrecognized verbs are stored via the generic
            // hook, never rejected (open-world tolerance).
            ActivityKind::Block | ActivityKind::Add | ActivityKind::Remove => {}
            ActivityKind::Unknown(_) => {}
        }

        Ok(InboxOutcome::Processed)
    }

    async fn handle_follow(
        &self,
        as_actor: &Actor,
        key: &KeyPair,
        remote: &Actor,
        activity: &ApObject,
    ) -> Result<InboxOutcome> {
        let target = activity
            .object_ref()
            .and_then(|o| o.iri().map(str::to_string))
            .ok_or(Error::MalformedObject { field: "object" })?;
        if target != as_actor.id() {
            tracing::warn!(%target, "dropping Follow not addressed to the local actor");
            return Ok(InboxOutcome::Dropped);
        }

        self.backend.new_follower(as_actor, activity).await?;

        if self.backend.should_accept_follow(as_actor, activity).await? {
            // Accept embeds the original Follow, minus transport-only fields.
            let mut embedded = activity.to_value();
            if let Some(map) = embedded.as_object_mut() {
                map.remove("@context");
                map.remove("signature");
            }
            let accept = builder::accept(as_actor.id(), embedded);

            let outbox = Outbox::new(
                self.backend.clone(),
                self.fetcher.clone(),
                self.config.clone(),
            );
            match outbox.post(as_actor, key, accept).await {
                Ok(receipt) => {
                    tracing::info!(
                        follower = %remote.id(),
                        accept = receipt.activity.id().unwrap_or_default(),
                        "auto-accepted follow"
                    );
                }
                Err(e) => {
                    // The follower is already recorded; a failed Accept
                    // delivery is retried by the embedding application.
                    tracing::error!(follower = %remote.id(), error = %e, "failed to send Accept");
                }
            }
        }

        Ok(InboxOutcome::Processed)
    }

    async fn handle_undo(
        &self,
        as_actor: &Actor,
        remote: &Actor,
        activity: &ApObject,
    ) -> Result<()> {
        let wrapped = self.resolve_wrapped(activity).await?;

        // An Undo must come from the same actor as the activity it undoes.
        self.require_same_actor(remote, &wrapped).await?;

        match wrapped.activity_kind() {
            Some(ActivityKind::Follow) => self.backend.undo_follower(as_actor, &wrapped).await,
            Some(ActivityKind::Like) => self.backend.inbox_undo_like(as_actor, &wrapped).await,
            Some(ActivityKind::Announce) => {
                self.backend.inbox_undo_announce(as_actor, &wrapped).await
            }
            _ => Ok(()),
        }
    }

    /// Resolve and validate the Follow wrapped by an Accept/Reject.
    async fn wrapped_follow(&self, activity: &ApObject) -> Result<ApObject> {
        let wrapped = self.resolve_wrapped(activity).await?;
        if wrapped.activity_kind() != Some(ActivityKind::Follow) {
            return Err(Error::UnexpectedKind {
                expected: "Follow".to_string(),
                got: wrapped.types().join(", "),
            });
        }
        wrapped.validate()?;
        Ok(wrapped)
    }

    async fn resolve_wrapped(&self, activity: &ApObject) -> Result<ApObject> {
        match activity
            .object_ref()
            .ok_or(Error::MalformedObject { field: "object" })?
        {
            ObjectRef::Embedded(object) => Ok(*object),
            ObjectRef::Iri(iri) => self.fetcher.fetch(&iri).await,
        }
    }

    async fn require_same_actor(&self, remote: &Actor, wrapped: &ApObject) -> Result<()> {
        let wrapped_actor = wrapped
            .actor_ref()
            .and_then(|a| a.iri().map(str::to_string))
            .or_else(|| wrapped.get_str("attributedTo").map(str::to_string));

        match wrapped_actor {
            Some(iri) if iri == remote.id() => Ok(()),
            Some(iri) => {
                tracing::warn!(wrapped = %iri, sender = %remote.id(), "actor mismatch on compound activity");
                Err(Error::Unauthorized)
            }
            None => Err(Error::MalformedObject { field: "actor" }),
        }
    }
}

/// Extract the IRI a Delete activity targets.
///
/// Accepts a bare IRI, a Tombstone, or an embedded object with an `id`.
pub fn delete_target(activity: &ApObject) -> Option<String> {
    match activity.object_ref()? {
        ObjectRef::Iri(iri) => Some(iri),
        ObjectRef::Embedded(object) => {
            if object.kind() == Some(ObjectKind::Tombstone) {
                object
                    .id()
                    .or_else(|| object.get_str("object"))
                    .map(str::to_string)
            } else {
                object.id().map(str::to_string)
            }
        }
    }
}
