//! Backend and fetcher contracts
//!
//! The processing core owns no storage and no transport. Everything
//! stateful is delegated through these two seams, injected explicitly
//! into the outbox/inbox processors (no ambient globals).

use async_trait::async_trait;

use crate::actor::Actor;
use crate::error::Result;
use crate::object::ApObject;
use crate::signature::SignedPayload;

/// Remote resource fetcher
///
/// Used for actors, objects, keys, and collection pages. Implementations
/// fail with `Unreachable` for transient network errors, `NotFound` /
/// `Gone` for missing or deleted resources, and `NotAnObject` when the
/// response is not an ActivityPub document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, iri: &str) -> Result<ApObject>;
}

/// Side-effect backend implemented by the embedding application
///
/// Hooks fire once per processed activity, before delivery, and receive
/// the local actor plus the activity. All hooks default to no-ops so
/// embedders implement only the events they care about. Hook failures
/// abort processing of that single activity.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Base URL of the local instance, e.g. `https://social.example.com`.
    fn base_url(&self) -> String;

    /// Generate a random object id for a new outbox activity.
    fn random_object_id(&self) -> String {
        ulid::Ulid::new().to_string().to_lowercase()
    }

    /// IRI assigned to a new outbox activity.
    fn activity_iri(&self, object_id: &str) -> String {
        format!("{}/outbox/{}", self.base_url(), object_id)
    }

    /// Stored follower IRIs for a local actor.
    ///
    /// Authoritative source for the actor's own followers collection;
    /// resolution never fetches it over the network.
    async fn followers_of(&self, as_actor: &Actor) -> Result<Vec<String>>;

    /// Whether `as_actor` has blocked `other_actor_iri`.
    async fn is_blocked(&self, _as_actor: &Actor, _other_actor_iri: &str) -> Result<bool> {
        Ok(false)
    }

    /// Whether an inbound activity id was already processed.
    async fn is_duplicate(&self, _as_actor: &Actor, _activity_iri: &str) -> Result<bool> {
        Ok(false)
    }

    /// Whether the referenced activity/object originated from this
    /// instance's outbox. Gates outbound Undo/Delete/Update.
    async fn owns_activity(&self, as_actor: &Actor, activity: &ApObject) -> Result<bool> {
        let actor_iri = activity.actor_ref().and_then(|a| a.iri().map(str::to_string));
        Ok(actor_iri.as_deref() == Some(as_actor.id()))
    }

    /// Whether an inbound Follow should be auto-accepted.
    async fn should_accept_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<bool> {
        Ok(true)
    }

    /// Deliver a signed payload to a remote inbox.
    ///
    /// The payload carries the serialized activity and the transport
    /// signature headers computed for this specific inbox. Retry and
    /// backoff policy is the implementation's concern.
    async fn post_to_remote_inbox(
        &self,
        as_actor: &Actor,
        payload: &SignedPayload,
        inbox_iri: &str,
    ) -> Result<()>;

    // =====================================================================
    // Outbox hooks
    // =====================================================================

    /// A new activity entered the outbox (fires for every verb).
    async fn outbox_new(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn outbox_create(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn outbox_update(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    /// An object was deleted locally.
    async fn outbox_delete(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    /// Record a pending follow of a remote actor.
    async fn outbox_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    /// The local actor accepted a remote actor's follow request.
    async fn outbox_accept_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    /// The local actor rejected a remote actor's follow request.
    async fn outbox_reject_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn outbox_undo_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn outbox_like(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn outbox_undo_like(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn outbox_announce(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn outbox_undo_announce(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    // =====================================================================
    // Inbox hooks
    // =====================================================================

    /// A new activity arrived in the inbox (fires for every verb,
    /// including unrecognized ones).
    async fn inbox_new(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn inbox_create(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    /// An inbound Update; the sender was already verified to match the
    /// updated object's actor.
    async fn inbox_update(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn inbox_delete(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    /// A remote actor followed the local actor.
    async fn new_follower(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    /// A remote actor retracted their follow.
    async fn undo_follower(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    /// A remote actor accepted the local actor's follow request.
    async fn accept_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    /// A remote actor rejected the local actor's follow request.
    async fn reject_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn inbox_like(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn inbox_undo_like(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn inbox_announce(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }

    async fn inbox_undo_announce(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<()> {
        Ok(())
    }
}
