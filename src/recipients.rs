//! Recipient resolution
//!
//! Expands an activity's addressing fields into a concrete set of actor
//! IRIs, dereferencing collections through the fetcher. One unreachable
//! recipient never blocks delivery to the others: failures degrade to
//! skipping that IRI.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::actor::Actor;
use crate::backend::{Backend, Fetcher};
use crate::config::CollectionConfig;
use crate::error::{Error, Result};
use crate::object::{ActivityKind, ApObject, ObjectRef, AS_PUBLIC};

/// One page of a collection being expanded: a reference to fetch, or an
/// object already in hand (inline `first` pages, pre-fetched roots).
pub enum PageSource {
    Iri(String),
    Inline(ApObject),
}

/// Expand a collection into its member IRIs.
///
/// Walks `items`/`orderedItems` across `first`/`next` pagination links
/// with an explicit work-list and a visited-IRI set, so a collection is
/// never walked more than once per resolution and cycles terminate. A
/// chain longer than `config.max_pages` fails with `CollectionLimit`;
/// an unreachable page is logged and skipped.
pub async fn expand_collection(
    source: PageSource,
    fetcher: &dyn Fetcher,
    config: &CollectionConfig,
) -> Result<Vec<String>> {
    let mut items = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<PageSource> = VecDeque::new();
    let mut pages_fetched = 0usize;
    let mut root = true;

    queue.push_back(source);

    while let Some(page) = queue.pop_front() {
        let object = match page {
            PageSource::Inline(object) => {
                if let Some(id) = object.id() {
                    if !visited.insert(id.to_string()) {
                        continue;
                    }
                }
                object
            }
            PageSource::Iri(iri) => {
                if !visited.insert(iri.clone()) {
                    continue;
                }
                pages_fetched += 1;
                if pages_fetched > config.max_pages {
                    return Err(Error::CollectionLimit(iri));
                }
                match fetcher.fetch(&iri).await {
                    Ok(object) => object,
                    Err(e) if root => return Err(e),
                    Err(e) => {
                        tracing::warn!(%iri, error = %e, "skipping unreachable collection page");
                        continue;
                    }
                }
            }
        };

        let kind = object.kind().ok_or(Error::MalformedObject { field: "type" })?;
        if !kind.is_collection() && !kind.is_collection_page() {
            if root {
                return Err(Error::UnexpectedKind {
                    expected: "a collection type".to_string(),
                    got: object.types().join(", "),
                });
            }
            tracing::warn!(types = ?object.types(), "skipping non-collection page");
            continue;
        }
        root = false;

        for field in ["items", "orderedItems"] {
            for iri in object.addressing(field) {
                if items.len() >= config.max_items {
                    tracing::warn!(
                        max_items = config.max_items,
                        "collection item budget reached, truncating"
                    );
                    return Ok(items);
                }
                items.push(iri);
            }
        }

        for field in ["first", "next"] {
            match object.get(field) {
                Some(serde_json::Value::String(iri)) => {
                    queue.push_back(PageSource::Iri(iri.clone()));
                }
                Some(serde_json::Value::Object(map)) => {
                    queue.push_back(PageSource::Inline(ApObject::from_map(map.clone())));
                }
                _ => {}
            }
        }
    }

    Ok(items)
}

/// Expand a collection referenced by IRI.
pub async fn expand_collection_iri(
    iri: &str,
    fetcher: &dyn Fetcher,
    config: &CollectionConfig,
) -> Result<Vec<String>> {
    expand_collection(PageSource::Iri(iri.to_string()), fetcher, config).await
}

/// The outcome of resolving an activity's recipients
///
/// Holds the deduplicated actor IRIs plus the actor documents fetched
/// along the way, so the delivery phase does not refetch them.
#[derive(Debug, Default)]
pub struct Resolution {
    recipients: BTreeSet<String>,
    actors: HashMap<String, Actor>,
}

impl Resolution {
    /// Deduplicated, order-irrelevant set of recipient actor IRIs.
    pub fn recipients(&self) -> &BTreeSet<String> {
        &self.recipients
    }

    pub fn contains(&self, iri: &str) -> bool {
        self.recipients.contains(iri)
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

/// A resolved delivery target
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryTarget {
    /// Recipient actor IRI
    pub recipient: String,
    /// Inbox the payload should be posted to (shared inbox preferred)
    pub inbox: String,
}

/// Expands addressing into deliverable recipients
pub struct RecipientResolver<'a> {
    backend: &'a dyn Backend,
    fetcher: &'a dyn Fetcher,
    config: &'a CollectionConfig,
}

impl<'a> RecipientResolver<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        fetcher: &'a dyn Fetcher,
        config: &'a CollectionConfig,
    ) -> Self {
        Self {
            backend,
            fetcher,
            config,
        }
    }

    /// Resolve an activity's recipients to a set of actor IRIs.
    ///
    /// Unions the addressing fields with the per-verb implied recipients
    /// (a Follow always reaches the followed actor, a Like/Announce the
    /// object's author), expands collections, drops the public marker and
    /// the sending actor, and routes the sender's own followers
    /// collection through the backend instead of the network.
    pub async fn resolve(&self, as_actor: &Actor, activity: &ApObject) -> Result<Resolution> {
        let mut candidates: VecDeque<String> = activity.all_addressing().into();
        for seed in self.implied_recipients(activity).await {
            candidates.push_back(seed);
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut resolution = Resolution::default();

        while let Some(iri) = candidates.pop_front() {
            if iri.is_empty() || iri == AS_PUBLIC || iri == as_actor.id() {
                continue;
            }
            if !seen.insert(iri.clone()) {
                continue;
            }

            // The local followers collection is authoritative data; never
            // fetch it over the network.
            if Some(iri.as_str()) == as_actor.followers() {
                match self.backend.followers_of(as_actor).await {
                    Ok(followers) => candidates.extend(followers),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to load local followers");
                    }
                }
                continue;
            }

            let object = match self.fetcher.fetch(&iri).await {
                Ok(object) => object,
                Err(e) => {
                    tracing::warn!(%iri, error = %e, "skipping unresolvable recipient");
                    continue;
                }
            };

            match object.kind() {
                Some(kind) if kind.is_actor() => match Actor::from_object(object) {
                    Ok(actor) => {
                        resolution.recipients.insert(iri.clone());
                        resolution.actors.insert(iri, actor);
                    }
                    Err(e) => {
                        tracing::warn!(%iri, error = %e, "skipping invalid actor document");
                    }
                },
                Some(kind) if kind.is_collection() || kind.is_collection_page() => {
                    match expand_collection(PageSource::Inline(object), self.fetcher, self.config)
                        .await
                    {
                        Ok(members) => candidates.extend(members),
                        Err(e) => {
                            tracing::warn!(%iri, error = %e, "skipping unexpandable collection");
                        }
                    }
                }
                _ => {
                    tracing::debug!(%iri, "addressed object is not an actor or collection");
                }
            }
        }

        Ok(resolution)
    }

    /// Map resolved recipients to inboxes, deduplicating shared inboxes
    /// and skipping the sending actor's own.
    pub async fn delivery_targets(
        &self,
        as_actor: &Actor,
        resolution: &Resolution,
    ) -> Vec<DeliveryTarget> {
        let mut seen_inboxes: HashSet<String> = HashSet::new();
        let mut targets = Vec::new();

        for recipient in &resolution.recipients {
            let actor = match resolution.actors.get(recipient) {
                Some(actor) => actor.clone(),
                None => match Actor::fetch(recipient, self.fetcher).await {
                    Ok(actor) => actor,
                    Err(e) => {
                        tracing::warn!(%recipient, error = %e, "skipping undeliverable recipient");
                        continue;
                    }
                },
            };

            if actor.id() == as_actor.id() {
                continue;
            }

            let inbox = actor.delivery_inbox().to_string();
            if inbox.is_empty() || !seen_inboxes.insert(inbox.clone()) {
                continue;
            }

            targets.push(DeliveryTarget {
                recipient: recipient.clone(),
                inbox,
            });
        }

        targets
    }

    /// Recipients implied by the verb rather than listed in addressing.
    async fn implied_recipients(&self, activity: &ApObject) -> Vec<String> {
        let mut seeds = Vec::new();
        let Some(verb) = activity.activity_kind() else {
            return seeds;
        };

        match verb {
            ActivityKind::Follow => {
                if let Some(iri) = activity.object_ref().and_then(|o| o.iri().map(String::from)) {
                    seeds.push(iri);
                }
            }
            ActivityKind::Accept | ActivityKind::Reject => {
                // The wrapped Follow's actor is who must learn the outcome.
                if let Some(follow) = self.resolve_tolerant(activity.object_ref()).await {
                    if let Some(iri) = follow.actor_ref().and_then(|a| a.iri().map(String::from)) {
                        seeds.push(iri);
                    }
                }
            }
            ActivityKind::Like | ActivityKind::Announce => {
                if let Some(object) = self.resolve_tolerant(activity.object_ref()).await {
                    if let Some(author) = object.get_str("attributedTo") {
                        seeds.push(author.to_string());
                    }
                }
            }
            ActivityKind::Undo => {
                if let Some(wrapped) = self.resolve_tolerant(activity.object_ref()).await {
                    match wrapped.activity_kind() {
                        Some(ActivityKind::Follow) => {
                            if let Some(iri) =
                                wrapped.object_ref().and_then(|o| o.iri().map(String::from))
                            {
                                seeds.push(iri);
                            }
                        }
                        Some(ActivityKind::Like) | Some(ActivityKind::Announce) => {
                            if let Some(object) =
                                self.resolve_tolerant(wrapped.object_ref()).await
                            {
                                if let Some(author) = object.get_str("attributedTo") {
                                    seeds.push(author.to_string());
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            ActivityKind::Create => {
                if let Some(ObjectRef::Embedded(object)) = activity.object_ref() {
                    seeds.extend(object.all_addressing());
                }
            }
            _ => {}
        }

        seeds
    }

    async fn resolve_tolerant(&self, reference: Option<ObjectRef>) -> Option<ApObject> {
        match reference? {
            ObjectRef::Embedded(object) => Some(*object),
            ObjectRef::Iri(iri) => match self.fetcher.fetch(&iri).await {
                Ok(object) => Some(object),
                Err(e) => {
                    tracing::debug!(%iri, error = %e, "could not resolve referenced object");
                    None
                }
            },
        }
    }
}
