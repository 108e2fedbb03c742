//! Common test utilities: in-memory backend and fetcher
//!
//! Mirrors what an embedding application would implement, with every
//! hook invocation recorded so tests can assert exactly which side
//! effects ran.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use fedbox::actor::Actor;
use fedbox::backend::{Backend, Fetcher};
use fedbox::error::{Error, Result};
use fedbox::key::KeyPair;
use fedbox::object::ApObject;
use fedbox::signature::SignedPayload;

pub const LOCAL_ACTOR: &str = "https://local.example/users/alice";
pub const REMOTE_ACTOR: &str = "https://remote.example/users/bob";

/// Install a test subscriber when RUST_LOG is set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory fetcher backed by a map of IRI -> JSON document
#[derive(Default)]
pub struct InMemFetcher {
    objects: Mutex<HashMap<String, Value>>,
}

impl InMemFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, iri: &str, value: Value) {
        self.objects
            .lock()
            .unwrap()
            .insert(iri.to_string(), value);
    }
}

#[async_trait]
impl Fetcher for InMemFetcher {
    async fn fetch(&self, iri: &str) -> Result<ApObject> {
        let value = self
            .objects
            .lock()
            .unwrap()
            .get(iri)
            .cloned()
            .ok_or_else(|| Error::Unreachable(iri.to_string()))?;
        ApObject::from_value(value)
    }
}

/// A recorded delivery handed to `post_to_remote_inbox`
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    pub inbox: String,
    pub payload: SignedPayload,
}

impl RecordedDelivery {
    pub fn body_json(&self) -> Value {
        serde_json::from_str(&self.payload.body).expect("delivered body is JSON")
    }
}

/// In-memory backend recording every hook call
pub struct InMemBackend {
    base: String,
    next_id: AtomicUsize,
    pub followers: Mutex<Vec<String>>,
    pub blocked: Mutex<Vec<String>>,
    pub seen_ids: Mutex<Vec<String>>,
    pub fail_inboxes: Mutex<HashSet<String>>,
    pub accept_follows: AtomicBool,
    pub owns_activities: AtomicBool,
    calls: Mutex<Vec<(String, Value)>>,
    deliveries: Mutex<Vec<RecordedDelivery>>,
}

impl InMemBackend {
    pub fn new() -> Self {
        Self {
            base: "https://local.example".to_string(),
            next_id: AtomicUsize::new(1),
            followers: Mutex::new(Vec::new()),
            blocked: Mutex::new(Vec::new()),
            seen_ids: Mutex::new(Vec::new()),
            fail_inboxes: Mutex::new(HashSet::new()),
            accept_follows: AtomicBool::new(true),
            owns_activities: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, hook: &str, activity: &ApObject) {
        self.calls
            .lock()
            .unwrap()
            .push((hook.to_string(), activity.to_value()));
    }

    /// Names of the hooks invoked so far, in order.
    pub fn called_hooks(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The activities a given hook was invoked with.
    pub fn hook_payloads(&self, hook: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == hook)
            .map(|(_, activity)| activity.clone())
            .collect()
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for InMemBackend {
    fn base_url(&self) -> String {
        self.base.clone()
    }

    fn random_object_id(&self) -> String {
        format!("{:08x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn followers_of(&self, _as_actor: &Actor) -> Result<Vec<String>> {
        Ok(self.followers.lock().unwrap().clone())
    }

    async fn is_blocked(&self, _as_actor: &Actor, other_actor_iri: &str) -> Result<bool> {
        Ok(self
            .blocked
            .lock()
            .unwrap()
            .iter()
            .any(|iri| iri == other_actor_iri))
    }

    async fn is_duplicate(&self, _as_actor: &Actor, activity_iri: &str) -> Result<bool> {
        Ok(self
            .seen_ids
            .lock()
            .unwrap()
            .iter()
            .any(|iri| iri == activity_iri))
    }

    async fn owns_activity(&self, _as_actor: &Actor, _activity: &ApObject) -> Result<bool> {
        Ok(self.owns_activities.load(Ordering::SeqCst))
    }

    async fn should_accept_follow(&self, _as_actor: &Actor, _follow: &ApObject) -> Result<bool> {
        Ok(self.accept_follows.load(Ordering::SeqCst))
    }

    async fn post_to_remote_inbox(
        &self,
        _as_actor: &Actor,
        payload: &SignedPayload,
        inbox_iri: &str,
    ) -> Result<()> {
        if self.fail_inboxes.lock().unwrap().contains(inbox_iri) {
            return Err(Error::Unreachable(inbox_iri.to_string()));
        }
        self.deliveries.lock().unwrap().push(RecordedDelivery {
            inbox: inbox_iri.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn outbox_new(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_new", activity);
        Ok(())
    }

    async fn outbox_create(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_create", activity);
        Ok(())
    }

    async fn outbox_update(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_update", activity);
        Ok(())
    }

    async fn outbox_delete(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_delete", activity);
        Ok(())
    }

    async fn outbox_follow(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("outbox_follow", follow);
        Ok(())
    }

    async fn outbox_undo_follow(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("outbox_undo_follow", follow);
        Ok(())
    }

    async fn outbox_accept_follow(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("outbox_accept_follow", follow);
        Ok(())
    }

    async fn outbox_reject_follow(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("outbox_reject_follow", follow);
        Ok(())
    }

    async fn outbox_like(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_like", activity);
        Ok(())
    }

    async fn outbox_undo_like(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_undo_like", activity);
        Ok(())
    }

    async fn outbox_announce(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_announce", activity);
        Ok(())
    }

    async fn outbox_undo_announce(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("outbox_undo_announce", activity);
        Ok(())
    }

    async fn inbox_new(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_new", activity);
        Ok(())
    }

    async fn inbox_create(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_create", activity);
        Ok(())
    }

    async fn inbox_update(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_update", activity);
        Ok(())
    }

    async fn inbox_delete(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_delete", activity);
        Ok(())
    }

    async fn new_follower(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("new_follower", follow);
        Ok(())
    }

    async fn undo_follower(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("undo_follower", follow);
        Ok(())
    }

    async fn accept_follow(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("accept_follow", follow);
        Ok(())
    }

    async fn reject_follow(&self, _as_actor: &Actor, follow: &ApObject) -> Result<()> {
        self.record("reject_follow", follow);
        Ok(())
    }

    async fn inbox_like(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_like", activity);
        Ok(())
    }

    async fn inbox_undo_like(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_undo_like", activity);
        Ok(())
    }

    async fn inbox_announce(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_announce", activity);
        Ok(())
    }

    async fn inbox_undo_announce(&self, _as_actor: &Actor, activity: &ApObject) -> Result<()> {
        self.record("inbox_undo_announce", activity);
        Ok(())
    }
}

/// Build an actor JSON document for tests.
pub fn actor_json(iri: &str, public_key_pem: Option<&str>) -> Value {
    let mut actor = json!({
        "type": "Person",
        "id": iri,
        "preferredUsername": iri.rsplit('/').next().unwrap_or("user"),
        "inbox": format!("{}/inbox", iri),
        "outbox": format!("{}/outbox", iri),
        "followers": format!("{}/followers", iri),
    });
    if let Some(pem) = public_key_pem {
        actor["publicKey"] = json!({
            "id": format!("{}#main-key", iri),
            "owner": iri,
            "publicKeyPem": pem,
        });
    }
    actor
}

/// A local actor with its keypair, registered in the fetcher.
pub fn register_actor(fetcher: &InMemFetcher, iri: &str) -> (Actor, KeyPair) {
    let key = KeyPair::generate_with_size(iri, 1024).expect("key generation should work");
    let pem = key.public_key_pem().expect("public key pem");
    let value = actor_json(iri, Some(&pem));
    fetcher.insert(iri, value.clone());
    // Dereferencing a key id returns the actor document (the fragment is
    // not part of the HTTP request in the real fetcher).
    fetcher.insert(&format!("{}#main-key", iri), value.clone());
    let actor = Actor::from_object(ApObject::from_value(value).expect("actor json parses"))
        .expect("actor json is a valid actor");
    (actor, key)
}
