//! Inbox pipeline tests
//!
//! Exercise authentication (both schemes), drop behavior for blocked and
//! duplicate activities, compound verb validation, and the follow
//! auto-accept flow over the in-memory backend.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use http::{HeaderMap, HeaderValue};
use serde_json::json;

use common::{register_actor, InMemBackend, InMemFetcher, LOCAL_ACTOR, REMOTE_ACTOR};
use fedbox::config::FederationConfig;
use fedbox::error::Error;
use fedbox::inbox::{Inbox, InboundRequest, InboxOutcome};
use fedbox::key::KeyPair;
use fedbox::ldsig;
use fedbox::object::ApObject;
use fedbox::signature::sign_request;

const INBOX_URL: &str = "https://local.example/users/alice/inbox";
const INBOX_PATH: &str = "/users/alice/inbox";

fn setup() -> (Arc<InMemBackend>, Arc<InMemFetcher>, Inbox) {
    common::init_tracing();
    let backend = Arc::new(InMemBackend::new());
    let fetcher = Arc::new(InMemFetcher::new());
    let inbox = Inbox::new(
        backend.clone(),
        fetcher.clone(),
        FederationConfig::default(),
    );
    (backend, fetcher, inbox)
}

/// Sign a request the way a remote server would.
fn signed_headers(body: &[u8], key: &KeyPair) -> HeaderMap {
    let signed = sign_request("POST", INBOX_URL, Some(body), key).expect("signed");

    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_str(&signed.host).unwrap());
    headers.insert("date", HeaderValue::from_str(&signed.date).unwrap());
    if let Some(digest) = signed.digest {
        headers.insert("digest", HeaderValue::from_str(&digest).unwrap());
    }
    headers.insert(
        "signature",
        HeaderValue::from_str(&signed.signature).unwrap(),
    );
    headers
}

fn request<'a>(headers: &'a HeaderMap, body: &'a [u8]) -> InboundRequest<'a> {
    InboundRequest {
        method: "POST",
        path: INBOX_PATH,
        headers,
        body,
    }
}

// =============================================================================
// Authentication
// =============================================================================

/// A correctly signed Follow is processed and hooks fire.
#[tokio::test]
async fn test_signed_follow_is_processed() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    let (_bob, bob_key) = register_actor(&fetcher, REMOTE_ACTOR);

    let body = json!({
        "type": "Follow",
        "id": "https://remote.example/follows/1",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    })
    .to_string()
    .into_bytes();
    let headers = signed_headers(&body, &bob_key);

    let receipt = inbox
        .receive(&alice, &alice_key, request(&headers, &body))
        .await
        .unwrap();

    assert_eq!(receipt.outcome, InboxOutcome::Processed);
    assert_eq!(backend.hook_payloads("new_follower").len(), 1);
}

/// A tampered payload is rejected and never reaches backend hooks.
#[tokio::test]
async fn test_tampered_payload_is_rejected_before_hooks() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    let (_bob, bob_key) = register_actor(&fetcher, REMOTE_ACTOR);

    let signed_body = json!({
        "type": "Follow",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    })
    .to_string()
    .into_bytes();
    let headers = signed_headers(&signed_body, &bob_key);

    // Deliver a different body than the one signed.
    let tampered = json!({
        "type": "Delete",
        "actor": REMOTE_ACTOR,
        "object": "https://local.example/notes/1"
    })
    .to_string()
    .into_bytes();

    let result = inbox
        .receive(&alice, &alice_key, request(&headers, &tampered))
        .await;

    assert!(matches!(result, Err(Error::InvalidSignature)));
    assert!(backend.called_hooks().is_empty());
}

/// An unsigned request is rejected with Unauthorized.
#[tokio::test]
async fn test_unsigned_request_is_unauthorized() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let body = json!({
        "type": "Follow",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    })
    .to_string()
    .into_bytes();
    let headers = HeaderMap::new();

    let result = inbox
        .receive(&alice, &alice_key, request(&headers, &body))
        .await;

    assert!(matches!(result, Err(Error::Unauthorized)));
    assert!(backend.called_hooks().is_empty());
}

/// A stale Date header fails with StaleSignature.
#[tokio::test]
async fn test_stale_date_is_rejected() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    let (_bob, bob_key) = register_actor(&fetcher, REMOTE_ACTOR);

    let body = json!({
        "type": "Follow",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    })
    .to_string()
    .into_bytes();
    let mut headers = signed_headers(&body, &bob_key);

    let old_date = (chrono::Utc::now() - chrono::Duration::hours(2))
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    headers.insert("date", HeaderValue::from_str(&old_date).unwrap());

    let result = inbox
        .receive(&alice, &alice_key, request(&headers, &body))
        .await;

    assert!(matches!(result, Err(Error::StaleSignature)));
    assert!(backend.called_hooks().is_empty());
}

/// A valid signature from a key that does not belong to the claimed
/// actor is rejected.
#[tokio::test]
async fn test_signature_key_must_belong_to_actor() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);
    let (_mallory, mallory_key) =
        register_actor(&fetcher, "https://evil.example/users/mallory");

    let body = json!({
        "type": "Follow",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    })
    .to_string()
    .into_bytes();
    let headers = signed_headers(&body, &mallory_key);

    let result = inbox
        .receive(&alice, &alice_key, request(&headers, &body))
        .await;

    assert!(matches!(result, Err(Error::Unauthorized)));
    assert!(backend.called_hooks().is_empty());
}

/// With no transport signature, a valid embedded document signature
/// authenticates the payload (either scheme suffices by default).
#[tokio::test]
async fn test_document_signature_authenticates_without_transport() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    let (_bob, bob_key) = register_actor(&fetcher, REMOTE_ACTOR);

    let activity = ApObject::from_value(json!({
        "type": "Follow",
        "id": "https://remote.example/follows/2",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    }))
    .unwrap();
    let signed = ldsig::generate_signature(&activity, &bob_key).unwrap();
    let body = signed.to_value().to_string().into_bytes();

    let headers = HeaderMap::new();
    let receipt = inbox
        .receive(&alice, &alice_key, request(&headers, &body))
        .await
        .unwrap();

    assert_eq!(receipt.outcome, InboxOutcome::Processed);
    assert_eq!(backend.hook_payloads("new_follower").len(), 1);
}

// =============================================================================
// Drop behavior
// =============================================================================

/// Activities from blocked actors are dropped without side effects.
#[tokio::test]
async fn test_blocked_actor_is_dropped_silently() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);
    backend.blocked.lock().unwrap().push(REMOTE_ACTOR.to_string());

    let activity = ApObject::from_value(json!({
        "type": "Follow",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    }))
    .unwrap();

    let outcome = inbox.process(&alice, &alice_key, &activity).await.unwrap();
    assert_eq!(outcome, InboxOutcome::Dropped);
    assert!(backend.called_hooks().is_empty());
}

/// Duplicate deliveries are dropped without side effects.
#[tokio::test]
async fn test_duplicate_activity_is_dropped() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);
    backend
        .seen_ids
        .lock()
        .unwrap()
        .push("https://remote.example/follows/1".to_string());

    let activity = ApObject::from_value(json!({
        "type": "Follow",
        "id": "https://remote.example/follows/1",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    }))
    .unwrap();

    let outcome = inbox.process(&alice, &alice_key, &activity).await.unwrap();
    assert_eq!(outcome, InboxOutcome::Dropped);
    assert!(backend.called_hooks().is_empty());
}

// =============================================================================
// Verb dispatch
// =============================================================================

/// An inbound Follow records the follower and auto-accepts through the
/// outbox when the backend says yes.
#[tokio::test]
async fn test_follow_auto_accept_round_trip() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let follow = ApObject::from_value(json!({
        "type": "Follow",
        "id": "https://remote.example/follows/1",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    }))
    .unwrap();

    let outcome = inbox.process(&alice, &alice_key, &follow).await.unwrap();
    assert_eq!(outcome, InboxOutcome::Processed);
    assert_eq!(backend.hook_payloads("new_follower").len(), 1);

    // The Accept went out through the outbox pipeline to bob's inbox.
    let deliveries = backend.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].inbox, format!("{}/inbox", REMOTE_ACTOR));
    let accept = deliveries[0].body_json();
    assert_eq!(accept["type"], "Accept");
    assert_eq!(accept["actor"], LOCAL_ACTOR);
    assert_eq!(accept["object"]["id"], "https://remote.example/follows/1");
}

/// When the backend declines, no Accept is sent but the follow is still
/// recorded.
#[tokio::test]
async fn test_follow_without_auto_accept_sends_nothing() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);
    backend.accept_follows.store(false, Ordering::SeqCst);

    let follow = ApObject::from_value(json!({
        "type": "Follow",
        "actor": REMOTE_ACTOR,
        "object": LOCAL_ACTOR
    }))
    .unwrap();

    inbox.process(&alice, &alice_key, &follow).await.unwrap();
    assert_eq!(backend.hook_payloads("new_follower").len(), 1);
    assert!(backend.deliveries().is_empty());
}

/// A Follow aimed at some other actor is dropped.
#[tokio::test]
async fn test_follow_of_other_actor_is_dropped() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let follow = ApObject::from_value(json!({
        "type": "Follow",
        "actor": REMOTE_ACTOR,
        "object": "https://local.example/users/someone-else"
    }))
    .unwrap();

    let outcome = inbox.process(&alice, &alice_key, &follow).await.unwrap();
    assert_eq!(outcome, InboxOutcome::Dropped);
    assert!(backend.hook_payloads("new_follower").is_empty());
}

/// An Accept wrapping our Follow triggers the accept_follow hook.
#[tokio::test]
async fn test_accept_of_follow_dispatches_hook() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let accept = ApObject::from_value(json!({
        "type": "Accept",
        "actor": REMOTE_ACTOR,
        "object": {
            "type": "Follow",
            "id": "https://local.example/outbox/1",
            "actor": LOCAL_ACTOR,
            "object": REMOTE_ACTOR
        }
    }))
    .unwrap();

    inbox.process(&alice, &alice_key, &accept).await.unwrap();
    let accepted = backend.hook_payloads("accept_follow");
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0]["id"], "https://local.example/outbox/1");
}

/// An Accept wrapping something that is not a Follow is rejected.
#[tokio::test]
async fn test_accept_of_non_follow_is_rejected() {
    let (_backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let accept = ApObject::from_value(json!({
        "type": "Accept",
        "actor": REMOTE_ACTOR,
        "object": {
            "type": "Like",
            "id": "https://remote.example/likes/1",
            "actor": LOCAL_ACTOR,
            "object": "https://remote.example/notes/1"
        }
    }))
    .unwrap();

    let result = inbox.process(&alice, &alice_key, &accept).await;
    assert!(matches!(result, Err(Error::UnexpectedKind { .. })));
}

/// An Undo must come from the actor who performed the original activity.
#[tokio::test]
async fn test_undo_by_different_actor_is_unauthorized() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);
    let mallory = "https://evil.example/users/mallory";
    register_actor(&fetcher, mallory);

    let undo = ApObject::from_value(json!({
        "type": "Undo",
        "actor": mallory,
        "object": {
            "type": "Follow",
            "id": "https://remote.example/follows/1",
            "actor": REMOTE_ACTOR,
            "object": LOCAL_ACTOR
        }
    }))
    .unwrap();

    let result = inbox.process(&alice, &alice_key, &undo).await;
    assert!(matches!(result, Err(Error::Unauthorized)));
    assert!(backend.hook_payloads("undo_follower").is_empty());
}

/// An Undo of a Follow by its own actor removes the follower.
#[tokio::test]
async fn test_undo_follow_dispatches_undo_follower() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let undo = ApObject::from_value(json!({
        "type": "Undo",
        "actor": REMOTE_ACTOR,
        "object": {
            "type": "Follow",
            "id": "https://remote.example/follows/1",
            "actor": REMOTE_ACTOR,
            "object": LOCAL_ACTOR
        }
    }))
    .unwrap();

    inbox.process(&alice, &alice_key, &undo).await.unwrap();
    assert_eq!(backend.hook_payloads("undo_follower").len(), 1);
}

/// An Update by someone other than the object's author is rejected.
#[tokio::test]
async fn test_update_requires_matching_actor() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);
    let mallory = "https://evil.example/users/mallory";
    register_actor(&fetcher, mallory);

    let update = ApObject::from_value(json!({
        "type": "Update",
        "actor": mallory,
        "object": {
            "type": "Note",
            "id": "https://remote.example/notes/1",
            "attributedTo": REMOTE_ACTOR,
            "content": "<p>rewritten</p>"
        }
    }))
    .unwrap();

    let result = inbox.process(&alice, &alice_key, &update).await;
    assert!(matches!(result, Err(Error::Unauthorized)));
    assert!(backend.hook_payloads("inbox_update").is_empty());
}

/// A Like dispatches its hook; a Delete with a Tombstone resolves the
/// target before the hook runs.
#[tokio::test]
async fn test_like_and_delete_dispatch() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let like = ApObject::from_value(json!({
        "type": "Like",
        "actor": REMOTE_ACTOR,
        "object": "https://local.example/notes/1"
    }))
    .unwrap();
    inbox.process(&alice, &alice_key, &like).await.unwrap();
    assert_eq!(backend.hook_payloads("inbox_like").len(), 1);

    let delete = ApObject::from_value(json!({
        "type": "Delete",
        "actor": REMOTE_ACTOR,
        "object": {"type": "Tombstone", "id": "https://remote.example/notes/9"}
    }))
    .unwrap();
    inbox.process(&alice, &alice_key, &delete).await.unwrap();
    assert_eq!(backend.hook_payloads("inbox_delete").len(), 1);
}

/// Unknown verbs are stored through the generic hook, never rejected.
#[tokio::test]
async fn test_unknown_verb_goes_to_generic_hook() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let activity = ApObject::from_value(json!({
        "type": "ChatMessage",
        "id": "https://remote.example/messages/1",
        "actor": REMOTE_ACTOR,
        "to": [LOCAL_ACTOR],
        "content": "hi"
    }))
    .unwrap();

    let outcome = inbox.process(&alice, &alice_key, &activity).await.unwrap();
    assert_eq!(outcome, InboxOutcome::Processed);
    assert_eq!(backend.called_hooks(), vec!["inbox_new".to_string()]);
}

/// An Announce referencing a non-HTTP object cannot be resolved and is
/// dropped before any hook runs.
#[tokio::test]
async fn test_announce_of_unresolvable_reference_is_dropped() {
    let (backend, fetcher, inbox) = setup();
    let (alice, alice_key) = register_actor(&fetcher, LOCAL_ACTOR);
    register_actor(&fetcher, REMOTE_ACTOR);

    let announce = ApObject::from_value(json!({
        "type": "Announce",
        "actor": REMOTE_ACTOR,
        "object": "tag:legacy.example,2008:objectId=1234"
    }))
    .unwrap();

    let outcome = inbox.process(&alice, &alice_key, &announce).await.unwrap();
    assert_eq!(outcome, InboxOutcome::Dropped);
    assert!(backend.called_hooks().is_empty());
}
