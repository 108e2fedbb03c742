//! fedbox - An ActivityPub processing core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Embedding application                     │
//! │  - HTTP server exposing inbox/outbox endpoints              │
//! │  - Storage, retry policy, rendering                         │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ implements                │ calls
//! ┌───────────────▼─────────────┐ ┌───────────▼─────────────────┐
//! │   Backend / Fetcher traits  │ │   Outbox / Inbox pipelines  │
//! │  - side-effect hooks        │ │  - validation + enrichment  │
//! │  - followers, delivery      │ │  - signature verification   │
//! │  - remote resource fetch    │ │  - recipient resolution     │
//! └─────────────────────────────┘ └─────────────────────────────┘
//! ```
//!
//! Outbound: construct an activity (or use [`outbox::builder`]), post it
//! through [`outbox::Outbox`]; the pipeline validates, assigns id and
//! timestamp, fires backend hooks, resolves recipients (expanding remote
//! collections), and hands transport-signed payloads to the backend's
//! delivery hook, one per recipient inbox, in parallel, collecting
//! per-recipient outcomes.
//!
//! Inbound: hand the raw request to [`inbox::Inbox`]; the pipeline
//! authenticates it (HTTP signature and/or embedded document signature),
//! parses and validates the activity, resolves its actor, and dispatches
//! the backend hook for the verb. Unknown verbs are stored through the
//! generic hook, never rejected.
//!
//! # Modules
//!
//! - `object`: open JSON object model with typed accessors
//! - `actor`: actor documents and public-key descriptors
//! - `key`: RSA keypair handling
//! - `signature`: transport-level HTTP signatures
//! - `ldsig`: document-level embedded signatures
//! - `recipients`: addressing expansion and collection walking
//! - `outbox` / `inbox`: the two processing pipelines
//! - `backend`: the pluggable side-effect and fetch seams
//! - `fetch`: default `reqwest`-based fetcher with URL safety checks
//! - `webfinger`: account handle discovery documents
//! - `config`: configuration management
//! - `error`: error types

pub mod actor;
pub mod backend;
pub mod config;
pub mod error;
pub mod fetch;
pub mod inbox;
pub mod key;
pub mod ldsig;
pub mod object;
pub mod outbox;
pub mod recipients;
pub mod signature;
pub mod webfinger;

pub use actor::{Actor, PublicKeyDescriptor};
pub use backend::{Backend, Fetcher};
pub use config::{AuthPolicy, FederationConfig};
pub use error::{Error, Result};
pub use inbox::{Inbox, InboundRequest, InboxOutcome, InboxReceipt};
pub use key::KeyPair;
pub use object::{ActivityKind, ApObject, ObjectKind, ObjectRef, AS_PUBLIC};
pub use outbox::{DeliveryResult, Outbox, OutboxReceipt};
pub use recipients::{RecipientResolver, Resolution};
pub use signature::{SignatureHeaders, SignedPayload};
