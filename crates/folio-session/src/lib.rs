//! folio-session: page delivery protocol over a persistent message channel
//!
//! - `channel`      - `Channel` transport trait; websocket and in-memory implementations
//! - `protocol`     - wire message shapes (`initialise`, `loadPage`, chunk events)
//! - `reassembly`   - chunk and merged-group reassembly with count-based completion
//! - `structure`    - structural metadata and the unit fetch plan
//! - `client`       - `SessionClient` protocol state machine
//! - `cache`        - per-book `ContentCache`, flushed on teardown
//! - `orchestrator` - `FetchOrchestrator`: cache-aware, in-order unit retrieval
//! - `metadata`     - HTTP metadata lookup

pub mod cache;
pub mod channel;
pub mod client;
pub mod metadata;
pub mod orchestrator;
pub mod protocol;
pub mod reassembly;
pub mod structure;

pub use cache::ContentCache;
pub use channel::{Channel, MemoryChannel, WsChannel};
pub use client::{Credentials, SessionClient, SessionState};
pub use orchestrator::{ContentFetch, FetchOrchestrator};
pub use structure::{StructuralMetadata, UnitRef};
pub use metadata::{fetch_metadata, parse_metadata_response};
