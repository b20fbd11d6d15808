//! Local event cache and feed assembly for a Nostr client.
//!
//! The relay network is slow, duplicated and unordered. This crate keeps a
//! local cache of what it has seen and turns raw relay answers into ordered,
//! deduplicated, paginated feeds and reply trees.

pub mod activity;
pub mod ark;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod feed;
pub mod filter;
pub mod identifiers;
pub mod models;
pub mod nostr;
pub mod session;
pub mod store;
pub mod thread;
pub mod tracing_setup;
pub mod vault;

pub use activity::ActivityStream;
pub use ark::Ark;
pub use config::ArkConfig;
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use feed::{DedupScope, FeedPage, FeedPaginator};
pub use filter::EventFilter;
pub use identifiers::{clean_event_id, clean_pubkey};
pub use session::{AccountManager, SessionState, SignerStatus};
pub use store::Database;
pub use thread::{reconstruct, Thread, ThreadNode};
pub use tracing_setup::init_tracing;
