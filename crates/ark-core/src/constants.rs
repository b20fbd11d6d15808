//! Application-wide constants
//!
//! Relay lists and defaults shared by the config layer and the facade.

/// Relays used when no configuration says otherwise.
pub const DEFAULT_RELAYS: [&str; 3] = [
    "wss://relay.damus.io",
    "wss://relay.nostr.band/all",
    "wss://nostr.mutinywallet.com",
];

/// Relays used to reach a remote signer during the bootstrap handshake.
pub const BOOTSTRAP_SIGNER_RELAYS: [&str; 2] =
    ["wss://relay.nsecbunker.com", "wss://nostr.vulpem.com"];

/// Directory name under the platform data dir.
pub const DATA_DIR_NAME: &str = "ark";

pub const DEFAULT_SIGNER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Events held for a slow activity reader before the oldest are dropped.
pub const DEFAULT_ACTIVITY_BUFFER: usize = 256;

/// Ids an activity stream remembers to skip redeliveries.
pub const ACTIVITY_RECENT_IDS: usize = 1024;

/// Default page size for feeds.
pub const DEFAULT_FEED_LIMIT: usize = 20;
