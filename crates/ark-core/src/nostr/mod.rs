pub mod bunker;
pub mod client_source;
pub mod memory;
pub mod source;

pub use bunker::{
    bunker_uri, ConnectError, ConnectErrorKind, NostrConnectConnector, RemoteSigner,
    RemoteSignerConnector,
};
pub use client_source::ClientRelaySource;
pub use memory::MemoryRelaySource;
pub use source::{
    AuthorEvents, Delivery, FetchOptions, RelaySource, SubscribeOptions, Subscription,
};
