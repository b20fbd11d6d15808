//! Remote signer (NIP-46) connection.
//!
//! The account's bootstrap key talks to the remote signer over a small fixed
//! set of relays. Connecting blocks until the handshake answers or the timeout
//! runs out.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr_connect::error::Error as NostrConnectError;
use nostr_connect::prelude::{NostrConnect, NostrConnectURI};
use nostr_sdk::prelude::{Keys, NostrSigner, PublicKey};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    InvalidUri,
    Rejected,
    Timeout,
    SignerUnavailable,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub message: String,
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(ConnectErrorKind::Timeout, "remote signer handshake timed out")
    }
}

/// A signer obtained through a completed handshake.
#[derive(Clone)]
pub struct RemoteSigner {
    pub user_pubkey: PublicKey,
    pub signer: Arc<dyn NostrSigner>,
}

impl fmt::Debug for RemoteSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSigner")
            .field("user_pubkey", &self.user_pubkey.to_hex())
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RemoteSignerConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        bunker_uri: &str,
        client_keys: Keys,
        timeout: Duration,
    ) -> Result<RemoteSigner, ConnectError>;
}

/// `bunker://<remote pubkey>?relay=...` for the given relays.
pub fn bunker_uri(remote_pubkey: &str, relays: &[String]) -> String {
    let query = relays
        .iter()
        .map(|relay| format!("relay={relay}"))
        .collect::<Vec<_>>()
        .join("&");
    if query.is_empty() {
        format!("bunker://{remote_pubkey}")
    } else {
        format!("bunker://{remote_pubkey}?{query}")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NostrConnectConnector;

impl NostrConnectConnector {
    fn map_nostr_connect_error(err: NostrConnectError) -> ConnectError {
        match err {
            NostrConnectError::Timeout => ConnectError::timeout(),
            NostrConnectError::SignerPublicKeyNotFound => ConnectError::new(
                ConnectErrorKind::SignerUnavailable,
                "remote signer public key not found",
            ),
            NostrConnectError::Response(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("reject") || lower.contains("denied") {
                    ConnectError::new(ConnectErrorKind::Rejected, msg)
                } else {
                    ConnectError::new(ConnectErrorKind::Other, msg)
                }
            }
            NostrConnectError::UnexpectedUri
            | NostrConnectError::PublicKeyNotMatchAppKeys
            | NostrConnectError::NIP46(_) => {
                ConnectError::new(ConnectErrorKind::InvalidUri, "invalid bunker URI")
            }
            other => ConnectError::new(ConnectErrorKind::Other, other.to_string()),
        }
    }

    fn map_signer_error(message: String) -> ConnectError {
        let lower = message.to_lowercase();
        let kind = if lower.contains("timeout") {
            ConnectErrorKind::Timeout
        } else if lower.contains("reject") || lower.contains("denied") {
            ConnectErrorKind::Rejected
        } else if lower.contains("not found") || lower.contains("signer unavailable") {
            ConnectErrorKind::SignerUnavailable
        } else {
            ConnectErrorKind::Other
        };
        ConnectError::new(kind, message)
    }
}

#[async_trait]
impl RemoteSignerConnector for NostrConnectConnector {
    async fn connect(
        &self,
        bunker_uri: &str,
        client_keys: Keys,
        timeout: Duration,
    ) -> Result<RemoteSigner, ConnectError> {
        let parsed = NostrConnectURI::parse(bunker_uri.trim())
            .map_err(|_| ConnectError::new(ConnectErrorKind::InvalidUri, "invalid bunker URI"))?;
        if parsed.relays().is_empty() {
            return Err(ConnectError::new(
                ConnectErrorKind::InvalidUri,
                "invalid bunker URI: missing relay",
            ));
        }

        let signer = NostrConnect::new(parsed, client_keys, timeout, None)
            .map_err(Self::map_nostr_connect_error)?;

        debug!(target: "ark::signer", "waiting for remote signer handshake");
        let user_pubkey = match tokio::time::timeout(timeout, signer.get_public_key()).await {
            Ok(Ok(pubkey)) => pubkey,
            Ok(Err(e)) => return Err(Self::map_signer_error(e.to_string())),
            Err(_) => {
                warn!(target: "ark::signer", "remote signer did not answer within {timeout:?}");
                return Err(ConnectError::timeout());
            }
        };

        Ok(RemoteSigner {
            user_pubkey,
            signer: Arc::new(signer),
        })
    }
}
