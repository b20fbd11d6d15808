/// Secret key vault.
///
/// Secrets are keyed by pubkey (`"{pubkey}"`) or by a pubkey plus purpose
/// (`"{pubkey}.bunker"`). The relational cache never sees them.
///
/// `KeyringVault` uses OS-backed secure storage:
/// - macOS/iOS: Keychain
/// - Linux: Secret Service API (gnome-keyring, KWallet, etc.)
/// - Windows: Credential Manager
use std::collections::HashMap;

use keyring::Entry;
use parking_lot::Mutex;

const SERVICE_NAME: &str = "com.ark.nostr-client";
const BUNKER_SUFFIX: &str = "bunker";

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Vault unavailable: {0}")]
    Unavailable(String),
}

/// Vault key holding an account's own secret.
pub fn secret_key_name(pubkey: &str) -> String {
    pubkey.to_string()
}

/// Vault key holding the bootstrap key used to reach a remote signer.
pub fn bunker_key_name(pubkey: &str) -> String {
    format!("{pubkey}.{BUNKER_SUFFIX}")
}

pub trait Vault: Send + Sync {
    fn save(&self, key: &str, value: &str) -> Result<(), VaultError>;

    /// `Ok(None)` when nothing is stored under `key`.
    fn load(&self, key: &str) -> Result<Option<String>, VaultError>;

    /// Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), VaultError>;
}

#[derive(Debug, Clone)]
pub struct KeyringVault {
    service: String,
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringVault {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Vault for KeyringVault {
    fn save(&self, key: &str, value: &str) -> Result<(), VaultError> {
        let entry = Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, VaultError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::Keyring(e)),
        }
    }

    fn remove(&self, key: &str) -> Result<(), VaultError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(VaultError::Keyring(e)),
        }
    }
}

/// Process-local vault for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryVault {
    entries: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as a locked or missing OS keyring would.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn check(&self) -> Result<(), VaultError> {
        if *self.failing.lock() {
            return Err(VaultError::Unavailable("memory vault set to fail".into()));
        }
        Ok(())
    }
}

impl Vault for MemoryVault {
    fn save(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.check()?;
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, VaultError> {
        self.check()?;
        Ok(self.entries.lock().get(key).cloned())
    }

    fn remove(&self, key: &str) -> Result<(), VaultError> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }
}
