//! Account and signer lifecycle.
//!
//! `NoAccount -> AccountLoaded -> Signed`, and `logout` back to `NoAccount`.
//! The session is an explicit context owned by the `AccountManager`; nothing
//! about the current account lives in globals.

use std::sync::Arc;
use std::time::Duration;

use nostr_sdk::prelude::{EventBuilder, Keys, NostrSigner, PublicKey};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ArkConfig;
use crate::error::{Error, Result};
use crate::models::settings::SettingKey;
use crate::models::Account;
use crate::nostr::bunker::{bunker_uri, RemoteSignerConnector};
use crate::store::Database;
use crate::vault::{bunker_key_name, secret_key_name, Vault};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoAccount,
    AccountLoaded,
    Signed,
}

/// Outcome of `init_signer`. Never an error: without a signer the client
/// runs read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerStatus {
    Ready,
    NotReady { reason: String },
}

impl SignerStatus {
    fn not_ready(reason: impl Into<String>) -> Self {
        SignerStatus::NotReady {
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SignerStatus::Ready)
    }
}

#[derive(Default)]
struct Session {
    account: Option<Account>,
    signer: Option<Arc<dyn NostrSigner>>,
    relays: Vec<String>,
    /// Cancelled when the session ends; long-lived streams hang off it.
    token: CancellationToken,
}

impl Session {
    fn for_account(account: Account) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }
}

pub struct AccountManager {
    store: Database,
    vault: Arc<dyn Vault>,
    connector: Arc<dyn RemoteSignerConnector>,
    bootstrap_relays: Vec<String>,
    signer_timeout: Duration,
    session: RwLock<Session>,
}

impl AccountManager {
    pub fn new(
        store: Database,
        vault: Arc<dyn Vault>,
        connector: Arc<dyn RemoteSignerConnector>,
        config: &ArkConfig,
    ) -> Self {
        Self {
            store,
            vault,
            connector,
            bootstrap_relays: config.bootstrap_signer_relays.clone(),
            signer_timeout: config.signer_timeout(),
            session: RwLock::new(Session::default()),
        }
    }

    /// Restore the active account from the store, if any.
    pub fn load(&self) -> Result<Option<Account>> {
        let account = self.store.active_account()?;
        self.replace_session(account.clone().map(Session::for_account).unwrap_or_default());
        if let Some(account) = &account {
            info!(target: "ark::session", account = account.id, "restored active account");
        }
        Ok(account)
    }

    /// Make `pubkey` the active account, creating it when unknown. A supplied
    /// secret must belong to `pubkey` and is kept in the vault.
    pub fn create_account(&self, pubkey: &str, secret_key: Option<&str>) -> Result<Account> {
        let public_key = PublicKey::from_hex(pubkey)
            .map_err(|e| Error::invalid_input(format!("pubkey {pubkey}: {e}")))?;
        let pubkey = public_key.to_hex();

        if let Some(secret) = secret_key {
            let keys = Keys::parse(secret)
                .map_err(|e| Error::invalid_input(format!("secret key: {e}")))?;
            if keys.public_key() != public_key {
                return Err(Error::invalid_input("secret key does not match pubkey"));
            }
        }

        let (account, outcome) = self.store.activate_account(&pubkey)?;
        if let Some(secret) = secret_key {
            if let Err(e) = self.vault.save(&secret_key_name(&pubkey), secret) {
                if let Err(undo) = self.store.deactivate_account(account.id) {
                    warn!(target: "ark::session", "could not deactivate account after vault failure: {undo}");
                }
                return Err(Error::storage(e.to_string()));
            }
        }
        debug!(target: "ark::session", account = account.id, ?outcome, "account created");
        self.replace_session(Session::for_account(account.clone()));
        Ok(account)
    }

    /// Keep the key used to reach the remote signer for the active account.
    pub fn save_bunker_key(&self, secret: &str) -> Result<()> {
        let pubkey = self
            .current_pubkey()
            .ok_or_else(|| Error::not_ready("no active account"))?;
        Keys::parse(secret).map_err(|e| Error::invalid_input(format!("bunker key: {e}")))?;
        self.vault
            .save(&bunker_key_name(&pubkey), secret)
            .map_err(|e| Error::storage(e.to_string()))
    }

    /// Obtain a signer for the active account.
    ///
    /// Remote mode loads the bootstrap key and waits, bounded by the signer
    /// timeout, for the remote signer to answer. Local mode loads the
    /// account's own secret. Every failure, vault errors included, yields
    /// `NotReady`.
    pub async fn init_signer(&self, use_remote_signer: bool) -> SignerStatus {
        let Some(pubkey) = self.current_pubkey() else {
            return SignerStatus::not_ready("no active account");
        };

        let signer = if use_remote_signer {
            self.remote_signer(&pubkey).await
        } else {
            self.local_signer(&pubkey)
        };

        match signer {
            Ok(signer) => {
                let mut session = self.session.write();
                // The account may have changed while the handshake ran.
                if session.account.as_ref().map(|a| a.pubkey.as_str()) != Some(pubkey.as_str()) {
                    return SignerStatus::not_ready("account changed during signer setup");
                }
                session.signer = Some(signer);
                info!(target: "ark::session", remote = use_remote_signer, "signer ready");
                SignerStatus::Ready
            }
            Err(reason) => {
                warn!(target: "ark::session", remote = use_remote_signer, "signer not ready: {reason}");
                SignerStatus::NotReady { reason }
            }
        }
    }

    fn local_signer(&self, pubkey: &str) -> std::result::Result<Arc<dyn NostrSigner>, String> {
        let secret = match self.vault.load(&secret_key_name(pubkey)) {
            Ok(Some(secret)) => secret,
            Ok(None) => return Err("no secret key stored for account".to_string()),
            Err(e) => return Err(format!("vault unavailable: {e}")),
        };
        let keys = Keys::parse(&secret).map_err(|e| format!("stored secret key is invalid: {e}"))?;
        if keys.public_key().to_hex() != pubkey {
            return Err("stored secret key belongs to another pubkey".to_string());
        }
        Ok(Arc::new(keys))
    }

    async fn remote_signer(&self, pubkey: &str) -> std::result::Result<Arc<dyn NostrSigner>, String> {
        let secret = match self.vault.load(&bunker_key_name(pubkey)) {
            Ok(Some(secret)) => secret,
            Ok(None) => return Err("no remote signer key stored for account".to_string()),
            Err(e) => return Err(format!("vault unavailable: {e}")),
        };
        let client_keys =
            Keys::parse(&secret).map_err(|e| format!("stored bunker key is invalid: {e}"))?;

        let uri = bunker_uri(pubkey, &self.bootstrap_relays);
        let connect = self.connector.connect(&uri, client_keys, self.signer_timeout);
        let remote = match tokio::time::timeout(self.signer_timeout, connect).await {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => return Err(format!("remote signer: {e}")),
            Err(_) => return Err(format!("remote signer timed out after {:?}", self.signer_timeout)),
        };

        if remote.user_pubkey.to_hex() != pubkey {
            return Err("remote signer answered for another pubkey".to_string());
        }
        Ok(remote.signer)
    }

    /// End the session. Safe to call repeatedly.
    pub fn logout(&self) -> Result<()> {
        let Some(account) = self.account() else {
            self.replace_session(Session::default());
            return Ok(());
        };

        self.store.set_bool_setting(SettingKey::Nsecbunker, false)?;
        self.store.deactivate_account(account.id)?;

        for key in [secret_key_name(&account.pubkey), bunker_key_name(&account.pubkey)] {
            if let Err(e) = self.vault.remove(&key) {
                warn!(target: "ark::session", "could not remove vault entry: {e}");
            }
        }
        self.replace_session(Session::default());
        info!(target: "ark::session", account = account.id, "logged out");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        let session = self.session.read();
        match (&session.account, &session.signer) {
            (None, _) => SessionState::NoAccount,
            (Some(_), None) => SessionState::AccountLoaded,
            (Some(_), Some(_)) => SessionState::Signed,
        }
    }

    pub fn account(&self) -> Option<Account> {
        self.session.read().account.clone()
    }

    pub fn current_pubkey(&self) -> Option<String> {
        self.session
            .read()
            .account
            .as_ref()
            .map(|account| account.pubkey.clone())
    }

    pub fn signer(&self) -> Result<Arc<dyn NostrSigner>> {
        self.session
            .read()
            .signer
            .clone()
            .ok_or_else(|| Error::not_ready("no signer for this session"))
    }

    /// Sign with the session signer as the active account.
    pub async fn sign(&self, builder: EventBuilder) -> Result<nostr_sdk::Event> {
        let signer = self.signer()?;
        let pubkey = self
            .current_pubkey()
            .ok_or_else(|| Error::not_ready("no active account"))?;
        let public_key = PublicKey::from_hex(&pubkey)
            .map_err(|e| Error::invalid_input(format!("pubkey {pubkey}: {e}")))?;

        signer
            .sign_event(builder.build(public_key))
            .await
            .map_err(Error::source)
    }

    pub fn contacts(&self) -> Vec<String> {
        self.session
            .read()
            .account
            .as_ref()
            .map(|account| account.contacts.clone())
            .unwrap_or_default()
    }

    pub fn set_contacts(&self, contacts: Vec<String>) {
        if let Some(account) = self.session.write().account.as_mut() {
            account.contacts = contacts;
        }
    }

    pub fn relays(&self) -> Vec<String> {
        self.session.read().relays.clone()
    }

    pub fn set_relays(&self, relays: Vec<String>) {
        self.session.write().relays = relays;
    }

    /// Token cancelled when this session ends.
    pub fn session_token(&self) -> CancellationToken {
        self.session.read().token.clone()
    }

    fn replace_session(&self, next: Session) {
        let previous = std::mem::replace(&mut *self.session.write(), next);
        previous.token.cancel();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;

    use super::*;
    use crate::nostr::bunker::{ConnectError, RemoteSigner};

    /// Answers like a remote signer holding `keys`, or never answers.
    pub struct FakeConnector {
        pub keys: Option<Keys>,
    }

    #[async_trait]
    impl RemoteSignerConnector for FakeConnector {
        async fn connect(
            &self,
            _bunker_uri: &str,
            _client_keys: Keys,
            _timeout: Duration,
        ) -> std::result::Result<RemoteSigner, ConnectError> {
            match &self.keys {
                Some(keys) => Ok(RemoteSigner {
                    user_pubkey: keys.public_key(),
                    signer: Arc::new(keys.clone()),
                }),
                None => std::future::pending().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeConnector;
    use super::*;
    use crate::vault::MemoryVault;
    use nostr_sdk::prelude::{Kind, ToBech32};

    struct Fixture {
        store: Database,
        vault: Arc<MemoryVault>,
        manager: AccountManager,
    }

    fn fixture(remote: Option<Keys>) -> Fixture {
        let store = Database::in_memory().unwrap();
        let vault = Arc::new(MemoryVault::new());
        let mut config = ArkConfig::new("unused");
        config.signer_timeout_secs = 1;
        let manager = AccountManager::new(
            store.clone(),
            vault.clone(),
            Arc::new(FakeConnector { keys: remote }),
            &config,
        );
        Fixture {
            store,
            vault,
            manager,
        }
    }

    fn nsec(keys: &Keys) -> String {
        keys.secret_key().to_bech32().unwrap()
    }

    #[tokio::test]
    async fn test_local_signer_lifecycle() {
        let fx = fixture(None);
        let keys = Keys::generate();
        let pubkey = keys.public_key().to_hex();
        assert_eq!(fx.manager.state(), SessionState::NoAccount);

        fx.manager.create_account(&pubkey, Some(&nsec(&keys))).unwrap();
        assert_eq!(fx.manager.state(), SessionState::AccountLoaded);
        assert!(fx.vault.contains(&pubkey));
        assert!(matches!(fx.manager.signer(), Err(Error::NotReady { .. })));

        assert_eq!(fx.manager.init_signer(false).await, SignerStatus::Ready);
        assert_eq!(fx.manager.state(), SessionState::Signed);

        let event = fx
            .manager
            .sign(EventBuilder::new(Kind::TextNote, "hello"))
            .await
            .unwrap();
        assert_eq!(event.pubkey, keys.public_key());
        assert!(event.verify().is_ok());
    }

    #[tokio::test]
    async fn test_missing_or_unreadable_key_is_not_ready() {
        let fx = fixture(None);
        assert!(!fx.manager.init_signer(false).await.is_ready());

        let pubkey = Keys::generate().public_key().to_hex();
        fx.manager.create_account(&pubkey, None).unwrap();
        assert!(!fx.manager.init_signer(false).await.is_ready());

        fx.vault.set_failing(true);
        assert!(!fx.manager.init_signer(false).await.is_ready());
        assert_eq!(fx.manager.state(), SessionState::AccountLoaded);
    }

    #[test]
    fn test_secret_must_match_pubkey() {
        let fx = fixture(None);
        let pubkey = Keys::generate().public_key().to_hex();
        let other = Keys::generate();
        let err = fx
            .manager
            .create_account(&pubkey, Some(&nsec(&other)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        assert!(fx.store.accounts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_signer_handshake() {
        let user = Keys::generate();
        let fx = fixture(Some(user.clone()));
        fx.manager
            .create_account(&user.public_key().to_hex(), None)
            .unwrap();

        assert!(!fx.manager.init_signer(true).await.is_ready());

        fx.manager.save_bunker_key(&nsec(&Keys::generate())).unwrap();
        assert_eq!(fx.manager.init_signer(true).await, SignerStatus::Ready);
    }

    #[tokio::test]
    async fn test_remote_signer_timeout_is_not_ready() {
        let fx = fixture(None);
        let user = Keys::generate();
        fx.manager
            .create_account(&user.public_key().to_hex(), None)
            .unwrap();
        fx.manager.save_bunker_key(&nsec(&Keys::generate())).unwrap();

        let status = fx.manager.init_signer(true).await;
        assert!(matches!(status, SignerStatus::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let fx = fixture(None);
        let keys = Keys::generate();
        let pubkey = keys.public_key().to_hex();
        fx.manager.create_account(&pubkey, Some(&nsec(&keys))).unwrap();
        fx.manager.save_bunker_key(&nsec(&Keys::generate())).unwrap();
        fx.store.set_bool_setting(SettingKey::Nsecbunker, true).unwrap();
        fx.manager.init_signer(false).await;
        let token = fx.manager.session_token();

        fx.manager.logout().unwrap();
        fx.manager.logout().unwrap();

        assert_eq!(fx.manager.state(), SessionState::NoAccount);
        assert!(fx.manager.account().is_none());
        assert!(token.is_cancelled());
        assert!(!fx.vault.contains(&pubkey));
        assert!(!fx.vault.contains(&bunker_key_name(&pubkey)));
        assert!(fx.store.active_account().unwrap().is_none());
        assert_eq!(fx.store.setting("nsecbunker").unwrap().as_deref(), Some("0"));
        assert_eq!(fx.store.accounts().unwrap().len(), 1);
    }

    #[test]
    fn test_logout_retries_after_storage_failure() {
        let fx = fixture(None);
        let keys = Keys::generate();
        let pubkey = keys.public_key().to_hex();
        fx.manager.create_account(&pubkey, Some(&nsec(&keys))).unwrap();
        let token = fx.manager.session_token();

        fx.store
            .conn()
            .unwrap()
            .execute_batch("ALTER TABLE settings RENAME TO settings_off")
            .unwrap();
        assert!(matches!(
            fx.manager.logout(),
            Err(Error::StorageUnavailable { .. })
        ));
        // Nothing was torn down, so the logout can be retried.
        assert_eq!(fx.manager.account().unwrap().pubkey, pubkey);
        assert!(fx.vault.contains(&pubkey));
        assert!(!token.is_cancelled());

        fx.store
            .conn()
            .unwrap()
            .execute_batch("ALTER TABLE settings_off RENAME TO settings")
            .unwrap();
        fx.manager.logout().unwrap();
        assert!(fx.store.active_account().unwrap().is_none());
        assert!(!fx.vault.contains(&pubkey));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_create_account_keeps_no_secret_when_activation_fails() {
        let fx = fixture(None);
        let keys = Keys::generate();
        let pubkey = keys.public_key().to_hex();
        fx.store
            .conn()
            .unwrap()
            .execute_batch("ALTER TABLE accounts RENAME TO accounts_off")
            .unwrap();

        assert!(fx.manager.create_account(&pubkey, Some(&nsec(&keys))).is_err());
        assert!(!fx.vault.contains(&pubkey));
        assert_eq!(fx.manager.state(), SessionState::NoAccount);
    }

    #[test]
    fn test_create_account_rolls_back_when_vault_fails() {
        let fx = fixture(None);
        let keys = Keys::generate();
        let pubkey = keys.public_key().to_hex();
        fx.vault.set_failing(true);

        assert!(matches!(
            fx.manager.create_account(&pubkey, Some(&nsec(&keys))),
            Err(Error::StorageUnavailable { .. })
        ));
        assert!(fx.store.active_account().unwrap().is_none());
        assert_eq!(fx.manager.state(), SessionState::NoAccount);
    }

    #[test]
    fn test_switching_accounts_keeps_one_active() {
        let fx = fixture(None);
        let first = Keys::generate().public_key().to_hex();
        let second = Keys::generate().public_key().to_hex();
        fx.manager.create_account(&first, None).unwrap();
        let token = fx.manager.session_token();
        fx.manager.create_account(&second, None).unwrap();

        assert!(token.is_cancelled());
        let active: Vec<_> = fx
            .store
            .accounts()
            .unwrap()
            .into_iter()
            .filter(|a| a.is_active)
            .map(|a| a.pubkey)
            .collect();
        assert_eq!(active, vec![second.clone()]);

        let fresh = fixture(None);
        fresh.store.activate_account(&second).unwrap();
        assert_eq!(fresh.manager.load().unwrap().unwrap().pubkey, second);
        assert_eq!(fresh.manager.state(), SessionState::AccountLoaded);
    }

    #[test]
    fn test_contacts_live_in_session() {
        let fx = fixture(None);
        fx.manager.set_contacts(vec!["x".into()]);
        assert!(fx.manager.contacts().is_empty());

        fx.manager
            .create_account(&Keys::generate().public_key().to_hex(), None)
            .unwrap();
        fx.manager.set_contacts(vec!["x".into()]);
        assert_eq!(fx.manager.contacts(), vec!["x".to_string()]);
        assert!(fx.manager.account().unwrap().follows("x"));
    }
}
