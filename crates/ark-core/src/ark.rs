//! The object a UI talks to.
//!
//! `Ark` composes the cache, the relay source and the account manager. Reads
//! go to the cache first where a cached answer is final (events, profiles) and
//! to the relays where only the newest version will do (contact and relay
//! lists). Everything fetched along the way is cached.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use nostr_sdk::prelude::{EventBuilder, Kind, RelayUrl, Tag, Timestamp};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityStream;
use crate::config::ArkConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EVENT_TAG, PUBKEY_TAG, RELAY_TAG};
use crate::feed::{fetch_page, DedupState, FeedPage, FeedPaginator, PageRequest};
use crate::filter::EventFilter;
use crate::identifiers::{clean_event_id, clean_pubkey};
use crate::models::{
    relay_entries, Account, CachedProfile, Column, Interests, NewColumn, RelayEntry, RelayPurpose,
    SettingKey, Settings,
};
use crate::nostr::bunker::{NostrConnectConnector, RemoteSignerConnector};
use crate::nostr::client_source::ClientRelaySource;
use crate::nostr::source::{AuthorEvents, FetchOptions, RelaySource, SubscribeOptions};
use crate::session::{AccountManager, SessionState, SignerStatus};
use crate::store::db::unix_now;
use crate::store::Database;
use crate::thread::{reconstruct, Thread};
use crate::vault::{KeyringVault, Vault};

pub struct Ark {
    config: ArkConfig,
    store: Database,
    source: Arc<dyn RelaySource>,
    accounts: AccountManager,
    /// Held across read-modify-write of the account's replaceable lists.
    list_lock: Mutex<()>,
}

impl Ark {
    pub fn new(
        config: ArkConfig,
        store: Database,
        source: Arc<dyn RelaySource>,
        vault: Arc<dyn Vault>,
        connector: Arc<dyn RemoteSignerConnector>,
    ) -> Self {
        let accounts = AccountManager::new(store.clone(), vault, connector, &config);
        Self {
            config,
            store,
            source,
            accounts,
            list_lock: Mutex::new(()),
        }
    }

    /// Open the on-disk cache, connect to the configured relays and restore
    /// the active account. The signer is left for `init_signer`.
    pub async fn open(config: ArkConfig) -> Result<Self> {
        let store = Database::open(&config.data_dir)?;
        let source = ClientRelaySource::connect(
            &config.relays,
            config.connect_timeout(),
            config.fetch_timeout(),
        )
        .await?;

        let ark = Self::new(
            config,
            store,
            Arc::new(source),
            Arc::new(KeyringVault::default()),
            Arc::new(NostrConnectConnector),
        );
        ark.accounts.load()?;
        info!(target: "ark", data_dir = %ark.config.data_dir.display(), "ark ready");
        Ok(ark)
    }

    pub fn config(&self) -> &ArkConfig {
        &self.config
    }

    pub fn store(&self) -> &Database {
        &self.store
    }

    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    // --- session ---

    pub fn create_account(&self, pubkey: &str, secret_key: Option<&str>) -> Result<Account> {
        let pubkey = clean_pubkey(pubkey)?;
        self.accounts.create_account(&pubkey, secret_key)
    }

    pub fn current_account(&self) -> Option<Account> {
        self.accounts.account()
    }

    pub fn session_state(&self) -> SessionState {
        self.accounts.state()
    }

    /// Set up the signer, remote when the `nsecbunker` setting is on.
    pub async fn init_signer(&self) -> SignerStatus {
        let use_remote = match self.store.settings() {
            Ok(settings) => settings.nsecbunker,
            Err(e) => {
                warn!(target: "ark", "settings unreadable, using local signer: {e}");
                false
            }
        };
        self.accounts.init_signer(use_remote).await
    }

    /// End the session. Live activity streams close with it.
    pub fn logout(&self) -> Result<()> {
        self.accounts.logout()
    }

    // --- feeds ---

    /// One page of `filter` across every relay. `page_param == 0` is the
    /// newest page; pass the previous page's `next_cursor` to continue.
    pub async fn feed(
        &self,
        filter: &EventFilter,
        limit: usize,
        page_param: u64,
        dedup: bool,
        cancel: &CancellationToken,
    ) -> Result<FeedPage> {
        let request = PageRequest {
            filter: filter.clone(),
            limit,
            page_param,
            dedup,
        };
        let page = fetch_page(
            self.source.as_ref(),
            &[],
            &request,
            cancel,
            &mut DedupState::new(),
        )
        .await?;
        self.cache(&page.events, None);
        Ok(page)
    }

    /// A paginator using the configured dedup scope.
    pub fn paginator(&self, filter: EventFilter, limit: usize, dedup: bool) -> FeedPaginator {
        FeedPaginator::new(filter, limit, dedup, self.config.dedup_scope)
    }

    pub async fn next_page(
        &self,
        paginator: &mut FeedPaginator,
        cancel: &CancellationToken,
    ) -> Result<FeedPage> {
        let page = paginator.next_page(self.source.as_ref(), cancel).await?;
        self.cache(&page.events, None);
        Ok(page)
    }

    /// A page from a single relay, without dedup.
    pub async fn relay_events(
        &self,
        relay: &str,
        filter: &EventFilter,
        limit: usize,
        page_param: u64,
        cancel: &CancellationToken,
    ) -> Result<FeedPage> {
        let request = PageRequest {
            filter: filter.clone(),
            limit,
            page_param,
            dedup: false,
        };
        let relays = [relay.to_string()];
        let page = fetch_page(
            self.source.as_ref(),
            &relays,
            &request,
            cancel,
            &mut DedupState::new(),
        )
        .await?;
        self.cache(&page.events, Some(relay));
        Ok(page)
    }

    // --- events ---

    /// Every text note tagging `id`, as a reply tree.
    pub async fn thread(&self, id: &str) -> Result<Thread> {
        let id = clean_event_id(id)?;
        let filter = EventFilter::new()
            .kind(EventKind::TextNote.as_u16())
            .event(id.clone());
        let events = self.source.fetch_all(&[], &filter, None).await?;
        debug!(target: "ark", root = %id, count = events.len(), "thread fetched");
        self.cache(&events, None);
        Ok(reconstruct(&id, events))
    }

    pub async fn event_by_id(&self, id: &str) -> Result<Event> {
        let id = clean_event_id(id)?;
        if let Some(event) = self.store.event(&id)? {
            return Ok(event);
        }

        let filter = EventFilter::new().id(id.clone());
        let fetched = self
            .source
            .fetch_latest(&[], &filter, 1, FetchOptions::default())
            .await?;
        let event = fetched
            .into_iter()
            .find(|event| event.id == id)
            .ok_or_else(|| Error::not_found(format!("event {id}")))?;
        self.store.insert_event(&event, None)?;
        Ok(event)
    }

    pub async fn profile(&self, pubkey: &str) -> Result<CachedProfile> {
        let pubkey = clean_pubkey(pubkey)?;
        if let Some(cached) = self.store.profile(&pubkey)? {
            return Ok(cached);
        }

        let filter = EventFilter::new()
            .kind(EventKind::Metadata.as_u16())
            .author(pubkey.clone());
        let fetched = self
            .source
            .fetch_latest(&[], &filter, 1, FetchOptions::default())
            .await?;
        let metadata = newest(fetched).ok_or_else(|| Error::not_found(format!("profile {pubkey}")))?;
        self.store.upsert_profile_event(&metadata)?;
        self.store
            .profile(&pubkey)?
            .ok_or_else(|| Error::not_found(format!("profile {pubkey}")))
    }

    // --- contact list ---

    /// Followed pubkeys of `pubkey`, or of the active account.
    pub async fn contacts(&self, pubkey: Option<&str>) -> Result<Vec<String>> {
        let pubkey = self.target_pubkey(pubkey)?;
        let list = self
            .latest_replaceable(EventKind::Contacts.as_u16(), &pubkey)
            .await?;
        let contacts = list.as_ref().map(contact_pubkeys).unwrap_or_default();
        if self.accounts.current_pubkey().as_deref() == Some(pubkey.as_str()) {
            self.accounts.set_contacts(contacts.clone());
        }
        Ok(contacts)
    }

    pub async fn follow(&self, pubkey: &str) -> Result<Vec<String>> {
        let target = clean_pubkey(pubkey)?;
        let list = self
            .rewrite_list(EventKind::Contacts.as_u16(), |tags| {
                if !tags.iter().any(|tag| is_tag(tag, PUBKEY_TAG, &target)) {
                    tags.push(vec![PUBKEY_TAG.to_string(), target.clone()]);
                }
            })
            .await?;
        let contacts = contact_pubkeys(&list);
        self.accounts.set_contacts(contacts.clone());
        Ok(contacts)
    }

    pub async fn unfollow(&self, pubkey: &str) -> Result<Vec<String>> {
        let target = clean_pubkey(pubkey)?;
        let list = self
            .rewrite_list(EventKind::Contacts.as_u16(), |tags| {
                tags.retain(|tag| !is_tag(tag, PUBKEY_TAG, &target));
            })
            .await?;
        let contacts = contact_pubkeys(&list);
        self.accounts.set_contacts(contacts.clone());
        Ok(contacts)
    }

    /// Relay url to the followed authors that write there, from each
    /// contact's newest relay list.
    pub async fn relays_from_contacts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut contacts = self.accounts.contacts();
        if contacts.is_empty() {
            contacts = self.contacts(None).await?;
        }

        let filter = EventFilter::new().kind(EventKind::RelayList.as_u16());
        let mut lists = self
            .source
            .fetch_latest_per_author(contacts, Vec::new(), filter, 1);

        let mut relays: BTreeMap<String, Vec<String>> = BTreeMap::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = lists.next() => next,
            };
            let Some(AuthorEvents { author, events }) = next else {
                break;
            };
            let Some(list) = newest(events) else {
                continue;
            };
            for entry in relay_entries(&list).into_iter().filter(RelayEntry::writes) {
                relays.entry(entry.url).or_default().push(author.clone());
            }
        }
        debug!(target: "ark", relays = relays.len(), "outbox relays resolved");
        Ok(relays)
    }

    // --- relay list ---

    pub async fn relay_list(&self, pubkey: Option<&str>) -> Result<Vec<RelayEntry>> {
        let pubkey = self.target_pubkey(pubkey)?;
        let list = self
            .latest_replaceable(EventKind::RelayList.as_u16(), &pubkey)
            .await?;
        let entries = list.as_ref().map(relay_entries).unwrap_or_default();
        if self.accounts.current_pubkey().as_deref() == Some(pubkey.as_str()) {
            self.accounts
                .set_relays(entries.iter().map(|e| e.url.clone()).collect());
        }
        Ok(entries)
    }

    /// Add `url` to the account's relay list, replacing its purpose if
    /// already listed.
    pub async fn add_relay(&self, url: &str, purpose: RelayPurpose) -> Result<Vec<RelayEntry>> {
        let url = valid_relay_url(url)?;
        let entry = RelayEntry::new(url.clone(), purpose);
        let list = self
            .rewrite_list(EventKind::RelayList.as_u16(), |tags| {
                tags.retain(|tag| !is_tag(tag, RELAY_TAG, &url));
                tags.push(entry.to_tag());
            })
            .await?;
        let entries = relay_entries(&list);
        self.accounts
            .set_relays(entries.iter().map(|e| e.url.clone()).collect());
        Ok(entries)
    }

    pub async fn remove_relay(&self, url: &str) -> Result<Vec<RelayEntry>> {
        let url = valid_relay_url(url)?;
        let list = self
            .rewrite_list(EventKind::RelayList.as_u16(), |tags| {
                tags.retain(|tag| !is_tag(tag, RELAY_TAG, &url));
            })
            .await?;
        let entries = relay_entries(&list);
        self.accounts
            .set_relays(entries.iter().map(|e| e.url.clone()).collect());
        Ok(entries)
    }

    // --- publishing ---

    /// Sign and publish an event as the active account. `root` and `reply`
    /// become marked `"e"` tags; the author of the reply target is tagged
    /// when known.
    pub async fn publish(
        &self,
        kind: u16,
        content: &str,
        tags: Vec<Vec<String>>,
        root: Option<&str>,
        reply: Option<&str>,
    ) -> Result<Event> {
        self.accounts.signer()?;

        let mut tags = tags;
        let root = root.map(clean_event_id).transpose()?;
        let reply = reply.map(clean_event_id).transpose()?;

        if let Some(root) = &root {
            tags.push(marked_event_tag(root, "root"));
        }
        if let Some(reply) = &reply {
            if root.as_ref() != Some(reply) {
                tags.push(marked_event_tag(reply, "reply"));
            }
            match self.event_by_id(reply).await {
                Ok(target) => {
                    if !tags.iter().any(|tag| is_tag(tag, PUBKEY_TAG, &target.pubkey)) {
                        tags.push(vec![PUBKEY_TAG.to_string(), target.pubkey]);
                    }
                }
                Err(e) => debug!(target: "ark", "reply target unavailable: {e}"),
            }
        }

        let builder = EventBuilder::new(Kind::from(kind), content).tags(to_nostr_tags(&tags)?);
        self.sign_and_publish(builder).await
    }

    // --- live activity ---

    /// Live events matching `filter` until the stream is closed or the
    /// session ends.
    pub async fn activity(&self, filter: &EventFilter) -> Result<ActivityStream> {
        let opts = SubscribeOptions {
            close_on_completion: false,
            buffer: self.config.activity_buffer,
        };
        let subscription = self.source.subscribe(filter, opts).await?;
        debug!(target: "ark::activity", id = subscription.id(), "activity stream opened");
        Ok(ActivityStream::new(
            subscription,
            Some(self.store.clone()),
            self.accounts.session_token().child_token(),
        ))
    }

    /// Notes, reposts and reactions mentioning the active account from now on.
    pub async fn notifications(&self) -> Result<ActivityStream> {
        let pubkey = self
            .accounts
            .current_pubkey()
            .ok_or_else(|| Error::not_ready("no active account"))?;
        let filter = EventFilter::new()
            .kinds([
                EventKind::TextNote.as_u16(),
                EventKind::Repost.as_u16(),
                EventKind::Reaction.as_u16(),
            ])
            .pubkey(pubkey)
            .since(unix_now());
        self.activity(&filter).await
    }

    // --- direct messages ---

    /// Newest direct message from each sender to the active account, newest
    /// conversation first.
    pub async fn chats(&self) -> Result<Vec<Event>> {
        let me = self
            .accounts
            .current_pubkey()
            .ok_or_else(|| Error::not_ready("no active account"))?;
        let inbox = EventFilter::new()
            .kind(EventKind::EncryptedDirectMessage.as_u16())
            .pubkey(me);
        self.refresh_cache(std::slice::from_ref(&inbox)).await?;

        let mut latest: BTreeMap<String, Event> = BTreeMap::new();
        for event in self.store.query_events(&inbox)? {
            latest.entry(event.pubkey.clone()).or_insert(event);
        }
        let mut chats: Vec<Event> = latest.into_values().collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(chats)
    }

    /// Direct messages exchanged with `pubkey` in both directions, oldest
    /// first.
    pub async fn messages_with(&self, pubkey: &str) -> Result<Vec<Event>> {
        let them = clean_pubkey(pubkey)?;
        let me = self
            .accounts
            .current_pubkey()
            .ok_or_else(|| Error::not_ready("no active account"))?;
        let kind = EventKind::EncryptedDirectMessage.as_u16();
        let filters = [
            EventFilter::new().kind(kind).author(me.clone()).pubkey(them.clone()),
            EventFilter::new().kind(kind).author(them).pubkey(me),
        ];
        self.refresh_cache(&filters).await?;

        let mut messages = Vec::new();
        for filter in &filters {
            messages.extend(self.store.query_events(filter)?);
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        messages.dedup_by(|a, b| a.id == b.id);
        Ok(messages)
    }

    // --- columns ---

    pub fn columns(&self) -> Result<Vec<Column>> {
        let account = self.active_account_id()?;
        self.store.columns(account)
    }

    pub fn create_column(&self, column: &NewColumn) -> Result<Column> {
        let account = self.active_account_id()?;
        self.store.create_column(account, column)
    }

    pub fn update_column(&self, id: i64, title: &str, content: &str) -> Result<()> {
        match self.store.update_column(id, title, content)? {
            0 => Err(Error::not_found(format!("column {id}"))),
            _ => Ok(()),
        }
    }

    pub fn remove_column(&self, id: i64) -> Result<()> {
        match self.store.remove_column(id)? {
            0 => Err(Error::not_found(format!("column {id}"))),
            _ => Ok(()),
        }
    }

    // --- settings ---

    pub fn settings(&self) -> Result<Settings> {
        self.store.settings()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_setting(key, value).map(|_| ())
    }

    pub fn set_bool_setting(&self, key: SettingKey, value: bool) -> Result<()> {
        self.store.set_bool_setting(key, value).map(|_| ())
    }

    pub fn interests(&self) -> Result<Option<Interests>> {
        self.store.interests()
    }

    pub fn set_interests(&self, interests: &Interests) -> Result<()> {
        self.store.set_interests(interests).map(|_| ())
    }

    // --- cache maintenance ---

    /// Drop cached events and profiles. Accounts, columns and settings stay.
    pub fn clear_cache(&self) -> Result<usize> {
        let removed = self.store.clear_cache()?;
        info!(target: "ark", removed, "cache cleared");
        Ok(removed)
    }

    pub fn clear_profile_cache(&self, pubkey: &str) -> Result<()> {
        let pubkey = clean_pubkey(pubkey)?;
        self.store.clear_profile(&pubkey).map(|_| ())
    }

    // --- internals ---

    fn cache(&self, events: &[Event], relay: Option<&str>) {
        if events.is_empty() {
            return;
        }
        if let Err(e) = self.store.insert_events(events, relay) {
            warn!(target: "ark", count = events.len(), "could not cache events: {e}");
        }
    }

    /// Pull everything matching `filters` into the cache. Unreachable relays
    /// leave the cached answer in place.
    async fn refresh_cache(&self, filters: &[EventFilter]) -> Result<()> {
        for filter in filters {
            match self.source.fetch_all(&[], filter, None).await {
                Ok(events) => self.cache(&events, None),
                Err(e) if e.is_transient() => {
                    warn!(target: "ark", "relays unavailable, using cached messages: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn target_pubkey(&self, pubkey: Option<&str>) -> Result<String> {
        match pubkey {
            Some(pubkey) => clean_pubkey(pubkey),
            None => self
                .accounts
                .current_pubkey()
                .ok_or_else(|| Error::not_ready("no active account")),
        }
    }

    fn active_account_id(&self) -> Result<i64> {
        self.accounts
            .account()
            .map(|account| account.id)
            .ok_or_else(|| Error::not_ready("no active account"))
    }

    /// Newest version of a replaceable event, from the relays and the cache.
    /// The cache alone answers only when the relays cannot be reached.
    async fn latest_replaceable(&self, kind: u16, author: &str) -> Result<Option<Event>> {
        let cached = self.store.latest_event_by_kind_and_author(kind, author)?;
        let filter = EventFilter::new().kind(kind).author(author);
        let fetched = match self
            .source
            .fetch_latest(&[], &filter, 1, FetchOptions::default())
            .await
        {
            Ok(events) => newest(events),
            Err(e) if e.is_transient() && cached.is_some() => {
                warn!(target: "ark", kind, "relays unavailable, using cached list: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(event) = &fetched {
            self.store.insert_event(event, None)?;
        }
        Ok(match (fetched, cached) {
            (Some(fetched), Some(cached)) if cached.created_at > fetched.created_at => Some(cached),
            (fetched, cached) => fetched.or(cached),
        })
    }

    /// Read, edit and re-publish one of the account's replaceable lists. The
    /// whole sequence runs under `list_lock` so concurrent edits compose.
    async fn rewrite_list<F>(&self, kind: u16, edit: F) -> Result<Event>
    where
        F: FnOnce(&mut Vec<Vec<String>>),
    {
        let _guard = self.list_lock.lock().await;
        self.accounts.signer()?;
        let author = self
            .accounts
            .current_pubkey()
            .ok_or_else(|| Error::not_ready("no active account"))?;

        let current = self.latest_replaceable(kind, &author).await?;
        let (mut tags, content, previous) = match current {
            Some(event) => (event.tags, event.content, Some(event.created_at)),
            None => (Vec::new(), String::new(), None),
        };
        edit(&mut tags);

        let builder = EventBuilder::new(Kind::from(kind), content)
            .tags(to_nostr_tags(&tags)?)
            .custom_created_at(next_created_at(previous));
        self.sign_and_publish(builder).await
    }

    async fn sign_and_publish(&self, builder: EventBuilder) -> Result<Event> {
        let signed = self.accounts.sign(builder).await?;
        let relays = self.source.publish(&signed).await?;
        if relays.is_empty() {
            return Err(Error::source("no relay accepted the event"));
        }

        let event = Event::from(&signed);
        self.cache(std::slice::from_ref(&event), relays.first().map(String::as_str));
        info!(target: "ark", id = %event.id, kind = event.kind, relays = relays.len(), "published");
        Ok(event)
    }
}

/// Newest event by `created_at`; the first wins a tie.
fn newest(events: Vec<Event>) -> Option<Event> {
    events.into_iter().fold(None, |best, event| match best {
        Some(best) if best.created_at >= event.created_at => Some(best),
        _ => Some(event),
    })
}

fn is_tag(tag: &[String], name: &str, value: &str) -> bool {
    tag.first().map(String::as_str) == Some(name) && tag.get(1).map(String::as_str) == Some(value)
}

fn contact_pubkeys(list: &Event) -> Vec<String> {
    let mut contacts: Vec<String> = Vec::new();
    for pubkey in list.tag_values(PUBKEY_TAG) {
        if !contacts.iter().any(|c| c == pubkey) {
            contacts.push(pubkey.to_string());
        }
    }
    contacts
}

fn marked_event_tag(id: &str, marker: &str) -> Vec<String> {
    vec![
        EVENT_TAG.to_string(),
        id.to_string(),
        String::new(),
        marker.to_string(),
    ]
}

fn to_nostr_tags(tags: &[Vec<String>]) -> Result<Vec<Tag>> {
    tags.iter()
        .map(|tag| {
            Tag::parse(tag.clone()).map_err(|e| Error::invalid_input(format!("tag {tag:?}: {e}")))
        })
        .collect()
}

/// Replaceable events must strictly supersede the version they replace.
fn next_created_at(previous: Option<u64>) -> Timestamp {
    let now = Timestamp::now().as_secs();
    Timestamp::from_secs(previous.map_or(now, |previous| now.max(previous.saturating_add(1))))
}

fn valid_relay_url(url: &str) -> Result<String> {
    let url = url.trim();
    RelayUrl::parse(url).map_err(|e| Error::invalid_input(format!("relay url {url}: {e}")))?;
    Ok(url.to_string())
}
