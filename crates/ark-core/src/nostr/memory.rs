//! In-process relay source.
//!
//! Holds events per relay url and answers queries the way a set of relays
//! would: each relay answers on its own, so the same event can come back once
//! per relay that stores it. Used for offline operation and in tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::source::{AuthorEvents, FetchOptions, RelaySource, SubscribeOptions, Subscription};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::EventFilter;

struct LiveSubscription {
    filter: EventFilter,
    sender: broadcast::Sender<Event>,
    handle: CancellationToken,
}

#[derive(Default)]
struct Inner {
    relays: BTreeMap<String, Vec<Event>>,
    live: Vec<LiveSubscription>,
    published: Vec<Event>,
    next_subscription: u64,
    unavailable: bool,
    latency: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryRelaySource {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryRelaySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relays<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source = Self::new();
        {
            let mut inner = source.inner.write();
            for url in urls {
                inner.relays.entry(url.into()).or_default();
            }
        }
        source
    }

    /// Store an event on one relay and push it to live subscribers.
    pub fn insert(&self, relay: &str, event: Event) {
        let mut inner = self.inner.write();
        inner.live.retain(|sub| !sub.handle.is_cancelled());
        for sub in &inner.live {
            if sub.filter.matches(&event) {
                let _ = sub.sender.send(event.clone());
            }
        }
        inner.relays.entry(relay.to_string()).or_default().push(event);
    }

    /// Make every call fail with `SourceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().unavailable = unavailable;
    }

    /// Delay every fetch, so cancellation can land mid-flight.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.write().latency = latency;
    }

    /// Events received through `publish`, oldest first.
    pub fn published(&self) -> Vec<Event> {
        self.inner.read().published.clone()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.inner
            .read()
            .live
            .iter()
            .filter(|sub| !sub.handle.is_cancelled())
            .count()
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.read().unavailable {
            return Err(Error::source("memory relay source marked unavailable"));
        }
        Ok(())
    }

    /// Matching events grouped per relay, in relay order then insertion order.
    fn query(&self, relays: &[String], filter: &EventFilter) -> Vec<Vec<Event>> {
        let inner = self.inner.read();
        inner
            .relays
            .iter()
            .filter(|(url, _)| relays.is_empty() || relays.contains(url))
            .map(|(_, events)| {
                events
                    .iter()
                    .filter(|ev| filter.matches(ev))
                    .cloned()
                    .collect()
            })
            .collect()
    }

    fn newest(mut events: Vec<Event>, limit: usize) -> Vec<Event> {
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        events
    }
}

#[async_trait]
impl RelaySource for MemoryRelaySource {
    async fn relay_urls(&self) -> Vec<String> {
        self.inner.read().relays.keys().cloned().collect()
    }

    async fn fetch_latest(
        &self,
        relays: &[String],
        filter: &EventFilter,
        limit: usize,
        opts: FetchOptions,
    ) -> Result<Vec<Event>> {
        let latency = self.inner.read().latency;
        if let Some(latency) = latency {
            tokio::select! {
                _ = opts.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        if opts.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.check_available()?;

        let mut filter = filter.clone();
        if let Some(as_of) = opts.as_of {
            filter.until = Some(filter.until.map_or(as_of, |until| until.min(as_of)));
        }

        Ok(self
            .query(relays, &filter)
            .into_iter()
            .flat_map(|events| Self::newest(events, limit))
            .collect())
    }

    async fn fetch_all(
        &self,
        relays: &[String],
        filter: &EventFilter,
        since: Option<u64>,
    ) -> Result<Vec<Event>> {
        self.check_available()?;
        let mut filter = filter.clone();
        if since.is_some() {
            filter.since = since;
        }
        Ok(self.query(relays, &filter).into_iter().flatten().collect())
    }

    async fn subscribe(
        &self,
        filter: &EventFilter,
        opts: SubscribeOptions,
    ) -> Result<Subscription> {
        self.check_available()?;

        let stored: Vec<Event> = self.query(&[], filter).into_iter().flatten().collect();
        let (sender, receiver) = broadcast::channel(opts.buffer.max(1));
        let handle = CancellationToken::new();

        for event in stored {
            let _ = sender.send(event);
        }

        let mut inner = self.inner.write();
        inner.next_subscription += 1;
        let id = format!("memory-{}", inner.next_subscription);
        if !opts.close_on_completion {
            inner.live.push(LiveSubscription {
                filter: filter.clone(),
                sender,
                handle: handle.clone(),
            });
        }

        Ok(Subscription::new(id, receiver, handle))
    }

    fn fetch_latest_per_author(
        &self,
        authors: Vec<String>,
        relays: Vec<String>,
        filter: EventFilter,
        count: usize,
    ) -> BoxStream<'static, AuthorEvents> {
        let source = self.clone();
        stream::iter(authors)
            .map(move |author| {
                let filter = filter.clone().author(author.clone());
                let events: Vec<Event> = if source.check_available().is_ok() {
                    source.query(&relays, &filter).into_iter().flatten().collect()
                } else {
                    Vec::new()
                };
                let mut seen = HashSet::new();
                let mut events = Self::newest(events, usize::MAX);
                events.retain(|ev| seen.insert(ev.id.clone()));
                events.truncate(count);
                AuthorEvents { author, events }
            })
            .boxed()
    }

    async fn publish(&self, event: &nostr_sdk::Event) -> Result<Vec<String>> {
        self.check_available()?;
        let event = Event::from(event);
        let urls = self.relay_urls().await;
        for url in &urls {
            self.insert(url, event.clone());
        }
        self.inner.write().published.push(event);
        Ok(urls)
    }
}
