//! Long-lived "new activity" listener.
//!
//! A pull-based stream over a relay subscription. The buffer is bounded: when
//! the reader falls behind, the oldest events are dropped and counted in
//! `missed()`. Its lifetime is tied to the session, not to any feed request,
//! so cancelling a page fetch never closes it.

use std::collections::{HashSet, VecDeque};

use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::ACTIVITY_RECENT_IDS;
use crate::event::Event;
use crate::nostr::source::{Delivery, Subscription};
use crate::store::Database;

pub struct ActivityStream {
    subscription: Subscription,
    store: Option<Database>,
    session: CancellationToken,
    missed: u64,
    recent: VecDeque<String>,
    recent_ids: HashSet<String>,
}

impl ActivityStream {
    /// `session` ends the stream when cancelled. Delivered events are cached
    /// in `store` when one is given.
    pub fn new(subscription: Subscription, store: Option<Database>, session: CancellationToken) -> Self {
        Self {
            subscription,
            store,
            session,
            missed: 0,
            recent: VecDeque::new(),
            recent_ids: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.subscription.id()
    }

    /// Events dropped because the reader fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn close(&self) {
        self.subscription.unsubscribe();
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed() || self.session.is_cancelled()
    }

    /// Next new event, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.session.cancelled() => {
                    self.subscription.unsubscribe();
                    Delivery::Closed
                }
                delivery = self.subscription.recv() => delivery,
            };

            match delivery {
                Delivery::Event(event) => {
                    if !self.remember(&event.id) {
                        continue;
                    }
                    if let Some(store) = &self.store {
                        if let Err(e) = store.insert_event(&event, None) {
                            warn!(target: "ark::activity", "could not cache event: {e}");
                        }
                    }
                    return Some(event);
                }
                Delivery::Lagged(dropped) => {
                    self.missed += dropped;
                    debug!(target: "ark::activity", dropped, total = self.missed, "reader fell behind");
                }
                Delivery::Closed => return None,
            }
        }
    }

    /// Adapt into a `Stream` that ends when the activity stream closes.
    pub fn into_stream(self) -> BoxStream<'static, Event> {
        stream::unfold(self, |mut activity| async move {
            activity.next().await.map(|event| (event, activity))
        })
        .boxed()
    }

    /// False when `id` was delivered recently.
    fn remember(&mut self, id: &str) -> bool {
        if self.recent_ids.contains(id) {
            return false;
        }
        if self.recent.len() >= ACTIVITY_RECENT_IDS {
            if let Some(oldest) = self.recent.pop_front() {
                self.recent_ids.remove(&oldest);
            }
        }
        self.recent.push_back(id.to_string());
        self.recent_ids.insert(id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_support::event;
    use crate::filter::EventFilter;
    use crate::nostr::memory::MemoryRelaySource;
    use crate::nostr::source::{RelaySource, SubscribeOptions};

    async fn activity(
        source: &MemoryRelaySource,
        buffer: usize,
        store: Option<Database>,
        session: CancellationToken,
    ) -> ActivityStream {
        let subscription = source
            .subscribe(
                &EventFilter::new().kind(1),
                SubscribeOptions {
                    close_on_completion: false,
                    buffer,
                },
            )
            .await
            .unwrap();
        ActivityStream::new(subscription, store, session)
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_counts() {
        let source = MemoryRelaySource::with_relays(["wss://a"]);
        let mut stream = activity(&source, 2, None, CancellationToken::new()).await;

        for i in 0..5 {
            source.insert("wss://a", event(&format!("e{i}"), i, &[]));
        }

        assert_eq!(stream.next().await.unwrap().id, "e3");
        assert_eq!(stream.missed(), 3);
        assert_eq!(stream.next().await.unwrap().id, "e4");
    }

    #[tokio::test]
    async fn test_redelivered_events_are_skipped_and_cached() {
        let store = Database::in_memory().unwrap();
        let source = MemoryRelaySource::with_relays(["wss://a", "wss://b"]);
        let mut stream = activity(&source, 16, Some(store.clone()), CancellationToken::new()).await;

        source.insert("wss://a", event("x", 1, &[]));
        source.insert("wss://b", event("x", 1, &[]));
        source.insert("wss://b", event("y", 2, &[]));

        assert_eq!(stream.next().await.unwrap().id, "x");
        assert_eq!(stream.next().await.unwrap().id, "y");
        assert!(store.event("x").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_end_closes_stream_but_page_cancel_does_not() {
        let source = MemoryRelaySource::with_relays(["wss://a"]);
        let session = CancellationToken::new();
        let page_cancel = CancellationToken::new();
        let mut stream = activity(&source, 16, None, session.child_token()).await;

        page_cancel.cancel();
        source.insert("wss://a", event("x", 1, &[]));
        assert_eq!(stream.next().await.unwrap().id, "x");

        session.cancel();
        assert!(stream.next().await.is_none());
        assert!(stream.is_closed());
        assert_eq!(source.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_into_stream_ends_on_close() {
        let source = MemoryRelaySource::with_relays(["wss://a"]);
        let stream = activity(&source, 16, None, CancellationToken::new()).await;
        source.insert("wss://a", event("x", 1, &[]));
        stream.close();

        let collected: Vec<Event> = stream.into_stream().collect().await;
        assert!(collected.is_empty());
    }
}
