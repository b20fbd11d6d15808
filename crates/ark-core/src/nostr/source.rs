//! Contract the core consumes from the relay layer.
//!
//! Every call may return fewer events than requested. An empty batch is the
//! only signal that a query has run out of data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::event::Event;
use crate::filter::EventFilter;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Inclusive upper bound on `created_at`. `None` means "most recent".
    pub as_of: Option<u64>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// End the stream once stored events have been delivered.
    pub close_on_completion: bool,
    /// Events held for a slow reader before the oldest are dropped.
    pub buffer: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            close_on_completion: false,
            buffer: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorEvents {
    pub author: String,
    pub events: Vec<Event>,
}

#[async_trait]
pub trait RelaySource: Send + Sync {
    /// Relays this source currently talks to.
    async fn relay_urls(&self) -> Vec<String>;

    /// Newest `limit` events matching `filter`, optionally as of a timestamp.
    /// An empty `relays` slice means every relay of the source.
    async fn fetch_latest(
        &self,
        relays: &[String],
        filter: &EventFilter,
        limit: usize,
        opts: FetchOptions,
    ) -> Result<Vec<Event>>;

    async fn fetch_all(
        &self,
        relays: &[String],
        filter: &EventFilter,
        since: Option<u64>,
    ) -> Result<Vec<Event>>;

    async fn subscribe(&self, filter: &EventFilter, opts: SubscribeOptions)
        -> Result<Subscription>;

    /// Lazily yields the newest `count` events per author. Authors with no
    /// match still yield an empty entry.
    fn fetch_latest_per_author(
        &self,
        authors: Vec<String>,
        relays: Vec<String>,
        filter: EventFilter,
        count: usize,
    ) -> BoxStream<'static, AuthorEvents>;

    /// Publish a signed event, returning the relays that accepted it.
    async fn publish(&self, event: &nostr_sdk::Event) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(Event),
    /// The reader fell behind and this many of the oldest events were dropped.
    Lagged(u64),
    Closed,
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    receiver: broadcast::Receiver<Event>,
    handle: CancellationToken,
    /// Events dropped before reaching `receiver`, bumped by whoever feeds it.
    upstream_lag: Arc<AtomicU64>,
}

impl Subscription {
    pub fn new(id: String, receiver: broadcast::Receiver<Event>, handle: CancellationToken) -> Self {
        Self::with_lag_counter(id, receiver, handle, Arc::default())
    }

    /// Like [`Subscription::new`], with a counter the feeding task adds to
    /// when it loses events upstream of the channel.
    pub fn with_lag_counter(
        id: String,
        receiver: broadcast::Receiver<Event>,
        handle: CancellationToken,
        upstream_lag: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id,
            receiver,
            handle,
            upstream_lag,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token that stops the subscription when cancelled.
    pub fn handle(&self) -> CancellationToken {
        self.handle.clone()
    }

    pub fn unsubscribe(&self) {
        self.handle.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub async fn recv(&mut self) -> Delivery {
        if self.handle.is_cancelled() {
            return Delivery::Closed;
        }
        let skipped = self.upstream_lag.swap(0, Ordering::Relaxed);
        if skipped > 0 {
            return Delivery::Lagged(skipped);
        }
        tokio::select! {
            biased;
            _ = self.handle.cancelled() => Delivery::Closed,
            received = self.receiver.recv() => match received {
                Ok(event) => Delivery::Event(event),
                Err(RecvError::Lagged(missed)) => Delivery::Lagged(missed),
                Err(RecvError::Closed) => Delivery::Closed,
            },
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_support::event;

    #[tokio::test]
    async fn test_subscription_reports_lag_and_close() {
        let (tx, rx) = broadcast::channel(2);
        let mut sub = Subscription::new("sub".into(), rx, CancellationToken::new());

        for i in 0..4 {
            tx.send(event(&format!("e{i}"), i, &[])).unwrap();
        }

        assert_eq!(sub.recv().await, Delivery::Lagged(2));
        assert_eq!(sub.recv().await, Delivery::Event(event("e2", 2, &[])));
        assert_eq!(sub.recv().await, Delivery::Event(event("e3", 3, &[])));

        sub.unsubscribe();
        assert_eq!(sub.recv().await, Delivery::Closed);
    }

    #[tokio::test]
    async fn test_upstream_lag_is_reported_once() {
        let (tx, rx) = broadcast::channel(4);
        let lag = Arc::new(AtomicU64::new(0));
        let mut sub = Subscription::with_lag_counter(
            "sub".into(),
            rx,
            CancellationToken::new(),
            lag.clone(),
        );

        lag.fetch_add(5, Ordering::Relaxed);
        lag.fetch_add(2, Ordering::Relaxed);
        tx.send(event("e0", 0, &[])).unwrap();

        assert_eq!(sub.recv().await, Delivery::Lagged(7));
        assert_eq!(sub.recv().await, Delivery::Event(event("e0", 0, &[])));
        assert_eq!(lag.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_subscription_closes_when_sender_drops() {
        let (tx, rx) = broadcast::channel(4);
        let mut sub = Subscription::new("sub".into(), rx, CancellationToken::new());
        drop(tx);
        assert_eq!(sub.recv().await, Delivery::Closed);
    }
}
