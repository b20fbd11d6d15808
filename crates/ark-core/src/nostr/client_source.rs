use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use nostr_sdk::prelude::*;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{AuthorEvents, FetchOptions, RelaySource, SubscribeOptions, Subscription};
use crate::error::{Error, Result};
use crate::event::Event as CachedEvent;
use crate::filter::EventFilter;

/// Relay source backed by a `nostr_sdk::Client` pool.
#[derive(Debug, Clone)]
pub struct ClientRelaySource {
    client: Client,
    fetch_timeout: Duration,
}

impl ClientRelaySource {
    pub fn from_client(client: Client, fetch_timeout: Duration) -> Self {
        Self {
            client,
            fetch_timeout,
        }
    }

    /// Add the relays and wait (bounded) until at least one is connected.
    pub async fn connect(
        relay_urls: &[String],
        connect_timeout: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::default();
        for url in relay_urls {
            if let Err(e) = client.add_relay(url.as_str()).await {
                warn!(target: "ark::relay", relay = %url, "skipping relay: {e}");
            }
        }

        let connect_start = std::time::Instant::now();
        client.connect().await;
        let poll_interval = Duration::from_millis(100);
        loop {
            let connected = client
                .relays()
                .await
                .values()
                .filter(|r| r.status() == RelayStatus::Connected)
                .count();
            if connected > 0 {
                info!(
                    target: "ark::relay",
                    "{connected} relay(s) connected after {:?}",
                    connect_start.elapsed()
                );
                break;
            }
            if connect_start.elapsed() >= connect_timeout {
                // Keep the client: relays keep retrying in the background and
                // every call already tolerates partial answers.
                warn!(
                    target: "ark::relay",
                    "no relays connected after {:?}",
                    connect_timeout
                );
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        Ok(Self::from_client(client, fetch_timeout))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn fetch(&self, relays: &[String], filter: Filter) -> Result<Vec<CachedEvent>> {
        let events = if relays.is_empty() {
            self.client.fetch_events(filter, self.fetch_timeout).await
        } else {
            self.client
                .fetch_events_from(relays.iter().map(String::as_str), filter, self.fetch_timeout)
                .await
        }
        .map_err(Error::source)?;

        Ok(events.iter().map(CachedEvent::from).collect())
    }
}

#[async_trait]
impl RelaySource for ClientRelaySource {
    async fn relay_urls(&self) -> Vec<String> {
        self.client
            .relays()
            .await
            .keys()
            .map(|url| url.to_string())
            .collect()
    }

    async fn fetch_latest(
        &self,
        relays: &[String],
        filter: &EventFilter,
        limit: usize,
        opts: FetchOptions,
    ) -> Result<Vec<CachedEvent>> {
        let mut nostr_filter = filter.to_nostr()?.limit(limit);
        if let Some(as_of) = opts.as_of {
            nostr_filter = nostr_filter.until(Timestamp::from(as_of));
        }

        let events = tokio::select! {
            biased;
            _ = opts.cancel.cancelled() => return Err(Error::Cancelled),
            events = self.fetch(relays, nostr_filter) => events?,
        };
        debug!(target: "ark::relay", "fetch_latest returned {} events", events.len());
        Ok(events)
    }

    async fn fetch_all(
        &self,
        relays: &[String],
        filter: &EventFilter,
        since: Option<u64>,
    ) -> Result<Vec<CachedEvent>> {
        let mut nostr_filter = filter.to_nostr()?;
        if let Some(since) = since {
            nostr_filter = nostr_filter.since(Timestamp::from(since));
        }
        self.fetch(relays, nostr_filter).await
    }

    async fn subscribe(
        &self,
        filter: &EventFilter,
        opts: SubscribeOptions,
    ) -> Result<Subscription> {
        let nostr_filter = filter.to_nostr()?;
        let auto_close = opts.close_on_completion.then(|| {
            SubscribeAutoCloseOptions::default().exit_policy(ReqExitPolicy::ExitOnEOSE)
        });

        // Listen before subscribing so no early event slips past.
        let mut notifications = self.client.notifications();
        let output = self
            .client
            .subscribe(nostr_filter, auto_close)
            .await
            .map_err(Error::source)?;
        let subscription_id = output.val;

        let (sender, receiver) = broadcast::channel(opts.buffer.max(1));
        let handle = CancellationToken::new();
        let token = handle.clone();
        let client = self.client.clone();
        let id = subscription_id.clone();
        let close_on_completion = opts.close_on_completion;
        let lag = Arc::new(AtomicU64::new(0));
        let pump_lag = lag.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = client.unsubscribe(&id).await;
                        break;
                    }
                    notification = notifications.recv() => match notification {
                        Ok(RelayPoolNotification::Event { subscription_id, event, .. }) => {
                            if subscription_id == id {
                                let _ = sender.send(CachedEvent::from(event.as_ref()));
                            }
                        }
                        Ok(RelayPoolNotification::Message { message, .. }) => {
                            if let RelayMessage::EndOfStoredEvents(eose_id) = &message {
                                if close_on_completion && eose_id.to_string() == id.to_string() {
                                    break;
                                }
                            }
                        }
                        Ok(RelayPoolNotification::Shutdown) => break,
                        #[allow(unreachable_patterns)]
                        Ok(_) => {}
                        // Counts pool-wide notifications, so it is an upper
                        // bound on what this subscription missed.
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(target: "ark::relay", "notification pump lagged by {skipped}");
                            pump_lag.fetch_add(skipped, Ordering::Relaxed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!(target: "ark::relay", subscription = %id, "subscription pump stopped");
        });

        Ok(Subscription::with_lag_counter(
            subscription_id.to_string(),
            receiver,
            handle,
            lag,
        ))
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
            .then(move |author| {
                let source = source.clone();
                let relays = relays.clone();
                let filter = filter.clone().author(author.clone());
                async move {
                    let events = match filter.to_nostr() {
                        Ok(nostr_filter) => source
                            .fetch(&relays, nostr_filter.limit(count))
                            .await
                            .unwrap_or_else(|e| {
                                warn!(target: "ark::relay", %author, "per-author fetch failed: {e}");
                                Vec::new()
                            }),
                        Err(e) => {
                            warn!(target: "ark::relay", %author, "bad author filter: {e}");
                            Vec::new()
                        }
                    };
                    let mut events = events;
                    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                    events.truncate(count);
                    AuthorEvents { author, events }
                }
            })
            .boxed()
    }

    async fn publish(&self, event: &nostr_sdk::Event) -> Result<Vec<String>> {
        let output = self.client.send_event(event).await.map_err(Error::source)?;
        if output.success.is_empty() {
            return Err(Error::source(format!(
                "no relay accepted event {}",
                event.id.to_hex()
            )));
        }
        Ok(output.success.iter().map(|url| url.to_string()).collect())
    }
}
