//! Feed assembly: turn raw multi-relay batches into ordered, deduplicated,
//! cursor-paginated pages.
//!
//! The reply heuristic keeps one representative per thread within a batch: an
//! event whose non-mention `"e"` references overlap an earlier event's
//! references is dropped. It is order-sensitive by nature; the first event
//! seen wins.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::EventFilter;
use crate::nostr::source::{FetchOptions, RelaySource};

/// How far the reply heuristic remembers what it has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// Only within the batch that produced a page.
    #[default]
    Page,
    /// Across every page of one `FeedPaginator`.
    Feed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    /// Newest first.
    pub events: Vec<Event>,
    /// `page_param` for the next page; `None` once the feed is exhausted.
    pub next_cursor: Option<u64>,
}

impl FeedPage {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn has_next_page(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// What the engine remembers between batches when dedup spans pages.
#[derive(Debug, Clone, Default)]
pub struct DedupState {
    emitted: HashSet<String>,
    seen_refs: HashSet<String>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_emitted(&self, id: &str) -> bool {
        self.emitted.contains(id)
    }
}

/// Assemble one page from a raw batch, in arrival order.
///
/// Relay-level duplicates (same id) are always dropped. With `dedup` on, the
/// reply heuristic runs as well. At most `limit` events survive: the newest
/// ones, ties going to the earlier arrival.
pub fn assemble_page(
    batch: Vec<Event>,
    limit: usize,
    dedup: bool,
    state: &mut DedupState,
) -> FeedPage {
    let mut distinct: Vec<Event> = Vec::with_capacity(batch.len());
    let mut batch_ids = HashSet::with_capacity(batch.len());
    for event in batch {
        if batch_ids.insert(event.id.clone()) {
            distinct.push(event);
        }
    }

    // Keep the newest `limit` by timestamp without disturbing arrival order.
    if distinct.len() > limit {
        let mut order: Vec<usize> = (0..distinct.len()).collect();
        order.sort_by(|&a, &b| distinct[b].created_at.cmp(&distinct[a].created_at));
        let keep: HashSet<usize> = order.into_iter().take(limit).collect();
        distinct = distinct
            .into_iter()
            .enumerate()
            .filter_map(|(i, ev)| keep.contains(&i).then_some(ev))
            .collect();
    }

    let oldest_fetched = distinct.iter().map(|ev| ev.created_at).min();
    let fetched = distinct.len();

    let mut events = Vec::with_capacity(distinct.len());
    for event in distinct {
        if !state.emitted.insert(event.id.clone()) {
            continue;
        }
        if dedup {
            let refs: Vec<&str> = event.thread_refs().map(|r| r.id).collect();
            if refs.iter().any(|id| state.seen_refs.contains(*id)) {
                continue;
            }
            state
                .seen_refs
                .extend(refs.into_iter().map(str::to_string));
        }
        events.push(event);
    }

    // Stable: equal timestamps keep arrival order.
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    // An all-suppressed batch still advances past what was fetched.
    let boundary = events.last().map(|ev| ev.created_at).or(oldest_fetched);
    let next_cursor = boundary
        .and_then(|ts| ts.checked_sub(1))
        .filter(|cursor| *cursor > 0);

    debug!(
        target: "ark::feed",
        fetched,
        kept = events.len(),
        ?next_cursor,
        "assembled feed page"
    );

    FeedPage {
        events,
        next_cursor,
    }
}

/// One page request. `page_param == 0` asks for the most recent events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub filter: EventFilter,
    pub limit: usize,
    pub page_param: u64,
    pub dedup: bool,
}

/// Fetch and assemble a page. Cancellation yields `Error::Cancelled` and leaves
/// `state` untouched.
pub async fn fetch_page(
    source: &dyn RelaySource,
    relays: &[String],
    request: &PageRequest,
    cancel: &CancellationToken,
    state: &mut DedupState,
) -> Result<FeedPage> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let opts = FetchOptions {
        as_of: (request.page_param != 0).then_some(request.page_param),
        cancel: cancel.clone(),
    };
    let batch = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        batch = source.fetch_latest(relays, &request.filter, request.limit, opts) => batch?,
    };
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    Ok(assemble_page(batch, request.limit, request.dedup, state))
}

/// Walks a feed page by page, owning its cursor.
#[derive(Debug, Clone)]
pub struct FeedPaginator {
    filter: EventFilter,
    limit: usize,
    dedup: bool,
    scope: DedupScope,
    relays: Vec<String>,
    cursor: u64,
    exhausted: bool,
    state: DedupState,
}

impl FeedPaginator {
    pub fn new(filter: EventFilter, limit: usize, dedup: bool, scope: DedupScope) -> Self {
        Self {
            filter,
            limit,
            dedup,
            scope,
            relays: Vec::new(),
            cursor: 0,
            exhausted: false,
            state: DedupState::new(),
        }
    }

    /// Restrict fetches to these relays. Empty means all relays of the source.
    pub fn with_relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }

    /// Current `page_param`; 0 before the first page.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page. On error (including cancellation) the cursor and
    /// dedup memory stay where they were.
    pub async fn next_page(
        &mut self,
        source: &dyn RelaySource,
        cancel: &CancellationToken,
    ) -> Result<FeedPage> {
        if self.exhausted {
            return Ok(FeedPage::default());
        }

        let request = PageRequest {
            filter: self.filter.clone(),
            limit: self.limit,
            page_param: self.cursor,
            dedup: self.dedup,
        };
        let mut state = match self.scope {
            DedupScope::Page => DedupState::new(),
            DedupScope::Feed => self.state.clone(),
        };

        let page = fetch_page(source, &self.relays, &request, cancel, &mut state).await?;

        if self.scope == DedupScope::Feed {
            self.state = state;
        }
        match page.next_cursor {
            Some(cursor) => self.cursor = cursor,
            None => self.exhausted = true,
        }
        Ok(page)
    }

    /// Forget the cursor and dedup memory, back to the newest events.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.exhausted = false;
        self.state = DedupState::new();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::test_support::event;
    use crate::nostr::memory::MemoryRelaySource;

    fn created(page: &FeedPage) -> Vec<u64> {
        page.events.iter().map(|e| e.created_at).collect()
    }

    fn ids(page: &FeedPage) -> Vec<&str> {
        page.events.iter().map(|e| e.id.as_str()).collect()
    }

    #[test]
    fn test_relay_duplicates_removed_and_sorted() {
        let batch = vec![
            event("b", 200, &[]),
            event("a", 300, &[]),
            event("b", 200, &[]),
            event("c", 100, &[]),
        ];
        let page = assemble_page(batch, 10, false, &mut DedupState::new());
        assert_eq!(ids(&page), vec!["a", "b", "c"]);
        assert_eq!(page.next_cursor, Some(99));
    }

    #[test]
    fn test_reply_heuristic_first_seen_wins() {
        let batch = vec![
            event("r1", 300, &[&["e", "root"]]),
            event("r2", 400, &[&["e", "root"], &["e", "other"]]),
            event("r3", 200, &[&["e", "other"]]),
            event("m", 100, &[&["e", "root", "", "mention"]]),
        ];
        let page = assemble_page(batch.clone(), 10, true, &mut DedupState::new());
        assert_eq!(ids(&page), vec!["r1", "r3", "m"]);

        let page = assemble_page(batch, 10, false, &mut DedupState::new());
        assert_eq!(ids(&page), vec!["r2", "r1", "r3", "m"]);
    }

    #[test]
    fn test_dedup_is_deterministic() {
        let batch = vec![
            event("a", 10, &[&["e", "x"]]),
            event("b", 10, &[&["e", "x"]]),
            event("c", 10, &[]),
            event("d", 12, &[&["e", "y"]]),
        ];
        let first = assemble_page(batch.clone(), 10, true, &mut DedupState::new());
        let second = assemble_page(batch, 10, true, &mut DedupState::new());
        assert_eq!(first, second);
        // Equal timestamps keep arrival order.
        assert_eq!(ids(&first), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_limit_keeps_newest_in_arrival_order() {
        let batch = vec![
            event("old", 100, &[&["e", "x"]]),
            event("new", 300, &[&["e", "x"]]),
            event("mid", 200, &[]),
        ];
        let page = assemble_page(batch, 2, true, &mut DedupState::new());
        assert_eq!(ids(&page), vec!["new", "mid"]);
        assert_eq!(page.next_cursor, Some(199));
    }

    #[test]
    fn test_fully_suppressed_batch_still_advances() {
        let mut state = DedupState::new();
        state.emitted.insert("a".into());
        let page = assemble_page(vec![event("a", 50, &[])], 10, true, &mut state);
        assert!(page.is_empty());
        assert_eq!(page.next_cursor, Some(49));
    }

    #[test]
    fn test_empty_batch_ends_feed() {
        let page = assemble_page(Vec::new(), 10, true, &mut DedupState::new());
        assert!(page.is_empty());
        assert!(!page.has_next_page());
    }

    fn three_event_source() -> MemoryRelaySource {
        let source = MemoryRelaySource::with_relays(["wss://a"]);
        for (id, ts) in [("e300", 300), ("e200", 200), ("e100", 100)] {
            source.insert("wss://a", event(id, ts, &[]));
        }
        source
    }

    #[tokio::test]
    async fn test_limit_two_scenario() {
        let source = three_event_source();
        let cancel = CancellationToken::new();
        let mut request = PageRequest {
            filter: EventFilter::new().kind(1),
            limit: 2,
            page_param: 0,
            dedup: true,
        };

        let page = fetch_page(&source, &[], &request, &cancel, &mut DedupState::new())
            .await
            .unwrap();
        assert_eq!(created(&page), vec![300, 200]);
        assert_eq!(page.next_cursor, Some(199));

        request.page_param = 199;
        let page = fetch_page(&source, &[], &request, &cancel, &mut DedupState::new())
            .await
            .unwrap();
        assert_eq!(created(&page), vec![100]);
        assert_eq!(page.next_cursor, Some(99));

        request.page_param = 99;
        let page = fetch_page(&source, &[], &request, &cancel, &mut DedupState::new())
            .await
            .unwrap();
        assert!(page.is_empty());
        assert!(!page.has_next_page());
    }

    #[tokio::test]
    async fn test_pages_are_strictly_older() {
        let source = MemoryRelaySource::with_relays(["wss://a", "wss://b"]);
        for ts in (1..=25u64).rev() {
            let (relay, other) = if ts % 2 == 0 {
                ("wss://a", "wss://b")
            } else {
                ("wss://b", "wss://a")
            };
            source.insert(relay, event(&format!("e{ts}"), ts * 10, &[]));
            // Every third event lives on both relays.
            if ts % 3 == 0 {
                source.insert(other, event(&format!("e{ts}"), ts * 10, &[]));
            }
        }

        let cancel = CancellationToken::new();
        let mut paginator = FeedPaginator::new(EventFilter::new(), 4, false, DedupScope::Page);
        let mut seen = HashSet::new();
        let mut previous_min: Option<u64> = None;
        loop {
            let page = paginator.next_page(&source, &cancel).await.unwrap();
            if page.is_empty() {
                break;
            }
            let max = page.events.iter().map(|e| e.created_at).max().unwrap();
            if let Some(min) = previous_min {
                assert!(max < min);
            }
            previous_min = page.events.iter().map(|e| e.created_at).min();
            for ev in &page.events {
                assert!(seen.insert(ev.id.clone()), "event {} on two pages", ev.id);
            }
        }
        assert_eq!(seen.len(), 25);
        assert!(paginator.is_exhausted());
    }

    #[tokio::test]
    async fn test_cancel_mid_flight_keeps_cursor() {
        let source = three_event_source();
        let mut paginator = FeedPaginator::new(EventFilter::new(), 2, true, DedupScope::Feed);
        let cancel = CancellationToken::new();
        paginator.next_page(&source, &cancel).await.unwrap();
        assert_eq!(paginator.cursor(), 199);

        source.set_latency(Some(Duration::from_millis(200)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = paginator.next_page(&source, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(paginator.cursor(), 199);
        assert!(!paginator.is_exhausted());
    }

    #[tokio::test]
    async fn test_feed_scope_suppresses_across_pages() {
        let source = MemoryRelaySource::with_relays(["wss://a"]);
        source.insert("wss://a", event("first", 300, &[&["e", "root"]]));
        source.insert("wss://a", event("filler", 200, &[]));
        source.insert("wss://a", event("second", 100, &[&["e", "root"]]));

        let cancel = CancellationToken::new();
        let mut per_feed = FeedPaginator::new(EventFilter::new(), 2, true, DedupScope::Feed);
        per_feed.next_page(&source, &cancel).await.unwrap();
        let page = per_feed.next_page(&source, &cancel).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(page.next_cursor, Some(99));

        let mut per_page = FeedPaginator::new(EventFilter::new(), 2, true, DedupScope::Page);
        per_page.next_page(&source, &cancel).await.unwrap();
        let page = per_page.next_page(&source, &cancel).await.unwrap();
        assert_eq!(ids(&page), vec!["second"]);
    }

    #[tokio::test]
    async fn test_source_failure_propagates() {
        let source = three_event_source();
        source.set_unavailable(true);
        let mut paginator = FeedPaginator::new(EventFilter::new(), 2, true, DedupScope::Page);
        let err = paginator
            .next_page(&source, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(paginator.cursor(), 0);
    }
}
