use nostr_sdk::prelude::{EventId, Filter, Kind, PublicKey, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{Event, EVENT_TAG, PUBKEY_TAG};

/// Query over events, in the protocol's JSON filter shape so it can be stored
/// as column content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    #[serde(rename = "#e", default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub pubkeys: Vec<String>,
    #[serde(rename = "#t", default, skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    /// Match events carrying an `"e"` tag for this id.
    pub fn event(mut self, id: impl Into<String>) -> Self {
        self.events.push(id.into());
        self
    }

    /// Match events carrying a `"p"` tag for this pubkey.
    pub fn pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.pubkeys.push(pubkey.into());
        self
    }

    pub fn hashtag(mut self, tag: impl Into<String>) -> Self {
        self.hashtags.push(tag.into());
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&event.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !tag_matches(event, EVENT_TAG, &self.events)
            || !tag_matches(event, PUBKEY_TAG, &self.pubkeys)
            || !tag_matches(event, "t", &self.hashtags)
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }
        true
    }

    /// Convert into the relay transport's filter. Ids and keys must be hex.
    pub fn to_nostr(&self) -> Result<Filter> {
        let mut filter = Filter::new();
        if !self.ids.is_empty() {
            filter = filter.ids(parse_ids(&self.ids)?);
        }
        if !self.authors.is_empty() {
            filter = filter.authors(parse_pubkeys(&self.authors)?);
        }
        if !self.kinds.is_empty() {
            filter = filter.kinds(self.kinds.iter().map(|k| Kind::from(*k)));
        }
        if !self.events.is_empty() {
            filter = filter.events(parse_ids(&self.events)?);
        }
        if !self.pubkeys.is_empty() {
            filter = filter.pubkeys(parse_pubkeys(&self.pubkeys)?);
        }
        if !self.hashtags.is_empty() {
            filter = filter.hashtags(self.hashtags.clone());
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since));
        }
        if let Some(until) = self.until {
            filter = filter.until(Timestamp::from(until));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        Ok(filter)
    }
}

fn tag_matches(event: &Event, tag_name: &str, wanted: &[String]) -> bool {
    wanted.is_empty()
        || event
            .tag_values(tag_name)
            .any(|value| wanted.iter().any(|w| w == value))
}

fn parse_ids(ids: &[String]) -> Result<Vec<EventId>> {
    ids.iter()
        .map(|id| {
            EventId::from_hex(id).map_err(|e| Error::invalid_input(format!("event id {id}: {e}")))
        })
        .collect()
}

fn parse_pubkeys(keys: &[String]) -> Result<Vec<PublicKey>> {
    keys.iter()
        .map(|pk| {
            PublicKey::from_hex(pk).map_err(|e| Error::invalid_input(format!("pubkey {pk}: {e}")))
        })
        .collect()
}
