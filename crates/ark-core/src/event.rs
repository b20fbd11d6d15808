//! Protocol events as the cache and feed engines see them.
//!
//! Events arrive from relays already signed; the core never re-verifies them and
//! never mutates one after creation.

use serde::{Deserialize, Serialize};

/// Tag name for event references.
pub const EVENT_TAG: &str = "e";
/// Tag name for pubkey references.
pub const PUBKEY_TAG: &str = "p";
/// Tag name for relay entries in a relay list.
pub const RELAY_TAG: &str = "r";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sig: String,
}

impl Event {
    pub fn event_kind(&self) -> EventKind {
        EventKind::from(self.kind)
    }

    /// First value of the first tag with the given name.
    pub fn tag_value(&self, tag_name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(tag_name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// All values for a tag that may appear multiple times (e.g. "p", "t").
    pub fn tag_values<'a>(&'a self, tag_name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(tag_name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    pub fn has_tag(&self, tag_name: &str) -> bool {
        self.tags
            .iter()
            .any(|tag| tag.first().map(String::as_str) == Some(tag_name))
    }

    /// Every `"e"` reference in tag order, mentions included.
    pub fn event_refs(&self) -> impl Iterator<Item = EventRef<'_>> {
        self.tags.iter().filter_map(|tag| EventRef::parse(tag))
    }

    /// `"e"` references that take part in threading (mentions excluded).
    pub fn thread_refs(&self) -> impl Iterator<Item = EventRef<'_>> {
        self.event_refs().filter(|r| !r.is_mention())
    }

    pub fn referenced_pubkeys(&self) -> Vec<String> {
        self.tag_values(PUBKEY_TAG).map(str::to_string).collect()
    }
}

/// Role of an `"e"` tag, from its fourth element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker<'a> {
    Root,
    Reply,
    Mention,
    Other(&'a str),
}

impl<'a> Marker<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        match raw {
            "" => None,
            "root" => Some(Marker::Root),
            "reply" => Some(Marker::Reply),
            "mention" => Some(Marker::Mention),
            other => Some(Marker::Other(other)),
        }
    }
}

/// A parsed `["e", <id>, <relay>?, <marker>?]` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRef<'a> {
    pub id: &'a str,
    pub relay: Option<&'a str>,
    pub marker: Option<Marker<'a>>,
}

impl<'a> EventRef<'a> {
    pub fn parse(tag: &'a [String]) -> Option<Self> {
        if tag.first().map(String::as_str) != Some(EVENT_TAG) {
            return None;
        }
        let id = tag.get(1).map(String::as_str).filter(|id| !id.is_empty())?;
        let relay = tag.get(2).map(String::as_str).filter(|r| !r.is_empty());
        let marker = tag.get(3).and_then(|m| Marker::parse(m));
        Some(Self { id, relay, marker })
    }

    pub fn is_mention(&self) -> bool {
        self.marker == Some(Marker::Mention)
    }
}

/// Known protocol kinds. Anything else is carried as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Metadata,
    TextNote,
    Contacts,
    EncryptedDirectMessage,
    Repost,
    Reaction,
    GenericRepost,
    FileMetadata,
    Highlight,
    RelayList,
    LongFormArticle,
    AppRecommendation,
    AppHandler,
    Unknown(u16),
}

impl EventKind {
    pub fn as_u16(self) -> u16 {
        match self {
            EventKind::Metadata => 0,
            EventKind::TextNote => 1,
            EventKind::Contacts => 3,
            EventKind::EncryptedDirectMessage => 4,
            EventKind::Repost => 6,
            EventKind::Reaction => 7,
            EventKind::GenericRepost => 16,
            EventKind::FileMetadata => 1063,
            EventKind::Highlight => 9802,
            EventKind::RelayList => 10002,
            EventKind::LongFormArticle => 30023,
            EventKind::AppRecommendation => 31989,
            EventKind::AppHandler => 31990,
            EventKind::Unknown(kind) => kind,
        }
    }

    /// Kinds a feed renders as a note of its own.
    pub fn is_note(self) -> bool {
        matches!(
            self,
            EventKind::TextNote
                | EventKind::Repost
                | EventKind::GenericRepost
                | EventKind::FileMetadata
                | EventKind::Highlight
                | EventKind::LongFormArticle
        )
    }
}

impl From<u16> for EventKind {
    fn from(kind: u16) -> Self {
        match kind {
            0 => EventKind::Metadata,
            1 => EventKind::TextNote,
            3 => EventKind::Contacts,
            4 => EventKind::EncryptedDirectMessage,
            6 => EventKind::Repost,
            7 => EventKind::Reaction,
            16 => EventKind::GenericRepost,
            1063 => EventKind::FileMetadata,
            9802 => EventKind::Highlight,
            10002 => EventKind::RelayList,
            30023 => EventKind::LongFormArticle,
            31989 => EventKind::AppRecommendation,
            31990 => EventKind::AppHandler,
            other => EventKind::Unknown(other),
        }
    }
}

impl From<EventKind> for u16 {
    fn from(kind: EventKind) -> Self {
        kind.as_u16()
    }
}

impl From<&nostr_sdk::Event> for Event {
    fn from(event: &nostr_sdk::Event) -> Self {
        Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            created_at: event.created_at.as_secs(),
            kind: event.kind.as_u16(),
            tags: event.tags.iter().map(|tag| tag.as_slice().to_vec()).collect(),
            content: event.content.clone(),
            sig: event.sig.to_string(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::event;
    use super::*;

    #[test]
    fn test_event_refs_parse_markers() {
        let ev = event(
            "c",
            10,
            &[
                &["e", "a", "", "root"],
                &["e", "b", "wss://relay.example", "reply"],
                &["e", "m", "", "mention"],
                &["p", "someone"],
                &["e", ""],
            ],
        );

        let refs: Vec<_> = ev.event_refs().collect();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].marker, Some(Marker::Root));
        assert_eq!(refs[1].relay, Some("wss://relay.example"));
        assert!(refs[2].is_mention());

        let thread: Vec<_> = ev.thread_refs().map(|r| r.id).collect();
        assert_eq!(thread, vec!["a", "b"]);
    }

    #[test]
    fn test_tag_helpers() {
        let ev = event("x", 1, &[&["t", "rust"], &["t", "nostr"], &["title", "Hi"]]);
        assert_eq!(ev.tag_value("title"), Some("Hi"));
        assert_eq!(ev.tag_value("missing"), None);
        assert_eq!(ev.tag_values("t").collect::<Vec<_>>(), vec!["rust", "nostr"]);
        assert!(ev.has_tag("t"));
        assert!(!ev.has_tag("e"));
    }

    #[test]
    fn test_unknown_kind_roundtrips() {
        assert_eq!(EventKind::from(1), EventKind::TextNote);
        assert_eq!(EventKind::from(4242), EventKind::Unknown(4242));
        assert_eq!(u16::from(EventKind::Unknown(4242)), 4242);
        assert!(EventKind::from(30023).is_note());
        assert!(!EventKind::Reaction.is_note());
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"id":"abc","pubkey":"pk","created_at":5,"kind":1,"tags":[["e","x"]],"content":"hi","sig":"s"}"#;
        let ev: Event = serde_json::from_str(json).unwrap();
        assert_eq!(ev.created_at, 5);
        assert_eq!(ev.tags, vec![vec!["e".to_string(), "x".to_string()]]);
    }
}
