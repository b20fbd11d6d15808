use serde::{Deserialize, Serialize};

use crate::event::{Event, RELAY_TAG};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPurpose {
    Read,
    Write,
    #[default]
    Both,
}

impl RelayPurpose {
    fn marker(self) -> Option<&'static str> {
        match self {
            RelayPurpose::Read => Some("read"),
            RelayPurpose::Write => Some("write"),
            RelayPurpose::Both => None,
        }
    }

    fn parse(marker: Option<&str>) -> Self {
        match marker {
            Some("read") => RelayPurpose::Read,
            Some("write") => RelayPurpose::Write,
            _ => RelayPurpose::Both,
        }
    }
}

/// One `"r"` entry of a relay list (kind 10002).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEntry {
    pub url: String,
    pub purpose: RelayPurpose,
}

impl RelayEntry {
    pub fn new(url: impl Into<String>, purpose: RelayPurpose) -> Self {
        Self {
            url: url.into(),
            purpose,
        }
    }

    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![RELAY_TAG.to_string(), self.url.clone()];
        if let Some(marker) = self.purpose.marker() {
            tag.push(marker.to_string());
        }
        tag
    }

    pub fn reads(&self) -> bool {
        self.purpose != RelayPurpose::Write
    }

    pub fn writes(&self) -> bool {
        self.purpose != RelayPurpose::Read
    }
}

/// Entries of a relay list event, first occurrence of each url kept.
pub fn relay_entries(event: &Event) -> Vec<RelayEntry> {
    let mut entries: Vec<RelayEntry> = Vec::new();
    for tag in &event.tags {
        if tag.first().map(String::as_str) != Some(RELAY_TAG) {
            continue;
        }
        let Some(url) = tag.get(1).filter(|url| !url.is_empty()) else {
            continue;
        };
        if entries.iter().any(|e| &e.url == url) {
            continue;
        }
        entries.push(RelayEntry::new(
            url.clone(),
            RelayPurpose::parse(tag.get(2).map(String::as_str)),
        ));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::test_support::event;

    #[test]
    fn test_relay_entries_from_tags() {
        let ev = event(
            "r",
            1,
            &[
                &["r", "wss://a"],
                &["r", "wss://b", "read"],
                &["r", "wss://c", "write"],
                &["r", "wss://a", "read"],
                &["p", "x"],
            ],
        );
        let entries = relay_entries(&ev);
        assert_eq!(
            entries,
            vec![
                RelayEntry::new("wss://a", RelayPurpose::Both),
                RelayEntry::new("wss://b", RelayPurpose::Read),
                RelayEntry::new("wss://c", RelayPurpose::Write),
            ]
        );
        assert!(entries[1].reads() && !entries[1].writes());
        assert_eq!(entries[2].to_tag(), vec!["r", "wss://c", "write"]);
        assert_eq!(entries[0].to_tag(), vec!["r", "wss://a"]);
    }
}
