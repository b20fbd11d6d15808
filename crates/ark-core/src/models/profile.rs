use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::event::Event;

/// Kind-0 metadata for one pubkey.
///
/// Remote producers put arbitrary keys in here; the recognized ones get
/// fields and everything else is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        alias = "displayName",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a metadata event. Content that is not a JSON object gives an
    /// empty profile; bad metadata should not hide the author.
    pub fn from_event(event: &Event) -> Self {
        serde_json::from_str(&event.content).unwrap_or_default()
    }

    /// Best name to show: display name, then name, then a short pubkey.
    pub fn display_label(&self, pubkey: &str) -> String {
        self.display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.name.as_deref().filter(|s| !s.trim().is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| short_pubkey(pubkey))
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Profile with the timestamp of the metadata event it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedProfile {
    pub pubkey: String,
    pub profile: Profile,
    pub created_at: u64,
}

fn short_pubkey(pubkey: &str) -> String {
    match (pubkey.get(..8), pubkey.get(pubkey.len().saturating_sub(4)..)) {
        (Some(head), Some(tail)) if pubkey.len() > 12 => format!("{head}:{tail}"),
        _ => pubkey.to_string(),
    }
}
