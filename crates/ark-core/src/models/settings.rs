//! Typed view over the key/value settings table.
//!
//! Values are stored as strings. How a value is decoded depends only on its
//! key: text keys are taken as-is, every other known key is a boolean stored
//! as `"0"`/`"1"`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Autoupdate,
    Nsecbunker,
    Media,
    Hashtag,
    Depot,
    TunnelUrl,
    LowPower,
    Translation,
    TranslateApiKey,
    InstantZap,
    Outbox,
    Interests,
}

impl SettingKey {
    pub const ALL: [SettingKey; 12] = [
        SettingKey::Autoupdate,
        SettingKey::Nsecbunker,
        SettingKey::Media,
        SettingKey::Hashtag,
        SettingKey::Depot,
        SettingKey::TunnelUrl,
        SettingKey::LowPower,
        SettingKey::Translation,
        SettingKey::TranslateApiKey,
        SettingKey::InstantZap,
        SettingKey::Outbox,
        SettingKey::Interests,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingKey::Autoupdate => "autoupdate",
            SettingKey::Nsecbunker => "nsecbunker",
            SettingKey::Media => "media",
            SettingKey::Hashtag => "hashtag",
            SettingKey::Depot => "depot",
            SettingKey::TunnelUrl => "tunnelUrl",
            SettingKey::LowPower => "lowPower",
            SettingKey::Translation => "translation",
            SettingKey::TranslateApiKey => "translateApiKey",
            SettingKey::InstantZap => "instantZap",
            SettingKey::Outbox => "outbox",
            SettingKey::Interests => "interests",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    /// Keys whose value is free text and never coerced to a boolean.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            SettingKey::TunnelUrl | SettingKey::TranslateApiKey | SettingKey::Interests
        )
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Text(String),
}

impl SettingValue {
    /// Decode a stored value according to its key. Unknown keys stay text.
    pub fn decode(key: &str, raw: &str) -> Self {
        match SettingKey::parse(key) {
            Some(k) if !k.is_text() => SettingValue::Bool(decode_bool(raw)),
            _ => SettingValue::Text(raw.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SettingValue::Bool(value) => encode_bool(*value),
            SettingValue::Text(text) => text.clone(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(value) => Some(*value),
            SettingValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(text) => Some(text),
            SettingValue::Bool(_) => None,
        }
    }
}

/// `"0"`/`"1"` encoding. Anything that parses to a non-zero integer is true.
pub fn decode_bool(raw: &str) -> bool {
    raw.trim().parse::<i64>().is_ok_and(|n| n != 0)
}

pub fn encode_bool(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// Topics and people an account asked to see more of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interests {
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
}

/// All settings with their defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub autoupdate: bool,
    pub nsecbunker: bool,
    pub media: bool,
    pub hashtag: bool,
    pub depot: bool,
    pub tunnel_url: String,
    pub low_power: bool,
    pub translation: bool,
    pub translate_api_key: String,
    pub instant_zap: bool,
    pub outbox: bool,
    pub interests: Option<Interests>,
    /// Keys this build does not know, kept verbatim.
    pub other: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autoupdate: false,
            nsecbunker: false,
            media: true,
            hashtag: true,
            depot: false,
            tunnel_url: String::new(),
            low_power: false,
            translation: false,
            translate_api_key: String::new(),
            instant_zap: false,
            outbox: false,
            interests: None,
            other: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Build from stored `(key, value)` rows on top of the defaults.
    pub fn from_rows<I, K, V>(rows: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut settings = Self::default();
        for (key, value) in rows {
            settings.apply(key.as_ref(), value.as_ref());
        }
        settings
    }

    pub fn apply(&mut self, key: &str, raw: &str) {
        let Some(known) = SettingKey::parse(key) else {
            self.other.insert(key.to_string(), raw.to_string());
            return;
        };
        match known {
            SettingKey::Autoupdate => self.autoupdate = decode_bool(raw),
            SettingKey::Nsecbunker => self.nsecbunker = decode_bool(raw),
            SettingKey::Media => self.media = decode_bool(raw),
            SettingKey::Hashtag => self.hashtag = decode_bool(raw),
            SettingKey::Depot => self.depot = decode_bool(raw),
            SettingKey::TunnelUrl => self.tunnel_url = raw.to_string(),
            SettingKey::LowPower => self.low_power = decode_bool(raw),
            SettingKey::Translation => self.translation = decode_bool(raw),
            SettingKey::TranslateApiKey => self.translate_api_key = raw.to_string(),
            SettingKey::InstantZap => self.instant_zap = decode_bool(raw),
            SettingKey::Outbox => self.outbox = decode_bool(raw),
            // Empty or malformed interests read as "none set".
            SettingKey::Interests => {
                self.interests = serde_json::from_str(raw).ok();
            }
        }
    }
}
