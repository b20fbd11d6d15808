//! Normalize user-supplied identifiers to hex.
//!
//! Accepts hex, bech32 (`npub`, `nprofile`, `naddr` for keys; `note`,
//! `nevent` for events) and `nostr:` URIs with trailing punctuation.

use nostr_sdk::prelude::{EventId, FromBech32, Nip19, PublicKey, ToBech32};

use crate::error::{Error, Result};

const URI_PREFIX: &str = "nostr:";

fn strip(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(URI_PREFIX).unwrap_or(trimmed);
    trimmed
        .split(|c: char| c == '\'' || c == '.' || c == ',')
        .next()
        .unwrap_or(trimmed)
}

fn is_hex_id(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Hex pubkey for any accepted key form.
pub fn clean_pubkey(raw: &str) -> Result<String> {
    let value = strip(raw);
    if is_hex_id(value) {
        return Ok(value.to_ascii_lowercase());
    }
    let pubkey = match Nip19::from_bech32(value) {
        Ok(Nip19::Pubkey(pubkey)) => pubkey,
        Ok(Nip19::Profile(profile)) => profile.public_key,
        Ok(Nip19::Coordinate(coordinate)) => coordinate.coordinate.public_key,
        _ => return Err(Error::invalid_input(format!("not a pubkey: {raw}"))),
    };
    Ok(pubkey.to_hex())
}

/// Hex event id for any accepted event reference.
pub fn clean_event_id(raw: &str) -> Result<String> {
    let value = strip(raw);
    if is_hex_id(value) {
        return Ok(value.to_ascii_lowercase());
    }
    let id = match Nip19::from_bech32(value) {
        Ok(Nip19::EventId(id)) => id,
        Ok(Nip19::Event(event)) => event.event_id,
        _ => return Err(Error::invalid_input(format!("not an event id: {raw}"))),
    };
    Ok(id.to_hex())
}

/// `npub` form for display, falling back to hex.
pub fn display_npub(pubkey_hex: &str) -> String {
    PublicKey::from_hex(pubkey_hex)
        .ok()
        .and_then(|pk| pk.to_bech32().ok())
        .unwrap_or_else(|| pubkey_hex.to_string())
}

/// `note` form for sharing, falling back to hex.
pub fn display_note(event_id_hex: &str) -> String {
    EventId::from_hex(event_id_hex)
        .ok()
        .and_then(|id| id.to_bech32().ok())
        .unwrap_or_else(|| event_id_hex.to_string())
}
