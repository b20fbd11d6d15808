use serde::{Deserialize, Serialize};

/// Local identity. Secrets live in the vault, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub pubkey: String,
    pub is_active: bool,
    pub created_at: u64,
    /// Followed pubkeys, refreshed from the network and not persisted.
    #[serde(default, skip_serializing)]
    pub contacts: Vec<String>,
}

impl Account {
    pub fn follows(&self, pubkey: &str) -> bool {
        self.contacts.iter().any(|c| c == pubkey)
    }
}
