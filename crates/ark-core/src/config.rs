use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BOOTSTRAP_SIGNER_RELAYS, DATA_DIR_NAME, DEFAULT_ACTIVITY_BUFFER, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_RELAYS, DEFAULT_SIGNER_TIMEOUT_SECS,
};
use crate::error::{Error, Result};
use crate::feed::DedupScope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArkConfig {
    /// Where the cache database lives.
    pub data_dir: PathBuf,
    pub relays: Vec<String>,
    pub bootstrap_signer_relays: Vec<String>,
    pub signer_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub dedup_scope: DedupScope,
    pub activity_buffer: usize,
}

impl Default for ArkConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            bootstrap_signer_relays: BOOTSTRAP_SIGNER_RELAYS
                .iter()
                .map(|r| r.to_string())
                .collect(),
            signer_timeout_secs: DEFAULT_SIGNER_TIMEOUT_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            dedup_scope: DedupScope::default(),
            activity_buffer: DEFAULT_ACTIVITY_BUFFER,
        }
    }
}

impl ArkConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_input(format!("reading config {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn signer_timeout(&self) -> Duration {
        Duration::from_secs(self.signer_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!("{DATA_DIR_NAME}_data")))
}
