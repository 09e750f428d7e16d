//! Runtime configuration
//!
//! Nothing here is persisted; binaries build these from flags and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default store file name inside the data directory
pub const DEFAULT_STORE_FILE: &str = "database.csv";

/// Which records get their hop count bumped when the store file is rewritten
///
/// The count has historically meant "store writes survived", which also
/// counts local adds and merges on the same device. `PeerTransfer` narrows it
/// to records that actually crossed a device boundary in the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopPolicy {
    /// Every record in the rewritten file is bumped by one
    #[default]
    EveryWrite,
    /// Only records taken from a peer during a merge are bumped
    PeerTransfer,
}

/// Record store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the store file
    pub data_dir: PathBuf,
    /// Store file name within `data_dir`
    pub file_name: String,
    /// Hop count bookkeeping
    pub hop_policy: HopPolicy,
}

impl StoreConfig {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            file_name: DEFAULT_STORE_FILE.to_string(),
            hop_policy: HopPolicy::default(),
        }
    }

    pub fn with_hop_policy(mut self, hop_policy: HopPolicy) -> Self {
        self.hop_policy = hop_policy;
        self
    }

    /// Full path of the store file
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

/// Sync session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Largest message a receiver will accept
    pub max_message_bytes: usize,
    /// Consecutive refused link sends before a transmission is abandoned
    pub max_refused_sends: u32,
    /// Deadline for one whole transmission
    pub transmission_timeout: Duration,
    /// Start the next transmission as soon as the previous one completes
    /// and the link reports ready again
    pub auto_resend: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 16 * 1024 * 1024,
            max_refused_sends: 1_000,
            transmission_timeout: Duration::from_secs(300),
            auto_resend: false,
        }
    }
}

/// Discovery loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How often network reachability is polled
    pub connectivity_poll_interval: Duration,
    pub session: SessionConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            connectivity_poll_interval: Duration::from_secs(1),
            session: SessionConfig::default(),
        }
    }
}
