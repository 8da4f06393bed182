//! Hub driver configuration
//!
//! Stored as TOML. Missing fields fall back to their defaults so a partial
//! file (or no file at all) is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::TransitionPolicy;

/// Firmware download tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Resend attempts for a packet the hub rejected
    pub max_retries: u32,
    /// Status polls per packet before giving up
    pub max_polls: u32,
    /// Delay between status polls
    pub poll_interval_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_polls: 50,
            poll_interval_ms: 2,
        }
    }
}

/// Hub driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// How repeated peripheral enable/disable events are handled
    pub transition_policy: TransitionPolicy,
    /// How long the host stays awake after a wake interrupt
    pub wake_hold_ms: u64,
    pub download: DownloadConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            transition_policy: TransitionPolicy::default(),
            wake_hold_ms: 500,
            download: DownloadConfig::default(),
        }
    }
}

impl HubConfig {
    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: HubConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn wake_hold(&self) -> Duration {
        Duration::from_millis(self.wake_hold_ms)
    }
}
