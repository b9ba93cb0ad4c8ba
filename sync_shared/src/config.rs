//! Configuration.
//!
//! Loads sync service configuration from JSON strings or files.

use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Root configuration shared by the server and replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fixed tick rate of the server's publish loop.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Buffered change events per notifier before slow listeners lag.
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
    /// Queued outbound messages per subscriber.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    /// Denied updates tolerated before a subscriber is dropped.
    #[serde(default = "default_max_auth_violations")]
    pub max_auth_violations: u32,
    /// Avatars seeded by the demo server.
    #[serde(default = "default_demo_avatars")]
    pub demo_avatars: u32,
}

fn default_tick_hz() -> u32 {
    10
}

fn default_notify_capacity() -> usize {
    256
}

fn default_subscriber_capacity() -> usize {
    64
}

fn default_max_auth_violations() -> u32 {
    3
}

fn default_demo_avatars() -> u32 {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            notify_capacity: default_notify_capacity(),
            subscriber_capacity: default_subscriber_capacity(),
            max_auth_violations: default_max_auth_violations(),
            demo_avatars: default_demo_avatars(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON. Missing keys take their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn load_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
