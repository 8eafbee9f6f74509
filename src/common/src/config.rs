// Copyright 2026 Weir Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings recognized by window views. Unset fields take the defaults from
/// the [`default`] module.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowViewConfig {
    /// Period of the inner-table cleanup task, in milliseconds.
    #[serde(default = "default::window_view_clean_interval_ms")]
    pub window_view_clean_interval_ms: u64,

    /// Heartbeat period of WATCH subscribers, in milliseconds.
    #[serde(default = "default::window_view_heartbeat_interval_ms")]
    pub window_view_heartbeat_interval_ms: u64,

    /// Squashing threshold: emit a buffered block once it reaches this many
    /// rows.
    #[serde(default = "default::min_insert_block_size_rows")]
    pub min_insert_block_size_rows: usize,

    /// Squashing threshold: emit a buffered block once it reaches this many
    /// bytes.
    #[serde(default = "default::min_insert_block_size_bytes")]
    pub min_insert_block_size_bytes: usize,

    /// Must be set to create a new window view. Attaching an existing one
    /// does not require it.
    #[serde(default)]
    pub allow_experimental_window_view: bool,

    /// Bound on table share-lock acquisition, in milliseconds.
    #[serde(default = "default::lock_acquire_timeout_ms")]
    pub lock_acquire_timeout_ms: u64,
}

impl Default for WindowViewConfig {
    fn default() -> Self {
        Self {
            window_view_clean_interval_ms: default::window_view_clean_interval_ms(),
            window_view_heartbeat_interval_ms: default::window_view_heartbeat_interval_ms(),
            min_insert_block_size_rows: default::min_insert_block_size_rows(),
            min_insert_block_size_bytes: default::min_insert_block_size_bytes(),
            allow_experimental_window_view: false,
            lock_acquire_timeout_ms: default::lock_acquire_timeout_ms(),
        }
    }
}

impl WindowViewConfig {
    pub fn clean_interval(&self) -> Duration {
        Duration::from_millis(self.window_view_clean_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.window_view_heartbeat_interval_ms)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }
}

pub mod default {
    pub fn window_view_clean_interval_ms() -> u64 {
        60 * 1000
    }

    pub fn window_view_heartbeat_interval_ms() -> u64 {
        15 * 1000
    }

    pub fn min_insert_block_size_rows() -> usize {
        1048449
    }

    pub fn min_insert_block_size_bytes() -> usize {
        268402944
    }

    pub fn lock_acquire_timeout_ms() -> u64 {
        120 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: WindowViewConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, WindowViewConfig::default());
        assert!(!config.allow_experimental_window_view);
        assert_eq!(config.clean_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config: WindowViewConfig = serde_json::from_str(
            r#"{"window_view_clean_interval_ms": 250, "allow_experimental_window_view": true}"#,
        )
        .unwrap();
        assert_eq!(config.window_view_clean_interval_ms, 250);
        assert!(config.allow_experimental_window_view);
    }
}
