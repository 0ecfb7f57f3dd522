use alloc::string::String;
use embassy_time::Duration;
use serde::Deserialize;

use crate::catalog::Catalog;
use crate::console::COMMAND_CAPACITY;
use crate::error::ConfigError;

pub const DEFAULT_DEBOUNCE_MS: u64 = 50;

/// Build-time settings of a clipbox.
///
/// Boards normally construct this in code; it also deserializes from JSON with every field
/// optional, falling back to [`Config::default`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of clips, `clip1` up to `clip<N>`.
    pub catalog_size: u32,
    pub clip_prefix: String,
    pub clip_extension: String,
    pub debounce_ms: u64,
    /// Console line that switches the management service on.
    pub enable_command: String,
    pub management_on_boot: bool,
    /// Check that every catalog entry exists before entering the loop.
    pub audit_on_boot: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_size: 10,
            clip_prefix: "clip".into(),
            clip_extension: "wav".into(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            enable_command: "wifi".into(),
            management_on_boot: false,
            audit_on_boot: true,
        }
    }
}

impl Config {
    pub fn with_catalog_size(mut self, catalog_size: u32) -> Self {
        self.catalog_size = catalog_size;
        self
    }

    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub fn with_management_on_boot(mut self, enabled: bool) -> Self {
        self.management_on_boot = enabled;
        self
    }

    pub fn with_audit_on_boot(mut self, enabled: bool) -> Self {
        self.audit_on_boot = enabled;
        self
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let command = self.enable_command.trim();
        if command.is_empty() || command.len() > COMMAND_CAPACITY {
            return Err(ConfigError::InvalidCommand);
        }
        Catalog::from_config(self).map(|_| ())
    }
}
