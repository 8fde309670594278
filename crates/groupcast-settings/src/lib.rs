//! # groupcast-settings
//!
//! Layered configuration for the broker. Settings are resolved in priority
//! order:
//! 1. **Compiled defaults** ([`GroupcastSettings::default()`])
//! 2. **User file** `~/.groupcast/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `GROUPCAST_*`
//!
//! The binary applies its command-line flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{
    FanoutSettings, GroupcastSettings, LoggingSettings, ServerSettings, StoreBackend,
    StoreSettings,
};
