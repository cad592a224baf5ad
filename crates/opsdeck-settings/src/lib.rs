//! # opsdeck-settings
//!
//! Layers, lowest priority first:
//! 1. [`OpsdeckSettings::default()`]
//! 2. `~/.opsdeck/settings.json`, deep-merged over the defaults
//! 3. `OPSDECK_*` environment variables
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
