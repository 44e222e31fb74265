//! # tickwire-settings
//!
//! Layered configuration for the tickwire venue client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TickwireSettings::default()`]
//! 2. **User file**: `~/.tickwire/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TICKWIRE_*` overrides (highest priority)
//!
//! The endpoint, per-call timeout, and reconnect interval all live under
//! `connection`; routing field names live under `routing`.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{ConnectionSettings, LoggingSettings, TickwireSettings};

use std::sync::OnceLock;

/// Global settings singleton, filled on first access.
static SETTINGS: OnceLock<TickwireSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads from `~/.tickwire/settings.json` with env overrides on first call;
/// falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static TickwireSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            TickwireSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the value back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: TickwireSettings) -> std::result::Result<(), TickwireSettings> {
    SETTINGS.set(settings)
}
