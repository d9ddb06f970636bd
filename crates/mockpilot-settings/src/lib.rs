//! # mockpilot-settings
//!
//! Layered configuration for the relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MockpilotSettings::default()`]
//! 2. **Settings file**: `~/.mockpilot/settings.json` or `--config` (deep-merged over defaults)
//! 3. **Environment variables**: `MOCKPILOT_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Process-wide settings cache, swappable on reload.
static SETTINGS: RwLock<Option<Arc<MockpilotSettings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// The first call loads from the default path; load failures fall back to
/// compiled defaults with a warning. Returns an `Arc` snapshot.
pub fn get_settings() -> Arc<MockpilotSettings> {
    if let Some(s) = SETTINGS.read().as_ref() {
        return Arc::clone(s);
    }

    let mut guard = SETTINGS.write();
    if let Some(s) = guard.as_ref() {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            MockpilotSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Replace the global settings.
pub fn init_settings(settings: MockpilotSettings) -> Arc<MockpilotSettings> {
    let settings = Arc::new(settings);
    *SETTINGS.write() = Some(Arc::clone(&settings));
    settings
}

/// Reload from `path` and swap the global cache.
///
/// Unlike [`get_settings`], a bad file is reported and the previous value kept.
pub fn reload_settings_from_path(path: &Path) -> Result<Arc<MockpilotSettings>> {
    let new = load_settings_from_path(path)?;
    tracing::info!(?path, "settings reloaded from disk");
    Ok(init_settings(new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    static SETTINGS_MUTEX: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn init_then_get() {
        let _lock = SETTINGS_MUTEX.lock();
        let mut s = MockpilotSettings::default();
        s.server.port = 4242;
        let _ = init_settings(s);
        assert_eq!(get_settings().server.port, 4242);
    }

    #[test]
    fn reload_swaps_and_bad_file_keeps_previous() {
        let _lock = SETTINGS_MUTEX.lock();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"hub": {{"queueMaxMessages": 32}}}}"#).unwrap();
        let s = reload_settings_from_path(file.path()).unwrap();
        assert_eq!(s.hub.queue_max_messages, 32);
        assert_eq!(get_settings().hub.queue_max_messages, 32);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, "not json").unwrap();
        assert!(reload_settings_from_path(bad.path()).is_err());
        assert_eq!(get_settings().hub.queue_max_messages, 32);
    }
}
