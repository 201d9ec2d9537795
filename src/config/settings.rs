// SPDX-License-Identifier: GPL-3.0-only

use cosmic_config::{ConfigGet, ConfigSet};
use cosmic_display_config::{keys, DisplaySettings, NightLightConfig};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::warn;

pub const SETTINGS_ID: &str = "com.system76.CosmicDisplay";
pub const SETTINGS_VERSION: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings store is unavailable")]
    Unavailable,
    #[error("Unknown settings key '{0}'")]
    UnknownKey(String),
    #[error(transparent)]
    Backend(#[from] cosmic_config::Error),
}

/// Scalar desktop preferences shared with other components.
pub trait SystemSettingsStore: fmt::Debug {
    fn get_bool(&self, key: &str) -> Result<bool, SettingsError>;
    fn set_bool(&self, key: &str, value: bool) -> Result<(), SettingsError>;
    fn get_f64(&self, key: &str) -> Result<f64, SettingsError>;
    fn set_f64(&self, key: &str, value: f64) -> Result<(), SettingsError>;
    fn night_light(&self) -> Result<NightLightConfig, SettingsError>;
    fn set_night_light(&self, value: &NightLightConfig) -> Result<(), SettingsError>;
}

/// Store backed by cosmic-config.
#[derive(Debug)]
pub struct CosmicSettingsStore {
    config: cosmic_config::Config,
}

impl CosmicSettingsStore {
    pub fn new() -> Result<CosmicSettingsStore, SettingsError> {
        let config = cosmic_config::Config::new(SETTINGS_ID, SETTINGS_VERSION)?;
        Ok(CosmicSettingsStore { config })
    }

    pub fn config(&self) -> &cosmic_config::Config {
        &self.config
    }
}

impl SystemSettingsStore for CosmicSettingsStore {
    fn get_bool(&self, key: &str) -> Result<bool, SettingsError> {
        Ok(self.config.get(key)?)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        Ok(self.config.set(key, value)?)
    }

    fn get_f64(&self, key: &str) -> Result<f64, SettingsError> {
        Ok(self.config.get(key)?)
    }

    fn set_f64(&self, key: &str, value: f64) -> Result<(), SettingsError> {
        Ok(self.config.set(key, value)?)
    }

    fn night_light(&self) -> Result<NightLightConfig, SettingsError> {
        Ok(self.config.get(keys::NIGHT_LIGHT)?)
    }

    fn set_night_light(&self, value: &NightLightConfig) -> Result<(), SettingsError> {
        Ok(self.config.set(keys::NIGHT_LIGHT, value)?)
    }
}

/// In-process store, used when cosmic-config can't be opened. Clones share
/// their values.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    values: Arc<Mutex<DisplaySettings>>,
    unavailable: bool,
}

impl MemorySettingsStore {
    pub fn new(values: DisplaySettings) -> MemorySettingsStore {
        MemorySettingsStore {
            values: Arc::new(Mutex::new(values)),
            unavailable: false,
        }
    }

    /// A store that fails every call.
    pub fn unavailable() -> MemorySettingsStore {
        MemorySettingsStore {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn values(&self) -> DisplaySettings {
        self.values.lock().clone()
    }

    fn check(&self) -> Result<(), SettingsError> {
        if self.unavailable {
            Err(SettingsError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl SystemSettingsStore for MemorySettingsStore {
    fn get_bool(&self, key: &str) -> Result<bool, SettingsError> {
        self.check()?;
        let values = self.values.lock();
        match key {
            keys::UNIFY_OUTPUTS => Ok(values.unify_outputs),
            keys::NIGHT_MODE => Ok(values.night_mode),
            keys::DARK_THEME => Ok(values.dark_theme),
            _ => Err(SettingsError::UnknownKey(key.to_string())),
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        self.check()?;
        let mut values = self.values.lock();
        match key {
            keys::UNIFY_OUTPUTS => values.unify_outputs = value,
            keys::NIGHT_MODE => values.night_mode = value,
            keys::DARK_THEME => values.dark_theme = value,
            _ => return Err(SettingsError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    fn get_f64(&self, key: &str) -> Result<f64, SettingsError> {
        self.check()?;
        match key {
            keys::SCALE => Ok(self.values.lock().scale),
            _ => Err(SettingsError::UnknownKey(key.to_string())),
        }
    }

    fn set_f64(&self, key: &str, value: f64) -> Result<(), SettingsError> {
        self.check()?;
        match key {
            keys::SCALE => {
                self.values.lock().scale = value;
                Ok(())
            }
            _ => Err(SettingsError::UnknownKey(key.to_string())),
        }
    }

    fn night_light(&self) -> Result<NightLightConfig, SettingsError> {
        self.check()?;
        Ok(self.values.lock().night_light.clone())
    }

    fn set_night_light(&self, value: &NightLightConfig) -> Result<(), SettingsError> {
        self.check()?;
        self.values.lock().night_light = value.clone();
        Ok(())
    }
}

/// Reads every preference, falling back to the compiled-in default for
/// each one that can't be read.
pub fn load_settings(store: &dyn SystemSettingsStore) -> DisplaySettings {
    let defaults = DisplaySettings::default();
    DisplaySettings {
        unify_outputs: get_or(
            store.get_bool(keys::UNIFY_OUTPUTS),
            keys::UNIFY_OUTPUTS,
            defaults.unify_outputs,
        ),
        night_mode: get_or(
            store.get_bool(keys::NIGHT_MODE),
            keys::NIGHT_MODE,
            defaults.night_mode,
        ),
        dark_theme: get_or(
            store.get_bool(keys::DARK_THEME),
            keys::DARK_THEME,
            defaults.dark_theme,
        ),
        scale: get_or(store.get_f64(keys::SCALE), keys::SCALE, defaults.scale),
        night_light: get_or(
            store.night_light(),
            keys::NIGHT_LIGHT,
            defaults.night_light,
        ),
    }
}

fn get_or<T>(value: Result<T, SettingsError>, key: &str, default: T) -> T {
    value.unwrap_or_else(|err| {
        warn!(?err, "Failed to read setting '{}'", key);
        default
    })
}
