// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

pub mod output;

/// Settings keys stored in the desktop settings store.
pub mod keys {
    pub const UNIFY_OUTPUTS: &str = "unify_outputs";
    pub const NIGHT_MODE: &str = "night_mode";
    pub const DARK_THEME: &str = "dark_theme";
    pub const SCALE: &str = "scale";
    pub const NIGHT_LIGHT: &str = "night_light";
}

/// Scalar preferences read once at startup and written back on change.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DisplaySettings {
    pub unify_outputs: bool,
    pub night_mode: bool,
    pub dark_theme: bool,
    pub scale: f64,
    pub night_light: NightLightConfig,
}

impl Default for DisplaySettings {
    fn default() -> DisplaySettings {
        DisplaySettings {
            unify_outputs: false,
            night_mode: false,
            dark_theme: false,
            scale: 1.0,
            night_light: NightLightConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum NightLightSchedule {
    /// Follow sunset and sunrise.
    Sunset,
    /// Fixed start and end times, as (hour, minute).
    Custom { from: (u8, u8), to: (u8, u8) },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NightLightConfig {
    pub schedule: NightLightSchedule,
    /// Color temperature in kelvin.
    pub temperature: u32,
}

impl NightLightConfig {
    pub const MIN_TEMPERATURE: u32 = 1100;
    pub const MAX_TEMPERATURE: u32 = 6500;

    pub fn with_temperature(mut self, temperature: u32) -> NightLightConfig {
        self.temperature = temperature.clamp(Self::MIN_TEMPERATURE, Self::MAX_TEMPERATURE);
        self
    }
}

impl Default for NightLightConfig {
    fn default() -> NightLightConfig {
        NightLightConfig {
            schedule: NightLightSchedule::Sunset,
            temperature: 3500,
        }
    }
}
