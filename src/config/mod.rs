// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use calloop::{InsertError, LoopHandle};
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::state::State;

pub mod persistence;
pub mod settings;

pub use self::persistence::PersistenceStore;
pub use self::settings::{CosmicSettingsStore, MemorySettingsStore, SystemSettingsStore};

const STATE_PREFIX: &str = "cosmic-display";

/// `$XDG_STATE_HOME/cosmic-display`, unless overridden.
pub fn state_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = dir {
        return Ok(dir);
    }
    let base = xdg::BaseDirectories::new().context("Failed to find the XDG base directories")?;
    base.create_state_directory(STATE_PREFIX)
        .with_context(|| format!("Failed to create state directory for {}", STATE_PREFIX))
}

/// Opens the desktop settings store and watches it for changes made by
/// other programs, falling back to an in-memory store.
pub fn init_settings(loop_handle: &LoopHandle<'static, State>) -> Box<dyn SystemSettingsStore> {
    let store = match CosmicSettingsStore::new() {
        Ok(store) => store,
        Err(err) => {
            error!(?err, "Failed to open settings store, changes won't be kept");
            return Box::new(MemorySettingsStore::default());
        }
    };

    match cosmic_config::calloop::ConfigWatchSource::new(store.config()) {
        Ok(source) => {
            if let Err(InsertError { error, .. }) =
                loop_handle.insert_source(source, |(_, keys), (), state| {
                    for key in &keys {
                        state.settings_changed(key);
                    }
                })
            {
                warn!(?error, "Failed to watch the settings store");
            }
        }
        Err(err) => warn!(?err, "Failed to watch the settings store"),
    }
    info!(id = settings::SETTINGS_ID, "Using cosmic-config settings");

    Box::new(store)
}
