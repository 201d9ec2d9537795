// SPDX-License-Identifier: GPL-3.0-only

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    io::{self, Write},
    path::Path,
};
use tracing::warn;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputState {
    #[serde(rename = "true")]
    Enabled,
    #[serde(rename = "false")]
    Disabled,
    /// Mirrors the output connected to the given connector.
    Mirroring(String),
}

fn default_state() -> OutputState {
    OutputState::Enabled
}

fn default_scale() -> f64 {
    1.0
}

/// Stable identity of an output, derived from hardware rather than the
/// index the display server happened to assign.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputInfo {
    pub connector: String,
    pub make: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OutputConfig {
    pub mode: (u32, u32),
    pub position: (i32, i32),
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_state")]
    pub enabled: OutputState,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
}

impl Default for OutputConfig {
    fn default() -> OutputConfig {
        OutputConfig {
            mode: (0, 0),
            position: (0, 0),
            scale: 1.0,
            enabled: OutputState::Enabled,
            primary: false,
            brightness: None,
        }
    }
}

impl OutputConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self.enabled, OutputState::Disabled)
    }

    pub fn mirroring(&self) -> Option<&str> {
        match &self.enabled {
            OutputState::Mirroring(conn) => Some(conn),
            _ => None,
        }
    }
}

/// Last applied configuration of one output arrangement.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct PersistedRecord {
    pub outputs: Vec<(OutputInfo, OutputConfig)>,
}

impl PersistedRecord {
    pub fn get(&self, info: &OutputInfo) -> Option<&OutputConfig> {
        self.outputs
            .iter()
            .find(|(i, _)| i == info)
            .map(|(_, conf)| conf)
    }

    pub fn primary(&self) -> Option<&OutputInfo> {
        self.outputs
            .iter()
            .find(|(_, conf)| conf.primary)
            .map(|(info, _)| info)
    }

    /// Replaces mirroring tags that point at unknown or disabled outputs.
    pub fn sanitize(&mut self) {
        let snapshot = self.outputs.clone();
        for (_, conf) in self.outputs.iter_mut() {
            if let OutputState::Mirroring(conn) = &conf.enabled {
                let valid = snapshot
                    .iter()
                    .find(|(info, _)| &info.connector == conn)
                    .is_some_and(|(_, source)| source.enabled == OutputState::Enabled);
                if !valid {
                    warn!("Invalid Mirroring tag, overriding with `Enabled` instead");
                    conf.enabled = OutputState::Enabled;
                }
            }
        }
    }
}

/// Settings of one output that carry across arrangements.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GlobalOutputRecord {
    pub info: OutputInfo,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Malformed record {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("Failed to encode record: {0}")]
    Encode(#[from] ron::Error),
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Reads a ron record. A missing file is `Ok(None)`.
pub fn load_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(PersistenceError::io(path, err)),
    };
    ron::from_str(&content)
        .map(Some)
        .map_err(|source| PersistenceError::Malformed {
            path: path.display().to_string(),
            source,
        })
}

/// Writes a ron record through a temporary file in the same directory, so
/// a reader either sees the previous content or the complete new one.
pub fn store_record<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let content = ron::ser::to_string_pretty(value, Default::default())?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|err| PersistenceError::io(dir, err))?;

    let mut file =
        tempfile::NamedTempFile::new_in(dir).map_err(|err| PersistenceError::io(dir, err))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.as_file().sync_all())
        .map_err(|err| PersistenceError::io(file.path(), err))?;
    file.persist(path)
        .map_err(|err| PersistenceError::io(path, err.error))?;
    Ok(())
}
