// SPDX-License-Identifier: GPL-3.0-only

use cosmic_display_config::output::{
    load_record, store_record, GlobalOutputRecord, HardwareSignature, OutputInfo,
    PersistedRecord, PersistenceError,
};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

const OUTPUTS_DIR: &str = "outputs";
const GLOBAL_DIR: &str = "global";

/// On-disk records, one file per output arrangement plus one per output.
///
/// ```text
/// <root>/outputs/<signature>.ron
/// <root>/global/<identity hash>.ron
/// ```
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    root: PathBuf,
}

impl PersistenceStore {
    pub fn new(root: impl Into<PathBuf>) -> PersistenceStore {
        PersistenceStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, signature: &HardwareSignature) -> PathBuf {
        self.root.join(OUTPUTS_DIR).join(signature.file_name())
    }

    pub fn global_path(&self, info: &OutputInfo) -> PathBuf {
        self.root
            .join(GLOBAL_DIR)
            .join(format!("{}.ron", info.identity_hash()))
    }

    /// Record of the given arrangement, `Ok(None)` if there is none.
    /// Malformed records are removed and reported as an error.
    pub fn load(
        &self,
        signature: &HardwareSignature,
    ) -> Result<Option<PersistedRecord>, PersistenceError> {
        let path = self.record_path(signature);
        let Some(mut record) = load_or_reset::<PersistedRecord>(&path)? else {
            return Ok(None);
        };
        record.sanitize();
        debug!(%signature, outputs = record.outputs.len(), "Loaded output record");
        Ok(Some(record))
    }

    pub fn save(
        &self,
        signature: &HardwareSignature,
        record: &PersistedRecord,
    ) -> Result<(), PersistenceError> {
        store_record(&self.record_path(signature), record)
    }

    pub fn load_global(&self, info: &OutputInfo) -> Option<GlobalOutputRecord> {
        load_or_reset::<GlobalOutputRecord>(&self.global_path(info))
            .inspect_err(|err| warn!(?err, "Ignoring global output record"))
            .ok()
            .flatten()
            // a hash collision must not apply another monitor's settings
            .filter(|record| &record.info == info)
    }

    pub fn load_globals<'a>(
        &self,
        infos: impl IntoIterator<Item = &'a OutputInfo>,
    ) -> Vec<GlobalOutputRecord> {
        infos
            .into_iter()
            .filter_map(|info| self.load_global(info))
            .collect()
    }

    pub fn save_global(&self, record: &GlobalOutputRecord) -> Result<(), PersistenceError> {
        store_record(&self.global_path(&record.info), record)
    }
}

fn load_or_reset<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistenceError> {
    load_record(path).inspect_err(|err| {
        if let PersistenceError::Malformed { .. } = err {
            warn!(?err, "Failed to read output record, resetting..");
            if let Err(err) = std::fs::remove_file(path) {
                error!(?err, "Failed to remove output record.");
            }
        }
    })
}
