// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::OutputInfo;

/// Identifies a set of connected outputs, independent of detection order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct HardwareSignature(String);

impl HardwareSignature {
    pub fn from_outputs<'a>(outputs: impl IntoIterator<Item = &'a OutputInfo>) -> Self {
        let mut infos = outputs.into_iter().collect::<Vec<_>>();
        infos.sort();
        infos.dedup();

        let mut hasher = Sha256::new();
        for info in infos {
            hash_info(&mut hasher, info);
        }
        HardwareSignature(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.ron", self.0)
    }
}

impl fmt::Display for HardwareSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl OutputInfo {
    /// Hash of a single output identity, names its global record.
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hash_info(&mut hasher, self);
        hex::encode(hasher.finalize())
    }
}

fn hash_info(hasher: &mut Sha256, info: &OutputInfo) {
    for field in [&info.connector, &info.make, &info.model] {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(b"\n");
}
