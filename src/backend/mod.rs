// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use calloop::channel::Sender;
use std::{fmt, path::Path};
use tracing::info;

use crate::output::{ConfigSnapshot, Output, OutputEvent};

pub mod headless;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("No output is enabled")]
    NoEnabledOutput,
    #[error("Output {0} is not known to the display server")]
    UnknownOutput(String),
    #[error("Display server rejected the configuration: {0}")]
    Rejected(String),
}

/// The display server side: source of detected outputs and sink for the
/// effective configuration.
pub trait DisplayBackend: fmt::Debug {
    fn list_outputs(&mut self) -> Vec<Output>;

    fn apply_config(&mut self, snapshot: &ConfigSnapshot) -> Result<(), ApplyError>;

    /// Starts forwarding hotplug and state changes to `sender`.
    fn watch(&mut self, sender: Sender<OutputEvent>);
}

pub fn init_backend(fixture: Option<&Path>) -> Result<Box<dyn DisplayBackend>> {
    let backend = match fixture {
        Some(path) => headless::HeadlessBackend::from_file(path)
            .with_context(|| format!("Failed to load outputs from {}", path.display()))?,
        None => headless::HeadlessBackend::virtual_output(),
    };
    info!(outputs = backend.outputs().len(), "Initialized headless backend");
    Ok(Box::new(backend))
}
