// SPDX-License-Identifier: GPL-3.0-only

use anyhow::Result;
use calloop::channel::Sender;
use cosmic_display_config::output::OutputInfo;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

use super::{ApplyError, DisplayBackend};
use crate::output::{ConfigSnapshot, Geometry, Output, OutputEvent};

fn default_true() -> bool {
    true
}

/// An output as listed in a fixture file.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureOutput {
    pub connector: String,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    pub mode: (u32, u32),
    #[serde(default = "default_true")]
    pub connected: bool,
}

impl From<FixtureOutput> for Output {
    fn from(fixture: FixtureOutput) -> Output {
        let info = OutputInfo {
            connector: fixture.connector,
            make: fixture.make,
            model: fixture.model,
        };
        let (width, height) = fixture.mode;
        let mut output = Output::new(info, Geometry::new(0, 0, width, height));
        output.preferred_mode = Some(fixture.mode);
        output.connected = fixture.connected;
        output
    }
}

/// Outputs that only exist in memory, loaded from a ron fixture.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    outputs: Vec<Output>,
    sender: Option<Sender<OutputEvent>>,
    applied: Vec<ConfigSnapshot>,
    reject: Option<String>,
}

impl HeadlessBackend {
    pub fn new(outputs: Vec<Output>) -> HeadlessBackend {
        HeadlessBackend {
            outputs,
            ..Default::default()
        }
    }

    pub fn virtual_output() -> HeadlessBackend {
        HeadlessBackend::new(vec![FixtureOutput {
            connector: "Virtual-1".into(),
            make: "COSMIC".into(),
            model: "Virtual".into(),
            mode: (1920, 1080),
            connected: true,
        }
        .into()])
    }

    /// Loads a list of [`FixtureOutput`]s.
    pub fn from_file(path: &Path) -> Result<HeadlessBackend> {
        let content = std::fs::read_to_string(path)?;
        HeadlessBackend::from_ron(&content)
    }

    pub fn from_ron(content: &str) -> Result<HeadlessBackend> {
        let fixtures: Vec<FixtureOutput> = ron::from_str(content)?;
        Ok(HeadlessBackend::new(
            fixtures.into_iter().map(Output::from).collect(),
        ))
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Every configuration applied so far.
    pub fn applied(&self) -> &[ConfigSnapshot] {
        &self.applied
    }

    /// Makes the next applies fail, `None` accepts again.
    pub fn reject_with(&mut self, reason: Option<String>) {
        self.reject = reason;
    }

    pub fn plug(&mut self, output: Output) {
        self.outputs.retain(|o| o.name() != output.name());
        self.outputs.push(output.clone());
        self.send(OutputEvent::OutputAdded(output));
    }

    pub fn unplug(&mut self, connector: &str) {
        if let Some(output) = self.outputs.iter_mut().find(|o| o.name() == connector) {
            output.connected = false;
            self.send(OutputEvent::ConnectedChanged {
                output: connector.to_string(),
                connected: false,
            });
        }
    }

    fn send(&self, event: OutputEvent) {
        if let Some(sender) = self.sender.as_ref() {
            if let Err(err) = sender.send(event) {
                warn!(?err, "Output event receiver is gone");
            }
        }
    }
}

impl DisplayBackend for HeadlessBackend {
    fn list_outputs(&mut self) -> Vec<Output> {
        self.outputs.clone()
    }

    fn apply_config(&mut self, snapshot: &ConfigSnapshot) -> Result<(), ApplyError> {
        if let Some(reason) = self.reject.clone() {
            return Err(ApplyError::Rejected(reason));
        }
        if let Some(unknown) = snapshot
            .outputs
            .iter()
            .find(|o| !self.outputs.iter().any(|known| known.info == o.info))
        {
            return Err(ApplyError::UnknownOutput(unknown.name().to_string()));
        }
        if snapshot.enabled().next().is_none() {
            return Err(ApplyError::NoEnabledOutput);
        }

        for output in self.outputs.iter_mut() {
            if let Some(conf) = snapshot.outputs.iter().find(|o| o.info == output.info) {
                output.enabled = conf.enabled;
                output.geometry = conf.geometry;
                output.scale = conf.scale;
                output.mirroring = conf.mirroring.clone();
            }
        }
        debug!(outputs = snapshot.outputs.len(), "Applied output configuration");
        self.applied.push(snapshot.clone());
        Ok(())
    }

    fn watch(&mut self, sender: Sender<OutputEvent>) {
        self.sender = Some(sender);
    }
}
