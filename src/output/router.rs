// SPDX-License-Identifier: GPL-3.0-only

use std::collections::VecDeque;
use tracing::trace;

use super::{ConfigSnapshot, Output, ReconciliationEngine};

/// Hardware notifications and user edits, in the order they arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    OutputAdded(Output),
    OutputRemoved(String),
    EnabledChanged { output: String, enabled: bool },
    ConnectedChanged { output: String, connected: bool },
    PrimaryChanged(String),
    ScaleChanged { output: String, scale: f64 },
    UnifyToggled(bool),
}

/// Emitted at most once per processing tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfigChanged {
    /// Number of events that changed the live snapshot.
    pub changes: usize,
    pub snapshot: ConfigSnapshot,
}

/// Queues events until the owner drains them at the end of a tick, so a
/// burst of hotplug events results in a single notification.
#[derive(Debug, Default)]
pub struct ChangeNotificationRouter {
    queue: VecDeque<OutputEvent>,
}

impl ChangeNotificationRouter {
    pub fn new() -> ChangeNotificationRouter {
        ChangeNotificationRouter::default()
    }

    pub fn push(&mut self, event: OutputEvent) {
        trace!(?event, "Queued output event");
        self.queue.push_back(event);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn dispatch(&mut self, engine: &mut ReconciliationEngine) -> Option<EffectiveConfigChanged> {
        let mut changes = 0;
        while let Some(event) = self.queue.pop_front() {
            if apply(engine, event) {
                changes += 1;
            }
        }

        (changes > 0).then(|| EffectiveConfigChanged {
            changes,
            snapshot: engine.snapshot(),
        })
    }
}

fn apply(engine: &mut ReconciliationEngine, event: OutputEvent) -> bool {
    match event {
        OutputEvent::OutputAdded(output) => engine.on_output_added(output),
        OutputEvent::OutputRemoved(name) => engine.on_output_removed(&name),
        OutputEvent::EnabledChanged { output, enabled } => {
            engine.on_enabled_changed(&output, enabled)
        }
        OutputEvent::ConnectedChanged { output, connected } => {
            engine.on_connected_changed(&output, connected)
        }
        OutputEvent::PrimaryChanged(name) => engine.on_primary_changed(&name),
        OutputEvent::ScaleChanged { output, scale } => engine.on_scale_changed(&output, scale),
        OutputEvent::UnifyToggled(unify) => engine.on_unify_toggled(unify),
    }
}
