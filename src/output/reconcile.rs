// SPDX-License-Identifier: GPL-3.0-only

use cosmic_display_config::output::{GlobalOutputRecord, PersistedRecord};
use std::collections::HashSet;
use tracing::{debug, warn};

use super::{ConfigSnapshot, Geometry, Output};

pub const MIN_SCALE: f64 = 0.5;
pub const MAX_SCALE: f64 = 4.0;

/// Inconsistencies found while reconciling. All of them are resolved
/// automatically and only reported.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigConflict {
    #[error("No enabled output can be elected primary")]
    NoPrimary,
    #[error("Output {0} was detected more than once")]
    DuplicateOutput(String),
    #[error("Output {output} overlapped another output, moved to x={x}")]
    OverlappingGeometry { output: String, x: i32 },
    #[error("Output {0} is not connected and enabled, it cannot become primary")]
    InvalidPrimary(String),
    #[error("Unknown output {0}")]
    UnknownOutput(String),
    #[error("Not enough connected outputs for {0:?}")]
    NotEnoughOutputs(DisplaySwitch),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// The live configuration differs from the persisted one.
    Changed,
    /// The live configuration is identical to the persisted one again.
    MatchesPersisted,
    Conflict(ConfigConflict),
}

/// Display switch presets, as triggered by the display hotkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySwitch {
    Clone,
    Extend,
    FirstOnly,
    SecondOnly,
}

/// Computes the effective configuration of `detected` with the
/// per-output settings of `persisted` applied.
pub fn reconcile(
    detected: ConfigSnapshot,
    persisted: Option<&PersistedRecord>,
) -> ConfigSnapshot {
    reconcile_with(detected, persisted, &[], &mut Vec::new())
}

fn reconcile_with(
    mut snapshot: ConfigSnapshot,
    persisted: Option<&PersistedRecord>,
    globals: &[GlobalOutputRecord],
    conflicts: &mut Vec<ConfigConflict>,
) -> ConfigSnapshot {
    dedup_outputs(&mut snapshot, conflicts);

    let preferred = match persisted {
        Some(record) => {
            for output in snapshot.outputs.iter_mut() {
                match record.get(&output.info) {
                    Some(conf) => {
                        output.enabled = conf.is_enabled();
                        if conf.mode != (0, 0) {
                            (output.geometry.width, output.geometry.height) = conf.mode;
                        }
                        (output.geometry.x, output.geometry.y) = conf.position;
                        output.scale = sanitize_scale(conf.scale);
                        if conf.brightness.is_some() {
                            output.brightness = conf.brightness;
                        }
                        output.mirroring = None;
                    }
                    None => apply_defaults(output, globals),
                }
            }
            record.primary().map(|info| info.connector.clone())
        }
        None if snapshot.reconciled => snapshot.primary().map(|o| o.name().to_owned()),
        None => {
            for output in snapshot.outputs.iter_mut() {
                apply_defaults(output, globals);
            }
            None
        }
    };

    for output in snapshot.outputs.iter_mut().filter(|o| !o.connected) {
        output.enabled = false;
    }
    if !snapshot.unify_outputs {
        for output in snapshot.outputs.iter_mut() {
            output.mirroring = None;
        }
        resolve_overlaps(&mut snapshot, conflicts);
    }

    enforce(&mut snapshot, preferred.as_deref(), conflicts);
    snapshot.reconciled = true;
    snapshot
}

/// Newly detected output: enabled at its native mode, never primary.
fn apply_defaults(output: &mut Output, globals: &[GlobalOutputRecord]) {
    output.enabled = output.connected;
    if let Some((width, height)) = output.preferred_mode {
        output.geometry.width = width;
        output.geometry.height = height;
    }
    output.primary = false;
    output.mirroring = None;
    output.scale = sanitize_scale(output.scale);
    if let Some(global) = globals.iter().find(|g| g.info == output.info) {
        apply_global(output, global);
    }
}

/// Last scale and brightness the output had in any arrangement.
pub fn apply_global(output: &mut Output, global: &GlobalOutputRecord) {
    output.scale = sanitize_scale(global.scale);
    if global.brightness.is_some() {
        output.brightness = global.brightness;
    }
}

pub(crate) fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() {
        scale.clamp(MIN_SCALE, MAX_SCALE)
    } else {
        1.0
    }
}

fn dedup_outputs(snapshot: &mut ConfigSnapshot, conflicts: &mut Vec<ConfigConflict>) {
    let mut seen = HashSet::new();
    snapshot.outputs.retain(|output| {
        if seen.insert(output.info.connector.clone()) {
            true
        } else {
            conflicts.push(ConfigConflict::DuplicateOutput(output.name().to_owned()));
            false
        }
    });
}

/// Moves enabled outputs that overlap an earlier one to the right edge of
/// everything placed so far.
fn resolve_overlaps(snapshot: &mut ConfigSnapshot, conflicts: &mut Vec<ConfigConflict>) {
    let mut placed: Vec<Geometry> = Vec::new();
    for output in snapshot
        .outputs
        .iter_mut()
        .filter(|o| o.enabled && o.connected)
    {
        let mut logical = output.logical_geometry();
        if placed.iter().any(|other| other.intersects(&logical)) {
            let x = placed.iter().map(Geometry::right).max().unwrap_or(0);
            output.geometry.x = x;
            logical.x = x;
            conflicts.push(ConfigConflict::OverlappingGeometry {
                output: output.name().to_owned(),
                x,
            });
        }
        placed.push(logical);
    }
}

/// Places all enabled outputs next to each other, primary first.
fn layout_extend(snapshot: &mut ConfigSnapshot) {
    let mut order = (0..snapshot.outputs.len())
        .filter(|&i| snapshot.outputs[i].enabled && snapshot.outputs[i].connected)
        .collect::<Vec<_>>();
    order.sort_by_key(|&i| !snapshot.outputs[i].primary);

    let mut x = 0;
    for i in order {
        let output = &mut snapshot.outputs[i];
        output.mirroring = None;
        output.geometry.x = x;
        output.geometry.y = 0;
        x = output.logical_geometry().right();
    }
}

/// Rules that hold after every mutation: disconnected outputs are
/// disabled, at most one connected output is the internal panel, exactly
/// one enabled output is primary, and clone mode mirrors the primary.
fn enforce(
    snapshot: &mut ConfigSnapshot,
    preferred: Option<&str>,
    conflicts: &mut Vec<ConfigConflict>,
) {
    let unify = snapshot.unify_outputs;
    for output in snapshot.outputs.iter_mut() {
        if !output.connected {
            output.enabled = false;
        } else if unify {
            output.enabled = true;
        }
        if !unify {
            output.mirroring = None;
        }
    }

    let mut internal_seen = false;
    for output in snapshot.outputs.iter_mut() {
        output.internal = !internal_seen && output.connected && output.has_internal_connector();
        internal_seen |= output.internal;
    }

    elect_primary(snapshot, preferred, conflicts);

    if unify {
        let Some((name, geometry)) = snapshot
            .primary()
            .map(|p| (p.name().to_owned(), p.geometry))
        else {
            return;
        };
        for output in snapshot.outputs.iter_mut().filter(|o| o.connected) {
            if output.primary {
                output.mirroring = None;
            } else {
                output.geometry = geometry;
                output.mirroring = Some(name.clone());
            }
        }
    }
}

fn elect_primary(
    snapshot: &mut ConfigSnapshot,
    preferred: Option<&str>,
    conflicts: &mut Vec<ConfigConflict>,
) {
    let eligible = |o: &Output| o.connected && o.enabled;
    let chosen = preferred
        .and_then(|name| {
            snapshot
                .outputs
                .iter()
                .position(|o| o.name() == name && eligible(o))
        })
        .or_else(|| snapshot.outputs.iter().position(eligible));

    if chosen.is_none() && snapshot.outputs.iter().any(|o| o.connected) {
        conflicts.push(ConfigConflict::NoPrimary);
    }
    for (i, output) in snapshot.outputs.iter_mut().enumerate() {
        output.primary = Some(i) == chosen;
    }
}

/// Owns the live snapshot. Full reconciliation runs on startup and when
/// the hardware signature changes; everything else goes through the
/// incremental `on_*` methods, which keep in-flight user edits.
#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    live: ConfigSnapshot,
    baseline: Option<PersistedRecord>,
    signals: Vec<EngineSignal>,
    dirty: bool,
}

impl ReconciliationEngine {
    pub fn new() -> ReconciliationEngine {
        ReconciliationEngine::default()
    }

    pub fn live(&self) -> &ConfigSnapshot {
        &self.live
    }

    /// Copy of the live snapshot, for background work.
    pub fn snapshot(&self) -> ConfigSnapshot {
        self.live.clone()
    }

    /// Whether the live configuration differs from the persisted one.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn take_signals(&mut self) -> Vec<EngineSignal> {
        std::mem::take(&mut self.signals)
    }

    pub fn reconcile(
        &mut self,
        detected: ConfigSnapshot,
        persisted: Option<PersistedRecord>,
        globals: &[GlobalOutputRecord],
    ) -> &ConfigSnapshot {
        let mut conflicts = Vec::new();
        self.live = reconcile_with(detected, persisted.as_ref(), globals, &mut conflicts);
        self.baseline = persisted;
        self.report(conflicts);
        debug!(
            outputs = self.live.outputs.len(),
            primary = ?self.live.primary().map(Output::name),
            "Reconciled output configuration"
        );
        self.update_dirty();
        &self.live
    }

    /// The live configuration was written to disk as `record`.
    pub fn mark_persisted(&mut self, record: PersistedRecord) {
        self.baseline = Some(record);
        self.update_dirty();
    }

    /// Replaces the live snapshot, used to roll back to a previously
    /// applied configuration.
    pub fn restore(&mut self, snapshot: ConfigSnapshot) -> bool {
        self.mutate(move |live| {
            *live = snapshot;
            Ok(live.primary().map(|o| o.name().to_owned()))
        })
    }

    pub fn on_output_added(&mut self, output: Output) -> bool {
        self.mutate(move |live| {
            let preferred = live.primary().map(|o| o.name().to_owned());
            let mut output = output;
            output.primary = false;
            output.enabled = output.connected;
            output.scale = sanitize_scale(output.scale);
            if let Some((width, height)) = output.preferred_mode {
                output.geometry.width = width;
                output.geometry.height = height;
            }
            if !live.unify_outputs && output.enabled {
                output.geometry.x = live
                    .enabled()
                    .filter(|o| o.name() != output.name())
                    .map(|o| o.logical_geometry().right())
                    .max()
                    .unwrap_or(0);
                output.geometry.y = 0;
            }
            match live.output_mut(output.name()) {
                Some(existing) => *existing = output,
                None => live.outputs.push(output),
            }
            Ok(preferred)
        })
    }

    pub fn on_output_removed(&mut self, name: &str) -> bool {
        self.mutate(|live| {
            let Some(pos) = live.outputs.iter().position(|o| o.name() == name) else {
                return Err(ConfigConflict::UnknownOutput(name.to_owned()));
            };
            live.outputs.remove(pos);
            Ok(live.primary().map(|o| o.name().to_owned()))
        })
    }

    pub fn on_enabled_changed(&mut self, name: &str, enabled: bool) -> bool {
        self.mutate(|live| {
            let preferred = live.primary().map(|o| o.name().to_owned());
            let output = live
                .output_mut(name)
                .ok_or_else(|| ConfigConflict::UnknownOutput(name.to_owned()))?;
            output.enabled = enabled && output.connected;
            Ok(preferred)
        })
    }

    pub fn on_connected_changed(&mut self, name: &str, connected: bool) -> bool {
        self.mutate(|live| {
            let preferred = live.primary().map(|o| o.name().to_owned());
            let output = live
                .output_mut(name)
                .ok_or_else(|| ConfigConflict::UnknownOutput(name.to_owned()))?;
            output.connected = connected;
            output.enabled = connected;
            Ok(preferred)
        })
    }

    pub fn on_primary_changed(&mut self, name: &str) -> bool {
        self.mutate(|live| match live.output(name) {
            Some(o) if o.connected && o.enabled => Ok(Some(name.to_owned())),
            Some(_) => Err(ConfigConflict::InvalidPrimary(name.to_owned())),
            None => Err(ConfigConflict::UnknownOutput(name.to_owned())),
        })
    }

    pub fn on_scale_changed(&mut self, name: &str, scale: f64) -> bool {
        self.mutate(|live| {
            let preferred = live.primary().map(|o| o.name().to_owned());
            let output = live
                .output_mut(name)
                .ok_or_else(|| ConfigConflict::UnknownOutput(name.to_owned()))?;
            output.scale = sanitize_scale(scale);
            Ok(preferred)
        })
    }

    pub fn on_unify_toggled(&mut self, unify: bool) -> bool {
        self.mutate(|live| {
            let preferred = live.primary().map(|o| o.name().to_owned());
            let was_unified = live.unify_outputs;
            live.unify_outputs = unify;
            if was_unified && !unify {
                layout_extend(live);
            }
            Ok(preferred)
        })
    }

    /// User edit of an output position or mode.
    pub fn on_geometry_changed(&mut self, name: &str, geometry: Geometry) -> bool {
        self.mutate(|live| {
            let preferred = live.primary().map(|o| o.name().to_owned());
            let output = live
                .output_mut(name)
                .ok_or_else(|| ConfigConflict::UnknownOutput(name.to_owned()))?;
            output.geometry = geometry;
            Ok(preferred)
        })
    }

    /// Records a brightness read back from hardware, `None` when the output
    /// has no working brightness control.
    pub fn on_brightness_changed(&mut self, name: &str, brightness: Option<u8>) -> bool {
        self.mutate(|live| {
            let preferred = live.primary().map(|o| o.name().to_owned());
            let output = live
                .output_mut(name)
                .ok_or_else(|| ConfigConflict::UnknownOutput(name.to_owned()))?;
            output.brightness = brightness.map(|b| b.min(100));
            Ok(preferred)
        })
    }

    pub fn set_night_mode(&mut self, night_mode: bool) -> bool {
        let changed = self.live.night_mode != night_mode;
        self.live.night_mode = night_mode;
        changed
    }

    pub fn set_dark_theme(&mut self, dark_theme: bool) -> bool {
        let changed = self.live.dark_theme != dark_theme;
        self.live.dark_theme = dark_theme;
        changed
    }

    pub fn switch(&mut self, switch: DisplaySwitch) -> bool {
        self.mutate(|live| {
            let connected = live
                .outputs
                .iter()
                .enumerate()
                .filter(|(_, o)| o.connected)
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            let only = |live: &mut ConfigSnapshot, keep: usize| {
                live.unify_outputs = false;
                for (i, output) in live.outputs.iter_mut().enumerate() {
                    output.enabled = output.connected && i == keep;
                    output.mirroring = None;
                }
                let name = live.outputs[keep].name().to_owned();
                layout_extend(live);
                Some(name)
            };

            match switch {
                DisplaySwitch::Clone => {
                    live.unify_outputs = true;
                    Ok(live.primary().map(|o| o.name().to_owned()))
                }
                DisplaySwitch::Extend => {
                    live.unify_outputs = false;
                    for output in live.outputs.iter_mut() {
                        output.enabled = output.connected;
                    }
                    layout_extend(live);
                    Ok(live.primary().map(|o| o.name().to_owned()))
                }
                DisplaySwitch::FirstOnly => match connected.first() {
                    Some(&first) => Ok(only(live, first)),
                    None => Err(ConfigConflict::NotEnoughOutputs(switch)),
                },
                DisplaySwitch::SecondOnly => match connected.get(1) {
                    Some(&second) => Ok(only(live, second)),
                    None => Err(ConfigConflict::NotEnoughOutputs(switch)),
                },
            }
        })
    }

    /// Runs `f` on the live snapshot and re-establishes the invariants.
    /// `f` returns the output that should end up primary if still eligible.
    fn mutate(
        &mut self,
        f: impl FnOnce(&mut ConfigSnapshot) -> Result<Option<String>, ConfigConflict>,
    ) -> bool {
        let before = self.live.clone();
        let mut conflicts = Vec::new();
        match f(&mut self.live) {
            Ok(preferred) => enforce(&mut self.live, preferred.as_deref(), &mut conflicts),
            Err(conflict) => {
                self.live = before;
                self.report(vec![conflict]);
                return false;
            }
        }
        self.report(conflicts);

        let changed = self.live != before;
        if changed {
            self.update_dirty();
        }
        changed
    }

    fn report(&mut self, conflicts: Vec<ConfigConflict>) {
        for conflict in conflicts {
            warn!(%conflict, "Resolved output configuration conflict");
            self.signals.push(EngineSignal::Conflict(conflict));
        }
    }

    fn update_dirty(&mut self) {
        self.dirty = match &self.baseline {
            Some(record) => &self.live.to_record() != record,
            None => true,
        };
        self.signals.push(if self.dirty {
            EngineSignal::Changed
        } else {
            EngineSignal::MatchesPersisted
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::test_utils::{info, output};
    use cosmic_display_config::output::{OutputConfig, OutputState};
    use proptest::prelude::*;

    fn primaries(snapshot: &ConfigSnapshot) -> usize {
        snapshot.outputs.iter().filter(|o| o.primary).count()
    }

    fn assert_primary_invariant(snapshot: &ConfigSnapshot) {
        let enabled = snapshot.outputs.iter().any(|o| o.enabled);
        assert_eq!(primaries(snapshot), enabled as usize, "{snapshot:#?}");
        if let Some(primary) = snapshot.primary() {
            assert!(primary.enabled && primary.connected);
        }
    }

    fn changed_count(signals: &[EngineSignal]) -> usize {
        signals
            .iter()
            .filter(|s| matches!(s, EngineSignal::Changed))
            .count()
    }

    #[test]
    fn first_run_enables_everything() {
        let mut detected = ConfigSnapshot::new(vec![
            output("eDP-1", 1920, 1080),
            output("HDMI-1", 2560, 1440),
        ]);
        detected.outputs[1].enabled = false;
        detected.outputs[1].geometry = Geometry::new(0, 0, 1024, 768);

        let mut engine = ReconciliationEngine::new();
        let live = engine.reconcile(detected, None, &[]).clone();

        assert!(live.outputs.iter().all(|o| o.enabled));
        assert_eq!(live.primary().unwrap().name(), "eDP-1");
        assert_eq!(live.outputs[0].geometry, Geometry::new(0, 0, 1920, 1080));
        assert_eq!(
            live.outputs[1].geometry,
            Geometry::new(1920, 0, 2560, 1440)
        );
        assert!(live.outputs[0].internal);
        assert!(engine.is_dirty());
        assert_eq!(changed_count(&engine.take_signals()), 1);
    }

    #[test]
    fn disconnected_persisted_primary_is_replaced() {
        let mut detected = ConfigSnapshot::new(vec![
            output("HDMI-1", 1920, 1080),
            output("eDP-1", 1920, 1080),
        ]);
        detected.outputs[0].connected = false;
        let record = PersistedRecord {
            outputs: vec![
                (
                    info("HDMI-1"),
                    OutputConfig {
                        mode: (1920, 1080),
                        primary: true,
                        ..Default::default()
                    },
                ),
                (
                    info("eDP-1"),
                    OutputConfig {
                        mode: (1920, 1080),
                        position: (1920, 0),
                        ..Default::default()
                    },
                ),
            ],
        };

        let live = reconcile(detected, Some(&record));
        assert_eq!(live.primary().unwrap().name(), "eDP-1");
        assert!(!live.output("HDMI-1").unwrap().enabled);
        assert_primary_invariant(&live);
    }

    #[test]
    fn persisted_fields_are_restored() {
        let detected = ConfigSnapshot::new(vec![
            output("eDP-1", 1920, 1080),
            output("DP-1", 3840, 2160),
            output("DP-2", 1920, 1080),
        ]);
        let record = PersistedRecord {
            outputs: vec![
                (
                    info("eDP-1"),
                    OutputConfig {
                        mode: (1920, 1080),
                        position: (3840, 0),
                        enabled: OutputState::Disabled,
                        ..Default::default()
                    },
                ),
                (
                    info("DP-1"),
                    OutputConfig {
                        mode: (2560, 1440),
                        position: (0, 0),
                        scale: 1.5,
                        primary: true,
                        brightness: Some(70),
                        ..Default::default()
                    },
                ),
                (info("VGA-1"), OutputConfig::default()),
            ],
        };

        let live = reconcile(detected, Some(&record));
        assert_eq!(live.outputs.len(), 3);
        assert!(live.output("VGA-1").is_none());

        let edp = live.output("eDP-1").unwrap();
        assert!(!edp.enabled);
        let dp1 = live.output("DP-1").unwrap();
        assert!(dp1.primary);
        assert_eq!(dp1.geometry, Geometry::new(0, 0, 2560, 1440));
        assert_eq!(dp1.scale, 1.5);
        assert_eq!(dp1.brightness, Some(70));

        // not in the record: enabled at native mode, not primary
        let dp2 = live.output("DP-2").unwrap();
        assert!(dp2.enabled && !dp2.primary);
        assert_eq!(dp2.geometry.size(), (1920, 1080));
        assert!(!dp2.logical_geometry().intersects(&dp1.logical_geometry()));
    }

    #[test]
    fn global_records_fill_new_outputs() {
        let detected = ConfigSnapshot::new(vec![
            output("DP-1", 1920, 1080),
            output("DP-2", 1920, 1080),
        ]);
        let record = PersistedRecord {
            outputs: vec![(
                info("DP-1"),
                OutputConfig {
                    mode: (1920, 1080),
                    scale: 1.25,
                    primary: true,
                    ..Default::default()
                },
            )],
        };
        let globals = vec![
            GlobalOutputRecord {
                info: info("DP-1"),
                scale: 2.0,
                brightness: Some(10),
            },
            GlobalOutputRecord {
                info: info("DP-2"),
                scale: 1.5,
                brightness: Some(55),
            },
        ];

        let mut engine = ReconciliationEngine::new();
        let live = engine.reconcile(detected, Some(record), &globals);
        // arrangement record wins over the global one
        assert_eq!(live.output("DP-1").unwrap().scale, 1.25);
        assert_eq!(live.output("DP-1").unwrap().brightness, None);
        let dp2 = live.output("DP-2").unwrap();
        assert_eq!(dp2.scale, 1.5);
        assert_eq!(dp2.brightness, Some(55));
        assert!(!dp2.primary);
    }

    #[test]
    fn unify_mirrors_primary_geometry() {
        let mut engine = ReconciliationEngine::new();
        let detected = ConfigSnapshot::new(vec![
            output("DP-1", 1920, 1080),
            output("DP-2", 1280, 1024),
        ]);
        engine.reconcile(detected, None, &[]);

        assert!(engine.on_unify_toggled(true));
        let live = engine.live();
        let b = live.output("DP-2").unwrap();
        assert_eq!(b.geometry, Geometry::new(0, 0, 1920, 1080));
        assert_eq!(b.mirroring.as_deref(), Some("DP-1"));
        assert_primary_invariant(live);

        // leaving clone mode lays the outputs out side by side again
        assert!(engine.on_unify_toggled(false));
        let live = engine.live();
        assert_eq!(live.output("DP-2").unwrap().geometry.x, 1920);
        assert!(live.outputs.iter().all(|o| o.mirroring.is_none()));
    }

    #[test]
    fn unify_keeps_each_brightness() {
        let mut detected = ConfigSnapshot::new(vec![
            output("DP-1", 1920, 1080),
            output("DP-2", 1280, 1024),
        ]);
        detected.unify_outputs = true;
        detected.outputs[0].brightness = Some(20);
        detected.outputs[1].brightness = Some(80);
        let live = reconcile(detected, None);
        let record = live.to_record();
        assert_eq!(record.outputs[0].1.brightness, Some(20));
        assert_eq!(record.outputs[1].1.brightness, Some(80));
        assert_eq!(
            record.outputs[1].1.enabled,
            OutputState::Mirroring("DP-1".into())
        );
    }

    #[test]
    fn duplicates_are_dropped() {
        let detected = ConfigSnapshot::new(vec![
            output("DP-1", 1920, 1080),
            output("DP-1", 1280, 1024),
        ]);
        let mut engine = ReconciliationEngine::new();
        let live = engine.reconcile(detected, None, &[]).clone();
        assert_eq!(live.outputs.len(), 1);
        assert_eq!(live.outputs[0].geometry.size(), (1920, 1080));
        let duplicate = EngineSignal::Conflict(ConfigConflict::DuplicateOutput("DP-1".into()));
        assert!(engine.take_signals().contains(&duplicate));
    }

    #[test]
    fn nothing_enabled_means_no_primary() {
        let mut detected = ConfigSnapshot::new(vec![output("DP-1", 1920, 1080)]);
        detected.outputs[0].connected = false;
        let live = reconcile(detected, None);
        assert!(live.primary().is_none());
    }

    #[test]
    fn saved_record_restores_clean_state() {
        let detected = ConfigSnapshot::new(vec![
            output("eDP-1", 1920, 1080),
            output("DP-1", 2560, 1440),
        ]);
        let mut engine = ReconciliationEngine::new();
        engine.reconcile(detected.clone(), None, &[]);
        engine.on_primary_changed("DP-1");
        engine.on_scale_changed("eDP-1", 1.25);
        let record = engine.live().to_record();
        engine.mark_persisted(record.clone());
        assert!(!engine.is_dirty());

        let mut restarted = ReconciliationEngine::new();
        let live = restarted.reconcile(detected, Some(record), &[]);
        assert_eq!(live.primary().unwrap().name(), "DP-1");
        assert_eq!(live.output("eDP-1").unwrap().scale, 1.25);
        assert!(!restarted.is_dirty());
        assert_eq!(
            restarted.take_signals().last(),
            Some(&EngineSignal::MatchesPersisted)
        );
    }

    #[test]
    fn incremental_updates_keep_single_primary() {
        let mut engine = ReconciliationEngine::new();
        engine.reconcile(
            ConfigSnapshot::new(vec![output("eDP-1", 1920, 1080), output("DP-1", 2560, 1440)]),
            None,
            &[],
        );

        assert!(engine.on_primary_changed("DP-1"));
        assert_eq!(engine.live().primary().unwrap().name(), "DP-1");

        // removing the primary elects the next output
        assert!(engine.on_output_removed("DP-1"));
        assert_eq!(engine.live().primary().unwrap().name(), "eDP-1");

        // hotplugged outputs never steal primary
        assert!(engine.on_output_added(output("HDMI-1", 1280, 1024)));
        assert_eq!(engine.live().primary().unwrap().name(), "eDP-1");
        assert_eq!(engine.live().output("HDMI-1").unwrap().geometry.x, 1920);

        assert!(engine.on_enabled_changed("eDP-1", false));
        assert_eq!(engine.live().primary().unwrap().name(), "HDMI-1");
        assert_primary_invariant(engine.live());

        assert!(engine.on_connected_changed("HDMI-1", false));
        assert!(engine.live().primary().is_none());
        assert_primary_invariant(engine.live());
    }

    #[test]
    fn primary_on_disabled_output_is_rejected() {
        let mut engine = ReconciliationEngine::new();
        engine.reconcile(
            ConfigSnapshot::new(vec![output("eDP-1", 1920, 1080), output("DP-1", 2560, 1440)]),
            None,
            &[],
        );
        engine.on_enabled_changed("DP-1", false);
        engine.take_signals();

        assert!(!engine.on_primary_changed("DP-1"));
        assert_eq!(engine.live().primary().unwrap().name(), "eDP-1");
        let invalid = EngineSignal::Conflict(ConfigConflict::InvalidPrimary("DP-1".into()));
        assert_eq!(engine.take_signals(), vec![invalid]);
        assert!(!engine.on_scale_changed("VGA-1", 2.0));
    }

    #[test]
    fn scale_is_clamped() {
        let mut engine = ReconciliationEngine::new();
        engine.reconcile(ConfigSnapshot::new(vec![output("DP-1", 1920, 1080)]), None, &[]);
        engine.on_scale_changed("DP-1", 12.0);
        assert_eq!(engine.live().outputs[0].scale, MAX_SCALE);
        engine.on_scale_changed("DP-1", f64::NAN);
        assert_eq!(engine.live().outputs[0].scale, 1.0);
    }

    #[test]
    fn only_one_internal_panel() {
        let live = reconcile(
            ConfigSnapshot::new(vec![
                output("DP-1", 1920, 1080),
                output("eDP-1", 1920, 1080),
                output("eDP-2", 1920, 1080),
            ]),
            None,
        );
        assert_eq!(live.internal().unwrap().name(), "eDP-1");
        assert_eq!(live.outputs.iter().filter(|o| o.internal).count(), 1);
    }

    #[test]
    fn display_switch_presets() {
        let mut engine = ReconciliationEngine::new();
        engine.reconcile(
            ConfigSnapshot::new(vec![output("eDP-1", 1920, 1080), output("DP-1", 2560, 1440)]),
            None,
            &[],
        );

        assert!(engine.switch(DisplaySwitch::SecondOnly));
        let live = engine.live();
        assert!(!live.output("eDP-1").unwrap().enabled);
        assert_eq!(live.primary().unwrap().name(), "DP-1");
        assert_eq!(live.output("DP-1").unwrap().geometry.position(), (0, 0));

        assert!(engine.switch(DisplaySwitch::Clone));
        assert!(engine.live().outputs.iter().all(|o| o.enabled));
        assert_eq!(engine.live().primary().unwrap().name(), "DP-1");
        assert_eq!(
            engine.live().output("eDP-1").unwrap().geometry.size(),
            (2560, 1440)
        );

        assert!(engine.switch(DisplaySwitch::Extend));
        let live = engine.live();
        assert!(!live.unify_outputs);
        assert_eq!(live.output("DP-1").unwrap().geometry.x, 0);
        assert_eq!(live.output("eDP-1").unwrap().geometry.x, 2560);

        assert!(engine.switch(DisplaySwitch::FirstOnly));
        assert_eq!(engine.live().primary().unwrap().name(), "eDP-1");
        assert!(!engine.live().output("DP-1").unwrap().enabled);
    }

    #[test]
    fn second_only_needs_two_outputs() {
        let mut engine = ReconciliationEngine::new();
        engine.reconcile(ConfigSnapshot::new(vec![output("eDP-1", 1920, 1080)]), None, &[]);
        engine.take_signals();
        assert!(!engine.switch(DisplaySwitch::SecondOnly));
        assert_eq!(
            engine.take_signals(),
            vec![EngineSignal::Conflict(ConfigConflict::NotEnoughOutputs(
                DisplaySwitch::SecondOnly
            ))]
        );
    }

    fn arb_output() -> impl Strategy<Value = Output> {
        (
            prop::sample::select(vec!["eDP-1", "DP-1", "DP-2", "HDMI-1", "HDMI-2"]),
            prop::sample::select(vec![
                (1920u32, 1080u32),
                (1280, 1024),
                (2560, 1440),
                (3840, 2160),
            ]),
            (0i32..3, 0i32..2),
            any::<bool>(),
            any::<bool>(),
            prop::sample::select(vec![1.0, 1.25, 1.5, 2.0]),
            prop::option::of(0u8..=100),
        )
            .prop_map(|(name, (w, h), (x, y), connected, enabled, scale, brightness)| {
                let mut o = output(name, w, h);
                o.geometry.x = x * 1920;
                o.geometry.y = y * 1080;
                o.connected = connected;
                o.enabled = enabled;
                o.scale = scale;
                o.brightness = brightness;
                o
            })
    }

    fn arb_snapshot() -> impl Strategy<Value = ConfigSnapshot> {
        (prop::collection::vec(arb_output(), 0..5), any::<bool>()).prop_map(|(outputs, unify)| {
            let mut snapshot = ConfigSnapshot::new(outputs);
            snapshot.unify_outputs = unify;
            snapshot
        })
    }

    fn arb_record() -> impl Strategy<Value = Option<PersistedRecord>> {
        prop::option::of(prop::collection::vec(arb_output(), 0..5).prop_map(|outputs| {
            PersistedRecord {
                outputs: outputs
                    .iter()
                    .map(|o| {
                        let mut conf = o.to_config();
                        conf.primary = o.connected;
                        (o.info.clone(), conf)
                    })
                    .collect(),
            }
        }))
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(Output),
        Remove(usize),
        Enable(usize, bool),
        Connect(usize, bool),
        Primary(usize),
        Scale(usize, f64),
        Unify(bool),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            arb_output().prop_map(Op::Add),
            (0usize..5).prop_map(Op::Remove),
            (0usize..5, any::<bool>()).prop_map(|(i, b)| Op::Enable(i, b)),
            (0usize..5, any::<bool>()).prop_map(|(i, b)| Op::Connect(i, b)),
            (0usize..5).prop_map(Op::Primary),
            (0usize..5, prop::sample::select(vec![1.0, 1.5, 2.0]))
                .prop_map(|(i, s)| Op::Scale(i, s)),
            any::<bool>().prop_map(Op::Unify),
        ]
    }

    fn name_at(engine: &ReconciliationEngine, i: usize) -> String {
        engine
            .live()
            .outputs
            .get(i)
            .map(|o| o.name().to_owned())
            .unwrap_or_else(|| "VGA-1".into())
    }

    fn apply_op(engine: &mut ReconciliationEngine, op: Op) {
        match op {
            Op::Add(output) => engine.on_output_added(output),
            Op::Remove(i) => {
                let name = name_at(engine, i);
                engine.on_output_removed(&name)
            }
            Op::Enable(i, enabled) => {
                let name = name_at(engine, i);
                engine.on_enabled_changed(&name, enabled)
            }
            Op::Connect(i, connected) => {
                let name = name_at(engine, i);
                engine.on_connected_changed(&name, connected)
            }
            Op::Primary(i) => {
                let name = name_at(engine, i);
                engine.on_primary_changed(&name)
            }
            Op::Scale(i, scale) => {
                let name = name_at(engine, i);
                engine.on_scale_changed(&name, scale)
            }
            Op::Unify(unify) => engine.on_unify_toggled(unify),
        };
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn reconcile_is_idempotent(detected in arb_snapshot(), persisted in arb_record()) {
            let once = reconcile(detected, persisted.as_ref());
            let twice = reconcile(once.clone(), None);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn reconcile_elects_single_primary(
            detected in arb_snapshot(),
            persisted in arb_record(),
        ) {
            let live = reconcile(detected, persisted.as_ref());
            let enabled = live.outputs.iter().any(|o| o.enabled);
            prop_assert_eq!(primaries(&live), enabled as usize);
            prop_assert!(live.outputs.iter().filter(|o| o.internal).count() <= 1);
        }

        #[test]
        fn clone_mode_shares_primary_geometry(
            detected in arb_snapshot(),
            persisted in arb_record(),
        ) {
            let live = reconcile(detected, persisted.as_ref());
            if let (true, Some(primary)) = (live.unify_outputs, live.primary()) {
                for output in live.outputs.iter().filter(|o| o.connected && o.enabled) {
                    prop_assert_eq!(output.geometry, primary.geometry);
                }
            }
        }

        #[test]
        fn incremental_updates_keep_invariant(
            detected in arb_snapshot(),
            ops in prop::collection::vec(arb_op(), 0..12),
        ) {
            let mut engine = ReconciliationEngine::new();
            engine.reconcile(detected, None, &[]);
            for op in ops {
                apply_op(&mut engine, op);
                let live = engine.live();
                let enabled = live.outputs.iter().any(|o| o.enabled);
                prop_assert_eq!(primaries(live), enabled as usize);
                if let Some(primary) = live.primary() {
                    prop_assert!(primary.connected && primary.enabled);
                }
            }
        }
    }
}
