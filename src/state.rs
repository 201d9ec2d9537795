// SPDX-License-Identifier: GPL-3.0-only

use calloop::ping::Ping;
use cosmic_display_config::{
    keys,
    output::{GlobalOutputRecord, HardwareSignature, PersistedRecord, PersistenceError},
    DisplaySettings, NightLightConfig,
};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    backend::{ApplyError, DisplayBackend},
    brightness::{BrightnessController, HardwareError},
    config::{
        persistence::PersistenceStore,
        settings::{load_settings, SettingsError, SystemSettingsStore},
    },
    output::{
        apply_global, ChangeNotificationRouter, ConfigConflict, ConfigSnapshot, DisplaySwitch,
        EngineSignal, Geometry, Output, OutputEvent, ReconciliationEngine,
    },
    utils::{
        slider,
        worker::{BackgroundWorker, Job},
    },
};

/// Notifications for the settings UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// The effective configuration changed, at most once per tick.
    ConfigChanged(ConfigSnapshot),
    /// Whether the live configuration differs from the saved one.
    Dirty(bool),
    Conflict(ConfigConflict),
    BrightnessChanged {
        output: String,
        brightness: Option<u8>,
    },
    NightModeChanged(bool),
    NightLightChanged(NightLightConfig),
    ThemeChanged(bool),
    ScaleChanged(f64),
    Applied,
    Reverted,
    Saved(HardwareSignature),
    /// Non-fatal failure.
    Warning(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BrightnessRequest {
    Read,
    Set(u8),
}

pub struct BrightnessJob {
    controller: Arc<BrightnessController>,
    output: Output,
    request: BrightnessRequest,
}

#[derive(Debug)]
pub struct BrightnessResult {
    pub output: String,
    pub request: BrightnessRequest,
    pub result: Result<Option<u8>, HardwareError>,
}

impl Job for BrightnessJob {
    type Output = BrightnessResult;

    fn run(self) -> BrightnessResult {
        let result = match self.request {
            BrightnessRequest::Read => Ok(self.controller.get_brightness(&self.output)),
            BrightnessRequest::Set(value) => self
                .controller
                .set_brightness(&self.output, value)
                .map(|_| Some(value.min(100))),
        };
        BrightnessResult {
            output: self.output.name().to_owned(),
            request: self.request,
            result,
        }
    }

    // only the final slider position matters
    fn coalesce_key(&self) -> Option<String> {
        Some(self.output.name().to_owned())
    }
}

pub struct SaveJob {
    store: PersistenceStore,
    signature: HardwareSignature,
    record: PersistedRecord,
    globals: Vec<GlobalOutputRecord>,
}

#[derive(Debug)]
pub struct SaveResult {
    pub signature: HardwareSignature,
    pub record: PersistedRecord,
    pub result: Result<(), PersistenceError>,
}

impl Job for SaveJob {
    type Output = SaveResult;

    fn run(self) -> SaveResult {
        let result = self.store.save(&self.signature, &self.record).and_then(|_| {
            self.globals
                .iter()
                .try_for_each(|global| self.store.save_global(global))
        });
        SaveResult {
            signature: self.signature,
            record: self.record,
            result,
        }
    }
}

/// Owns the live configuration. Everything here runs on the event loop
/// thread, hardware and disk I/O is handed to the workers.
pub struct State {
    pub backend: Box<dyn DisplayBackend>,
    pub engine: ReconciliationEngine,
    pub router: ChangeNotificationRouter,
    store: PersistenceStore,
    settings_store: Box<dyn SystemSettingsStore>,
    settings: DisplaySettings,
    brightness: Arc<BrightnessController>,
    brightness_worker: BackgroundWorker<BrightnessJob>,
    save_worker: BackgroundWorker<SaveJob>,
    signature: HardwareSignature,
    connected: HashSet<String>,
    applied: Option<ConfigSnapshot>,
    previous: Option<ConfigSnapshot>,
    dirty: Option<bool>,
    signals: Vec<Signal>,
    pub should_stop: bool,
}

impl State {
    pub fn new(
        backend: Box<dyn DisplayBackend>,
        store: PersistenceStore,
        settings_store: Box<dyn SystemSettingsStore>,
        brightness: BrightnessController,
        ping: Option<Ping>,
    ) -> State {
        let settings = load_settings(settings_store.as_ref());
        let mut brightness_worker = BackgroundWorker::new("brightness");
        let mut save_worker = BackgroundWorker::new("persistence");
        if let Some(ping) = ping {
            brightness_worker = brightness_worker.with_ping(ping.clone());
            save_worker = save_worker.with_ping(ping);
        }

        let mut state = State {
            backend,
            engine: ReconciliationEngine::new(),
            router: ChangeNotificationRouter::new(),
            store,
            settings_store,
            settings,
            brightness: Arc::new(brightness),
            brightness_worker,
            save_worker,
            signature: HardwareSignature::from_outputs([]),
            connected: HashSet::new(),
            applied: None,
            previous: None,
            dirty: None,
            signals: Vec::new(),
            should_stop: false,
        };
        state.load_outputs();
        state
    }

    /// Full reconciliation of the outputs the backend reports.
    pub fn load_outputs(&mut self) {
        let mut detected = ConfigSnapshot::new(self.backend.list_outputs());
        detected.unify_outputs = self.settings.unify_outputs;
        detected.night_mode = self.settings.night_mode;
        detected.dark_theme = self.settings.dark_theme;

        self.signature = detected.signature();
        let record = self.load_record();
        let globals = self
            .store
            .load_globals(detected.connected().map(|o| &o.info));
        info!(
            signature = %self.signature,
            restored = record.is_some(),
            "Loading output configuration"
        );
        self.engine.reconcile(detected, record, &globals);
        self.connected.clear();

        self.apply_live();
        self.request_brightness();
        self.signals
            .push(Signal::ConfigChanged(self.engine.snapshot()));
        self.collect_engine_signals();
    }

    pub fn take_signals(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }

    pub fn settings(&self) -> &DisplaySettings {
        &self.settings
    }

    pub fn is_busy(&self) -> bool {
        self.brightness_worker.is_busy() || self.save_worker.is_busy()
    }

    /// Processing tick: drains the router, collects worker results and
    /// reacts to a changed output arrangement.
    pub fn refresh(&mut self) {
        if let Some(change) = self.router.dispatch(&mut self.engine) {
            debug!(events = change.changes, "Effective output configuration changed");
            if !self.check_signature() {
                self.signals.push(Signal::ConfigChanged(change.snapshot));
            }
            self.request_brightness();
        }

        for result in self.brightness_worker.poll() {
            self.brightness_done(result);
        }
        for result in self.save_worker.poll() {
            self.save_done(result);
        }

        self.sync_settings();
        self.collect_engine_signals();
    }

    /// Queues a user edit, processed in order with hardware events.
    pub fn edit(&mut self, event: OutputEvent) {
        self.router.push(event);
    }

    pub fn set_geometry(&mut self, output: &str, geometry: Geometry) {
        if self.engine.on_geometry_changed(output, geometry) {
            self.signals
                .push(Signal::ConfigChanged(self.engine.snapshot()));
        }
        self.collect_engine_signals();
    }

    /// Applies the live configuration and saves it once the display server
    /// accepted it.
    pub fn apply(&mut self) -> Result<(), ApplyError> {
        let applied = self.engine.live().clone();
        if applied.enabled().next().is_none() {
            debug!("No enabled output, nothing to apply");
            return Ok(());
        }
        if let Err(err) = self.backend.apply_config(&applied) {
            warn!(?err, "Failed to apply output configuration");
            self.signals.push(Signal::Warning(err.to_string()));
            return Err(err);
        }

        self.previous = self.applied.replace(applied);
        self.signals.push(Signal::Applied);
        self.save();
        Ok(())
    }

    /// Re-applies the configuration active before the last `apply`,
    /// without saving it.
    pub fn revert(&mut self) -> Result<(), ApplyError> {
        let Some(previous) = self.previous.take() else {
            debug!("Nothing to revert to");
            return Ok(());
        };
        if let Err(err) = self.backend.apply_config(&previous) {
            warn!(?err, "Failed to revert output configuration");
            self.signals.push(Signal::Warning(err.to_string()));
            self.previous = Some(previous);
            return Err(err);
        }

        self.engine.restore(previous.clone());
        self.applied = Some(previous);
        self.signals.push(Signal::Reverted);
        self.signals
            .push(Signal::ConfigChanged(self.engine.snapshot()));
        self.collect_engine_signals();
        Ok(())
    }

    /// Writes the live configuration in the background. Saves complete in
    /// the order they were requested.
    pub fn save(&mut self) {
        let live = self.engine.live();
        self.save_worker.submit(SaveJob {
            store: self.store.clone(),
            signature: self.signature.clone(),
            record: live.to_record(),
            globals: live.global_records(),
        });
    }

    pub fn switch(&mut self, switch: DisplaySwitch) -> Result<(), ApplyError> {
        if self.engine.switch(switch) {
            self.signals
                .push(Signal::ConfigChanged(self.engine.snapshot()));
            self.sync_settings();
            self.collect_engine_signals();
            self.apply()?;
        }
        self.collect_engine_signals();
        Ok(())
    }

    pub fn brightness_visible(&self, output: &str) -> bool {
        self.engine
            .live()
            .output(output)
            .is_some_and(|o| self.brightness.is_visible(o))
    }

    /// Explicit brightness change, the latest request per output wins.
    pub fn set_brightness(&mut self, output: &str, value: u8) {
        let Some(output) = self.engine.live().output(output).cloned() else {
            warn!(output, "Brightness change for unknown output");
            return;
        };
        if !self.brightness.is_visible(&output) {
            self.signals.push(Signal::Warning(format!(
                "{} has no brightness control",
                output.name()
            )));
            return;
        }
        self.brightness_worker.submit(BrightnessJob {
            controller: self.brightness.clone(),
            output,
            request: BrightnessRequest::Set(value.min(100)),
        });
    }

    pub fn set_night_mode(&mut self, night_mode: bool) {
        if self.engine.set_night_mode(night_mode) {
            self.settings.night_mode = night_mode;
            self.write_setting(|store| store.set_bool(keys::NIGHT_MODE, night_mode));
            self.signals.push(Signal::NightModeChanged(night_mode));
        }
    }

    pub fn set_night_light(&mut self, config: NightLightConfig) {
        let temperature = config.temperature;
        let config = config.with_temperature(temperature);
        if self.settings.night_light != config {
            self.settings.night_light = config.clone();
            self.write_setting(|store| store.set_night_light(&config));
            self.signals.push(Signal::NightLightChanged(config));
        }
    }

    pub fn set_dark_theme(&mut self, dark_theme: bool) {
        if self.engine.set_dark_theme(dark_theme) {
            self.settings.dark_theme = dark_theme;
            self.write_setting(|store| store.set_bool(keys::DARK_THEME, dark_theme));
            self.signals.push(Signal::ThemeChanged(dark_theme));
        }
    }

    pub fn scale_step(&self) -> u32 {
        slider::SCALE.to_slider(self.settings.scale)
    }

    /// Sets the scale of every enabled output from a slider position.
    pub fn set_scale_step(&mut self, step: u32) {
        let scale = slider::SCALE.to_value(step);
        let enabled = self
            .engine
            .live()
            .enabled()
            .map(|o| o.name().to_owned())
            .collect::<Vec<_>>();
        for output in enabled {
            self.router
                .push(OutputEvent::ScaleChanged { output, scale });
        }
        if self.settings.scale != scale {
            self.settings.scale = scale;
            self.write_setting(|store| store.set_f64(keys::SCALE, scale));
            self.signals.push(Signal::ScaleChanged(scale));
        }
    }

    /// A key changed in the settings store, possibly written by someone else.
    pub fn settings_changed(&mut self, key: &str) {
        let store = self.settings_store.as_ref();
        match key {
            keys::UNIFY_OUTPUTS => {
                if let Ok(unify) = read_setting(store.get_bool(key), key) {
                    if unify != self.settings.unify_outputs {
                        self.settings.unify_outputs = unify;
                        self.router.push(OutputEvent::UnifyToggled(unify));
                    }
                }
            }
            keys::NIGHT_MODE => {
                if let Ok(night_mode) = read_setting(store.get_bool(key), key) {
                    self.set_night_mode(night_mode);
                }
            }
            keys::DARK_THEME => {
                if let Ok(dark_theme) = read_setting(store.get_bool(key), key) {
                    self.set_dark_theme(dark_theme);
                }
            }
            keys::SCALE => {
                if let Ok(scale) = read_setting(store.get_f64(key), key) {
                    if scale != self.settings.scale {
                        self.settings.scale = scale;
                        self.signals.push(Signal::ScaleChanged(scale));
                    }
                }
            }
            keys::NIGHT_LIGHT => {
                if let Ok(config) = read_setting(store.night_light(), key) {
                    self.set_night_light(config);
                }
            }
            _ => debug!(key, "Ignoring unknown settings key"),
        }
    }

    fn apply_live(&mut self) {
        let live = self.engine.snapshot();
        if live.enabled().next().is_none() {
            return;
        }
        match self.backend.apply_config(&live) {
            Ok(()) => self.applied = Some(live),
            Err(err) => {
                warn!(?err, "Failed to apply output configuration");
                self.signals.push(Signal::Warning(err.to_string()));
            }
        }
    }

    /// Runs a full reconciliation against the stored record when the set of
    /// connected outputs changed. Returns whether it did.
    fn check_signature(&mut self) -> bool {
        let signature = self.engine.live().signature();
        if signature == self.signature {
            return false;
        }
        info!(%signature, "Output arrangement changed");
        self.signature = signature;

        let record = self.load_record();
        let mut detected = self.engine.snapshot();
        let globals = self
            .store
            .load_globals(detected.connected().map(|o| &o.info));
        // outputs plugged in since the last tick start from their global record
        for output in detected
            .outputs
            .iter_mut()
            .filter(|o| o.connected && !self.connected.contains(o.name()))
        {
            if let Some(global) = globals.iter().find(|g| g.info == output.info) {
                apply_global(output, global);
            }
        }
        self.engine.reconcile(detected, record, &globals);
        self.apply_live();
        self.signals
            .push(Signal::ConfigChanged(self.engine.snapshot()));
        true
    }

    /// Record of the current arrangement. Unreadable records are reported
    /// and treated as missing.
    fn load_record(&mut self) -> Option<PersistedRecord> {
        match self.store.load(&self.signature) {
            Ok(record) => record,
            Err(err) => {
                warn!(?err, signature = %self.signature, "Ignoring output record");
                self.signals.push(Signal::Warning(err.to_string()));
                None
            }
        }
    }

    /// Reads or restores the brightness of outputs that were not connected
    /// at the last call.
    fn request_brightness(&mut self) {
        let live = self.engine.live();
        let new = live
            .connected()
            .filter(|o| !self.connected.contains(o.name()))
            .filter(|o| self.brightness.is_visible(o))
            .cloned()
            .collect::<Vec<_>>();
        self.connected = live.connected().map(|o| o.name().to_owned()).collect();

        for output in new {
            let request = match output.brightness {
                Some(value) => BrightnessRequest::Set(value),
                None => BrightnessRequest::Read,
            };
            self.brightness_worker.submit(BrightnessJob {
                controller: self.brightness.clone(),
                output,
                request,
            });
        }
    }

    /// A failed write keeps the last known value, a failed read clears it.
    fn brightness_done(&mut self, result: BrightnessResult) {
        let brightness = match result.result {
            Ok(Some(brightness)) => Some(brightness),
            Ok(None) => {
                self.signals.push(Signal::Warning(format!(
                    "Brightness of {} is not available",
                    result.output
                )));
                None
            }
            Err(err) => {
                warn!(?err, output = %result.output, "Failed to set brightness");
                self.signals.push(Signal::Warning(format!(
                    "Failed to set brightness of {}: {}",
                    result.output, err
                )));
                return;
            }
        };
        if self.engine.on_brightness_changed(&result.output, brightness) {
            self.signals.push(Signal::BrightnessChanged {
                output: result.output,
                brightness,
            });
        }
    }

    fn save_done(&mut self, result: SaveResult) {
        match result.result {
            Ok(()) => {
                info!(signature = %result.signature, "Saved output configuration");
                if result.signature == self.signature {
                    self.engine.mark_persisted(result.record);
                }
                self.signals.push(Signal::Saved(result.signature));
            }
            Err(err) => {
                warn!(?err, "Failed to save output configuration");
                self.signals.push(Signal::Warning(err.to_string()));
            }
        }
    }

    /// Writes the clone flag back when events changed it.
    fn sync_settings(&mut self) {
        let unify = self.engine.live().unify_outputs;
        if unify != self.settings.unify_outputs {
            self.settings.unify_outputs = unify;
            self.write_setting(|store| store.set_bool(keys::UNIFY_OUTPUTS, unify));
        }
    }

    fn write_setting(
        &mut self,
        f: impl FnOnce(&dyn SystemSettingsStore) -> Result<(), SettingsError>,
    ) {
        if let Err(err) = f(self.settings_store.as_ref()) {
            warn!(?err, "Failed to write setting");
            self.signals.push(Signal::Warning(err.to_string()));
        }
    }

    fn collect_engine_signals(&mut self) {
        for signal in self.engine.take_signals() {
            match signal {
                EngineSignal::Changed | EngineSignal::MatchesPersisted => {
                    let dirty = signal == EngineSignal::Changed;
                    if self.dirty != Some(dirty) {
                        self.dirty = Some(dirty);
                        self.signals.push(Signal::Dirty(dirty));
                    }
                }
                EngineSignal::Conflict(conflict) => self.signals.push(Signal::Conflict(conflict)),
            }
        }
    }
}

fn read_setting<T>(value: Result<T, SettingsError>, key: &str) -> Result<T, SettingsError> {
    value.inspect_err(|err| warn!(?err, "Failed to read setting '{}'", key))
}
