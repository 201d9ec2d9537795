// SPDX-License-Identifier: GPL-3.0-only

use cosmic_display_config::output::{
    GlobalOutputRecord, HardwareSignature, OutputConfig, OutputInfo, OutputState, PersistedRecord,
};

pub mod reconcile;
pub mod router;

pub use self::reconcile::{
    apply_global, reconcile, ConfigConflict, DisplaySwitch, EngineSignal, ReconciliationEngine,
};
pub use self::router::{ChangeNotificationRouter, EffectiveConfigChanged, OutputEvent};

/// Connector prefixes used by built-in panels.
const INTERNAL_CONNECTORS: &[&str] = &["eDP", "LVDS", "DSI"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Geometry {
        Geometry {
            x,
            y,
            width,
            height,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// The area covered in the global compositor space, which is the mode
    /// size divided by the output scale.
    pub fn logical(&self, scale: f64) -> Geometry {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        Geometry {
            x: self.x,
            y: self.y,
            width: (self.width as f64 / scale).round() as u32,
            height: (self.height as f64 / scale).round() as u32,
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width as i32)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height as i32)
    }

    pub fn intersects(&self, other: &Geometry) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub info: OutputInfo,
    pub enabled: bool,
    pub connected: bool,
    pub geometry: Geometry,
    /// Mode the hardware prefers, if reported.
    pub preferred_mode: Option<(u32, u32)>,
    pub scale: f64,
    pub primary: bool,
    /// 0..=100, `None` without a working brightness backend.
    pub brightness: Option<u8>,
    /// Connector of the output this one mirrors.
    pub mirroring: Option<String>,
    /// Built-in panel, brightness goes through the backlight device.
    pub internal: bool,
}

impl Output {
    pub fn new(info: OutputInfo, geometry: Geometry) -> Output {
        Output {
            info,
            enabled: true,
            connected: true,
            geometry,
            preferred_mode: None,
            scale: 1.0,
            primary: false,
            brightness: None,
            mirroring: None,
            internal: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.info.connector
    }

    pub fn has_internal_connector(&self) -> bool {
        INTERNAL_CONNECTORS
            .iter()
            .any(|prefix| self.info.connector.starts_with(prefix))
    }

    pub fn logical_geometry(&self) -> Geometry {
        self.geometry.logical(self.scale)
    }

    pub fn to_config(&self) -> OutputConfig {
        OutputConfig {
            mode: self.geometry.size(),
            position: self.geometry.position(),
            scale: self.scale,
            enabled: match (&self.mirroring, self.enabled) {
                (_, false) => OutputState::Disabled,
                (Some(source), true) => OutputState::Mirroring(source.clone()),
                (None, true) => OutputState::Enabled,
            },
            primary: self.primary,
            brightness: self.brightness,
        }
    }

    pub fn to_global(&self) -> GlobalOutputRecord {
        GlobalOutputRecord {
            info: self.info.clone(),
            scale: self.scale,
            brightness: self.brightness,
        }
    }
}

/// All known outputs plus the global display flags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSnapshot {
    pub outputs: Vec<Output>,
    /// Clone mode.
    pub unify_outputs: bool,
    pub night_mode: bool,
    pub dark_theme: bool,
    pub(crate) reconciled: bool,
}

impl ConfigSnapshot {
    pub fn new(outputs: Vec<Output>) -> ConfigSnapshot {
        ConfigSnapshot {
            outputs,
            ..Default::default()
        }
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name() == name)
    }

    pub fn output_mut(&mut self, name: &str) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|o| o.name() == name)
    }

    pub fn primary(&self) -> Option<&Output> {
        self.outputs.iter().find(|o| o.primary)
    }

    pub fn internal(&self) -> Option<&Output> {
        self.outputs.iter().find(|o| o.internal)
    }

    pub fn connected(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter().filter(|o| o.connected)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter().filter(|o| o.enabled)
    }

    pub fn signature(&self) -> HardwareSignature {
        HardwareSignature::from_outputs(self.connected().map(|o| &o.info))
    }

    /// Fields that get restored on the next start, connected outputs only.
    pub fn to_record(&self) -> PersistedRecord {
        PersistedRecord {
            outputs: self
                .connected()
                .map(|o| (o.info.clone(), o.to_config()))
                .collect(),
        }
    }

    pub fn global_records(&self) -> Vec<GlobalOutputRecord> {
        self.connected().map(Output::to_global).collect()
    }
}
