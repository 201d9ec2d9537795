// SPDX-License-Identifier: GPL-3.0-only

use cosmic_display_config::output::OutputInfo;
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use super::{BrightnessBackend, HardwareError};
use crate::utils::slider::SliderMap;

const SYSFS_BACKLIGHT: &str = "/sys/class/backlight";
/// Device types in order of preference.
const DEVICE_TYPES: &[&str] = &["firmware", "platform", "raw"];

enum Writer {
    Sysfs,
    #[cfg(feature = "systemd")]
    Logind(crate::dbus::login1_session::Login1SessionProxyBlocking<'static>),
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Writer::Sysfs => f.write_str("Sysfs"),
            #[cfg(feature = "systemd")]
            Writer::Logind(_) => f.write_str("Logind"),
        }
    }
}

/// The backlight device of the internal panel.
///
/// Reads go through sysfs. Writes need root for sysfs, so with systemd
/// they are sent to the logind session instead.
#[derive(Debug)]
pub struct Backlight {
    device: PathBuf,
    name: String,
    max: u32,
    writer: Writer,
}

impl Backlight {
    pub fn detect() -> Option<Backlight> {
        let mut backlight = Backlight::detect_in(Path::new(SYSFS_BACKLIGHT))?;
        #[cfg(feature = "systemd")]
        match logind_session() {
            Ok(proxy) => backlight.writer = Writer::Logind(proxy),
            Err(err) => warn!(?err, "Failed to reach logind, writing backlight through sysfs"),
        }
        info!(device = backlight.name, max = backlight.max, "Using backlight device");
        Some(backlight)
    }

    /// Picks the preferred device below a `/sys/class/backlight` like directory.
    pub fn detect_in(root: &Path) -> Option<Backlight> {
        let mut devices = match fs::read_dir(root) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect::<Vec<_>>(),
            Err(err) => {
                debug!(?err, "No backlight devices");
                return None;
            }
        };
        devices.sort();
        devices.sort_by_key(|device| {
            let kind = fs::read_to_string(device.join("type")).unwrap_or_default();
            DEVICE_TYPES
                .iter()
                .position(|t| *t == kind.trim())
                .unwrap_or(DEVICE_TYPES.len())
        });

        devices.into_iter().find_map(|device| {
            let max = read_value(&device.join("max_brightness")).ok()?;
            if max == 0 {
                return None;
            }
            let name = device.file_name()?.to_string_lossy().into_owned();
            Some(Backlight {
                device,
                name,
                max,
                writer: Writer::Sysfs,
            })
        })
    }

    fn map(&self) -> SliderMap {
        SliderMap::percent_of(self.max as f64)
    }
}

impl BrightnessBackend for Backlight {
    fn name(&self) -> &'static str {
        "backlight"
    }

    fn get(&self, _output: &OutputInfo) -> Result<u8, HardwareError> {
        let raw = read_value(&self.device.join("actual_brightness"))
            .or_else(|_| read_value(&self.device.join("brightness")))?;
        Ok(self.map().to_slider(raw.min(self.max) as f64) as u8)
    }

    fn set(&self, _output: &OutputInfo, percent: u8) -> Result<(), HardwareError> {
        let raw = self.map().to_value(percent as u32).round() as u32;
        match &self.writer {
            Writer::Sysfs => fs::write(self.device.join("brightness"), raw.to_string())
                .map_err(|err| match err.kind() {
                    io::ErrorKind::ResourceBusy => HardwareError::Busy,
                    _ => HardwareError::Io(err),
                }),
            #[cfg(feature = "systemd")]
            Writer::Logind(proxy) => proxy
                .set_brightness("backlight", &self.name, raw)
                .map_err(|err| HardwareError::Io(io::Error::other(err))),
        }
    }
}

#[cfg(feature = "systemd")]
fn logind_session(
) -> zbus::Result<crate::dbus::login1_session::Login1SessionProxyBlocking<'static>> {
    let conn = zbus::blocking::Connection::system()?;
    crate::dbus::login1_session::Login1SessionProxyBlocking::new(&conn)
}

fn read_value(path: &Path) -> Result<u32, HardwareError> {
    let content = fs::read_to_string(path)?;
    content
        .trim()
        .parse()
        .map_err(|_| HardwareError::Parse(format!("{}: {:?}", path.display(), content.trim())))
}
