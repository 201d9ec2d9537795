// SPDX-License-Identifier: GPL-3.0-only

use cosmic_display_config::output::OutputInfo;
use parking_lot::Mutex;
use std::{collections::HashSet, fmt, io, sync::Arc, thread, time::Duration};
use tracing::{debug, warn};

use crate::output::Output;

pub mod backlight;
pub mod ddc;

pub use self::backlight::Backlight;
pub use self::ddc::Ddcutil;

const RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Device is busy")]
    Busy,
    #[error("Brightness control is not supported by {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("Failed to parse device response: {0}")]
    Parse(String),
}

/// A way to read and write the brightness of an output, as a percentage.
pub trait BrightnessBackend: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn get(&self, output: &OutputInfo) -> Result<u8, HardwareError>;
    fn set(&self, output: &OutputInfo, percent: u8) -> Result<(), HardwareError>;
}

/// Routes brightness requests to the backlight device for the internal
/// panel and to DDC/CI for everything else.
#[derive(Debug, Default)]
pub struct BrightnessController {
    backlight: Option<Arc<dyn BrightnessBackend>>,
    ddc: Option<Arc<dyn BrightnessBackend>>,
    /// Outputs whose last request failed. Only an explicit set retries them.
    failed: Mutex<HashSet<OutputInfo>>,
}

impl BrightnessController {
    pub fn new(
        backlight: Option<Arc<dyn BrightnessBackend>>,
        ddc: Option<Arc<dyn BrightnessBackend>>,
    ) -> BrightnessController {
        BrightnessController {
            backlight,
            ddc,
            failed: Mutex::new(HashSet::new()),
        }
    }

    /// Probes the system for a backlight device and the `ddcutil` tool.
    pub fn detect() -> BrightnessController {
        let backlight = Backlight::detect().map(|b| Arc::new(b) as Arc<dyn BrightnessBackend>);
        let ddc = Ddcutil::detect().map(|d| Arc::new(d) as Arc<dyn BrightnessBackend>);
        debug!(
            backlight = backlight.is_some(),
            ddc = ddc.is_some(),
            "Brightness backends"
        );
        BrightnessController::new(backlight, ddc)
    }

    fn backend(&self, output: &Output) -> Option<&Arc<dyn BrightnessBackend>> {
        if output.internal {
            self.backlight.as_ref()
        } else {
            self.ddc.as_ref()
        }
    }

    /// Whether the output has a backend able to control its brightness.
    pub fn is_visible(&self, output: &Output) -> bool {
        output.connected && self.backend(output).is_some()
    }

    pub fn has_failed(&self, output: &Output) -> bool {
        self.failed.lock().contains(&output.info)
    }

    /// Current brightness, `None` without a backend or after a failure.
    pub fn get_brightness(&self, output: &Output) -> Option<u8> {
        let backend = self.backend(output)?;
        if self.has_failed(output) {
            return None;
        }
        match with_retry(|| backend.get(&output.info)) {
            Ok(value) => Some(value.min(100)),
            Err(err) => {
                warn!(
                    ?err,
                    output = output.name(),
                    backend = backend.name(),
                    "Failed to read brightness"
                );
                self.failed.lock().insert(output.info.clone());
                None
            }
        }
    }

    /// Explicit user request, retries outputs that failed before.
    pub fn set_brightness(&self, output: &Output, value: u8) -> Result<(), HardwareError> {
        let backend = self
            .backend(output)
            .ok_or_else(|| HardwareError::Unsupported(output.name().to_string()))?;
        self.failed.lock().remove(&output.info);

        let value = value.min(100);
        with_retry(|| backend.set(&output.info, value)).inspect_err(|err| {
            warn!(
                ?err,
                output = output.name(),
                backend = backend.name(),
                "Failed to set brightness"
            );
            self.failed.lock().insert(output.info.clone());
        })
    }
}

/// Busy devices get a single second attempt, other errors none.
fn with_retry<T>(mut f: impl FnMut() -> Result<T, HardwareError>) -> Result<T, HardwareError> {
    match f() {
        Err(HardwareError::Busy) => {
            debug!("Device busy, retrying once");
            thread::sleep(RETRY_DELAY);
            f()
        }
        res => res,
    }
}
