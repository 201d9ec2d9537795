// SPDX-License-Identifier: GPL-3.0-only

use cosmic_display_config::output::OutputInfo;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use std::{
    collections::HashMap,
    path::PathBuf,
    process::{Command, Stdio},
};
use tracing::{debug, trace};

use super::{BrightnessBackend, HardwareError};
use crate::utils::slider::SliderMap;

/// VCP feature code of the luminance control.
const VCP_BRIGHTNESS: &str = "0x10";
const UNKNOWN: &str = "Unknown";

lazy_static! {
    // VCP code 0x10 (Brightness): current value =    50, max value =   100
    static ref VCP_VALUE: Regex =
        Regex::new(r"current value\s*=\s*(\d+),\s*max value\s*=\s*(\d+)").expect("valid regex");
}

/// DDC/CI through the `ddcutil` command line tool.
#[derive(Debug)]
pub struct Ddcutil {
    program: PathBuf,
    /// Maximum raw value reported per monitor.
    max_values: Mutex<HashMap<OutputInfo, u32>>,
}

impl Ddcutil {
    pub fn new(program: impl Into<PathBuf>) -> Ddcutil {
        Ddcutil {
            program: program.into(),
            max_values: Mutex::new(HashMap::new()),
        }
    }

    pub fn detect() -> Option<Ddcutil> {
        let ddc = Ddcutil::new("ddcutil");
        match Command::new(&ddc.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => Some(ddc),
            Ok(status) => {
                debug!(code = ?status.code(), "ddcutil is not usable");
                None
            }
            Err(err) => {
                debug!(?err, "ddcutil not found");
                None
            }
        }
    }

    fn run(&self, args: &[String]) -> Result<String, HardwareError> {
        trace!(?args, "Running ddcutil");
        let out = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        if out.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&out.stderr);
            Err(classify_failure(
                &format!("ddcutil {}", args.join(" ")),
                &format!("{}{}", stderr.trim(), stdout.trim()),
            ))
        }
    }

    fn max_value(&self, output: &OutputInfo) -> u32 {
        self.max_values.lock().get(output).copied().unwrap_or(100)
    }
}

impl BrightnessBackend for Ddcutil {
    fn name(&self) -> &'static str {
        "ddc"
    }

    fn get(&self, output: &OutputInfo) -> Result<u8, HardwareError> {
        let mut args = vec!["getvcp".to_string(), VCP_BRIGHTNESS.to_string()];
        args.extend(selector(output)?);
        let (current, max) = parse_vcp(&self.run(&args)?)?;
        self.max_values.lock().insert(output.clone(), max);
        Ok(SliderMap::percent_of(max as f64).to_slider(current as f64) as u8)
    }

    fn set(&self, output: &OutputInfo, percent: u8) -> Result<(), HardwareError> {
        let raw = SliderMap::percent_of(self.max_value(output) as f64)
            .to_value(percent as u32)
            .round() as u32;
        let mut args = vec!["setvcp".to_string(), VCP_BRIGHTNESS.to_string(), raw.to_string()];
        args.extend(selector(output)?);
        self.run(&args).map(|_| ())
    }
}

/// Arguments addressing a monitor by its EDID identity.
fn selector(output: &OutputInfo) -> Result<Vec<String>, HardwareError> {
    if output.model.is_empty() || output.model == UNKNOWN {
        return Err(HardwareError::Unsupported(output.connector.clone()));
    }
    let mut args = vec!["--model".to_string(), output.model.clone()];
    // ddcutil only accepts the three letter PNP id here
    if output.make.len() == 3 && output.make.chars().all(|c| c.is_ascii_uppercase()) {
        args.push("--mfg".to_string());
        args.push(output.make.clone());
    }
    Ok(args)
}

fn parse_vcp(stdout: &str) -> Result<(u32, u32), HardwareError> {
    let caps = VCP_VALUE
        .captures(stdout)
        .ok_or_else(|| HardwareError::Parse(stdout.trim().to_string()))?;
    let current = caps[1]
        .parse::<u32>()
        .map_err(|_| HardwareError::Parse(caps[1].to_string()))?;
    let max = caps[2]
        .parse::<u32>()
        .map_err(|_| HardwareError::Parse(caps[2].to_string()))?;
    if max == 0 {
        return Err(HardwareError::Parse(stdout.trim().to_string()));
    }
    Ok((current.min(max), max))
}

fn classify_failure(command: &str, message: &str) -> HardwareError {
    let lower = message.to_lowercase();
    if lower.contains("busy") {
        HardwareError::Busy
    } else if lower.contains("unsupported") || lower.contains("display not found") {
        HardwareError::Unsupported(message.to_string())
    } else {
        HardwareError::Command {
            command: command.to_string(),
            stderr: message.to_string(),
        }
    }
}
