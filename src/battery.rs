//! Battery status from an INA219-style power monitor.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pack voltage read as empty.
pub const EMPTY_VOLTS: f64 = 6.0;
/// Voltage span from empty to full (8.4 V full).
pub const RANGE_VOLTS: f64 = 2.4;

/// Instantaneous readings in volts, amps and watts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub bus_voltage: f64,
    pub current: f64,
    pub power: f64,
}

pub trait PowerMonitor: Send + Sync {
    fn read(&self) -> Result<PowerReading>;
}

/// Battery state reported by `/get_battery.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    /// Estimated charge (0-100)
    pub percent: f64,
}

impl From<PowerReading> for BatteryStatus {
    fn from(reading: PowerReading) -> Self {
        Self {
            voltage: reading.bus_voltage,
            current: reading.current,
            power: reading.power,
            percent: charge_percent(reading.bus_voltage),
        }
    }
}

/// Linear charge estimate calibrated for the 2S pack of the UPS board.
pub fn charge_percent(bus_voltage: f64) -> f64 {
    ((bus_voltage - EMPTY_VOLTS) / RANGE_VOLTS * 100.0).clamp(0.0, 100.0)
}

/// Reads an `ina2xx` hwmon directory, e.g. `/sys/class/hwmon/hwmon0`.
pub struct HwmonPowerMonitor {
    dir: PathBuf,
}

impl HwmonPowerMonitor {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_attr(&self, name: &str) -> Result<f64> {
        let path = self.dir.join(name);
        read_number(&path)
    }
}

fn read_number(path: &Path) -> Result<f64> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Power(format!("cannot read {}: {}", path.display(), e)))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| Error::Power(format!("bad value in {}: {}", path.display(), e)))
}

impl PowerMonitor for HwmonPowerMonitor {
    fn read(&self) -> Result<PowerReading> {
        // hwmon units: millivolts, milliamps, microwatts
        Ok(PowerReading {
            bus_voltage: self.read_attr("in1_input")? / 1_000.0,
            current: self.read_attr("curr1_input")? / 1_000.0,
            power: self.read_attr("power1_input")? / 1_000_000.0,
        })
    }
}
