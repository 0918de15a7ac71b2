//! Over-temperature pacing.
//!
//! The governor is consulted once per full-frame capture. While the CPU is at or
//! above the throttle threshold it sleeps and re-samples; the loop is simply
//! held back until the device cools down.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ThermalSettings;

pub const DEFAULT_SYSFS_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Reading used by the `stub` source when no temperature is given.
const STUB_CELSIUS: f32 = 45.0;

pub trait TemperatureSource: Send {
    fn name(&self) -> &str;

    fn read_celsius(&mut self) -> f32;
}

/// Linux sysfs thermal zone, reported in millidegrees Celsius.
pub struct SysfsTemperature {
    path: PathBuf,
    name: String,
    last_good: f32,
}

impl SysfsTemperature {
    /// Fails when the file cannot be read or parsed at startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let initial = read_millidegrees(&path)
            .with_context(|| format!("thermal source {} is unreadable", path.display()))?;
        Ok(Self {
            name: path.display().to_string(),
            path,
            last_good: initial,
        })
    }
}

impl TemperatureSource for SysfsTemperature {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_celsius(&mut self) -> f32 {
        match read_millidegrees(&self.path) {
            Ok(celsius) => {
                self.last_good = celsius;
                celsius
            }
            Err(e) => {
                log::warn!(
                    "thermal read from {} failed ({:#}); reusing {:.1}C",
                    self.path.display(),
                    e,
                    self.last_good
                );
                self.last_good
            }
        }
    }
}

fn read_millidegrees(path: &Path) -> Result<f32> {
    let raw = std::fs::read_to_string(path)?;
    let milli: i64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("unexpected thermal reading '{}'", raw.trim()))?;
    Ok(milli as f32 / 1000.0)
}

/// Plays back a fixed sequence of readings, then repeats the last one.
pub struct ScriptedTemperature {
    readings: Vec<f32>,
    next: usize,
}

impl ScriptedTemperature {
    pub fn new(readings: Vec<f32>) -> Self {
        Self { readings, next: 0 }
    }

    pub fn fixed(celsius: f32) -> Self {
        Self::new(vec![celsius])
    }
}

impl TemperatureSource for ScriptedTemperature {
    fn name(&self) -> &str {
        "scripted"
    }

    fn read_celsius(&mut self) -> f32 {
        let Some(&last) = self.readings.last() else {
            return STUB_CELSIUS;
        };
        let reading = self.readings.get(self.next).copied().unwrap_or(last);
        if self.next < self.readings.len() {
            self.next += 1;
        }
        reading
    }
}

/// Build the source named by `thermal.source`: `stub`, `stub:<celsius>`,
/// `sysfs` (the first thermal zone) or an explicit sysfs path.
pub fn open_temperature_source(source: &str) -> Result<Box<dyn TemperatureSource>> {
    let source = match source.trim() {
        "sysfs" => DEFAULT_SYSFS_THERMAL_ZONE,
        other => other,
    };
    if source == "stub" {
        return Ok(Box::new(ScriptedTemperature::fixed(STUB_CELSIUS)));
    }
    if let Some(value) = source.strip_prefix("stub:") {
        let celsius: f32 = value
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid stub temperature '{}'", value))?;
        return Ok(Box::new(ScriptedTemperature::fixed(celsius)));
    }
    Ok(Box::new(SysfsTemperature::open(source)?))
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ThermalStatus {
    pub celsius: f32,
    pub throttling: bool,
    pub throttle_sleeps: u64,
}

/// Shared read-only view of the governor's latest status.
#[derive(Clone, Default)]
pub struct ThermalMonitor {
    inner: Arc<Mutex<ThermalStatus>>,
}

impl ThermalMonitor {
    pub fn snapshot(&self) -> ThermalStatus {
        match self.inner.lock() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ThermalStatus)) {
        match self.inner.lock() {
            Ok(mut status) => f(&mut *status),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }
}

type Sleeper = Box<dyn FnMut(Duration) + Send>;

pub struct ThermalGovernor {
    source: Box<dyn TemperatureSource>,
    threshold_celsius: f32,
    sleep_interval: Duration,
    sleeper: Sleeper,
    monitor: ThermalMonitor,
}

impl ThermalGovernor {
    pub fn new(
        source: Box<dyn TemperatureSource>,
        threshold_celsius: f32,
        sleep_interval: Duration,
    ) -> Self {
        Self {
            source,
            threshold_celsius,
            sleep_interval,
            sleeper: Box::new(std::thread::sleep),
            monitor: ThermalMonitor::default(),
        }
    }

    pub fn from_settings(settings: &ThermalSettings) -> Result<Self> {
        let source = open_temperature_source(&settings.source)?;
        log::info!(
            "thermal source {} (throttle at {:.1}C, sleep {:?})",
            source.name(),
            settings.throttle_celsius,
            settings.throttle_sleep
        );
        Ok(Self::new(
            source,
            settings.throttle_celsius,
            settings.throttle_sleep,
        ))
    }

    /// Replace the blocking sleep, e.g. to count sleeps in tests.
    pub fn with_sleeper(mut self, sleeper: impl FnMut(Duration) + Send + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn monitor(&self) -> ThermalMonitor {
        self.monitor.clone()
    }

    /// Block until the reading drops below the threshold; returns the final reading.
    pub fn check(&mut self) -> f32 {
        let mut celsius = self.source.read_celsius();
        while celsius >= self.threshold_celsius {
            self.monitor.update(|status| {
                status.celsius = celsius;
                status.throttling = true;
                status.throttle_sleeps += 1;
            });
            log::warn!(
                "over-temperature throttling at {:.1}C (limit {:.1}C), sleeping {:?}",
                celsius,
                self.threshold_celsius,
                self.sleep_interval
            );
            (self.sleeper)(self.sleep_interval);
            celsius = self.source.read_celsius();
        }
        self.monitor.update(|status| {
            status.celsius = celsius;
            status.throttling = false;
        });
        celsius
    }
}
