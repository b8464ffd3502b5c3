/*
 * This file is part of fscd.
 *
 * Copyright (C) 2025 fscd contributors
 *
 * fscd is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation; version 2 of the License.
 *
 * fscd is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 */

//! sysfs (hwmon) backed sensors, tachs and PWM outputs.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use fscd_error::{FscError, Result};

use crate::fan::{ActuatorSink, TachSource};
use crate::sensor::{SensorReading, SensorSource};

/// Default divisor for hwmon temperature files (millidegrees).
pub const DEFAULT_TEMP_SCALE: f64 = 1000.0;

/// Default full-scale duty register value; 100 means the file holds percent.
pub const DEFAULT_MAX_DUTY_REGISTER: u32 = 100;

fn read_trimmed<P: AsRef<Path>>(p: P) -> Result<String> {
    let path = p.as_ref();
    let mut s = String::new();
    fs::File::open(path)
        .and_then(|mut f| f.read_to_string(&mut s))
        .map_err(|source| FscError::FileRead { path: path.to_path_buf(), source })?;
    Ok(s.trim().to_string())
}

fn read_number<P: AsRef<Path>>(p: P) -> Result<f64> {
    let path = p.as_ref();
    let text = read_trimmed(path)?;
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FscError::parse(path.display().to_string(), format!("not a number: {:?}", text)))
}

/// Temperature read from a sysfs file and divided by `scale`.
#[derive(Debug, Clone)]
pub struct SysfsSensorSource {
    path: PathBuf,
    scale: f64,
}

impl SysfsSensorSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), scale: DEFAULT_TEMP_SCALE }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

impl SensorSource for SysfsSensorSource {
    fn read(&mut self) -> Result<SensorReading> {
        let raw = read_number(&self.path)?;
        Ok(SensorReading::ok(raw / self.scale))
    }

    fn describe(&self) -> String {
        format!("sysfs {}", self.path.display())
    }
}

/// Fan speed read from a `fanN_input` style file.
#[derive(Debug, Clone)]
pub struct SysfsTach {
    path: PathBuf,
}

impl SysfsTach {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TachSource for SysfsTach {
    fn read_rpm(&mut self) -> Result<f64> {
        read_number(&self.path).map_err(|e| FscError::FanRead {
            name: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn describe(&self) -> String {
        format!("sysfs {}", self.path.display())
    }
}

/// PWM output backed by a sysfs duty-cycle file.
///
/// The file holds a raw register value in `0..=max_duty_register`. When a
/// sibling `<name>_enable` file exists it is switched to manual mode (1)
/// before the first write.
#[derive(Debug, Clone)]
pub struct SysfsPwm {
    path: PathBuf,
    max_duty_register: u32,
    manual_forced: bool,
}

impl SysfsPwm {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_duty_register: DEFAULT_MAX_DUTY_REGISTER,
            manual_forced: false,
        }
    }

    pub fn with_max_duty_register(mut self, max: u32) -> Self {
        self.max_duty_register = max.max(1);
        self
    }

    fn enable_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push("_enable");
        PathBuf::from(name)
    }

    /// Raw register value for a duty cycle in percent.
    pub fn to_register(&self, pwm: f64) -> u32 {
        let max = f64::from(self.max_duty_register);
        (pwm.clamp(0.0, 100.0) * max / 100.0).round() as u32
    }

    /// Duty cycle in percent for a raw register value.
    pub fn from_register(&self, raw: f64) -> f64 {
        (raw * 100.0 / f64::from(self.max_duty_register)).round().clamp(0.0, 100.0)
    }
}

impl ActuatorSink for SysfsPwm {
    fn write_pwm(&mut self, pwm: f64) -> Result<()> {
        if !self.manual_forced {
            let enable = self.enable_path();
            if enable.exists() {
                fs::write(&enable, "1").map_err(|source| FscError::FileWrite { path: enable.clone(), source })?;
            }
            self.manual_forced = true;
        }

        let raw = self.to_register(pwm);
        fs::write(&self.path, raw.to_string()).map_err(|e| FscError::PwmWrite {
            target: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %self.path.display(), pwm, raw, "pwm written");
        Ok(())
    }

    fn read_pwm(&mut self) -> Result<f64> {
        let raw = read_number(&self.path).map_err(|e| FscError::PwmRead {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(self.from_register(raw))
    }

    fn describe(&self) -> String {
        format!("sysfs {}", self.path.display())
    }
}
