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

//! Marker files other platform tools read to learn the daemon's state.
//!
//! Layout under the record directory:
//!
//! ```text
//! fan_mode                   single digit, see FanMode::code
//! sensor_fail_boost          present while a failed sensor boosts a zone
//! fan_fail_boost             present while dead fans boost a zone
//! sensorfail_record/<name>   one file per failed sensor
//! fanfail_record/<label>     one file per dead fan
//! ```
//!
//! Failing to update a record never interrupts fan control.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use fscd_error::{FscError, Result};

use crate::zone::FanMode;

const SENSOR_FAIL_DIR: &str = "sensorfail_record";
const FAN_FAIL_DIR: &str = "fanfail_record";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFlag {
    SensorFailBoost,
    FanFailBoost,
}

impl RecordFlag {
    fn file_name(self) -> &'static str {
        match self {
            RecordFlag::SensorFailBoost => "sensor_fail_boost",
            RecordFlag::FanFailBoost => "fan_fail_boost",
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
        .collect()
}

fn set_marker(path: &Path, present: bool) -> io::Result<()> {
    if present {
        if !path.exists() {
            fs::write(path, b"")?;
        }
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Writer for the record directory; a no-op when no directory is configured.
#[derive(Debug, Clone, Default)]
pub struct Records {
    dir: Option<PathBuf>,
}

impl Records {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Create the record directory tree.
    pub fn init(&self) -> Result<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        for sub in [dir.clone(), dir.join(SENSOR_FAIL_DIR), dir.join(FAN_FAIL_DIR)] {
            fs::create_dir_all(&sub).map_err(|source| FscError::FileWrite { path: sub.clone(), source })?;
        }
        Ok(())
    }

    fn update(&self, path: PathBuf, present: bool) {
        if let Err(e) = set_marker(&path, present) {
            warn!(path = %path.display(), error = %e, "failed to update record");
        }
    }

    pub fn set_fan_mode(&self, mode: FanMode) {
        let Some(dir) = &self.dir else { return };
        let path = dir.join("fan_mode");
        let current = fs::read_to_string(&path).ok();
        let wanted = mode.code().to_string();
        if current.as_deref().map(str::trim) == Some(wanted.as_str()) {
            return;
        }
        if let Err(e) = fs::write(&path, &wanted) {
            warn!(path = %path.display(), error = %e, "failed to write fan mode record");
        }
    }

    /// Mode last written, `None` without a record directory or file.
    pub fn fan_mode(&self) -> Option<FanMode> {
        let dir = self.dir.as_ref()?;
        let text = fs::read_to_string(dir.join("fan_mode")).ok()?;
        text.trim().parse::<u8>().ok().and_then(FanMode::from_code)
    }

    pub fn set_flag(&self, flag: RecordFlag, present: bool) {
        if let Some(dir) = &self.dir {
            self.update(dir.join(flag.file_name()), present);
        }
    }

    pub fn set_sensor_failed(&self, sensor: &str, failed: bool) {
        if let Some(dir) = &self.dir {
            self.update(dir.join(SENSOR_FAIL_DIR).join(sanitize(sensor)), failed);
        }
    }

    pub fn set_fan_failed(&self, label: &str, failed: bool) {
        if let Some(dir) = &self.dir {
            self.update(dir.join(FAN_FAIL_DIR).join(sanitize(label)), failed);
        }
    }
}
