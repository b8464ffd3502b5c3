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

//! Temperature sensors: read sources, offsets and per-sensor fault state.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fscd_error::{FscError, Result};

use crate::system::{find_util_entry, CommandRunner};

/// Status attached to a successful reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Ok,
    /// Reading is above the upper-critical threshold
    Ucr,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub value: f64,
    pub status: SensorStatus,
}

impl SensorReading {
    pub fn ok(value: f64) -> Self {
        Self { value, status: SensorStatus::Ok }
    }
}

/// Where a sensor value comes from.
pub trait SensorSource: Send {
    fn read(&mut self) -> Result<SensorReading>;

    /// Human readable description for logs.
    fn describe(&self) -> String;
}

/// Reads one key out of a vendor utility's `key : value` output.
#[derive(Debug, Clone)]
pub struct UtilSensorSource {
    command: String,
    key: String,
    runner: CommandRunner,
}

impl UtilSensorSource {
    pub fn new(command: impl Into<String>, key: impl Into<String>, runner: CommandRunner) -> Self {
        Self { command: command.into(), key: key.into(), runner }
    }
}

impl SensorSource for UtilSensorSource {
    fn read(&mut self) -> Result<SensorReading> {
        let out = self.runner.run(&self.command)?;
        let entry = find_util_entry(&out.stdout, &self.key)
            .ok_or_else(|| FscError::sensor_read(&self.key, "key not found in utility output"))?;

        match entry.status.as_deref() {
            Some("na") => return Err(FscError::SensorUnavailable(self.key.clone())),
            Some("ucr") => {
                let value = entry.value.ok_or_else(|| FscError::SensorUnavailable(self.key.clone()))?;
                return Ok(SensorReading { value, status: SensorStatus::Ucr });
            }
            _ => {}
        }

        entry
            .value
            .map(SensorReading::ok)
            .ok_or_else(|| FscError::SensorUnavailable(self.key.clone()))
    }

    fn describe(&self) -> String {
        format!("util `{}` key {}", self.command, self.key)
    }
}

/// Offset applied on top of the raw reading.
///
/// `table` rows are `(threshold, offset)`. The row with the highest threshold
/// not above the raw reading contributes its offset in addition to `fixed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorOffset {
    pub fixed: f64,
    pub table: Vec<(f64, f64)>,
}

impl SensorOffset {
    pub fn apply(&self, raw: f64) -> f64 {
        let table_offset = self
            .table
            .iter()
            .filter(|(threshold, _)| *threshold <= raw)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, off)| *off)
            .unwrap_or(0.0);
        raw + self.fixed + table_offset
    }
}

/// Host action attached to a sensor safe guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    #[serde(alias = "shutdown")]
    HostShutdown,
}

impl HostAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostAction::HostShutdown => "host_shutdown",
        }
    }
}

/// Fires `action` after `threshold` consecutive readings above `limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidLimit {
    pub limit: f64,
    #[serde(default = "default_limit_threshold")]
    pub threshold: u32,
    pub action: HostAction,
    /// Log the breach but never run the action
    #[serde(default)]
    pub fault_tolerant: bool,
}

/// Fires `action` after `threshold` consecutive failed reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvalidLimit {
    #[serde(default = "default_limit_threshold")]
    pub threshold: u32,
    pub action: HostAction,
}

fn default_limit_threshold() -> u32 { 1 }

/// Alarm threshold checked when sensor alarms are enabled.
///
/// A reading at or above `limit` raises the alarm. For minor alarms
/// `soak_time_s` keeps it raised for that long after the last violation,
/// and `hysteresis` extends the soak while the reading stays above
/// `limit - |hysteresis|`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlarmLimit {
    pub limit: f64,
    #[serde(default)]
    pub action: Option<HostAction>,
    #[serde(default)]
    pub soak_time_s: Option<f64>,
    #[serde(default)]
    pub hysteresis: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlarmLevel {
    Minor,
    Major,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadLimit {
    #[serde(default)]
    pub valid: Option<ValidLimit>,
    #[serde(default)]
    pub invalid: Option<InvalidLimit>,
    #[serde(default)]
    pub alarm_major: Option<AlarmLimit>,
    #[serde(default)]
    pub alarm_minor: Option<AlarmLimit>,
}

/// Outcome of [`Sensor::check_alarms`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmCheck {
    /// The sensor is in alarm and zones should boost
    pub violated: bool,
    pub trip: Option<GuardTrip>,
}

/// A safe guard that tripped during this read.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardTrip {
    pub action: HostAction,
    pub cause: String,
}

/// Result of one sensor read as seen by zones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorSample {
    /// Fresh reading with offsets applied
    Fresh(SensorReading),
    /// Read failed; the last good value is repeated
    Stale(f64),
    /// Read failed and nothing good was ever seen
    Missing,
}

impl SensorSample {
    pub fn value(&self) -> Option<f64> {
        match self {
            SensorSample::Fresh(r) => Some(r.value),
            SensorSample::Stale(v) => Some(*v),
            SensorSample::Missing => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        !matches!(self, SensorSample::Fresh(_))
    }

    pub fn is_ucr(&self) -> bool {
        matches!(self, SensorSample::Fresh(SensorReading { status: SensorStatus::Ucr, .. }))
    }
}

/// A configured sensor and its fault bookkeeping.
pub struct Sensor {
    name: String,
    source: Box<dyn SensorSource>,
    offset: SensorOffset,
    read_limit: ReadLimit,
    last_good: Option<f64>,
    fail_count: u32,
    over_limit_count: u32,
    valid_fired: bool,
    invalid_fired: bool,
    alarm_level: Option<AlarmLevel>,
    last_alarm: Option<Instant>,
    soak_repeats: u32,
    alarm_fired: bool,
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("source", &self.source.describe())
            .field("last_good", &self.last_good)
            .field("fail_count", &self.fail_count)
            .finish()
    }
}

impl Sensor {
    pub fn new(name: impl Into<String>, source: Box<dyn SensorSource>) -> Self {
        Self {
            name: name.into(),
            source,
            offset: SensorOffset::default(),
            read_limit: ReadLimit::default(),
            last_good: None,
            fail_count: 0,
            over_limit_count: 0,
            valid_fired: false,
            invalid_fired: false,
            alarm_level: None,
            last_alarm: None,
            soak_repeats: 0,
            alarm_fired: false,
        }
    }

    pub fn with_offset(mut self, offset: SensorOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_read_limit(mut self, read_limit: ReadLimit) -> Self {
        self.read_limit = read_limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_good(&self) -> Option<f64> {
        self.last_good
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn alarm_level(&self) -> Option<AlarmLevel> {
        self.alarm_level
    }

    /// Read the sensor once, never failing.
    ///
    /// Returns the sample zones should use plus any safe guard that tripped.
    /// Each guard trips at most once until its condition clears.
    pub fn sample(&mut self) -> (SensorSample, Option<GuardTrip>) {
        match self.source.read() {
            Ok(raw) => {
                let reading = SensorReading { value: self.offset.apply(raw.value), status: raw.status };
                if !reading.value.is_finite() {
                    return self.on_failure(FscError::sensor_read(&self.name, "non-finite reading"));
                }
                self.fail_count = 0;
                self.invalid_fired = false;
                self.last_good = Some(reading.value);
                debug!(sensor = %self.name, value = reading.value, status = ?reading.status, "sensor read");
                let trip = self.check_valid_limit(reading.value);
                (SensorSample::Fresh(reading), trip)
            }
            Err(e) => self.on_failure(e),
        }
    }

    fn on_failure(&mut self, err: FscError) -> (SensorSample, Option<GuardTrip>) {
        self.fail_count = self.fail_count.saturating_add(1);
        warn!(sensor = %self.name, failures = self.fail_count, error = %err, "sensor read failed");

        let mut trip = None;
        if let Some(invalid) = &self.read_limit.invalid {
            if self.fail_count >= invalid.threshold && !self.invalid_fired {
                self.invalid_fired = true;
                trip = Some(GuardTrip {
                    action: invalid.action,
                    cause: format!("{} unreadable for {} cycles", self.name, self.fail_count),
                });
            }
        }

        let sample = match self.last_good {
            Some(v) => SensorSample::Stale(v),
            None => SensorSample::Missing,
        };
        (sample, trip)
    }

    fn check_valid_limit(&mut self, value: f64) -> Option<GuardTrip> {
        let valid = self.read_limit.valid.as_ref()?;
        if value <= valid.limit {
            self.over_limit_count = 0;
            self.valid_fired = false;
            return None;
        }

        self.over_limit_count = self.over_limit_count.saturating_add(1);
        if self.over_limit_count < valid.threshold || self.valid_fired {
            return None;
        }
        self.valid_fired = true;
        if valid.fault_tolerant {
            info!(sensor = %self.name, value, limit = valid.limit, "limit reached, no action since fault_tolerant is set");
            return None;
        }
        Some(GuardTrip {
            action: valid.action,
            cause: format!("{} reading {} over limit {}", self.name, value, valid.limit),
        })
    }

    /// Check a fresh reading against `alarm_major` and `alarm_minor`.
    ///
    /// The alarm action runs once per episode; it rearms when the sensor
    /// leaves alarm.
    pub fn check_alarms(&mut self, value: f64, now: Instant) -> AlarmCheck {
        let (violated, action, cause) = self.evaluate_alarms(value, now);
        if !violated {
            self.alarm_fired = false;
            self.soak_repeats = 0;
            return AlarmCheck::default();
        }

        let trip = match action {
            Some(action) if !self.alarm_fired => {
                self.alarm_fired = true;
                Some(GuardTrip { action, cause })
            }
            _ => None,
        };
        AlarmCheck { violated, trip }
    }

    fn evaluate_alarms(&mut self, value: f64, now: Instant) -> (bool, Option<HostAction>, String) {
        if let Some(major) = &self.read_limit.alarm_major {
            if value >= major.limit {
                let cause = format!("{} reading {} reached major alarm limit {}", self.name, value, major.limit);
                warn!(sensor = %self.name, value, limit = major.limit, "major alarm");
                self.alarm_level = Some(AlarmLevel::Major);
                self.last_alarm = Some(now);
                return (true, major.action, cause);
            }
        }

        let Some(minor) = &self.read_limit.alarm_minor else {
            self.alarm_level = None;
            return (false, None, String::new());
        };

        if value >= minor.limit {
            let cause = format!("{} reading {} reached minor alarm limit {}", self.name, value, minor.limit);
            warn!(sensor = %self.name, value, limit = minor.limit, "minor alarm");
            self.alarm_level = self.alarm_level.or(Some(AlarmLevel::Minor));
            self.last_alarm = Some(now);
            return (true, minor.action, cause);
        }

        let soaking = match (minor.soak_time_s, self.alarm_level, self.last_alarm) {
            (Some(soak), Some(_), Some(last)) => Some((soak, now.saturating_duration_since(last))),
            _ => None,
        };
        let Some((soak, elapsed)) = soaking else {
            self.alarm_level = None;
            return (false, None, String::new());
        };

        if elapsed < Duration::try_from_secs_f64(soak).unwrap_or(Duration::MAX) {
            let cause = format!("{} in alarm soak ({:.0}s of {}s)", self.name, elapsed.as_secs_f64(), soak);
            debug!(sensor = %self.name, value, elapsed = elapsed.as_secs_f64(), soak, "alarm soaking");
            return (true, minor.action, cause);
        }

        if let Some(hyst) = minor.hysteresis {
            let target = minor.limit - hyst.abs();
            if value > target {
                self.last_alarm = Some(now);
                self.soak_repeats = self.soak_repeats.saturating_add(1);
                warn!(sensor = %self.name, value, target, repeats = self.soak_repeats, "alarm soak repeating");
                let cause = format!("{} reading {} above {} after soak", self.name, value, target);
                return (true, minor.action, cause);
            }
        }

        info!(sensor = %self.name, value, "alarm cleared");
        self.alarm_level = None;
        (false, None, String::new())
    }
}
