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

//! Fans: tach inputs, PWM outputs and dead-fan detection.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use fscd_error::{FscError, Result};

use crate::system::{find_util_entry, CommandRunner};

/// Source of a fan's tachometer reading in RPM.
pub trait TachSource: Send {
    fn read_rpm(&mut self) -> Result<f64>;

    fn describe(&self) -> String;
}

/// Destination for a fan's PWM duty cycle, in percent.
pub trait ActuatorSink: Send {
    fn write_pwm(&mut self, pwm: f64) -> Result<()>;

    /// Read back the duty cycle currently applied, in percent.
    fn read_pwm(&mut self) -> Result<f64>;

    fn describe(&self) -> String;
}

/// Tach value taken from vendor utility output, e.g. `Fan 0 Speed: 3000 RPM`.
#[derive(Debug, Clone)]
pub struct UtilTachSource {
    command: String,
    key: String,
    runner: CommandRunner,
}

impl UtilTachSource {
    pub fn new(command: impl Into<String>, key: impl Into<String>, runner: CommandRunner) -> Self {
        Self { command: command.into(), key: key.into(), runner }
    }
}

impl TachSource for UtilTachSource {
    fn read_rpm(&mut self) -> Result<f64> {
        let out = self.runner.run(&self.command)?;
        find_util_entry(&out.stdout, &self.key)
            .and_then(|entry| entry.value)
            .ok_or_else(|| FscError::FanRead {
                name: self.key.clone(),
                reason: "no numeric value in utility output".to_string(),
            })
    }

    fn describe(&self) -> String {
        format!("util `{}` key {}", self.command, self.key)
    }
}

/// PWM written by running a command template.
///
/// `{fan}` expands to the fan number and `{pwm}` to the rounded duty cycle.
#[derive(Debug, Clone)]
pub struct UtilPwmSink {
    template: String,
    fan: u32,
    runner: CommandRunner,
    last_written: Option<f64>,
}

impl UtilPwmSink {
    pub fn new(template: impl Into<String>, fan: u32, runner: CommandRunner) -> Self {
        Self { template: template.into(), fan, runner, last_written: None }
    }

    pub fn render(&self, pwm: f64) -> String {
        self.template
            .replace("{fan}", &self.fan.to_string())
            .replace("{pwm}", &format!("{}", pwm.round() as i64))
    }
}

impl ActuatorSink for UtilPwmSink {
    fn write_pwm(&mut self, pwm: f64) -> Result<()> {
        let cmd = self.render(pwm);
        self.runner.run_checked(&cmd).map_err(|e| FscError::PwmWrite {
            target: cmd.clone(),
            reason: e.to_string(),
        })?;
        self.last_written = Some(pwm.round());
        Ok(())
    }

    /// Utilities offer no generic read-back; the last written value is reported.
    fn read_pwm(&mut self) -> Result<f64> {
        self.last_written
            .ok_or_else(|| FscError::NotSupported(format!("read-back for {}", self.template)))
    }

    fn describe(&self) -> String {
        format!("util `{}`", self.template)
    }
}

/// One physical fan.
pub struct Fan {
    id: u32,
    label: String,
    tach: Box<dyn TachSource>,
    sink: Option<Box<dyn ActuatorSink>>,
    last_pwm: Option<f64>,
}

impl std::fmt::Debug for Fan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fan")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("tach", &self.tach.describe())
            .field("sink", &self.sink.as_ref().map(|s| s.describe()))
            .field("last_pwm", &self.last_pwm)
            .finish()
    }
}

impl Fan {
    pub fn new(id: u32, tach: Box<dyn TachSource>) -> Self {
        Self {
            id,
            label: format!("Fan {}", id),
            tach,
            sink: None,
            last_pwm: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn ActuatorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the fan has a PWM output to write.
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn last_pwm(&self) -> Option<f64> {
        self.last_pwm
    }

    /// Read the tach, logging instead of failing.
    pub fn read_rpm(&mut self) -> Option<f64> {
        match self.tach.read_rpm() {
            Ok(rpm) => {
                debug!(fan = self.id, rpm, "fan tach read");
                Some(rpm)
            }
            Err(e) => {
                warn!(fan = self.id, label = %self.label, error = %e, "fan tach read failed");
                None
            }
        }
    }

    /// Write `pwm` (percent) to the fan's sink.
    pub fn set_pwm(&mut self, pwm: f64) -> Result<()> {
        let pwm = pwm.clamp(0.0, 100.0);
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| FscError::NotSupported(format!("{} has no PWM output", self.label)))?;
        sink.write_pwm(pwm)?;
        self.last_pwm = Some(pwm);
        Ok(())
    }
}

/// Change in a fan's health reported by [`DeadFanTracker::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanTransition {
    Died,
    Recovered,
}

/// Tracks which fans are dead across cycles.
///
/// A fan becomes dead once its tach has been below `min_rpm` (or unreadable)
/// for `dead_cycles` consecutive observations, and recovers on the first
/// observation at or above `min_rpm`. Each transition is reported once.
#[derive(Debug, Clone)]
pub struct DeadFanTracker {
    min_rpm: f64,
    dead_cycles: u32,
    low_counts: BTreeMap<u32, u32>,
    dead: BTreeSet<u32>,
}

impl DeadFanTracker {
    pub fn new(min_rpm: f64, dead_cycles: u32) -> Self {
        Self {
            min_rpm,
            dead_cycles: dead_cycles.max(1),
            low_counts: BTreeMap::new(),
            dead: BTreeSet::new(),
        }
    }

    pub fn observe(&mut self, fan: u32, rpm: Option<f64>) -> Option<FanTransition> {
        let healthy = matches!(rpm, Some(r) if r >= self.min_rpm);

        if healthy {
            self.low_counts.remove(&fan);
            return self.dead.remove(&fan).then_some(FanTransition::Recovered);
        }

        let count = self.low_counts.entry(fan).or_insert(0);
        *count = count.saturating_add(1);
        if *count >= self.dead_cycles && self.dead.insert(fan) {
            return Some(FanTransition::Died);
        }
        None
    }

    pub fn is_dead(&self, fan: u32) -> bool {
        self.dead.contains(&fan)
    }

    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    pub fn dead_fans(&self) -> Vec<u32> {
        self.dead.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{FakeTach, MemorySink};

    #[test]
    fn test_dead_after_consecutive_cycles_reported_once() {
        let mut tracker = DeadFanTracker::new(500.0, 3);
        assert_eq!(tracker.observe(0, Some(0.0)), None);
        assert_eq!(tracker.observe(0, Some(0.0)), None);
        assert_eq!(tracker.observe(0, Some(0.0)), Some(FanTransition::Died));
        for _ in 0..10 {
            assert_eq!(tracker.observe(0, Some(0.0)), None);
        }
        assert!(tracker.is_dead(0));
        assert_eq!(tracker.dead_fans(), vec![0]);
    }

    #[test]
    fn test_low_streak_resets_on_good_reading() {
        let mut tracker = DeadFanTracker::new(500.0, 2);
        tracker.observe(1, Some(100.0));
        tracker.observe(1, Some(3000.0));
        assert_eq!(tracker.observe(1, Some(100.0)), None);
        assert_eq!(tracker.dead_count(), 0);
    }

    #[test]
    fn test_unreadable_tach_counts_as_low() {
        let mut tracker = DeadFanTracker::new(500.0, 1);
        assert_eq!(tracker.observe(2, None), Some(FanTransition::Died));
    }

    #[test]
    fn test_recovery_reported_once() {
        let mut tracker = DeadFanTracker::new(500.0, 1);
        tracker.observe(0, Some(0.0));
        assert_eq!(tracker.observe(0, Some(4000.0)), Some(FanTransition::Recovered));
        assert_eq!(tracker.observe(0, Some(4000.0)), None);
        assert!(!tracker.is_dead(0));
    }

    #[test]
    fn test_fan_set_pwm_clamps_and_records() {
        let sink = MemorySink::new();
        let mut fan = Fan::new(3, Box::new(FakeTach::constant(2500.0))).with_sink(Box::new(sink.clone()));
        assert_eq!(fan.label(), "Fan 3");
        fan.set_pwm(130.0).unwrap();
        assert_eq!(fan.last_pwm(), Some(100.0));
        assert_eq!(sink.written(), vec![100.0]);
        assert_eq!(fan.read_rpm(), Some(2500.0));
    }

    #[test]
    fn test_fan_without_sink_rejects_write() {
        let mut fan = Fan::new(0, Box::new(FakeTach::constant(0.0))).with_label("Rear Fan");
        assert!(!fan.has_sink());
        let err = fan.set_pwm(50.0).unwrap_err();
        assert!(err.to_string().contains("Rear Fan"));
    }

    #[test]
    fn test_util_sink_renders_template() {
        let sink = UtilPwmSink::new("fan-util --set {pwm} {fan}", 2, CommandRunner::default());
        assert_eq!(sink.render(59.6), "fan-util --set 60 2");
    }

    #[test]
    fn test_util_sink_write_and_read_back() {
        let mut sink = UtilPwmSink::new("true {fan} {pwm}", 1, CommandRunner::default());
        assert!(sink.read_pwm().is_err());
        sink.write_pwm(42.0).unwrap();
        assert_eq!(sink.read_pwm().unwrap(), 42.0);

        let mut failing = UtilPwmSink::new("false", 1, CommandRunner::default());
        assert!(matches!(failing.write_pwm(42.0), Err(FscError::PwmWrite { .. })));
    }

    #[test]
    fn test_util_tach_source() {
        let mut tach = UtilTachSource::new("echo 'Fan 0 Speed: 3120 RPM (30%)'", "Fan 0 Speed", CommandRunner::default());
        assert_eq!(tach.read_rpm().unwrap(), 3120.0);
    }
}
