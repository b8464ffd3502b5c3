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

//! The control loop.
//!
//! [`Fscd`] owns every sensor, fan and zone plus the board callouts, and
//! runs one synchronous cycle per sample interval:
//!
//! 1. kick the watchdog, honour fan power state
//! 2. update dead fans
//! 3. read every sensor once and apply its safe guards
//! 4. evaluate each zone, apply fan-fail policy, limits and ramping
//! 5. write PWM and update records
//!
//! Nothing inside a cycle returns an error; faults are logged, recorded and
//! handed to the board callouts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use fscd_error::Result;

use crate::board::{BoardCallouts, FanAction};
use crate::config::FscConfig;
use crate::fan::{DeadFanTracker, Fan, FanTransition};
use crate::records::{RecordFlag, Records};
use crate::sensor::{Sensor, SensorSample};
use crate::zone::{FanMode, Zone};

/// Longest single sleep while waiting for the next cycle.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneReport {
    pub name: String,
    pub pwm: f64,
    pub mode: FanMode,
}

/// Outcome of one control cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub zones: Vec<ZoneReport>,
    pub dead_fans: Vec<u32>,
    /// Control was skipped because fan power is off
    pub skipped: bool,
}

pub struct Fscd {
    config: FscConfig,
    board: Box<dyn BoardCallouts>,
    sensors: BTreeMap<String, Sensor>,
    fans: Vec<Fan>,
    zones: Vec<Zone>,
    dead: DeadFanTracker,
    records: Records,
    all_dead_cycles: u32,
    all_dead_fired: bool,
    multi_fail_fired: bool,
    power_lost: bool,
    recovery_until: Option<Instant>,
}

impl Fscd {
    /// Build every runtime object from a validated configuration.
    pub fn from_config(config: FscConfig, board: Box<dyn BoardCallouts>) -> Result<Self> {
        let runner = config.command_runner();
        let sensors = config.build_sensors(runner)?;
        let fans = config.build_fans(runner)?;
        let zones = config.build_zones()?;
        Ok(Self::with_parts(config, board, sensors, fans, zones))
    }

    /// Assemble a daemon from pre-built parts.
    pub fn with_parts(
        config: FscConfig,
        board: Box<dyn BoardCallouts>,
        sensors: BTreeMap<String, Sensor>,
        fans: Vec<Fan>,
        zones: Vec<Zone>,
    ) -> Self {
        let dead = DeadFanTracker::new(config.min_rpm, config.fan_dead_cycles);
        let records = Records::new(config.record_dir.clone());
        Self {
            config,
            board,
            sensors,
            fans,
            zones,
            dead,
            records,
            all_dead_cycles: 0,
            all_dead_fired: false,
            multi_fail_fired: false,
            power_lost: false,
            recovery_until: None,
        }
    }

    pub fn config(&self) -> &FscConfig {
        &self.config
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn fans(&self) -> &[Fan] {
        &self.fans
    }

    fn write_all_fans(&mut self, pwm: f64) {
        for fan in self.fans.iter_mut().filter(|f| f.has_sink()) {
            if let Err(e) = fan.set_pwm(pwm) {
                error!(fan = fan.id(), label = %fan.label(), pwm, error = %e, "failed to set fan pwm");
            }
        }
    }

    /// Put every fan at the transitional value with a blue LED.
    pub fn startup(&mut self) -> Result<()> {
        self.records.init()?;
        let transitional = self.config.pwm_transition_value;
        info!(
            fans = self.fans.len(),
            zones = self.zones.len(),
            sensors = self.sensors.len(),
            pwm = transitional,
            "fscd starting"
        );
        self.write_all_fans(transitional);
        for fan in &self.fans {
            if !fan.has_sink() {
                warn!(fan = fan.id(), label = %fan.label(), "fan has no write_source, monitoring only");
            }
            self.board.fan_action(fan.id(), fan.label(), FanAction::LedBlue);
        }
        self.records.set_fan_mode(FanMode::Transitional);
        Ok(())
    }

    /// Return fans to the transitional value before exit.
    pub fn shutdown(&mut self) {
        let transitional = self.config.pwm_transition_value;
        warn!(pwm = transitional, "fscd stopping, fans set to transitional");
        self.write_all_fans(transitional);
    }

    fn update_dead_fans(&mut self, rearm: bool) {
        for fan in &mut self.fans {
            let rpm = fan.read_rpm();
            match self.dead.observe(fan.id(), rpm) {
                Some(FanTransition::Died) => {
                    error!(fan = fan.id(), label = %fan.label(), rpm = ?rpm, "fan dead");
                    self.board.fan_action(fan.id(), fan.label(), FanAction::Dead);
                    self.board.fan_action(fan.id(), fan.label(), FanAction::LedRed);
                    self.records.set_fan_failed(fan.label(), true);
                }
                Some(FanTransition::Recovered) => {
                    warn!(fan = fan.id(), label = %fan.label(), rpm = ?rpm, "fan recovered");
                    self.board.fan_action(fan.id(), fan.label(), FanAction::Recover);
                    self.board.fan_action(fan.id(), fan.label(), FanAction::LedBlue);
                    self.records.set_fan_failed(fan.label(), false);
                }
                None => {}
            }
        }

        if rearm && self.dead.dead_count() > 0 {
            error!(dead = ?self.dead.dead_fans(), "{} fans failed", self.dead.dead_count());
        }
    }

    fn check_all_fans_dead(&mut self) {
        let Some(fdb) = self.config.fan_dead_boost.clone() else { return };
        if self.fans.is_empty() || self.dead.dead_count() < self.fans.len() {
            self.all_dead_cycles = 0;
            self.all_dead_fired = false;
            return;
        }

        self.all_dead_cycles = self.all_dead_cycles.saturating_add(1);
        warn!(cycles = self.all_dead_cycles, "all fans failed");
        if let Some(action) = fdb.action {
            if fdb.threshold > 0 && self.all_dead_cycles >= fdb.threshold && !self.all_dead_fired {
                self.all_dead_fired = true;
                let cause = format!("All fans are bad for more than {} cycles", fdb.threshold);
                self.board.host_action(action, &cause);
            }
        }
    }

    fn check_multi_fan_fail(&mut self) {
        if self.config.boost.progressive {
            return;
        }
        let Some((action, count)) = self.config.multi_fan_fail.as_ref().and_then(|m| m.host_action) else { return };
        let dead = self.dead.dead_count();
        if dead < count {
            self.multi_fail_fired = false;
            return;
        }
        if !self.multi_fail_fired {
            self.multi_fail_fired = true;
            let cause = format!("Bad fan count exceeded threshold: {} of {} dead", dead, count);
            self.board.host_action(action, &cause);
        }
    }

    /// Read every sensor once. Also reports whether any sensor is in alarm.
    fn read_sensors(&mut self) -> (BTreeMap<String, SensorSample>, bool) {
        let mut samples = BTreeMap::new();
        let mut alarm = false;
        let now = Instant::now();
        for (name, sensor) in &mut self.sensors {
            let (sample, trip) = sensor.sample();
            if let Some(trip) = trip {
                self.board.host_action(trip.action, &trip.cause);
            }
            if self.config.enable_fsc_sensor_check {
                if let SensorSample::Fresh(reading) = sample {
                    let check = sensor.check_alarms(reading.value, now);
                    if let Some(trip) = check.trip {
                        self.board.host_action(trip.action, &trip.cause);
                    }
                    alarm |= check.violated;
                }
            }
            if self.config.boost.sensor_fail {
                self.records.set_sensor_failed(name, sample.is_failed());
            }
            samples.insert(name.clone(), sample);
        }
        (samples, alarm)
    }

    /// Highest `multi_fan_fail` row that applies to `dead` fans, if any.
    fn multi_fan_fail_policy(&self, dead: usize, pwm: f64, mode: FanMode) -> Option<(f64, FanMode)> {
        let mff = self.config.multi_fan_fail.as_ref()?;
        mff.data
            .iter()
            .filter(|(count, _)| dead >= *count)
            .fold(None, |acc, (_, row)| {
                let (pwm, mode) = acc.unwrap_or((pwm, mode));
                let pwm = pwm.max(*row);
                Some((pwm, if pwm == *row { FanMode::Boost } else { mode }))
            })
    }

    /// Apply dead-fan boost policy to a zone's output.
    fn fan_fail_policy(&self, pwm: f64, mode: FanMode) -> (f64, FanMode) {
        let dead = self.dead.dead_count();
        if !self.config.boost.fan_fail || dead == 0 {
            return (pwm, mode);
        }
        let boost = self.config.pwm_boost_value;

        if self.config.boost.progressive {
            let rows = self.config.fan_dead_boost.as_ref().map(|b| b.data.as_slice()).unwrap_or(&[]);
            return match rows.iter().find(|(count, _)| dead <= *count) {
                Some((_, rate)) => ((pwm + dead as f64 * rate).clamp(0.0, 100.0), FanMode::Progressive),
                None => (boost, FanMode::Boost),
            };
        }

        if dead > 1 {
            if let Some(out) = self.multi_fan_fail_policy(dead, pwm, mode) {
                return out;
            }
        }

        if self.config.output_max_boost_pwm {
            (pwm.max(boost), FanMode::Boost)
        } else {
            (boost, FanMode::Boost)
        }
    }

    fn apply_limits(&self, mut pwm: f64) -> f64 {
        if let Some(hi) = self.config.fan_limit_upper_pwm {
            pwm = pwm.min(hi);
        }
        if let Some(lo) = self.config.fan_limit_lower_pwm {
            pwm = pwm.max(lo);
        }
        if let Some(cap) = self.config.non_fanfail_limited_boost {
            if self.dead.dead_count() == 0 {
                pwm = pwm.min(cap);
            }
        }
        pwm
    }

    /// Run one control cycle; `dt` is seconds since the previous one.
    pub fn cycle(&mut self, dt: f64) -> CycleReport {
        if self.config.watchdog {
            self.board.kick_watchdog();
        }

        if self.config.fanpower {
            if !self.board.fan_power_ok() {
                if !self.power_lost {
                    warn!("fan power is off, skipping fan control");
                }
                self.power_lost = true;
                return CycleReport { zones: Vec::new(), dead_fans: self.dead.dead_fans(), skipped: true };
            }
            if self.power_lost {
                self.power_lost = false;
                info!("fan power restored");
                if let Some(secs) = self.config.fan_recovery_time {
                    self.recovery_until = recovery_deadline(Instant::now(), secs);
                }
            }
        }

        let rearm = self.board.fan_rearm_requested();
        if rearm {
            info!("fan rearm requested");
            for zone in &mut self.zones {
                zone.clear_assertions();
            }
        }

        let recovering = self.recovery_until.is_some_and(|t| Instant::now() < t);
        if !recovering {
            self.recovery_until = None;
        }
        if self.config.boost.fan_fail && !recovering {
            self.update_dead_fans(rearm);
            self.check_all_fans_dead();
            self.check_multi_fan_fail();
        }

        let (samples, sensor_alarm) = self.read_sensors();
        let intrusion = self.config.chassis_intrusion && self.board.chassis_intrusion();
        if intrusion {
            warn!("chassis intrusion detected, boosting all zones");
        }
        if sensor_alarm {
            warn!("sensor alarm raised, boosting all zones");
        }

        let dead_count = self.dead.dead_count();
        let boost = self.config.pwm_boost_value;
        let mut report = CycleReport { zones: Vec::with_capacity(self.zones.len()), dead_fans: self.dead.dead_fans(), skipped: false };
        let mut sensor_fail_boost = false;

        let mut zones = std::mem::take(&mut self.zones);
        for zone in &mut zones {
            let (pwm, mode) = if intrusion || sensor_alarm {
                (boost, FanMode::Boost)
            } else {
                let out = zone.run(&samples, dt, dead_count);
                sensor_fail_boost |= out.sensor_fail_boost;
                let pwm = match self.config.pwm_sensor_boost_value {
                    Some(v) if out.sensor_fail_boost && out.mode == FanMode::Boost && out.pwm == boost => v,
                    _ => out.pwm,
                };
                (pwm, out.mode)
            };

            let (pwm, mode) = self.fan_fail_policy(pwm, mode);
            let pwm = zone.ramp(self.apply_limits(pwm), self.config.ramp_rate).clamp(0.0, 100.0);
            zone.set_last_pwm(pwm);

            for id in zone.pwm_output() {
                match self.fans.iter_mut().find(|f| f.id() == *id) {
                    Some(fan) if !fan.has_sink() => {}
                    Some(fan) => {
                        if let Err(e) = fan.set_pwm(pwm) {
                            error!(zone = %zone.name(), fan = *id, pwm, error = %e, "failed to set fan pwm");
                        }
                    }
                    None => warn!(zone = %zone.name(), fan = *id, "zone drives unknown fan"),
                }
            }

            info!(zone = %zone.name(), pwm, mode = ?mode, dead_fans = dead_count, "zone updated");
            report.zones.push(ZoneReport { name: zone.name().to_string(), pwm, mode });
        }
        self.zones = zones;

        self.records.set_flag(RecordFlag::SensorFailBoost, sensor_fail_boost);
        self.records.set_flag(RecordFlag::FanFailBoost, self.config.boost.fan_fail && dead_count > 0);
        if let Some(mode) = report.zones.iter().map(|z| z.mode).max_by_key(|m| m.code()) {
            self.records.set_fan_mode(mode);
        }

        report
    }

    /// Run cycles until `shutdown` is set, then restore transitional PWM.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.startup()?;
        let interval = self.config.sample_interval();
        let mut last = Instant::now();

        while sleep_unless_shutdown(shutdown, interval) {
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64();
            last = now;
            let report = self.cycle(dt);
            debug!(report = ?report, dt, "cycle complete");
        }

        self.shutdown();
        Ok(())
    }
}

/// Deadline `secs` after `now`, or `None` when it cannot be represented.
fn recovery_deadline(now: Instant, secs: f64) -> Option<Instant> {
    let deadline = Duration::try_from_secs_f64(secs).ok().and_then(|d| now.checked_add(d));
    if deadline.is_none() {
        warn!(fan_recovery_time = secs, "fan recovery time out of range, not holding off");
    }
    deadline
}

/// Sleep for `total`, waking early on shutdown. Returns false on shutdown.
fn sleep_unless_shutdown(shutdown: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
