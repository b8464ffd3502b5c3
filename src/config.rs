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

//! The JSON configuration document and the runtime objects built from it.
//!
//! The document is loaded once at startup; every error here is fatal.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use fscd_error::{FscError, Result};

use crate::board::BoardHooks;
use crate::curves::ProfileSpec;
use crate::fan::{Fan, TachSource, UtilPwmSink, UtilTachSource};
use crate::hwmon::{SysfsPwm, SysfsSensorSource, SysfsTach, DEFAULT_MAX_DUTY_REGISTER, DEFAULT_TEMP_SCALE};
use crate::sensor::{AlarmLimit, HostAction, ReadLimit, Sensor, SensorOffset, SensorSource, UtilSensorSource};
use crate::system::CommandRunner;
use crate::zone::{AggregationPolicy, Zone, ZoneInput};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fsc-config.json";

/// Longest accepted `fan_recovery_time`, in seconds.
pub const MAX_FAN_RECOVERY_TIME_S: f64 = 86_400.0;

fn default_sample_interval_ms() -> u64 { 3000 }
fn default_ramp_rate() -> f64 { 10.0 }
fn default_fan_dead_cycles() -> u32 { 1 }
fn default_command_timeout_ms() -> u64 { 5000 }
fn default_max_duty_register() -> u32 { DEFAULT_MAX_DUTY_REGISTER }

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoostConfig {
    /// Boost zones while any fan is dead
    #[serde(default)]
    pub fan_fail: bool,
    /// Boost a zone while one of its sensors fails to read
    #[serde(default)]
    pub sensor_fail: bool,
    /// Scale the fan-fail boost with the number of dead fans
    #[serde(default)]
    pub progressive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FanDeadBoost {
    /// Cycles with every fan dead before `action` runs; 0 disables it
    #[serde(default)]
    pub threshold: u32,
    #[serde(default)]
    pub action: Option<HostAction>,
    /// Progressive rows `[max dead fans, pwm added per dead fan]`
    #[serde(default)]
    pub data: Vec<(usize, f64)>,
}

/// Minimum PWM once several fans are dead (non-progressive boost only).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiFanFail {
    /// Rows `[dead fan count, pwm]`; every row with count <= dead applies
    #[serde(default)]
    pub data: Vec<(usize, f64)>,
    /// `[action, dead fan count]`
    #[serde(default)]
    pub host_action: Option<(HostAction, usize)>,
}

/// Where to read a value from. Exactly one of `sysfs` or `util` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default)]
    pub sysfs: Option<PathBuf>,
    #[serde(default)]
    pub util: Option<String>,
    /// Key selected from utility output
    #[serde(default)]
    pub key: Option<String>,
    /// Divisor applied to sysfs values
    #[serde(default)]
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteConfig {
    #[serde(default)]
    pub sysfs: Option<PathBuf>,
    /// Command template with `{fan}` and `{pwm}` placeholders
    #[serde(default)]
    pub util: Option<String>,
    #[serde(default = "default_max_duty_register")]
    pub max_duty_register: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    pub read_source: SourceConfig,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub offset_table: Vec<(f64, f64)>,
    #[serde(default)]
    pub read_limit: Option<ReadLimit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FanConfig {
    #[serde(default)]
    pub label: Option<String>,
    pub read_source: SourceConfig,
    #[serde(default)]
    pub write_source: Option<WriteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneInputConfig {
    pub sensor: String,
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub pwm_output: Vec<u32>,
    #[serde(default)]
    pub policy: AggregationPolicy,
    pub inputs: Vec<ZoneInputConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FscConfig {
    #[serde(default)]
    pub version: Option<String>,
    pub pwm_transition_value: f64,
    pub pwm_boost_value: f64,
    /// Written instead of the boost value when a failed sensor boosts a zone
    #[serde(default)]
    pub pwm_sensor_boost_value: Option<f64>,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default)]
    pub min_rpm: f64,
    /// Largest PWM change per cycle; 0 disables ramping
    #[serde(default = "default_ramp_rate")]
    pub ramp_rate: f64,
    #[serde(default = "default_fan_dead_cycles")]
    pub fan_dead_cycles: u32,
    #[serde(default)]
    pub fan_limit_upper_pwm: Option<f64>,
    #[serde(default)]
    pub fan_limit_lower_pwm: Option<f64>,
    /// Ceiling applied while no fan is dead
    #[serde(default)]
    pub non_fanfail_limited_boost: Option<f64>,
    #[serde(default)]
    pub boost: BoostConfig,
    #[serde(default)]
    pub fan_dead_boost: Option<FanDeadBoost>,
    #[serde(default)]
    pub multi_fan_fail: Option<MultiFanFail>,
    /// Boost every zone while any sensor is in alarm
    #[serde(default)]
    pub enable_fsc_sensor_check: bool,
    #[serde(default)]
    pub output_max_boost_pwm: bool,
    #[serde(default)]
    pub chassis_intrusion: bool,
    #[serde(default)]
    pub fanpower: bool,
    /// Seconds to hold off after fan power returns
    #[serde(default)]
    pub fan_recovery_time: Option<f64>,
    #[serde(default)]
    pub watchdog: bool,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default)]
    pub record_dir: Option<PathBuf>,
    #[serde(default)]
    pub board: BoardHooks,
    pub sensors: BTreeMap<String, SensorConfig>,
    pub profiles: BTreeMap<String, ProfileSpec>,
    pub fans: BTreeMap<String, FanConfig>,
    pub zones: BTreeMap<String, ZoneConfig>,
}

fn check_pwm(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(FscError::invalid_config(field, format!("{} is outside 0..100", value)));
    }
    Ok(())
}

fn check_alarm(field: &str, alarm: &AlarmLimit) -> Result<()> {
    if !alarm.limit.is_finite() {
        return Err(FscError::invalid_config(field, "limit must be finite"));
    }
    if alarm.soak_time_s.is_some_and(|t| !t.is_finite() || t < 0.0) {
        return Err(FscError::invalid_config(field, "soak_time_s must be a non-negative number"));
    }
    if alarm.hysteresis.is_some_and(|h| !h.is_finite()) {
        return Err(FscError::invalid_config(field, "hysteresis must be finite"));
    }
    Ok(())
}

fn check_source(field: &str, sysfs: bool, util: bool) -> Result<()> {
    match (sysfs, util) {
        (true, false) | (false, true) => Ok(()),
        (false, false) => Err(FscError::invalid_config(field, "one of `sysfs` or `util` is required")),
        (true, true) => Err(FscError::invalid_config(field, "`sysfs` and `util` are mutually exclusive")),
    }
}

impl FscConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: FscConfig = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn command_runner(&self) -> CommandRunner {
        CommandRunner::new(Duration::from_millis(self.command_timeout_ms))
    }

    pub fn validate(&self) -> Result<()> {
        check_pwm("pwm_transition_value", self.pwm_transition_value)?;
        check_pwm("pwm_boost_value", self.pwm_boost_value)?;
        if let Some(v) = self.pwm_sensor_boost_value {
            check_pwm("pwm_sensor_boost_value", v)?;
        }
        if let Some(v) = self.fan_limit_upper_pwm {
            check_pwm("fan_limit_upper_pwm", v)?;
        }
        if let Some(v) = self.fan_limit_lower_pwm {
            check_pwm("fan_limit_lower_pwm", v)?;
        }
        if let (Some(lo), Some(hi)) = (self.fan_limit_lower_pwm, self.fan_limit_upper_pwm) {
            if lo > hi {
                return Err(FscError::invalid_config("fan_limit_lower_pwm", "greater than fan_limit_upper_pwm"));
            }
        }
        if let Some(v) = self.non_fanfail_limited_boost {
            check_pwm("non_fanfail_limited_boost", v)?;
        }
        if self.sample_interval_ms == 0 {
            return Err(FscError::invalid_config("sample_interval_ms", "must be positive"));
        }
        if self.command_timeout_ms == 0 {
            return Err(FscError::invalid_config("command_timeout_ms", "must be positive"));
        }
        if !self.ramp_rate.is_finite() || self.ramp_rate < 0.0 {
            return Err(FscError::invalid_config("ramp_rate", "must be a non-negative number"));
        }
        if !self.min_rpm.is_finite() || self.min_rpm < 0.0 {
            return Err(FscError::invalid_config("min_rpm", "must be a non-negative number"));
        }
        if self.fan_dead_cycles == 0 {
            return Err(FscError::invalid_config("fan_dead_cycles", "must be at least 1"));
        }
        if let Some(t) = self.fan_recovery_time {
            if !t.is_finite() || t < 0.0 {
                return Err(FscError::invalid_config("fan_recovery_time", "must be a non-negative number"));
            }
            if t > MAX_FAN_RECOVERY_TIME_S {
                return Err(FscError::invalid_config(
                    "fan_recovery_time",
                    format!("{} exceeds {} seconds", t, MAX_FAN_RECOVERY_TIME_S),
                ));
            }
        }
        if self.boost.progressive {
            let rows = self.fan_dead_boost.as_ref().map(|b| b.data.len()).unwrap_or(0);
            if rows == 0 {
                return Err(FscError::invalid_config("boost.progressive", "requires fan_dead_boost.data rows"));
            }
        }
        if let Some(fdb) = &self.fan_dead_boost {
            if fdb.data.iter().any(|(_, rate)| !rate.is_finite()) {
                return Err(FscError::invalid_config("fan_dead_boost.data", "rates must be finite"));
            }
        }
        if let Some(mff) = &self.multi_fan_fail {
            for (count, pwm) in &mff.data {
                check_pwm("multi_fan_fail.data", *pwm)?;
                if *count < 2 {
                    return Err(FscError::invalid_config("multi_fan_fail.data", "fan counts start at 2"));
                }
            }
            if mff.host_action.is_some_and(|(_, count)| count < 2) {
                return Err(FscError::invalid_config("multi_fan_fail.host_action", "fan count must be at least 2"));
            }
        }

        for (name, sensor) in &self.sensors {
            let field = format!("sensors.{}", name);
            let src = &sensor.read_source;
            check_source(&format!("{}.read_source", field), src.sysfs.is_some(), src.util.is_some())?;
            if let Some(scale) = src.scale {
                if !scale.is_finite() || scale == 0.0 {
                    return Err(FscError::invalid_config(format!("{}.read_source.scale", field), "must be a non-zero number"));
                }
            }
            if !sensor.offset.is_finite() || sensor.offset_table.iter().any(|(t, o)| !t.is_finite() || !o.is_finite()) {
                return Err(FscError::invalid_config(field, "offsets must be finite"));
            }
            if let Some(limit) = &sensor.read_limit {
                if let Some(major) = &limit.alarm_major {
                    check_alarm(&format!("{}.read_limit.alarm_major", field), major)?;
                }
                if let Some(minor) = &limit.alarm_minor {
                    check_alarm(&format!("{}.read_limit.alarm_minor", field), minor)?;
                }
            }
        }

        for (name, profile) in &self.profiles {
            profile.validate(name)?;
        }

        if self.fans.is_empty() {
            return Err(FscError::MissingConfig("fans".to_string()));
        }
        for (key, fan) in &self.fans {
            let field = format!("fans.{}", key);
            key.parse::<u32>()
                .map_err(|_| FscError::invalid_config(&field, "fan keys must be non-negative integers"))?;
            let src = &fan.read_source;
            check_source(&format!("{}.read_source", field), src.sysfs.is_some(), src.util.is_some())?;
            if let Some(w) = &fan.write_source {
                check_source(&format!("{}.write_source", field), w.sysfs.is_some(), w.util.is_some())?;
                if w.max_duty_register == 0 {
                    return Err(FscError::invalid_config(format!("{}.write_source.max_duty_register", field), "must be positive"));
                }
            }
        }

        if self.zones.is_empty() {
            return Err(FscError::MissingConfig("zones".to_string()));
        }
        for (name, zone) in &self.zones {
            let field = format!("zones.{}", name);
            if zone.pwm_output.is_empty() {
                return Err(FscError::invalid_config(format!("{}.pwm_output", field), "no fans listed"));
            }
            for id in &zone.pwm_output {
                if !self.fans.contains_key(&id.to_string()) {
                    return Err(FscError::invalid_config(format!("{}.pwm_output", field), format!("unknown fan {}", id)));
                }
            }
            if zone.inputs.is_empty() {
                return Err(FscError::invalid_config(format!("{}.inputs", field), "no inputs listed"));
            }
            for input in &zone.inputs {
                if !self.sensors.contains_key(&input.sensor) {
                    return Err(FscError::invalid_config(format!("{}.inputs", field), format!("unknown sensor {}", input.sensor)));
                }
                if !self.profiles.contains_key(&input.profile) {
                    return Err(FscError::invalid_config(format!("{}.inputs", field), format!("unknown profile {}", input.profile)));
                }
            }
        }
        Ok(())
    }

    pub fn build_sensors(&self, runner: CommandRunner) -> Result<BTreeMap<String, Sensor>> {
        let mut sensors = BTreeMap::new();
        for (name, cfg) in &self.sensors {
            let src = &cfg.read_source;
            let source: Box<dyn SensorSource> = match (&src.sysfs, &src.util) {
                (Some(path), _) => Box::new(
                    SysfsSensorSource::new(path).with_scale(src.scale.unwrap_or(DEFAULT_TEMP_SCALE)),
                ),
                (None, Some(cmd)) => Box::new(UtilSensorSource::new(
                    cmd.clone(),
                    src.key.clone().unwrap_or_else(|| name.clone()),
                    runner,
                )),
                (None, None) => {
                    return Err(FscError::invalid_config(format!("sensors.{}.read_source", name), "no source"));
                }
            };
            let sensor = Sensor::new(name.clone(), source)
                .with_offset(SensorOffset { fixed: cfg.offset, table: cfg.offset_table.clone() })
                .with_read_limit(cfg.read_limit.clone().unwrap_or_default());
            sensors.insert(name.clone(), sensor);
        }
        Ok(sensors)
    }

    pub fn build_fans(&self, runner: CommandRunner) -> Result<Vec<Fan>> {
        let mut fans = Vec::with_capacity(self.fans.len());
        for (key, cfg) in &self.fans {
            let id: u32 = key
                .parse()
                .map_err(|_| FscError::invalid_config(format!("fans.{}", key), "fan keys must be non-negative integers"))?;
            let src = &cfg.read_source;
            let tach: Box<dyn TachSource> = match (&src.sysfs, &src.util) {
                (Some(path), _) => Box::new(SysfsTach::new(path)),
                (None, Some(cmd)) => Box::new(UtilTachSource::new(
                    cmd.clone(),
                    src.key.clone().unwrap_or_else(|| format!("Fan {} Speed", id)),
                    runner,
                )),
                (None, None) => {
                    return Err(FscError::invalid_config(format!("fans.{}.read_source", key), "no source"));
                }
            };
            let mut fan = Fan::new(id, tach);
            if let Some(label) = &cfg.label {
                fan = fan.with_label(label.clone());
            }
            if let Some(w) = &cfg.write_source {
                fan = match (&w.sysfs, &w.util) {
                    (Some(path), _) => fan.with_sink(Box::new(SysfsPwm::new(path).with_max_duty_register(w.max_duty_register))),
                    (None, Some(t)) => fan.with_sink(Box::new(UtilPwmSink::new(t.clone(), id, runner))),
                    (None, None) => fan,
                };
            }
            fans.push(fan);
        }
        fans.sort_by_key(|f| f.id());
        Ok(fans)
    }

    /// Build zones; each input gets its own controller instance.
    pub fn build_zones(&self) -> Result<Vec<Zone>> {
        let mut zones = Vec::with_capacity(self.zones.len());
        for (name, cfg) in &self.zones {
            let mut zone = Zone::new(name.clone(), cfg.pwm_output.clone(), self.pwm_transition_value, self.pwm_boost_value)
                .with_policy(cfg.policy)
                .with_sensor_fail_boost(self.boost.sensor_fail);
            for input in &cfg.inputs {
                let spec = self.profiles.get(&input.profile).ok_or_else(|| {
                    FscError::invalid_config(format!("zones.{}.inputs", name), format!("unknown profile {}", input.profile))
                })?;
                zone = zone.with_input(ZoneInput::new(input.sensor.clone(), spec.build()));
            }
            zones.push(zone);
        }
        Ok(zones)
    }
}

/// Read, parse and validate the configuration at `path`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<FscConfig> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| FscError::FileRead { path: path.to_path_buf(), source })?;
    let cfg = FscConfig::from_json(&text)?;
    info!(
        path = %path.display(),
        sensors = cfg.sensors.len(),
        profiles = cfg.profiles.len(),
        fans = cfg.fans.len(),
        zones = cfg.zones.len(),
        "configuration loaded"
    );
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::{create_temp_json_file, minimal_config_json};

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = FscConfig::from_json(&minimal_config_json("/sys/fake")).unwrap();
        assert_eq!(cfg.pwm_transition_value, 70.0);
        assert_eq!(cfg.ramp_rate, 10.0);
        assert_eq!(cfg.fan_dead_cycles, 1);
        assert_eq!(cfg.command_timeout_ms, 5000);
        assert_eq!(cfg.sample_interval(), Duration::from_millis(3000));
        assert_eq!(cfg.zones["zone_1"].policy, AggregationPolicy::Max);
        assert!(!cfg.boost.fan_fail);
    }

    #[test]
    fn test_load_from_file() {
        let value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        let file = create_temp_json_file(&value);
        let cfg = load(file.path()).unwrap();
        assert_eq!(cfg.fans.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load("/nonexistent/fsc-config.json").unwrap_err();
        assert!(matches!(err, FscError::FileRead { .. }));
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["pwm_turbo_value"] = serde_json::json!(100);
        let err = FscConfig::from_json(&value.to_string()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_rejects_malformed_profile_table() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["profiles"]["linear_inlet"]["data"] = serde_json::json!([[40, 60], [20, 20]]);
        let err = FscConfig::from_json(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("profiles.linear_inlet"));
    }

    #[test]
    fn test_rejects_unknown_zone_references() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["zones"]["zone_1"]["pwm_output"] = serde_json::json!([0, 7]);
        assert!(FscConfig::from_json(&value.to_string()).unwrap_err().to_string().contains("unknown fan 7"));

        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["zones"]["zone_1"]["inputs"][0]["sensor"] = serde_json::json!("nope");
        assert!(FscConfig::from_json(&value.to_string()).unwrap_err().to_string().contains("unknown sensor"));
    }

    #[test]
    fn test_rejects_ambiguous_source() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["sensors"]["inlet"]["read_source"]["util"] = serde_json::json!("sensor-util mb");
        let err = FscConfig::from_json(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["pwm_boost_value"] = serde_json::json!(140);
        assert!(FscConfig::from_json(&value.to_string()).is_err());

        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["fan_limit_lower_pwm"] = serde_json::json!(80);
        value["fan_limit_upper_pwm"] = serde_json::json!(60);
        assert!(FscConfig::from_json(&value.to_string()).is_err());

        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["boost"] = serde_json::json!({"fan_fail": true, "progressive": true});
        assert!(FscConfig::from_json(&value.to_string()).unwrap_err().to_string().contains("progressive"));
    }

    #[test]
    fn test_multi_fan_fail_and_sensor_check() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["enable_fsc_sensor_check"] = serde_json::json!(true);
        value["multi_fan_fail"] = serde_json::json!({
            "data": [[2, 80], [3, 100]],
            "host_action": ["shutdown", 3]
        });
        let cfg = FscConfig::from_json(&value.to_string()).unwrap();
        assert!(cfg.enable_fsc_sensor_check);
        let mff = cfg.multi_fan_fail.unwrap();
        assert_eq!(mff.data, vec![(2, 80.0), (3, 100.0)]);
        assert_eq!(mff.host_action, Some((HostAction::HostShutdown, 3)));

        value["multi_fan_fail"]["data"] = serde_json::json!([[2, 180]]);
        assert!(FscConfig::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn test_rejects_negative_soak_time() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        let sensor = value["sensors"].as_object().unwrap().keys().next().unwrap().clone();
        value["sensors"][&sensor]["read_limit"] = serde_json::json!({
            "alarm_minor": { "limit": 80, "soak_time_s": -1 }
        });
        let err = FscConfig::from_json(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("alarm_minor"));
    }

    #[test]
    fn test_rejects_huge_fan_recovery_time() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        value["fan_recovery_time"] = serde_json::json!(1e20);
        let err = FscConfig::from_json(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("fan_recovery_time"));

        value["fan_recovery_time"] = serde_json::json!(30);
        assert!(FscConfig::from_json(&value.to_string()).is_ok());
    }

    #[test]
    fn test_rejects_bad_fan_key() {
        let mut value: serde_json::Value = serde_json::from_str(&minimal_config_json("/sys/fake")).unwrap();
        let fan = value["fans"]["0"].clone();
        value["fans"]["front"] = fan;
        assert!(FscConfig::from_json(&value.to_string()).is_err());
    }

    #[test]
    fn test_build_runtime_objects() {
        let cfg = FscConfig::from_json(&minimal_config_json("/sys/fake")).unwrap();
        let sensors = cfg.build_sensors(cfg.command_runner()).unwrap();
        assert!(sensors.contains_key("inlet"));
        let fans = cfg.build_fans(cfg.command_runner()).unwrap();
        assert_eq!(fans.iter().map(|f| f.id()).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(fans[1].label(), "Fan 1");
        let zones = cfg.build_zones().unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].pwm_output(), &[0, 1]);
        assert_eq!(zones[0].last_pwm(), 70.0);
    }
}
