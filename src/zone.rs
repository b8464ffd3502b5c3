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

//! Zones: groups of sensor/controller inputs driving a set of fans.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::curves::{ControlContext, Controller};
use crate::sensor::SensorSample;

/// Consecutive misses before a missing sensor is asserted.
const MISSING_SENSOR_RETRIES: u32 = 2;

/// How the outputs of a zone's inputs are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPolicy {
    #[default]
    Max,
    Average,
}

impl AggregationPolicy {
    /// Combine `values`, or `None` when nothing contributed.
    pub fn aggregate(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            AggregationPolicy::Max => values.iter().copied().reduce(f64::max),
            AggregationPolicy::Average => Some(values.iter().sum::<f64>() / values.len() as f64),
        }
    }
}

/// Operating mode reported per zone. The numeric codes are what the
/// `fan_mode` record file holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanMode {
    #[default]
    Normal,
    Transitional,
    Boost,
    Progressive,
}

impl FanMode {
    pub fn code(self) -> u8 {
        match self {
            FanMode::Normal => 0,
            FanMode::Transitional => 1,
            FanMode::Boost => 2,
            FanMode::Progressive => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FanMode::Normal),
            1 => Some(FanMode::Transitional),
            2 => Some(FanMode::Boost),
            3 => Some(FanMode::Progressive),
            _ => None,
        }
    }
}

/// One sensor feeding one controller.
#[derive(Debug, Clone)]
pub struct ZoneInput {
    sensor: String,
    controller: Controller,
    missing_count: u32,
    missing_asserted: bool,
}

impl ZoneInput {
    pub fn new(sensor: impl Into<String>, controller: Controller) -> Self {
        Self {
            sensor: sensor.into(),
            controller,
            missing_count: 0,
            missing_asserted: false,
        }
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    pub fn missing_asserted(&self) -> bool {
        self.missing_asserted
    }
}

/// Result of evaluating a zone for one cycle, before fan-fail policy,
/// limits and ramping are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneOutput {
    pub pwm: f64,
    pub mode: FanMode,
    /// A failed sensor pushed this zone to the boost value
    pub sensor_fail_boost: bool,
}

#[derive(Debug, Clone)]
pub struct Zone {
    name: String,
    pwm_output: Vec<u32>,
    inputs: Vec<ZoneInput>,
    policy: AggregationPolicy,
    transitional: f64,
    boost: f64,
    boost_on_sensor_fail: bool,
    last_pwm: f64,
    no_sane_asserted: bool,
}

impl Zone {
    pub fn new(name: impl Into<String>, pwm_output: Vec<u32>, transitional: f64, boost: f64) -> Self {
        Self {
            name: name.into(),
            pwm_output,
            inputs: Vec::new(),
            policy: AggregationPolicy::Max,
            transitional,
            boost,
            boost_on_sensor_fail: false,
            last_pwm: transitional,
            no_sane_asserted: false,
        }
    }

    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_input(mut self, input: ZoneInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_sensor_fail_boost(mut self, enabled: bool) -> Self {
        self.boost_on_sensor_fail = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pwm_output(&self) -> &[u32] {
        &self.pwm_output
    }

    pub fn inputs(&self) -> &[ZoneInput] {
        &self.inputs
    }

    pub fn last_pwm(&self) -> f64 {
        self.last_pwm
    }

    pub fn set_last_pwm(&mut self, pwm: f64) {
        self.last_pwm = pwm.clamp(0.0, 100.0);
    }

    pub fn no_sane_asserted(&self) -> bool {
        self.no_sane_asserted
    }

    /// Forget every assertion so active faults are logged again.
    pub fn clear_assertions(&mut self) {
        self.no_sane_asserted = false;
        for input in &mut self.inputs {
            input.missing_asserted = false;
            input.missing_count = 0;
        }
    }

    /// Limit the move from the last written PWM to `ramp_rate` percent.
    pub fn ramp(&self, target: f64, ramp_rate: f64) -> f64 {
        if ramp_rate <= 0.0 || (target - self.last_pwm).abs() <= ramp_rate {
            return target;
        }
        if target < self.last_pwm {
            self.last_pwm - ramp_rate
        } else {
            self.last_pwm + ramp_rate
        }
    }

    /// Evaluate every input against this cycle's sensor samples.
    pub fn run(&mut self, samples: &BTreeMap<String, SensorSample>, dt: f64, dead_fans: usize) -> ZoneOutput {
        let ctx = ControlContext { dt, dead_fans, last_pwm: self.last_pwm };
        let mut outputs = Vec::with_capacity(self.inputs.len());
        let mut floor: f64 = 0.0;
        let mut ucr = false;
        let mut failed = false;

        for input in &mut self.inputs {
            let sample = samples.get(&input.sensor).copied().unwrap_or(SensorSample::Missing);

            if sample.is_failed() {
                failed = true;
                if self.boost_on_sensor_fail {
                    warn!(zone = %self.name, sensor = %input.sensor, "sensor failed, boosting zone");
                    floor = floor.max(self.boost);
                }
            }

            match sample.value() {
                Some(value) => {
                    input.missing_count = 0;
                    if input.missing_asserted {
                        error!(zone = %self.name, sensor = %input.sensor, "DEASSERT: missing sensor");
                        input.missing_asserted = false;
                    }
                    if sample.is_ucr() {
                        warn!(zone = %self.name, sensor = %input.sensor, value, "sensor reporting status ucr");
                        ucr = true;
                        floor = floor.max(self.transitional);
                    }
                    outputs.push(input.controller.compute(value, &ctx));
                }
                None => {
                    input.missing_count = input.missing_count.saturating_add(1);
                    if !input.missing_asserted && input.missing_count >= MISSING_SENSOR_RETRIES {
                        error!(zone = %self.name, sensor = %input.sensor, "ASSERT: missing sensor");
                        input.missing_asserted = true;
                    }
                }
            }
        }

        let aggregate = self.policy.aggregate(&outputs);
        let sensor_fail_boost = self.boost_on_sensor_fail && failed;

        let (pwm, mode) = match aggregate {
            None if floor <= 0.0 => {
                if !self.no_sane_asserted {
                    error!(zone = %self.name, pwm = self.transitional, "ASSERT: no sane fan speed could be calculated, using transitional");
                    self.no_sane_asserted = true;
                }
                (self.transitional, FanMode::Transitional)
            }
            aggregate => {
                if self.no_sane_asserted {
                    error!(zone = %self.name, "DEASSERT: no sane fan speed could be calculated");
                    self.no_sane_asserted = false;
                }
                let value = aggregate.unwrap_or(0.0).max(floor);
                let mode = if sensor_fail_boost && value <= self.boost && floor >= self.boost {
                    FanMode::Boost
                } else if ucr && floor >= value {
                    FanMode::Transitional
                } else {
                    FanMode::Normal
                };
                (value, mode)
            }
        };

        info!(zone = %self.name, pwm, mode = ?mode, inputs = outputs.len(), "zone evaluated");
        ZoneOutput { pwm: pwm.clamp(0.0, 100.0), mode, sensor_fail_boost }
    }
}
