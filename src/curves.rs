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

//! Controller strategies mapping a sensor reading to a fan PWM percentage.
//!
//! Four kinds are supported, selected by the profile's `type` tag:
//!
//! - `linear`: lookup table with interpolation and asymmetric hysteresis
//! - `pid`: absolute PID around a setpoint band with integral clamping
//! - `incrementpid`: PID that emits a delta applied to the previous output
//! - `linear_4curve`: four tables picked by temperature direction and fan health
//!
//! The kind is resolved once when the configuration is loaded. Every
//! controller keeps its own state between cycles, so one controller instance
//! belongs to exactly one zone input.

use serde::{Deserialize, Serialize};

use fscd_error::{FscError, Result};

/// A `(temperature, pwm percent)` table row.
pub type TablePoint = (f64, f64);

const FLOAT_EPSILON: f64 = 1e-9;
const MAX_TABLE_POINTS: usize = 64;

fn default_integral_limit() -> f64 { 100.0 }

/// Per-cycle inputs shared by all controllers of a zone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlContext {
    /// Seconds since the previous control cycle
    pub dt: f64,
    /// Number of fans currently considered dead
    pub dead_fans: usize,
    /// PWM the zone wrote on the previous cycle
    pub last_pwm: f64,
}

/// Profile definition as it appears in the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ProfileSpec {
    #[serde(rename = "linear")]
    Linear {
        data: Vec<TablePoint>,
        #[serde(default)]
        positive_hysteresis: f64,
        #[serde(default)]
        negative_hysteresis: f64,
        #[serde(default)]
        stepped: bool,
    },
    #[serde(rename = "pid")]
    Pid {
        setpoint: f64,
        kp: f64,
        ki: f64,
        kd: f64,
        #[serde(default)]
        positive_hysteresis: f64,
        #[serde(default)]
        negative_hysteresis: f64,
        #[serde(default = "default_integral_limit")]
        integral_limit: f64,
    },
    #[serde(rename = "incrementpid")]
    IncrementalPid {
        setpoint: f64,
        kp: f64,
        ki: f64,
        kd: f64,
        #[serde(default)]
        positive_hysteresis: f64,
        #[serde(default)]
        negative_hysteresis: f64,
    },
    #[serde(rename = "linear_4curve")]
    FourCurve {
        normal_up: Vec<TablePoint>,
        normal_down: Vec<TablePoint>,
        onefail_up: Vec<TablePoint>,
        onefail_down: Vec<TablePoint>,
        #[serde(default)]
        stepped: bool,
    },
}

fn validate_table(field: &str, points: &[TablePoint]) -> Result<()> {
    if points.is_empty() {
        return Err(FscError::invalid_config(field, "table must have at least one row"));
    }
    if points.len() > MAX_TABLE_POINTS {
        return Err(FscError::invalid_config(
            field,
            format!("too many table rows (max {})", MAX_TABLE_POINTS),
        ));
    }
    let mut last_t = f64::NEG_INFINITY;
    for (i, &(t, pwm)) in points.iter().enumerate() {
        if !t.is_finite() || !pwm.is_finite() {
            return Err(FscError::invalid_config(field, format!("row {} is not finite", i)));
        }
        if !(0.0..=100.0).contains(&pwm) {
            return Err(FscError::invalid_config(field, format!("row {} pwm out of range 0..100", i)));
        }
        if t < last_t {
            return Err(FscError::invalid_config(field, "rows must be sorted by temperature"));
        }
        last_t = t;
    }
    Ok(())
}

fn validate_hysteresis(field: &str, negative: f64, positive: f64) -> Result<()> {
    if !negative.is_finite() || !positive.is_finite() || negative < 0.0 || positive < 0.0 {
        return Err(FscError::invalid_config(field, "hysteresis must be a non-negative number"));
    }
    Ok(())
}

fn validate_gains(field: &str, values: &[f64]) -> Result<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(FscError::invalid_config(field, "setpoint and gains must be finite"));
    }
    Ok(())
}

impl ProfileSpec {
    /// Short name of the controller kind, as used in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ProfileSpec::Linear { .. } => "linear",
            ProfileSpec::Pid { .. } => "pid",
            ProfileSpec::IncrementalPid { .. } => "incrementpid",
            ProfileSpec::FourCurve { .. } => "linear_4curve",
        }
    }

    /// Validate the profile named `name`.
    pub fn validate(&self, name: &str) -> Result<()> {
        let field = format!("profiles.{}", name);
        match self {
            ProfileSpec::Linear { data, positive_hysteresis, negative_hysteresis, .. } => {
                validate_table(&format!("{}.data", field), data)?;
                validate_hysteresis(&field, *negative_hysteresis, *positive_hysteresis)
            }
            ProfileSpec::Pid {
                setpoint, kp, ki, kd, positive_hysteresis, negative_hysteresis, integral_limit,
            } => {
                validate_gains(&field, &[*setpoint, *kp, *ki, *kd])?;
                validate_hysteresis(&field, *negative_hysteresis, *positive_hysteresis)?;
                if !integral_limit.is_finite() || *integral_limit <= 0.0 {
                    return Err(FscError::invalid_config(
                        format!("{}.integral_limit", field),
                        "must be a positive number",
                    ));
                }
                Ok(())
            }
            ProfileSpec::IncrementalPid {
                setpoint, kp, ki, kd, positive_hysteresis, negative_hysteresis,
            } => {
                validate_gains(&field, &[*setpoint, *kp, *ki, *kd])?;
                validate_hysteresis(&field, *negative_hysteresis, *positive_hysteresis)
            }
            ProfileSpec::FourCurve { normal_up, normal_down, onefail_up, onefail_down, .. } => {
                validate_table(&format!("{}.normal_up", field), normal_up)?;
                validate_table(&format!("{}.normal_down", field), normal_down)?;
                validate_table(&format!("{}.onefail_up", field), onefail_up)?;
                validate_table(&format!("{}.onefail_down", field), onefail_down)
            }
        }
    }

    /// Build a fresh controller with zeroed state.
    pub fn build(&self) -> Controller {
        match self {
            ProfileSpec::Linear { data, positive_hysteresis, negative_hysteresis, stepped } => {
                Controller::Linear(
                    LinearTable::new(data.clone())
                        .with_hysteresis(*negative_hysteresis, *positive_hysteresis)
                        .with_stepped(*stepped),
                )
            }
            ProfileSpec::Pid {
                setpoint, kp, ki, kd, positive_hysteresis, negative_hysteresis, integral_limit,
            } => Controller::Pid(
                Pid::new(*setpoint, *kp, *ki, *kd)
                    .with_hysteresis(*negative_hysteresis, *positive_hysteresis)
                    .with_integral_limit(*integral_limit),
            ),
            ProfileSpec::IncrementalPid {
                setpoint, kp, ki, kd, positive_hysteresis, negative_hysteresis,
            } => Controller::IncrementalPid(
                IncrementalPid::new(*setpoint, *kp, *ki, *kd)
                    .with_hysteresis(*negative_hysteresis, *positive_hysteresis),
            ),
            ProfileSpec::FourCurve { normal_up, normal_down, onefail_up, onefail_down, stepped } => {
                Controller::FourCurve(
                    FourCurveTable::new(
                        normal_up.clone(),
                        normal_down.clone(),
                        onefail_up.clone(),
                        onefail_down.clone(),
                    )
                    .with_stepped(*stepped),
                )
            }
        }
    }
}

/// Look up `x` in a table sorted by temperature.
///
/// Below the first row returns the first output, above the last row returns
/// the last output. In stepped mode the output of the highest row at or
/// below `x` is used without interpolation.
pub fn interpolate(points: &[TablePoint], x: f64, stepped: bool) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return 0.0,
    };

    if stepped {
        return points.iter().rev().find(|(t, _)| *t <= x).map_or(first.1, |(_, p)| *p);
    }
    if x < first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }

    for w in points.windows(2) {
        let (t0, p0) = w[0];
        let (t1, p1) = w[1];
        if x >= t0 && x <= t1 {
            let span = t1 - t0;
            if span.abs() < FLOAT_EPSILON {
                return p1;
            }
            return p0 + (x - t0) / span * (p1 - p0);
        }
    }
    last.1
}

/// Lookup table with linear interpolation and an asymmetric hysteresis band.
///
/// The table only re-evaluates once the reading has moved away from the last
/// accepted reading by at least `positive_hysteresis` (rising) or
/// `negative_hysteresis` (falling). Readings inside that band repeat the
/// previous output.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTable {
    points: Vec<TablePoint>,
    positive_hysteresis: f64,
    negative_hysteresis: f64,
    stepped: bool,
    last_input: Option<f64>,
    last_output: Option<f64>,
}

impl LinearTable {
    pub fn new(points: Vec<TablePoint>) -> Self {
        Self {
            points,
            positive_hysteresis: 0.0,
            negative_hysteresis: 0.0,
            stepped: false,
            last_input: None,
            last_output: None,
        }
    }

    pub fn with_hysteresis(mut self, negative: f64, positive: f64) -> Self {
        self.negative_hysteresis = negative.max(0.0);
        self.positive_hysteresis = positive.max(0.0);
        self
    }

    pub fn with_stepped(mut self, stepped: bool) -> Self {
        self.stepped = stepped;
        self
    }

    pub fn compute(&mut self, reading: f64) -> f64 {
        if let (Some(last_in), Some(last_out)) = (self.last_input, self.last_output) {
            let moved = if reading >= last_in {
                reading - last_in >= self.positive_hysteresis
            } else {
                last_in - reading >= self.negative_hysteresis
            };
            if !moved {
                return last_out;
            }
        }

        let out = interpolate(&self.points, reading, self.stepped).clamp(0.0, 100.0);
        self.last_input = Some(reading);
        self.last_output = Some(out);
        out
    }

    /// Raw table value for `reading`, ignoring hysteresis state.
    pub fn preview(&self, reading: f64) -> f64 {
        interpolate(&self.points, reading, self.stepped).clamp(0.0, 100.0)
    }

    pub fn reset(&mut self) {
        self.last_input = None;
        self.last_output = None;
    }
}

/// Distance of `reading` from the `[setpoint - neg, setpoint + pos]` band.
fn band_error(setpoint: f64, negative: f64, positive: f64, reading: f64) -> f64 {
    let upper = setpoint + positive;
    let lower = setpoint - negative;
    if reading > upper {
        reading - upper
    } else if reading < lower {
        reading - lower
    } else {
        0.0
    }
}

/// Absolute PID controller with integral anti-windup.
#[derive(Debug, Clone, PartialEq)]
pub struct Pid {
    setpoint: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    positive_hysteresis: f64,
    negative_hysteresis: f64,
    /// Bound on |ki * integral|, in PWM percent
    integral_limit: f64,
    integral: f64,
    last_error: f64,
}

impl Pid {
    pub fn new(setpoint: f64, kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            setpoint,
            kp,
            ki,
            kd,
            positive_hysteresis: 0.0,
            negative_hysteresis: 0.0,
            integral_limit: default_integral_limit(),
            integral: 0.0,
            last_error: 0.0,
        }
    }

    pub fn with_hysteresis(mut self, negative: f64, positive: f64) -> Self {
        self.negative_hysteresis = negative.max(0.0);
        self.positive_hysteresis = positive.max(0.0);
        self
    }

    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = limit.abs();
        self
    }

    pub fn compute(&mut self, reading: f64, ctx: &ControlContext) -> f64 {
        let err = band_error(self.setpoint, self.negative_hysteresis, self.positive_hysteresis, reading);
        let dt = ctx.dt.max(0.0);

        if self.ki.abs() > FLOAT_EPSILON {
            let bound = self.integral_limit / self.ki.abs();
            self.integral = (self.integral + err * dt).clamp(-bound, bound);
        } else {
            self.integral = 0.0;
        }

        let derivative = if dt > FLOAT_EPSILON { (err - self.last_error) / dt } else { 0.0 };
        self.last_error = err;

        let out = self.kp * err + self.ki * self.integral + self.kd * derivative;
        if out.is_finite() { out.clamp(0.0, 100.0) } else { ctx.last_pwm.clamp(0.0, 100.0) }
    }

    /// Accumulated integral term (before multiplying by ki).
    pub fn integral(&self) -> f64 {
        self.integral
    }
}

/// Velocity-form PID: each cycle adds a delta to the previous output.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalPid {
    setpoint: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    positive_hysteresis: f64,
    negative_hysteresis: f64,
    last_error: f64,
    prev_error: f64,
    last_output: Option<f64>,
}

impl IncrementalPid {
    pub fn new(setpoint: f64, kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            setpoint,
            kp,
            ki,
            kd,
            positive_hysteresis: 0.0,
            negative_hysteresis: 0.0,
            last_error: 0.0,
            prev_error: 0.0,
            last_output: None,
        }
    }

    pub fn with_hysteresis(mut self, negative: f64, positive: f64) -> Self {
        self.negative_hysteresis = negative.max(0.0);
        self.positive_hysteresis = positive.max(0.0);
        self
    }

    pub fn compute(&mut self, reading: f64, ctx: &ControlContext) -> f64 {
        let err = band_error(self.setpoint, self.negative_hysteresis, self.positive_hysteresis, reading);
        let dt = ctx.dt.max(0.0);
        let previous = self.last_output.unwrap_or(ctx.last_pwm);

        let mut delta = self.kp * (err - self.last_error) + self.ki * err * dt;
        if dt > FLOAT_EPSILON {
            delta += self.kd * (err - 2.0 * self.last_error + self.prev_error) / dt;
        }

        let out = if delta.is_finite() { (previous + delta).clamp(0.0, 100.0) } else { previous.clamp(0.0, 100.0) };
        self.prev_error = self.last_error;
        self.last_error = err;
        self.last_output = Some(out);
        out
    }
}

/// Four lookup tables selected by temperature direction and fan health.
#[derive(Debug, Clone, PartialEq)]
pub struct FourCurveTable {
    normal_up: Vec<TablePoint>,
    normal_down: Vec<TablePoint>,
    onefail_up: Vec<TablePoint>,
    onefail_down: Vec<TablePoint>,
    stepped: bool,
    last_reading: Option<f64>,
    rising: bool,
}

impl FourCurveTable {
    pub fn new(
        normal_up: Vec<TablePoint>,
        normal_down: Vec<TablePoint>,
        onefail_up: Vec<TablePoint>,
        onefail_down: Vec<TablePoint>,
    ) -> Self {
        Self {
            normal_up,
            normal_down,
            onefail_up,
            onefail_down,
            stepped: false,
            last_reading: None,
            rising: true,
        }
    }

    pub fn with_stepped(mut self, stepped: bool) -> Self {
        self.stepped = stepped;
        self
    }

    pub fn compute(&mut self, reading: f64, ctx: &ControlContext) -> f64 {
        if let Some(last) = self.last_reading {
            if reading > last {
                self.rising = true;
            } else if reading < last {
                self.rising = false;
            }
        }
        self.last_reading = Some(reading);

        let table = match (ctx.dead_fans > 0, self.rising) {
            (false, true) => &self.normal_up,
            (false, false) => &self.normal_down,
            (true, true) => &self.onefail_up,
            (true, false) => &self.onefail_down,
        };
        interpolate(table, reading, self.stepped).clamp(0.0, 100.0)
    }

    pub fn is_rising(&self) -> bool {
        self.rising
    }
}

/// A configured controller, one variant per supported kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Controller {
    Linear(LinearTable),
    Pid(Pid),
    IncrementalPid(IncrementalPid),
    FourCurve(FourCurveTable),
}

impl Controller {
    /// Map `reading` to a PWM percentage in `[0, 100]`, updating state.
    ///
    /// A non-finite reading leaves state untouched and repeats the zone's
    /// previous PWM.
    pub fn compute(&mut self, reading: f64, ctx: &ControlContext) -> f64 {
        if !reading.is_finite() {
            return ctx.last_pwm.clamp(0.0, 100.0);
        }
        match self {
            Controller::Linear(c) => c.compute(reading),
            Controller::Pid(c) => c.compute(reading, ctx),
            Controller::IncrementalPid(c) => c.compute(reading, ctx),
            Controller::FourCurve(c) => c.compute(reading, ctx),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Controller::Linear(_) => "linear",
            Controller::Pid(_) => "pid",
            Controller::IncrementalPid(_) => "incrementpid",
            Controller::FourCurve(_) => "linear_4curve",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::assert_approx_eq;

    fn ctx(dt: f64) -> ControlContext {
        ControlContext { dt, dead_fans: 0, last_pwm: 50.0 }
    }

    fn inlet_table() -> Vec<TablePoint> {
        vec![(20.0, 20.0), (30.0, 40.0), (40.0, 60.0), (50.0, 100.0)]
    }

    #[test]
    fn test_interpolate_between_points() {
        assert_approx_eq(interpolate(&inlet_table(), 25.0, false), 30.0, 1e-9);
        assert_approx_eq(interpolate(&inlet_table(), 45.0, false), 80.0, 1e-9);
    }

    #[test]
    fn test_interpolate_outside_table() {
        assert_eq!(interpolate(&inlet_table(), 0.0, false), 20.0);
        assert_eq!(interpolate(&inlet_table(), 90.0, false), 100.0);
    }

    #[test]
    fn test_interpolate_stepped() {
        assert_eq!(interpolate(&inlet_table(), 29.9, true), 20.0);
        assert_eq!(interpolate(&inlet_table(), 30.0, true), 40.0);
        assert_eq!(interpolate(&inlet_table(), 35.0, true), 40.0);
    }

    #[test]
    fn test_interpolate_duplicate_temperature() {
        let table = vec![(20.0, 20.0), (30.0, 40.0), (30.0, 70.0), (40.0, 80.0)];
        assert_eq!(interpolate(&table, 30.0, false), 40.0);
        assert_approx_eq(interpolate(&table, 35.0, false), 75.0, 1e-9);
    }

    #[test]
    fn test_interpolate_stepped_duplicate_uses_highest_row() {
        let table = vec![(20.0, 20.0), (30.0, 40.0), (30.0, 70.0), (40.0, 80.0)];
        assert_eq!(interpolate(&table, 30.0, true), 70.0);
        assert_eq!(interpolate(&table, 35.0, true), 70.0);
        assert_eq!(interpolate(&table, 10.0, true), 20.0);
        assert_eq!(interpolate(&table, 90.0, true), 80.0);

        let leading = vec![(30.0, 40.0), (30.0, 70.0)];
        assert_eq!(interpolate(&leading, 30.0, true), 70.0);
    }

    #[test]
    fn test_linear_hysteresis_holds_output_near_breakpoint() {
        let mut table = LinearTable::new(inlet_table()).with_hysteresis(2.0, 2.0);
        let first = table.compute(30.0);
        assert_eq!(first, 40.0);

        for reading in [31.0, 29.0, 30.5, 28.5, 31.9, 28.1] {
            assert_eq!(table.compute(reading), first, "reading {} changed the output", reading);
        }

        // Leaving the band re-evaluates
        assert_approx_eq(table.compute(32.0), 44.0, 1e-9);
    }

    #[test]
    fn test_linear_asymmetric_hysteresis() {
        let mut table = LinearTable::new(inlet_table()).with_hysteresis(3.0, 0.0);
        assert_eq!(table.compute(30.0), 40.0);
        // Rising re-evaluates immediately
        assert_approx_eq(table.compute(31.0), 42.0, 1e-9);
        // Falling needs a 3 degree drop from the last accepted reading
        assert_approx_eq(table.compute(29.0), 42.0, 1e-9);
        assert_approx_eq(table.compute(28.0), 36.0, 1e-9);
    }

    #[test]
    fn test_linear_reset() {
        let mut table = LinearTable::new(inlet_table()).with_hysteresis(5.0, 5.0);
        table.compute(30.0);
        assert_eq!(table.compute(33.0), 40.0);
        table.reset();
        assert_approx_eq(table.compute(33.0), 46.0, 1e-9);
        assert_approx_eq(table.preview(25.0), 30.0, 1e-9);
    }

    #[test]
    fn test_pid_zero_inside_band() {
        let mut pid = Pid::new(70.0, 5.0, 0.5, 0.0).with_hysteresis(2.0, 2.0);
        assert_eq!(pid.compute(71.0, &ctx(1.0)), 0.0);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn test_pid_proportional_above_band() {
        let mut pid = Pid::new(70.0, 5.0, 0.0, 0.0).with_hysteresis(0.0, 2.0);
        // error = 80 - 72 = 8
        assert_approx_eq(pid.compute(80.0, &ctx(1.0)), 40.0, 1e-9);
    }

    #[test]
    fn test_pid_integral_is_clamped() {
        let mut pid = Pid::new(50.0, 0.0, 1.0, 0.0).with_integral_limit(30.0);
        for _ in 0..1000 {
            let out = pid.compute(150.0, &ctx(3.0));
            assert!((0.0..=100.0).contains(&out));
        }
        assert!(pid.integral() <= 30.0 + 1e-9);
        assert_approx_eq(pid.compute(150.0, &ctx(3.0)), 100.0, 1e-9);

        // Windup bounded: recovery is immediate once the error reverses
        let out = pid.compute(20.0, &ctx(3.0));
        assert!(out < 100.0);
    }

    #[test]
    fn test_pid_output_clamped_for_large_gain() {
        let mut pid = Pid::new(40.0, 1000.0, 1000.0, 1000.0);
        for _ in 0..50 {
            let out = pid.compute(120.0, &ctx(1.0));
            assert!((0.0..=100.0).contains(&out));
        }
        assert_eq!(pid.compute(-40.0, &ctx(1.0)), 0.0);
    }

    #[test]
    fn test_pid_zero_dt_skips_derivative() {
        let mut pid = Pid::new(50.0, 1.0, 0.0, 100.0);
        assert_approx_eq(pid.compute(60.0, &ctx(0.0)), 10.0, 1e-9);
    }

    #[test]
    fn test_incremental_pid_starts_from_zone_pwm() {
        let mut pid = IncrementalPid::new(60.0, 2.0, 0.0, 0.0);
        // first cycle: delta = 2 * (5 - 0) = 10 on top of last_pwm 50
        assert_approx_eq(pid.compute(65.0, &ctx(1.0)), 60.0, 1e-9);
        // unchanged error contributes no proportional delta
        assert_approx_eq(pid.compute(65.0, &ctx(1.0)), 60.0, 1e-9);
        // error falling back to zero walks output down by 10
        assert_approx_eq(pid.compute(60.0, &ctx(1.0)), 50.0, 1e-9);
    }

    #[test]
    fn test_incremental_pid_running_total_clamped() {
        let mut pid = IncrementalPid::new(40.0, 0.0, 5.0, 0.0);
        let mut out = 0.0;
        for _ in 0..100 {
            out = pid.compute(90.0, &ctx(2.0));
            assert!((0.0..=100.0).contains(&out));
        }
        assert_eq!(out, 100.0);
    }

    fn four_curve() -> FourCurveTable {
        FourCurveTable::new(
            vec![(20.0, 20.0), (40.0, 60.0)],
            vec![(20.0, 10.0), (40.0, 50.0)],
            vec![(20.0, 50.0), (40.0, 90.0)],
            vec![(20.0, 40.0), (40.0, 80.0)],
        )
    }

    #[test]
    fn test_four_curve_direction() {
        let mut curve = four_curve();
        assert_approx_eq(curve.compute(30.0, &ctx(1.0)), 40.0, 1e-9);
        assert!(curve.is_rising());
        assert_approx_eq(curve.compute(25.0, &ctx(1.0)), 20.0, 1e-9);
        assert!(!curve.is_rising());
        // equal reading keeps the previous direction
        assert_approx_eq(curve.compute(25.0, &ctx(1.0)), 20.0, 1e-9);
    }

    #[test]
    fn test_four_curve_fan_failure_tables() {
        let mut curve = four_curve();
        let failed = ControlContext { dt: 1.0, dead_fans: 1, last_pwm: 50.0 };
        assert_approx_eq(curve.compute(30.0, &failed), 70.0, 1e-9);
        assert_approx_eq(curve.compute(20.0, &failed), 40.0, 1e-9);
    }

    #[test]
    fn test_controller_non_finite_reading_repeats_last_pwm() {
        let mut controller = Controller::Linear(LinearTable::new(inlet_table()));
        assert_eq!(controller.compute(f64::NAN, &ctx(1.0)), 50.0);
        assert_eq!(controller.kind(), "linear");
    }

    #[test]
    fn test_profile_spec_deserialize_and_build() {
        let json = r#"{
            "type": "linear",
            "positive_hysteresis": 0,
            "negative_hysteresis": 2,
            "data": [[20, 20], [40, 60]]
        }"#;
        let spec: ProfileSpec = serde_json::from_str(json).unwrap();
        spec.validate("linear_inlet").unwrap();
        assert_eq!(spec.kind(), "linear");
        let mut controller = spec.build();
        assert_approx_eq(controller.compute(30.0, &ctx(1.0)), 40.0, 1e-9);
    }

    #[test]
    fn test_profile_spec_pid_defaults() {
        let json = r#"{"type": "pid", "setpoint": 70, "kp": 2, "ki": 0.1, "kd": 0}"#;
        let spec: ProfileSpec = serde_json::from_str(json).unwrap();
        match &spec {
            ProfileSpec::Pid { integral_limit, positive_hysteresis, .. } => {
                assert_eq!(*integral_limit, 100.0);
                assert_eq!(*positive_hysteresis, 0.0);
            }
            other => panic!("unexpected spec {:?}", other),
        }
        assert!(matches!(spec.build(), Controller::Pid(_)));
    }

    #[test]
    fn test_profile_spec_unknown_type_rejected() {
        let json = r#"{"type": "quadratic", "data": [[20, 20]]}"#;
        assert!(serde_json::from_str::<ProfileSpec>(json).is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_tables() {
        let unsorted = ProfileSpec::Linear {
            data: vec![(40.0, 60.0), (20.0, 20.0)],
            positive_hysteresis: 0.0,
            negative_hysteresis: 0.0,
            stepped: false,
        };
        assert!(unsorted.validate("p").is_err());

        let out_of_range = ProfileSpec::Linear {
            data: vec![(20.0, 120.0)],
            positive_hysteresis: 0.0,
            negative_hysteresis: 0.0,
            stepped: false,
        };
        assert!(out_of_range.validate("p").is_err());

        let empty = ProfileSpec::FourCurve {
            normal_up: vec![(20.0, 20.0)],
            normal_down: vec![],
            onefail_up: vec![(20.0, 20.0)],
            onefail_down: vec![(20.0, 20.0)],
            stepped: false,
        };
        let err = empty.validate("p").unwrap_err();
        assert!(err.to_string().contains("normal_down"));

        let negative_hyst = ProfileSpec::IncrementalPid {
            setpoint: 60.0,
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            positive_hysteresis: -1.0,
            negative_hysteresis: 0.0,
        };
        assert!(negative_hyst.validate("p").is_err());
    }
}
