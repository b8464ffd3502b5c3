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

//! fscd - Fan speed control daemon for BMCs
//!
//! This library reads temperature sensors, maps them through per-zone
//! control profiles, drives fan PWM outputs and detects dead fans.

pub mod board;
pub mod config;
pub mod curves;
pub mod fan;
pub mod hwmon;
pub mod logger;
pub mod records;
pub mod sensor;
pub mod service;
pub mod system;
pub mod zone;

#[cfg(test)]
pub mod test_utils;

pub use fscd_error::{FscError, Result};
