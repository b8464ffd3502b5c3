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

//! Tracing subscriber setup: systemd journal when available, stderr otherwise.

use std::path::Path;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fscd_error::{FscError, Result};

const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

pub const DEFAULT_LOG_LEVEL: &str = "warning";

/// Map a daemon log level name onto a tracing filter directive.
///
/// `critical` has no tracing equivalent and maps to `error`.
pub fn filter_directive(level: &str) -> Result<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "critical" | "error" => Ok("error"),
        "warning" | "warn" => Ok("warn"),
        "info" => Ok("info"),
        "debug" => Ok("debug"),
        other => Err(FscError::invalid_config(
            "log_level",
            format!("unknown level `{}` (expected critical, error, warning, info or debug)", other),
        )),
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `level` when set.
pub fn init(level: &str) -> Result<()> {
    let directive = filter_directive(level)?;
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let mut use_journald = Path::new(JOURNAL_SOCKET).exists();
    if use_journald {
        match tracing_journald::layer() {
            Ok(layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry().with(layer).with(filter()).init();
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stderr", e);
                use_journald = false;
            }
        }
    }
    if !use_journald {
        tracing_subscriber::fmt()
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .with_env_filter(filter())
            .init();
    }

    info!(level = directive, sink = if use_journald { "journald" } else { "stderr" }, "logging initialised");
    if level.eq_ignore_ascii_case("critical") {
        warn!("log level critical is treated as error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(filter_directive("critical").unwrap(), "error");
        assert_eq!(filter_directive("WARNING").unwrap(), "warn");
        assert_eq!(filter_directive("info").unwrap(), "info");
        assert_eq!(filter_directive("debug").unwrap(), "debug");
        assert_eq!(filter_directive(DEFAULT_LOG_LEVEL).unwrap(), "warn");
    }

    #[test]
    fn test_unknown_level_rejected() {
        let err = filter_directive("verbose").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("verbose"));
    }
}
