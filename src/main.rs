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

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use fscd::board::CommandBoard;
use fscd::config::{self, DEFAULT_CONFIG_PATH};
use fscd::logger::{self, DEFAULT_LOG_LEVEL};
use fscd::service::Fscd;

/// Set by the signal handler; polled between cycles.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "fscd")]
#[command(version)]
#[command(about = "Fan speed control daemon")]
#[command(long_about = "Fan speed control daemon

Reads temperature sensors, maps them through the zone profiles in the
configuration file and writes fan PWM. Dead fans and failed sensors boost
the affected zones. On SIGINT/SIGTERM all fans return to the transitional
value before exit.")]
struct Cli {
    /// critical, error, warning, info or debug
    #[arg(default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,

    /// Configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Run a single control cycle and print its report as JSON
    #[arg(long, conflicts_with = "check")]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(&cli.log_level).context("failed to initialise logging")?;

    let cfg = config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    if cli.check {
        println!("{}: OK ({} zones, {} fans, {} sensors)", cli.config.display(), cfg.zones.len(), cfg.fans.len(), cfg.sensors.len());
        return Ok(());
    }

    if unsafe { libc::geteuid() } != 0 {
        warn!("fscd is not running as root; sysfs writes will likely fail");
    }

    let board = CommandBoard::new(cfg.board.clone(), cfg.command_runner());
    let mut fscd = Fscd::from_config(cfg, Box::new(board)).context("failed to set up fans, sensors and zones")?;

    if cli.once {
        fscd.startup().context("startup failed")?;
        let dt = fscd.config().sample_interval().as_secs_f64();
        let report = fscd.cycle(dt);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if let Err(e) = ctrlc::set_handler(|| {
        info!("received SIGINT/SIGTERM, shutting down");
        SHUTDOWN.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to set signal handler: {}. Fans will not be reset on exit.", e);
    }

    if let Err(e) = fscd.run(&SHUTDOWN) {
        error!(error = %e, "fscd stopped");
        return Err(e.into());
    }
    info!("fscd exited");
    Ok(())
}
