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

//! Board specific callouts invoked by the control loop on fault transitions.
//!
//! The scheduler only talks to [`BoardCallouts`]. Platforms either implement
//! the trait directly or describe shell hooks in the `board` section of the
//! configuration, which [`CommandBoard`] runs.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::sensor::HostAction;
use crate::system::CommandRunner;

/// Fan related board action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanAction {
    Dead,
    Recover,
    LedRed,
    LedBlue,
}

impl FanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanAction::Dead => "dead",
            FanAction::Recover => "recover",
            FanAction::LedRed => "led_red",
            FanAction::LedBlue => "led_blue",
        }
    }
}

/// Capabilities a platform supplies to the scheduler.
#[cfg_attr(test, mockall::automock)]
pub trait BoardCallouts: Send {
    /// Signal a fan state change or LED colour.
    fn fan_action(&mut self, fan: u32, label: &str, action: FanAction);

    /// True while the chassis is open or a tray is pulled.
    fn chassis_intrusion(&mut self) -> bool;

    /// Run a host power action. Not retried.
    fn host_action(&mut self, action: HostAction, cause: &str);

    /// False while fan power is off.
    fn fan_power_ok(&mut self) -> bool;

    /// True when an operator asked to re-log active faults.
    fn fan_rearm_requested(&mut self) -> bool;

    fn kick_watchdog(&mut self);
}

/// Shell commands backing each callout. Unset hooks are no-ops.
///
/// Placeholders: `{fan}`, `{label}` and `{action}` in `fan_action`;
/// `{cause}` in `host_shutdown`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoardHooks {
    #[serde(default)]
    pub chassis_intrusion: Option<String>,
    #[serde(default)]
    pub fan_power: Option<String>,
    #[serde(default)]
    pub fan_rearm: Option<String>,
    #[serde(default)]
    pub host_shutdown: Option<String>,
    #[serde(default)]
    pub fan_action: Option<String>,
    #[serde(default)]
    pub watchdog: Option<String>,
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// [`BoardCallouts`] implemented by running configured shell hooks.
#[derive(Debug, Clone)]
pub struct CommandBoard {
    hooks: BoardHooks,
    runner: CommandRunner,
}

impl CommandBoard {
    pub fn new(hooks: BoardHooks, runner: CommandRunner) -> Self {
        Self { hooks, runner }
    }

    /// Run `cmd` and report whether its trimmed stdout is `1`.
    fn query_flag(&self, name: &str, cmd: &str) -> bool {
        match self.runner.run(cmd) {
            Ok(out) => out.stdout.trim() == "1",
            Err(e) => {
                warn!(hook = name, error = %e, "board hook failed");
                false
            }
        }
    }

    fn fire(&self, name: &str, cmd: &str) {
        debug!(hook = name, command = %cmd, "running board hook");
        if let Err(e) = self.runner.run_checked(cmd) {
            warn!(hook = name, error = %e, "board hook failed");
        }
    }

    pub fn render_fan_action(template: &str, fan: u32, label: &str, action: FanAction) -> String {
        template
            .replace("{fan}", &fan.to_string())
            .replace("{label}", &shell_quote(label))
            .replace("{action}", action.as_str())
    }

    pub fn render_host_action(template: &str, cause: &str) -> String {
        template.replace("{cause}", &shell_quote(cause))
    }
}

impl BoardCallouts for CommandBoard {
    fn fan_action(&mut self, fan: u32, label: &str, action: FanAction) {
        if let Some(t) = &self.hooks.fan_action {
            let cmd = Self::render_fan_action(t, fan, label, action);
            self.fire("fan_action", &cmd);
        }
    }

    fn chassis_intrusion(&mut self) -> bool {
        match &self.hooks.chassis_intrusion {
            Some(cmd) => self.query_flag("chassis_intrusion", cmd),
            None => false,
        }
    }

    fn host_action(&mut self, action: HostAction, cause: &str) {
        error!(action = action.as_str(), cause, "host action");
        match action {
            HostAction::HostShutdown => match &self.hooks.host_shutdown {
                Some(t) => {
                    let cmd = Self::render_host_action(t, cause);
                    self.fire("host_shutdown", &cmd);
                }
                None => warn!(cause, "no host_shutdown hook configured"),
            },
        }
    }

    fn fan_power_ok(&mut self) -> bool {
        match &self.hooks.fan_power {
            Some(cmd) => match self.runner.run(cmd) {
                Ok(out) => out.success(),
                Err(e) => {
                    warn!(hook = "fan_power", error = %e, "board hook failed, assuming power on");
                    true
                }
            },
            None => true,
        }
    }

    fn fan_rearm_requested(&mut self) -> bool {
        match &self.hooks.fan_rearm {
            Some(cmd) => self.query_flag("fan_rearm", cmd),
            None => false,
        }
    }

    fn kick_watchdog(&mut self) {
        if let Some(cmd) = &self.hooks.watchdog {
            self.fire("watchdog", cmd);
        }
    }
}
