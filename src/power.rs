//! Board power control.
//!
//! The `on` and `off` entries are opaque: they are split on whitespace and
//! run as-is, with no shell in between.

use std::fmt;
use std::str::FromStr;

use crate::board::BoardConfig;
use crate::error::{ConfigError, ToolError};
use crate::process::Cmd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
}

impl PowerAction {
    fn key(self) -> &'static str {
        match self {
            PowerAction::On => "on",
            PowerAction::Off => "off",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(PowerAction::On),
            "off" => Ok(PowerAction::Off),
            other => Err(format!("expected 'on' or 'off', got '{other}'")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("power {action} for board '{board}': {source}")]
    Tool {
        board: String,
        action: PowerAction,
        source: ToolError,
    },
}

/// The command for `action`, split into program and arguments.
pub fn power_command(board: &BoardConfig, action: PowerAction) -> Result<Cmd, ConfigError> {
    let line = match action {
        PowerAction::On => board.on_command.as_deref(),
        PowerAction::Off => board.off_command.as_deref(),
    };
    let missing = || ConfigError::MissingKey {
        section: board.name.clone(),
        key: action.key().to_string(),
    };
    let mut words = line.ok_or_else(missing)?.split_whitespace();
    let program = words.next().ok_or_else(missing)?;
    Ok(Cmd::new(program).args(words))
}

pub fn run_power_command(board: &BoardConfig, action: PowerAction) -> Result<(), PowerError> {
    let cmd = power_command(board, action)?;
    log::info!("power {action} '{}': {}", board.name, cmd.display());
    cmd.run_interactive().map_err(|source| PowerError::Tool {
        board: board.name.clone(),
        action,
        source,
    })
}
