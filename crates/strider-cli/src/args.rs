//! Command-line interface for the `strider` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{InputKind, StriderConfig};

/// Legged-robot policy control loop
///
/// With no subcommand, `strider` runs the control loop using the run flags.
#[derive(Debug, Parser)]
#[command(name = "strider", version, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

impl Cli {
    /// The subcommand to dispatch; bare flags mean `run`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Run(self.run))
    }
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Run the control loop (default)
    Run(RunArgs),

    /// Serve the telemetry relay and browser viewer
    Relay {
        /// Listening port (defaults to `relay_port` from the config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List the built-in robot profiles
    Profiles,

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Args)]
pub struct RunArgs {
    /// Robot profile name (see `strider profiles`)
    #[arg(long)]
    pub profile: Option<String>,

    /// Linear policy weights (JSON)
    #[arg(long, value_name = "PATH")]
    pub policy: Option<PathBuf>,

    /// Command sources, comma separated: keyboard, joystick, network
    #[arg(long = "input", value_name = "LIST", value_delimiter = ',', value_parser = parse_input)]
    pub inputs: Option<Vec<InputKind>>,

    /// Stop after this many seconds (0 runs until stopped)
    #[arg(long = "duration", value_name = "SECS", value_parser = parse_duration)]
    pub duration_s: Option<f64>,

    /// Write a JSON-lines run log to PATH
    #[arg(long, value_name = "PATH")]
    pub record: Option<PathBuf>,

    /// Telemetry relay URL (enables the bridge)
    #[arg(long = "bridge", value_name = "URL", conflicts_with = "no_bridge")]
    pub bridge_url: Option<String>,

    /// Run without the telemetry bridge
    #[arg(long)]
    pub no_bridge: bool,
}

impl RunArgs {
    /// Overlay the flags the operator passed onto `cfg`.
    pub fn apply(&self, cfg: &mut StriderConfig) {
        if let Some(profile) = &self.profile {
            cfg.profile = profile.clone();
        }
        if let Some(policy) = &self.policy {
            cfg.policy_path = Some(policy.clone());
        }
        if let Some(inputs) = &self.inputs {
            cfg.inputs.clear();
            for kind in inputs {
                if !cfg.inputs.contains(kind) {
                    cfg.inputs.push(*kind);
                }
            }
        }
        if let Some(duration) = self.duration_s {
            cfg.max_duration_s = duration;
        }
        if let Some(record) = &self.record {
            cfg.record_path = Some(record.clone());
        }
        if let Some(url) = &self.bridge_url {
            cfg.bridge_url = url.clone();
            cfg.bridge_enabled = true;
        }
        if self.no_bridge {
            cfg.bridge_enabled = false;
        }
    }
}

fn parse_input(raw: &str) -> Result<InputKind, String> {
    InputKind::parse(raw).ok_or_else(|| format!("unknown input source '{}' (keyboard, joystick, network)", raw.trim()))
}

fn parse_duration(raw: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .ok_or_else(|| format!("'{raw}' is not a non-negative number of seconds"))
}
