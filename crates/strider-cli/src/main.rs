//! `strider-cli` – Strider Command Line Interface
//!
//! This binary is the operator's entry point.  It:
//!
//! 1. Loads `~/.strider/config.toml` (defaults when absent) and applies
//!    `STRIDER_*` environment overrides and command-line flags.
//! 2. `strider run` (default): builds the engine, policy, command sources and
//!    telemetry bridge for the configured robot profile, then runs the
//!    control loop until it completes, scrams, or Ctrl-C is pressed.
//! 3. `strider relay`: serves the telemetry relay and browser viewer.
//! 4. `strider profiles` / `strider config [--init]`: inspection helpers.

mod app;
mod args;
mod config;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use strider_input::StopSignal;
use strider_relay::RelayServer;
use strider_runtime::{RobotProfile, StopReason, init_tracing};
use strider_types::StriderError;
use tracing::{error, warn};

use args::{Cli, Command};
use config::StriderConfig;

fn main() -> ExitCode {
    // RUST_LOG filters (default "info"); STRIDER_LOG_FORMAT=json switches to
    // JSON lines; OTEL_EXPORTER_OTLP_ENDPOINT adds span export.
    let _guard = init_tracing("strider");

    let command = Cli::parse().into_command();

    let mut cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Run(run_args) => {
            run_args.apply(&mut cfg);
            run_loop(&cfg)
        }
        Command::Relay { port } => run_relay(&cfg, port.unwrap_or(cfg.relay_port)),
        Command::Profiles => {
            print_profiles();
            ExitCode::SUCCESS
        }
        Command::Config { init } => show_config(&cfg, init),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn run_loop(cfg: &StriderConfig) -> ExitCode {
    print_banner();

    let stop = StopSignal::new();
    let stop_for_ctrlc = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – zeroing torques and stopping …".yellow().bold());
        stop_for_ctrlc.stop();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the loop can only end by duration or scram");
    }

    println!("  Profile  {}", cfg.profile.bold());
    println!("  Inputs   {}", join(&cfg.inputs));
    if cfg.bridge_enabled {
        println!("  Bridge   {}", cfg.bridge_url.dimmed());
    }
    println!();

    match app::run(cfg, stop) {
        Ok(summary) => {
            let reason = match summary.reason {
                StopReason::Completed => "completed".green(),
                StopReason::Stopped => "stopped".yellow(),
                StopReason::Scram => "scram".red().bold(),
            };
            println!(
                "\n  {} {} after {:.1}s ({} ticks, {} policy steps, {} overruns)",
                "✓".green().bold(),
                reason,
                summary.elapsed.as_secs_f64(),
                summary.stats.ticks,
                summary.stats.policy_invocations,
                summary.stats.overruns
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(e: &StriderError) {
    if e.is_fatal() {
        error!(error = %e, "run aborted");
    }
    eprintln!("{}: {e}", "error".red().bold());
}

// ─────────────────────────────────────────────────────────────────────────────
// relay
// ─────────────────────────────────────────────────────────────────────────────

fn run_relay(cfg: &StriderConfig, port: u16) -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {e}", "error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    println!(
        "  Relay listening on {}  (viewer at {})",
        format!("ws://0.0.0.0:{port}/ws").bold(),
        format!("http://localhost:{port}/").cyan()
    );

    let server = RelayServer::new()
        .with_port(port)
        .with_command_rate(cfg.relay_command_rate);
    let result = runtime.block_on(async move {
        tokio::select! {
            result = server.run() => result,
            _ = tokio::signal::ctrl_c() => {
                println!("\n  {}", "Relay stopped.".green());
                Ok(())
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// profiles / config
// ─────────────────────────────────────────────────────────────────────────────

fn print_profiles() {
    for name in RobotProfile::NAMES {
        match RobotProfile::by_name(name) {
            Ok(p) => println!(
                "  {:<8} {} joints, dt {}s × {} decimation, {} obs × {} frames",
                p.name.bold(),
                p.num_joints(),
                p.dt,
                p.decimation,
                p.num_single_obs,
                p.frame_stack
            ),
            Err(e) => println!("  {:<8} {}", name.bold(), e.to_string().red()),
        }
    }
}

fn show_config(cfg: &StriderConfig, init: bool) -> ExitCode {
    let path = config::config_path();
    if init {
        if path.exists() {
            println!("  Config already exists at {}", path.display().to_string().bold());
        } else if let Err(e) = config::save(&StriderConfig::default()) {
            eprintln!("{}: {e}", "Error saving config".red());
            return ExitCode::FAILURE;
        } else {
            println!("  {} Config saved to {}", "✓".green().bold(), path.display().to_string().bold());
        }
    }
    println!("  {}", path.display().to_string().dimmed());
    println!("{cfg:#?}");
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______       _    __         "#.bold().cyan());
    println!("{}", r#"  / __/ /_____ (_)__/ /__ ____  "#.bold().cyan());
    println!("{}", r#" _\ \/ __/ __// / _  / -_) __/  "#.bold().cyan());
    println!("{}", r#"/___/\__/_/  /_/\_,_/\__/_/     "#.bold().cyan());
    println!();
    println!("  {} {}", "Strider".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Legged-robot policy control loop");
    println!();
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
