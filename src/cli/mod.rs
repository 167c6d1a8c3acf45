//! Command-line interface definitions for the `gantry` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `gantry` binary.
#[derive(Debug, Parser)]
#[command(
    name = "gantry",
    about = "Provision rental GPU pods and drive finetune and inference runs over SSH",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the full experiment: finetune, then inference.
    #[command(name = "run", about = "Run the finetune and inference phases of an experiment")]
    Run(RunCommand),
    /// Start the tracker pod and tunnel its dashboard locally.
    #[command(name = "dashboard", about = "Open the experiment dashboard via an SSH tunnel")]
    Dashboard(DashboardCommand),
    /// Terminate a pod by name.
    #[command(name = "down", about = "Terminate a pod by its logical name")]
    Down(DownCommand),
}

/// Arguments for the `gantry run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Path to the master experiment config (YAML).
    #[arg(value_name = "CONFIG")]
    pub(crate) config_path: String,
    /// Keep the pods running after their phase completes.
    #[arg(long)]
    pub(crate) keep: bool,
}

/// Arguments for the `gantry dashboard` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DashboardCommand {
    /// Override the local port the dashboard is forwarded to.
    #[arg(long, value_name = "PORT")]
    pub(crate) local_port: Option<u16>,
}

/// Arguments for the `gantry down` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DownCommand {
    /// Logical name of the pod to terminate.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}
