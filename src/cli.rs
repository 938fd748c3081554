use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "covrun",
    about = "Supervised test runs with crash-safe coverage extraction",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch a monitored target and extract coverage when it ends
    Run {
        /// The target program to execute
        program: String,

        /// Arguments passed through to the target
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// Working directory for the target
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Override the coverage artifact directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Show project configuration
    Config {
        /// Emit JSON instead of the human-readable view
        #[arg(long)]
        json: bool,
    },
}
