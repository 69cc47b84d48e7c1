//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "avrbridge.toml";

#[derive(Parser)]
#[command(name = "avrbridge")]
#[command(
    author,
    version,
    about = "GDB server for AVR8 targets on EDBG debug tools",
    long_about = None
)]
pub struct Cli {
    /// Verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML format)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open the debug tool and serve GDB clients
    Serve {
        /// TCP port to listen on (overrides the configuration file)
        #[arg(short, long)]
        port: Option<u16>,

        /// Target description file, or a directory holding <target>.atdf
        #[arg(short, long)]
        description_file: Option<PathBuf>,
    },

    /// List supported debug tools and the ones currently connected
    ListTools,

    /// Show what a target description file defines
    TargetInfo {
        /// Path to the .atdf file
        file: PathBuf,
    },
}
