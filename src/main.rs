//! avrbridge - GDB server for AVR8 targets
//!
//! Bridges avr-gdb to AVR8 microcontrollers through Microchip EDBG based
//! debug tools (Atmel-ICE, Power Debugger, the Xplained and Curiosity Nano
//! boards, PICkit 4 and Snap).
//!
//! # Architecture
//!
//! - **avrbridge-edbg** talks to the tool over USB HID and implements the
//!   AVR8 generic and AVRISP protocols
//! - **avrbridge-controller** owns the tool on a dedicated thread and
//!   serializes every target operation
//! - **avrbridge-gdb** serves GDB's remote serial protocol and forwards
//!   requests to the controller

mod cli;
mod commands;
mod config;

use clap::Parser;
use cli::{Cli, Commands};
use commands::ServeOverrides;
use config::Config;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::Serve {
            port,
            description_file,
        } => {
            let config = Config::load(&cli.config)?;
            log::debug!("Loaded configuration from {}", cli.config.display());
            commands::serve(
                &config,
                ServeOverrides {
                    port,
                    description_file,
                },
            )
        }
        Commands::ListTools => commands::list_tools(),
        Commands::TargetInfo { file } => commands::target_info(&file),
    }
}
