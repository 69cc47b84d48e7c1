//! Man page generator for avrbridge
//!
//! Writes avrbridge.1 plus one page per subcommand (avrbridge-serve.1, ...).
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(command: clap::Command, path: &Path) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(command).render(&mut buffer)?;
    fs::write(path, buffer)?;
    println!("  {}", path.display());
    Ok(())
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("man"), PathBuf::from);
    fs::create_dir_all(&output_dir)?;

    let command = cli::Cli::command();
    let name = command.get_name().to_string();

    println!("Man pages generated:");
    for subcommand in command.get_subcommands() {
        let page = format!("{}-{}", name, subcommand.get_name());
        let subcommand = subcommand.clone().name(page.clone());
        render(subcommand, &output_dir.join(format!("{}.1", page)))?;
    }
    render(command, &output_dir.join(format!("{}.1", name)))?;

    println!("\nTo view a page:");
    println!("  man -l {}", output_dir.join(format!("{}.1", name)).display());
    Ok(())
}
