use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sp-cli")]
#[command(about = "Script player line-mode driver")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Mode,
}

#[derive(Debug, Subcommand)]
pub enum Mode {
    /// Play the built-in demo script interactively.
    Play(PlayArgs),
    /// Validate and pretty-print a saved state file.
    State(StateArgs),
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// Load from this file when it exists; `:save` writes back to it.
    #[arg(long = "state-file")]
    pub state_file: Option<PathBuf>,
    /// Render step and choice text with HTML markup.
    #[arg(long)]
    pub rich: bool,
}

#[derive(Debug, Args)]
pub struct StateArgs {
    #[arg(long = "state-file")]
    pub state_file: PathBuf,
}
