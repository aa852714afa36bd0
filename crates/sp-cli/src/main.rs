use std::fs;

use clap::Parser;
use sp_cli::cli_args::{Cli, Mode, PlayArgs, StateArgs};
use sp_cli::demo::{demo_player, demo_property_tags, demo_step_tags};
use sp_cli::line_mode::run_line_mode;
use sp_runtime::PlayerState;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Mode::Play(args) => play(args),
        Mode::State(args) => inspect_state(args),
    }
}

fn play(args: PlayArgs) -> anyhow::Result<()> {
    let mut player = demo_player()?;
    if let Some(path) = &args.state_file {
        if path.exists() {
            let json = fs::read_to_string(path)?;
            player.set_state_from_json(&json)?;
        }
    }
    run_line_mode(&mut player, args.state_file.as_deref(), args.rich)
}

fn inspect_state(args: StateArgs) -> anyhow::Result<()> {
    let json = fs::read_to_string(&args.state_file)?;
    let state = PlayerState::from_json(&json, &demo_step_tags(), &demo_property_tags())?;
    println!(
        "{}",
        state.to_json(&demo_step_tags(), &demo_property_tags())?
    );
    Ok(())
}
