//! Acoustic Engine CLI
//!
//! Offline front end for the spatial audio engine.

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::info;

use acoustic_engine::cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Acoustic Engine v{}", acoustic_engine::VERSION_STRING);

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Acoustic Engine v{}", acoustic_engine::VERSION_STRING);
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Render {
            input,
            output,
            config,
            params,
            tail,
            bits,
        } => commands::render(&input, &output, &config, &params, tail, bits),
        Commands::Scenarios { config, json } => commands::list_scenarios(&config, json),
        Commands::ShowConfig { config } => commands::show_config(&config),
    }
}
