//! askbus CLI entry point.

use clap::Parser;

use askbus::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Ask(args) => commands::ask::execute(args, config_path, cli.json).await,
        Commands::Config(args) => commands::config::execute(args, config_path, cli.json).await,
    };

    if let Err(err) = result {
        askbus::cli::handle_error(err, cli.json);
    }
}
