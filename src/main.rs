use clap::Parser;
use stucco_rhai::cli::{Cli, default_command, execute};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    execute(cli.command.unwrap_or_else(default_command)).await
}
