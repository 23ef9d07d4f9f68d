use anyhow::Result;
use clap::Parser;

use colloquy::{
    cli::{ask_chain, handle_command, open_from_cli, run_chat, Cli, Commands},
    utils::init_logger,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logger(cli.verbose);

    // One-shot mode
    if let Some(prompt) = cli.prompt.clone() {
        if cli.command.is_some() {
            anyhow::bail!("--prompt cannot be combined with a subcommand");
        }
        let root = open_from_cli(&cli)?;
        ask_chain(&root, &[prompt]).await?;
        return Ok(());
    }

    let command = cli.command.clone().unwrap_or(Commands::Chat);
    if handle_command(&cli, &command).await? {
        return Ok(());
    }

    let root = open_from_cli(&cli)?;
    run_chat(root).await
}
