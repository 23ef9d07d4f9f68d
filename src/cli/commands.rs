use anyhow::{Context, Result};
use colored::Colorize;
use futures::StreamExt;
use std::io::Write;

use crate::{
    app::{init_descriptor, load_descriptor},
    models::{default_registry, ModelDescriptor},
    session::{open_session, ConversationNode},
    utils::{log_debug, log_error, log_info},
};

use super::{Cli, Commands};

/// Handle CLI subcommands other than interactive chat
///
/// Returns `false` when the caller should continue into the chat loop.
pub async fn handle_command(cli: &Cli, command: &Commands) -> Result<bool> {
    match command {
        Commands::Chat => Ok(false),
        Commands::Ask { questions } => {
            let root = open_from_cli(cli)?;
            ask_chain(&root, questions).await?;
            Ok(true)
        }
        Commands::Status => {
            show_status(cli).await?;
            Ok(true)
        }
        Commands::Providers => {
            list_providers();
            Ok(true)
        }
        Commands::Init => {
            let cwd = std::env::current_dir()?;
            match init_descriptor(&cwd)? {
                Some(path) => println!("Created example model selection at: {}", path.display()),
                None => println!("A model selection file already exists in {}", cwd.display()),
            }
            Ok(true)
        }
        Commands::Version => {
            show_version();
            Ok(true)
        }
    }
}

/// Load the descriptor named by the CLI flags, with `--system` applied
pub fn descriptor_from_cli(cli: &Cli) -> Result<ModelDescriptor> {
    let mut descriptor = load_descriptor(cli.config.as_deref())?;
    if let Some(system) = &cli.system {
        descriptor.system = Some(system.clone());
    }
    Ok(descriptor)
}

/// Build the backend and the conversation root for this invocation
pub fn open_from_cli(cli: &Cli) -> Result<ConversationNode> {
    let descriptor = descriptor_from_cli(cli)?;
    log_debug(
        "[MODEL]",
        format!("host={:?} model={:?}", descriptor.host, descriptor.model),
    );
    let root = open_session(default_registry(), &descriptor)
        .with_context(|| format!("Could not start a session with '{}'", descriptor.label()))?;
    log_info("[MODEL]", format!("{} via {}", descriptor.label(), descriptor.internalprovider));
    Ok(root)
}

/// Ask each question on the answer to the previous one, streaming answers to stdout
pub async fn ask_chain(root: &ConversationNode, questions: &[String]) -> Result<ConversationNode> {
    let mut current: Option<ConversationNode> = None;

    for question in questions {
        println!("{} {}", "Q:".bold(), question);
        print!("{} ", "A:".bold());
        std::io::stdout().flush()?;

        let mut next = current.as_ref().unwrap_or(root).ask(question)?;
        stream_to_stdout(&mut next).await?;
        current = Some(next);
    }

    current.context("No questions were asked")
}

/// Print an answer chunk by chunk as it is generated
pub async fn stream_to_stdout(node: &mut ConversationNode) -> Result<()> {
    let mut stdout = std::io::stdout();
    let mut stream = node.stream_answer();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                println!();
                return Err(e.into());
            }
        };
        print!("{}", chunk);
        stdout.flush()?;
    }

    println!();
    Ok(())
}

/// List the backends that can be selected
pub fn list_providers() {
    println!("Available backends (internalprovider):");
    for provider in default_registry().providers() {
        println!("  • {}", provider.green());
    }
}

/// Show version information
pub fn show_version() {
    println!("Colloquy v{}", env!("CARGO_PKG_VERSION"));
    println!("   Conversation chains over pluggable LLM backends");
}

/// Show the selected model and whether its backend answers
async fn show_status(cli: &Cli) -> Result<()> {
    println!("Colloquy Status:");
    println!();

    let descriptor = match descriptor_from_cli(cli) {
        Ok(d) => d,
        Err(e) => {
            log_error("[STATUS]", format!("model selection: {:#}", e));
            println!("  {} Model selection: {:#}", "[ERROR]".red(), e);
            return Ok(());
        }
    };

    println!("  Selection: {}", descriptor.label().cyan());
    println!("  Backend:   {}", descriptor.internalprovider);
    if let Some(model) = descriptor.model.as_deref().or(descriptor.modelpath.as_deref()) {
        println!("  Model:     {}", model);
    }
    if let Some(host) = &descriptor.host {
        println!("  Host:      {}", host);
    }

    match default_registry().construct(&descriptor) {
        Ok(backend) => match backend.validate_connection().await {
            Ok(true) => println!("  {} {} is reachable", "[OK]".green(), backend.name()),
            Ok(false) => println!("  {} {} is not responding", "[WARNING]".yellow(), backend.name()),
            Err(e) => {
                log_error("[STATUS]", &e);
                println!("  {} {}", "[ERROR]".red(), e);
            }
        },
        Err(e) => {
            log_error("[STATUS]", &e);
            println!("  {} {}", "[ERROR]".red(), e);
        }
    }

    println!();
    Ok(())
}
