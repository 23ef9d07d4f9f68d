use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "colloquy")]
#[command(version)]
#[command(about = "Chat with any LLM backend, one streamed turn at a time", long_about = None)]
pub struct Cli {
    /// Path to the model selection file (model_select.json or .toml)
    #[arg(short, long, global = true, env = "COLLOQUY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// System prompt for the conversation (overrides the selection file)
    #[arg(short, long, global = true)]
    pub system: Option<String>,

    /// Ask a single question and exit
    #[arg(short, long)]
    pub prompt: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session (default)
    Chat,
    /// Ask questions in order, each one seeing the previous answers
    Ask {
        /// Questions to ask
        #[arg(required = true)]
        questions: Vec<String>,
    },
    /// Show the selected model and check that its backend is reachable
    Status,
    /// List the backends that can be selected with `internalprovider`
    Providers,
    /// Write an example model_select.toml in the current directory
    Init,
    /// Show version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_chat() {
        let cli = Cli::try_parse_from(["colloquy"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.prompt.is_none());
    }

    #[test]
    fn test_ask_collects_questions() {
        let cli = Cli::try_parse_from([
            "colloquy",
            "--system",
            "Be brief",
            "ask",
            "I am a person who is sitting here.",
            "Who is the person who is sitting here?",
        ])
        .unwrap();

        assert_eq!(cli.system.as_deref(), Some("Be brief"));
        match cli.command {
            Some(Commands::Ask { questions }) => assert_eq!(questions.len(), 2),
            other => panic!("Expected ask, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["colloquy", "status", "--verbose", "-c", "sel.json"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config.unwrap(), PathBuf::from("sel.json"));
    }
}
