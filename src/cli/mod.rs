/// CLI argument parsing and command handling - Gateway
mod args;
mod commands;
mod repl;

pub use args::{Cli, Commands};
pub use commands::{
    ask_chain, descriptor_from_cli, handle_command, list_providers, open_from_cli, show_version,
    stream_to_stdout,
};
pub use repl::run_chat;
