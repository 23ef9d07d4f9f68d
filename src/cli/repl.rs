use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::models::MessageRole;
use crate::session::ConversationNode;
use crate::utils::log_warn;

use super::commands::stream_to_stdout;

/// What a line typed at the chat prompt means
#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Question(&'a str),
    History,
    Back,
    Reset,
    Help,
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse_input(line: &str) -> ChatInput<'_> {
    let line = line.trim();
    match line {
        "" => ChatInput::Empty,
        "/history" => ChatInput::History,
        "/back" => ChatInput::Back,
        "/reset" => ChatInput::Reset,
        "/help" => ChatInput::Help,
        "/quit" | "/exit" => ChatInput::Quit,
        cmd if cmd.starts_with('/') => ChatInput::Unknown(cmd),
        question => ChatInput::Question(question),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /history  show the conversation so far");
    println!("  /back     undo the last turn (the next question branches from there)");
    println!("  /reset    start over from the beginning");
    println!("  /quit     leave");
}

fn print_history(node: &ConversationNode) {
    for msg in node.history_list() {
        let label = match msg.role {
            MessageRole::System => "system".magenta(),
            MessageRole::User => "you".cyan(),
            MessageRole::Assistant => "assistant".green(),
        };
        println!("{}: {}", label.bold(), msg.content);
    }
}

/// Interactive chat loop over stdin
///
/// A failed turn leaves the conversation where it was, so the question can
/// simply be asked again.
pub async fn run_chat(root: ConversationNode) -> Result<()> {
    println!(
        "Chatting with {}. Type /help for commands, /quit to leave.",
        root.backend().name().cyan()
    );

    let mut current = root;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", ">".bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };

        match parse_input(&line) {
            ChatInput::Empty => {}
            ChatInput::Quit => return Ok(()),
            ChatInput::Help => print_help(),
            ChatInput::History => print_history(&current),
            ChatInput::Back => match current.parent() {
                Some(parent) => current = parent,
                None => println!("Already at the start of the conversation."),
            },
            ChatInput::Reset => {
                while let Some(parent) = current.parent() {
                    current = parent;
                }
            }
            ChatInput::Unknown(cmd) => println!("Unknown command {}. Try /help.", cmd),
            ChatInput::Question(question) => {
                let mut next = current.ask(question)?;
                match stream_to_stdout(&mut next).await {
                    Ok(()) => current = next,
                    Err(e) => {
                        log_warn("[TURN]", format!("{:#}", e));
                        println!("{} {:#}", "[ERROR]".red(), e);
                    }
                }
            }
        }
    }
}
