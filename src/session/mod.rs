/// Conversation chains and answer streaming - Gateway

mod node;
mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use node::{create_root_session, open_session, ConversationNode, TurnPhase};
pub use stream::AnswerStream;
