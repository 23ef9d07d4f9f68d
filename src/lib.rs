pub mod app;
pub mod cli;
pub mod constants;
pub mod models;
pub mod session;
pub mod utils;

pub use app::load_descriptor;
pub use models::{default_registry, Backend, BackendRegistry, Message, MessageRole, ModelDescriptor};
pub use session::{create_root_session, open_session, AnswerStream, ConversationNode, TurnPhase};
pub use utils::ColloquyError;
