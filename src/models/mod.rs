// Gateway module for models - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod frames;
mod local;
mod ollama;
mod registry;
mod traits;
mod types;
mod unified;

// Public re-exports - the ONLY way to access model functionality
pub use local::{flatten_prompt, LocalBackend, LocalEngine};
pub use ollama::OllamaBackend;
pub use registry::{default_registry, BackendRegistry, Constructor};
pub use traits::Backend;
pub use types::{ChunkStream, Message, MessageRole, ModelDescriptor};
pub use unified::GatewayBackend;
