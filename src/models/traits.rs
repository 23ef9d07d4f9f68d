use async_trait::async_trait;

use super::types::{ChunkStream, Message};
use crate::utils::Result;

/// Core trait that all generation backends must implement
///
/// A backend is shared (behind an `Arc`) by every node of a session tree, so
/// any expensive setup belongs in its constructor, not in `generate`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start one generation run for the given history
    ///
    /// The returned stream is lazy: no request is made until it is first
    /// polled. It yields answer chunks in order and ends when the answer is
    /// complete. Reconnection failures surface as `BackendUnavailable`,
    /// anything after that as `Generation`.
    fn generate(&self, history: Vec<Message>) -> ChunkStream;

    /// Get the name of the model
    fn name(&self) -> &str;

    /// Check if this is a local model (no API calls)
    fn is_local(&self) -> bool;

    /// Validate that the backend is reachable
    async fn validate_connection(&self) -> Result<bool> {
        Ok(true)
    }
}
