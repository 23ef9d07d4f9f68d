use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::models::{Backend, ChunkStream, Message, MessageRole};
use crate::utils::ColloquyError;

/// Backend double that replays fixed chunks and records how it was called
pub struct ScriptedBackend {
    chunks: Vec<String>,
    fail_after: Option<usize>,
    unavailable: bool,
    calls: AtomicUsize,
    last_history: Mutex<Vec<Message>>,
}

impl ScriptedBackend {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            fail_after: None,
            unavailable: false,
            calls: AtomicUsize::new(0),
            last_history: Mutex::new(Vec::new()),
        }
    }

    /// Yield `n` chunks, then fail with a generation error
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new(&[])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_history(&self) -> Vec<Message> {
        self.last_history.lock().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn generate(&self, history: Vec<Message>) -> ChunkStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_history.lock() = history;

        if self.unavailable {
            return stream::iter(vec![Err(ColloquyError::BackendUnavailable(
                "scripted backend is offline".to_string(),
            ))])
            .boxed();
        }

        let mut items: Vec<Result<String, ColloquyError>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(ColloquyError::Generation("scripted failure".to_string())));
        }
        stream::iter(items).boxed()
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }
}

/// Project messages onto (role, content) for comparisons that ignore timestamps
pub fn roles_and_text(messages: &[Message]) -> Vec<(MessageRole, String)> {
    messages
        .iter()
        .map(|m| (m.role, m.content.clone()))
        .collect()
}
