use futures::stream::{FusedStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use super::node::{ConversationNode, TurnPhase};
use crate::models::ChunkStream;
use crate::utils::{ColloquyError, Result};

enum StreamState {
    /// Nothing polled yet; the node's phase decides what happens
    Idle,
    Generating(ChunkStream),
    Finished,
}

/// Pull-based stream of answer chunks for one node
///
/// Chunks arrive in generation order. The concatenated answer is recorded
/// on the node only when the backend stream is exhausted; an error or an
/// early drop leaves the node PENDING with nothing recorded. While a stream
/// is generating, other streams over the same node get `NotReady`.
pub struct AnswerStream<'a> {
    node: &'a mut ConversationNode,
    state: StreamState,
    buffer: String,
}

impl<'a> AnswerStream<'a> {
    pub(crate) fn new(node: &'a mut ConversationNode) -> Self {
        Self {
            node,
            state: StreamState::Idle,
            buffer: String::new(),
        }
    }
}

impl Stream for AnswerStream<'_> {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                StreamState::Idle => match this.node.phase() {
                    TurnPhase::Answered => {
                        // Replay, never regenerate
                        this.state = StreamState::Finished;
                        let answer = this.node.complete_answer();
                        return Poll::Ready(match answer {
                            Ok(answer) if answer.is_empty() => None,
                            other => Some(other),
                        });
                    }
                    TurnPhase::Root => {
                        this.state = StreamState::Finished;
                        return Poll::Ready(Some(Err(ColloquyError::InvalidInput(
                            "nothing has been asked on the conversation root".to_string(),
                        ))));
                    }
                    TurnPhase::Pending => {
                        if let Err(e) = this.node.begin_generation() {
                            this.state = StreamState::Finished;
                            return Poll::Ready(Some(Err(e)));
                        }
                        let history = this.node.history_list();
                        debug!(
                            "Generating answer with {} ({} messages of history)",
                            this.node.backend().name(),
                            history.len()
                        );
                        this.state = StreamState::Generating(this.node.backend().generate(history));
                    }
                },
                StreamState::Generating(chunks) => match chunks.poll_next_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Some(Ok(chunk))) => {
                        this.buffer.push_str(&chunk);
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Poll::Ready(Some(Err(e))) => {
                        warn!("Generation aborted after {} bytes: {}", this.buffer.len(), e);
                        this.node.abandon_generation();
                        this.state = StreamState::Finished;
                        this.buffer.clear();
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        this.state = StreamState::Finished;
                        let answer = std::mem::take(&mut this.buffer);
                        debug!("Answer complete ({} bytes)", answer.len());
                        let committed = this.node.commit_answer(answer);
                        if committed.is_err() {
                            this.node.abandon_generation();
                        }
                        return Poll::Ready(committed.err().map(Err));
                    }
                },
                StreamState::Finished => return Poll::Ready(None),
            }
        }
    }
}

// An abandoned stream releases its claim so the turn can be generated again
impl Drop for AnswerStream<'_> {
    fn drop(&mut self) {
        if matches!(self.state, StreamState::Generating(_)) {
            self.node.abandon_generation();
        }
    }
}

impl FusedStream for AnswerStream<'_> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, StreamState::Finished)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::MessageRole;
    use crate::session::testing::{roles_and_text, ScriptedBackend};
    use crate::session::{create_root_session, TurnPhase};
    use crate::utils::ColloquyError;
    use futures::{StreamExt, TryStreamExt};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hi_hello_scenario() {
        let backend = Arc::new(ScriptedBackend::new(&["Hel", "lo"]));
        let root = create_root_session(backend.clone());

        let mut child = root.ask("Hi").unwrap();
        assert_eq!(
            roles_and_text(&child.history_list()),
            vec![(MessageRole::User, "Hi".to_string())]
        );

        let chunks: Vec<String> = child.stream_answer().try_collect().await.unwrap();
        assert_eq!(chunks, vec!["Hel", "lo"]);
        assert_eq!(chunks.concat(), "Hello");
        assert_eq!(child.phase(), TurnPhase::Answered);
        assert_eq!(
            roles_and_text(&child.history_list()),
            vec![
                (MessageRole::User, "Hi".to_string()),
                (MessageRole::Assistant, "Hello".to_string()),
            ]
        );

        let grandchild = child.ask("Who are you?").unwrap();
        assert_eq!(
            roles_and_text(&grandchild.history_list()),
            vec![
                (MessageRole::User, "Hi".to_string()),
                (MessageRole::Assistant, "Hello".to_string()),
                (MessageRole::User, "Who are you?".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_ask_is_lazy() {
        let backend = Arc::new(ScriptedBackend::new(&["x"]));
        let root = create_root_session(backend.clone());

        let mut child = root.ask("Hi").unwrap();
        assert_eq!(backend.calls(), 0);

        // Creating the stream is not enough either; polling is
        let stream = child.stream_answer();
        drop(stream);
        assert_eq!(backend.calls(), 0);
        assert_eq!(child.phase(), TurnPhase::Pending);
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let backend = Arc::new(ScriptedBackend::new(&["a", "b", "c"]));
        let root = create_root_session(backend.clone());
        let mut child = root.ask("Spell it").unwrap();

        let first: Vec<String> = child.stream_answer().try_collect().await.unwrap();
        let second: Vec<String> = child.stream_answer().try_collect().await.unwrap();

        assert_eq!(first.concat(), "abc");
        assert_eq!(second, vec!["abc"]);
        assert_eq!(backend.calls(), 1);
        // The answer is registered once, not once per replay
        assert_eq!(child.own_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_abort_commits_nothing() {
        let backend = Arc::new(ScriptedBackend::new(&["one ", "two ", "three"]));
        let root = create_root_session(backend.clone());
        let mut child = root.ask("Count").unwrap();

        {
            let mut stream = child.stream_answer();
            assert_eq!(stream.next().await.unwrap().unwrap(), "one ");
        }

        assert!(matches!(child.complete_answer(), Err(ColloquyError::NotReady(_))));
        assert_eq!(child.phase(), TurnPhase::Pending);
        assert_eq!(child.own_messages().len(), 1);

        // An aborted turn can be generated again from scratch
        let answer = child.answer().await.unwrap();
        assert_eq!(answer, "one two three");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_generation_error_commits_nothing() {
        let backend = Arc::new(ScriptedBackend::new(&["partial", "never"]).failing_after(1));
        let root = create_root_session(backend.clone());
        let mut child = root.ask("Hi").unwrap();

        let mut stream = child.stream_answer();
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(matches!(
            stream.next().await,
            Some(Err(ColloquyError::Generation(_)))
        ));
        assert!(stream.next().await.is_none());
        drop(stream);

        assert_eq!(child.phase(), TurnPhase::Pending);
        assert!(matches!(child.complete_answer(), Err(ColloquyError::NotReady(_))));
        assert_eq!(child.history_list().len(), 1);

        // Ancestors stay usable for a fresh question
        let retry = root.ask("Hi again").unwrap();
        assert_eq!(retry.history_list().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_surfaces() {
        let backend = Arc::new(ScriptedBackend::unavailable());
        let root = create_root_session(backend);
        let mut child = root.ask("Hi").unwrap();

        let result = child.answer().await;
        assert!(matches!(result, Err(ColloquyError::BackendUnavailable(_))));
        assert_eq!(child.phase(), TurnPhase::Pending);
    }

    #[tokio::test]
    async fn test_backend_receives_full_history() {
        let backend = Arc::new(ScriptedBackend::new(&["ok"]));
        let root = create_root_session(backend.clone());
        root.record_system_turn(Some("Be terse.")).unwrap();

        let mut first = root.ask("One").unwrap();
        first.answer().await.unwrap();
        let mut second = first.ask("Two").unwrap();
        second.answer().await.unwrap();

        assert_eq!(
            roles_and_text(&backend.last_history()),
            vec![
                (MessageRole::System, "Be terse.".to_string()),
                (MessageRole::User, "One".to_string()),
                (MessageRole::Assistant, "ok".to_string()),
                (MessageRole::User, "Two".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_history_length_along_chain_with_siblings() {
        let backend = Arc::new(ScriptedBackend::new(&["answer"]));
        let mut node = create_root_session(backend);

        for n in 1..=5 {
            // A sibling branch that must not leak into the main line
            let mut sibling = node.ask("side question").unwrap();
            sibling.answer().await.unwrap();

            let mut next = node.ask(&format!("question {}", n)).unwrap();
            assert_eq!(next.history_list().len(), 2 * n - 1);
            next.answer().await.unwrap();
            assert_eq!(next.history_list().len(), 2 * n);

            let history = next.history_list();
            for (i, msg) in history.iter().enumerate() {
                let expected = if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                assert_eq!(msg.role, expected);
            }
            assert!(history.iter().all(|m| m.content != "side question"));
            node = next;
        }
    }

    #[tokio::test]
    async fn test_empty_answer() {
        let backend = Arc::new(ScriptedBackend::new(&[]));
        let root = create_root_session(backend.clone());
        let mut child = root.ask("Say nothing").unwrap();

        let chunks: Vec<String> = child.stream_answer().try_collect().await.unwrap();
        assert!(chunks.is_empty());
        assert_eq!(child.phase(), TurnPhase::Answered);
        assert_eq!(child.complete_answer().unwrap(), "");
        // Empty content is not registered
        assert_eq!(child.own_messages().len(), 1);

        let replay: Vec<String> = child.stream_answer().try_collect().await.unwrap();
        assert!(replay.is_empty());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_streaming_root_is_invalid() {
        let mut root = create_root_session(Arc::new(ScriptedBackend::new(&["x"])));
        let result: Result<Vec<String>, _> = root.stream_answer().try_collect().await;
        assert!(matches!(result, Err(ColloquyError::InvalidInput(_))));
    }
}
