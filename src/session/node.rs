use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::stream::AnswerStream;
use crate::models::{Backend, BackendRegistry, Message, MessageRole, ModelDescriptor};
use crate::utils::{ColloquyError, Result};

/// Where a node is in its single question/answer turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Conversation root: holds only seeded system messages, never answers
    Root,
    /// Question recorded, answer not yet produced
    Pending,
    /// Answer produced and recorded; terminal
    Answered,
}

#[derive(Debug)]
struct NodeData {
    messages: Vec<Message>,
    phase: TurnPhase,
    answer: Option<String>,
    /// An answer stream has claimed this PENDING node
    generating: bool,
    /// A question has been asked on this node; its messages are frozen
    has_children: bool,
}

/// Shared part of a node
///
/// Children keep their parent alive through this `Arc`; they only ever read
/// through it. Messages are written at most twice (question, answer) and
/// never once the node is ANSWERED or has children.
#[derive(Debug)]
struct NodeState {
    parent: Option<Arc<NodeState>>,
    data: RwLock<NodeData>,
}

impl NodeState {
    fn new(parent: Option<Arc<NodeState>>, phase: TurnPhase) -> Self {
        Self {
            parent,
            data: RwLock::new(NodeData {
                messages: Vec::new(),
                phase,
                answer: None,
                generating: false,
                has_children: false,
            }),
        }
    }
}

// Unlink long chains iteratively so dropping a deep conversation cannot
// overflow the stack through nested Arc drops.
impl Drop for NodeState {
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(parent) = next {
            match Arc::try_unwrap(parent) {
                Ok(mut state) => next = state.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// One turn of a conversation, linked to the turns before it
///
/// Asking a question never edits an existing node: it creates a child whose
/// history is this node's history plus the new question. Older nodes can be
/// kept and asked again to branch the conversation.
pub struct ConversationNode {
    state: Arc<NodeState>,
    backend: Arc<dyn Backend>,
}

/// Start a new conversation answered by `backend`
pub fn create_root_session(backend: Arc<dyn Backend>) -> ConversationNode {
    ConversationNode::root(backend)
}

/// Build the backend named by `descriptor` and start a conversation with it
///
/// The descriptor's `system` prompt, if any, is seeded into the root.
pub fn open_session(
    registry: &BackendRegistry,
    descriptor: &ModelDescriptor,
) -> Result<ConversationNode> {
    let backend = registry.construct(descriptor)?;
    let root = ConversationNode::root(backend);
    root.record_system_turn(descriptor.system.as_deref())?;
    Ok(root)
}

impl ConversationNode {
    pub fn root(backend: Arc<dyn Backend>) -> Self {
        Self {
            state: Arc::new(NodeState::new(None, TurnPhase::Root)),
            backend,
        }
    }

    /// Ask a question in the context of this node
    ///
    /// Returns a PENDING child holding the question. The backend is not
    /// contacted until the child's answer stream is polled. A node whose own
    /// answer is still PENDING cannot be asked yet (`NotReady`).
    pub fn ask(&self, question: &str) -> Result<ConversationNode> {
        validate_question(Some(question))?;

        {
            let mut data = self.state.data.write();
            if data.phase == TurnPhase::Pending {
                return Err(ColloquyError::NotReady(
                    "this turn has not been answered yet".to_string(),
                ));
            }
            data.has_children = true;
        }

        let child = ConversationNode {
            state: Arc::new(NodeState::new(Some(Arc::clone(&self.state)), TurnPhase::Pending)),
            backend: Arc::clone(&self.backend),
        };
        child.record_user_turn(Some(question))?;

        debug!("Asked question at depth {}", child.depth());
        Ok(child)
    }

    /// Stream this node's answer
    ///
    /// The first full drain generates and records the answer; later calls
    /// replay the recorded answer as a single chunk. Dropping the stream
    /// early records nothing.
    pub fn stream_answer(&mut self) -> AnswerStream<'_> {
        AnswerStream::new(self)
    }

    /// Drain the answer stream and return the complete answer
    pub async fn answer(&mut self) -> Result<String> {
        use futures::TryStreamExt;

        self.stream_answer().try_collect::<Vec<String>>().await?;
        self.complete_answer()
    }

    /// The recorded answer; only available once the node is ANSWERED
    pub fn complete_answer(&self) -> Result<String> {
        let data = self.state.data.read();
        match (&data.phase, &data.answer) {
            (TurnPhase::Answered, Some(answer)) => Ok(answer.clone()),
            (phase, _) => Err(ColloquyError::NotReady(format!(
                "node is {:?}, answer has not been fully generated",
                phase
            ))),
        }
    }

    /// Full conversation up to and including this node, oldest first
    ///
    /// Walks the parent chain iteratively and returns a fresh copy.
    pub fn history_list(&self) -> Vec<Message> {
        let mut chain = Vec::new();
        let mut cursor = Some(&self.state);
        while let Some(state) = cursor {
            chain.push(state);
            cursor = state.parent.as_ref();
        }

        let mut history = Vec::new();
        for state in chain.into_iter().rev() {
            history.extend(state.data.read().messages.iter().cloned());
        }
        history
    }

    /// Messages registered on this node only
    pub fn own_messages(&self) -> Vec<Message> {
        self.state.data.read().messages.clone()
    }

    /// Record the question of a freshly created PENDING node
    ///
    /// A node holds exactly one question; further turns go through [`ask`](Self::ask).
    pub fn record_user_turn(&self, question: Option<&str>) -> Result<()> {
        let question = validate_question(question)?;
        let mut data = self.state.data.write();
        if data.phase != TurnPhase::Pending || !data.messages.is_empty() {
            return Err(ColloquyError::InvalidInput(format!(
                "a {} node cannot take another question",
                describe(&data)
            )));
        }
        data.messages.push(Message::user(question));
        Ok(())
    }

    /// Record the answer of a PENDING node, marking it ANSWERED
    ///
    /// Missing or empty content is ignored and leaves the node PENDING.
    pub fn record_assistant_turn(&self, answer: Option<&str>) -> Result<()> {
        match answer.filter(|a| !a.is_empty()) {
            Some(answer) => self.settle(answer.to_string(), false),
            None => Ok(()),
        }
    }

    /// Append a system message to a root that has not been asked anything yet
    ///
    /// Missing or empty content is ignored.
    pub fn record_system_turn(&self, text: Option<&str>) -> Result<()> {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return Ok(());
        };
        let mut data = self.state.data.write();
        if data.phase != TurnPhase::Root || data.has_children {
            return Err(ColloquyError::InvalidInput(format!(
                "system turns belong on an unasked root, not a {} node",
                describe(&data)
            )));
        }
        data.messages.push(Message::system(text));
        Ok(())
    }

    /// Claim this node for one generation run
    pub(crate) fn begin_generation(&self) -> Result<()> {
        let mut data = self.state.data.write();
        let phase = data.phase;
        match phase {
            TurnPhase::Pending if !data.generating => {
                data.generating = true;
                Ok(())
            }
            TurnPhase::Pending => Err(ColloquyError::NotReady(
                "another stream is already generating this answer".to_string(),
            )),
            _ => Err(ColloquyError::InvalidInput(format!(
                "a {} node has nothing to generate",
                describe(&data)
            ))),
        }
    }

    /// Release a claim without recording anything
    pub(crate) fn abandon_generation(&self) {
        self.state.data.write().generating = false;
    }

    /// Record the fully generated answer of a claimed node
    pub(crate) fn commit_answer(&self, answer: String) -> Result<()> {
        self.settle(answer, true)
    }

    fn settle(&self, answer: String, claimed: bool) -> Result<()> {
        let mut data = self.state.data.write();
        if data.phase != TurnPhase::Pending || data.generating != claimed {
            return Err(ColloquyError::InvalidInput(format!(
                "cannot record an answer on a {} node",
                describe(&data)
            )));
        }
        if !answer.is_empty() {
            data.messages.push(Message::assistant(answer.as_str()));
        }
        data.phase = TurnPhase::Answered;
        data.answer = Some(answer);
        data.generating = false;
        Ok(())
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.data.read().phase
    }

    pub fn is_root(&self) -> bool {
        self.state.parent.is_none()
    }

    /// Number of ancestors between this node and the root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.state.parent.as_ref();
        while let Some(state) = cursor {
            depth += 1;
            cursor = state.parent.as_ref();
        }
        depth
    }

    /// A handle to the previous turn, for branching
    pub fn parent(&self) -> Option<ConversationNode> {
        self.state.parent.as_ref().map(|parent| ConversationNode {
            state: Arc::clone(parent),
            backend: Arc::clone(&self.backend),
        })
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

impl fmt::Debug for ConversationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationNode")
            .field("backend", &self.backend.name())
            .field("depth", &self.depth())
            .field("phase", &self.phase())
            .field("own_messages", &self.state.data.read().messages.len())
            .finish()
    }
}

fn describe(data: &NodeData) -> &'static str {
    match data.phase {
        TurnPhase::Root if data.has_children => "root (already asked)",
        TurnPhase::Root => "root",
        TurnPhase::Pending if data.generating => "generating",
        TurnPhase::Pending => "pending",
        TurnPhase::Answered => "answered",
    }
}

fn validate_question(question: Option<&str>) -> Result<&str> {
    match question {
        Some(q) if !q.trim().is_empty() => Ok(q),
        _ => Err(ColloquyError::InvalidInput(
            "question must not be empty".to_string(),
        )),
    }
}
