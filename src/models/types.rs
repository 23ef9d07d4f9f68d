use chrono::{DateTime, Local};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::ColloquyError;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Lazy sequence of answer chunks produced by one generation run
pub type ChunkStream = BoxStream<'static, Result<String, ColloquyError>>;

/// Describes which backend to build and how to reach it
///
/// Mirrors the `model_select` file: `internalprovider` picks the backend
/// variant, the remaining keys are backend-specific.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Backend variant identifier (ollama, litellm, litgpt)
    pub internalprovider: String,
    /// Human-friendly label for this selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localname: Option<String>,
    /// Upstream provider the gateway should route to (e.g. "ollama", "openai")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Filesystem location of a local model checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modelpath: Option<String>,
    /// Server URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// System prompt seeded into the root of every session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Local engine executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Local engine launch arguments; `{model}` and `{port}` are substituted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl ModelDescriptor {
    pub fn new(internalprovider: impl Into<String>) -> Self {
        Self {
            internalprovider: internalprovider.into(),
            ..Default::default()
        }
    }

    /// Fetch a required backend-specific key, rejecting missing or blank values
    pub fn require<'a>(
        &self,
        key: &str,
        value: &'a Option<String>,
    ) -> Result<&'a str, ColloquyError> {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ColloquyError::Configuration(format!(
                "provider '{}' requires the '{}' key",
                self.internalprovider, key
            ))),
        }
    }

    /// Label for display: localname, else model, else modelpath
    pub fn label(&self) -> &str {
        self.localname
            .as_deref()
            .or(self.model.as_deref())
            .or(self.modelpath.as_deref())
            .unwrap_or(&self.internalprovider)
    }
}
