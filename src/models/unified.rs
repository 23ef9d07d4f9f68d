use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::frames::{self, Frame};
use super::traits::Backend;
use super::types::{ChunkStream, Message, ModelDescriptor};
use crate::constants::{
    DEFAULT_LITELLM_PROXY_URL, HEALTH_CHECK_TIMEOUT_SECS, HTTP_CONNECT_TIMEOUT_SECS,
    HTTP_REQUEST_TIMEOUT_SECS,
};
use crate::utils::{ColloquyError, Result};

/// Unified model implementation using LiteLLM Proxy
/// ALL providers go through the same OpenAI-compatible interface
pub struct GatewayBackend {
    client: Client,
    proxy_url: String,
    model_name: String,
    master_key: Option<String>,
    temperature: Option<f32>,
}

impl GatewayBackend {
    /// Create a gateway backend from a descriptor
    ///
    /// Proxy URL priority: descriptor `host` > `LITELLM_PROXY_URL` > default.
    /// Master key priority: `LITELLM_MASTER_KEY` > descriptor `api_key` > none.
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> Result<Self> {
        let model = descriptor.require("model", &descriptor.model)?;
        let model_name = qualified_model_name(descriptor.provider.as_deref(), model);

        let proxy_url = descriptor
            .host
            .clone()
            .or_else(|| std::env::var("LITELLM_PROXY_URL").ok())
            .unwrap_or_else(|| DEFAULT_LITELLM_PROXY_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let master_key = std::env::var("LITELLM_MASTER_KEY")
            .ok()
            .or_else(|| descriptor.api_key.clone());

        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ColloquyError::BackendUnavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            proxy_url,
            model_name,
            master_key,
            temperature: descriptor.temperature,
        })
    }

    fn request_body(&self, history: &[Message]) -> serde_json::Value {
        // Build OpenAI-compatible messages array
        let messages: Vec<serde_json::Value> = history
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.as_str(),
                    "content": msg.content
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model_name,
            "messages": messages,
            "stream": true,
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    /// Check if this model uses a local provider
    fn is_local_provider(&self) -> bool {
        self.model_name.starts_with("ollama/")
            || self.model_name.starts_with("local/")
            || self.model_name.starts_with("llamafile/")
    }
}

/// Route `model` through `provider` unless it is already qualified
fn qualified_model_name(provider: Option<&str>, model: &str) -> String {
    match provider {
        Some(p) if !p.is_empty() && !model.contains('/') => format!("{}/{}", p, model),
        _ => model.to_string(),
    }
}

/// Decode one SSE data payload; `[DONE]` closes the answer
fn parse_event(data: &str) -> Result<Option<Frame>> {
    if data == "[DONE]" {
        return Ok(Some(Frame::End));
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ColloquyError::Generation(format!("malformed gateway event: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(ColloquyError::Generation(format!("LiteLLM proxy: {}", error.message)));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty())
        .map(Frame::Chunk))
}

/// Decode an SSE body into answer frames
fn event_frames<S>(body: S) -> impl futures::Stream<Item = Result<Frame>> + Send + 'static
where
    S: futures::Stream<Item = Result<bytes::Bytes>> + Send + 'static,
{
    frames::lines(body)
        .try_filter_map(|line| future::ready(Ok(frames::sse_data(&line).map(str::to_string))))
        .try_filter_map(|data| future::ready(parse_event(&data)))
}

#[async_trait]
impl Backend for GatewayBackend {
    fn generate(&self, history: Vec<Message>) -> ChunkStream {
        let body = self.request_body(&history);
        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.proxy_url))
            .json(&body);

        // Add authentication header if master key is available
        if let Some(key) = &self.master_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let proxy_url = self.proxy_url.clone();
        let message_count = history.len();
        let model_name = self.model_name.clone();

        let connect = async move {
            debug!(
                "Gateway request: proxy={} model={} message_count={}",
                proxy_url, model_name, message_count
            );

            let response = request.send().await.map_err(|e| {
                ColloquyError::from_http(
                    e,
                    &format!("LiteLLM proxy at {}. Is the proxy running?", proxy_url),
                )
            })?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                warn!("LiteLLM proxy error: status={} body={}", status, error_text);
                return Err(ColloquyError::Generation(format!(
                    "LiteLLM proxy error ({}): {}",
                    status, error_text
                )));
            }

            let bytes = response
                .bytes_stream()
                .map_err(|e| ColloquyError::Generation(format!("gateway stream: {}", e)));

            Ok(frames::until_end(event_frames(bytes), "LiteLLM proxy"))
        };

        stream::once(connect).try_flatten().boxed()
    }

    fn name(&self) -> &str {
        &self.model_name
    }

    fn is_local(&self) -> bool {
        self.is_local_provider()
    }

    async fn validate_connection(&self) -> Result<bool> {
        let health_url = format!("{}/health", self.proxy_url);

        let mut request = self
            .client
            .get(&health_url)
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS));
        if let Some(key) = &self.master_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("Gateway health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

// Response structures for LiteLLM proxy (OpenAI format)

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor {
            internalprovider: "litellm".to_string(),
            provider: Some("ollama".to_string()),
            model: Some("llama3.2:1b".to_string()),
            host: Some("http://localhost:4000/".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_model_name_is_qualified_by_provider() {
        assert_eq!(qualified_model_name(Some("ollama"), "llama3"), "ollama/llama3");
        assert_eq!(qualified_model_name(Some("openai"), "anthropic/claude-3"), "anthropic/claude-3");
        assert_eq!(qualified_model_name(None, "gpt-4o"), "gpt-4o");
        assert_eq!(qualified_model_name(Some(""), "gpt-4o"), "gpt-4o");
    }

    #[test]
    fn test_from_descriptor() {
        let backend = GatewayBackend::from_descriptor(&descriptor()).unwrap();
        assert_eq!(backend.name(), "ollama/llama3.2:1b");
        assert_eq!(backend.proxy_url, "http://localhost:4000");
        assert!(backend.is_local());
    }

    #[test]
    fn test_missing_model() {
        let mut d = descriptor();
        d.model = None;
        assert!(matches!(
            GatewayBackend::from_descriptor(&d),
            Err(ColloquyError::Configuration(_))
        ));
    }

    #[test]
    fn test_request_body() {
        let mut d = descriptor();
        d.temperature = Some(0.5);
        let backend = GatewayBackend::from_descriptor(&d).unwrap();
        let body = backend.request_body(&[Message::user("Hi"), Message::assistant("Hello")]);

        assert_eq!(body["model"], "ollama/llama3.2:1b");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn test_parse_event() {
        let data = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_event(data).unwrap(), Some(Frame::Chunk("Hel".to_string())));
        assert_eq!(parse_event("[DONE]").unwrap(), Some(Frame::End));

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_event(role_only).unwrap(), None);

        let error = r#"{"error":{"message":"rate limited"}}"#;
        assert!(matches!(parse_event(error), Err(ColloquyError::Generation(_))));
    }

    fn sse_body(parts: &[&'static str]) -> impl futures::Stream<Item = Result<bytes::Bytes>> + Send + 'static {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(bytes::Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_stream_ends_at_done() {
        let body = sse_body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n",
        ]);
        let chunks: Vec<String> = frames::until_end(event_frames(body), "LiteLLM proxy")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_stream_cut_before_done_is_generation_error() {
        let body = sse_body(&["data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"]);
        let result: Result<Vec<String>> = frames::until_end(event_frames(body), "LiteLLM proxy")
            .try_collect()
            .await;
        assert!(matches!(result, Err(ColloquyError::Generation(_))));
    }
}
