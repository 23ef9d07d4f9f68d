use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::frames::{self, Frame};
use super::traits::Backend;
use super::types::{ChunkStream, Message, ModelDescriptor};
use crate::constants::{
    DEFAULT_OLLAMA_HOST, HEALTH_CHECK_TIMEOUT_SECS, HTTP_CONNECT_TIMEOUT_SECS,
    HTTP_REQUEST_TIMEOUT_SECS,
};
use crate::utils::{ColloquyError, Result};

/// Backend for an Ollama server's native chat API
///
/// Ollama understands multi-turn chat, so history is forwarded as a
/// role/content array and the reply is read as newline-delimited JSON.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Options>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatFrame {
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct FrameMessage {
    #[serde(default)]
    content: String,
}

impl OllamaBackend {
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> Result<Self> {
        let model = descriptor.require("model", &descriptor.model)?.to_string();
        let base_url = descriptor
            .host
            .as_deref()
            .unwrap_or(DEFAULT_OLLAMA_HOST)
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ColloquyError::BackendUnavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            model,
            temperature: descriptor.temperature,
        })
    }

    fn build_request(&self, history: &[Message]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: true,
            options: self.temperature.map(|temperature| Options { temperature }),
        }
    }
}

/// Decode one NDJSON frame; the `done` frame closes the answer
fn parse_frame(line: &str) -> Result<Option<Frame>> {
    let frame: ChatFrame = serde_json::from_str(line)
        .map_err(|e| ColloquyError::Generation(format!("malformed Ollama frame: {}", e)))?;

    if let Some(error) = frame.error {
        return Err(ColloquyError::Generation(format!("Ollama: {}", error)));
    }
    if frame.done {
        return Ok(Some(Frame::End));
    }

    Ok(frame
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty())
        .map(Frame::Chunk))
}

#[async_trait]
impl Backend for OllamaBackend {
    fn generate(&self, history: Vec<Message>) -> ChunkStream {
        let request = self.build_request(&history);
        let client = self.client.clone();
        let url = format!("{}/api/chat", self.base_url);

        let connect = async move {
            debug!(
                "Ollama request: url={} model={} message_count={}",
                url,
                request.model,
                request.messages.len()
            );

            let response = client
                .post(&url)
                .json(&request)
                .send()
                .await
                .map_err(|e| ColloquyError::from_http(e, &url))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!("Ollama error response: status={} body={}", status, body);
                // A missing model cannot be loaded, everything else failed mid-request
                return Err(if status == StatusCode::NOT_FOUND {
                    ColloquyError::BackendUnavailable(format!(
                        "Ollama model '{}' not found: {}. Try: ollama pull {}",
                        request.model, body, request.model
                    ))
                } else {
                    ColloquyError::Generation(format!("Ollama API error ({}): {}", status, body))
                });
            }

            let bytes = response
                .bytes_stream()
                .map_err(|e| ColloquyError::Generation(format!("Ollama stream: {}", e)));

            Ok(frames::until_end(
                frames::lines(bytes).try_filter_map(|line| future::ready(parse_frame(&line))),
                "Ollama",
            ))
        };

        stream::once(connect).try_flatten().boxed()
    }

    fn name(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        self.base_url.contains("localhost") || self.base_url.contains("127.0.0.1")
    }

    async fn validate_connection(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(r) => Ok(r.status().is_success()),
            Err(e) => {
                debug!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(host: Option<&str>) -> ModelDescriptor {
        ModelDescriptor {
            internalprovider: "ollama".to_string(),
            model: Some("llama3.2:1b".to_string()),
            host: host.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_url() {
        let b = OllamaBackend::from_descriptor(&descriptor(None)).unwrap();
        assert_eq!(b.base_url, "http://localhost:11434");
        assert!(b.is_local());
    }

    #[test]
    fn test_custom_url_trailing_slash() {
        let b = OllamaBackend::from_descriptor(&descriptor(Some("http://192.168.1.100:11434/")))
            .unwrap();
        assert_eq!(b.base_url, "http://192.168.1.100:11434");
        assert!(!b.is_local());
    }

    #[test]
    fn test_missing_model_is_configuration_error() {
        let mut d = descriptor(None);
        d.model = None;
        assert!(matches!(
            OllamaBackend::from_descriptor(&d),
            Err(ColloquyError::Configuration(_))
        ));
    }

    #[test]
    fn test_request_forwards_history_structurally() {
        let mut d = descriptor(None);
        d.temperature = Some(0.2);
        let b = OllamaBackend::from_descriptor(&d).unwrap();
        let history = vec![
            Message::system("be brief"),
            Message::user("Hi"),
            Message::assistant("Hello"),
        ];

        let body = serde_json::to_value(b.build_request(&history)).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["content"], "Hello");
        assert!((body["options"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_request_omits_options_without_temperature() {
        let b = OllamaBackend::from_descriptor(&descriptor(None)).unwrap();
        let body = serde_json::to_value(b.build_request(&[Message::user("Hi")])).unwrap();
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_frame_with_content() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(parse_frame(line).unwrap(), Some(Frame::Chunk("Hel".to_string())));
    }

    #[test]
    fn test_done_frame_ends_answer() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_frame(line).unwrap(), Some(Frame::End));
    }

    #[tokio::test]
    async fn test_reply_cut_before_done_is_generation_error() {
        let body = stream::iter(vec![Ok(bytes::Bytes::from_static(
            b"{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
        ))]);
        let mut out = frames::until_end(
            frames::lines(body).try_filter_map(|line| future::ready(parse_frame(&line))),
            "Ollama",
        );

        assert_eq!(out.next().await.unwrap().unwrap(), "Hel");
        assert!(matches!(
            out.next().await,
            Some(Err(ColloquyError::Generation(_)))
        ));
    }

    #[test]
    fn test_error_frame_is_generation_error() {
        let line = r#"{"error":"model runner has unexpectedly stopped"}"#;
        assert!(matches!(parse_frame(line), Err(ColloquyError::Generation(_))));
    }

    #[test]
    fn test_garbage_frame_is_generation_error() {
        assert!(matches!(parse_frame("not json"), Err(ColloquyError::Generation(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_backend_unavailable() {
        // Port 9 (discard) is essentially never listening on loopback
        let b = OllamaBackend::from_descriptor(&descriptor(Some("http://127.0.0.1:9"))).unwrap();
        let mut stream = b.generate(vec![Message::user("Hi")]);
        match stream.next().await {
            Some(Err(ColloquyError::BackendUnavailable(_))) => {}
            other => panic!("Expected BackendUnavailable, got {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }
}
