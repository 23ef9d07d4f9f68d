use async_trait::async_trait;
use futures::{future, stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::frames;
use super::traits::Backend;
use super::types::{ChunkStream, Message, MessageRole, ModelDescriptor};
use crate::constants::{
    ASSISTANT_MARKER, DEFAULT_LOCAL_ARGS, DEFAULT_LOCAL_COMMAND, DEFAULT_LOCAL_HOST,
    HEALTH_CHECK_TIMEOUT_SECS, HTTP_CONNECT_TIMEOUT_SECS, HTTP_REQUEST_TIMEOUT_SECS,
    LOCAL_STARTUP_POLL_MILLIS, LOCAL_STARTUP_TIMEOUT_SECS, SYSTEM_MARKER, USER_MARKER,
};
use crate::utils::{ColloquyError, Result};

/// A local model server, loaded once and shared by every generation run
///
/// The engine (`litgpt serve` by default) keeps the weights in memory between
/// prompts. It is started lazily on the first generation; if a server already
/// answers at the configured host it is used as-is.
pub struct LocalEngine {
    command: String,
    model: String,
    args: Vec<String>,
    base_url: String,
    port: u16,
    client: Client,
    server: OnceCell<ServerHandle>,
}

struct ServerHandle {
    /// The engine process we launched; `None` when attached to a running server.
    /// Killed when the engine is dropped.
    _process: Option<Mutex<Child>>,
}

#[derive(Debug, Deserialize)]
struct PredictFrame {
    #[serde(default)]
    output: String,
}

impl LocalEngine {
    pub fn load(descriptor: &ModelDescriptor) -> Result<Self> {
        // modelpath wins over model, matching the selection file convention
        let model = match descriptor.modelpath.as_deref() {
            Some(path) if !path.trim().is_empty() => {
                if !Path::new(path).exists() {
                    return Err(ColloquyError::BackendUnavailable(format!(
                        "model path '{}' does not exist",
                        path
                    )));
                }
                path.to_string()
            }
            _ => descriptor.require("modelpath", &descriptor.model)?.to_string(),
        };

        let base_url = descriptor
            .host
            .as_deref()
            .unwrap_or(DEFAULT_LOCAL_HOST)
            .trim_end_matches('/')
            .to_string();
        let port = Url::parse(&base_url)
            .ok()
            .and_then(|url| url.port_or_known_default())
            .ok_or_else(|| {
                ColloquyError::Configuration(format!("invalid local engine host '{}'", base_url))
            })?;

        let args = descriptor.args.clone().unwrap_or_else(|| {
            DEFAULT_LOCAL_ARGS.iter().map(|a| a.to_string()).collect()
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ColloquyError::BackendUnavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            command: descriptor
                .command
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCAL_COMMAND.to_string()),
            model,
            args,
            base_url,
            port,
            client,
            server: OnceCell::new(),
        })
    }

    fn launch_args(&self) -> Vec<String> {
        let port = self.port.to_string();
        self.args
            .iter()
            .map(|a| a.replace("{model}", &self.model).replace("{port}", &port))
            .collect()
    }

    /// Make sure the model server is up; only the first call does any work
    pub async fn ensure_started(&self) -> Result<()> {
        self.server.get_or_try_init(|| self.start()).await.map(|_| ())
    }

    async fn start(&self) -> Result<ServerHandle> {
        if self.is_healthy().await {
            info!("Using local engine already running at {}", self.base_url);
            return Ok(ServerHandle { _process: None });
        }

        let executable = which::which(&self.command).map_err(|e| {
            ColloquyError::BackendUnavailable(format!("local engine '{}' not found: {}", self.command, e))
        })?;

        info!("Loading local model {} via {}", self.model, executable.display());
        let mut child = Command::new(&executable)
            .args(self.launch_args())
            .stdin(Stdio::null())
            // Answers go to stdout; engine chatter must not interleave with them
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ColloquyError::BackendUnavailable(format!("failed to start local engine: {}", e))
            })?;

        let deadline = Instant::now() + Duration::from_secs(LOCAL_STARTUP_TIMEOUT_SECS);
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(ColloquyError::BackendUnavailable(format!(
                    "local engine exited during startup with {}",
                    status
                )));
            }
            if self.is_healthy().await {
                break;
            }
            if Instant::now() >= deadline {
                return Err(ColloquyError::BackendUnavailable(format!(
                    "local engine did not become ready within {}s",
                    LOCAL_STARTUP_TIMEOUT_SECS
                )));
            }
            tokio::time::sleep(Duration::from_millis(LOCAL_STARTUP_POLL_MILLIS)).await;
        }

        info!("Local model {} ready at {}", self.model, self.base_url);
        Ok(ServerHandle {
            _process: Some(Mutex::new(child)),
        })
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Local engine health check failed: {}", e);
                false
            }
        }
    }

    async fn predict(&self, prompt: String) -> Result<ChunkStream> {
        let url = format!("{}/predict", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| ColloquyError::from_http(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Local engine error response: status={} body={}", status, body);
            return Err(ColloquyError::Generation(format!(
                "local engine error ({}): {}",
                status, body
            )));
        }

        let bytes = response
            .bytes_stream()
            .map_err(|e| ColloquyError::Generation(format!("local engine stream: {}", e)));

        Ok(frames::lines(bytes)
            .try_filter_map(|line| future::ready(parse_output(&line)))
            .boxed())
    }
}

/// Decode one streamed `{"output": ...}` line
fn parse_output(line: &str) -> Result<Option<String>> {
    let frame: PredictFrame = serde_json::from_str(line)
        .map_err(|e| ColloquyError::Generation(format!("malformed local engine frame: {}", e)))?;
    Ok(Some(frame.output).filter(|output| !output.is_empty()))
}

/// Backend for a model run on this machine
///
/// The engine has no chat protocol, so history is flattened into a single
/// prompt with role markers.
pub struct LocalBackend {
    engine: Arc<LocalEngine>,
}

impl LocalBackend {
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> Result<Self> {
        Ok(Self::with_engine(Arc::new(LocalEngine::load(descriptor)?)))
    }

    pub fn with_engine(engine: Arc<LocalEngine>) -> Self {
        Self { engine }
    }
}

/// Flatten a history into one prompt, ending with an open assistant cue
pub fn flatten_prompt(history: &[Message]) -> String {
    let mut out = String::new();
    for msg in history {
        let marker = match msg.role {
            MessageRole::System => SYSTEM_MARKER,
            MessageRole::User => USER_MARKER,
            MessageRole::Assistant => ASSISTANT_MARKER,
        };
        out.push_str(marker);
        out.push_str(&msg.content);
        out.push('\n');
    }
    out.push_str(ASSISTANT_MARKER);
    out
}

#[async_trait]
impl Backend for LocalBackend {
    fn generate(&self, history: Vec<Message>) -> ChunkStream {
        let prompt = flatten_prompt(&history);
        debug!(
            "Local request: model={} message_count={} prompt_len={}",
            self.engine.model,
            history.len(),
            prompt.len()
        );
        let engine = Arc::clone(&self.engine);

        let connect = async move {
            engine.ensure_started().await?;
            engine.predict(prompt).await
        };

        stream::once(connect).try_flatten().boxed()
    }

    fn name(&self) -> &str {
        &self.engine.model
    }

    fn is_local(&self) -> bool {
        true
    }

    /// Reachable now, or launchable on first use
    async fn validate_connection(&self) -> Result<bool> {
        Ok(self.engine.is_healthy().await || which::which(&self.engine.command).is_ok())
    }
}
