/// Constants module to avoid magic numbers in the codebase

// Provider identifiers (the `internalprovider` key of a model descriptor)
pub const PROVIDER_OLLAMA: &str = "ollama";
pub const PROVIDER_LITELLM: &str = "litellm";
pub const PROVIDER_LITGPT: &str = "litgpt";

// Network Configuration
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_LITELLM_PROXY_URL: &str = "http://localhost:4000";

// Timeouts
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 600; // 10 minutes for large model requests
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const HEALTH_CHECK_TIMEOUT_SECS: u64 = 3;

// Local engine
pub const DEFAULT_LOCAL_COMMAND: &str = "litgpt";
pub const DEFAULT_LOCAL_ARGS: &[&str] = &["serve", "{model}", "--port", "{port}", "--stream", "true"];
pub const DEFAULT_LOCAL_HOST: &str = "http://127.0.0.1:8000";
pub const LOCAL_STARTUP_TIMEOUT_SECS: u64 = 600; // Loading weights can take minutes
pub const LOCAL_STARTUP_POLL_MILLIS: u64 = 500;

// Prompt flattening markers
pub const SYSTEM_MARKER: &str = "[SYSTEM] ";
pub const USER_MARKER: &str = "[USER] ";
pub const ASSISTANT_MARKER: &str = "[ASSISTANT] ";

// Configuration discovery
pub const DESCRIPTOR_FILE_NAMES: &[&str] = &["model_select.json", "model_select.toml"];
pub const ENV_PREFIX: &str = "COLLOQUY_";
pub const APP_NAME: &str = "colloquy";
