use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::{APP_NAME, DESCRIPTOR_FILE_NAMES, ENV_PREFIX};
use crate::models::ModelDescriptor;

/// Find the model selection file
///
/// Walks upward from `start` and returns the first directory entry named
/// like a selection file; falls back to the per-user config directory.
pub fn find_descriptor_file(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        for name in DESCRIPTOR_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let config_dir = get_config_dir().ok()?;
    DESCRIPTOR_FILE_NAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Load the model descriptor
///
/// Sources, later ones winning: the selection file (explicit path, or the
/// one found by [`find_descriptor_file`]), then `COLLOQUY_`-prefixed
/// environment variables (e.g. `COLLOQUY_MODEL`).
pub fn load_descriptor(explicit: Option<&Path>) -> Result<ModelDescriptor> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let cwd = std::env::current_dir().context("Could not determine current directory")?;
            find_descriptor_file(&cwd)
        }
    };

    let mut figment = Figment::new();

    if let Some(path) = &path {
        if !path.is_file() {
            anyhow::bail!("Model selection file not found: {}", path.display());
        }
        debug!("Loading model selection from {}", path.display());
        figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX));

    figment.extract().with_context(|| match &path {
        Some(p) => format!("Failed to load model selection from {}", p.display()),
        None => format!(
            "No model selection found. Create {} (run `colloquy init`) or set {}INTERNALPROVIDER",
            DESCRIPTOR_FILE_NAMES[1], ENV_PREFIX
        ),
    })
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
        Ok(proj_dirs.config_dir().to_path_buf())
    } else {
        // Fallback to home directory
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        Ok(PathBuf::from(home).join(".config").join(APP_NAME))
    }
}

/// Save a descriptor as TOML
pub fn save_descriptor(descriptor: &ModelDescriptor, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_string = toml::to_string_pretty(descriptor)?;
    std::fs::write(path, toml_string)
        .with_context(|| format!("Failed to write model selection to {}", path.display()))?;
    Ok(())
}

/// Create an example selection file in `dir` if none exists
///
/// Returns the path written, or `None` when a file was already there.
pub fn init_descriptor(dir: &Path) -> Result<Option<PathBuf>> {
    let path = dir.join(DESCRIPTOR_FILE_NAMES[1]);
    if path.exists() {
        return Ok(None);
    }

    let example = r#"# Colloquy model selection
# internalprovider picks the backend: ollama, litellm or litgpt

localname = "Local Ollama"
provider = "ollama"
internalprovider = "ollama"
model = "llama3.2:1b"
host = "http://localhost:11434"

# system = "You are a helpful assistant."
# temperature = 0.7

# For litgpt, point at a checkpoint instead:
# internalprovider = "litgpt"
# modelpath = "checkpoints/Qwen/Qwen2.5-0.5B"
"#;
    std::fs::write(&path, example)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(Some(path))
}
