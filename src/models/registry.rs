use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::local::LocalBackend;
use super::ollama::OllamaBackend;
use super::traits::Backend;
use super::types::ModelDescriptor;
use super::unified::GatewayBackend;
use crate::constants::{PROVIDER_LITELLM, PROVIDER_LITGPT, PROVIDER_OLLAMA};
use crate::utils::{ColloquyError, Result};

/// Builds a backend from a descriptor
pub type Constructor = fn(&ModelDescriptor) -> Result<Arc<dyn Backend>>;

/// Maps `internalprovider` identifiers to backend constructors
///
/// Backends are selected once, here; nothing downstream branches on the
/// provider name. New backends are added with [`BackendRegistry::register`].
#[derive(Clone)]
pub struct BackendRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// A registry with every built-in backend
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(PROVIDER_OLLAMA, build_ollama);
        registry.register(PROVIDER_LITELLM, build_gateway);
        registry.register(PROVIDER_LITGPT, build_local);
        registry
    }

    /// Register (or replace) the constructor for a provider identifier
    pub fn register(&mut self, provider: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(provider.into(), constructor);
    }

    /// Build the backend named by `descriptor.internalprovider`
    pub fn construct(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Backend>> {
        let provider = descriptor.internalprovider.trim();
        let constructor = self
            .constructors
            .get(provider)
            .ok_or_else(|| ColloquyError::UnknownProvider(provider.to_string()))?;

        debug!("Constructing {} backend for {}", provider, descriptor.label());
        constructor(descriptor)
    }

    /// Known provider identifiers, sorted
    pub fn providers(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

fn build_ollama(descriptor: &ModelDescriptor) -> Result<Arc<dyn Backend>> {
    Ok(Arc::new(OllamaBackend::from_descriptor(descriptor)?))
}

fn build_gateway(descriptor: &ModelDescriptor) -> Result<Arc<dyn Backend>> {
    Ok(Arc::new(GatewayBackend::from_descriptor(descriptor)?))
}

fn build_local(descriptor: &ModelDescriptor) -> Result<Arc<dyn Backend>> {
    Ok(Arc::new(LocalBackend::from_descriptor(descriptor)?))
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

static DEFAULT_REGISTRY: Lazy<BackendRegistry> = Lazy::new(BackendRegistry::with_builtin);

/// Process-wide registry holding the built-in backends
pub fn default_registry() -> &'static BackendRegistry {
    &DEFAULT_REGISTRY
}
