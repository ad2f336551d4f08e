//! Where stylesheet modules come from.
//!
//! `xsl:import` and `xsl:include` name other modules by a relative URI. The
//! compiler resolves that URI against the importing module and asks a
//! [`ResourceProvider`] for the bytes, so it never touches the filesystem itself.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource '{0}' lies outside the provider's base directory")]
    OutsideBase(String),

    #[error("Failed to load resource '{path}': {message}")]
    LoadFailed { path: String, message: String },
}

/// The raw bytes of a module, shared between the provider and its callers.
pub type ModuleBytes = Arc<[u8]>;

/// Serves modules by a normalized, `/`-separated path.
pub trait ResourceProvider: Send + Sync + Debug {
    fn load(&self, path: &str) -> Result<ModuleBytes, ResourceError>;

    fn exists(&self, path: &str) -> bool {
        self.load(path).is_ok()
    }

    /// A short description for log lines, e.g. the base directory.
    fn describe(&self) -> String;
}

/// Modules registered up front, for tests and for embedding stylesheets in a binary.
#[derive(Debug, Default, Clone)]
pub struct InMemoryResourceProvider {
    modules: HashMap<String, ModuleBytes>,
}

impl InMemoryResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, data: impl AsRef<[u8]>) -> Self {
        self.insert(path, data);
        self
    }

    /// Registers a module, replacing any earlier one at the same path.
    pub fn insert(&mut self, path: impl Into<String>, data: impl AsRef<[u8]>) {
        self.modules.insert(path.into(), Arc::from(data.as_ref()));
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl<K: Into<String>, V: AsRef<[u8]>> FromIterator<(K, V)> for InMemoryResourceProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |provider, (path, data)| provider.with(path, data))
    }
}

impl ResourceProvider for InMemoryResourceProvider {
    fn load(&self, path: &str) -> Result<ModuleBytes, ResourceError> {
        self.modules
            .get(path)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    fn describe(&self) -> String {
        format!("memory ({} modules)", self.modules.len())
    }
}
