//! Loading of imported and included stylesheet modules.

use crate::error::XsltError;
use std::path::Path;
use std::sync::Arc;
use trellis_traits::ResourceProvider;

pub const MAX_IMPORT_DEPTH: usize = 100;

/// A loaded stylesheet module.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// The resolved URI, used for cycle detection and as the base of nested
    /// references.
    pub uri: String,
    pub source: String,
}

pub trait StylesheetResolver {
    fn load(&self, href: &str, base_uri: Option<&str>) -> Result<LoadedModule, XsltError>;
}

/// Resolves modules through a [`ResourceProvider`].
#[derive(Debug, Clone)]
pub struct ProviderResolver {
    provider: Arc<dyn ResourceProvider>,
}

impl ProviderResolver {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }
}

impl StylesheetResolver for ProviderResolver {
    fn load(&self, href: &str, base_uri: Option<&str>) -> Result<LoadedModule, XsltError> {
        let uri = resolve_uri(href, base_uri);
        log::debug!("Loading stylesheet module '{}' from {}", uri, self.provider.describe());
        let bytes = self
            .provider
            .load(&uri)
            .map_err(|e| XsltError::import(href, e.to_string()))?;
        let source = std::str::from_utf8(&bytes)
            .map_err(|e| XsltError::import(href, format!("Invalid UTF-8: {}", e)))?
            .to_string();
        Ok(LoadedModule { uri, source })
    }
}

/// Used when a stylesheet is compiled without any way to load further modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

impl StylesheetResolver for NoResolver {
    fn load(&self, href: &str, _base_uri: Option<&str>) -> Result<LoadedModule, XsltError> {
        Err(XsltError::import(href, "no resource provider configured"))
    }
}

pub fn resolve_uri(href: &str, base_uri: Option<&str>) -> String {
    if href.starts_with('/') || href.contains("://") {
        return href.to_string();
    }

    match base_uri {
        Some(base) => {
            let base_dir = Path::new(base).parent().unwrap_or(Path::new(""));
            let resolved = base_dir.join(href);
            normalize_path(&resolved.to_string_lossy())
        }
        None => normalize_path(href),
    }
}

fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    if path.starts_with('/') {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}
