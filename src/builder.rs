use crate::config::TransformConfig;
use crate::error::TrellisError;
use crate::transformer::Transformer;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use trellis_traits::{FilesystemResourceProvider, ResourceProvider};
use trellis_xslt::transform::TransformOptions;
use trellis_xslt::{NoResolver, OutputSettings, ProviderResolver, compile};

/// A builder for creating a [`Transformer`].
#[derive(Default)]
pub struct TransformBuilder {
    source: Option<(String, String)>,
    provider: Option<Arc<dyn ResourceProvider>>,
    parameters: HashMap<String, String>,
    mode: Option<String>,
    output: Option<OutputSettings>,
}

impl TransformBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Loads the stylesheet from a file. Unless a resource provider was set,
    /// imports and includes are read from the file's directory.
    pub fn with_stylesheet_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TrellisError> {
        let path_ref = path.as_ref();
        let source = fs::read_to_string(path_ref).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to read stylesheet from '{}': {}", path_ref.display(), e),
            )
        })?;
        let uri = path_ref
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("stylesheet.xsl")
            .to_string();
        if self.provider.is_none() {
            let base = path_ref.parent().unwrap_or_else(|| Path::new("."));
            let base = if base.as_os_str().is_empty() { Path::new(".") } else { base };
            self.provider = Some(Arc::new(FilesystemResourceProvider::new(base)));
        }
        self.source = Some((source, uri));
        Ok(self)
    }

    /// Uses `source` as the principal stylesheet. `uri` names it in error
    /// messages and is the base for resolving its imports.
    pub fn with_stylesheet_source(mut self, source: &str, uri: &str) -> Self {
        self.source = Some((source.to_string(), uri.to_string()));
        self
    }

    /// Where `xsl:import` and `xsl:include` are loaded from.
    pub fn with_resource_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets a global parameter. `name` is the expanded name, `{uri}local`
    /// for a name in a namespace.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Output settings that take precedence over the stylesheet's `xsl:output`.
    pub fn with_output(mut self, output: OutputSettings) -> Self {
        self.output = Some(output);
        self
    }

    /// Applies a configuration file's settings.
    pub fn with_config(mut self, config: &TransformConfig) -> Result<Self, TrellisError> {
        if let Some(stylesheet) = &config.stylesheet {
            self = self.with_stylesheet_file(stylesheet)?;
        }
        for (name, value) in &config.parameters {
            self.parameters.insert(name.clone(), value.clone());
        }
        if let Some(mode) = &config.mode {
            self.mode = Some(mode.clone());
        }
        if let Some(output) = &config.output {
            match &mut self.output {
                Some(current) => current.merge(output),
                None => self.output = Some(output.clone()),
            }
        }
        Ok(self)
    }

    /// Compiles the stylesheet and creates the `Transformer`.
    pub fn build(self) -> Result<Transformer, TrellisError> {
        let (source, uri) = self.source.ok_or_else(|| {
            TrellisError::Config(
                "No stylesheet has been configured. Use `with_stylesheet_file` or `with_stylesheet_source`."
                    .to_string(),
            )
        })?;

        let stylesheet = match self.provider {
            Some(provider) => {
                log::debug!("Compiling '{}' with imports from {}", uri, provider.describe());
                compile(&source, &uri, &ProviderResolver::new(provider))?
            }
            None => compile(&source, &uri, &NoResolver)?,
        };
        log::info!(
            "Compiled '{}': {} actions, {} modules",
            uri,
            stylesheet.actions.len(),
            stylesheet.modules.len()
        );

        let options = TransformOptions {
            parameters: self.parameters,
            mode: self.mode,
            output: self.output,
        };
        Ok(Transformer::new(Arc::new(stylesheet), options))
    }
}
