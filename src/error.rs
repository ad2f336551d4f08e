use thiserror::Error;
use trellis_xslt::XsltError;

/// Errors of the high-level transformation API and the CLI.
#[derive(Error, Debug)]
pub enum TrellisError {
    #[error("Transformation failed: {0}")]
    Xslt(#[from] XsltError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TrellisError {
    /// True when the stylesheet itself could not be loaded or compiled.
    pub fn is_compile_error(&self) -> bool {
        matches!(self, TrellisError::Xslt(e) if e.is_compile_error())
    }
}
