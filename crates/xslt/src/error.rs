use thiserror::Error;
use trellis_traits::ResourceError;

/// Where a compile fault was found in a stylesheet module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub uri: String,
    pub line: usize,
    pub col: usize,
}

impl Location {
    pub fn new(uri: &str, line: usize, col: usize) -> Self {
        Location {
            uri: uri.to_string(),
            line,
            col,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.uri.is_empty() {
            write!(f, "line {}, column {}", self.line, self.col)
        } else {
            write!(f, "{} line {}, column {}", self.uri, self.line, self.col)
        }
    }
}

#[derive(Error, Debug)]
pub enum XsltError {
    #[error("XML parsing error: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("Quick-XML error: {0}")]
    QuickXml(#[from] quick_xml::Error),

    #[error("XPath evaluation error: {0}")]
    XPath(#[from] trellis_xpath1::XPathError),

    #[error("Stylesheet compilation error: {message} at {location}")]
    Compile { message: String, location: Location },

    #[error("Circular import detected: {0}")]
    CircularImport(String),

    #[error("Import error for '{href}': {message}")]
    Import { href: String, message: String },

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Circular reference to variable '{0}'")]
    CircularVariable(String),

    #[error("Named template '{0}' does not exist")]
    UnknownNamedTemplate(String),

    #[error("Instruction '{0}' is not supported and has no fallback")]
    UnsupportedInstruction(String),

    #[error("Transformation terminated by xsl:message: {0}")]
    Terminated(String),

    #[error("Template execution error: {0}")]
    Execution(String),

    #[error("Invalid output settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 string error: {0}")]
    Utf8Str(#[from] std::str::Utf8Error),
}

impl XsltError {
    pub fn compile(message: impl Into<String>, location: Location) -> Self {
        Self::Compile {
            message: message.into(),
            location,
        }
    }

    pub fn import(href: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Import {
            href: href.into(),
            message: message.into(),
        }
    }

    pub fn circular_import(uri: impl Into<String>) -> Self {
        Self::CircularImport(uri.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// True for faults raised while reading or compiling a stylesheet.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            XsltError::Compile { .. }
                | XsltError::CircularImport(_)
                | XsltError::Import { .. }
                | XsltError::QuickXml(_)
        )
    }
}

impl From<quick_xml::events::attributes::AttrError> for XsltError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        XsltError::QuickXml(quick_xml::Error::InvalidAttr(e))
    }
}
