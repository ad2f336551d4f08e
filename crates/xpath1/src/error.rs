use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("XPath parse error in '{0}': {1}")]
    XPathParse(String, String),

    #[error("Function '{function}' error: {message}")]
    FunctionError { function: String, message: String },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Variable '{0}' not found")]
    UnknownVariable(String),

    #[error("Namespace prefix '{0}' is not declared")]
    UndeclaredPrefix(String),

    #[error("Circular reference to variable '{0}'")]
    CircularVariable(String),

    /// A global variable has not been computed yet. The caller computes it and retries.
    #[error("Value of variable '{name}' is not available yet")]
    ValuePending { name: String, token: usize },

    #[error("Context node required")]
    NoContextNode,
}

impl XPathError {
    pub(crate) fn arity(function: &str, expected: &str) -> Self {
        XPathError::FunctionError {
            function: format!("{}()", function),
            message: format!("Expected {}", expected),
        }
    }
}
