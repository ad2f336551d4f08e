//! The host hooks an expression reaches through while it is evaluated.

use crate::datasource::DataSourceNode;
use crate::engine::{EvaluationContext, XPathValue};
use crate::error::XPathError;
use std::collections::HashMap;

pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Supplies variables, namespace bindings and extension functions to the engine.
///
/// A transformation processor implements this over its frame stack; tests use
/// [`SimpleResolver`].
pub trait ContextResolver<'a, N: DataSourceNode<'a>> {
    /// Resolves `$name`. The name is written exactly as in the expression.
    fn variable(&self, name: &str) -> Result<XPathValue<N>, XPathError>;

    /// Resolves a namespace prefix used in a name test or a QName argument.
    fn namespace_uri(&self, prefix: &str) -> Option<&str>;

    /// True if `name` is provided by the host rather than the core library.
    fn has_function(&self, _name: &str) -> bool {
        false
    }

    fn call_function(
        &self,
        name: &str,
        _args: Vec<XPathValue<N>>,
        _e_ctx: &EvaluationContext<'a, '_, N>,
    ) -> Result<XPathValue<N>, XPathError> {
        Err(XPathError::FunctionError {
            function: name.to_string(),
            message: "Unknown XPath function".to_string(),
        })
    }
}

/// A resolver backed by plain maps.
#[derive(Debug, Clone)]
pub struct SimpleResolver<N> {
    pub variables: HashMap<String, XPathValue<N>>,
    pub namespaces: HashMap<String, String>,
}

impl<N> Default for SimpleResolver<N> {
    fn default() -> Self {
        Self {
            variables: HashMap::new(),
            namespaces: HashMap::new(),
        }
    }
}

impl<N> SimpleResolver<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: &str, value: XPathValue<N>) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.insert(prefix.to_string(), uri.to_string());
        self
    }
}

impl<'a, N: DataSourceNode<'a>> ContextResolver<'a, N> for SimpleResolver<N> {
    fn variable(&self, name: &str) -> Result<XPathValue<N>, XPathError> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| XPathError::UnknownVariable(name.to_string()))
    }

    fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        match self.namespaces.get(prefix) {
            Some(uri) => Some(uri.as_str()),
            None if prefix == "xml" => Some(XML_NAMESPACE),
            None => None,
        }
    }
}
