//! The shared table of compiled expressions and patterns.
//!
//! Every `select`, `test`, `match` and AVT expression in a stylesheet is
//! compiled once into a [`CompiledQuery`] and addressed by index afterwards.
//! Each entry keeps a snapshot of the namespace bindings and local variables
//! that were in scope where it was written, because it is evaluated far away
//! from that scope.

use crate::error::Location;
use crate::pattern::{self, Pattern};
use std::collections::HashMap;
use std::sync::Arc;
use trellis_xpath1::datasource::DataSourceNode;
use trellis_xpath1::engine::{EvaluationContext, XPathValue, evaluate};
use trellis_xpath1::{Expression, XPathError, parse_expression};

pub type QueryId = usize;

/// What a query is allowed to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub allow_variables: bool,
    pub allow_keys: bool,
    pub is_pattern: bool,
}

impl QueryOptions {
    pub const EXPRESSION: QueryOptions = QueryOptions {
        allow_variables: true,
        allow_keys: true,
        is_pattern: false,
    };

    /// Template match patterns may not reference variables.
    pub const MATCH_PATTERN: QueryOptions = QueryOptions {
        allow_variables: false,
        allow_keys: true,
        is_pattern: true,
    };

    /// `xsl:number` count/from patterns.
    pub const PATTERN: QueryOptions = QueryOptions {
        allow_variables: true,
        allow_keys: true,
        is_pattern: true,
    };

    pub const KEY_PATTERN: QueryOptions = QueryOptions {
        allow_variables: false,
        allow_keys: false,
        is_pattern: true,
    };

    pub const KEY_USE: QueryOptions = QueryOptions {
        allow_variables: false,
        allow_keys: false,
        is_pattern: false,
    };
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions::EXPRESSION
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Expression(Expression),
    Pattern(Pattern),
}

/// Compiles `text` as an expression or a pattern and checks it against `options`.
pub fn compile_query(text: &str, options: QueryOptions) -> Result<Query, XPathError> {
    let query = if options.is_pattern {
        Query::Pattern(pattern::parse(text)?)
    } else {
        Query::Expression(parse_expression(text)?)
    };

    let mut variable = None;
    let mut uses_key = false;
    query.for_each_variable(&mut |name| {
        variable.get_or_insert_with(|| name.to_string());
    });
    query.for_each_function(&mut |name| uses_key |= name == "key");

    if let (false, Some(name)) = (options.allow_variables, variable) {
        return Err(XPathError::XPathParse(
            text.to_string(),
            format!("Variable reference '${}' is not allowed here", name),
        ));
    }
    if !options.allow_keys && uses_key {
        return Err(XPathError::XPathParse(
            text.to_string(),
            "The key() function is not allowed here".to_string(),
        ));
    }
    Ok(query)
}

impl Query {
    pub fn evaluate<'a, N>(&self, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<XPathValue<N>, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        match self {
            Query::Expression(expr) => evaluate(expr, e_ctx),
            Query::Pattern(p) => Err(XPathError::TypeError(format!(
                "Pattern '{}' cannot be evaluated as an expression",
                p
            ))),
        }
    }

    /// Whether `node` matches. An expression matches the nodes it selects from
    /// the root of the node's document.
    pub fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        match self {
            Query::Pattern(p) => p.matches(node, e_ctx),
            Query::Expression(expr) => {
                let root = node.root();
                let from_root = e_ctx.with_node(root, 1, 1);
                Ok(evaluate(expr, &from_root)?.into_node_set()?.contains(&node))
            }
        }
    }

    pub fn for_each_variable<F: FnMut(&str)>(&self, f: &mut F) {
        match self {
            Query::Expression(e) => e.for_each_variable(f),
            Query::Pattern(p) => p.for_each_variable(f),
        }
    }

    pub fn for_each_function<F: FnMut(&str)>(&self, f: &mut F) {
        match self {
            Query::Expression(e) => e.for_each_function(f),
            Query::Pattern(p) => p.for_each_function(f),
        }
    }

    pub fn as_pattern(&self) -> Option<&Pattern> {
        match self {
            Query::Pattern(p) => Some(p),
            Query::Expression(_) => None,
        }
    }
}

/// A local variable visible at the point a query was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBinding {
    /// Expanded name.
    pub name: String,
    pub slot: usize,
}

/// The static context captured when a query was compiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeSnapshot {
    /// Prefix to namespace URI, without the default namespace.
    pub namespaces: HashMap<String, String>,
    pub default_namespace: String,
    /// Innermost binding last.
    pub locals: Vec<LocalBinding>,
    pub forwards_compatible: bool,
}

impl ScopeSnapshot {
    pub fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(String::as_str)
    }

    pub fn local_slot(&self, expanded: &str) -> Option<usize> {
        self.locals
            .iter()
            .rev()
            .find(|binding| binding.name == expanded)
            .map(|binding| binding.slot)
    }

    /// Expands a QName written in this scope to Clark notation. Unprefixed
    /// names stay in no namespace.
    pub fn expand(&self, qname: &str) -> Result<String, XPathError> {
        match qname.split_once(':') {
            Some((prefix, local)) => {
                let uri = match self.namespace_uri(prefix) {
                    Some(uri) => uri,
                    None if prefix == "xml" => trellis_xpath1::XML_NAMESPACE,
                    None => return Err(XPathError::UndeclaredPrefix(prefix.to_string())),
                };
                Ok(crate::util::expanded_name(uri, local))
            }
            None => Ok(qname.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryEntry {
    Ready(Query),
    /// Compilation failed in forwards-compatible mode; evaluating raises the error.
    Deferred(XPathError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub source: String,
    pub entry: QueryEntry,
    pub scope: Arc<ScopeSnapshot>,
    pub location: Location,
}

impl CompiledQuery {
    pub fn query(&self) -> Result<&Query, XPathError> {
        match &self.entry {
            QueryEntry::Ready(q) => Ok(q),
            QueryEntry::Deferred(e) => Err(e.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStore {
    queries: Vec<CompiledQuery>,
}

impl QueryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, query: CompiledQuery) -> QueryId {
        self.queries.push(query);
        self.queries.len() - 1
    }

    pub fn get(&self, id: QueryId) -> &CompiledQuery {
        &self.queries[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (QueryId, &CompiledQuery)> {
        self.queries.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
