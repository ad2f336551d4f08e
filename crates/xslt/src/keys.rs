//! Lazily built `xsl:key` tables.

use crate::ast::{CompiledStylesheet, KeyDefinition};
use crate::query_store::ScopeSnapshot;
use std::collections::HashMap;
use trellis_xpath1::{ContextResolver, DataSourceNode, EvaluationContext, FunctionRegistry, XPathError, XPathValue};

/// Key value to the matching nodes, in document order.
pub type KeyTable<N> = HashMap<String, Vec<N>>;

/// Tables per key name and document root. A table is built the first time a
/// key is used against a root and kept for the life of the processor.
#[derive(Debug)]
pub struct KeyCache<N> {
    tables: HashMap<(String, N), KeyTable<N>>,
    builds: usize,
}

impl<N> Default for KeyCache<N> {
    fn default() -> Self {
        KeyCache {
            tables: HashMap::new(),
            builds: 0,
        }
    }
}

impl<N> KeyCache<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tables built so far.
    pub fn builds(&self) -> usize {
        self.builds
    }
}

impl<'a, N: DataSourceNode<'a> + 'a> KeyCache<N> {
    /// The nodes under `root` whose key `name` has one of `values`.
    pub fn lookup(
        &mut self,
        stylesheet: &CompiledStylesheet,
        name: &str,
        root: N,
        values: &[String],
        functions: &FunctionRegistry,
    ) -> Result<Vec<N>, XPathError> {
        let cache_key = (name.to_string(), root);
        if !self.tables.contains_key(&cache_key) {
            let definitions = stylesheet.keys.get(name).ok_or_else(|| XPathError::FunctionError {
                function: "key".to_string(),
                message: format!("Key '{}' is not declared", name),
            })?;
            let table = build_table(stylesheet, definitions, root, functions)?;
            log::debug!("Built key table '{}' with {} values", name, table.len());
            self.builds += 1;
            self.tables.insert(cache_key.clone(), table);
        }
        let Some(table) = self.tables.get(&cache_key) else {
            return Ok(Vec::new());
        };
        let mut nodes: Vec<N> = values
            .iter()
            .filter_map(|v| table.get(v))
            .flatten()
            .copied()
            .collect();
        if values.len() > 1 {
            nodes.sort();
            nodes.dedup();
        }
        Ok(nodes)
    }
}

/// Resolves prefixes for key patterns and use expressions, which may not
/// reference variables.
struct KeyResolver<'s> {
    scope: &'s ScopeSnapshot,
}

impl<'a, N: DataSourceNode<'a>> ContextResolver<'a, N> for KeyResolver<'_> {
    fn variable(&self, name: &str) -> Result<XPathValue<N>, XPathError> {
        Err(XPathError::UnknownVariable(name.to_string()))
    }

    fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.scope.namespace_uri(prefix)
    }
}

/// Every element, attribute, text, comment and processing instruction under
/// `root`, in document order.
pub(crate) fn document_nodes<'a, N: DataSourceNode<'a>>(root: N) -> Vec<N> {
    let mut nodes = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        nodes.push(node);
        nodes.extend(node.attributes());
        let children: Vec<N> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }
    nodes
}

fn build_table<'a, N: DataSourceNode<'a> + 'a>(
    stylesheet: &CompiledStylesheet,
    definitions: &[KeyDefinition],
    root: N,
    functions: &FunctionRegistry,
) -> Result<KeyTable<N>, XPathError> {
    let mut table: KeyTable<N> = HashMap::new();
    for node in document_nodes(root) {
        for definition in definitions {
            let pattern = stylesheet.queries.get(definition.pattern);
            let resolver = KeyResolver { scope: &pattern.scope };
            let e_ctx = EvaluationContext::new(node, root, functions, 1, 1, &resolver);
            if !pattern.query()?.matches(node, &e_ctx)? {
                continue;
            }

            let use_query = stylesheet.queries.get(definition.use_expr);
            let resolver = KeyResolver { scope: &use_query.scope };
            let e_ctx = EvaluationContext::new(node, root, functions, 1, 1, &resolver);
            match use_query.query()?.evaluate(&e_ctx)? {
                XPathValue::NodeSet(values) => {
                    for value in values {
                        table.entry(value.string_value()).or_default().push(node);
                    }
                }
                other => table.entry(other.to_string()).or_default().push(node),
            }
        }
    }
    for nodes in table.values_mut() {
        nodes.sort();
        nodes.dedup();
    }
    Ok(table)
}
