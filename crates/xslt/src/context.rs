//! The bridge between a running processor and the expression engine:
//! variables, namespace prefixes and the XSLT function library.

use crate::ast::CompiledStylesheet;
use crate::compiler_handlers::INSTRUCTIONS;
use crate::decimal_format::format_number;
use crate::keys::KeyCache;
use crate::query_store::ScopeSnapshot;
use crate::util::XSLT_NAMESPACE;
use std::cell::RefCell;
use trellis_xpath1::{ContextResolver, DataSourceNode, EvaluationContext, FunctionRegistry, XPathError, XPathValue};

pub const VENDOR: &str = "Trellis";
pub const VENDOR_URL: &str = "https://github.com/trellis-xslt/trellis";

/// Functions the XSLT layer adds on top of the core library.
pub const XSLT_FUNCTIONS: &[&str] = &[
    "key",
    "current",
    "format-number",
    "system-property",
    "element-available",
    "function-available",
    "unparsed-entity-uri",
    "document",
];

/// The state of one global variable or parameter.
#[derive(Debug, Clone)]
pub enum GlobalValue<N> {
    Pending,
    Computing,
    Ready(XPathValue<N>),
}

/// Everything one query evaluation can see.
pub struct XsltContext<'p, N> {
    pub stylesheet: &'p CompiledStylesheet,
    /// Static context of the query being evaluated.
    pub scope: &'p ScopeSnapshot,
    pub locals: &'p [Option<XPathValue<N>>],
    pub globals: &'p [GlobalValue<N>],
    /// The node `current()` returns.
    pub current: N,
    pub keys: &'p RefCell<KeyCache<N>>,
    pub functions: &'p FunctionRegistry,
}

fn function_error(function: &str, message: impl Into<String>) -> XPathError {
    XPathError::FunctionError {
        function: format!("{}()", function),
        message: message.into(),
    }
}

fn arity<N>(function: &str, args: &[XPathValue<N>], min: usize, max: usize) -> Result<(), XPathError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{} argument(s)", min)
        } else {
            format!("{} to {} arguments", min, max)
        };
        return Err(function_error(function, format!("Expected {}, got {}", expected, args.len())));
    }
    Ok(())
}

impl<'p, 'a, N: DataSourceNode<'a> + 'a> XsltContext<'p, N> {
    fn lookup_global(&self, written: &str, expanded: &str) -> Result<XPathValue<N>, XPathError> {
        let Some(&index) = self.stylesheet.global_names.get(expanded) else {
            return Err(XPathError::UnknownVariable(written.to_string()));
        };
        match self.globals.get(index) {
            Some(GlobalValue::Ready(value)) => Ok(value.clone()),
            Some(GlobalValue::Computing) => Err(XPathError::CircularVariable(written.to_string())),
            _ => Err(XPathError::ValuePending {
                name: written.to_string(),
                token: index,
            }),
        }
    }

    fn key(&self, mut args: Vec<XPathValue<N>>, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<XPathValue<N>, XPathError> {
        arity("key", &args, 2, 2)?;
        let value = args.pop().unwrap_or(XPathValue::Boolean(false));
        let name = args.pop().map(|v| v.to_string()).unwrap_or_default();
        let name = self.scope.expand(name.trim())?;
        let values: Vec<String> = match value {
            XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
            other => vec![other.to_string()],
        };
        let root = e_ctx.context_node.root();
        let nodes = self
            .keys
            .borrow_mut()
            .lookup(self.stylesheet, &name, root, &values, self.functions)?;
        Ok(XPathValue::NodeSet(nodes))
    }

    fn format_number(&self, args: Vec<XPathValue<N>>) -> Result<XPathValue<N>, XPathError> {
        arity("format-number", &args, 2, 3)?;
        let number = args[0].to_number();
        let picture = args[1].to_string();
        let name = match args.get(2) {
            Some(name) => self.scope.expand(name.to_string().trim())?,
            None => String::new(),
        };
        let Some(format) = self.stylesheet.decimal_formats.get(&name) else {
            return Err(function_error(
                "format-number",
                format!("Decimal format '{}' is not declared", name),
            ));
        };
        format_number(number, &picture, format)
            .map(XPathValue::String)
            .map_err(|message| function_error("format-number", message))
    }

    fn system_property(&self, args: Vec<XPathValue<N>>) -> Result<XPathValue<N>, XPathError> {
        arity("system-property", &args, 1, 1)?;
        let name = self.scope.expand(args[0].to_string().trim())?;
        let Some(local) = name.strip_prefix(&format!("{{{}}}", XSLT_NAMESPACE)) else {
            return Ok(XPathValue::String(String::new()));
        };
        Ok(match local {
            "version" => XPathValue::Number(1.0),
            "vendor" => XPathValue::String(VENDOR.to_string()),
            "vendor-url" => XPathValue::String(VENDOR_URL.to_string()),
            _ => XPathValue::String(String::new()),
        })
    }

    fn element_available(&self, args: Vec<XPathValue<N>>) -> Result<XPathValue<N>, XPathError> {
        arity("element-available", &args, 1, 1)?;
        let qname = args[0].to_string();
        let qname = qname.trim();
        // Element names without a prefix use the default namespace.
        let namespace = match qname.split_once(':') {
            Some((prefix, _)) => self
                .scope
                .namespace_uri(prefix)
                .ok_or_else(|| XPathError::UndeclaredPrefix(prefix.to_string()))?,
            None => self.scope.default_namespace.as_str(),
        };
        let local = qname.rsplit(':').next().unwrap_or(qname);
        let available = namespace == XSLT_NAMESPACE
            && (local == "fallback"
                || (INSTRUCTIONS.contains(&local)
                    && !matches!(local, "when" | "otherwise" | "sort" | "param" | "with-param")));
        Ok(XPathValue::Boolean(available))
    }

    fn function_available(&self, args: Vec<XPathValue<N>>) -> Result<XPathValue<N>, XPathError> {
        arity("function-available", &args, 1, 1)?;
        let name = args[0].to_string();
        let name = name.trim();
        if let Some((prefix, _)) = name.split_once(':') {
            // Resolving the prefix still catches typos.
            self.scope
                .namespace_uri(prefix)
                .ok_or_else(|| XPathError::UndeclaredPrefix(prefix.to_string()))?;
            return Ok(XPathValue::Boolean(false));
        }
        let available = (self.functions.contains(name) || XSLT_FUNCTIONS.contains(&name)) && name != "document";
        Ok(XPathValue::Boolean(available))
    }
}

impl<'a, N: DataSourceNode<'a> + 'a> ContextResolver<'a, N> for XsltContext<'_, N> {
    fn variable(&self, name: &str) -> Result<XPathValue<N>, XPathError> {
        let expanded = self.scope.expand(name)?;
        if let Some(slot) = self.scope.local_slot(&expanded) {
            return match self.locals.get(slot) {
                Some(Some(value)) => Ok(value.clone()),
                _ => Err(XPathError::UnknownVariable(name.to_string())),
            };
        }
        self.lookup_global(name, &expanded)
    }

    fn namespace_uri(&self, prefix: &str) -> Option<&str> {
        self.scope.namespace_uri(prefix)
    }

    fn has_function(&self, name: &str) -> bool {
        XSLT_FUNCTIONS.contains(&name)
    }

    fn call_function(
        &self,
        name: &str,
        args: Vec<XPathValue<N>>,
        e_ctx: &EvaluationContext<'a, '_, N>,
    ) -> Result<XPathValue<N>, XPathError> {
        match name {
            "key" => self.key(args, e_ctx),
            "current" => {
                arity(name, &args, 0, 0)?;
                Ok(XPathValue::NodeSet(vec![self.current]))
            }
            "format-number" => self.format_number(args),
            "system-property" => self.system_property(args),
            "element-available" => self.element_available(args),
            "function-available" => self.function_available(args),
            "unparsed-entity-uri" => {
                arity(name, &args, 1, 1)?;
                Ok(XPathValue::String(String::new()))
            }
            "document" => Err(function_error(name, "External documents are not supported")),
            _ => Err(function_error(name, "Unknown XPath function")),
        }
    }
}
