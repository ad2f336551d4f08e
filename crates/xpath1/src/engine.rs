//! The evaluation engine for executing a parsed XPath AST against a generic `DataSourceNode`.

use super::ast::{
    Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, PathOrigin, Step, UnaryOperator,
};
use super::context::{ContextResolver, XML_NAMESPACE};
use super::fragment::ResultFragment;
use super::functions::{self, FunctionRegistry};
use super::{axes, operators};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Represents the possible result types of an XPath expression evaluation.
///
/// Node-sets produced by the engine are always sorted in document order without duplicates.
#[derive(Debug, Clone)]
pub enum XPathValue<N> {
    NodeSet(Vec<N>),
    String(String),
    Number(f64),
    Boolean(bool),
    /// A result tree fragment. Behaves like a node-set holding a single root node
    /// when converted, but cannot be navigated by location paths.
    Fragment(Arc<ResultFragment>),
}

impl<'a, N: DataSourceNode<'a>> XPathValue<N> {
    /// Coerces the XPath value to a boolean as per XPath 1.0 rules.
    pub fn to_bool(&self) -> bool {
        match self {
            XPathValue::NodeSet(nodes) => !nodes.is_empty(),
            XPathValue::String(s) => !s.is_empty(),
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::Boolean(b) => *b,
            XPathValue::Fragment(_) => true,
        }
    }

    /// Coerces the XPath value to a number as per XPath 1.0 rules.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => string_to_number(&other.to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            XPathValue::NodeSet(_) => "node-set",
            XPathValue::String(_) => "string",
            XPathValue::Number(_) => "number",
            XPathValue::Boolean(_) => "boolean",
            XPathValue::Fragment(_) => "result tree fragment",
        }
    }

    /// Unwraps a node-set, failing for every other type.
    pub fn into_node_set(self) -> Result<Vec<N>, XPathError> {
        match self {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::TypeError(format!(
                "Expression must evaluate to a node-set, got a {}",
                other.type_name()
            ))),
        }
    }
}

impl<'a, N: DataSourceNode<'a>> fmt::Display for XPathValue<N> {
    /// Coerces the XPath value to a string as per XPath 1.0 rules.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathValue::NodeSet(nodes) => write!(
                f,
                "{}",
                nodes.first().map(|n| n.string_value()).unwrap_or_default()
            ),
            XPathValue::String(s) => write!(f, "{}", s),
            XPathValue::Number(n) => write!(f, "{}", number_to_string(*n)),
            XPathValue::Boolean(b) => write!(f, "{}", b),
            XPathValue::Fragment(fragment) => write!(f, "{}", fragment.string_value()),
        }
    }
}

/// XPath 1.0 number to string conversion: no exponents, integers without a decimal point.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// XPath 1.0 string to number conversion. Anything other than optional
/// whitespace around an optionally negated decimal literal is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// A container for all state needed during expression evaluation.
/// `'a` is the lifetime of the underlying data source.
/// `'d` is the lifetime of the evaluation context itself.
pub struct EvaluationContext<'a, 'd, N: DataSourceNode<'a>> {
    pub context_node: N,
    pub root_node: N,
    pub functions: &'d FunctionRegistry,
    pub context_position: usize, // 1-based index
    pub context_size: usize,
    /// Variables, namespace prefixes and host functions.
    pub resolver: &'d dyn ContextResolver<'a, N>,
    _marker: PhantomData<&'a ()>,
}

impl<'a, 'd, N: DataSourceNode<'a>> EvaluationContext<'a, 'd, N> {
    pub fn new(
        context_node: N,
        root_node: N,
        functions: &'d FunctionRegistry,
        context_position: usize,
        context_size: usize,
        resolver: &'d dyn ContextResolver<'a, N>,
    ) -> Self {
        Self {
            context_node,
            root_node,
            functions,
            context_position,
            context_size,
            resolver,
            _marker: PhantomData,
        }
    }

    /// The same context focused on another node.
    pub fn with_node(&self, node: N, position: usize, size: usize) -> Self {
        Self::new(
            node,
            self.root_node,
            self.functions,
            position,
            size,
            self.resolver,
        )
    }

    pub fn resolve_prefix(&self, prefix: &str) -> Result<&'d str, XPathError> {
        let resolver: &'d dyn ContextResolver<'a, N> = self.resolver;
        match resolver.namespace_uri(prefix) {
            Some(uri) => Ok(uri),
            None if prefix == "xml" => Ok(XML_NAMESPACE),
            None => Err(XPathError::UndeclaredPrefix(prefix.to_string())),
        }
    }
}

/// Evaluates a compiled expression and returns a concrete `XPathValue`.
pub fn evaluate<'a, N>(
    expr: &Expression,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    match expr {
        Expression::Literal(s) => Ok(XPathValue::String(s.clone())),
        Expression::Number(n) => Ok(XPathValue::Number(*n)),
        Expression::LocationPath(path) => {
            let nodes = evaluate_location_path(path, e_ctx)?;
            Ok(XPathValue::NodeSet(nodes))
        }
        Expression::Variable(name) => e_ctx.resolver.variable(name),
        Expression::FunctionCall { name, args } => {
            let mut evaluated_args = Vec::with_capacity(args.len());
            for arg in args {
                evaluated_args.push(evaluate(arg, e_ctx)?);
            }
            if e_ctx.resolver.has_function(name) {
                e_ctx.resolver.call_function(name, evaluated_args, e_ctx)
            } else {
                functions::evaluate_function(name, evaluated_args, e_ctx)
            }
        }
        Expression::Filter { expr, predicates } => {
            let nodes = evaluate(expr, e_ctx)?.into_node_set()?;
            Ok(XPathValue::NodeSet(apply_predicates(nodes, predicates, e_ctx)?))
        }
        Expression::BinaryOp { left, op, right } => match op {
            BinaryOperator::Or => {
                if evaluate(left, e_ctx)?.to_bool() {
                    return Ok(XPathValue::Boolean(true));
                }
                Ok(XPathValue::Boolean(evaluate(right, e_ctx)?.to_bool()))
            }
            BinaryOperator::And => {
                if !evaluate(left, e_ctx)?.to_bool() {
                    return Ok(XPathValue::Boolean(false));
                }
                Ok(XPathValue::Boolean(evaluate(right, e_ctx)?.to_bool()))
            }
            _ => {
                let left_val = evaluate(left, e_ctx)?;
                let right_val = evaluate(right, e_ctx)?;
                operators::evaluate(*op, left_val, right_val)
            }
        },
        Expression::UnaryOp { op, expr } => {
            let val = evaluate(expr, e_ctx)?;
            match op {
                UnaryOperator::Minus => Ok(XPathValue::Number(-val.to_number())),
            }
        }
    }
}

fn evaluate_location_path<'a, N>(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut current_nodes = match &path.origin {
        PathOrigin::Context => vec![e_ctx.context_node],
        PathOrigin::Root => vec![e_ctx.root_node],
        PathOrigin::Expr(start) => evaluate(start, e_ctx)?.into_node_set()?,
    };

    for step in &path.steps {
        current_nodes = evaluate_step(step, &current_nodes, e_ctx)?;
    }
    Ok(current_nodes)
}

/// Evaluates one step for every context node separately, so that predicates see
/// proximity positions relative to their own context node, then merges the
/// results into document order.
fn evaluate_step<'a, N>(
    step: &Step,
    context_nodes: &[N],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut results = Vec::new();
    for &node in context_nodes {
        let mut tested = Vec::new();
        for candidate in collect_axis_nodes(step.axis, node) {
            if matches_node_test(candidate, &step.node_test, step.axis, e_ctx)? {
                tested.push(candidate);
            }
        }
        results.extend(apply_predicates(tested, &step.predicates, e_ctx)?);
    }
    results.sort();
    results.dedup();
    Ok(results)
}

/// Collects the nodes along `axis` from `node`, in proximity order: document
/// order for forward axes, reverse document order for reverse axes.
pub fn collect_axis_nodes<'a, N>(axis: Axis, node: N) -> Vec<N>
where
    N: DataSourceNode<'a> + 'a,
{
    axes::nodes_on_axis(axis, node)
}

/// Tests a node against a `NodeTest`, honouring the principal node type of the axis.
pub fn matches_node_test<'a, N>(
    node: N,
    test: &NodeTest,
    axis: Axis,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<bool, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let principal = match axis {
        Axis::Attribute => NodeType::Attribute,
        Axis::Namespace => NodeType::Namespace,
        _ => NodeType::Element,
    };
    let matched = match test {
        NodeTest::Wildcard => node.node_type() == principal,
        NodeTest::NamespaceWildcard(prefix) => {
            if node.node_type() != principal || principal == NodeType::Namespace {
                return Ok(false);
            }
            let uri = e_ctx.resolve_prefix(prefix)?;
            node.namespace_uri().unwrap_or("") == uri
        }
        NodeTest::Name(name) => {
            if node.node_type() != principal {
                return Ok(false);
            }
            let (prefix, local) = match name.split_once(':') {
                Some((p, l)) => (Some(p), l),
                None => (None, name.as_str()),
            };
            let Some(q_name) = node.name() else {
                return Ok(false);
            };
            if q_name.local_part != local {
                return Ok(false);
            }
            if principal == NodeType::Namespace {
                prefix.is_none()
            } else {
                let expected = match prefix {
                    Some(p) => e_ctx.resolve_prefix(p)?,
                    None => "",
                };
                node.namespace_uri().unwrap_or("") == expected
            }
        }
        NodeTest::NodeType(ntt) => match ntt {
            NodeTypeTest::Text => node.node_type() == NodeType::Text,
            NodeTypeTest::Comment => node.node_type() == NodeType::Comment,
            NodeTypeTest::ProcessingInstruction => {
                node.node_type() == NodeType::ProcessingInstruction
            }
            NodeTypeTest::Node => true,
        },
        NodeTest::ProcessingInstructionTarget(target) => {
            node.node_type() == NodeType::ProcessingInstruction
                && node.name().is_some_and(|q| q.local_part == target)
        }
    };
    Ok(matched)
}

/// Filters `nodes` (in proximity order) through each predicate in turn.
pub fn apply_predicates<'a, N>(
    nodes: Vec<N>,
    predicates: &[Expression],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut final_nodes = nodes;
    for predicate in predicates {
        let context_size = final_nodes.len();
        let mut predicate_results = Vec::with_capacity(context_size);
        for (i, node) in final_nodes.iter().enumerate() {
            let predicate_e_ctx = e_ctx.with_node(*node, i + 1, context_size);
            let keep = match evaluate(predicate, &predicate_e_ctx)? {
                XPathValue::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                predicate_results.push(*node);
            }
        }
        final_nodes = predicate_results;
    }
    Ok(final_nodes)
}
