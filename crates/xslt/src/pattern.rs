//! A dedicated engine for parsing and evaluating XSLT `match` patterns.
//!
//! Patterns are matched right to left: the last step must accept the node,
//! then the remaining steps are checked against its parent (`/`) or some
//! ancestor (`//`), down to an optional `/`, `id()` or `key()` anchor.

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::char;
use nom::combinator::map;
use nom::multi::many0;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use std::fmt;
use trellis_xpath1::ast::{Axis, Expression, NodeTest};
use trellis_xpath1::datasource::{DataSourceNode, NodeType};
use trellis_xpath1::engine::{EvaluationContext, XPathValue, apply_predicates, matches_node_test};
use trellis_xpath1::parser::{self as xpath_parser, string_literal, ws};
use trellis_xpath1::{XPathError, functions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternAxis {
    Child,
    Attribute,
}

/// How a step relates to the step (or anchor) on its left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum Anchor {
    None,
    Root,
    Id(String),
    Key(String, String),
}

#[derive(Debug, Clone, PartialEq)]
struct PatternStep {
    axis: PatternAxis,
    test: NodeTest,
    predicates: Vec<Expression>,
    separator: Separator,
}

/// A single location path within a pattern, e.g. `/doc/section/para`.
#[derive(Debug, Clone, PartialEq)]
struct PathPattern {
    anchor: Anchor,
    steps: Vec<PatternStep>,
}

/// A compiled representation of an XSLT match pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// A pattern can be a union of multiple paths, e.g. `para|note`.
    alternatives: Vec<PathPattern>,
    source: String,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Pattern {
    /// Evaluates if a given node matches this compiled pattern.
    pub fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        for path in &self.alternatives {
            if path.matches(node, e_ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The priority a template gets when it does not declare one. A union
    /// should be split with [`Pattern::split`] first.
    pub fn default_priority(&self) -> f64 {
        match self.alternatives.as_slice() {
            [single] => single.default_priority(),
            _ => 0.5,
        }
    }

    /// One pattern per `|` alternative.
    pub fn split(self) -> Vec<Pattern> {
        let source = self.source;
        self.alternatives
            .into_iter()
            .map(|path| Pattern {
                alternatives: vec![path],
                source: source.clone(),
            })
            .collect()
    }

    pub fn alternative_count(&self) -> usize {
        self.alternatives.len()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Visits the variable references inside predicates.
    pub fn for_each_variable<F: FnMut(&str)>(&self, f: &mut F) {
        for path in &self.alternatives {
            for step in &path.steps {
                for predicate in &step.predicates {
                    predicate.for_each_variable(f);
                }
            }
        }
    }

    /// Visits every function the pattern calls, including a `key()` anchor.
    pub fn for_each_function<F: FnMut(&str)>(&self, f: &mut F) {
        for path in &self.alternatives {
            match path.anchor {
                Anchor::Key(..) => f("key"),
                Anchor::Id(_) => f("id"),
                Anchor::None | Anchor::Root => {}
            }
            for step in &path.steps {
                for predicate in &step.predicates {
                    predicate.for_each_function(f);
                }
            }
        }
    }
}

impl PathPattern {
    fn default_priority(&self) -> f64 {
        if self.anchor != Anchor::None || self.steps.len() != 1 {
            return 0.5;
        }
        let step = &self.steps[0];
        if !step.predicates.is_empty() {
            return 0.5;
        }
        match step.test {
            NodeTest::Name(_) | NodeTest::ProcessingInstructionTarget(_) => 0.0,
            NodeTest::NamespaceWildcard(_) => -0.25,
            NodeTest::Wildcard | NodeTest::NodeType(_) => -0.5,
        }
    }

    fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        match self.steps.len().checked_sub(1) {
            Some(last) => self.matches_step(last, node, e_ctx),
            None => self.matches_anchor(node, e_ctx),
        }
    }

    fn matches_step<'a, N>(
        &self,
        index: usize,
        node: N,
        e_ctx: &EvaluationContext<'a, '_, N>,
    ) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        let step = &self.steps[index];
        if !step.matches(node, e_ctx)? {
            return Ok(false);
        }
        let left = index.checked_sub(1);
        match step.separator {
            Separator::Child => match node.parent() {
                Some(parent) => self.matches_left(left, parent, e_ctx),
                None => Ok(false),
            },
            Separator::Descendant => {
                let mut ancestor = node.parent();
                while let Some(candidate) = ancestor {
                    if self.matches_left(left, candidate, e_ctx)? {
                        return Ok(true);
                    }
                    ancestor = candidate.parent();
                }
                Ok(false)
            }
        }
    }

    fn matches_left<'a, N>(
        &self,
        index: Option<usize>,
        node: N,
        e_ctx: &EvaluationContext<'a, '_, N>,
    ) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        match index {
            Some(i) => self.matches_step(i, node, e_ctx),
            None if self.anchor == Anchor::None => Ok(true),
            None => self.matches_anchor(node, e_ctx),
        }
    }

    fn matches_anchor<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        let focus = e_ctx.with_node(node, 1, 1);
        let anchored = match &self.anchor {
            Anchor::None => return Ok(false),
            Anchor::Root => return Ok(node.node_type() == NodeType::Root),
            Anchor::Id(ids) => {
                functions::evaluate_function("id", vec![XPathValue::String(ids.clone())], &focus)?
            }
            Anchor::Key(name, value) => e_ctx.resolver.call_function(
                "key",
                vec![XPathValue::String(name.clone()), XPathValue::String(value.clone())],
                &focus,
            )?,
        };
        Ok(anchored.into_node_set()?.contains(&node))
    }
}

impl PatternStep {
    fn principal_type_matches<'a, N: DataSourceNode<'a>>(&self, node: &N) -> bool {
        match self.axis {
            PatternAxis::Attribute => node.node_type() == NodeType::Attribute,
            PatternAxis::Child => matches!(
                node.node_type(),
                NodeType::Element | NodeType::Text | NodeType::Comment | NodeType::ProcessingInstruction
            ),
        }
    }

    fn xpath_axis(&self) -> Axis {
        match self.axis {
            PatternAxis::Child => Axis::Child,
            PatternAxis::Attribute => Axis::Attribute,
        }
    }

    fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        if !self.principal_type_matches(&node) || !matches_node_test(node, &self.test, self.xpath_axis(), e_ctx)? {
            return Ok(false);
        }
        if self.predicates.is_empty() {
            return Ok(true);
        }

        // Predicates see positions among the siblings that pass the node test.
        let Some(parent) = node.parent() else {
            return Ok(false);
        };
        let siblings = match self.axis {
            PatternAxis::Child => parent.children(),
            PatternAxis::Attribute => parent.attributes(),
        };
        let mut candidates = Vec::new();
        for sibling in siblings {
            if self.principal_type_matches(&sibling)
                && matches_node_test(sibling, &self.test, self.xpath_axis(), e_ctx)?
            {
                candidates.push(sibling);
            }
        }
        let kept = apply_predicates(candidates, &self.predicates, e_ctx)?;
        Ok(kept.contains(&node))
    }
}

// --- Parser ---

pub fn parse(text: &str) -> Result<Pattern, XPathError> {
    match pattern_parser(text.trim()) {
        Ok(("", alternatives)) => Ok(Pattern {
            alternatives,
            source: text.to_string(),
        }),
        Ok((rem, _)) => Err(XPathError::XPathParse(
            text.to_string(),
            format!("Unconsumed input in pattern: {}", rem),
        )),
        Err(e) => Err(XPathError::XPathParse(text.to_string(), e.to_string())),
    }
}

fn pattern_parser(input: &str) -> IResult<&str, Vec<PathPattern>> {
    let (mut rest, first) = path_parser(input)?;
    let mut alternatives = vec![first];
    while let Some(after) = rest.trim_start().strip_prefix('|') {
        let (r, path) = path_parser(after.trim_start())?;
        alternatives.push(path);
        rest = r;
    }
    Ok((rest.trim_end(), alternatives))
}

fn path_parser(input: &str) -> IResult<&str, PathPattern> {
    if let Ok((rest, anchor)) = id_key_anchor(input) {
        let steps_start = rest.trim_start();
        let (rest, steps) = if let Some(r) = steps_start.strip_prefix("//") {
            relative_steps(r, Separator::Descendant)?
        } else if let Some(r) = steps_start.strip_prefix('/') {
            relative_steps(r, Separator::Child)?
        } else {
            (rest, Vec::new())
        };
        return Ok((rest, PathPattern { anchor, steps }));
    }

    if let Some(r) = input.strip_prefix("//") {
        let (rest, steps) = relative_steps(r, Separator::Descendant)?;
        return Ok((rest, PathPattern { anchor: Anchor::Root, steps }));
    }

    if let Some(r) = input.strip_prefix('/') {
        // `/` on its own matches the root node.
        return Ok(match relative_steps(r, Separator::Child) {
            Ok((rest, steps)) => (rest, PathPattern { anchor: Anchor::Root, steps }),
            Err(_) => (
                r,
                PathPattern {
                    anchor: Anchor::Root,
                    steps: Vec::new(),
                },
            ),
        });
    }

    let (rest, steps) = relative_steps(input, Separator::Child)?;
    Ok((rest, PathPattern { anchor: Anchor::None, steps }))
}

fn id_key_anchor(input: &str) -> IResult<&str, Anchor> {
    alt((
        map(
            preceded(
                (tag("id"), ws(char('('))),
                (string_literal, ws(char(')'))),
            ),
            |(ids, _)| Anchor::Id(ids),
        ),
        map(
            (
                tag("key"),
                ws(char('(')),
                string_literal,
                ws(char(',')),
                string_literal,
                ws(char(')')),
            ),
            |(_, _, name, _, value, _)| Anchor::Key(name, value),
        ),
    ))
    .parse(input)
}

fn relative_steps(input: &str, first: Separator) -> IResult<&str, Vec<PatternStep>> {
    let (mut rest, step) = step_parser(input, first)?;
    let mut steps = vec![step];
    loop {
        let trimmed = rest.trim_start();
        let (after, separator) = if let Some(r) = trimmed.strip_prefix("//") {
            (r, Separator::Descendant)
        } else if let Some(r) = trimmed.strip_prefix('/') {
            (r, Separator::Child)
        } else {
            break;
        };
        let (r, step) = step_parser(after, separator)?;
        steps.push(step);
        rest = r;
    }
    Ok((rest, steps))
}

fn strip_axis<'a>(input: &'a str, axis: &str) -> Option<&'a str> {
    input.strip_prefix(axis)?.trim_start().strip_prefix("::")
}

fn step_parser(input: &str, separator: Separator) -> IResult<&str, PatternStep> {
    let input = input.trim_start();
    let (rest, axis) = if let Some(r) = input.strip_prefix('@') {
        (r, PatternAxis::Attribute)
    } else if let Some(r) = strip_axis(input, "attribute") {
        (r, PatternAxis::Attribute)
    } else if let Some(r) = strip_axis(input, "child") {
        (r, PatternAxis::Child)
    } else {
        (input, PatternAxis::Child)
    };
    let (rest, test) = xpath_parser::node_test(rest.trim_start())?;
    let (rest, predicates) = many0(delimited(
        ws(char('[')),
        xpath_parser::expression,
        ws(char(']')),
    ))
    .parse(rest)?;
    Ok((
        rest,
        PatternStep {
            axis,
            test,
            predicates,
            separator,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_xpath1::datasource::tests::{MockNode, MockTree, create_test_tree};
    use trellis_xpath1::{FunctionRegistry, SimpleResolver};

    fn get_node<'a>(tree: &'a MockTree<'a>, id: usize) -> MockNode<'a> {
        MockNode { id, tree }
    }

    fn matches(text: &str, tree: &MockTree, id: usize) -> bool {
        let funcs = FunctionRegistry::default();
        let resolver = SimpleResolver::new();
        let root = get_node(tree, 0);
        let e_ctx = EvaluationContext::new(root, root, &funcs, 1, 1, &resolver);
        parse(text).unwrap().matches(get_node(tree, id), &e_ctx).unwrap()
    }

    #[test]
    fn test_pattern_parsing() {
        for text in [
            "foo",
            "foo/bar",
            "/",
            "/*",
            "/root/item",
            "foo|bar",
            "text()",
            "@id",
            "*",
            "foo/*/@id",
            "foo//bar",
            "//para[1]",
            "id('p1')/text()",
            "key('k', 'v')",
            "child::para",
            "attribute::*",
            "processing-instruction('x')",
        ] {
            assert!(parse(text).is_ok(), "failed to parse {}", text);
        }
        assert!(parse("foo/").is_err());
        assert!(parse("ancestor::foo").is_err());
    }

    #[test]
    fn test_simple_name_match() {
        let tree = create_test_tree();
        assert!(matches("para", &tree, 1));
        assert!(!matches("para", &tree, 0));
        assert!(!matches("para", &tree, 5));
    }

    #[test]
    fn test_root_and_absolute_patterns() {
        let tree = create_test_tree();
        assert!(matches("/", &tree, 0));
        assert!(!matches("/", &tree, 1));
        assert!(matches("/para", &tree, 6));
        assert!(!matches("/*", &tree, 0));
        assert!(matches("//text()", &tree, 7));
    }

    #[test]
    fn test_path_match() {
        let tree = create_test_tree();
        assert!(matches("para/text()", &tree, 4));
        assert!(!matches("para/text()", &tree, 1));
        assert!(matches("node()", &tree, 8));
        assert!(!matches("node()", &tree, 0));
    }

    #[test]
    fn test_predicates_use_sibling_positions() {
        let tree = create_test_tree();
        assert!(matches("para[1]", &tree, 1));
        assert!(matches("para[2]", &tree, 6));
        assert!(!matches("para[2]", &tree, 1));
        assert!(matches("para[@id='p1']", &tree, 1));
    }

    #[test]
    fn test_attribute_and_id_patterns() {
        let tree = create_test_tree();
        assert!(matches("@id", &tree, 2));
        assert!(!matches("@id", &tree, 1));
        assert!(matches("para/@*", &tree, 3));
        assert!(matches("id('p1')", &tree, 1));
        assert!(matches("id('p1')/text()", &tree, 4));
        assert!(!matches("id('p1')", &tree, 6));
    }

    #[test]
    fn test_default_priorities() {
        let priority = |text: &str| parse(text).unwrap().default_priority();
        assert_eq!(priority("para"), 0.0);
        assert_eq!(priority("@id"), 0.0);
        assert_eq!(priority("processing-instruction('x')"), 0.0);
        assert_eq!(priority("xsl:*"), -0.25);
        assert_eq!(priority("*"), -0.5);
        assert_eq!(priority("text()"), -0.5);
        assert_eq!(priority("para[1]"), 0.5);
        assert_eq!(priority("div/para"), 0.5);
        assert_eq!(priority("/"), 0.5);
    }

    #[test]
    fn test_union_split_keeps_each_priority() {
        let parts = parse("para | *").unwrap().split();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].default_priority(), 0.0);
        assert_eq!(parts[1].default_priority(), -0.5);
    }
}
