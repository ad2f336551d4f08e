//! The XPath 1.0 core function library.
//!
//! Host languages add their own functions through
//! [`ContextResolver`](crate::context::ContextResolver); only the core library
//! is dispatched here.

use super::engine::{EvaluationContext, XPathValue, string_to_number};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const CORE_FUNCTIONS: [&str; 28] = [
    "last",
    "position",
    "count",
    "id",
    "local-name",
    "namespace-uri",
    "name",
    "generate-id",
    "string",
    "concat",
    "starts-with",
    "contains",
    "substring-before",
    "substring-after",
    "substring",
    "string-length",
    "normalize-space",
    "translate",
    "boolean",
    "not",
    "true",
    "false",
    "lang",
    "number",
    "sum",
    "floor",
    "ceiling",
    "round",
];

/// The names of the functions [`evaluate_function`] understands.
pub struct FunctionRegistry {
    functions: HashSet<&'static str>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashSet::new(),
        }
    }

    pub fn register(&mut self, name: &'static str) {
        self.functions.insert(name);
    }

    /// Backs `function-available()` for names without a prefix.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains(name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self {
            functions: CORE_FUNCTIONS.into_iter().collect(),
        }
    }
}

/// The evaluated arguments of one call, with arity checks named after the function.
struct Args<'f, N> {
    function: &'f str,
    values: Vec<XPathValue<N>>,
}

impl<'a, N: DataSourceNode<'a>> Args<'_, N> {
    fn arity(&self, expected: &str) -> XPathError {
        XPathError::arity(self.function, expected)
    }

    fn none(&self) -> Result<(), XPathError> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(self.arity("0 arguments"))
        }
    }

    fn one(mut self) -> Result<XPathValue<N>, XPathError> {
        match self.values.len() {
            1 => Ok(self.values.remove(0)),
            _ => Err(self.arity("1 argument")),
        }
    }

    /// Exactly `K` arguments, converted to strings.
    fn strings<const K: usize>(self) -> Result<[String; K], XPathError> {
        if self.values.len() != K {
            return Err(self.arity(&format!("{} arguments", K)));
        }
        let function = self.function;
        let strings: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        strings
            .try_into()
            .map_err(|_| XPathError::arity(function, &format!("{} arguments", K)))
    }

    /// The optional node-set argument of the name functions: its first node,
    /// or the context node when omitted.
    fn node_or_context(mut self, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<Option<N>, XPathError> {
        match self.values.len() {
            0 => Ok(Some(e_ctx.context_node)),
            1 => match self.values.remove(0) {
                XPathValue::NodeSet(nodes) => Ok(nodes.first().copied()),
                other => Err(XPathError::TypeError(format!(
                    "{}() argument must be a node-set, got a {}",
                    self.function,
                    other.type_name()
                ))),
            },
            _ => Err(self.arity("0 or 1 arguments")),
        }
    }

    /// The optional string argument, or the string value of the context node.
    fn string_or_context(mut self, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<String, XPathError> {
        match self.values.len() {
            0 => Ok(e_ctx.context_node.string_value()),
            1 => Ok(self.values.remove(0).to_string()),
            _ => Err(self.arity("0 or 1 arguments")),
        }
    }
}

/// Evaluates a call to a core library function.
pub fn evaluate_function<'a, N: DataSourceNode<'a>>(
    name: &str,
    values: Vec<XPathValue<N>>,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError> {
    use XPathValue::{Boolean, Number, String as Str};

    let args = Args { function: name, values };
    let value = match name {
        "last" => {
            args.none()?;
            Number(e_ctx.context_size as f64)
        }
        "position" => {
            args.none()?;
            Number(e_ctx.context_position as f64)
        }
        "count" => Number(args.one()?.into_node_set()?.len() as f64),
        "id" => XPathValue::NodeSet(elements_by_id(args.one()?, e_ctx)),
        "local-name" => Str(
            args.node_or_context(e_ctx)?
                .and_then(|n| n.name())
                .map(|q| q.local_part.to_string())
                .unwrap_or_default(),
        ),
        "namespace-uri" => Str(
            args.node_or_context(e_ctx)?
                .filter(|n| matches!(n.node_type(), NodeType::Element | NodeType::Attribute))
                .and_then(|n| n.namespace_uri())
                .unwrap_or_default()
                .to_string(),
        ),
        "name" => Str(args.node_or_context(e_ctx)?.map(qualified_name).unwrap_or_default()),
        "generate-id" => Str(args.node_or_context(e_ctx)?.map(node_id).unwrap_or_default()),

        "string" => Str(args.string_or_context(e_ctx)?),
        "concat" => {
            if args.values.len() < 2 {
                return Err(args.arity("at least 2 arguments"));
            }
            Str(args.values.iter().map(|v| v.to_string()).collect())
        }
        "starts-with" => {
            let [s, prefix] = args.strings::<2>()?;
            Boolean(s.starts_with(&prefix))
        }
        "contains" => {
            let [s, part] = args.strings::<2>()?;
            Boolean(s.contains(&part))
        }
        "substring-before" => {
            let [s, marker] = args.strings::<2>()?;
            Str(s.find(&marker).map(|i| s[..i].to_string()).unwrap_or_default())
        }
        "substring-after" => {
            let [s, marker] = args.strings::<2>()?;
            Str(s
                .find(&marker)
                .map(|i| s[i + marker.len()..].to_string())
                .unwrap_or_default())
        }
        "substring" => Str(substring(args)?),
        "string-length" => Number(args.string_or_context(e_ctx)?.chars().count() as f64),
        "normalize-space" => {
            let s = args.string_or_context(e_ctx)?;
            Str(s
                .split(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "))
        }
        "translate" => {
            let [s, from, to] = args.strings::<3>()?;
            Str(translate(&s, &from, &to))
        }

        "boolean" => Boolean(args.one()?.to_bool()),
        "not" => Boolean(!args.one()?.to_bool()),
        "true" => {
            args.none()?;
            Boolean(true)
        }
        "false" => {
            args.none()?;
            Boolean(false)
        }
        "lang" => Boolean(in_language(&args.one()?.to_string(), e_ctx.context_node)),

        "number" => match args.values.len() {
            0 => Number(string_to_number(&e_ctx.context_node.string_value())),
            _ => Number(args.one()?.to_number()),
        },
        "sum" => Number(
            args.one()?
                .into_node_set()?
                .iter()
                .map(|n| string_to_number(&n.string_value()))
                .sum(),
        ),
        "floor" => Number(args.one()?.to_number().floor()),
        "ceiling" => Number(args.one()?.to_number().ceil()),
        "round" => Number(round_half_up(args.one()?.to_number())),

        _ => {
            return Err(XPathError::FunctionError {
                function: name.to_string(),
                message: "Unknown XPath function".to_string(),
            });
        }
    };
    Ok(value)
}

/// `prefix:local` for elements, attributes and PIs; namespace nodes report only their prefix.
fn qualified_name<'a, N: DataSourceNode<'a>>(node: N) -> String {
    match node.name() {
        Some(q) => match q.prefix {
            Some(prefix) if node.node_type() != NodeType::Namespace => format!("{}:{}", prefix, q.local_part),
            _ => q.local_part.to_string(),
        },
        None => String::new(),
    }
}

/// Stable within one document; the leading letter keeps it an NCName.
fn node_id<'a, N: DataSourceNode<'a>>(node: N) -> String {
    let mut hasher = DefaultHasher::new();
    node.hash(&mut hasher);
    format!("id{:x}", hasher.finish())
}

/// Without a DTD, attributes named `id` or `xml:id` act as ID attributes.
fn elements_by_id<'a, N: DataSourceNode<'a>>(arg: XPathValue<N>, e_ctx: &EvaluationContext<'a, '_, N>) -> Vec<N> {
    let tokens: String = match arg {
        XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value() + " ").collect(),
        other => other.to_string(),
    };
    let wanted: HashSet<&str> = tokens.split_whitespace().collect();
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut pending: Vec<N> = e_ctx.context_node.root().children().collect();
    pending.reverse();
    while let Some(node) = pending.pop() {
        if node.node_type() == NodeType::Element
            && node.attributes().any(|attr| {
                attr.name()
                    .is_some_and(|q| q.local_part == "id" && matches!(q.prefix, None | Some("xml")))
                    && wanted.contains(attr.string_value().as_str())
            })
        {
            found.push(node);
        }
        let mark = pending.len();
        pending.extend(node.children());
        pending[mark..].reverse();
    }
    found
}

/// Halves round towards positive infinity; NaN, infinities and zeros are kept.
fn round_half_up(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() || n == 0.0 {
        n
    } else {
        (n + 0.5).floor()
    }
}

/// Characters at 1-based positions `p` with `round(start) <= p < round(start) + round(length)`.
fn substring<'a, N: DataSourceNode<'a>>(args: Args<'_, N>) -> Result<String, XPathError> {
    if !(2..=3).contains(&args.values.len()) {
        return Err(args.arity("2 or 3 arguments"));
    }
    let mut values = args.values.into_iter();
    let s = values.next().map(|v| v.to_string()).unwrap_or_default();
    let first = values.next().map_or(f64::NAN, |v| round_half_up(v.to_number()));
    let end = values
        .next()
        .map_or(f64::INFINITY, |v| first + round_half_up(v.to_number()));

    // NaN bounds fail every comparison, selecting nothing.
    Ok(s.chars()
        .zip(1u32..)
        .filter(|&(_, pos)| {
            let pos = f64::from(pos);
            pos >= first && pos < end
        })
        .map(|(c, _)| c)
        .collect())
}

/// Characters of `from` map to the character at the same index of `to`, or are
/// removed when `to` is shorter. The first occurrence in `from` wins.
fn translate(s: &str, from: &str, to: &str) -> String {
    let to: Vec<char> = to.chars().collect();
    s.chars()
        .filter_map(|c| match from.chars().position(|f| f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect()
}

/// The nearest `xml:lang` on the node or its ancestors decides, sub-languages included.
fn in_language<'a, N: DataSourceNode<'a>>(wanted: &str, context: N) -> bool {
    let wanted = wanted.to_lowercase();
    let start = if context.node_type() == NodeType::Element {
        Some(context)
    } else {
        context.parent()
    };
    let declared = std::iter::successors(start, |n| n.parent()).find_map(|node| {
        node.attributes()
            .find(|attr| {
                attr.name()
                    .is_some_and(|q| q.prefix == Some("xml") && q.local_part == "lang")
            })
            .map(|attr| attr.string_value().to_lowercase())
    });
    declared.is_some_and(|lang| {
        lang == wanted
            || lang
                .strip_prefix(wanted.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimpleResolver;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};
    use crate::engine::EvaluationContext;

    // Holds what an EvaluationContext borrows, so each test can build several.
    struct TestSetup<'a> {
        tree: &'a MockTree<'a>,
        funcs: FunctionRegistry,
        resolver: SimpleResolver<MockNode<'a>>,
    }

    impl<'a> TestSetup<'a> {
        fn new(tree: &'a MockTree<'a>) -> Self {
            TestSetup {
                tree,
                funcs: FunctionRegistry::default(),
                resolver: SimpleResolver::new(),
            }
        }

        fn node(&self, id: usize) -> MockNode<'a> {
            MockNode { id, tree: self.tree }
        }

        fn context<'s>(
            &'s self,
            context_node_id: usize,
            pos: usize,
            size: usize,
        ) -> EvaluationContext<'a, 's, MockNode<'a>> {
            EvaluationContext::new(
                self.node(context_node_id),
                self.node(0),
                &self.funcs,
                pos,
                size,
                &self.resolver,
            )
        }
    }

    fn eval_func<'a, 's>(
        name: &str,
        args: Vec<XPathValue<MockNode<'a>>>,
        e_ctx: &EvaluationContext<'a, 's, MockNode<'a>>,
    ) -> XPathValue<MockNode<'a>> {
        evaluate_function(name, args, e_ctx).unwrap()
    }

    fn s<'a>(text: &str) -> XPathValue<MockNode<'a>> {
        XPathValue::String(text.to_string())
    }

    #[test]
    fn test_func_concat() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        let args = vec![s("Hello"), s(" "), s("World"), XPathValue::Number(42.0)];
        assert_eq!(eval_func("concat", args, &e_ctx).to_string(), "Hello World42");
        assert!(evaluate_function("concat", vec![s("x")], &e_ctx).is_err());
    }

    #[test]
    fn test_func_starts_with_and_contains() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        assert!(eval_func("starts-with", vec![s("abcdef"), s("abc")], &e_ctx).to_bool());
        assert!(!eval_func("starts-with", vec![s("abcdef"), s("def")], &e_ctx).to_bool());
        assert!(eval_func("contains", vec![s("abcdef"), s("cd")], &e_ctx).to_bool());
        assert!(eval_func("contains", vec![s("abc"), s("")], &e_ctx).to_bool());
    }

    #[test]
    fn test_func_substring() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        let n = XPathValue::Number;

        assert_eq!(eval_func("substring", vec![s("12345"), n(2.0), n(3.0)], &e_ctx).to_string(), "234");
        assert_eq!(eval_func("substring", vec![s("12345"), n(2.0)], &e_ctx).to_string(), "2345");
        assert_eq!(eval_func("substring", vec![s("12345"), n(1.5), n(2.6)], &e_ctx).to_string(), "234");
        assert_eq!(eval_func("substring", vec![s("12345"), n(0.0), n(3.0)], &e_ctx).to_string(), "12");
        assert_eq!(eval_func("substring", vec![s("12345"), n(f64::NAN), n(3.0)], &e_ctx).to_string(), "");
        assert_eq!(
            eval_func("substring", vec![s("12345"), n(-42.0), n(f64::INFINITY)], &e_ctx).to_string(),
            "12345"
        );
    }

    #[test]
    fn test_func_substring_before_after() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        assert_eq!(eval_func("substring-before", vec![s("1999/04/01"), s("/")], &e_ctx).to_string(), "1999");
        assert_eq!(eval_func("substring-after", vec![s("1999/04/01"), s("/")], &e_ctx).to_string(), "04/01");
        assert_eq!(eval_func("substring-after", vec![s("abc"), s("x")], &e_ctx).to_string(), "");
    }

    #[test]
    fn test_func_string_length() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx_para = setup.context(1, 1, 1);

        assert_eq!(eval_func("string-length", vec![], &e_ctx_para).to_number(), 5.0);
        assert_eq!(eval_func("string-length", vec![s("four")], &e_ctx_para).to_number(), 4.0);
    }

    #[test]
    fn test_func_normalize_space() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        let args = vec![s("  leading \n and   \t trailing  ")];
        assert_eq!(eval_func("normalize-space", args, &e_ctx).to_string(), "leading and trailing");
    }

    #[test]
    fn test_func_translate() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        assert_eq!(eval_func("translate", vec![s("BAR"), s("ABC"), s("abc")], &e_ctx).to_string(), "baR");
        assert_eq!(eval_func("translate", vec![s("--aaa--"), s("abc-"), s("ABC")], &e_ctx).to_string(), "AAA");
    }

    #[test]
    fn test_boolean_functions() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        assert!(!eval_func("not", vec![XPathValue::Boolean(true)], &e_ctx).to_bool());
        assert!(eval_func("not", vec![XPathValue::Number(0.0)], &e_ctx).to_bool());
        assert!(eval_func("not", vec![s("")], &e_ctx).to_bool());
        assert!(!eval_func("boolean", vec![XPathValue::Number(f64::NAN)], &e_ctx).to_bool());
        assert!(eval_func("boolean", vec![s("false")], &e_ctx).to_bool());
    }

    #[test]
    fn test_func_lang() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx_text = setup.context(4, 1, 1);
        let e_ctx_div = setup.context(5, 1, 1);

        assert!(eval_func("lang", vec![s("en")], &e_ctx_text).to_bool());
        assert!(eval_func("lang", vec![s("EN")], &e_ctx_text).to_bool());
        assert!(!eval_func("lang", vec![s("en-GB")], &e_ctx_text).to_bool());
        assert!(!eval_func("lang", vec![s("en")], &e_ctx_div).to_bool());
    }

    #[test]
    fn test_number_functions() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        let n = XPathValue::Number;
        assert_eq!(eval_func("round", vec![n(2.5)], &e_ctx).to_number(), 3.0);
        assert_eq!(eval_func("round", vec![n(2.4)], &e_ctx).to_number(), 2.0);
        assert_eq!(eval_func("round", vec![n(-2.5)], &e_ctx).to_number(), -2.0);
        assert_eq!(eval_func("round", vec![n(-2.6)], &e_ctx).to_number(), -3.0);
        assert!(eval_func("round", vec![n(f64::NAN)], &e_ctx).to_number().is_nan());
        assert_eq!(eval_func("floor", vec![s("2.7")], &e_ctx).to_number(), 2.0);
        assert_eq!(eval_func("ceiling", vec![n(-1.5)], &e_ctx).to_number(), -1.0);
        assert!(eval_func("number", vec![s("abc")], &e_ctx).to_number().is_nan());
        assert_eq!(eval_func("number", vec![XPathValue::Boolean(true)], &e_ctx).to_number(), 1.0);
    }

    #[test]
    fn test_func_sum() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(0, 1, 1);
        let args = vec![XPathValue::NodeSet(vec![setup.node(1), setup.node(2)])];
        assert!(eval_func("sum", args, &e_ctx).to_number().is_nan());
        let empty = vec![XPathValue::NodeSet(vec![])];
        assert_eq!(eval_func("sum", empty, &e_ctx).to_number(), 0.0);
        assert!(matches!(
            evaluate_function("sum", vec![s("1")], &e_ctx),
            Err(XPathError::TypeError(_))
        ));
    }

    #[test]
    fn test_func_last_and_position() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(1, 2, 5);
        assert_eq!(eval_func("last", vec![], &e_ctx).to_number(), 5.0);
        assert_eq!(eval_func("position", vec![], &e_ctx).to_number(), 2.0);
    }

    #[test]
    fn test_name_functions() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx_para = setup.context(1, 1, 1);
        let e_ctx_text = setup.context(4, 1, 1);

        assert_eq!(eval_func("local-name", vec![], &e_ctx_para).to_string(), "para");
        assert_eq!(eval_func("local-name", vec![], &e_ctx_text).to_string(), "");
        let lang = vec![XPathValue::NodeSet(vec![setup.node(3)])];
        assert_eq!(eval_func("name", lang.clone(), &e_ctx_para).to_string(), "xml:lang");
        assert_eq!(eval_func("local-name", lang.clone(), &e_ctx_para).to_string(), "lang");
        assert_eq!(
            eval_func("namespace-uri", lang, &e_ctx_para).to_string(),
            "http://www.w3.org/XML/1998/namespace"
        );
        assert_eq!(eval_func("namespace-uri", vec![], &e_ctx_para).to_string(), "");
        let empty = vec![XPathValue::NodeSet(vec![])];
        assert_eq!(eval_func("name", empty, &e_ctx_para).to_string(), "");
    }

    #[test]
    fn test_func_id_and_generate_id() {
        let tree = create_test_tree();
        let setup = TestSetup::new(&tree);
        let e_ctx = setup.context(6, 1, 1);
        let found = eval_func("id", vec![s(" p1 missing ")], &e_ctx);
        assert!(matches!(found, XPathValue::NodeSet(ref nodes) if nodes == &vec![setup.node(1)]));

        let first = eval_func("generate-id", vec![], &e_ctx).to_string();
        let again = eval_func("generate-id", vec![XPathValue::NodeSet(vec![setup.node(6)])], &e_ctx).to_string();
        let other = eval_func("generate-id", vec![XPathValue::NodeSet(vec![setup.node(1)])], &e_ctx).to_string();
        assert!(first.starts_with("id"));
        assert_eq!(first, again);
        assert_ne!(first, other);
    }

    #[test]
    fn test_registry_membership() {
        let registry = FunctionRegistry::default();
        assert!(registry.contains("substring-after"));
        assert!(registry.contains("namespace-uri"));
        assert!(!registry.contains("key"));
    }
}
