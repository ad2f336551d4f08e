//! Expression grammar for XPath 1.0, written with `nom` combinators.
//!
//! Binary operators are parsed by precedence tier (see `TIERS`); everything
//! tighter than `*` is handled by the unary, union, path and primary parsers.

use crate::ast::*;
use crate::error::XPathError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, peek, recognize},
    error::ErrorKind,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded},
};

type NomError<'a> = nom::error::Error<&'a str>;
type PResult<'a, T> = IResult<&'a str, T>;

/// Binary operator tiers, loosest first. Within a tier longer symbols come first.
const TIERS: [&[(&str, BinaryOperator)]; 6] = [
    &[("or", BinaryOperator::Or)],
    &[("and", BinaryOperator::And)],
    &[("!=", BinaryOperator::NotEquals), ("=", BinaryOperator::Equals)],
    &[
        ("<=", BinaryOperator::LessThanOrEqual),
        (">=", BinaryOperator::GreaterThanOrEqual),
        ("<", BinaryOperator::LessThan),
        (">", BinaryOperator::GreaterThan),
    ],
    &[("+", BinaryOperator::Plus), ("-", BinaryOperator::Minus)],
    &[
        ("*", BinaryOperator::Multiply),
        ("div", BinaryOperator::Divide),
        ("mod", BinaryOperator::Modulo),
    ],
];

pub fn parse_expression(input: &str) -> Result<Expression, XPathError> {
    let (rest, expr) =
        expression(input.trim()).map_err(|e| XPathError::XPathParse(input.to_string(), e.to_string()))?;
    if !rest.is_empty() {
        return Err(XPathError::XPathParse(
            input.to_string(),
            format!("unexpected input at '{}'", rest),
        ));
    }
    Ok(expr)
}

pub fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn symbol<'a>(c: char) -> impl Parser<&'a str, Output = char, Error = NomError<'a>> {
    ws(char(c))
}

fn fail(input: &str, kind: ErrorKind) -> nom::Err<NomError<'_>> {
    nom::Err::Error(NomError::new(input, kind))
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

pub fn expression(input: &str) -> PResult<'_, Expression> {
    tiered(input, 0)
}

/// Left-associative chain of operators from `TIERS[tier]`. An operator whose
/// right operand does not parse is left unconsumed.
fn tiered(input: &str, tier: usize) -> PResult<'_, Expression> {
    let Some(ops) = TIERS.get(tier) else {
        return unary_expr(input);
    };
    let (mut rest, mut left) = tiered(input, tier + 1)?;
    while let Some((after_op, op)) = operator(ops, rest.trim_start()) {
        match tiered(after_op.trim_start(), tier + 1) {
            Ok((after, right)) => {
                left = Expression::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
                rest = after;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((rest, left))
}

/// Word operators (`and`, `div`, ...) must not run into a following name: `order` is an element.
fn operator<'a>(ops: &[(&str, BinaryOperator)], input: &'a str) -> Option<(&'a str, BinaryOperator)> {
    ops.iter().find_map(|&(sym, op)| {
        let rest = input.strip_prefix(sym)?;
        let is_word = sym.starts_with(|c: char| c.is_ascii_alphabetic());
        (!is_word || !rest.starts_with(is_name_char)).then_some((rest, op))
    })
}

fn unary_expr(input: &str) -> PResult<'_, Expression> {
    if let Ok((rest, _)) = symbol('-').parse(input) {
        let (rest, operand) = unary_expr(rest)?;
        return Ok((
            rest,
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(operand),
            },
        ));
    }
    union_expr(input)
}

fn union_expr(input: &str) -> PResult<'_, Expression> {
    let (rest, first) = path_expr(input)?;
    let (rest, others) = many0(preceded(symbol('|'), path_expr)).parse(rest)?;
    let union = others.into_iter().fold(first, |left, right| Expression::BinaryOp {
        left: Box::new(left),
        op: BinaryOperator::Union,
        right: Box::new(right),
    });
    Ok((rest, union))
}

/// A filter expression or location path, optionally continued by `/step` or `//step`.
fn path_expr(input: &str) -> PResult<'_, Expression> {
    // Primary expressions first, so `position()` is not read as a step named `position`.
    let (rest, head) = alt((filter_expr, map(ws(location_path), Expression::LocationPath))).parse(input)?;
    let (rest, tail) = relative_steps(rest)?;
    if tail.is_empty() {
        return Ok((rest, head));
    }
    let path = match head {
        Expression::LocationPath(mut path) => {
            path.steps.extend(tail);
            path
        }
        other => LocationPath {
            origin: PathOrigin::Expr(Box::new(other)),
            steps: tail,
        },
    };
    Ok((rest.trim_start(), Expression::LocationPath(path)))
}

/// Zero or more `/step` and `//step` continuations; `//` adds a descendant-or-self step.
fn relative_steps(input: &str) -> PResult<'_, Vec<Step>> {
    let (rest, continuations) = many0(pair(ws(alt((tag("//"), tag("/")))), step)).parse(input)?;
    let mut steps = Vec::with_capacity(continuations.len());
    for (separator, next) in continuations {
        if separator == "//" {
            steps.push(Step::any_node(Axis::DescendantOrSelf));
        }
        steps.push(next);
    }
    Ok((rest, steps))
}

fn location_path(input: &str) -> PResult<'_, LocationPath> {
    let (rest, mut path) = if let Some(rest) = input.strip_prefix("//") {
        let (rest, first) = step(rest)?;
        (
            rest,
            LocationPath::absolute(vec![Step::any_node(Axis::DescendantOrSelf), first]),
        )
    } else if let Some(rest) = input.strip_prefix('/') {
        match step(rest) {
            Ok((rest, first)) => (rest, LocationPath::absolute(vec![first])),
            // `/` alone selects the root and cannot be continued.
            Err(_) => return Ok((rest, LocationPath::absolute(Vec::new()))),
        }
    } else {
        let (rest, first) = step(input)?;
        (rest, LocationPath::relative(vec![first]))
    };
    let (rest, more) = relative_steps(rest)?;
    path.steps.extend(more);
    Ok((rest, path))
}

fn filter_expr(input: &str) -> PResult<'_, Expression> {
    let (rest, primary) = primary_expr(input)?;
    let (rest, predicates) = many0(predicate).parse(rest)?;
    if predicates.is_empty() {
        return Ok((rest, primary));
    }
    Ok((
        rest,
        Expression::Filter {
            expr: Box::new(primary),
            predicates,
        },
    ))
}

fn primary_expr(input: &str) -> PResult<'_, Expression> {
    ws(alt((
        map(preceded(char('$'), q_name), Expression::Variable),
        map(number, Expression::Number),
        map(string_literal, Expression::Literal),
        function_call,
        delimited(symbol('('), expression, symbol(')')),
    )))
    .parse(input)
}

/// `Digits ('.' Digits?)?` or `'.' Digits`; no exponents, `inf` or `nan`.
fn number(input: &str) -> PResult<'_, f64> {
    let digits = |s: &str| s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let whole = digits(input);
    let mut end = whole;
    if input[end..].starts_with('.') {
        end += 1 + digits(&input[end + 1..]);
    }
    if whole == 0 && end <= 1 {
        return Err(fail(input, ErrorKind::Digit));
    }
    let value = input[..end]
        .parse::<f64>()
        .map_err(|_| fail(input, ErrorKind::Float))?;
    Ok((&input[end..], value))
}

/// A single- or double-quoted literal. XPath 1.0 has no escapes inside literals.
pub fn string_literal(input: &str) -> PResult<'_, String> {
    let Some(quote) = input.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return Err(fail(input, ErrorKind::Char));
    };
    let body = &input[1..];
    match body.find(quote) {
        Some(end) => Ok((&body[end + 1..], body[..end].to_string())),
        None => Err(fail(input, ErrorKind::Char)),
    }
}

pub fn nc_name(input: &str) -> PResult<'_, &str> {
    recognize(pair(take_while1(is_name_start), take_while(is_name_char))).parse(input)
}

pub fn q_name(input: &str) -> PResult<'_, String> {
    map(recognize(pair(nc_name, opt(pair(tag(":"), nc_name)))), str::to_string).parse(input)
}

/// Name tests, wildcards and node-type tests such as `text()` or
/// `processing-instruction('target')`.
pub fn node_test(input: &str) -> PResult<'_, NodeTest> {
    if let Some(rest) = input.strip_prefix('*') {
        return Ok((rest, NodeTest::Wildcard));
    }
    let (rest, name) = q_name(input)?;
    if !name.contains(':') {
        if let Some(rest) = rest.strip_prefix(":*") {
            return Ok((rest, NodeTest::NamespaceWildcard(name)));
        }
    }
    let Some(kind) = NodeTypeTest::from_name(&name) else {
        return Ok((rest, NodeTest::Name(name)));
    };
    let Ok((args, _)) = symbol('(').parse(rest) else {
        return Ok((rest, NodeTest::Name(name)));
    };
    if kind == NodeTypeTest::ProcessingInstruction {
        if let Ok((rest, (target, _))) = (ws(string_literal), char(')')).parse(args) {
            return Ok((rest, NodeTest::ProcessingInstructionTarget(target)));
        }
    }
    let (rest, _) = char::<_, NomError>(')').parse(args)?;
    Ok((rest, NodeTest::NodeType(kind)))
}

fn axis_specifier(input: &str) -> PResult<'_, Axis> {
    for (name, axis) in Axis::NAMES {
        if let Some(rest) = input.strip_prefix(name) {
            if let Some(rest) = rest.trim_start().strip_prefix("::") {
                return Ok((rest.trim_start(), axis));
            }
        }
    }
    Err(fail(input, ErrorKind::Tag))
}

pub fn predicate(input: &str) -> PResult<'_, Expression> {
    delimited(symbol('['), expression, symbol(']')).parse(input)
}

pub fn step(input: &str) -> PResult<'_, Step> {
    if let Some(rest) = input.strip_prefix("..") {
        return Ok((rest, Step::any_node(Axis::Parent)));
    }
    if let Some(rest) = input.strip_prefix('.') {
        return Ok((rest, Step::any_node(Axis::SelfAxis)));
    }
    let (rest, axis) = match input.strip_prefix('@') {
        Some(rest) => (rest, Axis::Attribute),
        None => axis_specifier(input).unwrap_or((input, Axis::Child)),
    };
    let (rest, node_test) = node_test(rest)?;
    let (rest, predicates) = many0(predicate).parse(rest)?;
    Ok((
        rest,
        Step {
            axis,
            node_test,
            predicates,
        },
    ))
}

fn function_call(input: &str) -> PResult<'_, Expression> {
    let (rest, name) = q_name(input)?;
    // `text()` and friends are node tests; a name without `(` is a step.
    if NodeTypeTest::from_name(&name).is_some() || peek(symbol('(')).parse(rest).is_err() {
        return Err(fail(input, ErrorKind::Verify));
    }
    let (rest, args) =
        delimited(symbol('('), separated_list0(symbol(','), expression), symbol(')')).parse(rest)?;
    Ok((rest, Expression::FunctionCall { name, args }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Step {
        Step {
            axis: Axis::Child,
            node_test: NodeTest::Name(name.into()),
            predicates: vec![],
        }
    }

    fn path(steps: Vec<Step>) -> Expression {
        Expression::LocationPath(LocationPath::relative(steps))
    }

    fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn steps_of(text: &str) -> Vec<Step> {
        match parse_expression(text).unwrap() {
            Expression::LocationPath(lp) => lp.steps,
            other => panic!("expected a location path for {text}, got {other:?}"),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        assert_eq!(
            parse_expression("1 + 2 * 3").unwrap(),
            binary(
                Expression::Number(1.0),
                BinaryOperator::Plus,
                binary(Expression::Number(2.0), BinaryOperator::Multiply, Expression::Number(3.0)),
            )
        );
    }

    #[test]
    fn test_same_tier_is_left_associative() {
        assert_eq!(
            parse_expression("8 - 4 - 2").unwrap(),
            binary(
                binary(Expression::Number(8.0), BinaryOperator::Minus, Expression::Number(4.0)),
                BinaryOperator::Minus,
                Expression::Number(2.0),
            )
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let cmp = |l: &str, op, r: f64| binary(path(vec![named(l)]), op, Expression::Number(r));
        assert_eq!(
            parse_expression("a < 1 or b >= 2 and c != 3").unwrap(),
            binary(
                cmp("a", BinaryOperator::LessThan, 1.0),
                BinaryOperator::Or,
                binary(
                    cmp("b", BinaryOperator::GreaterThanOrEqual, 2.0),
                    BinaryOperator::And,
                    cmp("c", BinaryOperator::NotEquals, 3.0),
                ),
            )
        );
    }

    #[test]
    fn test_unary_minus_nests() {
        assert_eq!(
            parse_expression("3 - -x").unwrap(),
            binary(
                Expression::Number(3.0),
                BinaryOperator::Minus,
                Expression::UnaryOp {
                    op: UnaryOperator::Minus,
                    expr: Box::new(path(vec![named("x")])),
                },
            )
        );
    }

    #[test]
    fn test_word_operators_need_a_boundary() {
        assert_eq!(
            parse_expression("order | android").unwrap(),
            binary(path(vec![named("order")]), BinaryOperator::Union, path(vec![named("android")]))
        );
        assert_eq!(
            parse_expression("mod mod div").unwrap(),
            binary(path(vec![named("mod")]), BinaryOperator::Modulo, path(vec![named("div")]))
        );
    }

    #[test]
    fn test_hyphenated_names_are_not_subtraction() {
        assert_eq!(steps_of("line-item"), vec![named("line-item")]);
    }

    #[test]
    fn test_explicit_axes() {
        let cases = [
            ("ancestor-or-self::node()", Axis::AncestorOrSelf),
            ("ancestor::x", Axis::Ancestor),
            ("following-sibling :: y", Axis::FollowingSibling),
            ("following::*", Axis::Following),
            ("preceding-sibling::z", Axis::PrecedingSibling),
            ("namespace::*", Axis::Namespace),
            ("self::node()", Axis::SelfAxis),
        ];
        for (text, expected) in cases {
            assert_eq!(steps_of(text)[0].axis, expected, "{text}");
        }
    }

    #[test]
    fn test_abbreviations_expand_to_steps() {
        assert_eq!(
            steps_of("../@id"),
            vec![
                Step::any_node(Axis::Parent),
                Step {
                    axis: Axis::Attribute,
                    node_test: NodeTest::Name("id".into()),
                    predicates: vec![],
                },
            ]
        );
        assert_eq!(steps_of("."), vec![Step::any_node(Axis::SelfAxis)]);
        assert_eq!(
            steps_of("a//b"),
            vec![named("a"), Step::any_node(Axis::DescendantOrSelf), named("b")]
        );
    }

    #[test]
    fn test_absolute_paths() {
        assert_eq!(
            parse_expression("/").unwrap(),
            Expression::LocationPath(LocationPath::absolute(vec![]))
        );
        assert_eq!(
            parse_expression("//item").unwrap(),
            Expression::LocationPath(LocationPath::absolute(vec![
                Step::any_node(Axis::DescendantOrSelf),
                named("item"),
            ]))
        );
    }

    #[test]
    fn test_node_tests() {
        assert_eq!(steps_of("svg:*")[0].node_test, NodeTest::NamespaceWildcard("svg".into()));
        assert_eq!(steps_of("svg:rect")[0].node_test, NodeTest::Name("svg:rect".into()));
        assert_eq!(steps_of("p/text()")[1].node_test, NodeTest::NodeType(NodeTypeTest::Text));
        assert_eq!(steps_of("comment ( )")[0].node_test, NodeTest::NodeType(NodeTypeTest::Comment));
        assert_eq!(
            steps_of("processing-instruction( 'pi' )")[0].node_test,
            NodeTest::ProcessingInstructionTarget("pi".into())
        );
        // Without parentheses a node-type word is an ordinary element name.
        assert_eq!(steps_of("text")[0].node_test, NodeTest::Name("text".into()));
    }

    #[test]
    fn test_paths_continuing_a_filter_expression() {
        match parse_expression("key('k', 1)//b").unwrap() {
            Expression::LocationPath(lp) => {
                assert!(matches!(
                    lp.origin,
                    PathOrigin::Expr(ref e) if matches!(**e, Expression::FunctionCall { ref name, .. } if name == "key")
                ));
                assert_eq!(lp.steps, vec![Step::any_node(Axis::DescendantOrSelf), named("b")]);
            }
            other => panic!("expected a location path, got {other:?}"),
        }

        match parse_expression("(//a)[last()]/b").unwrap() {
            Expression::LocationPath(lp) => {
                assert!(matches!(lp.origin, PathOrigin::Expr(ref e) if matches!(**e, Expression::Filter { .. })));
                assert_eq!(lp.steps, vec![named("b")]);
            }
            other => panic!("expected a location path, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_and_predicates() {
        assert_eq!(
            parse_expression("$rows[2]").unwrap(),
            Expression::Filter {
                expr: Box::new(Expression::Variable("rows".into())),
                predicates: vec![Expression::Number(2.0)],
            }
        );
        let steps = steps_of("row[@kind = \"x\"][1]");
        assert_eq!(steps[0].predicates.len(), 2);
        assert_eq!(steps[0].predicates[1], Expression::Number(1.0));
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(
            parse_expression("concat ( 'a' , \"b\" )").unwrap(),
            Expression::FunctionCall {
                name: "concat".into(),
                args: vec![Expression::Literal("a".into()), Expression::Literal("b".into())],
            }
        );
        assert_eq!(
            parse_expression("last()").unwrap(),
            Expression::FunctionCall {
                name: "last".into(),
                args: vec![],
            }
        );
    }

    #[test]
    fn test_literals_and_numbers() {
        assert_eq!(parse_expression(".25").unwrap(), Expression::Number(0.25));
        assert_eq!(parse_expression("7.").unwrap(), Expression::Number(7.0));
        assert_eq!(parse_expression("\"it's\"").unwrap(), Expression::Literal("it's".into()));
        assert!(parse_expression("nan").unwrap().is_location_path());
    }

    #[test]
    fn test_fractional_numbers_keep_their_fraction() {
        assert_eq!(parse_expression("2.5").unwrap(), Expression::Number(2.5));
        assert_eq!(
            parse_expression("1 + 2.5").unwrap(),
            binary(Expression::Number(1.0), BinaryOperator::Plus, Expression::Number(2.5))
        );
        assert_eq!(
            parse_expression("price * 1.5").unwrap(),
            binary(path(vec![named("price")]), BinaryOperator::Multiply, Expression::Number(1.5))
        );
        assert_eq!(
            parse_expression("0.5 div .25").unwrap(),
            binary(Expression::Number(0.5), BinaryOperator::Divide, Expression::Number(0.25))
        );
    }

    #[test]
    fn test_walk_reports_variables_and_functions() {
        let expr = parse_expression("count($items[@id = $wanted]) + string-length(key('k', $v))").unwrap();
        let mut variables = Vec::new();
        expr.for_each_variable(&mut |name| variables.push(name.to_string()));
        variables.sort();
        assert_eq!(variables, vec!["items", "v", "wanted"]);

        let mut functions = Vec::new();
        expr.for_each_function(&mut |name| functions.push(name.to_string()));
        assert_eq!(functions, vec!["count", "string-length", "key"]);
    }

    #[test]
    fn test_incomplete_input_is_rejected() {
        for text in ["foo[", "1 +", "@", "'open", "a/", "f(1,"] {
            assert!(parse_expression(text).is_err(), "{text}");
        }
    }
}
