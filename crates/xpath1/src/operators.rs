//! Arithmetic, comparison and set operators with XPath 1.0 conversion rules.

use crate::ast::BinaryOperator;
use crate::datasource::DataSourceNode;
use crate::engine::{XPathValue, string_to_number};
use crate::error::XPathError;

/// Applies a binary operator to two already evaluated operands.
///
/// `and`/`or` are normally short-circuited by the engine before reaching this point.
pub fn evaluate<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    let value = match op {
        BinaryOperator::Or => XPathValue::Boolean(left.to_bool() || right.to_bool()),
        BinaryOperator::And => XPathValue::Boolean(left.to_bool() && right.to_bool()),
        BinaryOperator::Equals
        | BinaryOperator::NotEquals
        | BinaryOperator::LessThan
        | BinaryOperator::LessThanOrEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanOrEqual => XPathValue::Boolean(compare(op, &left, &right)),
        BinaryOperator::Plus => XPathValue::Number(left.to_number() + right.to_number()),
        BinaryOperator::Minus => XPathValue::Number(left.to_number() - right.to_number()),
        BinaryOperator::Multiply => XPathValue::Number(left.to_number() * right.to_number()),
        BinaryOperator::Divide => XPathValue::Number(left.to_number() / right.to_number()),
        // Truncating remainder: the result takes the sign of the dividend.
        BinaryOperator::Modulo => XPathValue::Number(left.to_number() % right.to_number()),
        BinaryOperator::Union => {
            let mut nodes = left.into_node_set()?;
            nodes.extend(right.into_node_set()?);
            nodes.sort();
            nodes.dedup();
            XPathValue::NodeSet(nodes)
        }
    };
    Ok(value)
}

/// Compares two values. Node-set operands are existentially quantified.
pub fn compare<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: &XPathValue<N>,
    right: &XPathValue<N>,
) -> bool {
    match (left, right) {
        (XPathValue::NodeSet(l), XPathValue::NodeSet(r)) => {
            let right_values: Vec<String> = r.iter().map(|n| n.string_value()).collect();
            l.iter().any(|a| {
                let a = a.string_value();
                right_values.iter().any(|b| compare_strings(op, &a, b))
            })
        }
        (XPathValue::NodeSet(nodes), other) => compare_node_set(op, nodes, other, false),
        (other, XPathValue::NodeSet(nodes)) => compare_node_set(op, nodes, other, true),
        _ => compare_atomic(op, left, right),
    }
}

fn is_equality(op: BinaryOperator) -> bool {
    matches!(op, BinaryOperator::Equals | BinaryOperator::NotEquals)
}

fn compare_numbers(op: BinaryOperator, a: f64, b: f64) -> bool {
    match op {
        BinaryOperator::Equals => a == b,
        BinaryOperator::NotEquals => a != b,
        BinaryOperator::LessThan => a < b,
        BinaryOperator::LessThanOrEqual => a <= b,
        BinaryOperator::GreaterThan => a > b,
        BinaryOperator::GreaterThanOrEqual => a >= b,
        _ => false,
    }
}

fn compare_strings(op: BinaryOperator, a: &str, b: &str) -> bool {
    match op {
        BinaryOperator::Equals => a == b,
        BinaryOperator::NotEquals => a != b,
        _ => compare_numbers(op, string_to_number(a), string_to_number(b)),
    }
}

fn compare_bools(op: BinaryOperator, a: bool, b: bool) -> bool {
    match op {
        BinaryOperator::Equals => a == b,
        BinaryOperator::NotEquals => a != b,
        _ => compare_numbers(op, f64::from(u8::from(a)), f64::from(u8::from(b))),
    }
}

/// Puts the node-set operand back on the side it was written on.
fn ordered<T>(swapped: bool, node_side: T, other: T) -> (T, T) {
    if swapped { (other, node_side) } else { (node_side, other) }
}

/// `swapped` is true when the node-set was the right operand.
fn compare_node_set<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    nodes: &[N],
    other: &XPathValue<N>,
    swapped: bool,
) -> bool {
    match other {
        XPathValue::Boolean(b) => {
            let (x, y) = ordered(swapped, !nodes.is_empty(), *b);
            compare_bools(op, x, y)
        }
        XPathValue::Number(n) => nodes.iter().any(|node| {
            let (x, y) = ordered(swapped, string_to_number(&node.string_value()), *n);
            compare_numbers(op, x, y)
        }),
        XPathValue::NodeSet(_) => false,
        text => {
            let s = text.to_string();
            nodes.iter().any(|node| {
                let value = node.string_value();
                if swapped {
                    compare_strings(op, &s, &value)
                } else {
                    compare_strings(op, &value, &s)
                }
            })
        }
    }
}

fn compare_atomic<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: &XPathValue<N>,
    right: &XPathValue<N>,
) -> bool {
    if !is_equality(op) {
        return compare_numbers(op, left.to_number(), right.to_number());
    }
    let either = |pred: fn(&XPathValue<N>) -> bool| pred(left) || pred(right);
    if either(|v| matches!(v, XPathValue::Boolean(_))) {
        compare_bools(op, left.to_bool(), right.to_bool())
    } else if either(|v| matches!(v, XPathValue::Number(_))) {
        compare_numbers(op, left.to_number(), right.to_number())
    } else {
        compare_strings(op, &left.to_string(), &right.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, create_test_tree, create_value_tree};

    type V<'a> = XPathValue<MockNode<'a>>;

    fn s<'a>(text: &str) -> V<'a> {
        XPathValue::String(text.to_string())
    }

    #[test]
    fn node_set_equality_is_existential() {
        let tree = create_test_tree();
        let paras = XPathValue::NodeSet(vec![
            MockNode { id: 1, tree: &tree },
            MockNode { id: 6, tree: &tree },
        ]);
        assert!(compare(BinaryOperator::Equals, &paras, &s("World")));
        // Both = and != can hold for the same node-set.
        assert!(compare(BinaryOperator::NotEquals, &paras, &s("World")));
        let empty: V = XPathValue::NodeSet(vec![]);
        assert!(!compare(BinaryOperator::Equals, &empty, &s("")));
        assert!(!compare(BinaryOperator::NotEquals, &empty, &s("")));
        assert!(compare(BinaryOperator::Equals, &empty, &XPathValue::Boolean(false)));
    }

    #[test]
    fn node_set_keeps_its_side_in_relational_comparisons() {
        let tree = create_value_tree(&["2", "3"]);
        let nodes: V = XPathValue::NodeSet(vec![MockNode { id: 1, tree: &tree }, MockNode { id: 2, tree: &tree }]);
        assert!(compare(BinaryOperator::LessThan, &nodes, &XPathValue::Number(2.5)));
        assert!(!compare(BinaryOperator::GreaterThan, &nodes, &XPathValue::Number(3.0)));
        assert!(compare(BinaryOperator::GreaterThan, &XPathValue::Number(3.0), &nodes));
        assert!(!compare(BinaryOperator::LessThan, &XPathValue::Number(3.0), &nodes));

        let yes: V = XPathValue::Boolean(true);
        let no: V = XPathValue::Boolean(false);
        assert!(compare(BinaryOperator::LessThan, &no, &nodes));
        assert!(!compare(BinaryOperator::LessThan, &nodes, &no));
        assert!(compare(BinaryOperator::GreaterThanOrEqual, &nodes, &yes));
    }

    #[test]
    fn relational_operators_compare_numbers() {
        let lt = compare::<MockNode>(BinaryOperator::LessThan, &s("10"), &s("9"));
        assert!(!lt);
        let ge = compare::<MockNode>(BinaryOperator::GreaterThanOrEqual, &XPathValue::Boolean(true), &XPathValue::Number(1.0));
        assert!(ge);
    }

    #[test]
    fn equality_prefers_boolean_then_number() {
        assert!(compare::<MockNode>(BinaryOperator::Equals, &s("abc"), &XPathValue::Boolean(true)));
        assert!(compare::<MockNode>(BinaryOperator::Equals, &s(" 2 "), &XPathValue::Number(2.0)));
        assert!(!compare::<MockNode>(BinaryOperator::Equals, &XPathValue::Number(f64::NAN), &XPathValue::Number(f64::NAN)));
    }

    #[test]
    fn arithmetic_follows_ieee() {
        let div = evaluate::<MockNode>(BinaryOperator::Divide, XPathValue::Number(1.0), XPathValue::Number(0.0)).unwrap();
        assert_eq!(div.to_string(), "Infinity");
        let modulo = evaluate::<MockNode>(BinaryOperator::Modulo, XPathValue::Number(-5.0), XPathValue::Number(2.0)).unwrap();
        assert_eq!(modulo.to_number(), -1.0);
    }

    #[test]
    fn union_requires_node_sets() {
        let result = evaluate::<MockNode>(BinaryOperator::Union, s("a"), XPathValue::NodeSet(vec![]));
        assert!(matches!(result, Err(XPathError::TypeError(_))));
    }
}
