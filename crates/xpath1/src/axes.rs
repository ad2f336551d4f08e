//! Node collection along each XPath axis.
//!
//! Results are in proximity order: document order for forward axes, nearest
//! first for reverse axes. A single context node never yields duplicates, so
//! no de-duplication happens here.

use crate::ast::Axis;
use crate::datasource::{DataSourceNode, NodeType};

fn is_attribute_like<'a, N: DataSourceNode<'a>>(node: N) -> bool {
    matches!(node.node_type(), NodeType::Attribute | NodeType::Namespace)
}

pub fn nodes_on_axis<'a, N: DataSourceNode<'a>>(axis: Axis, node: N) -> Vec<N> {
    let mut out = Vec::new();
    match axis {
        Axis::SelfAxis => out.push(node),
        Axis::Child => out.extend(node.children()),
        Axis::Attribute => out.extend(node.attributes()),
        Axis::Namespace => out.extend(node.namespaces()),
        Axis::Parent => out.extend(node.parent()),
        Axis::Descendant => descendants(node, &mut out),
        Axis::DescendantOrSelf => {
            out.push(node);
            descendants(node, &mut out);
        }
        Axis::Ancestor => out.extend(ancestors(node)),
        Axis::AncestorOrSelf => {
            out.push(node);
            out.extend(ancestors(node));
        }
        Axis::FollowingSibling => {
            if !is_attribute_like(node) {
                out.extend(siblings(node).skip_while(|s| *s != node).skip(1));
            }
        }
        Axis::PrecedingSibling => {
            if !is_attribute_like(node) {
                let before: Vec<N> = siblings(node).take_while(|s| *s != node).collect();
                out.extend(before.into_iter().rev());
            }
        }
        Axis::Following => following(node, &mut out),
        Axis::Preceding => preceding(node, &mut out),
    }
    out
}

fn siblings<'a, N: DataSourceNode<'a>>(node: N) -> impl Iterator<Item = N> {
    node.parent().into_iter().flat_map(|p| p.children())
}

fn ancestors<'a, N: DataSourceNode<'a>>(node: N) -> impl Iterator<Item = N> {
    std::iter::successors(node.parent(), |n| n.parent())
}

/// Pre-order walk below `node`, excluding `node` itself.
fn descendants<'a, N: DataSourceNode<'a>>(node: N, out: &mut Vec<N>) {
    let mut pending: Vec<N> = node.children().collect();
    pending.reverse();
    while let Some(current) = pending.pop() {
        out.push(current);
        let mark = pending.len();
        pending.extend(current.children());
        pending[mark..].reverse();
    }
}

fn following<'a, N: DataSourceNode<'a>>(node: N, out: &mut Vec<N>) {
    let mut anchor = node;
    if is_attribute_like(node) {
        // The owner's content follows its attributes.
        if let Some(owner) = node.parent() {
            descendants(owner, out);
            anchor = owner;
        }
    }
    for level in std::iter::once(anchor).chain(ancestors(anchor)) {
        for sibling in siblings(level).skip_while(|s| *s != level).skip(1) {
            out.push(sibling);
            descendants(sibling, out);
        }
    }
}

fn preceding<'a, N: DataSourceNode<'a>>(node: N, out: &mut Vec<N>) {
    let anchor = if is_attribute_like(node) {
        node.parent().unwrap_or(node)
    } else {
        node
    };
    for level in std::iter::once(anchor).chain(ancestors(anchor)) {
        let before: Vec<N> = siblings(level).take_while(|s| *s != level).collect();
        for sibling in before.into_iter().rev() {
            let mut subtree = vec![sibling];
            descendants(sibling, &mut subtree);
            out.extend(subtree.into_iter().rev());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};

    fn ids<'a>(tree: &'a MockTree<'a>, axis: Axis, id: usize) -> Vec<usize> {
        nodes_on_axis(axis, MockNode { id, tree }).iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_forward_axes_are_in_document_order() {
        let tree = create_test_tree();
        assert_eq!(ids(&tree, Axis::Child, 0), vec![1, 8, 5, 9, 6]);
        assert_eq!(ids(&tree, Axis::Descendant, 0), vec![1, 4, 8, 5, 9, 6, 7]);
        assert_eq!(ids(&tree, Axis::DescendantOrSelf, 1), vec![1, 4]);
        assert_eq!(ids(&tree, Axis::FollowingSibling, 1), vec![8, 5, 9, 6]);
        assert_eq!(ids(&tree, Axis::Following, 4), vec![8, 5, 9, 6, 7]);
    }

    #[test]
    fn test_reverse_axes_are_nearest_first() {
        let tree = create_test_tree();
        assert_eq!(ids(&tree, Axis::Ancestor, 4), vec![1, 0]);
        assert_eq!(ids(&tree, Axis::AncestorOrSelf, 4), vec![4, 1, 0]);
        assert_eq!(ids(&tree, Axis::PrecedingSibling, 6), vec![9, 5, 8, 1]);
        assert_eq!(ids(&tree, Axis::Preceding, 5), vec![8, 4, 1]);
    }

    #[test]
    fn test_attributes_have_no_siblings() {
        let tree = create_test_tree();
        assert!(ids(&tree, Axis::FollowingSibling, 2).is_empty());
        assert!(ids(&tree, Axis::PrecedingSibling, 2).is_empty());
        assert_eq!(ids(&tree, Axis::Parent, 2), vec![1]);
    }

    #[test]
    fn test_following_from_attribute_starts_with_owner_content() {
        let tree = create_test_tree();
        assert_eq!(ids(&tree, Axis::Following, 2).first(), Some(&4));
    }
}
