//! Defines the core abstraction for a navigable, read-only source tree.
use std::hash::Hash;

/// A qualified name, consisting of an optional prefix and a local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName<'a> {
    pub prefix: Option<&'a str>,
    pub local_part: &'a str,
}

/// The type of a node in the source tree, aligned with the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Namespace,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The universal contract for a node in a read-only, hierarchical source tree.
///
/// The expression engine and the transformation processor are written exclusively
/// against this trait. `Ord` must follow document order: a parent sorts before its
/// namespace nodes, which sort before its attributes, which sort before its children.
///
/// `'a` is the lifetime of the underlying document.
pub trait DataSourceNode<'a>:
    std::fmt::Debug + Clone + Copy + PartialEq + Eq + Hash + PartialOrd + Ord + 'a
{
    /// The type of the node (Element, Text, Attribute, etc.).
    fn node_type(&self) -> NodeType;

    /// The qualified name of the node. Returns `None` for unnamed node types such
    /// as text or the root. For a processing instruction this is its target, for a
    /// namespace node the local part is the declared prefix (empty for the default).
    fn name(&self) -> Option<QName<'a>>;

    /// The namespace URI of an element or attribute name.
    fn namespace_uri(&self) -> Option<&'a str> {
        None
    }

    /// The string value of the node, as defined by the XPath 1.0 `string()` function.
    fn string_value(&self) -> String;

    /// An iterator over the attribute nodes of this node.
    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// An iterator over the in-scope namespace nodes of an element.
    fn namespaces(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        Box::new(std::iter::empty())
    }

    /// An iterator over the child nodes of this node.
    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// The parent node. Attributes and namespace nodes report their owner element.
    fn parent(&self) -> Option<Self>;

    /// The root of the tree this node belongs to.
    fn root(&self) -> Self {
        let mut current = *self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }
}

/// In-memory trees for exercising the engine without an XML parser. Public so
/// downstream crates can reuse them in their own unit tests.
pub mod tests {
    use super::*;
    use std::cmp::Ordering;
    use std::hash::Hasher;

    #[derive(Debug, Clone)]
    struct Entry<'a> {
        node_type: NodeType,
        name: Option<QName<'a>>,
        namespace: Option<&'a str>,
        value: String,
        parent: Option<usize>,
        children: Vec<usize>,
        attributes: Vec<usize>,
        position: usize,
    }

    /// Nodes addressed by id. Ids are assigned by the caller; document order is
    /// derived from the parent/child links once the tree is complete.
    #[derive(Debug, Default)]
    pub struct MockTree<'a> {
        entries: Vec<Option<Entry<'a>>>,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct MockNode<'a> {
        pub id: usize,
        pub tree: &'a MockTree<'a>,
    }

    impl<'a> MockTree<'a> {
        fn entry(&self, id: usize) -> Option<&Entry<'a>> {
            self.entries.get(id).and_then(Option::as_ref)
        }

        fn insert(&mut self, id: usize, node_type: NodeType, name: Option<QName<'a>>, value: &str) {
            if self.entries.len() <= id {
                self.entries.resize(id + 1, None);
            }
            self.entries[id] = Some(Entry {
                node_type,
                name,
                namespace: None,
                value: value.to_string(),
                parent: None,
                children: Vec::new(),
                attributes: Vec::new(),
                position: usize::MAX,
            });
        }

        fn attach(&mut self, parent: usize, child: usize, as_attribute: bool) {
            if let Some(Some(entry)) = self.entries.get_mut(child) {
                entry.parent = Some(parent);
            }
            if let Some(Some(entry)) = self.entries.get_mut(parent) {
                if as_attribute {
                    entry.attributes.push(child);
                } else {
                    entry.children.push(child);
                }
            }
        }

        /// Numbers every reachable node in document order, attributes right after their owner.
        fn number_nodes(&mut self) {
            let mut order = Vec::new();
            let mut pending = vec![0usize];
            while let Some(id) = pending.pop() {
                order.push(id);
                if let Some(entry) = self.entry(id) {
                    order.extend(entry.attributes.iter().copied());
                    pending.extend(entry.children.iter().rev());
                }
            }
            for (position, id) in order.into_iter().enumerate() {
                if let Some(Some(entry)) = self.entries.get_mut(id) {
                    entry.position = position;
                }
            }
        }
    }

    impl<'a> MockNode<'a> {
        fn entry(&self) -> &'a Entry<'a> {
            match self.tree.entry(self.id) {
                Some(entry) => entry,
                None => panic!("mock node {} does not exist", self.id),
            }
        }
    }

    impl PartialEq for MockNode<'_> {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }
    impl Eq for MockNode<'_> {}

    impl PartialOrd for MockNode<'_> {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for MockNode<'_> {
        fn cmp(&self, other: &Self) -> Ordering {
            self.entry().position.cmp(&other.entry().position)
        }
    }

    impl Hash for MockNode<'_> {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    impl<'a> DataSourceNode<'a> for MockNode<'a> {
        fn node_type(&self) -> NodeType {
            self.entry().node_type
        }

        fn name(&self) -> Option<QName<'a>> {
            self.entry().name
        }

        fn namespace_uri(&self) -> Option<&'a str> {
            self.entry().namespace
        }

        fn string_value(&self) -> String {
            self.entry().value.clone()
        }

        fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(self.entry().attributes.iter().map(move |&id| MockNode { id, tree }))
        }

        fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(self.entry().children.iter().map(move |&id| MockNode { id, tree }))
        }

        fn parent(&self) -> Option<Self> {
            let tree = self.tree;
            self.entry().parent.map(|id| MockNode { id, tree })
        }
    }

    fn local(local_part: &str) -> Option<QName<'_>> {
        Some(QName {
            prefix: None,
            local_part,
        })
    }

    /// A small document exercising every node kind:
    ///
    /// ```text
    /// <root>                                       0
    ///   <para id="p1" xml:lang="en">Hello</para>   1, attributes 2 and 3, text 4
    ///   <!-- comment node -->                      8
    ///   <div/>                                     5
    ///   <?pi-target pi-value?>                     9
    ///   <para>World</para>                         6, text 7
    /// </root>
    /// ```
    pub fn create_test_tree<'a>() -> MockTree<'a> {
        let mut tree = MockTree::default();
        tree.insert(0, NodeType::Root, None, "HelloWorld");
        tree.insert(1, NodeType::Element, local("para"), "Hello");
        tree.insert(2, NodeType::Attribute, local("id"), "p1");
        tree.insert(
            3,
            NodeType::Attribute,
            Some(QName {
                prefix: Some("xml"),
                local_part: "lang",
            }),
            "en",
        );
        tree.insert(4, NodeType::Text, None, "Hello");
        tree.insert(5, NodeType::Element, local("div"), "");
        tree.insert(6, NodeType::Element, local("para"), "World");
        tree.insert(7, NodeType::Text, None, "World");
        tree.insert(8, NodeType::Comment, None, " comment node ");
        tree.insert(9, NodeType::ProcessingInstruction, local("pi-target"), "pi-value");
        if let Some(Some(lang)) = tree.entries.get_mut(3) {
            lang.namespace = Some("http://www.w3.org/XML/1998/namespace");
        }

        for child in [1, 8, 5, 9, 6] {
            tree.attach(0, child, false);
        }
        tree.attach(1, 2, true);
        tree.attach(1, 3, true);
        tree.attach(1, 4, false);
        tree.attach(6, 7, false);
        tree.number_nodes();
        tree
    }

    /// `<root><n>v0</n><n>v1</n>...</root>` with the elements numbered from 1.
    pub fn create_value_tree<'a>(values: &[&str]) -> MockTree<'a> {
        let mut tree = MockTree::default();
        tree.insert(0, NodeType::Root, None, &values.concat());
        for (i, value) in values.iter().enumerate() {
            tree.insert(i + 1, NodeType::Element, local("n"), value);
            tree.attach(0, i + 1, false);
        }
        tree.number_nodes();
        tree
    }

    #[test]
    fn mock_order_follows_document_order() {
        let tree = create_test_tree();
        let mut all: Vec<MockNode> = (0..10).map(|id| MockNode { id, tree: &tree }).collect();
        all.sort();
        let ids: Vec<usize> = all.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 8, 5, 9, 6, 7]);
    }

    #[test]
    fn attributes_report_their_owner() {
        let tree = create_test_tree();
        let lang = MockNode { id: 3, tree: &tree };
        assert_eq!(lang.parent().map(|p| p.id), Some(1));
        assert_eq!(MockNode { id: 7, tree: &tree }.root().id, 0);
    }
}
