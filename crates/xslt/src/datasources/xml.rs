// XML datasource implementation using roxmltree
use crate::ast::WhitespaceRules;
use roxmltree::{Node, NodeId};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use trellis_xpath1::{DataSourceNode, NodeType, QName, XML_NAMESPACE};

/// Wrapper around roxmltree::Document providing data source capabilities.
///
/// Whitespace-only text nodes removed by `xsl:strip-space` stay in the
/// underlying document and are skipped during navigation.
pub struct XmlDocument<'input> {
    doc: roxmltree::Document<'input>,
    stripped: HashSet<NodeId>,
}

impl<'input> XmlDocument<'input> {
    pub fn parse(text: &'input str) -> Result<Self, roxmltree::Error> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options)?;
        Ok(Self {
            doc,
            stripped: HashSet::new(),
        })
    }

    /// Parses `text` and applies the stylesheet's strip-space rules.
    pub fn parse_stripped(text: &'input str, rules: &WhitespaceRules) -> Result<Self, roxmltree::Error> {
        let mut document = Self::parse(text)?;
        document.strip_whitespace(rules);
        Ok(document)
    }

    /// Marks the whitespace-only text children of elements the rules strip.
    /// `xml:space="preserve"` on the nearest ancestor keeps them.
    pub fn strip_whitespace(&mut self, rules: &WhitespaceRules) {
        self.stripped.clear();
        if rules.is_empty() {
            return;
        }
        for node in self.doc.descendants().filter(|n| n.is_text()) {
            let whitespace = node
                .text()
                .is_some_and(|t| t.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r')));
            let Some(parent) = node.parent_element() else {
                continue;
            };
            if !whitespace || preserves_space(parent) {
                continue;
            }
            let tag = parent.tag_name();
            if rules.should_strip(tag.namespace().unwrap_or(""), tag.name()) {
                self.stripped.insert(node.id());
            }
        }
        log::debug!("Stripped {} whitespace-only text nodes", self.stripped.len());
    }

    pub fn root_node(&self) -> XmlNode<'_, 'input> {
        XmlNode {
            node: self.doc.root(),
            slot: Slot::Node,
            stripped: &self.stripped,
        }
    }
}

fn preserves_space(element: Node) -> bool {
    element
        .ancestors()
        .filter(|n| n.is_element())
        .find_map(|n| n.attribute((XML_NAMESPACE, "space")))
        .is_some_and(|v| v == "preserve")
}

/// Which part of an element a node stands for. Attributes and namespace
/// nodes are not navigable roxmltree nodes, so they are addressed by index
/// on their owner element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Slot {
    Node,
    Namespace(usize),
    Attribute(usize),
}

#[derive(Clone, Copy)]
pub struct XmlNode<'a, 'input> {
    node: Node<'a, 'input>,
    slot: Slot,
    stripped: &'a HashSet<NodeId>,
}

impl<'a, 'input> XmlNode<'a, 'input> {
    pub fn inner(&self) -> Option<Node<'a, 'input>> {
        match self.slot {
            Slot::Node => Some(self.node),
            _ => None,
        }
    }

    fn with_slot(&self, node: Node<'a, 'input>, slot: Slot) -> Self {
        XmlNode {
            node,
            slot,
            stripped: self.stripped,
        }
    }

    fn namespace_entry(&self, index: usize) -> Option<&'a roxmltree::Namespace<'input>> {
        self.node.namespaces().nth(index)
    }
}

impl std::fmt::Debug for XmlNode<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlNode")
            .field("node", &self.node.id())
            .field("slot", &self.slot)
            .finish()
    }
}

impl XmlNode<'_, '_> {
    fn document_address(&self) -> usize {
        std::ptr::from_ref(self.node.document()) as usize
    }
}

impl PartialEq for XmlNode<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.node.id() == other.node.id()
            && self.slot == other.slot
            && std::ptr::eq(self.node.document(), other.node.document())
    }
}

impl Eq for XmlNode<'_, '_> {}

impl PartialOrd for XmlNode<'_, '_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XmlNode<'_, '_> {
    // roxmltree ids follow document order; an element's namespace and
    // attribute nodes sort right after it and before its first child.
    // Nodes of different documents order by document address.
    fn cmp(&self, other: &Self) -> Ordering {
        self.document_address()
            .cmp(&other.document_address())
            .then(self.node.id().get().cmp(&other.node.id().get()))
            .then(self.slot.cmp(&other.slot))
    }
}

impl Hash for XmlNode<'_, '_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.document_address().hash(state);
        self.node.id().hash(state);
        self.slot.hash(state);
    }
}

impl<'a> DataSourceNode<'a> for XmlNode<'a, 'a> {
    fn node_type(&self) -> NodeType {
        match self.slot {
            Slot::Attribute(_) => NodeType::Attribute,
            Slot::Namespace(_) => NodeType::Namespace,
            Slot::Node => {
                let node = self.node;
                if node.is_root() {
                    NodeType::Root
                } else if node.is_element() {
                    NodeType::Element
                } else if node.is_text() {
                    NodeType::Text
                } else if node.is_comment() {
                    NodeType::Comment
                } else {
                    NodeType::ProcessingInstruction
                }
            }
        }
    }

    fn name(&self) -> Option<QName<'a>> {
        match self.slot {
            Slot::Node if self.node.is_element() => {
                let tag = self.node.tag_name();
                let prefix = tag
                    .namespace()
                    .and_then(|uri| self.node.lookup_prefix(uri))
                    .filter(|p| !p.is_empty());
                Some(QName {
                    prefix,
                    local_part: tag.name(),
                })
            }
            Slot::Node => self.node.pi().map(|pi| QName {
                prefix: None,
                local_part: pi.target,
            }),
            Slot::Attribute(index) => self.node.attributes().nth(index).map(|attr| {
                let prefix = match attr.namespace() {
                    Some(XML_NAMESPACE) => Some("xml"),
                    Some(uri) => self
                        .node
                        .lookup_prefix(uri)
                        .filter(|p| !p.is_empty()),
                    None => None,
                };
                QName {
                    prefix,
                    local_part: attr.name(),
                }
            }),
            Slot::Namespace(index) => self.namespace_entry(index).map(|ns| QName {
                prefix: None,
                local_part: ns.name().unwrap_or(""),
            }),
        }
    }

    fn namespace_uri(&self) -> Option<&'a str> {
        match self.slot {
            Slot::Node if self.node.is_element() => self.node.tag_name().namespace(),
            Slot::Attribute(index) => self.node.attributes().nth(index).and_then(|a| a.namespace()),
            _ => None,
        }
    }

    fn string_value(&self) -> String {
        match self.slot {
            Slot::Attribute(index) => self
                .node
                .attributes()
                .nth(index)
                .map(|attr| attr.value().to_string())
                .unwrap_or_default(),
            Slot::Namespace(index) => self
                .namespace_entry(index)
                .map(|ns| ns.uri().to_string())
                .unwrap_or_default(),
            Slot::Node => {
                let node = self.node;
                if node.is_text() || node.is_comment() {
                    node.text().unwrap_or("").to_string()
                } else if node.is_element() || node.is_root() {
                    node.descendants()
                        .filter(|n| n.is_text() && !self.stripped.contains(&n.id()))
                        .filter_map(|n| n.text())
                        .collect()
                } else {
                    node.pi().and_then(|pi| pi.value).unwrap_or("").to_string()
                }
            }
        }
    }

    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        if self.slot != Slot::Node || !self.node.is_element() {
            return Box::new(std::iter::empty());
        }
        let this = *self;
        let count = self.node.attributes().len();
        Box::new((0..count).map(move |i| this.with_slot(this.node, Slot::Attribute(i))))
    }

    fn namespaces(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        if self.slot != Slot::Node || !self.node.is_element() {
            return Box::new(std::iter::empty());
        }
        let this = *self;
        Box::new(
            self.node
                .namespaces()
                .enumerate()
                .filter(|(_, ns)| !ns.uri().is_empty())
                .map(move |(i, _)| this.with_slot(this.node, Slot::Namespace(i))),
        )
    }

    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        if self.slot != Slot::Node {
            return Box::new(std::iter::empty());
        }
        let this = *self;
        let stripped = self.stripped;
        Box::new(
            self.node
                .children()
                .filter(move |n| !stripped.contains(&n.id()))
                .map(move |n| this.with_slot(n, Slot::Node)),
        )
    }

    fn parent(&self) -> Option<Self> {
        match self.slot {
            Slot::Node => self.node.parent().map(|p| self.with_slot(p, Slot::Node)),
            _ => Some(self.with_slot(self.node, Slot::Node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{WhitespaceRule, WhitespaceTest};

    fn element<'a>(parent: XmlNode<'a, 'a>, name: &str) -> XmlNode<'a, 'a> {
        parent
            .children()
            .find(|n| n.name().is_some_and(|q| q.local_part == name))
            .unwrap()
    }

    #[test]
    fn attributes_follow_their_element_in_document_order() {
        let xml = r#"<root><item id="123" status="active">Text</item></root>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        let item = element(element(doc.root_node(), "root"), "item");

        let attrs: Vec<_> = item.attributes().collect();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].node_type(), NodeType::Attribute);
        assert_eq!(attrs[0].name().unwrap().local_part, "id");
        assert_eq!(attrs[1].string_value(), "active");
        assert_eq!(attrs[0].parent(), Some(item));

        let text = item.children().next().unwrap();
        assert!(item < attrs[0]);
        assert!(attrs[0] < attrs[1]);
        assert!(attrs[1] < text);
    }

    #[test]
    fn prefixes_and_namespace_nodes_are_exposed() {
        let xml = r#"<p:root xmlns:p="urn:p" xmlns="urn:d"><child p:a="1"/></p:root>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        let root = element(doc.root_node(), "root");
        let name = root.name().unwrap();
        assert_eq!(name.prefix, Some("p"));
        assert_eq!(root.namespace_uri(), Some("urn:p"));

        let child = element(root, "child");
        assert_eq!(child.namespace_uri(), Some("urn:d"));
        assert_eq!(child.name().unwrap().prefix, None);
        let attr = child.attributes().next().unwrap();
        assert_eq!(attr.name().unwrap().prefix, Some("p"));

        let uris: Vec<String> = child
            .namespaces()
            .filter(|n| n.name().is_some_and(|q| q.local_part != "xml"))
            .map(|n| n.string_value())
            .collect();
        assert!(uris.contains(&"urn:p".to_string()));
        assert!(uris.contains(&"urn:d".to_string()));
    }

    #[test]
    fn strip_space_hides_whitespace_text() {
        let xml = "<doc>\n  <a> </a>\n  <pre xml:space=\"preserve\"> </pre>\n</doc>";
        let rules = WhitespaceRules::new(vec![WhitespaceRule {
            test: WhitespaceTest::Any,
            strip: true,
            precedence: 0,
        }]);
        let doc = XmlDocument::parse_stripped(xml, &rules).unwrap();
        let root = element(doc.root_node(), "doc");
        assert_eq!(root.children().count(), 2);
        assert_eq!(element(root, "a").children().count(), 0);
        assert_eq!(element(root, "pre").children().count(), 1);
        assert_eq!(root.string_value(), " ");
    }
}
