//! Result tree fragments: detached trees built by variable bodies and similar
//! constructs, carried around as an XPath value.

/// An expanded name as it will be written to the output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FragmentName {
    pub prefix: String,
    pub local: String,
    pub namespace: String,
}

impl FragmentName {
    pub fn new(prefix: &str, local: &str, namespace: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            local: local.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// `prefix:local`, or just `local` without a prefix.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentNode {
    Element {
        name: FragmentName,
        namespaces: Vec<(String, String)>,
        attributes: Vec<(FragmentName, String)>,
        children: Vec<FragmentNode>,
    },
    Text {
        value: String,
        disable_escaping: bool,
    },
    Comment(String),
    ProcessingInstruction {
        target: String,
        value: String,
    },
}

impl FragmentNode {
    fn append_string_value(&self, out: &mut String) {
        match self {
            FragmentNode::Element { children, .. } => {
                for child in children {
                    child.append_string_value(out);
                }
            }
            FragmentNode::Text { value, .. } => out.push_str(value),
            FragmentNode::Comment(_) | FragmentNode::ProcessingInstruction { .. } => {}
        }
    }
}

/// The root of a result tree fragment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultFragment {
    pub children: Vec<FragmentNode>,
}

impl ResultFragment {
    /// Concatenation of all descendant text, as for a root node.
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.append_string_value(&mut out);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_value_skips_comments_and_pis() {
        let fragment = ResultFragment {
            children: vec![
                FragmentNode::Text {
                    value: "a".into(),
                    disable_escaping: false,
                },
                FragmentNode::Comment("ignored".into()),
                FragmentNode::Element {
                    name: FragmentName::new("", "b", ""),
                    namespaces: vec![],
                    attributes: vec![(FragmentName::new("", "x", ""), "attr".into())],
                    children: vec![FragmentNode::Text {
                        value: "c".into(),
                        disable_escaping: false,
                    }],
                },
                FragmentNode::ProcessingInstruction {
                    target: "t".into(),
                    value: "ignored".into(),
                },
            ],
        };
        assert_eq!(fragment.string_value(), "ac");
        assert_eq!(FragmentName::new("p", "b", "urn:x").qualified(), "p:b");
    }
}
