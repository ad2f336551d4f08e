//! Namespace fixup for element records.
//!
//! Names reach the builder as (prefix, local, namespace) triples and the
//! declarations a start tag needs are only worked out when the record is
//! flushed. [`NamespaceScope::fix_up`] is pure, so a record that overflows can
//! be fixed up again on retry with the same result.

use super::Record;
use trellis_xpath1::XML_NAMESPACE;

const INVENTED_PREFIX: &str = "xp_";

#[derive(Debug, Clone, Default)]
pub struct NamespaceScope {
    frames: Vec<Vec<(String, String)>>,
    invented: usize,
}

/// An element record ready to be written, plus the bookkeeping needed to
/// commit it to the scope.
#[derive(Debug)]
pub struct FixedRecord {
    pub record: Record,
    invented: usize,
}

fn declared<'d>(decls: &'d [(String, String)], prefix: &str) -> Option<&'d str> {
    decls.iter().find(|(p, _)| p == prefix).map(|(_, u)| u.as_str())
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// The namespace bound to `prefix` by the enclosing output elements.
    pub fn lookup(&self, prefix: &str) -> Option<&str> {
        for frame in self.frames.iter().rev() {
            if let Some(uri) = declared(frame, prefix) {
                return Some(uri);
            }
        }
        match prefix {
            "" => Some(""),
            "xml" => Some(XML_NAMESPACE),
            _ => None,
        }
    }

    fn visible(&self, decls: &[(String, String)], prefix: &str) -> Option<String> {
        declared(decls, prefix)
            .or_else(|| self.lookup(prefix))
            .map(str::to_string)
    }

    /// Works out the declarations and prefixes `record` needs to be
    /// namespace-well-formed in the current scope.
    pub fn fix_up(&self, record: &Record) -> FixedRecord {
        let mut out = record.clone();
        let mut decls: Vec<(String, String)> = Vec::new();
        let mut invented = 0;

        for (prefix, uri) in &record.namespaces {
            if prefix == "xml" || prefix == "xmlns" || (uri.is_empty() && !prefix.is_empty()) {
                continue;
            }
            if declared(&decls, prefix).is_none() {
                decls.push((prefix.clone(), uri.clone()));
            }
        }

        // The element name owns its prefix.
        if out.name.namespace.is_empty() {
            out.name.prefix.clear();
        }
        let (prefix, uri) = (out.name.prefix.clone(), out.name.namespace.clone());
        match decls.iter_mut().find(|(p, _)| *p == prefix) {
            Some(decl) => decl.1 = uri,
            None => {
                if self.lookup(&prefix) != Some(uri.as_str()) {
                    decls.push((prefix, uri));
                }
            }
        }

        for (name, _) in out.attributes.iter_mut() {
            if name.namespace.is_empty() {
                name.prefix.clear();
                continue;
            }
            if name.namespace == XML_NAMESPACE {
                name.prefix = "xml".to_string();
                continue;
            }
            let wanted = name.prefix.clone();
            if !wanted.is_empty() {
                match self.visible(&decls, &wanted) {
                    Some(uri) if uri == name.namespace => continue,
                    Some(_) if declared(&decls, &wanted).is_some() || wanted == out.name.prefix => {}
                    _ => {
                        decls.push((wanted, name.namespace.clone()));
                        continue;
                    }
                }
            }

            let existing = decls
                .iter()
                .chain(self.frames.iter().rev().flatten())
                .find(|(p, u)| {
                    !p.is_empty()
                        && *u == name.namespace
                        && self.visible(&decls, p).as_deref() == Some(name.namespace.as_str())
                })
                .map(|(p, _)| p.clone());
            let prefix = match existing {
                Some(p) => p,
                None => loop {
                    let candidate = format!("{}{}", INVENTED_PREFIX, self.invented + invented);
                    invented += 1;
                    if self.visible(&decls, &candidate).is_none() {
                        decls.push((candidate.clone(), name.namespace.clone()));
                        break candidate;
                    }
                },
            };
            name.prefix = prefix;
        }

        decls.retain(|(p, u)| self.lookup(p) != Some(u.as_str()));
        out.namespaces = decls;
        FixedRecord { record: out, invented }
    }

    /// Opens the scope of a flushed element.
    pub fn push(&mut self, fixed: &FixedRecord) {
        self.frames.push(fixed.record.namespaces.clone());
        self.invented += fixed.invented;
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_xpath1::FragmentName;

    fn element(prefix: &str, local: &str, ns: &str) -> Record {
        Record::element(FragmentName::new(prefix, local, ns), 0)
    }

    #[test]
    fn declares_element_namespace_once() {
        let mut scope = NamespaceScope::new();
        let outer = scope.fix_up(&element("p", "a", "urn:p"));
        assert_eq!(outer.record.namespaces, vec![("p".to_string(), "urn:p".to_string())]);
        scope.push(&outer);

        let inner = scope.fix_up(&element("p", "b", "urn:p"));
        assert!(inner.record.namespaces.is_empty());
    }

    #[test]
    fn undeclares_default_namespace_for_unqualified_child() {
        let mut scope = NamespaceScope::new();
        let outer = scope.fix_up(&element("", "a", "urn:d"));
        assert_eq!(outer.record.namespaces, vec![(String::new(), "urn:d".to_string())]);
        scope.push(&outer);

        let inner = scope.fix_up(&element("", "b", ""));
        assert_eq!(inner.record.namespaces, vec![(String::new(), String::new())]);
    }

    #[test]
    fn namespaced_attribute_gets_a_prefix() {
        let scope = NamespaceScope::new();
        let mut record = element("", "a", "urn:d");
        record
            .attributes
            .push((FragmentName::new("", "x", "urn:attr"), "1".to_string()));
        let fixed = scope.fix_up(&record);
        let (name, _) = &fixed.record.attributes[0];
        assert_eq!(name.prefix, "xp_0");
        assert!(fixed
            .record
            .namespaces
            .contains(&("xp_0".to_string(), "urn:attr".to_string())));
    }

    #[test]
    fn conflicting_attribute_prefix_is_renamed() {
        let scope = NamespaceScope::new();
        let mut record = element("p", "a", "urn:one");
        record
            .attributes
            .push((FragmentName::new("p", "x", "urn:two"), "1".to_string()));
        let fixed = scope.fix_up(&record);
        assert_eq!(fixed.record.name.prefix, "p");
        let (name, _) = &fixed.record.attributes[0];
        assert_ne!(name.prefix, "p");
        assert_eq!(declared(&fixed.record.namespaces, &name.prefix), Some("urn:two"));
    }

    #[test]
    fn fix_up_is_repeatable() {
        let scope = NamespaceScope::new();
        let mut record = element("", "a", "");
        record
            .attributes
            .push((FragmentName::new("", "x", "urn:attr"), "1".to_string()));
        let first = scope.fix_up(&record);
        let second = scope.fix_up(&record);
        assert_eq!(first.record, second.record);
    }
}
