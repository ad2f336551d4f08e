use super::{Record, RecordKind, RecordOutput, SinkStatus};
use crate::error::XsltError;
use trellis_xpath1::{FragmentNode, ResultFragment};

/// Collects records into a detached tree. Used for variable bodies and any
/// other instruction whose content is captured rather than written.
#[derive(Debug, Default)]
pub struct FragmentOutput {
    open: Vec<FragmentNode>,
    root: ResultFragment,
}

impl FragmentOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&mut self, node: FragmentNode) {
        match self.open.last_mut() {
            Some(FragmentNode::Element { children, .. }) => children.push(node),
            _ => self.root.children.push(node),
        }
    }

    fn close(&mut self) {
        if let Some(node) = self.open.pop() {
            self.append(node);
        }
    }

    pub fn into_fragment(mut self) -> ResultFragment {
        while !self.open.is_empty() {
            self.close();
        }
        self.root
    }
}

impl RecordOutput for FragmentOutput {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        match record.kind {
            RecordKind::Element => self.open.push(FragmentNode::Element {
                name: record.name.clone(),
                namespaces: record.namespaces.clone(),
                attributes: record.attributes.clone(),
                children: Vec::new(),
            }),
            RecordKind::EndElement => self.close(),
            RecordKind::Text => self.append(FragmentNode::Text {
                value: record.value.clone(),
                disable_escaping: record.disable_escaping,
            }),
            RecordKind::Comment => self.append(FragmentNode::Comment(record.value.clone())),
            RecordKind::ProcessingInstruction => self.append(FragmentNode::ProcessingInstruction {
                target: record.name.local.clone(),
                value: record.value.clone(),
            }),
        }
        Ok(SinkStatus::Continue)
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_xpath1::FragmentName;

    #[test]
    fn nests_children_under_open_element() {
        let mut out = FragmentOutput::new();
        let name = FragmentName::new("", "a", "");
        out.record_done(&Record::element(name.clone(), 0)).unwrap();
        out.record_done(&Record::text("hi", false, 1)).unwrap();
        out.record_done(&Record::end_element(name, 0)).unwrap();
        out.record_done(&Record::text("tail", false, 0)).unwrap();

        let fragment = out.into_fragment();
        assert_eq!(fragment.children.len(), 2);
        assert_eq!(fragment.string_value(), "hitail");
    }
}
