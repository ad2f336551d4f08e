//! The record builder sitting between instructions and a sink.
//!
//! At most one record is pending at any time. A begin, text or end event that
//! starts a new record first flushes the pending one, so every call reaches
//! the sink at most once. When the sink overflows nothing is committed and the
//! caller repeats the same call later.

use super::fragment::FragmentOutput;
use super::scope::NamespaceScope;
use super::state_machine::{ContentState, StateMachine};
use super::{NodeKind, OutputResult, Record, RecordKind, RecordOutput, SinkStatus};
use crate::ast::OutputName;
use crate::error::XsltError;
use trellis_xpath1::ResultFragment;

pub enum OutputTarget<'o> {
    Sink(Box<dyn RecordOutput + 'o>),
    Fragment(FragmentOutput),
}

impl OutputTarget<'_> {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        match self {
            OutputTarget::Sink(sink) => sink.record_done(record),
            OutputTarget::Fragment(fragment) => fragment.record_done(record),
        }
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        match self {
            OutputTarget::Sink(sink) => sink.the_end(),
            OutputTarget::Fragment(fragment) => fragment.the_end(),
        }
    }
}

pub struct RecordBuilder<'o> {
    target: OutputTarget<'o>,
    machine: StateMachine,
    pending: Option<Record>,
    scope: NamespaceScope,
    open_names: Vec<OutputName>,
    ignore_level: usize,
}

impl<'o> RecordBuilder<'o> {
    pub fn new(target: OutputTarget<'o>) -> Self {
        RecordBuilder {
            target,
            machine: StateMachine::new(),
            pending: None,
            scope: NamespaceScope::new(),
            open_names: Vec::new(),
            ignore_level: 0,
        }
    }

    pub fn for_sink(sink: impl RecordOutput + 'o) -> Self {
        Self::new(OutputTarget::Sink(Box::new(sink)))
    }

    pub fn for_fragment() -> Self {
        Self::new(OutputTarget::Fragment(FragmentOutput::new()))
    }

    pub fn state(&self) -> ContentState {
        self.machine.state()
    }

    pub fn is_ignoring(&self) -> bool {
        self.ignore_level > 0
    }

    fn flush_pending(&mut self) -> Result<SinkStatus, XsltError> {
        let Some(record) = self.pending.as_ref() else {
            return Ok(SinkStatus::Continue);
        };
        let status = match record.kind {
            RecordKind::Element => {
                let fixed = self.scope.fix_up(record);
                let status = self.target.record_done(&fixed.record)?;
                if status != SinkStatus::Overflow {
                    self.open_names.push(fixed.record.name.clone());
                    self.scope.push(&fixed);
                }
                status
            }
            RecordKind::EndElement => {
                let status = self.target.record_done(record)?;
                if status != SinkStatus::Overflow {
                    self.scope.pop();
                }
                status
            }
            _ => self.target.record_done(record)?,
        };
        if status != SinkStatus::Overflow {
            self.pending = None;
        }
        Ok(status)
    }

    fn reject(&mut self, kind: NodeKind, name: &OutputName) -> OutputResult {
        log::warn!(
            "Dropping {:?} '{}': not allowed while output is in state {:?}",
            kind,
            name.qualified(),
            self.machine.state()
        );
        if kind != NodeKind::Namespace {
            self.ignore_level = 1;
        }
        OutputResult::Error
    }

    /// Starts an element, attribute, comment or processing instruction. For
    /// processing instructions `name.local` is the target.
    pub fn begin(&mut self, kind: NodeKind, name: OutputName) -> Result<OutputResult, XsltError> {
        if self.ignore_level > 0 {
            self.ignore_level += 1;
            return Ok(OutputResult::Ignore);
        }
        if !self.machine.can_begin(kind) {
            return Ok(self.reject(kind, &name));
        }
        let depth = self.machine.depth();
        match kind {
            NodeKind::Attribute => {
                let Some(element) = self.pending.as_mut().filter(|r| r.kind == RecordKind::Element) else {
                    return Err(XsltError::execution("attribute started without a pending start tag"));
                };
                element
                    .attributes
                    .retain(|(n, _)| !(n.local == name.local && n.namespace == name.namespace));
                element.attributes.push((name, String::new()));
                self.machine.begin(kind);
                Ok(OutputResult::Continue)
            }
            NodeKind::Namespace => {
                let uri = name.namespace;
                self.namespace(&name.local, &uri)
            }
            NodeKind::Text => Ok(OutputResult::Continue),
            NodeKind::Element | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                let status = self.flush_pending()?;
                if status == SinkStatus::Overflow {
                    return Ok(OutputResult::Overflow);
                }
                self.machine.begin(kind);
                self.pending = Some(match kind {
                    NodeKind::Element => Record::element(name, depth),
                    NodeKind::Comment => Record::comment(depth),
                    _ => Record::processing_instruction(name, depth),
                });
                Ok(status.into())
            }
        }
    }

    /// Adds a namespace node to the pending start tag.
    pub fn namespace(&mut self, prefix: &str, uri: &str) -> Result<OutputResult, XsltError> {
        if self.ignore_level > 0 {
            return Ok(OutputResult::Ignore);
        }
        if !self.machine.can_begin(NodeKind::Namespace) {
            return Ok(self.reject(NodeKind::Namespace, &OutputName::new("xmlns", prefix, uri)));
        }
        if let Some(element) = self.pending.as_mut().filter(|r| r.kind == RecordKind::Element) {
            match element.namespaces.iter_mut().find(|(p, _)| p == prefix) {
                Some(existing) => existing.1 = uri.to_string(),
                None => element.namespaces.push((prefix.to_string(), uri.to_string())),
            }
        }
        Ok(OutputResult::Continue)
    }

    pub fn text(&mut self, value: &str, disable_escaping: bool) -> Result<OutputResult, XsltError> {
        if self.ignore_level > 0 {
            return Ok(OutputResult::Ignore);
        }
        if value.is_empty() {
            return Ok(OutputResult::Continue);
        }
        match self.machine.state() {
            ContentState::Attribute => {
                if let Some((_, v)) = self.pending.as_mut().and_then(|r| r.attributes.last_mut()) {
                    v.push_str(value);
                }
                Ok(OutputResult::Continue)
            }
            ContentState::Comment | ContentState::ProcessingInstruction => {
                if let Some(record) = self.pending.as_mut() {
                    record.value.push_str(value);
                }
                Ok(OutputResult::Continue)
            }
            ContentState::Document | ContentState::StartTag | ContentState::Content => {
                if let Some(record) = self.pending.as_mut()
                    && record.kind == RecordKind::Text
                    && record.disable_escaping == disable_escaping
                {
                    record.value.push_str(value);
                    return Ok(OutputResult::Continue);
                }
                let status = self.flush_pending()?;
                if status == SinkStatus::Overflow {
                    return Ok(OutputResult::Overflow);
                }
                self.machine.text();
                self.pending = Some(Record::text(value, disable_escaping, self.machine.depth()));
                Ok(status.into())
            }
        }
    }

    pub fn end(&mut self, kind: NodeKind) -> Result<OutputResult, XsltError> {
        if self.ignore_level > 0 {
            self.ignore_level -= 1;
            return Ok(OutputResult::Ignore);
        }
        match kind {
            NodeKind::Element => {
                let status = self.flush_pending()?;
                if status == SinkStatus::Overflow {
                    return Ok(OutputResult::Overflow);
                }
                if !self.machine.end(kind) {
                    return Err(XsltError::execution("unbalanced end of element in output"));
                }
                let name = self.open_names.pop().unwrap_or_default();
                self.pending = Some(Record::end_element(name, self.machine.depth()));
                Ok(status.into())
            }
            NodeKind::Attribute | NodeKind::Comment | NodeKind::ProcessingInstruction => {
                if !self.machine.end(kind) {
                    return Err(XsltError::execution(format!("unbalanced end of {:?} in output", kind)));
                }
                Ok(OutputResult::Continue)
            }
            NodeKind::Text | NodeKind::Namespace => Ok(OutputResult::Continue),
        }
    }

    /// Writes a complete attribute.
    pub fn attribute(&mut self, name: OutputName, value: &str) -> Result<OutputResult, XsltError> {
        let result = self.begin(NodeKind::Attribute, name)?;
        if result.is_consumed() {
            self.text(value, false)?;
            self.end(NodeKind::Attribute)?;
        }
        Ok(result)
    }

    /// Writes a complete comment or processing instruction.
    pub fn leaf(&mut self, kind: NodeKind, name: OutputName, value: &str) -> Result<OutputResult, XsltError> {
        let result = self.begin(kind, name)?;
        if result.is_consumed() {
            self.text(value, false)?;
            self.end(kind)?;
        }
        Ok(result)
    }

    /// Flushes the last record and tells the sink the output is complete.
    pub fn finish(&mut self) -> Result<OutputResult, XsltError> {
        let status = self.flush_pending()?;
        if status == SinkStatus::Overflow {
            return Ok(OutputResult::Overflow);
        }
        self.target.the_end()?;
        Ok(status.into())
    }

    pub fn into_fragment(mut self) -> Result<ResultFragment, XsltError> {
        self.flush_pending()?;
        match self.target {
            OutputTarget::Fragment(fragment) => Ok(fragment.into_fragment()),
            OutputTarget::Sink(_) => Err(XsltError::execution("output is not a fragment")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordKind;
    use std::collections::VecDeque;
    use trellis_xpath1::{FragmentName, FragmentNode};

    #[derive(Default)]
    struct ThrottledSink {
        records: Vec<Record>,
        script: VecDeque<SinkStatus>,
        ended: bool,
    }

    impl RecordOutput for ThrottledSink {
        fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
            let status = self.script.pop_front().unwrap_or(SinkStatus::Continue);
            if status != SinkStatus::Overflow {
                self.records.push(record.clone());
            }
            Ok(status)
        }

        fn the_end(&mut self) -> Result<(), XsltError> {
            self.ended = true;
            Ok(())
        }
    }

    fn name(local: &str) -> OutputName {
        FragmentName::new("", local, "")
    }

    #[test]
    fn attributes_attach_to_pending_element() {
        let mut sink = ThrottledSink::default();
        {
            let mut builder = RecordBuilder::for_sink(&mut sink);
            builder.begin(NodeKind::Element, name("a")).unwrap();
            builder.attribute(name("x"), "1").unwrap();
            builder.attribute(name("x"), "2").unwrap();
            builder.text("body", false).unwrap();
            builder.end(NodeKind::Element).unwrap();
            builder.finish().unwrap();
        }
        assert!(sink.ended);
        let kinds: Vec<_> = sink.records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RecordKind::Element, RecordKind::Text, RecordKind::EndElement]);
        assert_eq!(sink.records[0].attributes.len(), 1);
        assert_eq!(sink.records[0].attribute("", "x"), Some("2"));
    }

    #[test]
    fn attribute_after_content_is_dropped() {
        let mut builder = RecordBuilder::for_fragment();
        builder.begin(NodeKind::Element, name("a")).unwrap();
        builder.text("x", false).unwrap();
        assert_eq!(builder.attribute(name("late"), "v").unwrap(), OutputResult::Error);
        assert!(!builder.is_ignoring());
        builder.end(NodeKind::Element).unwrap();

        let fragment = builder.into_fragment().unwrap();
        match &fragment.children[0] {
            FragmentNode::Element { attributes, .. } => assert!(attributes.is_empty()),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn element_inside_attribute_drops_subtree() {
        let mut builder = RecordBuilder::for_fragment();
        builder.begin(NodeKind::Element, name("a")).unwrap();
        builder.begin(NodeKind::Attribute, name("x")).unwrap();
        assert_eq!(builder.begin(NodeKind::Element, name("bad")).unwrap(), OutputResult::Error);
        assert_eq!(builder.text("ignored", false).unwrap(), OutputResult::Ignore);
        assert_eq!(builder.end(NodeKind::Element).unwrap(), OutputResult::Ignore);
        builder.text("v", false).unwrap();
        builder.end(NodeKind::Attribute).unwrap();
        builder.end(NodeKind::Element).unwrap();

        let fragment = builder.into_fragment().unwrap();
        match &fragment.children[0] {
            FragmentNode::Element { attributes, children, .. } => {
                assert_eq!(attributes[0].1, "v");
                assert!(children.is_empty());
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn overflow_leaves_state_for_retry() {
        let mut sink = ThrottledSink::default();
        sink.script = VecDeque::from(vec![SinkStatus::Continue, SinkStatus::Overflow]);
        {
            let mut builder = RecordBuilder::for_sink(&mut sink);
            assert_eq!(builder.text("one", false).unwrap(), OutputResult::Continue);
            assert_eq!(builder.begin(NodeKind::Comment, name("")).unwrap(), OutputResult::Continue);
            builder.text("c", false).unwrap();
            builder.end(NodeKind::Comment).unwrap();
            assert_eq!(builder.text("two", false).unwrap(), OutputResult::Overflow);
            assert_eq!(builder.text("two", false).unwrap(), OutputResult::Continue);
            builder.finish().unwrap();
        }
        let values: Vec<_> = sink.records.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["one", "c", "two"]);
    }

    #[test]
    fn adjacent_text_merges() {
        let mut builder = RecordBuilder::for_fragment();
        builder.text("a", false).unwrap();
        builder.text("b", false).unwrap();
        builder.text("<", true).unwrap();
        let fragment = builder.into_fragment().unwrap();
        assert_eq!(fragment.children.len(), 2);
        assert_eq!(fragment.string_value(), "ab<");
    }
}
