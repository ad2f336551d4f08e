use super::{step_body, step_content};
use crate::ast::{ActionId, OutputName};
use crate::error::XsltError;
use crate::frame::{CopyEvent, FrameState, Outcome};
use crate::output::{NodeKind, OutputResult, RecordBuilder};
use crate::processor::Processor;
use crate::query_store::QueryId;
use trellis_xpath1::{DataSourceNode, FragmentNode, NodeType, XPathValue};

pub(crate) fn node_name<'a, N: DataSourceNode<'a>>(node: N) -> OutputName {
    match node.name() {
        Some(name) => OutputName::new(
            name.prefix.unwrap_or(""),
            name.local_part,
            node.namespace_uri().unwrap_or(""),
        ),
        None => OutputName::default(),
    }
}

fn namespace_events<'a, N: DataSourceNode<'a>>(node: N, events: &mut Vec<CopyEvent>) {
    for namespace in node.namespaces() {
        let prefix = node_name(namespace).local;
        if prefix != "xml" {
            events.push(CopyEvent::Namespace {
                prefix,
                uri: namespace.string_value(),
            });
        }
    }
}

/// Shallow copy of the current node. Elements keep their namespace nodes and
/// run the body for their content; the root only runs the body.
pub(crate) fn handle_copy<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    let node = processor.frames[index].node;
    let event = match node.node_type() {
        NodeType::Root => return Ok(step_body(processor, index, body)),
        NodeType::Element => {
            if !matches!(processor.frames[index].state, FrameState::Start) {
                return step_content(processor, index, body, NodeKind::Element);
            }
            let mut namespaces = Vec::new();
            namespace_events(node, &mut namespaces);
            let name = node_name(node);
            let accepted = processor.emit(|out| {
                let result = out.begin(NodeKind::Element, name)?;
                if result.is_consumed() {
                    for event in &namespaces {
                        emit_event(out, event)?;
                    }
                }
                Ok(result)
            })?;
            if !accepted {
                return Ok(Outcome::Suspended);
            }
            processor.frames[index].state = FrameState::Body { next: 0 };
            return Ok(Outcome::Continue);
        }
        NodeType::Attribute => CopyEvent::Attribute(node_name(node), node.string_value()),
        NodeType::Text => CopyEvent::Text {
            value: node.string_value(),
            disable_escaping: false,
        },
        NodeType::Comment => CopyEvent::Comment(node.string_value()),
        NodeType::ProcessingInstruction => CopyEvent::ProcessingInstruction {
            target: node_name(node).local,
            value: node.string_value(),
        },
        NodeType::Namespace => CopyEvent::Namespace {
            prefix: node_name(node).local,
            uri: node.string_value(),
        },
    };
    if !processor.emit(|out| emit_event(out, &event))? {
        return Ok(Outcome::Suspended);
    }
    Ok(Outcome::Finished)
}

/// Deep copy of a node-set or result tree fragment. Other values are copied
/// as text. The events are computed up front and written one per step.
pub(crate) fn handle_copy_of<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    select: QueryId,
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Start) {
        let mut events = Vec::new();
        match processor.evaluate(index, select)? {
            XPathValue::NodeSet(nodes) => {
                for node in nodes {
                    node_events(node, &mut events);
                }
            }
            XPathValue::Fragment(fragment) => fragment_events(&fragment.children, &mut events),
            other => events.push(CopyEvent::Text {
                value: other.to_string(),
                disable_escaping: false,
            }),
        }
        processor.frames[index].state = FrameState::Events { events, next: 0 };
    }

    let FrameState::Events { events, next } = &processor.frames[index].state else {
        return Ok(Outcome::Finished);
    };
    let Some(event) = events.get(*next).cloned() else {
        return Ok(Outcome::Finished);
    };
    if !processor.emit(|out| emit_event(out, &event))? {
        return Ok(Outcome::Suspended);
    }
    if let FrameState::Events { next, .. } = &mut processor.frames[index].state {
        *next += 1;
    }
    Ok(Outcome::Continue)
}

enum Walk<T> {
    Enter(T),
    Leave,
}

pub(crate) fn node_events<'a, N: DataSourceNode<'a>>(node: N, events: &mut Vec<CopyEvent>) {
    let mut stack = vec![Walk::Enter(node)];
    while let Some(step) = stack.pop() {
        let node = match step {
            Walk::Enter(node) => node,
            Walk::Leave => {
                events.push(CopyEvent::EndElement);
                continue;
            }
        };
        match node.node_type() {
            NodeType::Root => {
                let children: Vec<N> = node.children().collect();
                stack.extend(children.into_iter().rev().map(Walk::Enter));
            }
            NodeType::Element => {
                events.push(CopyEvent::StartElement(node_name(node)));
                namespace_events(node, events);
                for attribute in node.attributes() {
                    events.push(CopyEvent::Attribute(node_name(attribute), attribute.string_value()));
                }
                stack.push(Walk::Leave);
                let children: Vec<N> = node.children().collect();
                stack.extend(children.into_iter().rev().map(Walk::Enter));
            }
            NodeType::Attribute => events.push(CopyEvent::Attribute(node_name(node), node.string_value())),
            NodeType::Text => events.push(CopyEvent::Text {
                value: node.string_value(),
                disable_escaping: false,
            }),
            NodeType::Comment => events.push(CopyEvent::Comment(node.string_value())),
            NodeType::ProcessingInstruction => events.push(CopyEvent::ProcessingInstruction {
                target: node_name(node).local,
                value: node.string_value(),
            }),
            NodeType::Namespace => events.push(CopyEvent::Namespace {
                prefix: node_name(node).local,
                uri: node.string_value(),
            }),
        }
    }
}

fn fragment_events(children: &[FragmentNode], events: &mut Vec<CopyEvent>) {
    let mut stack: Vec<Walk<&FragmentNode>> = children.iter().rev().map(Walk::Enter).collect();
    while let Some(step) = stack.pop() {
        let node = match step {
            Walk::Enter(node) => node,
            Walk::Leave => {
                events.push(CopyEvent::EndElement);
                continue;
            }
        };
        match node {
            FragmentNode::Element {
                name,
                namespaces,
                attributes,
                children,
            } => {
                events.push(CopyEvent::StartElement(name.clone()));
                events.extend(namespaces.iter().map(|(prefix, uri)| CopyEvent::Namespace {
                    prefix: prefix.clone(),
                    uri: uri.clone(),
                }));
                events.extend(
                    attributes
                        .iter()
                        .map(|(name, value)| CopyEvent::Attribute(name.clone(), value.clone())),
                );
                stack.push(Walk::Leave);
                stack.extend(children.iter().rev().map(Walk::Enter));
            }
            FragmentNode::Text {
                value,
                disable_escaping,
            } => events.push(CopyEvent::Text {
                value: value.clone(),
                disable_escaping: *disable_escaping,
            }),
            FragmentNode::Comment(value) => events.push(CopyEvent::Comment(value.clone())),
            FragmentNode::ProcessingInstruction { target, value } => events.push(CopyEvent::ProcessingInstruction {
                target: target.clone(),
                value: value.clone(),
            }),
        }
    }
}

fn emit_event(out: &mut RecordBuilder<'_>, event: &CopyEvent) -> Result<OutputResult, XsltError> {
    match event {
        CopyEvent::StartElement(name) => out.begin(NodeKind::Element, name.clone()),
        CopyEvent::Namespace { prefix, uri } => out.namespace(prefix, uri),
        CopyEvent::Attribute(name, value) => out.attribute(name.clone(), value),
        CopyEvent::Text {
            value,
            disable_escaping,
        } => out.text(value, *disable_escaping),
        CopyEvent::Comment(value) => out.leaf(NodeKind::Comment, OutputName::default(), value),
        CopyEvent::ProcessingInstruction { target, value } => {
            out.leaf(NodeKind::ProcessingInstruction, OutputName::new("", target, ""), value)
        }
        CopyEvent::EndElement => out.end(NodeKind::Element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasources::XmlDocument;

    #[test]
    fn node_events_walk_in_document_order() {
        let doc = XmlDocument::parse(r#"<a x="1"><b>t</b><!--c--></a>"#).unwrap();
        let mut events = Vec::new();
        node_events(doc.root_node(), &mut events);
        assert_eq!(
            events,
            vec![
                CopyEvent::StartElement(OutputName::new("", "a", "")),
                CopyEvent::Attribute(OutputName::new("", "x", ""), "1".to_string()),
                CopyEvent::StartElement(OutputName::new("", "b", "")),
                CopyEvent::Text {
                    value: "t".to_string(),
                    disable_escaping: false
                },
                CopyEvent::EndElement,
                CopyEvent::Comment("c".to_string()),
                CopyEvent::EndElement,
            ]
        );
    }

    #[test]
    fn fragments_keep_disabled_escaping() {
        let children = vec![FragmentNode::Element {
            name: OutputName::new("p", "e", "urn:p"),
            namespaces: vec![("p".to_string(), "urn:p".to_string())],
            attributes: Vec::new(),
            children: vec![FragmentNode::Text {
                value: "<raw>".to_string(),
                disable_escaping: true,
            }],
        }];
        let mut events = Vec::new();
        fragment_events(&children, &mut events);
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[2],
            CopyEvent::Text {
                value: "<raw>".to_string(),
                disable_escaping: true
            }
        );
    }
}
