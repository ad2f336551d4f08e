//! Handlers that create output nodes: text, `value-of`, literal result
//! elements and the computed constructors.

use super::{push_next, step_content};
use crate::ast::{ActionId, Avt, OutputName};
use crate::error::XsltError;
use crate::frame::{CopyEvent, FrameState, Outcome};
use crate::output::NodeKind;
use crate::processor::Processor;
use crate::query_store::{QueryId, ScopeSnapshot};
use crate::util::{XMLNS_NAMESPACE, is_ncname, is_qname, split_qname};
use trellis_xpath1::{DataSourceNode, FragmentNode, ResultFragment};

fn finished_unless_overflow(accepted: bool) -> Outcome {
    if accepted { Outcome::Finished } else { Outcome::Suspended }
}

pub(crate) fn handle_text<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    value: &str,
    disable_escaping: bool,
) -> Result<Outcome, XsltError> {
    let accepted = processor.emit(|out| out.text(value, disable_escaping))?;
    Ok(finished_unless_overflow(accepted))
}

pub(crate) fn handle_value_of<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    select: QueryId,
    disable_escaping: bool,
) -> Result<Outcome, XsltError> {
    let value = processor.evaluate(index, select)?.to_string();
    let accepted = processor.emit(|out| out.text(&value, disable_escaping))?;
    Ok(finished_unless_overflow(accepted))
}

pub(crate) fn handle_literal_element<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &OutputName,
    namespaces: &[(String, String)],
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Start) {
        let accepted = processor.emit(|out| {
            let result = out.begin(NodeKind::Element, name.clone())?;
            if result.is_consumed() {
                for (prefix, uri) in namespaces {
                    out.namespace(prefix, uri)?;
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
    step_content(processor, index, body, NodeKind::Element)
}

pub(crate) fn handle_literal_attribute<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &OutputName,
    value: &'s Avt,
) -> Result<Outcome, XsltError> {
    let value = processor.avt(index, value)?;
    let accepted = processor.emit(|out| out.attribute(name.clone(), &value))?;
    Ok(finished_unless_overflow(accepted))
}

/// Resolves the name of `xsl:element` or `xsl:attribute`. `None` means the
/// attribute would be a namespace declaration and is dropped.
fn computed_name<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &'s Avt,
    namespace: Option<&'s Avt>,
    scope: &ScopeSnapshot,
    is_attribute: bool,
) -> Result<Option<OutputName>, XsltError> {
    let what = if is_attribute { "attribute" } else { "element" };
    let qname = processor.avt(index, name)?;
    let qname = qname.trim();
    if !is_qname(qname) {
        return Err(XsltError::execution(format!("'{}' is not a valid {} name", qname, what)));
    }
    let (prefix, local) = split_qname(qname);
    if is_attribute && (qname == "xmlns" || prefix == "xmlns") {
        log::warn!("Ignoring xsl:attribute named '{}'", qname);
        return Ok(None);
    }

    let uri = match namespace {
        Some(namespace) => processor.avt(index, namespace)?.into_owned(),
        None if !prefix.is_empty() => match scope.namespace_uri(prefix) {
            Some(uri) => uri.to_string(),
            None if prefix == "xml" => trellis_xpath1::XML_NAMESPACE.to_string(),
            None => {
                return Err(XsltError::execution(format!(
                    "Namespace prefix '{}' of {} '{}' is not declared",
                    prefix, what, qname
                )));
            }
        },
        None if is_attribute => String::new(),
        None => scope.default_namespace.clone(),
    };
    if is_attribute && uri == XMLNS_NAMESPACE {
        log::warn!("Ignoring xsl:attribute in the xmlns namespace");
        return Ok(None);
    }
    let prefix = if uri.is_empty() { "" } else { prefix };
    Ok(Some(OutputName::new(prefix, local, &uri)))
}

pub(crate) fn handle_element<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &'s Avt,
    namespace: Option<&'s Avt>,
    scope: &ScopeSnapshot,
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Start) {
        let Some(name) = computed_name(processor, index, name, namespace, scope, false)? else {
            return Ok(Outcome::Finished);
        };
        if !processor.emit(|out| out.begin(NodeKind::Element, name))? {
            return Ok(Outcome::Suspended);
        }
        processor.frames[index].state = FrameState::Body { next: 0 };
        return Ok(Outcome::Continue);
    }
    step_content(processor, index, body, NodeKind::Element)
}

/// Text of the top-level text nodes of a captured fragment. Anything else
/// the body produced is not allowed inside an attribute, comment or
/// processing instruction and is dropped.
fn captured_text(fragment: &ResultFragment, instruction: &str) -> String {
    let mut text = String::new();
    for child in &fragment.children {
        match child {
            FragmentNode::Text { value, .. } => text.push_str(value),
            _ => log::warn!("Ignoring non-text content in {}", instruction),
        }
    }
    text
}

/// Runs `body` into a fragment. `Some` with the captured text once the body
/// is complete.
fn capture_body<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    body: &[ActionId],
    instruction: &str,
) -> Result<Option<String>, XsltError> {
    match processor.frames[index].state {
        FrameState::Start => {
            if body.is_empty() {
                return Ok(Some(String::new()));
            }
            processor.begin_capture();
            processor.frames[index].state = FrameState::Body { next: 0 };
            Ok(None)
        }
        FrameState::Body { .. } => {
            if push_next(processor, index, body) {
                return Ok(None);
            }
            let fragment = processor.end_capture()?;
            Ok(Some(captured_text(&fragment, instruction)))
        }
        _ => Ok(None),
    }
}

/// The text a capture produced, kept in the frame while the node is being
/// written so an overflow does not lose it.
fn pending_text<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    body: &[ActionId],
    instruction: &str,
) -> Result<Option<String>, XsltError> {
    if let FrameState::Events { events, .. } = &processor.frames[index].state {
        return Ok(events.first().and_then(|e| match e {
            CopyEvent::Text { value, .. } => Some(value.clone()),
            _ => None,
        }));
    }
    let Some(text) = capture_body(processor, index, body, instruction)? else {
        return Ok(None);
    };
    processor.frames[index].state = FrameState::Events {
        events: vec![CopyEvent::Text {
            value: text.clone(),
            disable_escaping: false,
        }],
        next: 0,
    };
    Ok(Some(text))
}

pub(crate) fn handle_attribute<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &'s Avt,
    namespace: Option<&'s Avt>,
    scope: &ScopeSnapshot,
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    let Some(value) = pending_text(processor, index, body, "xsl:attribute")? else {
        return Ok(Outcome::Continue);
    };
    let Some(name) = computed_name(processor, index, name, namespace, scope, true)? else {
        return Ok(Outcome::Finished);
    };
    let accepted = processor.emit(|out| out.attribute(name, &value))?;
    Ok(finished_unless_overflow(accepted))
}

pub(crate) fn handle_comment<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    let Some(value) = pending_text(processor, index, body, "xsl:comment")? else {
        return Ok(Outcome::Continue);
    };
    let accepted = processor.emit(|out| out.leaf(NodeKind::Comment, OutputName::default(), &value))?;
    Ok(finished_unless_overflow(accepted))
}

pub(crate) fn handle_processing_instruction<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &'s Avt,
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    let Some(value) = pending_text(processor, index, body, "xsl:processing-instruction")? else {
        return Ok(Outcome::Continue);
    };
    let target = processor.avt(index, name)?;
    let target = target.trim();
    if !is_ncname(target) || target.eq_ignore_ascii_case("xml") {
        log::warn!("Ignoring processing instruction with invalid target '{}'", target);
        return Ok(Outcome::Finished);
    }
    let accepted = processor.emit(|out| {
        out.leaf(NodeKind::ProcessingInstruction, OutputName::new("", target, ""), &value)
    })?;
    Ok(finished_unless_overflow(accepted))
}
