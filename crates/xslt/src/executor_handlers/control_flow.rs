//! `xsl:if`, `xsl:choose`, `xsl:message`, fallback and the start of a run.

use super::{push_next, step_body};
use crate::ast::{ActionId, Branch};
use crate::context::GlobalValue;
use crate::error::XsltError;
use crate::frame::{FrameState, Outcome};
use crate::processor::Processor;
use crate::query_store::QueryId;
use std::collections::HashMap;
use trellis_xpath1::DataSourceNode;

/// Computes every global in declaration order, then applies templates to the
/// root node.
pub(crate) fn handle_root<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
) -> Result<Outcome, XsltError> {
    let next = match processor.frames[index].state {
        FrameState::Start => 0,
        FrameState::Body { next } => next,
        _ => return Ok(Outcome::Finished),
    };

    if let Some(offset) = processor.globals[next..]
        .iter()
        .position(|g| matches!(g, GlobalValue::Pending))
    {
        let global = next + offset;
        processor.frames[index].state = FrameState::Body { next: global + 1 };
        processor.start_global(global)?;
        return Ok(Outcome::Continue);
    }

    let frame = &processor.frames[index];
    let (node, mode) = (frame.node, frame.mode);
    let found = processor.find_template(index, 0, mode, node)?;
    processor.frames[index].state = FrameState::Done;
    processor.push_rule(index, node, 1, 1, mode, found, HashMap::new());
    Ok(Outcome::Continue)
}

pub(crate) fn handle_if<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    test: QueryId,
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Start) && !processor.evaluate(index, test)?.to_bool() {
        return Ok(Outcome::Finished);
    }
    Ok(step_body(processor, index, body))
}

pub(crate) fn handle_choose<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    branches: &[Branch],
) -> Result<Outcome, XsltError> {
    if !matches!(processor.frames[index].state, FrameState::Start) {
        return Ok(Outcome::Finished);
    }
    for branch in branches {
        let chosen = match branch.test {
            Some(test) => processor.evaluate(index, test)?.to_bool(),
            None => true,
        };
        if chosen {
            processor.frames[index].state = FrameState::Done;
            processor.push_child(index, branch.body);
            return Ok(Outcome::Continue);
        }
    }
    Ok(Outcome::Finished)
}

pub(crate) fn handle_message<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    terminate: bool,
    body: &[ActionId],
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Start) {
        processor.begin_capture();
        processor.frames[index].state = FrameState::Body { next: 0 };
    }
    if push_next(processor, index, body) {
        return Ok(Outcome::Continue);
    }

    let text = processor.end_capture()?.string_value();
    if terminate {
        log::warn!("xsl:message (terminate): {}", text);
        processor.messages.push(text.clone());
        return Err(XsltError::Terminated(text));
    }
    log::info!("xsl:message: {}", text);
    processor.messages.push(text);
    Ok(Outcome::Finished)
}

/// An instruction from a newer XSLT version runs its `xsl:fallback`
/// children. Without any, it is an error once it is actually reached.
pub(crate) fn handle_unsupported<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &str,
    fallback: &[ActionId],
) -> Result<Outcome, XsltError> {
    if fallback.is_empty() {
        return Err(XsltError::UnsupportedInstruction(name.to_string()));
    }
    if matches!(processor.frames[index].state, FrameState::Start) {
        log::debug!("Running fallback for '{}'", name);
    }
    Ok(step_body(processor, index, fallback))
}
