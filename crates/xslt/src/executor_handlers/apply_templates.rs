use super::push_param;
use super::for_each::sort_nodes;
use crate::ast::{ActionId, ModeId};
use crate::error::XsltError;
use crate::frame::{FrameState, NodeCursor, Outcome};
use crate::processor::Processor;
use crate::query_store::QueryId;
use std::collections::HashMap;
use trellis_xpath1::DataSourceNode;

pub(crate) fn handle_apply_templates<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    select: Option<QueryId>,
    mode: Option<ModeId>,
    sorts: &[ActionId],
    params: &[ActionId],
) -> Result<Outcome, XsltError> {
    match processor.frames[index].state {
        FrameState::Start | FrameState::Params { .. } => {
            if push_param(processor, index, params) {
                return Ok(Outcome::Continue);
            }
            let nodes = match select {
                Some(select) => processor.evaluate(index, select)?.into_node_set()?,
                None => processor.frames[index].node.children().collect(),
            };
            let nodes = sort_nodes(processor, index, nodes, sorts)?;
            processor.frames[index].state = FrameState::Nodes(NodeCursor::new(nodes));
            Ok(Outcome::Continue)
        }
        FrameState::Nodes(_) => apply_next(processor, index, mode),
        _ => Ok(Outcome::Finished),
    }
}

fn apply_next<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    mode: Option<ModeId>,
) -> Result<Outcome, XsltError> {
    let FrameState::Nodes(cursor) = &processor.frames[index].state else {
        return Ok(Outcome::Finished);
    };
    let size = cursor.size();
    let Some((node, position)) = cursor.peek() else {
        return Ok(Outcome::Finished);
    };

    let mode = mode.unwrap_or(processor.frames[index].mode);
    let found = processor.find_template(index, 0, mode, node)?;
    if let FrameState::Nodes(cursor) = &mut processor.frames[index].state {
        cursor.advance();
    }
    let params = processor.frames[index].collected.clone();
    processor.push_rule(index, node, position, size, mode, found, params);
    Ok(Outcome::Continue)
}

/// Looks for a rule for the current node among the modules imported by the
/// module of the template rule being executed.
pub(crate) fn handle_apply_imports<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
) -> Result<Outcome, XsltError> {
    if !matches!(processor.frames[index].state, FrameState::Start) {
        return Ok(Outcome::Finished);
    }
    let frame = &processor.frames[index];
    let Some(module) = frame.rule else {
        return Err(XsltError::execution("xsl:apply-imports used outside a template rule"));
    };
    let (node, position, size, mode) = (frame.node, frame.position, frame.size, frame.mode);

    let stylesheet = processor.stylesheet;
    let mut found = None;
    if let Some(current) = stylesheet.modules.get(module) {
        for &import in current.imports.iter().rev() {
            found = processor.find_template(index, import, mode, node)?;
            if found.is_some() {
                break;
            }
        }
    }
    processor.frames[index].state = FrameState::Done;
    processor.push_rule(index, node, position, size, mode, found, HashMap::new());
    Ok(Outcome::Continue)
}
