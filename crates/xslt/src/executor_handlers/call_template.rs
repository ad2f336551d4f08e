use super::push_param;
use crate::ast::ActionId;
use crate::error::XsltError;
use crate::frame::{ActionFrame, FrameState, Outcome};
use crate::processor::Processor;
use trellis_xpath1::DataSourceNode;

/// Evaluates the parameters in the caller's context, then runs the named
/// template without changing the current node or mode.
pub(crate) fn handle_call_template<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    name: &str,
    params: &[ActionId],
    target: Option<ActionId>,
) -> Result<Outcome, XsltError> {
    let Some(target) = target else {
        return Err(XsltError::UnknownNamedTemplate(name.to_string()));
    };
    match processor.frames[index].state {
        FrameState::Start | FrameState::Params { .. } => {
            if push_param(processor, index, params) {
                return Ok(Outcome::Continue);
            }
            let caller = &mut processor.frames[index];
            let mut frame = ActionFrame::new(target, caller.node, caller.position, caller.size, caller.mode);
            frame.rule = caller.rule;
            frame.parent = Some(index);
            frame.received = std::mem::take(&mut caller.collected);
            caller.state = FrameState::Done;
            processor.push_frame(frame);
            Ok(Outcome::Continue)
        }
        _ => Ok(Outcome::Finished),
    }
}
