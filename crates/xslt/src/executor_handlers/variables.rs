use super::push_next;
use crate::ast::{Action, DEFAULT_MODE, VariableAction, VariableKind};
use crate::context::GlobalValue;
use crate::error::XsltError;
use crate::frame::{ActionFrame, FrameState, Outcome};
use crate::processor::Processor;
use std::sync::Arc;
use trellis_xpath1::{DataSourceNode, XPathValue};

/// Binds a variable or parameter. The value comes from the caller for
/// parameters that were passed, otherwise from `select`, otherwise from the
/// result tree fragment the body produces.
pub(crate) fn handle_variable<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    variable: &VariableAction,
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Start) {
        if let Some(value) = supplied(processor, index, variable) {
            store(processor, index, variable, value)?;
            return Ok(Outcome::Finished);
        }
        if let Some(select) = variable.select {
            let value = processor.evaluate(index, select)?;
            store(processor, index, variable, value)?;
            return Ok(Outcome::Finished);
        }
        if variable.body.is_empty() {
            store(processor, index, variable, XPathValue::String(String::new()))?;
            return Ok(Outcome::Finished);
        }
        processor.begin_capture();
        processor.frames[index].state = FrameState::Body { next: 0 };
    }

    if push_next(processor, index, &variable.body) {
        return Ok(Outcome::Continue);
    }
    let fragment = processor.end_capture()?;
    store(processor, index, variable, XPathValue::Fragment(Arc::new(fragment)))?;
    Ok(Outcome::Finished)
}

fn supplied<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &Processor<'s, 'a, 'o, N>,
    index: usize,
    variable: &VariableAction,
) -> Option<XPathValue<N>> {
    match variable.kind {
        VariableKind::GlobalParam => processor.parameters.get(&variable.name).cloned(),
        VariableKind::LocalParam => {
            let owner = processor.frames[index].owner?;
            processor.frames[owner].received.get(&variable.name).cloned()
        }
        _ => None,
    }
}

fn store<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    variable: &VariableAction,
    value: XPathValue<N>,
) -> Result<(), XsltError> {
    match variable.kind {
        VariableKind::GlobalVariable | VariableKind::GlobalParam => {
            let slot = processor
                .stylesheet
                .global_names
                .get(&variable.name)
                .copied()
                .ok_or_else(|| XsltError::execution(format!("Unknown global '{}'", variable.name)))?;
            log::trace!("Global '{}' = {}", variable.name, value.type_name());
            processor.globals[slot] = GlobalValue::Ready(value);
        }
        VariableKind::LocalVariable | VariableKind::LocalParam => {
            let owner = processor.frames[index]
                .owner
                .ok_or_else(|| XsltError::execution(format!("Variable '{}' has no owning frame", variable.name)))?;
            let slots = &mut processor.frames[owner].slots;
            match slots.get_mut(variable.slot) {
                Some(slot) => *slot = Some(value),
                None => {
                    return Err(XsltError::execution(format!(
                        "Variable '{}' has no slot {}",
                        variable.name, variable.slot
                    )));
                }
            }
        }
        VariableKind::WithParam => {
            let parent = processor.frames[index]
                .parent
                .ok_or_else(|| XsltError::execution(format!("Parameter '{}' has no caller", variable.name)))?;
            processor.frames[parent].collected.insert(variable.name.clone(), value);
        }
    }
    Ok(())
}

/// Pushes the frame that computes global `index`, marking it as in progress
/// so a reference back to it is reported as circular.
pub(crate) fn start_global<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
) -> Result<(), XsltError> {
    let stylesheet = processor.stylesheet;
    let action = *stylesheet
        .globals
        .get(index)
        .ok_or_else(|| XsltError::execution(format!("No global with index {}", index)))?;
    match processor.globals[index] {
        GlobalValue::Ready(_) => Ok(()),
        GlobalValue::Computing => {
            let name = match stylesheet.action(action) {
                Action::Variable(v) => v.name.clone(),
                _ => index.to_string(),
            };
            Err(XsltError::CircularVariable(name))
        }
        GlobalValue::Pending => {
            processor.globals[index] = GlobalValue::Computing;
            let root = processor.root;
            processor.push_frame(ActionFrame::new(action, root, 1, 1, DEFAULT_MODE));
            Ok(())
        }
    }
}
