//! One step of each instruction.
//!
//! A handler looks at its frame's [`FrameState`], does the next piece of work
//! and reports an [`Outcome`]. Handlers evaluate every expression they need
//! before they touch output or frame state, so a step that failed on a global
//! that was not computed yet can simply be run again.

mod apply_templates;
mod call_template;
mod control_flow;
mod copy;
mod for_each;
mod literals;
mod number;
mod variables;

use crate::ast::{Action, ActionId};
use crate::error::XsltError;
use crate::frame::{FrameState, Outcome};
use crate::output::NodeKind;
use crate::processor::Processor;
use trellis_xpath1::DataSourceNode;

impl<'s, 'a, 'o, N: DataSourceNode<'a> + 'a> Processor<'s, 'a, 'o, N> {
    pub(crate) fn step(&mut self, index: usize) -> Result<Outcome, XsltError> {
        let stylesheet = self.stylesheet;
        let action = self.frames[index].action;
        match stylesheet.action(action) {
            Action::Root => control_flow::handle_root(self, index),
            Action::Template(template) => Ok(step_body(self, index, &template.body)),
            Action::Sequence(body) => Ok(step_body(self, index, body)),
            Action::ApplyTemplates {
                select,
                mode,
                sorts,
                params,
            } => apply_templates::handle_apply_templates(self, index, *select, *mode, sorts, params),
            Action::ApplyImports => apply_templates::handle_apply_imports(self, index),
            Action::CallTemplate { name, params, target } => {
                call_template::handle_call_template(self, index, name, params, *target)
            }
            Action::ForEach { select, sorts, body } => for_each::handle_for_each(self, index, *select, sorts, *body),
            Action::If { test, body } => control_flow::handle_if(self, index, *test, body),
            Action::Choose(branches) => control_flow::handle_choose(self, index, branches),
            Action::ValueOf {
                select,
                disable_escaping,
            } => literals::handle_value_of(self, index, *select, *disable_escaping),
            Action::Text {
                value,
                disable_escaping,
            } => literals::handle_text(self, value, *disable_escaping),
            Action::CopyOf { select } => copy::handle_copy_of(self, index, *select),
            Action::Copy { body } => copy::handle_copy(self, index, body),
            Action::LiteralElement { name, namespaces, body } => {
                literals::handle_literal_element(self, index, name, namespaces, body)
            }
            Action::LiteralAttribute { name, value } => literals::handle_literal_attribute(self, index, name, value),
            Action::Element {
                name,
                namespace,
                scope,
                body,
            } => literals::handle_element(self, index, name, namespace.as_ref(), scope, body),
            Action::Attribute {
                name,
                namespace,
                scope,
                body,
            } => literals::handle_attribute(self, index, name, namespace.as_ref(), scope, body),
            Action::Comment { body } => literals::handle_comment(self, index, body),
            Action::ProcessingInstruction { name, body } => {
                literals::handle_processing_instruction(self, index, name, body)
            }
            Action::Variable(variable) => variables::handle_variable(self, index, variable),
            Action::Number(number) => number::handle_number(self, index, number),
            // Sort keys are read by the instruction that owns them.
            Action::Sort(_) => Ok(Outcome::Finished),
            Action::UseAttributeSets { sets, .. } => Ok(step_body(self, index, sets)),
            Action::AttributeSet { body, .. } => Ok(step_body(self, index, body)),
            Action::Message { terminate, body } => control_flow::handle_message(self, index, *terminate, body),
            Action::Unsupported { name, fallback } => control_flow::handle_unsupported(self, index, name, fallback),
        }
    }

    /// Computes global variable `index` on top of the current stack.
    pub(crate) fn start_global(&mut self, index: usize) -> Result<(), XsltError> {
        variables::start_global(self, index)
    }
}

/// Pushes the next instruction of `body`. False once the body is done.
pub(crate) fn push_next<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    body: &[ActionId],
) -> bool {
    let next = match processor.frames[index].state {
        FrameState::Start => 0,
        FrameState::Body { next } => next,
        _ => return false,
    };
    match body.get(next) {
        Some(&child) => {
            processor.frames[index].state = FrameState::Body { next: next + 1 };
            processor.push_child(index, child);
            true
        }
        None => false,
    }
}

pub(crate) fn step_body<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    body: &[ActionId],
) -> Outcome {
    if push_next(processor, index, body) {
        Outcome::Continue
    } else {
        Outcome::Finished
    }
}

/// Runs the body of a node that was already begun, then ends it.
pub(crate) fn step_content<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    body: &[ActionId],
    kind: NodeKind,
) -> Result<Outcome, XsltError> {
    if matches!(processor.frames[index].state, FrameState::Closing) {
        if !processor.emit(|out| out.end(kind))? {
            return Ok(Outcome::Suspended);
        }
        return Ok(Outcome::Finished);
    }
    if !push_next(processor, index, body) {
        processor.frames[index].state = FrameState::Closing;
    }
    Ok(Outcome::Continue)
}

/// Pushes the `xsl:with-param` children one per step. False once all of
/// them have been evaluated.
pub(crate) fn push_param<'s, 'a, 'o, N: DataSourceNode<'a> + 'a>(
    processor: &mut Processor<'s, 'a, 'o, N>,
    index: usize,
    params: &[ActionId],
) -> bool {
    let next = match processor.frames[index].state {
        FrameState::Start => {
            processor.frames[index].collected.clear();
            0
        }
        FrameState::Params { next } => next,
        _ => return false,
    };
    match params.get(next) {
        Some(&param) => {
            processor.frames[index].state = FrameState::Params { next: next + 1 };
            processor.push_child(index, param);
            true
        }
        None => false,
    }
}
