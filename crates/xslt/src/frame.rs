//! Resumable execution records.
//!
//! The processor never recurses on the host stack. Every running instruction
//! owns an [`ActionFrame`] on a vector-backed stack, and everything it needs
//! to continue after a child finishes or after the sink pushed back lives in
//! the frame's [`FrameState`].

use crate::ast::{ActionId, ModeId, OutputName};
use std::collections::HashMap;
use trellis_xpath1::XPathValue;

/// What one step of an instruction asks the processor to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Run the top of the stack again. Set when a child frame was pushed or
    /// the frame moved on to its next state.
    Continue,
    /// The output pushed back. The frame's state is unchanged and the same
    /// step is repeated when the processor is resumed.
    Suspended,
    /// Pop the frame.
    Finished,
}

/// A node-set being walked by `xsl:apply-templates` or `xsl:for-each`.
#[derive(Debug, Clone)]
pub struct NodeCursor<N> {
    nodes: Vec<N>,
    next: usize,
}

impl<N: Copy> NodeCursor<N> {
    pub fn new(nodes: Vec<N>) -> Self {
        NodeCursor { nodes, next: 0 }
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// The next node with its 1-based position, without moving past it.
    pub fn peek(&self) -> Option<(N, usize)> {
        self.nodes.get(self.next).map(|node| (*node, self.next + 1))
    }

    pub fn advance(&mut self) -> Option<(N, usize)> {
        let node = *self.nodes.get(self.next)?;
        self.next += 1;
        Some((node, self.next))
    }
}

/// One output event of a deep copy.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyEvent {
    StartElement(OutputName),
    Namespace { prefix: String, uri: String },
    Attribute(OutputName, String),
    Text { value: String, disable_escaping: bool },
    Comment(String),
    ProcessingInstruction { target: String, value: String },
    EndElement,
}

/// Resume points. Each instruction uses the subset that applies to it.
#[derive(Debug, Clone)]
pub enum FrameState<N> {
    Start,
    /// Running the instruction's children; `next` is the child to push next.
    Body { next: usize },
    /// Evaluating `xsl:with-param` children before templates are invoked.
    Params { next: usize },
    Nodes(NodeCursor<N>),
    /// Writing the events of a copy one at a time.
    Events { events: Vec<CopyEvent>, next: usize },
    /// The body is done and the closing event still has to be written.
    Closing,
    /// All work is done; the frame finishes on its next step.
    Done,
}

#[derive(Debug, Clone)]
pub struct ActionFrame<N> {
    pub action: ActionId,
    pub state: FrameState<N>,
    pub node: N,
    pub position: usize,
    pub size: usize,
    pub mode: ModeId,
    /// Module of the template rule being executed. `None` outside template
    /// rules and inside `xsl:for-each`.
    pub rule: Option<usize>,
    /// Index of the frame whose slots hold the visible local variables.
    pub owner: Option<usize>,
    pub parent: Option<usize>,
    pub slots: Vec<Option<XPathValue<N>>>,
    /// Parameters passed to this template.
    pub received: HashMap<String, XPathValue<N>>,
    /// Parameters evaluated for the template this frame is about to invoke.
    pub collected: HashMap<String, XPathValue<N>>,
}

impl<N: Copy> ActionFrame<N> {
    pub fn new(action: ActionId, node: N, position: usize, size: usize, mode: ModeId) -> Self {
        ActionFrame {
            action,
            state: FrameState::Start,
            node,
            position,
            size,
            mode,
            rule: None,
            owner: None,
            parent: None,
            slots: Vec::new(),
            received: HashMap::new(),
            collected: HashMap::new(),
        }
    }

    /// A frame for a child instruction that runs in this frame's context.
    pub fn child(&self, index: usize, action: ActionId) -> Self {
        ActionFrame {
            rule: self.rule,
            owner: self.owner,
            parent: Some(index),
            ..ActionFrame::new(action, self.node, self.position, self.size, self.mode)
        }
    }
}
