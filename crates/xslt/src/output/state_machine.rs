//! The validity state machine consulted on every output event.

use super::NodeKind;

/// What has been written so far at the current nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    /// Top level of the result tree or of a fragment.
    Document,
    /// An element start tag is open: attributes and namespaces are allowed.
    StartTag,
    /// The element already has content.
    Content,
    /// Inside an attribute value: only text.
    Attribute,
    /// Inside a comment: only text.
    Comment,
    /// Inside a processing instruction: only text.
    ProcessingInstruction,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ContentState,
    stack: Vec<ContentState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            state: ContentState::Document,
            stack: Vec::new(),
        }
    }

    pub fn state(&self) -> ContentState {
        self.state
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Checks a begin event without committing it.
    pub fn can_begin(&self, kind: NodeKind) -> bool {
        use ContentState::*;
        match kind {
            NodeKind::Element | NodeKind::Comment | NodeKind::ProcessingInstruction | NodeKind::Text => {
                matches!(self.state, Document | StartTag | Content)
            }
            NodeKind::Attribute | NodeKind::Namespace => self.state == StartTag,
        }
    }

    /// Commits a begin event. Returns false, and changes nothing, if the
    /// event is not allowed in the current state.
    pub fn begin(&mut self, kind: NodeKind) -> bool {
        if !self.can_begin(kind) {
            return false;
        }
        let next = match kind {
            NodeKind::Element => ContentState::StartTag,
            NodeKind::Attribute => ContentState::Attribute,
            NodeKind::Comment => ContentState::Comment,
            NodeKind::ProcessingInstruction => ContentState::ProcessingInstruction,
            NodeKind::Text => {
                self.text();
                return true;
            }
            NodeKind::Namespace => return true,
        };
        let parent = match (kind, self.state) {
            (NodeKind::Attribute, state) => state,
            (_, ContentState::StartTag) => ContentState::Content,
            (_, state) => state,
        };
        self.stack.push(parent);
        self.state = next;
        true
    }

    /// Text is accepted everywhere. It ends the start tag of an element.
    pub fn text(&mut self) {
        if self.state == ContentState::StartTag {
            self.state = ContentState::Content;
        }
    }

    /// Commits an end event. Returns false if it does not close the node
    /// that is currently open.
    pub fn end(&mut self, kind: NodeKind) -> bool {
        let closes = match kind {
            NodeKind::Element => matches!(self.state, ContentState::StartTag | ContentState::Content),
            NodeKind::Attribute => self.state == ContentState::Attribute,
            NodeKind::Comment => self.state == ContentState::Comment,
            NodeKind::ProcessingInstruction => self.state == ContentState::ProcessingInstruction,
            NodeKind::Text | NodeKind::Namespace => return true,
        };
        if !closes {
            return false;
        }
        match self.stack.pop() {
            Some(parent) => {
                self.state = parent;
                true
            }
            None => false,
        }
    }
}
