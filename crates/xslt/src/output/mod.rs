//! The output pipeline.
//!
//! Instructions talk to a [`RecordBuilder`], which checks every event against
//! the [`StateMachine`], accumulates one pending [`Record`] at a time and hands
//! complete records to a [`RecordOutput`] sink. Sinks may push back with
//! [`SinkStatus::Interrupt`] or [`SinkStatus::Overflow`], which the processor
//! turns into a suspension.

pub mod builder;
pub mod cursor;
pub mod fragment;
pub mod scope;
pub mod serializer;
pub mod settings;
pub mod state_machine;

pub use builder::{OutputTarget, RecordBuilder};
pub use cursor::{QueueOutput, RecordCursor};
pub use fragment::FragmentOutput;
pub use serializer::XmlSerializer;
pub use settings::{OutputMethod, OutputSettings};
pub use state_machine::{ContentState, StateMachine};

use crate::ast::OutputName;
use crate::error::XsltError;

/// The kinds of node an instruction can begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Element,
    Attribute,
    Namespace,
    Text,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Element,
    EndElement,
    Text,
    Comment,
    ProcessingInstruction,
}

/// One complete output node. Element records carry their attributes and the
/// namespace declarations that must appear on the start tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: RecordKind,
    /// Element name, or the target of a processing instruction in `local`.
    pub name: OutputName,
    pub value: String,
    pub disable_escaping: bool,
    pub attributes: Vec<(OutputName, String)>,
    pub namespaces: Vec<(String, String)>,
    pub depth: usize,
}

impl Record {
    fn new(kind: RecordKind, name: OutputName, depth: usize) -> Self {
        Record {
            kind,
            name,
            value: String::new(),
            disable_escaping: false,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            depth,
        }
    }

    pub fn element(name: OutputName, depth: usize) -> Self {
        Record::new(RecordKind::Element, name, depth)
    }

    pub fn end_element(name: OutputName, depth: usize) -> Self {
        Record::new(RecordKind::EndElement, name, depth)
    }

    pub fn text(value: &str, disable_escaping: bool, depth: usize) -> Self {
        let mut record = Record::new(RecordKind::Text, OutputName::default(), depth);
        record.value.push_str(value);
        record.disable_escaping = disable_escaping;
        record
    }

    pub fn comment(depth: usize) -> Self {
        Record::new(RecordKind::Comment, OutputName::default(), depth)
    }

    pub fn processing_instruction(target: OutputName, depth: usize) -> Self {
        Record::new(RecordKind::ProcessingInstruction, target, depth)
    }

    pub fn attribute(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.namespace == namespace && n.local == local)
            .map(|(_, v)| v.as_str())
    }
}

/// What a sink answers for each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Continue,
    /// Accepted, but the processor should give control back to its driver.
    Interrupt,
    /// Not accepted. The same record will be offered again.
    Overflow,
}

/// The outcome of one builder call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputResult {
    Continue,
    Interrupt,
    Overflow,
    /// The event is not allowed here and was dropped together with anything
    /// nested inside it.
    Error,
    /// The event belongs to a dropped subtree.
    Ignore,
}

impl OutputResult {
    /// False only when the event has to be retried.
    pub fn is_consumed(self) -> bool {
        self != OutputResult::Overflow
    }
}

impl From<SinkStatus> for OutputResult {
    fn from(status: SinkStatus) -> Self {
        match status {
            SinkStatus::Continue => OutputResult::Continue,
            SinkStatus::Interrupt => OutputResult::Interrupt,
            SinkStatus::Overflow => OutputResult::Overflow,
        }
    }
}

/// A consumer of finished records.
pub trait RecordOutput {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError>;

    /// Called once after the last record.
    fn the_end(&mut self) -> Result<(), XsltError>;
}

impl<T: RecordOutput + ?Sized> RecordOutput for &mut T {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        (**self).record_done(record)
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        (**self).the_end()
    }
}

impl<T: RecordOutput + ?Sized> RecordOutput for Box<T> {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        (**self).record_done(record)
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        (**self).the_end()
    }
}
