//! Pull-style consumption of a transformation.

use super::{Record, RecordOutput, SinkStatus};
use crate::ast::CompiledStylesheet;
use crate::error::XsltError;
use crate::processor::{ExecutionStatus, Processor};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use trellis_xpath1::{DataSourceNode, XPathValue};

pub type RecordQueue = Rc<RefCell<VecDeque<Record>>>;

/// A sink that queues every record and interrupts the processor after each
/// one, so the driver regains control between records.
#[derive(Debug, Clone, Default)]
pub struct QueueOutput {
    queue: RecordQueue,
}

impl QueueOutput {
    pub fn new(queue: RecordQueue) -> Self {
        QueueOutput { queue }
    }
}

impl RecordOutput for QueueOutput {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        self.queue.borrow_mut().push_back(record.clone());
        Ok(SinkStatus::Interrupt)
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        Ok(())
    }
}

/// A transformation exposed as an iterator of output records.
///
/// The processor only runs while the caller asks for the next record. After
/// an error the iterator ends.
pub struct RecordCursor<'s, 'a, N: DataSourceNode<'a>> {
    processor: Processor<'s, 'a, 'static, N>,
    queue: RecordQueue,
    done: bool,
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> RecordCursor<'s, 'a, N> {
    pub fn new(stylesheet: &'s CompiledStylesheet, root: N) -> Self {
        let queue = RecordQueue::default();
        RecordCursor {
            processor: Processor::new(stylesheet, root, QueueOutput::new(queue.clone())),
            queue,
            done: false,
        }
    }

    pub fn with_parameter(mut self, name: &str, value: XPathValue<N>) -> Self {
        self.processor = self.processor.with_parameter(name, value);
        self
    }

    pub fn with_mode(mut self, mode: &str) -> Self {
        self.processor = self.processor.with_mode(mode);
        self
    }

    pub fn messages(&self) -> &[String] {
        self.processor.messages()
    }
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> Iterator for RecordCursor<'s, 'a, N> {
    type Item = Result<Record, XsltError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.queue.borrow_mut().pop_front() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            match self.processor.execute() {
                Ok(ExecutionStatus::Finished) => self.done = true,
                Ok(ExecutionStatus::Suspended) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::datasources::XmlDocument;
    use crate::output::RecordKind;
    use crate::resolver::NoResolver;

    const SHEET: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
        <xsl:template match="/">
            <list><xsl:for-each select="//i"><item><xsl:value-of select="."/></item></xsl:for-each></list>
        </xsl:template>
    </xsl:stylesheet>"#;

    #[test]
    fn yields_records_one_at_a_time() {
        let stylesheet = compile(SHEET, "cursor.xsl", &NoResolver).unwrap();
        let doc = XmlDocument::parse("<r><i>1</i><i>2</i></r>").unwrap();
        let records: Vec<Record> = RecordCursor::new(&stylesheet, doc.root_node())
            .collect::<Result<_, _>>()
            .unwrap();
        let kinds: Vec<RecordKind> = records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecordKind::Element,
                RecordKind::Element,
                RecordKind::Text,
                RecordKind::EndElement,
                RecordKind::Element,
                RecordKind::Text,
                RecordKind::EndElement,
                RecordKind::EndElement,
            ]
        );
        assert_eq!(records[0].name.local, "list");
        assert_eq!(records[5].value, "2");
    }

    #[test]
    fn errors_end_the_iteration() {
        let stylesheet = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                <xsl:template match="/"><a/><xsl:message terminate="yes">stop</xsl:message></xsl:template>
            </xsl:stylesheet>"#,
            "cursor.xsl",
            &NoResolver,
        )
        .unwrap();
        let doc = XmlDocument::parse("<r/>").unwrap();
        let mut cursor = RecordCursor::new(&stylesheet, doc.root_node());
        let mut saw_error = false;
        for item in cursor.by_ref() {
            if let Err(e) = item {
                assert!(matches!(e, XsltError::Terminated(ref text) if text == "stop"));
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(cursor.next().is_none());
    }
}
