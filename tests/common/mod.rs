#![allow(dead_code)]

use std::sync::Arc;
use trellis::xslt::{ExecutionStatus, Processor, Record, RecordOutput, SinkStatus, XmlDocument, XsltError};
use trellis::{TransformBuilder, Transformer, TrellisError};
use trellis::traits::InMemoryResourceProvider;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wraps top-level declarations in an `xsl:stylesheet` that writes text.
pub fn text_sheet(body: &str) -> String {
    format!(
        r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:output method="text"/>
            {}
        </xsl:stylesheet>"#,
        body
    )
}

/// Wraps top-level declarations in an `xsl:stylesheet` that writes XML
/// without a declaration.
pub fn xml_sheet(body: &str) -> String {
    format!(
        r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:output method="xml" omit-xml-declaration="yes"/>
            {}
        </xsl:stylesheet>"#,
        body
    )
}

/// A bare stylesheet element with the given version and body.
pub fn sheet_with_version(version: &str, body: &str) -> String {
    format!(
        r#"<xsl:stylesheet version="{}" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
        version, body
    )
}

pub fn compile(stylesheet: &str) -> Result<Transformer, TrellisError> {
    TransformBuilder::new()
        .with_stylesheet_source(stylesheet, "test.xsl")
        .build()
}

/// Compiles `stylesheet` and applies it to `source`.
pub fn run(stylesheet: &str, source: &str) -> Result<String, TrellisError> {
    compile(stylesheet)?.transform_str(source)
}

/// Compiles `main.xsl` with further modules served from memory.
pub fn compile_modules(main: &str, modules: &[(&str, &str)]) -> Result<Transformer, TrellisError> {
    let provider = modules
        .iter()
        .fold(InMemoryResourceProvider::new(), |provider, (path, source)| {
            provider.with(*path, source.as_bytes().to_vec())
        });
    TransformBuilder::new()
        .with_resource_provider(Arc::new(provider))
        .with_stylesheet_source(main, "main.xsl")
        .build()
}

/// Accepts every record.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub records: Vec<Record>,
    pub ended: bool,
}

impl RecordOutput for CollectingSink {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        self.records.push(record.clone());
        Ok(SinkStatus::Continue)
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        self.ended = true;
        Ok(())
    }
}

/// Refuses every first offer of a record with `Overflow`, then accepts it
/// and asks for an interruption.
#[derive(Debug, Default)]
pub struct StutteringSink {
    pub records: Vec<Record>,
    pub offers: usize,
    pub ended: bool,
}

impl RecordOutput for StutteringSink {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        self.offers += 1;
        if self.offers % 2 == 1 {
            return Ok(SinkStatus::Overflow);
        }
        self.records.push(record.clone());
        Ok(SinkStatus::Interrupt)
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        self.ended = true;
        Ok(())
    }
}

/// Drives a processor over `source` into `sink` until it finishes and
/// returns how often it suspended.
pub fn drive<S: RecordOutput>(transformer: &Transformer, source: &str, sink: &mut S) -> Result<usize, XsltError> {
    let document = XmlDocument::parse_stripped(source, &transformer.stylesheet().whitespace)?;
    let mut processor = Processor::new(transformer.stylesheet(), document.root_node(), sink);
    let mut suspensions = 0;
    while processor.execute()? == ExecutionStatus::Suspended {
        suspensions += 1;
    }
    Ok(suspensions)
}
