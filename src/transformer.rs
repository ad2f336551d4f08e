use crate::error::TrellisError;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use trellis_xslt::output::RecordCursor;
use trellis_xslt::transform::{TransformOptions, effective_settings, transform};
use trellis_xslt::{CompiledStylesheet, OutputSettings, XPathValue, XmlDocument, XmlNode};

/// A compiled stylesheet plus the options every run uses.
///
/// Cloning is cheap; clones share the compiled stylesheet, which is
/// immutable and can be used from several threads at once.
#[derive(Debug, Clone)]
pub struct Transformer {
    stylesheet: Arc<CompiledStylesheet>,
    options: TransformOptions,
}

/// What a run produced besides the serialized output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformReport {
    pub messages: Vec<String>,
}

impl Transformer {
    pub fn new(stylesheet: Arc<CompiledStylesheet>, options: TransformOptions) -> Self {
        Transformer { stylesheet, options }
    }

    pub fn stylesheet(&self) -> &Arc<CompiledStylesheet> {
        &self.stylesheet
    }

    /// The output settings runs of this transformer use.
    pub fn output_settings(&self) -> OutputSettings {
        effective_settings(&self.stylesheet, &self.options)
    }

    /// Transforms an XML document held in a string.
    pub fn transform_str(&self, source: &str) -> Result<String, TrellisError> {
        let (bytes, _) = self.transform_to_writer(source, Vec::new())?;
        Ok(String::from_utf8(bytes).map_err(|e| trellis_xslt::XsltError::Utf8Str(e.utf8_error()))?)
    }

    pub fn transform_to_writer<W: Write>(&self, source: &str, out: W) -> Result<(W, TransformReport), TrellisError> {
        let (out, messages) = transform(&self.stylesheet, source, &self.options, out)?;
        Ok((out, TransformReport { messages }))
    }

    /// Reads `input` and writes the result to `output`.
    pub fn transform_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input: P,
        output: Q,
    ) -> Result<TransformReport, TrellisError> {
        let input = input.as_ref();
        let source = fs::read_to_string(input).map_err(|e| {
            std::io::Error::new(e.kind(), format!("Failed to read '{}': {}", input.display(), e))
        })?;
        let file = fs::File::create(output.as_ref())?;
        let (mut writer, report) = self.transform_to_writer(&source, BufWriter::new(file))?;
        writer.flush()?;
        Ok(report)
    }

    /// Runs the transformation on a parsed document as an iterator of
    /// output records.
    pub fn records<'s, 'd>(&'s self, document: &'d XmlDocument<'d>) -> RecordCursor<'s, 'd, XmlNode<'d, 'd>> {
        let mut cursor = RecordCursor::new(&self.stylesheet, document.root_node());
        for (name, value) in &self.options.parameters {
            cursor = cursor.with_parameter(name, XPathValue::String(value.clone()));
        }
        if let Some(mode) = &self.options.mode {
            cursor = cursor.with_mode(mode);
        }
        cursor
    }

    /// Parses `source` with the stylesheet's whitespace stripping applied.
    pub fn parse_document<'i>(&self, source: &'i str) -> Result<XmlDocument<'i>, TrellisError> {
        XmlDocument::parse_stripped(source, &self.stylesheet.whitespace)
            .map_err(|e| TrellisError::Xslt(e.into()))
    }
}
