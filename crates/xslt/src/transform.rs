//! One-call transformation of an XML source to serialized output.

use crate::ast::CompiledStylesheet;
use crate::datasources::XmlDocument;
use crate::error::XsltError;
use crate::output::{OutputSettings, XmlSerializer};
use crate::processor::{ExecutionStatus, Processor};
use std::collections::HashMap;
use std::io::Write;
use trellis_xpath1::XPathValue;

#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Global parameters by expanded name, passed as strings.
    pub parameters: HashMap<String, String>,
    pub mode: Option<String>,
    /// Overrides applied on top of the stylesheet's `xsl:output`.
    pub output: Option<OutputSettings>,
}

/// The `xsl:output` settings after `options` were applied.
pub fn effective_settings(stylesheet: &CompiledStylesheet, options: &TransformOptions) -> OutputSettings {
    let mut settings = stylesheet.output.clone();
    if let Some(overrides) = &options.output {
        settings.merge(overrides);
    }
    settings
}

/// Parses `source`, strips whitespace as the stylesheet asks, runs the
/// transformation and serializes the result into `out`. Returns the writer
/// together with the `xsl:message` texts.
pub fn transform<W: Write>(
    stylesheet: &CompiledStylesheet,
    source: &str,
    options: &TransformOptions,
    out: W,
) -> Result<(W, Vec<String>), XsltError> {
    let document = XmlDocument::parse_stripped(source, &stylesheet.whitespace)?;
    let mut serializer = XmlSerializer::new(out, effective_settings(stylesheet, options));

    let messages = {
        let mut processor = Processor::new(stylesheet, document.root_node(), &mut serializer);
        for (name, value) in &options.parameters {
            processor = processor.with_parameter(name, XPathValue::String(value.clone()));
        }
        if let Some(mode) = &options.mode {
            processor = processor.with_mode(mode);
        }
        while processor.execute()? != ExecutionStatus::Finished {}
        processor.messages().to_vec()
    };
    Ok((serializer.into_inner(), messages))
}

pub fn transform_to_string(
    stylesheet: &CompiledStylesheet,
    source: &str,
    options: &TransformOptions,
) -> Result<String, XsltError> {
    let (bytes, _) = transform(stylesheet, source, options, Vec::new())?;
    String::from_utf8(bytes).map_err(|e| XsltError::Utf8Str(e.utf8_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::output::OutputMethod;
    use crate::resolver::NoResolver;

    #[test]
    fn serializes_with_merged_settings() {
        let stylesheet = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                <xsl:output method="xml" omit-xml-declaration="yes"/>
                <xsl:param name="p"/>
                <xsl:template match="/"><out><xsl:value-of select="concat($p, count(//x))"/></out></xsl:template>
            </xsl:stylesheet>"#,
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let mut options = TransformOptions::default();
        options.parameters.insert("p".to_string(), "n=".to_string());
        let text = transform_to_string(&stylesheet, "<r><x/><x/></r>", &options).unwrap();
        assert_eq!(text, "<out>n=2</out>\n");

        options.output = Some(OutputSettings {
            method: Some(OutputMethod::Text),
            ..OutputSettings::default()
        });
        let text = transform_to_string(&stylesheet, "<r><x/></r>", &options).unwrap();
        assert_eq!(text, "n=1");
    }

    #[test]
    fn messages_are_returned() {
        let stylesheet = compile(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                <xsl:template match="/"><xsl:message>seen <xsl:value-of select="name(*)"/></xsl:message></xsl:template>
            </xsl:stylesheet>"#,
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let (_, messages) = transform(&stylesheet, "<doc/>", &TransformOptions::default(), Vec::new()).unwrap();
        assert_eq!(messages, vec!["seen doc".to_string()]);
    }
}
