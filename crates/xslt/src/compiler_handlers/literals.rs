//! Handlers for literal result elements and the instructions that create
//! result nodes: `xsl:text`, `xsl:value-of`, `xsl:copy-of`, `xsl:element`,
//! `xsl:attribute`, `xsl:processing-instruction` and `xsl:number`.

use crate::ast::{Action, ActionId, Avt, NumberAction, NumberLevel, OutputName};
use crate::compiler::{BuilderState, CompilerBuilder};
use crate::error::XsltError;
use crate::query_store::QueryOptions;
use crate::util::{OwnedAttributes, XSLT_NAMESPACE, get_attr_optional, is_ncname, is_qname, split_qname};
use std::str::from_utf8;

impl CompilerBuilder<'_> {
    pub(crate) fn handle_literal_result_element_start(
        &mut self,
        uri: &str,
        local: &str,
        raw_name: &str,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        if self.parent_is_xsl(&["choose", "call-template", "apply-templates", "attribute-set", "text", "apply-imports"]) {
            return Err(self.compile_error(format!("<{}> is not allowed here", raw_name), pos, source));
        }
        if let Some(version) = self.xsl_attr(attrs, "version")? {
            self.apply_version(&version);
        }
        let excluded = self.xsl_attr(attrs, "exclude-result-prefixes")?;
        let extensions = self.xsl_attr(attrs, "extension-element-prefixes")?;
        self.apply_prefix_lists(excluded, extensions, pos, source)?;

        let sets = self.xsl_attr(attrs, "use-attribute-sets")?;
        let mut body = self.use_attribute_sets(sets, pos, source)?;
        for (key, value) in attrs {
            let key = from_utf8(key)?;
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let (prefix, attr_local) = split_qname(key);
            let namespace = if prefix.is_empty() {
                String::new()
            } else {
                self.namespace_for(prefix, pos, source)?
            };
            if namespace == XSLT_NAMESPACE {
                continue;
            }
            let value = self.compile_avt(from_utf8(value)?, pos, source)?;
            let id = self.add_action(Action::LiteralAttribute {
                name: OutputName::new(prefix, attr_local, &namespace),
                value,
            });
            body.push(id);
        }

        let namespaces = self.literal_namespaces();
        let (prefix, _) = split_qname(raw_name);
        self.enter(
            BuilderState::Literal {
                name: OutputName::new(prefix, local, uri),
                namespaces,
            },
            body,
        );
        Ok(())
    }

    pub(crate) fn handle_text_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let disable_escaping = self.yes_no(attrs, "disable-output-escaping", pos, source)?.unwrap_or(false);
        if let [single] = body.as_slice()
            && let Action::Text { disable_escaping: flag, .. } = &mut self.actions[*single]
        {
            *flag = disable_escaping;
            return Ok(Some(*single));
        }
        let mut value = String::new();
        for id in &body {
            if let Action::Text { value: part, .. } = &self.actions[*id] {
                value.push_str(part);
            }
        }
        Ok(Some(self.add_action(Action::Text {
            value,
            disable_escaping,
        })))
    }

    pub(crate) fn handle_value_of_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let select = self.required(attrs, "select", "value-of", pos, source)?;
        let select = self.compile_expr(&select, QueryOptions::EXPRESSION, pos, source)?;
        let disable_escaping = self.yes_no(attrs, "disable-output-escaping", pos, source)?.unwrap_or(false);
        Ok(Some(self.add_action(Action::ValueOf {
            select,
            disable_escaping,
        })))
    }

    pub(crate) fn handle_copy_of_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let select = self.required(attrs, "select", "copy-of", pos, source)?;
        let select = self.compile_expr(&select, QueryOptions::EXPRESSION, pos, source)?;
        Ok(Some(self.add_action(Action::CopyOf { select })))
    }

    /// The `name` and `namespace` AVTs shared by `xsl:element` and `xsl:attribute`.
    fn computed_name(
        &mut self,
        element: &str,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(Avt, Option<Avt>), XsltError> {
        let name = self.required(attrs, "name", element, pos, source)?;
        let name = self.compile_avt(&name, pos, source)?;
        if let Some(constant) = name.constant() {
            let constant = constant.trim();
            if !is_qname(constant) || (element == "attribute" && constant == "xmlns") {
                return Err(self.compile_error(
                    format!("'{}' is not a valid name for <xsl:{}>", constant, element),
                    pos,
                    source,
                ));
            }
        }
        let namespace = match get_attr_optional(attrs, b"namespace")? {
            Some(ns) => Some(self.compile_avt(&ns, pos, source)?),
            None => None,
        };
        Ok((name, namespace))
    }

    pub(crate) fn handle_element_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let (name, namespace) = self.computed_name("element", attrs, pos, source)?;
        let scope = self.snapshot();
        Ok(Some(self.add_action(Action::Element {
            name,
            namespace,
            scope,
            body,
        })))
    }

    pub(crate) fn handle_attribute_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let (name, namespace) = self.computed_name("attribute", attrs, pos, source)?;
        let scope = self.snapshot();
        Ok(Some(self.add_action(Action::Attribute {
            name,
            namespace,
            scope,
            body,
        })))
    }

    pub(crate) fn handle_processing_instruction_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let name = self.required(attrs, "name", "processing-instruction", pos, source)?;
        let name = self.compile_avt(&name, pos, source)?;
        if let Some(target) = name.constant()
            && (!is_ncname(target.trim()) || target.trim().eq_ignore_ascii_case("xml"))
        {
            return Err(self.compile_error(
                format!("'{}' is not a valid processing-instruction target", target),
                pos,
                source,
            ));
        }
        Ok(Some(self.add_action(Action::ProcessingInstruction { name, body })))
    }

    pub(crate) fn handle_number_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let level = match self
            .enumerated(attrs, "level", &["single", "multiple", "any"], pos, source)?
            .as_deref()
        {
            Some("multiple") => NumberLevel::Multiple,
            Some("any") => NumberLevel::Any,
            _ => NumberLevel::Single,
        };
        let pattern = |builder: &mut Self, name: &[u8], options| -> Result<Option<usize>, XsltError> {
            match get_attr_optional(attrs, name)? {
                Some(text) => Ok(Some(builder.compile_expr(&text, options, pos, source)?)),
                None => Ok(None),
            }
        };
        let count = pattern(self, b"count", QueryOptions::PATTERN)?;
        let from = pattern(self, b"from", QueryOptions::PATTERN)?;
        let value = pattern(self, b"value", QueryOptions::EXPRESSION)?;

        let avt = |builder: &mut Self, name: &[u8]| -> Result<Option<Avt>, XsltError> {
            match get_attr_optional(attrs, name)? {
                Some(text) => Ok(Some(builder.compile_avt(&text, pos, source)?)),
                None => Ok(None),
            }
        };
        let format = avt(self, b"format")?.unwrap_or_else(|| Avt::Constant("1".to_string()));
        let lang = avt(self, b"lang")?;
        let letter_value = avt(self, b"letter-value")?;
        let grouping_separator = avt(self, b"grouping-separator")?;
        let grouping_size = avt(self, b"grouping-size")?;

        Ok(Some(self.add_action(Action::Number(NumberAction {
            level,
            count,
            from,
            value,
            format,
            lang,
            letter_value,
            grouping_separator,
            grouping_size,
        }))))
    }
}
