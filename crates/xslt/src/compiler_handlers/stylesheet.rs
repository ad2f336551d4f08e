//! Handlers for the stylesheet element and the top-level declarations.

use crate::ast::{Action, ActionId, KeyDefinition, TemplateAction, WhitespaceTest, DEFAULT_MODE};
use crate::compiler::{BuilderState, CompilerBuilder};
use crate::decimal_format::DecimalFormat;
use crate::error::XsltError;
use crate::output::{OutputMethod, OutputSettings};
use crate::query_store::QueryOptions;
use crate::util::{OwnedAttributes, expanded_name, get_attr_optional, split_qname};
use std::str::from_utf8;

impl CompilerBuilder<'_> {
    pub(crate) fn handle_stylesheet_start(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        let version = self.required(attrs, "version", "stylesheet", pos, source)?;
        self.apply_version(&version);
        self.apply_prefix_lists(
            get_attr_optional(attrs, b"exclude-result-prefixes")?,
            get_attr_optional(attrs, b"extension-element-prefixes")?,
            pos,
            source,
        )?;
        self.enter(BuilderState::Stylesheet, Vec::new());
        Ok(())
    }

    /// A literal result element as the document element: the whole file is
    /// the body of a template matching the root.
    pub(crate) fn handle_simplified_start(
        &mut self,
        uri: &str,
        local: &str,
        raw_name: &str,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        let Some(version) = self.xsl_attr(&attrs, "version")? else {
            return Err(self.compile_error(
                format!("<{}> is neither xsl:stylesheet nor a literal result element with xsl:version", raw_name),
                pos,
                source,
            ));
        };
        self.apply_version(&version);
        self.enter(BuilderState::Stylesheet, Vec::new());
        self.push_owner();
        self.enter(BuilderState::Implicit { pos }, Vec::new());
        self.handle_literal_result_element_start(uri, local, raw_name, &attrs, pos, source)
    }

    pub(crate) fn handle_simplified_end(&mut self, start: usize, source: &str) -> Result<(), XsltError> {
        self.current.state_stack.pop();
        let body = self.current.instruction_stack.pop().unwrap_or_default();
        self.current.state_stack.pop();
        self.current.instruction_stack.pop();

        let slots = self.pop_owner();
        let pattern = self.compile_expr("/", QueryOptions::MATCH_PATTERN, start, source)?;
        let declaration = self.next_declaration();
        let module = self.current.module;
        let template = self.add_action(Action::Template(TemplateAction {
            name: None,
            mode: DEFAULT_MODE,
            pattern: Some(pattern),
            priority: None,
            declaration,
            module,
            precedence: 0,
            body,
            slots,
        }));
        self.register_rule(template, pattern, DEFAULT_MODE, None, declaration);
        Ok(())
    }

    pub(crate) fn handle_attribute_set_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let slots = self.pop_owner();
        let name = self.required(attrs, "name", "attribute-set", pos, source)?;
        let name = self.expand(&name, pos, source)?;
        self.reject_text(&body, "attribute-set", pos, source)?;
        let id = self.add_action(Action::AttributeSet {
            name: name.clone(),
            body,
            slots,
        });
        self.decls.locations.insert(id, self.location(pos, source));
        self.decls.attribute_sets.push((name, id, self.current.module));
        Ok(None)
    }

    pub(crate) fn handle_key_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let name = self.required(attrs, "name", "key", pos, source)?;
        let name = self.expand(&name, pos, source)?;
        let pattern = self.required(attrs, "match", "key", pos, source)?;
        let use_expr = self.required(attrs, "use", "key", pos, source)?;
        let pattern = self.compile_expr(&pattern, QueryOptions::KEY_PATTERN, pos, source)?;
        let use_expr = self.compile_expr(&use_expr, QueryOptions::KEY_USE, pos, source)?;
        self.decls.keys.push((name, KeyDefinition { pattern, use_expr }));
        Ok(None)
    }

    pub(crate) fn handle_output_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let mut settings = OutputSettings::default();
        if let Some(method) = get_attr_optional(attrs, b"method")? {
            let method = method.trim();
            match OutputMethod::parse(method) {
                Some(m) => settings.method = Some(m),
                None if method.contains(':') => {
                    log::warn!("Output method '{}' is not supported, using xml", method);
                    settings.method = Some(OutputMethod::Xml);
                }
                None if self.forwards_compatible() => {}
                None => {
                    return Err(self.compile_error(format!("Unknown output method '{}'", method), pos, source));
                }
            }
        }
        settings.version = get_attr_optional(attrs, b"version")?;
        settings.encoding = get_attr_optional(attrs, b"encoding")?;
        settings.omit_xml_declaration = self.yes_no(attrs, "omit-xml-declaration", pos, source)?;
        settings.standalone = self.yes_no(attrs, "standalone", pos, source)?;
        settings.doctype_public = get_attr_optional(attrs, b"doctype-public")?;
        settings.doctype_system = get_attr_optional(attrs, b"doctype-system")?;
        settings.indent = self.yes_no(attrs, "indent", pos, source)?;
        settings.media_type = get_attr_optional(attrs, b"media-type")?;
        if let Some(names) = get_attr_optional(attrs, b"cdata-section-elements")? {
            for qname in names.split_whitespace() {
                // Element names here take the default namespace.
                let (prefix, local) = split_qname(qname);
                let uri = self.namespace_for(prefix, pos, source)?;
                settings.cdata_section_elements.push(expanded_name(&uri, local));
            }
        }
        self.decls.outputs.push((settings, self.current.module));
        Ok(None)
    }

    pub(crate) fn handle_decimal_format_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let name = match get_attr_optional(attrs, b"name")? {
            Some(name) => self.expand(&name, pos, source)?,
            None => String::new(),
        };
        let mut format = DecimalFormat::default();
        for (key, value) in attrs {
            let key = from_utf8(key)?;
            if key == "name" || key.starts_with("xmlns") || key.contains(':') {
                continue;
            }
            let value = from_utf8(value)?;
            if !format.set(key, value) && !self.forwards_compatible() {
                return Err(self.compile_error(
                    format!("Invalid decimal-format attribute {}=\"{}\"", key, value),
                    pos,
                    source,
                ));
            }
        }
        let location = self.location(pos, source);
        self.decls.decimal_formats.push((name, format, self.current.module, location));
        Ok(None)
    }

    pub(crate) fn handle_namespace_alias_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let from = self.required(attrs, "stylesheet-prefix", "namespace-alias", pos, source)?;
        let to = self.required(attrs, "result-prefix", "namespace-alias", pos, source)?;
        let from = if from == "#default" { "" } else { from.as_str() };
        let to = if to == "#default" { "" } else { to.as_str() };
        let from_uri = self.namespace_for(from, pos, source)?;
        let to_uri = self.namespace_for(to, pos, source)?;
        self.decls
            .aliases
            .push((from_uri, to.to_string(), to_uri, self.current.module));
        Ok(None)
    }

    pub(crate) fn handle_space_end(
        &mut self,
        strip: bool,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let element = if strip { "strip-space" } else { "preserve-space" };
        let elements = self.required(attrs, "elements", element, pos, source)?;
        for token in elements.split_whitespace() {
            let test = if token == "*" {
                WhitespaceTest::Any
            } else if let Some(prefix) = token.strip_suffix(":*") {
                WhitespaceTest::Namespace(self.namespace_for(prefix, pos, source)?)
            } else {
                let (prefix, local) = split_qname(token);
                let namespace = if prefix.is_empty() {
                    String::new()
                } else {
                    self.namespace_for(prefix, pos, source)?
                };
                WhitespaceTest::Name {
                    namespace,
                    local: local.to_string(),
                }
            };
            self.decls.whitespace.push((test, strip, self.current.module));
        }
        Ok(None)
    }
}
