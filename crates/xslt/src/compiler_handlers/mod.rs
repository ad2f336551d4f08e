pub(super) mod control_flow;
pub(super) mod literals;
pub(super) mod stylesheet;
pub(super) mod template;
pub(super) mod variables;

use crate::ast::{Action, ActionId};
use crate::compiler::{BuilderState, CompilerBuilder, ModuleKind};
use crate::error::XsltError;
use crate::util::{OwnedAttributes, get_attr_optional};

// Dispatch for elements in the XSLT namespace. The handlers themselves live
// in the sibling modules as further `impl CompilerBuilder` blocks.

pub(crate) const INSTRUCTIONS: &[&str] = &[
    "apply-templates",
    "apply-imports",
    "call-template",
    "for-each",
    "if",
    "choose",
    "when",
    "otherwise",
    "value-of",
    "text",
    "copy",
    "copy-of",
    "element",
    "attribute",
    "comment",
    "processing-instruction",
    "number",
    "sort",
    "message",
    "variable",
    "param",
    "with-param",
];

const DECLARATIONS: &[&str] = &[
    "template",
    "variable",
    "param",
    "attribute-set",
    "key",
    "output",
    "decimal-format",
    "namespace-alias",
    "strip-space",
    "preserve-space",
];

impl CompilerBuilder<'_> {
    pub(crate) fn handle_declaration_start(
        &mut self,
        local: &str,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        let mut body = Vec::new();
        match local {
            "import" | "include" => {
                let href = self.required(&attrs, "href", local, pos, source)?;
                let kind = if local == "import" {
                    ModuleKind::Import
                } else {
                    ModuleKind::Include
                };
                self.load_module(&href, kind, pos, source)?;
            }
            "template" | "variable" | "param" => self.push_owner(),
            "attribute-set" => {
                self.push_owner();
                body = self.use_attribute_sets(get_attr_optional(&attrs, b"use-attribute-sets")?, pos, source)?;
            }
            _ if DECLARATIONS.contains(&local) => {}
            _ if self.forwards_compatible() => {
                log::warn!(
                    "Ignoring unknown declaration <xsl:{}> at {}",
                    local,
                    self.location(pos, source)
                );
                self.enter(BuilderState::Ignored, Vec::new());
                return Ok(());
            }
            _ => {
                return Err(self.compile_error(
                    format!("<xsl:{}> is not allowed at the top level", local),
                    pos,
                    source,
                ));
            }
        }
        self.enter(
            BuilderState::Xsl {
                name: local.to_string(),
                attrs,
                pos,
            },
            body,
        );
        Ok(())
    }

    fn check_placement(&self, local: &str, pos: usize, source: &str) -> Result<(), XsltError> {
        let misplaced = match local {
            "when" | "otherwise" => !self.parent_is_xsl(&["choose"]),
            "sort" => !self.parent_is_xsl(&["apply-templates", "for-each"]),
            "with-param" => !self.parent_is_xsl(&["apply-templates", "call-template"]),
            "param" => !self.parent_is_xsl(&["template"]),
            _ => false,
        };
        let restricted_parent = if self.parent_is_xsl(&["choose"]) {
            !matches!(local, "when" | "otherwise")
        } else if self.parent_is_xsl(&["call-template"]) {
            local != "with-param"
        } else if self.parent_is_xsl(&["apply-templates"]) {
            !matches!(local, "sort" | "with-param")
        } else if self.parent_is_xsl(&["attribute-set"]) {
            local != "attribute"
        } else {
            self.parent_is_xsl(&["text", "apply-imports"])
        };
        if misplaced || restricted_parent {
            return Err(self.compile_error(format!("<xsl:{}> is not allowed here", local), pos, source));
        }
        Ok(())
    }

    pub(crate) fn handle_instruction_start(
        &mut self,
        local: &str,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        if local == "fallback" {
            // The parent instruction is supported, so its fallback never runs.
            self.enter(BuilderState::Ignored, Vec::new());
            return Ok(());
        }
        if !INSTRUCTIONS.contains(&local) {
            if self.forwards_compatible() {
                log::debug!("Unknown instruction <xsl:{}> compiled for fallback", local);
                self.enter(
                    BuilderState::Unsupported {
                        name: format!("xsl:{}", local),
                    },
                    Vec::new(),
                );
                return Ok(());
            }
            return Err(self.compile_error(format!("Unknown XSLT instruction <xsl:{}>", local), pos, source));
        }
        self.check_placement(local, pos, source)?;

        let mut body = Vec::new();
        match local {
            "choose" => self.current.branches.push(Vec::new()),
            "copy" | "element" => {
                body = self.use_attribute_sets(get_attr_optional(&attrs, b"use-attribute-sets")?, pos, source)?;
            }
            _ => {}
        }
        self.enter(
            BuilderState::Xsl {
                name: local.to_string(),
                attrs,
                pos,
            },
            body,
        );
        Ok(())
    }

    /// Builds the action for a closed XSLT element. Declarations register
    /// themselves and return `None`; instructions return the id to append to
    /// the parent body.
    pub(crate) fn handle_xsl_end(
        &mut self,
        name: &str,
        attrs: OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        match name {
            "import" | "include" => Ok(None),
            "template" => self.handle_template_end(&attrs, body, pos, source),
            "variable" | "param" | "with-param" => self.handle_variable_end(name, &attrs, body, pos, source),
            "attribute-set" => self.handle_attribute_set_end(&attrs, body, pos, source),
            "key" => self.handle_key_end(&attrs, pos, source),
            "output" => self.handle_output_end(&attrs, pos, source),
            "decimal-format" => self.handle_decimal_format_end(&attrs, pos, source),
            "namespace-alias" => self.handle_namespace_alias_end(&attrs, pos, source),
            "strip-space" | "preserve-space" => self.handle_space_end(name == "strip-space", &attrs, pos, source),
            "apply-templates" => self.handle_apply_templates_end(&attrs, body, pos, source),
            "apply-imports" => Ok(Some(self.add_action(Action::ApplyImports))),
            "call-template" => self.handle_call_template_end(&attrs, body, pos, source),
            "sort" => self.handle_sort_end(&attrs, pos, source),
            "for-each" => self.handle_for_each_end(&attrs, body, pos, source),
            "if" => self.handle_if_end(&attrs, body, pos, source),
            "choose" => self.handle_choose_end(body, pos, source),
            "when" | "otherwise" => self.handle_branch_end(name, &attrs, body, pos, source),
            "message" => self.handle_message_end(&attrs, body, pos, source),
            "fallback" => Ok(Some(self.add_action(Action::Sequence(body)))),
            "value-of" => self.handle_value_of_end(&attrs, pos, source),
            "text" => self.handle_text_end(&attrs, body, pos, source),
            "copy" => Ok(Some(self.add_action(Action::Copy { body }))),
            "copy-of" => self.handle_copy_of_end(&attrs, pos, source),
            "element" => self.handle_element_end(&attrs, body, pos, source),
            "attribute" => self.handle_attribute_end(&attrs, body, pos, source),
            "comment" => Ok(Some(self.add_action(Action::Comment { body }))),
            "processing-instruction" => self.handle_processing_instruction_end(&attrs, body, pos, source),
            "number" => self.handle_number_end(&attrs, pos, source),
            other => Err(self.compile_error(format!("Unexpected <xsl:{}>", other), pos, source)),
        }
    }

    /// The leading `UseAttributeSets` action of a body, if the element names any sets.
    pub(crate) fn use_attribute_sets(
        &mut self,
        value: Option<String>,
        pos: usize,
        source: &str,
    ) -> Result<Vec<ActionId>, XsltError> {
        let Some(value) = value else {
            return Ok(Vec::new());
        };
        let names = value
            .split_whitespace()
            .map(|name| self.expand(name, pos, source))
            .collect::<Result<Vec<_>, _>>()?;
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let id = self.add_action(Action::UseAttributeSets {
            names,
            sets: Vec::new(),
        });
        self.decls.locations.insert(id, self.location(pos, source));
        Ok(vec![id])
    }

    /// Rejects non-whitespace text in elements whose content is restricted.
    pub(crate) fn reject_text(&self, body: &[ActionId], element: &str, pos: usize, source: &str) -> Result<(), XsltError> {
        if body.iter().any(|id| matches!(self.actions[*id], Action::Text { .. })) {
            return Err(self.compile_error(
                format!("Text is not allowed inside <xsl:{}>", element),
                pos,
                source,
            ));
        }
        Ok(())
    }
}
