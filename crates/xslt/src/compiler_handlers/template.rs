//! Handlers for `<xsl:template>` and the instructions that invoke templates.

use crate::ast::{Action, ActionId, SortSpec, TemplateAction, VariableKind, DEFAULT_MODE};
use crate::compiler::CompilerBuilder;
use crate::error::XsltError;
use crate::query_store::QueryOptions;
use crate::util::{OwnedAttributes, get_attr_optional};

impl CompilerBuilder<'_> {
    pub(crate) fn handle_template_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let slots = self.pop_owner();
        let match_attr = get_attr_optional(attrs, b"match")?;
        let name = match get_attr_optional(attrs, b"name")? {
            Some(name) => Some(self.expand(&name, pos, source)?),
            None => None,
        };
        if match_attr.is_none() && name.is_none() {
            return Err(self.compile_error(
                "<xsl:template> requires a 'match' or 'name' attribute",
                pos,
                source,
            ));
        }

        let mode = match get_attr_optional(attrs, b"mode")? {
            Some(mode) => {
                let expanded = self.expand(&mode, pos, source)?;
                self.intern_mode(&expanded)
            }
            None => DEFAULT_MODE,
        };
        let priority = match get_attr_optional(attrs, b"priority")? {
            Some(p) => match p.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Some(v),
                _ if self.forwards_compatible() => None,
                _ => {
                    return Err(self.compile_error(format!("Invalid template priority '{}'", p), pos, source));
                }
            },
            None => None,
        };
        let pattern = match &match_attr {
            Some(m) => Some(self.compile_expr(m, QueryOptions::MATCH_PATTERN, pos, source)?),
            None => None,
        };

        let declaration = self.next_declaration();
        let module = self.current.module;
        let id = self.add_action(Action::Template(TemplateAction {
            name: name.clone(),
            mode,
            pattern,
            priority,
            declaration,
            module,
            precedence: 0,
            body,
            slots,
        }));
        if let Some(pattern) = pattern {
            self.register_rule(id, pattern, mode, priority, declaration);
        }
        if let Some(name) = name {
            self.decls.locations.insert(id, self.location(pos, source));
            self.decls.named_templates.push((name, id, module));
        }
        Ok(None)
    }

    /// Splits a body into its `xsl:sort` children and the rest, requiring
    /// the sorts to come first.
    fn leading_sorts(
        &self,
        body: Vec<ActionId>,
        element: &str,
        pos: usize,
        source: &str,
    ) -> Result<(Vec<ActionId>, Vec<ActionId>), XsltError> {
        let mut sorts = Vec::new();
        let mut rest = Vec::new();
        for id in body {
            if matches!(self.actions[id], Action::Sort(_)) {
                if !rest.is_empty() {
                    return Err(self.compile_error(
                        format!("<xsl:sort> must come first inside <xsl:{}>", element),
                        pos,
                        source,
                    ));
                }
                sorts.push(id);
            } else {
                rest.push(id);
            }
        }
        Ok((sorts, rest))
    }

    fn with_params(&self, body: &[ActionId], element: &str, pos: usize, source: &str) -> Result<Vec<ActionId>, XsltError> {
        self.reject_text(body, element, pos, source)?;
        let mut seen: Vec<&str> = Vec::new();
        let mut params = Vec::new();
        for &id in body {
            if let Action::Variable(v) = &self.actions[id]
                && v.kind == VariableKind::WithParam
            {
                if seen.contains(&v.name.as_str()) {
                    return Err(self.compile_error(format!("Parameter '{}' is passed twice", v.name), pos, source));
                }
                seen.push(&v.name);
                params.push(id);
            }
        }
        Ok(params)
    }

    pub(crate) fn handle_apply_templates_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let select = match get_attr_optional(attrs, b"select")? {
            Some(s) => Some(self.compile_expr(&s, QueryOptions::EXPRESSION, pos, source)?),
            None => None,
        };
        let mode = match get_attr_optional(attrs, b"mode")? {
            Some(mode) => {
                let expanded = self.expand(&mode, pos, source)?;
                self.intern_mode(&expanded)
            }
            None => DEFAULT_MODE,
        };
        let (sorts, rest) = self.leading_sorts(body, "apply-templates", pos, source)?;
        let params = self.with_params(&rest, "apply-templates", pos, source)?;
        Ok(Some(self.add_action(Action::ApplyTemplates {
            select,
            mode: Some(mode),
            sorts,
            params,
        })))
    }

    pub(crate) fn handle_call_template_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let name = self.required(attrs, "name", "call-template", pos, source)?;
        let name = self.expand(&name, pos, source)?;
        let params = self.with_params(&body, "call-template", pos, source)?;
        Ok(Some(self.add_action(Action::CallTemplate {
            name,
            params,
            target: None,
        })))
    }

    pub(crate) fn handle_sort_end(
        &mut self,
        attrs: &OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let select = get_attr_optional(attrs, b"select")?.unwrap_or_else(|| ".".to_string());
        let select = self.compile_expr(&select, QueryOptions::EXPRESSION, pos, source)?;
        let avt = |builder: &mut Self, name: &[u8]| -> Result<Option<crate::ast::Avt>, XsltError> {
            match get_attr_optional(attrs, name)? {
                Some(value) => Ok(Some(builder.compile_avt(&value, pos, source)?)),
                None => Ok(None),
            }
        };
        let data_type = avt(self, b"data-type")?;
        let order = avt(self, b"order")?;
        let case_order = avt(self, b"case-order")?;
        let lang = avt(self, b"lang")?;
        let forwards_compatible = self.forwards_compatible();
        Ok(Some(self.add_action(Action::Sort(SortSpec {
            select,
            data_type,
            order,
            case_order,
            lang,
            forwards_compatible,
        }))))
    }

    pub(crate) fn handle_for_each_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let select = self.required(attrs, "select", "for-each", pos, source)?;
        let select = self.compile_expr(&select, QueryOptions::EXPRESSION, pos, source)?;
        let (sorts, rest) = self.leading_sorts(body, "for-each", pos, source)?;
        let body = self.add_action(Action::Sequence(rest));
        Ok(Some(self.add_action(Action::ForEach { select, sorts, body })))
    }
}
