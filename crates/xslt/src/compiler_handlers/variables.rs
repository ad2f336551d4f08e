//! Handlers for `<xsl:variable>`, `<xsl:param>`, and `<xsl:with-param>`.

use crate::ast::{Action, ActionId, VariableAction, VariableKind};
use crate::compiler::{BuilderState, CompilerBuilder};
use crate::error::XsltError;
use crate::query_store::QueryOptions;
use crate::util::{OwnedAttributes, get_attr_optional};

impl CompilerBuilder<'_> {
    fn variable_kind(&self, element: &str) -> VariableKind {
        let top_level = matches!(self.parent_state(), Some(BuilderState::Stylesheet));
        match (element, top_level) {
            ("with-param", _) => VariableKind::WithParam,
            ("param", true) => VariableKind::GlobalParam,
            ("param", false) => VariableKind::LocalParam,
            (_, true) => VariableKind::GlobalVariable,
            (_, false) => VariableKind::LocalVariable,
        }
    }

    pub(crate) fn handle_variable_end(
        &mut self,
        element: &str,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let kind = self.variable_kind(element);
        let slots = if kind.is_global() { self.pop_owner() } else { 0 };

        let name = self.required(attrs, "name", element, pos, source)?;
        let name = self.expand(&name, pos, source)?;
        let select = get_attr_optional(attrs, b"select")?;
        if select.is_some() && !body.is_empty() {
            return Err(self.compile_error(
                format!("<xsl:{}> '{}' has both a select attribute and content", element, name),
                pos,
                source,
            ));
        }
        let select = match select {
            Some(s) => Some(self.compile_expr(&s, QueryOptions::EXPRESSION, pos, source)?),
            None => None,
        };

        let slot = match kind {
            VariableKind::LocalVariable | VariableKind::LocalParam => self.alloc_slot(),
            _ => 0,
        };
        let id = self.add_action(Action::Variable(VariableAction {
            kind,
            name: name.clone(),
            slot,
            select,
            body,
            slots,
        }));
        if kind.is_global() {
            self.decls.locations.insert(id, self.location(pos, source));
            self.decls.globals.push((name, id, self.current.module));
            return Ok(None);
        }
        Ok(Some(id))
    }
}
