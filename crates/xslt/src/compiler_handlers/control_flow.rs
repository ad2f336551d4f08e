//! Handlers for `<xsl:if>`, `<xsl:choose>` and `<xsl:message>`.

use crate::ast::{Action, ActionId, Branch};
use crate::compiler::CompilerBuilder;
use crate::error::XsltError;
use crate::query_store::QueryOptions;
use crate::util::OwnedAttributes;

impl CompilerBuilder<'_> {
    pub(crate) fn handle_if_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let test = self.required(attrs, "test", "if", pos, source)?;
        let test = self.compile_expr(&test, QueryOptions::EXPRESSION, pos, source)?;
        Ok(Some(self.add_action(Action::If { test, body })))
    }

    /// `xsl:when` and `xsl:otherwise` add a branch to the enclosing choose
    /// instead of producing an action of their own.
    pub(crate) fn handle_branch_end(
        &mut self,
        name: &str,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let test = if name == "when" {
            let test = self.required(attrs, "test", "when", pos, source)?;
            Some(self.compile_expr(&test, QueryOptions::EXPRESSION, pos, source)?)
        } else {
            None
        };
        let after_otherwise = self
            .current
            .branches
            .last()
            .and_then(|b| b.last())
            .is_some_and(|b| b.test.is_none());
        if after_otherwise {
            return Err(self.compile_error("<xsl:otherwise> must be the last branch of <xsl:choose>", pos, source));
        }
        let body = self.add_action(Action::Sequence(body));
        if let Some(branches) = self.current.branches.last_mut() {
            branches.push(Branch { test, body });
        }
        Ok(None)
    }

    pub(crate) fn handle_choose_end(
        &mut self,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        self.reject_text(&body, "choose", pos, source)?;
        let branches = self.current.branches.pop().unwrap_or_default();
        if !branches.iter().any(|b| b.test.is_some()) {
            return Err(self.compile_error("<xsl:choose> requires at least one <xsl:when>", pos, source));
        }
        Ok(Some(self.add_action(Action::Choose(branches))))
    }

    pub(crate) fn handle_message_end(
        &mut self,
        attrs: &OwnedAttributes,
        body: Vec<ActionId>,
        pos: usize,
        source: &str,
    ) -> Result<Option<ActionId>, XsltError> {
        let terminate = self.yes_no(attrs, "terminate", pos, source)?.unwrap_or(false);
        Ok(Some(self.add_action(Action::Message { terminate, body })))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::Action;
    use crate::compiler::compile;
    use crate::resolver::NoResolver;

    fn template(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:template match="/">{}</xsl:template></xsl:stylesheet>"#,
            body
        )
    }

    #[test]
    fn choose_collects_branches_in_order() {
        let compiled = compile(
            &template(
                r#"<xsl:choose>
                     <xsl:when test="1">a</xsl:when>
                     <xsl:when test="2">b</xsl:when>
                     <xsl:otherwise>c</xsl:otherwise>
                   </xsl:choose>"#,
            ),
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let branches = compiled
            .actions
            .iter()
            .find_map(|a| match a {
                Action::Choose(b) => Some(b.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(branches.len(), 3);
        assert!(branches[0].test.is_some());
        assert!(branches[2].test.is_none());
    }

    #[test]
    fn malformed_choose_is_rejected() {
        for body in [
            "<xsl:choose><xsl:otherwise/></xsl:choose>",
            r#"<xsl:choose><xsl:otherwise/><xsl:when test="1"/></xsl:choose>"#,
            r#"<xsl:choose>text<xsl:when test="1"/></xsl:choose>"#,
            r#"<xsl:when test="1"/>"#,
        ] {
            assert!(compile(&template(body), "t.xsl", &NoResolver).is_err(), "{}", body);
        }
    }
}
