//! The compiled instruction graph.
//!
//! Every instruction is an [`Action`] stored in one arena and addressed by
//! [`ActionId`]. Containers own ordered lists of child ids. The graph is built
//! by the compiler and never changes afterwards, so a [`CompiledStylesheet`] can
//! be shared by any number of processors.

use crate::decimal_format::DecimalFormat;
use crate::error::{Location, XsltError};
use crate::output::OutputSettings;
use crate::query_store::{QueryId, QueryStore, ScopeSnapshot};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_xpath1::FragmentName;

pub type ActionId = usize;
pub type ModeId = usize;

/// The unnamed mode.
pub const DEFAULT_MODE: ModeId = 0;

/// A name as it will be written to the result tree.
pub type OutputName = FragmentName;

/// An attribute value template.
#[derive(Debug, Clone, PartialEq)]
pub enum Avt {
    /// No `{}` segments: the value is the stored string itself.
    Constant(String),
    Parts(Vec<AvtPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AvtPart {
    Literal(String),
    Expression(QueryId),
}

impl Avt {
    /// Splits `text` into literal and `{expression}` parts. `compile` turns each
    /// expression into a query id. Syntax faults come back as compile errors
    /// without a location; the caller knows where the attribute is.
    pub fn parse<F>(text: &str, mut compile: F) -> Result<Avt, XsltError>
    where
        F: FnMut(&str) -> Result<QueryId, XsltError>,
    {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(XsltError::compile(
                        format!("Unmatched '}}' in attribute value template '{}'", text),
                        Location::default(),
                    ));
                }
                '{' => {
                    let start = i + 1;
                    let mut quote: Option<char> = None;
                    let mut end = None;
                    for (j, d) in chars.by_ref() {
                        match (quote, d) {
                            (Some(q), d) if d == q => quote = None,
                            (Some(_), _) => {}
                            (None, '\'' | '"') => quote = Some(d),
                            (None, '}') => {
                                end = Some(j);
                                break;
                            }
                            _ => {}
                        }
                    }
                    let Some(end) = end else {
                        return Err(XsltError::compile(
                            format!("Unterminated expression in attribute value template '{}'", text),
                            Location::default(),
                        ));
                    };
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Expression(compile(&text[start..end])?));
                }
                _ => literal.push(c),
            }
        }

        if parts.is_empty() {
            return Ok(Avt::Constant(literal));
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(Avt::Parts(parts))
    }

    pub fn constant(&self) -> Option<&str> {
        match self {
            Avt::Constant(s) => Some(s),
            Avt::Parts(_) => None,
        }
    }

    /// Concatenates the parts, asking `eval` for the string value of each
    /// expression. A constant is handed back borrowed, without copying.
    pub fn evaluate_with<F>(&self, mut eval: F) -> Result<Cow<'_, str>, XsltError>
    where
        F: FnMut(QueryId) -> Result<String, XsltError>,
    {
        match self {
            Avt::Constant(s) => Ok(Cow::Borrowed(s.as_str())),
            Avt::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        AvtPart::Literal(s) => out.push_str(s),
                        AvtPart::Expression(q) => out.push_str(&eval(*q)?),
                    }
                }
                Ok(Cow::Owned(out))
            }
        }
    }

    pub fn queries(&self) -> Vec<QueryId> {
        match self {
            Avt::Constant(_) => Vec::new(),
            Avt::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    AvtPart::Expression(q) => Some(*q),
                    AvtPart::Literal(_) => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    GlobalVariable,
    GlobalParam,
    LocalVariable,
    LocalParam,
    WithParam,
}

impl VariableKind {
    pub fn is_global(self) -> bool {
        matches!(self, VariableKind::GlobalVariable | VariableKind::GlobalParam)
    }

    pub fn is_param(self) -> bool {
        matches!(self, VariableKind::GlobalParam | VariableKind::LocalParam)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableAction {
    pub kind: VariableKind,
    /// Expanded name.
    pub name: String,
    /// Local slot, or the index into the global table.
    pub slot: usize,
    pub select: Option<QueryId>,
    pub body: Vec<ActionId>,
    /// Slots needed by variables declared inside a global's body.
    pub slots: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateAction {
    pub name: Option<String>,
    pub mode: ModeId,
    pub pattern: Option<QueryId>,
    pub priority: Option<f64>,
    pub declaration: usize,
    pub module: usize,
    pub precedence: usize,
    pub body: Vec<ActionId>,
    pub slots: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub select: QueryId,
    pub data_type: Option<Avt>,
    pub order: Option<Avt>,
    pub case_order: Option<Avt>,
    pub lang: Option<Avt>,
    pub forwards_compatible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberLevel {
    Single,
    Multiple,
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberAction {
    pub level: NumberLevel,
    pub count: Option<QueryId>,
    pub from: Option<QueryId>,
    pub value: Option<QueryId>,
    pub format: Avt,
    pub lang: Option<Avt>,
    pub letter_value: Option<Avt>,
    pub grouping_separator: Option<Avt>,
    pub grouping_size: Option<Avt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// `None` for `xsl:otherwise`.
    pub test: Option<QueryId>,
    pub body: ActionId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Computes the globals, then applies templates to the root node.
    Root,
    Template(TemplateAction),
    Sequence(Vec<ActionId>),
    ApplyTemplates {
        select: Option<QueryId>,
        /// `None` keeps the current mode (built-in rules only).
        mode: Option<ModeId>,
        sorts: Vec<ActionId>,
        params: Vec<ActionId>,
    },
    ApplyImports,
    CallTemplate {
        name: String,
        params: Vec<ActionId>,
        target: Option<ActionId>,
    },
    ForEach {
        select: QueryId,
        sorts: Vec<ActionId>,
        body: ActionId,
    },
    If {
        test: QueryId,
        body: Vec<ActionId>,
    },
    Choose(Vec<Branch>),
    ValueOf {
        select: QueryId,
        disable_escaping: bool,
    },
    Text {
        value: String,
        disable_escaping: bool,
    },
    CopyOf {
        select: QueryId,
    },
    Copy {
        body: Vec<ActionId>,
    },
    LiteralElement {
        name: OutputName,
        namespaces: Vec<(String, String)>,
        body: Vec<ActionId>,
    },
    LiteralAttribute {
        name: OutputName,
        value: Avt,
    },
    Element {
        name: Avt,
        namespace: Option<Avt>,
        scope: Arc<ScopeSnapshot>,
        body: Vec<ActionId>,
    },
    Attribute {
        name: Avt,
        namespace: Option<Avt>,
        scope: Arc<ScopeSnapshot>,
        body: Vec<ActionId>,
    },
    Comment {
        body: Vec<ActionId>,
    },
    ProcessingInstruction {
        name: Avt,
        body: Vec<ActionId>,
    },
    Variable(VariableAction),
    Number(NumberAction),
    Sort(SortSpec),
    UseAttributeSets {
        names: Vec<String>,
        sets: Vec<ActionId>,
    },
    AttributeSet {
        name: String,
        body: Vec<ActionId>,
        slots: usize,
    },
    Message {
        terminate: bool,
        body: Vec<ActionId>,
    },
    /// An instruction this processor does not implement, compiled in
    /// forwards-compatible mode.
    Unsupported {
        name: String,
        fallback: Vec<ActionId>,
    },
}

impl Action {
    /// Number of local variable slots a frame running this action must own.
    pub fn owned_slots(&self) -> Option<usize> {
        match self {
            Action::Template(t) => Some(t.slots),
            Action::AttributeSet { slots, .. } => Some(*slots),
            Action::Variable(v) if v.kind.is_global() => Some(v.slots),
            _ => None,
        }
    }
}

/// A `xsl:key` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDefinition {
    pub pattern: QueryId,
    pub use_expr: QueryId,
}

/// One template rule registered for a mode.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateEntry {
    pub pattern: QueryId,
    pub priority: f64,
    pub declaration: usize,
    pub template: ActionId,
}

/// The rules of one mode in one module, ordered by ascending
/// `(priority, declaration)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateManager {
    entries: Vec<TemplateEntry>,
}

impl TemplateManager {
    pub fn add(&mut self, entry: TemplateEntry) {
        self.entries.push(entry);
    }

    pub fn sort(&mut self) {
        self.entries.sort_by(|a, b| {
            a.priority
                .total_cmp(&b.priority)
                .then(a.declaration.cmp(&b.declaration))
        });
    }

    /// Highest priority first, later declarations first among equals.
    pub fn candidates(&self) -> impl Iterator<Item = &TemplateEntry> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One imported stylesheet module. Included modules are merged into the module
/// that includes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StylesheetModule {
    pub uri: String,
    /// Imported modules in declaration order.
    pub imports: Vec<usize>,
    pub managers: HashMap<ModeId, TemplateManager>,
    pub precedence: usize,
}

/// Name tests of `xsl:strip-space` and `xsl:preserve-space`.
#[derive(Debug, Clone, PartialEq)]
pub enum WhitespaceTest {
    Any,
    Namespace(String),
    Name { namespace: String, local: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhitespaceRule {
    pub test: WhitespaceTest,
    pub strip: bool,
    pub precedence: usize,
}

impl WhitespaceRule {
    fn priority(&self) -> f64 {
        match self.test {
            WhitespaceTest::Any => -0.5,
            WhitespaceTest::Namespace(_) => -0.25,
            WhitespaceTest::Name { .. } => 0.0,
        }
    }

    fn matches(&self, namespace: &str, local: &str) -> bool {
        match &self.test {
            WhitespaceTest::Any => true,
            WhitespaceTest::Namespace(ns) => ns == namespace,
            WhitespaceTest::Name { namespace: ns, local: l } => ns == namespace && l == local,
        }
    }
}

/// Strip/preserve rules, ordered so that the best match comes first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhitespaceRules {
    rules: Vec<WhitespaceRule>,
}

impl WhitespaceRules {
    pub fn new(mut rules: Vec<WhitespaceRule>) -> Self {
        rules.sort_by(|a, b| {
            b.precedence
                .cmp(&a.precedence)
                .then(b.priority().total_cmp(&a.priority()))
        });
        WhitespaceRules { rules }
    }

    /// Whether whitespace-only text children of this element are removed.
    pub fn should_strip(&self, namespace: &str, local: &str) -> bool {
        self.rules
            .iter()
            .find(|r| r.matches(namespace, local))
            .is_some_and(|r| r.strip)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The output of the compiler: immutable and shareable.
#[derive(Debug, Clone)]
pub struct CompiledStylesheet {
    pub actions: Vec<Action>,
    pub queries: QueryStore,
    /// Module 0 is the principal stylesheet.
    pub modules: Vec<StylesheetModule>,
    pub modes: HashMap<String, ModeId>,
    pub named_templates: HashMap<String, ActionId>,
    /// Global variable and parameter actions in declaration order.
    pub globals: Vec<ActionId>,
    pub global_names: HashMap<String, usize>,
    pub attribute_sets: HashMap<String, Vec<ActionId>>,
    pub keys: HashMap<String, Vec<KeyDefinition>>,
    pub decimal_formats: HashMap<String, DecimalFormat>,
    pub output: OutputSettings,
    pub whitespace: WhitespaceRules,
    pub root: ActionId,
    /// Built-in rule for elements and the root: apply templates to children.
    pub builtin_apply: ActionId,
    /// Built-in rule for text and attributes: copy the string value.
    pub builtin_text: ActionId,
}

impl CompiledStylesheet {
    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id]
    }

    pub fn mode(&self, name: &str) -> Option<ModeId> {
        if name.is_empty() {
            return Some(DEFAULT_MODE);
        }
        self.modes.get(name).copied()
    }

    pub fn mode_count(&self) -> usize {
        self.modes.len() + 1
    }

    pub fn template(&self, id: ActionId) -> Option<&TemplateAction> {
        match self.actions.get(id) {
            Some(Action::Template(t)) => Some(t),
            _ => None,
        }
    }
}
