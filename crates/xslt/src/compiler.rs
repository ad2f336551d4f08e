//! The stylesheet compiler.
//!
//! [`parse_stylesheet_content`] feeds quick-xml events into a [`CompilerBuilder`],
//! which keeps a state stack and an instruction-body stack per open element
//! and turns every closed element into an [`Action`] in a shared arena.
//! Imports and includes are compiled on the spot by suspending the current
//! file, so the held-open file stack doubles as the cycle detector.

use crate::ast::{
    Action, ActionId, CompiledStylesheet, KeyDefinition, ModeId, StylesheetModule, TemplateEntry,
    DEFAULT_MODE,
};
use crate::decimal_format::DecimalFormat;
use crate::error::{Location, XsltError};
use crate::output::OutputSettings;
use crate::parser::parse_stylesheet_content;
use crate::query_store::{
    CompiledQuery, LocalBinding, Query, QueryEntry, QueryId, QueryOptions, QueryStore, ScopeSnapshot,
    compile_query,
};
use crate::resolver::{MAX_IMPORT_DEPTH, StylesheetResolver};
use crate::util::{
    OwnedAttributes, XSLT_NAMESPACE, expanded_name, get_attr_optional, is_qname, is_whitespace_only,
    location_of, split_qname,
};
use crate::ast::{OutputName, WhitespaceTest};
use quick_xml::events::{BytesEnd, BytesStart};
use std::collections::{HashMap, HashSet};
use std::str::from_utf8;
use std::sync::Arc;
use trellis_xpath1::XML_NAMESPACE;

/// Receives the events of one stylesheet file.
pub trait StylesheetBuilder {
    fn start_element(
        &mut self,
        e: &BytesStart,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError>;

    fn empty_element(
        &mut self,
        e: &BytesStart,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        self.start_element(e, attrs, pos, source)?;
        self.end_element(&e.to_end(), pos, source)
    }

    fn end_element(&mut self, e: &BytesEnd, pos: usize, source: &str) -> Result<(), XsltError>;

    fn text(&mut self, text: String) -> Result<(), XsltError>;
}

#[derive(Debug, Clone)]
pub(crate) enum BuilderState {
    Stylesheet,
    /// A subtree that compiles to nothing: top-level data elements, fallback
    /// of a supported instruction, unknown declarations in forwards-compatible mode.
    Ignored,
    Xsl {
        name: String,
        attrs: OwnedAttributes,
        pos: usize,
    },
    Literal {
        name: OutputName,
        namespaces: Vec<(String, String)>,
    },
    Unsupported {
        name: String,
    },
    /// The `match="/"` template wrapped around a simplified stylesheet.
    Implicit {
        pos: usize,
    },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeFrame {
    /// Prefix to URI, `""` for the default namespace.
    pub namespaces: HashMap<String, String>,
    pub forwards_compatible: bool,
    pub excluded: HashSet<String>,
    pub extensions: HashSet<String>,
    pub preserve_space: bool,
    pub locals_len: usize,
}

/// Where an owner of variable slots (template, global, attribute set) started.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotOwner {
    pub next_slot: usize,
    pub locals_start: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FileState {
    pub uri: String,
    pub module: usize,
    pub state_stack: Vec<BuilderState>,
    pub instruction_stack: Vec<Vec<ActionId>>,
    pub branches: Vec<Vec<crate::ast::Branch>>,
    pub locals: Vec<LocalBinding>,
    pub owners: Vec<SlotOwner>,
    pub pending_text: String,
    pub root_seen: bool,
    pub scope: ScopeFrame,
    pub scope_stack: Vec<ScopeFrame>,
    snapshot: Option<Arc<ScopeSnapshot>>,
}

impl FileState {
    fn new(uri: &str, module: usize) -> Self {
        FileState {
            uri: uri.to_string(),
            module,
            ..Default::default()
        }
    }
}

/// Declarations collected from all modules, resolved by import precedence
/// once every module is compiled. The `usize` is the declaring module.
#[derive(Debug, Default)]
pub(crate) struct Declarations {
    pub named_templates: Vec<(String, ActionId, usize)>,
    pub globals: Vec<(String, ActionId, usize)>,
    pub attribute_sets: Vec<(String, ActionId, usize)>,
    pub keys: Vec<(String, KeyDefinition)>,
    pub decimal_formats: Vec<(String, DecimalFormat, usize, Location)>,
    /// Stylesheet namespace URI, result prefix, result namespace URI.
    pub aliases: Vec<(String, String, String, usize)>,
    pub outputs: Vec<(OutputSettings, usize)>,
    pub whitespace: Vec<(WhitespaceTest, bool, usize)>,
    /// Start tags of declarations and of `use-attribute-sets` owners.
    pub locations: HashMap<ActionId, Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModuleKind {
    Principal,
    Import,
    Include,
}

pub struct CompilerBuilder<'r> {
    resolver: &'r dyn StylesheetResolver,
    pub(crate) actions: Vec<Action>,
    pub(crate) queries: QueryStore,
    pub(crate) modules: Vec<StylesheetModule>,
    pub(crate) modes: HashMap<String, ModeId>,
    pub(crate) decls: Declarations,
    pub(crate) current: FileState,
    suspended: Vec<FileState>,
    next_declaration: usize,
    next_precedence: usize,
}

/// Compiles a stylesheet and everything it imports or includes.
pub fn compile(
    source: &str,
    uri: &str,
    resolver: &dyn StylesheetResolver,
) -> Result<CompiledStylesheet, XsltError> {
    let mut builder = CompilerBuilder::new(resolver);
    builder.compile_file(source, uri, ModuleKind::Principal)?;
    builder.finalize()
}

impl<'r> CompilerBuilder<'r> {
    pub fn new(resolver: &'r dyn StylesheetResolver) -> Self {
        CompilerBuilder {
            resolver,
            actions: Vec::new(),
            queries: QueryStore::new(),
            modules: Vec::new(),
            modes: HashMap::new(),
            decls: Declarations::default(),
            current: FileState::default(),
            suspended: Vec::new(),
            next_declaration: 0,
            next_precedence: 0,
        }
    }

    pub(crate) fn compile_file(&mut self, source: &str, uri: &str, kind: ModuleKind) -> Result<(), XsltError> {
        let module = match kind {
            ModuleKind::Include => self.current.module,
            ModuleKind::Principal | ModuleKind::Import => {
                self.modules.push(StylesheetModule {
                    uri: uri.to_string(),
                    ..Default::default()
                });
                self.modules.len() - 1
            }
        };
        if kind == ModuleKind::Import {
            let parent = self.current.module;
            if let Some(m) = self.modules.get_mut(parent) {
                m.imports.push(module);
            }
        }
        log::debug!("Compiling {:?} module '{}' as module {}", kind, uri, module);

        let outer = std::mem::replace(&mut self.current, FileState::new(uri, module));
        if kind != ModuleKind::Principal {
            self.suspended.push(outer);
        }
        let result = parse_stylesheet_content(source, uri, self);
        let finished = match kind {
            ModuleKind::Principal => std::mem::take(&mut self.current),
            _ => {
                let restored = self.suspended.pop().unwrap_or_default();
                std::mem::replace(&mut self.current, restored)
            }
        };
        result?;

        if !finished.root_seen {
            return Err(XsltError::compile(
                "Stylesheet has no document element",
                Location::new(uri, 1, 1),
            ));
        }
        if !finished.state_stack.is_empty() {
            return Err(XsltError::compile("Unexpected end of stylesheet", Location::new(uri, 0, 0)));
        }

        if kind != ModuleKind::Include {
            self.modules[module].precedence = self.next_precedence;
            self.next_precedence += 1;
        }
        Ok(())
    }

    /// Loads and compiles an `xsl:import` or `xsl:include` target.
    pub(crate) fn load_module(&mut self, href: &str, kind: ModuleKind, pos: usize, source: &str) -> Result<(), XsltError> {
        if self.suspended.len() >= MAX_IMPORT_DEPTH {
            return Err(XsltError::import(
                href,
                format!("Maximum import depth ({}) exceeded", MAX_IMPORT_DEPTH),
            ));
        }
        let loaded = self.resolver.load(href, Some(&self.current.uri))?;
        let held_open = loaded.uri == self.current.uri || self.suspended.iter().any(|f| f.uri == loaded.uri);
        if held_open {
            log::debug!("Cycle through '{}' at {}", loaded.uri, self.location(pos, source));
            return Err(XsltError::circular_import(&loaded.uri));
        }
        self.compile_file(&loaded.source, &loaded.uri, kind)
    }

    // --- Shared helpers used by the handlers ---

    pub(crate) fn location(&self, pos: usize, source: &str) -> Location {
        location_of(&self.current.uri, source, pos)
    }

    pub(crate) fn compile_error(&self, message: impl Into<String>, pos: usize, source: &str) -> XsltError {
        XsltError::compile(message, self.location(pos, source))
    }

    pub(crate) fn forwards_compatible(&self) -> bool {
        self.current.scope.forwards_compatible
    }

    pub(crate) fn add_action(&mut self, action: Action) -> ActionId {
        self.actions.push(action);
        self.actions.len() - 1
    }

    pub(crate) fn next_declaration(&mut self) -> usize {
        self.next_declaration += 1;
        self.next_declaration
    }

    pub(crate) fn intern_mode(&mut self, expanded: &str) -> ModeId {
        let next = self.modes.len() + 1;
        *self.modes.entry(expanded.to_string()).or_insert(next)
    }

    pub(crate) fn enter(&mut self, state: BuilderState, body: Vec<ActionId>) {
        self.current.state_stack.push(state);
        self.current.instruction_stack.push(body);
    }

    pub(crate) fn parent_state(&self) -> Option<&BuilderState> {
        self.current.state_stack.last()
    }

    pub(crate) fn parent_is_xsl(&self, names: &[&str]) -> bool {
        matches!(self.parent_state(), Some(BuilderState::Xsl { name, .. }) if names.contains(&name.as_str()))
    }

    pub(crate) fn snapshot(&mut self) -> Arc<ScopeSnapshot> {
        if let Some(snapshot) = &self.current.snapshot {
            return Arc::clone(snapshot);
        }
        let scope = &self.current.scope;
        let snapshot = Arc::new(ScopeSnapshot {
            namespaces: scope
                .namespaces
                .iter()
                .filter(|(p, _)| !p.is_empty())
                .map(|(p, u)| (p.clone(), u.clone()))
                .collect(),
            default_namespace: scope.namespaces.get("").cloned().unwrap_or_default(),
            locals: self.current.locals.clone(),
            forwards_compatible: scope.forwards_compatible,
        });
        self.current.snapshot = Some(Arc::clone(&snapshot));
        snapshot
    }

    fn push_scope(&mut self, attrs: &OwnedAttributes) -> Result<(), XsltError> {
        let mut frame = self.current.scope.clone();
        frame.locals_len = self.current.locals.len();
        for (key, value) in attrs {
            let key = from_utf8(key)?;
            let value = from_utf8(value)?;
            if key == "xmlns" {
                frame.namespaces.insert(String::new(), value.to_string());
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                frame.namespaces.insert(prefix.to_string(), value.to_string());
            } else if key == "xml:space" {
                frame.preserve_space = value == "preserve";
            }
        }
        let outer = std::mem::replace(&mut self.current.scope, frame);
        self.current.scope_stack.push(outer);
        self.current.snapshot = None;
        Ok(())
    }

    fn pop_scope(&mut self) {
        let locals_len = self.current.scope.locals_len;
        if let Some(outer) = self.current.scope_stack.pop() {
            self.current.scope = outer;
        }
        self.current.locals.truncate(locals_len);
        self.current.snapshot = None;
    }

    pub(crate) fn push_owner(&mut self) {
        self.current.owners.push(SlotOwner {
            next_slot: 0,
            locals_start: self.current.locals.len(),
        });
    }

    /// Closes the innermost slot owner and returns how many slots it needs.
    pub(crate) fn pop_owner(&mut self) -> usize {
        self.current.owners.pop().map_or(0, |o| o.next_slot)
    }

    pub(crate) fn alloc_slot(&mut self) -> usize {
        match self.current.owners.last_mut() {
            Some(owner) => {
                owner.next_slot += 1;
                owner.next_slot - 1
            }
            None => 0,
        }
    }

    /// Makes a local variable visible to the following siblings of its
    /// declaration. Shadowing another local of the same owner is an error.
    fn bind_local(&mut self, name: &str, slot: usize, pos: usize, source: &str) -> Result<(), XsltError> {
        let start = self.current.owners.last().map_or(0, |o| o.locals_start);
        let start = start.min(self.current.locals.len());
        if self.current.locals[start..].iter().any(|b| b.name == name) {
            return Err(self.compile_error(
                format!("Variable '{}' is already declared in this template", name),
                pos,
                source,
            ));
        }
        self.current.locals.push(LocalBinding {
            name: name.to_string(),
            slot,
        });
        self.current.snapshot = None;
        Ok(())
    }

    pub(crate) fn compile_expr(
        &mut self,
        text: &str,
        options: QueryOptions,
        pos: usize,
        source: &str,
    ) -> Result<QueryId, XsltError> {
        let location = self.location(pos, source);
        let entry = match compile_query(text, options) {
            Ok(query) => QueryEntry::Ready(query),
            Err(e) if self.forwards_compatible() => {
                log::warn!("Deferring invalid expression '{}' at {}: {}", text, location, e);
                QueryEntry::Deferred(e)
            }
            Err(e) => {
                return Err(XsltError::compile(
                    format!("Invalid expression '{}': {}", text, e),
                    location,
                ));
            }
        };
        let scope = self.snapshot();
        Ok(self.queries.add(CompiledQuery {
            source: text.to_string(),
            entry,
            scope,
            location,
        }))
    }

    pub(crate) fn compile_avt(&mut self, text: &str, pos: usize, source: &str) -> Result<crate::ast::Avt, XsltError> {
        let result = crate::ast::Avt::parse(text, |expr| {
            self.compile_expr(expr, QueryOptions::EXPRESSION, pos, source)
        });
        result.map_err(|e| match e {
            XsltError::Compile { message, location } if location == Location::default() => {
                self.compile_error(message, pos, source)
            }
            other => other,
        })
    }

    /// Resolves a prefix of a name written in the stylesheet.
    pub(crate) fn namespace_for(&self, prefix: &str, pos: usize, source: &str) -> Result<String, XsltError> {
        if prefix == "xml" {
            return Ok(XML_NAMESPACE.to_string());
        }
        match self.current.scope.namespaces.get(prefix) {
            Some(uri) => Ok(uri.clone()),
            None if prefix.is_empty() => Ok(String::new()),
            None => Err(self.compile_error(format!("Undeclared namespace prefix '{}'", prefix), pos, source)),
        }
    }

    /// Expands a QName-valued attribute (template, mode, variable, key names)
    /// to `{uri}local`. Unprefixed names stay in no namespace.
    pub(crate) fn expand(&self, qname: &str, pos: usize, source: &str) -> Result<String, XsltError> {
        let qname = qname.trim();
        if !is_qname(qname) {
            return Err(self.compile_error(format!("'{}' is not a valid QName", qname), pos, source));
        }
        let (prefix, local) = split_qname(qname);
        if prefix.is_empty() {
            return Ok(local.to_string());
        }
        let uri = self.namespace_for(prefix, pos, source)?;
        Ok(expanded_name(&uri, local))
    }

    pub(crate) fn required(
        &self,
        attrs: &OwnedAttributes,
        name: &str,
        element: &str,
        pos: usize,
        source: &str,
    ) -> Result<String, XsltError> {
        get_attr_optional(attrs, name.as_bytes())?.ok_or_else(|| {
            self.compile_error(
                format!("<xsl:{}> requires the '{}' attribute", element, name),
                pos,
                source,
            )
        })
    }

    /// An attribute restricted to a fixed set of values. Outside the set it
    /// is an error, or ignored in forwards-compatible mode.
    pub(crate) fn enumerated(
        &self,
        attrs: &OwnedAttributes,
        name: &str,
        allowed: &[&str],
        pos: usize,
        source: &str,
    ) -> Result<Option<String>, XsltError> {
        match get_attr_optional(attrs, name.as_bytes())? {
            Some(value) if allowed.contains(&value.trim()) => Ok(Some(value.trim().to_string())),
            Some(value) if self.forwards_compatible() => {
                log::warn!(
                    "Ignoring invalid value '{}' for '{}' at {}",
                    value,
                    name,
                    self.location(pos, source)
                );
                Ok(None)
            }
            Some(value) => Err(self.compile_error(
                format!("Invalid value '{}' for attribute '{}'", value, name),
                pos,
                source,
            )),
            None => Ok(None),
        }
    }

    pub(crate) fn yes_no(
        &self,
        attrs: &OwnedAttributes,
        name: &str,
        pos: usize,
        source: &str,
    ) -> Result<Option<bool>, XsltError> {
        Ok(self
            .enumerated(attrs, name, &["yes", "no"], pos, source)?
            .map(|v| v == "yes"))
    }

    /// Reads an attribute in the XSLT namespace from a literal result element.
    pub(crate) fn xsl_attr(&self, attrs: &OwnedAttributes, local: &str) -> Result<Option<String>, XsltError> {
        for (key, value) in attrs {
            let key = from_utf8(key)?;
            let (prefix, name) = split_qname(key);
            if name == local
                && !prefix.is_empty()
                && prefix != "xmlns"
                && self.current.scope.namespaces.get(prefix).map(String::as_str) == Some(XSLT_NAMESPACE)
            {
                return Ok(Some(from_utf8(value)?.to_string()));
            }
        }
        Ok(None)
    }

    /// Applies `[xsl:]exclude-result-prefixes` and `[xsl:]extension-element-prefixes`.
    pub(crate) fn apply_prefix_lists(
        &mut self,
        excluded: Option<String>,
        extensions: Option<String>,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        for (list, is_extension) in [(excluded, false), (extensions, true)] {
            let Some(list) = list else { continue };
            for prefix in list.split_whitespace() {
                let prefix = if prefix == "#default" { "" } else { prefix };
                let uri = match self.current.scope.namespaces.get(prefix) {
                    Some(uri) => uri.clone(),
                    None if self.forwards_compatible() => continue,
                    None => {
                        return Err(self.compile_error(
                            format!("Undeclared namespace prefix '{}' in prefix list", prefix),
                            pos,
                            source,
                        ));
                    }
                };
                if is_extension {
                    self.current.scope.extensions.insert(uri.clone());
                }
                self.current.scope.excluded.insert(uri);
            }
        }
        self.current.snapshot = None;
        Ok(())
    }

    /// Sets forwards-compatible processing from a `version` value.
    pub(crate) fn apply_version(&mut self, version: &str) {
        let newer = version.trim().parse::<f64>().map_or(true, |v| v > 1.0);
        self.current.scope.forwards_compatible = newer;
        self.current.snapshot = None;
    }

    /// Namespace nodes a literal result element copies to the output.
    pub(crate) fn literal_namespaces(&self) -> Vec<(String, String)> {
        let scope = &self.current.scope;
        let mut namespaces: Vec<(String, String)> = scope
            .namespaces
            .iter()
            .filter(|(p, u)| {
                u.as_str() != XSLT_NAMESPACE
                    && !scope.excluded.contains(u.as_str())
                    && !(p.is_empty() && u.is_empty())
                    && p.as_str() != "xml"
            })
            .map(|(p, u)| (p.clone(), u.clone()))
            .collect();
        namespaces.sort();
        namespaces
    }

    fn flush_text(&mut self) -> Result<(), XsltError> {
        if self.current.pending_text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.current.pending_text);
        let whitespace = is_whitespace_only(&text);
        let keep = match self.current.state_stack.last() {
            Some(BuilderState::Xsl { name, .. }) if name == "text" => true,
            None | Some(BuilderState::Stylesheet) => {
                if !whitespace {
                    return Err(XsltError::compile(
                        format!("Text '{}' is not allowed at the top level", text.trim()),
                        Location::new(&self.current.uri, 0, 0),
                    ));
                }
                false
            }
            Some(BuilderState::Ignored) | Some(BuilderState::Unsupported { .. }) => false,
            Some(_) => !whitespace || self.current.scope.preserve_space,
        };
        if keep {
            let id = self.add_action(Action::Text {
                value: text,
                disable_escaping: false,
            });
            self.push_to_parent(id);
        }
        Ok(())
    }

    pub(crate) fn push_to_parent(&mut self, id: ActionId) {
        if let Some(body) = self.current.instruction_stack.last_mut() {
            body.push(id);
        }
    }

    fn dispatch_start(
        &mut self,
        uri: &str,
        local: &str,
        raw_name: &str,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        let is_xslt = uri == XSLT_NAMESPACE;
        match self.parent_state() {
            None if is_xslt && (local == "stylesheet" || local == "transform") => {
                self.handle_stylesheet_start(&attrs, pos, source)
            }
            None => self.handle_simplified_start(uri, local, raw_name, attrs, pos, source),
            Some(BuilderState::Ignored) => {
                self.enter(BuilderState::Ignored, Vec::new());
                Ok(())
            }
            Some(BuilderState::Unsupported { .. }) => {
                if is_xslt && local == "fallback" {
                    self.enter(
                        BuilderState::Xsl {
                            name: local.to_string(),
                            attrs,
                            pos,
                        },
                        Vec::new(),
                    );
                } else {
                    self.enter(BuilderState::Ignored, Vec::new());
                }
                Ok(())
            }
            Some(BuilderState::Stylesheet) if is_xslt => self.handle_declaration_start(local, attrs, pos, source),
            Some(BuilderState::Stylesheet) => {
                if uri.is_empty() && !self.forwards_compatible() {
                    return Err(self.compile_error(
                        format!("Top-level element '{}' must be in a namespace", raw_name),
                        pos,
                        source,
                    ));
                }
                self.enter(BuilderState::Ignored, Vec::new());
                Ok(())
            }
            Some(_) if is_xslt => self.handle_instruction_start(local, attrs, pos, source),
            Some(_) if self.current.scope.extensions.contains(uri) => {
                log::debug!("Extension element '{}' compiled as unsupported", raw_name);
                self.enter(
                    BuilderState::Unsupported {
                        name: raw_name.to_string(),
                    },
                    Vec::new(),
                );
                Ok(())
            }
            Some(_) => self.handle_literal_result_element_start(uri, local, raw_name, &attrs, pos, source),
        }
    }

    fn build_end(&mut self, state: BuilderState, body: Vec<ActionId>, source: &str) -> Result<Option<ActionId>, XsltError> {
        match state {
            BuilderState::Stylesheet | BuilderState::Ignored | BuilderState::Implicit { .. } => Ok(None),
            BuilderState::Literal { name, namespaces } => Ok(Some(self.add_action(Action::LiteralElement {
                name,
                namespaces,
                body,
            }))),
            BuilderState::Unsupported { name } => Ok(Some(self.add_action(Action::Unsupported {
                name,
                fallback: body,
            }))),
            BuilderState::Xsl { name, attrs, pos } => self.handle_xsl_end(&name, attrs, body, pos, source),
        }
    }

    /// Finishes a compilation: resolves declarations across modules by import
    /// precedence and links the action graph.
    pub fn finalize(mut self) -> Result<CompiledStylesheet, XsltError> {
        let precedence: Vec<usize> = self.modules.iter().map(|m| m.precedence).collect();
        let locations = std::mem::take(&mut self.decls.locations);
        let declared_at = |id: ActionId| locations.get(&id).cloned().unwrap_or_default();

        for action in self.actions.iter_mut() {
            if let Action::Template(t) = action {
                t.precedence = precedence[t.module];
            }
        }

        let named_templates = pick_by_precedence(
            std::mem::take(&mut self.decls.named_templates),
            &precedence,
            |name, id| XsltError::compile(format!("Duplicate named template '{}'", name), declared_at(id)),
        )?;

        let global_winners = pick_by_precedence(
            std::mem::take(&mut self.decls.globals),
            &precedence,
            |name, id| XsltError::compile(format!("Duplicate global variable '{}'", name), declared_at(id)),
        )?;
        let mut globals: Vec<(String, ActionId)> = global_winners.into_iter().collect();
        globals.sort_by_key(|(_, id)| *id);
        let global_names: HashMap<String, usize> = globals
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        let globals: Vec<ActionId> = globals.into_iter().map(|(_, id)| id).collect();

        let attribute_sets = self.resolve_attribute_sets(&precedence, &locations)?;

        let mut keys: HashMap<String, Vec<KeyDefinition>> = HashMap::new();
        for (name, key) in std::mem::take(&mut self.decls.keys) {
            keys.entry(name).or_default().push(key);
        }

        let mut decimal_formats: HashMap<String, (usize, DecimalFormat)> = HashMap::new();
        for (name, format, module, location) in std::mem::take(&mut self.decls.decimal_formats) {
            let p = precedence[module];
            match decimal_formats.get(&name) {
                Some((existing, _)) if *existing > p => {}
                Some((existing, current)) if *existing == p && *current != format => {
                    return Err(XsltError::compile(
                        format!("Conflicting decimal-format declarations for '{}'", name),
                        location,
                    ));
                }
                _ => {
                    decimal_formats.insert(name, (p, format));
                }
            }
        }
        let mut decimal_formats: HashMap<String, DecimalFormat> =
            decimal_formats.into_iter().map(|(k, (_, v))| (k, v)).collect();
        decimal_formats.entry(String::new()).or_default();

        self.apply_namespace_aliases(&precedence);

        let mut outputs = std::mem::take(&mut self.decls.outputs);
        outputs.sort_by_key(|(_, module)| precedence[*module]);
        let mut output = OutputSettings::default();
        for (settings, _) in &outputs {
            output.merge(settings);
        }

        let whitespace = crate::ast::WhitespaceRules::new(
            std::mem::take(&mut self.decls.whitespace)
                .into_iter()
                .map(|(test, strip, module)| crate::ast::WhitespaceRule {
                    test,
                    strip,
                    precedence: precedence[module],
                })
                .collect(),
        );

        for module in self.modules.iter_mut() {
            for manager in module.managers.values_mut() {
                manager.sort();
            }
        }

        self.check_variable_references(&global_names)?;

        for action in self.actions.iter_mut() {
            if let Action::CallTemplate { name, target, .. } = action {
                *target = named_templates.get(name.as_str()).copied();
            }
        }

        let root = self.add_action(Action::Root);
        let builtin_apply = self.add_action(Action::ApplyTemplates {
            select: None,
            mode: None,
            sorts: Vec::new(),
            params: Vec::new(),
        });
        let self_query = compile_query(".", QueryOptions::EXPRESSION)?;
        let select = self.queries.add(CompiledQuery {
            source: ".".to_string(),
            entry: QueryEntry::Ready(self_query),
            scope: Arc::new(ScopeSnapshot::default()),
            location: Location::default(),
        });
        let builtin_text = self.add_action(Action::ValueOf {
            select,
            disable_escaping: false,
        });

        log::debug!(
            "Compiled {} actions, {} queries, {} modules",
            self.actions.len(),
            self.queries.len(),
            self.modules.len()
        );

        Ok(CompiledStylesheet {
            actions: self.actions,
            queries: self.queries,
            modules: self.modules,
            modes: self.modes,
            named_templates,
            globals,
            global_names,
            attribute_sets,
            keys,
            decimal_formats,
            output,
            whitespace,
            root,
            builtin_apply,
            builtin_text,
        })
    }

    /// Orders attribute-set declarations by precedence, links every
    /// `use-attribute-sets` and rejects cycles and dangling references.
    fn resolve_attribute_sets(
        &mut self,
        precedence: &[usize],
        locations: &HashMap<ActionId, Location>,
    ) -> Result<HashMap<String, Vec<ActionId>>, XsltError> {
        let declared_at = |id: &ActionId| locations.get(id).cloned().unwrap_or_default();
        let mut declared = std::mem::take(&mut self.decls.attribute_sets);
        declared.sort_by_key(|(_, id, module)| (precedence[*module], *id));
        let mut sets: HashMap<String, Vec<ActionId>> = HashMap::new();
        for (name, id, _) in &declared {
            sets.entry(name.clone()).or_default().push(*id);
        }

        let mut uses: HashMap<String, Vec<String>> = HashMap::new();
        for (name, id, _) in &declared {
            if let Action::AttributeSet { body, .. } = &self.actions[*id] {
                for child in body {
                    if let Action::UseAttributeSets { names, .. } = &self.actions[*child] {
                        uses.entry(name.clone()).or_default().extend(names.iter().cloned());
                    }
                }
            }
        }

        for (id, action) in self.actions.iter_mut().enumerate() {
            if let Action::UseAttributeSets { names, sets: linked } = action {
                linked.clear();
                for name in names.iter() {
                    let Some(ids) = sets.get(name) else {
                        return Err(XsltError::compile(
                            format!("Attribute set '{}' is not declared", name),
                            declared_at(&id),
                        ));
                    };
                    linked.extend(ids.iter().copied());
                }
            }
        }

        // Visited-set walk over the use graph.
        let mut done: HashSet<&str> = HashSet::new();
        for start in uses.keys() {
            let mut path: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            let mut on_path: HashSet<&str> = HashSet::from([start.as_str()]);
            while let Some((name, next)) = path.last().copied() {
                let targets = uses.get(name).map(Vec::as_slice).unwrap_or(&[]);
                match targets.get(next) {
                    Some(target) => {
                        if let Some(top) = path.last_mut() {
                            top.1 += 1;
                        }
                        if on_path.contains(target.as_str()) {
                            return Err(XsltError::compile(
                                format!("Attribute set '{}' uses itself", target),
                                sets.get(target.as_str())
                                    .and_then(|ids| ids.first())
                                    .map(declared_at)
                                    .unwrap_or_default(),
                            ));
                        }
                        if !done.contains(target.as_str()) {
                            on_path.insert(target.as_str());
                            path.push((target.as_str(), 0));
                        }
                    }
                    None => {
                        path.pop();
                        on_path.remove(name);
                        done.insert(name);
                    }
                }
            }
        }
        Ok(sets)
    }

    fn apply_namespace_aliases(&mut self, precedence: &[usize]) {
        let mut aliases: HashMap<String, (usize, String, String)> = HashMap::new();
        for (from, prefix, to, module) in std::mem::take(&mut self.decls.aliases) {
            let p = precedence[module];
            if aliases.get(&from).is_none_or(|(existing, _, _)| *existing <= p) {
                aliases.insert(from, (p, prefix, to));
            }
        }
        if aliases.is_empty() {
            return;
        }
        let rename = |name: &mut OutputName| {
            if let Some((_, prefix, uri)) = aliases.get(&name.namespace) {
                name.namespace = uri.clone();
                name.prefix = prefix.clone();
            }
        };
        for action in self.actions.iter_mut() {
            match action {
                Action::LiteralElement { name, namespaces, .. } => {
                    rename(name);
                    for (prefix, uri) in namespaces.iter_mut() {
                        if let Some((_, to_prefix, to_uri)) = aliases.get(uri.as_str()) {
                            *prefix = to_prefix.clone();
                            *uri = to_uri.clone();
                        }
                    }
                    namespaces.sort();
                    namespaces.dedup_by(|a, b| a.0 == b.0);
                }
                Action::LiteralAttribute { name, .. } if !name.namespace.is_empty() => rename(name),
                _ => {}
            }
        }
    }

    /// Every `$name` must be a visible local or a global.
    fn check_variable_references(&self, global_names: &HashMap<String, usize>) -> Result<(), XsltError> {
        for (_, compiled) in self.queries.iter() {
            let Ok(query) = compiled.query() else { continue };
            let mut failure: Option<String> = None;
            query.for_each_variable(&mut |name| {
                if failure.is_some() {
                    return;
                }
                match compiled.scope.expand(name) {
                    Ok(expanded) => {
                        if compiled.scope.local_slot(&expanded).is_none() && !global_names.contains_key(&expanded) {
                            failure = Some(format!("Variable '${}' is not declared", name));
                        }
                    }
                    Err(e) => failure = Some(e.to_string()),
                }
            });
            if let Some(message) = failure {
                return Err(XsltError::compile(message, compiled.location.clone()));
            }
        }
        Ok(())
    }

    /// Registers a template rule with the manager of its module and mode,
    /// one entry per alternative of a union pattern.
    pub(crate) fn register_rule(
        &mut self,
        template: ActionId,
        pattern: QueryId,
        mode: ModeId,
        priority: Option<f64>,
        declaration: usize,
    ) {
        let compiled = self.queries.get(pattern).clone();
        let alternatives = match &compiled.entry {
            QueryEntry::Ready(Query::Pattern(p)) if p.alternative_count() > 1 => p.clone().split(),
            QueryEntry::Ready(Query::Pattern(p)) => vec![p.clone()],
            _ => Vec::new(),
        };

        let mut entries = Vec::new();
        if alternatives.is_empty() {
            entries.push(TemplateEntry {
                pattern,
                priority: priority.unwrap_or(0.5),
                declaration,
                template,
            });
        } else if alternatives.len() == 1 {
            entries.push(TemplateEntry {
                pattern,
                priority: priority.unwrap_or_else(|| alternatives[0].default_priority()),
                declaration,
                template,
            });
        } else {
            for alternative in alternatives {
                let default_priority = alternative.default_priority();
                let id = self.queries.add(CompiledQuery {
                    entry: QueryEntry::Ready(Query::Pattern(alternative)),
                    ..compiled.clone()
                });
                entries.push(TemplateEntry {
                    pattern: id,
                    priority: priority.unwrap_or(default_priority),
                    declaration,
                    template,
                });
            }
        }

        let module = self.current.module;
        if let Some(m) = self.modules.get_mut(module) {
            let manager = m.managers.entry(mode).or_default();
            for entry in entries {
                manager.add(entry);
            }
        }
    }

    /// Registers a local variable or parameter once its element has closed.
    fn bind_if_local(&mut self, id: ActionId, pos: usize, source: &str) -> Result<(), XsltError> {
        let binding = match &self.actions[id] {
            Action::Variable(v)
                if matches!(
                    v.kind,
                    crate::ast::VariableKind::LocalVariable | crate::ast::VariableKind::LocalParam
                ) =>
            {
                Some((v.name.clone(), v.slot))
            }
            _ => None,
        };
        if let Some((name, slot)) = binding {
            self.bind_local(&name, slot, pos, source)?;
        }
        Ok(())
    }
}

fn pick_by_precedence<F>(
    entries: Vec<(String, ActionId, usize)>,
    precedence: &[usize],
    duplicate: F,
) -> Result<HashMap<String, ActionId>, XsltError>
where
    F: Fn(&str, usize) -> XsltError,
{
    let mut winners: HashMap<String, (usize, ActionId)> = HashMap::new();
    for (name, id, module) in entries {
        let p = precedence[module];
        match winners.get(&name) {
            Some((existing, _)) if *existing > p => {}
            Some((existing, _)) if *existing == p => return Err(duplicate(&name, id)),
            _ => {
                winners.insert(name, (p, id));
            }
        }
    }
    Ok(winners.into_iter().map(|(k, (_, id))| (k, id)).collect())
}

impl StylesheetBuilder for CompilerBuilder<'_> {
    fn start_element(
        &mut self,
        e: &BytesStart,
        attrs: OwnedAttributes,
        pos: usize,
        source: &str,
    ) -> Result<(), XsltError> {
        self.flush_text()?;
        self.current.root_seen = true;
        let raw_name = from_utf8(e.name().as_ref())?.to_string();
        self.push_scope(&attrs)?;
        let (prefix, local) = split_qname(&raw_name);
        let uri = self.namespace_for(prefix, pos, source)?;
        let local = local.to_string();
        self.dispatch_start(&uri, &local, &raw_name, attrs, pos, source)
    }

    fn end_element(&mut self, _e: &BytesEnd, pos: usize, source: &str) -> Result<(), XsltError> {
        self.flush_text()?;
        let Some(state) = self.current.state_stack.pop() else {
            return Err(self.compile_error("Unbalanced end tag", pos, source));
        };
        let body = self.current.instruction_stack.pop().unwrap_or_default();
        // Attributes of the closing element only see bindings made before it.
        let visible = self.current.scope.locals_len;
        if self.current.locals.len() > visible {
            self.current.locals.truncate(visible);
            self.current.snapshot = None;
        }
        let produced = self.build_end(state, body, source)?;
        self.pop_scope();
        if let Some(id) = produced {
            self.bind_if_local(id, pos, source)?;
            self.push_to_parent(id);
        }
        if let Some(BuilderState::Implicit { pos: start }) = self.current.state_stack.last().cloned() {
            self.handle_simplified_end(start, source)?;
        }
        Ok(())
    }

    fn text(&mut self, text: String) -> Result<(), XsltError> {
        self.current.pending_text.push_str(&text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Avt, VariableKind};
    use crate::resolver::NoResolver;

    fn compile_str(source: &str) -> Result<CompiledStylesheet, XsltError> {
        compile(source, "test.xsl", &NoResolver)
    }

    const HEADER: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">"#;

    fn wrap(body: &str) -> String {
        format!("{}{}</xsl:stylesheet>", HEADER, body)
    }

    #[test]
    fn template_rules_are_registered_per_alternative() {
        let sheet = compile_str(&wrap(r#"<xsl:template match="a|b/c"><x/></xsl:template>"#)).unwrap();
        let manager = &sheet.modules[0].managers[&DEFAULT_MODE];
        assert_eq!(manager.len(), 2);
        let priorities: Vec<f64> = manager.candidates().map(|e| e.priority).collect();
        assert!(priorities.contains(&0.0));
        assert!(priorities.contains(&0.5));
    }

    #[test]
    fn missing_required_attribute_is_reported_with_location() {
        let err = compile_str(&wrap("\n<xsl:template match=\"/\"><xsl:value-of/></xsl:template>")).unwrap_err();
        match err {
            XsltError::Compile { message, location } => {
                assert!(message.contains("select"));
                assert_eq!(location.uri, "test.xsl");
                assert_eq!(location.line, 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn undeclared_variable_is_a_compile_error() {
        let err = compile_str(&wrap(r#"<xsl:template match="/"><xsl:value-of select="$nope"/></xsl:template>"#))
            .unwrap_err();
        assert!(err.to_string().contains("nope"));

        let ok = compile_str(&wrap(
            r#"<xsl:variable name="g" select="1"/>
               <xsl:template match="/"><xsl:variable name="l" select="$g"/><xsl:value-of select="$l"/></xsl:template>"#,
        ));
        assert!(ok.is_ok());
    }

    #[test]
    fn local_variable_is_not_visible_outside_its_parent() {
        let err = compile_str(&wrap(
            r#"<xsl:template match="/"><xsl:if test="1"><xsl:variable name="v" select="1"/></xsl:if><xsl:value-of select="$v"/></xsl:template>"#,
        ))
        .unwrap_err();
        assert!(err.is_compile_error());
    }

    #[test]
    fn shadowing_a_local_is_rejected() {
        let err = compile_str(&wrap(
            r#"<xsl:template match="/"><xsl:variable name="v" select="1"/><xsl:variable name="v" select="2"/></xsl:template>"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("already declared"));
    }

    #[test]
    fn attribute_set_cycles_are_rejected() {
        let err = compile_str(&wrap(
            r#"<xsl:attribute-set name="a" use-attribute-sets="b"/>
               <xsl:attribute-set name="b" use-attribute-sets="a"/>"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("uses itself"));

        let err = compile_str(&wrap(r#"<xsl:attribute-set name="a" use-attribute-sets="missing"/>"#)).unwrap_err();
        assert!(err.to_string().contains("not declared"));
    }

    #[test]
    fn whitespace_text_is_dropped_unless_preserved() {
        let sheet = compile_str(&wrap(
            r#"<xsl:template match="/"> <a> </a><b xml:space="preserve"> </b><xsl:text> </xsl:text></xsl:template>"#,
        ))
        .unwrap();
        let texts: Vec<&str> = sheet
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Text { value, .. } => Some(value.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec![" ", " "]);
    }

    #[test]
    fn literal_result_element_attributes_become_avts() {
        let sheet = compile_str(&wrap(
            r#"<xsl:template match="/"><out xmlns:p="urn:p" p:x="{1+1}" y="plain"/></xsl:template>"#,
        ))
        .unwrap();
        let mut saw_avt = false;
        for action in &sheet.actions {
            if let Action::LiteralAttribute { name, value } = action {
                if name.local == "x" {
                    assert_eq!(name.namespace, "urn:p");
                    assert!(matches!(value, Avt::Parts(_)));
                    saw_avt = true;
                } else {
                    assert_eq!(value, &Avt::Constant("plain".into()));
                }
            }
            if let Action::LiteralElement { namespaces, .. } = action {
                assert_eq!(namespaces, &vec![("p".to_string(), "urn:p".to_string())]);
            }
        }
        assert!(saw_avt);
    }

    #[test]
    fn forwards_compatible_mode_defers_unknown_instructions() {
        let source = r#"<xsl:stylesheet version="2.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:future-declaration/>
            <xsl:template match="/"><xsl:future><xsl:fallback>ok</xsl:fallback></xsl:future></xsl:template>
        </xsl:stylesheet>"#;
        let sheet = compile_str(source).unwrap();
        assert!(sheet.actions.iter().any(|a| matches!(a, Action::Unsupported { fallback, .. } if fallback.len() == 1)));

        let strict = source.replace("version=\"2.0\"", "version=\"1.0\"");
        assert!(compile_str(&strict).is_err());
    }

    #[test]
    fn simplified_stylesheet_becomes_root_template() {
        let sheet = compile_str(
            r#"<html xsl:version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:value-of select="1"/></html>"#,
        )
        .unwrap();
        let manager = &sheet.modules[0].managers[&DEFAULT_MODE];
        assert_eq!(manager.len(), 1);
        assert!(sheet
            .actions
            .iter()
            .any(|a| matches!(a, Action::LiteralElement { name, namespaces, .. } if name.local == "html" && namespaces.is_empty())));
    }

    #[test]
    fn params_are_local_to_templates() {
        let sheet = compile_str(&wrap(
            r#"<xsl:param name="top"/>
               <xsl:template name="t"><xsl:param name="p" select="$top"/><xsl:value-of select="$p"/></xsl:template>"#,
        ))
        .unwrap();
        let kinds: Vec<VariableKind> = sheet
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Variable(v) => Some(v.kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![VariableKind::GlobalParam, VariableKind::LocalParam]);
        assert!(sheet.named_templates.contains_key("t"));
        assert_eq!(sheet.global_names.get("top"), Some(&0));
    }

    #[test]
    fn compiling_twice_is_deterministic() {
        let source = wrap(
            r#"<xsl:template match="a" priority="2"><x xmlns:b="urn:b" xmlns:a="urn:a"/></xsl:template>
               <xsl:template match="b" mode="m"><xsl:apply-templates select="*" mode="m"/></xsl:template>"#,
        );
        let first = compile_str(&source).unwrap();
        let second = compile_str(&source).unwrap();
        assert_eq!(first.actions, second.actions);
        assert_eq!(first.queries, second.queries);
    }
}
