//! The resumable interpreter.
//!
//! A [`Processor`] runs one transformation of one source tree. It keeps an
//! explicit stack of [`ActionFrame`]s and steps the top frame until the stack
//! is empty or the output asks it to pause. A paused processor picks up
//! exactly where it stopped the next time [`Processor::execute`] is called.

use crate::ast::{ActionId, Avt, CompiledStylesheet, DEFAULT_MODE, ModeId};
use crate::context::{GlobalValue, XsltContext};
use crate::error::XsltError;
use crate::frame::{ActionFrame, Outcome};
use crate::keys::KeyCache;
use crate::output::{OutputResult, RecordBuilder, RecordOutput};
use crate::query_store::{QueryId, ScopeSnapshot};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use trellis_xpath1::{
    DataSourceNode, EvaluationContext, FunctionRegistry, NodeType, ResultFragment, XPathError, XPathValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Finished,
    /// The sink pushed back. Call `execute` again to continue.
    Suspended,
}

pub struct Processor<'s, 'a, 'o, N: DataSourceNode<'a>> {
    pub(crate) stylesheet: &'s CompiledStylesheet,
    pub(crate) root: N,
    pub(crate) frames: Vec<ActionFrame<N>>,
    /// Output redirection stack. The first builder writes to the caller's
    /// sink; the others capture result tree fragments.
    pub(crate) outputs: Vec<RecordBuilder<'o>>,
    pub(crate) globals: Vec<GlobalValue<N>>,
    pub(crate) parameters: HashMap<String, XPathValue<N>>,
    pub(crate) messages: Vec<String>,
    keys: RefCell<KeyCache<N>>,
    functions: FunctionRegistry,
    mode: ModeId,
    interrupted: bool,
    started: bool,
    finished: bool,
    _source: PhantomData<&'a ()>,
}

impl<'s, 'a, 'o, N: DataSourceNode<'a> + 'a> Processor<'s, 'a, 'o, N> {
    pub fn new(stylesheet: &'s CompiledStylesheet, root: N, sink: impl RecordOutput + 'o) -> Self {
        Processor {
            stylesheet,
            root,
            frames: Vec::new(),
            outputs: vec![RecordBuilder::for_sink(sink)],
            globals: vec![GlobalValue::Pending; stylesheet.globals.len()],
            parameters: HashMap::new(),
            messages: Vec::new(),
            keys: RefCell::new(KeyCache::new()),
            functions: FunctionRegistry::default(),
            mode: DEFAULT_MODE,
            interrupted: false,
            started: false,
            finished: false,
            _source: PhantomData,
        }
    }

    /// Supplies a global parameter. `name` is the expanded name, `{uri}local`
    /// for names in a namespace.
    pub fn with_parameter(mut self, name: &str, value: XPathValue<N>) -> Self {
        if !self.stylesheet.global_names.contains_key(name) {
            log::debug!("Parameter '{}' is not declared by the stylesheet", name);
        }
        self.parameters.insert(name.to_string(), value);
        self
    }

    /// Starts in the named mode instead of the default one. A mode no
    /// template uses leaves only the built-in rules.
    pub fn with_mode(mut self, mode: &str) -> Self {
        self.mode = self
            .stylesheet
            .mode(mode)
            .unwrap_or(self.stylesheet.mode_count());
        self
    }

    /// Texts of the `xsl:message` instructions executed so far.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of key tables built so far.
    pub fn key_builds(&self) -> usize {
        self.keys.borrow().builds()
    }

    /// Runs until the transformation is complete or the sink asks for a
    /// pause. After an error the processor must not be resumed.
    pub fn execute(&mut self) -> Result<ExecutionStatus, XsltError> {
        if self.finished {
            return Ok(ExecutionStatus::Finished);
        }
        if !self.started {
            self.started = true;
            let frame = ActionFrame::new(self.stylesheet.root, self.root, 1, 1, self.mode);
            self.push_frame(frame);
        }

        loop {
            let Some(top) = self.frames.len().checked_sub(1) else {
                return self.finish_output();
            };
            let outcome = match self.step(top) {
                Ok(outcome) => outcome,
                Err(XsltError::XPath(XPathError::ValuePending { token, .. })) => {
                    // The step is repeated unchanged once the global is known.
                    self.start_global(token)?;
                    Outcome::Continue
                }
                Err(XsltError::XPath(XPathError::CircularVariable(name))) => {
                    return Err(XsltError::CircularVariable(name));
                }
                Err(e) => return Err(e),
            };
            match outcome {
                Outcome::Continue => {}
                Outcome::Finished => {
                    self.frames.pop();
                }
                Outcome::Suspended => return Ok(ExecutionStatus::Suspended),
            }
            if std::mem::take(&mut self.interrupted) {
                return Ok(ExecutionStatus::Suspended);
            }
        }
    }

    fn finish_output(&mut self) -> Result<ExecutionStatus, XsltError> {
        if self.outputs.len() != 1 {
            return Err(XsltError::execution("output redirection was not closed"));
        }
        if self.output().finish()? == OutputResult::Overflow {
            return Ok(ExecutionStatus::Suspended);
        }
        self.finished = true;
        log::debug!("Transformation finished");
        Ok(ExecutionStatus::Finished)
    }

    pub(crate) fn output(&mut self) -> &mut RecordBuilder<'o> {
        let top = self.outputs.len() - 1;
        &mut self.outputs[top]
    }

    /// Sends one event to the current output. False when the sink overflowed
    /// and the step has to be repeated.
    pub(crate) fn emit<F>(&mut self, event: F) -> Result<bool, XsltError>
    where
        F: FnOnce(&mut RecordBuilder<'o>) -> Result<OutputResult, XsltError>,
    {
        match event(self.output())? {
            OutputResult::Overflow => Ok(false),
            OutputResult::Interrupt => {
                self.interrupted = true;
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    /// Redirects output into a new result tree fragment.
    pub(crate) fn begin_capture(&mut self) {
        self.outputs.push(RecordBuilder::for_fragment());
    }

    pub(crate) fn end_capture(&mut self) -> Result<ResultFragment, XsltError> {
        if self.outputs.len() < 2 {
            return Err(XsltError::execution("no captured output to collect"));
        }
        match self.outputs.pop() {
            Some(builder) => builder.into_fragment(),
            None => Err(XsltError::execution("no captured output to collect")),
        }
    }

    pub(crate) fn push_frame(&mut self, mut frame: ActionFrame<N>) {
        if let Some(slots) = self.stylesheet.action(frame.action).owned_slots() {
            frame.slots = vec![None; slots];
            frame.owner = Some(self.frames.len());
        }
        self.frames.push(frame);
    }

    pub(crate) fn push_child(&mut self, index: usize, action: ActionId) {
        let frame = self.frames[index].child(index, action);
        self.push_frame(frame);
    }

    fn context<'p>(&'p self, index: usize, scope: &'p ScopeSnapshot, current: N) -> XsltContext<'p, N> {
        let locals = self
            .frames
            .get(index)
            .and_then(|frame| frame.owner)
            .and_then(|owner| self.frames.get(owner))
            .map(|owner| owner.slots.as_slice())
            .unwrap_or(&[]);
        XsltContext {
            stylesheet: self.stylesheet,
            scope,
            locals,
            globals: &self.globals,
            current,
            keys: &self.keys,
            functions: &self.functions,
        }
    }

    /// Evaluates a query with an explicit focus, seeing the locals of frame
    /// `index`.
    pub(crate) fn evaluate_at(
        &self,
        index: usize,
        query: QueryId,
        node: N,
        position: usize,
        size: usize,
    ) -> Result<XPathValue<N>, XsltError> {
        let compiled = self.stylesheet.queries.get(query);
        let context = self.context(index, &compiled.scope, node);
        let e_ctx = EvaluationContext::new(node, self.root, &self.functions, position, size, &context);
        Ok(compiled.query()?.evaluate(&e_ctx)?)
    }

    /// Evaluates a query in the context of frame `index`.
    pub(crate) fn evaluate(&self, index: usize, query: QueryId) -> Result<XPathValue<N>, XsltError> {
        let frame = &self.frames[index];
        self.evaluate_at(index, query, frame.node, frame.position, frame.size)
    }

    pub(crate) fn matches_at(&self, index: usize, query: QueryId, node: N) -> Result<bool, XsltError> {
        let compiled = self.stylesheet.queries.get(query);
        let context = self.context(index, &compiled.scope, node);
        let e_ctx = EvaluationContext::new(node, self.root, &self.functions, 1, 1, &context);
        Ok(compiled.query()?.matches(node, &e_ctx)?)
    }

    pub(crate) fn avt(&self, index: usize, avt: &'s Avt) -> Result<Cow<'s, str>, XsltError> {
        avt.evaluate_with(|query| Ok(self.evaluate(index, query)?.to_string()))
    }

    /// Template resolution: the module's own rules, then its imports from
    /// the last declared to the first. Returns the template and the module
    /// it was found in.
    pub(crate) fn find_template(
        &self,
        index: usize,
        module: usize,
        mode: ModeId,
        node: N,
    ) -> Result<Option<(ActionId, usize)>, XsltError> {
        let Some(stylesheet_module) = self.stylesheet.modules.get(module) else {
            return Ok(None);
        };
        if let Some(manager) = stylesheet_module.managers.get(&mode) {
            for entry in manager.candidates() {
                if self.matches_at(index, entry.pattern, node)? {
                    return Ok(Some((entry.template, module)));
                }
            }
        }
        for &import in stylesheet_module.imports.iter().rev() {
            if let Some(found) = self.find_template(index, import, mode, node)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn builtin_rule(&self, node: N) -> Option<ActionId> {
        match node.node_type() {
            NodeType::Root | NodeType::Element => Some(self.stylesheet.builtin_apply),
            NodeType::Text | NodeType::Attribute => Some(self.stylesheet.builtin_text),
            NodeType::Comment | NodeType::ProcessingInstruction | NodeType::Namespace => None,
        }
    }

    /// Pushes the frame for a resolved template rule, or for the built-in
    /// rule when nothing matched.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push_rule(
        &mut self,
        index: usize,
        node: N,
        position: usize,
        size: usize,
        mode: ModeId,
        found: Option<(ActionId, usize)>,
        params: HashMap<String, XPathValue<N>>,
    ) {
        let (action, rule) = match found {
            Some((template, module)) => (template, Some(module)),
            None => match self.builtin_rule(node) {
                Some(builtin) => (builtin, None),
                None => return,
            },
        };
        let mut frame = ActionFrame::new(action, node, position, size, mode);
        frame.rule = rule;
        frame.parent = Some(index);
        frame.received = params;
        self.push_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::datasources::XmlDocument;
    use crate::output::{Record, RecordKind, SinkStatus};
    use crate::resolver::NoResolver;

    #[derive(Default)]
    struct Collect {
        records: Vec<Record>,
        ended: bool,
    }

    impl RecordOutput for Collect {
        fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
            self.records.push(record.clone());
            Ok(SinkStatus::Continue)
        }

        fn the_end(&mut self) -> Result<(), XsltError> {
            self.ended = true;
            Ok(())
        }
    }

    fn sheet(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
            body
        )
    }

    fn text_of(records: &[Record]) -> String {
        records
            .iter()
            .filter(|r| r.kind == RecordKind::Text)
            .map(|r| r.value.as_str())
            .collect()
    }

    #[test]
    fn runs_to_completion_and_ends_the_sink() {
        let stylesheet = compile(
            &sheet(r#"<xsl:template match="a"><xsl:value-of select="@id"/></xsl:template>"#),
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let doc = XmlDocument::parse(r#"<a id="7"/>"#).unwrap();
        let mut sink = Collect::default();
        let mut processor = Processor::new(&stylesheet, doc.root_node(), &mut sink);
        assert_eq!(processor.execute().unwrap(), ExecutionStatus::Finished);
        assert!(processor.is_finished());
        assert_eq!(processor.execute().unwrap(), ExecutionStatus::Finished);
        drop(processor);
        assert!(sink.ended);
        assert_eq!(text_of(&sink.records), "7");
    }

    #[test]
    fn higher_priority_wins_regardless_of_order() {
        let stylesheet = compile(
            &sheet(
                r#"<xsl:template match="x" priority="2">two</xsl:template>
                   <xsl:template match="x" priority="1">one</xsl:template>"#,
            ),
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let doc = XmlDocument::parse("<x/>").unwrap();
        let mut sink = Collect::default();
        Processor::new(&stylesheet, doc.root_node(), &mut sink).execute().unwrap();
        assert_eq!(text_of(&sink.records), "two");
    }

    #[test]
    fn equal_priority_prefers_the_later_declaration() {
        let stylesheet = compile(
            &sheet(
                r#"<xsl:template match="x">first</xsl:template>
                   <xsl:template match="x">second</xsl:template>"#,
            ),
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let doc = XmlDocument::parse("<x/>").unwrap();
        let mut sink = Collect::default();
        Processor::new(&stylesheet, doc.root_node(), &mut sink).execute().unwrap();
        assert_eq!(text_of(&sink.records), "second");
    }

    #[test]
    fn parameters_and_modes_are_applied() {
        let stylesheet = compile(
            &sheet(
                r#"<xsl:param name="who" select="'nobody'"/>
                   <xsl:template match="/">default</xsl:template>
                   <xsl:template match="/" mode="greet">hello <xsl:value-of select="$who"/></xsl:template>"#,
            ),
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let doc = XmlDocument::parse("<x/>").unwrap();
        let mut sink = Collect::default();
        let mut processor = Processor::new(&stylesheet, doc.root_node(), &mut sink)
            .with_parameter("who", XPathValue::String("world".into()))
            .with_mode("greet");
        processor.execute().unwrap();
        drop(processor);
        assert_eq!(text_of(&sink.records), "hello world");
    }

    #[test]
    fn unknown_mode_uses_builtin_rules() {
        let stylesheet = compile(
            &sheet(r#"<xsl:template match="x">matched</xsl:template>"#),
            "t.xsl",
            &NoResolver,
        )
        .unwrap();
        let doc = XmlDocument::parse("<x>text</x>").unwrap();
        let mut sink = Collect::default();
        Processor::new(&stylesheet, doc.root_node(), &mut sink)
            .with_mode("elsewhere")
            .execute()
            .unwrap();
        assert_eq!(text_of(&sink.records), "text");
    }
}
