//! Writes records as XML, HTML or plain text.

use super::settings::{OutputMethod, OutputSettings};
use super::{Record, RecordKind, RecordOutput, SinkStatus};
use crate::error::XsltError;
use crate::util::{expanded_name, is_whitespace_only};
use quick_xml::escape::partial_escape;
use std::io::Write;

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "col", "frame", "hr", "img", "input", "isindex", "link", "meta",
    "param",
];

const HTML_BOOLEAN_ATTRIBUTES: &[&str] = &[
    "checked", "compact", "declare", "defer", "disabled", "ismap", "multiple", "nohref", "noresize",
    "noshade", "nowrap", "readonly", "selected",
];

#[derive(Debug)]
struct OpenElement {
    qname: String,
    html: bool,
    void: bool,
    raw_text: bool,
    cdata: bool,
    has_markup: bool,
    has_text: bool,
}

/// A sink that serializes records to a byte stream.
///
/// Without an explicit method the serializer holds back leading whitespace,
/// comments and processing instructions until the first element decides
/// between html (a no-namespace `html` element) and xml.
pub struct XmlSerializer<W: Write> {
    out: W,
    settings: OutputSettings,
    method: Option<OutputMethod>,
    held: Vec<Record>,
    open: Vec<OpenElement>,
    started: bool,
    start_tag_open: bool,
    doctype_done: bool,
    wrote_content: bool,
}

fn escape_attribute(value: &str, html: bool) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' if html && chars.peek() == Some(&'{') => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' if !html => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\n' if !html => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' if !html => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    out
}

fn is_utf8(encoding: &str) -> bool {
    encoding.eq_ignore_ascii_case("utf-8") || encoding.eq_ignore_ascii_case("utf8")
}

impl<W: Write> XmlSerializer<W> {
    pub fn new(out: W, settings: OutputSettings) -> Self {
        XmlSerializer {
            out,
            method: settings.method,
            settings,
            held: Vec::new(),
            open: Vec::new(),
            started: false,
            start_tag_open: false,
            doctype_done: false,
            wrote_content: false,
        }
    }

    /// The output method, once it is known.
    pub fn method(&self) -> Option<OutputMethod> {
        self.method
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn indent_enabled(&self) -> bool {
        match self.method {
            Some(method @ (OutputMethod::Xml | OutputMethod::Html)) => self.settings.indent_for(method),
            _ => false,
        }
    }

    fn write_prolog(&mut self) -> Result<(), XsltError> {
        self.started = true;
        let encoding = self.settings.encoding().to_string();
        if !is_utf8(&encoding) {
            log::warn!("Output encoding '{}' is not supported, writing UTF-8", encoding);
        }
        if self.method == Some(OutputMethod::Xml) && self.settings.omit_xml_declaration != Some(true) {
            let version = self.settings.version.as_deref().unwrap_or("1.0");
            write!(self.out, "<?xml version=\"{}\" encoding=\"UTF-8\"", version)?;
            if let Some(standalone) = self.settings.standalone {
                write!(self.out, " standalone=\"{}\"", if standalone { "yes" } else { "no" })?;
            }
            writeln!(self.out, "?>")?;
        }
        Ok(())
    }

    fn write_doctype(&mut self, root: &str) -> Result<(), XsltError> {
        self.doctype_done = true;
        let public = self.settings.doctype_public.clone();
        let system = self.settings.doctype_system.clone();
        match self.method {
            Some(OutputMethod::Xml) => match (public, system) {
                (Some(p), Some(s)) => writeln!(self.out, "<!DOCTYPE {} PUBLIC \"{}\" \"{}\">", root, p, s)?,
                (None, Some(s)) => writeln!(self.out, "<!DOCTYPE {} SYSTEM \"{}\">", root, s)?,
                _ => {}
            },
            Some(OutputMethod::Html) => match (public, system) {
                (Some(p), Some(s)) => writeln!(self.out, "<!DOCTYPE html PUBLIC \"{}\" \"{}\">", p, s)?,
                (Some(p), None) => writeln!(self.out, "<!DOCTYPE html PUBLIC \"{}\">", p)?,
                (None, Some(s)) => writeln!(self.out, "<!DOCTYPE html SYSTEM \"{}\">", s)?,
                (None, None) => {}
            },
            _ => {}
        }
        Ok(())
    }

    fn close_start_tag(&mut self) -> Result<(), XsltError> {
        if self.start_tag_open {
            self.start_tag_open = false;
            self.out.write_all(b">")?;
        }
        Ok(())
    }

    /// Line break and indentation before a start tag, comment or PI.
    fn indent_before_markup(&mut self) -> Result<(), XsltError> {
        if !self.indent_enabled() {
            return Ok(());
        }
        match self.open.last() {
            Some(parent) if parent.has_text => {}
            Some(_) => write!(self.out, "\n{}", "  ".repeat(self.open.len()))?,
            None if self.wrote_content => self.out.write_all(b"\n")?,
            None => {}
        }
        Ok(())
    }

    fn mark_markup(&mut self) {
        if let Some(parent) = self.open.last_mut() {
            parent.has_markup = true;
        }
        self.wrote_content = true;
    }

    fn start_element(&mut self, record: &Record) -> Result<(), XsltError> {
        self.close_start_tag()?;
        let qname = record.name.qualified();
        if !self.doctype_done && self.open.is_empty() {
            self.write_doctype(&qname)?;
        }
        self.indent_before_markup()?;
        self.mark_markup();

        let html = self.method == Some(OutputMethod::Html) && record.name.namespace.is_empty();
        write!(self.out, "<{}", qname)?;
        for (prefix, uri) in &record.namespaces {
            if prefix.is_empty() {
                write!(self.out, " xmlns=\"{}\"", escape_attribute(uri, false))?;
            } else {
                write!(self.out, " xmlns:{}=\"{}\"", prefix, escape_attribute(uri, false))?;
            }
        }
        for (name, value) in &record.attributes {
            let attr = name.qualified();
            let boolean = html
                && value.eq_ignore_ascii_case(&attr)
                && HTML_BOOLEAN_ATTRIBUTES.contains(&attr.to_ascii_lowercase().as_str());
            if boolean {
                write!(self.out, " {}", attr)?;
            } else {
                write!(self.out, " {}=\"{}\"", attr, escape_attribute(value, html))?;
            }
        }

        let lower = record.name.local.to_ascii_lowercase();
        let clark = expanded_name(&record.name.namespace, &record.name.local);
        self.open.push(OpenElement {
            qname,
            html,
            void: html && HTML_VOID_ELEMENTS.contains(&lower.as_str()),
            raw_text: html && (lower == "script" || lower == "style"),
            cdata: !html && self.settings.cdata_section_elements.contains(&clark),
            has_markup: false,
            has_text: false,
        });

        if html {
            self.out.write_all(b">")?;
            if lower == "head" {
                self.indent_before_markup()?;
                self.mark_markup();
                let media = self.settings.media_type.as_deref().unwrap_or("text/html");
                write!(
                    self.out,
                    "<meta http-equiv=\"Content-Type\" content=\"{}; charset=UTF-8\">",
                    media
                )?;
            }
        } else {
            self.start_tag_open = true;
        }
        Ok(())
    }

    fn end_element(&mut self) -> Result<(), XsltError> {
        let Some(element) = self.open.pop() else {
            return Ok(());
        };
        if self.start_tag_open {
            self.start_tag_open = false;
            self.out.write_all(b"/>")?;
            return Ok(());
        }
        if element.html && element.void {
            return Ok(());
        }
        if self.indent_enabled() && element.has_markup && !element.has_text {
            write!(self.out, "\n{}", "  ".repeat(self.open.len()))?;
        }
        write!(self.out, "</{}>", element.qname)?;
        Ok(())
    }

    fn write_text(&mut self, record: &Record) -> Result<(), XsltError> {
        self.close_start_tag()?;
        self.wrote_content = true;
        let (raw, cdata) = match self.open.last_mut() {
            Some(parent) => {
                parent.has_text = true;
                (parent.raw_text, parent.cdata)
            }
            None => (false, false),
        };
        if record.disable_escaping || raw {
            self.out.write_all(record.value.as_bytes())?;
        } else if cdata {
            let body = record.value.replace("]]>", "]]]]><![CDATA[>");
            write!(self.out, "<![CDATA[{}]]>", body)?;
        } else {
            self.out.write_all(partial_escape(&record.value).as_bytes())?;
        }
        Ok(())
    }

    fn write_comment(&mut self, record: &Record) -> Result<(), XsltError> {
        self.close_start_tag()?;
        self.indent_before_markup()?;
        self.mark_markup();
        let mut body = record.value.replace("--", "- -");
        if body.ends_with('-') {
            body.push(' ');
        }
        write!(self.out, "<!--{}-->", body)?;
        Ok(())
    }

    fn write_pi(&mut self, record: &Record) -> Result<(), XsltError> {
        self.close_start_tag()?;
        self.indent_before_markup()?;
        self.mark_markup();
        let target = &record.name.local;
        let close = if self.method == Some(OutputMethod::Html) { ">" } else { "?>" };
        let body = record.value.replace("?>", "? >");
        if body.is_empty() {
            write!(self.out, "<?{}{}", target, close)?;
        } else {
            write!(self.out, "<?{} {}{}", target, body, close)?;
        }
        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> Result<(), XsltError> {
        if self.method == Some(OutputMethod::Text) {
            if record.kind == RecordKind::Text {
                self.out.write_all(record.value.as_bytes())?;
            }
            return Ok(());
        }
        match record.kind {
            RecordKind::Element => self.start_element(record),
            RecordKind::EndElement => self.end_element(),
            RecordKind::Text => self.write_text(record),
            RecordKind::Comment => self.write_comment(record),
            RecordKind::ProcessingInstruction => self.write_pi(record),
        }
    }

    fn decide_method(&mut self, method: OutputMethod) -> Result<(), XsltError> {
        log::debug!("Output method resolved to {:?}", method);
        self.method = Some(method);
        self.write_prolog()?;
        for held in std::mem::take(&mut self.held) {
            self.write_record(&held)?;
        }
        Ok(())
    }
}

impl<W: Write> RecordOutput for XmlSerializer<W> {
    fn record_done(&mut self, record: &Record) -> Result<SinkStatus, XsltError> {
        if self.method.is_none() {
            let decisive = match record.kind {
                RecordKind::Element => true,
                RecordKind::Text => !is_whitespace_only(&record.value),
                _ => false,
            };
            if !decisive {
                self.held.push(record.clone());
                return Ok(SinkStatus::Continue);
            }
            let html = record.kind == RecordKind::Element
                && record.name.namespace.is_empty()
                && record.name.local.eq_ignore_ascii_case("html");
            self.decide_method(if html { OutputMethod::Html } else { OutputMethod::Xml })?;
        } else if !self.started {
            self.write_prolog()?;
        }
        self.write_record(record)?;
        Ok(SinkStatus::Continue)
    }

    fn the_end(&mut self) -> Result<(), XsltError> {
        if self.method.is_none() {
            self.decide_method(OutputMethod::Xml)?;
        } else if !self.started {
            self.write_prolog()?;
        }
        self.close_start_tag()?;
        if self.method != Some(OutputMethod::Text) && self.wrote_content {
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}
