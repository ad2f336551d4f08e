//! Small helpers shared by the compiler and the processor: attribute lookup,
//! source positions and XML name checks.

use crate::error::{Location, XsltError};
use std::str::from_utf8;

pub type OwnedAttributes = Vec<(Vec<u8>, Vec<u8>)>;

pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";
pub const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

pub fn get_owned_attributes(
    e: &quick_xml::events::BytesStart,
) -> Result<OwnedAttributes, XsltError> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let a = attr?;
        let raw = normalize_attribute_value(from_utf8(&a.value)?);
        let value = quick_xml::escape::unescape(&raw)
            .map_err(|err| XsltError::execution(err.to_string()))?;
        attrs.push((a.key.as_ref().to_vec(), value.into_owned().into_bytes()));
    }
    Ok(attrs)
}

/// Literal tabs and line breaks in the raw attribute text read as spaces.
/// Character references such as `&#10;` are expanded afterwards and keep
/// their character.
fn normalize_attribute_value(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

pub fn get_attr_optional(attrs: &OwnedAttributes, name: &[u8]) -> Result<Option<String>, XsltError> {
    for (key, value) in attrs {
        if key == name {
            return Ok(Some(from_utf8(value)?.to_string()));
        }
    }
    Ok(None)
}

pub fn get_line_col_from_pos(source: &str, pos: usize) -> (usize, usize) {
    let mut end = pos.min(source.len());
    while !source.is_char_boundary(end) {
        end -= 1;
    }
    let prefix = &source[..end];
    let line = prefix.matches('\n').count() + 1;
    let col = prefix.rfind('\n').map_or(end + 1, |nl| end - nl);
    (line, col)
}

pub fn location_of(uri: &str, source: &str, pos: usize) -> Location {
    let (line, col) = get_line_col_from_pos(source, pos);
    Location::new(uri, line, col)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '\u{B7}')
}

pub fn is_ncname(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_name_start(first) => chars.all(is_name_char),
        _ => false,
    }
}

pub fn is_qname(name: &str) -> bool {
    match name.split_once(':') {
        Some((prefix, local)) => is_ncname(prefix) && is_ncname(local),
        None => is_ncname(name),
    }
}

/// Splits `prefix:local`; an unprefixed name has an empty prefix.
pub fn split_qname(name: &str) -> (&str, &str) {
    name.split_once(':').unwrap_or(("", name))
}

/// Clark notation for an expanded name: `{uri}local`, or just `local`.
pub fn expanded_name(namespace: &str, local: &str) -> String {
    if namespace.is_empty() {
        local.to_string()
    } else {
        format!("{{{}}}{}", namespace, local)
    }
}

pub fn is_whitespace_only(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_and_column_are_one_based() {
        let source = "<a>\n  <b/>\n</a>";
        assert_eq!(get_line_col_from_pos(source, 0), (1, 1));
        assert_eq!(get_line_col_from_pos(source, 6), (2, 3));
    }

    #[test]
    fn character_references_survive_attribute_normalization() {
        let mut reader = quick_xml::Reader::from_str("<o a=\"x&#10;y&#9;z\" b=\"p\nq\tr\"/>");
        let Ok(quick_xml::events::Event::Empty(start)) = reader.read_event() else {
            panic!("expected an empty element");
        };
        let attrs = get_owned_attributes(&start).unwrap();
        assert_eq!(get_attr_optional(&attrs, b"a").unwrap().as_deref(), Some("x\ny\tz"));
        assert_eq!(get_attr_optional(&attrs, b"b").unwrap().as_deref(), Some("p q r"));
    }

    #[test]
    fn qname_validation() {
        assert!(is_qname("xsl:template"));
        assert!(is_qname("para"));
        assert!(!is_qname("1abc"));
        assert!(!is_qname("a:b:c"));
        assert!(!is_qname(""));
        assert!(is_ncname("pi-target"));
        assert!(!is_ncname("x:y"));
    }

    #[test]
    fn expanded_names_use_clark_notation() {
        assert_eq!(expanded_name("", "x"), "x");
        assert_eq!(expanded_name("urn:a", "x"), "{urn:a}x");
        assert_eq!(split_qname("p:x"), ("p", "x"));
        assert_eq!(split_qname("x"), ("", "x"));
    }
}
