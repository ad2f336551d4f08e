//! Reads one stylesheet file with quick-xml and forwards its elements and
//! character data to a [`StylesheetBuilder`]. No XSLT knowledge lives here.
use crate::compiler::StylesheetBuilder;
use crate::error::XsltError;
use crate::util::{get_owned_attributes, location_of};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::Event;
use std::str::from_utf8;

/// Character data arrives in pieces (text, CDATA sections, entity references);
/// the builder joins adjacent pieces itself.
pub fn parse_stylesheet_content(
    source: &str,
    uri: &str,
    builder: &mut impl StylesheetBuilder,
) -> Result<(), XsltError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    loop {
        let pos = reader.buffer_position() as usize;
        let unescape_at = |raw: &str| -> Result<String, XsltError> {
            unescape(raw)
                .map(|text| text.into_owned())
                .map_err(|err| XsltError::compile(err.to_string(), location_of(uri, source, pos)))
        };

        match reader.read_event_into(&mut buf)? {
            Event::Eof => return Ok(()),
            Event::Start(start) => {
                let attributes = get_owned_attributes(&start)?;
                builder.start_element(&start, attributes, pos, source)?;
            }
            Event::Empty(start) => {
                let attributes = get_owned_attributes(&start)?;
                builder.empty_element(&start, attributes, pos, source)?;
            }
            Event::End(end) => builder.end_element(&end, pos, source)?,
            Event::Text(text) => builder.text(unescape_at(from_utf8(&text)?)?)?,
            Event::CData(cdata) => builder.text(from_utf8(&cdata)?.to_owned())?,
            Event::GeneralRef(reference) => {
                let name = reference
                    .decode()
                    .map_err(|err| XsltError::compile(err.to_string(), location_of(uri, source, pos)))?;
                builder.text(unescape_at(&format!("&{name};"))?)?;
            }
            // Comments, processing instructions, the XML declaration and DOCTYPE
            // carry nothing for the compiler.
            _ => {}
        }
        buf.clear();
    }
}
