//! XML parsing and writing utilities for the SpreadsheetML parts of an xlsx package.
//! Provides the event reader wrapper, attribute/text helpers and the small amount of
//! escaping needed to serialize edited parts back.

use crate::error::InvoiceSheetError;
use quick_xml::escape::escape;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

/// Errors specific to XML parsing operations
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Parse entity '{0}' failed")]
    ParseEntityError(String),

    #[error("Parse attribute value '{0}' failed")]
    ParseAttributeValueError(String),

    #[error("Element <{0}> not found in '{1}'")]
    MissingElement(String, String),
}

/// XML reader wrapper configured for spreadsheet parts
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    /// Creates a reader that reports empty elements as a start/end pair, so
    /// `<c r="A1"/>` and `<c r="A1"></c>` reach the caller the same way.
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        XmlReader {
            reader,
            buffer: Vec::with_capacity(1024),
        }
    }

    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, InvoiceSheetError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer) {
            Ok(Event::Eof) => Ok(None),
            Ok(event) => Ok(Some(event)),
            Err(error) => Err(InvoiceSheetError::XmlError(error)),
        }
    }
}

impl<'a> XmlReader<&'a [u8]> {
    /// Creates a reader over an in-memory part.
    pub(crate) fn from_str(xml: &'a str) -> XmlReader<&'a [u8]> {
        XmlReader::new(xml.as_bytes())
    }
}

/// Helper trait for XML attributes providing value extraction and parsing
pub(crate) trait XmlAttributeHelper<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, InvoiceSheetError>;

    fn parse_value<T: FromStr>(&self) -> Result<T, InvoiceSheetError>;
}

impl<'a> XmlAttributeHelper<'a> for Attribute<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, InvoiceSheetError> {
        Ok(self.unescape_value()?)
    }

    fn parse_value<T: FromStr>(&self) -> Result<T, InvoiceSheetError> {
        let value = self.get_value()?;
        value
            .parse()
            .map_err(|_| XmlError::ParseAttributeValueError(value.to_string()).into())
    }
}

/// Helper trait for element start events
pub(crate) trait XmlNodeHelper<'a> {
    /// Gets an attribute value by name
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, InvoiceSheetError>;

    /// Parses an attribute value to the specified type
    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, InvoiceSheetError>;

    /// Collects every attribute as an owned (name, value) pair, in document order
    fn attribute_pairs(&self) -> Result<Vec<(String, String)>, InvoiceSheetError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, InvoiceSheetError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.get_value())
            .transpose()
    }

    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, InvoiceSheetError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.parse_value())
            .transpose()
    }

    fn attribute_pairs(&self) -> Result<Vec<(String, String)>, InvoiceSheetError> {
        let mut pairs = Vec::new();
        for result in self.attributes() {
            let attribute = result?;
            let key = std::str::from_utf8(attribute.key.as_ref())?.to_owned();
            pairs.push((key, attribute.get_value()?.into_owned()));
        }
        Ok(pairs)
    }
}

/// Helper trait for building text content from XML events
pub(crate) trait XmlTextContextHelper {
    /// Appends an entity or character reference (`&amp;`, `&#x4E2D;`) as text
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), InvoiceSheetError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), InvoiceSheetError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = match number.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16)?,
                None => number.parse::<u32>()?,
            };
            if let Some(character) = char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }
        Ok(())
    }
}

/// Escapes text for use inside an element or a double-quoted attribute.
pub(crate) fn escape_text(text: &str) -> Cow<'_, str> {
    escape(text)
}

/// Renders attribute pairs as ` key="value"` sequences.
pub(crate) fn render_attributes(pairs: &[(String, String)]) -> String {
    let mut rendered = String::new();
    for (key, value) in pairs {
        rendered.push(' ');
        rendered.push_str(key);
        rendered.push_str("=\"");
        rendered.push_str(&escape_text(value));
        rendered.push('"');
    }
    rendered
}

/// Sets (or appends) an attribute in an owned attribute list.
pub(crate) fn set_attribute(pairs: &mut Vec<(String, String)>, key: &str, value: String) {
    match pairs.iter_mut().find(|(name, _)| name == key) {
        Some((_, current)) => *current = value,
        None => pairs.push((key.to_owned(), value)),
    }
}

pub(crate) fn get_attribute<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_round_trip_with_escaping() {
        let mut pairs = vec![("r".to_owned(), "5".to_owned())];
        set_attribute(&mut pairs, "ht", "18.5".to_owned());
        set_attribute(&mut pairs, "r", "6".to_owned());
        assert_eq!(get_attribute(&pairs, "r"), Some("6"));
        assert_eq!(render_attributes(&pairs), r#" r="6" ht="18.5""#);

        let quoted = vec![("name".to_owned(), "A&B \"x\"".to_owned())];
        assert_eq!(render_attributes(&quoted), r#" name="A&amp;B &quot;x&quot;""#);
    }

    #[test]
    fn reads_entities_into_text() -> Result<(), InvoiceSheetError> {
        let mut reader = XmlReader::from_str("<t>P&amp;O &#x4E2D;</t>");
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Text(event) => text.push_str(&event.xml_content()?),
            Event::GeneralRef(event) => text.push_bytes_ref(&event)?,
        });
        assert_eq!(text, "P&O 中");
        Ok(())
    }
}
