use crate::error::InvoiceSheetError;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::match_xml_events;
use crate::spreadsheet::cell::NumberKind;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts");
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");
const TAG_FORMAT_INDEX: QName = QName(b"xf");

/// Which edges of a cell get a thin border.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BorderEdges {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

impl BorderEdges {
    pub const BOX: BorderEdges = BorderEdges { left: true, right: true, top: true, bottom: true };
    pub const SIDES: BorderEdges = BorderEdges { left: true, right: true, top: false, bottom: false };

    fn to_xml(self) -> String {
        let edge = |name: &str, enabled: bool| {
            if enabled {
                format!(r#"<{name} style="thin"><color indexed="64"/></{name}>"#)
            } else {
                format!("<{name}/>")
            }
        };
        format!(
            "<border>{}{}{}{}<diagonal/></border>",
            edge("left", self.left),
            edge("right", self.right),
            edge("top", self.top),
            edge("bottom", self.bottom)
        )
    }
}

/// The workbook's `xl/styles.xml`, kept as text so unknown parts survive a save.
#[derive(Debug, Default)]
pub(crate) struct Styles {
    xml: Option<String>,
    number_kinds: Vec<NumberKind>,
    border_cache: HashMap<(u32, BorderEdges), u32>,
    dirty: bool,
}

impl Styles {
    pub(crate) fn parse(xml: Option<String>) -> Result<Styles, InvoiceSheetError> {
        let number_kinds = match &xml {
            Some(xml) => load_number_kinds(xml)?,
            None => Vec::new(),
        };
        Ok(Styles {
            xml,
            number_kinds,
            border_cache: HashMap::new(),
            dirty: false,
        })
    }

    /// Number format classification of a cell format index.
    pub(crate) fn number_kind(&self, style: Option<u32>) -> NumberKind {
        style
            .and_then(|index| self.number_kinds.get(index as usize))
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn number_kinds(&self) -> &[NumberKind] {
        &self.number_kinds
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn to_xml(&self) -> Option<&str> {
        self.xml.as_deref()
    }

    /// Returns a cell format index equal to `base` plus a thin border on `edges`.
    /// Repeated requests for the same pair reuse the format created first.
    pub(crate) fn with_border(&mut self, base: Option<u32>, edges: BorderEdges) -> Result<u32, InvoiceSheetError> {
        let base = base.unwrap_or(0);
        if let Some(index) = self.border_cache.get(&(base, edges)) {
            return Ok(*index);
        }
        let xml = self.xml.as_mut().ok_or(SpreadsheetError::MissingStyles)?;

        let border_id = append_child(xml, "borders", &edges.to_xml())?;
        let template = nth_cell_format(xml, base as usize)
            .unwrap_or_else(|| r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#.to_owned());
        let format = with_border_attributes(&template, border_id);
        let index = append_child(xml, "cellXfs", &format)?;

        let kind = self.number_kind(Some(base));
        self.number_kinds.resize(index as usize, NumberKind::Plain);
        self.number_kinds.push(kind);
        self.border_cache.insert((base, edges), index);
        self.dirty = true;
        Ok(index)
    }
}

fn load_number_kinds(xml: &str) -> Result<Vec<NumberKind>, InvoiceSheetError> {
    let mut reader = XmlReader::from_str(xml);
    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<u32, NumberKind>::new();
    let mut format_indexes_context = false;
    let mut format_ids = Vec::<u32>::new();

    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = true,
        Event::End(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = false,
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.parse_attribute_value::<u32>("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                custom_formats.insert(id, NumberKind::from_format_code(&format));
            }
        }
        Event::Start(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = true,
        Event::End(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = false,
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            format_ids.push(event.parse_attribute_value::<u32>("numFmtId")?.unwrap_or(0));
        }
    });

    Ok(format_ids
        .into_iter()
        .map(|id| {
            custom_formats
                .get(&id)
                .copied()
                .or_else(|| NumberKind::from_builtin_id(id))
                .unwrap_or_default()
        })
        .collect())
}

fn format_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<xf\b[^>]*?/>|<xf\b[^>]*?>.*?</xf>").expect("Hardcode regex pattern"))
}

/// Locates the inner content of `<tag ...>...</tag>`, returning (content start, content end).
fn section(xml: &str, tag: &str) -> Option<(usize, usize)> {
    let open = Regex::new(&format!(r"<{tag}\b[^>]*?>")).ok()?;
    let found = open.find(xml)?;
    if found.as_str().ends_with("/>") {
        return Some((found.end(), found.end()));
    }
    let close = xml[found.end()..].find(&format!("</{tag}>"))? + found.end();
    Some((found.end(), close))
}

fn nth_cell_format(xml: &str, index: usize) -> Option<String> {
    let (start, end) = section(xml, "cellXfs")?;
    format_pattern()
        .find_iter(&xml[start..end])
        .nth(index)
        .map(|found| found.as_str().to_owned())
}

/// Appends `child` to the `<container>` element, keeps its `count` attribute
/// in step and returns the zero-based index of the new child.
fn append_child(xml: &mut String, container: &str, child: &str) -> Result<u32, InvoiceSheetError> {
    let missing = || SpreadsheetError::FileError(format!("xl/styles.xml <{container}>"));
    let open = Regex::new(&format!(r"<{container}\b[^>]*?>"))?;
    let found = open.find(xml).ok_or_else(missing)?;
    let (open_start, open_end) = (found.start(), found.end());
    let open_tag = found.as_str().to_owned();

    let element = container.trim_end_matches('s');
    let element = if container == "cellXfs" { "xf" } else { element };
    let (index, close) = if open_tag.ends_with("/>") {
        (0, None)
    } else {
        let close = xml[open_end..].find(&format!("</{container}>")).ok_or_else(missing)? + open_end;
        let children = Regex::new(&format!(r"<{element}\b"))?;
        (children.find_iter(&xml[open_end..close]).count() as u32, Some(close))
    };

    let count_pattern = Regex::new(r#"\bcount="\d*""#)?;
    let counted = if count_pattern.is_match(&open_tag) {
        count_pattern.replace(&open_tag, format!(r#"count="{}""#, index + 1)).into_owned()
    } else {
        open_tag.replacen(&format!("<{container}"), &format!(r#"<{container} count="{}""#, index + 1), 1)
    };

    match close {
        Some(close) => {
            xml.insert_str(close, child);
            xml.replace_range(open_start..open_end, &counted);
        }
        None => {
            let opened = counted.trim_end_matches("/>").trim_end().to_owned() + ">";
            xml.replace_range(open_start..open_end, &format!("{opened}{child}</{container}>"));
        }
    }
    Ok(index)
}

fn with_border_attributes(format: &str, border_id: u32) -> String {
    static ATTRIBUTES: OnceLock<Regex> = OnceLock::new();
    let attributes = ATTRIBUTES
        .get_or_init(|| Regex::new(r#"\s(?:borderId|applyBorder)="[^"]*""#).expect("Hardcode regex pattern"));
    let tag_end = format.find('>').unwrap_or(format.len());
    let (tag, rest) = format.split_at(tag_end);
    let tag = attributes.replace_all(tag, "");
    let tag = tag.replacen("<xf", &format!(r#"<xf borderId="{border_id}" applyBorder="1""#), 1);
    format!("{tag}{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy/mm/dd"/></numFmts>
<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
<cellXfs count="3"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="164" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/><xf numFmtId="2" fontId="1" fillId="0" borderId="0" xfId="0"><alignment horizontal="center"/></xf></cellXfs>
</styleSheet>"#;

    #[test]
    fn classifies_cell_formats() {
        let styles = Styles::parse(Some(STYLES.to_owned())).unwrap();
        assert_eq!(styles.number_kinds(), &[NumberKind::Plain, NumberKind::Date, NumberKind::Plain]);
        assert_eq!(styles.number_kind(Some(1)), NumberKind::Date);
        assert_eq!(styles.number_kind(Some(42)), NumberKind::Plain);
        assert_eq!(styles.number_kind(None), NumberKind::Plain);
    }

    #[test]
    fn border_formats_are_cloned_and_cached() {
        let mut styles = Styles::parse(Some(STYLES.to_owned())).unwrap();
        let boxed = styles.with_border(Some(2), BorderEdges::BOX).unwrap();
        assert_eq!(boxed, 3);
        assert_eq!(styles.with_border(Some(2), BorderEdges::BOX).unwrap(), 3);
        let sides = styles.with_border(Some(1), BorderEdges::SIDES).unwrap();
        assert_eq!(sides, 4);
        assert_eq!(styles.number_kind(Some(sides)), NumberKind::Date);
        assert!(styles.is_dirty());

        let xml = styles.to_xml().unwrap();
        assert!(xml.contains(r#"<borders count="3">"#));
        assert!(xml.contains(r#"<cellXfs count="5">"#));
        assert!(xml.contains(r#"<xf borderId="1" applyBorder="1" numFmtId="2" fontId="1" fillId="0" xfId="0"><alignment horizontal="center"/></xf>"#));
        assert!(xml.contains(r#"<left style="thin"><color indexed="64"/></left><right style="thin"><color indexed="64"/></right><top/><bottom/>"#));

        let reparsed = Styles::parse(Some(xml.to_owned())).unwrap();
        assert_eq!(reparsed.number_kinds().len(), 5);
    }

    #[test]
    fn missing_stylesheet_is_an_error() {
        let mut styles = Styles::parse(None).unwrap();
        assert!(styles.with_border(None, BorderEdges::BOX).is_err());
    }
}
