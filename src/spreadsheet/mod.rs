//! # Spreadsheet Module
//!
//! Reading and editing `.xlsx` workbooks. A workbook is loaded into memory
//! as a set of package parts; worksheets and the stylesheet are parsed into
//! editable models and serialized back on save, every other part is written
//! back byte-for-byte.

pub mod cell;
pub mod grid;
pub mod range;
pub mod reference;
pub(crate) mod styles;
pub mod worksheet;

pub use cell::CellValue;
pub use grid::MemorySheet;
pub use grid::SheetGrid;
pub use range::CellRange;
pub use styles::BorderEdges;
pub use worksheet::Worksheet;

use crate::error::InvoiceSheetError;
use crate::error::ResultMessage;
use crate::helpers::xml::XmlAttributeHelper;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::Package;
use crate::match_xml_events;
use crate::spreadsheet::styles::Styles;
use crate::spreadsheet::worksheet::ValueContext;
use quick_xml::events::Event;
use quick_xml::name::QName;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const TAG_RELATIONSHIP: &[u8] = b"Relationship";
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");
const TAG_TEXT: QName = QName(b"t");

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELATIONSHIPS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
const STYLES_PART: &str = "xl/styles.xml";
const CALCULATION_CHAIN_PART: &str = "xl/calcChain.xml";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Errors raised while reading or editing a workbook
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    /// A required package part is missing
    #[error("Missing package part '{0}'")]
    FileError(String),

    #[error("Workbook contains no worksheets")]
    EmptyWorkbook,

    #[error("Sheet '{0}' not found")]
    SheetNotFound(String),

    /// A stored cell that cannot be decoded
    #[error("Invalid cell value at '{position}': {message}")]
    InvalidCellValue { position: String, message: String },

    #[error("Invalid height '{value}' on row {row}")]
    InvalidRowHeight { row: u32, value: String },

    #[error("Merge {range} overlaps existing merge {existing}")]
    MergeConflict { range: String, existing: String },

    #[error("Cannot merge the single cell {0}")]
    InvalidMerge(String),

    #[error("Workbook has no stylesheet")]
    MissingStyles,
}

struct SheetEntry {
    path: String,
    worksheet: Worksheet,
}

/// An xlsx workbook held in memory.
pub struct Workbook {
    package: Package,
    sheets: Vec<SheetEntry>,
    styles: Styles,
}

impl Workbook {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Workbook, InvoiceSheetError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(InvoiceSheetError::from).with_prefix(&name)?;
        Workbook::read(BufReader::new(file)).with_prefix(&name)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Workbook, InvoiceSheetError> {
        Workbook::read(Cursor::new(bytes))
    }

    fn read<RS: Read + Seek>(reader: RS) -> Result<Workbook, InvoiceSheetError> {
        let package = Package::read(reader)?;
        let relationships = load_relationships(&package, WORKBOOK_RELATIONSHIPS_PART)?;
        let (sheet_paths, is_1904) = load_workbook(&package, &relationships)?;
        if sheet_paths.is_empty() {
            Err(SpreadsheetError::EmptyWorkbook)?
        }

        let shared_strings = load_shared_strings(&package)?;
        let styles = Styles::parse(package.text(STYLES_PART)?.map(str::to_owned))?;
        let context = ValueContext {
            shared_strings: &shared_strings,
            styles: &styles,
            is_1904,
        };

        let mut sheets = Vec::with_capacity(sheet_paths.len());
        for (name, path) in sheet_paths {
            let xml = package
                .text(&path)?
                .ok_or_else(|| SpreadsheetError::FileError(path.to_owned()))?;
            let worksheet = Worksheet::parse(&name, xml, &context).with_prefix(&name)?;
            debug!("Loaded sheet '{}' from {} ({} rows)", name, path, worksheet.last_row());
            sheets.push(SheetEntry { path, worksheet });
        }

        Ok(Workbook {
            package,
            sheets,
            styles,
        })
    }

    /// Sheet names in workbook order
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|entry| entry.worksheet.name()).collect()
    }

    pub fn worksheets(&self) -> impl Iterator<Item = &Worksheet> {
        self.sheets.iter().map(|entry| &entry.worksheet)
    }

    pub fn worksheet(&self, name: &str) -> Result<&Worksheet, SpreadsheetError> {
        self.sheets
            .iter()
            .find(|entry| entry.worksheet.name() == name)
            .map(|entry| &entry.worksheet)
            .ok_or_else(|| SpreadsheetError::SheetNotFound(name.to_owned()))
    }

    pub fn worksheet_mut(&mut self, name: &str) -> Result<&mut Worksheet, SpreadsheetError> {
        self.sheet_and_styles_mut(name).map(|(worksheet, _)| worksheet)
    }

    pub(crate) fn sheet_and_styles_mut(&mut self, name: &str) -> Result<(&mut Worksheet, &mut Styles), SpreadsheetError> {
        let entry = self
            .sheets
            .iter_mut()
            .find(|entry| entry.worksheet.name() == name)
            .ok_or_else(|| SpreadsheetError::SheetNotFound(name.to_owned()))?;
        Ok((&mut entry.worksheet, &mut self.styles))
    }

    /// Writes the workbook to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<(), InvoiceSheetError> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)
            .map_err(InvoiceSheetError::from)
            .with_prefix(&path.display().to_string())
    }

    /// Serializes the workbook as xlsx bytes.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, InvoiceSheetError> {
        let mut rows_shifted = false;
        for entry in &self.sheets {
            if entry.worksheet.is_modified() {
                self.package.put(&entry.path, entry.worksheet.to_xml().into_bytes());
            }
            rows_shifted |= entry.worksheet.rows_shifted();
        }
        if self.styles.is_dirty() {
            if let Some(xml) = self.styles.to_xml() {
                self.package.put(STYLES_PART, xml.as_bytes().to_vec());
            }
        }
        if rows_shifted {
            drop_calculation_chain(&mut self.package)?;
        }
        Ok(self.package.write(Cursor::new(Vec::new()))?.into_inner())
    }
}

/// Removes the cached calculation order so it is rebuilt on next open;
/// cell addresses recorded there are stale once rows move.
fn drop_calculation_chain(package: &mut Package) -> Result<(), InvoiceSheetError> {
    if !package.remove(CALCULATION_CHAIN_PART) {
        return Ok(());
    }
    let content_type = Regex::new(r#"<Override\b[^>]*?PartName="/xl/calcChain\.xml"[^>]*?/>"#)?;
    if let Some(xml) = package.text(CONTENT_TYPES_PART)? {
        let updated = content_type.replace_all(xml, "").into_owned();
        package.put(CONTENT_TYPES_PART, updated.into_bytes());
    }
    let relationship = Regex::new(r#"<Relationship\b[^>]*?Target="[^"]*calcChain\.xml"[^>]*?/>"#)?;
    if let Some(xml) = package.text(WORKBOOK_RELATIONSHIPS_PART)? {
        let updated = relationship.replace_all(xml, "").into_owned();
        package.put(WORKBOOK_RELATIONSHIPS_PART, updated.into_bytes());
    }
    debug!("Dropped {}", CALCULATION_CHAIN_PART);
    Ok(())
}

/// Loads worksheet relationships, mapping relationship ids to part paths.
fn load_relationships(package: &Package, path: &str) -> Result<HashMap<String, String>, InvoiceSheetError> {
    let xml = package
        .text(path)?
        .ok_or_else(|| SpreadsheetError::FileError(path.to_owned()))?;
    let mut reader = XmlReader::from_str(xml);
    let mut relationships = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Reads the sheet list (name, part path) and the date system from `xl/workbook.xml`.
fn load_workbook(package: &Package, relationships: &HashMap<String, String>) -> Result<(Vec<(String, String)>, bool), InvoiceSheetError> {
    let xml = package
        .text(WORKBOOK_PART)?
        .ok_or_else(|| SpreadsheetError::FileError(WORKBOOK_PART.to_owned()))?;
    let mut reader = XmlReader::from_str(xml);
    let mut sheets = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                let key = attribute.key.local_name();
                if key.as_ref() == b"name" {
                    name = Some(attribute.get_value()?);
                } else if key.as_ref() == b"id" {
                    id = Some(attribute.get_value()?);
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(&*id) {
                    sheets.push((name.to_string(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.get_attribute_value("date1904")?
                .map(|value| value.eq("1") || value.eq("true"))
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

fn load_shared_strings(package: &Package) -> Result<Vec<String>, InvoiceSheetError> {
    let Some(xml) = package.text(SHARED_STRINGS_PART)? else {
        return Ok(Vec::new());
    };
    let mut reader = XmlReader::from_str(xml);
    let mut shared_strings = Vec::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
            shared_strings.push(read_string_value(&mut reader, TAG_SHARED_STRING_ITEM)?);
        }
    });
    Ok(shared_strings)
}

/// Collects the text runs of a string item up to `end_tag`, skipping phonetic hints.
fn read_string_value<R: BufRead>(reader: &mut XmlReader<R>, end_tag: QName) -> Result<String, InvoiceSheetError> {
    let mut is_phonetic_text = false;
    let mut is_text = false;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => text.push_str(&event.xml_content()?),
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}

/// Resolves a relationship target relative to the `xl/` folder.
fn to_zip_path(path: Cow<'_, str>) -> String {
    if let Some(absolute) = path.strip_prefix('/') {
        absolute.to_owned()
    } else if path.starts_with("xl/") {
        path.to_string()
    } else {
        format!("xl/{path}")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::helpers::zip::tests::zip_bytes;
    use crate::spreadsheet::worksheet::tests::SHEET;
    use crate::spreadsheet::worksheet::tests::STYLES;

    pub(crate) const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/></Types>"#;

    pub(crate) const RELATIONSHIPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/></Relationships>"#;

    pub(crate) const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><workbookPr/><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/><sheet name="装箱单" sheetId="2" r:id="rId2"/></sheets></workbook>"#;

    pub(crate) const SHARED_STRINGS: &str = r#"<sst count="2" uniqueCount="2"><si><t>PO</t><rPh sb="0" eb="1"><t>ピーオー</t></rPh></si><si><r><t>TOT</t></r><r><t>AL</t></r></si></sst>"#;

    const SECOND_SHEET: &str = r#"<worksheet><sheetData><row r="2"><c r="A2" t="inlineStr"><is><t>item</t></is></c></row></sheetData></worksheet>"#;

    /// A two-sheet workbook: "Sheet1" is the worksheet test fixture.
    pub(crate) fn sample_workbook_bytes() -> Vec<u8> {
        zip_bytes(&[
            ("[Content_Types].xml", CONTENT_TYPES),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", RELATIONSHIPS),
            ("xl/sharedStrings.xml", SHARED_STRINGS),
            ("xl/styles.xml", STYLES),
            ("xl/worksheets/sheet1.xml", SHEET),
            ("xl/worksheets/sheet2.xml", SECOND_SHEET),
            ("xl/calcChain.xml", r#"<calcChain><c r="B5" i="1"/></calcChain>"#),
        ])
    }

    #[test]
    fn opens_sheets_in_workbook_order() {
        let workbook = Workbook::from_bytes(&sample_workbook_bytes()).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Sheet1", "装箱单"]);
        let sheet = workbook.worksheet("Sheet1").unwrap();
        assert_eq!(sheet.value(1, 1).unwrap(), &CellValue::from("PO"));
        assert_eq!(sheet.value(20, 2).unwrap(), &CellValue::from("TOTAL"));
        assert_eq!(workbook.worksheet("装箱单").unwrap().value(2, 1).unwrap(), &CellValue::from("item"));
        assert!(matches!(workbook.worksheet("Missing"), Err(SpreadsheetError::SheetNotFound(_))));
    }

    #[test]
    fn saving_shifted_rows_drops_calculation_chain() {
        let mut workbook = Workbook::from_bytes(&sample_workbook_bytes()).unwrap();
        workbook.worksheet_mut("Sheet1").unwrap().insert_rows(16, 10);
        let bytes = workbook.to_bytes().unwrap();

        let package = Package::read(Cursor::new(bytes.clone())).unwrap();
        assert!(package.get(CALCULATION_CHAIN_PART).is_none());
        assert!(!package.text(CONTENT_TYPES_PART).unwrap().unwrap().contains("calcChain"));
        assert!(!package.text(WORKBOOK_RELATIONSHIPS_PART).unwrap().unwrap().contains("calcChain"));
        assert_eq!(package.text("xl/worksheets/sheet2.xml").unwrap(), Some(SECOND_SHEET));

        let reopened = Workbook::from_bytes(&bytes).unwrap();
        let sheet = reopened.worksheet("Sheet1").unwrap();
        assert_eq!(sheet.value(30, 2).unwrap(), &CellValue::from("TOTAL"));
        assert_eq!(sheet.merged_ranges(), &[CellRange::new(30, 2, 30, 4)]);
    }

    #[test]
    fn untouched_workbook_keeps_calculation_chain() {
        let mut workbook = Workbook::from_bytes(&sample_workbook_bytes()).unwrap();
        let bytes = workbook.to_bytes().unwrap();
        let package = Package::read(Cursor::new(bytes)).unwrap();
        assert!(package.get(CALCULATION_CHAIN_PART).is_some());
        assert_eq!(package.text("xl/worksheets/sheet1.xml").unwrap(), Some(SHEET));
    }

    #[test]
    fn relationship_targets_resolve_under_xl() {
        assert_eq!(to_zip_path(Cow::Borrowed("worksheets/sheet1.xml")), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path(Cow::Borrowed("/xl/worksheets/sheet1.xml")), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path(Cow::Borrowed("xl/worksheets/sheet1.xml")), "xl/worksheets/sheet1.xml");
    }
}
