use crate::error::InvoiceSheetError;
use crate::helpers::xml::escape_text;
use crate::helpers::xml::get_attribute;
use crate::helpers::xml::render_attributes;
use crate::helpers::xml::set_attribute;
use crate::helpers::xml::XmlError;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::serial_to_datetime;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::grid::SheetGrid;
use crate::spreadsheet::grid::EMPTY;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::reference::cell_reference;
use crate::spreadsheet::reference::parse_reference;
use crate::spreadsheet::styles::Styles;
use crate::spreadsheet::SpreadsheetError;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::name::QName;
use regex::Captures;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::warn;

const TAG_COLUMN: QName = QName(b"col");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_FORMULA: QName = QName(b"f");
const TAG_VALUE: QName = QName(b"v");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");
const TAG_TEXT: QName = QName(b"t");
const TAG_MERGE_CELL: QName = QName(b"mergeCell");

/// Worksheet children that the schema places after `<mergeCells>`.
const AFTER_MERGE_CELLS: &[&str] = &[
    "phoneticPr",
    "conditionalFormatting",
    "dataValidations",
    "hyperlinks",
    "printOptions",
    "pageMargins",
    "pageSetup",
    "headerFooter",
    "rowBreaks",
    "colBreaks",
    "customProperties",
    "cellWatches",
    "ignoredErrors",
    "smartTags",
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "drawingHF",
    "picture",
    "oleObjects",
    "controls",
    "webPublishItems",
    "tableParts",
    "extLst",
];

/// Workbook-level data needed to decode cell values.
pub(crate) struct ValueContext<'a> {
    pub(crate) shared_strings: &'a [String],
    pub(crate) styles: &'a Styles,
    pub(crate) is_1904: bool,
}

#[derive(Clone, Debug, Default)]
struct Formula {
    attributes: Vec<(String, String)>,
    text: String,
}

#[derive(Clone, Debug, Default)]
struct Cell {
    style: Option<u32>,
    /// Raw `t` attribute as read
    kind: Option<String>,
    /// Raw `<v>` text as read; written back verbatim until the cell is edited
    raw: Option<String>,
    formula: Option<Formula>,
    attributes: Vec<(String, String)>,
    value: CellValue,
    broken: Option<String>,
    edited: bool,
}

#[derive(Clone, Debug, Default)]
struct Row {
    attributes: Vec<(String, String)>,
    cells: BTreeMap<u32, Cell>,
}

#[derive(Clone, Debug)]
struct ColumnSpec {
    min: u32,
    max: u32,
    attributes: Vec<(String, String)>,
}

/// One editable worksheet part.
///
/// Only `<cols>`, `<sheetData>` and `<mergeCells>` are modelled; the text
/// around them is kept as read and written back unchanged, apart from
/// `<dimension>` and range attributes that follow inserted rows.
#[derive(Clone, Debug)]
pub struct Worksheet {
    name: String,
    head: String,
    cols: Vec<ColumnSpec>,
    rows: BTreeMap<u32, Row>,
    tail_before_merges: String,
    tail_after_merges: String,
    merges: Vec<CellRange>,
    modified: bool,
    rows_shifted: bool,
}

impl Worksheet {
    pub(crate) fn parse(name: &str, xml: &str, context: &ValueContext) -> Result<Worksheet, InvoiceSheetError> {
        let missing = |tag: &str| XmlError::MissingElement(tag.to_owned(), name.to_owned());
        let data_start = find_tag(xml, "sheetData").ok_or_else(|| missing("sheetData"))?;
        let data_end = element_end(xml, data_start, "sheetData").ok_or_else(|| missing("sheetData"))?;

        let before_data = &xml[..data_start];
        let (head, cols) = match find_tag(before_data, "cols") {
            Some(start) => {
                let end = element_end(before_data, start, "cols").ok_or_else(|| missing("cols"))?;
                let head = format!("{}{}", &before_data[..start], &before_data[end..]);
                (head, load_columns(&before_data[start..end])?)
            }
            None => (before_data.to_owned(), Vec::new()),
        };

        let rows = load_rows(&xml[data_start..data_end], context)?;

        let tail = &xml[data_end..];
        let (tail_before_merges, merges, tail_after_merges) = match find_tag(tail, "mergeCells") {
            Some(start) => {
                let end = element_end(tail, start, "mergeCells").ok_or_else(|| missing("mergeCells"))?;
                (tail[..start].to_owned(), load_merges(&tail[start..end])?, tail[end..].to_owned())
            }
            None => {
                let split = AFTER_MERGE_CELLS
                    .iter()
                    .filter_map(|tag| find_tag(tail, tag))
                    .min()
                    .or_else(|| tail.rfind("</worksheet>"))
                    .unwrap_or(tail.len());
                (tail[..split].to_owned(), Vec::new(), tail[split..].to_owned())
            }
        };

        Ok(Worksheet {
            name: name.to_owned(),
            head,
            cols,
            rows,
            tail_before_merges,
            tail_after_merges,
            merges,
            modified: false,
            rows_shifted: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn rows_shifted(&self) -> bool {
        self.rows_shifted
    }

    fn cell(&self, row: u32, column: u32) -> Option<&Cell> {
        self.rows.get(&row).and_then(|data| data.cells.get(&column))
    }

    /// Decoded value of a cell; missing cells read as `CellValue::Empty`.
    pub fn value(&self, row: u32, column: u32) -> Result<&CellValue, SpreadsheetError> {
        match self.cell(row, column) {
            Some(Cell { broken: Some(message), .. }) => Err(SpreadsheetError::InvalidCellValue {
                position: format!("{}!{}", self.name, cell_reference(row, column)),
                message: message.to_owned(),
            }),
            Some(cell) => Ok(&cell.value),
            None => Ok(&EMPTY),
        }
    }

    /// Overwrites a cell value, dropping any formula. The cell keeps its style.
    pub fn set_value(&mut self, row: u32, column: u32, value: impl Into<CellValue>) {
        let value = value.into();
        if value == CellValue::Empty && self.cell(row, column).is_none() {
            return;
        }
        let cell = self.rows.entry(row).or_default().cells.entry(column).or_default();
        cell.value = value;
        cell.kind = None;
        cell.raw = None;
        cell.formula = None;
        cell.broken = None;
        cell.edited = true;
        self.modified = true;
    }

    pub fn style(&self, row: u32, column: u32) -> Option<u32> {
        self.cell(row, column).and_then(|cell| cell.style)
    }

    pub fn set_style(&mut self, row: u32, column: u32, style: Option<u32>) {
        let cell = self.rows.entry(row).or_default().cells.entry(column).or_default();
        cell.style = style;
        self.modified = true;
    }

    /// Custom height of a row, `None` when the row uses the default height.
    pub fn row_height(&self, row: u32) -> Result<Option<f64>, SpreadsheetError> {
        let Some(height) = self.rows.get(&row).and_then(|data| get_attribute(&data.attributes, "ht")) else {
            return Ok(None);
        };
        height
            .parse::<f64>()
            .map(Some)
            .map_err(|_| SpreadsheetError::InvalidRowHeight { row, value: height.to_owned() })
    }

    pub fn set_row_height(&mut self, row: u32, height: Option<f64>) {
        let attributes = &mut self.rows.entry(row).or_default().attributes;
        match height {
            Some(height) => {
                set_attribute(attributes, "ht", height.to_string());
                set_attribute(attributes, "customHeight", "1".to_owned());
            }
            None => attributes.retain(|(key, _)| key != "ht" && key != "customHeight"),
        }
        self.modified = true;
    }

    pub fn column_width(&self, column: u32) -> Option<f64> {
        self.cols
            .iter()
            .find(|spec| spec.min <= column && column <= spec.max)
            .and_then(|spec| get_attribute(&spec.attributes, "width"))
            .and_then(|width| width.parse::<f64>().ok())
    }

    /// Sets one column's width, splitting a `<col>` span that covers it.
    pub fn set_column_width(&mut self, column: u32, width: f64) {
        let mut target = ColumnSpec { min: column, max: column, attributes: Vec::new() };
        match self.cols.iter().position(|spec| spec.min <= column && column <= spec.max) {
            Some(index) => {
                let spec = self.cols.remove(index);
                let mut pieces = Vec::with_capacity(3);
                if spec.min < column {
                    pieces.push(ColumnSpec { min: spec.min, max: column - 1, attributes: spec.attributes.clone() });
                }
                target.attributes = spec.attributes.clone();
                set_attribute(&mut target.attributes, "width", width.to_string());
                set_attribute(&mut target.attributes, "customWidth", "1".to_owned());
                pieces.push(target);
                if column < spec.max {
                    pieces.push(ColumnSpec { min: column + 1, max: spec.max, attributes: spec.attributes });
                }
                self.cols.splice(index..index, pieces);
            }
            None => {
                set_attribute(&mut target.attributes, "width", width.to_string());
                set_attribute(&mut target.attributes, "customWidth", "1".to_owned());
                let index = self.cols.partition_point(|spec| spec.max < column);
                self.cols.insert(index, target);
            }
        }
        self.modified = true;
    }

    /// Merged ranges in worksheet order.
    pub fn merged_ranges(&self) -> &[CellRange] {
        &self.merges
    }

    pub fn merge(&mut self, range: CellRange) -> Result<(), SpreadsheetError> {
        if range.is_single_cell() {
            Err(SpreadsheetError::InvalidMerge(range.to_string()))?
        }
        if let Some(existing) = self.merges.iter().find(|merged| merged.overlaps(&range)) {
            Err(SpreadsheetError::MergeConflict {
                range: range.to_string(),
                existing: existing.to_string(),
            })?
        }
        self.merges.push(range);
        self.modified = true;
        Ok(())
    }

    /// Removes an exact merged range, returning whether it existed.
    pub fn unmerge(&mut self, range: &CellRange) -> bool {
        let before = self.merges.len();
        self.merges.retain(|merged| merged != range);
        self.modified |= before != self.merges.len();
        before != self.merges.len()
    }

    /// Removes every merged range touching `range` and returns them.
    pub fn unmerge_overlapping(&mut self, range: &CellRange) -> Vec<CellRange> {
        let (removed, kept): (Vec<CellRange>, Vec<CellRange>) = self.merges.iter().partition(|merged| merged.overlaps(range));
        self.merges = kept;
        self.modified |= !removed.is_empty();
        removed
    }

    /// Inserts `count` blank rows before row `at`, moving everything at or
    /// below it down together with the references that point there.
    pub fn insert_rows(&mut self, at: u32, count: u32) {
        if count == 0 {
            return;
        }
        let moved = self.rows.split_off(&at);
        for (row, data) in moved {
            self.rows.insert(row + count, data);
        }
        for data in self.rows.values_mut() {
            for cell in data.cells.values_mut() {
                if let Some(formula) = &mut cell.formula {
                    formula.text = shift_formula_rows(&formula.text, at, count);
                    if let Some(reference) = get_attribute(&formula.attributes, "ref") {
                        let shifted = shift_reference_list(reference, at, count);
                        set_attribute(&mut formula.attributes, "ref", shifted);
                    }
                }
            }
        }
        self.merges = self.merges.iter().map(|range| range.shift_rows(at, count)).collect();
        self.tail_before_merges = shift_range_attributes(&self.tail_before_merges, at, count);
        self.tail_after_merges = shift_range_attributes(&self.tail_after_merges, at, count);
        self.modified = true;
        self.rows_shifted = true;
    }

    pub fn last_row(&self) -> u32 {
        self.rows
            .iter()
            .rev()
            .find(|(_, data)| !data.cells.is_empty())
            .map(|(row, _)| *row)
            .unwrap_or(0)
    }

    pub fn last_column(&self) -> u32 {
        self.rows
            .values()
            .filter_map(|data| data.cells.keys().next_back())
            .max()
            .copied()
            .unwrap_or(0)
    }

    fn first_column(&self) -> u32 {
        self.rows
            .values()
            .filter_map(|data| data.cells.keys().next())
            .min()
            .copied()
            .unwrap_or(0)
    }

    fn dimension(&self) -> Option<CellRange> {
        let first_row = self.rows.iter().find(|(_, data)| !data.cells.is_empty())?.0;
        Some(CellRange::new(*first_row, self.first_column(), self.last_row(), self.last_column()))
    }

    pub(crate) fn to_xml(&self) -> String {
        static DIMENSION: OnceLock<Regex> = OnceLock::new();
        let dimension = DIMENSION.get_or_init(|| Regex::new(r"<dimension\b[^>]*?/>").expect("Hardcode regex pattern"));

        let mut xml = String::with_capacity(self.head.len() + self.rows.len() * 256);
        match self.dimension() {
            Some(range) => xml.push_str(&dimension.replace(&self.head, format!(r#"<dimension ref="{range}"/>"#))),
            None => xml.push_str(&self.head),
        }

        if !self.cols.is_empty() {
            xml.push_str("<cols>");
            for spec in &self.cols {
                xml.push_str(&format!(r#"<col min="{}" max="{}"{}/>"#, spec.min, spec.max, render_attributes(&spec.attributes)));
            }
            xml.push_str("</cols>");
        }

        xml.push_str("<sheetData>");
        for (row, data) in &self.rows {
            if data.cells.is_empty() && data.attributes.is_empty() {
                continue;
            }
            xml.push_str(&format!(r#"<row r="{}"{}>"#, row, render_attributes(&data.attributes)));
            for (column, cell) in &data.cells {
                write_cell(&mut xml, *row, *column, cell);
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData>");

        xml.push_str(&self.tail_before_merges);
        if !self.merges.is_empty() {
            xml.push_str(&format!(r#"<mergeCells count="{}">"#, self.merges.len()));
            for range in &self.merges {
                xml.push_str(&format!(r#"<mergeCell ref="{range}"/>"#));
            }
            xml.push_str("</mergeCells>");
        }
        xml.push_str(&self.tail_after_merges);
        xml
    }
}

impl SheetGrid for Worksheet {
    fn value(&self, row: u32, column: u32) -> Result<&CellValue, SpreadsheetError> {
        Worksheet::value(self, row, column)
    }

    fn last_row(&self) -> u32 {
        Worksheet::last_row(self)
    }

    fn last_column(&self) -> u32 {
        Worksheet::last_column(self)
    }
}

fn write_cell(xml: &mut String, row: u32, column: u32, cell: &Cell) {
    let mut attributes = vec![("r".to_owned(), cell_reference(row, column))];
    if let Some(style) = cell.style {
        attributes.push(("s".to_owned(), style.to_string()));
    }

    let mut body = String::new();
    let stored = !cell.edited && (cell.raw.is_some() || cell.formula.is_some());
    let kind = if stored {
        // Formulas without a cached value are left for the application to calculate
        if let Some(formula) = &cell.formula {
            body.push_str(&format!("<f{}>{}</f>", render_attributes(&formula.attributes), escape_text(&formula.text)));
        }
        if let Some(raw) = &cell.raw {
            body.push_str(&format!("<v>{}</v>", escape_text(raw)));
        }
        cell.kind.as_deref()
    } else {
        match &cell.value {
            CellValue::Empty => None,
            CellValue::Number(_) => {
                body.push_str(&format!("<v>{}</v>", cell.value));
                None
            }
            CellValue::Bool(value) => {
                body.push_str(if *value { "<v>1</v>" } else { "<v>0</v>" });
                Some("b")
            }
            CellValue::Error(value) => {
                body.push_str(&format!("<v>{}</v>", escape_text(value)));
                Some("e")
            }
            CellValue::Text(_) | CellValue::DateTime(_) => {
                let text = cell.value.to_string();
                body.push_str(&format!(r#"<is><t xml:space="preserve">{}</t></is>"#, escape_text(&text)));
                Some("inlineStr")
            }
        }
    };
    if let Some(kind) = kind {
        attributes.push(("t".to_owned(), kind.to_owned()));
    }
    attributes.extend(cell.attributes.iter().cloned());

    if body.is_empty() {
        xml.push_str(&format!("<c{}/>", render_attributes(&attributes)));
    } else {
        xml.push_str(&format!("<c{}>{}</c>", render_attributes(&attributes), body));
    }
}

/// Finds the start of the first `<tag` element (not a longer tag name sharing the prefix).
fn find_tag(xml: &str, tag: &str) -> Option<usize> {
    let needle = format!("<{tag}");
    let mut offset = 0;
    while let Some(found) = xml[offset..].find(&needle) {
        let start = offset + found;
        let after = xml[start + needle.len()..].chars().next();
        if matches!(after, Some('>' | '/' | ' ' | '\t' | '\r' | '\n')) {
            return Some(start);
        }
        offset = start + needle.len();
    }
    None
}

/// End offset (exclusive) of the element starting at `start`.
fn element_end(xml: &str, start: usize, tag: &str) -> Option<usize> {
    let open_end = xml[start..].find('>')? + start;
    if xml[..open_end].ends_with('/') {
        return Some(open_end + 1);
    }
    let close = format!("</{tag}>");
    xml[open_end..].find(&close).map(|found| open_end + found + close.len())
}

fn load_columns(xml: &str) -> Result<Vec<ColumnSpec>, InvoiceSheetError> {
    let mut reader = XmlReader::from_str(xml);
    let mut cols = Vec::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_COLUMN => {
            let mut attributes = event.attribute_pairs()?;
            let min = get_attribute(&attributes, "min").map(str::parse::<u32>).transpose()?;
            let max = get_attribute(&attributes, "max").map(str::parse::<u32>).transpose()?;
            attributes.retain(|(key, _)| key != "min" && key != "max");
            if let Some(min) = min {
                cols.push(ColumnSpec { min, max: max.unwrap_or(min), attributes });
            }
        }
    });
    Ok(cols)
}

fn load_merges(xml: &str) -> Result<Vec<CellRange>, InvoiceSheetError> {
    let mut reader = XmlReader::from_str(xml);
    let mut merges = Vec::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_MERGE_CELL => {
            if let Some(reference) = event.get_attribute_value("ref")? {
                match CellRange::try_from(&*reference) {
                    Ok(range) => merges.push(range),
                    Err(error) => warn!("Ignoring merged range: {}", error),
                }
            }
        }
    });
    Ok(merges)
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum TextTarget {
    None,
    Formula,
    Value,
    Inline,
}

struct PendingCell {
    row: u32,
    column: u32,
    cell: Cell,
    inline: Option<String>,
}

impl PendingCell {
    fn buffer(&mut self, target: TextTarget) -> Option<&mut String> {
        match target {
            TextTarget::Formula => self.cell.formula.as_mut().map(|formula| &mut formula.text),
            TextTarget::Value => self.cell.raw.as_mut(),
            TextTarget::Inline => self.inline.as_mut(),
            TextTarget::None => None,
        }
    }
}

fn load_rows(xml: &str, context: &ValueContext) -> Result<BTreeMap<u32, Row>, InvoiceSheetError> {
    let mut rows = BTreeMap::<u32, Row>::new();
    let mut reader = XmlReader::from_str(xml);
    let mut row = 0u32;
    let mut column = 0u32;
    let mut pending = None::<PendingCell>;
    let mut target = TextTarget::None;
    let mut is_inline = false;
    let mut is_phonetic = false;

    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_ROW => {
            let mut attributes = event.attribute_pairs()?;
            row = match get_attribute(&attributes, "r") {
                Some(number) => number.parse::<u32>()?,
                None => row + 1,
            };
            column = 0;
            attributes.retain(|(key, _)| key != "r" && key != "spans");
            rows.entry(row).or_default().attributes = attributes;
        }
        Event::Start(event) if event.name() == TAG_CELL => {
            let mut attributes = event.attribute_pairs()?;
            let (cell_row, cell_column) = get_attribute(&attributes, "r")
                .and_then(parse_reference)
                .unwrap_or((row, column + 1));
            column = cell_column;
            let style = get_attribute(&attributes, "s").map(str::parse::<u32>).transpose()?;
            let kind = get_attribute(&attributes, "t").map(str::to_owned);
            attributes.retain(|(key, _)| !matches!(key.as_str(), "r" | "s" | "t"));
            pending = Some(PendingCell {
                row: cell_row,
                column: cell_column,
                cell: Cell { style, kind, attributes, ..Cell::default() },
                inline: None,
            });
        }
        Event::Start(event) if event.name() == TAG_FORMULA => {
            let attributes = event.attribute_pairs()?;
            if let Some(pending) = &mut pending {
                pending.cell.formula = Some(Formula { attributes, text: String::new() });
                target = TextTarget::Formula;
            }
        }
        Event::Start(event) if event.name() == TAG_VALUE => {
            if let Some(pending) = &mut pending {
                pending.cell.raw = Some(String::new());
                target = TextTarget::Value;
            }
        }
        Event::Start(event) if event.name() == TAG_INLINE_STRING => {
            if let Some(pending) = &mut pending {
                pending.inline = Some(String::new());
                is_inline = true;
            }
        }
        Event::End(event) if event.name() == TAG_INLINE_STRING => is_inline = false,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic = false,
        Event::Start(event) if is_inline && !is_phonetic && event.name() == TAG_TEXT => target = TextTarget::Inline,
        Event::End(event) if event.name() == TAG_FORMULA || event.name() == TAG_VALUE || event.name() == TAG_TEXT => {
            target = TextTarget::None;
        }
        Event::Text(event) if target != TextTarget::None => {
            if let Some(buffer) = pending.as_mut().and_then(|pending| pending.buffer(target)) {
                buffer.push_str(&event.xml_content()?);
            }
        }
        Event::CData(event) if target != TextTarget::None => {
            if let Some(buffer) = pending.as_mut().and_then(|pending| pending.buffer(target)) {
                buffer.push_str(&event.xml_content()?);
            }
        }
        Event::GeneralRef(event) if target != TextTarget::None => {
            if let Some(buffer) = pending.as_mut().and_then(|pending| pending.buffer(target)) {
                buffer.push_bytes_ref(&event)?;
            }
        }
        Event::End(event) if event.name() == TAG_CELL => {
            if let Some(PendingCell { row, column, mut cell, inline }) = pending.take() {
                match decode_value(&cell, inline, context) {
                    Ok(value) => cell.value = value,
                    Err(message) => cell.broken = Some(message),
                }
                rows.entry(row).or_default().cells.insert(column, cell);
            }
            target = TextTarget::None;
        }
    });
    Ok(rows)
}

/// Decodes a stored cell, or describes why it cannot be read.
fn decode_value(cell: &Cell, inline: Option<String>, context: &ValueContext) -> Result<CellValue, String> {
    if cell.kind.as_deref() == Some("inlineStr") {
        return Ok(inline.map(CellValue::Text).unwrap_or_default());
    }
    let Some(raw) = cell.raw.as_deref() else {
        return Ok(CellValue::Empty);
    };
    match cell.kind.as_deref() {
        Some("s") => {
            let index = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid shared string index '{raw}'"))?;
            context
                .shared_strings
                .get(index)
                .map(|text| CellValue::Text(text.to_owned()))
                .ok_or_else(|| format!("shared string index {index} out of range"))
        }
        Some("str") => Ok(CellValue::Text(raw.to_owned())),
        Some("b") => Ok(CellValue::Bool(raw.trim() == "1" || raw.trim().eq_ignore_ascii_case("true"))),
        Some("e") => Ok(CellValue::Error(raw.to_owned())),
        Some("d") => Ok(NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|date| date.and_hms_opt(0, 0, 0)))
            .map(CellValue::DateTime)
            .unwrap_or_else(|| CellValue::Text(raw.to_owned()))),
        _ if raw.trim().is_empty() => Ok(CellValue::Empty),
        _ => {
            let number = raw
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{raw}'"))?;
            if context.styles.number_kind(cell.style).is_date() {
                if let Some(datetime) = serial_to_datetime(number, context.is_1904) {
                    return Ok(CellValue::DateTime(datetime));
                }
            }
            Ok(CellValue::Number(number))
        }
    }
}

fn is_token_character(character: char) -> bool {
    character.is_alphanumeric() || matches!(character, '_' | '$' | '.')
}

/// Index just past the quote that closes the one at `start` (doubled quotes escape).
fn closing_quote(characters: &[char], start: usize) -> usize {
    let quote = characters[start];
    let mut index = start + 1;
    while index < characters.len() {
        if characters[index] == quote {
            if characters.get(index + 1) == Some(&quote) {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }
    characters.len()
}

/// Rewrites A1 references in a formula for rows inserted at `at`.
/// Function names, string literals, structured references and references
/// qualified with a sheet name are left alone.
pub(crate) fn shift_formula_rows(formula: &str, at: u32, count: u32) -> String {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();
    let reference = REFERENCE.get_or_init(|| Regex::new(r"^(\$?[A-Za-z]{1,3}\$?)(\d+)$").expect("Hardcode regex pattern"));

    let characters: Vec<char> = formula.chars().collect();
    let mut shifted = String::with_capacity(formula.len() + 8);
    let mut index = 0;
    let mut qualified = false;
    while index < characters.len() {
        let character = characters[index];
        if character == '"' || character == '\'' {
            let end = closing_quote(&characters, index);
            shifted.extend(&characters[index..end]);
            index = end;
            qualified = character == '\'' && characters.get(index) == Some(&'!');
        } else if character == '[' {
            let mut depth = 0;
            while index < characters.len() {
                match characters[index] {
                    '[' => depth += 1,
                    ']' => depth -= 1,
                    _ => (),
                }
                shifted.push(characters[index]);
                index += 1;
                if depth == 0 {
                    break;
                }
            }
        } else if is_token_character(character) {
            let start = index;
            while index < characters.len() && is_token_character(characters[index]) {
                index += 1;
            }
            let token: String = characters[start..index].iter().collect();
            let next = characters.get(index).copied();
            if next == Some('!') {
                shifted.push_str(&token);
                qualified = true;
                continue;
            }
            match reference.captures(&token) {
                Some(captures) if !qualified && next != Some('(') => {
                    let row = captures[2].parse::<u32>().unwrap_or(0);
                    let row = if row >= at { row + count } else { row };
                    shifted.push_str(&format!("{}{}", &captures[1], row));
                }
                _ => shifted.push_str(&token),
            }
            qualified = qualified && next == Some(':');
        } else {
            shifted.push(character);
            index += 1;
        }
    }
    shifted
}

/// Shifts a space separated range list such as an `sqref` value.
fn shift_reference_list(list: &str, at: u32, count: u32) -> String {
    list.split_whitespace()
        .map(|token| match CellRange::try_from(token) {
            Ok(range) => range.shift_rows(at, count).to_string(),
            Err(_) => token.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn shift_range_attributes(xml: &str, at: u32, count: u32) -> String {
    static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
    let attribute = ATTRIBUTE.get_or_init(|| Regex::new(r#"\b(sqref|ref)="([^"]*)""#).expect("Hardcode regex pattern"));
    attribute
        .replace_all(xml, |captures: &Captures| {
            format!(r#"{}="{}""#, &captures[1], shift_reference_list(&captures[2], at, count))
        })
        .into_owned()
}
