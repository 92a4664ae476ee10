//! # Configuration
//!
//! Field catalogs drive header detection; render configurations drive the
//! template writers. Both are plain JSON documents loaded once and shared
//! read-only afterwards.

use crate::error::InvoiceSheetError;
use crate::error::ResultMessage;
use crate::spreadsheet::cell::CellValue;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const DEFAULT_FIELDS: &str = include_str!("../config/default_fields.json");

/// Errors in field or render configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown field '{field}' referenced by {context}")]
    UnknownField { field: String, context: String },

    #[error("Field '{0}' is defined more than once")]
    DuplicateField(String),

    #[error("Invalid search window: {0}")]
    InvalidSearchWindow(String),
}

/// Coarse data type a field accepts in its first data cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoarseType {
    Numeric,
    String,
}

/// An allowed exact data value. Integers and integral floats compare equal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllowedValue {
    Integer(i64),
    Number(f64),
    Text(String),
}

impl AllowedValue {
    /// Compares against a data cell, reading digit-only strings as integers.
    pub fn matches(&self, value: &CellValue) -> bool {
        match self {
            AllowedValue::Integer(expected) => value.as_integer() == Some(*expected),
            AllowedValue::Number(expected) => match value.as_integer() {
                Some(integer) => integer as f64 == *expected,
                None => value.as_number() == Some(*expected),
            },
            AllowedValue::Text(expected) => value.as_integer().is_none() && value.as_text() == Some(expected.as_str()),
        }
    }
}

/// A canonical field as written in the configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldDefinition {
    pub name: String,
    pub aliases: Vec<String>,
    pub allowed_values: Vec<AllowedValue>,
    pub patterns: Vec<String>,
    pub types: Vec<CoarseType>,
}

/// Data patterns that identify a column carrying no header text.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderlessRule {
    pub field: String,
    pub patterns: Vec<String>,
}

/// Rows and columns scanned for the header row, bounds inclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWindow {
    pub first_row: u32,
    pub last_row: u32,
    pub first_column: u32,
    pub last_column: u32,
}

impl Default for SearchWindow {
    fn default() -> Self {
        SearchWindow {
            first_row: 1,
            last_row: 30,
            first_column: 1,
            last_column: 26,
        }
    }
}

/// Lump-sum spreading settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub fields: Vec<String>,
    pub basis: String,
    pub precision: u32,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        DistributionConfig {
            fields: vec!["net".to_owned(), "gross".to_owned(), "cbm".to_owned()],
            basis: "pcs".to_owned(),
            precision: 4,
        }
    }
}

/// Header detection and table extraction settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub fields: Vec<FieldDefinition>,
    pub headerless: Vec<HeaderlessRule>,
    pub search: SearchWindow,
    /// Identifies the header rows of further stacked tables
    pub table_pattern: Option<String>,
    pub stop_field: String,
    pub max_data_rows: u32,
    /// Glob patterns of sheet names to parse; empty accepts every sheet
    pub sheets: Vec<String>,
    pub distribution: Option<DistributionConfig>,
}

impl Default for FieldConfig {
    fn default() -> Self {
        FieldConfig {
            fields: Vec::new(),
            headerless: Vec::new(),
            search: SearchWindow::default(),
            table_pattern: None,
            stop_field: "item".to_owned(),
            max_data_rows: 1000,
            sheets: Vec::new(),
            distribution: None,
        }
    }
}

impl FieldConfig {
    pub fn from_json(json: &str) -> Result<FieldConfig, InvoiceSheetError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<FieldConfig, InvoiceSheetError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(InvoiceSheetError::from).with_prefix(&name)?;
        FieldConfig::from_json(&json).with_prefix(&name)
    }

    /// The built-in catalog for JF, MOTO and 2nd-layer shipping sheets.
    pub fn builtin() -> Result<FieldConfig, InvoiceSheetError> {
        FieldConfig::from_json(DEFAULT_FIELDS)
    }
}

/// A field with its patterns compiled.
#[derive(Debug)]
pub struct CompiledField {
    pub name: String,
    pub allowed_values: Vec<AllowedValue>,
    /// `None` when the field configures no patterns; patterns that failed
    /// to compile are absent from the list.
    pub patterns: Option<Vec<Regex>>,
    pub types: Vec<CoarseType>,
}

#[derive(Debug)]
pub struct CompiledHeaderless {
    pub field: usize,
    pub patterns: Vec<Regex>,
}

/// Immutable lookup structure built from a `FieldConfig`.
#[derive(Debug)]
pub struct FieldCatalog {
    config: FieldConfig,
    fields: Vec<CompiledField>,
    aliases: HashMap<String, Vec<usize>>,
    headerless: Vec<CompiledHeaderless>,
}

impl FieldCatalog {
    pub fn new(config: FieldConfig) -> Result<FieldCatalog, InvoiceSheetError> {
        let search = &config.search;
        if search.first_row == 0 || search.first_column == 0 || search.first_row > search.last_row || search.first_column > search.last_column {
            Err(ConfigError::InvalidSearchWindow(format!("{:?}", search)))?
        }

        let mut names = HashSet::new();
        let mut fields = Vec::with_capacity(config.fields.len());
        let mut aliases = HashMap::<String, Vec<usize>>::new();
        for (index, definition) in config.fields.iter().enumerate() {
            if !names.insert(definition.name.as_str()) {
                Err(ConfigError::DuplicateField(definition.name.to_owned()))?
            }
            for alias in &definition.aliases {
                let entry = aliases.entry(normalize_header(alias)).or_default();
                if !entry.contains(&index) {
                    entry.push(index);
                }
            }
            let patterns = (!definition.patterns.is_empty()).then(|| compile_patterns(&definition.name, &definition.patterns));
            let types = if definition.types.is_empty() {
                vec![CoarseType::Numeric, CoarseType::String]
            } else {
                definition.types.clone()
            };
            fields.push(CompiledField {
                name: definition.name.to_owned(),
                allowed_values: definition.allowed_values.clone(),
                patterns,
                types,
            });
        }

        let field_index = |field: &str, context: &str| {
            fields
                .iter()
                .position(|compiled| compiled.name == field)
                .ok_or_else(|| ConfigError::UnknownField {
                    field: field.to_owned(),
                    context: context.to_owned(),
                })
        };
        let mut headerless = Vec::with_capacity(config.headerless.len());
        for rule in &config.headerless {
            headerless.push(CompiledHeaderless {
                field: field_index(&rule.field, "headerless rule")?,
                patterns: compile_patterns(&rule.field, &rule.patterns),
            });
        }
        if !config.fields.is_empty() {
            field_index(&config.stop_field, "stop_field")?;
        }

        Ok(FieldCatalog {
            config,
            fields,
            aliases,
            headerless,
        })
    }

    pub fn builtin() -> Result<FieldCatalog, InvoiceSheetError> {
        FieldCatalog::new(FieldConfig::builtin()?)
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> &CompiledField {
        &self.fields[index]
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Fields whose aliases equal the header text, case-insensitively.
    pub fn lookup(&self, header: &str) -> &[usize] {
        self.aliases
            .get(&normalize_header(header))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn headerless(&self) -> &[CompiledHeaderless] {
        &self.headerless
    }
}

fn normalize_header(text: &str) -> String {
    text.trim().to_uppercase()
}

/// Compiles each pattern anchored at the start of the text. A malformed
/// pattern is logged and left out.
fn compile_patterns(field: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(&format!("^(?:{pattern})")) {
            Ok(regex) => Some(regex),
            Err(error) => {
                warn!("Skipping pattern '{}' of field '{}': {}", pattern, field, error);
                None
            }
        })
        .collect()
}

/// Which writer a template sheet uses.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    Summary,
    PackingList,
}

/// One cell of the two-row header block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeaderCell {
    /// 0 for the first header row, 1 for the second
    #[serde(default)]
    pub row: u32,
    pub column: u32,
    pub text: String,
    /// Column id data mappings refer to
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "one")]
    pub rowspan: u32,
    #[serde(default = "one")]
    pub colspan: u32,
}

fn one() -> u32 {
    1
}

/// Fixed values written down a column, one per data row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticColumn {
    pub id: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FooterConfig {
    pub label: String,
    /// Column id receiving the label; the leftmost header column when absent
    pub label_column: Option<String>,
    /// Data field counted as pallets
    pub pallet_field: String,
    /// Column id receiving the pallet total; the column mapped to `pallet_field` when absent
    pub pallet_column: Option<String>,
    pub pallet_suffix: String,
    /// Column ids whose data is summed in the footer
    pub sum_columns: Vec<String>,
    pub grand_total_label: String,
}

impl Default for FooterConfig {
    fn default() -> Self {
        FooterConfig {
            label: "TOTAL:".to_owned(),
            label_column: None,
            pallet_field: "pallet_count".to_owned(),
            pallet_column: None,
            pallet_suffix: " PALLETS".to_owned(),
            sum_columns: Vec::new(),
            grand_total_label: "GRAND TOTAL:".to_owned(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowHeights {
    pub header: Option<f64>,
    pub data: Option<f64>,
    pub footer: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub keys: Vec<String>,
    pub sums: Vec<String>,
}

/// Layout of the block written into a template sheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub header_cells: Vec<HeaderCell>,
    /// Column id to data field
    pub mappings: BTreeMap<String, String>,
    pub static_column: Option<StaticColumn>,
    /// Column ids merged vertically across each data block
    pub vertical_merges: Vec<String>,
    pub footer: FooterConfig,
    pub row_heights: RowHeights,
    /// Column width keyed by header display text
    pub column_widths: BTreeMap<String, f64>,
    pub aggregate: Option<AggregateConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SheetRenderConfig {
    pub kind: SheetKind,
    pub start_row: u32,
    #[serde(default)]
    pub layout: Layout,
}

/// Rectangle searched when relocating merges, bounds inclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreArea {
    pub first_row: u32,
    pub last_row: u32,
    pub first_column: u32,
    pub last_column: u32,
}

impl Default for RestoreArea {
    fn default() -> Self {
        RestoreArea {
            first_row: 16,
            last_row: 200,
            first_column: 1,
            last_column: 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Per sheet settings keyed by sheet name
    pub sheets: BTreeMap<String, SheetRenderConfig>,
    /// First row whose merges are captured and restored
    pub merge_boundary: u32,
    pub restore_area: RestoreArea,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            sheets: BTreeMap::new(),
            merge_boundary: 16,
            restore_area: RestoreArea::default(),
        }
    }
}

impl RenderConfig {
    pub fn from_json(json: &str) -> Result<RenderConfig, InvoiceSheetError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<RenderConfig, InvoiceSheetError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(InvoiceSheetError::from).with_prefix(&name)?;
        RenderConfig::from_json(&json).with_prefix(&name)
    }
}
