//! # Header detection and table extraction
//!
//! A sheet is parsed in four steps:
//!
//! 1. [`scorer`] rates every header/data cell pair against the field catalog;
//! 2. [`selector`] picks the best-fit header row inside the search window;
//! 3. [`locator`] finds the header rows of further tables stacked below it;
//! 4. [`extractor`] reads the data rows under each header row.
//!
//! Lump-sum columns are then spread over their rows when the catalog
//! configures a distribution.

pub mod extractor;
pub mod locator;
pub mod scorer;
pub mod selector;

use crate::config::FieldCatalog;
use crate::detect::extractor::RawData;
use crate::detect::extractor::TableExtractor;
use crate::detect::locator::locate_header_rows;
use crate::detect::selector::HeaderMapping;
use crate::detect::selector::HeaderRowSelector;
use crate::distribute::distribute;
use crate::error::InvoiceSheetError;
use crate::error::ResultMessage;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::grid::SheetGrid;
use crate::spreadsheet::grid::EMPTY;
use crate::spreadsheet::reference::cell_reference;
use crate::spreadsheet::Workbook;
use glob::Pattern;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Reads a cell while scanning, treating unreadable cells as empty.
pub(crate) fn read_cell<G: SheetGrid + ?Sized>(grid: &G, row: u32, column: u32) -> &CellValue {
    match grid.value(row, column) {
        Ok(value) => value,
        Err(error) => {
            debug!("Reading {} as empty: {}", cell_reference(row, column), error);
            &EMPTY
        }
    }
}

/// Selects sheets by name.
#[derive(Clone, Debug, Default)]
pub struct SheetFilter {
    /// `None` accepts every sheet
    patterns: Option<Vec<Pattern>>,
}

impl SheetFilter {
    pub fn new(patterns: &[String]) -> Result<SheetFilter, InvoiceSheetError> {
        if patterns.is_empty() {
            return Ok(SheetFilter::default());
        }
        let patterns = patterns
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SheetFilter {
            patterns: Some(patterns),
        })
    }

    /// True when no patterns are given or the name matches any of them.
    pub fn accept(&self, sheet_name: &str) -> bool {
        match &self.patterns {
            Some(patterns) => patterns.iter().any(|pattern| pattern.matches(sheet_name)),
            None => true,
        }
    }
}

/// Everything read from one sheet.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParsedSheet {
    pub header_row: u32,
    /// Field name to column letters
    pub mapping: HeaderMapping,
    pub score: u32,
    pub tables: RawData,
}

/// Runs detection, extraction and distribution over a grid.
pub struct SheetParser<'a> {
    catalog: &'a FieldCatalog,
}

impl<'a> SheetParser<'a> {
    pub fn new(catalog: &'a FieldCatalog) -> SheetParser<'a> {
        SheetParser { catalog }
    }

    /// Returns `Ok(None)` when no row of the search window qualifies as a
    /// header row. Errors only come from reading the data rows.
    pub fn parse<G: SheetGrid + ?Sized>(&self, grid: &G) -> Result<Option<ParsedSheet>, InvoiceSheetError> {
        let config = self.catalog.config();
        let Some(header) = HeaderRowSelector::new(self.catalog).select(grid) else {
            return Ok(None);
        };
        info!(
            "Header row {} maps {} fields with score {}",
            header.row,
            header.mapping.len(),
            header.score
        );

        let mut header_rows = vec![header.row];
        if let Some(pattern) = &config.table_pattern {
            let columns = config.search.first_column..=config.search.last_column;
            header_rows.extend(locate_header_rows(grid, pattern, columns, header.row.saturating_add(1), grid.last_row()));
        }

        let mut tables = TableExtractor::new(&config.stop_field, config.max_data_rows).extract(
            grid,
            &header_rows,
            &header.mapping,
        )?;
        if let Some(distribution) = &config.distribution {
            for table in tables.values_mut() {
                distribute(table, distribution);
            }
        }
        info!("Extracted {} tables", tables.len());

        Ok(Some(ParsedSheet {
            header_row: header.row,
            mapping: header.mapping,
            score: header.score,
            tables,
        }))
    }
}

/// Parses every sheet accepted by the catalog's sheet patterns, keyed by
/// sheet name. Sheets without a header row are logged and left out.
pub fn parse_workbook(workbook: &Workbook, catalog: &FieldCatalog) -> Result<BTreeMap<String, ParsedSheet>, InvoiceSheetError> {
    let filter = SheetFilter::new(&catalog.config().sheets)?;
    let parser = SheetParser::new(catalog);
    let mut sheets = BTreeMap::new();
    for sheet in workbook.worksheets() {
        if !filter.accept(sheet.name()) {
            debug!("Skipping sheet '{}'", sheet.name());
            continue;
        }
        info!("Parsing sheet '{}'", sheet.name());
        match parser.parse(sheet).with_prefix(sheet.name())? {
            Some(parsed) => {
                sheets.insert(sheet.name().to_owned(), parsed);
            }
            None => warn!("No header row found in sheet '{}'", sheet.name()),
        }
    }
    Ok(sheets)
}
