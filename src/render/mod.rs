//! # Template rendering
//!
//! Data is written into a copy of a formatted template. Inserting rows would
//! break the template's merged cells, so every sheet is edited in one fixed
//! sequence:
//!
//! 1. snapshot the single-row merges at or below the merge boundary;
//! 2. unmerge them;
//! 3. insert the blank rows the data needs at the start row;
//! 4. write the header blocks, data rows and footers;
//! 5. restore the snapshot merges by searching for their values.
//!
//! A failure while writing leaves the sheet as it was before the call.

pub mod merges;
pub mod packing_list;
pub mod summary;

use crate::config::Layout;
use crate::config::RenderConfig;
use crate::config::RestoreArea;
use crate::config::SheetKind;
use crate::config::SheetRenderConfig;
use crate::detect::extractor::RawData;
use crate::error::InvoiceSheetError;
use crate::error::ResultMessage;
use crate::render::merges::restore;
use crate::render::merges::snapshot;
use crate::render::merges::unmerge_recorded;
use crate::render::merges::RestoreReport;
use crate::render::packing_list::rows_needed;
use crate::render::packing_list::PackingListWriter;
use crate::render::summary::summary_table;
use crate::spreadsheet::styles::Styles;
use crate::spreadsheet::Workbook;
use crate::spreadsheet::Worksheet;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;
use tracing::warn;

/// Errors in a sheet's render settings
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Start row must be 1 or greater")]
    InvalidStartRow,

    #[error("Column id '{id}' used by {context} is not defined by any header cell")]
    UnknownColumn { id: String, context: String },
}

/// Workbook-wide settings of a render pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderOptions {
    pub merge_boundary: u32,
    pub restore_area: RestoreArea,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for RenderOptions {
    fn from(config: &RenderConfig) -> Self {
        RenderOptions {
            merge_boundary: config.merge_boundary,
            restore_area: config.restore_area,
        }
    }
}

/// What a render pass did to one sheet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderSummary {
    pub rows_inserted: u32,
    pub restore: RestoreReport,
}

/// Renders `raw_data` into one sheet of the workbook.
pub fn render_sheet(
    workbook: &mut Workbook,
    sheet_name: &str,
    config: &SheetRenderConfig,
    raw_data: &RawData,
    options: &RenderOptions,
) -> Result<RenderSummary, InvoiceSheetError> {
    if config.start_row == 0 {
        Err(RenderError::InvalidStartRow)?
    }
    validate_layout(&config.layout)?;

    let tables = match config.kind {
        SheetKind::PackingList => Cow::Borrowed(raw_data),
        SheetKind::Summary => Cow::Owned(summary_table(raw_data, &config.layout)),
    };
    let (sheet, styles) = workbook.sheet_and_styles_mut(sheet_name)?;
    let original = sheet.clone();
    match edit_sheet(sheet, styles, config, &tables, options) {
        Ok(summary) => {
            info!(
                "Rendered sheet '{}': {} rows inserted, {} merges restored, {} failed, {} skipped",
                sheet_name, summary.rows_inserted, summary.restore.restored, summary.restore.failed, summary.restore.skipped
            );
            Ok(summary)
        }
        Err(error) => {
            *sheet = original;
            Err(error)
        }
    }
}

fn edit_sheet(
    sheet: &mut Worksheet,
    styles: &mut Styles,
    config: &SheetRenderConfig,
    tables: &RawData,
    options: &RenderOptions,
) -> Result<RenderSummary, InvoiceSheetError> {
    let rows = rows_needed(tables);
    let records = snapshot(sheet, options.merge_boundary);
    unmerge_recorded(sheet, &records);
    sheet.insert_rows(config.start_row, rows);

    let written = PackingListWriter::new(sheet, styles, &config.layout).write(config.start_row, tables)?;
    if written != rows {
        warn!("Wrote {} rows into {} inserted rows", written, rows);
    }

    let report = restore(sheet, &records, &options.restore_area);
    if report.failed > 0 {
        warn!("{} merges of sheet '{}' could not be restored", report.failed, sheet.name());
    }
    Ok(RenderSummary {
        rows_inserted: rows,
        restore: report,
    })
}

/// Every column id the layout refers to must be declared by a header cell.
fn validate_layout(layout: &Layout) -> Result<(), RenderError> {
    let ids: HashSet<&str> = layout.header_cells.iter().filter_map(|cell| cell.id.as_deref()).collect();
    let check = |id: &str, context: &str| {
        if ids.contains(id) {
            Ok(())
        } else {
            Err(RenderError::UnknownColumn {
                id: id.to_owned(),
                context: context.to_owned(),
            })
        }
    };

    for id in layout.mappings.keys() {
        check(id.as_str(), "mappings")?;
    }
    if let Some(fixed) = &layout.static_column {
        check(fixed.id.as_str(), "static_column")?;
    }
    for id in &layout.vertical_merges {
        check(id.as_str(), "vertical_merges")?;
    }
    let footer = &layout.footer;
    for id in footer.label_column.iter().chain(&footer.pallet_column).chain(&footer.sum_columns) {
        check(id.as_str(), "footer")?;
    }
    Ok(())
}

/// Renders every sheet named in the configuration, keyed by sheet name.
/// Sheets without data are left untouched. The caller saves the workbook.
pub fn render_workbook(
    workbook: &mut Workbook,
    config: &RenderConfig,
    data: &BTreeMap<String, RawData>,
) -> Result<BTreeMap<String, RenderSummary>, InvoiceSheetError> {
    let options = RenderOptions::from(config);
    let mut summaries = BTreeMap::new();
    for (name, sheet_config) in &config.sheets {
        let Some(raw_data) = data.get(name) else {
            warn!("No data for sheet '{}'", name);
            continue;
        };
        let summary = render_sheet(workbook, name, sheet_config, raw_data, &options).with_prefix(name)?;
        summaries.insert(name.to_owned(), summary);
    }
    Ok(summaries)
}
