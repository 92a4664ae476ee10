//! # Invoice Sheet
//!
//! Reads shipping spreadsheets from vendors and customers and writes the
//! extracted data back into formatted invoice and packing list templates.
//!
//! ## Features
//!
//! - **Best-fit header detection**: every row of a search window is scored
//!   against a catalog of canonical fields (English and Chinese aliases,
//!   allowed values, data patterns, coarse types) and the highest scoring
//!   row wins, so stray keywords above the real table are not mistaken for it
//! - **Headerless columns**: unlabeled columns are recognized by the shape of
//!   their data
//! - **Stacked tables**: further header rows below the first are located and
//!   every table is read up to its stop column
//! - **Lump-sum distribution**: weights and volumes stated once for several
//!   rows are spread over them in proportion to the piece count
//! - **Merge-preserving rendering**: rows are inserted into xlsx templates
//!   and the template's merged cells are relocated afterwards
//!
//! ## Example
//!
//! ```no_run
//! use invoice_sheet::config::FieldCatalog;
//! use invoice_sheet::detect::parse_workbook;
//! use invoice_sheet::spreadsheet::Workbook;
//!
//! let catalog = FieldCatalog::builtin()?;
//! let workbook = Workbook::open("shipment.xlsx")?;
//! for (sheet, parsed) in parse_workbook(&workbook, &catalog)? {
//!     println!("{}: header at row {}, {} tables", sheet, parsed.header_row, parsed.tables.len());
//! }
//! # Ok::<(), invoice_sheet::error::InvoiceSheetError>(())
//! ```

pub mod aggregate;
pub mod config;
pub mod detect;
pub mod distribute;
pub mod error;
mod helpers;
pub mod render;
pub mod spreadsheet;

pub use crate::config::FieldCatalog;
pub use crate::config::FieldConfig;
pub use crate::config::RenderConfig;
pub use crate::detect::extractor::RawData;
pub use crate::detect::parse_workbook;
pub use crate::detect::ParsedSheet;
pub use crate::detect::SheetParser;
pub use crate::error::InvoiceSheetError;
pub use crate::render::render_sheet;
pub use crate::render::render_workbook;
pub use crate::spreadsheet::CellValue;
pub use crate::spreadsheet::Workbook;
