use crate::config::HeaderCell;
use crate::config::Layout;
use crate::detect::extractor::row_count;
use crate::detect::extractor::RawData;
use crate::detect::extractor::TableData;
use crate::error::InvoiceSheetError;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::styles::BorderEdges;
use crate::spreadsheet::styles::Styles;
use crate::spreadsheet::Worksheet;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use tracing::debug;

const HEADER_ROWS: u32 = 2;

/// Rows a packing list occupies: a two-row header, the data rows and a
/// footer per table, one spacing row between tables and a grand total row
/// when there is more than one table.
pub fn rows_needed(tables: &RawData) -> u32 {
    let count = tables.len() as u32;
    if count == 0 {
        return 0;
    }
    let data: u32 = tables.values().map(|table| row_count(table) as u32).sum();
    let grand_total = if count > 1 { 1 } else { 0 };
    HEADER_ROWS * count + data + count + (count - 1) + grand_total
}

/// Running totals carried from table footers to the grand total.
#[derive(Debug, Default)]
struct Totals {
    pallets: Option<f64>,
    sums: BTreeMap<String, f64>,
}

/// Writes table blocks into rows that are already blank.
pub(crate) struct PackingListWriter<'a> {
    sheet: &'a mut Worksheet,
    styles: &'a mut Styles,
    layout: &'a Layout,
}

impl<'a> PackingListWriter<'a> {
    pub(crate) fn new(sheet: &'a mut Worksheet, styles: &'a mut Styles, layout: &'a Layout) -> PackingListWriter<'a> {
        PackingListWriter { sheet, styles, layout }
    }

    /// Writes every table from `start_row` downwards and returns the number
    /// of rows used.
    pub(crate) fn write(&mut self, start_row: u32, tables: &RawData) -> Result<u32, InvoiceSheetError> {
        let layout = self.layout;
        let mut row = start_row;
        let mut grand = Totals::default();
        let mut columns = BTreeMap::new();

        for (position, (index, table)) in tables.iter().enumerate() {
            columns = self.write_header(row)?;
            let data_start = row + HEADER_ROWS;
            let data_rows = row_count(table) as u32;
            debug!("Writing table {} at row {} with {} rows", index, row, data_rows);

            self.write_data(data_start, table, &columns)?;
            self.apply_vertical_merges(data_start, data_rows, &columns)?;

            let footer_row = data_start + data_rows;
            let totals = self.totals(table);
            self.write_footer(footer_row, &layout.footer.label, &totals, &columns)?;
            grand.pallets = match (grand.pallets, totals.pallets) {
                (Some(left), Some(right)) => Some(left + right),
                (left, right) => left.or(right),
            };
            for (id, sum) in totals.sums {
                *grand.sums.entry(id).or_default() += sum;
            }

            row = footer_row + 1;
            if position + 1 < tables.len() {
                row += 1;
            }
        }

        if tables.len() > 1 {
            self.write_footer(row, &layout.footer.grand_total_label, &grand, &columns)?;
            row += 1;
        }
        self.apply_column_widths();
        Ok(row - start_row)
    }

    /// Writes the two header rows and returns column id to column.
    pub(crate) fn write_header(&mut self, row: u32) -> Result<BTreeMap<String, u32>, InvoiceSheetError> {
        let layout = self.layout;
        let mut columns = BTreeMap::new();
        for cell in &layout.header_cells {
            let top = row + cell.row.min(HEADER_ROWS - 1);
            self.sheet.set_value(top, cell.column, cell.text.as_str());
            let range = CellRange::new(
                top,
                cell.column,
                top + cell.rowspan.max(1) - 1,
                cell.column + cell.colspan.max(1) - 1,
            );
            for header_row in range.min_row..=range.max_row {
                for column in range.min_col..=range.max_col {
                    self.border(header_row, column, BorderEdges::BOX)?;
                }
            }
            if !range.is_single_cell() {
                self.sheet.merge(range)?;
            }
            if let Some(id) = &cell.id {
                columns.insert(id.to_owned(), cell.column);
            }
        }
        if let Some(height) = layout.row_heights.header {
            self.sheet.set_row_height(row, Some(height));
            self.sheet.set_row_height(row + 1, Some(height));
        }
        Ok(columns)
    }

    fn write_data(&mut self, first_row: u32, table: &TableData, columns: &BTreeMap<String, u32>) -> Result<(), InvoiceSheetError> {
        let layout = self.layout;
        let rows = row_count(table);
        let static_column = layout
            .static_column
            .as_ref()
            .and_then(|fixed| columns.get(&fixed.id).map(|column| (*column, fixed)));
        let block_columns = self.block_columns();

        for index in 0..rows {
            let row = first_row + index as u32;
            for (id, field) in &layout.mappings {
                let Some(column) = columns.get(id) else {
                    continue;
                };
                let value = table.get(field).and_then(|values| values.get(index)).cloned().unwrap_or_default();
                self.sheet.set_value(row, *column, value);
            }
            if let Some((column, fixed)) = static_column {
                if let Some(value) = fixed.values.get(index) {
                    self.sheet.set_value(row, column, value.as_str());
                }
            }

            for column in &block_columns {
                let edges = match static_column {
                    Some((fixed, _)) if fixed == *column && index != 0 && index + 1 != rows => BorderEdges::SIDES,
                    _ => BorderEdges::BOX,
                };
                self.border(row, *column, edges)?;
            }
            if let Some(height) = layout.row_heights.data {
                self.sheet.set_row_height(row, Some(height));
            }
        }
        Ok(())
    }

    fn apply_vertical_merges(&mut self, first_row: u32, rows: u32, columns: &BTreeMap<String, u32>) -> Result<(), InvoiceSheetError> {
        if rows < 2 {
            return Ok(());
        }
        for id in &self.layout.vertical_merges {
            if let Some(column) = columns.get(id) {
                self.sheet.merge(CellRange::new(first_row, *column, first_row + rows - 1, *column))?;
            }
        }
        Ok(())
    }

    fn totals(&self, table: &TableData) -> Totals {
        let footer = &self.layout.footer;
        let sum = |field: &str| {
            table
                .get(field)
                .map(|values| values.iter().filter_map(CellValue::to_number).sum::<f64>())
        };
        let sums = footer
            .sum_columns
            .iter()
            .filter_map(|id| {
                let field = self.layout.mappings.get(id)?;
                Some((id.to_owned(), sum(field.as_str()).unwrap_or(0.0)))
            })
            .collect();
        Totals {
            pallets: sum(footer.pallet_field.as_str()),
            sums,
        }
    }

    fn write_footer(&mut self, row: u32, label: &str, totals: &Totals, columns: &BTreeMap<String, u32>) -> Result<(), InvoiceSheetError> {
        let layout = self.layout;
        let footer = &layout.footer;
        let block_columns = self.block_columns();
        let label_column = footer
            .label_column
            .as_ref()
            .and_then(|id| columns.get(id).copied())
            .or_else(|| block_columns.first().copied());
        if let Some(column) = label_column {
            self.sheet.set_value(row, column, label);
        }

        let pallet_column = match &footer.pallet_column {
            Some(id) => columns.get(id).copied(),
            None => layout
                .mappings
                .iter()
                .find(|(_, field)| **field == footer.pallet_field)
                .and_then(|(id, _)| columns.get(id).copied()),
        };
        if let Some((column, pallets)) = pallet_column.zip(totals.pallets) {
            let text = format!("{}{}", CellValue::Number(pallets), footer.pallet_suffix);
            self.sheet.set_value(row, column, text);
        }
        for (id, sum) in &totals.sums {
            if let Some(column) = columns.get(id) {
                self.sheet.set_value(row, *column, *sum);
            }
        }

        for column in &block_columns {
            self.border(row, *column, BorderEdges::BOX)?;
        }
        if let Some(height) = layout.row_heights.footer {
            self.sheet.set_row_height(row, Some(height));
        }
        Ok(())
    }

    /// Widths are configured by header text.
    fn apply_column_widths(&mut self) {
        let layout = self.layout;
        for (text, width) in &layout.column_widths {
            let cell = layout.header_cells.iter().find(|cell| cell.text.trim() == text.trim());
            match cell {
                Some(cell) => self.sheet.set_column_width(cell.column, *width),
                None => debug!("No header cell reads '{}', width ignored", text),
            }
        }
    }

    /// Every column covered by a header cell.
    fn block_columns(&self) -> Vec<u32> {
        self.layout
            .header_cells
            .iter()
            .flat_map(|cell: &HeaderCell| cell.column..cell.column + cell.colspan.max(1))
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect()
    }

    fn border(&mut self, row: u32, column: u32, edges: BorderEdges) -> Result<(), InvoiceSheetError> {
        let style = self.styles.with_border(self.sheet.style(row, column), edges)?;
        self.sheet.set_style(row, column, Some(style));
        Ok(())
    }
}
