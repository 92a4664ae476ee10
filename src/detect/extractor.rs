use crate::detect::selector::HeaderMapping;
use crate::error::InvoiceSheetError;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::grid::SheetGrid;
use std::collections::BTreeMap;
use tracing::debug;
use tracing::warn;

/// Field name to the values read under it, one per data row.
pub type TableData = BTreeMap<String, Vec<CellValue>>;

/// Tables keyed by 1-based index in header row order.
pub type RawData = BTreeMap<usize, TableData>;

/// Reads the data rows under each confirmed header row.
pub struct TableExtractor<'a> {
    stop_field: &'a str,
    max_data_rows: u32,
}

impl<'a> TableExtractor<'a> {
    pub fn new(stop_field: &'a str, max_data_rows: u32) -> TableExtractor<'a> {
        TableExtractor {
            stop_field,
            max_data_rows,
        }
    }

    /// Produces one table per header row, present even when empty. A table
    /// ends before the first row whose stop column is blank, at the next
    /// header row, at `header row + max_data_rows`, or after the last row.
    pub fn extract<G: SheetGrid + ?Sized>(
        &self,
        grid: &G,
        header_rows: &[u32],
        mapping: &HeaderMapping,
    ) -> Result<RawData, InvoiceSheetError> {
        let mut header_rows = header_rows.to_vec();
        header_rows.sort_unstable();
        header_rows.dedup();

        let stop_column = mapping.get(self.stop_field);
        if stop_column.is_none() {
            warn!("Stop field '{}' is not mapped, tables run to their other boundaries", self.stop_field);
        }
        let sheet_end = grid.last_row().saturating_add(1);

        let mut tables = RawData::new();
        for (index, header_row) in header_rows.iter().enumerate() {
            let mut table: TableData = mapping.iter().map(|(field, _)| (field.to_owned(), Vec::new())).collect();
            let next_header = header_rows.get(index + 1).copied().unwrap_or(u32::MAX);
            let end = next_header
                .min(header_row.saturating_add(self.max_data_rows))
                .min(sheet_end);

            let mut row = header_row.saturating_add(1);
            while row < end {
                if let Some(column) = stop_column {
                    if grid.value(row, column)?.is_blank() {
                        debug!("Table {} stops at blank row {}", index + 1, row);
                        break;
                    }
                }
                for (field, column) in mapping.iter() {
                    let value = grid.value(row, column)?.clone().trimmed();
                    if let Some(values) = table.get_mut(field) {
                        values.push(value);
                    }
                }
                row += 1;
            }
            debug!("Table {} under row {} has {} rows", index + 1, header_row, row.saturating_sub(header_row.saturating_add(1)));
            tables.insert(index + 1, table);
        }
        Ok(tables)
    }
}

/// Number of data rows in a table.
pub fn row_count(table: &TableData) -> usize {
    table.values().map(Vec::len).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::grid::MemorySheet;

    fn mapping() -> HeaderMapping {
        [("po", 1), ("item", 2), ("pcs", 3), ("net", 4)]
            .into_iter()
            .map(|(field, column)| (field.to_owned(), column))
            .collect()
    }

    /// Header at row 5, data rows 6..=19, blank item at row 20, stray rows after.
    fn shipping_sheet() -> MemorySheet {
        let mut sheet = MemorySheet::new();
        for (column, text) in ["PO", "ITEM NO", "PCS", "NET WEIGHT"].iter().enumerate() {
            sheet.set(5, column as u32 + 1, *text);
        }
        for row in 6..20 {
            sheet.set(row, 1, format!(" PO-{row} "));
            sheet.set(row, 2, format!("JF-{row}"));
            sheet.set(row, 3, row as f64);
            sheet.set(row, 4, 1.5);
        }
        sheet.set(20, 1, "PO-20");
        sheet.set(20, 2, "   ");
        sheet.set(21, 2, "Signature");
        sheet
    }

    #[test]
    fn stops_at_the_first_blank_stop_cell() {
        let sheet = shipping_sheet();
        let tables = TableExtractor::new("item", 1000).extract(&sheet, &[5], &mapping()).unwrap();
        assert_eq!(tables.len(), 1);
        let table = &tables[&1];
        assert_eq!(row_count(table), 14);
        assert_eq!(table["po"][0], CellValue::from("PO-6"));
        assert_eq!(table["item"][13], CellValue::from("JF-19"));
        assert_eq!(table["pcs"][13], CellValue::Number(19.0));
    }

    #[test]
    fn blank_stop_fires_before_the_next_header() {
        let mut sheet = shipping_sheet();
        for (column, text) in ["PO", "ITEM NO", "PCS", "NET WEIGHT"].iter().enumerate() {
            sheet.set(30, column as u32 + 1, *text);
        }
        sheet.set(31, 1, "PO-31");
        sheet.set(31, 2, "JF-31");
        sheet.set(32, 2, "JF-32");
        let tables = TableExtractor::new("item", 1000).extract(&sheet, &[30, 5], &mapping()).unwrap();
        assert_eq!(row_count(&tables[&1]), 14);
        assert_eq!(row_count(&tables[&2]), 2);
        assert_eq!(tables[&2]["po"], vec![CellValue::from("PO-31"), CellValue::Empty]);
    }

    #[test]
    fn next_header_and_ceiling_bound_tables() {
        let sheet = shipping_sheet();
        let tables = TableExtractor::new("item", 1000).extract(&sheet, &[5, 10], &mapping()).unwrap();
        assert_eq!(row_count(&tables[&1]), 4);
        assert_eq!(row_count(&tables[&2]), 9);

        let tables = TableExtractor::new("item", 3).extract(&sheet, &[5], &mapping()).unwrap();
        assert_eq!(row_count(&tables[&1]), 2);
    }

    #[test]
    fn empty_tables_are_kept() {
        let sheet = shipping_sheet();
        let tables = TableExtractor::new("item", 1000).extract(&sheet, &[5, 19, 20], &mapping()).unwrap();
        assert_eq!(tables.len(), 3);
        assert_eq!(row_count(&tables[&3]), 0);
        assert_eq!(tables[&3].len(), 4);
        assert!(tables[&3]["net"].is_empty());
    }

    #[test]
    fn missing_stop_field_runs_to_the_sheet_end() {
        let sheet = shipping_sheet();
        let tables = TableExtractor::new("remarks", 1000).extract(&sheet, &[5], &mapping()).unwrap();
        assert_eq!(row_count(&tables[&1]), 16);
    }
}
