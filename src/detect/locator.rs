use crate::error::InvoiceSheetError;
use crate::spreadsheet::grid::SheetGrid;
use regex::Regex;
use std::ops::RangeInclusive;
use tracing::warn;

/// Finds the header rows of stacked tables: every row from `floor` to
/// `last_row` with a cell in `columns` matching `pattern` anywhere in its
/// text. Rows are reported once and in ascending order. Any failure is
/// logged and yields an empty list.
pub fn locate_header_rows<G: SheetGrid + ?Sized>(
    grid: &G,
    pattern: &str,
    columns: RangeInclusive<u32>,
    floor: u32,
    last_row: u32,
) -> Vec<u32> {
    scan(grid, pattern, columns, floor, last_row).unwrap_or_else(|error| {
        warn!("Table header scan failed: {}", error);
        Vec::new()
    })
}

fn scan<G: SheetGrid + ?Sized>(
    grid: &G,
    pattern: &str,
    columns: RangeInclusive<u32>,
    floor: u32,
    last_row: u32,
) -> Result<Vec<u32>, InvoiceSheetError> {
    let pattern = Regex::new(pattern)?;
    let mut rows = Vec::new();
    for row in floor.max(1)..=last_row {
        for column in columns.clone() {
            let value = grid.value(row, column)?;
            if !value.is_blank() && pattern.is_match(&value.to_string()) {
                rows.push(row);
                break;
            }
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::selector::tests::grid;

    #[test]
    fn finds_each_matching_row_once() {
        let sheet = grid(&[
            &["PO", "ITEM NO", "PCS"],
            &["PO-1", "JF-1", "1"],
            &["PO", "PO", ""],
            &["", "", ""],
            &["订单号", "ITEM NO", "PCS"],
        ]);
        let rows = locate_header_rows(&sheet, "^(PO|订单号)$", 1..=26, 2, sheet.last_row());
        assert_eq!(rows, vec![3, 5]);
        let rows = locate_header_rows(&sheet, "^(PO|订单号)$", 1..=26, 1, sheet.last_row());
        assert_eq!(rows, vec![1, 3, 5]);
    }

    #[test]
    fn respects_the_column_window() {
        let sheet = grid(&[&["", "", "PO"], &["", "", "PO"]]);
        assert!(locate_header_rows(&sheet, "PO", 1..=2, 1, 2).is_empty());
        assert_eq!(locate_header_rows(&sheet, "PO", 1..=3, 2, 2), vec![2]);
    }

    #[test]
    fn invalid_pattern_yields_nothing() {
        let sheet = grid(&[&["PO"]]);
        assert!(locate_header_rows(&sheet, "(PO", 1..=1, 1, 1).is_empty());
    }
}
