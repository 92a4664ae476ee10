use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::SpreadsheetError;

/// Read access to a rectangular grid of cells, 1-based.
pub trait SheetGrid {
    /// Value at (row, column); cells outside the data read as `CellValue::Empty`.
    fn value(&self, row: u32, column: u32) -> Result<&CellValue, SpreadsheetError>;

    /// Last row holding any cell, 0 for an empty grid.
    fn last_row(&self) -> u32;

    fn last_column(&self) -> u32;
}

pub(crate) static EMPTY: CellValue = CellValue::Empty;

/// A grid held as plain rows of values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemorySheet {
    rows: Vec<Vec<CellValue>>,
}

impl MemorySheet {
    pub fn new() -> MemorySheet {
        MemorySheet::default()
    }

    /// Builds a grid whose first vector is row 1 and whose first value in each row is column A.
    pub fn from_rows(rows: Vec<Vec<CellValue>>) -> MemorySheet {
        MemorySheet { rows }
    }

    pub fn set(&mut self, row: u32, column: u32, value: impl Into<CellValue>) {
        if row == 0 || column == 0 {
            return;
        }
        let (row, column) = (row as usize - 1, column as usize - 1);
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= column {
            cells.resize(column + 1, CellValue::Empty);
        }
        cells[column] = value.into();
    }
}

impl SheetGrid for MemorySheet {
    fn value(&self, row: u32, column: u32) -> Result<&CellValue, SpreadsheetError> {
        if row == 0 || column == 0 {
            return Ok(&EMPTY);
        }
        Ok(self
            .rows
            .get(row as usize - 1)
            .and_then(|cells| cells.get(column as usize - 1))
            .unwrap_or(&EMPTY))
    }

    fn last_row(&self) -> u32 {
        self.rows
            .iter()
            .rposition(|cells| cells.iter().any(|value| *value != CellValue::Empty))
            .map(|index| index as u32 + 1)
            .unwrap_or(0)
    }

    fn last_column(&self) -> u32 {
        self.rows
            .iter()
            .filter_map(|cells| cells.iter().rposition(|value| *value != CellValue::Empty))
            .max()
            .map(|index| index as u32 + 1)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sheet_bounds() {
        let mut sheet = MemorySheet::new();
        assert_eq!(sheet.last_row(), 0);
        sheet.set(3, 2, "x");
        sheet.set(1, 5, 4.0);
        sheet.set(6, 1, CellValue::Empty);
        assert_eq!(sheet.last_row(), 3);
        assert_eq!(sheet.last_column(), 5);
        assert_eq!(sheet.value(3, 2).unwrap(), &CellValue::from("x"));
        assert_eq!(sheet.value(10, 10).unwrap(), &CellValue::Empty);
        assert_eq!(sheet.value(0, 1).unwrap(), &CellValue::Empty);
    }
}
