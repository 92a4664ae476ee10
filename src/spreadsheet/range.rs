use crate::spreadsheet::reference::cell_reference;
use crate::spreadsheet::reference::column_number;
use regex::Regex;
use std::fmt::Display;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors related to A1-style range parsing.
#[derive(Error, Debug)]
pub enum RangeError {
    #[error("Invalid range format '{0}'")]
    FormatError(String),
}

/// A rectangular block of cells, bounds inclusive and 1-based.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub min_row: u32,
    pub min_col: u32,
    pub max_row: u32,
    pub max_col: u32,
}

impl CellRange {
    /// Creates a range, normalizing the corner order.
    pub fn new(row_a: u32, col_a: u32, row_b: u32, col_b: u32) -> Self {
        CellRange {
            min_row: row_a.min(row_b),
            min_col: col_a.min(col_b),
            max_row: row_a.max(row_b),
            max_col: col_a.max(col_b),
        }
    }

    /// A one-row range starting at (row, col) spanning `width` columns.
    pub fn horizontal(row: u32, col: u32, width: u32) -> Self {
        CellRange::new(row, col, row, col + width.max(1) - 1)
    }

    pub fn width(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    pub fn height(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    pub fn is_single_cell(&self) -> bool {
        self.min_row == self.max_row && self.min_col == self.max_col
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        self.min_row <= row && row <= self.max_row && self.min_col <= col && col <= self.max_col
    }

    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.min_row <= other.max_row
            && other.min_row <= self.max_row
            && self.min_col <= other.max_col
            && other.min_col <= self.max_col
    }

    /// Moves the range down for `count` rows inserted at `at`. A range that
    /// straddles the insertion row grows instead of moving.
    pub fn shift_rows(&self, at: u32, count: u32) -> CellRange {
        let mut shifted = *self;
        if self.min_row >= at {
            shifted.min_row += count;
            shifted.max_row += count;
        } else if self.max_row >= at {
            shifted.max_row += count;
        }
        shifted
    }
}

impl TryFrom<&str> for CellRange {
    type Error = RangeError;

    /// Parses "B20:D20" or a single cell "B20" (absolute markers allowed).
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^\$?([A-Z]{1,3})\$?(\d+)(?::\$?([A-Z]{1,3})\$?(\d+))?$").expect("Hardcode regex pattern")
        });
        let upper = value.trim().to_ascii_uppercase();
        let error = || RangeError::FormatError(value.to_owned());
        let captures = pattern.captures(&upper).ok_or_else(error)?;
        let column = |index: usize| captures.get(index).and_then(|m| column_number(m.as_str()));
        let row = |index: usize| {
            captures
                .get(index)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|row| *row > 0)
        };
        let min_col = column(1).ok_or_else(error)?;
        let min_row = row(2).ok_or_else(error)?;
        let (max_row, max_col) = match (row(4), column(3)) {
            (Some(max_row), Some(max_col)) => (max_row, max_col),
            _ if captures.get(3).is_some() => Err(error())?,
            _ => (min_row, min_col),
        };
        Ok(CellRange::new(min_row, min_col, max_row, max_col))
    }
}

impl Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", cell_reference(self.min_row, self.min_col))
        } else {
            write!(
                f,
                "{}:{}",
                cell_reference(self.min_row, self.min_col),
                cell_reference(self.max_row, self.max_col)
            )
        }
    }
}
