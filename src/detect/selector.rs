use crate::config::FieldCatalog;
use crate::config::SearchWindow;
use crate::detect::read_cell;
use crate::detect::scorer::HeaderCandidate;
use crate::detect::scorer::HeaderScorer;
use crate::detect::scorer::TYPE_SCORE;
use crate::spreadsheet::grid::SheetGrid;
use crate::spreadsheet::reference::column_name;
use serde::Serialize;
use serde::Serializer;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::debug;

/// Minimum number of assigned fields for a row to count as a header row.
pub const MIN_HEADER_FIELDS: usize = 3;

/// Fixed contribution of a resolved unit/amount pair.
pub const UNIT_AMOUNT_SCORE: u32 = 10;

/// Canonical field name to 1-based column for one header row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMapping {
    columns: BTreeMap<String, u32>,
}

impl HeaderMapping {
    pub fn get(&self, field: &str) -> Option<u32> {
        self.columns.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.columns.iter().map(|(field, column)| (field.as_str(), *column))
    }

    /// Field name to column letters, as reported to callers.
    pub fn letters(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .map(|(field, column)| (field.to_owned(), column_name(*column)))
            .collect()
    }

    fn insert(&mut self, field: &str, column: u32) {
        self.columns.insert(field.to_owned(), column);
    }
}

impl FromIterator<(String, u32)> for HeaderMapping {
    fn from_iter<T: IntoIterator<Item = (String, u32)>>(iter: T) -> Self {
        HeaderMapping {
            columns: iter.into_iter().collect(),
        }
    }
}

impl Serialize for HeaderMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.columns.iter().map(|(field, column)| (field, column_name(*column))))
    }
}

/// The winning header row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectedHeader {
    pub row: u32,
    pub mapping: HeaderMapping,
    pub score: u32,
}

/// Scans a window of rows and keeps the best scoring header row.
pub struct HeaderRowSelector<'a> {
    scorer: HeaderScorer<'a>,
    window: SearchWindow,
}

impl<'a> HeaderRowSelector<'a> {
    pub fn new(catalog: &'a FieldCatalog) -> HeaderRowSelector<'a> {
        HeaderRowSelector {
            scorer: HeaderScorer::new(catalog),
            window: catalog.config().search,
        }
    }

    pub fn with_window(mut self, window: SearchWindow) -> HeaderRowSelector<'a> {
        self.window = window;
        self
    }

    /// Returns the qualifying row with the strictly highest total, the
    /// earliest one on ties, or `None` when no row assigns enough fields.
    pub fn select<G: SheetGrid + ?Sized>(&self, grid: &G) -> Option<DetectedHeader> {
        let mut best = None::<DetectedHeader>;
        // Rows past the end of the sheet cannot hold a header
        let last_row = self.window.last_row.min(grid.last_row());
        for row in self.window.first_row..=last_row {
            let candidates = self.row_candidates(grid, row);
            if candidates.is_empty() {
                continue;
            }
            let (mapping, score) = self.resolve(candidates);
            debug!("Row {} maps {} fields with score {}", row, mapping.len(), score);
            if mapping.len() < MIN_HEADER_FIELDS {
                continue;
            }
            if best.as_ref().map(|best| score > best.score).unwrap_or(true) {
                best = Some(DetectedHeader { row, mapping, score });
            }
        }
        best
    }

    fn row_candidates<G: SheetGrid + ?Sized>(&self, grid: &G, row: u32) -> Vec<HeaderCandidate> {
        let mut candidates = Vec::new();
        for column in self.window.first_column..=self.window.last_column {
            let header = read_cell(grid, row, column);
            let data = read_cell(grid, row.saturating_add(1), column);
            candidates.extend(self.scorer.candidates(column, header, data));
        }
        candidates
    }

    /// Turns one row's candidates into a mapping using each column and each
    /// field at most once, returning the mapping and its total score.
    pub fn resolve(&self, candidates: Vec<HeaderCandidate>) -> (HeaderMapping, u32) {
        let catalog = self.scorer.catalog();
        let mut mapping = HeaderMapping::default();
        let mut total = 0;
        let mut used_columns = HashSet::new();
        let mut used_fields = HashSet::new();

        if let Some((unit, amount)) = catalog.field_index("unit").zip(catalog.field_index("amount")) {
            let scored = |column: u32, field: usize| {
                candidates
                    .iter()
                    .any(|c| c.column == column && c.field == field && c.score == TYPE_SCORE)
            };
            let mut tied: Vec<u32> = candidates
                .iter()
                .map(|c| c.column)
                .filter(|column| scored(*column, unit) && scored(*column, amount))
                .collect();
            tied.dedup();
            if let &[first, second] = tied.as_slice() {
                let (lower, higher) = (first.min(second), first.max(second));
                mapping.insert(&catalog.field(unit).name, lower);
                mapping.insert(&catalog.field(amount).name, higher);
                total += UNIT_AMOUNT_SCORE;
                used_columns.extend([lower, higher]);
                used_fields.extend([unit, amount]);
            }
        }

        let mut remaining = candidates;
        remaining.sort_by_key(|c| (Reverse(c.score), c.column));
        for candidate in remaining {
            if used_columns.contains(&candidate.column) || used_fields.contains(&candidate.field) {
                continue;
            }
            mapping.insert(&catalog.field(candidate.field).name, candidate.column);
            total += candidate.score;
            used_columns.insert(candidate.column);
            used_fields.insert(candidate.field);
        }
        (mapping, total)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::catalog;
    use crate::spreadsheet::cell::CellValue;
    use crate::spreadsheet::grid::MemorySheet;

    fn text(value: &str) -> CellValue {
        if value.is_empty() {
            CellValue::Empty
        } else if let Ok(number) = value.parse::<f64>() {
            CellValue::Number(number)
        } else {
            CellValue::from(value)
        }
    }

    pub(crate) fn grid(rows: &[&[&str]]) -> MemorySheet {
        MemorySheet::from_rows(rows.iter().map(|row| row.iter().map(|value| text(value)).collect()).collect())
    }

    #[test]
    fn picks_unit_and_amount_by_column_order() {
        let catalog = catalog();
        let selector = HeaderRowSelector::new(&catalog);
        let sheet = grid(&[
            &["PO", "ITEM NO", "PCS", "USD", "USD"],
            &["PO-1", "JF-1", "10", "2.5", "25"],
        ]);
        let header = selector.select(&sheet).unwrap();
        assert_eq!(header.row, 1);
        assert_eq!(header.mapping.get("unit"), Some(4));
        assert_eq!(header.mapping.get("amount"), Some(5));
        assert_eq!(header.score, 10 + 5 + 5 + 5);

        let swapped = grid(&[
            &["USD", "USD", "PO", "ITEM NO", "PCS"],
            &["25", "2.5", "PO-1", "JF-1", "10"],
        ]);
        let header = selector.select(&swapped).unwrap();
        assert_eq!(header.mapping.get("unit"), Some(1));
        assert_eq!(header.mapping.get("amount"), Some(2));
    }

    #[test]
    fn unbounded_window_stops_at_the_last_row() {
        let catalog = catalog();
        let window = SearchWindow { first_row: 1, last_row: u32::MAX, first_column: 1, last_column: 5 };
        let selector = HeaderRowSelector::new(&catalog).with_window(window);
        let sheet = grid(&[
            &["", "", "", "", ""],
            &["PO", "ITEM NO", "PCS", "", ""],
            &["PO-1", "JF-1", "10", "", ""],
        ]);
        assert_eq!(selector.select(&sheet).unwrap().row, 2);
        assert!(selector.select(&grid(&[])).is_none());
    }

    #[test]
    fn prefers_best_fit_over_first_fit() {
        let catalog = catalog();
        let selector = HeaderRowSelector::new(&catalog);
        let sheet = grid(&[
            &["PO", "ITEM", "PCS", "", ""],
            &["PO-9", "Note", "1", "", ""],
            &["", "", "", "", ""],
            &["PO", "ITEM NO", "PCS", "NET WEIGHT", "PALLET"],
            &["PO-1", "JF-1", "10", "12.5", "1"],
        ]);
        let header = selector.select(&sheet).unwrap();
        assert_eq!(header.row, 4);
        assert_eq!(header.score, 5 + 5 + 5 + 5 + 15);
        assert_eq!(header.mapping.len(), 5);
        assert_eq!(header.mapping.letters()["pallet_count"], "E");
    }

    #[test]
    fn rows_with_fewer_than_three_fields_do_not_qualify() {
        let catalog = catalog();
        let selector = HeaderRowSelector::new(&catalog);
        let sheet = grid(&[&["PO", "ITEM NO", "Remark"], &["PO-1", "JF-1", "x"]]);
        assert_eq!(selector.select(&sheet), None);
        assert_eq!(selector.select(&MemorySheet::new()), None);
    }

    #[test]
    fn selection_is_idempotent() {
        let catalog = catalog();
        let selector = HeaderRowSelector::new(&catalog);
        let sheet = grid(&[
            &["Invoice", "", ""],
            &["订单号", "ITEM NO", "PCS", "", "NET WEIGHT"],
            &["4500123", "JF-1", "10", "Leather", "1.5"],
        ]);
        let first = selector.select(&sheet).unwrap();
        let second = selector.select(&sheet).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.row, 2);
        assert_eq!(first.mapping.get("description"), Some(4));
    }

    #[test]
    fn each_field_is_assigned_once() {
        let catalog = catalog();
        let selector = HeaderRowSelector::new(&catalog);
        let pcs = catalog.field_index("pcs").unwrap();
        let po = catalog.field_index("po").unwrap();
        let (mapping, total) = selector.resolve(vec![
            HeaderCandidate { column: 1, field: po, score: 5 },
            HeaderCandidate { column: 2, field: pcs, score: 5 },
            HeaderCandidate { column: 3, field: pcs, score: 5 },
        ]);
        assert_eq!(mapping.get("pcs"), Some(2));
        assert_eq!(mapping.len(), 2);
        assert_eq!(total, 10);
    }

    #[test]
    fn search_window_limits_columns() {
        let catalog = catalog();
        let window = SearchWindow { first_row: 1, last_row: 5, first_column: 1, last_column: 2 };
        let selector = HeaderRowSelector::new(&catalog).with_window(window);
        let sheet = grid(&[&["PO", "ITEM NO", "PCS"], &["PO-1", "JF-1", "10"]]);
        assert_eq!(selector.select(&sheet), None);
    }
}
