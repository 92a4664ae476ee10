use crate::config::RestoreArea;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::Worksheet;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

/// A single-row merged range remembered by its content rather than its position.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeRecord {
    /// Where the merge was found, used to unmerge it before rows move
    pub origin: CellRange,
    pub span: u32,
    /// Top-left value; `None` when the cell could not be read
    pub value: Option<CellValue>,
    /// Custom height of the merge's row
    pub height: Option<f64>,
}

/// Outcome of a restore pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Records every single-row merge starting at or below `boundary`, in the
/// sheet's merge order. Unreadable values and heights are kept as `None`.
pub fn snapshot(sheet: &Worksheet, boundary: u32) -> Vec<MergeRecord> {
    sheet
        .merged_ranges()
        .iter()
        .filter(|range| range.height() == 1 && range.min_row >= boundary)
        .map(|range| {
            let value = match sheet.value(range.min_row, range.min_col) {
                Ok(value) => Some(value.clone()),
                Err(error) => {
                    warn!("Merge {} keeps no value: {}", range, error);
                    None
                }
            };
            let height = sheet.row_height(range.min_row).unwrap_or_else(|error| {
                warn!("Merge {} keeps no height: {}", range, error);
                None
            });
            MergeRecord {
                origin: *range,
                span: range.width(),
                value,
                height,
            }
        })
        .collect()
}

/// Removes the recorded merges from the sheet.
pub fn unmerge_recorded(sheet: &mut Worksheet, records: &[MergeRecord]) {
    for record in records {
        sheet.unmerge(&record.origin);
    }
}

/// Re-applies recorded merges after the rows have moved.
///
/// Each record is looked up by value inside `area`, scanning from the bottom
/// row upwards and left to right, and merged again with its original span at
/// the first hit. A value is restored once per call; later records with the
/// same value are skipped.
pub fn restore(sheet: &mut Worksheet, records: &[MergeRecord], area: &RestoreArea) -> RestoreReport {
    let mut report = RestoreReport::default();
    let mut consumed: Vec<&CellValue> = Vec::new();

    for record in records {
        if record.span <= 1 {
            report.skipped += 1;
            continue;
        }
        let Some(value) = record.value.as_ref().filter(|value| !value.is_blank()) else {
            debug!("Merge {} has no value to search for", record.origin);
            report.failed += 1;
            continue;
        };
        if consumed.contains(&value) {
            debug!("Merge value '{}' was already restored", value);
            report.skipped += 1;
            continue;
        }
        let Some((row, column)) = find_value(sheet, value, area) else {
            debug!("Merge value '{}' not found", value);
            report.failed += 1;
            continue;
        };

        let target = CellRange::horizontal(row, column, record.span);
        for removed in sheet.unmerge_overlapping(&target) {
            debug!("Unmerged {} in the way of {}", removed, target);
        }
        if let Err(error) = sheet.merge(target) {
            warn!("Failed to restore merge {}: {}", target, error);
            report.failed += 1;
            continue;
        }
        if record.height.is_some() {
            sheet.set_row_height(row, record.height);
        }
        if sheet.value(row, column).ok() != Some(value) {
            sheet.set_value(row, column, value.clone());
        }
        debug!("Restored merge {} as {}", record.origin, target);
        consumed.push(value);
        report.restored += 1;
    }
    report
}

fn find_value(sheet: &Worksheet, value: &CellValue, area: &RestoreArea) -> Option<(u32, u32)> {
    let first_column = area.first_column.max(1);
    for row in (area.first_row.max(1)..=area.last_row).rev() {
        for column in first_column..=area.last_column {
            if sheet.value(row, column).ok() == Some(value) {
                return Some((row, column));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::worksheet::tests::sample_sheet;

    #[test]
    fn snapshot_keeps_single_row_merges_below_the_boundary() {
        let mut sheet = sample_sheet();
        sheet.merge(CellRange::new(1, 1, 1, 2)).unwrap();
        sheet.merge(CellRange::new(22, 1, 23, 2)).unwrap();
        sheet.merge(CellRange::new(5, 1, 5, 2)).unwrap();

        let records = snapshot(&sheet, 16);
        assert_eq!(
            records,
            vec![MergeRecord {
                origin: CellRange::new(20, 2, 20, 4),
                span: 3,
                value: Some(CellValue::from("TOTAL")),
                height: Some(18.5),
            }]
        );

        let records = snapshot(&sheet, 1);
        assert_eq!(records.len(), 3);
        let row5 = records.iter().find(|record| record.origin.min_row == 5).unwrap();
        assert_eq!(row5.value, Some(CellValue::Number(3.0)));
        assert_eq!(row5.height, None);
    }

    #[test]
    fn restores_after_rows_are_inserted() {
        let mut sheet = sample_sheet();
        let records = snapshot(&sheet, 16);
        unmerge_recorded(&mut sheet, &records);
        assert!(sheet.merged_ranges().is_empty());

        sheet.insert_rows(16, 10);
        sheet.set_row_height(30, None);
        let report = restore(&mut sheet, &records, &RestoreArea::default());

        assert_eq!(report, RestoreReport { restored: 1, failed: 0, skipped: 0 });
        assert_eq!(sheet.merged_ranges(), &[CellRange::new(30, 2, 30, 4)]);
        assert_eq!(sheet.row_height(30).unwrap(), Some(18.5));
        assert_eq!(sheet.value(30, 2).unwrap(), &CellValue::from("TOTAL"));
    }

    #[test]
    fn every_distinct_merge_comes_back_with_span_and_height() {
        let mut sheet = sample_sheet();
        sheet.set_value(18, 1, "REMARKS");
        sheet.merge(CellRange::new(18, 1, 18, 3)).unwrap();
        sheet.set_value(22, 1, "SHIPPER");
        sheet.merge(CellRange::new(22, 1, 22, 4)).unwrap();
        sheet.set_row_height(22, Some(30.0));
        sheet.set_value(25, 5, "SIGNATURE");
        sheet.merge(CellRange::new(25, 5, 25, 6)).unwrap();

        let records = snapshot(&sheet, 16);
        assert_eq!(records.len(), 4);
        unmerge_recorded(&mut sheet, &records);
        sheet.insert_rows(16, 10);
        for row in [28, 30, 32, 35] {
            sheet.set_row_height(row, None);
        }

        let report = restore(&mut sheet, &records, &RestoreArea::default());
        assert_eq!(report, RestoreReport { restored: 4, failed: 0, skipped: 0 });
        assert_eq!(
            sheet.merged_ranges(),
            &[
                CellRange::new(30, 2, 30, 4),
                CellRange::new(28, 1, 28, 3),
                CellRange::new(32, 1, 32, 4),
                CellRange::new(35, 5, 35, 6),
            ]
        );
        assert_eq!(sheet.row_height(28).unwrap(), None);
        assert_eq!(sheet.row_height(30).unwrap(), Some(18.5));
        assert_eq!(sheet.row_height(32).unwrap(), Some(30.0));
        assert_eq!(sheet.row_height(35).unwrap(), None);
    }

    #[test]
    fn bottom_most_occurrence_wins_and_duplicates_are_skipped() {
        let mut sheet = sample_sheet();
        let records = snapshot(&sheet, 16);
        unmerge_recorded(&mut sheet, &records);
        sheet.set_value(40, 5, "TOTAL");
        sheet.merge(CellRange::new(40, 6, 41, 6)).unwrap();

        let twice = vec![records[0].clone(), records[0].clone()];
        let report = restore(&mut sheet, &twice, &RestoreArea::default());
        assert_eq!(report, RestoreReport { restored: 1, failed: 0, skipped: 1 });
        assert_eq!(sheet.merged_ranges(), &[CellRange::new(40, 5, 40, 7)]);
    }

    #[test]
    fn missing_values_count_as_failures() {
        let mut sheet = sample_sheet();
        let mut records = snapshot(&sheet, 16);
        unmerge_recorded(&mut sheet, &records);
        records[0].value = Some(CellValue::from("GRAND TOTAL"));
        let first = records[0].clone();
        records.push(MergeRecord { value: None, ..first.clone() });
        records.push(MergeRecord { span: 1, ..first });

        let report = restore(&mut sheet, &records, &RestoreArea::default());
        assert_eq!(report, RestoreReport { restored: 0, failed: 2, skipped: 1 });
        assert!(sheet.merged_ranges().is_empty());
    }

    #[test]
    fn search_stays_inside_the_area() {
        let mut sheet = sample_sheet();
        let records = snapshot(&sheet, 16);
        unmerge_recorded(&mut sheet, &records);
        let area = RestoreArea { first_row: 21, ..RestoreArea::default() };
        assert_eq!(restore(&mut sheet, &records, &area).failed, 1);
    }
}
