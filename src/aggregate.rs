use crate::config::AggregateConfig;
use crate::detect::extractor::row_count;
use crate::detect::extractor::RawData;
use crate::detect::extractor::TableData;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::grid::EMPTY;
use std::collections::HashMap;
use tracing::debug;

/// Groups the rows of every table by the key fields, in first-seen order,
/// and sums the numeric fields of each group. Rows whose keys are all blank
/// are left out.
pub fn aggregate(tables: &RawData, config: &AggregateConfig) -> TableData {
    let mut groups: Vec<(Vec<CellValue>, Vec<f64>)> = Vec::new();
    let mut positions: HashMap<Vec<String>, usize> = HashMap::new();

    for table in tables.values() {
        for row in 0..row_count(table) {
            let keys: Vec<CellValue> = config.keys.iter().map(|key| cell(table, key, row).clone().trimmed()).collect();
            if keys.iter().all(CellValue::is_blank) {
                continue;
            }
            let identity: Vec<String> = keys.iter().map(ToString::to_string).collect();
            let position = *positions.entry(identity).or_insert_with(|| {
                groups.push((keys, vec![0.0; config.sums.len()]));
                groups.len() - 1
            });
            let totals = &mut groups[position].1;
            for (total, field) in totals.iter_mut().zip(&config.sums) {
                *total += cell(table, field, row).to_number().unwrap_or(0.0);
            }
        }
    }
    debug!("Aggregated {} groups from {} tables", groups.len(), tables.len());

    let mut output = TableData::new();
    for field in config.keys.iter().chain(&config.sums) {
        output.insert(field.to_owned(), Vec::with_capacity(groups.len()));
    }
    for (keys, totals) in groups {
        for (field, key) in config.keys.iter().zip(keys) {
            if let Some(values) = output.get_mut(field) {
                values.push(key);
            }
        }
        for (field, total) in config.sums.iter().zip(totals) {
            if let Some(values) = output.get_mut(field) {
                values.push(CellValue::Number(total));
            }
        }
    }
    output
}

fn cell<'a>(table: &'a TableData, field: &str, row: usize) -> &'a CellValue {
    table
        .get(field)
        .and_then(|values| values.get(row))
        .unwrap_or(&EMPTY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(&str, &str, f64, f64)]) -> TableData {
        let mut table = TableData::new();
        for (po, item, pcs, amount) in rows {
            table.entry("po".to_owned()).or_default().push(CellValue::from(*po));
            table.entry("item".to_owned()).or_default().push(CellValue::from(*item));
            table.entry("pcs".to_owned()).or_default().push(CellValue::Number(*pcs));
            table.entry("amount".to_owned()).or_default().push(CellValue::Number(*amount));
        }
        table
    }

    fn config() -> AggregateConfig {
        AggregateConfig {
            keys: vec!["po".to_owned(), "item".to_owned()],
            sums: vec!["pcs".to_owned(), "amount".to_owned()],
        }
    }

    #[test]
    fn groups_in_first_seen_order_across_tables() {
        let mut tables = RawData::new();
        tables.insert(1, table(&[("P2", "B", 5.0, 50.0), ("P1", "A", 1.0, 10.0), ("P2", "B", 2.0, 20.0)]));
        tables.insert(2, table(&[("P1", "A", 4.0, 40.0), ("P3", "C", 1.0, 1.5)]));

        let summary = aggregate(&tables, &config());
        assert_eq!(summary["po"], vec![CellValue::from("P2"), CellValue::from("P1"), CellValue::from("P3")]);
        assert_eq!(summary["item"], vec![CellValue::from("B"), CellValue::from("A"), CellValue::from("C")]);
        assert_eq!(summary["pcs"], vec![CellValue::Number(7.0), CellValue::Number(5.0), CellValue::Number(1.0)]);
        assert_eq!(summary["amount"][2], CellValue::Number(1.5));
    }

    #[test]
    fn blank_keys_are_skipped_and_missing_fields_sum_to_zero() {
        let mut tables = RawData::new();
        tables.insert(1, table(&[("", " ", 9.0, 9.0), ("P1", "A", 1.0, 1.0)]));
        let config = AggregateConfig {
            keys: vec!["po".to_owned(), "item".to_owned()],
            sums: vec!["pcs".to_owned(), "net".to_owned()],
        };

        let summary = aggregate(&tables, &config);
        assert_eq!(summary["po"], vec![CellValue::from("P1")]);
        assert_eq!(summary["net"], vec![CellValue::Number(0.0)]);
    }
}
