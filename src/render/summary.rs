use crate::aggregate::aggregate;
use crate::config::Layout;
use crate::detect::extractor::row_count;
use crate::detect::extractor::RawData;
use crate::detect::extractor::TableData;
use crate::spreadsheet::cell::CellValue;

/// The single table a summary sheet shows: the aggregated rows when the
/// layout configures grouping, otherwise every table's rows in order.
pub fn summary_table(tables: &RawData, layout: &Layout) -> RawData {
    let mut summary = RawData::new();
    if tables.is_empty() {
        return summary;
    }
    let table = match &layout.aggregate {
        Some(config) => aggregate(tables, config),
        None => concatenate(tables),
    };
    summary.insert(1, table);
    summary
}

fn concatenate(tables: &RawData) -> TableData {
    let mut combined = TableData::new();
    let mut rows = 0;
    for table in tables.values() {
        let count = row_count(table);
        for (field, values) in table {
            let column = combined.entry(field.to_owned()).or_insert_with(Vec::new);
            column.resize(rows, CellValue::Empty);
            column.extend(values.iter().cloned());
        }
        rows += count;
    }
    for column in combined.values_mut() {
        column.resize(rows, CellValue::Empty);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregateConfig;

    fn table(fields: &[(&str, &[&str])]) -> TableData {
        fields
            .iter()
            .map(|(field, values)| (field.to_string(), values.iter().map(|value| CellValue::from(*value)).collect()))
            .collect()
    }

    #[test]
    fn concatenates_tables_with_different_fields() {
        let mut tables = RawData::new();
        tables.insert(1, table(&[("po", &["P1", "P2"]), ("item", &["A", "B"])]));
        tables.insert(2, table(&[("po", &["P3"]), ("remarks", &["x"])]));

        let summary = summary_table(&tables, &Layout::default());
        let combined = &summary[&1];
        assert_eq!(row_count(combined), 3);
        assert_eq!(combined["po"][2], CellValue::from("P3"));
        assert_eq!(combined["item"], vec![CellValue::from("A"), CellValue::from("B"), CellValue::Empty]);
        assert_eq!(combined["remarks"], vec![CellValue::Empty, CellValue::Empty, CellValue::from("x")]);
    }

    #[test]
    fn aggregates_when_configured() {
        let mut tables = RawData::new();
        tables.insert(1, table(&[("po", &["P1", "P1"]), ("pcs", &["2", "3"])]));
        let layout = Layout {
            aggregate: Some(AggregateConfig { keys: vec!["po".to_owned()], sums: vec!["pcs".to_owned()] }),
            ..Layout::default()
        };

        let summary = summary_table(&tables, &layout);
        assert_eq!(summary[&1]["pcs"], vec![CellValue::Number(5.0)]);
        assert!(summary_table(&RawData::new(), &layout).is_empty());
    }
}
