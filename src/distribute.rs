//! Spreads lump-sum quantities over the rows they cover.
//!
//! Source sheets often state a weight or volume once, in a cell merged down
//! over several line items. After extraction that reads as one number
//! followed by blanks; the number is shared out over those rows in
//! proportion to a basis field such as the piece count.

use crate::config::DistributionConfig;
use crate::detect::extractor::TableData;
use crate::spreadsheet::cell::CellValue;
use tracing::debug;

/// Decimal places an `f64` can still round to.
const MAX_PRECISION: u32 = 15;

/// A number followed by the blank rows it covers, bounds inclusive.
#[derive(Copy, Clone, Debug, PartialEq)]
struct LumpGroup {
    first: usize,
    last: usize,
    total: f64,
}

/// Distributes every configured field of one table in place and returns
/// the number of groups that were spread.
pub fn distribute(table: &mut TableData, config: &DistributionConfig) -> usize {
    let weights: Option<Vec<f64>> = table
        .get(&config.basis)
        .map(|values| values.iter().map(|value| value.to_number().unwrap_or(0.0)).collect());

    let mut spread = 0;
    for field in &config.fields {
        let Some(values) = table.get_mut(field) else {
            continue;
        };
        for group in lump_groups(values) {
            let weights = weights.as_ref().map(|weights| {
                (group.first..=group.last)
                    .map(|row| weights.get(row).copied().unwrap_or(0.0))
                    .collect::<Vec<_>>()
            });
            let shares = split(group.total, group.last - group.first + 1, weights.as_deref(), config.precision);
            debug!(
                "Spreading {} of '{}' over rows {}..={}",
                group.total, field, group.first, group.last
            );
            for (offset, share) in shares.into_iter().enumerate() {
                values[group.first + offset] = CellValue::Number(share);
            }
            spread += 1;
        }
    }
    spread
}

fn lump_groups(values: &[CellValue]) -> Vec<LumpGroup> {
    let mut groups = Vec::new();
    let mut current: Option<LumpGroup> = None;
    for (row, value) in values.iter().enumerate() {
        if value.is_blank() {
            if let Some(group) = current.as_mut() {
                group.last = row;
            }
            continue;
        }
        groups.extend(current.take());
        current = value.to_number().map(|total| LumpGroup {
            first: row,
            last: row,
            total,
        });
    }
    groups.extend(current);
    groups.retain(|group| group.last > group.first);
    groups
}

/// Shares of `total` over `rows` rows. The last share takes the rounding
/// remainder so the shares add up to `total`.
fn split(total: f64, rows: usize, weights: Option<&[f64]>, precision: u32) -> Vec<f64> {
    let factor = 10f64.powi(precision.min(MAX_PRECISION) as i32);
    let round = |value: f64| (value * factor).round() / factor;

    let weight_sum: f64 = weights.map(|weights| weights.iter().sum()).unwrap_or(0.0);
    let mut shares: Vec<f64> = match weights {
        Some(weights) if weight_sum.abs() > f64::EPSILON => {
            weights.iter().map(|weight| round(total * weight / weight_sum)).collect()
        }
        _ => vec![round(total / rows as f64); rows],
    };
    if let Some((last, others)) = shares.split_last_mut() {
        *last = round(total - others.iter().sum::<f64>());
    }
    shares
}
