use crate::dataset::Dataset;
use crate::schema::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

// --- per-column summary over the whole dataset ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub column_key: String,
    pub column_type: ColumnType,
    /// non-null cells
    pub count: usize,
    pub null_count: usize,
    pub distinct_count: usize,
    /// Number columns only; `None` when no cell coerces.
    pub numeric: Option<NumericSummary>,
}

pub fn column_statistics(dataset: &Dataset) -> Vec<ColumnSummary> {
    dataset
        .columns()
        .iter()
        .map(|col| {
            let mut count = 0;
            let mut null_count = 0;
            let mut distinct = HashSet::new();
            let mut numbers = Vec::new();
            for row in dataset.rows() {
                let v = row.get(&col.key);
                if v.is_null() {
                    null_count += 1;
                    continue;
                }
                count += 1;
                distinct.insert(v.as_text().to_lowercase());
                if col.column_type == ColumnType::Number {
                    numbers.extend(v.as_number());
                }
            }
            ColumnSummary {
                column_key: col.key.clone(),
                column_type: col.column_type,
                count,
                null_count,
                distinct_count: distinct.len(),
                numeric: summarize(&numbers),
            }
        })
        .collect()
}

fn summarize(values: &[f64]) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(NumericSummary { min, max, mean })
}
