use crate::dataset::Row;
use crate::schema::Column;
use std::sync::Arc;

/// Rows shown to the provider, regardless of how many the caller passes.
pub const MAX_SAMPLE_ROWS: usize = 2;

const EXAMPLE: &str = r#"{
  "filters": [
    {"column": "age", "operator": ">", "value": 30},
    {"column": "department", "operator": "contains", "value": "IT"}
  ],
  "sort": {"column": "salary", "direction": "desc"},
  "analysis": "IT department employees over 30, sorted by salary"
}"#;

pub fn build_prompt(query: &str, schema: &[Column], sample: &[Arc<Row>]) -> String {
    let columns = schema
        .iter()
        .map(|c| format!("{} ({})", c.key, c.column_type))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = sample
        .iter()
        .take(MAX_SAMPLE_ROWS)
        .map(|r| serde_json::to_string(r.as_ref()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Analyze this query about tabular data: \"{query}\"\n\
         Available columns: {columns}\n\
         Sample data:\n{rows}\n\
         Return ONLY a JSON object with filter conditions, no explanation, no markdown, no extra text. \
         Use the most relevant column for the value. Operators: >, <, >=, <=, ==, !=, contains, \
         starts_with, ends_with, max, min. Example format:\n{EXAMPLE}"
    )
}
