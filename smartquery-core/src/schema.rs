use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Number,
    Date,
    Boolean,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(key: impl Into<String>, label: impl Into<String>, column_type: ColumnType) -> Self {
        Self { key: key.into(), label: label.into(), column_type }
    }
}

pub fn find_column<'a>(schema: &'a [Column], key: &str) -> Option<&'a Column> {
    schema.iter().find(|c| c.key == key)
}

/// Infer a schema from the first row, the way a table with no declared columns
/// would: numbers, booleans, date-looking text, everything else as string.
pub fn infer_columns(first_row: &IndexMap<String, Value>) -> Vec<Column> {
    first_row
        .iter()
        .map(|(key, value)| {
            let column_type = match value {
                Value::Number(_) => ColumnType::Number,
                Value::Bool(_) => ColumnType::Boolean,
                v if v.as_date().is_some() => ColumnType::Date,
                _ => ColumnType::String,
            };
            Column::new(key.clone(), label_from_key(key), column_type)
        })
        .collect()
}

/// "hireDate" -> "Hire Date", "salary" -> "Salary", "first_name" -> "First name"
pub fn label_from_key(key: &str) -> String {
    let mut label = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if i == 0 {
            label.extend(ch.to_uppercase());
        } else if ch.is_ascii_uppercase() {
            label.push(' ');
            label.push(ch);
        } else if ch == '_' {
            label.push(' ');
        } else {
            label.push(ch);
        }
    }
    label
}
