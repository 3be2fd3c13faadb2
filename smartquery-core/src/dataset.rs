use crate::schema::{infer_columns, label_from_key, Column, ColumnType};
use crate::value::Value;
use arrow::array::{Array, BooleanArray, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use smartquery_common::{Result, SmartQueryError};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static NULL: Value = Value::Null;

/// One immutable record, keyed by column key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    cells: IndexMap<String, Value>,
}

impl Row {
    pub fn new(cells: IndexMap<String, Value>) -> Self {
        Self { cells }
    }

    /// Missing keys read as `Null`.
    pub fn get(&self, key: &str) -> &Value {
        self.cells.get(key).unwrap_or(&NULL)
    }

    pub fn cells(&self) -> &IndexMap<String, Value> {
        &self.cells
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// The source-of-truth rows. Never mutated; views are new `Vec<Arc<Row>>`.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Arc<[Arc<Row>]>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    Rows(Vec<IndexMap<String, serde_json::Value>>),
    WithSchema {
        columns: Vec<Column>,
        rows: Vec<IndexMap<String, serde_json::Value>>,
    },
}

impl Dataset {
    pub fn new(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter().map(Arc::new).collect(),
        }
    }

    /// Build a dataset whose schema is inferred from the first row.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows.first().map(|r| infer_columns(r.cells())).unwrap_or_default();
        Self::new(columns, rows)
    }

    /// Accepts either a bare array of objects or `{"columns": [...], "rows": [...]}`.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let doc: JsonDocument = serde_json::from_str(s)?;
        let to_row = |obj: IndexMap<String, serde_json::Value>| {
            Row::new(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        };
        Ok(match doc {
            JsonDocument::Rows(rows) => Self::from_rows(rows.into_iter().map(to_row).collect()),
            JsonDocument::WithSchema { columns, rows } => {
                Self::new(columns, rows.into_iter().map(to_row).collect())
            }
        })
    }

    /// Load a file, a directory of `.json`/`.parquet` files, or a glob pattern.
    pub fn load(input: &str) -> Result<Self> {
        let sources = resolve_sources(input)?;
        if sources.is_empty() {
            return Err(SmartQueryError::Other(format!("no dataset files found: {input}")));
        }
        let mut parts = Vec::with_capacity(sources.len());
        for path in &sources {
            tracing::debug!(path = %path.display(), "loading dataset file");
            parts.push(load_file(path)?);
        }
        Ok(Self::concat(parts))
    }

    fn concat(parts: Vec<Dataset>) -> Self {
        let mut columns: Vec<Column> = Vec::new();
        let mut rows: Vec<Arc<Row>> = Vec::new();
        for part in parts {
            for col in part.columns {
                if !columns.iter().any(|c| c.key == col.key) {
                    columns.push(col);
                }
            }
            rows.extend(part.rows.iter().cloned());
        }
        Self { columns, rows: rows.into() }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Arc<Row>] {
        &self.rows
    }

    /// A fresh, unfiltered view of every row.
    pub fn all_rows(&self) -> Vec<Arc<Row>> {
        self.rows.to_vec()
    }

    pub fn sample(&self, n: usize) -> Vec<Arc<Row>> {
        self.rows.iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_dataset_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("parquet")
    )
}

fn scan_recursive(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            scan_recursive(&path, out)?;
        } else if is_dataset_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// resolve a path string: single file, directory, or glob pattern
pub fn resolve_sources(input: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(input);
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut results = Vec::new();
    if path.is_dir() {
        scan_recursive(path, &mut results)?;
    } else if let Ok(entries) = glob::glob(input) {
        results.extend(entries.flatten().filter(|p| p.is_file() && is_dataset_file(p)));
    }
    results.sort(); // deterministic row order across platforms
    Ok(results)
}

fn load_file(path: &Path) -> Result<Dataset> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => load_parquet(path),
        _ => Dataset::from_json_str(&std::fs::read_to_string(path)?),
    }
}

pub fn load_parquet(path: &Path) -> Result<Dataset> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let columns: Vec<Column> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| Column::new(f.name().clone(), label_from_key(f.name()), arrow_column_type(f.data_type())))
        .collect();
    let reader = builder.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(batch_rows(&batch?)?);
    }
    Ok(Dataset::new(columns, rows))
}

fn arrow_column_type(dt: &DataType) -> ColumnType {
    match dt {
        DataType::Boolean => ColumnType::Boolean,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => ColumnType::Date,
        dt if dt.is_numeric() => ColumnType::Number,
        _ => ColumnType::String,
    }
}

fn batch_rows(batch: &RecordBatch) -> Result<Vec<Row>> {
    let schema = batch.schema();
    let mut cells: Vec<IndexMap<String, Value>> =
        vec![IndexMap::with_capacity(schema.fields().len()); batch.num_rows()];
    let options = FormatOptions::default();
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let name = field.name();
        match field.data_type() {
            DataType::Boolean => {
                let bools = array
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| SmartQueryError::Other(format!("column {name}: expected booleans")))?;
                for (i, row) in cells.iter_mut().enumerate() {
                    let v = if bools.is_null(i) { Value::Null } else { Value::Bool(bools.value(i)) };
                    row.insert(name.clone(), v);
                }
            }
            dt if dt.is_numeric() => {
                let floats = cast(array, &DataType::Float64)?;
                let floats = floats
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| SmartQueryError::Other(format!("column {name}: cast to f64 failed")))?;
                for (i, row) in cells.iter_mut().enumerate() {
                    let v = if floats.is_null(i) { Value::Null } else { Value::Number(floats.value(i)) };
                    row.insert(name.clone(), v);
                }
            }
            _ => {
                let formatter = ArrayFormatter::try_new(array.as_ref(), &options)?;
                for (i, row) in cells.iter_mut().enumerate() {
                    let v = if array.is_null(i) {
                        Value::Null
                    } else {
                        Value::Text(formatter.value(i).to_string())
                    };
                    row.insert(name.clone(), v);
                }
            }
        }
    }
    Ok(cells.into_iter().map(Row::new).collect())
}
