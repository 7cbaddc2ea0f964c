use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int32Type, Int64Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use chrono::NaiveDateTime;
use log::info;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Column, Row, Value};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Load cone records from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – one cone per line, header row with column names
/// * `.json`    – `[{ "cone_x_microns": 1.2, ... }, ...]`
/// * `.parquet` – flat columns (strings, ints, floats, bools, timestamps)
///
/// Rows without an `id` column are numbered from 1 in file order.
pub fn load_file(path: &Path) -> Result<Vec<Row>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let rows = match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        "parquet" | "pq" => load_parquet(path),
        other => bail!("cannot load cones from .{other} files"),
    }?;
    info!("loaded {} cone records from {}", rows.len(), path.display());
    Ok(with_ids(rows))
}

fn with_ids(rows: Vec<Row>) -> Vec<Row> {
    let id = Column::Id.name();
    rows.into_iter()
        .zip(1i64..)
        .map(|(row, n)| {
            if row.contains(id) {
                return row;
            }
            // Keep `id` as the leading column, as the storage schema does.
            row.iter()
                .fold(Row::new().with(id, n), |out, (k, v)| out.with(k, v.clone()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

fn load_csv(path: &Path) -> Result<Vec<Row>> {
    let mut reader = csv::Reader::from_path(path).context("opening cone CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading cone CSV header")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("cone CSV record {}", row_no + 1))?;
        let row = headers
            .iter()
            .zip(record.iter())
            .fold(Row::new(), |row, (name, cell)| row.with(name.as_str(), guess_value_type(cell)));
        rows.push(row);
    }
    Ok(rows)
}

/// Infer a cell's type the way a loosely typed store would.
pub fn guess_value_type(s: &str) -> Value {
    let s = s.trim();
    if s.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::Float(f);
    }
    if s == "true" || s == "false" {
        return Value::Bool(s == "true");
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Value::Timestamp(t);
        }
    }
    Value::Text(s.to_string())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<Vec<Row>> {
    let text = std::fs::read_to_string(path).context("reading cone JSON")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing cone JSON")?;

    let records = root
        .as_array()
        .context("cone JSON must be an array of records")?;

    records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let obj = rec
                .as_object()
                .with_context(|| format!("cone record {i} is not an object"))?;
            Ok(obj
                .iter()
                .fold(Row::new(), |row, (key, val)| row.with(key.as_str(), json_to_value(val))))
        })
        .collect()
}

fn json_to_value(val: &JsonValue) -> Value {
    match val {
        JsonValue::String(s) => guess_value_type(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::Text(n.to_string())
            }
        }
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Null => Value::Null,
        other => Value::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

fn load_parquet(path: &Path) -> Result<Vec<Row>> {
    let file = std::fs::File::open(path).context("opening cone parquet")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet footer")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("decoding parquet batch")?;
        let schema = batch.schema();
        let names: Vec<&String> = schema.fields().iter().map(|f| f.name()).collect();

        for row in 0..batch.num_rows() {
            let record = names
                .iter()
                .zip(batch.columns())
                .fold(Row::new(), |out, (name, col)| {
                    out.with(name.as_str(), extract_value(col, row))
                });
            rows.push(record);
        }
    }
    Ok(rows)
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_value(col: &Arc<dyn Array>, row: usize) -> Value {
    if col.is_null(row) {
        return Value::Null;
    }
    match col.data_type() {
        DataType::Utf8 => Value::Text(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::Text(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => Value::Integer(i64::from(col.as_primitive::<Int32Type>().value(row))),
        DataType::Int64 => Value::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => Value::Float(f64::from(col.as_primitive::<Float32Type>().value(row))),
        DataType::Float64 => Value::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => Value::Bool(col.as_boolean().value(row)),
        DataType::Timestamp(unit, _) => {
            let t = match unit {
                TimeUnit::Second => col.as_primitive::<TimestampSecondType>().value_as_datetime(row),
                TimeUnit::Millisecond => {
                    col.as_primitive::<TimestampMillisecondType>().value_as_datetime(row)
                }
                TimeUnit::Microsecond => {
                    col.as_primitive::<TimestampMicrosecondType>().value_as_datetime(row)
                }
                TimeUnit::Nanosecond => {
                    col.as_primitive::<TimestampNanosecondType>().value_as_datetime(row)
                }
            };
            t.map_or(Value::Null, Value::Timestamp)
        }
        other => Value::Text(format!("{other:?}")),
    }
}
