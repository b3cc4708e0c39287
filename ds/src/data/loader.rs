//! CSV loading for the command line
//!
//! The agent never reads files itself; the CLI builds tables here and hands
//! the registry over.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::{DataError, Table};

impl Table {
    /// Read a headed CSV file, inferring a type for every cell
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        debug!(?path, "Table::from_csv_path: called");
        let mut reader = csv::Reader::from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(infer_cell).collect());
        }
        debug!(rows = rows.len(), columns = columns.len(), "Table::from_csv_path: loaded");
        Table::new(columns, rows)
    }
}

/// Turn one raw CSV field into a typed JSON cell
pub fn infer_cell(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() || matches!(s, "NA" | "N/A" | "NaN" | "nan" | "null" | "NULL") {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(f) = s.parse::<f64>().ok().filter(|f| f.is_finite()) {
        return Value::from(f);
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(s.to_string()),
    }
}

/// Parse a `NAME=PATH` argument; a bare path is named after its file stem
pub fn parse_dataset_arg(arg: &str) -> Result<(String, PathBuf), DataError> {
    debug!(%arg, "parse_dataset_arg: called");
    if let Some((name, path)) = arg.split_once('=') {
        let name = name.trim();
        if name.is_empty() || path.trim().is_empty() {
            return Err(DataError::InvalidArgument(arg.to_string()));
        }
        return Ok((name.to_string(), PathBuf::from(path.trim())));
    }

    let path = PathBuf::from(arg);
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DataError::InvalidArgument(arg.to_string()))?
        .to_string();
    Ok((name, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_infer_cell() {
        assert_eq!(infer_cell("42"), json!(42));
        assert_eq!(infer_cell(" 3.5 "), json!(3.5));
        assert_eq!(infer_cell("TRUE"), json!(true));
        assert_eq!(infer_cell(""), Value::Null);
        assert_eq!(infer_cell("NA"), Value::Null);
        assert_eq!(infer_cell("inf"), json!("inf"));
        assert_eq!(infer_cell("north"), json!("north"));
    }

    #[test]
    fn test_from_csv_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("survey.csv");
        fs::write(&path, "age,region,score\n34,north,1.5\n41,,2\n").unwrap();

        let table = Table::from_csv_path(&path).unwrap();
        assert_eq!(table.columns, vec!["age", "region", "score"]);
        assert_eq!(table.rows[1], vec![json!(41), Value::Null, json!(2)]);
    }

    #[test]
    fn test_from_csv_path_missing_file() {
        let dir = tempdir().unwrap();
        assert!(Table::from_csv_path(dir.path().join("nope.csv")).is_err());
    }

    #[test]
    fn test_parse_dataset_arg() {
        let (name, path) = parse_dataset_arg("sales=data/sales.csv").unwrap();
        assert_eq!(name, "sales");
        assert_eq!(path, PathBuf::from("data/sales.csv"));

        let (name, _) = parse_dataset_arg("data/survey_2024.csv").unwrap();
        assert_eq!(name, "survey_2024");

        assert!(parse_dataset_arg("=x.csv").is_err());
    }
}
