//! Record extraction: turns rows of a data source into `(id, text)` pairs.

use crate::error::{Error, Result};
use crate::DocId;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub type Row = Map<String, Value>;

/// Which rows and columns to read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub table: String,
    /// Joined with a single space, in order.
    pub text_columns: Vec<String>,
    pub id_column: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Exact-match column filters.
    #[serde(default)]
    pub filters: HashMap<String, Value>,
}

impl RecordQuery {
    pub fn new(table: &str, text_columns: &[&str], id_column: &str) -> Self {
        Self {
            table: table.to_string(),
            text_columns: text_columns.iter().map(|c| c.to_string()).collect(),
            id_column: id_column.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.text_columns.is_empty() {
            return Err(Error::Validation("at least one text column is required".into()));
        }
        if self.id_column.is_empty() || self.text_columns.iter().any(String::is_empty) {
            return Err(Error::Validation("column names must not be empty".into()));
        }
        Ok(())
    }
}

/// Anything that can hand back `(id, text)` records.
pub trait DataSource: Send + Sync {
    fn fetch_text_records(&self, query: &RecordQuery) -> Result<Vec<(DocId, String)>>;
}

/// Tables stored as `<root>/[<schema>/]<table>.jsonl` (one object per line)
/// or `<table>.json` (array of objects or a single object).
#[derive(Debug, Clone)]
pub struct JsonRecordSource {
    root: PathBuf,
}

impl JsonRecordSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn table_path(&self, query: &RecordQuery) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        if let Some(schema) = &query.schema {
            check_name("schema", schema)?;
            dir.push(schema);
        }
        check_name("table", &query.table)?;
        for ext in ["jsonl", "json"] {
            let candidate = dir.join(format!("{}.{ext}", query.table));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(Error::NotFound(format!("table {:?} under {}", query.table, dir.display())))
    }
}

impl DataSource for JsonRecordSource {
    fn fetch_text_records(&self, query: &RecordQuery) -> Result<Vec<(DocId, String)>> {
        query.validate()?;
        let path = self.table_path(query)?;
        let rows = read_rows(&path)?;
        let records = extract_records(&rows, query)?;
        tracing::info!(table = %query.table, path = %path.display(), rows = rows.len(), records = records.len(), "fetched text records");
        Ok(records)
    }
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(Error::Validation(format!("invalid {what} name {name:?}")));
    }
    Ok(())
}

/// Read every object row from a `.json` or `.jsonl` file.
pub fn read_rows(path: &Path) -> anyhow::Result<Vec<Row>> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(f);
    let mut rows = Vec::new();
    if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            let row: Row = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: expected a JSON object", path.display(), lineno + 1))?;
            rows.push(row);
        }
    } else {
        let json: Value = serde_json::from_reader(reader).with_context(|| format!("parsing {}", path.display()))?;
        match json {
            Value::Array(arr) => {
                for v in arr {
                    if let Value::Object(row) = v {
                        rows.push(row);
                    }
                }
            }
            Value::Object(row) => rows.push(row),
            _ => anyhow::bail!("{}: expected an object or an array of objects", path.display()),
        }
    }
    Ok(rows)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Apply filters and project `id_column` / `text_columns` out of `rows`.
///
/// A column missing from a row is a [`Error::Validation`]; null text values
/// count as empty. Rows with an empty id are skipped.
pub fn extract_records(rows: &[Row], query: &RecordQuery) -> Result<Vec<(DocId, String)>> {
    query.validate()?;
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        if !query.filters.iter().all(|(col, want)| row.get(col) == Some(want)) {
            continue;
        }
        let id = row
            .get(&query.id_column)
            .map(scalar_to_string)
            .ok_or_else(|| Error::Validation(format!("column not found: {}", query.id_column)))?;
        if id.is_empty() {
            tracing::warn!(column = %query.id_column, "skipping row with empty id");
            continue;
        }
        let mut parts = Vec::with_capacity(query.text_columns.len());
        for col in &query.text_columns {
            let value = row
                .get(col)
                .ok_or_else(|| Error::Validation(format!("column not found: {col}")))?;
            parts.push(scalar_to_string(value));
        }
        records.push((id, parts.join(" ")));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn rec(id: &str, text: &str) -> (DocId, String) {
        (id.to_string(), text.to_string())
    }

    fn rows() -> Vec<Row> {
        vec![
            json!({"id": 1, "title": "Red", "body": "apple", "lang": "en"}),
            json!({"id": "b", "title": "Grün", "body": null, "lang": "de"}),
        ]
        .into_iter()
        .map(|v| match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        })
        .collect()
    }

    #[test]
    fn joins_text_columns_and_stringifies_ids() {
        let q = RecordQuery::new("t", &["title", "body"], "id");
        let got = extract_records(&rows(), &q).unwrap();
        assert_eq!(got, vec![rec("1", "Red apple"), rec("b", "Grün ")]);
    }

    #[test]
    fn filters_are_exact_matches() {
        let mut q = RecordQuery::new("t", &["title"], "id");
        q.filters.insert("lang".into(), json!("de"));
        let got = extract_records(&rows(), &q).unwrap();
        assert_eq!(got, vec![rec("b", "Grün")]);
    }

    #[test]
    fn unknown_column_is_validation_error() {
        let q = RecordQuery::new("t", &["summary"], "id");
        assert!(matches!(extract_records(&rows(), &q), Err(Error::Validation(_))));
        let q = RecordQuery::new("t", &[], "id");
        assert!(matches!(extract_records(&rows(), &q), Err(Error::Validation(_))));
    }

    #[test]
    fn reads_jsonl_tables_under_schema() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shop")).unwrap();
        fs::write(
            dir.path().join("shop/products.jsonl"),
            "{\"sku\": \"a1\", \"name\": \"red car\"}\n\n{\"sku\": \"a2\", \"name\": \"blue car\"}\n",
        )
        .unwrap();
        let source = JsonRecordSource::new(dir.path());
        let mut q = RecordQuery::new("products", &["name"], "sku");
        q.schema = Some("shop".into());
        let got = source.fetch_text_records(&q).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1], rec("a2", "blue car"));

        q.table = "../products".into();
        assert!(matches!(source.fetch_text_records(&q), Err(Error::Validation(_))));
        q.table = "missing".into();
        assert!(matches!(source.fetch_text_records(&q), Err(Error::NotFound(_))));
    }
}
