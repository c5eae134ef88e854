use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// The well-known Titanic CSV used as the bundled sample dataset.
pub const SAMPLE_DATASET_URL: &str =
    "https://raw.githubusercontent.com/datasciencedojo/datasets/master/titanic.csv";

const FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("dataset has no columns")]
    NoColumns,
    #[error("empty column name at position {0}")]
    EmptyColumnName(usize),
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not read dataset: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not fetch dataset: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// The loaded dataset: ordered unique column names and rows of lightly typed
/// cells. Read-only to the loop; execution always works on a serialized copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, IngestError> {
        let mut rdr = csv::ReaderBuilder::new().from_reader(bytes);
        let headers = rdr.headers()?.clone();
        if headers.is_empty() {
            return Err(IngestError::NoColumns);
        }
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(headers.len());
        for (i, name) in headers.iter().enumerate() {
            let name = name.trim();
            if name.is_empty() {
                return Err(IngestError::EmptyColumnName(i));
            }
            if !seen.insert(name.to_string()) {
                return Err(IngestError::DuplicateColumn(name.to_string()));
            }
            columns.push(name.to_string());
        }
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(infer_cell).collect());
        }
        Ok(Self { columns, rows })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, IngestError> {
        let bytes = std::fs::read(path)?;
        Self::from_csv_bytes(&bytes)
    }

    pub async fn from_url(url: &str) -> Result<Self, IngestError> {
        let bytes = reqwest::Client::new()
            .get(url)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Self::from_csv_bytes(&bytes)
    }

    /// Fetches one sheet of a published spreadsheet via its CSV export endpoint.
    pub async fn from_published_sheet(doc_id: &str, sheet_name: &str) -> Result<Self, IngestError> {
        Self::from_url(&sheet_export_url(doc_id, sheet_name)).await
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    /// First `n` rows, for previews.
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Split-orient serialization for the remote execution wire format:
    /// `{"columns": [...], "index": [...], "data": [[...], ...]}`.
    pub fn to_split_json(&self) -> Value {
        serde_json::json!({
            "columns": self.columns,
            "index": (0..self.rows.len()).collect::<Vec<usize>>(),
            "data": self.rows,
        })
    }

    /// Writes the table back out as CSV; used to hand execution a copy.
    pub fn write_csv(&self, path: &Path) -> Result<(), IngestError> {
        let mut wtr = csv::Writer::from_path(path).map_err(IngestError::from)?;
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(cell_to_field))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

pub fn sheet_export_url(doc_id: &str, sheet_name: &str) -> String {
    format!(
        "https://docs.google.com/spreadsheets/d/{}/gviz/tq?tqx=out:csv&sheet={}",
        doc_id,
        utf8_percent_encode(sheet_name, NON_ALPHANUMERIC)
    )
}

fn infer_cell(raw: &str) -> Value {
    let t = raw.trim();
    if t.is_empty() {
        return Value::Null;
    }
    if t.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if t.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = t.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = t.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

fn cell_to_field(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITANIC_HEAD: &str = "\
PassengerId,Survived,Pclass,Name,Sex,Age,Fare
1,0,3,\"Braund, Mr. Owen Harris\",male,22,7.25
2,1,1,\"Cumings, Mrs. John Bradley\",female,38,71.2833
3,1,3,\"Heikkinen, Miss. Laina\",female,26,7.925
";

    #[test]
    fn parses_csv_with_typed_cells() {
        let t = Table::from_csv_bytes(TITANIC_HEAD.as_bytes()).unwrap();
        assert_eq!(t.shape(), (3, 7));
        assert_eq!(t.columns[4], "Sex");
        assert_eq!(t.rows[0][0], Value::from(1));
        assert_eq!(t.rows[1][6], Value::from(71.2833));
        assert_eq!(t.rows[2][4], Value::from("female"));
    }

    #[test]
    fn blank_cells_become_null() {
        let t = Table::from_csv_bytes(b"a,b\n1,\n,x\n").unwrap();
        assert_eq!(t.rows[0][1], Value::Null);
        assert_eq!(t.rows[1][0], Value::Null);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Table::from_csv_bytes(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(err, IngestError::Csv(_)));
    }

    #[test]
    fn duplicate_and_empty_headers_are_rejected() {
        assert!(matches!(
            Table::from_csv_bytes(b"a,a\n1,2\n").unwrap_err(),
            IngestError::DuplicateColumn(_)
        ));
        assert!(matches!(
            Table::from_csv_bytes(b"a,\n1,2\n").unwrap_err(),
            IngestError::EmptyColumnName(1)
        ));
    }

    #[test]
    fn split_json_carries_columns_index_and_data() {
        let t = Table::from_csv_bytes(b"x,y\n1,2\n3,4\n").unwrap();
        let v = t.to_split_json();
        assert_eq!(v["columns"], serde_json::json!(["x", "y"]));
        assert_eq!(v["index"], serde_json::json!([0, 1]));
        assert_eq!(v["data"][1], serde_json::json!([3, 4]));
    }

    #[test]
    fn head_limits_rows_only() {
        let t = Table::from_csv_bytes(TITANIC_HEAD.as_bytes()).unwrap();
        let h = t.head(2);
        assert_eq!(h.shape(), (2, 7));
        assert_eq!(h.columns, t.columns);
    }

    #[test]
    fn written_copy_parses_back_identically() {
        let t = Table::from_csv_bytes(TITANIC_HEAD.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        t.write_csv(&path).unwrap();
        let back = Table::from_csv_path(&path).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn sheet_export_url_encodes_sheet_name() {
        let url = sheet_export_url("1AbC", "My Sheet");
        assert!(url.contains("/d/1AbC/"));
        assert!(url.ends_with("sheet=My%20Sheet"));
    }
}
