use crate::error::{AppError, Result};
use crate::models::Advisory;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde_json::{Map, Number, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::debug;

pub const CWE_NAME_COLUMN: &str = "cwe_name";
pub const SUMMARY_COLUMN: &str = "summary";
pub const CVSS_COLUMN: &str = "cvss";

/// Header plus string cells of one CSV file.
///
/// Columns the pipeline does not know about are carried through unchanged so
/// that a predicted table keeps the shape of its input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvisoryTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl AdvisoryTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Table with the scraped layout `cwe_name,summary`
    pub fn from_advisories(advisories: &[Advisory]) -> Self {
        let mut table = Self::new(vec![CWE_NAME_COLUMN.to_string(), SUMMARY_COLUMN.to_string()]);
        table.rows = advisories
            .iter()
            .map(|a| vec![a.cwe_name.clone(), a.summary.clone()])
            .collect();
        table
    }

    /// Parse CSV text. Short rows are padded with empty cells.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let width = headers.len();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().take(width).map(str::to_string).collect();
            row.resize(width, String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table = Self::from_reader(file)?;
        debug!(
            path = %path.display(),
            columns = table.headers.len(),
            rows = table.rows.len(),
            "Read CSV table"
        );
        Ok(table)
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("Failed to flush CSV buffer: {}", e)))
    }

    /// Write the table through a temporary file renamed into place
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_csv_bytes()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = std::path::PathBuf::from(tmp_name);
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        debug!(path = %path.display(), rows = self.rows.len(), "Wrote CSV table");
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell value, `None` if the column is absent
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.headers.len() {
            return Err(AppError::Validation(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.headers.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Overwrite the named column, appending it when absent
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(AppError::Internal(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }

        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.headers.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Rows as JSON objects keyed by header. Numeric cells become numbers and
    /// blank cells become `null`.
    pub fn to_json_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let object: Map<String, Value> = self
                    .headers
                    .iter()
                    .zip(row)
                    .map(|(header, cell)| (header.clone(), cell_to_json(cell)))
                    .collect();
                Value::Object(object)
            })
            .collect()
    }
}

fn cell_to_json(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::Number(int.into());
    }
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}
