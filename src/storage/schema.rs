use crate::error::{AppError, Result};
use crate::models::{Advisory, FeatureSet, LabeledAdvisory, UNKNOWN_CATEGORY};
use crate::storage::table::{AdvisoryTable, CVSS_COLUMN, CWE_NAME_COLUMN, SUMMARY_COLUMN};

/// Problems found while checking a table, collected before any encoding
#[derive(Debug, Default)]
struct SchemaReport {
    missing_columns: Vec<&'static str>,
    bad_rows: Vec<String>,
}

impl SchemaReport {
    fn into_result(self, what: &str) -> Result<()> {
        if self.missing_columns.is_empty() && self.bad_rows.is_empty() {
            return Ok(());
        }

        let mut problems = Vec::new();
        for column in &self.missing_columns {
            problems.push(format!("'{}' column missing", column));
        }
        problems.extend(self.bad_rows);
        Err(AppError::Validation(format!("{}: {}", what, problems.join("; "))))
    }
}

/// Validate a batch-input table and extract its advisories in row order.
///
/// `cwe_name` is required as a column; `summary` is optional and defaults to
/// empty text. Blank category cells become `Unknown`. A row with both fields
/// blank is rejected, and any rejection fails the whole batch.
pub fn batch_advisories(table: &AdvisoryTable) -> Result<Vec<Advisory>> {
    let mut report = SchemaReport::default();

    let cwe_idx = table.column_index(CWE_NAME_COLUMN);
    if cwe_idx.is_none() {
        report.missing_columns.push(CWE_NAME_COLUMN);
    }
    let summary_idx = table.column_index(SUMMARY_COLUMN);

    let mut advisories = Vec::with_capacity(table.len());
    if let Some(cwe_idx) = cwe_idx {
        for row in 0..table.len() {
            let cwe = table.cell(row, cwe_idx);
            let summary = summary_idx.and_then(|idx| table.cell(row, idx));
            match Advisory::from_fields(cwe, summary) {
                Some(advisory) => advisories.push(advisory),
                None => report
                    .bad_rows
                    .push(format!("row {}: both cwe_name and summary are blank", row + 1)),
            }
        }
    }

    report.into_result("invalid batch input")?;
    Ok(advisories)
}

/// Validate a historical table and extract labeled advisories.
///
/// `cvss` is always required and must be numeric in every row. `cwe_name` is
/// required as a column only for models that consume it.
pub fn training_records(
    table: &AdvisoryTable,
    feature_set: FeatureSet,
) -> Result<Vec<LabeledAdvisory>> {
    let mut report = SchemaReport::default();

    let cvss_idx = table.column_index(CVSS_COLUMN);
    if cvss_idx.is_none() {
        report.missing_columns.push(CVSS_COLUMN);
    }
    let cwe_idx = table.column_index(CWE_NAME_COLUMN);
    if cwe_idx.is_none() && feature_set.uses_category() {
        report.missing_columns.push(CWE_NAME_COLUMN);
    }
    let summary_idx = table.column_index(SUMMARY_COLUMN);

    let mut records = Vec::with_capacity(table.len());
    if let Some(cvss_idx) = cvss_idx {
        for row in 0..table.len() {
            let raw = table.cell(row, cvss_idx).unwrap_or_default();
            let cvss = match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => {
                    report
                        .bad_rows
                        .push(format!("row {}: cvss '{}' is not a number", row + 1, raw));
                    continue;
                }
            };

            let cwe = cwe_idx.and_then(|idx| table.cell(row, idx));
            let summary = summary_idx.and_then(|idx| table.cell(row, idx));
            let advisory = Advisory::from_fields(cwe, summary)
                .unwrap_or_else(|| Advisory::new(UNKNOWN_CATEGORY, ""));
            records.push(LabeledAdvisory { advisory, cvss });
        }
    }

    report.into_result("invalid training data")?;
    Ok(records)
}
