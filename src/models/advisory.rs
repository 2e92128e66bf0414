use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Label substituted when an advisory carries no weakness category
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// A scraped or historical security advisory, normalised for encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Advisory {
    /// CWE weakness-category label
    pub cwe_name: String,

    /// Free-text advisory summary
    pub summary: String,
}

impl Advisory {
    pub fn new(cwe_name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            cwe_name: cwe_name.into(),
            summary: summary.into(),
        }
    }

    /// Build an advisory from optional fields, filling the documented defaults.
    ///
    /// A blank category becomes [`UNKNOWN_CATEGORY`] and a blank summary becomes
    /// the empty string. Returns `None` when both are blank, since such a row
    /// carries nothing to score.
    pub fn from_fields(cwe_name: Option<&str>, summary: Option<&str>) -> Option<Self> {
        let cwe_name = cwe_name.map(str::trim).filter(|s| !s.is_empty());
        let summary = summary.map(str::trim).filter(|s| !s.is_empty());

        if cwe_name.is_none() && summary.is_none() {
            return None;
        }

        Some(Self {
            cwe_name: cwe_name.unwrap_or(UNKNOWN_CATEGORY).to_string(),
            summary: summary.unwrap_or_default().to_string(),
        })
    }

    /// Text-only advisory, as submitted through the free-text endpoint
    pub fn from_description(description: impl Into<String>) -> Self {
        Self {
            cwe_name: UNKNOWN_CATEGORY.to_string(),
            summary: description.into(),
        }
    }
}

/// Historical advisory with its ground-truth CVSS score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledAdvisory {
    pub advisory: Advisory,

    /// CVSS base score used as the regression target
    pub cvss: f64,
}

impl LabeledAdvisory {
    pub fn new(cwe_name: impl Into<String>, summary: impl Into<String>, cvss: f64) -> Self {
        Self {
            advisory: Advisory::new(cwe_name, summary),
            cvss,
        }
    }
}

/// Which advisory fields a model consumes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FeatureSet {
    /// One-hot category plus TF-IDF summary; used for batch scoring
    CategoryAndSummary,

    /// TF-IDF summary only; used for free-text scoring
    SummaryOnly,
}

impl FeatureSet {
    pub fn uses_category(&self) -> bool {
        matches!(self, FeatureSet::CategoryAndSummary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_from_fields_defaults() {
        let advisory = Advisory::from_fields(None, Some("Heap overflow in parser")).unwrap();
        assert_eq!(advisory.cwe_name, UNKNOWN_CATEGORY);
        assert_eq!(advisory.summary, "Heap overflow in parser");

        let advisory = Advisory::from_fields(Some("CWE-79"), Some("   ")).unwrap();
        assert_eq!(advisory.cwe_name, "CWE-79");
        assert_eq!(advisory.summary, "");
    }

    #[test]
    fn test_from_fields_rejects_blank_rows() {
        assert!(Advisory::from_fields(None, None).is_none());
        assert!(Advisory::from_fields(Some(""), Some(" ")).is_none());
    }

    #[test]
    fn test_feature_set_names() {
        assert_eq!(FeatureSet::CategoryAndSummary.to_string(), "category-and-summary");
        assert_eq!(
            FeatureSet::from_str("summary-only").unwrap(),
            FeatureSet::SummaryOnly
        );
        assert!(FeatureSet::CategoryAndSummary.uses_category());
        assert!(!FeatureSet::SummaryOnly.uses_category());
    }
}
