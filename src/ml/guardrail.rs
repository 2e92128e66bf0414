use serde::{Deserialize, Serialize};

/// Message returned when free text does not look like a cyber incident
pub const DEFAULT_REJECTION_MESSAGE: &str = "The entered content does not appear to describe a cyber incident. Please provide a valid incident description.";

/// Keyword pre-filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Domain keywords; matched case-insensitively as substrings
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Message returned on rejection
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            rejection_message: default_rejection_message(),
        }
    }
}

/// Outcome of the keyword check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    /// At least one keyword matched; the listed ones did
    Accepted { matched: Vec<String> },

    /// No keyword matched
    Rejected,
}

impl GuardrailVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GuardrailVerdict::Accepted { .. })
    }
}

/// Guardrail gating which free text is sent to the text-only model.
///
/// This is a coarse relevance check, not a classifier: short keywords match
/// inside longer words and unrelated text that happens to mention one passes.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    /// (original keyword, lowercased keyword)
    keywords: Vec<(String, String)>,
    rejection_message: String,
}

impl KeywordFilter {
    pub fn new(config: &GuardrailConfig) -> Self {
        let keywords = config
            .keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| (k.clone(), k.to_lowercase()))
            .collect();

        Self {
            keywords,
            rejection_message: config.rejection_message.clone(),
        }
    }

    pub fn check(&self, text: &str) -> GuardrailVerdict {
        let lowered = text.to_lowercase();
        let matched: Vec<String> = self
            .keywords
            .iter()
            .filter(|(_, needle)| lowered.contains(needle.as_str()))
            .map(|(keyword, _)| keyword.clone())
            .collect();

        if matched.is_empty() {
            GuardrailVerdict::Rejected
        } else {
            GuardrailVerdict::Accepted { matched }
        }
    }

    pub fn rejection_message(&self) -> &str {
        &self.rejection_message
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(&GuardrailConfig::default())
    }
}

fn default_keywords() -> Vec<String> {
    [
        "aq",
        "ransomware",
        "malware",
        "DDoS",
        "data breach",
        "SQL injection",
        "cross-site scripting",
        "privilege escalation",
        "zero-day",
        "brute force",
        "botnet",
        "APT",
        "trojan",
        "virus",
        "worm",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

fn default_rejection_message() -> String {
    DEFAULT_REJECTION_MESSAGE.to_string()
}
