use crate::error::{AppError, Result};
use crate::ml::models::TextFeatureConfig;
use crate::models::{Advisory, FeatureSet};
use ndarray::{Array2, ArrayViewMut1};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Tokens are runs of two or more word characters
static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w\w+\b").expect("token pattern is valid"));

/// One-hot encoder over the category labels seen during fitting.
///
/// Labels outside the learned set encode to the all-zero vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryEncoder {
    /// Learned labels in sorted order
    categories: Vec<String>,

    /// Label -> column index
    index: HashMap<String, usize>,
}

impl CategoryEncoder {
    pub fn fit<'a>(labels: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let categories: Vec<String> = labels
            .into_iter()
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if categories.is_empty() {
            return Err(AppError::Configuration(
                "cannot fit category encoder on an empty corpus".to_string(),
            ));
        }

        let index = categories
            .iter()
            .enumerate()
            .map(|(idx, label)| (label.clone(), idx))
            .collect();

        Ok(Self { categories, index })
    }

    /// Write the one-hot block for `label` into `out` (which must be zeroed)
    pub fn encode_into(&self, label: &str, mut out: ArrayViewMut1<f64>) {
        if let Some(&idx) = self.index.get(label) {
            out[idx] = 1.0;
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }
}

/// TF-IDF vectorizer with a vocabulary frozen at fit time.
///
/// Vocabulary is the `max_features` most frequent terms across the corpus
/// (ties broken alphabetically), indexed alphabetically. Weights use smooth
/// IDF `ln((1 + n) / (1 + df)) + 1` and each row is L2-normalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    config: TextFeatureConfig,

    /// Term -> column index
    vocabulary: HashMap<String, usize>,

    /// IDF weight per column
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    pub fn fit(config: TextFeatureConfig, documents: &[&str]) -> Result<Self> {
        config.validate()?;

        if documents.is_empty() {
            return Err(AppError::Configuration(
                "cannot fit text vectorizer on an empty corpus".to_string(),
            ));
        }

        let mut corpus_freq: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let terms = Self::analyze(&config, doc);
            let unique: HashSet<&String> = terms.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            for term in terms {
                *corpus_freq.entry(term).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = corpus_freq
            .into_iter()
            .filter(|(term, _)| doc_freq.get(term).copied().unwrap_or(0) >= config.min_doc_freq)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(config.max_features);

        let mut terms: Vec<String> = ranked.into_iter().map(|(term, _)| term).collect();
        terms.sort();

        let n_docs = documents.len() as f64;
        let idf = terms
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        let vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(idx, term)| (term, idx))
            .collect();

        Ok(Self {
            config,
            vocabulary,
            idf,
        })
    }

    /// Write the TF-IDF block for `text` into `out` (which must be zeroed)
    pub fn encode_into(&self, text: &str, mut out: ArrayViewMut1<f64>) {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for term in Self::analyze(&self.config, text) {
            if let Some(&idx) = self.vocabulary.get(&term) {
                *counts.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        for (idx, count) in counts {
            let tf = if self.config.sublinear_tf {
                1.0 + count.ln()
            } else {
                count
            };
            out[idx] = tf * self.idf[idx];
        }

        let norm = out.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            out.mapv_inplace(|v| v / norm);
        }
    }

    /// Lowercase, tokenize and expand to the configured n-grams
    fn analyze(config: &TextFeatureConfig, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = TOKEN_PATTERN
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .collect();

        let (lo, hi) = config.ngram_range;
        let mut terms = Vec::new();
        for n in lo..=hi {
            for window in tokens.windows(n) {
                terms.push(window.join(" "));
            }
        }
        terms
    }

    pub fn vocab_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn contains(&self, term: &str) -> bool {
        self.vocabulary.contains_key(term)
    }

    pub fn width(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Feature Encoder: turns advisories into fixed-width feature rows.
///
/// Layout is `[one-hot(cwe_name) | tfidf(summary)]`, with the category block
/// omitted for [`FeatureSet::SummaryOnly`]. State is frozen once fitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEncoder {
    feature_set: FeatureSet,
    category: Option<CategoryEncoder>,
    text: TfidfVectorizer,
    n_features: usize,
}

impl FeatureEncoder {
    /// Learn encoder state from a corpus. Does not mutate its input.
    pub fn fit(
        feature_set: FeatureSet,
        config: &TextFeatureConfig,
        advisories: &[&Advisory],
    ) -> Result<Self> {
        if advisories.is_empty() {
            return Err(AppError::Configuration(
                "cannot fit feature encoder on an empty corpus".to_string(),
            ));
        }

        let category = if feature_set.uses_category() {
            Some(CategoryEncoder::fit(
                advisories.iter().map(|a| a.cwe_name.as_str()),
            )?)
        } else {
            None
        };

        let documents: Vec<&str> = advisories.iter().map(|a| a.summary.as_str()).collect();
        let text = TfidfVectorizer::fit(config.clone(), &documents)?;

        let n_features = category.as_ref().map_or(0, CategoryEncoder::width) + text.width();
        if n_features == 0 {
            return Err(AppError::Configuration(
                "training corpus yields no features: every summary is empty".to_string(),
            ));
        }

        Ok(Self {
            feature_set,
            category,
            text,
            n_features,
        })
    }

    /// Encode advisories into an `(n, n_features)` matrix. Never fails on unseen values.
    pub fn transform(&self, advisories: &[&Advisory]) -> Array2<f64> {
        let mut matrix = Array2::zeros((advisories.len(), self.n_features));

        for (advisory, mut row) in advisories.iter().zip(matrix.rows_mut()) {
            let offset = match &self.category {
                Some(category) => {
                    let width = category.width();
                    category.encode_into(
                        &advisory.cwe_name,
                        row.slice_mut(ndarray::s![..width]),
                    );
                    width
                }
                None => 0,
            };
            self.text
                .encode_into(&advisory.summary, row.slice_mut(ndarray::s![offset..]));
        }

        matrix
    }

    pub fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn category_encoder(&self) -> Option<&CategoryEncoder> {
        self.category.as_ref()
    }

    pub fn text_vectorizer(&self) -> &TfidfVectorizer {
        &self.text
    }
}
