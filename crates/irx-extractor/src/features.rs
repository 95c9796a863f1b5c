//! Statistical text features
//!
//! Derives a fixed-order numeric vector from a report. Any model trained on
//! these vectors depends on the column order, so the order lives in one
//! place ([`FEATURE_NAMES`]) and the vector is a fixed-size array.

use ndarray::{Array1, Array2};
use once_cell::sync::Lazy;
use regex::Regex;

/// Number of statistical features
pub const FEATURE_COUNT: usize = 8;

/// Column names, in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "text_length",
    "word_count",
    "sentence_count",
    "has_date",
    "has_time",
    "has_names",
    "has_injury_words",
    "dept_mentions",
];

/// Department vocabulary counted by `dept_mentions`
pub const DEPARTMENT_KEYWORDS: &[&str] = &[
    "facilities",
    "health",
    "safety",
    "operations",
    "maintenance",
    "security",
];

static SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").unwrap());
static DATE_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}[/-]\d{1,2}[/-]\d{4}").unwrap());
static TIME_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}").unwrap());
static NAME_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").unwrap());
static INJURY_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:injury|injured|hurt|damage|burn|cut|fall|fell)\b").unwrap()
});

/// Statistical features of one text, in [`FEATURE_NAMES`] order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Look up a feature by column name
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }

    pub fn to_array(&self) -> Array1<f64> {
        Array1::from(self.0.to_vec())
    }
}

/// Computes [`FeatureVector`]s. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalFeatureExtractor;

impl StatisticalFeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn features(&self, text: &str) -> FeatureVector {
        let lower = text.to_lowercase();
        let dept_mentions = DEPARTMENT_KEYWORDS
            .iter()
            .filter(|word| lower.contains(*word))
            .count();

        FeatureVector([
            text.chars().count() as f64,
            text.split_whitespace().count() as f64,
            SENTENCE_SPLIT.split(text).count() as f64,
            flag(DATE_LIKE.is_match(text)),
            flag(TIME_LIKE.is_match(text)),
            flag(NAME_LIKE.is_match(text)),
            flag(INJURY_WORDS.is_match(text)),
            dept_mentions as f64,
        ])
    }

    /// One row per text
    pub fn matrix(&self, texts: &[&str]) -> Array2<f64> {
        let mut matrix = Array2::zeros((texts.len(), FEATURE_COUNT));
        for (mut row, text) in matrix.rows_mut().into_iter().zip(texts) {
            row.assign(&self.features(text).to_array());
        }
        matrix
    }
}

fn flag(present: bool) -> f64 {
    if present {
        1.0
    } else {
        0.0
    }
}
