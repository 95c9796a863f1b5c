//! TF-IDF text vectorizer
//!
//! Bag of word n-grams weighted by term frequency and smoothed inverse
//! document frequency, L2-normalized per document. The vocabulary and IDF
//! weights are fitted once and then reused as-is, so training and inference
//! always see the same feature space.

use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::{Array1, Array2};
use once_cell::sync::Lazy;
use regex::Regex;

use irx_core::{IrxError, Result, TfidfConfig};

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").unwrap());

/// Fitted vocabulary and IDF weights
#[derive(Debug, Clone)]
struct Fitted {
    /// term -> column
    vocabulary: HashMap<String, usize>,
    idf: Array1<f64>,
}

/// TF-IDF vectorizer over lower-cased word n-grams
#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    config: TfidfConfig,
    fitted: Option<Fitted>,
}

impl TfidfVectorizer {
    pub fn new(config: TfidfConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Number of columns produced by `transform`
    pub fn dimension(&self) -> usize {
        self.fitted.as_ref().map_or(0, |f| f.vocabulary.len())
    }

    /// Vocabulary terms in column order
    pub fn terms(&self) -> Vec<&str> {
        let Some(fitted) = &self.fitted else {
            return Vec::new();
        };
        let mut terms: Vec<(&str, usize)> = fitted
            .vocabulary
            .iter()
            .map(|(t, &i)| (t.as_str(), i))
            .collect();
        terms.sort_by_key(|&(_, i)| i);
        terms.into_iter().map(|(t, _)| t).collect()
    }

    /// Split text into the n-grams this vectorizer counts
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = TOKEN.find_iter(&lower).map(|m| m.as_str()).collect();

        let min_n = self.config.ngram_min.max(1);
        let max_n = self.config.ngram_max.max(min_n);
        let mut grams = Vec::new();
        for n in min_n..=max_n {
            if n > tokens.len() {
                break;
            }
            grams.extend(tokens.windows(n).map(|w| w.join(" ")));
        }
        grams
    }

    /// Learn vocabulary and IDF weights. Replaces any previous fit.
    pub fn fit(&mut self, texts: &[&str]) -> Result<()> {
        if texts.is_empty() {
            return Err(IrxError::EmptyTrainingSet("tfidf vectorizer".to_string()));
        }

        let mut term_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let grams = self.analyze(text);
            let unique: HashSet<&String> = grams.iter().collect();
            for gram in unique {
                *doc_freq.entry(gram.clone()).or_default() += 1;
            }
            for gram in grams {
                *term_counts.entry(gram).or_default() += 1;
            }
        }

        if term_counts.is_empty() {
            return Err(IrxError::TrainingError(
                "empty vocabulary; documents contain no terms".to_string(),
            ));
        }

        // Most frequent terms win; BTreeMap iteration makes ties alphabetical
        let mut ranked: Vec<(String, usize)> = term_counts.into_iter().collect();
        if let Some(max) = self.config.max_features {
            ranked.sort_by(|a, b| b.1.cmp(&a.1));
            ranked.truncate(max);
        }
        let mut selected: Vec<String> = ranked.into_iter().map(|(t, _)| t).collect();
        selected.sort();

        let n_docs = texts.len() as f64;
        let idf = selected
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect::<Array1<f64>>();

        let vocabulary = selected
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, i))
            .collect();

        self.fitted = Some(Fitted { vocabulary, idf });
        Ok(())
    }

    /// Vectorize one text with the fitted vocabulary
    pub fn transform_one(&self, text: &str) -> Result<Array1<f64>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| IrxError::not_trained("tfidf vectorizer"))?;

        let mut row = Array1::zeros(fitted.vocabulary.len());
        for gram in self.analyze(text) {
            if let Some(&col) = fitted.vocabulary.get(&gram) {
                row[col] += 1.0;
            }
        }

        row *= &fitted.idf;
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
        Ok(row)
    }

    /// Vectorize many texts, one row each
    pub fn transform(&self, texts: &[&str]) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(IrxError::not_trained("tfidf vectorizer"));
        }

        let mut matrix = Array2::zeros((texts.len(), self.dimension()));
        for (mut row, text) in matrix.rows_mut().into_iter().zip(texts) {
            row.assign(&self.transform_one(text)?);
        }
        Ok(matrix)
    }

    pub fn fit_transform(&mut self, texts: &[&str]) -> Result<Array2<f64>> {
        self.fit(texts)?;
        self.transform(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_analyze_ngrams() {
        let vectorizer = TfidfVectorizer::new(TfidfConfig::new(100, 1, 2));
        let grams = vectorizer.analyze("Crane failure, a crane!");
        assert_eq!(
            grams,
            vec!["crane", "failure", "crane", "crane failure", "failure crane"]
        );
    }

    #[test]
    fn test_transform_before_fit() {
        let vectorizer = TfidfVectorizer::new(TfidfConfig::default());
        let err = vectorizer.transform_one("anything").unwrap_err();
        assert!(err.is_not_trained());
    }

    #[test]
    fn test_fit_empty_corpus() {
        let mut vectorizer = TfidfVectorizer::new(TfidfConfig::default());
        assert!(matches!(
            vectorizer.fit(&[]),
            Err(IrxError::EmptyTrainingSet(_))
        ));
        assert!(vectorizer.fit(&["a", "?"]).is_err());
    }

    #[test]
    fn test_idf_and_normalization() {
        let mut vectorizer = TfidfVectorizer::new(TfidfConfig::default());
        vectorizer.fit(&["spill dock", "spill pier"]).unwrap();
        assert_eq!(vectorizer.terms(), vec!["dock", "pier", "spill"]);

        let row = vectorizer.transform_one("spill dock").unwrap();
        // idf(spill) = ln(3/3) + 1 = 1, idf(dock) = ln(3/2) + 1
        let dock = (1.5f64).ln() + 1.0;
        let norm = (dock * dock + 1.0).sqrt();
        assert!(approx(row[0], dock / norm));
        assert!(approx(row[1], 0.0));
        assert!(approx(row[2], 1.0 / norm));
        assert!(approx(row.dot(&row), 1.0));
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let mut vectorizer = TfidfVectorizer::new(TfidfConfig::new(2, 1, 1));
        vectorizer
            .fit(&["fire fire smoke", "fire smoke alarm", "zebra"])
            .unwrap();
        assert_eq!(vectorizer.terms(), vec!["fire", "smoke"]);
        assert_eq!(vectorizer.dimension(), 2);
    }

    #[test]
    fn test_unseen_terms_give_zero_row() {
        let mut vectorizer = TfidfVectorizer::new(TfidfConfig::default());
        vectorizer.fit(&["forklift collision"]).unwrap();
        let row = vectorizer.transform_one("nothing familiar").unwrap();
        assert!(row.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_fit_transform_shape() {
        let mut vectorizer = TfidfVectorizer::new(TfidfConfig::new(10, 1, 2));
        let matrix = vectorizer
            .fit_transform(&["oil spill in dock", "oil leak"])
            .unwrap();
        assert_eq!(matrix.nrows(), 2);
        assert_eq!(matrix.ncols(), vectorizer.dimension());
    }
}
