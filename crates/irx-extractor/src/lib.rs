//! IRX Extractor - Multi-strategy field extraction
//!
//! Extracts structured fields from free-text incident reports with several
//! independent strategies and reconciles them by plurality vote:
//! - Entity model: BIO sequence tagger trained on span annotations
//! - Hybrid: regex rules + naive Bayes classifiers
//! - Template: narrative capture templates + random forest classifiers
//! - Advanced: statistical features + TF-IDF into random forests
//!
//! [`voting::VotingEnsemble`] fans out to every strategy, isolates their
//! failures, and merges the results field by field.

use serde::{Deserialize, Serialize};

use irx_core::{FieldMap, FieldName, Result, TrainingSet};

/// Summary of one strategy's training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainReport {
    pub strategy: String,
    /// Fields with a fitted model
    pub fields_trained: Vec<FieldName>,
    /// Fields whose model failed to fit, with the reason
    pub fields_failed: Vec<(FieldName, String)>,
    /// Examples that contributed to training
    pub examples_used: usize,
    /// Examples skipped because they could not be converted
    pub examples_skipped: usize,
}

impl TrainReport {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            ..Self::default()
        }
    }
}

/// Trait for extraction strategies.
///
/// `train` replaces all fitted state; `extract` is read-only, so a trained
/// strategy can serve many threads at once.
pub trait ExtractionStrategy: Send + Sync {
    /// Stable name used in per-strategy output
    fn name(&self) -> &str;

    /// Fit the strategy on aligned texts and labels
    fn train(&mut self, data: &TrainingSet) -> Result<TrainReport>;

    /// Predict fields for one report
    fn extract(&self, text: &str) -> Result<FieldMap>;
}

pub mod advanced;
pub mod classifier;
pub mod features;
pub mod forest;
pub mod hybrid;
pub mod metrics;
pub mod ner;
pub mod pattern;
pub mod template;
pub mod tfidf;
pub mod voting;

pub use advanced::AdvancedEnsembleStrategy;
pub use hybrid::HybridStrategy;
pub use ner::EntityModelStrategy;
pub use template::TemplateStrategy;
pub use voting::{BatchRow, EnsembleOutput, EnsembleTrainReport, VoteTally, VotingEnsemble};
