//! Advanced-ensemble strategy
//!
//! Every report becomes one dense row: the statistical feature vector
//! followed by a TF-IDF vector. The vectorizer is fitted once during
//! training and reused unchanged at inference, so the column layout the
//! forests learned is the layout they are queried with.

use ndarray::{concatenate, Array1, Array2, Axis};
use tracing::info;

use irx_core::{fields, AdvancedConfig, FieldMap, IrxError, Result, TrainingSet};

use crate::classifier::{Classifier, FieldClassifierSet};
use crate::features::{StatisticalFeatureExtractor, FEATURE_COUNT};
use crate::forest::RandomForest;
use crate::tfidf::TfidfVectorizer;
use crate::{ExtractionStrategy, TrainReport};

/// Fields with a random forest each
pub const CLASSIFIED_FIELDS: &[&str] = &[
    fields::DEPARTMENT,
    fields::LOCATION,
    fields::WAS_INJURED,
    fields::CATEGORY,
];

/// Statistical + TF-IDF features into per-field random forests
pub struct AdvancedEnsembleStrategy {
    config: AdvancedConfig,
    stats: StatisticalFeatureExtractor,
    vectorizer: TfidfVectorizer,
    classifiers: FieldClassifierSet<RandomForest>,
}

impl AdvancedEnsembleStrategy {
    pub const NAME: &'static str = "advanced";

    pub fn new(config: AdvancedConfig) -> Self {
        Self {
            vectorizer: TfidfVectorizer::new(config.tfidf),
            config,
            stats: StatisticalFeatureExtractor::new(),
            classifiers: FieldClassifierSet::new(Self::NAME),
        }
    }

    /// Width of a feature row, zero until trained
    pub fn feature_dimension(&self) -> usize {
        if self.vectorizer.is_fitted() {
            FEATURE_COUNT + self.vectorizer.dimension()
        } else {
            0
        }
    }

    fn feature_row(&self, text: &str) -> Result<Array1<f64>> {
        let stats = self.stats.features(text).to_array();
        let tfidf = self.vectorizer.transform_one(text)?;
        concatenate(Axis(0), &[stats.view(), tfidf.view()])
            .map_err(|e| IrxError::ExtractionError(e.to_string()))
    }

    fn feature_matrix(&self, texts: &[&str]) -> Result<Array2<f64>> {
        let stats = self.stats.matrix(texts);
        let tfidf = self.vectorizer.transform(texts)?;
        concatenate(Axis(1), &[stats.view(), tfidf.view()])
            .map_err(|e| IrxError::TrainingError(e.to_string()))
    }
}

impl Default for AdvancedEnsembleStrategy {
    fn default() -> Self {
        Self::new(AdvancedConfig::default())
    }
}

impl ExtractionStrategy for AdvancedEnsembleStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, data: &TrainingSet) -> Result<TrainReport> {
        self.classifiers = FieldClassifierSet::new(Self::NAME);
        self.vectorizer = TfidfVectorizer::new(self.config.tfidf);
        if data.is_empty() {
            return Err(IrxError::EmptyTrainingSet("advanced strategy".to_string()));
        }

        let texts = data.texts();
        self.vectorizer.fit(&texts)?;
        let x = self.feature_matrix(&texts)?;

        let mut report = TrainReport::new(Self::NAME);
        let forest = self.config.forest;
        self.classifiers
            .train(data, CLASSIFIED_FIELDS, &mut report, |targets| {
                let mut model = RandomForest::new(forest);
                model.fit(x.view(), targets)?;
                Ok(model)
            });

        report.examples_used = data.len();
        info!(
            features = x.ncols(),
            trained = report.fields_trained.len(),
            failed = report.fields_failed.len(),
            "Advanced strategy trained"
        );
        Ok(report)
    }

    fn extract(&self, text: &str) -> Result<FieldMap> {
        if !self.classifiers.is_trained() {
            return Err(IrxError::not_trained(Self::NAME));
        }

        let row = self.feature_row(text)?;
        self.classifiers.predict(|model| model.predict(row.view()))
    }
}

// ============================================================================
// Tests
// ============================================================================
