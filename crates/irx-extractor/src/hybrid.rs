//! Hybrid strategy: regex rules plus naive Bayes field classifiers

use tracing::{info, warn};

use irx_core::{fields, FieldMap, HybridConfig, IrxError, Result, TrainingSet};

use crate::classifier::{FieldClassifierSet, MultinomialNb, TextPipeline};
use crate::pattern::PatternExtractor;
use crate::{ExtractionStrategy, TrainReport};

/// Fields predicted by the classifiers rather than by rules
pub const CLASSIFIED_FIELDS: &[&str] = &[fields::DEPARTMENT, fields::WAS_INJURED];

/// Rule-based dates, times, names, and locations, overlaid with
/// department and injury classifiers trained on the raw text
pub struct HybridStrategy {
    config: HybridConfig,
    patterns: PatternExtractor,
    classifiers: FieldClassifierSet<TextPipeline<MultinomialNb>>,
}

impl HybridStrategy {
    pub const NAME: &'static str = "hybrid";

    pub fn new(config: HybridConfig) -> Self {
        Self {
            config,
            patterns: PatternExtractor::new(),
            classifiers: FieldClassifierSet::new("hybrid classifiers"),
        }
    }
}

impl Default for HybridStrategy {
    fn default() -> Self {
        Self::new(HybridConfig::default())
    }
}

impl ExtractionStrategy for HybridStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, data: &TrainingSet) -> Result<TrainReport> {
        self.classifiers = FieldClassifierSet::new("hybrid classifiers");
        if data.is_empty() {
            return Err(IrxError::EmptyTrainingSet("hybrid strategy".to_string()));
        }

        let mut report = TrainReport::new(Self::NAME);
        let texts = data.texts();
        let tfidf = self.config.tfidf;

        self.classifiers
            .train(data, CLASSIFIED_FIELDS, &mut report, |targets| {
                let mut pipeline = TextPipeline::new(tfidf, MultinomialNb::new());
                pipeline.fit(&texts, targets)?;
                Ok(pipeline)
            });

        report.examples_used = data.len();
        info!(
            trained = report.fields_trained.len(),
            failed = report.fields_failed.len(),
            "Hybrid strategy trained"
        );
        Ok(report)
    }

    /// Rule fields survive an untrained classifier set
    fn extract(&self, text: &str) -> Result<FieldMap> {
        let mut extracted = self.patterns.extract(text);

        match self.classifiers.predict(|pipeline| pipeline.predict(text)) {
            Ok(predicted) => extracted.extend(predicted),
            Err(e) if e.is_not_trained() => {
                warn!(strategy = Self::NAME, error = %e, "Classifiers not trained, returning rule fields only");
            }
            Err(e) => return Err(e),
        }
        Ok(extracted)
    }
}

// ============================================================================
// Tests
// ============================================================================
