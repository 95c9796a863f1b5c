//! Trainable field classifiers
//!
//! - [`Classifier`]: common interface over dense feature vectors
//! - [`MultinomialNb`]: multinomial naive Bayes with Laplace smoothing
//! - [`TextPipeline`]: TF-IDF vectorizer feeding a classifier
//! - [`FieldClassifierSet`]: one independently trained model per field,
//!   with missing labels mapped to the [`UNKNOWN`] sentinel

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use tracing::{debug, warn};

use irx_core::{FieldMap, FieldName, IrxError, Result, TfidfConfig, TrainingSet};

use crate::tfidf::TfidfVectorizer;
use crate::TrainReport;

/// Training target used when a field has no ground truth.
/// A predicted `UNKNOWN` means "no prediction".
pub const UNKNOWN: &str = "Unknown";

/// Trait for classifiers over dense feature vectors
pub trait Classifier: Send + Sync {
    /// Fit on a sample matrix (one row per sample) and one label per row
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[String]) -> Result<()>;

    /// Predict the label of a single sample
    fn predict(&self, x: ArrayView1<'_, f64>) -> Result<String>;
}

/// Training targets for one field, missing values mapped to [`UNKNOWN`]
pub fn targets_for(set: &TrainingSet, field: &str) -> Vec<String> {
    set.examples()
        .iter()
        .map(|e| e.label(field).unwrap_or(UNKNOWN).to_string())
        .collect()
}

/// Sorted distinct labels and each sample's index into them
pub(crate) fn encode_labels(y: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut classes: Vec<String> = y.to_vec();
    classes.sort();
    classes.dedup();

    let encoded = y
        .iter()
        .map(|label| classes.binary_search(label).unwrap_or_default())
        .collect();
    (classes, encoded)
}

/// Validate sample/label alignment before fitting
pub(crate) fn check_fit_input(x: &ArrayView2<'_, f64>, y: &[String]) -> Result<()> {
    if y.is_empty() {
        return Err(IrxError::EmptyTrainingSet("classifier".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(IrxError::DimensionMismatch {
            expected: y.len(),
            actual: x.nrows(),
        });
    }
    Ok(())
}

/// Index of the largest score; the earliest index wins ties
pub(crate) fn argmax(scores: impl IntoIterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.into_iter().enumerate() {
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

// ============================================================================
// Multinomial naive Bayes
// ============================================================================

#[derive(Debug, Clone)]
struct NbModel {
    classes: Vec<String>,
    class_log_prior: Array1<f64>,
    /// classes x features
    feature_log_prob: Array2<f64>,
}

/// Multinomial naive Bayes over non-negative features
#[derive(Debug, Clone)]
pub struct MultinomialNb {
    alpha: f64,
    model: Option<NbModel>,
}

impl MultinomialNb {
    pub fn new() -> Self {
        Self::with_alpha(1.0)
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self { alpha, model: None }
    }

    pub fn classes(&self) -> &[String] {
        self.model
            .as_ref()
            .map(|m| m.classes.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for MultinomialNb {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for MultinomialNb {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[String]) -> Result<()> {
        check_fit_input(&x, y)?;
        if x.iter().any(|&v| v < 0.0) {
            return Err(IrxError::TrainingError(
                "naive Bayes requires non-negative features".to_string(),
            ));
        }

        let (classes, encoded) = encode_labels(y);
        let n_features = x.ncols();
        let mut feature_counts = Array2::<f64>::zeros((classes.len(), n_features));
        let mut class_counts = vec![0usize; classes.len()];

        for (row, &class) in x.axis_iter(Axis(0)).zip(&encoded) {
            let mut counts = feature_counts.row_mut(class);
            counts += &row;
            class_counts[class] += 1;
        }

        let n_samples = y.len() as f64;
        let class_log_prior = class_counts
            .iter()
            .map(|&c| (c as f64 / n_samples).ln())
            .collect::<Array1<f64>>();

        let smoothed = feature_counts + self.alpha;
        let totals = smoothed.sum_axis(Axis(1)).insert_axis(Axis(1));
        let feature_log_prob = (&smoothed / &totals).mapv(f64::ln);

        self.model = Some(NbModel {
            classes,
            class_log_prior,
            feature_log_prob,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView1<'_, f64>) -> Result<String> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| IrxError::not_trained("naive Bayes classifier"))?;

        if x.len() != model.feature_log_prob.ncols() {
            return Err(IrxError::DimensionMismatch {
                expected: model.feature_log_prob.ncols(),
                actual: x.len(),
            });
        }

        let scores = &model.class_log_prior + &model.feature_log_prob.dot(&x);
        argmax(scores.iter().copied())
            .map(|i| model.classes[i].clone())
            .ok_or_else(|| IrxError::ExtractionError("classifier has no classes".to_string()))
    }
}

// ============================================================================
// Text pipeline
// ============================================================================

/// TF-IDF vectorizer followed by a classifier, fitted together
#[derive(Debug, Clone)]
pub struct TextPipeline<C> {
    vectorizer: TfidfVectorizer,
    classifier: C,
}

impl<C: Classifier> TextPipeline<C> {
    pub fn new(tfidf: TfidfConfig, classifier: C) -> Self {
        Self {
            vectorizer: TfidfVectorizer::new(tfidf),
            classifier,
        }
    }

    pub fn fit(&mut self, texts: &[&str], y: &[String]) -> Result<()> {
        let x = self.vectorizer.fit_transform(texts)?;
        self.classifier.fit(x.view(), y)
    }

    pub fn predict(&self, text: &str) -> Result<String> {
        let x = self.vectorizer.transform_one(text)?;
        self.classifier.predict(x.view())
    }
}

// ============================================================================
// Per-field classifier set
// ============================================================================

/// Independently trained models, one per target field.
///
/// A field whose training fails is left out; it never blocks the other
/// fields. Predictions of [`UNKNOWN`] are dropped.
#[derive(Debug, Clone)]
pub struct FieldClassifierSet<M> {
    component: String,
    models: Vec<(FieldName, M)>,
    trained: bool,
}

impl<M> FieldClassifierSet<M> {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            models: Vec::new(),
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Fields that have a fitted model
    pub fn fields(&self) -> impl Iterator<Item = &FieldName> {
        self.models.iter().map(|(f, _)| f)
    }

    /// Fit one model per field, replacing all previous models
    pub fn train<F>(
        &mut self,
        set: &TrainingSet,
        fields: &[&str],
        report: &mut TrainReport,
        mut fit: F,
    ) where
        F: FnMut(&[String]) -> Result<M>,
    {
        self.models.clear();

        for field in fields {
            let name = FieldName::new(field);
            let targets = targets_for(set, field);
            match fit(&targets) {
                Ok(model) => {
                    debug!(component = %self.component, field = %name, "Trained field classifier");
                    report.fields_trained.push(name.clone());
                    self.models.push((name, model));
                }
                Err(e) => {
                    warn!(component = %self.component, field = %name, error = %e, "Failed to train field classifier");
                    report.fields_failed.push((name, e.to_string()));
                }
            }
        }

        self.trained = true;
    }

    /// Query every field model; failures and `Unknown` are left out
    pub fn predict<F>(&self, mut predict: F) -> Result<FieldMap>
    where
        F: FnMut(&M) -> Result<String>,
    {
        if !self.trained {
            return Err(IrxError::not_trained(&self.component));
        }

        let mut extracted = FieldMap::new();
        for (field, model) in &self.models {
            match predict(model) {
                Ok(label) if label != UNKNOWN && !label.trim().is_empty() => {
                    extracted.insert(field.clone(), label);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(component = %self.component, field = %field, error = %e, "Field classifier failed");
                }
            }
        }
        Ok(extracted)
    }
}

// ============================================================================
// Tests
// ============================================================================
