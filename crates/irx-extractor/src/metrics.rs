//! Quality Metrics module
//!
//! Field-level evaluation of extracted values against gold labels:
//! precision, recall, F1, and accuracy per field, plus micro and macro
//! summaries. Gold `N/A` or missing values mean "no value expected".

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use irx_core::{is_missing_value, FieldMap, FieldName, IrxError, Result};

use crate::voting::normalize_key;

// ============================================================================
// Field Metrics
// ============================================================================

/// Confusion counts for one field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetrics {
    /// Predicted value matches the gold value
    pub true_positives: usize,
    /// Predicted a value that is absent from gold or differs from it
    pub false_positives: usize,
    /// Gold value was missed or predicted wrong
    pub false_negatives: usize,
    /// Nothing expected and nothing predicted
    pub true_negatives: usize,
    /// Documents with a gold value for this field
    pub gold_total: usize,
    /// Documents with a predicted value for this field
    pub predicted_total: usize,
    /// Documents evaluated
    pub documents: usize,
}

impl FieldMetrics {
    /// Calculate precision (TP / (TP + FP))
    pub fn precision(&self) -> f32 {
        if self.true_positives + self.false_positives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_positives) as f32
        }
    }

    /// Calculate recall (TP / (TP + FN))
    pub fn recall(&self) -> f32 {
        if self.true_positives + self.false_negatives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_negatives) as f32
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f32 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Share of documents where the field came out right, including
    /// correctly predicting nothing
    pub fn accuracy(&self) -> f32 {
        if self.documents == 0 {
            0.0
        } else {
            (self.true_positives + self.true_negatives) as f32 / self.documents as f32
        }
    }

    fn merge(&mut self, other: &FieldMetrics) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.true_negatives += other.true_negatives;
        self.gold_total += other.gold_total;
        self.predicted_total += other.predicted_total;
        self.documents += other.documents;
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Compares predicted field maps with gold label maps
pub struct FieldEvaluator {
    /// Exact string comparison instead of case/whitespace-insensitive
    exact: bool,
}

impl FieldEvaluator {
    /// Create a new evaluator with default settings
    pub fn new() -> Self {
        Self { exact: false }
    }

    /// Require values to match byte for byte
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    fn values_match(&self, predicted: &str, gold: &str) -> bool {
        if self.exact {
            predicted == gold
        } else {
            normalize_key(predicted) == normalize_key(gold)
        }
    }

    /// Score one document on the given fields
    pub fn evaluate_document(
        &self,
        predicted: &FieldMap,
        gold: &FieldMap,
        fields: &[FieldName],
        report: &mut EvaluationReport,
    ) {
        for field in fields {
            let expected = gold.get(field).filter(|v| !is_missing_value(v));
            let actual = predicted.get(field).filter(|v| !is_missing_value(v));
            let metrics = report.per_field.entry(field.clone()).or_default();
            metrics.documents += 1;

            match (expected, actual) {
                (Some(expected), Some(actual)) => {
                    metrics.gold_total += 1;
                    metrics.predicted_total += 1;
                    if self.values_match(actual, expected) {
                        metrics.true_positives += 1;
                    } else {
                        metrics.false_positives += 1;
                        metrics.false_negatives += 1;
                    }
                }
                (Some(_), None) => {
                    metrics.gold_total += 1;
                    metrics.false_negatives += 1;
                }
                (None, Some(_)) => {
                    metrics.predicted_total += 1;
                    metrics.false_positives += 1;
                }
                (None, None) => metrics.true_negatives += 1,
            }
        }
        report.num_documents += 1;
    }

    /// Score aligned predictions against gold labels. Only fields that
    /// appear as gold columns are evaluated.
    pub fn evaluate(&self, predicted: &[FieldMap], gold: &[FieldMap]) -> Result<EvaluationReport> {
        if predicted.len() != gold.len() {
            return Err(IrxError::MisalignedInput {
                texts: predicted.len(),
                labels: gold.len(),
            });
        }

        let fields: Vec<FieldName> = gold
            .iter()
            .flat_map(|g| g.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut report = EvaluationReport::default();
        for (p, g) in predicted.iter().zip(gold) {
            self.evaluate_document(p, g, &fields, &mut report);
        }
        Ok(report)
    }
}

impl Default for FieldEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Evaluation Report
// ============================================================================

/// Per-field metrics over a set of documents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub per_field: BTreeMap<FieldName, FieldMetrics>,
    pub num_documents: usize,
}

impl EvaluationReport {
    pub fn field(&self, name: &str) -> Option<&FieldMetrics> {
        self.per_field.get(name)
    }

    /// All fields pooled into one set of counts
    pub fn micro(&self) -> FieldMetrics {
        let mut total = FieldMetrics::default();
        for metrics in self.per_field.values() {
            total.merge(metrics);
        }
        total
    }

    /// Unweighted mean F1 across fields
    pub fn macro_f1(&self) -> f32 {
        if self.per_field.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.per_field.values().map(FieldMetrics::f1_score).sum();
        sum / self.per_field.len() as f32
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        let mut out = format!(
            "=== Extraction Quality Report ===\n\nDocuments evaluated: {}\n\n\
             {:<24} {:>9} {:>9} {:>9} {:>9}\n",
            self.num_documents, "Field", "Precision", "Recall", "F1", "Accuracy"
        );

        for (field, m) in &self.per_field {
            out.push_str(&format!(
                "{:<24} {:>8.1}% {:>8.1}% {:>8.1}% {:>8.1}%\n",
                field.as_str(),
                m.precision() * 100.0,
                m.recall() * 100.0,
                m.f1_score() * 100.0,
                m.accuracy() * 100.0,
            ));
        }

        let micro = self.micro();
        out.push_str(&format!(
            "\nMicro: P {:.1}% | R {:.1}% | F1 {:.1}%\nMacro F1: {:.1}%\n",
            micro.precision() * 100.0,
            micro.recall() * 100.0,
            micro.f1_score() * 100.0,
            self.macro_f1() * 100.0,
        ));
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
