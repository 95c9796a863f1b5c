//! IRX Core - Domain models, errors, and shared types
//!
//! This crate defines the core abstractions used throughout IRX:
//! - Field names and field maps (the currency every strategy trades in)
//! - Training sets, examples, and span annotations
//! - Per-strategy outcomes and ensemble results
//! - Common error types
//! - Configuration management

pub mod config;

pub use config::{
    AdvancedConfig, AppConfig, BatchConfig, ConfigError, ExtractorConfig, ForestConfig,
    HybridConfig, LoggingConfig, NerConfig, TemplateConfig, TfidfConfig, VotingConfig,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for IRX operations
#[derive(Error, Debug)]
pub enum IrxError {
    #[error("Misaligned input: {texts} texts but {labels} label maps")]
    MisalignedInput { texts: usize, labels: usize },

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Empty training set for {0}")]
    EmptyTrainingSet(String),

    #[error("{component} has not been trained")]
    NotTrained { component: String },

    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid span annotation: {0}")]
    InvalidSpan(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Extraction error: {0}")]
    ExtractionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IrxError {
    /// Shorthand for a `NotTrained` error on the named component
    pub fn not_trained(component: impl Into<String>) -> Self {
        Self::NotTrained {
            component: component.into(),
        }
    }

    /// Whether this error means the component was used before training
    pub fn is_not_trained(&self) -> bool {
        matches!(self, Self::NotTrained { .. })
    }
}

pub type Result<T> = std::result::Result<T, IrxError>;

// ============================================================================
// Fields
// ============================================================================

/// Well-known field names produced by the bundled strategies
pub mod fields {
    pub const REPORTER_NAME: &str = "reporter_name";
    pub const PERSON_INVOLVED: &str = "person_involved";
    pub const INCIDENT_DATE: &str = "incident_date";
    pub const INCIDENT_TIME: &str = "incident_time";
    pub const DEPARTMENT: &str = "department";
    pub const DEPARTMENT_MENTION: &str = "department_mention";
    pub const INCIDENT_DESCRIPTION: &str = "incident_description";
    pub const LOCATION: &str = "location";
    pub const WAS_INJURED: &str = "was_injured";
    pub const INJURY_DESCRIPTION: &str = "injury_description";
    /// Incident category (Accident, Incident, Near Miss, Safety Observation)
    pub const CATEGORY: &str = "label";
}

/// Name of an extracted field.
///
/// Always trimmed and lower-cased on construction, so two strategies can
/// never disagree on the casing of the same field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldName(String);

impl FieldName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FieldName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<FieldName> for String {
    fn from(f: FieldName) -> Self {
        f.0
    }
}

impl std::borrow::Borrow<str> for FieldName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field name -> value. Ordered so serialized output is stable.
pub type FieldMap = BTreeMap<FieldName, String>;

/// Merged output of the voting ensemble
pub type EnsembleResult = FieldMap;

/// Returns true for label values that mean "no ground truth"
pub fn is_missing_value(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case("n/a") || v.eq_ignore_ascii_case("nan")
}

// ============================================================================
// Training data
// ============================================================================

/// One labeled incident report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub text: String,
    pub labels: FieldMap,
}

impl TrainingExample {
    pub fn new(text: impl Into<String>, labels: FieldMap) -> Self {
        Self {
            text: text.into(),
            labels,
        }
    }

    /// Ground-truth value for a field, `None` when missing or `N/A`
    pub fn label(&self, field: &str) -> Option<&str> {
        self.labels
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !is_missing_value(v))
    }
}

/// Aligned texts and label maps, validated before any strategy sees them
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    examples: Vec<TrainingExample>,
}

impl TrainingSet {
    /// Pair texts with label maps; fails if the lengths differ
    pub fn new(texts: &[String], labels: &[FieldMap]) -> Result<Self> {
        if texts.len() != labels.len() {
            return Err(IrxError::MisalignedInput {
                texts: texts.len(),
                labels: labels.len(),
            });
        }

        let examples = texts
            .iter()
            .zip(labels)
            .map(|(text, labels)| TrainingExample::new(text.clone(), labels.clone()))
            .collect();

        Ok(Self { examples })
    }

    pub fn from_examples(examples: Vec<TrainingExample>) -> Self {
        Self { examples }
    }

    pub fn examples(&self) -> &[TrainingExample] {
        &self.examples
    }

    pub fn texts(&self) -> Vec<&str> {
        self.examples.iter().map(|e| e.text.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// Labeled byte range within a training text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanAnnotation {
    pub start: usize,
    pub end: usize,
    pub field: FieldName,
}

impl SpanAnnotation {
    pub fn new(start: usize, end: usize, field: impl Into<FieldName>) -> Self {
        Self {
            start,
            end,
            field: field.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &SpanAnnotation) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ============================================================================
// Strategy outcomes
// ============================================================================

/// What a single strategy produced for one input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StrategyOutcome {
    /// At least one field was predicted
    Predicted { fields: FieldMap },
    /// The strategy ran but had nothing to say
    Empty,
    /// The strategy failed; it contributes no votes
    Failed { reason: String },
}

impl StrategyOutcome {
    pub fn from_result(result: Result<FieldMap>) -> Self {
        match result {
            Ok(fields) if fields.is_empty() => Self::Empty,
            Ok(fields) => Self::Predicted { fields },
            Err(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Predicted fields, empty for `Empty` and `Failed`
    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            Self::Predicted { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcome tagged with the strategy that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyRun {
    pub strategy: String,
    #[serde(flatten)]
    pub outcome: StrategyOutcome,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (FieldName::new(k), v.to_string()))
            .collect()
    }

    #[test]
    fn test_field_name_normalization() {
        assert_eq!(FieldName::new(" Department "), FieldName::new("department"));
        assert_eq!(FieldName::new("REPORTER_NAME").as_str(), "reporter_name");
    }

    #[test]
    fn test_field_map_lookup_by_str() {
        let map = labels(&[("Location", "Warehouse A")]);
        assert_eq!(map.get("location").map(String::as_str), Some("Warehouse A"));
    }

    #[test]
    fn test_missing_values() {
        assert!(is_missing_value("N/A"));
        assert!(is_missing_value("nan"));
        assert!(is_missing_value("  "));
        assert!(!is_missing_value("No"));
    }

    #[test]
    fn test_training_example_label_filters_missing() {
        let example = TrainingExample::new(
            "text",
            labels(&[("department", "IT"), ("location", "N/A")]),
        );
        assert_eq!(example.label("department"), Some("IT"));
        assert_eq!(example.label("location"), None);
        assert_eq!(example.label("reporter_name"), None);
    }

    #[test]
    fn test_training_set_rejects_misaligned() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = TrainingSet::new(&texts, &[FieldMap::new()]).unwrap_err();
        assert!(matches!(
            err,
            IrxError::MisalignedInput {
                texts: 2,
                labels: 1
            }
        ));
    }

    #[test]
    fn test_span_overlap() {
        let a = SpanAnnotation::new(0, 5, "reporter_name");
        let b = SpanAnnotation::new(4, 8, "department");
        let c = SpanAnnotation::new(5, 8, "department");
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(
            StrategyOutcome::from_result(Ok(FieldMap::new())),
            StrategyOutcome::Empty
        );
        let failed = StrategyOutcome::from_result(Err(IrxError::not_trained("hybrid")));
        assert!(failed.is_failed());
        assert!(failed.fields().is_none());
    }

    #[test]
    fn test_outcome_serialization() {
        let run = StrategyRun {
            strategy: "hybrid".to_string(),
            outcome: StrategyOutcome::Predicted {
                fields: labels(&[("department", "IT")]),
            },
        };
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["strategy"], "hybrid");
        assert_eq!(json["status"], "predicted");
        assert_eq!(json["fields"]["department"], "IT");
    }
}
