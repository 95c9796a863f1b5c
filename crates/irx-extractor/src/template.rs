//! Template strategy
//!
//! Narrative fields come from capture templates over the report prose;
//! categorical fields come from TF-IDF + random forest classifiers.

use regex::Regex;
use tracing::{info, warn};

use irx_core::{fields, FieldMap, FieldName, IrxError, Result, TemplateConfig, TrainingSet};

use crate::classifier::{FieldClassifierSet, TextPipeline};
use crate::forest::RandomForest;
use crate::{ExtractionStrategy, TrainReport};

/// Fields predicted by the classifiers
pub const CLASSIFIED_FIELDS: &[&str] = &[fields::LOCATION, fields::CATEGORY, fields::DEPARTMENT];

/// A capture template: group 1 is the field value
struct Template {
    field: FieldName,
    regex: Regex,
}

/// Capture templates plus location, category, and department classifiers
pub struct TemplateStrategy {
    config: TemplateConfig,
    templates: Vec<Template>,
    classifiers: FieldClassifierSet<TextPipeline<RandomForest>>,
}

impl TemplateStrategy {
    pub const NAME: &'static str = "template";

    pub fn new(config: TemplateConfig) -> Self {
        let mut strategy = Self {
            config,
            templates: Vec::new(),
            classifiers: FieldClassifierSet::new("template classifiers"),
        };
        strategy.init_templates();
        strategy
    }

    /// Keywords match in any case; captured names and the `The`
    /// terminator must be capitalized.
    fn init_templates(&mut self) {
        self.add_template(
            fields::INCIDENT_DESCRIPTION,
            r"(?s)(?i:incident|accident|event).*?(?i:caused|resulted|leading|involving)\s+(.+?)(?:\.|The|,\s*[A-Z])",
        );
        self.add_template(
            fields::INJURY_DESCRIPTION,
            r"(?s)(?i:suffered|sustained|injury|injured|hurt|damage)\s+(.+?)(?:\.|(?i:from|due to)|$)",
        );
        self.add_template(
            fields::PERSON_INVOLVED,
            r"(?s)(?i:involving|victim|worker|employee|person)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)",
        );
        self.add_template(
            fields::DEPARTMENT_MENTION,
            r"(?s)(?i:from the|department of|in the)\s+([A-Z][a-z]+(?:\s+(?:and|&)\s+[A-Z][a-z]+)*)\s+(?i:department)",
        );
    }

    /// Add a template; invalid patterns are skipped
    fn add_template(&mut self, field: &str, pattern: &str) {
        if let Ok(regex) = Regex::new(pattern) {
            self.templates.push(Template {
                field: FieldName::new(field),
                regex,
            });
        }
    }

    /// Apply every template, normalizing and capping each capture
    pub fn capture(&self, text: &str) -> FieldMap {
        let mut extracted = FieldMap::new();
        for template in &self.templates {
            let Some(group) = template.regex.captures(text).and_then(|c| c.get(1)) else {
                continue;
            };
            let value = clean_capture(group.as_str(), self.config.max_capture_chars);
            if !value.is_empty() {
                extracted.insert(template.field.clone(), value);
            }
        }
        extracted
    }
}

impl Default for TemplateStrategy {
    fn default() -> Self {
        Self::new(TemplateConfig::default())
    }
}

/// Collapse whitespace runs and keep at most `max_chars` characters
fn clean_capture(raw: &str, max_chars: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

impl ExtractionStrategy for TemplateStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, data: &TrainingSet) -> Result<TrainReport> {
        self.classifiers = FieldClassifierSet::new("template classifiers");
        if data.is_empty() {
            return Err(IrxError::EmptyTrainingSet("template strategy".to_string()));
        }

        let mut report = TrainReport::new(Self::NAME);
        let texts = data.texts();
        let tfidf = self.config.tfidf;
        let forest = self.config.forest;

        self.classifiers
            .train(data, CLASSIFIED_FIELDS, &mut report, |targets| {
                let mut pipeline = TextPipeline::new(tfidf, RandomForest::new(forest));
                pipeline.fit(&texts, targets)?;
                Ok(pipeline)
            });

        report.examples_used = data.len();
        info!(
            trained = report.fields_trained.len(),
            failed = report.fields_failed.len(),
            "Template strategy trained"
        );
        Ok(report)
    }

    fn extract(&self, text: &str) -> Result<FieldMap> {
        let mut extracted = self.capture(text);

        match self.classifiers.predict(|pipeline| pipeline.predict(text)) {
            Ok(predicted) => extracted.extend(predicted),
            Err(e) if e.is_not_trained() => {
                warn!(strategy = Self::NAME, error = %e, "Classifiers not trained, returning captures only");
            }
            Err(e) => return Err(e),
        }
        Ok(extracted)
    }
}

// ============================================================================
// Tests
// ============================================================================
