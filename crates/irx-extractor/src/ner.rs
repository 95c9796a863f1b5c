//! Entity-model strategy
//!
//! A sequence-labeling model trained on span-annotated reports:
//! - Span annotations: each labeled value located by its first literal
//!   occurrence in the text, overlaps resolved earliest-first
//! - Tokens tagged in the BIO scheme, one B/I pair per field label
//! - Greedy averaged-perceptron tagger over lexical and context features
//!
//! At extraction time each tagged span becomes a field; only the first
//! span of a field (by position) is kept.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use tracing::{debug, info};

use irx_core::{
    fields, FieldMap, FieldName, IrxError, NerConfig, Result, SpanAnnotation, TrainingExample,
    TrainingSet,
};

use crate::{ExtractionStrategy, TrainReport};

/// Fields the entity model learns to tag, in annotation priority order
pub const ENTITY_FIELDS: &[&str] = &[
    fields::REPORTER_NAME,
    fields::PERSON_INVOLVED,
    fields::INCIDENT_DATE,
    fields::INCIDENT_TIME,
    fields::DEPARTMENT,
    fields::INCIDENT_DESCRIPTION,
    fields::LOCATION,
    fields::INJURY_DESCRIPTION,
];

// ============================================================================
// Span annotations
// ============================================================================

/// Locate each labeled value in the text and keep a non-overlapping subset
pub fn build_span_annotations(example: &TrainingExample) -> Vec<SpanAnnotation> {
    let mut spans = Vec::new();

    for field in ENTITY_FIELDS {
        let Some(value) = example.label(field) else {
            continue;
        };
        if let Some(start) = example.text.find(value) {
            spans.push(SpanAnnotation::new(start, start + value.len(), *field));
        }
    }

    filter_overlapping(spans)
}

/// Sort by start and drop any span that begins before the previous kept
/// span ends. Ties on start keep the earlier entry.
pub fn filter_overlapping(mut spans: Vec<SpanAnnotation>) -> Vec<SpanAnnotation> {
    spans.sort_by_key(|s| s.start);

    let mut kept: Vec<SpanAnnotation> = Vec::with_capacity(spans.len());
    let mut last_end = 0;
    for span in spans {
        if span.is_empty() {
            continue;
        }
        if span.start >= last_end {
            last_end = span.end;
            kept.push(span);
        }
    }
    kept
}

// ============================================================================
// Tokens and tags
// ============================================================================

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+|[^\w\s]").unwrap());

/// Byte range of one token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
}

pub fn tokenize(text: &str) -> Vec<Token> {
    TOKEN
        .find_iter(text)
        .map(|m| Token {
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

const OUTSIDE: usize = 0;

/// BIO tag inventory. Tag 0 is `O`; label `k` owns `B` = 2k+1, `I` = 2k+2.
#[derive(Debug, Clone)]
struct TagSet {
    labels: Vec<FieldName>,
}

impl TagSet {
    fn len(&self) -> usize {
        1 + 2 * self.labels.len()
    }

    fn begin(k: usize) -> usize {
        2 * k + 1
    }

    fn inside(k: usize) -> usize {
        2 * k + 2
    }

    fn label_of(tag: usize) -> Option<usize> {
        (tag != OUTSIDE).then(|| (tag - 1) / 2)
    }

    fn is_inside(tag: usize) -> bool {
        tag != OUTSIDE && tag % 2 == 0
    }

    /// `I-x` may only follow `B-x` or `I-x`
    fn allowed(prev: usize, tag: usize) -> bool {
        if !Self::is_inside(tag) {
            return true;
        }
        Self::label_of(prev) == Self::label_of(tag)
    }

    fn name(&self, tag: usize) -> String {
        match Self::label_of(tag) {
            None => "O".to_string(),
            Some(k) if Self::is_inside(tag) => format!("I-{}", self.labels[k]),
            Some(k) => format!("B-{}", self.labels[k]),
        }
    }

    fn index_of(&self, field: &FieldName) -> Option<usize> {
        self.labels.iter().position(|l| l == field)
    }

    /// Gold tag sequence for a tokenized text
    fn align(&self, tokens: &[Token], spans: &[SpanAnnotation]) -> Result<Vec<usize>> {
        let mut tags = vec![OUTSIDE; tokens.len()];

        for span in spans {
            let k = self.index_of(&span.field).ok_or_else(|| {
                IrxError::InvalidSpan(format!("unregistered label {}", span.field))
            })?;
            let first = tokens.iter().position(|t| t.start == span.start);
            let last = tokens.iter().position(|t| t.end == span.end);

            match (first, last) {
                (Some(first), Some(last)) if first <= last => {
                    tags[first] = Self::begin(k);
                    for tag in &mut tags[first + 1..=last] {
                        *tag = Self::inside(k);
                    }
                }
                _ => {
                    return Err(IrxError::InvalidSpan(format!(
                        "{}..{} ({}) does not align with token boundaries",
                        span.start, span.end, span.field
                    )))
                }
            }
        }

        Ok(tags)
    }
}

// ============================================================================
// Averaged perceptron
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Perceptron {
    n_tags: usize,
    weights: HashMap<String, Vec<f64>>,
    /// Accumulated weight sums for averaging
    totals: HashMap<String, Vec<f64>>,
    /// Instance count at each weight's last change
    stamps: HashMap<String, Vec<usize>>,
    instances: usize,
}

impl Perceptron {
    fn new(n_tags: usize) -> Self {
        Self {
            n_tags,
            ..Self::default()
        }
    }

    fn scores(&self, features: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.n_tags];
        for feature in features {
            if let Some(weights) = self.weights.get(feature) {
                for (score, w) in scores.iter_mut().zip(weights) {
                    *score += w;
                }
            }
        }
        scores
    }

    /// Highest-scoring tag that may follow `prev`
    fn best(&self, features: &[String], prev: usize) -> usize {
        let scores = self.scores(features);
        let mut best = OUTSIDE;
        for tag in 1..self.n_tags {
            if TagSet::allowed(prev, tag) && scores[tag] > scores[best] {
                best = tag;
            }
        }
        best
    }

    fn update(&mut self, truth: usize, guess: usize, features: &[String]) {
        self.instances += 1;
        if truth == guess {
            return;
        }
        for feature in features {
            self.nudge(feature, truth, 1.0);
            self.nudge(feature, guess, -1.0);
        }
    }

    fn nudge(&mut self, feature: &str, tag: usize, delta: f64) {
        let n = self.n_tags;
        let weights = self
            .weights
            .entry(feature.to_string())
            .or_insert_with(|| vec![0.0; n]);
        let totals = self
            .totals
            .entry(feature.to_string())
            .or_insert_with(|| vec![0.0; n]);
        let stamps = self
            .stamps
            .entry(feature.to_string())
            .or_insert_with(|| vec![0; n]);

        totals[tag] += (self.instances - stamps[tag]) as f64 * weights[tag];
        stamps[tag] = self.instances;
        weights[tag] += delta;
    }

    /// Replace each weight by its average over all updates
    fn average(&mut self) {
        let instances = self.instances.max(1) as f64;
        for (feature, weights) in self.weights.iter_mut() {
            let (Some(totals), Some(stamps)) =
                (self.totals.get(feature), self.stamps.get(feature))
            else {
                continue;
            };
            for tag in 0..weights.len() {
                let total = totals[tag] + (self.instances - stamps[tag]) as f64 * weights[tag];
                weights[tag] = total / instances;
            }
        }
        self.totals.clear();
        self.stamps.clear();
    }
}

fn shape(word: &str) -> String {
    let mut shape = String::new();
    for c in word.chars() {
        let class = if c.is_uppercase() {
            'X'
        } else if c.is_lowercase() {
            'x'
        } else if c.is_ascii_digit() {
            'd'
        } else {
            c
        };
        if !shape.ends_with(class) {
            shape.push(class);
        }
    }
    shape
}

/// Feature strings for token `i` given the previous tag
fn token_features(words: &[&str], i: usize, prev_tag: &str) -> Vec<String> {
    let word = words[i];
    let lower = word.to_lowercase();
    let context = |offset: isize| -> String {
        let j = i as isize + offset;
        if j < 0 {
            "<s>".to_string()
        } else {
            words
                .get(j as usize)
                .map_or_else(|| "</s>".to_string(), |w| w.to_lowercase())
        }
    };
    let prefix: String = lower.chars().take(3).collect();
    let suffix: String = {
        let chars: Vec<char> = lower.chars().collect();
        chars[chars.len().saturating_sub(3)..].iter().collect()
    };

    vec![
        "bias".to_string(),
        format!("w={lower}"),
        format!("p3={prefix}"),
        format!("s3={suffix}"),
        format!("shape={}", shape(word)),
        format!("w-1={}", context(-1)),
        format!("w+1={}", context(1)),
        format!("w-2={}", context(-2)),
        format!("w+2={}", context(2)),
        format!("t-1={prev_tag}"),
        format!("t-1,w={prev_tag},{lower}"),
    ]
}

/// One aligned training instance
struct Instance {
    words: Vec<String>,
    tags: Vec<usize>,
}

/// Fitted tagger: tag inventory plus averaged weights
#[derive(Debug, Clone)]
struct Tagger {
    tagset: TagSet,
    model: Perceptron,
}

impl Tagger {
    fn train(tagset: TagSet, mut instances: Vec<Instance>, config: &NerConfig) -> Self {
        let mut model = Perceptron::new(tagset.len());
        let mut rng = StdRng::seed_from_u64(config.seed);
        let log_every = config.log_every.max(1);

        for epoch in 0..config.epochs {
            instances.shuffle(&mut rng);
            let mut mistakes = 0usize;

            for instance in &instances {
                let words: Vec<&str> = instance.words.iter().map(String::as_str).collect();
                let mut prev = OUTSIDE;
                for (i, &gold) in instance.tags.iter().enumerate() {
                    let features = token_features(&words, i, &tagset.name(prev));
                    let guess = model.best(&features, prev);
                    if guess != gold {
                        mistakes += 1;
                    }
                    model.update(gold, guess, &features);
                    prev = guess;
                }
            }

            if epoch % log_every == 0 {
                info!(iteration = epoch + 1, losses = mistakes, "Entity model training pass");
            }
        }

        model.average();
        Self { tagset, model }
    }

    /// Tagged spans in text order
    fn spans(&self, text: &str) -> Vec<SpanAnnotation> {
        let tokens = tokenize(text);
        let words: Vec<&str> = tokens.iter().map(|t| &text[t.start..t.end]).collect();

        let mut tags = Vec::with_capacity(tokens.len());
        let mut prev = OUTSIDE;
        for i in 0..tokens.len() {
            let features = token_features(&words, i, &self.tagset.name(prev));
            prev = self.model.best(&features, prev);
            tags.push(prev);
        }

        let mut spans: Vec<SpanAnnotation> = Vec::new();
        for (token, &tag) in tokens.iter().zip(&tags) {
            let Some(k) = TagSet::label_of(tag) else {
                continue;
            };
            if TagSet::is_inside(tag) {
                if let Some(open) = spans.last_mut() {
                    open.end = token.end;
                    continue;
                }
            }
            spans.push(SpanAnnotation::new(
                token.start,
                token.end,
                self.tagset.labels[k].clone(),
            ));
        }
        spans
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Strategy backed by the trained sequence tagger
pub struct EntityModelStrategy {
    config: NerConfig,
    tagger: Option<Tagger>,
}

impl EntityModelStrategy {
    pub const NAME: &'static str = "ner";

    pub fn new(config: NerConfig) -> Self {
        Self {
            config,
            tagger: None,
        }
    }

    /// Registered entity labels, empty until trained
    pub fn labels(&self) -> Vec<FieldName> {
        self.tagger
            .as_ref()
            .map(|t| t.tagset.labels.clone())
            .unwrap_or_default()
    }
}

impl Default for EntityModelStrategy {
    fn default() -> Self {
        Self::new(NerConfig::default())
    }
}

impl ExtractionStrategy for EntityModelStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn train(&mut self, data: &TrainingSet) -> Result<TrainReport> {
        self.tagger = None;
        if data.is_empty() {
            return Err(IrxError::EmptyTrainingSet("entity model".to_string()));
        }

        let mut report = TrainReport::new(Self::NAME);
        let annotated: Vec<(&TrainingExample, Vec<SpanAnnotation>)> = data
            .examples()
            .iter()
            .map(|e| (e, build_span_annotations(e)))
            .filter(|(_, spans)| !spans.is_empty())
            .collect();
        report.examples_skipped = data.len() - annotated.len();

        // Register labels in a fixed order so tag ids are reproducible
        let labels: Vec<FieldName> = ENTITY_FIELDS
            .iter()
            .map(|f| FieldName::new(f))
            .filter(|f| annotated.iter().any(|(_, spans)| spans.iter().any(|s| &s.field == f)))
            .collect();
        let tagset = TagSet { labels };

        let mut instances = Vec::with_capacity(annotated.len());
        for (example, spans) in &annotated {
            let tokens = tokenize(&example.text);
            match tagset.align(&tokens, spans) {
                Ok(tags) => instances.push(Instance {
                    words: tokens
                        .iter()
                        .map(|t| example.text[t.start..t.end].to_string())
                        .collect(),
                    tags,
                }),
                Err(e) => {
                    debug!(error = %e, "Skipping entity training example");
                    report.examples_skipped += 1;
                }
            }
        }

        if instances.is_empty() {
            return Err(IrxError::TrainingError(
                "no example produced a usable span annotation".to_string(),
            ));
        }

        info!(
            examples = instances.len(),
            labels = tagset.labels.len(),
            "Prepared entity model training data"
        );

        report.examples_used = instances.len();
        report.fields_trained = tagset.labels.clone();
        self.tagger = Some(Tagger::train(tagset, instances, &self.config));
        Ok(report)
    }

    fn extract(&self, text: &str) -> Result<FieldMap> {
        let tagger = self
            .tagger
            .as_ref()
            .ok_or_else(|| IrxError::not_trained(Self::NAME))?;

        let mut extracted = FieldMap::new();
        for span in tagger.spans(text) {
            let value = text[span.start..span.end].to_string();
            extracted.entry(span.field).or_insert(value);
        }
        Ok(extracted)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn example(text: &str, pairs: &[(&str, &str)]) -> TrainingExample {
        TrainingExample::new(
            text,
            pairs
                .iter()
                .map(|(k, v)| (FieldName::new(k), v.to_string()))
                .collect(),
        )
    }

    fn reports() -> TrainingSet {
        let rows = [
            ("Reported by Alex Morgan in Dry Dock 1.", "Alex Morgan", "Dry Dock 1"),
            ("Reported by Jamie Ward in Warehouse A.", "Jamie Ward", "Warehouse A"),
            ("Reported by Riley Cooper in Paint Shop.", "Riley Cooper", "Paint Shop"),
            ("Reported by Drew Fisher in Fuel Depot.", "Drew Fisher", "Fuel Depot"),
            ("Reported by Quinn Hughes in Tool Crib.", "Quinn Hughes", "Tool Crib"),
        ];
        TrainingSet::from_examples(
            rows.iter()
                .map(|(text, name, location)| {
                    example(text, &[("reporter_name", name), ("location", location)])
                })
                .collect(),
        )
    }

    #[test]
    fn test_spans_use_first_occurrence() {
        let ex = example(
            "Morgan called Morgan from IT.",
            &[("reporter_name", "Morgan"), ("department", "IT")],
        );
        let spans = build_span_annotations(&ex);
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].end), (0, 6));
        assert_eq!(spans[1].field.as_str(), "department");
    }

    #[test]
    fn test_spans_skip_missing_and_absent_values() {
        let ex = example(
            "Forklift hit a rack.",
            &[("location", "N/A"), ("department", "Warehouse")],
        );
        assert!(build_span_annotations(&ex).is_empty());
    }

    #[test]
    fn test_overlap_keeps_earliest() {
        let spans = vec![
            SpanAnnotation::new(5, 12, "location"),
            SpanAnnotation::new(0, 8, "reporter_name"),
            SpanAnnotation::new(12, 15, "department"),
        ];
        let kept = filter_overlapping(spans);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].field.as_str(), "reporter_name");
        assert_eq!(kept[1].field.as_str(), "department");
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("Dock 1, at 14:30.");
        let text = "Dock 1, at 14:30.";
        let words: Vec<&str> = tokens.iter().map(|t| &text[t.start..t.end]).collect();
        assert_eq!(words, vec!["Dock", "1", ",", "at", "14", ":", "30", "."]);
    }

    #[test]
    fn test_align_bio() {
        let tagset = TagSet {
            labels: vec![FieldName::new("location")],
        };
        let text = "Fire in Dry Dock 1 today";
        let tokens = tokenize(text);
        let spans = vec![SpanAnnotation::new(8, 18, "location")];
        let tags = tagset.align(&tokens, &spans).unwrap();
        let names: Vec<String> = tags.iter().map(|&t| tagset.name(t)).collect();
        assert_eq!(
            names,
            vec!["O", "O", "B-location", "I-location", "I-location", "O"]
        );
    }

    #[test]
    fn test_align_rejects_partial_token() {
        let tagset = TagSet {
            labels: vec![FieldName::new("reporter_name")],
        };
        let text = "Smithson reported";
        let spans = vec![SpanAnnotation::new(0, 5, "reporter_name")];
        assert!(matches!(
            tagset.align(&tokenize(text), &spans),
            Err(IrxError::InvalidSpan(_))
        ));
    }

    #[test]
    fn test_inside_requires_matching_begin() {
        assert!(TagSet::allowed(TagSet::begin(0), TagSet::inside(0)));
        assert!(TagSet::allowed(TagSet::inside(0), TagSet::inside(0)));
        assert!(!TagSet::allowed(OUTSIDE, TagSet::inside(0)));
        assert!(!TagSet::allowed(TagSet::begin(1), TagSet::inside(0)));
        assert!(TagSet::allowed(OUTSIDE, TagSet::begin(2)));
    }

    #[test]
    fn test_shape() {
        assert_eq!(shape("Morgan"), "Xx");
        assert_eq!(shape("14"), "d");
        assert_eq!(shape("A-1"), "X-d");
    }

    #[test]
    fn test_extract_before_training() {
        let strategy = EntityModelStrategy::default();
        assert!(strategy.extract("anything").unwrap_err().is_not_trained());
    }

    #[test]
    fn test_train_without_spans_fails() {
        let set = TrainingSet::from_examples(vec![example("No labels here.", &[])]);
        let mut strategy = EntityModelStrategy::default();
        assert!(strategy.train(&set).is_err());
        assert!(strategy.extract("x").unwrap_err().is_not_trained());
    }

    #[test]
    fn test_train_skips_misaligned_examples() {
        let mut examples = reports().examples().to_vec();
        examples.push(example(
            "Smithson reported a leak.",
            &[("reporter_name", "Smith")],
        ));
        let mut strategy = EntityModelStrategy::new(NerConfig {
            epochs: 5,
            ..NerConfig::default()
        });

        let report = strategy
            .train(&TrainingSet::from_examples(examples))
            .unwrap();
        assert_eq!(report.examples_used, 5);
        assert_eq!(report.examples_skipped, 1);
        assert_eq!(
            strategy.labels(),
            vec![FieldName::new("reporter_name"), FieldName::new("location")]
        );
    }

    #[test]
    fn test_learns_training_reports() {
        let mut strategy = EntityModelStrategy::default();
        strategy.train(&reports()).unwrap();

        let result = strategy
            .extract("Reported by Jamie Ward in Warehouse A.")
            .unwrap();
        assert_eq!(
            result.get("reporter_name").map(String::as_str),
            Some("Jamie Ward")
        );
        assert_eq!(
            result.get("location").map(String::as_str),
            Some("Warehouse A")
        );
    }

    #[test]
    fn test_extracted_values_come_from_text() {
        let mut strategy = EntityModelStrategy::default();
        strategy.train(&reports()).unwrap();

        let text = "Reported by Casey Parker in Cafeteria. Reported by Sam Lee too.";
        let result = strategy.extract(text).unwrap();
        for value in result.values() {
            assert!(text.contains(value.as_str()), "{value} not in text");
        }
    }

    proptest! {
        #[test]
        fn prop_spans_valid_and_disjoint(
            text in "[A-Za-z ]{0,40}",
            values in proptest::collection::vec("[A-Za-z]{1,6}", 0..8),
        ) {
            let pairs: Vec<(&str, &str)> = ENTITY_FIELDS
                .iter()
                .copied()
                .zip(values.iter().map(String::as_str))
                .collect();
            let spans = build_span_annotations(&example(&text, &pairs));

            for span in &spans {
                prop_assert!(span.start < span.end);
                prop_assert!(span.end <= text.len());
            }
            for pair in spans.windows(2) {
                prop_assert!(pair[0].start <= pair[1].start);
                prop_assert!(!pair[0].overlaps(&pair[1]));
            }
        }
    }
}
