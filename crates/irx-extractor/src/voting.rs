//! Voting ensemble
//!
//! Runs every strategy on the same text, isolates their failures, and
//! merges the outputs field by field with a plurality vote. Ties go to
//! the strategy that comes first in the ensemble's order.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use irx_core::{
    AppConfig, BatchConfig, EnsembleResult, FieldMap, FieldName, Result, StrategyOutcome,
    StrategyRun, TrainingSet, VotingConfig,
};

use crate::classifier::UNKNOWN;
use crate::{
    AdvancedEnsembleStrategy, EntityModelStrategy, ExtractionStrategy, HybridStrategy,
    TemplateStrategy, TrainReport,
};

// ============================================================================
// Output types
// ============================================================================

/// How one field's vote went
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub field: FieldName,
    /// Reported value, verbatim from the earliest strategy that backed it
    pub winner: String,
    /// Strategies that voted for the winning value, in ensemble order
    pub voters: Vec<String>,
    /// Number of strategies that voted on this field at all
    pub total_votes: usize,
}

/// Merged fields plus everything each strategy said
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleOutput {
    pub fields: EnsembleResult,
    pub predictions: Vec<StrategyRun>,
    pub votes: Vec<VoteTally>,
}

impl EnsembleOutput {
    /// True when there was at least one strategy and every one failed
    pub fn all_failed(&self) -> bool {
        !self.predictions.is_empty() && self.predictions.iter().all(|r| r.outcome.is_failed())
    }
}

/// One row of a batch extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub index: usize,
    pub preview: String,
    pub fields: EnsembleResult,
    pub predictions: Vec<StrategyRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of training every strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsembleTrainReport {
    pub examples: usize,
    pub trained: Vec<TrainReport>,
    /// Strategy name and failure reason
    pub failed: Vec<(String, String)>,
}

impl EnsembleTrainReport {
    pub fn all_failed(&self) -> bool {
        self.trained.is_empty() && !self.failed.is_empty()
    }
}

// ============================================================================
// Vote aggregation
// ============================================================================

/// Grouping key: whitespace collapsed and case folded
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

struct Group {
    key: String,
    value: String,
    voters: Vec<String>,
}

/// Merge per-strategy outputs by plurality vote.
///
/// Each strategy casts at most one vote per field. Runs must be in ensemble
/// order: groups are formed in order of first appearance and only a
/// strictly larger group replaces the current winner.
pub fn vote(runs: &[StrategyRun], normalize: bool) -> (EnsembleResult, Vec<VoteTally>) {
    let mut field_names: Vec<&FieldName> = runs
        .iter()
        .filter_map(|r| r.outcome.fields())
        .flat_map(|fields| fields.keys())
        .collect();
    field_names.sort();
    field_names.dedup();

    let mut merged = EnsembleResult::new();
    let mut tallies = Vec::with_capacity(field_names.len());

    for field in field_names {
        let mut groups: Vec<Group> = Vec::new();
        let mut total_votes = 0;

        for run in runs {
            let Some(value) = run.outcome.fields().and_then(|f| f.get(field)) else {
                continue;
            };
            if value.trim().is_empty() || value == UNKNOWN {
                continue;
            }
            total_votes += 1;

            let key = if normalize {
                normalize_key(value)
            } else {
                value.clone()
            };
            match groups.iter_mut().find(|g| g.key == key) {
                Some(group) => group.voters.push(run.strategy.clone()),
                None => groups.push(Group {
                    key,
                    value: value.clone(),
                    voters: vec![run.strategy.clone()],
                }),
            }
        }

        let mut winner: Option<Group> = None;
        for group in groups {
            if winner
                .as_ref()
                .map_or(true, |w| group.voters.len() > w.voters.len())
            {
                winner = Some(group);
            }
        }

        if let Some(winner) = winner {
            debug!(
                field = %field,
                value = %winner.value,
                votes = winner.voters.len(),
                total = total_votes,
                "Field vote"
            );
            merged.insert(field.clone(), winner.value.clone());
            tallies.push(VoteTally {
                field: field.clone(),
                winner: winner.value,
                voters: winner.voters,
                total_votes,
            });
        }
    }

    (merged, tallies)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one strategy with errors and panics captured as a failed outcome
fn run_strategy(strategy: &dyn ExtractionStrategy, text: &str) -> StrategyRun {
    let outcome = match catch_unwind(AssertUnwindSafe(|| strategy.extract(text))) {
        Ok(result) => StrategyOutcome::from_result(result),
        Err(payload) => StrategyOutcome::Failed {
            reason: format!("panicked: {}", panic_message(payload)),
        },
    };

    if let StrategyOutcome::Failed { reason } = &outcome {
        warn!(strategy = strategy.name(), reason = %reason, "Strategy extraction failed");
    }

    StrategyRun {
        strategy: strategy.name().to_string(),
        outcome,
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

// ============================================================================
// Ensemble
// ============================================================================

/// Ordered strategies plus the voting and batch settings
pub struct VotingEnsemble {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    voting: VotingConfig,
    batch: BatchConfig,
}

impl VotingEnsemble {
    /// The four bundled strategies in vote order: ner, hybrid, template, advanced
    pub fn new(config: &AppConfig) -> Self {
        let extractor = &config.extractor;
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(EntityModelStrategy::new(extractor.ner.clone())),
            Box::new(HybridStrategy::new(extractor.hybrid.clone())),
            Box::new(TemplateStrategy::new(extractor.template.clone())),
            Box::new(AdvancedEnsembleStrategy::new(extractor.advanced.clone())),
        ];

        Self::with_strategies(strategies)
            .with_voting(config.voting.clone())
            .with_batch(config.batch.clone())
    }

    /// Custom strategies; their order is the tie-break order
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self {
            strategies,
            voting: VotingConfig::default(),
            batch: BatchConfig::default(),
        }
    }

    pub fn with_voting(mut self, voting: VotingConfig) -> Self {
        self.voting = voting;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Train every strategy on aligned texts and labels.
    ///
    /// Misaligned input fails before any strategy runs. A strategy that
    /// fails or panics is recorded in the report; the rest still train.
    pub fn train_all(
        &mut self,
        texts: &[String],
        labels: &[FieldMap],
    ) -> Result<EnsembleTrainReport> {
        let data = TrainingSet::new(texts, labels)?;
        Ok(self.train(&data))
    }

    pub fn train(&mut self, data: &TrainingSet) -> EnsembleTrainReport {
        let mut report = EnsembleTrainReport {
            examples: data.len(),
            ..EnsembleTrainReport::default()
        };

        for strategy in self.strategies.iter_mut() {
            let name = strategy.name().to_string();
            info!(strategy = %name, examples = data.len(), "Training strategy");

            let result = catch_unwind(AssertUnwindSafe(|| strategy.train(data)));
            match result {
                Ok(Ok(trained)) => report.trained.push(trained),
                Ok(Err(e)) => {
                    warn!(strategy = %name, error = %e, "Strategy training failed");
                    report.failed.push((name, e.to_string()));
                }
                Err(payload) => {
                    let reason = format!("panicked: {}", panic_message(payload));
                    warn!(strategy = %name, reason = %reason, "Strategy training failed");
                    report.failed.push((name, reason));
                }
            }
        }

        info!(
            trained = report.trained.len(),
            failed = report.failed.len(),
            "Ensemble training complete"
        );
        report
    }

    /// Extract with every strategy and merge by vote
    pub fn extract_with_voting(&self, text: &str) -> EnsembleOutput {
        let predictions: Vec<StrategyRun> = self
            .strategies
            .iter()
            .map(|s| run_strategy(s.as_ref(), text))
            .collect();

        let (fields, votes) = vote(&predictions, self.voting.normalize_values);
        EnsembleOutput {
            fields,
            predictions,
            votes,
        }
    }

    /// Extract many texts. Rows come back in input order; a failing row is
    /// annotated rather than aborting the batch.
    pub fn extract_batch<S>(&self, texts: &[S]) -> Vec<BatchRow>
    where
        S: AsRef<str> + Sync,
    {
        let row = |(index, text): (usize, &S)| {
            let text = text.as_ref();
            let output = self.extract_with_voting(text);
            let error = output
                .all_failed()
                .then(|| "all strategies failed".to_string());
            BatchRow {
                index,
                preview: preview(text, self.batch.preview_chars),
                fields: output.fields,
                predictions: output.predictions,
                error,
            }
        };

        let rows: Vec<BatchRow> = if self.batch.parallel {
            texts.par_iter().enumerate().map(row).collect()
        } else {
            texts.iter().enumerate().map(row).collect()
        };

        info!(
            rows = rows.len(),
            failed = rows.iter().filter(|r| r.error.is_some()).count(),
            "Batch extraction complete"
        );
        rows
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use irx_core::IrxError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        fields: Vec<(&'static str, &'static str)>,
    }

    impl ExtractionStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn train(&mut self, _data: &TrainingSet) -> Result<TrainReport> {
            Ok(TrainReport::new(self.name))
        }

        fn extract(&self, _text: &str) -> Result<FieldMap> {
            Ok(self
                .fields
                .iter()
                .map(|(k, v)| (FieldName::new(k), v.to_string()))
                .collect())
        }
    }

    struct Failing;

    impl ExtractionStrategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn train(&mut self, _data: &TrainingSet) -> Result<TrainReport> {
            Err(IrxError::TrainingError("cannot train".to_string()))
        }

        fn extract(&self, _text: &str) -> Result<FieldMap> {
            Err(IrxError::ExtractionError("cannot extract".to_string()))
        }
    }

    struct Panicking;

    impl ExtractionStrategy for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn train(&mut self, _data: &TrainingSet) -> Result<TrainReport> {
            panic!("training exploded")
        }

        fn extract(&self, _text: &str) -> Result<FieldMap> {
            panic!("extraction exploded")
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl ExtractionStrategy for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn train(&mut self, _data: &TrainingSet) -> Result<TrainReport> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TrainReport::new("counting"))
        }

        fn extract(&self, _text: &str) -> Result<FieldMap> {
            Ok(FieldMap::new())
        }
    }

    fn fixed(name: &'static str, fields: &[(&'static str, &'static str)]) -> Box<dyn ExtractionStrategy> {
        Box::new(Fixed {
            name,
            fields: fields.to_vec(),
        })
    }

    fn ensemble(strategies: Vec<Box<dyn ExtractionStrategy>>) -> VotingEnsemble {
        VotingEnsemble::with_strategies(strategies).with_batch(BatchConfig {
            parallel: false,
            preview_chars: 10,
        })
    }

    fn field<'a>(output: &'a EnsembleOutput, name: &str) -> Option<&'a str> {
        output.fields.get(name).map(String::as_str)
    }

    #[test]
    fn test_default_order() {
        let ensemble = VotingEnsemble::new(&AppConfig::default());
        assert_eq!(
            ensemble.strategy_names(),
            vec!["ner", "hybrid", "template", "advanced"]
        );
    }

    #[test]
    fn test_majority_wins() {
        let ensemble = ensemble(vec![
            fixed("a", &[("department", "IT")]),
            fixed("b", &[("department", "Engineering")]),
            fixed("c", &[("department", "IT")]),
            fixed("d", &[("department", "IT")]),
        ]);
        let output = ensemble.extract_with_voting("text");
        assert_eq!(field(&output, "department"), Some("IT"));
        assert_eq!(output.votes[0].voters, vec!["a", "c", "d"]);
        assert_eq!(output.votes[0].total_votes, 4);
    }

    #[test]
    fn test_tie_goes_to_earliest_strategy() {
        let ensemble = ensemble(vec![
            fixed("a", &[("location", "Dry Dock 1")]),
            fixed("b", &[("location", "Warehouse A")]),
            fixed("c", &[("location", "Warehouse A")]),
            fixed("d", &[("location", "Dry Dock 1")]),
        ]);
        for _ in 0..5 {
            let output = ensemble.extract_with_voting("text");
            assert_eq!(field(&output, "location"), Some("Dry Dock 1"));
        }
    }

    #[test]
    fn test_single_voter_fields_kept() {
        let ensemble = ensemble(vec![
            fixed("a", &[("department", "IT")]),
            fixed("b", &[("incident_time", "14:30")]),
        ]);
        let output = ensemble.extract_with_voting("text");
        assert_eq!(output.fields.len(), 2);
        assert_eq!(field(&output, "incident_time"), Some("14:30"));
    }

    #[test]
    fn test_normalized_grouping_keeps_verbatim_winner() {
        let ensemble = ensemble(vec![
            fixed("a", &[("location", "Dry Dock 1")]),
            fixed("b", &[("location", "warehouse a ")]),
            fixed("c", &[("location", "Warehouse  A")]),
        ]);
        let output = ensemble.extract_with_voting("text");
        assert_eq!(field(&output, "location"), Some("warehouse a "));
        assert_eq!(output.votes[0].voters, vec!["b", "c"]);
    }

    #[test]
    fn test_exact_grouping_when_normalization_disabled() {
        let ensemble = ensemble(vec![
            fixed("a", &[("location", "Dry Dock 1")]),
            fixed("b", &[("location", "warehouse a")]),
            fixed("c", &[("location", "Warehouse A")]),
        ])
        .with_voting(VotingConfig {
            normalize_values: false,
        });
        let output = ensemble.extract_with_voting("text");
        assert_eq!(field(&output, "location"), Some("Dry Dock 1"));
    }

    #[test]
    fn test_empty_and_unknown_values_do_not_vote() {
        let ensemble = ensemble(vec![
            fixed("a", &[("department", "Unknown"), ("location", "  ")]),
            fixed("b", &[("department", "Safety")]),
        ]);
        let output = ensemble.extract_with_voting("text");
        assert_eq!(field(&output, "department"), Some("Safety"));
        assert!(!output.fields.contains_key("location"));
    }

    #[test]
    fn test_failures_are_isolated() {
        let ensemble = ensemble(vec![
            Box::new(Failing),
            Box::new(Panicking),
            fixed("ok", &[("department", "IT")]),
        ]);
        let output = ensemble.extract_with_voting("text");

        assert_eq!(field(&output, "department"), Some("IT"));
        assert_eq!(output.predictions.len(), 3);
        assert!(output.predictions[0].outcome.is_failed());
        match &output.predictions[1].outcome {
            StrategyOutcome::Failed { reason } => assert!(reason.contains("extraction exploded")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!output.all_failed());
    }

    #[test]
    fn test_empty_outcome_is_not_failure() {
        let ensemble = ensemble(vec![fixed("quiet", &[])]);
        let output = ensemble.extract_with_voting("text");
        assert_eq!(output.predictions[0].outcome, StrategyOutcome::Empty);
        assert!(output.fields.is_empty());
    }

    #[test]
    fn test_train_all_rejects_misaligned_before_training() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ensemble = ensemble(vec![Box::new(Counting(calls.clone()))]);

        let err = ensemble
            .train_all(&["a".to_string(), "b".to_string()], &[FieldMap::new()])
            .unwrap_err();
        assert!(matches!(err, IrxError::MisalignedInput { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_train_all_records_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ensemble = ensemble(vec![
            Box::new(Failing),
            Box::new(Panicking),
            Box::new(Counting(calls.clone())),
        ]);

        let report = ensemble
            .train_all(&["text".to_string()], &[FieldMap::new()])
            .unwrap();
        assert_eq!(report.examples, 1);
        assert_eq!(report.trained.len(), 1);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[1].0, "panicking");
        assert!(!report.all_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batch_rows_in_order_with_errors() {
        let ok = ensemble(vec![fixed("a", &[("department", "IT")])]);
        let rows = ok.extract_batch(&["short", "a much longer report text"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[0].preview, "short");
        assert_eq!(rows[1].preview, "a much lon...");
        assert!(rows.iter().all(|r| r.error.is_none()));

        let broken = ensemble(vec![Box::new(Failing)]).with_batch(BatchConfig::default());
        let rows = broken.extract_batch(&["x", "y", "z"]);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.error.is_some() && r.fields.is_empty()));
        assert_eq!(
            rows.iter().map(|r| r.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    fn run(strategy: String, pairs: Vec<(String, String)>) -> StrategyRun {
        StrategyRun {
            strategy,
            outcome: StrategyOutcome::from_result(Ok(pairs
                .into_iter()
                .map(|(k, v)| (FieldName::new(k), v))
                .collect())),
        }
    }

    proptest! {
        #[test]
        fn prop_vote_never_invents_values(
            outputs in proptest::collection::vec(
                proptest::collection::vec(("(department|location|label)", "[A-Za-z ]{0,6}"), 0..4),
                0..5,
            ),
            normalize in any::<bool>(),
        ) {
            let runs: Vec<StrategyRun> = outputs
                .into_iter()
                .enumerate()
                .map(|(i, pairs)| run(format!("s{i}"), pairs))
                .collect();

            let (merged, tallies) = vote(&runs, normalize);
            let (again, _) = vote(&runs, normalize);
            prop_assert_eq!(&merged, &again);
            prop_assert_eq!(merged.len(), tallies.len());

            for (field, value) in &merged {
                let backed = runs.iter().any(|r| {
                    r.outcome.fields().and_then(|f| f.get(field)) == Some(value)
                });
                prop_assert!(backed, "{} = {:?} not produced by any strategy", field, value);
                prop_assert!(!value.trim().is_empty());
            }
        }
    }
}
