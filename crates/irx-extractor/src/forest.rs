//! Random forest classifier
//!
//! Bagged CART trees: each tree is grown on a bootstrap sample, splits
//! minimize Gini impurity over a random subset of √n features, and trees
//! grow until leaves are pure (unless a depth limit is configured). The
//! forest averages leaf class distributions across trees.
//!
//! Every tree draws from its own RNG seeded from the configured seed and its
//! index, so fitting is reproducible and trees can be grown in parallel.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use irx_core::{ForestConfig, IrxError, Result};

use crate::classifier::{argmax, check_fit_input, encode_labels, Classifier};

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        /// Class probabilities at this leaf
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single fitted tree; nodes live in an arena, root at index 0
#[derive(Debug, Clone)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn distribution(&self, x: ArrayView1<'_, f64>) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { distribution } => return distribution,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct TreeBuilder<'x, 'y> {
    x: ArrayView2<'x, f64>,
    y: &'y [usize],
    n_classes: usize,
    max_features: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_, '_> {
    fn build(mut self, samples: Vec<usize>) -> DecisionTree {
        self.grow(samples, 0);
        DecisionTree { nodes: self.nodes }
    }

    /// Grow a subtree and return its node index
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let counts = self.class_counts(&samples);
        let index = self.nodes.len();

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.max_depth.is_some_and(|max| depth >= max);
        let split = if pure || depth_reached || samples.len() < self.min_samples_split {
            None
        } else {
            self.best_split(&samples)
        };

        let Some(split) = split else {
            self.nodes.push(leaf(&counts));
            return index;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&s| self.x[[s, split.feature]] <= split.threshold);

        // Reserve the slot, then fill it once the children exist
        self.nodes.push(leaf(&counts));
        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    fn class_counts(&self, samples: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &s in samples {
            counts[self.y[s]] += 1;
        }
        counts
    }

    /// Lowest-impurity split over a random feature subset. Keeps drawing
    /// features past `max_features` until at least one valid split is found.
    fn best_split(&mut self, samples: &[usize]) -> Option<SplitCandidate> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut self.rng);

        let mut best: Option<SplitCandidate> = None;
        let mut visited = 0;

        for feature in features {
            if visited >= self.max_features && best.is_some() {
                break;
            }

            let mut column: Vec<(f64, usize)> = samples
                .iter()
                .map(|&s| (self.x[[s, feature]], self.y[s]))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let constant = column.first().map(|c| c.0) == column.last().map(|c| c.0);
            if constant {
                continue;
            }
            visited += 1;

            if let Some(candidate) = self.scan_feature(feature, &column) {
                if best.map_or(true, |b| candidate.impurity < b.impurity) {
                    best = Some(candidate);
                }
            }
        }

        best
    }

    /// Sweep thresholds over one sorted column
    fn scan_feature(&self, feature: usize, column: &[(f64, usize)]) -> Option<SplitCandidate> {
        let total = column.len();
        let mut right_counts = vec![0usize; self.n_classes];
        for &(_, class) in column {
            right_counts[class] += 1;
        }
        let mut left_counts = vec![0usize; self.n_classes];

        let mut best: Option<SplitCandidate> = None;
        for i in 0..total - 1 {
            let class = column[i].1;
            left_counts[class] += 1;
            right_counts[class] -= 1;

            let (value, next) = (column[i].0, column[i + 1].0);
            if value >= next {
                continue;
            }

            let n_left = (i + 1) as f64;
            let n_right = (total - i - 1) as f64;
            let impurity = (n_left * gini(&left_counts, n_left)
                + n_right * gini(&right_counts, n_right))
                / total as f64;

            if best.map_or(true, |b| impurity < b.impurity) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: value + (next - value) / 2.0,
                    impurity,
                });
            }
        }
        best
    }
}

fn gini(counts: &[usize], n: f64) -> f64 {
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / n;
            p * p
        })
        .sum::<f64>()
}

fn leaf(counts: &[usize]) -> Node {
    let total = counts.iter().sum::<usize>().max(1) as f64;
    Node::Leaf {
        distribution: counts.iter().map(|&c| c as f64 / total).collect(),
    }
}

#[derive(Debug, Clone)]
struct ForestModel {
    classes: Vec<String>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

/// Random forest over dense features
#[derive(Debug, Clone)]
pub struct RandomForest {
    config: ForestConfig,
    model: Option<ForestModel>,
}

impl RandomForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.model.as_ref().map_or(0, |m| m.trees.len())
    }

    /// Averaged class probabilities, in sorted class order
    pub fn predict_proba(&self, x: ArrayView1<'_, f64>) -> Result<Vec<(String, f64)>> {
        let model = self.checked_model(&x)?;
        let probs = average_distribution(model, x);
        Ok(model.classes.iter().cloned().zip(probs).collect())
    }

    fn checked_model(&self, x: &ArrayView1<'_, f64>) -> Result<&ForestModel> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| IrxError::not_trained("random forest"))?;
        if x.len() != model.n_features {
            return Err(IrxError::DimensionMismatch {
                expected: model.n_features,
                actual: x.len(),
            });
        }
        Ok(model)
    }
}

fn average_distribution(model: &ForestModel, x: ArrayView1<'_, f64>) -> Vec<f64> {
    let mut sum = vec![0.0; model.classes.len()];
    for tree in &model.trees {
        for (acc, p) in sum.iter_mut().zip(tree.distribution(x)) {
            *acc += p;
        }
    }
    let n = model.trees.len().max(1) as f64;
    sum.into_iter().map(|s| s / n).collect()
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[String]) -> Result<()> {
        check_fit_input(&x, y)?;
        if self.config.n_estimators == 0 {
            return Err(IrxError::TrainingError(
                "random forest needs at least one tree".to_string(),
            ));
        }

        let (classes, encoded) = encode_labels(y);
        let n_samples = x.nrows();
        let n_features = x.ncols();
        let max_features = ((n_features as f64).sqrt() as usize).max(1);
        let config = self.config;

        let trees = (0..config.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let bootstrap = (0..n_samples)
                    .map(|_| rng.gen_range(0..n_samples))
                    .collect();

                TreeBuilder {
                    x,
                    y: &encoded,
                    n_classes: classes.len(),
                    max_features,
                    max_depth: config.max_depth,
                    min_samples_split: config.min_samples_split.max(2),
                    rng,
                    nodes: Vec::new(),
                }
                .build(bootstrap)
            })
            .collect();

        self.model = Some(ForestModel {
            classes,
            n_features,
            trees,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView1<'_, f64>) -> Result<String> {
        let model = self.checked_model(&x)?;
        argmax(average_distribution(model, x))
            .map(|i| model.classes[i].clone())
            .ok_or_else(|| IrxError::ExtractionError("forest has no classes".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn small_forest(trees: usize) -> RandomForest {
        RandomForest::new(ForestConfig {
            n_estimators: trees,
            ..ForestConfig::default()
        })
    }

    #[test]
    fn test_gini() {
        assert_eq!(gini(&[4, 0], 4.0), 0.0);
        assert!((gini(&[2, 2], 4.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_learns_threshold() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [10.0, 0.0], [11.0, 0.0], [12.0, 0.0]];
        let y = labels(&["low", "low", "low", "high", "high", "high"]);

        let mut forest = small_forest(25);
        forest.fit(x.view(), &y).unwrap();

        assert_eq!(forest.n_trees(), 25);
        assert_eq!(forest.predict(array![0.5, 0.0].view()).unwrap(), "low");
        assert_eq!(forest.predict(array![15.0, 0.0].view()).unwrap(), "high");
    }

    #[test]
    fn test_single_class() {
        let x = array![[1.0], [2.0]];
        let mut forest = small_forest(3);
        forest.fit(x.view(), &labels(&["Unknown", "Unknown"])).unwrap();
        assert_eq!(forest.predict(array![5.0].view()).unwrap(), "Unknown");
    }

    #[test]
    fn test_reproducible_with_seed() {
        let x = array![[0.1, 0.9], [0.8, 0.2], [0.4, 0.4], [0.9, 0.7], [0.2, 0.3]];
        let y = labels(&["a", "b", "a", "b", "a"]);

        let mut first = small_forest(10);
        let mut second = small_forest(10);
        first.fit(x.view(), &y).unwrap();
        second.fit(x.view(), &y).unwrap();

        let probe = array![0.5, 0.5];
        assert_eq!(
            first.predict_proba(probe.view()).unwrap(),
            second.predict_proba(probe.view()).unwrap()
        );
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let mut forest = small_forest(8);
        forest.fit(x.view(), &labels(&["a", "a", "b", "c"])).unwrap();

        let proba = forest.predict_proba(array![1.5].view()).unwrap();
        let total: f64 = proba.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(proba.len(), 3);
    }

    #[test]
    fn test_fit_from_borrowed_view() {
        let owned = array![[0.0, 1.0], [0.2, 1.1], [5.0, 0.0], [5.2, 0.1]];
        let view = owned.slice(ndarray::s![.., ..]);
        let mut forest = small_forest(4);
        forest.fit(view, &labels(&["a", "a", "b", "b"])).unwrap();
        assert_eq!(forest.predict(array![5.1, 0.0].view()).unwrap(), "b");
    }

    #[test]
    fn test_errors() {
        let mut forest = small_forest(2);
        assert!(forest.predict(array![1.0].view()).unwrap_err().is_not_trained());

        forest.fit(array![[1.0, 2.0]].view(), &labels(&["a"])).unwrap();
        assert!(matches!(
            forest.predict(array![1.0].view()),
            Err(IrxError::DimensionMismatch { .. })
        ));

        let mut empty = small_forest(0);
        assert!(empty.fit(array![[1.0]].view(), &labels(&["a"])).is_err());
    }
}
