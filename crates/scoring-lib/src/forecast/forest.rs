//! Bagged regression trees
//!
//! A small random forest regressor: every tree is a CART tree grown on a
//! bootstrap sample with squared-error splits over all features, and the
//! forest predicts the mean of its trees. Sampling is driven by a seeded
//! generator so equal inputs always give equal forests.

use super::{ModelTrainer, Regressor};
use crate::error::{ScoringError, ScoringResult};

/// Depth guard against degenerate recursion
const MAX_DEPTH: usize = 32;

/// Fits [`RandomForest`] models
#[derive(Debug, Clone)]
pub struct RandomForestTrainer {
    pub trees: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl RandomForestTrainer {
    pub fn new(trees: usize, min_samples_leaf: usize, seed: u64) -> Self {
        Self {
            trees,
            min_samples_leaf,
            seed,
        }
    }
}

impl ModelTrainer for RandomForestTrainer {
    type Model = RandomForest;

    fn fit(&self, features: &[Vec<f64>], labels: &[f64]) -> ScoringResult<RandomForest> {
        if features.is_empty() {
            return Err(ScoringError::ModelFitting("empty training set".into()));
        }
        if features.len() != labels.len() {
            return Err(ScoringError::ModelFitting(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let width = features[0].len();
        if width == 0 || features.iter().any(|row| row.len() != width) {
            return Err(ScoringError::ModelFitting("ragged or empty feature rows".into()));
        }
        if features.iter().flatten().chain(labels).any(|v| !v.is_finite()) {
            return Err(ScoringError::ModelFitting("non-finite training value".into()));
        }
        if self.trees == 0 {
            return Err(ScoringError::ModelFitting("forest needs at least one tree".into()));
        }

        let mut rng = SplitMix64::new(self.seed);
        let min_leaf = self.min_samples_leaf.max(1);
        let n = labels.len();

        let trees = (0..self.trees)
            .map(|_| {
                let mut sample: Vec<usize> = (0..n).map(|_| rng.below(n)).collect();
                grow(features, labels, &mut sample, min_leaf, 0)
            })
            .collect();

        Ok(RandomForest { trees, width })
    }
}

/// Ensemble of regression trees
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<Node>,
    width: usize,
}

impl RandomForest {
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for RandomForest {
    fn predict(&self, features: &[f64]) -> ScoringResult<f64> {
        if features.len() != self.width {
            return Err(ScoringError::ModelFitting(format!(
                "expected {} features, got {}",
                self.width,
                features.len()
            )));
        }
        let total: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        Ok(total / self.trees.len() as f64)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, features: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

fn grow(
    features: &[Vec<f64>],
    labels: &[f64],
    sample: &mut [usize],
    min_leaf: usize,
    depth: usize,
) -> Node {
    let leaf_value = sample.iter().map(|&i| labels[i]).sum::<f64>() / sample.len() as f64;
    let pure = sample.iter().all(|&i| labels[i] == labels[sample[0]]);
    if pure || depth >= MAX_DEPTH || sample.len() < 2 * min_leaf {
        return Node::Leaf(leaf_value);
    }

    let Some(split) = best_split(features, labels, sample, min_leaf) else {
        return Node::Leaf(leaf_value);
    };

    let (mut left, mut right): (Vec<usize>, Vec<usize>) = sample
        .iter()
        .partition(|&&i| features[i][split.feature] <= split.threshold);

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(grow(features, labels, &mut left, min_leaf, depth + 1)),
        right: Box::new(grow(features, labels, &mut right, min_leaf, depth + 1)),
    }
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
}

/// Split minimizing the summed squared error of both children
fn best_split(
    features: &[Vec<f64>],
    labels: &[f64],
    sample: &mut [usize],
    min_leaf: usize,
) -> Option<SplitChoice> {
    let n = sample.len();
    let total_sum: f64 = sample.iter().map(|&i| labels[i]).sum();
    let total_sq: f64 = sample.iter().map(|&i| labels[i] * labels[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;

    let mut best: Option<(f64, SplitChoice)> = None;

    for feature in 0..features[sample[0]].len() {
        sample.sort_by(|&a, &b| features[a][feature].total_cmp(&features[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for pos in 0..n - 1 {
            let y = labels[sample[pos]];
            left_sum += y;
            left_sq += y * y;

            let left_n = pos + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }
            let here = features[sample[pos]][feature];
            let next = features[sample[pos + 1]][feature];
            if here >= next {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n as f64)
                + (right_sq - right_sum * right_sum / right_n as f64);

            if sse < parent_sse && best.as_ref().map_or(true, |(b, _)| sse < *b) {
                best = Some((
                    sse,
                    SplitChoice {
                        feature,
                        threshold: here + (next - here) / 2.0,
                    },
                ));
            }
        }
    }

    best.map(|(_, choice)| choice)
}

/// SplitMix64 generator for bootstrap sampling
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform index in `0..bound`
    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}
