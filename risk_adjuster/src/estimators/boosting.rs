//! boosting.rs – gradient-boosted regression trees (squared loss)
//!
//! Deterministic: no row or column subsampling, so identical inputs give identical trees.

use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Arena-allocated tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: &ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeGrower<'a, 'x> {
    x: &'a ArrayView2<'x, f64>,
    residuals: &'a [f64],
    params: &'a BoostingParams,
    nodes: Vec<Node>,
    gains: Vec<f64>,
}

impl<'a, 'x> TreeGrower<'a, 'x> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        let mean = rows.iter().map(|&i| self.residuals[i]).mean();
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf {
            return id;
        }
        let Some(best) = self.best_split(&rows) else {
            return id;
        };
        self.gains[best.feature] += best.gain;
        let left = self.grow(best.left, depth + 1);
        let right = self.grow(best.right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    /// Largest squared-error reduction over every feature and cut point.
    fn best_split(&self, rows: &[usize]) -> Option<BestSplit> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let total: f64 = rows.iter().map(|&i| self.residuals[i]).sum();
        let parent_score = total * total / n as f64;

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in 0..self.x.ncols() {
            let mut order = rows.to_vec();
            order.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left_sum = 0.0;
            for k in 0..n - 1 {
                left_sum += self.residuals[order[k]];
                let here = self.x[[order[k], feature]];
                let next = self.x[[order[k + 1], feature]];
                let n_left = k + 1;
                if here == next || n_left < min_leaf || n - n_left < min_leaf {
                    continue;
                }
                let right_sum = total - left_sum;
                let score = left_sum * left_sum / n_left as f64
                    + right_sum * right_sum / (n - n_left) as f64;
                let gain = score - parent_score;
                if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, 0.5 * (here + next), gain));
                }
            }
        }

        best.map(|(feature, threshold, gain)| {
            let (left, right) = rows
                .iter()
                .copied()
                .partition(|&i| self.x[[i, feature]] <= threshold);
            BestSplit {
                feature,
                threshold,
                gain,
                left,
                right,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub base: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
    /// Total squared-error reduction credited to each feature.
    pub split_gains: Array1<f64>,
    pub n_features: usize,
}

impl GradientBoostedTrees {
    pub fn fit(x: &ArrayView2<f64>, y: &ArrayView1<f64>, params: &BoostingParams) -> Self {
        let n_features = x.ncols();
        let base = y.iter().mean();
        let mut pred = vec![base; y.len()];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut gains = vec![0.0; n_features];

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&pred).map(|(t, p)| t - p).collect();
            let mut grower = TreeGrower {
                x,
                residuals: &residuals,
                params,
                nodes: Vec::new(),
                gains: vec![0.0; n_features],
            };
            grower.grow((0..y.len()).collect(), 0);
            let tree = RegressionTree {
                nodes: grower.nodes,
            };
            if tree.nodes.len() == 1 {
                // nothing left to split on
                break;
            }
            for (g, t) in gains.iter_mut().zip(&grower.gains) {
                *g += t;
            }
            for (i, row) in x.rows().into_iter().enumerate() {
                pred[i] += params.learning_rate * tree.predict_row(&row);
            }
            trees.push(tree);
        }
        debug!("boosting: {} trees fitted", trees.len());

        Self {
            base,
            learning_rate: params.learning_rate,
            trees,
            split_gains: Array1::from(gains),
            n_features,
        }
    }

    pub fn predict(&self, x: &ArrayView2<f64>) -> Array1<f64> {
        x.rows()
            .into_iter()
            .map(|row| {
                self.base
                    + self.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(&row)).sum::<f64>()
            })
            .collect()
    }
}
