use crate::config::GradientBoostingParams;
use crate::error::{AppError, Result};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Trait for binary classifiers
pub trait Classifier: Send + Sync {
    /// Train the classifier on labels in {0, 1}
    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()>;

    /// Class probabilities, one row per sample: [P(0), P(1)]
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Check if model is trained
    fn is_trained(&self) -> bool;
}

/// Leaf denominators below this are treated as zero
const MIN_HESSIAN: f64 = 1e-150;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
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

/// Regression tree fit to log-loss gradients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    residuals: &'a [f64],
    hessians: &'a [f64],
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    nodes: Vec<TreeNode>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    improvement: f64,
}

impl<'a> TreeBuilder<'a> {
    fn build(mut self, samples: Vec<usize>) -> RegressionTree {
        self.grow(samples, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let node_id = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { value: 0.0 });

        let split = if depth < self.max_depth && samples.len() >= self.min_samples_split {
            self.best_split(&samples)
        } else {
            None
        };

        match split {
            Some(split) => {
                let (left, right): (Vec<usize>, Vec<usize>) = samples
                    .into_iter()
                    .partition(|&i| self.x[[i, split.feature]] <= split.threshold);
                let left_id = self.grow(left, depth + 1);
                let right_id = self.grow(right, depth + 1);
                self.nodes[node_id] = TreeNode::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left: left_id,
                    right: right_id,
                };
            }
            None => {
                self.nodes[node_id] = TreeNode::Leaf {
                    value: self.newton_value(&samples),
                };
            }
        }

        node_id
    }

    /// One Newton-Raphson step for the log-loss in this leaf
    fn newton_value(&self, samples: &[usize]) -> f64 {
        let numerator: f64 = samples.iter().map(|&i| self.residuals[i]).sum();
        let denominator: f64 = samples.iter().map(|&i| self.hessians[i]).sum();
        if denominator.abs() < MIN_HESSIAN {
            0.0
        } else {
            numerator / denominator
        }
    }

    /// Best split by Friedman's mean-squared-error improvement.
    ///
    /// Ties keep the first candidate found (lowest feature, lowest threshold).
    fn best_split(&self, samples: &[usize]) -> Option<SplitCandidate> {
        let n = samples.len();
        let total: f64 = samples.iter().map(|&i| self.residuals[i]).sum();
        let mut best: Option<SplitCandidate> = None;
        let mut ordered: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in 0..self.x.ncols() {
            ordered.clear();
            ordered.extend(
                samples
                    .iter()
                    .map(|&i| (self.x[[i, feature]], self.residuals[i])),
            );
            ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            for pos in 0..n - 1 {
                left_sum += ordered[pos].1;
                let n_left = pos + 1;
                let n_right = n - n_left;

                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }
                let (value, next) = (ordered[pos].0, ordered[pos + 1].0);
                if value >= next {
                    continue;
                }

                let diff = left_sum / n_left as f64 - (total - left_sum) / n_right as f64;
                let improvement = (n_left * n_right) as f64 / n as f64 * diff * diff;

                if improvement > best.as_ref().map(|b| b.improvement).unwrap_or(0.0) {
                    let mid = value / 2.0 + next / 2.0;
                    let threshold = if mid >= next { value } else { mid };
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        improvement,
                    });
                }
            }
        }

        best
    }
}

/// Gradient-boosted decision trees with binomial log-loss
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    params: GradientBoostingParams,
    init_score: f64,
    trees: Vec<RegressionTree>,
    train_loss: Vec<f64>,
    n_features: usize,
    trained: bool,
}

impl GradientBoostingClassifier {
    pub fn new(params: GradientBoostingParams) -> Self {
        Self {
            params,
            init_score: 0.0,
            trees: Vec::new(),
            train_loss: Vec::new(),
            n_features: 0,
            trained: false,
        }
    }

    pub fn params(&self) -> &GradientBoostingParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// In-bag log-loss after each boosting stage
    pub fn train_loss(&self) -> &[f64] {
        &self.train_loss
    }

    fn raw_score(&self, row: ArrayView1<f64>) -> f64 {
        self.init_score
            + self.params.learning_rate
                * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }
}

impl Classifier for GradientBoostingClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[usize]) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            error!(rows = n_samples, labels = y.len(), "Classifier input shape mismatch");
            return Err(AppError::Schema(format!(
                "classifier received {} rows and {} labels",
                n_samples,
                y.len()
            )));
        }
        if y.iter().any(|&label| label > 1) {
            error!("Classifier labels outside {{0, 1}}");
            return Err(AppError::Training(
                "gradient boosting expects binary labels".to_string(),
            ));
        }

        let positives = y.iter().filter(|&&label| label == 1).count();
        if positives == 0 || positives == n_samples {
            error!(rows = n_samples, positives, "Training labels contain a single class");
            return Err(AppError::Training(
                "training labels must contain both classes".to_string(),
            ));
        }

        let targets: Vec<f64> = y.iter().map(|&label| label as f64).collect();
        let prior = positives as f64 / n_samples as f64;
        let init_score = (prior / (1.0 - prior)).ln();

        let mut raw = vec![init_score; n_samples];
        let mut residuals = vec![0.0; n_samples];
        let mut hessians = vec![0.0; n_samples];
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        let mut train_loss = Vec::with_capacity(self.params.n_estimators);

        let n_in_bag = ((self.params.subsample * n_samples as f64) as usize).clamp(1, n_samples);
        let mut rng = StdRng::seed_from_u64(self.params.random_state);

        for stage in 0..self.params.n_estimators {
            for i in 0..n_samples {
                let p = sigmoid(raw[i]);
                residuals[i] = targets[i] - p;
                hessians[i] = p * (1.0 - p);
            }

            let samples: Vec<usize> = if n_in_bag < n_samples {
                let mut drawn = sample(&mut rng, n_samples, n_in_bag).into_vec();
                drawn.sort_unstable();
                drawn
            } else {
                (0..n_samples).collect()
            };

            let tree = TreeBuilder {
                x,
                residuals: &residuals,
                hessians: &hessians,
                max_depth: self.params.max_depth,
                min_samples_split: self.params.min_samples_split,
                min_samples_leaf: self.params.min_samples_leaf,
                nodes: Vec::new(),
            }
            .build(samples.clone());

            for (i, row) in x.rows().into_iter().enumerate() {
                raw[i] += self.params.learning_rate * tree.predict_row(row);
            }

            let loss = samples
                .iter()
                .map(|&i| log_loss(targets[i], raw[i]))
                .sum::<f64>()
                / samples.len() as f64;
            train_loss.push(loss);

            if stage % 25 == 0 {
                debug!(stage, loss, leaves = tree.n_leaves(), "Boosting stage complete");
            }
            trees.push(tree);
        }

        self.init_score = init_score;
        self.trees = trees;
        self.train_loss = train_loss;
        self.n_features = x.ncols();
        self.trained = true;

        info!(
            n_estimators = self.trees.len(),
            n_features = self.n_features,
            final_loss = self.train_loss.last().copied().unwrap_or_default(),
            "Gradient boosting classifier trained"
        );

        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.trained {
            return Err(AppError::Training("Model not trained".to_string()));
        }
        if x.ncols() != self.n_features {
            error!(
                columns = x.ncols(),
                expected = self.n_features,
                "Classifier input width mismatch"
            );
            return Err(AppError::Schema(format!(
                "classifier expected {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }

        let mut proba = Array2::zeros((x.nrows(), 2));
        for (i, row) in x.rows().into_iter().enumerate() {
            let p = sigmoid(self.raw_score(row));
            proba[[i, 0]] = 1.0 - p;
            proba[[i, 1]] = p;
        }

        Ok(proba)
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Binomial deviance of one sample given its raw score
fn log_loss(target: f64, raw: f64) -> f64 {
    // log(1 + exp(raw)) - target * raw, computed stably
    let softplus = if raw > 0.0 {
        raw + (-raw).exp().ln_1p()
    } else {
        raw.exp().ln_1p()
    };
    softplus - target * raw
}
