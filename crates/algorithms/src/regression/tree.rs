//! CART regression tree
//!
//! Nodes live in a flat arena; node 0 is the root. Splits minimise the
//! summed squared error of the two children.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Growth limits for one tree
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split
    pub max_features: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Node {
    /// Go left if `value <= threshold`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RegressionTree {
    nodes: Vec<Node>,
    /// Total squared-error decrease per feature
    importances: Vec<f64>,
}

/// Row-major training matrix
pub(crate) struct TrainingData<'a> {
    pub x: &'a [f64],
    pub y: &'a [f64],
    pub n_features: usize,
}

impl TrainingData<'_> {
    #[inline]
    fn value(&self, sample: usize, feature: usize) -> f64 {
        self.x[sample * self.n_features + feature]
    }

    fn len(&self) -> usize {
        self.y.len()
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl RegressionTree {
    /// Fit a tree on a bootstrap sample drawn from `seed`.
    pub fn fit_bootstrap(data: &TrainingData<'_>, params: &TreeParams, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = data.len();
        let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        Self::fit(data, sample, params, &mut rng)
    }

    /// Fit a tree on the given sample indices (duplicates allowed).
    pub fn fit(
        data: &TrainingData<'_>,
        sample: Vec<usize>,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut tree = RegressionTree {
            nodes: vec![Node::Leaf(0.0)],
            importances: vec![0.0; data.n_features],
        };

        let mut stack = vec![(0usize, sample, 0usize)];
        while let Some((node, idx, depth)) = stack.pop() {
            let mean = idx.iter().map(|&i| data.y[i]).sum::<f64>() / idx.len() as f64;

            let can_split = idx.len() >= params.min_samples_split
                && params.max_depth.map_or(true, |d| depth < d);
            let split = if can_split {
                best_split(data, &idx, params, rng)
            } else {
                None
            };

            match split {
                Some(s) => {
                    tree.importances[s.feature] += s.gain;
                    let left = tree.nodes.len();
                    let right = left + 1;
                    tree.nodes.push(Node::Leaf(0.0));
                    tree.nodes.push(Node::Leaf(0.0));
                    tree.nodes[node] = Node::Split {
                        feature: s.feature,
                        threshold: s.threshold,
                        left,
                        right,
                    };
                    stack.push((right, s.right, depth + 1));
                    stack.push((left, s.left, depth + 1));
                }
                None => tree.nodes[node] = Node::Leaf(mean),
            }
        }
        tree
    }

    /// Prediction for one feature vector in schema order
    pub fn predict(&self, values: &[f64]) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if values[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Structural check for a tree that did not come from [`fit`](Self::fit).
    ///
    /// Children must come after their parent so prediction always reaches
    /// a leaf.
    pub fn check(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        if self.importances.len() != n_features {
            return Err(format!(
                "{} importances for {} features",
                self.importances.len(),
                n_features
            ));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf(v) if !v.is_finite() => {
                    return Err(format!("node {} has non-finite value {}", i, v));
                }
                Node::Leaf(_) => {}
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} of {}",
                            i, feature, n_features
                        ));
                    }
                    if threshold.is_nan() {
                        return Err(format!("node {} has a NaN threshold", i));
                    }
                    for child in [left, right] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", i, child));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match nodes[i] {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Exhaustive search over candidate features for the split with the largest
/// squared-error decrease. Ties keep the first split found.
fn best_split(
    data: &TrainingData<'_>,
    idx: &[usize],
    params: &TreeParams,
    rng: &mut ChaCha8Rng,
) -> Option<BestSplit> {
    let n = idx.len();
    let total: f64 = idx.iter().map(|&i| data.y[i]).sum();
    let parent_score = total * total / n as f64;

    let features: Vec<usize> = if params.max_features >= data.n_features {
        (0..data.n_features).collect()
    } else {
        let mut f = index::sample(rng, data.n_features, params.max_features).into_vec();
        f.sort_unstable();
        f
    };

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = idx.to_vec();

    for &feature in &features {
        order.sort_by(|&a, &b| data.value(a, feature).total_cmp(&data.value(b, feature)));

        let mut left_sum = 0.0;
        for pos in 0..n - 1 {
            left_sum += data.y[order[pos]];
            let n_left = pos + 1;
            let n_right = n - n_left;
            if n_left < params.min_samples_leaf || n_right < params.min_samples_leaf {
                continue;
            }
            let here = data.value(order[pos], feature);
            let next = data.value(order[pos + 1], feature);
            if here >= next {
                continue;
            }

            let right_sum = total - left_sum;
            let score = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64;
            let gain = score - parent_score;
            if best.map_or(true, |(_, _, g)| gain > g) {
                let mid = here + (next - here) / 2.0;
                let threshold = if mid < next { mid } else { here };
                best = Some((feature, threshold, gain));
            }
        }
    }

    let (feature, threshold, gain) = best?;
    if gain <= f64::EPSILON * parent_score.abs().max(1.0) {
        return None;
    }

    let (left, right): (Vec<usize>, Vec<usize>) = idx
        .iter()
        .partition(|&&i| data.value(i, feature) <= threshold);

    Some(BestSplit {
        feature,
        threshold,
        gain,
        left,
        right,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: usize::MAX,
        }
    }

    #[test]
    fn test_step_function_is_learned_exactly() {
        let x = [1.0, 2.0, 3.0, 10.0, 11.0, 12.0];
        let y = [5.0, 5.0, 5.0, 50.0, 50.0, 50.0];
        let data = TrainingData { x: &x, y: &y, n_features: 1 };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RegressionTree::fit(&data, (0..6).collect(), &params(), &mut rng);

        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.predict(&[2.5]), 5.0);
        assert_eq!(tree.predict(&[11.5]), 50.0);
        // Threshold is the midpoint between 3 and 10
        assert_eq!(tree.predict(&[6.5]), 5.0);
        assert_eq!(tree.predict(&[6.6]), 50.0);
    }

    #[test]
    fn test_picks_informative_feature() {
        // Feature 0 is noise, feature 1 determines the target
        let x = [
            0.3, 1.0, //
            0.1, 1.0, //
            0.2, 2.0, //
            0.4, 2.0,
        ];
        let y = [10.0, 10.0, 20.0, 20.0];
        let data = TrainingData { x: &x, y: &y, n_features: 2 };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RegressionTree::fit(&data, (0..4).collect(), &params(), &mut rng);

        assert!(tree.importances()[1] > 0.0);
        assert_eq!(tree.importances()[0], 0.0);
        assert_eq!(tree.predict(&[0.9, 1.0]), 10.0);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x: Vec<f64> = (0..32).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let data = TrainingData { x: &x, y: &y, n_features: 1 };
        let limited = TreeParams {
            max_depth: Some(2),
            ..params()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RegressionTree::fit(&data, (0..32).collect(), &limited, &mut rng);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x = [1.0, 2.0, 3.0];
        let y = [7.0, 7.0, 7.0];
        let data = TrainingData { x: &x, y: &y, n_features: 1 };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let tree = RegressionTree::fit(&data, (0..3).collect(), &params(), &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.predict(&[100.0]), 7.0);
    }

    #[test]
    fn test_bootstrap_is_seeded() {
        let x: Vec<f64> = (0..50).map(|i| (i % 7) as f64).collect();
        let y: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let data = TrainingData { x: &x, y: &y, n_features: 1 };
        let a = RegressionTree::fit_bootstrap(&data, &params(), 42);
        let b = RegressionTree::fit_bootstrap(&data, &params(), 42);
        assert_eq!(a, b);
    }
}
