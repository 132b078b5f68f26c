use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::model::{GbdtModel, Stump};
use crate::ml::classifier::{ClassifierError, check_training_data, sigmoid};

/// Training hyperparameters for stump boosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtOptions {
    /// Number of boosting rounds.
    pub rounds: usize,
    /// Learning rate applied per round.
    pub learning_rate: f64,
    /// Number of bins used for split search.
    pub bins: usize,
    /// L2 regularization on leaf values.
    pub lambda: f64,
}

impl Default for GbdtOptions {
    fn default() -> Self {
        Self {
            rounds: 100,
            learning_rate: 0.1,
            bins: 16,
            lambda: 1.0,
        }
    }
}

/// Train a binary stump-GBDT model with Newton boosting on the logistic loss.
///
/// Boosting stops early once no split reduces the loss.
pub fn train_gbdt(
    x: ArrayView2<'_, f32>,
    y: &[usize],
    options: &GbdtOptions,
) -> Result<GbdtModel, ClassifierError> {
    let (n_negative, n_positive) = check_training_data(x, y)?;
    if !(options.learning_rate > 0.0) || options.lambda < 0.0 {
        return Err(ClassifierError::InvalidOption(format!(
            "learning_rate must be positive and lambda non-negative (got {}, {})",
            options.learning_rate, options.lambda
        )));
    }

    let n = x.nrows();
    let (mins, maxs) = compute_feature_min_max(x);
    let bins = options.bins.clamp(2, 256);
    let binned = bin_features(x, &mins, &maxs, bins);

    let init_raw = (n_positive as f64 / n_negative as f64).ln();
    let mut raw = vec![init_raw; n];
    let mut stumps = Vec::with_capacity(options.rounds);
    for round in 0..options.rounds {
        let mut grad = vec![0.0f64; n];
        let mut hess = vec![0.0f64; n];
        for i in 0..n {
            let p = sigmoid(raw[i]);
            grad[i] = p - y[i] as f64;
            hess[i] = (p * (1.0 - p)).max(1e-12);
        }

        let Some(split) = best_split(&binned, &grad, &hess, mins.len(), bins, options.lambda) else {
            tracing::debug!("No loss-reducing split after {round} rounds; stopping");
            break;
        };
        let threshold = threshold_for_bin(
            mins[split.feature_index],
            maxs[split.feature_index],
            split.split_bin,
            bins,
        );
        let stump = leaf_values_for_threshold(x, &grad, &hess, split, threshold, options.lambda);
        for (i, row) in x.rows().into_iter().enumerate() {
            raw[i] += options.learning_rate * stump.predict(row);
        }
        stumps.push(stump);
    }

    Ok(GbdtModel {
        n_columns: x.ncols(),
        learning_rate: options.learning_rate,
        init_raw,
        stumps,
    })
}

fn compute_feature_min_max(x: ArrayView2<'_, f32>) -> (Vec<f32>, Vec<f32>) {
    let feature_len = x.ncols();
    let mut mins = vec![f32::INFINITY; feature_len];
    let mut maxs = vec![f32::NEG_INFINITY; feature_len];
    for row in x.rows() {
        for (j, &v) in row.iter().enumerate() {
            if v.is_finite() {
                mins[j] = mins[j].min(v);
                maxs[j] = maxs[j].max(v);
            }
        }
    }
    for j in 0..feature_len {
        if !mins[j].is_finite() || !maxs[j].is_finite() {
            mins[j] = 0.0;
            maxs[j] = 0.0;
        }
        if mins[j] == maxs[j] {
            maxs[j] = mins[j] + 1.0;
        }
    }
    (mins, maxs)
}

fn bin_features(x: ArrayView2<'_, f32>, mins: &[f32], maxs: &[f32], bins: usize) -> Vec<Vec<u8>> {
    let bins = bins as f32;
    x.rows()
        .into_iter()
        .map(|row| {
            mins.iter()
                .zip(maxs)
                .zip(row.iter())
                .map(|((&min, &max), &v)| {
                    let t = if max > min {
                        ((v - min) / (max - min)).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    (t * (bins - 1.0)).round() as u8
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    gain: f64,
    feature_index: usize,
    split_bin: usize,
}

fn best_split(
    binned: &[Vec<u8>],
    grad: &[f64],
    hess: &[f64],
    n_features: usize,
    bins: usize,
    lambda: f64,
) -> Option<BestSplit> {
    let mut best: Option<BestSplit> = None;
    for feature_idx in 0..n_features {
        let Some(split) = best_split_for_feature(binned, grad, hess, feature_idx, bins, lambda)
        else {
            continue;
        };
        if best.is_none_or(|current| split.gain > current.gain) {
            best = Some(split);
        }
    }
    best.filter(|split| split.gain > 1e-12)
}

fn best_split_for_feature(
    binned: &[Vec<u8>],
    grad: &[f64],
    hess: &[f64],
    feature_idx: usize,
    bins: usize,
    lambda: f64,
) -> Option<BestSplit> {
    let mut counts = vec![0u32; bins];
    let mut grad_sums = vec![0f64; bins];
    let mut hess_sums = vec![0f64; bins];
    for (i, row) in binned.iter().enumerate() {
        let b = row[feature_idx] as usize;
        counts[b] += 1;
        grad_sums[b] += grad[i];
        hess_sums[b] += hess[i];
    }
    let total_count: u32 = counts.iter().sum();
    let total_grad: f64 = grad_sums.iter().sum();
    let total_hess: f64 = hess_sums.iter().sum();
    let parent = score(total_grad, total_hess, lambda);

    let mut best: Option<BestSplit> = None;
    let mut left_count = 0u32;
    let mut left_grad = 0f64;
    let mut left_hess = 0f64;
    for split_bin in 0..(bins - 1) {
        left_count += counts[split_bin];
        left_grad += grad_sums[split_bin];
        left_hess += hess_sums[split_bin];
        let right_count = total_count - left_count;
        if left_count == 0 || right_count == 0 {
            continue;
        }
        let gain = 0.5
            * (score(left_grad, left_hess, lambda)
                + score(total_grad - left_grad, total_hess - left_hess, lambda)
                - parent);
        if best.is_none_or(|current| gain > current.gain) {
            best = Some(BestSplit {
                gain,
                feature_index: feature_idx,
                split_bin,
            });
        }
    }
    best
}

fn score(grad: f64, hess: f64, lambda: f64) -> f64 {
    grad * grad / (hess + lambda)
}

fn threshold_for_bin(min: f32, max: f32, split_bin: usize, bins: usize) -> f32 {
    // Midpoint between the centers of `split_bin` and the next bin.
    let t = (split_bin as f32 + 0.5) / (bins as f32 - 1.0);
    min + t * (max - min)
}

fn leaf_values_for_threshold(
    x: ArrayView2<'_, f32>,
    grad: &[f64],
    hess: &[f64],
    split: BestSplit,
    threshold: f32,
    lambda: f64,
) -> Stump {
    let mut left = (0usize, 0f64, 0f64);
    let mut right = (0usize, 0f64, 0f64);
    for (i, &v) in x.column(split.feature_index).iter().enumerate() {
        let side = if v <= threshold { &mut left } else { &mut right };
        side.0 += 1;
        side.1 += grad[i];
        side.2 += hess[i];
    }
    Stump {
        feature_index: split.feature_index,
        threshold,
        left_value: -left.1 / (left.2 + lambda),
        right_value: -right.1 / (right.2 + lambda),
        n_left: left.0,
        n_right: right.0,
        gain: split.gain,
    }
}
