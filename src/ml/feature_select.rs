//! Recursive feature elimination and vocabulary compression.

use std::collections::{BTreeMap, HashMap};

use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::classifier::{Estimator, TraitModel};
use super::metrics::{Scoring, mean_and_std};
use super::vectorizer::{BinaryVectorizer, VectorizerError};
use crate::cv::{CvError, stratified_kfold};

/// Fraction of the initial column count removed per elimination round.
pub const DEFAULT_STEP_SIZE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfeOptions {
    /// Minimum number of columns to keep.
    pub n_features: usize,
    pub step: f64,
    pub n_splits: usize,
    pub scoring: Scoring,
    pub random_state: u64,
}

impl Default for RfeOptions {
    fn default() -> Self {
        Self {
            n_features: 1,
            step: DEFAULT_STEP_SIZE,
            n_splits: 5,
            scoring: Scoring::BalancedAccuracy,
            random_state: 0,
        }
    }
}

/// Outcome of recursive feature elimination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelection {
    /// Selected column indices, ascending.
    pub columns: Vec<usize>,
    pub score: f64,
    /// `(n_columns, score)` for every evaluated column set.
    pub history: Vec<(usize, f64)>,
}

/// Recursive feature elimination with cross-validated scoring.
///
/// Each round fits on all rows, drops the columns with the smallest absolute weight and
/// scores the remaining set with stratified k-fold. The best-scoring set wins; ties go to
/// the smaller set.
pub fn recursive_feature_elimination<E: Estimator>(
    estimator: &E,
    x: ArrayView2<'_, f32>,
    y: &[usize],
    options: &RfeOptions,
) -> Result<FeatureSelection, CvError> {
    let estimator = estimator.cv_variant();
    let total = x.ncols();
    let floor = options.n_features.clamp(1, total.max(1));
    let per_round = ((options.step * total as f64) as usize).max(1);

    let positives = y.iter().filter(|&&label| label == 1).count();
    let n_splits = options.n_splits.min(positives.min(y.len() - positives));
    if n_splits < 2 {
        return Err(CvError::TooFewFolds(n_splits));
    }
    let folds = stratified_kfold(y, n_splits, options.random_state);

    let mut remaining: Vec<usize> = (0..total).collect();
    let mut history: Vec<(Vec<usize>, f64)> = Vec::new();
    loop {
        let x_sub = x.select(Axis(1), &remaining);
        let mut scores = Vec::with_capacity(folds.len());
        for (train_idx, test_idx) in &folds {
            let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
            let y_test: Vec<usize> = test_idx.iter().map(|&i| y[i]).collect();
            let model = estimator.fit(x_sub.select(Axis(0), train_idx).view(), &y_train)?;
            let predicted = model.predict(x_sub.select(Axis(0), test_idx).view());
            scores.push(options.scoring.score(&y_test, &predicted));
        }
        let (score, _) = mean_and_std(&scores);
        debug!("RFE: {} columns score {score:.4}", remaining.len());
        history.push((remaining.clone(), score));

        if remaining.len() <= floor {
            break;
        }
        let weights = estimator.fit(x_sub.view(), y)?.feature_weights();
        let mut order: Vec<usize> = (0..remaining.len()).collect();
        order.sort_by(|&a, &b| weights[a].abs().total_cmp(&weights[b].abs()));
        let n_drop = per_round.min(remaining.len() - floor);
        let mut dropped: Vec<usize> = order[..n_drop].to_vec();
        dropped.sort_unstable();
        remaining = remaining
            .iter()
            .enumerate()
            .filter(|(pos, _)| dropped.binary_search(pos).is_err())
            .map(|(_, &col)| col)
            .collect();
    }

    let mut best = 0usize;
    for (idx, (_, score)) in history.iter().enumerate() {
        if *score >= history[best].1 {
            best = idx;
        }
    }
    let (columns, score) = history[best].clone();
    info!(
        "Feature selection kept {} of {total} columns (score {score:.4})",
        columns.len()
    );
    Ok(FeatureSelection {
        columns,
        score,
        history: history
            .into_iter()
            .map(|(columns, score)| (columns.len(), score))
            .collect(),
    })
}

/// Merge columns whose presence pattern over the rows of `x` is identical.
///
/// The returned vectorizer is fixed; each merged column keeps the position of its first
/// member.
pub fn compress_vocabulary(
    vectorizer: &BinaryVectorizer,
    x: ArrayView2<'_, f32>,
) -> Result<BinaryVectorizer, VectorizerError> {
    let mut pattern_to_column: HashMap<Vec<bool>, usize> = HashMap::new();
    let mut remap = Vec::with_capacity(x.ncols());
    for column in x.columns() {
        let pattern: Vec<bool> = column.iter().map(|&v| v > 0.0).collect();
        let next = pattern_to_column.len();
        remap.push(*pattern_to_column.entry(pattern).or_insert(next));
    }
    let vocabulary: BTreeMap<String, usize> = vectorizer
        .feature_names()
        .into_iter()
        .filter_map(|(name, col)| remap.get(col).map(|&new| (name, new)))
        .collect();
    debug!(
        "Compressed {} columns into {}",
        x.ncols(),
        pattern_to_column.len()
    );
    BinaryVectorizer::with_vocabulary(vocabulary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::svm::{LinearSvm, SvmOptions};
    use ndarray::Array2;
    use std::collections::BTreeSet;

    fn noisy_dataset() -> (Array2<f32>, Vec<usize>) {
        let n = 40;
        let y: Vec<usize> = (0..n).map(|i| usize::from(i % 2 == 0)).collect();
        let mut x = Array2::<f32>::zeros((n, 6));
        for (i, &label) in y.iter().enumerate() {
            x[[i, 0]] = label as f32;
            x[[i, 1]] = 1.0 - label as f32;
            x[[i, 2]] = ((i / 2) % 2) as f32;
            x[[i, 3]] = ((i / 3) % 2) as f32;
            x[[i, 4]] = ((i / 5) % 2) as f32;
            x[[i, 5]] = ((i * 7 / 3) % 2) as f32;
        }
        (x, y)
    }

    #[test]
    fn rfe_respects_floor_and_keeps_informative_columns() {
        let (x, y) = noisy_dataset();
        let options = RfeOptions {
            n_features: 2,
            step: 0.2,
            ..RfeOptions::default()
        };
        let estimator = LinearSvm::new(SvmOptions::default(), 0);
        let selection = recursive_feature_elimination(&estimator, x.view(), &y, &options).unwrap();
        assert!(selection.columns.len() >= 2);
        assert!(selection.columns.contains(&0) || selection.columns.contains(&1));
        assert!(selection.score > 0.95);
        assert_eq!(selection.history.first().map(|h| h.0), Some(6));
        assert_eq!(selection.history.last().map(|h| h.0), Some(2));
    }

    #[test]
    fn rfe_needs_two_members_per_class() {
        let x = Array2::<f32>::ones((3, 2));
        let err = recursive_feature_elimination(
            &LinearSvm::default(),
            x.view(),
            &[1, 0, 0],
            &RfeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CvError::TooFewFolds(1)));
    }

    #[test]
    fn compression_merges_identical_columns() {
        let rows: Vec<BTreeSet<String>> = vec![
            ["a", "b", "c"].iter().map(|s| s.to_string()).collect(),
            ["a", "b"].iter().map(|s| s.to_string()).collect(),
            ["c", "d"].iter().map(|s| s.to_string()).collect(),
        ];
        let mut vectorizer = BinaryVectorizer::new();
        vectorizer.fit(rows.iter());
        let x = vectorizer.transform(rows.iter());
        let compressed = compress_vocabulary(&vectorizer, x.view()).unwrap();
        assert_eq!(compressed.n_columns(), 3);
        assert_eq!(
            compressed.column_names(),
            vec!["a|b".to_string(), "c".to_string(), "d".to_string()]
        );
    }
}
