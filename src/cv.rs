//! Fold splitting and replicated cross-validation.
//!
//! Folds are plain index lists into the sample axis. Fold work runs on a dedicated rayon
//! pool and results come back in fold order, so scores do not depend on scheduling.

use std::collections::BTreeMap;

use ndarray::{ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ml::classifier::{ClassifierError, Estimator, TraitModel};
use crate::ml::feature_select::{RfeOptions, recursive_feature_elimination};
use crate::ml::metrics::{Scoring, mean_and_std};

/// `(train indices, test indices)`, both ascending.
pub type Fold = (Vec<usize>, Vec<usize>);

const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Error)]
pub enum CvError {
    #[error("Classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Need at least 2 folds, got {0}")]
    TooFewFolds(usize),
    #[error("Cannot split {n_samples} samples into {n_splits} folds")]
    TooManyFolds { n_splits: usize, n_samples: usize },
    #[error("Need at least 1 replicate")]
    NoReplicates,
    #[error("Leave-one-group-out needs group ids for every sample ({found} given for {expected})")]
    GroupMismatch { expected: usize, found: usize },
    #[error("Leave-one-group-out needs at least 2 groups, found {0}")]
    TooFewGroups(usize),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Cross-validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvOptions {
    pub n_splits: usize,
    pub n_replicates: usize,
    pub scoring: Scoring,
    /// Worker threads; `0` or negative uses all cores.
    pub n_jobs: i32,
    pub random_state: u64,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self {
            n_splits: 5,
            n_replicates: 10,
            scoring: Scoring::BalancedAccuracy,
            n_jobs: 1,
            random_state: 0,
        }
    }
}

/// Result of replicated cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvReport {
    pub score_mean: f64,
    pub score_sd: f64,
    /// One score per (replicate, fold), replicate-major.
    pub fold_scores: Vec<f64>,
    /// Fraction of evaluations in which each sample was misclassified.
    pub misclassifications: Vec<f64>,
}

/// Seed for the `index`-th replicate (or fold) derived from `base`.
pub fn derive_seed(base: u64, index: usize) -> u64 {
    base ^ (index as u64).wrapping_mul(SEED_MIX)
}

/// Stratified k-fold split with per-class shuffling.
///
/// Each class is shuffled and dealt round-robin over the folds, continuing where the
/// previous class stopped, so fold sizes differ by at most one. Folds with an empty test
/// part are dropped.
pub fn stratified_kfold(y: &[usize], n_splits: usize, seed: u64) -> Vec<Fold> {
    let n_splits = n_splits.max(1);
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in y.iter().enumerate() {
        by_class.entry(label).or_default().push(idx);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut assignment = vec![0usize; y.len()];
    let mut offset = 0usize;
    for members in by_class.values_mut() {
        members.shuffle(&mut rng);
        for (pos, &idx) in members.iter().enumerate() {
            assignment[idx] = (offset + pos) % n_splits;
        }
        offset += members.len();
    }

    (0..n_splits)
        .filter_map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&idx| assignment[idx] == fold);
            (!test.is_empty()).then_some((train, test))
        })
        .collect()
}

/// One fold per distinct group id, ordered by group id.
pub fn leave_one_group_out(groups: &[usize]) -> Vec<Fold> {
    let mut distinct: Vec<usize> = groups.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    distinct
        .into_iter()
        .map(|group| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..groups.len()).partition(|&idx| groups[idx] == group);
            (train, test)
        })
        .collect()
}

/// Run `task` over `items` on a pool of `n_jobs` threads and keep input order.
pub fn map_folds<I, T, Er, F>(items: &[I], n_jobs: i32, task: F) -> Result<Vec<T>, Er>
where
    I: Sync,
    T: Send,
    Er: Send + From<rayon::ThreadPoolBuildError>,
    F: Fn(usize, &I) -> Result<T, Er> + Send + Sync,
{
    if n_jobs == 1 || items.len() <= 1 {
        return items
            .iter()
            .enumerate()
            .map(|(idx, item)| task(idx, item))
            .collect();
    }
    let threads = usize::try_from(n_jobs).unwrap_or(0);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    pool.install(|| {
        items
            .par_iter()
            .enumerate()
            .map(|(idx, item)| task(idx, item))
            .collect()
    })
}

/// Validate k-fold settings against the labels.
pub fn check_kfold(y: &[usize], options: &CvOptions) -> Result<(), CvError> {
    if options.n_splits < 2 {
        return Err(CvError::TooFewFolds(options.n_splits));
    }
    if options.n_splits > y.len() {
        return Err(CvError::TooManyFolds {
            n_splits: options.n_splits,
            n_samples: y.len(),
        });
    }
    if options.n_replicates == 0 {
        return Err(CvError::NoReplicates);
    }
    let positives = y.iter().filter(|&&label| label == 1).count();
    let minority = positives.min(y.len() - positives);
    if minority < options.n_splits {
        warn!(
            "The least populated class has {minority} members, fewer than {} folds",
            options.n_splits
        );
    }
    Ok(())
}

/// Fit on the train part, predict the test part, optionally after per-fold feature selection.
pub fn evaluate_fold<E: Estimator>(
    estimator: &E,
    x: ArrayView2<'_, f32>,
    y: &[usize],
    fold: &Fold,
    rfe: Option<&RfeOptions>,
) -> Result<Vec<usize>, CvError> {
    let (train_idx, test_idx) = fold;
    let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
    let mut x_train = x.select(Axis(0), train_idx);
    let mut x_test = x.select(Axis(0), test_idx);
    if let Some(rfe) = rfe {
        let selection = recursive_feature_elimination(estimator, x_train.view(), &y_train, rfe)?;
        x_train = x_train.select(Axis(1), &selection.columns);
        x_test = x_test.select(Axis(1), &selection.columns);
    }
    let model = estimator.fit(x_train.view(), &y_train)?;
    Ok(model.predict(x_test.view()))
}

/// Replicated stratified k-fold, or a single leave-one-group-out pass when `groups` is set.
pub fn crossvalidate<E: Estimator>(
    estimator: &E,
    x: ArrayView2<'_, f32>,
    y: &[usize],
    groups: Option<&[usize]>,
    options: &CvOptions,
    rfe: Option<&RfeOptions>,
) -> Result<CvReport, CvError> {
    let estimator = estimator.cv_variant();
    let replicate_folds: Vec<Vec<Fold>> = match groups {
        Some(groups) => {
            if groups.len() != y.len() {
                return Err(CvError::GroupMismatch {
                    expected: y.len(),
                    found: groups.len(),
                });
            }
            let folds = leave_one_group_out(groups);
            if folds.len() < 2 {
                return Err(CvError::TooFewGroups(folds.len()));
            }
            if options.n_replicates > 1 {
                info!("Leave-one-group-out is deterministic; running a single replicate");
            }
            vec![folds]
        }
        None => {
            check_kfold(y, options)?;
            (0..options.n_replicates)
                .map(|r| stratified_kfold(y, options.n_splits, derive_seed(options.random_state, r)))
                .collect()
        }
    };

    let mut wrong = vec![0usize; y.len()];
    let mut tested = vec![0usize; y.len()];
    let mut fold_scores = Vec::new();
    for (replicate, folds) in replicate_folds.iter().enumerate() {
        let predictions = map_folds(folds, options.n_jobs, |_, fold| {
            evaluate_fold(&estimator, x, y, fold, rfe)
        })?;
        for ((_, test_idx), predicted) in folds.iter().zip(&predictions) {
            let truth: Vec<usize> = test_idx.iter().map(|&i| y[i]).collect();
            fold_scores.push(options.scoring.score(&truth, predicted));
            for (&idx, &p) in test_idx.iter().zip(predicted) {
                tested[idx] += 1;
                if p != y[idx] {
                    wrong[idx] += 1;
                }
            }
        }
        debug!(
            "Replicate {} finished ({} folds)",
            replicate + 1,
            folds.len()
        );
    }

    let (score_mean, score_sd) = mean_and_std(&fold_scores);
    let misclassifications = wrong
        .iter()
        .zip(&tested)
        .map(|(&w, &t)| if t == 0 { 0.0 } else { w as f64 / t as f64 })
        .collect();
    Ok(CvReport {
        score_mean,
        score_sd,
        fold_scores,
        misclassifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::svm::{LinearSvm, SvmOptions};
    use ndarray::Array2;

    fn labels(n_pos: usize, n_neg: usize) -> Vec<usize> {
        let mut y = vec![1; n_pos];
        y.extend(vec![0; n_neg]);
        y
    }

    #[test]
    fn stratified_folds_partition_samples_and_keep_ratio() {
        let y = labels(10, 20);
        let folds = stratified_kfold(&y, 5, 42);
        assert_eq!(folds.len(), 5);
        let mut seen = vec![0usize; y.len()];
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), y.len());
            assert_eq!(test.len(), 6);
            assert_eq!(test.iter().filter(|&&i| y[i] == 1).count(), 2);
            for &i in test {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn stratified_folds_depend_on_seed_only() {
        let y = labels(7, 9);
        assert_eq!(stratified_kfold(&y, 3, 1), stratified_kfold(&y, 3, 1));
        assert_ne!(stratified_kfold(&y, 3, 1), stratified_kfold(&y, 3, 2));
    }

    #[test]
    fn leave_one_group_out_orders_by_group() {
        let folds = leave_one_group_out(&[2, 0, 2, 1]);
        assert_eq!(folds.len(), 3);
        assert_eq!(folds[0].1, vec![1]);
        assert_eq!(folds[2].1, vec![0, 2]);
        assert_eq!(folds[2].0, vec![1, 3]);
    }

    #[test]
    fn map_folds_keeps_order_on_pool() {
        let items: Vec<usize> = (0..16).collect();
        let out: Vec<usize> =
            map_folds(&items, 4, |idx, item| Ok::<_, CvError>(idx * 100 + item)).unwrap();
        assert_eq!(out, (0..16).map(|i| i * 101).collect::<Vec<_>>());
    }

    #[test]
    fn crossvalidate_scores_separable_data() {
        let n = 30;
        let y: Vec<usize> = (0..n).map(|i| usize::from(i % 3 == 0)).collect();
        let mut x = Array2::<f32>::zeros((n, 4));
        for (i, &label) in y.iter().enumerate() {
            x[[i, 0]] = label as f32;
            x[[i, 1]] = 1.0 - label as f32;
            x[[i, 2]] = (i % 2) as f32;
        }
        let options = CvOptions {
            n_replicates: 2,
            ..CvOptions::default()
        };
        let estimator = LinearSvm::new(SvmOptions::default(), 0);
        let report = crossvalidate(&estimator, x.view(), &y, None, &options, None).unwrap();
        assert_eq!(report.fold_scores.len(), 10);
        assert!(report.score_mean > 0.95);
        assert!(report.score_sd < 0.1);
        assert_eq!(report.misclassifications.len(), n);
        assert!(report.misclassifications.iter().all(|&rate| rate <= 0.5));
    }

    #[test]
    fn rejects_bad_fold_counts() {
        let y = labels(2, 2);
        let x = Array2::<f32>::zeros((4, 1));
        let estimator = LinearSvm::default();
        let options = CvOptions {
            n_splits: 1,
            ..CvOptions::default()
        };
        assert!(matches!(
            crossvalidate(&estimator, x.view(), &y, None, &options, None),
            Err(CvError::TooFewFolds(1))
        ));
        let options = CvOptions {
            n_splits: 5,
            ..CvOptions::default()
        };
        assert!(matches!(
            crossvalidate(&estimator, x.view(), &y, None, &options, None),
            Err(CvError::TooManyFolds { .. })
        ));
    }
}
