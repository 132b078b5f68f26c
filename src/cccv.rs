//! Completeness/contamination cross-validation (CCCV).
//!
//! Simulates how incomplete or contaminated genome assemblies degrade a classifier. For every
//! replicate and stratified fold the classifier is fitted once on the untouched training
//! records; the held-out records are then degraded once per grid cell (features dropped to
//! reach the completeness level, foreign features added to reach the contamination level)
//! and scored. The unchanged cell (completeness 1, contamination 0) reuses the undegraded
//! test matrix and therefore matches plain cross-validation exactly, also when recursive
//! feature elimination runs inside every training fold.

use std::collections::BTreeSet;
use std::path::Path;

use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cv::{
    CvError, CvOptions, Fold, check_kfold, derive_seed, map_folds, stratified_kfold,
};
use crate::ml::classifier::{ClassifierError, Estimator, TraitModel};
use crate::ml::feature_select::{RfeOptions, recursive_feature_elimination};
use crate::ml::metrics::{Scoring, mean_and_std};
use crate::ml::vectorizer::BinaryVectorizer;
use crate::records::{self, TrainingRecord};

/// Levels closer than this are considered equal in grid lookups.
const LEVEL_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum CccvError {
    #[error("Cross-validation setup failed: {0}")]
    Cv(#[from] CvError),
    #[error("Classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(
        "Training fold {fold} of replicate {replicate} contains only class {class}; \
         cannot simulate completeness/contamination"
    )]
    SingleClassFold {
        replicate: usize,
        fold: usize,
        class: usize,
    },
    #[error("Completeness and contamination need at least 1 step each")]
    NoSteps,
    #[error("No training records")]
    EmptyRecords,
    #[error("Vectorizer has no vocabulary")]
    UnfittedVectorizer,
    #[error("Failed to write grid to {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize grid: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// CCCV settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CccvOptions {
    pub comple_steps: usize,
    pub conta_steps: usize,
    pub n_splits: usize,
    pub n_replicates: usize,
    pub scoring: Scoring,
    /// Worker threads; `0` or negative uses all cores.
    pub n_jobs: i32,
    pub random_state: u64,
}

impl Default for CccvOptions {
    fn default() -> Self {
        Self {
            comple_steps: 20,
            conta_steps: 20,
            n_splits: 5,
            n_replicates: 10,
            scoring: Scoring::BalancedAccuracy,
            n_jobs: 1,
            random_state: 0,
        }
    }
}

/// Aggregated score of one (completeness, contamination) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CccvCell {
    pub completeness: f64,
    pub contamination: f64,
    pub score_mean: f64,
    pub score_sd: f64,
    /// Number of (replicate, fold) scores aggregated.
    pub n_scores: usize,
}

/// Score grid indexed by completeness (rows) and contamination (columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CccvGrid {
    pub comple_levels: Vec<f64>,
    pub conta_levels: Vec<f64>,
    /// Completeness-major: `cells[i * conta_levels.len() + j]`.
    pub cells: Vec<CccvCell>,
}

impl CccvGrid {
    pub fn cell(&self, comple_idx: usize, conta_idx: usize) -> Option<&CccvCell> {
        if comple_idx >= self.comple_levels.len() || conta_idx >= self.conta_levels.len() {
            return None;
        }
        self.cells.get(comple_idx * self.conta_levels.len() + conta_idx)
    }

    /// Cell at the given levels, matched within a small tolerance.
    pub fn get(&self, completeness: f64, contamination: f64) -> Option<&CccvCell> {
        let i = level_index(&self.comple_levels, completeness)?;
        let j = level_index(&self.conta_levels, contamination)?;
        self.cell(i, j)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), CccvError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| CccvError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn level_index(levels: &[f64], value: f64) -> Option<usize> {
    levels
        .iter()
        .position(|&level| (level - value).abs() <= LEVEL_TOLERANCE)
}

/// `steps` evenly spaced levels over `[0, 1]`; a single step yields `[single]`.
pub fn levels(steps: usize, single: f64) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![single],
        _ => (0..steps).map(|i| i as f64 / (steps - 1) as f64).collect(),
    }
}

/// Completeness/contamination simulator bound to an estimator.
pub struct CompleContaCv<'a, E: Estimator> {
    estimator: E,
    vectorizer: &'a BinaryVectorizer,
    options: CccvOptions,
    feature_selection: Option<&'a RfeOptions>,
}

struct FoldTask {
    replicate: usize,
    fold_idx: usize,
    fold: Fold,
}

impl<'a, E: Estimator> CompleContaCv<'a, E> {
    /// `vectorizer` must already be fitted on the records passed to [`Self::run`].
    pub fn new(estimator: &E, vectorizer: &'a BinaryVectorizer, options: CccvOptions) -> Self {
        Self {
            estimator: estimator.cv_variant(),
            vectorizer,
            options,
            feature_selection: None,
        }
    }

    /// Select columns by recursive feature elimination on every training fold.
    pub fn with_feature_selection(mut self, options: Option<&'a RfeOptions>) -> Self {
        self.feature_selection = options;
        self
    }

    pub fn run(&self, records: &[TrainingRecord]) -> Result<CccvGrid, CccvError> {
        if records.is_empty() {
            return Err(CccvError::EmptyRecords);
        }
        if !self.vectorizer.is_fitted() {
            return Err(CccvError::UnfittedVectorizer);
        }
        let comple_levels = levels(self.options.comple_steps, 1.0);
        let conta_levels = levels(self.options.conta_steps, 0.0);
        if comple_levels.is_empty() || conta_levels.is_empty() {
            return Err(CccvError::NoSteps);
        }

        let y = records::labels(records);
        check_kfold(
            &y,
            &CvOptions {
                n_splits: self.options.n_splits,
                n_replicates: self.options.n_replicates,
                ..Default::default()
            },
        )?;
        let x = self.vectorizer.transform(records::feature_sets(records));
        let vocabulary = self.vectorizer.vocabulary_names();

        let tasks: Vec<FoldTask> = (0..self.options.n_replicates)
            .flat_map(|replicate| {
                let seed = derive_seed(self.options.random_state, replicate);
                stratified_kfold(&y, self.options.n_splits, seed)
                    .into_iter()
                    .enumerate()
                    .map(move |(fold_idx, fold)| FoldTask {
                        replicate,
                        fold_idx,
                        fold,
                    })
            })
            .collect();
        info!(
            "CCCV: {} x {} grid, {} replicates, {} fold fits",
            comple_levels.len(),
            conta_levels.len(),
            self.options.n_replicates,
            tasks.len()
        );

        let per_fold: Vec<Vec<f64>> = map_folds(&tasks, self.options.n_jobs, |_, task| {
            self.run_fold(task, records, x.view(), &y, &vocabulary, &comple_levels, &conta_levels)
        })?;

        let n_cells = comple_levels.len() * conta_levels.len();
        let mut cells = Vec::with_capacity(n_cells);
        for (cell_idx, (completeness, contamination)) in comple_levels
            .iter()
            .flat_map(|&c| conta_levels.iter().map(move |&k| (c, k)))
            .enumerate()
        {
            let scores: Vec<f64> = per_fold.iter().map(|scores| scores[cell_idx]).collect();
            let (score_mean, score_sd) = mean_and_std(&scores);
            cells.push(CccvCell {
                completeness,
                contamination,
                score_mean,
                score_sd,
                n_scores: scores.len(),
            });
        }
        Ok(CccvGrid {
            comple_levels,
            conta_levels,
            cells,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_fold(
        &self,
        task: &FoldTask,
        records: &[TrainingRecord],
        x: ArrayView2<'_, f32>,
        y: &[usize],
        vocabulary: &[String],
        comple_levels: &[f64],
        conta_levels: &[f64],
    ) -> Result<Vec<f64>, CccvError> {
        let (train_idx, test_idx) = &task.fold;
        if let Some(class) = single_class(train_idx, y) {
            return Err(CccvError::SingleClassFold {
                replicate: task.replicate,
                fold: task.fold_idx,
                class,
            });
        }
        let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
        let y_test: Vec<usize> = test_idx.iter().map(|&i| y[i]).collect();
        let mut x_train = x.select(Axis(0), train_idx);
        let mut x_test = x.select(Axis(0), test_idx);
        let selected = match self.feature_selection {
            Some(rfe) => {
                let selection =
                    recursive_feature_elimination(&self.estimator, x_train.view(), &y_train, rfe)?;
                x_train = x_train.select(Axis(1), &selection.columns);
                x_test = x_test.select(Axis(1), &selection.columns);
                Some(selection.columns)
            }
            None => None,
        };
        let model = self.estimator.fit(x_train.view(), &y_train)?;

        let pools = ContaminationPools::new(records, train_idx, vocabulary);
        let mut rng = StdRng::seed_from_u64(derive_seed(
            derive_seed(self.options.random_state, task.replicate),
            task.fold_idx + 1,
        ));
        let mut scores = Vec::with_capacity(comple_levels.len() * conta_levels.len());
        for &completeness in comple_levels {
            for &contamination in conta_levels {
                let predicted = if completeness >= 1.0 && contamination <= 0.0 {
                    model.predict(x_test.view())
                } else {
                    let degraded: Vec<BTreeSet<String>> = test_idx
                        .iter()
                        .map(|&i| {
                            degrade_features(
                                &records[i],
                                completeness,
                                contamination,
                                &pools,
                                &mut rng,
                            )
                        })
                        .collect();
                    let mut x_degraded: Array2<f32> = self.vectorizer.transform(degraded.iter());
                    if let Some(columns) = &selected {
                        x_degraded = x_degraded.select(Axis(1), columns);
                    }
                    model.predict(x_degraded.view())
                };
                scores.push(self.options.scoring.score(&y_test, &predicted));
            }
        }
        debug!(
            "CCCV replicate {} fold {} done",
            task.replicate + 1,
            task.fold_idx + 1
        );
        Ok(scores)
    }
}

fn single_class(idx: &[usize], y: &[usize]) -> Option<usize> {
    let first = y[*idx.first()?];
    idx.iter().all(|&i| y[i] == first).then_some(first)
}

/// Foreign-feature sources per phenotype: features of training records of the opposite
/// class, and the remaining vocabulary as fallback.
struct ContaminationPools<'v> {
    by_class: [Vec<&'v str>; 2],
    vocabulary: &'v [String],
}

impl<'v> ContaminationPools<'v> {
    fn new(records: &'v [TrainingRecord], train_idx: &[usize], vocabulary: &'v [String]) -> Self {
        let mut sets: [BTreeSet<&'v str>; 2] = [BTreeSet::new(), BTreeSet::new()];
        for &i in train_idx {
            let record = &records[i];
            sets[record.label().min(1)].extend(record.features.iter().map(String::as_str));
        }
        let [neg, pos] = sets;
        Self {
            by_class: [neg.into_iter().collect(), pos.into_iter().collect()],
            vocabulary,
        }
    }

    fn foreign_to(&self, label: usize) -> &[&'v str] {
        &self.by_class[1 - label.min(1)]
    }
}

fn degrade_features<R: Rng>(
    record: &TrainingRecord,
    completeness: f64,
    contamination: f64,
    pools: &ContaminationPools<'_>,
    rng: &mut R,
) -> BTreeSet<String> {
    let present: Vec<&String> = record.features.iter().collect();
    let n = present.len();
    let n_keep = ((completeness * n as f64).round() as usize).min(n);
    let mut out: BTreeSet<String> = index::sample(rng, n, n_keep)
        .into_iter()
        .map(|i| present[i].clone())
        .collect();

    let n_add = (contamination * n as f64).round() as usize;
    if n_add == 0 {
        return out;
    }
    let primary: Vec<&str> = pools
        .foreign_to(record.label())
        .iter()
        .copied()
        .filter(|feature| !record.features.contains(*feature))
        .collect();
    let from_primary = n_add.min(primary.len());
    for i in index::sample(rng, primary.len(), from_primary) {
        out.insert(primary[i].to_string());
    }
    let remaining = n_add - from_primary;
    if remaining > 0 {
        let primary_set: BTreeSet<&str> = primary.iter().copied().collect();
        let fallback: Vec<&String> = pools
            .vocabulary
            .iter()
            .filter(|feature| {
                !record.features.contains(*feature) && !primary_set.contains(feature.as_str())
            })
            .collect();
        for i in index::sample(rng, fallback.len(), remaining.min(fallback.len())) {
            out.insert(fallback[i].clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, sign: u8, features: &[&str]) -> TrainingRecord {
        TrainingRecord {
            identifier: id.to_string(),
            trait_name: "T".to_string(),
            trait_sign: sign,
            group_name: id.to_string(),
            group_id: 0,
            features: features.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn levels_are_evenly_spaced() {
        assert_eq!(levels(3, 1.0), vec![0.0, 0.5, 1.0]);
        assert_eq!(levels(1, 1.0), vec![1.0]);
        assert_eq!(levels(1, 0.0), vec![0.0]);
        assert!(levels(0, 1.0).is_empty());
    }

    #[test]
    fn degradation_counts_follow_levels() {
        let records = vec![
            record("a", 1, &["p1", "p2", "p3", "p4"]),
            record("b", 0, &["n1", "n2", "n3", "n4", "n5"]),
        ];
        let vocabulary: Vec<String> = ["p1", "p2", "p3", "p4", "n1", "n2", "n3", "n4", "n5", "z"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pools = ContaminationPools::new(&records, &[0, 1], &vocabulary);
        let mut rng = StdRng::seed_from_u64(9);

        let kept = degrade_features(&records[0], 0.5, 0.0, &pools, &mut rng);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|f| f.starts_with('p')));

        let contaminated = degrade_features(&records[0], 1.0, 0.5, &pools, &mut rng);
        assert_eq!(contaminated.len(), 6);
        assert_eq!(contaminated.iter().filter(|f| f.starts_with('n')).count(), 2);
    }

    #[test]
    fn contamination_falls_back_to_vocabulary() {
        let records = vec![record("a", 1, &["p1", "p2"]), record("b", 0, &["n1"])];
        let vocabulary: Vec<String> = ["p1", "p2", "n1", "z1", "z2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pools = ContaminationPools::new(&records, &[0, 1], &vocabulary);
        let mut rng = StdRng::seed_from_u64(1);
        let out = degrade_features(&records[0], 1.0, 1.0, &pools, &mut rng);
        assert_eq!(out.len(), 4);
        assert!(out.contains("n1"));
    }

    #[test]
    fn grid_lookup_tolerates_float_noise() {
        let grid = CccvGrid {
            comple_levels: levels(3, 1.0),
            conta_levels: levels(2, 0.0),
            cells: (0..6)
                .map(|i| CccvCell {
                    completeness: 0.0,
                    contamination: 0.0,
                    score_mean: i as f64,
                    score_sd: 0.0,
                    n_scores: 1,
                })
                .collect(),
        };
        assert_eq!(grid.get(0.5, 1.0).map(|c| c.score_mean), Some(3.0));
        assert_eq!(grid.get(0.1 + 0.2 + 0.2, 0.0).map(|c| c.score_mean), Some(2.0));
        assert!(grid.get(0.25, 0.0).is_none());
        assert!(grid.cell(3, 0).is_none());
    }

    #[test]
    fn single_class_detection() {
        assert_eq!(single_class(&[0, 2], &[1, 0, 1]), Some(1));
        assert_eq!(single_class(&[0, 1], &[1, 0, 1]), None);
        assert_eq!(single_class(&[], &[1]), None);
    }
}
