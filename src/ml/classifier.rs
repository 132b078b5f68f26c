//! Estimator and fitted-model interfaces shared by the shipped classifiers.
//!
//! Cross-validation, the completeness/contamination simulation and feature selection only
//! talk to these traits, so any binary classifier that can report per-column weights and
//! Shapley values plugs into them.

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Empty training set")]
    EmptyTrainingSet,
    #[error("Mismatched inputs: {rows} rows but {labels} labels")]
    LabelMismatch { rows: usize, labels: usize },
    #[error("Labels must be 0 or 1, got {0}")]
    InvalidLabel(usize),
    #[error("Training data contains only class {0}; need both classes")]
    SingleClass(usize),
    #[error("Model expects {expected} feature columns, got {found}")]
    FeatureMismatch { expected: usize, found: usize },
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

/// Shapley values of a batch of samples for the positive class.
#[derive(Debug, Clone)]
pub struct Explanation {
    /// Shape `[n_samples, n_columns]`.
    pub shap_values: Array2<f64>,
    /// Expected model output over the background data.
    pub base_value: f64,
}

/// A trainable binary classifier configuration.
pub trait Estimator: Clone + std::fmt::Debug + Send + Sync {
    type Model: TraitModel + Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync;

    /// Short name stored in saved model files (`svm`, `xgb`).
    const IDENTIFIER: &'static str;

    /// Fit a model on a presence matrix and labels in `{0, 1}`.
    fn fit(&self, x: ArrayView2<'_, f32>, y: &[usize]) -> Result<Self::Model, ClassifierError>;

    /// Cheaper configuration used inside cross-validation loops.
    fn cv_variant(&self) -> Self {
        self.clone()
    }
}

/// A fitted binary classifier.
pub trait TraitModel {
    fn n_columns(&self) -> usize;

    /// Signed distance to the decision boundary; positive means trait present.
    fn decision_function(&self, x: ArrayView2<'_, f32>) -> Array1<f64>;

    fn predict(&self, x: ArrayView2<'_, f32>) -> Vec<usize> {
        self.decision_function(x)
            .iter()
            .map(|&score| usize::from(score > 0.0))
            .collect()
    }

    /// Probability of the trait being present.
    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Array1<f64>;

    /// One importance weight per column; zero means the column is unused.
    fn feature_weights(&self) -> Array1<f64>;

    fn explain(&self, x: ArrayView2<'_, f32>) -> Explanation;
}

/// Validate a training matrix and return `(n_negative, n_positive)`.
pub fn check_training_data(
    x: ArrayView2<'_, f32>,
    y: &[usize],
) -> Result<(usize, usize), ClassifierError> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ClassifierError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(ClassifierError::LabelMismatch {
            rows: x.nrows(),
            labels: y.len(),
        });
    }
    let mut counts = [0usize; 2];
    for &label in y {
        if label > 1 {
            return Err(ClassifierError::InvalidLabel(label));
        }
        counts[label] += 1;
    }
    match counts {
        [0, _] => Err(ClassifierError::SingleClass(1)),
        [_, 0] => Err(ClassifierError::SingleClass(0)),
        [neg, pos] => Ok((neg, pos)),
    }
}

/// Balanced class weights `n / (2 * n_class)`.
pub fn balanced_class_weights(n_negative: usize, n_positive: usize) -> [f64; 2] {
    let total = (n_negative + n_positive) as f64;
    [
        total / (2.0 * n_negative.max(1) as f64),
        total / (2.0 * n_positive.max(1) as f64),
    ]
}

pub(crate) fn check_columns(expected: usize, x: ArrayView2<'_, f32>) -> Result<(), ClassifierError> {
    if x.ncols() == expected {
        Ok(())
    } else {
        Err(ClassifierError::FeatureMismatch {
            expected,
            found: x.ncols(),
        })
    }
}

pub(crate) fn sigmoid(value: f64) -> f64 {
    if value >= 0.0 {
        1.0 / (1.0 + (-value).exp())
    } else {
        let e = value.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn training_data_checks() {
        let x = array![[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]];
        assert_eq!(check_training_data(x.view(), &[0, 1, 1]).unwrap(), (1, 2));
        assert!(matches!(
            check_training_data(x.view(), &[1, 1, 1]),
            Err(ClassifierError::SingleClass(1))
        ));
        assert!(matches!(
            check_training_data(x.view(), &[0, 1]),
            Err(ClassifierError::LabelMismatch { .. })
        ));
        assert!(matches!(
            check_training_data(x.view(), &[0, 2, 1]),
            Err(ClassifierError::InvalidLabel(2))
        ));
    }

    #[test]
    fn balanced_weights_favor_minority() {
        let [neg, pos] = balanced_class_weights(3, 1);
        assert!((neg - 4.0 / 6.0).abs() < 1e-12);
        assert!((pos - 2.0).abs() < 1e-12);
    }

    #[test]
    fn sigmoid_is_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
    }
}
