//! Aggregation and reporting of Shapley (SHAP) explanations.
//!
//! [`ShapHandler`] collects feature values and Shapley values over prediction batches and
//! turns them into ranked summary and per-sample rows; [`table`] renders those rows.

use ndarray::{Array2, Array3, Axis, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod handler;
pub mod table;

pub use handler::{BINARY_CLASS_NAME, ShapHandler, base_values_agree};

#[derive(Debug, Error)]
pub enum ShapError {
    #[error("Incongruent base values found: {stored} vs. {found}")]
    IncongruentBaseValue { stored: f64, found: f64 },
    #[error("Sample {0:?} not found among saved explanations")]
    SampleNotFound(String),
    #[error("No explanations saved")]
    NoExplanations,
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("Sample {0:?} was already added")]
    DuplicateSample(String),
    #[error("Used feature index {index} outside feature space of {n_features}")]
    FeatureIndexOutOfRange { index: usize, n_features: usize },
    #[error("Batch has {found} classes but stored explanations have {stored}")]
    ClassCountMismatch { stored: usize, found: usize },
    #[error("Failed to append batch: {0}")]
    Concatenate(#[from] ndarray::ShapeError),
}

/// Shapley values of one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapValues {
    /// `[n_samples, n_features]` for two-class models.
    Binary(Array2<f64>),
    /// `[n_samples, n_classes, n_features]`.
    MultiClass(Array3<f64>),
}

impl ShapValues {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Self::Binary(values) => values.shape().to_vec(),
            Self::MultiClass(values) => values.shape().to_vec(),
        }
    }

    pub fn n_classes(&self) -> usize {
        match self {
            Self::Binary(_) => 1,
            Self::MultiClass(values) => values.len_of(Axis(1)),
        }
    }

    /// Split off the trailing feature column and return the mean of it as base value.
    pub(crate) fn split_base_values(self) -> (Self, f64) {
        match self {
            Self::Binary(values) => {
                let last = values.ncols().saturating_sub(1);
                let base = values.column(last).mean().unwrap_or(0.0);
                (Self::Binary(values.slice(s![.., ..last]).to_owned()), base)
            }
            Self::MultiClass(values) => {
                let last = values.len_of(Axis(2)).saturating_sub(1);
                let base = values.slice(s![.., .., last]).mean().unwrap_or(0.0);
                (
                    Self::MultiClass(values.slice(s![.., .., ..last]).to_owned()),
                    base,
                )
            }
        }
    }
}

/// One feature (and class) of [`ShapHandler::get_shap_summary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapSummaryRow {
    pub rank: usize,
    pub feature: String,
    pub class_name: String,
    /// `None` when the feature is present in no sample.
    pub mean_shap_present: Option<f64>,
    /// `None` when the feature is present in every sample.
    pub mean_shap_absent: Option<f64>,
    pub n_present: usize,
    pub n_absent: usize,
}

/// One feature (and class) of [`ShapHandler::get_shap_force`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapForceRow {
    pub rank: usize,
    pub sample: String,
    pub feature: String,
    pub feature_value: f64,
    pub class_name: String,
    pub shap_value: f64,
}
