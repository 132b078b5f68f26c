//! Linear support vector classifier with optional sigmoid calibration.
//!
//! - Hinge loss with balanced class weights and an L1 or L2 penalty.
//! - Calibrated models train one linear model per stratified fold and Platt-scale each on
//!   its held-out part; probabilities are averaged over folds.
//! - Feature weights of a calibrated model are the per-column median over the fold models.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::{
    ClassifierError, Estimator, Explanation, TraitModel, check_training_data, sigmoid,
};
use crate::cv::stratified_kfold;

mod calibration;
mod train;

pub use calibration::PlattScaler;
pub use train::{column_means, train_linear_svm};

/// Regularization penalty of the linear SVM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    L1,
    #[default]
    L2,
}

impl Penalty {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "l1" => Some(Self::L1),
            "l2" => Some(Self::L2),
            _ => None,
        }
    }
}

/// Training hyperparameters for the linear SVM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvmOptions {
    /// Inverse regularization strength.
    pub c: f64,
    pub penalty: Penalty,
    /// Convergence tolerance; larger values stop earlier.
    pub tol: f64,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Stratified folds used for calibration; clamped to the minority class size.
    pub calibration_folds: usize,
}

impl Default for SvmOptions {
    fn default() -> Self {
        Self {
            c: 5.0,
            penalty: Penalty::L2,
            tol: 1.0,
            epochs: 200,
            learning_rate: 0.1,
            batch_size: 32,
            calibration_folds: 5,
        }
    }
}

impl SvmOptions {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if !(self.c > 0.0 && self.c.is_finite()) {
            return Err(ClassifierError::InvalidOption(format!(
                "C must be positive, got {}",
                self.c
            )));
        }
        if !(self.tol > 0.0) {
            return Err(ClassifierError::InvalidOption(format!(
                "tol must be positive, got {}",
                self.tol
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ClassifierError::InvalidOption(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(ClassifierError::InvalidOption("epochs must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Linear decision function `w . x + b` with the training column means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub background_mean: Vec<f64>,
}

impl LinearModel {
    pub fn new(weights: Vec<f64>, bias: f64, background_mean: Vec<f64>) -> Self {
        Self {
            weights,
            bias,
            background_mean,
        }
    }

    pub fn decision_row(&self, row: ArrayView1<'_, f32>) -> f64 {
        self.weights
            .iter()
            .zip(row.iter())
            .map(|(w, &v)| w * f64::from(v))
            .sum::<f64>()
            + self.bias
    }

    fn decision(&self, x: ArrayView2<'_, f32>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.decision_row(row)).collect()
    }

    /// Exact Shapley values of a linear model under feature independence.
    fn explain(&self, x: ArrayView2<'_, f32>) -> Explanation {
        let mut shap_values = Array2::<f64>::zeros((x.nrows(), self.weights.len()));
        for (mut out, row) in shap_values.rows_mut().into_iter().zip(x.rows()) {
            for (j, value) in out.iter_mut().enumerate() {
                *value = self.weights[j] * (f64::from(row[j]) - self.background_mean[j]);
            }
        }
        let base_value = self
            .weights
            .iter()
            .zip(&self.background_mean)
            .map(|(w, m)| w * m)
            .sum::<f64>()
            + self.bias;
        Explanation {
            shap_values,
            base_value,
        }
    }

    fn average(models: &[LinearModel]) -> LinearModel {
        let n = models.len().max(1) as f64;
        let d = models.first().map_or(0, |model| model.weights.len());
        let mut weights = vec![0.0; d];
        let mut bias = 0.0;
        for model in models {
            for (acc, w) in weights.iter_mut().zip(&model.weights) {
                *acc += w / n;
            }
            bias += model.bias / n;
        }
        let background_mean = models
            .first()
            .map(|model| model.background_mean.clone())
            .unwrap_or_default();
        LinearModel::new(weights, bias, background_mean)
    }
}

/// One calibration fold: a linear model and the sigmoid fitted on its held-out part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedFold {
    pub linear: LinearModel,
    pub scaler: PlattScaler,
}

/// Fitted linear SVM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmModel {
    /// Decision function; the fold average for calibrated models.
    pub linear: LinearModel,
    /// Empty for uncalibrated models.
    pub folds: Vec<CalibratedFold>,
    pub weights: Vec<f64>,
}

impl SvmModel {
    pub fn is_calibrated(&self) -> bool {
        !self.folds.is_empty()
    }
}

impl TraitModel for SvmModel {
    fn n_columns(&self) -> usize {
        self.linear.weights.len()
    }

    fn decision_function(&self, x: ArrayView2<'_, f32>) -> Array1<f64> {
        self.linear.decision(x)
    }

    fn predict(&self, x: ArrayView2<'_, f32>) -> Vec<usize> {
        if self.is_calibrated() {
            self.predict_proba(x)
                .iter()
                .map(|&p| usize::from(p > 0.5))
                .collect()
        } else {
            self.decision_function(x)
                .iter()
                .map(|&score| usize::from(score > 0.0))
                .collect()
        }
    }

    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Array1<f64> {
        if !self.is_calibrated() {
            return self.decision_function(x).mapv(sigmoid);
        }
        let n_folds = self.folds.len() as f64;
        let mut proba = Array1::<f64>::zeros(x.nrows());
        for fold in &self.folds {
            for (p, decision) in proba.iter_mut().zip(fold.linear.decision(x)) {
                *p += fold.scaler.probability(decision) / n_folds;
            }
        }
        proba
    }

    fn feature_weights(&self) -> Array1<f64> {
        Array1::from(self.weights.clone())
    }

    fn explain(&self, x: ArrayView2<'_, f32>) -> Explanation {
        self.linear.explain(x)
    }
}

/// Linear SVM estimator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearSvm {
    pub options: SvmOptions,
    pub calibrate: bool,
    pub seed: u64,
}

impl LinearSvm {
    pub fn new(options: SvmOptions, seed: u64) -> Self {
        Self {
            options,
            calibrate: true,
            seed,
        }
    }

    fn fit_calibrated(
        &self,
        x: ArrayView2<'_, f32>,
        y: &[usize],
        minority: usize,
    ) -> Result<SvmModel, ClassifierError> {
        let n_folds = self.options.calibration_folds.min(minority);
        let folds = if n_folds >= 2 {
            stratified_kfold(y, n_folds, self.seed)
        } else {
            debug!("Minority class too small for calibration folds; calibrating on training data");
            let all: Vec<usize> = (0..y.len()).collect();
            vec![(all.clone(), all)]
        };

        let background = column_means(x);
        let mut calibrated = Vec::with_capacity(folds.len());
        for (fold_idx, (train_idx, test_idx)) in folds.iter().enumerate() {
            let x_train = x.select(Axis(0), train_idx);
            let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
            let mut linear = train_linear_svm(
                x_train.view(),
                &y_train,
                &self.options,
                self.seed.wrapping_add(fold_idx as u64),
            )?;
            linear.background_mean = background.clone();
            let x_test = x.select(Axis(0), test_idx);
            let y_test: Vec<usize> = test_idx.iter().map(|&i| y[i]).collect();
            let decision = linear.decision(x_test.view()).to_vec();
            let scaler = PlattScaler::fit(&decision, &y_test);
            calibrated.push(CalibratedFold { linear, scaler });
        }

        let linears: Vec<LinearModel> = calibrated.iter().map(|fold| fold.linear.clone()).collect();
        let weights = median_weights(&linears);
        Ok(SvmModel {
            linear: LinearModel::average(&linears),
            folds: calibrated,
            weights,
        })
    }
}

impl Estimator for LinearSvm {
    type Model = SvmModel;

    const IDENTIFIER: &'static str = "svm";

    fn fit(&self, x: ArrayView2<'_, f32>, y: &[usize]) -> Result<SvmModel, ClassifierError> {
        let (n_negative, n_positive) = check_training_data(x, y)?;
        if self.calibrate {
            return self.fit_calibrated(x, y, n_negative.min(n_positive));
        }
        let linear = train_linear_svm(x, y, &self.options, self.seed)?;
        let weights = linear.weights.clone();
        Ok(SvmModel {
            linear,
            folds: Vec::new(),
            weights,
        })
    }

    fn cv_variant(&self) -> Self {
        Self {
            calibrate: false,
            ..self.clone()
        }
    }
}

fn median_weights(models: &[LinearModel]) -> Vec<f64> {
    let d = models.first().map_or(0, |model| model.weights.len());
    (0..d)
        .map(|j| {
            let mut column: Vec<f64> = models.iter().map(|model| model.weights[j]).collect();
            column.sort_by(f64::total_cmp);
            let mid = column.len() / 2;
            if column.len() % 2 == 0 {
                (column[mid - 1] + column[mid]) / 2.0
            } else {
                column[mid]
            }
        })
        .collect()
}
