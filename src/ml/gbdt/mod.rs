//! Deterministic gradient-boosted decision-stump classifier.
//!
//! Binary logistic boosting over histogram-binned columns. Feature weights are summed split
//! gains and Shapley values are exact because the ensemble is additive in its columns.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::classifier::{ClassifierError, Estimator};

mod model;
mod train;

pub use model::{GbdtModel, Stump};
pub use train::{GbdtOptions, train_gbdt};

/// Gradient-boosted stump estimator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub options: GbdtOptions,
}

impl GradientBoosting {
    pub fn new(options: GbdtOptions) -> Self {
        Self { options }
    }
}

impl Estimator for GradientBoosting {
    type Model = GbdtModel;

    const IDENTIFIER: &'static str = "xgb";

    fn fit(&self, x: ArrayView2<'_, f32>, y: &[usize]) -> Result<GbdtModel, ClassifierError> {
        train_gbdt(x, y, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::classifier::TraitModel;
    use ndarray::Array2;

    fn dataset() -> (Array2<f32>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..24 {
            let positive = i % 3 != 0;
            rows.extend_from_slice(&[
                if positive { 1.0 } else { 0.0 },
                if i % 2 == 0 { 1.0 } else { 0.0 },
                if positive && i % 4 == 0 { 1.0 } else { 0.0 },
            ]);
            y.push(usize::from(positive));
        }
        (Array2::from_shape_vec((24, 3), rows).unwrap(), y)
    }

    #[test]
    fn fits_and_predicts_training_data() {
        let (x, y) = dataset();
        let model = GradientBoosting::default().fit(x.view(), &y).unwrap();
        assert_eq!(model.predict(x.view()), y);
        let proba = model.predict_proba(x.view());
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn feature_weights_concentrate_on_informative_column() {
        let (x, y) = dataset();
        let model = GradientBoosting::default().fit(x.view(), &y).unwrap();
        let weights = model.feature_weights();
        assert!(weights[0] > weights[1]);
        assert!(weights[0] > 0.0);
    }

    #[test]
    fn shap_values_add_up_to_log_odds() {
        let (x, y) = dataset();
        let model = GradientBoosting::default().fit(x.view(), &y).unwrap();
        let explanation = model.explain(x.view());
        let raw = model.decision_function(x.view());
        for (row, score) in explanation.shap_values.rows().into_iter().zip(raw.iter()) {
            assert!((row.sum() + explanation.base_value - score).abs() < 1e-9);
        }
    }

    #[test]
    fn model_round_trips_through_json() {
        let (x, y) = dataset();
        let model = GradientBoosting::default().fit(x.view(), &y).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: GbdtModel = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.stumps.len(), model.stumps.len());
        let before = model.decision_function(x.view());
        let after = restored.decision_function(x.view());
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
