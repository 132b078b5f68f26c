use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::ml::classifier::{Explanation, TraitModel, sigmoid};

/// Single-split decision tree used as a weak learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    /// Column used for the split.
    pub feature_index: usize,
    /// Threshold in feature units.
    pub threshold: f32,
    /// Prediction for `feature <= threshold`.
    pub left_value: f64,
    /// Prediction for `feature > threshold`.
    pub right_value: f64,
    /// Training rows on each side of the split.
    pub n_left: usize,
    pub n_right: usize,
    /// Loss reduction achieved by the split.
    pub gain: f64,
}

impl Stump {
    pub fn predict(&self, features: ArrayView1<'_, f32>) -> f64 {
        let value = features.get(self.feature_index).copied().unwrap_or(0.0);
        if value <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }

    /// Mean stump output over the training rows.
    pub fn expected_value(&self) -> f64 {
        let total = (self.n_left + self.n_right).max(1) as f64;
        (self.n_left as f64 * self.left_value + self.n_right as f64 * self.right_value) / total
    }
}

/// Gradient-boosted decision stumps for binary classification (log-odds output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    pub n_columns: usize,
    pub learning_rate: f64,
    /// Prior log-odds before boosting rounds.
    pub init_raw: f64,
    pub stumps: Vec<Stump>,
}

impl GbdtModel {
    /// Raw log-odds for one feature vector.
    pub fn predict_raw(&self, features: ArrayView1<'_, f32>) -> f64 {
        self.init_raw
            + self
                .stumps
                .iter()
                .map(|stump| self.learning_rate * stump.predict(features))
                .sum::<f64>()
    }
}

impl TraitModel for GbdtModel {
    fn n_columns(&self) -> usize {
        self.n_columns
    }

    fn decision_function(&self, x: ArrayView2<'_, f32>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_raw(row)).collect()
    }

    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Array1<f64> {
        self.decision_function(x).mapv(sigmoid)
    }

    /// Summed split gain per column.
    fn feature_weights(&self) -> Array1<f64> {
        let mut weights = Array1::<f64>::zeros(self.n_columns);
        for stump in &self.stumps {
            if stump.feature_index < self.n_columns {
                weights[stump.feature_index] += stump.gain;
            }
        }
        weights
    }

    /// Exact Shapley values: every stump depends on one column, so the model is additive
    /// and each stump contributes `lr * (s(x) - E[s])` to its column.
    fn explain(&self, x: ArrayView2<'_, f32>) -> Explanation {
        let mut shap_values = Array2::<f64>::zeros((x.nrows(), self.n_columns));
        let mut base_value = self.init_raw;
        for stump in &self.stumps {
            let expected = stump.expected_value();
            base_value += self.learning_rate * expected;
            if stump.feature_index >= self.n_columns {
                continue;
            }
            for (i, row) in x.rows().into_iter().enumerate() {
                shap_values[[i, stump.feature_index]] +=
                    self.learning_rate * (stump.predict(row) - expected);
            }
        }
        Explanation {
            shap_values,
            base_value,
        }
    }
}
