use std::cmp::Reverse;
use std::collections::HashSet;

use ndarray::{Array2, Array3, ArrayView2, Axis, concatenate};
use ordered_float::OrderedFloat;
use tracing::debug;

use super::{ShapError, ShapForceRow, ShapSummaryRow, ShapValues};

/// Absolute and relative tolerance for base values of different batches.
const BASE_VALUE_ATOL: f64 = 1e-6;
const BASE_VALUE_RTOL: f64 = 1e-4;

/// Name used for the single class row of two-class input.
pub const BINARY_CLASS_NAME: &str = "binary";

#[derive(Debug, Clone)]
enum StoredShaps {
    Binary(Array2<f64>),
    MultiClass(Array3<f64>),
}

impl StoredShaps {
    fn n_classes(&self) -> usize {
        match self {
            Self::Binary(_) => 1,
            Self::MultiClass(values) => values.len_of(Axis(1)),
        }
    }

    /// Shapley value of `sample` for `class` and used feature `feature`.
    fn value(&self, sample: usize, class: usize, feature: usize) -> f64 {
        match self {
            Self::Binary(values) => values[[sample, feature]],
            Self::MultiClass(values) => values[[sample, class, feature]],
        }
    }

    fn n_features(&self) -> usize {
        match self {
            Self::Binary(values) => values.ncols(),
            Self::MultiClass(values) => values.len_of(Axis(2)),
        }
    }
}

/// Accumulates feature values and Shapley values of predictions and ranks features by them.
///
/// Only features the model actually uses (non-zero weight) are kept. Every added batch must
/// agree on the base value.
#[derive(Debug, Clone)]
pub struct ShapHandler {
    n_feature_space: usize,
    used_idxs: Vec<usize>,
    used_feature_names: Vec<String>,
    class_names: Option<Vec<String>>,
    sample_names: Vec<String>,
    features: Option<Array2<f64>>,
    shaps: Option<StoredShaps>,
    base_value: Option<f64>,
}

impl ShapHandler {
    /// `feature_names` spans the whole model feature space; `used_idxs` index into it.
    pub fn new(feature_names: Vec<String>, used_idxs: Vec<usize>) -> Result<Self, ShapError> {
        let n_feature_space = feature_names.len();
        if let Some(&index) = used_idxs.iter().find(|&&idx| idx >= n_feature_space) {
            return Err(ShapError::FeatureIndexOutOfRange {
                index,
                n_features: n_feature_space,
            });
        }
        let used_feature_names = used_idxs
            .iter()
            .map(|&idx| feature_names[idx].clone())
            .collect();
        Ok(Self {
            n_feature_space,
            used_idxs,
            used_feature_names,
            class_names: None,
            sample_names: Vec::new(),
            features: None,
            shaps: None,
            base_value: None,
        })
    }

    /// Build a handler keeping the features with non-zero weight.
    pub fn from_weights(feature_names: Vec<String>, weights: &[f64]) -> Result<Self, ShapError> {
        let used_idxs = weights
            .iter()
            .enumerate()
            .filter(|(_, weight)| **weight != 0.0)
            .map(|(idx, _)| idx)
            .collect();
        Self::new(feature_names, used_idxs)
    }

    /// Names for the class axis of multi-class input.
    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = Some(class_names);
        self
    }

    pub fn used_feature_names(&self) -> &[String] {
        &self.used_feature_names
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    pub fn base_value(&self) -> Option<f64> {
        self.base_value
    }

    pub fn n_samples(&self) -> usize {
        self.sample_names.len()
    }

    /// Append a batch of explanations.
    ///
    /// `features` is `[n_samples, n_feature_space]`. `shaps` has the same layout (with a
    /// class axis in the middle for multi-class input); without `base_value` it carries one
    /// extra trailing column of per-sample base values whose mean becomes the base value.
    /// On error nothing is stored.
    pub fn add_feature_data(
        &mut self,
        sample_names: &[String],
        features: ArrayView2<'_, f64>,
        shaps: ShapValues,
        base_value: Option<f64>,
    ) -> Result<(), ShapError> {
        let n_samples = sample_names.len();
        let expected_width = self.n_feature_space + usize::from(base_value.is_none());
        if features.nrows() != n_samples || features.ncols() != self.n_feature_space {
            return Err(ShapError::ShapeMismatch {
                what: "features",
                expected: vec![n_samples, self.n_feature_space],
                found: features.shape().to_vec(),
            });
        }
        let shap_shape = shaps.shape();
        if shap_shape[0] != n_samples || shap_shape.last() != Some(&expected_width) {
            let mut expected = shap_shape.clone();
            expected[0] = n_samples;
            if let Some(last) = expected.last_mut() {
                *last = expected_width;
            }
            return Err(ShapError::ShapeMismatch {
                what: "shaps",
                expected,
                found: shap_shape,
            });
        }
        if let Some(stored) = &self.shaps {
            let (stored_classes, batch_classes) = (stored.n_classes(), shaps.n_classes());
            let same_kind = matches!(
                (stored, &shaps),
                (StoredShaps::Binary(_), ShapValues::Binary(_))
                    | (StoredShaps::MultiClass(_), ShapValues::MultiClass(_))
            );
            if !same_kind || stored_classes != batch_classes {
                return Err(ShapError::ClassCountMismatch {
                    stored: stored_classes,
                    found: batch_classes,
                });
            }
        }
        let mut seen: HashSet<&str> = self.sample_names.iter().map(String::as_str).collect();
        for name in sample_names {
            if !seen.insert(name.as_str()) {
                return Err(ShapError::DuplicateSample(name.clone()));
            }
        }

        let (shaps, batch_base) = match base_value {
            Some(value) => (shaps, value),
            None => shaps.split_base_values(),
        };
        if let Some(stored) = self.base_value {
            if !base_values_agree(stored, batch_base) {
                return Err(ShapError::IncongruentBaseValue {
                    stored,
                    found: batch_base,
                });
            }
        }

        let used_features = features.select(Axis(1), &self.used_idxs).mapv(nan_to_num);
        let used_shaps = match shaps {
            ShapValues::Binary(values) => {
                StoredShaps::Binary(values.select(Axis(1), &self.used_idxs).mapv(nan_to_num))
            }
            ShapValues::MultiClass(values) => {
                StoredShaps::MultiClass(values.select(Axis(2), &self.used_idxs).mapv(nan_to_num))
            }
        };

        self.features = Some(match self.features.take() {
            Some(stored) => concatenate(Axis(0), &[stored.view(), used_features.view()])?,
            None => used_features,
        });
        self.shaps = Some(match (self.shaps.take(), used_shaps) {
            (Some(StoredShaps::Binary(a)), StoredShaps::Binary(b)) => {
                StoredShaps::Binary(concatenate(Axis(0), &[a.view(), b.view()])?)
            }
            (Some(StoredShaps::MultiClass(a)), StoredShaps::MultiClass(b)) => {
                StoredShaps::MultiClass(concatenate(Axis(0), &[a.view(), b.view()])?)
            }
            (_, batch) => batch,
        });
        self.base_value.get_or_insert(batch_base);
        self.sample_names.extend(sample_names.iter().cloned());
        debug!(
            "Stored explanations for {} samples ({} total)",
            n_samples,
            self.sample_names.len()
        );
        Ok(())
    }

    /// Features ranked by summed absolute Shapley value over all samples and classes, with
    /// the mean Shapley value where the feature is present (`> 0`) and absent (`== 0`).
    ///
    /// `None` returns every used feature. Multi-class input yields one row per class.
    pub fn get_shap_summary(
        &self,
        n_max_features: Option<usize>,
    ) -> Result<Vec<ShapSummaryRow>, ShapError> {
        let (features, shaps) = self.stored()?;
        let n_classes = shaps.n_classes();
        let totals: Vec<f64> = (0..shaps.n_features())
            .map(|j| {
                (0..self.n_samples())
                    .flat_map(|i| (0..n_classes).map(move |c| (i, c)))
                    .map(|(i, c)| shaps.value(i, c, j).abs())
                    .sum()
            })
            .collect();
        let order = sort_desc(&totals);
        let take = n_max_features.unwrap_or(order.len()).min(order.len());

        let mut rows = Vec::with_capacity(take * n_classes);
        for (rank, &j) in order.iter().take(take).enumerate() {
            for class in 0..n_classes {
                let mut present = Vec::new();
                let mut absent = Vec::new();
                for i in 0..self.n_samples() {
                    let value = features[[i, j]];
                    let shap = shaps.value(i, class, j);
                    if value > 0.0 {
                        present.push(shap);
                    } else if value == 0.0 {
                        absent.push(shap);
                    }
                }
                rows.push(ShapSummaryRow {
                    rank,
                    feature: self.used_feature_names[j].clone(),
                    class_name: self.class_name(class, n_classes),
                    mean_shap_present: mean(&present),
                    mean_shap_absent: mean(&absent),
                    n_present: present.len(),
                    n_absent: absent.len(),
                });
            }
        }
        Ok(rows)
    }

    /// The most influential features of one sample, ranked by that sample's absolute
    /// Shapley values (summed over classes for multi-class input).
    pub fn get_shap_force(
        &self,
        sample_name: &str,
        n_max_features: Option<usize>,
    ) -> Result<Vec<ShapForceRow>, ShapError> {
        let (features, shaps) = self.stored()?;
        let sample = self
            .sample_names
            .iter()
            .position(|name| name == sample_name)
            .ok_or_else(|| ShapError::SampleNotFound(sample_name.to_string()))?;
        let n_classes = shaps.n_classes();
        let magnitudes: Vec<f64> = (0..shaps.n_features())
            .map(|j| {
                (0..n_classes)
                    .map(|c| shaps.value(sample, c, j).abs())
                    .sum()
            })
            .collect();
        let order = sort_desc(&magnitudes);
        let take = n_max_features.unwrap_or(order.len()).min(order.len());

        let mut rows = Vec::with_capacity(take * n_classes);
        for (rank, &j) in order.iter().take(take).enumerate() {
            for class in 0..n_classes {
                rows.push(ShapForceRow {
                    rank,
                    sample: sample_name.to_string(),
                    feature: self.used_feature_names[j].clone(),
                    feature_value: features[[sample, j]],
                    class_name: self.class_name(class, n_classes),
                    shap_value: shaps.value(sample, class, j),
                });
            }
        }
        Ok(rows)
    }

    fn stored(&self) -> Result<(&Array2<f64>, &StoredShaps), ShapError> {
        match (&self.features, &self.shaps) {
            (Some(features), Some(shaps)) => Ok((features, shaps)),
            _ => Err(ShapError::NoExplanations),
        }
    }

    fn class_name(&self, class: usize, n_classes: usize) -> String {
        if let Some(name) = self.class_names.as_ref().and_then(|names| names.get(class)) {
            return name.clone();
        }
        if n_classes == 1 {
            BINARY_CLASS_NAME.to_string()
        } else {
            format!("class_{class}")
        }
    }
}

/// Whether two base values agree within tolerance.
pub fn base_values_agree(stored: f64, found: f64) -> bool {
    (stored - found).abs() <= BASE_VALUE_ATOL + BASE_VALUE_RTOL * found.abs()
}

/// Indices sorted by descending value; equal values keep their original order.
fn sort_desc(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by_key(|&j| Reverse(OrderedFloat(values[j])));
    order
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn nan_to_num(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else if value == f64::INFINITY {
        f64::MAX
    } else if value == f64::NEG_INFINITY {
        f64::MIN
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn handler() -> ShapHandler {
        ShapHandler::new(names(&["f0", "f1", "f2", "f3"]), vec![0, 2, 3]).unwrap()
    }

    #[test]
    fn trailing_column_supplies_base_value() {
        let mut handler = handler();
        let features = array![[1.0, 0.0, 1.0, 0.0], [0.0, 1.0, 1.0, 1.0]];
        let shaps = array![[0.1, 9.0, 0.2, -0.3, 0.4], [-0.1, 9.0, 0.1, 0.5, 0.6]];
        handler
            .add_feature_data(
                &names(&["a", "b"]),
                features.view(),
                ShapValues::Binary(shaps),
                None,
            )
            .unwrap();
        assert!((handler.base_value().unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(handler.used_feature_names(), &names(&["f0", "f2", "f3"])[..]);
    }

    #[test]
    fn nan_values_become_zero() {
        let mut handler = handler();
        let features = array![[f64::NAN, 0.0, 1.0, 0.0]];
        let shaps = array![[f64::NAN, 0.0, 0.2, 0.0]];
        handler
            .add_feature_data(
                &names(&["a"]),
                features.view(),
                ShapValues::Binary(shaps),
                Some(0.0),
            )
            .unwrap();
        let rows = handler.get_shap_force("a", None).unwrap();
        let f0 = rows.iter().find(|row| row.feature == "f0").unwrap();
        assert_eq!(f0.feature_value, 0.0);
        assert_eq!(f0.shap_value, 0.0);
    }

    #[test]
    fn failed_batches_leave_state_untouched() {
        let mut handler = handler();
        let features = array![[1.0, 0.0, 1.0, 0.0]];
        handler
            .add_feature_data(
                &names(&["a"]),
                features.view(),
                ShapValues::Binary(array![[0.1, 0.0, 0.2, 0.3]]),
                Some(0.5),
            )
            .unwrap();
        let err = handler
            .add_feature_data(
                &names(&["b"]),
                features.view(),
                ShapValues::Binary(array![[0.1, 0.0, 0.2, 0.3]]),
                Some(0.6),
            )
            .unwrap_err();
        assert!(matches!(err, ShapError::IncongruentBaseValue { .. }));
        let err = handler
            .add_feature_data(
                &names(&["a"]),
                features.view(),
                ShapValues::Binary(array![[0.1, 0.0, 0.2, 0.3]]),
                Some(0.5),
            )
            .unwrap_err();
        assert!(matches!(err, ShapError::DuplicateSample(name) if name == "a"));
        assert_eq!(handler.n_samples(), 1);
    }

    #[test]
    fn shape_errors_are_reported() {
        let mut handler = handler();
        let err = handler
            .add_feature_data(
                &names(&["a"]),
                array![[1.0, 0.0]].view(),
                ShapValues::Binary(array![[0.1, 0.0, 0.2, 0.3]]),
                Some(0.5),
            )
            .unwrap_err();
        assert!(matches!(err, ShapError::ShapeMismatch { what: "features", .. }));
        let err = handler
            .add_feature_data(
                &names(&["a"]),
                array![[1.0, 0.0, 1.0, 0.0]].view(),
                ShapValues::Binary(array![[0.1, 0.0, 0.2, 0.3]]),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ShapError::ShapeMismatch { what: "shaps", .. }));
    }

    #[test]
    fn rejects_out_of_range_used_index() {
        assert!(matches!(
            ShapHandler::new(names(&["f0"]), vec![1]),
            Err(ShapError::FeatureIndexOutOfRange { index: 1, n_features: 1 })
        ));
    }

    #[test]
    fn from_weights_keeps_non_zero_features() {
        let handler = ShapHandler::from_weights(names(&["a", "b", "c"]), &[0.0, -1.0, 2.0]).unwrap();
        assert_eq!(handler.used_feature_names(), &names(&["b", "c"])[..]);
    }

    #[test]
    fn tolerance_is_relative_to_magnitude() {
        assert!(base_values_agree(0.5, 0.50001));
        assert!(!base_values_agree(0.5, 0.6));
        assert!(base_values_agree(1000.0, 1000.05));
        assert!(!base_values_agree(0.0, 1e-5));
    }

    #[test]
    fn queries_before_any_batch_fail() {
        let handler = handler();
        assert!(matches!(handler.get_shap_summary(None), Err(ShapError::NoExplanations)));
        assert!(matches!(
            handler.get_shap_force("a", None),
            Err(ShapError::NoExplanations)
        ));
    }
}
