use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{SeedableRng, seq::SliceRandom};

use super::{LinearModel, Penalty, SvmOptions};
use crate::ml::classifier::{ClassifierError, balanced_class_weights, check_training_data};

/// Number of epochs always run before the convergence check applies.
const MIN_EPOCHS: usize = 5;
/// Learning-rate decay per parameter update.
const LR_DECAY: f64 = 1e-3;

/// Fit a linear SVM with mini-batch sub-gradient descent on the class-weighted hinge loss.
///
/// Minimizes `reg(w) / (C * n) + mean_i(cw_i * max(0, 1 - s_i * f(x_i)))` where `s_i` is
/// the label mapped to `-1/+1` and `cw` are balanced class weights. The L1 penalty is
/// applied as a proximal soft-threshold step so unused features end at exactly zero.
pub fn train_linear_svm(
    x: ArrayView2<'_, f32>,
    y: &[usize],
    options: &SvmOptions,
    seed: u64,
) -> Result<LinearModel, ClassifierError> {
    let (n_negative, n_positive) = check_training_data(x, y)?;
    options.validate()?;
    let class_weights = balanced_class_weights(n_negative, n_positive);

    let n = x.nrows();
    let d = x.ncols();
    let lambda = 1.0 / (options.c * n as f64);
    let signs: Vec<f64> = y.iter().map(|&label| if label == 1 { 1.0 } else { -1.0 }).collect();
    let rows: Vec<Vec<f64>> = x
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|&v| f64::from(v)).collect())
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut weights = vec![0.0f64; d];
    let mut bias = 0.0f64;
    let mut indices: Vec<usize> = (0..n).collect();
    let batch_size = options.batch_size.max(1);
    let mut updates = 0usize;
    let mut previous = f64::INFINITY;

    for epoch in 0..options.epochs {
        indices.shuffle(&mut rng);
        for chunk in indices.chunks(batch_size) {
            let mut grad_w = vec![0.0f64; d];
            let mut grad_b = 0.0f64;
            for &idx in chunk {
                let margin = signs[idx] * (dot(&weights, &rows[idx]) + bias);
                if margin >= 1.0 {
                    continue;
                }
                let scale = class_weights[y[idx]] * signs[idx];
                for (g, &v) in grad_w.iter_mut().zip(&rows[idx]) {
                    *g -= scale * v;
                }
                grad_b -= scale;
            }
            let inv = 1.0 / chunk.len() as f64;
            let lr = options.learning_rate / (1.0 + LR_DECAY * updates as f64);
            updates += 1;
            match options.penalty {
                Penalty::L2 => {
                    for (w, g) in weights.iter_mut().zip(&grad_w) {
                        *w -= lr * (g * inv + lambda * *w);
                    }
                }
                Penalty::L1 => {
                    let shrink = lr * lambda;
                    for (w, g) in weights.iter_mut().zip(&grad_w) {
                        *w = soft_threshold(*w - lr * g * inv, shrink);
                    }
                }
            }
            bias -= lr * grad_b * inv;
        }

        let objective = objective(
            &rows,
            &signs,
            y,
            &weights,
            bias,
            lambda,
            &class_weights,
            options.penalty,
        );
        if epoch + 1 >= MIN_EPOCHS
            && (previous - objective).abs() <= options.tol * 1e-4 * previous.abs().max(1.0)
        {
            tracing::trace!("Linear SVM converged after {} epochs", epoch + 1);
            break;
        }
        previous = objective;
    }

    Ok(LinearModel::new(weights, bias, column_means(x)))
}

/// Column means of `x`, used as the background distribution for explanations.
pub fn column_means(x: ArrayView2<'_, f32>) -> Vec<f64> {
    let n = x.nrows().max(1) as f64;
    x.columns()
        .into_iter()
        .map(|col| col.iter().map(|&v| f64::from(v)).sum::<f64>() / n)
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn objective(
    rows: &[Vec<f64>],
    signs: &[f64],
    y: &[usize],
    weights: &[f64],
    bias: f64,
    lambda: f64,
    class_weights: &[f64; 2],
    penalty: Penalty,
) -> f64 {
    let reg = match penalty {
        Penalty::L2 => 0.5 * weights.iter().map(|w| w * w).sum::<f64>(),
        Penalty::L1 => weights.iter().map(|w| w.abs()).sum::<f64>(),
    };
    let loss: f64 = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let margin = signs[i] * (dot(weights, row) + bias);
            class_weights[y[i]] * (1.0 - margin).max(0.0)
        })
        .sum();
    lambda * reg + loss / rows.len().max(1) as f64
}

fn dot(weights: &[f64], row: &[f64]) -> f64 {
    weights.iter().zip(row).map(|(w, v)| w * v).sum()
}

fn soft_threshold(value: f64, shrink: f64) -> f64 {
    value.signum() * (value.abs() - shrink).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (ndarray::Array2<f32>, Vec<usize>) {
        let x = array![
            [1.0f32, 0.0, 1.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        (x, vec![1, 1, 1, 0, 0, 0])
    }

    #[test]
    fn separates_linearly_separable_data() {
        let (x, y) = separable();
        let model = train_linear_svm(x.view(), &y, &SvmOptions::default(), 7).unwrap();
        assert!(model.weights[0] > 0.0);
        assert!(model.weights[1] < 0.0);
        let predicted: Vec<usize> = x
            .rows()
            .into_iter()
            .map(|row| usize::from(model.decision_row(row) > 0.0))
            .collect();
        assert_eq!(predicted, y);
    }

    #[test]
    fn training_is_deterministic_per_seed() {
        let (x, y) = separable();
        let a = train_linear_svm(x.view(), &y, &SvmOptions::default(), 3).unwrap();
        let b = train_linear_svm(x.view(), &y, &SvmOptions::default(), 3).unwrap();
        assert_eq!(a.weights, b.weights);
        assert_eq!(a.bias, b.bias);
    }

    #[test]
    fn l1_zeroes_uninformative_columns() {
        let (x, y) = separable();
        let options = SvmOptions {
            penalty: Penalty::L1,
            c: 0.05,
            ..SvmOptions::default()
        };
        let model = train_linear_svm(x.view(), &y, &options, 1).unwrap();
        assert_eq!(model.weights[2], 0.0);
    }

    #[test]
    fn soft_threshold_shrinks_towards_zero() {
        assert_eq!(soft_threshold(0.5, 0.2), 0.3);
        assert_eq!(soft_threshold(-0.1, 0.2), 0.0);
    }
}
