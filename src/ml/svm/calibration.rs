//! Platt scaling of decision values into probabilities.

use serde::{Deserialize, Serialize};

const MAX_ITER: usize = 100;
const MIN_STEP: f64 = 1e-10;
const HESSIAN_RIDGE: f64 = 1e-12;
const GRADIENT_EPS: f64 = 1e-5;

/// Sigmoid `p = 1 / (1 + exp(a * f + b))` fitted on held-out decision values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaler {
    pub a: f64,
    pub b: f64,
}

impl Default for PlattScaler {
    fn default() -> Self {
        Self { a: -1.0, b: 0.0 }
    }
}

impl PlattScaler {
    /// Fit with the Newton method and backtracking line search.
    ///
    /// Targets are smoothed towards the priors (`(N+ + 1) / (N+ + 2)` and `1 / (N- + 2)`)
    /// so a perfectly separated fold still yields a finite slope.
    pub fn fit(decision: &[f64], y: &[usize]) -> Self {
        let n_positive = y.iter().filter(|&&label| label == 1).count() as f64;
        let n_negative = y.len() as f64 - n_positive;
        let hi = (n_positive + 1.0) / (n_positive + 2.0);
        let lo = 1.0 / (n_negative + 2.0);
        let targets: Vec<f64> = y.iter().map(|&label| if label == 1 { hi } else { lo }).collect();

        let mut a = 0.0;
        let mut b = ((n_negative + 1.0) / (n_positive + 1.0)).ln();
        let mut fval = neg_log_likelihood(decision, &targets, a, b);

        for _ in 0..MAX_ITER {
            let mut h11 = HESSIAN_RIDGE;
            let mut h22 = HESSIAN_RIDGE;
            let mut h21 = 0.0;
            let mut g1 = 0.0;
            let mut g2 = 0.0;
            for (&f, &t) in decision.iter().zip(&targets) {
                let (p, q) = probabilities(f * a + b);
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }
            if g1.abs() < GRADIENT_EPS && g2.abs() < GRADIENT_EPS {
                break;
            }
            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= MIN_STEP {
                let new_a = a + step * da;
                let new_b = b + step * db;
                let new_f = neg_log_likelihood(decision, &targets, new_a, new_b);
                if new_f < fval + 1e-4 * step * gd {
                    a = new_a;
                    b = new_b;
                    fval = new_f;
                    break;
                }
                step /= 2.0;
            }
            if step < MIN_STEP {
                tracing::debug!("Platt scaling line search failed; keeping current fit");
                break;
            }
        }
        Self { a, b }
    }

    /// Probability of the positive class for one decision value.
    pub fn probability(&self, decision: f64) -> f64 {
        probabilities(decision * self.a + self.b).0
    }
}

/// `(p, 1 - p)` for `p = 1 / (1 + exp(x))`, computed without overflow.
fn probabilities(x: f64) -> (f64, f64) {
    if x >= 0.0 {
        let e = (-x).exp();
        (e / (1.0 + e), 1.0 / (1.0 + e))
    } else {
        let e = x.exp();
        (1.0 / (1.0 + e), e / (1.0 + e))
    }
}

fn neg_log_likelihood(decision: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    decision
        .iter()
        .zip(targets)
        .map(|(&f, &t)| {
            let x = f * a + b;
            if x >= 0.0 {
                t * x + (-x).exp().ln_1p()
            } else {
                (t - 1.0) * x + x.exp().ln_1p()
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_decisions_map_to_high_probability() {
        let decision = [-2.0, -1.5, -0.5, 0.3, 1.2, 2.5, -0.2, 0.8];
        let y = [0, 0, 0, 1, 1, 1, 1, 0];
        let scaler = PlattScaler::fit(&decision, &y);
        assert!(scaler.a < 0.0);
        assert!(scaler.probability(2.0) > 0.5);
        assert!(scaler.probability(-2.0) < 0.5);
        assert!(scaler.probability(3.0) > scaler.probability(1.0));
    }

    #[test]
    fn separated_fold_stays_finite() {
        let scaler = PlattScaler::fit(&[-1.0, -1.0, 1.0, 1.0], &[0, 0, 1, 1]);
        assert!(scaler.a.is_finite() && scaler.b.is_finite());
        let p = scaler.probability(1.0);
        assert!(p > 0.5 && p < 1.0);
    }
}
