//! Numerically stable primitives for log-domain and simplex math.

/// Stable log(sum(exp(values))).
///
/// Returns NEG_INFINITY for empty input or all -inf inputs.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let mut sum = 0.0;
    for v in values {
        sum += (*v - max).exp();
    }
    max + sum.ln()
}

/// Stable log(exp(a) + exp(b)).
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a == f64::INFINITY || b == f64::INFINITY {
        return f64::INFINITY;
    }
    let m = a.max(b);
    let diff = (a - b).abs();
    m + (-diff).exp().ln_1p()
}

/// Softmax over a logit slice with max subtraction.
///
/// The output is a valid probability simplex for any finite input: entries
/// are non-negative and sum to 1. All -inf logits yield the uniform
/// distribution rather than NaN.
pub fn stable_softmax(logits: &[f64]) -> Vec<f64> {
    if logits.is_empty() {
        return vec![];
    }
    let lse = log_sum_exp(logits);
    if lse == f64::NEG_INFINITY {
        return vec![1.0 / logits.len() as f64; logits.len()];
    }
    logits.iter().map(|l| (l - lse).exp()).collect()
}

/// Softplus ln(1 + e^x), safe against overflow for large |x|.
pub fn softplus(x: f64) -> f64 {
    log_add_exp(0.0, x)
}

/// Inverse of [`softplus`]: returns x such that softplus(x) = y.
///
/// Requires y > 0; returns NEG_INFINITY at y = 0.
pub fn inv_softplus(y: f64) -> f64 {
    if y < 0.0 {
        return f64::NAN;
    }
    if y == 0.0 {
        return f64::NEG_INFINITY;
    }
    // ln(e^y - 1) = y + ln(1 - e^-y)
    y + (-(-y).exp()).ln_1p()
}

/// Logistic sigmoid 1 / (1 + e^-x), evaluated in the stable branch.
pub fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        if a.is_nan() || b.is_nan() {
            return false;
        }
        (a - b).abs() <= tol
    }

    #[test]
    fn log_sum_exp_basic() {
        let v = [0.0, 0.0];
        let out = log_sum_exp(&v);
        assert!(approx_eq(out, 2.0f64.ln(), 1e-12));
    }

    #[test]
    fn log_sum_exp_dominance() {
        let v = [-1000.0, 0.0];
        let out = log_sum_exp(&v);
        assert!(approx_eq(out, 0.0, 1e-12));
    }

    #[test]
    fn log_add_exp_matches_lse() {
        let a = 1.234;
        let b = -0.75;
        let out = log_add_exp(a, b);
        let lse = log_sum_exp(&[a, b]);
        assert!(approx_eq(out, lse, 1e-12));
    }

    #[test]
    fn softmax_is_simplex() {
        let probs = stable_softmax(&[1.0, 2.0, 3.0]);
        let sum: f64 = probs.iter().sum();
        assert!(approx_eq(sum, 1.0, 1e-12));
        assert!(probs.iter().all(|p| *p >= 0.0));
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn softmax_extreme_logits_no_overflow() {
        let probs = stable_softmax(&[1000.0, -1000.0, 0.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(approx_eq(probs.iter().sum::<f64>(), 1.0, 1e-12));
        assert!(approx_eq(probs[0], 1.0, 1e-12));
    }

    #[test]
    fn softmax_all_neg_inf_is_uniform() {
        let probs = stable_softmax(&[f64::NEG_INFINITY, f64::NEG_INFINITY]);
        assert!(approx_eq(probs[0], 0.5, 1e-12));
        assert!(approx_eq(probs[1], 0.5, 1e-12));
    }

    #[test]
    fn softmax_empty() {
        assert!(stable_softmax(&[]).is_empty());
    }

    #[test]
    fn softplus_positive_and_asymptotic() {
        assert!(softplus(-50.0) > 0.0);
        assert!(approx_eq(softplus(0.0), 2.0f64.ln(), 1e-12));
        // For large x, softplus(x) ~ x.
        assert!(approx_eq(softplus(100.0), 100.0, 1e-9));
        assert!(softplus(800.0).is_finite());
    }

    #[test]
    fn inv_softplus_round_trip() {
        for x in [-5.0, -1.0, 0.0, 0.5, 3.0, 20.0] {
            let y = softplus(x);
            assert!(approx_eq(inv_softplus(y), x, 1e-9), "round trip at {}", x);
        }
    }

    #[test]
    fn inv_softplus_edge_cases() {
        assert!(inv_softplus(-1.0).is_nan());
        assert!(inv_softplus(0.0).is_infinite() && inv_softplus(0.0) < 0.0);
    }

    #[test]
    fn logistic_symmetry() {
        assert!(approx_eq(logistic(0.0), 0.5, 1e-12));
        assert!(approx_eq(logistic(3.0) + logistic(-3.0), 1.0, 1e-12));
        assert!(approx_eq(logistic(-800.0), 0.0, 1e-12));
        assert!(approx_eq(logistic(800.0), 1.0, 1e-12));
    }
}
