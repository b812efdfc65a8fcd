//! Property-based tests for cru-math numerical functions.
//!
//! Uses proptest to verify mathematical properties hold across many random inputs.

use nalgebra::DMatrix;
use proptest::prelude::*;
use cru_math::{
    expm, inv_softplus, is_positive_definite, log_add_exp, log_sum_exp, softplus, solve_spd,
    stable_softmax, symmetrize, van_loan_discretize,
};

/// Tolerance for floating point comparisons.
const TOL: f64 = 1e-9;

/// Helper to check approximate equality.
fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return false;
    }
    if a.is_infinite() && b.is_infinite() {
        return a.signum() == b.signum();
    }
    (a - b).abs() <= tol.max(tol * a.abs().max(b.abs()))
}

/// Random symmetric PSD matrix from a factor L: P = L Lᵀ + eps I.
fn psd_from_factor(values: &[f64], dim: usize) -> DMatrix<f64> {
    let l = DMatrix::from_column_slice(dim, dim, values);
    &l * l.transpose() + DMatrix::identity(dim, dim) * 1e-6
}

// ============================================================================
// Stable scalar primitives
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// softmax output is always a probability simplex.
    #[test]
    fn softmax_is_simplex(logits in prop::collection::vec(-1e3..1e3f64, 1..8)) {
        let probs = stable_softmax(&logits);
        prop_assert_eq!(probs.len(), logits.len());
        let sum: f64 = probs.iter().sum();
        prop_assert!(approx_eq(sum, 1.0, TOL), "sum {} != 1", sum);
        prop_assert!(probs.iter().all(|p| *p >= 0.0 && p.is_finite()));
    }

    /// softmax is invariant to a constant shift of all logits.
    #[test]
    fn softmax_shift_invariant(
        logits in prop::collection::vec(-50.0..50.0f64, 2..6),
        shift in -100.0..100.0f64,
    ) {
        let base = stable_softmax(&logits);
        let shifted: Vec<f64> = logits.iter().map(|l| l + shift).collect();
        let shifted_probs = stable_softmax(&shifted);
        for (a, b) in base.iter().zip(&shifted_probs) {
            prop_assert!(approx_eq(*a, *b, TOL), "{} != {}", a, b);
        }
    }

    /// log_add_exp matches log_sum_exp for two elements.
    #[test]
    fn log_add_exp_matches_log_sum_exp(a in -100.0..100.0f64, b in -100.0..100.0f64) {
        let lae = log_add_exp(a, b);
        let lse = log_sum_exp(&[a, b]);
        prop_assert!(approx_eq(lae, lse, TOL));
    }

    /// softplus is positive, increasing, and inverts.
    #[test]
    fn softplus_round_trip(x in -30.0..30.0f64) {
        let y = softplus(x);
        prop_assert!(y > 0.0);
        prop_assert!(approx_eq(inv_softplus(y), x, 1e-7), "round trip at {}", x);
    }
}

// ============================================================================
// PSD safeguards
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Symmetrization of any matrix is symmetric.
    #[test]
    fn symmetrize_output_symmetric(values in prop::collection::vec(-10.0..10.0f64, 9)) {
        let m = DMatrix::from_column_slice(3, 3, &values);
        let s = symmetrize(&m);
        for i in 0..3 {
            for j in 0..3 {
                prop_assert!(approx_eq(s[(i, j)], s[(j, i)], TOL));
            }
        }
    }

    /// solve_spd on a generated PSD matrix recovers the solution.
    #[test]
    fn solve_spd_recovers_solution(
        factor in prop::collection::vec(-2.0..2.0f64, 9),
        rhs in prop::collection::vec(-5.0..5.0f64, 3),
    ) {
        let s = psd_from_factor(&factor, 3);
        let x_true = DMatrix::from_column_slice(3, 1, &rhs);
        let b = &s * &x_true;
        let out = solve_spd(&s, &b).expect("PSD solve should not fail");
        let err = (&s * &out.solution - &b).norm();
        prop_assert!(err < 1e-6 * (1.0 + b.norm()), "residual {}", err);
    }
}

// ============================================================================
// Matrix exponential and discretization
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// exp(A)·exp(-A) = I for any square A of moderate norm.
    #[test]
    fn expm_inverse_law(values in prop::collection::vec(-1.5..1.5f64, 9)) {
        let a = DMatrix::from_column_slice(3, 3, &values);
        let e = expm(&a);
        let e_neg = expm(&(-&a));
        let prod = &e * &e_neg;
        let err = (&prod - DMatrix::identity(3, 3)).norm();
        prop_assert!(err < 1e-8, "||exp(A)exp(-A) - I|| = {}", err);
    }

    /// Discretized noise stays symmetric PSD for stable dynamics.
    #[test]
    fn van_loan_noise_psd(
        values in prop::collection::vec(-1.0..1.0f64, 9),
        q_diag in prop::collection::vec(0.01..1.0f64, 3),
        dt in 0.0..3.0f64,
    ) {
        // Shift dynamics toward stability so the integral stays bounded.
        let a = DMatrix::from_column_slice(3, 3, &values) - DMatrix::identity(3, 3) * 1.5;
        let q = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(q_diag));
        let (a_d, q_d) = van_loan_discretize(&a, &q, dt);
        prop_assert!(a_d.iter().all(|v| v.is_finite()));
        let sym_err = (&q_d - q_d.transpose()).norm();
        prop_assert!(sym_err < 1e-12, "asymmetry {}", sym_err);
        // PSD up to a numerical floor.
        let floored = &q_d + DMatrix::identity(3, 3) * 1e-9;
        prop_assert!(is_positive_definite(&floored));
    }

    /// dt = 0 is exactly the identity / zero pair.
    #[test]
    fn van_loan_zero_gap_exact(values in prop::collection::vec(-5.0..5.0f64, 4)) {
        let a = DMatrix::from_column_slice(2, 2, &values);
        let q = DMatrix::identity(2, 2);
        let (a_d, q_d) = van_loan_discretize(&a, &q, 0.0);
        prop_assert_eq!(a_d, DMatrix::identity(2, 2));
        prop_assert_eq!(q_d, DMatrix::zeros(2, 2));
    }
}
