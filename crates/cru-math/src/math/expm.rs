//! Matrix exponential and continuous-time noise discretization.
//!
//! # Model
//!
//! A linear-Gaussian SDE `dx = A x dt + dw`, `w ~ N(0, Q dt)`, propagated
//! over a gap `dt` has the exact discrete form:
//! ```text
//! A_d = exp(A dt)
//! Q_d = ∫₀^dt exp(A s) Q exp(Aᵀ s) ds
//! ```
//! Both are computed jointly with Van Loan's block-matrix method:
//! ```text
//! M = [[-A, Q], [0, Aᵀ]] · dt
//! exp(M) = [[F1, G1], [0, F2]]   =>   A_d = F2ᵀ,  Q_d = F2ᵀ G1
//! ```

use nalgebra::DMatrix;

/// Maximum Taylor terms for the scaled exponential. At spectral scale
/// <= 0.5 the series converges to machine precision well before this.
const MAX_TERMS: usize = 24;

/// Series truncation threshold relative to the accumulated sum.
const TERM_EPS: f64 = 1e-16;

/// Matrix 1-norm (maximum absolute column sum).
fn one_norm(m: &DMatrix<f64>) -> f64 {
    m.column_iter()
        .map(|c| c.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Matrix exponential via scaling-and-squaring with a truncated Taylor
/// series.
///
/// Panics if the matrix is not square.
pub fn expm(a: &DMatrix<f64>) -> DMatrix<f64> {
    assert_eq!(a.nrows(), a.ncols(), "expm requires a square matrix");
    let n = a.nrows();

    let norm = one_norm(a);
    let squarings = if norm > 0.5 {
        (norm / 0.5).log2().ceil() as i32
    } else {
        0
    };
    let scaled = a / 2f64.powi(squarings);

    let mut term = DMatrix::identity(n, n);
    let mut sum = DMatrix::identity(n, n);
    for k in 1..=MAX_TERMS {
        term = (&term * &scaled) / k as f64;
        sum += &term;
        if one_norm(&term) <= TERM_EPS * one_norm(&sum) {
            break;
        }
    }

    for _ in 0..squarings {
        sum = &sum * &sum;
    }
    sum
}

/// Discretizes continuous dynamics `A` and process noise `Q` over a gap.
///
/// Returns `(A_d, Q_d)`. The boundary `dt = 0` returns `(I, 0)` exactly,
/// without entering the series. `Q_d` is symmetrized before return.
///
/// `dt` must be non-negative; the caller owns that contract.
pub fn van_loan_discretize(
    a: &DMatrix<f64>,
    q: &DMatrix<f64>,
    dt: f64,
) -> (DMatrix<f64>, DMatrix<f64>) {
    assert_eq!(a.nrows(), a.ncols(), "dynamics matrix must be square");
    assert_eq!(a.nrows(), q.nrows(), "noise matrix must match dynamics");
    debug_assert!(dt >= 0.0, "negative time gap reached discretization");

    let d = a.nrows();
    if dt == 0.0 {
        return (DMatrix::identity(d, d), DMatrix::zeros(d, d));
    }

    let mut block = DMatrix::zeros(2 * d, 2 * d);
    block.view_mut((0, 0), (d, d)).copy_from(&(-a * dt));
    block.view_mut((0, d), (d, d)).copy_from(&(q * dt));
    block
        .view_mut((d, d), (d, d))
        .copy_from(&(a.transpose() * dt));

    let e = expm(&block);
    let g1 = e.view((0, d), (d, d)).into_owned();
    let f2 = e.view((d, d), (d, d)).into_owned();

    let a_d = f2.transpose();
    let q_d = &a_d * g1;
    let q_d = (&q_d + q_d.transpose()) * 0.5;
    (a_d, q_d)
}
