//! Positive-semidefiniteness safeguards for covariance matrices.
//!
//! Recursive covariance propagation loses symmetry and positive
//! definiteness through floating-point round-off. The guards here restore
//! validity locally: symmetrization after every propagation, an eigenvalue
//! floor when a Cholesky probe fails, and Cholesky solves with escalating
//! diagonal jitter instead of explicit inversion.

use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::DMatrix;
use thiserror::Error;

/// Base jitter added to the diagonal on the first retry, scaled by the
/// mean diagonal magnitude of the matrix.
pub const JITTER_BASE: f64 = 1e-9;

/// Largest jitter scale attempted before giving up.
pub const JITTER_CEILING: f64 = 1e-3;

/// Default eigenvalue floor for covariance repair.
pub const EIGENVALUE_FLOOR: f64 = 1e-10;

/// Errors from matrix decompositions.
#[derive(Debug, Error)]
pub enum MathError {
    #[error("matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },

    #[error("dimension mismatch: lhs is {lhs}x{lhs}, rhs has {rhs} rows")]
    DimensionMismatch { lhs: usize, rhs: usize },

    #[error("matrix not positive definite after jitter up to {max_jitter:e}")]
    Singular { max_jitter: f64 },
}

/// Returns the symmetric part (M + Mᵀ)/2.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Whether a symmetric matrix admits a Cholesky factorization.
pub fn is_positive_definite(m: &DMatrix<f64>) -> bool {
    Cholesky::new(m.clone()).is_some()
}

/// Clamps the eigenvalues of a symmetric matrix to at least `floor`.
///
/// The input is symmetrized first so the eigendecomposition is real.
pub fn clamp_eigenvalues(m: &DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    let sym = symmetrize(m);
    let eigen = SymmetricEigen::new(sym);
    let clamped = eigen.eigenvalues.map(|l| l.max(floor));
    let v = &eigen.eigenvectors;
    v * DMatrix::from_diagonal(&clamped) * v.transpose()
}

/// Result of a regularized symmetric positive-definite solve.
#[derive(Debug, Clone)]
pub struct SpdSolve {
    /// Solution X of S X = B.
    pub solution: DMatrix<f64>,
    /// Diagonal jitter that was required, 0.0 if the factorization
    /// succeeded on the first attempt.
    pub jitter: f64,
    /// log det S of the (possibly regularized) matrix, from the Cholesky
    /// factor.
    pub log_det: f64,
}

fn chol_log_det(chol: &Cholesky<f64, nalgebra::Dyn>) -> f64 {
    let l = chol.l_dirty();
    let mut acc = 0.0;
    for i in 0..l.nrows() {
        acc += l[(i, i)].ln();
    }
    2.0 * acc
}

/// Solves S X = B for symmetric positive-definite S via Cholesky.
///
/// If the factorization fails, a diagonal jitter scaled to the matrix
/// magnitude is added and escalated by decades from [`JITTER_BASE`] to
/// [`JITTER_CEILING`]. The jitter actually used is reported so callers can
/// count guard activations. Fails only when the ceiling is exhausted.
pub fn solve_spd(s: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<SpdSolve, MathError> {
    if s.nrows() != s.ncols() {
        return Err(MathError::NotSquare {
            rows: s.nrows(),
            cols: s.ncols(),
        });
    }
    if s.nrows() != b.nrows() {
        return Err(MathError::DimensionMismatch {
            lhs: s.nrows(),
            rhs: b.nrows(),
        });
    }

    if let Some(chol) = Cholesky::new(s.clone()) {
        return Ok(SpdSolve {
            solution: chol.solve(b),
            jitter: 0.0,
            log_det: chol_log_det(&chol),
        });
    }

    let n = s.nrows() as f64;
    let scale = (s.diagonal().iter().map(|d| d.abs()).sum::<f64>() / n).max(1.0);
    let mut jitter = JITTER_BASE;
    while jitter <= JITTER_CEILING {
        let mut regularized = s.clone();
        for i in 0..s.nrows() {
            regularized[(i, i)] += jitter * scale;
        }
        if let Some(chol) = Cholesky::new(regularized) {
            return Ok(SpdSolve {
                solution: chol.solve(b),
                jitter: jitter * scale,
                log_det: chol_log_det(&chol),
            });
        }
        jitter *= 10.0;
    }

    Err(MathError::Singular {
        max_jitter: JITTER_CEILING * scale,
    })
}
