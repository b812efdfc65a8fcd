//! Linear-exponential transform `y = exp(W t) x`.
//!
//! The solution map of the linear ODE `dx/dt = W x`. `W` is kept in the
//! factored form `W = P diag(λ) P⁻¹` with `P = L U`, where `L` and `U` are
//! unit-triangular factors derived from a single square parameter matrix.
//! Applying the transform therefore needs only triangular solves and an
//! elementwise `exp(λ t)`, and the log-determinant Jacobian is `t · Σ λ`.
//!
//! The identity at `t = 0` is exact: the zero gap returns the input
//! untouched.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::transform::Transform;

/// Time-conditioned invertible linear map with eigenvalues `λ`.
#[derive(Debug, Clone)]
pub struct LinearExponential {
    /// Packed strict-lower and strict-upper factors; the diagonal is
    /// ignored (both factors are unit-triangular).
    weight: DMatrix<f64>,
    /// Eigenvalues of the generator `W`.
    lambda: DVector<f64>,
}

impl LinearExponential {
    pub fn new<R: Rng>(dim: usize, rng: &mut R) -> Self {
        let limit = (3.0 / dim as f64).sqrt();
        let weight = DMatrix::from_fn(dim, dim, |_, _| rng.random_range(-limit..limit));
        let bound = 1.0 / (dim as f64).sqrt();
        let lambda = DVector::from_fn(dim, |_, _| rng.random_range(-bound..bound));
        Self { weight, lambda }
    }

    /// Unit-lower factor L.
    fn lower(&self) -> DMatrix<f64> {
        let d = self.weight.nrows();
        let mut l = DMatrix::identity(d, d);
        for i in 1..d {
            for j in 0..i {
                l[(i, j)] = self.weight[(i, j)];
            }
        }
        l
    }

    /// Unit-upper factor U.
    fn upper(&self) -> DMatrix<f64> {
        let d = self.weight.nrows();
        let mut u = DMatrix::identity(d, d);
        for i in 0..d {
            for j in (i + 1)..d {
                u[(i, j)] = self.weight[(i, j)];
            }
        }
        u
    }

    /// In-place solve of L z = v for unit-lower L, one column at a time.
    fn solve_unit_lower(&self, cols: &mut DMatrix<f64>) {
        let d = self.weight.nrows();
        for c in 0..cols.ncols() {
            for i in 1..d {
                let mut acc = cols[(i, c)];
                for j in 0..i {
                    acc -= self.weight[(i, j)] * cols[(j, c)];
                }
                cols[(i, c)] = acc;
            }
        }
    }

    /// In-place solve of U z = v for unit-upper U, one column at a time.
    fn solve_unit_upper(&self, cols: &mut DMatrix<f64>) {
        let d = self.weight.nrows();
        for c in 0..cols.ncols() {
            for i in (0..d).rev() {
                let mut acc = cols[(i, c)];
                for j in (i + 1)..d {
                    acc -= self.weight[(i, j)] * cols[(j, c)];
                }
                cols[(i, c)] = acc;
            }
        }
    }

    /// Applies `exp(W t)` to every row of `x`.
    fn apply(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        if t == 0.0 {
            return x.clone();
        }
        // Columns are samples: y = L U E U⁻¹ L⁻¹ x with E = diag(exp(λ t)).
        let mut cols = x.transpose();
        self.solve_unit_lower(&mut cols);
        self.solve_unit_upper(&mut cols);
        for (i, mut row) in cols.row_iter_mut().enumerate() {
            row *= (self.lambda[i] * t).exp();
        }
        let cols = self.lower() * (self.upper() * cols);
        cols.transpose()
    }
}

impl Transform for LinearExponential {
    fn dim(&self) -> usize {
        self.lambda.len()
    }

    fn forward(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        self.apply(x, t)
    }

    fn inverse(&self, y: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        self.apply(y, -t)
    }

    fn log_det_jacobian(&self, x: &DMatrix<f64>, _y: &DMatrix<f64>, t: f64) -> DVector<f64> {
        DVector::from_element(x.nrows(), self.lambda.sum() * t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn identity_at_zero_time_is_exact() {
        let mut rng = StdRng::seed_from_u64(5);
        let f = LinearExponential::new(4, &mut rng);
        let x = DMatrix::from_row_slice(2, 4, &[1.0, -2.0, 0.5, 3.0, 0.0, 1.0, 1.0, -1.0]);
        assert_eq!(f.forward(&x, 0.0), x);
    }

    #[test]
    fn round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        let f = LinearExponential::new(3, &mut rng);
        let x = DMatrix::from_row_slice(2, 3, &[0.1, 0.7, -0.9, 1.5, -0.3, 0.2]);
        for t in [0.25, 1.0, 2.5] {
            let y = f.forward(&x, t);
            let back = f.inverse(&y, t);
            assert!(
                (&back - &x).norm() < 1e-8,
                "round trip failed at t={}, err={}",
                t,
                (&back - &x).norm()
            );
        }
    }

    #[test]
    fn composition_in_time() {
        // exp(W (s+t)) = exp(W s) exp(W t): flowing 0.6 then 0.4 equals 1.0.
        let mut rng = StdRng::seed_from_u64(5);
        let f = LinearExponential::new(3, &mut rng);
        let x = DMatrix::from_row_slice(1, 3, &[1.0, 0.5, -0.25]);
        let one_step = f.forward(&x, 1.0);
        let two_step = f.forward(&f.forward(&x, 0.6), 0.4);
        assert!((&one_step - &two_step).norm() < 1e-9);
    }

    #[test]
    fn log_det_scales_linearly_in_time() {
        let mut rng = StdRng::seed_from_u64(5);
        let f = LinearExponential::new(3, &mut rng);
        let x = DMatrix::zeros(1, 3);
        let y = f.forward(&x, 2.0);
        let ldj1 = f.log_det_jacobian(&x, &y, 1.0)[0];
        let ldj2 = f.log_det_jacobian(&x, &y, 2.0)[0];
        assert!((ldj2 - 2.0 * ldj1).abs() < 1e-12);
    }
}
