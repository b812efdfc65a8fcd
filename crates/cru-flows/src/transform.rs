//! The invertible-transform contract and sequential composition.
//!
//! Batch convention: data is a `DMatrix<f64>` with one sample per row, and
//! log-determinants are returned per row as a `DVector<f64>`.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// An invertible transform with a tractable log-determinant Jacobian.
///
/// The algebraic laws every implementation must satisfy:
/// - `inverse(forward(x, t), t) == x` up to floating tolerance;
/// - `forward_and_log_det_jacobian` is consistent with `log_det_jacobian`
///   computed independently.
///
/// `t` is the conditioning time. Transforms usable as neural-flow
/// components additionally satisfy `forward(x, 0) == x`; time-invariant
/// density transforms ignore `t`.
pub trait Transform {
    /// Data dimensionality this transform operates on.
    fn dim(&self) -> usize;

    /// Applies the transform to each row of `x`.
    fn forward(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64>;

    /// Applies the inverse transform to each row of `y`.
    fn inverse(&self, y: &DMatrix<f64>, t: f64) -> DMatrix<f64>;

    /// Per-row log |det J| of the forward map at `x` (with `y = forward(x)`
    /// available to implementations that need it).
    fn log_det_jacobian(&self, x: &DMatrix<f64>, y: &DMatrix<f64>, t: f64) -> DVector<f64>;

    /// Forward pass returning the mapped rows and their log-dets.
    fn forward_and_log_det_jacobian(&self, x: &DMatrix<f64>, t: f64) -> (DMatrix<f64>, DVector<f64>) {
        let y = self.forward(x, t);
        let ldj = self.log_det_jacobian(x, &y, t);
        (y, ldj)
    }

    /// Inverse pass returning the recovered rows and the negated log-dets.
    fn inverse_and_log_det_jacobian(&self, y: &DMatrix<f64>, t: f64) -> (DMatrix<f64>, DVector<f64>) {
        let x = self.inverse(y, t);
        let ldj = self.log_det_jacobian(&x, y, t);
        (x, -ldj)
    }
}

/// Errors from chain construction.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain must contain at least one transform")]
    Empty,

    #[error("transform {index} has dim {got}, chain dim is {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
}

/// Sequential composition of transforms.
///
/// Log-determinants accumulate additively in forward order; inversion
/// traverses the members in reverse order and negates the accumulated
/// log-det.
pub struct Chain {
    transforms: Vec<Box<dyn Transform>>,
    dim: usize,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.transforms.len())
            .field("dim", &self.dim)
            .finish()
    }
}

impl Chain {
    /// Builds a chain, validating that all members share one data dim.
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Result<Self, ChainError> {
        let first = transforms.first().ok_or(ChainError::Empty)?;
        let dim = first.dim();
        for (index, t) in transforms.iter().enumerate() {
            if t.dim() != dim {
                return Err(ChainError::DimensionMismatch {
                    index,
                    expected: dim,
                    got: t.dim(),
                });
            }
        }
        Ok(Self { transforms, dim })
    }

    /// Number of member transforms.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether the chain has no members (never true for a built chain).
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl Transform for Chain {
    fn dim(&self) -> usize {
        self.dim
    }

    fn forward(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        let mut out = x.clone();
        for f in &self.transforms {
            out = f.forward(&out, t);
        }
        out
    }

    fn inverse(&self, y: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        let mut out = y.clone();
        for f in self.transforms.iter().rev() {
            out = f.inverse(&out, t);
        }
        out
    }

    fn log_det_jacobian(&self, x: &DMatrix<f64>, _y: &DMatrix<f64>, t: f64) -> DVector<f64> {
        let (_, ldj) = self.forward_and_log_det_jacobian(x, t);
        ldj
    }

    fn forward_and_log_det_jacobian(&self, x: &DMatrix<f64>, t: f64) -> (DMatrix<f64>, DVector<f64>) {
        let mut out = x.clone();
        let mut total = DVector::zeros(x.nrows());
        for f in &self.transforms {
            let (next, ldj) = f.forward_and_log_det_jacobian(&out, t);
            out = next;
            total += ldj;
        }
        (out, total)
    }

    fn inverse_and_log_det_jacobian(&self, y: &DMatrix<f64>, t: f64) -> (DMatrix<f64>, DVector<f64>) {
        let mut out = y.clone();
        let mut total = DVector::zeros(y.nrows());
        for f in self.transforms.iter().rev() {
            let (prev, ldj) = f.inverse_and_log_det_jacobian(&out, t);
            out = prev;
            total += ldj;
        }
        (out, total)
    }
}
