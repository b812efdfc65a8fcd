//! Elementwise affine flow `y = a ⊙ x + b`.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use thiserror::Error;

use crate::transform::Transform;

/// Errors from affine construction.
#[derive(Debug, Error)]
pub enum AffineError {
    #[error("scale must be strictly positive, entry {index} is {value}")]
    NonPositiveScale { index: usize, value: f64 },

    #[error("scale has {scale} entries, shift has {shift}")]
    DimensionMismatch { scale: usize, shift: usize },

    #[error("affine dimension must be positive")]
    ZeroDimension,
}

/// How the affine coefficients are obtained.
///
/// Decided once at construction; forward passes only match on the
/// variant, they never re-decide the parameterization.
#[derive(Debug, Clone)]
pub enum AffineParams {
    /// Coefficients supplied by the caller and held constant.
    Fixed {
        log_scale: DVector<f64>,
        shift: DVector<f64>,
    },
    /// Free parameters, Xavier-initialized at construction and owned by
    /// an external optimizer between passes.
    Learned {
        log_scale: DVector<f64>,
        shift: DVector<f64>,
    },
}

impl AffineParams {
    fn log_scale(&self) -> &DVector<f64> {
        match self {
            AffineParams::Fixed { log_scale, .. } => log_scale,
            AffineParams::Learned { log_scale, .. } => log_scale,
        }
    }

    fn shift(&self) -> &DVector<f64> {
        match self {
            AffineParams::Fixed { shift, .. } => shift,
            AffineParams::Learned { shift, .. } => shift,
        }
    }
}

/// Elementwise affine transform. Time-invariant: it ignores the
/// conditioning time and is therefore not a neural-flow component.
#[derive(Debug, Clone)]
pub struct Affine {
    params: AffineParams,
}

impl Affine {
    /// Learned parameterization with free coefficients.
    pub fn learned<R: Rng>(dim: usize, rng: &mut R) -> Result<Self, AffineError> {
        if dim == 0 {
            return Err(AffineError::ZeroDimension);
        }
        let limit = (6.0 / (1 + dim) as f64).sqrt();
        let log_scale = DVector::from_fn(dim, |_, _| rng.random_range(-limit..limit));
        let shift = DVector::from_fn(dim, |_, _| rng.random_range(-limit..limit));
        Ok(Self {
            params: AffineParams::Learned { log_scale, shift },
        })
    }

    /// Fixed parameterization from given positive scales and shifts.
    pub fn fixed(scale: DVector<f64>, shift: DVector<f64>) -> Result<Self, AffineError> {
        if scale.is_empty() {
            return Err(AffineError::ZeroDimension);
        }
        if scale.len() != shift.len() {
            return Err(AffineError::DimensionMismatch {
                scale: scale.len(),
                shift: shift.len(),
            });
        }
        for (index, value) in scale.iter().enumerate() {
            if *value <= 0.0 || !value.is_finite() {
                return Err(AffineError::NonPositiveScale {
                    index,
                    value: *value,
                });
            }
        }
        let log_scale = scale.map(f64::ln);
        Ok(Self {
            params: AffineParams::Fixed { log_scale, shift },
        })
    }

    pub fn params(&self) -> &AffineParams {
        &self.params
    }
}

impl Transform for Affine {
    fn dim(&self) -> usize {
        self.params.log_scale().len()
    }

    fn forward(&self, x: &DMatrix<f64>, _t: f64) -> DMatrix<f64> {
        let log_scale = self.params.log_scale();
        let shift = self.params.shift();
        let mut out = x.clone();
        for mut row in out.row_iter_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = *v * log_scale[j].exp() + shift[j];
            }
        }
        out
    }

    fn inverse(&self, y: &DMatrix<f64>, _t: f64) -> DMatrix<f64> {
        let log_scale = self.params.log_scale();
        let shift = self.params.shift();
        let mut out = y.clone();
        for mut row in out.row_iter_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - shift[j]) * (-log_scale[j]).exp();
            }
        }
        out
    }

    fn log_det_jacobian(&self, x: &DMatrix<f64>, _y: &DMatrix<f64>, _t: f64) -> DVector<f64> {
        let total: f64 = self.params.log_scale().iter().sum();
        DVector::from_element(x.nrows(), total)
    }
}
