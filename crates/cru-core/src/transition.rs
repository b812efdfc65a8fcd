//! Continuous-time transition model built from a learned basis blend.
//!
//! # Model
//!
//! The latent SDE's drift matrix is locally linear: a bank of `K` fixed
//! basis matrices is blended by input-dependent simplex weights,
//! ```text
//! α = softmax(G · mean)          (gate, learned linear projection)
//! A = Σ_k α_k · B_k              (effective continuous-time dynamics)
//! ```
//! so the dynamics vary smoothly with the current latent mean while each
//! step stays a linear-Gaussian propagation. The basis set is immutable
//! after construction; the gate and the diagonal diffusion intensities
//! are the learned parameters.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use cru_flows::Linear;
use cru_math::{inv_softplus, softplus, stable_softmax};

use crate::config::BasisKind;
use crate::error::{Error, Result};

/// Floor on diffusion intensities so process noise never vanishes.
const DIFFUSION_FLOOR: f64 = 1e-6;

/// An immutable bank of transition basis matrices.
#[derive(Debug, Clone)]
pub struct TransitionBasis {
    kind: BasisKind,
    matrices: Vec<DMatrix<f64>>,
    latent_dim: usize,
}

impl TransitionBasis {
    /// Dense bases: small random generators, so the blended dynamics
    /// start near the zero drift (discretizing to near-identity).
    pub fn dense<R: Rng>(num_basis: usize, latent_dim: usize, rng: &mut R) -> Result<Self> {
        Self::check_dims(num_basis, latent_dim)?;
        let scale = 0.1 / (latent_dim as f64).sqrt();
        let matrices = (0..num_basis)
            .map(|_| DMatrix::from_fn(latent_dim, latent_dim, |_, _| rng.random_range(-scale..scale)))
            .collect();
        Ok(Self {
            kind: BasisKind::Dense,
            matrices,
            latent_dim,
        })
    }

    /// Rotation-scale bases over the observed/memory split: each pair
    /// `(j, j + d/2)` carries a 2x2 block `[[a, b], [-b, a]]`, a damped
    /// oscillator with damping `a` and frequency `b`.
    pub fn locally_linear<R: Rng>(
        num_basis: usize,
        latent_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        Self::check_dims(num_basis, latent_dim)?;
        if latent_dim % 2 != 0 {
            return Err(Error::InvalidValue {
                field: "latent_dim",
                message: format!("locally-linear basis needs an even dim, got {}", latent_dim),
            });
        }
        let half = latent_dim / 2;
        let matrices = (0..num_basis)
            .map(|_| {
                let mut m = DMatrix::zeros(latent_dim, latent_dim);
                for j in 0..half {
                    // Bias damping negative so the blended dynamics lean stable.
                    let a = rng.random_range(-0.5..0.1);
                    let b = rng.random_range(-1.0..1.0);
                    m[(j, j)] = a;
                    m[(j + half, j + half)] = a;
                    m[(j, j + half)] = b;
                    m[(j + half, j)] = -b;
                }
                m
            })
            .collect();
        Ok(Self {
            kind: BasisKind::LocallyLinear,
            matrices,
            latent_dim,
        })
    }

    fn check_dims(num_basis: usize, latent_dim: usize) -> Result<()> {
        if num_basis == 0 {
            return Err(Error::InvalidValue {
                field: "num_basis",
                message: "must be at least 1".to_string(),
            });
        }
        if latent_dim == 0 {
            return Err(Error::InvalidValue {
                field: "latent_dim",
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn kind(&self) -> BasisKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Linear blend `Σ_k coeffs[k] · B_k`.
    pub fn blend(&self, coeffs: &[f64]) -> DMatrix<f64> {
        debug_assert_eq!(coeffs.len(), self.matrices.len());
        let mut out = DMatrix::zeros(self.latent_dim, self.latent_dim);
        for (c, b) in coeffs.iter().zip(&self.matrices) {
            out += b * *c;
        }
        out
    }
}

/// Learned gating over a transition basis plus diffusion intensities.
#[derive(Debug)]
pub struct BasisTransitionModel {
    basis: TransitionBasis,
    gate: Linear,
    /// Pre-activation diffusion parameters; softplus maps them to the
    /// positive diagonal of the continuous-time noise Q.
    raw_diffusion: DVector<f64>,
}

impl BasisTransitionModel {
    pub fn new<R: Rng>(basis: TransitionBasis, initial_diffusion: f64, rng: &mut R) -> Result<Self> {
        if !(initial_diffusion > 0.0) {
            return Err(Error::InvalidValue {
                field: "initial_diffusion",
                message: format!("must be positive, got {}", initial_diffusion),
            });
        }
        let gate = Linear::new(basis.latent_dim(), basis.len(), rng);
        let raw = inv_softplus(initial_diffusion);
        let raw_diffusion = DVector::from_element(basis.latent_dim(), raw);
        Ok(Self {
            basis,
            gate,
            raw_diffusion,
        })
    }

    pub fn latent_dim(&self) -> usize {
        self.basis.latent_dim()
    }

    pub fn num_basis(&self) -> usize {
        self.basis.len()
    }

    pub fn kind(&self) -> BasisKind {
        self.basis.kind()
    }

    /// Simplex coefficients over the basis, conditioned on the latent
    /// mean. The stable softmax guarantees non-negativity and unit sum
    /// even for extreme gate outputs.
    pub fn coefficients(&self, mean: &DVector<f64>) -> Vec<f64> {
        let row = DMatrix::from_row_slice(1, mean.len(), mean.as_slice());
        let logits = self.gate.forward(&row);
        let coeffs = stable_softmax(logits.row(0).transpose().as_slice());
        debug_assert!(
            (coeffs.iter().sum::<f64>() - 1.0).abs() < 1e-9,
            "gate output left the simplex"
        );
        coeffs
    }

    /// Effective continuous-time dynamics at the given latent mean.
    pub fn dynamics(&self, mean: &DVector<f64>) -> DMatrix<f64> {
        let coeffs = self.coefficients(mean);
        self.basis.blend(&coeffs)
    }

    /// Positive diagonal of the continuous-time process noise.
    pub fn diffusion(&self) -> DVector<f64> {
        self.raw_diffusion
            .map(|r| softplus(r).max(DIFFUSION_FLOOR))
    }
}
