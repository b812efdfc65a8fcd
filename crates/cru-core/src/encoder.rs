//! Observation encoders: raw per-step features to filter observation
//! space.
//!
//! Encoders are pure per-step functions (no temporal state) satisfying
//! the shape contract `[T, input_dim] -> [T, obs_dim]`, and emit both an
//! observation mean and a positive per-dimension observation variance.
//! The variance feeds the update step as the diagonal of `R`, so the
//! encoder's confidence directly weights each observation.

use nalgebra::DMatrix;
use rand::Rng;
use tracing::debug;

use cru_flows::{Activation, LayerNorm, Linear, Mlp};
use cru_math::softplus;

use crate::error::{Error, Result};

/// Floor on emitted observation variances.
const VAR_FLOOR: f64 = 1e-6;

/// Encoded observations for one sequence.
#[derive(Debug, Clone)]
pub struct EncodedObservations {
    /// Observation-space means, `T × obs_dim`.
    pub means: DMatrix<f64>,
    /// Strictly positive observation variances, `T × obs_dim`.
    pub variances: DMatrix<f64>,
}

/// Per-step observation encoder.
pub trait ObservationEncoder {
    /// Raw feature width consumed per step.
    fn input_dim(&self) -> usize;

    /// Observation-space width produced per step.
    fn obs_dim(&self) -> usize;

    /// Encodes a `T × input_dim` block of raw observations.
    fn encode(&self, raw: &DMatrix<f64>) -> Result<EncodedObservations>;
}

/// Applies the two heads shared by all encoder variants.
fn emit_heads(
    hidden: &DMatrix<f64>,
    mean_head: &Linear,
    var_head: &Linear,
) -> EncodedObservations {
    let means = mean_head.forward(hidden);
    let mut variances = var_head.forward(hidden);
    for v in variances.iter_mut() {
        *v = softplus(*v) + VAR_FLOOR;
    }
    EncodedObservations { means, variances }
}

/// Feature-vector encoder: a stack of Linear + ReLU + LayerNorm blocks
/// followed by the mean and variance heads.
#[derive(Debug)]
pub struct MlpEncoder {
    input_dim: usize,
    obs_dim: usize,
    blocks: Vec<(Linear, LayerNorm)>,
    mean_head: Linear,
    var_head: Linear,
}

impl MlpEncoder {
    pub fn new<R: Rng>(
        input_dim: usize,
        hidden_units: usize,
        obs_dim: usize,
        num_blocks: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if input_dim == 0 || hidden_units == 0 || obs_dim == 0 || num_blocks == 0 {
            return Err(Error::InvalidValue {
                field: "encoder dims",
                message: "all encoder dimensions must be positive".to_string(),
            });
        }
        let mut blocks = Vec::with_capacity(num_blocks);
        let mut width = input_dim;
        for _ in 0..num_blocks {
            blocks.push((Linear::new(width, hidden_units, rng), LayerNorm::new(hidden_units)));
            width = hidden_units;
        }
        Ok(Self {
            input_dim,
            obs_dim,
            blocks,
            mean_head: Linear::new(hidden_units, obs_dim, rng),
            var_head: Linear::new(hidden_units, obs_dim, rng),
        })
    }
}

impl ObservationEncoder for MlpEncoder {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn encode(&self, raw: &DMatrix<f64>) -> Result<EncodedObservations> {
        if raw.ncols() != self.input_dim {
            return Err(Error::ShapeMismatch {
                what: "encoder input width",
                expected: self.input_dim,
                got: raw.ncols(),
            });
        }
        let mut hidden = raw.clone();
        for (linear, norm) in &self.blocks {
            hidden = linear.forward(&hidden);
            Activation::Relu.apply_matrix(&mut hidden);
            hidden = norm.forward(&hidden);
        }
        Ok(emit_heads(&hidden, &self.mean_head, &self.var_head))
    }
}

/// Image encoder for flattened grayscale frames. The internal topology
/// is out of contract; only the shape contract binds.
#[derive(Debug)]
pub struct ImageEncoder {
    input_dim: usize,
    obs_dim: usize,
    net: Mlp,
    mean_head: Linear,
    var_head: Linear,
}

impl ImageEncoder {
    /// Feature width after the hidden stack, matching the original
    /// pendulum encoder's output width.
    const FEATURE_DIM: usize = 30;

    pub fn new<R: Rng>(
        input_dim: usize,
        hidden_units: usize,
        obs_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if input_dim == 0 || hidden_units == 0 || obs_dim == 0 {
            return Err(Error::InvalidValue {
                field: "encoder dims",
                message: "all encoder dimensions must be positive".to_string(),
            });
        }
        let net = Mlp::new(
            input_dim,
            &[hidden_units, hidden_units],
            Self::FEATURE_DIM,
            Activation::Relu,
            Some(Activation::Relu),
            rng,
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        debug!(input_dim, feature_dim = Self::FEATURE_DIM, "built image encoder");
        Ok(Self {
            input_dim,
            obs_dim,
            net,
            mean_head: Linear::new(Self::FEATURE_DIM, obs_dim, rng),
            var_head: Linear::new(Self::FEATURE_DIM, obs_dim, rng),
        })
    }
}

impl ObservationEncoder for ImageEncoder {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    fn encode(&self, raw: &DMatrix<f64>) -> Result<EncodedObservations> {
        if raw.ncols() != self.input_dim {
            return Err(Error::ShapeMismatch {
                what: "encoder input width",
                expected: self.input_dim,
                got: raw.ncols(),
            });
        }
        let hidden = self.net.forward(raw);
        Ok(emit_heads(&hidden, &self.mean_head, &self.var_head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn mlp_encoder_shapes_and_positive_variance() {
        let mut rng = StdRng::seed_from_u64(31);
        let enc = MlpEncoder::new(5, 16, 4, 3, &mut rng).unwrap();
        let raw = DMatrix::from_fn(7, 5, |i, j| (i + j) as f64 * 0.1);
        let out = enc.encode(&raw).unwrap();
        assert_eq!(out.means.shape(), (7, 4));
        assert_eq!(out.variances.shape(), (7, 4));
        assert!(out.variances.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn image_encoder_shapes() {
        let mut rng = StdRng::seed_from_u64(31);
        let enc = ImageEncoder::new(576, 32, 15, &mut rng).unwrap();
        let raw = DMatrix::from_element(2, 576, 0.5);
        let out = enc.encode(&raw).unwrap();
        assert_eq!(out.means.shape(), (2, 15));
        assert!(out.variances.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn encoder_is_stateless_across_steps() {
        // Identical rows must encode identically regardless of position.
        let mut rng = StdRng::seed_from_u64(31);
        let enc = MlpEncoder::new(3, 8, 2, 2, &mut rng).unwrap();
        let raw = DMatrix::from_row_slice(2, 3, &[0.1, 0.2, 0.3, 0.1, 0.2, 0.3]);
        let out = enc.encode(&raw).unwrap();
        assert_eq!(out.means.row(0), out.means.row(1));
        assert_eq!(out.variances.row(0), out.variances.row(1));
    }

    #[test]
    fn wrong_input_width_rejected() {
        let mut rng = StdRng::seed_from_u64(31);
        let enc = MlpEncoder::new(5, 16, 4, 3, &mut rng).unwrap();
        let raw = DMatrix::zeros(2, 4);
        assert!(matches!(
            enc.encode(&raw),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn zero_dims_rejected() {
        let mut rng = StdRng::seed_from_u64(31);
        assert!(MlpEncoder::new(0, 16, 4, 3, &mut rng).is_err());
        assert!(ImageEncoder::new(576, 0, 15, &mut rng).is_err());
    }
}
