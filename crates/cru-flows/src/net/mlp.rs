//! Linear layers and multi-layer perceptrons.
//!
//! Parameters are plain `f64` tensors, Xavier-initialized once at
//! construction and read-only during forward passes; an external optimizer
//! owns updates between passes. Activation selection goes through an
//! explicit name registry validated at construction time rather than any
//! dynamic lookup at call time.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cru_math::softplus;

/// Errors from network construction.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("unknown activation: {name:?} (known: relu, tanh, softplus, elu, identity)")]
    UnknownActivation { name: String },

    #[error("invalid layer dimension: {0} must be positive")]
    InvalidDimension(&'static str),
}

/// Elementwise activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Identity,
    Relu,
    Tanh,
    Softplus,
    Elu,
}

impl Activation {
    /// Resolves an activation by name. Fails fast on unknown names so a
    /// bad configuration never reaches a forward pass.
    pub fn from_name(name: &str) -> Result<Self, NetError> {
        match name {
            "identity" => Ok(Activation::Identity),
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "softplus" => Ok(Activation::Softplus),
            "elu" => Ok(Activation::Elu),
            other => Err(NetError::UnknownActivation {
                name: other.to_string(),
            }),
        }
    }

    /// Canonical registry name.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Identity => "identity",
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Softplus => "softplus",
            Activation::Elu => "elu",
        }
    }

    /// Applies the activation to a scalar.
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Softplus => softplus(x),
            Activation::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp() - 1.0
                }
            }
        }
    }

    /// Applies the activation elementwise, in place.
    pub fn apply_matrix(&self, m: &mut DMatrix<f64>) {
        if *self == Activation::Identity {
            return;
        }
        for v in m.iter_mut() {
            *v = self.apply(*v);
        }
    }
}

/// A dense layer `y = x Wᵀ + b` applied row-wise.
#[derive(Debug, Clone)]
pub struct Linear {
    /// Weight matrix, `out_dim × in_dim`.
    weight: DMatrix<f64>,
    /// Bias, length `out_dim`.
    bias: DVector<f64>,
}

impl Linear {
    /// Xavier-uniform initialized layer.
    pub fn new<R: Rng>(in_dim: usize, out_dim: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let weight =
            DMatrix::from_fn(out_dim, in_dim, |_, _| rng.random_range(-limit..limit));
        let bias = DVector::from_fn(out_dim, |_, _| rng.random_range(-limit..limit));
        Self { weight, bias }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_dim(&self) -> usize {
        self.weight.nrows()
    }

    /// Zeroes the bias. The final layer of an [`Mlp`] starts unbiased.
    pub fn zero_bias(&mut self) {
        self.bias.fill(0.0);
    }

    /// Row-batched forward: `[n, in_dim] -> [n, out_dim]`.
    pub fn forward(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = x * self.weight.transpose();
        for mut row in out.row_iter_mut() {
            row += self.bias.transpose();
        }
        out
    }

    /// Largest singular value, estimated by power iteration.
    pub fn spectral_norm(&self) -> f64 {
        let wtw = self.weight.transpose() * &self.weight;
        let mut v = DVector::from_element(self.in_dim(), 1.0 / (self.in_dim() as f64).sqrt());
        let mut sigma_sq = 0.0;
        for _ in 0..20 {
            let next = &wtw * &v;
            let norm = next.norm();
            if norm == 0.0 {
                return 0.0;
            }
            v = next / norm;
            sigma_sq = norm;
        }
        sigma_sq.sqrt()
    }

    /// Scales the weight (not the bias) by `factor`.
    pub fn rescale(&mut self, factor: f64) {
        self.weight *= factor;
    }
}

/// Layer normalization over the feature axis with learned gain and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    gain: DVector<f64>,
    bias: DVector<f64>,
    eps: f64,
}

impl LayerNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            gain: DVector::from_element(dim, 1.0),
            bias: DVector::zeros(dim),
            eps: 1e-5,
        }
    }

    /// Normalizes each row to zero mean and unit variance, then applies
    /// the learned affine.
    pub fn forward(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let d = x.ncols() as f64;
        let mut out = x.clone();
        for mut row in out.row_iter_mut() {
            let mean = row.iter().sum::<f64>() / d;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / d;
            let denom = (var + self.eps).sqrt();
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - mean) / denom * self.gain[j] + self.bias[j];
            }
        }
        out
    }
}

/// Simple multi-layer perceptron.
///
/// Hidden layers share one activation; the output layer starts with a
/// zeroed bias and an optional final activation.
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Linear>,
    activation: Activation,
    final_activation: Option<Activation>,
}

impl Mlp {
    pub fn new<R: Rng>(
        in_dim: usize,
        hidden_dims: &[usize],
        out_dim: usize,
        activation: Activation,
        final_activation: Option<Activation>,
        rng: &mut R,
    ) -> Result<Self, NetError> {
        if in_dim == 0 {
            return Err(NetError::InvalidDimension("in_dim"));
        }
        if out_dim == 0 {
            return Err(NetError::InvalidDimension("out_dim"));
        }
        if hidden_dims.iter().any(|d| *d == 0) {
            return Err(NetError::InvalidDimension("hidden_dims"));
        }

        let mut dims = Vec::with_capacity(hidden_dims.len() + 2);
        dims.push(in_dim);
        dims.extend_from_slice(hidden_dims);
        dims.push(out_dim);

        let mut layers: Vec<Linear> = dims
            .windows(2)
            .map(|w| Linear::new(w[0], w[1], rng))
            .collect();
        if let Some(last) = layers.last_mut() {
            last.zero_bias();
        }

        Ok(Self {
            layers,
            activation,
            final_activation,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.layers.first().map(Linear::in_dim).unwrap_or(0)
    }

    pub fn out_dim(&self) -> usize {
        self.layers.last().map(Linear::out_dim).unwrap_or(0)
    }

    /// Row-batched forward: `[n, in_dim] -> [n, out_dim]`.
    pub fn forward(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let last = self.layers.len() - 1;
        let mut out = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out);
            if i < last {
                self.activation.apply_matrix(&mut out);
            } else if let Some(act) = self.final_activation {
                act.apply_matrix(&mut out);
            }
        }
        out
    }

    /// Rescales layer weights so the product of spectral norms is at most
    /// `target`. With 1-Lipschitz activations this bounds the Lipschitz
    /// constant of the whole network.
    pub fn lipschitz_rescale(&mut self, target: f64) {
        let n = self.layers.len() as f64;
        let per_layer = target.powf(1.0 / n);
        for layer in &mut self.layers {
            let sigma = layer.spectral_norm();
            if sigma > per_layer {
                layer.rescale(per_layer / sigma);
            }
        }
    }

    /// Product of layer spectral norms, an upper bound on the network's
    /// Lipschitz constant for 1-Lipschitz activations.
    pub fn lipschitz_bound(&self) -> f64 {
        self.layers.iter().map(Linear::spectral_norm).product()
    }
}
