//! Time-embedding networks for neural-flow components.
//!
//! Every embedding satisfies `φ(0) = 0`, which is what makes a residual
//! flow block the identity at `t = 0`. Selection goes through an explicit
//! name registry validated at construction.

use nalgebra::DVector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from time-net construction.
#[derive(Debug, Error)]
pub enum TimeNetError {
    #[error("unknown time net: {name:?} (known: tanh, linear, log)")]
    UnknownTimeNet { name: String },

    #[error("time net dimension must be positive")]
    ZeroDimension,
}

/// The embedding family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeNetKind {
    /// `w ⊙ tanh(s · t)`, a bounded embedding.
    Tanh,
    /// `w · t`, an unbounded linear embedding.
    Linear,
    /// `w · ln(1 + t)`, a slow-growing embedding for long horizons.
    Log,
}

impl TimeNetKind {
    /// Resolves a kind by registry name.
    pub fn from_name(name: &str) -> Result<Self, TimeNetError> {
        match name {
            "tanh" => Ok(TimeNetKind::Tanh),
            "linear" => Ok(TimeNetKind::Linear),
            "log" => Ok(TimeNetKind::Log),
            other => Err(TimeNetError::UnknownTimeNet {
                name: other.to_string(),
            }),
        }
    }

    /// Canonical registry name.
    pub fn name(&self) -> &'static str {
        match self {
            TimeNetKind::Tanh => "tanh",
            TimeNetKind::Linear => "linear",
            TimeNetKind::Log => "log",
        }
    }
}

/// A learned per-dimension time embedding `φ(t)`.
#[derive(Debug, Clone)]
pub struct TimeNet {
    kind: TimeNetKind,
    /// Per-dimension output weight.
    weight: DVector<f64>,
    /// Per-dimension rate, used by the tanh embedding.
    rate: DVector<f64>,
}

impl TimeNet {
    /// Builds an embedding of the given output dimension. Weights start
    /// small and bounded so residual blocks begin near the identity.
    pub fn new<R: Rng>(kind: TimeNetKind, dim: usize, rng: &mut R) -> Result<Self, TimeNetError> {
        if dim == 0 {
            return Err(TimeNetError::ZeroDimension);
        }
        let weight = DVector::from_fn(dim, |_, _| rng.random_range(-0.5..0.5));
        let rate = DVector::from_element(dim, 1.0);
        Ok(Self { kind, weight, rate })
    }

    pub fn kind(&self) -> TimeNetKind {
        self.kind
    }

    pub fn dim(&self) -> usize {
        self.weight.len()
    }

    /// Largest absolute output over all `t`, used for contraction budgets.
    /// Unbounded embeddings report the magnitude at `t = 1`.
    pub fn amplitude(&self) -> f64 {
        self.weight.iter().map(|w| w.abs()).fold(0.0, f64::max)
    }

    /// Evaluates `φ(t)`.
    pub fn embed(&self, t: f64) -> DVector<f64> {
        match self.kind {
            TimeNetKind::Tanh => DVector::from_fn(self.dim(), |i, _| {
                self.weight[i] * (self.rate[i] * t).tanh()
            }),
            TimeNetKind::Linear => &self.weight * t,
            TimeNetKind::Log => &self.weight * t.ln_1p(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn registry_round_trip() {
        for name in ["tanh", "linear", "log"] {
            let kind = TimeNetKind::from_name(name).unwrap();
            assert_eq!(kind.name(), name);
        }
    }

    #[test]
    fn registry_unknown_name() {
        let err = TimeNetKind::from_name("fourier").unwrap_err();
        assert!(err.to_string().contains("fourier"));
    }

    #[test]
    fn all_kinds_vanish_at_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        for kind in [TimeNetKind::Tanh, TimeNetKind::Linear, TimeNetKind::Log] {
            let net = TimeNet::new(kind, 4, &mut rng).unwrap();
            let phi = net.embed(0.0);
            assert!(
                phi.iter().all(|v| *v == 0.0),
                "{} embedding nonzero at t=0",
                kind.name()
            );
        }
    }

    #[test]
    fn tanh_embedding_is_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let net = TimeNet::new(TimeNetKind::Tanh, 4, &mut rng).unwrap();
        let amp = net.amplitude();
        for t in [0.1, 1.0, 10.0, 1e6] {
            let phi = net.embed(t);
            assert!(phi.iter().all(|v| v.abs() <= amp + 1e-12));
        }
    }

    #[test]
    fn zero_dim_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(TimeNet::new(TimeNetKind::Linear, 0, &mut rng).is_err());
    }
}
