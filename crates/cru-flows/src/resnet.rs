//! Residual flow blocks: invertible maps `y = x + φ(t) ⊙ g([x, t])`.
//!
//! The residual net `g` is spectrally rescaled at construction so that,
//! together with the time embedding's amplitude, the residual map is a
//! contraction in `x`. That makes each block invertible, with the inverse
//! computed by fixed-point iteration. `φ(0) = 0` makes every block the
//! identity at `t = 0`, so a stack of blocks is a neural flow.
//!
//! The Jacobian determinant of a residual block has no closed form, so
//! this family does not implement [`crate::Transform`].

use nalgebra::DMatrix;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

use crate::net::mlp::{Activation, Mlp, NetError};
use crate::net::time_net::{TimeNet, TimeNetError, TimeNetKind};

/// Contraction budget for the residual map: Lip(g) · max|φ| stays below
/// this, guaranteeing fixed-point convergence.
const CONTRACTION: f64 = 0.9;

/// Convergence tolerance for the fixed-point inverse (max-norm step).
const INVERSE_TOL: f64 = 1e-10;

/// Iteration cap for the fixed-point inverse.
const INVERSE_MAX_ITERS: usize = 100;

/// Errors from residual flow construction.
#[derive(Debug, Error)]
pub enum ResNetError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    TimeNet(#[from] TimeNetError),

    #[error("residual flow needs at least one block")]
    NoBlocks,
}

/// One invertible residual block.
#[derive(Debug, Clone)]
pub struct ResNetBlock {
    dim: usize,
    net: Mlp,
    time_net: TimeNet,
}

impl ResNetBlock {
    pub fn new<R: Rng>(
        dim: usize,
        hidden_dims: &[usize],
        activation: Activation,
        time_kind: TimeNetKind,
        rng: &mut R,
    ) -> Result<Self, ResNetError> {
        let mut net = Mlp::new(dim + 1, hidden_dims, dim, activation, None, rng)?;
        let time_net = TimeNet::new(time_kind, dim, rng)?;
        let amplitude = time_net.amplitude().max(1e-6);
        net.lipschitz_rescale(CONTRACTION / amplitude);
        Ok(Self { dim, net, time_net })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Residual term `φ(t) ⊙ g([x, t])` for every row of `x`.
    fn residual(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        let n = x.nrows();
        let mut input = DMatrix::zeros(n, self.dim + 1);
        input.view_mut((0, 0), (n, self.dim)).copy_from(x);
        input.column_mut(self.dim).fill(t);

        let mut g = self.net.forward(&input);
        let phi = self.time_net.embed(t);
        for mut row in g.row_iter_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v *= phi[j];
            }
        }
        g
    }

    pub fn forward(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        x + self.residual(x, t)
    }

    /// Fixed-point inverse: iterate `x ← y − r(x, t)` until the step is
    /// below tolerance or the iteration cap is hit.
    pub fn inverse(&self, y: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        let mut x = y.clone();
        let mut step = f64::INFINITY;
        for _ in 0..INVERSE_MAX_ITERS {
            let next = y - self.residual(&x, t);
            step = (&next - &x).amax();
            x = next;
            if step < INVERSE_TOL {
                return x;
            }
        }
        warn!(
            residual = step,
            max_iters = INVERSE_MAX_ITERS,
            "fixed-point inverse hit iteration cap before tolerance"
        );
        x
    }
}

/// A stack of residual blocks, inverted in reverse order.
#[derive(Debug, Clone)]
pub struct ResNetFlow {
    blocks: Vec<ResNetBlock>,
}

impl ResNetFlow {
    pub fn new<R: Rng>(
        dim: usize,
        num_blocks: usize,
        hidden_dims: &[usize],
        activation: Activation,
        time_kind: TimeNetKind,
        rng: &mut R,
    ) -> Result<Self, ResNetError> {
        if num_blocks == 0 {
            return Err(ResNetError::NoBlocks);
        }
        let blocks = (0..num_blocks)
            .map(|_| ResNetBlock::new(dim, hidden_dims, activation, time_kind, rng))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { blocks })
    }

    pub fn dim(&self) -> usize {
        self.blocks[0].dim()
    }

    pub fn forward(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        let mut out = x.clone();
        for block in &self.blocks {
            out = block.forward(&out, t);
        }
        out
    }

    pub fn inverse(&self, y: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        let mut out = y.clone();
        for block in self.blocks.iter().rev() {
            out = block.inverse(&out, t);
        }
        out
    }

    /// Per-row drift `F(x, t) − x`, useful as a diffusion-style vector
    /// field readout.
    pub fn displacement(&self, x: &DMatrix<f64>, t: f64) -> DMatrix<f64> {
        self.forward(x, t) - x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn flow(dim: usize, blocks: usize) -> ResNetFlow {
        let mut rng = StdRng::seed_from_u64(17);
        ResNetFlow::new(
            dim,
            blocks,
            &[16, 16],
            Activation::Tanh,
            TimeNetKind::Tanh,
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn identity_at_zero_time() {
        let f = flow(3, 2);
        let x = DMatrix::from_row_slice(2, 3, &[0.4, -1.0, 2.0, 0.0, 0.3, -0.7]);
        let y = f.forward(&x, 0.0);
        assert!((&y - &x).norm() < 1e-12);
    }

    #[test]
    fn fixed_point_inverse_round_trip() {
        let f = flow(3, 2);
        let x = DMatrix::from_row_slice(2, 3, &[0.4, -1.0, 2.0, 0.0, 0.3, -0.7]);
        for t in [0.1, 0.5, 2.0] {
            let y = f.forward(&x, t);
            let back = f.inverse(&y, t);
            assert!(
                (&back - &x).amax() < 1e-6,
                "round trip at t={} err={}",
                t,
                (&back - &x).amax()
            );
        }
    }

    #[test]
    fn blocks_are_contractive() {
        let mut rng = StdRng::seed_from_u64(17);
        let block = ResNetBlock::new(4, &[32], Activation::Tanh, TimeNetKind::Tanh, &mut rng)
            .unwrap();
        // Residual Lipschitz bound: net bound times embedding amplitude.
        let bound = block.net.lipschitz_bound() * block.time_net.amplitude();
        assert!(bound < 1.0, "residual bound {} not contractive", bound);
    }

    #[test]
    fn displacement_vanishes_at_zero() {
        let f = flow(2, 1);
        let x = DMatrix::from_row_slice(1, 2, &[1.0, -1.0]);
        let d = f.displacement(&x, 0.0);
        assert!(d.norm() < 1e-12);
    }

    #[test]
    fn zero_blocks_rejected() {
        let mut rng = StdRng::seed_from_u64(17);
        let err = ResNetFlow::new(2, 0, &[8], Activation::Relu, TimeNetKind::Linear, &mut rng);
        assert!(matches!(err, Err(ResNetError::NoBlocks)));
    }
}
