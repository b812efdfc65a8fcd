//! Latent decoders: belief trajectories to output distributions.
//!
//! Decoders map the filtered latent `(mean, covariance)` per step to the
//! parameters of an output distribution: Gaussian moments for regression
//! targets, Bernoulli logits for image reconstruction. The variance head
//! consumes both the latent mean and the covariance diagonal, so output
//! uncertainty reflects filter uncertainty. A decoder may wrap a flow
//! transform over its mean output as a black-box bijection; the flow is
//! conditioned on the step's timestamp and is the identity at `t = 0`.

use nalgebra::DMatrix;
use rand::Rng;

use cru_flows::{Activation, Mlp, Transform};
use cru_math::{logistic, softplus};

use crate::error::{Error, Result};

/// Floor on decoded output variances.
const VAR_FLOOR: f64 = 1e-6;

/// Distribution parameters emitted per time step.
#[derive(Debug, Clone)]
pub enum DecoderOutput {
    /// Gaussian moments, both `T × target_dim`. Variances are strictly
    /// positive.
    Gaussian {
        mean: DMatrix<f64>,
        variance: DMatrix<f64>,
    },
    /// Bernoulli logits, `T × target_dim`.
    Bernoulli { logits: DMatrix<f64> },
}

impl DecoderOutput {
    /// Number of decoded time steps.
    pub fn len(&self) -> usize {
        match self {
            DecoderOutput::Gaussian { mean, .. } => mean.nrows(),
            DecoderOutput::Bernoulli { logits } => logits.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bernoulli success probabilities, if this is a Bernoulli output.
    pub fn bernoulli_probabilities(&self) -> Option<DMatrix<f64>> {
        match self {
            DecoderOutput::Bernoulli { logits } => Some(logits.map(logistic)),
            DecoderOutput::Gaussian { .. } => None,
        }
    }
}

/// Per-sequence latent decoder.
pub trait LatentDecoder {
    /// Latent width consumed per step.
    fn latent_dim(&self) -> usize;

    /// Output width produced per step.
    fn output_dim(&self) -> usize;

    /// Decodes a trajectory: `means` is `T × latent_dim`, `covariances`
    /// holds one `latent_dim × latent_dim` matrix per step, `timestamps`
    /// condition any wrapped flow.
    fn decode(
        &self,
        means: &DMatrix<f64>,
        covariances: &[DMatrix<f64>],
        timestamps: &[f64],
    ) -> Result<DecoderOutput>;
}

fn check_shapes(
    latent_dim: usize,
    means: &DMatrix<f64>,
    covariances: &[DMatrix<f64>],
    timestamps: &[f64],
) -> Result<()> {
    if means.ncols() != latent_dim {
        return Err(Error::ShapeMismatch {
            what: "decoder latent width",
            expected: latent_dim,
            got: means.ncols(),
        });
    }
    if covariances.len() != means.nrows() {
        return Err(Error::ShapeMismatch {
            what: "decoder covariance count",
            expected: means.nrows(),
            got: covariances.len(),
        });
    }
    if timestamps.len() != means.nrows() {
        return Err(Error::ShapeMismatch {
            what: "decoder timestamp count",
            expected: means.nrows(),
            got: timestamps.len(),
        });
    }
    Ok(())
}

/// Gaussian-output decoder with separate mean and variance heads.
pub struct GaussianDecoder {
    latent_dim: usize,
    target_dim: usize,
    mean_net: Mlp,
    var_net: Mlp,
    /// Optional bijection over the mean output, timestamp-conditioned.
    flow: Option<Box<dyn Transform>>,
}

impl GaussianDecoder {
    pub fn new<R: Rng>(
        latent_dim: usize,
        hidden_units: usize,
        target_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let mean_net = Mlp::new(
            latent_dim,
            &[hidden_units],
            target_dim,
            Activation::Tanh,
            None,
            rng,
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        // The variance head sees the covariance diagonal alongside the mean.
        let var_net = Mlp::new(
            2 * latent_dim,
            &[hidden_units],
            target_dim,
            Activation::Tanh,
            None,
            rng,
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            latent_dim,
            target_dim,
            mean_net,
            var_net,
            flow: None,
        })
    }

    /// Wraps the mean head in a flow. The flow's dim must match the
    /// target dim.
    pub fn with_flow(mut self, flow: Box<dyn Transform>) -> Result<Self> {
        if flow.dim() != self.target_dim {
            return Err(Error::ShapeMismatch {
                what: "decoder flow dim",
                expected: self.target_dim,
                got: flow.dim(),
            });
        }
        self.flow = Some(flow);
        Ok(self)
    }
}

impl LatentDecoder for GaussianDecoder {
    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn output_dim(&self) -> usize {
        self.target_dim
    }

    fn decode(
        &self,
        means: &DMatrix<f64>,
        covariances: &[DMatrix<f64>],
        timestamps: &[f64],
    ) -> Result<DecoderOutput> {
        check_shapes(self.latent_dim, means, covariances, timestamps)?;
        let t_len = means.nrows();

        let mut mean = self.mean_net.forward(means);
        if let Some(flow) = &self.flow {
            for (i, &t) in timestamps.iter().enumerate() {
                let row = DMatrix::from_row_slice(
                    1,
                    self.target_dim,
                    mean.row(i).into_owned().as_slice(),
                );
                let mapped = flow.forward(&row, t);
                mean.row_mut(i).copy_from(&mapped.row(0));
            }
        }

        // Variance head input: [mean | cov diagonal] per step.
        let mut var_input = DMatrix::zeros(t_len, 2 * self.latent_dim);
        var_input
            .view_mut((0, 0), (t_len, self.latent_dim))
            .copy_from(means);
        for (i, cov) in covariances.iter().enumerate() {
            for j in 0..self.latent_dim {
                var_input[(i, self.latent_dim + j)] = cov[(j, j)];
            }
        }
        let mut variance = self.var_net.forward(&var_input);
        for v in variance.iter_mut() {
            *v = softplus(*v) + VAR_FLOOR;
        }
        debug_assert!(
            variance.iter().all(|v| *v > 0.0),
            "variance head emitted a non-positive value"
        );

        Ok(DecoderOutput::Gaussian { mean, variance })
    }
}

/// Bernoulli-output decoder emitting per-pixel logits.
pub struct BernoulliDecoder {
    latent_dim: usize,
    target_dim: usize,
    net: Mlp,
}

impl BernoulliDecoder {
    pub fn new<R: Rng>(
        latent_dim: usize,
        hidden_units: usize,
        target_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let net = Mlp::new(
            latent_dim,
            &[hidden_units, hidden_units],
            target_dim,
            Activation::Relu,
            None,
            rng,
        )
        .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            latent_dim,
            target_dim,
            net,
        })
    }
}

impl LatentDecoder for BernoulliDecoder {
    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn output_dim(&self) -> usize {
        self.target_dim
    }

    fn decode(
        &self,
        means: &DMatrix<f64>,
        covariances: &[DMatrix<f64>],
        timestamps: &[f64],
    ) -> Result<DecoderOutput> {
        check_shapes(self.latent_dim, means, covariances, timestamps)?;
        Ok(DecoderOutput::Bernoulli {
            logits: self.net.forward(means),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cru_flows::LinearExponential;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trajectory(t: usize, d: usize) -> (DMatrix<f64>, Vec<DMatrix<f64>>, Vec<f64>) {
        let means = DMatrix::from_fn(t, d, |i, j| i as f64 * 0.1 - j as f64 * 0.05);
        let covs = vec![DMatrix::identity(d, d) * 0.5; t];
        let times: Vec<f64> = (0..t).map(|i| i as f64).collect();
        (means, covs, times)
    }

    #[test]
    fn gaussian_decoder_shapes_and_positive_variance() {
        let mut rng = StdRng::seed_from_u64(41);
        let dec = GaussianDecoder::new(4, 16, 2, &mut rng).unwrap();
        let (means, covs, times) = trajectory(5, 4);
        match dec.decode(&means, &covs, &times).unwrap() {
            DecoderOutput::Gaussian { mean, variance } => {
                assert_eq!(mean.shape(), (5, 2));
                assert_eq!(variance.shape(), (5, 2));
                assert!(variance.iter().all(|v| *v > 0.0));
            }
            DecoderOutput::Bernoulli { .. } => panic!("expected Gaussian output"),
        }
    }

    #[test]
    fn gaussian_decoder_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(41);
        let dec = GaussianDecoder::new(4, 16, 2, &mut rng).unwrap();
        let zero_means = DMatrix::zeros(3, 4);
        let covs = vec![DMatrix::identity(4, 4); 3];
        let times = vec![0.0, 1.0, 2.0];
        let a = dec.decode(&zero_means, &covs, &times).unwrap();
        let b = dec.decode(&zero_means, &covs, &times).unwrap();
        match (a, b) {
            (
                DecoderOutput::Gaussian { mean: ma, variance: va },
                DecoderOutput::Gaussian { mean: mb, variance: vb },
            ) => {
                assert_eq!(ma, mb);
                assert_eq!(va, vb);
            }
            _ => panic!("expected Gaussian outputs"),
        }
    }

    #[test]
    fn flow_wrapped_mean_is_identity_at_time_zero() {
        let mut rng = StdRng::seed_from_u64(41);
        let plain = GaussianDecoder::new(4, 16, 3, &mut rng).unwrap();

        let mut rng2 = StdRng::seed_from_u64(41);
        let wrapped = GaussianDecoder::new(4, 16, 3, &mut rng2)
            .unwrap()
            .with_flow(Box::new(LinearExponential::new(3, &mut rng2)))
            .unwrap();

        let means = DMatrix::from_fn(2, 4, |i, j| (i + j) as f64 * 0.1);
        let covs = vec![DMatrix::identity(4, 4); 2];
        let times = vec![0.0, 0.0];
        let (a, b) = (
            plain.decode(&means, &covs, &times).unwrap(),
            wrapped.decode(&means, &covs, &times).unwrap(),
        );
        match (a, b) {
            (
                DecoderOutput::Gaussian { mean: ma, .. },
                DecoderOutput::Gaussian { mean: mb, .. },
            ) => assert_eq!(ma, mb),
            _ => panic!("expected Gaussian outputs"),
        }
    }

    #[test]
    fn flow_dim_mismatch_rejected() {
        let mut rng = StdRng::seed_from_u64(41);
        let dec = GaussianDecoder::new(4, 16, 3, &mut rng).unwrap();
        let flow = Box::new(LinearExponential::new(2, &mut rng));
        assert!(dec.with_flow(flow).is_err());
    }

    #[test]
    fn bernoulli_decoder_logits_and_probabilities() {
        let mut rng = StdRng::seed_from_u64(41);
        let dec = BernoulliDecoder::new(4, 8, 6, &mut rng).unwrap();
        let (means, covs, times) = trajectory(3, 4);
        let out = dec.decode(&means, &covs, &times).unwrap();
        assert_eq!(out.len(), 3);
        let probs = out.bernoulli_probabilities().expect("Bernoulli output");
        assert!(probs.iter().all(|p| *p > 0.0 && *p < 1.0));
    }

    #[test]
    fn shape_mismatch_rejected() {
        let mut rng = StdRng::seed_from_u64(41);
        let dec = GaussianDecoder::new(4, 8, 2, &mut rng).unwrap();
        let (means, covs, _) = trajectory(3, 4);
        let bad_times = vec![0.0, 1.0];
        assert!(dec.decode(&means, &covs, &bad_times).is_err());
    }
}
