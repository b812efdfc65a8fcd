//! The assembled CRU model and its configuration-driven factory.
//!
//! A model is a fixed pipeline: encoder → filter (transition model +
//! linearizer + Kalman recursion) → decoder. Dataset and task select the
//! encoder/decoder variants and target dimensionality through
//! [`build_model`]; there is no subclassing, each variant is a strategy
//! object chosen once at construction.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use cru_flows::{Chain, LinearExponential, Transform};

use crate::config::{BasisKind, Dataset, ModelConfig};
use crate::decoder::{BernoulliDecoder, DecoderOutput, GaussianDecoder, LatentDecoder};
use crate::encoder::{ImageEncoder, MlpEncoder, ObservationEncoder};
use crate::error::{Error, Result};
use crate::filter::{FilterDiagnostics, FilterTrajectory, KalmanFilter, LatentState};
use crate::linearize::ContinuousLinearizer;
use crate::transition::{BasisTransitionModel, TransitionBasis};

/// Initial continuous-time diffusion intensity for new models.
const INITIAL_DIFFUSION: f64 = 0.1;

/// One sequence of raw observations with timing and validity.
#[derive(Debug, Clone, Copy)]
pub struct SequenceInput<'a> {
    /// Raw per-step features, `T × input_dim`.
    pub observations: &'a DMatrix<f64>,
    /// Non-decreasing timestamps, length `T`. The first gap is measured
    /// from the time origin 0.
    pub timestamps: &'a [f64],
    /// Per-step validity over the observation space, `T` rows of
    /// `obs_dim` flags.
    pub mask: &'a [Vec<bool>],
}

/// Full output of one forward pass.
#[derive(Debug)]
pub struct SequenceOutput {
    /// Post-predict latent means, `T × latent_dim`.
    pub prior_means: DMatrix<f64>,
    /// Post-update latent means, `T × latent_dim`.
    pub posterior_means: DMatrix<f64>,
    /// Post-predict covariances, one per step.
    pub prior_covariances: Vec<DMatrix<f64>>,
    /// Post-update covariances, one per step.
    pub posterior_covariances: Vec<DMatrix<f64>>,
    /// Decoded output distribution parameters.
    pub output: DecoderOutput,
    /// Total observation log-likelihood from the filter.
    pub log_likelihood: f64,
    /// Numerical guard counters from the filtering pass.
    pub diagnostics: FilterDiagnostics,
    /// Final posterior, for streaming continuation.
    pub final_state: LatentState,
}

/// Encoder, filter, and decoder assembled for one configuration.
pub struct CruModel {
    config: ModelConfig,
    encoder: Box<dyn ObservationEncoder>,
    filter: KalmanFilter,
    decoder: Box<dyn LatentDecoder>,
}

impl CruModel {
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn latent_dim(&self) -> usize {
        self.filter.latent_dim()
    }

    pub fn obs_dim(&self) -> usize {
        self.filter.obs_dim()
    }

    /// Filters and decodes one sequence from the learned prior.
    pub fn forward_sequence(&self, input: &SequenceInput<'_>) -> Result<SequenceOutput> {
        self.forward_from(input, None)
    }

    /// Filters and decodes one sequence, optionally continuing from an
    /// earlier final state. Timestamps are then relative to the
    /// continuation point.
    pub fn forward_from(
        &self,
        input: &SequenceInput<'_>,
        initial: Option<LatentState>,
    ) -> Result<SequenceOutput> {
        if input.observations.ncols() != self.encoder.input_dim() {
            return Err(Error::ShapeMismatch {
                what: "raw observation width",
                expected: self.encoder.input_dim(),
                got: input.observations.ncols(),
            });
        }
        if input.observations.nrows() != input.timestamps.len() {
            return Err(Error::ShapeMismatch {
                what: "raw observation rows",
                expected: input.timestamps.len(),
                got: input.observations.nrows(),
            });
        }

        let encoded = self.encoder.encode(input.observations)?;
        let trajectory = self.filter.run(
            &encoded.means,
            &encoded.variances,
            input.mask,
            input.timestamps,
            initial,
        )?;

        let (prior_means, posterior_means, prior_covariances, posterior_covariances) =
            split_trajectory(&trajectory, self.latent_dim());

        let output = self
            .decoder
            .decode(&posterior_means, &posterior_covariances, input.timestamps)?;

        Ok(SequenceOutput {
            prior_means,
            posterior_means,
            prior_covariances,
            posterior_covariances,
            output,
            log_likelihood: trajectory.log_likelihood,
            diagnostics: trajectory.diagnostics,
            final_state: trajectory.final_state,
        })
    }

    /// Filters a batch of independent sequences. Sequences do not share
    /// state; identical inputs produce identical outputs.
    pub fn forward_batch(&self, inputs: &[SequenceInput<'_>]) -> Result<Vec<SequenceOutput>> {
        inputs.iter().map(|i| self.forward_sequence(i)).collect()
    }
}

fn split_trajectory(
    trajectory: &FilterTrajectory,
    latent_dim: usize,
) -> (
    DMatrix<f64>,
    DMatrix<f64>,
    Vec<DMatrix<f64>>,
    Vec<DMatrix<f64>>,
) {
    let t_len = trajectory.steps.len();
    let mut prior_means = DMatrix::zeros(t_len, latent_dim);
    let mut posterior_means = DMatrix::zeros(t_len, latent_dim);
    let mut prior_covariances = Vec::with_capacity(t_len);
    let mut posterior_covariances = Vec::with_capacity(t_len);
    for (i, step) in trajectory.steps.iter().enumerate() {
        prior_means
            .row_mut(i)
            .copy_from(&step.prior_mean.transpose());
        posterior_means
            .row_mut(i)
            .copy_from(&step.posterior_mean.transpose());
        prior_covariances.push(step.prior_covariance.clone());
        posterior_covariances.push(step.posterior_covariance.clone());
    }
    (
        prior_means,
        posterior_means,
        prior_covariances,
        posterior_covariances,
    )
}

/// Builds the model a configuration describes. All validation happens
/// here, before any forward pass.
pub fn build_model(config: &ModelConfig) -> Result<CruModel> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let latent_dim = config.latent_state_dim;
    let obs_dim = config.obs_dim();

    let basis = match config.basis_kind {
        BasisKind::Dense => TransitionBasis::dense(config.num_basis, latent_dim, &mut rng)?,
        BasisKind::LocallyLinear => {
            TransitionBasis::locally_linear(config.num_basis, latent_dim, &mut rng)?
        }
    };
    let transition = BasisTransitionModel::new(basis, INITIAL_DIFFUSION, &mut rng)?;
    let linearizer = ContinuousLinearizer::new(config.basis_kind, latent_dim)?;
    let filter = KalmanFilter::new(
        transition,
        linearizer,
        obs_dim,
        config.initial_state_variance,
    )?;

    let encoder: Box<dyn ObservationEncoder> = match config.dataset {
        Dataset::Pendulum => Box::new(ImageEncoder::new(
            config.input_dim(),
            config.hidden_units,
            obs_dim,
            &mut rng,
        )?),
        Dataset::Ushcn | Dataset::Physionet => Box::new(MlpEncoder::new(
            config.input_dim(),
            config.hidden_units,
            obs_dim,
            3,
            &mut rng,
        )?),
    };

    let decoder: Box<dyn LatentDecoder> = if config.bernoulli_output() {
        Box::new(BernoulliDecoder::new(
            latent_dim,
            config.hidden_units,
            config.target_dim(),
            &mut rng,
        )?)
    } else {
        let mut decoder = GaussianDecoder::new(
            latent_dim,
            config.hidden_units,
            config.target_dim(),
            &mut rng,
        )?;
        if config.decoder_flow_blocks > 0 {
            let blocks: Vec<Box<dyn Transform>> = (0..config.decoder_flow_blocks)
                .map(|_| {
                    Box::new(LinearExponential::new(config.target_dim(), &mut rng))
                        as Box<dyn Transform>
                })
                .collect();
            let chain = Chain::new(blocks).map_err(|e| Error::Config(e.to_string()))?;
            decoder = decoder.with_flow(Box::new(chain))?;
        }
        Box::new(decoder)
    };

    info!(
        dataset = %config.dataset,
        task = %config.task,
        latent_state_dim = latent_dim,
        num_basis = config.num_basis,
        "built CRU model"
    );

    Ok(CruModel {
        config: config.clone(),
        encoder,
        filter,
        decoder,
    })
}
