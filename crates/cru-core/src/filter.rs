//! Continuous-time Kalman filtering over irregular sequences.
//!
//! # Model
//!
//! Linear-Gaussian state-space model with continuously parameterized
//! dynamics:
//! ```text
//! dx = A(mean) x dt + dw      (latent SDE, w ~ N(0, Q dt))
//! y_t = H x_t + v_t            (observation, v ~ N(0, R_t))
//! ```
//! `H = [I 0]` reads the observed half of the latent state. Each step
//! discretizes the dynamics over the step's time gap, propagates the
//! belief (predict), and folds in the observation restricted to the
//! dimensions its mask marks valid (update). A fully masked step skips
//! the update entirely.
//!
//! # Numerical safeguards
//!
//! Covariances are symmetrized after every propagation; an eigenvalue
//! floor is applied only when a Cholesky probe fails. The innovation
//! solve is Cholesky-based with escalating diagonal jitter, never an
//! explicit inverse. Guard activations are counted in
//! [`FilterDiagnostics`] and logged, not raised; the filter fails only
//! when regularization itself is exhausted.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cru_math::{clamp_eigenvalues, is_positive_definite, solve_spd, symmetrize, EIGENVALUE_FLOOR};

use crate::error::{Error, Result};
use crate::linearize::{ContinuousLinearizer, Discretization};
use crate::transition::BasisTransitionModel;

/// Floor on per-dimension observation variance.
const OBS_VAR_FLOOR: f64 = 1e-6;

/// The filter's belief about the latent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatentState {
    /// Belief mean, length `d`.
    pub mean: DVector<f64>,
    /// Belief covariance, `d × d`, symmetric PSD.
    pub covariance: DMatrix<f64>,
}

impl LatentState {
    /// Zero-mean isotropic prior.
    pub fn prior(dim: usize, variance: f64) -> Self {
        Self {
            mean: DVector::zeros(dim),
            covariance: DMatrix::identity(dim, dim) * variance,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

/// Belief at a single time step, both halves of the recursion retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEstimate {
    /// Post-predict (prior) mean E[x_t | y_1:t-1].
    pub prior_mean: DVector<f64>,
    /// Post-predict (prior) covariance.
    pub prior_covariance: DMatrix<f64>,
    /// Post-update (posterior) mean E[x_t | y_1:t].
    pub posterior_mean: DVector<f64>,
    /// Post-update (posterior) covariance.
    pub posterior_covariance: DMatrix<f64>,
    /// Gaussian log-likelihood of the observed dimensions at this step,
    /// 0.0 for fully masked steps.
    pub log_likelihood: f64,
    /// Whether an update ran (false when the step was fully masked).
    pub updated: bool,
}

/// Counters for silent numerical guard activations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilterDiagnostics {
    /// Innovation solves that needed diagonal jitter.
    pub jitter_activations: usize,
    /// Covariances repaired by the eigenvalue floor.
    pub eigenvalue_clamps: usize,
}

impl FilterDiagnostics {
    /// Whether any guard fired during the pass.
    pub fn any_triggered(&self) -> bool {
        self.jitter_activations > 0 || self.eigenvalue_clamps > 0
    }
}

/// Output of one filtering pass over a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterTrajectory {
    /// Per-step prior and posterior beliefs.
    pub steps: Vec<StepEstimate>,
    /// Final posterior, for streaming continuation.
    pub final_state: LatentState,
    /// Total Gaussian log-likelihood over observed dimensions.
    pub log_likelihood: f64,
    /// Guard-activation counters.
    pub diagnostics: FilterDiagnostics,
}

/// The predict/update recursion with a basis transition model.
#[derive(Debug)]
pub struct KalmanFilter {
    transition: BasisTransitionModel,
    linearizer: ContinuousLinearizer,
    obs_dim: usize,
    initial_variance: f64,
}

impl KalmanFilter {
    pub fn new(
        transition: BasisTransitionModel,
        linearizer: ContinuousLinearizer,
        obs_dim: usize,
        initial_variance: f64,
    ) -> Result<Self> {
        let latent_dim = transition.latent_dim();
        if linearizer.latent_dim() != latent_dim {
            return Err(Error::ShapeMismatch {
                what: "linearizer latent dim",
                expected: latent_dim,
                got: linearizer.latent_dim(),
            });
        }
        if obs_dim == 0 || obs_dim > latent_dim {
            return Err(Error::InvalidValue {
                field: "obs_dim",
                message: format!("must be in 1..={}, got {}", latent_dim, obs_dim),
            });
        }
        if !(initial_variance > 0.0) {
            return Err(Error::InvalidValue {
                field: "initial_variance",
                message: format!("must be positive, got {}", initial_variance),
            });
        }
        Ok(Self {
            transition,
            linearizer,
            obs_dim,
            initial_variance,
        })
    }

    pub fn latent_dim(&self) -> usize {
        self.transition.latent_dim()
    }

    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    /// The transition model backing this filter.
    pub fn transition(&self) -> &BasisTransitionModel {
        &self.transition
    }

    /// The linearizer backing this filter.
    pub fn linearizer(&self) -> &ContinuousLinearizer {
        &self.linearizer
    }

    /// Propagates the belief over a discretized gap.
    pub fn predict(
        &self,
        state: &LatentState,
        disc: &Discretization,
        diagnostics: &mut FilterDiagnostics,
    ) -> LatentState {
        let mean = &disc.transition * &state.mean;
        let cov = &disc.transition * &state.covariance * disc.transition.transpose() + &disc.noise;
        let cov = self.repair_covariance(cov, diagnostics);
        LatentState {
            mean,
            covariance: cov,
        }
    }

    /// Folds one observation into the belief, restricted to the masked
    /// dimensions. Returns the posterior and the step log-likelihood.
    /// A fully masked observation returns the prior unchanged.
    pub fn update(
        &self,
        state: &LatentState,
        obs: &DVector<f64>,
        obs_var: &DVector<f64>,
        mask: &[bool],
        diagnostics: &mut FilterDiagnostics,
    ) -> Result<(LatentState, f64)> {
        if obs.len() != self.obs_dim || obs_var.len() != self.obs_dim || mask.len() != self.obs_dim
        {
            return Err(Error::ShapeMismatch {
                what: "observation width",
                expected: self.obs_dim,
                got: obs.len(),
            });
        }

        let observed: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.then_some(i))
            .collect();
        if observed.is_empty() {
            return Ok((state.clone(), 0.0));
        }

        let d = self.latent_dim();
        let m = observed.len();
        let p = &state.covariance;

        // Innovation r = y − H mean over the observed rows; H = [I 0]
        // maps observation dim i to latent dim i.
        let mut innovation = DVector::zeros(m);
        for (i, &j) in observed.iter().enumerate() {
            innovation[i] = obs[j] - state.mean[j];
        }

        // S = H P Hᵀ + R and P Hᵀ, restricted to the observed rows.
        let mut s = DMatrix::zeros(m, m);
        for (i, &ji) in observed.iter().enumerate() {
            for (k, &jk) in observed.iter().enumerate() {
                s[(i, k)] = p[(ji, jk)];
            }
            s[(i, i)] += obs_var[ji].max(OBS_VAR_FLOOR);
        }
        let mut p_ht = DMatrix::zeros(d, m);
        for (i, &ji) in observed.iter().enumerate() {
            p_ht.column_mut(i).copy_from(&p.column(ji));
        }

        // One Cholesky solve serves the gain and the likelihood:
        // S X = [H P | r]  =>  K = X[:, ..d]ᵀ,  S⁻¹ r = X[:, d].
        let mut rhs = DMatrix::zeros(m, d + 1);
        rhs.view_mut((0, 0), (m, d)).copy_from(&p_ht.transpose());
        rhs.column_mut(d).copy_from(&innovation);
        let solve = solve_spd(&s, &rhs)?;
        if solve.jitter > 0.0 {
            diagnostics.jitter_activations += 1;
            warn!(
                jitter = solve.jitter,
                observed = m,
                "innovation covariance needed diagonal jitter"
            );
        }

        let gain = solve.solution.view((0, 0), (m, d)).transpose();
        let sinv_r = solve.solution.column(d).into_owned();

        let mean = &state.mean + &gain * &innovation;
        let cov = p - &gain * p_ht.transpose();
        let cov = self.repair_covariance(cov, diagnostics);

        let quad = innovation.dot(&sinv_r);
        let log_likelihood =
            -0.5 * (m as f64 * (2.0 * std::f64::consts::PI).ln() + solve.log_det + quad);

        Ok((
            LatentState {
                mean,
                covariance: cov,
            },
            log_likelihood,
        ))
    }

    /// Runs the recursion over one sequence.
    ///
    /// `obs_means` and `obs_vars` are `T × obs_dim`; `mask` holds one
    /// validity vector per step; `timestamps` are non-decreasing, with
    /// the first gap measured from the time origin 0. Pass `initial` to
    /// continue a streamed sequence from an earlier final state.
    pub fn run(
        &self,
        obs_means: &DMatrix<f64>,
        obs_vars: &DMatrix<f64>,
        mask: &[Vec<bool>],
        timestamps: &[f64],
        initial: Option<LatentState>,
    ) -> Result<FilterTrajectory> {
        let t_len = timestamps.len();
        if t_len == 0 {
            return Err(Error::EmptySequence);
        }
        if obs_means.nrows() != t_len {
            return Err(Error::ShapeMismatch {
                what: "observation rows",
                expected: t_len,
                got: obs_means.nrows(),
            });
        }
        if obs_vars.shape() != obs_means.shape() {
            return Err(Error::ShapeMismatch {
                what: "observation variance rows",
                expected: t_len,
                got: obs_vars.nrows(),
            });
        }
        if obs_means.ncols() != self.obs_dim {
            return Err(Error::ShapeMismatch {
                what: "observation width",
                expected: self.obs_dim,
                got: obs_means.ncols(),
            });
        }
        if mask.len() != t_len {
            return Err(Error::ShapeMismatch {
                what: "mask rows",
                expected: t_len,
                got: mask.len(),
            });
        }
        for (step, row) in mask.iter().enumerate() {
            if row.len() != self.obs_dim {
                return Err(Error::ShapeMismatch {
                    what: "mask width",
                    expected: self.obs_dim,
                    got: row.len(),
                });
            }
            for (j, observed) in row.iter().enumerate() {
                if *observed && !obs_means[(step, j)].is_finite() {
                    return Err(Error::NonFiniteInput { step });
                }
            }
        }

        if let Some(ref init) = initial {
            if init.dim() != self.latent_dim() {
                return Err(Error::ShapeMismatch {
                    what: "initial state dim",
                    expected: self.latent_dim(),
                    got: init.dim(),
                });
            }
        }

        // Gaps are validated up front so no state mutates on bad input.
        let mut gaps = Vec::with_capacity(t_len);
        let mut prev = 0.0;
        for (step, &t) in timestamps.iter().enumerate() {
            let gap = t - prev;
            if gap < 0.0 || gap.is_nan() {
                return Err(Error::NegativeTimeGap { step, gap });
            }
            gaps.push(gap);
            prev = t;
        }

        let diffusion = self.transition.diffusion();
        let mut diagnostics = FilterDiagnostics::default();
        let mut state =
            initial.unwrap_or_else(|| LatentState::prior(self.latent_dim(), self.initial_variance));
        let mut steps = Vec::with_capacity(t_len);
        let mut total_ll = 0.0;

        for step in 0..t_len {
            let dynamics = self.transition.dynamics(&state.mean);
            let disc = self.linearizer.discretize(&dynamics, &diffusion, gaps[step])?;
            let prior = self.predict(&state, &disc, &mut diagnostics);

            let any_observed = mask[step].iter().any(|m| *m);
            let (posterior, log_likelihood) = if any_observed {
                let obs = DVector::from_iterator(
                    self.obs_dim,
                    obs_means.row(step).iter().cloned(),
                );
                let var = DVector::from_iterator(
                    self.obs_dim,
                    obs_vars.row(step).iter().cloned(),
                );
                self.update(&prior, &obs, &var, &mask[step], &mut diagnostics)?
            } else {
                (prior.clone(), 0.0)
            };

            total_ll += log_likelihood;
            steps.push(StepEstimate {
                prior_mean: prior.mean,
                prior_covariance: prior.covariance,
                posterior_mean: posterior.mean.clone(),
                posterior_covariance: posterior.covariance.clone(),
                log_likelihood,
                updated: any_observed,
            });
            state = posterior;
        }

        if diagnostics.any_triggered() {
            debug!(
                jitter_activations = diagnostics.jitter_activations,
                eigenvalue_clamps = diagnostics.eigenvalue_clamps,
                "numerical guards fired during filtering pass"
            );
        }

        Ok(FilterTrajectory {
            steps,
            final_state: state,
            log_likelihood: total_ll,
            diagnostics,
        })
    }

    /// Symmetrizes, then repairs PSD-ness only if a Cholesky probe fails.
    fn repair_covariance(
        &self,
        cov: DMatrix<f64>,
        diagnostics: &mut FilterDiagnostics,
    ) -> DMatrix<f64> {
        let cov = symmetrize(&cov);
        if is_positive_definite(&cov) {
            return cov;
        }
        diagnostics.eigenvalue_clamps += 1;
        debug!("covariance lost positive definiteness, clamping eigenvalues");
        clamp_eigenvalues(&cov, EIGENVALUE_FLOOR)
    }
}
