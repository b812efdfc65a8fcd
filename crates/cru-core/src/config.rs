//! Model configuration and semantic validation.
//!
//! The configuration surface selects which encoder/decoder variants and
//! which target dimensionality the factory instantiates. Validation runs
//! at model construction, so an invalid configuration never reaches a
//! forward pass.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Dataset family a model is instantiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    /// Simulated pendulum: 24x24 grayscale frames.
    Pendulum,
    /// USHCN climate records: 5 features per step.
    Ushcn,
    /// Physionet ICU records: 37 features per step.
    Physionet,
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dataset::Pendulum => write!(f, "pendulum"),
            Dataset::Ushcn => write!(f, "ushcn"),
            Dataset::Physionet => write!(f, "physionet"),
        }
    }
}

/// Prediction task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Predict a low-dimensional target per step (Gaussian output).
    Regression,
    /// Reconstruct the observed signal at unobserved steps.
    Interpolation,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Regression => write!(f, "regression"),
            Task::Interpolation => write!(f, "interpolation"),
        }
    }
}

/// Transition basis structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasisKind {
    /// General dense basis matrices, discretized via the Van Loan block
    /// exponential.
    Dense,
    /// Rotation-scale block structure over the observed/memory split,
    /// discretized per block in closed form.
    LocallyLinear,
}

/// Configuration for a CRU model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Dataset family. Selects encoder/decoder variants and target dims.
    pub dataset: Dataset,
    /// Prediction task.
    pub task: Task,
    /// Latent state dimension. Must be even: the state splits into an
    /// observed half and a memory half.
    pub latent_state_dim: usize,
    /// Number of transition basis matrices.
    pub num_basis: usize,
    /// Hidden width of encoder/decoder networks.
    pub hidden_units: usize,
    /// Transition basis structure.
    pub basis_kind: BasisKind,
    /// Variance of the isotropic initial state covariance.
    pub initial_state_variance: f64,
    /// Number of residual-flow blocks decorating the decoder mean head.
    /// Zero disables the flow.
    pub decoder_flow_blocks: usize,
    /// Seed for one-time parameter initialization.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dataset: Dataset::Pendulum,
            task: Task::Regression,
            latent_state_dim: 30,
            num_basis: 15,
            hidden_units: 50,
            basis_kind: BasisKind::LocallyLinear,
            initial_state_variance: 1.0,
            decoder_flow_blocks: 0,
            seed: 0,
        }
    }
}

impl ModelConfig {
    /// Pendulum angle regression: 2-dim Gaussian output.
    pub fn pendulum_regression() -> Self {
        Self {
            dataset: Dataset::Pendulum,
            task: Task::Regression,
            ..Self::default()
        }
    }

    /// Pendulum frame interpolation: Bernoulli output over pixels.
    pub fn pendulum_interpolation() -> Self {
        Self {
            dataset: Dataset::Pendulum,
            task: Task::Interpolation,
            ..Self::default()
        }
    }

    /// USHCN climate records: 5-dim Gaussian output.
    pub fn ushcn() -> Self {
        Self {
            dataset: Dataset::Ushcn,
            task: Task::Interpolation,
            latent_state_dim: 10,
            num_basis: 20,
            ..Self::default()
        }
    }

    /// Physionet ICU records: 37-dim Gaussian output.
    pub fn physionet() -> Self {
        Self {
            dataset: Dataset::Physionet,
            task: Task::Interpolation,
            latent_state_dim: 20,
            num_basis: 20,
            ..Self::default()
        }
    }

    /// Width of the filter's observation space: half the latent state.
    pub fn obs_dim(&self) -> usize {
        self.latent_state_dim / 2
    }

    /// Raw per-step input width fed to the encoder.
    pub fn input_dim(&self) -> usize {
        match self.dataset {
            Dataset::Pendulum => 24 * 24,
            Dataset::Ushcn => 5,
            Dataset::Physionet => 37,
        }
    }

    /// Output width of the decoder for this dataset/task.
    pub fn target_dim(&self) -> usize {
        match (self.dataset, self.task) {
            (Dataset::Pendulum, Task::Regression) => 2,
            (Dataset::Pendulum, Task::Interpolation) => 24 * 24,
            (Dataset::Ushcn, _) => 5,
            (Dataset::Physionet, _) => 37,
        }
    }

    /// Whether the decoder emits Bernoulli logits rather than Gaussian
    /// moments.
    pub fn bernoulli_output(&self) -> bool {
        matches!((self.dataset, self.task), (Dataset::Pendulum, Task::Interpolation))
    }

    /// Semantic validation, run once at model construction.
    pub fn validate(&self) -> Result<()> {
        if self.latent_state_dim == 0 || self.latent_state_dim % 2 != 0 {
            return Err(Error::InvalidValue {
                field: "latent_state_dim",
                message: format!("must be positive and even, got {}", self.latent_state_dim),
            });
        }
        if self.num_basis == 0 {
            return Err(Error::InvalidValue {
                field: "num_basis",
                message: "must be at least 1".to_string(),
            });
        }
        if self.hidden_units == 0 {
            return Err(Error::InvalidValue {
                field: "hidden_units",
                message: "must be at least 1".to_string(),
            });
        }
        if !(self.initial_state_variance > 0.0) || !self.initial_state_variance.is_finite() {
            return Err(Error::InvalidValue {
                field: "initial_state_variance",
                message: format!("must be positive and finite, got {}", self.initial_state_variance),
            });
        }
        Ok(())
    }
}
