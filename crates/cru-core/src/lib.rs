//! Continuous Recurrent Unit (CRU) filtering core.
//!
//! This library provides continuous-time latent-variable sequence models
//! for irregular time series:
//! - A transition model blending fixed basis matrices via a learned gate
//! - Closed-form and series discretization over irregular time gaps
//! - A numerically guarded Kalman predict/update recursion with partial
//!   and missing observations
//! - Encoder/decoder function blocks and the dataset/task factory that
//!   assembles them into a model
//!
//! Invertible transforms consumed by decoders live in `cru-flows`;
//! numerical primitives live in `cru-math`.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod linearize;
pub mod model;
pub mod transition;

pub use config::{BasisKind, Dataset, ModelConfig, Task};
pub use decoder::{BernoulliDecoder, DecoderOutput, GaussianDecoder, LatentDecoder};
pub use encoder::{EncodedObservations, ImageEncoder, MlpEncoder, ObservationEncoder};
pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use filter::{
    FilterDiagnostics, FilterTrajectory, KalmanFilter, LatentState, StepEstimate,
};
pub use linearize::{ContinuousLinearizer, Discretization};
pub use model::{build_model, CruModel, SequenceInput, SequenceOutput};
pub use transition::{BasisTransitionModel, TransitionBasis};
