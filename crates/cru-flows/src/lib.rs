//! Invertible parametric transforms and the network blocks they build on.
//!
//! Two families live here:
//! - Density transforms implementing [`Transform`]: invertible maps with a
//!   tractable log-determinant Jacobian, composable via [`Chain`].
//! - Neural flows ([`resnet::ResNetFlow`]): time-conditioned invertible
//!   maps satisfying `F(x, 0) = x`, used as continuous-time solution
//!   operators. Their Jacobian determinant is not tractable, so they do
//!   not implement [`Transform`].

pub mod affine;
pub mod linexp;
pub mod net;
pub mod resnet;
pub mod transform;

pub use affine::{Affine, AffineError, AffineParams};
pub use linexp::LinearExponential;
pub use net::mlp::{Activation, LayerNorm, Linear, Mlp, NetError};
pub use net::time_net::{TimeNet, TimeNetError, TimeNetKind};
pub use resnet::{ResNetBlock, ResNetError, ResNetFlow};
pub use transform::{Chain, ChainError, Transform};
