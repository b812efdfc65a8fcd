//! CRU math utilities.

pub mod math;

pub use math::expm::*;
pub use math::psd::*;
pub use math::stable::*;
