//! Gaussian policy heads.
mod gaussian;
mod pixel;
pub use gaussian::{
    normal_logp, tanh_normal_log_prob, tanh_normal_sample, GaussianHead, GaussianHeadConfig,
};
pub use pixel::{PixelGaussianPolicy, PixelGaussianPolicyConfig};
