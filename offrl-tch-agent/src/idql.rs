//! Implicit diffusion Q-learning (IDQL) agent over pixel observations.
//!
//! Value estimation follows implicit Q-learning: a state value network is
//! fitted to an expectile of the target critic ensemble, and the critics
//! regress onto value-bootstrapped Bellman targets. The policy is a DDPM
//! noise model trained to denoise dataset actions; at decision time a batch
//! of actions is sampled with the reverse process and the one with the
//! highest target Q-value is executed.
mod base;
mod config;
mod critic;
mod ddpm;
mod score;
mod value;
pub use base::{expectile_loss, PixelIdql};
pub use config::PixelIdqlConfig;
pub use critic::{Critic, CriticConfig};
pub use ddpm::{
    cosine_beta_schedule, ddpm_sampler, linear_beta_schedule, vp_beta_schedule, BetaSchedule,
    Ddpm, DdpmConfig, DdpmSchedule, PixelDdpm, PixelDdpmConfig,
};
pub use score::{ScoreModel, ScoreModelConfig};
pub use value::{Value, ValueConfig};
