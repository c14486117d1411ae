//! Conservative Q-learning (CQL) agent over pixel observations.
//!
//! The critic is split into an encoder tower mapping pixels to a latent
//! embedding and an ensemble of decoder towers mapping `(latent, action)`
//! to Q-values. Target copies of both towers are soft-updated after every
//! critic update. The conservative penalty pushes down Q-values of sampled
//! out-of-distribution actions relative to dataset actions.
mod actor;
mod base;
mod config;
mod critic;
mod temperature;
pub use actor::{Actor, ActorConfig};
pub use base::PixelCql;
pub use config::{ActorUpdate, PixelCqlConfig};
pub use critic::{CriticDecoder, CriticDecoderConfig, CriticEncoder, CriticEncoderConfig};
pub use temperature::{Temperature, TemperatureMode};
