#![warn(missing_docs)]
//! Core abstractions for offline reinforcement learning.
//!
//! This crate defines the interfaces shared by all agents in the workspace:
//! environments and policies ([`Env`], [`Policy`]), trainable agents
//! ([`Agent`]), transition batches and replay buffers
//! ([`TransitionBatch`], [`ReplayBufferBase`]), records of training metrics
//! ([`record`]) and the offline training loop ([`OfflineTrainer`]).
//!
//! Gradient-based optimization itself is delegated to a backend crate;
//! see `offrl-tch-agent` for the tch (libtorch) implementation.
pub mod error;
pub mod generic_replay_buffer;
pub mod record;

mod base;
pub use base::{
    Act, Agent, Configurable, Env, ExperienceBufferBase, Info, Obs, Policy, ReplayBufferBase,
    Step, StepProcessor, TransitionBatch,
};

mod evaluator;
pub use evaluator::{DefaultEvaluator, Evaluator};

mod trainer;
pub use trainer::{OfflineTrainer, TrainerConfig};
