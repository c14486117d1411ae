//! A generic replay buffer over arbitrary observation and action batches.
//!
//! In offline training the buffer doubles as the dataset store: the dataset
//! is pushed once through [`ExperienceBufferBase::push`](crate::ExperienceBufferBase::push)
//! and then sampled uniformly by the agent at every optimization step.
mod base;
mod batch;
mod config;
mod step_proc;

pub use base::SimpleReplayBuffer;
pub use batch::{BatchBase, GenericTransitionBatch};
pub use config::SimpleReplayBufferConfig;
pub use step_proc::{SimpleStepProcessor, SimpleStepProcessorConfig};
