//! Agent.
use super::{Env, Policy, ReplayBufferBase};
use crate::record::Record;
use anyhow::Result;
use std::path::Path;

/// Represents a trainable policy on an environment.
pub trait Agent<E: Env, R: ReplayBufferBase>: Policy<E> {
    /// Set the policy to training mode.
    fn train(&mut self);

    /// Set the policy to evaluation mode.
    fn eval(&mut self);

    /// Return if it is in training mode.
    fn is_train(&self) -> bool;

    /// Performs an optimization step.
    ///
    /// `buffer` is a replay buffer from which transition batches are taken
    /// for updating model parameters. The method returns `None` when the
    /// agent skips the optimization step, for example during a warmup
    /// period of the buffer.
    fn opt(&mut self, buffer: &mut R) -> Option<Record>;

    /// Save the parameters of the agent in the given directory.
    ///
    /// This method commonly creates a number of files consisting the agent
    /// in the directory. For example, an actor-critic agent saves files for
    /// its actor, critics and their target networks.
    fn save_params<T: AsRef<Path>>(&self, path: T) -> Result<()>;

    /// Load the parameters of the agent from the given directory.
    fn load_params<T: AsRef<Path>>(&mut self, path: T) -> Result<()>;
}
