//! Evaluate a [`Policy`].
use crate::{Env, Policy};
use anyhow::Result;
mod default_evaluator;
pub use default_evaluator::DefaultEvaluator;

/// Evaluates a [`Policy`] in an environment.
pub trait Evaluator<E: Env> {
    /// Runs evaluation episodes and returns the mean episode return.
    ///
    /// The caller of this method needs to handle the internal state of the
    /// policy, like switching between training and evaluation mode.
    fn evaluate<P: Policy<E>>(&mut self, policy: &mut P) -> Result<f32>;
}
