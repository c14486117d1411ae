//! Replay buffer interfaces.
use anyhow::Result;

/// Interface for buffers accepting experiences from environments.
pub trait ExperienceBufferBase {
    /// Items pushed into the buffer.
    type Item;

    /// Pushes a transition into the buffer.
    fn push(&mut self, tr: Self::Item) -> Result<()>;

    /// The number of transitions in the buffer.
    fn len(&self) -> usize;
}

/// Interface for replay buffers that generate batches for training.
///
/// In offline training, the buffer acts as the dataset store: it is filled
/// once and then sampled repeatedly by [`Agent::opt`](crate::Agent::opt).
pub trait ReplayBufferBase {
    /// Configuration of the buffer.
    type Config: Clone;

    /// Batch generated from the buffer.
    type Batch;

    /// Builds a replay buffer from the given configuration.
    fn build(config: &Self::Config) -> Self;

    /// Constructs a batch of transitions for training.
    fn batch(&mut self, size: usize) -> Result<Self::Batch>;
}
