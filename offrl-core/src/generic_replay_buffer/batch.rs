//! Generic transition batches.
use crate::TransitionBatch;

/// A trait defining basic batch operations.
///
/// Types implementing this trait act both as fixed-capacity storage inside
/// [`SimpleReplayBuffer`](super::SimpleReplayBuffer) and as batches sampled
/// from it.
pub trait BatchBase {
    /// Creates a new batch with the specified capacity.
    fn new(capacity: usize) -> Self;

    /// Adds data at the specified index.
    fn push(&mut self, ix: usize, data: Self);

    /// Retrieves samples from the specified indices.
    fn sample(&self, ixs: &Vec<usize>) -> Self;
}

/// A generic representation of transitions `(o_t, a_t, o_t+1, r_t, flags)`.
pub struct GenericTransitionBatch<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    /// Current observations.
    pub obs: O,

    /// Selected actions.
    pub act: A,

    /// Next observations.
    pub next_obs: O,

    /// Transition rewards.
    pub reward: Vec<f32>,

    /// Episode termination flags.
    pub is_terminated: Vec<i8>,

    /// Episode truncation flags.
    pub is_truncated: Vec<i8>,

    /// Sampling weights, unused for uniform sampling.
    pub weight: Option<Vec<f32>>,

    /// Indices of sampled transitions.
    pub ix_sample: Option<Vec<usize>>,
}

impl<O, A> TransitionBatch for GenericTransitionBatch<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    type ObsBatch = O;
    type ActBatch = A;

    fn unpack(
        self,
    ) -> (
        Self::ObsBatch,
        Self::ActBatch,
        Self::ObsBatch,
        Vec<f32>,
        Vec<i8>,
        Vec<i8>,
        Option<Vec<usize>>,
        Option<Vec<f32>>,
    ) {
        (
            self.obs,
            self.act,
            self.next_obs,
            self.reward,
            self.is_terminated,
            self.is_truncated,
            self.ix_sample,
            self.weight,
        )
    }

    fn len(&self) -> usize {
        self.reward.len()
    }

    fn obs(&self) -> &Self::ObsBatch {
        &self.obs
    }

    fn act(&self) -> &Self::ActBatch {
        &self.act
    }
}

impl<O, A> GenericTransitionBatch<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    /// Creates a batch with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            obs: O::new(capacity),
            act: A::new(capacity),
            next_obs: O::new(capacity),
            reward: Vec::with_capacity(capacity),
            is_terminated: Vec::with_capacity(capacity),
            is_truncated: Vec::with_capacity(capacity),
            weight: None,
            ix_sample: None,
        }
    }
}
