//! Transition batch.

/// Represents a batch of transitions `(o_t, a_t, o_t+1, r_t, flags)`.
pub trait TransitionBatch {
    /// A set of observations in a batch.
    type ObsBatch;

    /// A set of actions in a batch.
    type ActBatch;

    /// Unpacks the data
    /// `(o_t, a_t, o_t+1, r_t, is_terminated_t, is_truncated_t, ix_sample, weight)`.
    ///
    /// The last two elements are the indices at which the transitions were
    /// sampled from the buffer and their sampling weights, if available.
    #[allow(clippy::type_complexity)]
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
    );

    /// Returns the number of transitions in the batch.
    fn len(&self) -> usize;

    /// Returns `o_t`.
    fn obs(&self) -> &Self::ObsBatch;

    /// Returns `a_t`.
    fn act(&self) -> &Self::ActBatch;
}
