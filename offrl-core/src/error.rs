//! Errors in the library.
use thiserror::Error;

/// Errors raised by core components.
#[derive(Debug, Error)]
pub enum OffrlError {
    /// The key was not found in a record.
    #[error("Key {0} is not found in the record")]
    RecordKeyNotFound(String),

    /// The record value has an unexpected type.
    #[error("Record value for key {0} has an unexpected type")]
    RecordValueType(String),

    /// The replay buffer does not have enough transitions to sample a batch.
    #[error("Replay buffer has {len} transitions, requested batch size {batch_size}")]
    NotEnoughTransitions {
        /// Number of transitions in the buffer.
        len: usize,
        /// Requested batch size.
        batch_size: usize,
    },
}
