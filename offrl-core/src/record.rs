//! Types and traits for recording training metrics.
//!
//! A [`Record`] is a string-keyed map of [`RecordValue`]s produced during
//! optimization and evaluation. Records are handed to a [`Recorder`], which
//! either writes them immediately or stores them and writes aggregated
//! values (mean/min/max/median of scalars) when flushed.
//!
//! ```rust
//! use offrl_core::record::{Record, RecordValue};
//!
//! let mut record = Record::empty();
//! record.insert("loss_critic", RecordValue::Scalar(0.5));
//! record.insert("q_pred", RecordValue::Array1(vec![1.0, 2.0, 3.0]));
//! assert_eq!(record.get_scalar("loss_critic").unwrap(), 0.5);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::Recorder;
pub use storage::RecordStorage;
