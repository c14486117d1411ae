use super::Record;

/// Writes records to an output destination.
///
/// Implementations may support two modes: immediate writes via
/// [`Recorder::write`] and buffered writes, where records are stored with
/// [`Recorder::store`] and aggregated values are written on
/// [`Recorder::flush`].
pub trait Recorder {
    /// Writes a record immediately.
    fn write(&mut self, record: Record);

    /// Stores a record for later aggregation.
    fn store(&mut self, record: Record);

    /// Writes values aggregated from the stored records.
    ///
    /// `step` is the optimization step at which the aggregated values are
    /// recorded.
    fn flush(&mut self, step: i64);
}
