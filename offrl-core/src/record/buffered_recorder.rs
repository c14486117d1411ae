use super::{Record, RecordStorage, Recorder};

/// A recorder that keeps records in memory.
///
/// Immediate writes are appended to an internal buffer, which can be
/// iterated afterwards. This is used for recording sequences of
/// observations and actions during evaluation runs. Stored records are
/// aggregated into the buffer on flush.
#[derive(Default)]
pub struct BufferedRecorder {
    buf: Vec<Record>,
    storage: Option<RecordStorage>,
}

impl BufferedRecorder {
    /// Constructs the recorder.
    pub fn new() -> Self {
        Self {
            buf: Vec::default(),
            storage: None,
        }
    }

    /// Returns an iterator over the records.
    pub fn iter(&self) -> std::slice::Iter<Record> {
        self.buf.iter()
    }
}

impl Recorder for BufferedRecorder {
    /// Writes a [`Record`] to the buffer.
    fn write(&mut self, record: Record) {
        self.buf.push(record);
    }

    fn store(&mut self, record: Record) {
        self.storage
            .get_or_insert_with(RecordStorage::new)
            .store(record);
    }

    fn flush(&mut self, step: i64) {
        if let Some(storage) = self.storage.as_mut() {
            let mut record = storage.aggregate();
            record.insert("opt_steps", super::RecordValue::Scalar(step as _));
            self.buf.push(record);
        }
    }
}
