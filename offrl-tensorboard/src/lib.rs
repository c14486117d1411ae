//! Tensorboard recorder for training records.
use offrl_core::record::{Record, RecordStorage, RecordValue, Recorder};
use std::path::Path;
use tensorboard_rs::summary_writer::SummaryWriter;

/// Writes records to TFRecord files.
///
/// Stored records are aggregated with [`RecordStorage`] and written with the
/// step given to [`Recorder::flush`]. Immediate writes take the step from the
/// `opt_steps` entry of the record.
pub struct TensorboardRecorder {
    writer: SummaryWriter,
    storage: RecordStorage,
    step_key: String,
    ignore_unsupported_value: bool,
}

impl TensorboardRecorder {
    /// Constructs a [`TensorboardRecorder`].
    ///
    /// TFRecord files will be stored in `logdir`.
    pub fn new<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            writer: SummaryWriter::new(logdir),
            storage: RecordStorage::new(),
            step_key: "opt_steps".to_string(),
            ignore_unsupported_value: true,
        }
    }

    /// Constructs a [`TensorboardRecorder`] that panics on unsupported record values.
    pub fn new_with_check_unsupported_value<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            writer: SummaryWriter::new(logdir),
            storage: RecordStorage::new(),
            step_key: "opt_steps".to_string(),
            ignore_unsupported_value: false,
        }
    }

    fn write_with_step(&mut self, record: Record, step: usize) {
        for (k, v) in record.iter() {
            if *k == self.step_key {
                continue;
            }
            match v {
                RecordValue::Scalar(v) => self.writer.add_scalar(k, *v as f32, step),
                RecordValue::DateTime(_) => {} // discard value
                RecordValue::Array1(data) => {
                    // scalar series under suffixed tags
                    for (i, e) in data.iter().enumerate() {
                        self.writer.add_scalar(&format!("{}_{}", k, i), *e, step);
                    }
                }
                RecordValue::Array2(data, shape) => {
                    let shape = [3, shape[0], shape[1]];
                    let min = data.iter().fold(f32::MAX, |m, v| v.min(m));
                    let scale = data.iter().fold(-f32::MAX, |m, v| v.max(m)) - min;
                    let mut data = data
                        .iter()
                        .map(|&e| ((e - min) / scale * 255f32) as u8)
                        .collect::<Vec<_>>();
                    let data_ = data.clone();
                    data.extend(data_.iter());
                    data.extend(data_.iter());
                    self.writer.add_image(k, data.as_slice(), &shape, step)
                }
                _ => {
                    if !self.ignore_unsupported_value {
                        panic!("Unsupported value: {:?}", (k, v));
                    }
                }
            };
        }
    }
}

impl Recorder for TensorboardRecorder {
    /// Writes a given [`Record`] into a TFRecord.
    fn write(&mut self, record: Record) {
        let step = match record.get(&self.step_key) {
            Some(RecordValue::Scalar(v)) => *v as usize,
            _ => panic!("No {} record entry", self.step_key),
        };
        self.write_with_step(record, step);
    }

    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        let record = self.storage.aggregate();
        self.write_with_step(record, step as usize);
    }
}
