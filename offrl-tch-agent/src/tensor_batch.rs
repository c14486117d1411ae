use offrl_core::generic_replay_buffer::BatchBase;
use tch::Tensor;

/// A buffer of observations or actions consisting of a [`Tensor`].
///
/// The internal buffer is lazily initialized with the shape
/// `[capacity, data.size()[1..]]` from the first pushed data, where the
/// first axis of the pushed data is the batch size. Data is stored on the
/// CPU; agents move sampled batches to their device.
pub struct TensorBatch {
    buf: Option<Tensor>,
    capacity: i64,
}

impl Clone for TensorBatch {
    fn clone(&self) -> Self {
        let buf = self.buf.as_ref().map(|t| t.copy());

        Self {
            buf,
            capacity: self.capacity,
        }
    }
}

impl TensorBatch {
    /// Creates a batch from a tensor.
    ///
    /// The first axis of the tensor is the batch size.
    pub fn from_tensor(t: Tensor) -> Self {
        let capacity = t.size()[0] as _;
        Self {
            buf: Some(t),
            capacity,
        }
    }
}

impl BatchBase for TensorBatch {
    fn new(capacity: usize) -> Self {
        Self {
            buf: None,
            capacity: capacity as _,
        }
    }

    /// Pushes given data.
    ///
    /// If the internal buffer is not initialized yet, it will be created
    /// with the shape `[capacity, data.size()[1..]]`.
    fn push(&mut self, ix: usize, data: Self) {
        if data.buf.is_none() {
            return;
        }

        let data = data.buf.unwrap();
        let batch_size = data.size()[0];
        if batch_size == 0 {
            return;
        }

        if self.buf.is_none() {
            let mut shape = data.size();
            shape[0] = self.capacity;
            let kind = data.kind();
            self.buf = Some(Tensor::zeros(&shape[..], (kind, tch::Device::Cpu)));
        }

        let buf = self.buf.as_ref().unwrap();
        let mut j = ix as i64;
        tch::no_grad(|| {
            for i in 0..batch_size {
                buf.get(j).copy_(&data.get(i));
                j += 1;
                if j == self.capacity {
                    j = 0;
                }
            }
        });
    }

    fn sample(&self, ixs: &Vec<usize>) -> Self {
        let ixs = ixs.iter().map(|&ix| ix as i64).collect::<Vec<_>>();
        let buf = self
            .buf
            .as_ref()
            .map(|t| t.index_select(0, &Tensor::from_slice(&ixs)));

        Self {
            buf,
            capacity: ixs.len() as _,
        }
    }
}

impl From<TensorBatch> for Tensor {
    fn from(b: TensorBatch) -> Self {
        b.buf.expect("Empty TensorBatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_sample() {
        let mut batch = TensorBatch::new(4);
        let data = Tensor::from_slice(&[0f32, 1.0, 2.0]).reshape([3, 1]);
        batch.push(0, TensorBatch::from_tensor(data));

        // wraps around at capacity
        let data = Tensor::from_slice(&[3f32, 4.0]).reshape([2, 1]);
        batch.push(3, TensorBatch::from_tensor(data));

        let samples = batch.sample(&vec![0, 1, 3]);
        let t: Tensor = samples.into();
        assert_eq!(Vec::<f32>::try_from(&t.flatten(0, -1)).unwrap(), vec![4.0, 1.0, 3.0]);
    }
}
