//! Generic replay buffer with uniform sampling.
use super::{BatchBase, GenericTransitionBatch, SimpleReplayBufferConfig};
use crate::{error::OffrlError, ExperienceBufferBase, ReplayBufferBase, TransitionBatch};
use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// A ring buffer of transitions with uniform sampling.
///
/// Observations and actions are stored in types implementing
/// [`BatchBase`]; rewards and episode flags are kept in plain vectors.
/// Sampling uses a seeded random number generator for reproducibility.
pub struct SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    capacity: usize,
    i: usize,
    size: usize,
    obs: O,
    act: A,
    next_obs: O,
    reward: Vec<f32>,
    is_terminated: Vec<i8>,
    is_truncated: Vec<i8>,
    rng: StdRng,
}

impl<O, A> SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    #[inline]
    fn push_scalar<T: Copy>(capacity: usize, dst: &mut Vec<T>, i: usize, b: &Vec<T>) {
        let mut j = i;
        for r in b.iter() {
            dst[j] = *r;
            j += 1;
            if j == capacity {
                j = 0;
            }
        }
    }

    fn sample_ixs(&mut self, size: usize) -> Vec<usize> {
        (0..size).map(|_| self.rng.gen_range(0..self.size)).collect()
    }

    /// Returns the number of transitions currently stored.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl<O, A> ExperienceBufferBase for SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    type Item = GenericTransitionBatch<O, A>;

    fn push(&mut self, tr: Self::Item) -> Result<()> {
        let len = tr.len();
        let (obs, act, next_obs, reward, is_terminated, is_truncated, _, _) = tr.unpack();

        self.obs.push(self.i, obs);
        self.act.push(self.i, act);
        self.next_obs.push(self.i, next_obs);
        Self::push_scalar(self.capacity, &mut self.reward, self.i, &reward);
        Self::push_scalar(self.capacity, &mut self.is_terminated, self.i, &is_terminated);
        Self::push_scalar(self.capacity, &mut self.is_truncated, self.i, &is_truncated);

        self.i = (self.i + len) % self.capacity;
        self.size = (self.size + len).min(self.capacity);

        Ok(())
    }

    fn len(&self) -> usize {
        self.size
    }
}

impl<O, A> ReplayBufferBase for SimpleReplayBuffer<O, A>
where
    O: BatchBase,
    A: BatchBase,
{
    type Config = SimpleReplayBufferConfig;
    type Batch = GenericTransitionBatch<O, A>;

    fn build(config: &Self::Config) -> Self {
        let capacity = config.capacity;
        Self {
            capacity,
            i: 0,
            size: 0,
            obs: O::new(capacity),
            act: A::new(capacity),
            next_obs: O::new(capacity),
            reward: vec![0.0; capacity],
            is_terminated: vec![0; capacity],
            is_truncated: vec![0; capacity],
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    fn batch(&mut self, size: usize) -> Result<Self::Batch> {
        if self.size == 0 {
            return Err(OffrlError::NotEnoughTransitions {
                len: self.size,
                batch_size: size,
            }
            .into());
        }
        let ixs = self.sample_ixs(size);

        Ok(GenericTransitionBatch {
            obs: self.obs.sample(&ixs),
            act: self.act.sample(&ixs),
            next_obs: self.next_obs.sample(&ixs),
            reward: ixs.iter().map(|ix| self.reward[*ix]).collect(),
            is_terminated: ixs.iter().map(|ix| self.is_terminated[*ix]).collect(),
            is_truncated: ixs.iter().map(|ix| self.is_truncated[*ix]).collect(),
            ix_sample: Some(ixs),
            weight: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal batch type for exercising the buffer.
    #[derive(Clone, Debug, PartialEq)]
    struct VecBatch(Vec<f32>);

    impl BatchBase for VecBatch {
        fn new(capacity: usize) -> Self {
            Self(vec![0.0; capacity])
        }

        fn push(&mut self, ix: usize, data: Self) {
            let capacity = self.0.len();
            for (j, v) in data.0.iter().enumerate() {
                self.0[(ix + j) % capacity] = *v;
            }
        }

        fn sample(&self, ixs: &Vec<usize>) -> Self {
            Self(ixs.iter().map(|ix| self.0[*ix]).collect())
        }
    }

    fn transition(v: f32) -> GenericTransitionBatch<VecBatch, VecBatch> {
        GenericTransitionBatch {
            obs: VecBatch(vec![v]),
            act: VecBatch(vec![v]),
            next_obs: VecBatch(vec![v + 1.0]),
            reward: vec![v],
            is_terminated: vec![0],
            is_truncated: vec![0],
            weight: None,
            ix_sample: None,
        }
    }

    #[test]
    fn test_push_and_sample() -> Result<()> {
        let config = SimpleReplayBufferConfig::default().capacity(4).seed(42);
        let mut buffer = SimpleReplayBuffer::<VecBatch, VecBatch>::build(&config);

        assert!(buffer.batch(2).is_err());

        for i in 0..3 {
            buffer.push(transition(i as f32))?;
        }
        assert_eq!(buffer.len(), 3);

        let batch = buffer.batch(8)?;
        assert_eq!(batch.len(), 8);
        for (ix, r) in batch.ix_sample.as_ref().unwrap().iter().zip(&batch.reward) {
            assert_eq!(*r, *ix as f32);
        }

        // wraps around at capacity
        for i in 3..6 {
            buffer.push(transition(i as f32))?;
        }
        assert_eq!(buffer.len(), 4);

        Ok(())
    }
}
