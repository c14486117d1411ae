//! Record storage and aggregation.
use super::{Record, RecordValue};
use std::collections::HashSet;
use xxhash_rust::xxh3::Xxh3Builder;

/// Stores records and aggregates them on demand.
///
/// Scalar values appearing in more than one stored record are aggregated
/// into `{key}_min`, `{key}_max`, `{key}_mean` and `{key}_median`. For all
/// other value types the most recent occurrence is kept.
pub struct RecordStorage {
    data: Vec<Record>,
}

fn min(vs: &Vec<f32>) -> RecordValue {
    RecordValue::Scalar(*vs.iter().min_by(|x, y| x.total_cmp(y)).unwrap())
}

fn max(vs: &Vec<f32>) -> RecordValue {
    RecordValue::Scalar(*vs.iter().max_by(|x, y| x.total_cmp(y)).unwrap())
}

fn mean(vs: &Vec<f32>) -> RecordValue {
    RecordValue::Scalar(vs.iter().map(|v| *v).sum::<f32>() / vs.len() as f32)
}

fn median(mut vs: Vec<f32>) -> RecordValue {
    vs.sort_by(|x, y| x.total_cmp(y));
    RecordValue::Scalar(vs[vs.len() / 2])
}

impl RecordStorage {
    /// Creates a new empty storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    fn get_keys(&self) -> HashSet<String, Xxh3Builder> {
        let mut keys = HashSet::<String, Xxh3Builder>::default();
        for record in self.data.iter() {
            for k in record.keys() {
                keys.insert(k.clone());
            }
        }
        keys
    }

    /// Returns the most recent occurrence of `key`, of any value type.
    fn latest(&self, key: &String) -> Record {
        for record in self.data.iter().rev() {
            if let Some(value) = record.get(key) {
                return Record::from_slice(&[(key, value.clone())]);
            }
        }
        unreachable!("key comes from get_keys()");
    }

    fn scalar(&self, key: &String) -> Record {
        let vs: Vec<f32> = self
            .data
            .iter()
            .filter_map(|record| match record.get(key) {
                Some(RecordValue::Scalar(v)) => Some(*v),
                Some(_) => panic!("Expect RecordValue::Scalar for {}", key),
                None => None,
            })
            .collect();

        if vs.len() == 1 {
            Record::from_slice(&[(key.clone(), RecordValue::Scalar(vs[0]))])
        } else {
            Record::from_slice(&[
                (format!("{}_min", key), min(&vs)),
                (format!("{}_max", key), max(&vs)),
                (format!("{}_mean", key), mean(&vs)),
                (format!("{}_median", key), median(vs)),
            ])
        }
    }

    /// Aggregates all stored records and clears the storage.
    pub fn aggregate(&mut self) -> Record {
        let mut record = Record::empty();

        for key in self.get_keys().iter() {
            let r = match self.latest(key).get(key).unwrap() {
                RecordValue::Scalar(..) => self.scalar(key),
                _ => self.latest(key),
            };
            record = record.merge(r);
        }

        self.data = vec![];

        record
    }
}

#[cfg(test)]
mod tests {
    use super::RecordStorage;
    use crate::record::{Record, RecordValue};

    #[test]
    fn test_aggregate_scalars() {
        let mut storage = RecordStorage::new();
        for v in [1.0f32, 2.0, 3.0] {
            storage.store(Record::from_scalar("loss", v));
        }

        let agg = storage.aggregate();
        assert_eq!(agg.get_scalar("loss_min").unwrap(), 1.0);
        assert_eq!(agg.get_scalar("loss_max").unwrap(), 3.0);
        assert_eq!(agg.get_scalar("loss_mean").unwrap(), 2.0);
        assert_eq!(agg.get_scalar("loss_median").unwrap(), 2.0);

        // storage is cleared after aggregation
        storage.store(Record::from_scalar("loss", 5.0));
        let agg = storage.aggregate();
        assert_eq!(agg.get_scalar("loss").unwrap(), 5.0);
    }

    #[test]
    fn test_aggregate_keeps_latest_array() {
        let mut storage = RecordStorage::new();
        storage.store(Record::from_slice(&[(
            "trace",
            RecordValue::Array1(vec![1.0]),
        )]));
        storage.store(Record::from_slice(&[(
            "trace",
            RecordValue::Array1(vec![2.0]),
        )]));

        let agg = storage.aggregate();
        assert_eq!(agg.get_array1("trace").unwrap(), vec![2.0]);
    }
}
