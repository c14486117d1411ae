//! Value and reward diagnostics of recorded trajectories.
//!
//! Agents expose per-step Q-value traces of evaluation trajectories; this
//! module packs them into [`Record`]s so any recorder can consume them, for
//! example as scalar series in Tensorboard.
use offrl_core::record::{Record, RecordValue};
use tch::Tensor;

fn to_vec(t: &Tensor) -> Vec<f32> {
    Vec::<f32>::try_from(&t.to_kind(tch::Kind::Float).flatten(0, -1))
        .expect("Failed to convert Tensor to Vec")
}

/// Packs per-step value diagnostics of a trajectory into a [`Record`].
///
/// `q_pred`, `tgt` and `bellman` are tensors of shape `[steps]`; rewards
/// and masks are recorded alongside them.
pub fn trace_record(
    q_pred: &Tensor,
    tgt: &Tensor,
    bellman: &Tensor,
    rewards: &[f32],
    masks: &[f32],
) -> Record {
    Record::from_slice(&[
        ("q_pred", RecordValue::Array1(to_vec(q_pred))),
        ("target_q_pred", RecordValue::Array1(to_vec(tgt))),
        ("bellman_loss", RecordValue::Array1(to_vec(bellman))),
        ("reward", RecordValue::Array1(rewards.to_vec())),
        ("mask", RecordValue::Array1(masks.to_vec())),
    ])
}

#[cfg(test)]
mod tests {
    use super::trace_record;
    use tch::Tensor;

    #[test]
    fn test_trace_record_keys() {
        let q = Tensor::from_slice(&[1.0f32, 2.0]);
        let tgt = Tensor::from_slice(&[1.5f32, 2.5]);
        let bellman = Tensor::from_slice(&[0.25f32, 0.25]);

        let record = trace_record(&q, &tgt, &bellman, &[0.0, 1.0], &[1.0, 0.0]);
        assert_eq!(record.get_array1("q_pred").unwrap(), vec![1.0, 2.0]);
        assert_eq!(record.get_array1("target_q_pred").unwrap(), vec![1.5, 2.5]);
        assert_eq!(record.get_array1("bellman_loss").unwrap(), vec![0.25, 0.25]);
        assert_eq!(record.get_array1("reward").unwrap(), vec![0.0, 1.0]);
        assert_eq!(record.get_array1("mask").unwrap(), vec![1.0, 0.0]);
    }
}
