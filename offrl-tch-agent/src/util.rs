//! Utilities.
use crate::model::ModelBase;
use log::trace;
use ndarray::ArrayD;
use num_traits::cast::AsPrimitive;
use offrl_core::record::{Record, RecordValue};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use tch::{nn::VarStore, Tensor};

/// Critic loss type.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum CriticLoss {
    /// Mean squared error.
    Mse,

    /// Smooth L1 loss.
    SmoothL1,
}

/// Reduction of a critic ensemble into a single value estimate.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum CriticReduction {
    /// Minimum over the ensemble.
    Min,

    /// Mean over the ensemble.
    Mean,
}

impl CriticReduction {
    /// Reduces Q-values stacked along the first axis.
    pub fn reduce(&self, qvals: &Tensor) -> Tensor {
        match self {
            Self::Min => qvals.min_dim(0, false).0,
            Self::Mean => qvals.mean_dim(Some([0].as_slice()), false, tch::Kind::Float),
        }
    }
}

/// Apply soft update on model variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track<M: ModelBase>(dest: &mut M, src: &M, tau: f64) {
    let src = &src.get_var_store().variables();
    let dest = &mut dest.get_var_store_mut().variables();
    debug_assert_eq!(src.len(), dest.len());

    let names = src.keys();
    tch::no_grad(|| {
        for name in names {
            let src = src.get(name).unwrap();
            let dest = dest.get_mut(name).unwrap();
            dest.copy_(&(tau * src + (1.0 - tau) * &*dest));
        }
    });
    trace!("soft update");
}

/// Concatenates slices.
pub fn concat_slices(s1: &[i64], s2: &[i64]) -> Vec<i64> {
    let mut v = Vec::from(s1);
    v.append(&mut Vec::from(s2));
    v
}

/// Interface for handling output dimensions.
pub trait OutDim {
    /// Returns the output dimension.
    fn get_out_dim(&self) -> i64;

    /// Sets the output dimension.
    fn set_out_dim(&mut self, v: i64);
}

/// Returns the mean and standard deviation of the parameters.
pub fn param_stats(var_store: &VarStore) -> Record {
    let mut record = Record::empty();

    for (k, v) in var_store.variables() {
        let m = f32::try_from(v.mean(tch::Kind::Float)).expect("Failed to convert Tensor to f32");
        let k_mean = format!("{}_mean", &k);
        record.insert(k_mean, RecordValue::Scalar(m));

        let m = f32::try_from(v.std(false)).expect("Failed to convert Tensor to f32");
        let k_std = format!("{}_std", k);
        record.insert(k_std, RecordValue::Scalar(m));
    }

    record
}

/// Converts [`ndarray::ArrayD`] to [`Tensor`].
pub fn arrayd_to_tensor<T1, T2>(a: ArrayD<T1>, add_batch_dim: bool) -> Tensor
where
    T1: AsPrimitive<T2>,
    T2: Copy + 'static + tch::kind::Element,
{
    let v = a.iter().map(|e| e.as_()).collect::<Vec<_>>();
    let t: Tensor = TryFrom::<Vec<T2>>::try_from(v).unwrap();

    match add_batch_dim {
        true => t.unsqueeze(0),
        false => t,
    }
}

/// Converts [`Tensor`] to [`ndarray::ArrayD`].
pub fn tensor_to_arrayd<T>(t: Tensor, delete_batch_dim: bool) -> ArrayD<T>
where
    T: tch::kind::Element + Copy,
{
    let shape = match delete_batch_dim {
        false => t.size()[..].iter().map(|x| *x as usize).collect::<Vec<_>>(),
        true => t.size()[1..]
            .iter()
            .map(|x| *x as usize)
            .collect::<Vec<_>>(),
    };
    let v = Vec::<T>::try_from(&t.flatten(0, -1)).expect("Failed to convert from Tensor to Vec");

    ndarray::Array1::<T>::from(v)
        .into_shape(ndarray::IxDyn(&shape))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cql::{CriticDecoder, CriticDecoderConfig},
        mlp::{Mlp, MlpConfig},
    };
    use anyhow::Result;

    #[test]
    fn test_concat_slices() {
        assert_eq!(concat_slices(&[1, 2], &[3]), vec![1, 2, 3]);
    }

    #[test]
    fn test_track_full_copy() -> Result<()> {
        let device = tch::Device::Cpu;
        let config = CriticDecoderConfig::default().q_config(MlpConfig::new(4, vec![8], 1, false));
        let src = CriticDecoder::<Mlp>::build(config.clone(), device)?;
        let mut dest = CriticDecoder::<Mlp>::build(config, device)?;

        // tau = 1 replaces the destination with the source
        track(&mut dest, &src, 1.0);

        let latent = Tensor::rand([2, 3], tch::kind::FLOAT_CPU);
        let act = Tensor::rand([2, 1], tch::kind::FLOAT_CPU);
        let diff = src.forward(&latent, &act) - dest.forward(&latent, &act);
        let diff = f64::try_from(diff.abs().max())?;
        assert!(diff < 1e-6);

        Ok(())
    }

    #[test]
    fn test_critic_reduction() {
        let qvals = Tensor::from_slice(&[1.0f32, 4.0, 3.0, 2.0]).reshape([2, 2]);

        let min = CriticReduction::Min.reduce(&qvals);
        assert_eq!(Vec::<f32>::try_from(&min.flatten(0, -1)).unwrap(), vec![1.0, 2.0]);

        let mean = CriticReduction::Mean.reduce(&qvals);
        assert_eq!(Vec::<f32>::try_from(&mean.flatten(0, -1)).unwrap(), vec![2.0, 3.0]);
    }
}
