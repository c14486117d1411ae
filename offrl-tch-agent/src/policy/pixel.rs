use super::{GaussianHead, GaussianHeadConfig};
use crate::{
    encoder::{FeatureDim, PixelEncoder, PixelEncoderConfig},
    model::SubModel,
    util::OutDim,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tch::{nn, Tensor};

/// Configuration of [`PixelGaussianPolicy`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PixelGaussianPolicyConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Configuration of the pixel encoder.
    pub encoder_config: PixelEncoderConfig<C>,
    /// Configuration of the Gaussian head.
    pub head_config: GaussianHeadConfig,
}

impl<C> Default for PixelGaussianPolicyConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone + Default,
{
    fn default() -> Self {
        Self {
            encoder_config: Default::default(),
            head_config: Default::default(),
        }
    }
}

impl<C> PixelGaussianPolicyConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Sets the encoder configuration; the head input dimension follows the
    /// latent dimension of the encoder.
    pub fn encoder_config(mut self, v: PixelEncoderConfig<C>) -> Self {
        self.head_config.in_dim = v.latent_dim;
        self.encoder_config = v;
        self
    }

    /// Sets the head configuration.
    pub fn head_config(mut self, v: GaussianHeadConfig) -> Self {
        self.head_config = v;
        self
    }
}

impl<C> OutDim for PixelGaussianPolicyConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    fn get_out_dim(&self) -> i64 {
        self.head_config.get_out_dim()
    }

    fn set_out_dim(&mut self, v: i64) {
        self.head_config.set_out_dim(v);
    }
}

/// Gaussian policy over pixel observations.
///
/// A [`PixelEncoder`] followed by a [`GaussianHead`], producing
/// `(mean, lstd)` of a diagonal Gaussian over actions.
pub struct PixelGaussianPolicy<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    encoder: PixelEncoder<E>,
    head: GaussianHead,
}

impl<E> SubModel for PixelGaussianPolicy<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    type Config = PixelGaussianPolicyConfig<E::Config>;
    type Input = Tensor;
    type Output = (Tensor, Tensor);

    fn forward(&self, x: &Self::Input) -> Self::Output {
        self.head.forward(&self.encoder.forward(x))
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let mut head_config = config.head_config;
        head_config.in_dim = config.encoder_config.latent_dim;

        Self {
            encoder: PixelEncoder::build(var_store, config.encoder_config),
            head: GaussianHead::build(var_store, head_config),
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self {
            encoder: self.encoder.clone_with_var_store(var_store),
            head: self.head.clone_with_var_store(var_store),
        }
    }
}
