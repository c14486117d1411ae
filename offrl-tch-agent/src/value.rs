//! Value networks over pixel observations.
use crate::{
    encoder::{FeatureDim, PixelEncoder, PixelEncoderConfig},
    mlp::{Mlp, MlpConfig},
    model::{SubModel, SubModel2},
    util::OutDim,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tch::{nn, Tensor};

/// Configuration of [`PixelStateActionValue`] and [`PixelStateValue`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PixelValueConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Configuration of the pixel encoder.
    pub encoder_config: PixelEncoderConfig<C>,
    /// Dimension of the action vector; 0 for state value networks.
    pub action_dim: i64,
    /// Hidden units of the value head.
    pub units: Vec<i64>,
}

impl<C> Default for PixelValueConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone + Default,
{
    fn default() -> Self {
        Self {
            encoder_config: Default::default(),
            action_dim: 0,
            units: vec![256, 256],
        }
    }
}

impl<C> PixelValueConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Sets the encoder configuration.
    pub fn encoder_config(mut self, v: PixelEncoderConfig<C>) -> Self {
        self.encoder_config = v;
        self
    }

    /// Sets the action dimension.
    pub fn action_dim(mut self, v: i64) -> Self {
        self.action_dim = v;
        self
    }

    /// Sets the hidden units of the value head.
    pub fn units(mut self, v: Vec<i64>) -> Self {
        self.units = v;
        self
    }

    fn head_config(&self) -> MlpConfig {
        MlpConfig::new(
            self.encoder_config.latent_dim + self.action_dim,
            self.units.clone(),
            1,
            false,
        )
    }
}

impl<C> OutDim for PixelValueConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    fn get_out_dim(&self) -> i64 {
        1
    }

    fn set_out_dim(&mut self, _v: i64) {}
}

/// Action value network `Q(s, a)` over pixel observations.
///
/// A [`PixelEncoder`] whose latent embedding is concatenated with the
/// action and fed to an MLP head.
pub struct PixelStateActionValue<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    encoder: PixelEncoder<E>,
    head: Mlp,
}

impl<E> SubModel2 for PixelStateActionValue<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    type Config = PixelValueConfig<E::Config>;
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Output = Tensor;

    fn forward(&self, obs: &Self::Input1, act: &Self::Input2) -> Self::Output {
        let latent = self.encoder.forward(obs);
        <Mlp as SubModel2>::forward(&self.head, &latent, act)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let head_config = config.head_config();

        Self {
            encoder: PixelEncoder::build(var_store, config.encoder_config),
            head: <Mlp as SubModel>::build(var_store, head_config),
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self {
            encoder: self.encoder.clone_with_var_store(var_store),
            head: <Mlp as SubModel>::clone_with_var_store(&self.head, var_store),
        }
    }
}

/// State value network `V(s)` over pixel observations.
pub struct PixelStateValue<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    encoder: PixelEncoder<E>,
    head: Mlp,
}

impl<E> SubModel for PixelStateValue<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    type Config = PixelValueConfig<E::Config>;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, obs: &Self::Input) -> Self::Output {
        let latent = self.encoder.forward(obs);
        <Mlp as SubModel>::forward(&self.head, &latent)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        debug_assert_eq!(config.action_dim, 0);
        let head_config = config.head_config();

        Self {
            encoder: PixelEncoder::build(var_store, config.encoder_config),
            head: <Mlp as SubModel>::build(var_store, head_config),
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self {
            encoder: self.encoder.clone_with_var_store(var_store),
            head: <Mlp as SubModel>::clone_with_var_store(&self.head, var_store),
        }
    }
}
