use super::FeatureDim;
use crate::{model::SubModel, util::OutDim};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Tensor};

/// Configuration of [`PixelEncoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PixelEncoderConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Configuration of the wrapped feature extractor.
    pub encoder_config: C,
    /// Dimension of the latent bottleneck.
    pub latent_dim: i64,
}

impl<C> Default for PixelEncoderConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone + Default,
{
    fn default() -> Self {
        Self {
            encoder_config: Default::default(),
            latent_dim: 50,
        }
    }
}

impl<C> PixelEncoderConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Sets the latent dimension.
    pub fn latent_dim(mut self, v: i64) -> Self {
        self.latent_dim = v;
        self
    }
}

impl<C> OutDim for PixelEncoderConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    fn get_out_dim(&self) -> i64 {
        self.latent_dim
    }

    fn set_out_dim(&mut self, v: i64) {
        self.latent_dim = v;
    }
}

/// Projects encoder features into a latent bottleneck.
///
/// The wrapped feature extractor is followed by a linear projection, layer
/// normalization and tanh, producing the embedding consumed by policy and
/// value heads.
pub struct PixelEncoder<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
{
    device: Device,
    encoder: E,
    linear: nn::Linear,
    norm: nn::LayerNorm,
}

impl<E> PixelEncoder<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    fn create_net(
        var_store: &nn::VarStore,
        config: &PixelEncoderConfig<E::Config>,
    ) -> (E, nn::Linear, nn::LayerNorm) {
        let p = &var_store.root();
        let feature_dim = config.encoder_config.feature_dim();
        let encoder = E::build(var_store, config.encoder_config.clone());
        let linear = nn::linear(
            p / "latent",
            feature_dim,
            config.latent_dim,
            Default::default(),
        );
        let norm = nn::layer_norm(p / "latent_norm", vec![config.latent_dim], Default::default());

        (encoder, linear, norm)
    }
}

impl<E> SubModel for PixelEncoder<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    type Config = PixelEncoderConfig<E::Config>;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, x: &Self::Input) -> Tensor {
        self.encoder
            .forward(&x.to(self.device))
            .apply(&self.linear)
            .apply(&self.norm)
            .tanh()
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let device = var_store.device();
        let (encoder, linear, norm) = Self::create_net(var_store, &config);

        Self {
            device,
            encoder,
            linear,
            norm,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        let device = var_store.device();
        let encoder = self.encoder.clone_with_var_store(var_store);
        let p = &var_store.root();
        let out_dim = self.linear.ws.size()[0];
        let in_dim = self.linear.ws.size()[1];
        let linear = nn::linear(p / "latent", in_dim, out_dim, Default::default());
        let norm = nn::layer_norm(p / "latent_norm", vec![out_dim], Default::default());

        Self {
            device,
            encoder,
            linear,
            norm,
        }
    }
}
