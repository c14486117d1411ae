use super::FeatureDim;
use crate::model::SubModel;
use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Tensor};

/// Configuration of [`SmallCnn`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SmallCnnConfig {
    /// Number of input channels, stacked frames times channels per frame.
    pub in_channels: i64,
    /// Input height in pixels.
    pub height: i64,
    /// Input width in pixels.
    pub width: i64,
    /// Number of filters of each convolution.
    pub features: Vec<i64>,
    /// Kernel size of each convolution.
    pub kernels: Vec<i64>,
    /// Stride of each convolution.
    pub strides: Vec<i64>,
}

impl Default for SmallCnnConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            height: 128,
            width: 128,
            features: vec![32, 32, 32, 32],
            kernels: vec![3, 3, 3, 3],
            strides: vec![2, 1, 1, 1],
        }
    }
}

impl SmallCnnConfig {
    /// Spatial size of the feature map after the convolution stack.
    ///
    /// The convolutions use no padding, so each layer maps
    /// `n -> (n - kernel) / stride + 1`.
    fn conv_out(&self, mut n: i64) -> i64 {
        for (k, s) in self.kernels.iter().zip(&self.strides) {
            n = (n - k) / s + 1;
        }
        n
    }
}

impl FeatureDim for SmallCnnConfig {
    fn feature_dim(&self) -> i64 {
        let h = self.conv_out(self.height);
        let w = self.conv_out(self.width);
        self.features.last().unwrap() * h * w
    }
}

/// A small convolutional feature extractor.
///
/// A plain stack of unpadded convolutions with ReLU activations, in the
/// D4PG style, followed by flattening.
pub struct SmallCnn {
    config: SmallCnnConfig,
    device: Device,
    seq: nn::Sequential,
}

impl SmallCnn {
    fn create_net(var_store: &nn::VarStore, config: &SmallCnnConfig) -> nn::Sequential {
        let p = &var_store.root();
        let mut seq = nn::seq().add_fn(|xs| xs.to_kind(tch::Kind::Float) / 255);
        let mut in_channels = config.in_channels;

        for (i, ((&f, &k), &s)) in config
            .features
            .iter()
            .zip(&config.kernels)
            .zip(&config.strides)
            .enumerate()
        {
            seq = seq.add(nn::conv2d(
                p / format!("c{}", i),
                in_channels,
                f,
                k,
                nn::ConvConfig {
                    stride: s,
                    ..Default::default()
                },
            ));
            seq = seq.add_fn(|xs| xs.relu());
            in_channels = f;
        }

        seq.add_fn(|xs| xs.flatten(1, -1))
    }
}

impl SubModel for SmallCnn {
    type Config = SmallCnnConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, x: &Self::Input) -> Tensor {
        self.seq.forward(&x.to(self.device))
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let device = var_store.device();
        let seq = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            seq,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        let config = self.config.clone();
        let device = var_store.device();
        let seq = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            seq,
        }
    }
}
