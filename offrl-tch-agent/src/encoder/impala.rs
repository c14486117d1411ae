use super::FeatureDim;
use crate::model::SubModel;
use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Tensor};

/// Configuration of [`ImpalaCnn`].
///
/// `width` scales the number of filters of every stage; the bigger IMPALA
/// variants are obtained with `width` 2 or 4.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ImpalaCnnConfig {
    /// Number of input channels, stacked frames times channels per frame.
    pub in_channels: i64,
    /// Input height in pixels.
    pub height: i64,
    /// Input width in pixels.
    pub width_px: i64,
    /// Base number of filters of each stage.
    pub depths: Vec<i64>,
    /// Width multiplier applied to every stage.
    pub width: i64,
}

impl Default for ImpalaCnnConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            height: 128,
            width_px: 128,
            depths: vec![16, 32, 32],
            width: 1,
        }
    }
}

impl ImpalaCnnConfig {
    /// Sets the width multiplier.
    pub fn width(mut self, width: i64) -> Self {
        self.width = width;
        self
    }
}

impl FeatureDim for ImpalaCnnConfig {
    fn feature_dim(&self) -> i64 {
        // each stage halves the spatial size with a stride-2 max-pool
        let mut h = self.height;
        let mut w = self.width_px;
        for _ in 0..self.depths.len() {
            h = (h + 1) / 2;
            w = (w + 1) / 2;
        }
        self.depths.last().unwrap() * self.width * h * w
    }
}

struct ResidualBlock {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
}

impl ResidualBlock {
    fn new(p: &nn::Path, channels: i64) -> Self {
        let cfg = nn::ConvConfig {
            stride: 1,
            padding: 1,
            ..Default::default()
        };
        Self {
            conv1: nn::conv2d(p / "c1", channels, channels, 3, cfg),
            conv2: nn::conv2d(p / "c2", channels, channels, 3, cfg),
        }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let y = x.relu().apply(&self.conv1).relu().apply(&self.conv2);
        x + y
    }
}

struct Stage {
    conv: nn::Conv2D,
    blocks: Vec<ResidualBlock>,
}

impl Stage {
    fn new(p: &nn::Path, in_channels: i64, out_channels: i64) -> Self {
        let cfg = nn::ConvConfig {
            stride: 1,
            padding: 1,
            ..Default::default()
        };
        Self {
            conv: nn::conv2d(p / "conv", in_channels, out_channels, 3, cfg),
            blocks: (0..2)
                .map(|i| ResidualBlock::new(&(p / format!("block{}", i)), out_channels))
                .collect(),
        }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let mut x = x.apply(&self.conv).max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false);
        for block in &self.blocks {
            x = block.forward(&x);
        }
        x
    }
}

/// IMPALA convolutional feature extractor.
///
/// Stages of convolution, stride-2 max-pooling and two residual blocks,
/// followed by a final ReLU and flattening.
pub struct ImpalaCnn {
    config: ImpalaCnnConfig,
    device: Device,
    stages: Vec<Stage>,
}

impl ImpalaCnn {
    fn create_net(var_store: &nn::VarStore, config: &ImpalaCnnConfig) -> Vec<Stage> {
        let p = &var_store.root();
        let mut in_channels = config.in_channels;
        let mut stages = vec![];

        for (i, &depth) in config.depths.iter().enumerate() {
            let out_channels = depth * config.width;
            stages.push(Stage::new(
                &(p / format!("stage{}", i)),
                in_channels,
                out_channels,
            ));
            in_channels = out_channels;
        }

        stages
    }
}

impl SubModel for ImpalaCnn {
    type Config = ImpalaCnnConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, x: &Self::Input) -> Tensor {
        let mut x = x.to(self.device).to_kind(tch::Kind::Float) / 255;
        for stage in &self.stages {
            x = stage.forward(&x);
        }
        x.relu().flatten(1, -1)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let device = var_store.device();
        let stages = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            stages,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        let config = self.config.clone();
        let device = var_store.device();
        let stages = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            stages,
        }
    }
}
