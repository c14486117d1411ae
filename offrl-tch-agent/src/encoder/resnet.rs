use super::FeatureDim;
use crate::model::SubModel;
use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Tensor};

/// Configuration of [`ResNetEncoder`].
///
/// `stage_sizes` gives the number of residual blocks per stage:
/// `(1, 1, 1, 1)` for the small variant, `(2, 2, 2, 2)` for the 18-layer
/// and `(3, 4, 6, 3)` for the 34-layer encoder.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ResNetEncoderConfig {
    /// Number of input channels, stacked frames times channels per frame.
    pub in_channels: i64,
    /// Input height in pixels.
    pub height: i64,
    /// Input width in pixels.
    pub width: i64,
    /// Number of residual blocks of each stage.
    pub stage_sizes: Vec<i64>,
    /// Number of filters of the first stage; doubled at every later stage.
    pub num_filters: i64,
    /// Number of groups of the group normalization layers.
    pub norm_groups: i64,
}

impl Default for ResNetEncoderConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            height: 128,
            width: 128,
            stage_sizes: vec![1, 1, 1, 1],
            num_filters: 16,
            norm_groups: 4,
        }
    }
}

impl ResNetEncoderConfig {
    /// Sets the number of residual blocks per stage.
    pub fn stage_sizes(mut self, v: Vec<i64>) -> Self {
        self.stage_sizes = v;
        self
    }

    fn out_channels(&self) -> i64 {
        self.num_filters << (self.stage_sizes.len() as i64 - 1)
    }
}

impl FeatureDim for ResNetEncoderConfig {
    fn feature_dim(&self) -> i64 {
        // every stage after the first downsamples by 2
        let mut h = self.height;
        let mut w = self.width;
        for _ in 1..self.stage_sizes.len() {
            h = (h + 1) / 2;
            w = (w + 1) / 2;
        }
        self.out_channels() * h * w
    }
}

/// Pre-activation residual block (ResNet-v2) with group normalization.
struct PreActBlock {
    norm1: nn::GroupNorm,
    conv1: nn::Conv2D,
    norm2: nn::GroupNorm,
    conv2: nn::Conv2D,
    proj: Option<nn::Conv2D>,
}

impl PreActBlock {
    fn new(p: &nn::Path, in_channels: i64, out_channels: i64, stride: i64, groups: i64) -> Self {
        let cfg1 = nn::ConvConfig {
            stride,
            padding: 1,
            bias: false,
            ..Default::default()
        };
        let cfg2 = nn::ConvConfig {
            stride: 1,
            padding: 1,
            bias: false,
            ..Default::default()
        };
        let proj = if stride != 1 || in_channels != out_channels {
            Some(nn::conv2d(
                p / "proj",
                in_channels,
                out_channels,
                1,
                nn::ConvConfig {
                    stride,
                    bias: false,
                    ..Default::default()
                },
            ))
        } else {
            None
        };

        Self {
            norm1: nn::group_norm(p / "gn1", groups, in_channels, Default::default()),
            conv1: nn::conv2d(p / "c1", in_channels, out_channels, 3, cfg1),
            norm2: nn::group_norm(p / "gn2", groups, out_channels, Default::default()),
            conv2: nn::conv2d(p / "c2", out_channels, out_channels, 3, cfg2),
            proj,
        }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let pre = x.apply(&self.norm1).relu();
        let skip = match &self.proj {
            Some(proj) => pre.apply(proj),
            None => x.shallow_clone(),
        };
        let y = pre
            .apply(&self.conv1)
            .apply(&self.norm2)
            .relu()
            .apply(&self.conv2);
        skip + y
    }
}

/// Pre-activation ResNet-v2 feature extractor with group normalization.
pub struct ResNetEncoder {
    config: ResNetEncoderConfig,
    device: Device,
    stem: nn::Conv2D,
    blocks: Vec<PreActBlock>,
    norm_out: nn::GroupNorm,
}

impl ResNetEncoder {
    fn create_net(
        var_store: &nn::VarStore,
        config: &ResNetEncoderConfig,
    ) -> (nn::Conv2D, Vec<PreActBlock>, nn::GroupNorm) {
        let p = &var_store.root();
        let stem = nn::conv2d(
            p / "stem",
            config.in_channels,
            config.num_filters,
            3,
            nn::ConvConfig {
                stride: 1,
                padding: 1,
                bias: false,
                ..Default::default()
            },
        );

        let mut blocks = vec![];
        let mut in_channels = config.num_filters;
        for (i, &n_blocks) in config.stage_sizes.iter().enumerate() {
            let out_channels = config.num_filters << i;
            for j in 0..n_blocks {
                let stride = if i > 0 && j == 0 { 2 } else { 1 };
                blocks.push(PreActBlock::new(
                    &(p / format!("stage{}_block{}", i, j)),
                    in_channels,
                    out_channels,
                    stride,
                    config.norm_groups,
                ));
                in_channels = out_channels;
            }
        }

        let norm_out = nn::group_norm(
            p / "gn_out",
            config.norm_groups,
            config.out_channels(),
            Default::default(),
        );

        (stem, blocks, norm_out)
    }
}

impl SubModel for ResNetEncoder {
    type Config = ResNetEncoderConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn forward(&self, x: &Self::Input) -> Tensor {
        let x = x.to(self.device).to_kind(tch::Kind::Float) / 255;
        let mut x = x.apply(&self.stem);
        for block in &self.blocks {
            x = block.forward(&x);
        }
        x.apply(&self.norm_out).relu().flatten(1, -1)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let device = var_store.device();
        let (stem, blocks, norm_out) = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            stem,
            blocks,
            norm_out,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        let config = self.config.clone();
        let device = var_store.device();
        let (stem, blocks, norm_out) = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            stem,
            blocks,
            norm_out,
        }
    }
}
