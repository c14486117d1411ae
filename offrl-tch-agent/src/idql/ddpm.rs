//! Denoising diffusion probabilistic model (DDPM) for action generation.
use crate::{
    encoder::{FeatureDim, PixelEncoder, PixelEncoderConfig},
    model::{SubModel, SubModel3},
    util::OutDim,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Kind, Tensor};

/// Beta schedule of the diffusion process.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum BetaSchedule {
    /// Cosine schedule.
    Cosine,

    /// Linear schedule from 1e-4 to 2e-2.
    Linear,

    /// Variance-preserving schedule.
    Vp,
}

/// Cosine beta schedule.
///
/// Betas are derived from a squared-cosine noise level curve and clipped
/// at 0.999.
pub fn cosine_beta_schedule(t: usize) -> Vec<f64> {
    let s = 0.008;
    let alpha_bar = |i: f64| {
        let x = (i / t as f64 + s) / (1.0 + s);
        (x * std::f64::consts::FRAC_PI_2).cos().powi(2)
    };
    (0..t)
        .map(|i| {
            let beta = 1.0 - alpha_bar(i as f64 + 1.0) / alpha_bar(i as f64);
            beta.min(0.999)
        })
        .collect()
}

/// Linear beta schedule from 1e-4 to 2e-2.
pub fn linear_beta_schedule(t: usize) -> Vec<f64> {
    let (lo, hi) = (1e-4, 2e-2);
    match t {
        1 => vec![lo],
        _ => (0..t)
            .map(|i| lo + (hi - lo) * i as f64 / (t - 1) as f64)
            .collect(),
    }
}

/// Variance-preserving beta schedule.
pub fn vp_beta_schedule(t: usize) -> Vec<f64> {
    let (b_min, b_max) = (0.1, 10.0);
    (1..=t)
        .map(|i| {
            let alpha = (-b_min / t as f64
                - 0.5 * (b_max - b_min) * (2.0 * i as f64 - 1.0) / (t as f64).powi(2))
            .exp();
            1.0 - alpha
        })
        .collect()
}

/// Precomputed coefficients of a diffusion process.
pub struct DdpmSchedule {
    /// Noise levels `beta_t`.
    pub betas: Vec<f64>,

    /// `alpha_t = 1 - beta_t`.
    pub alphas: Vec<f64>,

    /// Cumulative products `alpha_hat_t = prod_{i<=t} alpha_i`.
    pub alpha_hats: Vec<f64>,

    /// `alpha_hats` on the device, for indexing with sampled timesteps.
    pub alpha_hats_t: Tensor,
}

impl DdpmSchedule {
    /// Computes the schedule with `t` diffusion steps.
    pub fn new(schedule: &BetaSchedule, t: usize, device: Device) -> Self {
        let betas = match schedule {
            BetaSchedule::Cosine => cosine_beta_schedule(t),
            BetaSchedule::Linear => linear_beta_schedule(t),
            BetaSchedule::Vp => vp_beta_schedule(t),
        };
        let alphas: Vec<f64> = betas.iter().map(|b| 1.0 - b).collect();
        let alpha_hats: Vec<f64> = alphas
            .iter()
            .scan(1.0, |prod, a| {
                *prod *= a;
                Some(*prod)
            })
            .collect();
        let alpha_hats_t = Tensor::from_slice(&alpha_hats)
            .to_kind(Kind::Float)
            .to(device);

        Self {
            betas,
            alphas,
            alpha_hats,
            alpha_hats_t,
        }
    }

    /// The number of diffusion steps.
    pub fn len(&self) -> usize {
        self.betas.len()
    }
}

/// Configuration of [`Ddpm`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DdpmConfig {
    /// Dimension of the conditioning features.
    pub cond_dim: i64,
    /// Dimension of the action vector.
    pub act_dim: i64,
    /// Dimension of the learnable Fourier time embedding.
    pub time_dim: i64,
    /// Width of the residual reverse network.
    pub hidden_dim: i64,
    /// The number of residual blocks of the reverse network.
    pub num_blocks: i64,
}

impl Default for DdpmConfig {
    fn default() -> Self {
        Self {
            cond_dim: 50,
            act_dim: 0,
            time_dim: 64,
            hidden_dim: 256,
            num_blocks: 3,
        }
    }
}

impl OutDim for DdpmConfig {
    fn get_out_dim(&self) -> i64 {
        self.act_dim
    }

    fn set_out_dim(&mut self, v: i64) {
        self.act_dim = v;
    }
}

/// Learnable Fourier features of the diffusion timestep.
struct FourierFeatures {
    kernel: Tensor,
}

impl FourierFeatures {
    fn new(p: &nn::Path, out_dim: i64) -> Self {
        let kernel = p.var(
            "kernel",
            &[out_dim / 2, 1],
            nn::Init::Randn {
                mean: 0.0,
                stdev: 0.2,
            },
        );
        Self { kernel }
    }

    fn forward(&self, t: &Tensor) -> Tensor {
        let f = t.matmul(&self.kernel.transpose(0, 1)) * (2.0 * std::f64::consts::PI);
        Tensor::cat(&[f.cos(), f.sin()], -1)
    }
}

/// Residual block of the reverse network: layer norm, expansion by four,
/// mish, projection back, plus skip.
struct ResBlock {
    norm: nn::LayerNorm,
    dense1: nn::Linear,
    dense2: nn::Linear,
}

impl ResBlock {
    fn new(p: &nn::Path, dim: i64) -> Self {
        Self {
            norm: nn::layer_norm(p / "ln", vec![dim], Default::default()),
            dense1: nn::linear(p / "d1", dim, dim * 4, Default::default()),
            dense2: nn::linear(p / "d2", dim * 4, dim, Default::default()),
        }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let y = x
            .apply(&self.norm)
            .apply(&self.dense1)
            .mish()
            .apply(&self.dense2);
        x + y
    }
}

/// DDPM noise model over conditioning features.
///
/// Predicts the noise of a noisy action given conditioning features, the
/// action and the diffusion timestep. The timestep enters through learnable
/// Fourier features and a conditioning MLP; the reverse network is a
/// layer-norm MLP-ResNet with mish activations.
pub struct Ddpm {
    config: DdpmConfig,
    device: Device,
    time_features: FourierFeatures,
    time_mlp: nn::Sequential,
    input_layer: nn::Linear,
    blocks: Vec<ResBlock>,
    out_layer: nn::Linear,
}

impl Ddpm {
    #[allow(clippy::type_complexity)]
    fn create_net(
        var_store: &nn::VarStore,
        config: &DdpmConfig,
    ) -> (
        FourierFeatures,
        nn::Sequential,
        nn::Linear,
        Vec<ResBlock>,
        nn::Linear,
    ) {
        let p = &var_store.root();
        let time_features = FourierFeatures::new(&(p / "time_features"), config.time_dim);
        let time_mlp = nn::seq()
            .add(nn::linear(
                p / "time_mlp" / "d1",
                config.time_dim,
                config.time_dim * 2,
                Default::default(),
            ))
            .add_fn(|x| x.mish())
            .add(nn::linear(
                p / "time_mlp" / "d2",
                config.time_dim * 2,
                config.time_dim,
                Default::default(),
            ));
        let in_dim = config.cond_dim + config.act_dim + config.time_dim;
        let input_layer = nn::linear(p / "input", in_dim, config.hidden_dim, Default::default());
        let blocks = (0..config.num_blocks)
            .map(|i| ResBlock::new(&(p / format!("block{}", i)), config.hidden_dim))
            .collect();
        let out_layer = nn::linear(
            p / "out",
            config.hidden_dim,
            config.act_dim,
            Default::default(),
        );

        (time_features, time_mlp, input_layer, blocks, out_layer)
    }
}

impl SubModel3 for Ddpm {
    type Config = DdpmConfig;
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Input3 = Tensor;
    type Output = Tensor;

    /// Predicts noise given conditioning features, a noisy action and the
    /// diffusion timestep of shape `[batch, 1]`.
    fn forward(&self, cond: &Self::Input1, act: &Self::Input2, time: &Self::Input3) -> Tensor {
        let cond = cond.to(self.device);
        let act = act.to(self.device);
        let time = time.to(self.device);

        let time_embedding = self.time_mlp.forward(&self.time_features.forward(&time));
        let x = Tensor::cat(&[cond, act, time_embedding], -1);
        let mut x = x.apply(&self.input_layer);
        for block in &self.blocks {
            x = block.forward(&x);
        }
        x.mish().apply(&self.out_layer)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let device = var_store.device();
        let (time_features, time_mlp, input_layer, blocks, out_layer) =
            Self::create_net(var_store, &config);

        Self {
            config,
            device,
            time_features,
            time_mlp,
            input_layer,
            blocks,
            out_layer,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        let config = self.config.clone();
        let device = var_store.device();
        let (time_features, time_mlp, input_layer, blocks, out_layer) =
            Self::create_net(var_store, &config);

        Self {
            config,
            device,
            time_features,
            time_mlp,
            input_layer,
            blocks,
            out_layer,
        }
    }
}

/// Configuration of [`PixelDdpm`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PixelDdpmConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Configuration of the pixel encoder.
    pub encoder_config: PixelEncoderConfig<C>,
    /// Configuration of the noise model head.
    pub head_config: DdpmConfig,
}

impl<C> Default for PixelDdpmConfig<C>
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

impl<C> PixelDdpmConfig<C>
where
    C: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    /// Sets the encoder configuration; the conditioning dimension of the
    /// head follows the latent dimension of the encoder.
    pub fn encoder_config(mut self, v: PixelEncoderConfig<C>) -> Self {
        self.head_config.cond_dim = v.latent_dim;
        self.encoder_config = v;
        self
    }

    /// Sets the head configuration.
    pub fn head_config(mut self, v: DdpmConfig) -> Self {
        self.head_config = v;
        self
    }
}

impl<C> OutDim for PixelDdpmConfig<C>
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

/// DDPM noise model over pixel observations.
pub struct PixelDdpm<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    encoder: PixelEncoder<E>,
    head: Ddpm,
}

impl<E> SubModel3 for PixelDdpm<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: FeatureDim + DeserializeOwned + Serialize + Clone,
{
    type Config = PixelDdpmConfig<E::Config>;
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Input3 = Tensor;
    type Output = Tensor;

    fn forward(&self, obs: &Self::Input1, act: &Self::Input2, time: &Self::Input3) -> Tensor {
        let latent = self.encoder.forward(obs);
        self.head.forward(&latent, act, time)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let mut head_config = config.head_config;
        head_config.cond_dim = config.encoder_config.latent_dim;

        Self {
            encoder: PixelEncoder::build(var_store, config.encoder_config),
            head: Ddpm::build(var_store, head_config),
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        Self {
            encoder: self.encoder.clone_with_var_store(var_store),
            head: self.head.clone_with_var_store(var_store),
        }
    }
}

/// Samples actions with the reverse diffusion process.
///
/// Starting from standard normal noise, iterates the DDPM reverse update
/// with the given noise model, conditioning on `obs` (one action is
/// produced per row of `obs`). The variance of the reverse steps is scaled
/// by `temperature`; the last, noiseless step is repeated `m_last_steps`
/// extra times; intermediate actions are clipped to `[-1, 1]` when
/// `clip_sampler` is set.
pub fn ddpm_sampler<S>(
    score: &S,
    obs: &Tensor,
    act_dim: i64,
    schedule: &DdpmSchedule,
    temperature: f64,
    m_last_steps: usize,
    clip_sampler: bool,
) -> Tensor
where
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
{
    let batch_size = obs.size()[0];
    let device = obs.device();
    let t = schedule.len();

    let denoise = |x: &Tensor, i: usize| -> Tensor {
        let time = Tensor::full(
            [batch_size, 1],
            i as f64,
            (Kind::Float, device),
        );
        let eps = score.forward(obs, x, &time);
        let alpha = schedule.alphas[i];
        let alpha_hat = schedule.alpha_hats[i];
        let x = (x - eps * (schedule.betas[i] / (1.0 - alpha_hat).sqrt())) / alpha.sqrt();
        match clip_sampler {
            true => x.clamp(-1.0, 1.0),
            false => x,
        }
    };

    let mut x = Tensor::randn([batch_size, act_dim], (Kind::Float, device));

    for i in (1..t).rev() {
        x = denoise(&x, i);

        let sigma = (schedule.betas[i] * (1.0 - schedule.alpha_hats[i - 1])
            / (1.0 - schedule.alpha_hats[i]))
            .sqrt();
        x = x + x.randn_like() * sigma * temperature;
        if clip_sampler {
            x = x.clamp(-1.0, 1.0);
        }
    }

    // final noiseless step, optionally repeated
    for _ in 0..(1 + m_last_steps) {
        x = denoise(&x, 0);
    }

    x.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beta_schedules() {
        for schedule in [BetaSchedule::Cosine, BetaSchedule::Linear, BetaSchedule::Vp] {
            let s = DdpmSchedule::new(&schedule, 20, Device::Cpu);
            assert_eq!(s.len(), 20);

            for (b, a) in s.betas.iter().zip(&s.alphas) {
                assert!(*b > 0.0 && *b < 1.0);
                assert!((a + b - 1.0).abs() < 1e-12);
            }

            // cumulative products decrease monotonically within (0, 1)
            for w in s.alpha_hats.windows(2) {
                assert!(w[1] < w[0]);
            }
            assert!(*s.alpha_hats.last().unwrap() > 0.0);
            assert!(s.alpha_hats[0] < 1.0);
        }
    }

    #[test]
    fn test_linear_beta_schedule_endpoints() {
        let betas = linear_beta_schedule(10);
        assert!((betas[0] - 1e-4).abs() < 1e-12);
        assert!((betas[9] - 2e-2).abs() < 1e-12);
    }
}
