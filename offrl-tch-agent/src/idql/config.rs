//! Configuration of the IDQL agent.
use super::{BetaSchedule, CriticConfig, ScoreModelConfig, ValueConfig};
use crate::{
    model::{SubModel, SubModel2, SubModel3},
    util::OutDim,
    Device,
};
use anyhow::Result;
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::Debug,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use tch::Tensor;

/// Configuration of [`PixelIdql`](super::PixelIdql).
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct PixelIdqlConfig<Q, V, S>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V: SubModel<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Configuration of the critic networks.
    pub critic_config: CriticConfig<Q::Config>,
    /// Configuration of the state value network.
    pub value_config: ValueConfig<V::Config>,
    /// Configuration of the score model.
    pub score_config: ScoreModelConfig<S::Config>,
    /// The number of critics.
    pub n_critics: usize,
    /// Discount factor.
    pub gamma: f64,
    /// Soft update coefficient of the target critics.
    pub tau: f64,
    /// Soft update coefficient of the target score model.
    pub actor_tau: f64,
    /// Expectile of the value objective.
    pub expectile: f64,
    /// The number of diffusion steps.
    pub n_diffusion_steps: usize,
    /// Beta schedule of the diffusion process.
    pub beta_schedule: BetaSchedule,
    /// The number of actions sampled per observation at decision time.
    pub n_action_samples: i64,
    /// Extra repetitions of the last, noiseless reverse step.
    pub m_last_steps: usize,
    /// Clips intermediate actions of the reverse sampler to `[-1, 1]`.
    pub clip_sampler: bool,
    /// Scale of the reverse process variance.
    pub ddpm_temperature: f64,
    /// The number of parameter updates per optimization step.
    pub n_updates_per_opt: usize,
    /// The number of transitions required before optimization starts.
    pub min_transitions_warmup: usize,
    /// Batch size of the score model update.
    pub batch_size: usize,
    /// Batch size of the critic and value updates, a slice of the batch.
    pub critic_batch_size: usize,
    /// Initial training mode.
    pub train: bool,
    /// Padding of the random shift augmentation; 0 disables augmentation.
    pub aug_pad: i64,
    /// Random seed.
    pub seed: Option<i64>,
    /// Device on which the agent runs.
    pub device: Option<Device>,
}

impl<Q, V, S> Clone for PixelIdqlConfig<Q, V, S>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V: SubModel<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn clone(&self) -> Self {
        Self {
            critic_config: self.critic_config.clone(),
            value_config: self.value_config.clone(),
            score_config: self.score_config.clone(),
            n_critics: self.n_critics,
            gamma: self.gamma,
            tau: self.tau,
            actor_tau: self.actor_tau,
            expectile: self.expectile,
            n_diffusion_steps: self.n_diffusion_steps,
            beta_schedule: self.beta_schedule.clone(),
            n_action_samples: self.n_action_samples,
            m_last_steps: self.m_last_steps,
            clip_sampler: self.clip_sampler,
            ddpm_temperature: self.ddpm_temperature,
            n_updates_per_opt: self.n_updates_per_opt,
            min_transitions_warmup: self.min_transitions_warmup,
            batch_size: self.batch_size,
            critic_batch_size: self.critic_batch_size,
            train: self.train,
            aug_pad: self.aug_pad,
            seed: self.seed,
            device: self.device,
        }
    }
}

impl<Q, V, S> Default for PixelIdqlConfig<Q, V, S>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V: SubModel<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn default() -> Self {
        Self {
            critic_config: Default::default(),
            value_config: Default::default(),
            score_config: Default::default(),
            n_critics: 2,
            gamma: 0.99,
            tau: 0.005,
            actor_tau: 0.001,
            expectile: 0.7,
            n_diffusion_steps: 20,
            beta_schedule: BetaSchedule::Cosine,
            n_action_samples: 64,
            m_last_steps: 0,
            clip_sampler: true,
            ddpm_temperature: 1.0,
            n_updates_per_opt: 1,
            min_transitions_warmup: 1,
            batch_size: 512,
            critic_batch_size: 256,
            train: false,
            aug_pad: 4,
            seed: None,
            device: None,
        }
    }
}

impl<Q, V, S> PixelIdqlConfig<Q, V, S>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V: SubModel<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Sets the configuration of the critic networks.
    pub fn critic_config(mut self, v: CriticConfig<Q::Config>) -> Self {
        self.critic_config = v;
        self
    }

    /// Sets the configuration of the state value network.
    pub fn value_config(mut self, v: ValueConfig<V::Config>) -> Self {
        self.value_config = v;
        self
    }

    /// Sets the configuration of the score model.
    pub fn score_config(mut self, v: ScoreModelConfig<S::Config>) -> Self {
        self.score_config = v;
        self
    }

    /// Sets the number of critics.
    pub fn n_critics(mut self, v: usize) -> Self {
        self.n_critics = v;
        self
    }

    /// Sets the discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the soft update coefficient of the target critics.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Sets the soft update coefficient of the target score model.
    pub fn actor_tau(mut self, v: f64) -> Self {
        self.actor_tau = v;
        self
    }

    /// Sets the expectile of the value objective.
    pub fn expectile(mut self, v: f64) -> Self {
        self.expectile = v;
        self
    }

    /// Sets the number of diffusion steps.
    pub fn n_diffusion_steps(mut self, v: usize) -> Self {
        self.n_diffusion_steps = v;
        self
    }

    /// Sets the beta schedule.
    pub fn beta_schedule(mut self, v: BetaSchedule) -> Self {
        self.beta_schedule = v;
        self
    }

    /// Sets the number of actions sampled per observation.
    pub fn n_action_samples(mut self, v: i64) -> Self {
        self.n_action_samples = v;
        self
    }

    /// Sets the number of extra repetitions of the last reverse step.
    pub fn m_last_steps(mut self, v: usize) -> Self {
        self.m_last_steps = v;
        self
    }

    /// Sets whether the reverse sampler clips intermediate actions.
    pub fn clip_sampler(mut self, v: bool) -> Self {
        self.clip_sampler = v;
        self
    }

    /// Sets the scale of the reverse process variance.
    pub fn ddpm_temperature(mut self, v: f64) -> Self {
        self.ddpm_temperature = v;
        self
    }

    /// Sets the number of parameter updates per optimization step.
    pub fn n_updates_per_opt(mut self, v: usize) -> Self {
        self.n_updates_per_opt = v;
        self
    }

    /// Sets the number of transitions required before optimization starts.
    pub fn min_transitions_warmup(mut self, v: usize) -> Self {
        self.min_transitions_warmup = v;
        self
    }

    /// Sets the batch size of the score model update.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the batch size of the critic and value updates.
    pub fn critic_batch_size(mut self, v: usize) -> Self {
        self.critic_batch_size = v;
        self
    }

    /// Sets the padding of the random shift augmentation.
    pub fn aug_pad(mut self, v: i64) -> Self {
        self.aug_pad = v;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the device.
    pub fn device(mut self, device: tch::Device) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Constructs [`PixelIdqlConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of IDQL agent from {}", path_.to_str().unwrap());
        Ok(b)
    }

    /// Saves [`PixelIdqlConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of IDQL agent into {}", path_.to_str().unwrap());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::{PixelEncoderConfig, SmallCnn, SmallCnnConfig},
        idql::{DdpmConfig, PixelDdpm, PixelDdpmConfig},
        value::{PixelStateActionValue, PixelStateValue, PixelValueConfig},
    };
    use tempdir::TempDir;

    type Q = PixelStateActionValue<SmallCnn>;
    type V = PixelStateValue<SmallCnn>;
    type S = PixelDdpm<SmallCnn>;

    #[test]
    fn test_serde_pixel_idql_config() -> Result<()> {
        let encoder_config = PixelEncoderConfig {
            encoder_config: SmallCnnConfig::default(),
            latent_dim: 50,
        };
        let config: PixelIdqlConfig<Q, V, S> = PixelIdqlConfig::default()
            .critic_config(
                CriticConfig::default().q_config(
                    PixelValueConfig::default()
                        .encoder_config(encoder_config.clone())
                        .action_dim(7),
                ),
            )
            .value_config(
                ValueConfig::default()
                    .v_config(PixelValueConfig::default().encoder_config(encoder_config.clone())),
            )
            .score_config(
                ScoreModelConfig::default().score_config(
                    PixelDdpmConfig::default()
                        .encoder_config(encoder_config)
                        .head_config(DdpmConfig {
                            cond_dim: 50,
                            act_dim: 7,
                            time_dim: 64,
                            hidden_dim: 256,
                            num_blocks: 3,
                        }),
                ),
            )
            .beta_schedule(BetaSchedule::Vp)
            .n_diffusion_steps(20)
            .expectile(0.7)
            .seed(42);

        let dir = TempDir::new("pixel_idql_config")?;
        let path = dir.path().join("config.yaml");

        config.save(&path)?;
        let config_: PixelIdqlConfig<Q, V, S> = PixelIdqlConfig::load(&path)?;
        assert_eq!(config, config_);

        Ok(())
    }
}
