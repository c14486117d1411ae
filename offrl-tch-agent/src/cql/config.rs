//! Configuration of the CQL agent.
use super::{ActorConfig, CriticDecoderConfig, CriticEncoderConfig, TemperatureMode};
use crate::{
    model::{SubModel, SubModel2},
    util::{CriticLoss, CriticReduction, OutDim},
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

/// How the actor is updated.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum ActorUpdate {
    /// SAC-style update maximizing `Q(s, a) - alpha * log pi(a|s)`.
    SoftQ,

    /// Behavioral cloning by maximizing the log probability of dataset actions.
    LogProbBc,
}

/// Configuration of [`PixelCql`](super::PixelCql).
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct PixelCqlConfig<En, Q, P>
where
    En: SubModel<Input = Tensor, Output = Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Configuration of the actor.
    pub actor_config: ActorConfig<P::Config>,
    /// Configuration of the critic encoder tower.
    pub critic_encoder_config: CriticEncoderConfig<En::Config>,
    /// Configuration of the critic decoder towers.
    pub critic_decoder_config: CriticDecoderConfig<Q::Config>,
    /// Mode of the temperature parameter.
    pub temperature_mode: TemperatureMode,
    /// Discount factor.
    pub gamma: f64,
    /// Soft update coefficient of the target towers.
    pub tau: f64,
    /// Epsilon of the tanh-squashing correction.
    pub epsilon: f64,
    /// Lower bound of the log standard deviation of the policy.
    pub min_lstd: f64,
    /// Upper bound of the log standard deviation of the policy.
    pub max_lstd: f64,
    /// The number of parameter updates per optimization step.
    pub n_updates_per_opt: usize,
    /// The number of transitions required before optimization starts.
    pub min_transitions_warmup: usize,
    /// Batch size.
    pub batch_size: usize,
    /// Initial training mode.
    pub train: bool,
    /// Critic loss function.
    pub critic_loss: CriticLoss,
    /// Reduction of the critic ensemble.
    pub critic_reduction: CriticReduction,
    /// Reward scale applied when computing Bellman targets.
    pub reward_scale: f32,
    /// The number of critic decoder towers.
    pub n_critics: usize,
    /// Weight of the conservative penalty.
    pub cql_alpha: f64,
    /// The number of action samples of the conservative penalty
    /// and of the sampled-max backup.
    pub n_action_samples: i64,
    /// Backs up the maximum Q-value over sampled actions instead of the
    /// Q-value of a single policy action.
    pub max_q_backup: bool,
    /// Subtracts the scaled log probability of the next action from the
    /// Bellman target.
    pub backup_entropy: bool,
    /// How the actor is updated.
    pub actor_update: ActorUpdate,
    /// Padding of the random shift augmentation; 0 disables augmentation.
    pub aug_pad: i64,
    /// Augments next observations as well.
    pub aug_next: bool,
    /// Random seed.
    pub seed: Option<i64>,
    /// Device on which the agent runs.
    pub device: Option<Device>,
}

impl<En, Q, P> Clone for PixelCqlConfig<En, Q, P>
where
    En: SubModel<Input = Tensor, Output = Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn clone(&self) -> Self {
        Self {
            actor_config: self.actor_config.clone(),
            critic_encoder_config: self.critic_encoder_config.clone(),
            critic_decoder_config: self.critic_decoder_config.clone(),
            temperature_mode: self.temperature_mode.clone(),
            gamma: self.gamma,
            tau: self.tau,
            epsilon: self.epsilon,
            min_lstd: self.min_lstd,
            max_lstd: self.max_lstd,
            n_updates_per_opt: self.n_updates_per_opt,
            min_transitions_warmup: self.min_transitions_warmup,
            batch_size: self.batch_size,
            train: self.train,
            critic_loss: self.critic_loss.clone(),
            critic_reduction: self.critic_reduction.clone(),
            reward_scale: self.reward_scale,
            n_critics: self.n_critics,
            cql_alpha: self.cql_alpha,
            n_action_samples: self.n_action_samples,
            max_q_backup: self.max_q_backup,
            backup_entropy: self.backup_entropy,
            actor_update: self.actor_update.clone(),
            aug_pad: self.aug_pad,
            aug_next: self.aug_next,
            seed: self.seed,
            device: self.device,
        }
    }
}

impl<En, Q, P> Default for PixelCqlConfig<En, Q, P>
where
    En: SubModel<Input = Tensor, Output = Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    fn default() -> Self {
        Self {
            actor_config: Default::default(),
            critic_encoder_config: Default::default(),
            critic_decoder_config: Default::default(),
            temperature_mode: TemperatureMode::Fix(1.0),
            gamma: 0.99,
            tau: 0.005,
            epsilon: 1e-6,
            min_lstd: -20.0,
            max_lstd: 2.0,
            n_updates_per_opt: 1,
            min_transitions_warmup: 1,
            batch_size: 256,
            train: false,
            critic_loss: CriticLoss::Mse,
            critic_reduction: CriticReduction::Min,
            reward_scale: 1.0,
            n_critics: 2,
            cql_alpha: 5.0,
            n_action_samples: 4,
            max_q_backup: false,
            backup_entropy: false,
            actor_update: ActorUpdate::SoftQ,
            aug_pad: 4,
            aug_next: true,
            seed: None,
            device: None,
        }
    }
}

impl<En, Q, P> PixelCqlConfig<En, Q, P>
where
    En: SubModel<Input = Tensor, Output = Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
{
    /// Sets the configuration of the actor.
    pub fn actor_config(mut self, v: ActorConfig<P::Config>) -> Self {
        self.actor_config = v;
        self
    }

    /// Sets the configuration of the critic encoder tower.
    pub fn critic_encoder_config(mut self, v: CriticEncoderConfig<En::Config>) -> Self {
        self.critic_encoder_config = v;
        self
    }

    /// Sets the configuration of the critic decoder towers.
    pub fn critic_decoder_config(mut self, v: CriticDecoderConfig<Q::Config>) -> Self {
        self.critic_decoder_config = v;
        self
    }

    /// Sets the mode of the temperature parameter.
    pub fn temperature_mode(mut self, v: TemperatureMode) -> Self {
        self.temperature_mode = v;
        self
    }

    /// Enables automatic temperature tuning with the default target
    /// entropy `-action_dim`.
    ///
    /// The action dimension is taken from the actor configuration, so this
    /// must be called after [`Self::actor_config`].
    pub fn auto_temperature(mut self, learning_rate: f64) -> Self {
        let action_dim = self
            .actor_config
            .pi_config
            .as_ref()
            .map(|c| c.get_out_dim())
            .expect("actor_config is not set");
        self.temperature_mode = TemperatureMode::Auto(-(action_dim as f64), learning_rate);
        self
    }

    /// Sets the discount factor.
    pub fn discount_factor(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the soft update coefficient.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
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

    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the critic loss function.
    pub fn critic_loss(mut self, v: CriticLoss) -> Self {
        self.critic_loss = v;
        self
    }

    /// Sets the reduction of the critic ensemble.
    pub fn critic_reduction(mut self, v: CriticReduction) -> Self {
        self.critic_reduction = v;
        self
    }

    /// Sets the reward scale.
    ///
    /// It works for obtaining target values, not the values in logs.
    pub fn reward_scale(mut self, v: f32) -> Self {
        self.reward_scale = v;
        self
    }

    /// Sets the number of critic decoder towers.
    pub fn n_critics(mut self, v: usize) -> Self {
        self.n_critics = v;
        self
    }

    /// Sets the weight of the conservative penalty.
    pub fn cql_alpha(mut self, v: f64) -> Self {
        self.cql_alpha = v;
        self
    }

    /// Sets the number of action samples.
    pub fn n_action_samples(mut self, v: i64) -> Self {
        self.n_action_samples = v;
        self
    }

    /// Enables the sampled-max backup.
    pub fn max_q_backup(mut self, v: bool) -> Self {
        self.max_q_backup = v;
        self
    }

    /// Enables the entropy term of the Bellman backup.
    pub fn backup_entropy(mut self, v: bool) -> Self {
        self.backup_entropy = v;
        self
    }

    /// Sets how the actor is updated.
    pub fn actor_update(mut self, v: ActorUpdate) -> Self {
        self.actor_update = v;
        self
    }

    /// Sets the padding of the random shift augmentation.
    pub fn aug_pad(mut self, v: i64) -> Self {
        self.aug_pad = v;
        self
    }

    /// Sets whether next observations are augmented.
    pub fn aug_next(mut self, v: bool) -> Self {
        self.aug_next = v;
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

    /// Constructs [`PixelCqlConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of CQL agent from {}", path_.to_str().unwrap());
        Ok(b)
    }

    /// Saves [`PixelCqlConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of CQL agent into {}", path_.to_str().unwrap());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::{PixelEncoder, PixelEncoderConfig, SmallCnn, SmallCnnConfig},
        mlp::{Mlp, MlpConfig},
        policy::{GaussianHeadConfig, PixelGaussianPolicy, PixelGaussianPolicyConfig},
    };
    use tempdir::TempDir;

    type En = PixelEncoder<SmallCnn>;
    type P = PixelGaussianPolicy<SmallCnn>;

    #[test]
    fn test_serde_pixel_cql_config() -> Result<()> {
        let encoder_config = PixelEncoderConfig {
            encoder_config: SmallCnnConfig::default(),
            latent_dim: 50,
        };
        let config: PixelCqlConfig<En, Mlp, P> = PixelCqlConfig::default()
            .actor_config(
                ActorConfig::default().pi_config(
                    PixelGaussianPolicyConfig::default()
                        .encoder_config(encoder_config.clone())
                        .head_config(GaussianHeadConfig::new(50, vec![256, 256], 7)),
                ),
            )
            .critic_encoder_config(
                CriticEncoderConfig::default().encoder_config(encoder_config),
            )
            .critic_decoder_config(
                CriticDecoderConfig::default()
                    .q_config(MlpConfig::new(57, vec![256, 256], 1, false)),
            )
            .cql_alpha(5.0)
            .n_action_samples(4)
            .actor_update(ActorUpdate::LogProbBc)
            .seed(42);

        let dir = TempDir::new("pixel_cql_config")?;
        let path = dir.path().join("config.yaml");

        config.save(&path)?;
        let config_: PixelCqlConfig<En, Mlp, P> = PixelCqlConfig::load(&path)?;
        assert_eq!(config, config_);

        Ok(())
    }
}
