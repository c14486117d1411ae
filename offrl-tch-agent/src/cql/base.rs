//! CQL agent.
use super::{ActorUpdate, Actor, CriticDecoder, CriticEncoder, PixelCqlConfig, Temperature};
use crate::{
    augmentation::RandomShift,
    eval_diag::trace_record,
    model::{ModelBase, SubModel, SubModel2},
    policy::{tanh_normal_log_prob, tanh_normal_sample},
    util::{track, CriticLoss, CriticReduction, OutDim},
};
use anyhow::Result;
use offrl_core::{
    record::{Record, RecordValue},
    Agent, Configurable, Env, Policy, ReplayBufferBase, TransitionBatch,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, fs, marker::PhantomData, path::Path};
use tch::{no_grad, Kind, Tensor};

/// Conservative Q-learning agent over pixel observations.
///
/// The critic consists of an encoder tower shared by an ensemble of decoder
/// towers; both have slowly-tracking target copies refreshed by soft
/// updates. The actor is a tanh-squashed Gaussian policy with its own
/// pixel encoder. During optimization, observations are augmented with
/// batched random shifts and Q-values of sampled out-of-distribution
/// actions are penalized relative to dataset actions.
pub struct PixelCql<E, En, Q, P, R>
where
    E: Env,
    En: SubModel<Input = Tensor, Output = Tensor>,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    pub(super) critic_enc: CriticEncoder<En>,
    pub(super) critic_enc_tgt: CriticEncoder<En>,
    pub(super) qnets: Vec<CriticDecoder<Q>>,
    pub(super) qnets_tgt: Vec<CriticDecoder<Q>>,
    pub(super) pi: Actor<P>,
    pub(super) temperature: Temperature,
    pub(super) aug: Option<RandomShift>,
    pub(super) gamma: f64,
    pub(super) tau: f64,
    pub(super) epsilon: f64,
    pub(super) min_lstd: f64,
    pub(super) max_lstd: f64,
    pub(super) n_updates_per_opt: usize,
    pub(super) min_transitions_warmup: usize,
    pub(super) batch_size: usize,
    pub(super) train: bool,
    pub(super) reward_scale: f32,
    pub(super) critic_loss: CriticLoss,
    pub(super) critic_reduction: CriticReduction,
    pub(super) cql_alpha: f64,
    pub(super) n_action_samples: i64,
    pub(super) max_q_backup: bool,
    pub(super) backup_entropy: bool,
    pub(super) actor_update: ActorUpdate,
    pub(super) aug_next: bool,
    pub(super) n_opts: usize,
    pub(super) device: tch::Device,
    pub(super) phantom: PhantomData<(E, R)>,
}

impl<E, En, Q, P, R> PixelCql<E, En, Q, P, R>
where
    E: Env,
    En: SubModel<Input = Tensor, Output = Tensor>,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    /// Samples an action and its log probability at the given observations.
    fn action_logp(&self, obs: &Tensor) -> (Tensor, Tensor) {
        let (mean, lstd) = self.pi.forward(obs);
        let lstd = lstd.clip(self.min_lstd, self.max_lstd);
        tanh_normal_sample(&mean, &lstd, self.epsilon)
    }

    fn qvals(&self, qnets: &[CriticDecoder<Q>], latent: &Tensor, act: &Tensor) -> Vec<Tensor> {
        qnets
            .iter()
            .map(|qnet| qnet.forward(latent, act).squeeze())
            .collect()
    }

    /// Reduces the Q-values of the ensemble at `(latent, act)`.
    fn qvals_reduced(&self, qnets: &[CriticDecoder<Q>], latent: &Tensor, act: &Tensor) -> Tensor {
        let qvals = Tensor::vstack(&self.qvals(qnets, latent, act));
        self.critic_reduction.reduce(&qvals)
    }

    fn augment(&self, pixels: &Tensor) -> Tensor {
        match &self.aug {
            Some(aug) => aug.apply(pixels),
            None => pixels.shallow_clone(),
        }
    }

    /// Bellman target of the critic update.
    fn critic_tgt(&self, reward: &Tensor, not_terminated: &Tensor, next_obs: &Tensor) -> Tensor {
        no_grad(|| {
            let batch_size = next_obs.size()[0];
            let next_latent = self.critic_enc_tgt.forward(next_obs);

            let next_q = if self.max_q_backup {
                let n = self.n_action_samples;
                let next_obs_rep = next_obs.repeat_interleave_self_int(n, 0, None);
                let (next_a, _) = self.action_logp(&next_obs_rep);
                let next_latent_rep = next_latent.repeat_interleave_self_int(n, 0, None);
                let qvals: Vec<_> = self
                    .qnets_tgt
                    .iter()
                    .map(|qnet| {
                        qnet.forward(&next_latent_rep, &next_a)
                            .reshape([batch_size, n])
                            .max_dim(1, false)
                            .0
                    })
                    .collect();
                self.critic_reduction.reduce(&Tensor::vstack(&qvals))
            } else {
                let (next_a, next_logp) = self.action_logp(next_obs);
                let next_q = self.qvals_reduced(&self.qnets_tgt, &next_latent, &next_a);
                if self.backup_entropy {
                    next_q - self.temperature.alpha() * next_logp
                } else {
                    next_q
                }
            };

            reward * self.reward_scale as f64
                + not_terminated * Tensor::from(self.gamma as f32) * next_q
        })
    }

    /// Conservative penalty of one decoder tower.
    ///
    /// Estimates `logsumexp_a Q(s, a)` with importance-corrected uniform
    /// actions and policy actions at the current and next observations,
    /// and pushes it down relative to the Q-value of the dataset action.
    fn cql_penalty(
        &self,
        qnet: &CriticDecoder<Q>,
        latent: &Tensor,
        pred: &Tensor,
        rand_act: &Tensor,
        pol_act: &Tensor,
        pol_logp: &Tensor,
        pol_next_act: &Tensor,
        pol_next_logp: &Tensor,
    ) -> Tensor {
        let n = self.n_action_samples;
        let batch_size = pred.size()[0];
        let latent_rep = latent.repeat_interleave_self_int(n, 0, None);

        // density of the uniform proposal over [-1, 1]^d
        let act_dim = rand_act.size()[1];
        let rand_density = (act_dim as f64) * 0.5f64.ln();

        let q_rand = qnet.forward(&latent_rep, rand_act).reshape([batch_size, n]);
        let q_pol = qnet.forward(&latent_rep, pol_act).reshape([batch_size, n]);
        let q_pol_next = qnet
            .forward(&latent_rep, pol_next_act)
            .reshape([batch_size, n]);

        let cat_q = Tensor::cat(
            &[
                q_rand - Tensor::from(rand_density as f32),
                q_pol - pol_logp.reshape([batch_size, n]),
                q_pol_next - pol_next_logp.reshape([batch_size, n]),
            ],
            1,
        );

        (cat_q.logsumexp([1], false) - pred).mean(Kind::Float) * self.cql_alpha
    }

    fn update_critic(&mut self, obs: &Tensor, act: &Tensor, next_obs: &Tensor, reward: &Tensor, not_terminated: &Tensor) -> (f32, f32) {
        let tgt = self.critic_tgt(reward, not_terminated, next_obs);

        let latent = self.critic_enc.forward(obs);
        let preds = self.qvals(&self.qnets, &latent, act);

        let bellman_losses: Vec<_> = match self.critic_loss {
            CriticLoss::Mse => preds
                .iter()
                .map(|pred| pred.mse_loss(&tgt, tch::Reduction::Mean))
                .collect(),
            CriticLoss::SmoothL1 => preds
                .iter()
                .map(|pred| pred.smooth_l1_loss(&tgt, tch::Reduction::Mean, 1.0))
                .collect(),
        };

        let (penalties, loss) = if self.cql_alpha > 0.0 {
            let n = self.n_action_samples;
            let (rand_act, pol_act, pol_logp, pol_next_act, pol_next_logp) = no_grad(|| {
                let act_dim = act.size()[1];
                let n_rep = obs.size()[0] * n;
                let rand_act = Tensor::rand([n_rep, act_dim], tch::kind::FLOAT_CPU)
                    .to(self.device)
                    * 2.0
                    - 1.0;
                let (pol_act, pol_logp) =
                    self.action_logp(&obs.repeat_interleave_self_int(n, 0, None));
                let (pol_next_act, pol_next_logp) =
                    self.action_logp(&next_obs.repeat_interleave_self_int(n, 0, None));
                (rand_act, pol_act, pol_logp, pol_next_act, pol_next_logp)
            });

            let penalties: Vec<_> = self
                .qnets
                .iter()
                .zip(&preds)
                .map(|(qnet, pred)| {
                    self.cql_penalty(
                        qnet,
                        &latent,
                        pred,
                        &rand_act,
                        &pol_act,
                        &pol_logp,
                        &pol_next_act,
                        &pol_next_logp,
                    )
                })
                .collect();

            let loss = bellman_losses.iter().sum::<Tensor>() + penalties.iter().sum::<Tensor>();
            (penalties, loss)
        } else {
            (vec![], bellman_losses.iter().sum::<Tensor>())
        };

        // the encoder tower and every decoder tower share this loss
        self.critic_enc.zero_grad();
        for qnet in self.qnets.iter_mut() {
            qnet.zero_grad();
        }
        loss.backward();
        self.critic_enc.step();
        for qnet in self.qnets.iter_mut() {
            qnet.step();
        }

        let n = self.qnets.len() as f32;
        let bellman = bellman_losses
            .iter()
            .map(|l| l.double_value(&[]) as f32)
            .sum::<f32>()
            / n;
        let penalty = match penalties.is_empty() {
            true => 0.0,
            false => penalties.iter().map(|l| l.double_value(&[]) as f32).sum::<f32>() / n,
        };

        (bellman, penalty)
    }

    fn update_actor(&mut self, obs: &Tensor, act: &Tensor) -> (f32, f32) {
        let (loss, entropy) = match self.actor_update {
            ActorUpdate::SoftQ => {
                let (a, logp) = self.action_logp(obs);
                self.temperature.update(&logp);

                let latent = no_grad(|| self.critic_enc.forward(obs));
                let qval = self.qvals_reduced(&self.qnets, &latent, &a);
                let loss = (self.temperature.alpha() * &logp - qval).mean(Kind::Float);
                let entropy = -logp.mean(Kind::Float).double_value(&[]) as f32;
                (loss, entropy)
            }
            ActorUpdate::LogProbBc => {
                let (mean, lstd) = self.pi.forward(obs);
                let lstd = lstd.clip(self.min_lstd, self.max_lstd);
                let logp_data = tanh_normal_log_prob(&mean, &lstd, act, self.epsilon);
                let loss = -logp_data.mean(Kind::Float);

                let (_, logp) = no_grad(|| self.action_logp(obs));
                self.temperature.update(&logp);
                let entropy = -logp.mean(Kind::Float).double_value(&[]) as f32;
                (loss, entropy)
            }
        };

        self.pi.backward_step(&loss);

        (loss.double_value(&[]) as f32, entropy)
    }

    fn soft_update(&mut self) {
        track(&mut self.critic_enc_tgt, &self.critic_enc, self.tau);
        for (qnet_tgt, qnet) in self.qnets_tgt.iter_mut().zip(&self.qnets) {
            track(qnet_tgt, qnet, self.tau);
        }
    }

    fn opt_(&mut self, buffer: &mut R) -> Record {
        let mut loss_critic = 0f32;
        let mut loss_cql = 0f32;
        let mut loss_actor = 0f32;
        let mut entropy = 0f32;

        for _ in 0..self.n_updates_per_opt {
            let batch = buffer.batch(self.batch_size).unwrap();
            let (obs, act, next_obs, reward, is_terminated, _, _, _) = batch.unpack();

            let obs: Tensor = obs.into();
            let obs = self.augment(&obs.to(self.device));
            let next_obs: Tensor = next_obs.into();
            let next_obs = next_obs.to(self.device);
            let next_obs = match self.aug_next {
                true => self.augment(&next_obs),
                false => next_obs.to_kind(Kind::Float),
            };
            let act: Tensor = act.into();
            let act = act.to(self.device).clip(-0.999, 0.999);
            let reward = Tensor::from_slice(&reward[..]).to(self.device);
            let not_terminated = Tensor::from(1f32)
                - Tensor::from_slice(&is_terminated[..])
                    .to_kind(Kind::Float)
                    .to(self.device);

            let (bellman, penalty) =
                self.update_critic(&obs, &act, &next_obs, &reward, &not_terminated);
            self.soft_update();
            let (actor, ent) = self.update_actor(&obs, &act);

            loss_critic += bellman;
            loss_cql += penalty;
            loss_actor += actor;
            entropy += ent;
            self.n_opts += 1;
        }

        let n = self.n_updates_per_opt as f32;

        Record::from_slice(&[
            ("loss_critic", RecordValue::Scalar(loss_critic / n)),
            ("loss_cql", RecordValue::Scalar(loss_cql / n)),
            ("loss_actor", RecordValue::Scalar(loss_actor / n)),
            ("entropy", RecordValue::Scalar(entropy / n)),
            (
                "alpha",
                RecordValue::Scalar(self.temperature.alpha().double_value(&[0]) as f32),
            ),
        ])
    }

    /// Per-step value diagnostics of a recorded trajectory.
    ///
    /// Computes ensemble Q-values of the dataset actions, bootstrapped
    /// target values with policy actions at the next observations, and
    /// Bellman errors, and returns them as [`RecordValue::Array1`] entries
    /// together with rewards and masks.
    pub fn value_reward_trace(
        &self,
        obs: &Tensor,
        act: &Tensor,
        next_obs: &Tensor,
        rewards: &[f32],
        masks: &[f32],
    ) -> Record {
        no_grad(|| {
            let latent = self.critic_enc.forward(obs);
            let q_pred = self.qvals_reduced(&self.qnets, &latent, act);

            let (next_a, _) = self.action_logp(next_obs);
            let next_latent = self.critic_enc_tgt.forward(next_obs);
            let next_q = self.qvals_reduced(&self.qnets_tgt, &next_latent, &next_a);

            let reward = Tensor::from_slice(rewards).to(self.device);
            let mask = Tensor::from_slice(masks).to(self.device);
            let tgt = reward + Tensor::from(self.gamma as f32) * mask * next_q;

            let bellman = (&q_pred - &tgt).pow_tensor_scalar(2.0);

            trace_record(&q_pred, &tgt, &bellman, rewards, masks)
        })
    }
}

impl<E, En, Q, P, R> Policy<E> for PixelCql<E, En, Q, P, R>
where
    E: Env,
    En: SubModel<Input = Tensor, Output = Tensor>,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    fn sample(&mut self, obs: &E::Obs) -> E::Act {
        let obs: Tensor = obs.clone().into();
        let obs = obs.to(self.device);
        let (mean, lstd) = self.pi.forward(&obs);
        let act = if self.train {
            let std = lstd.clip(self.min_lstd, self.max_lstd).exp();
            std * mean.randn_like() + mean
        } else {
            mean
        };
        act.tanh().into()
    }
}

impl<E, En, Q, P, R> Configurable for PixelCql<E, En, Q, P, R>
where
    E: Env,
    En: SubModel<Input = Tensor, Output = Tensor>,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    type Config = PixelCqlConfig<En, Q, P>;

    /// Constructs a [`PixelCql`] agent.
    fn build(config: Self::Config) -> Self {
        let device = config
            .device
            .expect("No device is given for PixelCql agent")
            .into();

        if let Some(seed) = config.seed.as_ref() {
            tch::manual_seed(*seed);
            fastrand::seed(*seed as u64);
        }

        let pi = Actor::build(config.actor_config, device).unwrap();
        let critic_enc = CriticEncoder::build(config.critic_encoder_config, device).unwrap();
        let critic_enc_tgt = critic_enc.clone();
        let mut qnets = vec![];
        let mut qnets_tgt = vec![];
        for _ in 0..config.n_critics {
            let qnet = CriticDecoder::build(config.critic_decoder_config.clone(), device).unwrap();
            qnets_tgt.push(qnet.clone());
            qnets.push(qnet);
        }

        let aug = match config.aug_pad {
            0 => None,
            pad => Some(RandomShift::new(pad)),
        };

        PixelCql {
            critic_enc,
            critic_enc_tgt,
            qnets,
            qnets_tgt,
            pi,
            temperature: Temperature::new(config.temperature_mode, device),
            aug,
            gamma: config.gamma,
            tau: config.tau,
            epsilon: config.epsilon,
            min_lstd: config.min_lstd,
            max_lstd: config.max_lstd,
            n_updates_per_opt: config.n_updates_per_opt,
            min_transitions_warmup: config.min_transitions_warmup,
            batch_size: config.batch_size,
            train: config.train,
            reward_scale: config.reward_scale,
            critic_loss: config.critic_loss,
            critic_reduction: config.critic_reduction,
            cql_alpha: config.cql_alpha,
            n_action_samples: config.n_action_samples,
            max_q_backup: config.max_q_backup,
            backup_entropy: config.backup_entropy,
            actor_update: config.actor_update,
            aug_next: config.aug_next,
            n_opts: 0,
            device,
            phantom: PhantomData,
        }
    }
}

impl<E, En, Q, P, R> Agent<E, R> for PixelCql<E, En, Q, P, R>
where
    E: Env,
    En: SubModel<Input = Tensor, Output = Tensor>,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    P: SubModel<Input = Tensor, Output = (Tensor, Tensor)>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    En::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    P::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn opt(&mut self, buffer: &mut R) -> Option<Record> {
        if buffer.len() >= self.min_transitions_warmup {
            Some(self.opt_(buffer))
        } else {
            None
        }
    }

    fn save_params<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        fs::create_dir_all(&path)?;
        let path = path.as_ref();
        self.critic_enc.save(path.join("critic_enc.pt.tch"))?;
        self.critic_enc_tgt
            .save(path.join("critic_enc_tgt.pt.tch"))?;
        for (i, (qnet, qnet_tgt)) in self.qnets.iter().zip(&self.qnets_tgt).enumerate() {
            qnet.save(path.join(format!("qnet_{}.pt.tch", i)))?;
            qnet_tgt.save(path.join(format!("qnet_tgt_{}.pt.tch", i)))?;
        }
        self.pi.save(path.join("actor.pt.tch"))?;
        self.temperature.save(path.join("temperature.pt.tch"))?;
        Ok(())
    }

    fn load_params<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.critic_enc.load(path.join("critic_enc.pt.tch"))?;
        self.critic_enc_tgt
            .load(path.join("critic_enc_tgt.pt.tch"))?;
        for (i, (qnet, qnet_tgt)) in self.qnets.iter_mut().zip(&mut self.qnets_tgt).enumerate() {
            qnet.load(path.join(format!("qnet_{}.pt.tch", i)))?;
            qnet_tgt.load(path.join(format!("qnet_tgt_{}.pt.tch", i)))?;
        }
        self.pi.load(path.join("actor.pt.tch"))?;
        self.temperature.load(path.join("temperature.pt.tch"))?;
        Ok(())
    }
}
