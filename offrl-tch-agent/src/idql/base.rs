//! IDQL agent.
use super::{ddpm_sampler, Critic, DdpmSchedule, PixelIdqlConfig, ScoreModel, Value};
use crate::{
    augmentation::RandomShift,
    model::{ModelBase, SubModel, SubModel2, SubModel3},
    util::{track, OutDim},
};
use anyhow::Result;
use offrl_core::{
    record::{Record, RecordValue},
    Agent, Configurable, Env, Policy, ReplayBufferBase, TransitionBatch,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, fs, marker::PhantomData, path::Path};
use tch::{no_grad, Kind, Tensor};

/// Asymmetric squared loss of implicit Q-learning.
///
/// `expectile_loss(d, e) = |e - 1[d < 0]| * d^2`, elementwise.
pub fn expectile_loss(diff: &Tensor, expectile: f64) -> Tensor {
    let weight = diff.lt(0.0).to_kind(Kind::Float) * (1.0 - 2.0 * expectile) + expectile;
    weight * diff.pow_tensor_scalar(2.0)
}

/// Implicit diffusion Q-learning agent over pixel observations.
///
/// A critic ensemble regresses onto value-bootstrapped Bellman targets
/// while a state value network tracks an expectile of the target critics.
/// The policy is a DDPM noise model trained by denoising dataset actions;
/// its slowly-tracking target copy drives the reverse sampler at decision
/// time, and the executed action is the sampled candidate with the highest
/// target Q-value.
pub struct PixelIdql<E, Q, V, S, R>
where
    E: Env,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    V: SubModel<Input = Tensor, Output = Tensor>,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    pub(super) qnets: Vec<Critic<Q>>,
    pub(super) qnets_tgt: Vec<Critic<Q>>,
    pub(super) value: Value<V>,
    pub(super) score: ScoreModel<S>,
    pub(super) score_tgt: ScoreModel<S>,
    pub(super) schedule: DdpmSchedule,
    pub(super) aug: Option<RandomShift>,
    pub(super) act_dim: i64,
    pub(super) gamma: f64,
    pub(super) tau: f64,
    pub(super) actor_tau: f64,
    pub(super) expectile: f64,
    pub(super) n_action_samples: i64,
    pub(super) m_last_steps: usize,
    pub(super) clip_sampler: bool,
    pub(super) ddpm_temperature: f64,
    pub(super) n_updates_per_opt: usize,
    pub(super) min_transitions_warmup: usize,
    pub(super) batch_size: usize,
    pub(super) critic_batch_size: usize,
    pub(super) train: bool,
    pub(super) n_opts: usize,
    pub(super) device: tch::Device,
    pub(super) phantom: PhantomData<(E, R)>,
}

impl<E, Q, V, S, R> PixelIdql<E, Q, V, S, R>
where
    E: Env,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    V: SubModel<Input = Tensor, Output = Tensor>,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    fn augment(&self, pixels: &Tensor) -> Tensor {
        match &self.aug {
            Some(aug) => aug.apply(pixels),
            None => pixels.shallow_clone(),
        }
    }

    /// Minimum Q-value of the target ensemble.
    fn min_q_tgt(&self, obs: &Tensor, act: &Tensor) -> Tensor {
        let qvals: Vec<_> = self
            .qnets_tgt
            .iter()
            .map(|qnet| qnet.forward(obs, act).squeeze())
            .collect();
        Tensor::vstack(&qvals).min_dim(0, false).0
    }

    /// Score model update by denoising dataset actions.
    fn update_score(&mut self, obs: &Tensor, act: &Tensor) -> f32 {
        let batch_size = act.size()[0];
        let t = Tensor::randint(
            self.schedule.len() as i64,
            [batch_size],
            (Kind::Int64, self.device),
        );
        let noise = Tensor::randn([batch_size, self.act_dim], (Kind::Float, self.device));

        let alpha_hats = self.schedule.alpha_hats_t.index_select(0, &t).unsqueeze(1);
        let noisy_act =
            alpha_hats.sqrt() * act + (Tensor::from(1f32) - &alpha_hats).sqrt() * &noise;
        let time = t.unsqueeze(1).to_kind(Kind::Float);

        let eps_pred = self.score.forward(obs, &noisy_act, &time);
        let loss = (eps_pred - noise)
            .pow_tensor_scalar(2.0)
            .sum_dim_intlist(Some([-1i64].as_slice()), false, Kind::Float)
            .mean(Kind::Float);

        self.score.backward_step(&loss);
        track(&mut self.score_tgt, &self.score, self.actor_tau);

        loss.double_value(&[]) as f32
    }

    /// Value update towards an expectile of the target critics.
    fn update_value(&mut self, obs: &Tensor, act: &Tensor) -> (f32, f32) {
        let q = no_grad(|| self.min_q_tgt(obs, act));
        let v = self.value.forward(obs).squeeze();
        let loss = expectile_loss(&(q - &v), self.expectile).mean(Kind::Float);

        self.value.backward_step(&loss);

        (
            loss.double_value(&[]) as f32,
            v.mean(Kind::Float).double_value(&[]) as f32,
        )
    }

    /// Critic update with value-bootstrapped Bellman targets.
    fn update_critic(
        &mut self,
        obs: &Tensor,
        act: &Tensor,
        next_obs: &Tensor,
        reward: &Tensor,
        not_terminated: &Tensor,
    ) -> (f32, f32) {
        let tgt = no_grad(|| {
            let next_v = self.value.forward(next_obs).squeeze();
            reward + not_terminated * Tensor::from(self.gamma as f32) * next_v
        });

        let mut loss_critic = 0f32;
        let mut q_mean = 0f32;
        for qnet in self.qnets.iter_mut() {
            let pred = qnet.forward(obs, act).squeeze();
            let loss = pred.mse_loss(&tgt, tch::Reduction::Mean);
            qnet.backward_step(&loss);
            loss_critic += loss.double_value(&[]) as f32;
            q_mean += pred.mean(Kind::Float).double_value(&[]) as f32;
        }

        for (qnet_tgt, qnet) in self.qnets_tgt.iter_mut().zip(&self.qnets) {
            track(qnet_tgt, qnet, self.tau);
        }

        let n = self.qnets.len() as f32;
        (loss_critic / n, q_mean / n)
    }

    fn opt_(&mut self, buffer: &mut R) -> Record {
        let mut loss_actor = 0f32;
        let mut loss_value = 0f32;
        let mut loss_critic = 0f32;
        let mut v_mean = 0f32;
        let mut q_mean = 0f32;

        for _ in 0..self.n_updates_per_opt {
            let batch = buffer.batch(self.batch_size).unwrap();
            let (obs, act, next_obs, reward, is_terminated, _, _, _) = batch.unpack();

            let obs: Tensor = obs.into();
            let obs = self.augment(&obs.to(self.device));
            let next_obs: Tensor = next_obs.into();
            let next_obs = self.augment(&next_obs.to(self.device));
            let act: Tensor = act.into();
            let act = act.to(self.device);
            let reward = Tensor::from_slice(&reward[..]).to(self.device);
            let not_terminated = Tensor::from(1f32)
                - Tensor::from_slice(&is_terminated[..])
                    .to_kind(Kind::Float)
                    .to(self.device);

            // two score model steps per critic and value step
            let batch_size = obs.size()[0];
            let half = batch_size / 2;
            self.update_score(&obs.narrow(0, 0, half), &act.narrow(0, 0, half));
            loss_actor += self.update_score(
                &obs.narrow(0, half, batch_size - half),
                &act.narrow(0, half, batch_size - half),
            );

            let n = (self.critic_batch_size as i64).min(batch_size);
            let obs = obs.narrow(0, 0, n);
            let act = act.narrow(0, 0, n);
            let next_obs = next_obs.narrow(0, 0, n);
            let reward = reward.narrow(0, 0, n);
            let not_terminated = not_terminated.narrow(0, 0, n);

            let (lv, v) = self.update_value(&obs, &act);
            let (lc, q) = self.update_critic(&obs, &act, &next_obs, &reward, &not_terminated);

            loss_value += lv;
            loss_critic += lc;
            v_mean += v;
            q_mean += q;
            self.n_opts += 1;
        }

        let n = self.n_updates_per_opt as f32;

        Record::from_slice(&[
            ("loss_actor", RecordValue::Scalar(loss_actor / n)),
            ("loss_value", RecordValue::Scalar(loss_value / n)),
            ("loss_critic", RecordValue::Scalar(loss_critic / n)),
            ("v", RecordValue::Scalar(v_mean / n)),
            ("q", RecordValue::Scalar(q_mean / n)),
        ])
    }

    /// Samples candidate actions with the target score model and returns
    /// the one with the highest target Q-value.
    fn best_of_n(&self, obs: &Tensor) -> Tensor {
        no_grad(|| {
            let obs_rep = obs.repeat([self.n_action_samples, 1, 1, 1]);
            let actions = ddpm_sampler(
                self.score_tgt.inner(),
                &obs_rep,
                self.act_dim,
                &self.schedule,
                self.ddpm_temperature,
                self.m_last_steps,
                self.clip_sampler,
            );
            let qs = self.min_q_tgt(&obs_rep, &actions);
            let idx = qs.argmax(0, false).int64_value(&[]);
            actions.narrow(0, idx, 1)
        })
    }
}

impl<E, Q, V, S, R> Policy<E> for PixelIdql<E, Q, V, S, R>
where
    E: Env,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    V: SubModel<Input = Tensor, Output = Tensor>,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    fn sample(&mut self, obs: &E::Obs) -> E::Act {
        let obs: Tensor = obs.clone().into();
        let obs = obs.to(self.device);
        self.best_of_n(&obs).into()
    }
}

impl<E, Q, V, S, R> Configurable for PixelIdql<E, Q, V, S, R>
where
    E: Env,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    V: SubModel<Input = Tensor, Output = Tensor>,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
    R: ReplayBufferBase,
    R::Batch: TransitionBatch,
    <R::Batch as TransitionBatch>::ObsBatch: Into<Tensor>,
    <R::Batch as TransitionBatch>::ActBatch: Into<Tensor>,
{
    type Config = PixelIdqlConfig<Q, V, S>;

    /// Constructs a [`PixelIdql`] agent.
    fn build(config: Self::Config) -> Self {
        let device = config
            .device
            .expect("No device is given for PixelIdql agent")
            .into();

        if let Some(seed) = config.seed.as_ref() {
            tch::manual_seed(*seed);
            fastrand::seed(*seed as u64);
        }

        let act_dim = config
            .score_config
            .score_config
            .as_ref()
            .expect("score_config is not set.")
            .get_out_dim();

        let mut qnets = vec![];
        let mut qnets_tgt = vec![];
        for _ in 0..config.n_critics {
            let qnet = Critic::build(config.critic_config.clone(), device).unwrap();
            qnets_tgt.push(qnet.clone());
            qnets.push(qnet);
        }
        let value = Value::build(config.value_config, device).unwrap();
        let score = ScoreModel::build(config.score_config, device).unwrap();
        let score_tgt = score.clone();

        let schedule = DdpmSchedule::new(&config.beta_schedule, config.n_diffusion_steps, device);

        let aug = match config.aug_pad {
            0 => None,
            pad => Some(RandomShift::new(pad)),
        };

        PixelIdql {
            qnets,
            qnets_tgt,
            value,
            score,
            score_tgt,
            schedule,
            aug,
            act_dim,
            gamma: config.gamma,
            tau: config.tau,
            actor_tau: config.actor_tau,
            expectile: config.expectile,
            n_action_samples: config.n_action_samples,
            m_last_steps: config.m_last_steps,
            clip_sampler: config.clip_sampler,
            ddpm_temperature: config.ddpm_temperature,
            n_updates_per_opt: config.n_updates_per_opt,
            min_transitions_warmup: config.min_transitions_warmup,
            batch_size: config.batch_size,
            critic_batch_size: config.critic_batch_size,
            train: config.train,
            n_opts: 0,
            device,
            phantom: PhantomData,
        }
    }
}

impl<E, Q, V, S, R> Agent<E, R> for PixelIdql<E, Q, V, S, R>
where
    E: Env,
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    V: SubModel<Input = Tensor, Output = Tensor>,
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    E::Obs: Into<Tensor>,
    E::Act: From<Tensor>,
    Q::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    V::Config: DeserializeOwned + Serialize + Debug + PartialEq + Clone,
    S::Config: DeserializeOwned + Serialize + OutDim + Debug + PartialEq + Clone,
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
        for (i, (qnet, qnet_tgt)) in self.qnets.iter().zip(&self.qnets_tgt).enumerate() {
            qnet.save(path.join(format!("qnet_{}.pt.tch", i)))?;
            qnet_tgt.save(path.join(format!("qnet_tgt_{}.pt.tch", i)))?;
        }
        self.value.save(path.join("value.pt.tch"))?;
        self.score.save(path.join("score.pt.tch"))?;
        self.score_tgt.save(path.join("score_tgt.pt.tch"))?;
        Ok(())
    }

    fn load_params<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let path = path.as_ref();
        for (i, (qnet, qnet_tgt)) in self.qnets.iter_mut().zip(&mut self.qnets_tgt).enumerate() {
            qnet.load(path.join(format!("qnet_{}.pt.tch", i)))?;
            qnet_tgt.load(path.join(format!("qnet_tgt_{}.pt.tch", i)))?;
        }
        self.value.load(path.join("value.pt.tch"))?;
        self.score.load(path.join("score.pt.tch"))?;
        self.score_tgt.load(path.join("score_tgt.pt.tch"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::expectile_loss;
    use tch::Tensor;

    #[test]
    fn test_expectile_loss() {
        let diff = Tensor::from_slice(&[2.0f32, -2.0]);

        // expectile 0.5 reduces to half the squared error
        let loss = expectile_loss(&diff, 0.5);
        assert_eq!(
            Vec::<f32>::try_from(&loss).unwrap(),
            vec![2.0, 2.0]
        );

        // an expectile above 0.5 penalizes positive residuals more
        let loss = expectile_loss(&diff, 0.7);
        let loss = Vec::<f32>::try_from(&loss).unwrap();
        assert!((loss[0] - 2.8).abs() < 1e-6);
        assert!((loss[1] - 1.2).abs() < 1e-6);
    }
}
