//! Train an [`Agent`] from a fixed dataset.
mod config;
use std::{
    marker::PhantomData,
    time::{Duration, SystemTime},
};

use crate::{
    record::{Record, RecordValue::Scalar, Recorder},
    Agent, Env, Evaluator, ReplayBufferBase,
};
use anyhow::Result;
pub use config::TrainerConfig;
use log::info;

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Manages the offline training loop and related objects.
///
/// Unlike online training, no environment interaction happens during
/// optimization: every optimization step draws batches from a replay buffer
/// that has been filled with a dataset beforehand. The environment is used
/// only for evaluation rollouts.
///
/// # Training loop
///
/// 0. Given an agent implementing [`Agent`], a filled replay buffer, a
///    recorder implementing [`Recorder`] and an [`Evaluator`].
/// 1. Reset a counter of the optimization steps: `opt_steps = 0`.
/// 2. Perform an optimization step for the agent with transition batches
///    sampled from the replay buffer, then `opt_steps += 1`.
///     * The agent can skip an optimization step, for example during a
///       warmup period of the buffer. In this case, the following steps are
///       skipped as well.
/// 3. If `opt_steps % eval_interval == 0`:
///     * Switch the agent to evaluation mode, run evaluation episodes and
///       record the mean episode return as `eval_reward`.
///     * If the evaluation result is the best so far, save the agent's
///       parameters in `(model_dir)/best`.
/// 4. If `opt_steps % record_interval == 0`, compute optimization steps per
///    second and flush aggregated records.
/// 5. If `opt_steps % save_interval == 0`, save the agent's parameters in
///    `(model_dir)/(opt_steps)`.
/// 6. If `opt_steps == max_opts`, finish training; otherwise go back to
///    step 2.
///
/// # Interaction of objects
///
/// ```mermaid
/// graph LR
///     B[ReplayBufferBase]-->|TransitionBatch|A[Agent]
///     A-->|Env::Act|C[Env]
///     C-->|Env::Obs|A
///     A-->|Record|D[Recorder]
/// ```
pub struct OfflineTrainer<E, R>
where
    E: Env,
    R: ReplayBufferBase,
{
    /// Where to save the trained model.
    model_dir: Option<String>,

    /// Interval of evaluation in optimization steps.
    eval_interval: usize,

    /// Interval of flushing records in optimization steps.
    record_interval: usize,

    /// Interval of saving the model in optimization steps.
    save_interval: usize,

    /// The maximal number of optimization steps.
    max_opts: usize,

    /// Optimization steps for computing optimization steps per second.
    opt_steps_for_ops: usize,

    /// Timer for computing optimization steps per second.
    timer_for_ops: Duration,

    phantom: PhantomData<(E, R)>,
}

impl<E, R> OfflineTrainer<E, R>
where
    E: Env,
    R: ReplayBufferBase,
{
    /// Constructs a trainer.
    pub fn build(config: TrainerConfig) -> Self {
        Self {
            model_dir: config.model_dir,
            eval_interval: config.eval_interval,
            record_interval: config.record_interval,
            save_interval: config.save_interval,
            max_opts: config.max_opts,
            opt_steps_for_ops: 0,
            timer_for_ops: Duration::new(0, 0),
            phantom: PhantomData,
        }
    }

    fn save_model<A: Agent<E, R>>(agent: &A, model_dir: String) {
        match agent.save_params(&model_dir) {
            Ok(()) => info!("Saved the model in {:?}.", &model_dir),
            Err(_) => info!("Failed to save model in {:?}.", &model_dir),
        }
    }

    fn save_best_model<A: Agent<E, R>>(agent: &A, model_dir: String) {
        let model_dir = model_dir + "/best";
        Self::save_model(agent, model_dir);
    }

    fn save_model_with_steps<A: Agent<E, R>>(agent: &A, model_dir: String, steps: usize) {
        let model_dir = model_dir + format!("/{}", steps).as_str();
        Self::save_model(agent, model_dir);
    }

    /// Returns optimization steps per second, then resets the internal counter.
    fn opt_steps_per_sec(&mut self) -> f32 {
        let osps = 1000. * self.opt_steps_for_ops as f32 / (self.timer_for_ops.as_millis() as f32);
        self.opt_steps_for_ops = 0;
        self.timer_for_ops = Duration::new(0, 0);
        osps
    }

    /// Performs a single optimization step.
    ///
    /// The second return value is `true` if the agent did an optimization
    /// step (it may skip during a warmup period).
    pub fn train_step<A: Agent<E, R>>(
        &mut self,
        agent: &mut A,
        buffer: &mut R,
        opt_steps: &mut usize,
    ) -> Result<(Option<Record>, bool)> {
        let timer = SystemTime::now();
        let record = agent.opt(buffer);

        match record {
            None => Ok((None, false)),
            Some(record) => {
                *opt_steps += 1;
                self.timer_for_ops += timer.elapsed()?;
                self.opt_steps_for_ops += 1;
                Ok((Some(record), true))
            }
        }
    }

    /// Trains the agent from the given buffer.
    pub fn train<A, S, D>(
        &mut self,
        agent: &mut A,
        buffer: &mut R,
        recorder: &mut S,
        evaluator: &mut D,
    ) -> Result<()>
    where
        A: Agent<E, R>,
        S: Recorder,
        D: Evaluator<E>,
    {
        let mut max_eval_reward = f32::MIN;
        let mut opt_steps: usize = 0;
        agent.train();

        loop {
            let (record, is_opt) = self.train_step(agent, buffer, &mut opt_steps)?;

            if !is_opt {
                continue;
            }

            if let Some(record) = record {
                recorder.store(record);
            }

            // Evaluation
            if opt_steps % self.eval_interval == 0 {
                info!("Starts evaluation of the trained model");
                agent.eval();
                let eval_reward = evaluator.evaluate(agent)?;
                agent.train();
                recorder.store(Record::from_scalar("eval_reward", eval_reward));

                // Save the best model up to the current iteration
                if eval_reward > max_eval_reward {
                    max_eval_reward = eval_reward;
                    if let Some(model_dir) = self.model_dir.as_ref() {
                        Self::save_best_model(agent, model_dir.clone())
                    }
                }
            }

            // Flush records with stats wrt computation cost
            if opt_steps % self.record_interval == 0 {
                recorder.store(Record::from_slice(&[(
                    "opt_steps_per_sec",
                    Scalar(self.opt_steps_per_sec()),
                )]));
                recorder.flush(opt_steps as _);
            }

            // Save the current model
            if (self.save_interval > 0) && (opt_steps % self.save_interval == 0) {
                if let Some(model_dir) = self.model_dir.as_ref() {
                    Self::save_model_with_steps(agent, model_dir.clone(), opt_steps);
                }
            }

            // End loop
            if opt_steps == self.max_opts {
                break;
            }
        }

        Ok(())
    }
}
