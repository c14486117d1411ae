//! Score (noise) model of the IDQL agent.
use crate::{
    model::{ModelBase, SubModel3},
    opt::{Optimizer, OptimizerConfig},
};
use anyhow::{Context, Result};
use log::{info, trace};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tch::{nn, Device, Tensor};

/// Configuration of [`ScoreModel`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ScoreModelConfig<S> {
    /// Configuration of the noise model.
    pub score_config: Option<S>,
    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,
}

impl<S> Default for ScoreModelConfig<S> {
    fn default() -> Self {
        Self {
            score_config: None,
            opt_config: OptimizerConfig::Adam { lr: 1e-3 },
        }
    }
}

impl<S> ScoreModelConfig<S>
where
    S: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the noise model.
    pub fn score_config(mut self, v: S) -> Self {
        self.score_config = Some(v);
        self
    }

    /// Sets the optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [`ScoreModelConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let rdr = std::io::BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ScoreModelConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        std::io::Write::write_all(&mut file, serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// DDPM noise model with its variables and optimizer.
pub struct ScoreModel<S>
where
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + Clone,
{
    device: Device,
    var_store: nn::VarStore,
    score: S,
    opt_config: OptimizerConfig,
    opt: Optimizer,
}

impl<S> ScoreModel<S>
where
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`ScoreModel`].
    pub fn build(config: ScoreModelConfig<S::Config>, device: Device) -> Result<Self> {
        let score_config = config.score_config.context("score_config is not set.")?;
        let opt_config = config.opt_config;
        let var_store = nn::VarStore::new(device);
        let score = S::build(&var_store, score_config);

        Ok(Self::_build(device, opt_config, score, var_store, None))
    }

    fn _build(
        device: Device,
        opt_config: OptimizerConfig,
        score: S,
        mut var_store: nn::VarStore,
        var_store_src: Option<&nn::VarStore>,
    ) -> Self {
        let opt = opt_config.build(&var_store).unwrap();

        if let Some(var_store_src) = var_store_src {
            var_store.copy(var_store_src).unwrap();
        }

        Self {
            device,
            var_store,
            score,
            opt_config,
            opt,
        }
    }

    /// Predicts the noise of a noisy action.
    pub fn forward(&self, obs: &Tensor, act: &Tensor, time: &Tensor) -> Tensor {
        self.score.forward(
            &obs.to(self.device),
            &act.to(self.device),
            &time.to(self.device),
        )
    }

    /// Returns the inner noise model.
    pub fn inner(&self) -> &S {
        &self.score
    }
}

impl<S> Clone for ScoreModel<S>
where
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + Clone,
{
    fn clone(&self) -> Self {
        let device = self.device;
        let opt_config = self.opt_config.clone();
        let var_store = nn::VarStore::new(device);
        let score = self.score.clone_with_var_store(&var_store);

        Self::_build(device, opt_config, score, var_store, Some(&self.var_store))
    }
}

impl<S> ModelBase for ScoreModel<S>
where
    S: SubModel3<Input1 = Tensor, Input2 = Tensor, Input3 = Tensor, Output = Tensor>,
    S::Config: DeserializeOwned + Serialize + Clone,
{
    fn zero_grad(&mut self) {
        self.opt.zero_grad();
    }

    fn step(&mut self) {
        self.opt.step();
    }

    fn backward_step(&mut self, loss: &Tensor) {
        self.opt.backward_step(loss);
    }

    fn get_var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.var_store
    }

    fn get_var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.var_store.save(&path)?;
        info!("Save score model to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load score model from {:?}", path.as_ref());
        Ok(())
    }
}
