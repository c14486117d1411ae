//! State value network of the IDQL agent.
use crate::{
    model::{ModelBase, SubModel},
    opt::{Optimizer, OptimizerConfig},
};
use anyhow::{Context, Result};
use log::{info, trace};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tch::{nn, Device, Tensor};

/// Configuration of [`Value`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ValueConfig<V> {
    /// Configuration of the value network.
    pub v_config: Option<V>,
    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,
}

impl<V> Default for ValueConfig<V> {
    fn default() -> Self {
        Self {
            v_config: None,
            opt_config: OptimizerConfig::Adam { lr: 3e-4 },
        }
    }
}

impl<V> ValueConfig<V>
where
    V: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the value network.
    pub fn v_config(mut self, v: V) -> Self {
        self.v_config = Some(v);
        self
    }

    /// Sets the optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [`ValueConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let rdr = std::io::BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ValueConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        std::io::Write::write_all(&mut file, serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// State value network `V(s)` of the agent.
pub struct Value<V>
where
    V: SubModel<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Clone,
{
    device: Device,
    var_store: nn::VarStore,
    v: V,
    opt: Optimizer,
}

impl<V> Value<V>
where
    V: SubModel<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`Value`].
    pub fn build(config: ValueConfig<V::Config>, device: Device) -> Result<Self> {
        let v_config = config.v_config.context("v_config is not set.")?;
        let var_store = nn::VarStore::new(device);
        let v = V::build(&var_store, v_config);
        let opt = config.opt_config.build(&var_store)?;

        Ok(Self {
            device,
            var_store,
            v,
            opt,
        })
    }

    /// Outputs the value of an observation.
    pub fn forward(&self, obs: &Tensor) -> Tensor {
        self.v.forward(&obs.to(self.device))
    }
}

impl<V> ModelBase for Value<V>
where
    V: SubModel<Input = Tensor, Output = Tensor>,
    V::Config: DeserializeOwned + Serialize + Clone,
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
        info!("Save value network to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load value network from {:?}", path.as_ref());
        Ok(())
    }
}
