//! Critic towers of the CQL agent.
//!
//! The critic is split into an encoder tower mapping observations to a
//! latent embedding and decoder towers mapping `(latent, action)` pairs to
//! Q-values. Both towers own their variables and optimizers; a single
//! critic loss drives them jointly via [`ModelBase::zero_grad`] and
//! [`ModelBase::step`].
use crate::{
    model::{ModelBase, SubModel, SubModel2},
    opt::{Optimizer, OptimizerConfig},
};
use anyhow::{Context, Result};
use log::{info, trace};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use tch::{nn, Device, Tensor};

/// Configuration of [`CriticEncoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct CriticEncoderConfig<E> {
    /// Configuration of the encoder network.
    pub encoder_config: Option<E>,
    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,
}

impl<E> Default for CriticEncoderConfig<E> {
    fn default() -> Self {
        Self {
            encoder_config: None,
            opt_config: OptimizerConfig::Adam { lr: 3e-4 },
        }
    }
}

impl<E> CriticEncoderConfig<E>
where
    E: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the encoder network.
    pub fn encoder_config(mut self, v: E) -> Self {
        self.encoder_config = Some(v);
        self
    }

    /// Sets the optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [`CriticEncoderConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let rdr = std::io::BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`CriticEncoderConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        std::io::Write::write_all(&mut file, serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Encoder tower of the critic, mapping observations to latent embeddings.
pub struct CriticEncoder<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: DeserializeOwned + Serialize + Clone,
{
    device: Device,
    var_store: nn::VarStore,
    encoder: E,
    opt_config: OptimizerConfig,
    opt: Optimizer,
}

impl<E> CriticEncoder<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`CriticEncoder`].
    pub fn build(config: CriticEncoderConfig<E::Config>, device: Device) -> Result<Self> {
        let encoder_config = config.encoder_config.context("encoder_config is not set.")?;
        let opt_config = config.opt_config;
        let var_store = nn::VarStore::new(device);
        let encoder = E::build(&var_store, encoder_config);

        Ok(Self::_build(device, opt_config, encoder, var_store, None))
    }

    fn _build(
        device: Device,
        opt_config: OptimizerConfig,
        encoder: E,
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
            encoder,
            opt_config,
            opt,
        }
    }

    /// Embeds observations.
    pub fn forward(&self, obs: &Tensor) -> Tensor {
        self.encoder.forward(&obs.to(self.device))
    }
}

impl<E> Clone for CriticEncoder<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: DeserializeOwned + Serialize + Clone,
{
    fn clone(&self) -> Self {
        let device = self.device;
        let opt_config = self.opt_config.clone();
        let var_store = nn::VarStore::new(device);
        let encoder = self.encoder.clone_with_var_store(&var_store);

        Self::_build(
            device,
            opt_config,
            encoder,
            var_store,
            Some(&self.var_store),
        )
    }
}

impl<E> ModelBase for CriticEncoder<E>
where
    E: SubModel<Input = Tensor, Output = Tensor>,
    E::Config: DeserializeOwned + Serialize + Clone,
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
        info!("Save critic encoder to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load critic encoder from {:?}", path.as_ref());
        Ok(())
    }
}

/// Configuration of [`CriticDecoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct CriticDecoderConfig<Q> {
    /// Configuration of the Q-network over `(latent, action)` pairs.
    pub q_config: Option<Q>,
    /// Configuration of the optimizer.
    pub opt_config: OptimizerConfig,
}

impl<Q> Default for CriticDecoderConfig<Q> {
    fn default() -> Self {
        Self {
            q_config: None,
            opt_config: OptimizerConfig::Adam { lr: 3e-4 },
        }
    }
}

impl<Q> CriticDecoderConfig<Q>
where
    Q: DeserializeOwned + Serialize,
{
    /// Sets the configuration of the Q-network.
    pub fn q_config(mut self, v: Q) -> Self {
        self.q_config = Some(v);
        self
    }

    /// Sets the optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [`CriticDecoderConfig`] from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let rdr = std::io::BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`CriticDecoderConfig`] to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        std::io::Write::write_all(&mut file, serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Decoder tower of the critic, mapping `(latent, action)` to a Q-value.
pub struct CriticDecoder<Q>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    device: Device,
    var_store: nn::VarStore,
    q: Q,
    opt_config: OptimizerConfig,
    opt: Optimizer,
}

impl<Q> CriticDecoder<Q>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    /// Constructs [`CriticDecoder`].
    pub fn build(config: CriticDecoderConfig<Q::Config>, device: Device) -> Result<Self> {
        let q_config = config.q_config.context("q_config is not set.")?;
        let opt_config = config.opt_config;
        let var_store = nn::VarStore::new(device);
        let q = Q::build(&var_store, q_config);

        Ok(Self::_build(device, opt_config, q, var_store, None))
    }

    fn _build(
        device: Device,
        opt_config: OptimizerConfig,
        q: Q,
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
            q,
            opt_config,
            opt,
        }
    }

    /// Outputs the Q-value of a `(latent, action)` pair.
    pub fn forward(&self, latent: &Tensor, act: &Tensor) -> Tensor {
        self.q
            .forward(&latent.to(self.device), &act.to(self.device))
    }
}

impl<Q> Clone for CriticDecoder<Q>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Clone,
{
    fn clone(&self) -> Self {
        let device = self.device;
        let opt_config = self.opt_config.clone();
        let var_store = nn::VarStore::new(device);
        let q = self.q.clone_with_var_store(&var_store);

        Self::_build(device, opt_config, q, var_store, Some(&self.var_store))
    }
}

impl<Q> ModelBase for CriticDecoder<Q>
where
    Q: SubModel2<Input1 = Tensor, Input2 = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + Clone,
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
        info!("Save critic decoder to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load critic decoder from {:?}", path.as_ref());
        Ok(())
    }
}
