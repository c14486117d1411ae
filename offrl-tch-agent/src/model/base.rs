//! Definition of interfaces of neural networks.
use anyhow::Result;
use std::path::Path;
use tch::{nn, nn::VarStore, Tensor};

/// Base interface of trainable models.
pub trait ModelBase {
    /// Zeroes the gradients of all trainable variables.
    ///
    /// Used together with [`ModelBase::step`] when a single loss drives
    /// more than one model, for example a critic encoder shared by an
    /// ensemble of decoders.
    fn zero_grad(&mut self);

    /// Applies an optimizer step with the accumulated gradients.
    fn step(&mut self);

    /// Trains the network given a loss.
    fn backward_step(&mut self, loss: &Tensor);

    /// Returns `var_store` as mutable reference.
    fn get_var_store_mut(&mut self) -> &mut nn::VarStore;

    /// Returns `var_store`.
    fn get_var_store(&self) -> &nn::VarStore;

    /// Save parameters of the neural network.
    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()>;

    /// Load parameters of the neural network.
    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()>;
}

/// Neural network model that can be initialized with [`VarStore`] and configuration.
///
/// The purpose of this trait is for modularity of neural network models.
/// Modules, which consist a neural network, should share [`VarStore`].
/// To do this, structs implementing this trait can be initialized with a given
/// [`VarStore`]. This trait also provides the ability to clone with a given
/// [`VarStore`], which is useful when creating a target network.
pub trait SubModel {
    /// Configuration from which [`SubModel`] is constructed.
    type Config;

    /// Input of the [`SubModel`].
    type Input;

    /// Output of the [`SubModel`].
    type Output;

    /// Builds [`SubModel`] with [`VarStore`] and [`SubModel::Config`].
    fn build(var_store: &VarStore, config: Self::Config) -> Self;

    /// Clones [`SubModel`] with [`VarStore`].
    fn clone_with_var_store(&self, var_store: &VarStore) -> Self;

    /// A generalized forward function.
    fn forward(&self, input: &Self::Input) -> Self::Output;
}

/// Neural network model that can be initialized with [`VarStore`] and configuration.
///
/// The difference from [`SubModel`] is that this trait takes two inputs.
pub trait SubModel2 {
    /// Configuration from which [`SubModel2`] is constructed.
    type Config;

    /// Input of the [`SubModel2`].
    type Input1;

    /// Input of the [`SubModel2`].
    type Input2;

    /// Output of the [`SubModel2`].
    type Output;

    /// Builds [`SubModel2`] with [`VarStore`] and [`SubModel2::Config`].
    fn build(var_store: &VarStore, config: Self::Config) -> Self;

    /// Clones [`SubModel2`] with [`VarStore`].
    fn clone_with_var_store(&self, var_store: &VarStore) -> Self;

    /// A generalized forward function.
    fn forward(&self, input1: &Self::Input1, input2: &Self::Input2) -> Self::Output;
}

/// Neural network model that can be initialized with [`VarStore`] and configuration.
///
/// The difference from [`SubModel`] is that this trait takes three inputs.
/// It is used for noise models of diffusion policies, taking an observation,
/// a noisy action and a diffusion timestep.
pub trait SubModel3 {
    /// Configuration from which [`SubModel3`] is constructed.
    type Config;

    /// Input of the [`SubModel3`].
    type Input1;

    /// Input of the [`SubModel3`].
    type Input2;

    /// Input of the [`SubModel3`].
    type Input3;

    /// Output of the [`SubModel3`].
    type Output;

    /// Builds [`SubModel3`] with [`VarStore`] and [`SubModel3::Config`].
    fn build(var_store: &VarStore, config: Self::Config) -> Self;

    /// Clones [`SubModel3`] with [`VarStore`].
    fn clone_with_var_store(&self, var_store: &VarStore) -> Self;

    /// A generalized forward function.
    fn forward(
        &self,
        input1: &Self::Input1,
        input2: &Self::Input2,
        input3: &Self::Input3,
    ) -> Self::Output;
}
