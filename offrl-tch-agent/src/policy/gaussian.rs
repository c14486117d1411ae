use crate::{
    mlp::{Mlp, MlpConfig},
    model::SubModel,
    util::OutDim,
};
use serde::{Deserialize, Serialize};
use tch::{nn, Device, Tensor};

/// Log probability of standard normal noise `z` under `N(0, diag(std^2))`
/// with `lstd = log(std)`, summed over the last axis.
pub fn normal_logp(z: &Tensor, lstd: &Tensor) -> Tensor {
    let tmp: Tensor =
        Tensor::from(-0.5 * (2.0 * std::f32::consts::PI).ln() as f32) - lstd - 0.5 * z.pow_tensor_scalar(2);
    tmp.sum_dim_intlist(Some([-1i64].as_slice()), false, tch::Kind::Float)
}

/// Samples an action from a tanh-squashed Gaussian and returns the action
/// and its log probability.
///
/// The log probability includes the change-of-variables correction
/// `sum log(1 - tanh(u)^2 + epsilon)` of the tanh squashing.
pub fn tanh_normal_sample(mean: &Tensor, lstd: &Tensor, epsilon: f64) -> (Tensor, Tensor) {
    let std = lstd.exp();
    let z = mean.randn_like();
    let a = (&std * &z + mean).tanh();
    let log_p = normal_logp(&z, lstd)
        - (Tensor::from(1f32) - a.pow_tensor_scalar(2.0) + Tensor::from(epsilon))
            .log()
            .sum_dim_intlist(Some([-1i64].as_slice()), false, tch::Kind::Float);

    (a, log_p)
}

/// Log probability of a given action under a tanh-squashed Gaussian.
///
/// The action is clipped into the open interval `(-1, 1)` before the
/// inverse tanh.
pub fn tanh_normal_log_prob(mean: &Tensor, lstd: &Tensor, act: &Tensor, epsilon: f64) -> Tensor {
    let act = act.clip(-1.0 + epsilon, 1.0 - epsilon);
    let u = act.atanh();
    let z = (u - mean) / lstd.exp();
    normal_logp(&z, lstd)
        - (Tensor::from(1f32) - act.pow_tensor_scalar(2.0) + Tensor::from(epsilon))
            .log()
            .sum_dim_intlist(Some([-1i64].as_slice()), false, tch::Kind::Float)
}

/// Configuration of [`GaussianHead`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct GaussianHeadConfig {
    /// Dimension of the input features.
    pub in_dim: i64,
    /// Hidden units of the trunk.
    pub units: Vec<i64>,
    /// Dimension of the action vector.
    pub out_dim: i64,
    /// Standard deviation of the Gaussian when fixed; the log standard
    /// deviation is learned per state when `None`.
    pub fixed_std: Option<f64>,
}

impl Default for GaussianHeadConfig {
    fn default() -> Self {
        Self {
            in_dim: 0,
            units: vec![256, 256],
            out_dim: 0,
            fixed_std: None,
        }
    }
}

impl GaussianHeadConfig {
    /// Creates a configuration with a learned log standard deviation.
    pub fn new(in_dim: i64, units: Vec<i64>, out_dim: i64) -> Self {
        Self {
            in_dim,
            units,
            out_dim,
            fixed_std: None,
        }
    }

    /// Sets a fixed standard deviation.
    pub fn fixed_std(mut self, std: f64) -> Self {
        self.fixed_std = Some(std);
        self
    }

    /// Sets the input dimension.
    pub fn in_dim(mut self, v: i64) -> Self {
        self.in_dim = v;
        self
    }
}

impl OutDim for GaussianHeadConfig {
    fn get_out_dim(&self) -> i64 {
        self.out_dim
    }

    fn set_out_dim(&mut self, v: i64) {
        self.out_dim = v;
    }
}

/// MLP trunk with Gaussian distribution heads.
///
/// Outputs `(mean, lstd)` of a diagonal Gaussian over actions. With a fixed
/// standard deviation, `lstd` is a constant tensor broadcast to the shape
/// of the mean.
pub struct GaussianHead {
    config: GaussianHeadConfig,
    device: Device,
    trunk: Mlp,
    mean_head: nn::Linear,
    lstd_head: Option<nn::Linear>,
}

impl GaussianHead {
    fn create_net(
        var_store: &nn::VarStore,
        config: &GaussianHeadConfig,
    ) -> (Mlp, nn::Linear, Option<nn::Linear>) {
        let p = &var_store.root();
        let mut units = config.units.clone();
        let trunk_out = units.pop().unwrap_or(config.in_dim);
        let trunk = <Mlp as SubModel>::build(
            var_store,
            MlpConfig::new(config.in_dim, units, trunk_out, true),
        );
        let mean_head = nn::linear(p / "mean", trunk_out, config.out_dim, Default::default());
        let lstd_head = match config.fixed_std {
            None => Some(nn::linear(
                p / "lstd",
                trunk_out,
                config.out_dim,
                Default::default(),
            )),
            Some(_) => None,
        };

        (trunk, mean_head, lstd_head)
    }
}

impl SubModel for GaussianHead {
    type Config = GaussianHeadConfig;
    type Input = Tensor;
    type Output = (Tensor, Tensor);

    fn forward(&self, x: &Self::Input) -> Self::Output {
        let h = self.trunk.forward(&x.to(self.device));
        let mean = h.apply(&self.mean_head);
        let lstd = match &self.lstd_head {
            Some(head) => h.apply(head),
            None => (mean.zeros_like() + self.config.fixed_std.unwrap()).log(),
        };
        (mean, lstd)
    }

    fn build(var_store: &nn::VarStore, config: Self::Config) -> Self {
        let device = var_store.device();
        let (trunk, mean_head, lstd_head) = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            trunk,
            mean_head,
            lstd_head,
        }
    }

    fn clone_with_var_store(&self, var_store: &nn::VarStore) -> Self {
        let config = self.config.clone();
        let device = var_store.device();
        let (trunk, mean_head, lstd_head) = Self::create_net(var_store, &config);

        Self {
            config,
            device,
            trunk,
            mean_head,
            lstd_head,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tanh_normal_log_prob_matches_sampling_shape() {
        let mean = Tensor::zeros([8, 3], tch::kind::FLOAT_CPU);
        let lstd = Tensor::zeros([8, 3], tch::kind::FLOAT_CPU);

        let (a, log_p) = tanh_normal_sample(&mean, &lstd, 1e-6);
        assert_eq!(a.size(), vec![8, 3]);
        assert_eq!(log_p.size(), vec![8]);

        let log_p2 = tanh_normal_log_prob(&mean, &lstd, &a, 1e-6);
        assert_eq!(log_p2.size(), vec![8]);

        // both paths agree on the log probability of the same action
        let diff = f64::try_from((log_p - log_p2).abs().max()).unwrap();
        assert!(diff < 1e-2);
    }

    #[test]
    fn test_normal_logp_standard_normal() {
        // logp of z = 0 under N(0, 1) is -0.5 * ln(2 * pi) per dimension
        let z = Tensor::zeros([1, 2], tch::kind::FLOAT_CPU);
        let lstd = Tensor::zeros([1, 2], tch::kind::FLOAT_CPU);
        let logp = f64::try_from(normal_logp(&z, &lstd)).unwrap();
        let expected = -(2.0 * std::f64::consts::PI).ln();
        assert!((logp - expected).abs() < 1e-5);
    }
}
