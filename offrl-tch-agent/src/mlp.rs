//! Multilayer perceptron.
mod base;
mod config;
pub use base::Mlp;
pub use config::MlpConfig;

use tch::nn;

/// Creates linear layers with ReLU activations for the hidden units of `config`.
fn mlp(prefix: &str, var_store: &nn::VarStore, config: &MlpConfig) -> nn::Sequential {
    let p = &(var_store.root() / "mlp");
    let mut seq = nn::seq();
    let mut in_dim = config.in_dim;

    for (i, &out_dim) in config.units.iter().enumerate() {
        seq = seq.add(nn::linear(
            p / format!("{}{}", prefix, i),
            in_dim,
            out_dim,
            Default::default(),
        ));
        seq = seq.add_fn(|x| x.relu());
        in_dim = out_dim;
    }

    seq
}
