//! Offline RL agents implemented with [tch](https://crates.io/crates/tch).
pub mod augmentation;
pub mod cql;
pub mod encoder;
pub mod eval_diag;
pub mod idql;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod policy;
pub mod util;
pub mod value;

mod device;
mod tensor_batch;
pub use device::Device;
pub use tensor_batch::TensorBatch;
