use serde::{Deserialize, Serialize};

/// Device on which tensors and networks are placed.
///
/// This is a serializable mirror of [`tch::Device`] for use in agent
/// configurations.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The given CUDA device.
    Cuda(usize),
}

impl From<tch::Device> for Device {
    fn from(device: tch::Device) -> Self {
        match device {
            tch::Device::Cpu => Self::Cpu,
            tch::Device::Cuda(n) => Self::Cuda(n),
            _ => panic!("Unsupported device: {:?}", device),
        }
    }
}

impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => Self::Cpu,
            Device::Cuda(n) => Self::Cuda(n),
        }
    }
}
