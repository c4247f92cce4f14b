use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DevicePolicy {
    pub use_gpu: bool,
    pub ngpus: usize,
}

impl DevicePolicy {
    /// Round robin over `ngpus` accelerators, cpu when none may be used.
    pub fn select(&self, rank: usize, available_accelerators: usize) -> Device {
        if self.use_gpu && self.ngpus > 0 && available_accelerators > 0 {
            Device::Gpu(rank % self.ngpus)
        } else {
            Device::Cpu
        }
    }
}

/// Accelerators the engine can run on. Everything runs on the cpu.
pub fn available_accelerators() -> usize {
    0
}
