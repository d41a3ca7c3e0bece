use std::fmt;

/// Placement tag for where a tensor resource lives.
///
/// The tag is opaque to this crate: the runtime decides which devices exist
/// and rejects unknown ones with [`Error::DeviceUnavailable`](crate::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host processor.
    #[default]
    Cpu,
    /// Accelerator with the given ordinal.
    Cuda(usize),
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    /// First accelerator if the runtime reports any, the processor otherwise.
    pub fn cuda_if_available(accelerators: usize) -> Device {
        if accelerators > 0 {
            Device::Cuda(0)
        } else {
            Device::Cpu
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(i) => write!(f, "cuda:{}", i),
        }
    }
}
