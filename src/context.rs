//! Execution context shared by all components
//!
//! Every network, objective, and orchestrator receives a [`Context`]
//! explicitly instead of reaching for ambient global state. The context owns
//! the compute device and the floating-point dtype used for all tensors in a
//! run.

use candle_core::{DType, Device};

/// Execution context: device and dtype for a training or inference run.
#[derive(Debug, Clone)]
pub struct Context {
    device: Device,
    dtype: DType,
}

impl Context {
    /// Create a context on the given device with f32 tensors.
    pub fn new(device: Device) -> Self {
        Self {
            device,
            dtype: DType::F32,
        }
    }

    /// CPU context, the default for tests and small experiments.
    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }

    /// The compute device.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The floating-point dtype for run tensors.
    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::cpu()
    }
}
