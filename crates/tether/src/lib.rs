//! # Tether
//!
//! Owned, leak-free handles to tensors living in an external compute runtime,
//! with the layers and evaluation loop built on top of them.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `tether-core` | Tensor handle, TensorView, Runtime trait, grad-mode guards, errors |
//! | `tether-host` | In-process reference runtime with allocation statistics |
//! | `tether-nn` | Module traits, initializers, ConvTranspose, Dropout, Sequential |
//! | `tether-data` | Paired data/label batch iteration |
//!
//! ## Modules
//!
//! - [`eval`] — batched accuracy evaluation under a no-grad guard

/// Re-export core types.
pub use tether_core::{
    no_grad, ConvTransposeParams, DType, Device, Error, GradModeGuard, ResourceId, Result,
    Runtime, Shape, Tensor, TensorMeta, TensorView, WithDType,
};

/// Re-export the host runtime.
pub use tether_host::{HostConfig, HostRuntime, HostStats};

/// Re-export neural network modules.
pub mod nn {
    pub use tether_nn::*;
}

/// Re-export batch iteration.
pub mod data {
    pub use tether_data::*;
}

/// Evaluation — batched accuracy under a no-grad guard.
pub mod eval;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::data::{BatchItem, BatchIter, BatchIterConfig, BatchPolicy};
    pub use crate::eval::{
        batch_accuracy_for_logits, batch_accuracy_for_logits_idx, AccuracyEvaluator,
        AccuracyReport,
    };
    pub use crate::nn::{
        conv_transpose1d, conv_transpose2d, conv_transpose3d, func, func_t, impl_module_t,
        ApplyExt, ConvTranspose, ConvTransposeConfig, Dropout, Init, Module, ModuleT, Sequential,
        SequentialT,
    };
    pub use crate::{
        no_grad, DType, Device, GradModeGuard, HostConfig, HostRuntime, Runtime, Shape, Tensor,
    };
}
