//! # tether-nn
//!
//! Layers and parameter initializers over tether tensor handles.
//!
//! 1. **Module / ModuleT** — every layer implements `forward()` or `forward_t()`
//! 2. **Init** — constant, normal, uniform, Kaiming and Glorot initializers
//! 3. **ConvTranspose** — 1D/2D/3D transposed convolutions
//! 4. **Dropout** — regularization via random zeroing
//! 5. **Sequential / SequentialT** — ordered layer containers
//!
//! Layers are generic over `Runtime` (like `Tensor<R>`), so the same network
//! definition works with any runtime implementation.

pub mod conv_transpose;
pub mod dropout;
pub mod init;
pub mod module;
pub mod sequential;

pub use conv_transpose::{
    conv_transpose1d, conv_transpose2d, conv_transpose3d, ConvTranspose, ConvTransposeConfig,
};
pub use dropout::Dropout;
pub use init::Init;
pub use module::{func, func_t, ApplyExt, Func, FuncT, Module, ModuleT};
pub use sequential::{Sequential, SequentialT};

#[doc(hidden)]
pub mod __private {
    pub use tether_core::{Result, Tensor};
}
