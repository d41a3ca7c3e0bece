//! # tether-core
//!
//! Owned handles to tensor resources that live in an external compute runtime.
//!
//! This crate provides:
//! - [`Tensor`] — unique owner of one runtime resource, released on drop
//! - [`TensorView`] — non-owning alias produced by `shallow_clone`
//! - [`Runtime`] trait — the boundary every numeric operation crosses
//! - [`GradModeGuard`] / [`no_grad`] — scoped gradient-mode switching
//! - [`Shape`], [`DType`], [`Device`] — metadata the runtime reports
// - error: one Error enum for every failure crossing the boundary
// - dtype: element kinds and the packed little-endian byte codec
// - runtime: ResourceId, TensorMeta and the Runtime trait
// - grad: per-thread stack of grad-mode guards

pub mod device;
pub mod dtype;
pub mod error;
pub mod grad;
pub mod runtime;
pub mod shape;
pub mod tensor;

pub use device::Device;
pub use dtype::{decode, decode_f64, encode, encode_f64, round_to, DType, WithDType};
pub use error::{Error, Result};
pub use grad::{no_grad, GradModeGuard};
pub use runtime::{byte_size, ConvTransposeParams, ResourceId, Runtime, TensorMeta};
pub use shape::Shape;
pub use tensor::{Tensor, TensorView};
