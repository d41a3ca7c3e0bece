//! # tether-data
//!
//! Batch iteration over paired data and label tensors.
//!
//! - [`BatchIter`] — yields owned `(data, label)` batches along dimension 0
//! - [`BatchIterConfig`] — batch size, [`BatchPolicy`] and target device

pub mod iter;

pub use iter::{BatchItem, BatchIter, BatchIterConfig, BatchPolicy};
