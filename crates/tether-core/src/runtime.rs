use std::fmt;

use crate::device::Device;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

// Runtime — the boundary to the external compute library
//
// Everything numeric happens on the far side of this trait. The host side only
// ever sees opaque `ResourceId`s and the metadata the runtime reports for
// them. Each method is one blocking, fallible call across the boundary.
//
// OWNERSHIP CONTRACT:
//
//   Every method that returns a `ResourceId` hands the caller a freshly
//   allocated resource that must be released exactly once. `Tensor` is the
//   only type in this workspace that holds such ids; it releases on drop.
//
// WHY A TRAIT WITH &self AND NOT STATIC METHODS?
//
//   A native runtime is a process singleton, but the reference runtime keeps
//   its registry in an instance so that independent tests do not observe each
//   other's live resources. Implementations are cheap to clone (an Arc or a
//   unit struct) because every Tensor carries one.

/// Opaque identifier of a resource owned by the runtime.
///
/// `ResourceId::NULL` is never issued by a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// The id no live resource ever has.
    pub const NULL: ResourceId = ResourceId(0);

    /// Wrap a raw id issued by a runtime.
    pub fn new(raw: u64) -> Self {
        ResourceId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the runtime reports about a live resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorMeta {
    pub shape: Shape,
    pub dtype: DType,
    pub device: Device,
}

impl TensorMeta {
    pub fn new(shape: Shape, dtype: DType, device: Device) -> Self {
        TensorMeta {
            shape,
            dtype,
            device,
        }
    }

    /// Number of bytes the packed contents occupy.
    pub fn size_in_bytes(&self) -> Result<usize> {
        byte_size(&self.shape, self.dtype)
    }
}

/// Packed size of `shape` elements of `dtype`, or
/// [`Error::ShapeTooLarge`](crate::Error) when it overflows.
pub fn byte_size(shape: &Shape, dtype: DType) -> Result<usize> {
    shape
        .checked_elem_count()
        .and_then(|n| n.checked_mul(dtype.size_in_bytes()))
        .ok_or_else(|| Error::ShapeTooLarge {
            shape: shape.clone(),
            dtype,
        })
}

/// Parameters of a transposed convolution over `N` spatial dimensions.
///
/// Every list has exactly one entry per spatial dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvTransposeParams {
    pub stride: Vec<usize>,
    pub padding: Vec<usize>,
    pub output_padding: Vec<usize>,
    pub dilation: Vec<usize>,
    pub groups: usize,
}

impl ConvTransposeParams {
    /// Number of spatial dimensions these parameters describe.
    pub fn spatial_rank(&self) -> usize {
        self.stride.len()
    }

    /// Check the parameters on their own, before any tensor is involved.
    pub fn validate(&self) -> Result<()> {
        let n = self.spatial_rank();
        if n == 0 {
            return Err(Error::invalid_config(
                "conv_transpose needs at least one spatial dimension",
            ));
        }
        if self.padding.len() != n || self.output_padding.len() != n || self.dilation.len() != n
        {
            return Err(Error::invalid_config(format!(
                "conv_transpose parameter lists must all have {} entries",
                n
            )));
        }
        if self.groups == 0 {
            return Err(Error::invalid_config("conv_transpose groups must be positive"));
        }
        for d in 0..n {
            let (stride, dil) = (self.stride[d], self.dilation[d]);
            if stride == 0 || dil == 0 {
                return Err(Error::invalid_config(
                    "conv_transpose stride and dilation must be positive",
                ));
            }
            if self.output_padding[d] >= stride.max(dil) {
                return Err(Error::invalid_config(format!(
                    "conv_transpose output_padding {} must be smaller than stride or dilation",
                    self.output_padding[d]
                )));
            }
        }
        Ok(())
    }
}

/// The compute runtime a [`Tensor`](crate::Tensor) lives in.
pub trait Runtime: Clone + Send + Sync + fmt::Debug + 'static {
    /// Human-readable runtime name (e.g. "host", "libtorch").
    fn name(&self) -> String;

    //  Lifetime

    /// Allocate a zero-filled resource.
    fn allocate(&self, shape: &Shape, dtype: DType, device: Device) -> Result<ResourceId>;

    /// Release a resource. Releasing an id twice is an error.
    fn release(&self, id: ResourceId) -> Result<()>;

    /// Shape, kind and placement of a live resource.
    fn meta(&self, id: ResourceId) -> Result<TensorMeta>;

    //  Host transfer

    /// Create a resource from a packed little-endian, row-major buffer of
    /// exactly `dtype.size_in_bytes() * shape.elem_count()` bytes.
    fn from_bytes(
        &self,
        bytes: &[u8],
        shape: &Shape,
        dtype: DType,
        device: Device,
    ) -> Result<ResourceId>;

    /// Read the packed contents of a resource back to the host.
    fn to_bytes(&self, id: ResourceId) -> Result<Vec<u8>>;

    //  In-place mutation

    /// Set every element to `value`.
    fn fill_constant(&self, id: ResourceId, value: f64) -> Result<()>;

    /// Resample every element uniformly from `[lo, up)`.
    fn fill_uniform(&self, id: ResourceId, lo: f64, up: f64) -> Result<()>;

    /// Resample every element as `stdev * z + mean` with `z ~ N(0, 1)`.
    fn fill_normal(&self, id: ResourceId, mean: f64, stdev: f64) -> Result<()>;

    /// Copy `src` into `dst`, converting the element kind if needed.
    /// Shapes must be equal.
    fn copy_into(&self, dst: ResourceId, src: ResourceId) -> Result<()>;

    //  Materializing transforms (each returns a new resource)

    /// Deep copy on the same device.
    fn duplicate(&self, id: ResourceId) -> Result<ResourceId>;

    /// Copy to another device.
    fn to_device(&self, id: ResourceId, device: Device) -> Result<ResourceId>;

    /// Rows `[start, start + len)` along `dim`.
    fn narrow(&self, id: ResourceId, dim: usize, start: usize, len: usize) -> Result<ResourceId>;

    /// Gather entries along `dim` using a rank-1 integer index resource.
    fn index_select(&self, id: ResourceId, dim: usize, index: ResourceId) -> Result<ResourceId>;

    /// A random permutation of `0..n` as an I64 resource of shape `[n]`.
    fn randperm(&self, n: usize, device: Device) -> Result<ResourceId>;

    //  Compute primitives

    /// Transposed convolution. Weight layout is `[C_in, C_out / groups, k...]`,
    /// bias (when present) is `[C_out]`.
    fn conv_transpose(
        &self,
        input: ResourceId,
        weight: ResourceId,
        bias: Option<ResourceId>,
        params: &ConvTransposeParams,
    ) -> Result<ResourceId>;

    /// Dropout with probability `p`; a plain copy when `train` is false.
    fn dropout(&self, id: ResourceId, p: f64, train: bool) -> Result<ResourceId>;

    /// Fraction of rows whose argmax over the last dimension equals the
    /// target class, as a scalar F32 resource.
    fn accuracy_for_logits(&self, logits: ResourceId, targets: ResourceId) -> Result<ResourceId>;

    //  Gradient tracking

    /// Whether the runtime currently records operations for autodiff.
    fn grad_enabled(&self) -> bool;

    /// Switch gradient tracking, returning the previous mode.
    ///
    /// Prefer [`GradModeGuard`](crate::GradModeGuard) over calling this directly.
    fn set_grad_enabled(&self, enabled: bool) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params1d(stride: usize, dilation: usize, output_padding: usize) -> ConvTransposeParams {
        ConvTransposeParams {
            stride: vec![stride],
            padding: vec![0],
            output_padding: vec![output_padding],
            dilation: vec![dilation],
            groups: 1,
        }
    }

    #[test]
    fn test_output_padding_bound() {
        assert!(params1d(1, 1, 1).validate().is_err());
        assert!(params1d(2, 1, 1).validate().is_ok());
        assert!(params1d(1, 3, 2).validate().is_ok());
        assert!(params1d(0, 1, 0).validate().is_err());
    }

    #[test]
    fn test_byte_size_overflow() {
        let big = Shape::from((1usize << 40, 1usize << 40));
        assert!(matches!(
            byte_size(&big, DType::F32),
            Err(Error::ShapeTooLarge { .. })
        ));
        // elements fit, bytes do not
        let wide = Shape::from((usize::MAX / 2,));
        assert!(byte_size(&wide, DType::U8).is_ok());
        assert!(byte_size(&wide, DType::F64).is_err());
        assert_eq!(byte_size(&Shape::from((2, 3)), DType::F32).unwrap(), 24);
    }
}
