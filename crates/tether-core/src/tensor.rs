use std::fmt;
use std::ops::Deref;

use crate::device::Device;
use crate::dtype::{self, DType, WithDType};
use crate::error::{Error, Result};
use crate::runtime::{byte_size, ConvTransposeParams, ResourceId, Runtime, TensorMeta};
use crate::shape::Shape;

// Tensor — owning handle to one foreign tensor resource
//
// The runtime allocates the memory and nothing on this side can see how
// large it is. A Tensor is the single owner of one ResourceId and releases
// it exactly once:
//
//   - implicitly, when the Tensor is dropped
//   - explicitly, with `release(self)`, which surfaces runtime errors
//
// OWNERSHIP MODEL:
//
//   Tensor            unique owner, not Clone
//   TensorView<'a>    shallow alias: borrows the owner, never releases,
//                     cannot outlive it
//   deep_clone()      new resource, new unique owner
//
// Releasing the same resource twice cannot be written in safe code: release
// consumes the owner, and views have nothing to release.
//
// METADATA:
//
//   Shape, dtype and device are queried once from the runtime when the handle
//   is adopted and cached here. In-place operations never change them.

/// Owning handle to a tensor resource living in runtime `R`.
///
/// # Example
/// ```ignore
/// use tether_core::{Device, Tensor};
/// use tether_host::HostRuntime;
///
/// let rt = HostRuntime::new();
/// let t = Tensor::from_slice(&rt, &[1.0f32, 2.0, 3.0, 4.0], (2, 2), Device::Cpu)?;
/// assert_eq!(t.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0]);
/// t.release()?;
/// ```
pub struct Tensor<R: Runtime> {
    id: ResourceId,
    meta: TensorMeta,
    runtime: R,
}

impl<R: Runtime> fmt::Debug for Tensor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(id={}, shape={}, dtype={}, device={})",
            self.id, self.meta.shape, self.meta.dtype, self.meta.device,
        )
    }
}

impl<R: Runtime> Drop for Tensor<R> {
    fn drop(&mut self) {
        if self.id.is_null() {
            return;
        }
        if let Err(e) = self.runtime.release(self.id) {
            tracing::warn!(id = %self.id, error = %e, "failed to release tensor resource");
        }
    }
}

impl<R: Runtime> Tensor<R> {
    //  Adoption

    /// Take ownership of a resource the runtime has just issued.
    ///
    /// The caller transfers its ownership of `id`; from here on the returned
    /// Tensor is the one that releases it. If the metadata query fails the
    /// resource is released before the error is returned.
    pub fn from_resource(runtime: &R, id: ResourceId) -> Result<Self> {
        match runtime.meta(id) {
            Ok(meta) => Ok(Tensor {
                id,
                meta,
                runtime: runtime.clone(),
            }),
            Err(e) => {
                if let Err(release_err) = runtime.release(id) {
                    tracing::warn!(id = %id, error = %release_err, "failed to release unadopted resource");
                }
                Err(e)
            }
        }
    }

    fn adopt(&self, id: Result<ResourceId>) -> Result<Self> {
        Self::from_resource(&self.runtime, id?)
    }

    //  Creation

    /// Create a zero-filled tensor.
    pub fn zeros(runtime: &R, shape: impl Into<Shape>, dtype: DType, device: Device) -> Result<Self> {
        let shape = shape.into();
        byte_size(&shape, dtype)?;
        let id = runtime.allocate(&shape, dtype, device)?;
        Self::from_resource(runtime, id)
    }

    /// Create a tensor filled with ones.
    pub fn ones(runtime: &R, shape: impl Into<Shape>, dtype: DType, device: Device) -> Result<Self> {
        let mut t = Self::zeros(runtime, shape, dtype, device)?;
        t.fill_(1.0)?;
        Ok(t)
    }

    /// Create a tensor filled with `value`, materialized host-side and
    /// handed to the runtime as one packed buffer.
    pub fn full(
        runtime: &R,
        shape: impl Into<Shape>,
        value: f64,
        dtype: DType,
        device: Device,
    ) -> Result<Self> {
        let shape = shape.into();
        byte_size(&shape, dtype)?;
        let data = vec![value; shape.elem_count()];
        Self::from_f64_slice(runtime, &data, shape, dtype, device)
    }

    /// Create a tensor from host values; the element kind follows `T`.
    pub fn from_slice<T: WithDType>(
        runtime: &R,
        data: &[T],
        shape: impl Into<Shape>,
        device: Device,
    ) -> Result<Self> {
        let shape = shape.into();
        byte_size(&shape, T::DTYPE)?;
        check_elem_count(&shape, data.len())?;
        let bytes = dtype::encode(data);
        let id = runtime.from_bytes(&bytes, &shape, T::DTYPE, device)?;
        Self::from_resource(runtime, id)
    }

    /// Create a tensor from f64 host values converted to `dtype`.
    pub fn from_f64_slice(
        runtime: &R,
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: Device,
    ) -> Result<Self> {
        let shape = shape.into();
        byte_size(&shape, dtype)?;
        check_elem_count(&shape, data.len())?;
        let bytes = dtype::encode_f64(data, dtype);
        let id = runtime.from_bytes(&bytes, &shape, dtype, device)?;
        Self::from_resource(runtime, id)
    }

    /// A random permutation of `0..n` (I64, shape `[n]`).
    pub fn randperm(runtime: &R, n: usize, device: Device) -> Result<Self> {
        let id = runtime.randperm(n, device)?;
        Self::from_resource(runtime, id)
    }

    //  Accessors

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn shape(&self) -> &Shape {
        &self.meta.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.meta.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.meta.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.meta.shape.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    pub fn device(&self) -> Device {
        self.meta.device
    }

    /// Size of the leading (batch) dimension.
    pub fn size0(&self) -> Result<usize> {
        self.dims().first().copied().ok_or(Error::RankMismatch {
            expected: 1,
            got: 0,
        })
    }

    //  Read-back

    /// Copy the contents to the host. `T` must match the stored kind.
    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: T::DTYPE,
            });
        }
        let bytes = self.runtime.to_bytes(self.id)?;
        dtype::decode(&bytes)
    }

    /// Copy the contents to the host as f64, whatever the stored kind.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let bytes = self.runtime.to_bytes(self.id)?;
        dtype::decode_f64(&bytes, self.dtype())
    }

    /// The single value of a one-element tensor.
    pub fn to_scalar_f64(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        Ok(self.to_f64_vec()?[0])
    }

    //  In-place mutation

    /// Set every element to `value`.
    pub fn fill_(&mut self, value: f64) -> Result<()> {
        self.runtime.fill_constant(self.id, value)
    }

    /// Resample every element uniformly from `[lo, up)`.
    pub fn uniform_(&mut self, lo: f64, up: f64) -> Result<()> {
        self.runtime.fill_uniform(self.id, lo, up)
    }

    /// Resample every element from N(mean, stdev²).
    pub fn normal_(&mut self, mean: f64, stdev: f64) -> Result<()> {
        self.runtime.fill_normal(self.id, mean, stdev)
    }

    /// Copy the contents of `src` into this tensor. Shapes must match.
    pub fn copy_(&mut self, src: &Tensor<R>) -> Result<()> {
        if src.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: src.shape().clone(),
            });
        }
        self.runtime.copy_into(self.id, src.id)
    }

    /// Overwrite the contents with host values (converted to this kind).
    pub fn set_data(&mut self, data: &[f64]) -> Result<()> {
        let src = Self::from_f64_slice(
            &self.runtime,
            data,
            self.shape().clone(),
            self.dtype(),
            self.device(),
        )?;
        self.copy_(&src)?;
        src.release()
    }

    //  Copies

    /// A non-owning alias of this tensor.
    pub fn shallow_clone(&self) -> TensorView<'_, R> {
        TensorView { owner: self }
    }

    /// A new, independently owned copy of this tensor.
    pub fn deep_clone(&self) -> Result<Self> {
        self.adopt(self.runtime.duplicate(self.id))
    }

    //  Materializing transforms

    /// Copy to `device`. Always allocates, even when already there.
    pub fn to_device(&self, device: Device) -> Result<Self> {
        self.adopt(self.runtime.to_device(self.id, device))
    }

    /// Rows `[start, start + len)` along `dim`.
    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        let dim_size = self.shape().dim(dim)?;
        if start.checked_add(len).map_or(true, |end| end > dim_size) {
            return Err(Error::NarrowOutOfBounds {
                dim,
                start,
                len,
                dim_size,
            });
        }
        self.adopt(self.runtime.narrow(self.id, dim, start, len))
    }

    /// Gather entries along `dim` with a rank-1 integer index tensor.
    pub fn index_select(&self, dim: usize, index: &Tensor<R>) -> Result<Self> {
        self.shape().dim(dim)?;
        if index.rank() != 1 {
            return Err(Error::RankMismatch {
                expected: 1,
                got: index.rank(),
            });
        }
        self.adopt(self.runtime.index_select(self.id, dim, index.id))
    }

    /// Transposed convolution with this tensor as input.
    pub fn conv_transpose(
        &self,
        weight: &Tensor<R>,
        bias: Option<&Tensor<R>>,
        params: &ConvTransposeParams,
    ) -> Result<Self> {
        self.adopt(self.runtime.conv_transpose(
            self.id,
            weight.id,
            bias.map(|b| b.id),
            params,
        ))
    }

    /// Dropout with probability `p` (a plain copy when `train` is false).
    pub fn dropout(&self, p: f64, train: bool) -> Result<Self> {
        self.adopt(self.runtime.dropout(self.id, p, train))
    }

    /// Scalar fraction of rows whose argmax matches `targets`.
    pub fn accuracy_for_logits(&self, targets: &Tensor<R>) -> Result<Self> {
        self.adopt(self.runtime.accuracy_for_logits(self.id, targets.id))
    }

    //  Release

    /// Release the resource now, reporting any runtime failure.
    pub fn release(mut self) -> Result<()> {
        let id = std::mem::replace(&mut self.id, ResourceId::NULL);
        self.runtime.release(id)
    }
}

fn check_elem_count(shape: &Shape, got: usize) -> Result<()> {
    if got != shape.elem_count() {
        return Err(Error::ElementCountMismatch {
            shape: shape.clone(),
            expected: shape.elem_count(),
            got,
        });
    }
    Ok(())
}

// TensorView — shallow, non-owning alias
//
// A view shares its owner's resource and metadata. It has no Drop impl, so it
// never releases anything, and its lifetime keeps the owner alive and in
// place for as long as the view exists.

/// Non-owning alias of a [`Tensor`], produced by [`Tensor::shallow_clone`].
///
/// A view only reads. In-place operations take `&mut Tensor`, which a view
/// cannot hand out:
///
/// ```compile_fail
/// fn refill<R: tether_core::Runtime>(t: &tether_core::Tensor<R>) -> tether_core::Result<()> {
///     let view = t.shallow_clone();
///     view.fill_(0.0)
/// }
/// ```
pub struct TensorView<'a, R: Runtime> {
    owner: &'a Tensor<R>,
}

impl<'a, R: Runtime> TensorView<'a, R> {
    /// The owning tensor this view aliases.
    pub fn owner(&self) -> &'a Tensor<R> {
        self.owner
    }
}

impl<R: Runtime> Clone for TensorView<'_, R> {
    fn clone(&self) -> Self {
        TensorView { owner: self.owner }
    }
}

impl<R: Runtime> Deref for TensorView<'_, R> {
    type Target = Tensor<R>;

    fn deref(&self) -> &Tensor<R> {
        self.owner
    }
}

impl<R: Runtime> fmt::Debug for TensorView<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({:?})", self.owner)
    }
}
