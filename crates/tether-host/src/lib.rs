// Host Runtime — in-process reference implementation of the Runtime trait
//
// HostRuntime keeps every resource as a packed little-endian byte buffer in a
// registry keyed by ResourceId. It exists so the handle layer can be run and
// tested without a native compute library, and it enforces the same contract
// a native runtime would:
//
//   - ids are never reused; releasing an unknown id is an error
//   - accelerator devices exist only if configured
//   - an optional memory limit makes allocations fail deterministically
//
// ARCHITECTURE:
// - HostRuntime is a cheap Arc handle; clones share one registry
// - Registry sits behind a Mutex and also tracks allocation statistics
// - Random sampling draws from one StdRng, seeded from HostConfig when given
// - Arithmetic kernels live in `kernels` and work on host f64 buffers
// - Grad mode is a thread-local flag, like a native runtime's
//
// USAGE:
//   let rt = HostRuntime::with_config(HostConfig::default().with_memory_limit(1 << 20));
//   let t = Tensor::zeros(&rt, (2, 3), DType::F32, Device::Cpu)?;
//   assert_eq!(rt.stats().live_resources, 1);

mod kernels;

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use tether_core::dtype::{decode_f64, encode, encode_f64, round_to};
use tether_core::{
    bail, byte_size, ConvTransposeParams, DType, Device, Error, ResourceId, Result, Runtime, Shape,
    TensorMeta,
};

/// Resampling attempts before a uniform draw falls back to the lower bound.
const UNIFORM_RETRIES: usize = 16;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

// HostConfig

/// Configuration of a [`HostRuntime`].
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Number of simulated accelerators; `Device::Cuda(i)` is valid for `i < accelerators`.
    pub accelerators: usize,
    /// Upper bound on live bytes across all devices. `None` means unbounded.
    pub memory_limit: Option<usize>,
    /// Seed for random fills, permutations and dropout masks.
    pub seed: Option<u64>,
}

impl HostConfig {
    pub fn with_accelerators(mut self, n: usize) -> Self {
        self.accelerators = n;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

// HostStats

/// Snapshot of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    /// Resources allocated and not yet released.
    pub live_resources: usize,
    /// Bytes held by live resources.
    pub live_bytes: usize,
    /// Cumulative successful allocations.
    pub allocations: u64,
    /// Cumulative successful releases.
    pub releases: u64,
}

// Registry

struct HostBuffer {
    bytes: Vec<u8>,
    meta: TensorMeta,
}

#[derive(Default)]
struct Registry {
    buffers: HashMap<ResourceId, HostBuffer>,
    live_bytes: usize,
    allocations: u64,
    releases: u64,
}

struct HostInner {
    config: HostConfig,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    rng: Mutex<StdRng>,
}

// HostRuntime

/// In-process runtime holding tensor resources as host byte buffers.
#[derive(Clone)]
pub struct HostRuntime {
    inner: Arc<HostInner>,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRuntime")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl HostRuntime {
    /// A runtime with no accelerators, no memory limit and an entropy seed.
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        HostRuntime {
            inner: Arc::new(HostInner {
                config,
                next_id: AtomicU64::new(1),
                registry: Mutex::new(Registry::default()),
                rng: Mutex::new(rng),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Current registry statistics.
    pub fn stats(&self) -> HostStats {
        let reg = match self.inner.registry.lock() {
            Ok(reg) => reg,
            Err(poisoned) => poisoned.into_inner(),
        };
        HostStats {
            live_resources: reg.buffers.len(),
            live_bytes: reg.live_bytes,
            allocations: reg.allocations,
            releases: reg.releases,
        }
    }

    // ── Registry helpers ─────────────────────────────────────────────────

    fn registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.inner
            .registry
            .lock()
            .map_err(|_| Error::msg("host runtime registry lock poisoned"))
    }

    fn rng(&self) -> Result<MutexGuard<'_, StdRng>> {
        self.inner
            .rng
            .lock()
            .map_err(|_| Error::msg("host runtime rng lock poisoned"))
    }

    fn check_device(&self, device: Device) -> Result<()> {
        match device {
            Device::Cpu => Ok(()),
            Device::Cuda(i) if i < self.inner.config.accelerators => Ok(()),
            Device::Cuda(_) => Err(Error::DeviceUnavailable(device)),
        }
    }

    /// Refuse `requested` more bytes if they would exceed the memory limit.
    fn check_limit(&self, reg: &Registry, requested: usize, device: Device) -> Result<()> {
        if let Some(limit) = self.inner.config.memory_limit {
            if reg.live_bytes.saturating_add(requested) > limit {
                tracing::debug!(
                    requested,
                    live = reg.live_bytes,
                    limit,
                    "host allocation refused"
                );
                return Err(Error::AllocationFailure {
                    requested,
                    available: limit.saturating_sub(reg.live_bytes),
                    device,
                });
            }
        }
        Ok(())
    }

    fn insert(&self, bytes: Vec<u8>, meta: TensorMeta) -> Result<ResourceId> {
        self.check_device(meta.device)?;
        let mut reg = self.registry()?;
        self.check_limit(&reg, bytes.len(), meta.device)?;
        let id = ResourceId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, shape = %meta.shape, dtype = %meta.dtype, device = %meta.device, "allocate");
        reg.live_bytes += bytes.len();
        reg.allocations += 1;
        reg.buffers.insert(id, HostBuffer { bytes, meta });
        Ok(id)
    }

    fn insert_f64(&self, values: &[f64], meta: TensorMeta) -> Result<ResourceId> {
        let bytes = encode_f64(values, meta.dtype);
        self.insert(bytes, meta)
    }

    /// Copy of a live buffer's bytes and metadata.
    fn read(&self, id: ResourceId) -> Result<(Vec<u8>, TensorMeta)> {
        let reg = self.registry()?;
        let buf = reg.buffers.get(&id).ok_or(Error::UnknownResource(id))?;
        Ok((buf.bytes.clone(), buf.meta.clone()))
    }

    fn read_f64(&self, id: ResourceId) -> Result<(Vec<f64>, TensorMeta)> {
        let (bytes, meta) = self.read(id)?;
        Ok((decode_f64(&bytes, meta.dtype)?, meta))
    }

    fn write(&self, id: ResourceId, bytes: Vec<u8>) -> Result<()> {
        let mut reg = self.registry()?;
        let buf = reg.buffers.get_mut(&id).ok_or(Error::UnknownResource(id))?;
        buf.bytes = bytes;
        Ok(())
    }

    fn same_device(expected: Device, got: Device) -> Result<()> {
        if expected != got {
            return Err(Error::DeviceMismatch { expected, got });
        }
        Ok(())
    }
}

impl Runtime for HostRuntime {
    fn name(&self) -> String {
        "host".to_string()
    }

    fn allocate(&self, shape: &Shape, dtype: DType, device: Device) -> Result<ResourceId> {
        let meta = TensorMeta::new(shape.clone(), dtype, device);
        let size = meta.size_in_bytes()?;
        self.check_device(device)?;
        self.check_limit(&*self.registry()?, size, device)?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| Error::AllocationFailure {
                requested: size,
                available: 0,
                device,
            })?;
        bytes.resize(size, 0);
        self.insert(bytes, meta)
    }

    fn release(&self, id: ResourceId) -> Result<()> {
        let mut reg = self.registry()?;
        let buf = reg.buffers.remove(&id).ok_or(Error::UnknownResource(id))?;
        reg.live_bytes -= buf.bytes.len();
        reg.releases += 1;
        tracing::debug!(%id, "release");
        Ok(())
    }

    fn meta(&self, id: ResourceId) -> Result<TensorMeta> {
        let reg = self.registry()?;
        reg.buffers
            .get(&id)
            .map(|b| b.meta.clone())
            .ok_or(Error::UnknownResource(id))
    }

    fn from_bytes(
        &self,
        bytes: &[u8],
        shape: &Shape,
        dtype: DType,
        device: Device,
    ) -> Result<ResourceId> {
        let meta = TensorMeta::new(shape.clone(), dtype, device);
        let expected = meta.size_in_bytes()?;
        if bytes.len() != expected {
            return Err(Error::ByteLengthMismatch {
                shape: shape.clone(),
                dtype,
                expected,
                got: bytes.len(),
            });
        }
        self.insert(bytes.to_vec(), meta)
    }

    fn to_bytes(&self, id: ResourceId) -> Result<Vec<u8>> {
        Ok(self.read(id)?.0)
    }

    fn fill_constant(&self, id: ResourceId, value: f64) -> Result<()> {
        let meta = self.meta(id)?;
        let values = vec![value; meta.shape.elem_count()];
        self.write(id, encode_f64(&values, meta.dtype))
    }

    fn fill_uniform(&self, id: ResourceId, lo: f64, up: f64) -> Result<()> {
        let meta = self.meta(id)?;
        if !meta.dtype.is_float() {
            bail!("uniform fill needs a float dtype, got {}", meta.dtype);
        }
        if !(lo < up) {
            return Err(Error::invalid_config(format!(
                "uniform bounds must satisfy lo < up, got [{}, {})",
                lo, up
            )));
        }
        let mut rng = self.rng()?;
        let values: Vec<f64> = (0..meta.shape.elem_count())
            .map(|_| {
                // Rounding to a narrow float can land exactly on `up`.
                for _ in 0..UNIFORM_RETRIES {
                    let v = round_to(rng.gen_range(lo..up), meta.dtype);
                    if v >= lo && v < up {
                        return v;
                    }
                }
                lo
            })
            .collect();
        drop(rng);
        self.write(id, encode_f64(&values, meta.dtype))
    }

    fn fill_normal(&self, id: ResourceId, mean: f64, stdev: f64) -> Result<()> {
        let meta = self.meta(id)?;
        if !meta.dtype.is_float() {
            bail!("normal fill needs a float dtype, got {}", meta.dtype);
        }
        if !(stdev >= 0.0) {
            return Err(Error::invalid_config(format!(
                "normal stdev must be non-negative, got {}",
                stdev
            )));
        }
        let mut rng = self.rng()?;
        let values: Vec<f64> = (0..meta.shape.elem_count())
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                stdev * z + mean
            })
            .collect();
        drop(rng);
        self.write(id, encode_f64(&values, meta.dtype))
    }

    fn copy_into(&self, dst: ResourceId, src: ResourceId) -> Result<()> {
        let dst_meta = self.meta(dst)?;
        let (bytes, src_meta) = self.read(src)?;
        if dst_meta.shape != src_meta.shape {
            return Err(Error::ShapeMismatch {
                expected: dst_meta.shape,
                got: src_meta.shape,
            });
        }
        let bytes = if dst_meta.dtype == src_meta.dtype {
            bytes
        } else {
            encode_f64(&decode_f64(&bytes, src_meta.dtype)?, dst_meta.dtype)
        };
        self.write(dst, bytes)
    }

    fn duplicate(&self, id: ResourceId) -> Result<ResourceId> {
        let (bytes, meta) = self.read(id)?;
        self.insert(bytes, meta)
    }

    fn to_device(&self, id: ResourceId, device: Device) -> Result<ResourceId> {
        self.check_device(device)?;
        let (bytes, mut meta) = self.read(id)?;
        meta.device = device;
        self.insert(bytes, meta)
    }

    fn narrow(&self, id: ResourceId, dim: usize, start: usize, len: usize) -> Result<ResourceId> {
        let (bytes, meta) = self.read(id)?;
        let dim_size = meta.shape.dim(dim)?;
        if start.checked_add(len).map_or(true, |end| end > dim_size) {
            return Err(Error::NarrowOutOfBounds {
                dim,
                start,
                len,
                dim_size,
            });
        }
        let rows: Vec<usize> = (start..start + len).collect();
        let out = kernels::gather_rows(
            &bytes,
            meta.dtype.size_in_bytes(),
            meta.shape.dims(),
            dim,
            &rows,
        );
        let shape = meta.shape.with_dim(dim, len)?;
        self.insert(out, TensorMeta::new(shape, meta.dtype, meta.device))
    }

    fn index_select(&self, id: ResourceId, dim: usize, index: ResourceId) -> Result<ResourceId> {
        let (bytes, meta) = self.read(id)?;
        let (index_values, index_meta) = self.read_f64(index)?;
        if !index_meta.dtype.is_index() {
            return Err(Error::DTypeMismatch {
                expected: DType::I64,
                got: index_meta.dtype,
            });
        }
        if index_meta.shape.rank() != 1 {
            return Err(Error::RankMismatch {
                expected: 1,
                got: index_meta.shape.rank(),
            });
        }
        Self::same_device(meta.device, index_meta.device)?;
        let size = meta.shape.dim(dim)?;
        let rows = index_values
            .iter()
            .map(|&v| {
                let i = v as i64;
                if i < 0 || i as usize >= size {
                    Err(Error::IndexOutOfBounds { index: i, size })
                } else {
                    Ok(i as usize)
                }
            })
            .collect::<Result<Vec<usize>>>()?;
        let out = kernels::gather_rows(
            &bytes,
            meta.dtype.size_in_bytes(),
            meta.shape.dims(),
            dim,
            &rows,
        );
        let shape = meta.shape.with_dim(dim, rows.len())?;
        self.insert(out, TensorMeta::new(shape, meta.dtype, meta.device))
    }

    fn randperm(&self, n: usize, device: Device) -> Result<ResourceId> {
        self.check_device(device)?;
        let shape = Shape::from((n,));
        let size = byte_size(&shape, DType::I64)?;
        self.check_limit(&*self.registry()?, size, device)?;
        let mut perm: Vec<i64> = (0..n as i64).collect();
        perm.shuffle(&mut *self.rng()?);
        self.insert(encode(&perm), TensorMeta::new(shape, DType::I64, device))
    }

    fn conv_transpose(
        &self,
        input: ResourceId,
        weight: ResourceId,
        bias: Option<ResourceId>,
        params: &ConvTransposeParams,
    ) -> Result<ResourceId> {
        let (x, x_meta) = self.read_f64(input)?;
        let (w, w_meta) = self.read_f64(weight)?;
        if w_meta.dtype != x_meta.dtype {
            return Err(Error::DTypeMismatch {
                expected: x_meta.dtype,
                got: w_meta.dtype,
            });
        }
        Self::same_device(x_meta.device, w_meta.device)?;
        let b = match bias {
            Some(id) => {
                let (b, b_meta) = self.read_f64(id)?;
                Self::same_device(x_meta.device, b_meta.device)?;
                Some(b)
            }
            None => None,
        };
        let (out, dims) = kernels::conv_transpose(
            &x,
            x_meta.shape.dims(),
            &w,
            w_meta.shape.dims(),
            b.as_deref(),
            params,
        )?;
        self.insert_f64(
            &out,
            TensorMeta::new(Shape::new(dims), x_meta.dtype, x_meta.device),
        )
    }

    fn dropout(&self, id: ResourceId, p: f64, train: bool) -> Result<ResourceId> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::invalid_config(format!(
                "dropout probability must be in [0, 1), got {}",
                p
            )));
        }
        if !train || p == 0.0 {
            return self.duplicate(id);
        }
        let (mut values, meta) = self.read_f64(id)?;
        let scale = 1.0 / (1.0 - p);
        let mut rng = self.rng()?;
        for v in &mut values {
            *v = if rng.gen::<f64>() < p { 0.0 } else { *v * scale };
        }
        drop(rng);
        self.insert_f64(&values, meta)
    }

    fn accuracy_for_logits(&self, logits: ResourceId, targets: ResourceId) -> Result<ResourceId> {
        let (l, l_meta) = self.read_f64(logits)?;
        let (t, t_meta) = self.read_f64(targets)?;
        Self::same_device(l_meta.device, t_meta.device)?;
        let classes = l_meta.shape.dims().last().copied().unwrap_or(1);
        let acc = kernels::accuracy(&l, classes, &t)?;
        self.insert_f64(
            &[acc],
            TensorMeta::new(Shape::from(()), DType::F32, l_meta.device),
        )
    }

    fn grad_enabled(&self) -> bool {
        GRAD_ENABLED.with(|g| g.get())
    }

    fn set_grad_enabled(&self, enabled: bool) -> bool {
        GRAD_ENABLED.with(|g| g.replace(enabled))
    }
}
