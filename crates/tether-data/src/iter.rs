// BatchIter — paired data/label batches over tensor handles
//
// Walks the leading (batch) dimension of a data tensor and a label tensor in
// lock step and yields owned (data, label) slices of `batch_size` rows.
//
// POLICIES:
//
//   DropPartial   slices [i*B, i*B + B) in order; a final short batch is skipped
//   KeepPartial   like DropPartial but the final short batch is yielded
//   Shuffled      draws one permutation of [0, N), gathers both sources with
//                 it, then slices like DropPartial
//
// A shuffled iterator owns the two permuted copies and releases them when it
// is dropped; the unshuffled policies only borrow the sources. Row k of a
// data batch and row k of its label batch always come from the same sample.
//
// Each batch is a fresh pair of handles owned by the caller. When a device is
// configured the slices are moved there and the pre-move copies released.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use tether_core::{Device, Error, Result, Runtime, Tensor};

/// How rows are grouped into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// In order; the final short batch is dropped.
    #[default]
    DropPartial,
    /// In order; the final short batch is kept.
    KeepPartial,
    /// One random permutation per iterator, then DropPartial.
    ///
    /// With a seed the permutation is reproducible; without one the runtime
    /// draws it.
    Shuffled { seed: Option<u64> },
}

/// Configuration for [`BatchIter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchIterConfig {
    /// Number of rows per batch.
    pub batch_size: usize,
    pub policy: BatchPolicy,
    /// Move every batch to this device.
    pub device: Option<Device>,
}

impl Default for BatchIterConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            policy: BatchPolicy::DropPartial,
            device: None,
        }
    }
}

impl BatchIterConfig {
    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }

    pub fn policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn shuffle(mut self, seed: Option<u64>) -> Self {
        self.policy = BatchPolicy::Shuffled { seed };
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }
}

/// One batch: `data` and `label` have the same leading dimension.
#[derive(Debug)]
pub struct BatchItem<R: Runtime> {
    pub data: Tensor<R>,
    pub label: Tensor<R>,
}

impl<R: Runtime> BatchItem<R> {
    /// Number of rows in this batch.
    pub fn size(&self) -> usize {
        self.data.dims().first().copied().unwrap_or(0)
    }

    /// Release both handles, reporting the first failure.
    pub fn release(self) -> Result<()> {
        let BatchItem { data, label } = self;
        let first = data.release();
        let second = label.release();
        first.and(second)
    }
}

enum Rows<'a, R: Runtime> {
    Borrowed(&'a Tensor<R>),
    Permuted(Tensor<R>),
}

impl<R: Runtime> Rows<'_, R> {
    fn get(&self) -> &Tensor<R> {
        match self {
            Rows::Borrowed(t) => t,
            Rows::Permuted(t) => t,
        }
    }
}

/// Iterator over paired batches of a data and a label tensor.
///
/// # Example
/// ```ignore
/// let cfg = BatchIterConfig::default().batch_size(64).shuffle(Some(0));
/// for batch in BatchIter::new(&images, &labels, cfg)? {
///     let batch = batch?;
///     let logits = model.forward_t(&batch.data, true)?;
/// }
/// ```
pub struct BatchIter<'a, R: Runtime> {
    xs: Rows<'a, R>,
    ys: Rows<'a, R>,
    batch_size: usize,
    total: usize,
    next_row: usize,
    keep_partial: bool,
    device: Option<Device>,
    failed: bool,
}

impl<'a, R: Runtime> BatchIter<'a, R> {
    pub fn new(xs: &'a Tensor<R>, ys: &'a Tensor<R>, config: BatchIterConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::invalid_config("batch size must be positive"));
        }
        let total = xs.size0()?;
        let label_rows = ys.size0()?;
        if total != label_rows {
            return Err(Error::BatchSizeMismatch {
                data: total,
                label: label_rows,
            });
        }

        let (xs, ys) = match config.policy {
            BatchPolicy::Shuffled { seed } => {
                let perm = permutation(xs, total, seed)?;
                let px = xs.index_select(0, &perm)?;
                let py = if ys.device() == perm.device() {
                    ys.index_select(0, &perm)?
                } else {
                    let moved = perm.to_device(ys.device())?;
                    let py = ys.index_select(0, &moved)?;
                    moved.release()?;
                    py
                };
                perm.release()?;
                (Rows::Permuted(px), Rows::Permuted(py))
            }
            _ => (Rows::Borrowed(xs), Rows::Borrowed(ys)),
        };

        tracing::debug!(
            rows = total,
            batch_size = config.batch_size,
            policy = ?config.policy,
            "batch iterator created"
        );
        Ok(BatchIter {
            xs,
            ys,
            batch_size: config.batch_size,
            total,
            next_row: 0,
            keep_partial: config.policy == BatchPolicy::KeepPartial,
            device: config.device,
            failed: false,
        })
    }

    /// Number of batches this iterator will still yield.
    pub fn remaining_batches(&self) -> usize {
        if self.failed {
            return 0;
        }
        let rows = self.total - self.next_row;
        let full = rows / self.batch_size;
        if self.keep_partial && rows % self.batch_size != 0 {
            full + 1
        } else {
            full
        }
    }

    fn slice(&self, src: &Tensor<R>, start: usize, len: usize) -> Result<Tensor<R>> {
        let part = src.narrow(0, start, len)?;
        match self.device {
            Some(device) => {
                let moved = part.to_device(device)?;
                part.release()?;
                Ok(moved)
            }
            None => Ok(part),
        }
    }

    fn batch(&self, start: usize, len: usize) -> Result<BatchItem<R>> {
        let data = self.slice(self.xs.get(), start, len)?;
        let label = self.slice(self.ys.get(), start, len)?;
        Ok(BatchItem { data, label })
    }
}

fn permutation<R: Runtime>(like: &Tensor<R>, n: usize, seed: Option<u64>) -> Result<Tensor<R>> {
    match seed {
        Some(seed) => {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut perm: Vec<i64> = (0..n as i64).collect();
            perm.shuffle(&mut rng);
            Tensor::from_slice(like.runtime(), &perm, (n,), like.device())
        }
        None => Tensor::randperm(like.runtime(), n, like.device()),
    }
}

impl<R: Runtime> Iterator for BatchIter<'_, R> {
    type Item = Result<BatchItem<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining_batches() == 0 {
            return None;
        }
        let start = self.next_row;
        let len = self.batch_size.min(self.total - start);
        self.next_row += len;
        match self.batch(start, len) {
            Ok(item) => Some(Ok(item)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining_batches();
        (n, Some(n))
    }
}

impl<R: Runtime> ExactSizeIterator for BatchIter<'_, R> {}

impl<R: Runtime> std::iter::FusedIterator for BatchIter<'_, R> {}
