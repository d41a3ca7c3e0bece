// Evaluation — batched classification accuracy of a model
//
// The evaluator runs a model over a labeled dataset in batches with gradient
// tracking switched off and returns the sample-weighted mean accuracy:
//
//   accuracy = Σ acc_b * rows_b / Σ rows_b
//
// For each batch it moves data and labels to the target device, runs
// forward_t(train = false), asks the runtime for the batch accuracy and reads
// it back as a host scalar. Every transient handle (batch slices, logits,
// the accuracy scalar) is released before the next batch is pulled, so peak
// runtime memory is one batch plus its activations. On an early error the
// remaining handles are released by drop and the guard restores grad mode.
//
// Zero evaluated samples is an error rather than 0/0.

use tether_core::{Device, Error, GradModeGuard, Result, Runtime, Tensor};
use tether_data::{BatchItem, BatchIter, BatchIterConfig, BatchPolicy};
use tether_nn::ModuleT;

/// Outcome of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyReport {
    /// Sample-weighted mean accuracy in `[0, 1]`.
    pub accuracy: f64,
    /// Number of evaluated rows.
    pub samples: usize,
    /// Number of evaluated batches.
    pub batches: usize,
}

/// Batched accuracy evaluation of a classifier.
///
/// # Example
/// ```ignore
/// let acc = AccuracyEvaluator::new(Device::Cpu, 256).evaluate(&model, &images, &labels)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccuracyEvaluator {
    device: Device,
    batch_size: usize,
    policy: BatchPolicy,
}

impl Default for AccuracyEvaluator {
    fn default() -> Self {
        Self::new(Device::Cpu, 256)
    }
}

impl AccuracyEvaluator {
    pub fn new(device: Device, batch_size: usize) -> Self {
        AccuracyEvaluator {
            device,
            batch_size,
            policy: BatchPolicy::DropPartial,
        }
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Mean accuracy of `model` over `(xs, ys)`.
    pub fn evaluate<R, M>(&self, model: &M, xs: &Tensor<R>, ys: &Tensor<R>) -> Result<f64>
    where
        R: Runtime,
        M: ModuleT<R> + ?Sized,
    {
        Ok(self.evaluate_report(model, xs, ys)?.accuracy)
    }

    /// Mean accuracy plus the sample and batch counts behind it.
    #[tracing::instrument(skip_all, fields(device = %self.device, batch_size = self.batch_size))]
    pub fn evaluate_report<R, M>(
        &self,
        model: &M,
        xs: &Tensor<R>,
        ys: &Tensor<R>,
    ) -> Result<AccuracyReport>
    where
        R: Runtime,
        M: ModuleT<R> + ?Sized,
    {
        let _guard = GradModeGuard::no_grad(xs.runtime());
        let config = BatchIterConfig::default()
            .batch_size(self.batch_size)
            .policy(self.policy)
            .device(self.device);

        let mut weighted = 0.0;
        let mut samples = 0usize;
        let mut batches = 0usize;
        for batch in BatchIter::new(xs, ys, config)? {
            let (acc, rows) = batch_accuracy(model, batch?)?;
            weighted += acc * rows as f64;
            samples += rows;
            batches += 1;
        }

        if samples == 0 {
            return Err(Error::EmptyInput(format!(
                "no complete batch of {} rows in {} samples",
                self.batch_size,
                xs.size0()?
            )));
        }
        let accuracy = weighted / samples as f64;
        tracing::debug!(accuracy, samples, batches, "evaluation finished");
        Ok(AccuracyReport {
            accuracy,
            samples,
            batches,
        })
    }
}

/// Accuracy and row count of one batch; every handle is released on success.
fn batch_accuracy<R, M>(model: &M, batch: BatchItem<R>) -> Result<(f64, usize)>
where
    R: Runtime,
    M: ModuleT<R> + ?Sized,
{
    let rows = batch.size();
    let logits = model.forward_t(&batch.data, false)?;
    let acc = logits.accuracy_for_logits(&batch.label)?;
    let value = acc.to_scalar_f64()?;
    acc.release()?;
    logits.release()?;
    batch.release()?;
    Ok((value, rows))
}

/// Accuracy of `model` over `(xs, ys)` in ordered batches, partial batch dropped.
pub fn batch_accuracy_for_logits<R, M>(
    model: &M,
    xs: &Tensor<R>,
    ys: &Tensor<R>,
    device: Device,
    batch_size: usize,
) -> Result<f64>
where
    R: Runtime,
    M: ModuleT<R> + ?Sized,
{
    AccuracyEvaluator::new(device, batch_size).evaluate(model, xs, ys)
}

/// Like [`batch_accuracy_for_logits`] but over one random permutation of the rows.
pub fn batch_accuracy_for_logits_idx<R, M>(
    model: &M,
    xs: &Tensor<R>,
    ys: &Tensor<R>,
    device: Device,
    batch_size: usize,
) -> Result<f64>
where
    R: Runtime,
    M: ModuleT<R> + ?Sized,
{
    AccuracyEvaluator::new(device, batch_size)
        .policy(BatchPolicy::Shuffled { seed: None })
        .evaluate(model, xs, ys)
}
