// Integration tests for batched accuracy evaluation
//
// The model under test is an identity layer: the data rows are one-hot
// "logits", so the predicted class of each row is known in advance.

use std::cell::Cell;

use tether::prelude::*;
use tether::Error;

type T = Tensor<HostRuntime>;

/// Returns a copy of its input.
struct Identity;

impl Module<HostRuntime> for Identity {
    fn forward(&self, xs: &T) -> tether::Result<T> {
        xs.deep_clone()
    }
}

impl_module_t!(Identity, HostRuntime);

/// Six rows predicting classes [0, 1, 2, 0, 1, 2] against labels
/// [0, 1, 0, 0, 2, 2]: rows 0, 1, 3 and 5 are correct.
fn dataset(rt: &HostRuntime) -> (T, T) {
    let preds = [0usize, 1, 2, 0, 1, 2];
    let mut data = vec![0.0f32; 6 * 3];
    for (row, &c) in preds.iter().enumerate() {
        data[row * 3 + c] = 1.0;
    }
    let xs = Tensor::from_slice(rt, &data, (6, 3), Device::Cpu).unwrap();
    let ys = Tensor::from_slice(rt, &[0i64, 1, 0, 0, 2, 2], (6,), Device::Cpu).unwrap();
    (xs, ys)
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn test_weighted_mean_over_batches() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let report = AccuracyEvaluator::new(Device::Cpu, 2).evaluate_report(&Identity, &xs, &ys)?;
    assert!(approx_eq(report.accuracy, 4.0 / 6.0));
    assert_eq!(report.samples, 6);
    assert_eq!(report.batches, 3);
    Ok(())
}

#[test]
fn test_mixed_sequential_t_is_evaluated() -> tether::Result<()> {
    // dropout would zero whole rows in train mode; evaluation must not train
    let rt = HostRuntime::with_config(HostConfig::default().with_seed(3));
    let (xs, ys) = dataset(&rt);
    let model = SequentialT::new()
        .add(Dropout::new(0.9)?)
        .add(Identity)
        .add(Sequential::new().add(Identity));
    let acc = AccuracyEvaluator::new(Device::Cpu, 2).evaluate(&model, &xs, &ys)?;
    assert!(approx_eq(acc, 4.0 / 6.0));
    assert_eq!(rt.stats().live_resources, 2);
    Ok(())
}

#[test]
fn test_partial_batch_dropped_by_default() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let report = AccuracyEvaluator::new(Device::Cpu, 4).evaluate_report(&Identity, &xs, &ys)?;
    // rows 0..4 only: 0, 1 and 3 are correct
    assert!(approx_eq(report.accuracy, 0.75));
    assert_eq!(report.samples, 4);
    Ok(())
}

#[test]
fn test_keep_partial_weights_by_rows() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let acc = AccuracyEvaluator::new(Device::Cpu, 4)
        .policy(BatchPolicy::KeepPartial)
        .evaluate(&Identity, &xs, &ys)?;
    assert!(approx_eq(acc, 4.0 / 6.0));
    Ok(())
}

#[test]
fn test_entry_points() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let acc = batch_accuracy_for_logits(&Identity, &xs, &ys, Device::Cpu, 3)?;
    assert!(approx_eq(acc, 4.0 / 6.0));
    // every row is visited once whatever the permutation
    let acc = batch_accuracy_for_logits_idx(&Identity, &xs, &ys, Device::Cpu, 3)?;
    assert!(approx_eq(acc, 4.0 / 6.0));
    Ok(())
}

#[test]
fn test_no_leaks_after_evaluation() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let before = rt.stats();
    AccuracyEvaluator::new(Device::Cpu, 2).evaluate(&Identity, &xs, &ys)?;
    let after = rt.stats();
    assert_eq!(after.live_resources, 2);
    assert_eq!(after.live_bytes, before.live_bytes);
    assert!(after.allocations > before.allocations);
    Ok(())
}

#[test]
fn test_zero_samples_is_an_error() {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let r = AccuracyEvaluator::new(Device::Cpu, 10).evaluate(&Identity, &xs, &ys);
    assert!(matches!(r, Err(Error::EmptyInput(_))));
    assert!(rt.grad_enabled());
    assert_eq!(rt.stats().live_resources, 2);
}

#[test]
fn test_forward_runs_without_grad_in_eval_mode() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let watcher = func_t(|xs: &T, train| {
        assert!(!train);
        assert!(!xs.runtime().grad_enabled());
        xs.deep_clone()
    });
    assert!(rt.grad_enabled());
    AccuracyEvaluator::new(Device::Cpu, 2).evaluate(&watcher, &xs, &ys)?;
    assert!(rt.grad_enabled());
    Ok(())
}

#[test]
fn test_error_mid_evaluation_releases_everything() {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let calls = Cell::new(0);
    let flaky = func(|xs: &T| {
        calls.set(calls.get() + 1);
        if calls.get() == 2 {
            return Err(Error::msg("model failure"));
        }
        xs.deep_clone()
    });
    let r = AccuracyEvaluator::new(Device::Cpu, 2).evaluate(&flaky, &xs, &ys);
    assert!(matches!(r, Err(Error::Msg(_))));
    assert_eq!(calls.get(), 2);
    assert!(rt.grad_enabled());
    assert_eq!(rt.stats().live_resources, 2);
}

#[test]
fn test_batches_moved_to_device() -> tether::Result<()> {
    let rt = HostRuntime::with_config(HostConfig::default().with_accelerators(1));
    let (xs, ys) = dataset(&rt);
    let on_device = func(|xs: &T| {
        assert_eq!(xs.device(), Device::Cuda(0));
        xs.deep_clone()
    });
    let acc = AccuracyEvaluator::new(Device::Cuda(0), 3).evaluate(&on_device, &xs, &ys)?;
    assert!(approx_eq(acc, 4.0 / 6.0));
    assert_eq!(rt.stats().live_resources, 2);
    Ok(())
}

#[test]
fn test_unavailable_device_fails_cleanly() {
    let rt = HostRuntime::new();
    let (xs, ys) = dataset(&rt);
    let r = AccuracyEvaluator::new(Device::Cuda(0), 3).evaluate(&Identity, &xs, &ys);
    assert!(matches!(r, Err(Error::DeviceUnavailable(_))));
    assert_eq!(rt.stats().live_resources, 2);
}
