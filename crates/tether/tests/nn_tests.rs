// Integration tests for layers composed through the facade
//
// These tests build small models out of transposed convolutions, dropout and
// closures, and check shapes, values and runtime resource accounting.

use tether::nn::init::MAX_KAIMING_RANK;
use tether::prelude::*;
use tether::Error;

type T = Tensor<HostRuntime>;

fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        got.len(),
        expected.len()
    );
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            (g - e).abs() < tol,
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

fn relu(xs: &T) -> tether::Result<T> {
    let v: Vec<f64> = xs.to_f64_vec()?.iter().map(|x| x.max(0.0)).collect();
    Tensor::from_f64_slice(xs.runtime(), &v, xs.shape(), xs.dtype(), xs.device())
}

// ConvTranspose

#[test]
fn test_conv_transpose2d_upsamples() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let cfg = ConvTransposeConfig::default()
        .stride([2])
        .padding([1])
        .output_padding([1]);
    let up = conv_transpose2d(&rt, Device::Cpu, 4, 2, [3, 3], cfg)?;
    let x = Tensor::ones(&rt, (3, 4, 5, 5), DType::F32, Device::Cpu)?;
    let y = up.forward(&x)?;
    assert_eq!(y.dims(), &[3, 2, 10, 10]);
    Ok(())
}

#[test]
fn test_conv_transpose3d_shape() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let m = conv_transpose3d(&rt, Device::Cpu, 2, 4, [2, 2, 2], Default::default())?;
    let x = Tensor::zeros(&rt, (1, 2, 3, 3, 3), DType::F32, Device::Cpu)?;
    assert_eq!(m.forward(&x)?.dims(), &[1, 4, 4, 4, 4]);
    Ok(())
}

#[test]
fn test_conv_transpose_dilation_and_groups() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let cfg = ConvTransposeConfig::default()
        .dilation([2])
        .groups(2)
        .ws_init(Init::Const(1.0))
        .bias(false);
    let m = conv_transpose1d(&rt, Device::Cpu, 2, 2, [2], cfg)?;
    assert_eq!(m.weight().dims(), &[2, 1, 2]);
    // channel 0 = [1, 2], channel 1 = [10, 20]
    let x = Tensor::from_slice(&rt, &[1.0f32, 2.0, 10.0, 20.0], (1, 2, 2), Device::Cpu)?;
    let y = m.forward(&x)?;
    // (2 - 1) + 2 * (2 - 1) + 1 = 4 per channel
    assert_eq!(y.dims(), &[1, 2, 4]);
    assert_vec_approx(
        &y.to_f64_vec()?,
        &[1.0, 2.0, 1.0, 2.0, 10.0, 20.0, 10.0, 20.0],
        1e-6,
    );
    Ok(())
}

#[test]
fn test_failed_construction_leaves_nothing_behind() {
    // bias [2] is 8 bytes and fits; weight [2, 2, 3] is 48 bytes and does not
    let rt = HostRuntime::with_config(HostConfig::default().with_memory_limit(40));
    let r = conv_transpose1d(&rt, Device::Cpu, 2, 2, [3], Default::default());
    assert!(matches!(r, Err(Error::AllocationFailure { requested: 48, .. })));
    let stats = rt.stats();
    assert_eq!(stats.live_resources, 0);
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.releases, 1);
}

#[test]
fn test_layer_drop_releases_parameters() -> tether::Result<()> {
    let rt = HostRuntime::new();
    {
        let m = conv_transpose2d(&rt, Device::Cpu, 3, 3, [2, 2], Default::default())?;
        assert_eq!(m.parameters().len(), 2);
        assert_eq!(rt.stats().live_resources, 2);
    }
    assert_eq!(rt.stats().live_resources, 0);
    Ok(())
}

#[test]
fn test_reinitialize_weight_in_place() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let m = conv_transpose1d(&rt, Device::Cpu, 1, 1, [4], Default::default())?;
    let mut ws = m.weight().deep_clone()?;
    Init::Uniform { lo: 2.0, up: 3.0 }.set(&mut ws)?;
    assert!(ws.to_f64_vec()?.iter().all(|&x| (2.0..3.0).contains(&x)));

    let mut wrong = Tensor::zeros(&rt, (4,), DType::F32, Device::Cpu)?;
    assert!(matches!(wrong.copy_(&ws), Err(Error::ShapeMismatch { .. })));
    Ok(())
}

#[test]
fn test_kaiming_rank_limit() {
    let rt = HostRuntime::new();
    let dims = vec![1usize; MAX_KAIMING_RANK + 1];
    let r = Init::KaimingUniform.init_tensor(&rt, dims, Device::Cpu);
    assert!(matches!(r, Err(Error::RankTooLarge { .. })));
    assert_eq!(rt.stats().allocations, 0);
}

// Composition

#[test]
fn test_sequential_decoder() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let cfg = ConvTransposeConfig::default().stride([2]);
    let model = Sequential::new()
        .add(conv_transpose2d(&rt, Device::Cpu, 8, 4, [2, 2], cfg.clone())?)
        .add_fn(relu)
        .add(conv_transpose2d(&rt, Device::Cpu, 4, 1, [2, 2], cfg)?);
    assert_eq!(model.len(), 3);

    let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["0.weight", "0.bias", "2.weight", "2.bias"]);
    assert_eq!(model.num_parameters(), 8 * 4 * 4 + 4 + 4 * 4 + 1);

    let x = Tensor::ones(&rt, (2, 8, 3, 3), DType::F32, Device::Cpu)?;
    let live_before = rt.stats().live_resources;
    let y = x.apply(&model)?;
    assert_eq!(y.dims(), &[2, 1, 12, 12]);
    assert_eq!(rt.stats().live_resources, live_before + 1);
    Ok(())
}

#[test]
fn test_sequential_t_with_dropout() -> tether::Result<()> {
    let rt = HostRuntime::with_config(HostConfig::default().with_seed(9));
    let model = SequentialT::new()
        .add(Dropout::new(0.5)?)
        .add_fn(relu);
    let x = Tensor::ones(&rt, (64,), DType::F32, Device::Cpu)?;

    let eval = x.apply_t(&model, false)?;
    assert_eq!(eval.to_f64_vec()?, vec![1.0; 64]);

    let train = x.apply_t(&model, true)?.to_f64_vec()?;
    assert!(train.iter().all(|&v| v == 0.0 || v == 2.0));
    assert!(train.iter().any(|&v| v == 0.0));
    Ok(())
}

#[test]
fn test_apply_opt_chain() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let x = Tensor::from_slice(&rt, &[-1.0f32, 2.0], (2,), Device::Cpu)?;
    let act = func(relu);
    let y = x.apply_opt(Some(&act))?;
    assert_eq!(y.to_vec::<f32>()?, vec![0.0, 2.0]);
    let z = y.apply_opt(None)?;
    assert_ne!(z.id(), y.id());
    assert_eq!(z.to_vec::<f32>()?, vec![0.0, 2.0]);
    Ok(())
}

#[test]
fn test_shallow_view_feeds_layers() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let x = Tensor::from_slice(&rt, &[-3.0f32, 4.0], (2,), Device::Cpu)?;
    let view = x.shallow_clone();
    let y = view.apply(&func(relu))?;
    assert_eq!(y.to_vec::<f32>()?, vec![0.0, 4.0]);
    assert_eq!(view.id(), x.id());
    Ok(())
}

#[test]
fn test_no_grad_scope_around_forward() -> tether::Result<()> {
    let rt = HostRuntime::new();
    let m = conv_transpose1d(&rt, Device::Cpu, 1, 1, [1], Default::default())?;
    let x = Tensor::ones(&rt, (1, 1, 3), DType::F32, Device::Cpu)?;
    let y = no_grad(&rt, || {
        assert!(!rt.grad_enabled());
        m.forward(&x)
    })?;
    assert!(rt.grad_enabled());
    assert_eq!(y.dims(), &[1, 1, 3]);
    Ok(())
}
