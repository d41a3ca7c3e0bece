// nn::init — Parameter initializers
//
// An Init value describes how to fill a parameter tensor. It is used two ways:
//
//   init.init_tensor(&rt, shape, device)   — allocate a new F32 tensor
//   init.set(&mut tensor)                  — refill an existing tensor in place
//
// AVAILABLE INITIALIZERS:
//
//   Const(v)              — every element = v
//   Randn { mean, stdev } — N(mean, stdev²), sampled by the runtime
//   Uniform { lo, up }    — U[lo, up), sampled by the runtime
//   KaimingUniform        — U[-b, b] with b = sqrt(1 / (rank - 1)!)
//   GlorotNormal          — N(0, 2 / (fan_in + fan_out))
//
// All random initializers draw from the runtime's generator, so a seeded
// runtime reproduces every parameter.
//
// KAIMING BOUND:
//
//   The bound uses the factorial of (rank - 1), not a fan count. The factorial
//   is computed iteratively with overflow checks, which limits the supported
//   rank to MAX_KAIMING_RANK. Ranks are validated before anything is allocated.

use tether_core::{DType, Device, Error, Result, Runtime, Shape, Tensor};

/// Element kind of every tensor an initializer creates.
pub const DEFAULT_KIND: DType = DType::F32;

/// Largest rank KaimingUniform supports; `(MAX_KAIMING_RANK - 1)!` fits in u64.
pub const MAX_KAIMING_RANK: usize = 21;

/// How to fill a parameter tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Every element equals the value.
    Const(f64),
    /// Normal with the given mean and standard deviation.
    Randn { mean: f64, stdev: f64 },
    /// Uniform on `[lo, up)`.
    Uniform { lo: f64, up: f64 },
    /// Uniform on `[-b, b]` with `b = sqrt(1 / (rank - 1)!)`.
    KaimingUniform,
    /// Normal with mean 0 and `std = sqrt(2 / (fan_in + fan_out))`.
    GlorotNormal,
}

impl Init {
    /// Create a new F32 tensor of `shape` on `device` filled by this initializer.
    pub fn init_tensor<R: Runtime>(
        &self,
        runtime: &R,
        shape: impl Into<Shape>,
        device: Device,
    ) -> Result<Tensor<R>> {
        let shape = shape.into();
        match *self {
            Init::Const(v) if v == 0.0 => Tensor::zeros(runtime, shape, DEFAULT_KIND, device),
            Init::Const(v) if v == 1.0 => Tensor::ones(runtime, shape, DEFAULT_KIND, device),
            Init::Const(v) => Tensor::full(runtime, shape, v, DEFAULT_KIND, device),
            Init::Randn { mean, stdev } => {
                let mut t = Tensor::zeros(runtime, shape, DEFAULT_KIND, device)?;
                t.normal_(mean, stdev)?;
                Ok(t)
            }
            Init::Uniform { lo, up } => {
                let mut t = Tensor::zeros(runtime, shape, DEFAULT_KIND, device)?;
                t.uniform_(lo, up)?;
                Ok(t)
            }
            Init::KaimingUniform => {
                let bound = kaiming_bound(shape.rank())?;
                let mut t = Tensor::zeros(runtime, shape, DEFAULT_KIND, device)?;
                t.uniform_(-bound, bound)?;
                Ok(t)
            }
            Init::GlorotNormal => {
                let std = glorot_std(&shape);
                let mut t = Tensor::zeros(runtime, shape, DEFAULT_KIND, device)?;
                t.normal_(0.0, std)?;
                Ok(t)
            }
        }
    }

    /// Refill `tensor` in place. Shape, kind and device are unchanged.
    pub fn set<R: Runtime>(&self, tensor: &mut Tensor<R>) -> Result<()> {
        match *self {
            Init::Const(v) => tensor.fill_(v),
            Init::Uniform { lo, up } => tensor.uniform_(lo, up),
            Init::KaimingUniform => {
                let bound = kaiming_bound(tensor.rank())?;
                tensor.uniform_(-bound, bound)
            }
            Init::Randn { mean, stdev } => tensor.normal_(mean, stdev),
            Init::GlorotNormal => {
                let std = glorot_std(tensor.shape());
                tensor.normal_(0.0, std)
            }
        }
    }
}

/// `n!`, or `None` when it does not fit in u64.
pub fn factorial(n: usize) -> Option<u64> {
    (2..=n as u64).try_fold(1u64, |acc, k| acc.checked_mul(k))
}

/// Half-width of the KaimingUniform interval for a tensor of `rank`.
pub fn kaiming_bound(rank: usize) -> Result<f64> {
    if rank == 0 {
        return Err(Error::invalid_config(
            "kaiming uniform needs a tensor of rank 1 or more",
        ));
    }
    if rank > MAX_KAIMING_RANK {
        return Err(Error::RankTooLarge {
            rank,
            max: MAX_KAIMING_RANK,
        });
    }
    let fact = factorial(rank - 1).ok_or(Error::RankTooLarge {
        rank,
        max: MAX_KAIMING_RANK,
    })?;
    Ok((1.0 / fact as f64).sqrt())
}

/// Compute (fan_in, fan_out) from a shape.
///
/// Conv-style for rank 3 and up: `dims[1]` and `dims[0]` times the receptive
/// field `product(dims[2..])`.
fn compute_fans(shape: &Shape) -> (f64, f64) {
    let dims = shape.dims();
    match dims.len() {
        0 => (1.0, 1.0),
        1 => (dims[0] as f64, dims[0] as f64),
        2 => (dims[1] as f64, dims[0] as f64),
        _ => {
            let receptive_field: usize = dims[2..].iter().product();
            let fan_in = dims[1] as f64 * receptive_field as f64;
            let fan_out = dims[0] as f64 * receptive_field as f64;
            (fan_in, fan_out)
        }
    }
}

fn glorot_std(shape: &Shape) -> f64 {
    let (fan_in, fan_out) = compute_fans(shape);
    let total = fan_in + fan_out;
    if total > 0.0 {
        (2.0 / total).sqrt()
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_host::{HostConfig, HostRuntime};

    #[test]
    fn test_factorial() {
        assert_eq!(factorial(0), Some(1));
        assert_eq!(factorial(1), Some(1));
        assert_eq!(factorial(5), Some(120));
        assert_eq!(factorial(20), Some(2_432_902_008_176_640_000));
        assert_eq!(factorial(21), None);
    }

    #[test]
    fn test_kaiming_bound() {
        assert_eq!(kaiming_bound(1).unwrap(), 1.0);
        assert_eq!(kaiming_bound(2).unwrap(), 1.0);
        assert!((kaiming_bound(3).unwrap() - 0.5f64.sqrt()).abs() < 1e-12);
        assert!(matches!(kaiming_bound(0), Err(Error::InvalidConfig(_))));
        assert!(matches!(kaiming_bound(22), Err(Error::RankTooLarge { .. })));
    }

    #[test]
    fn test_const_values() {
        let rt = HostRuntime::new();
        for v in [0.0, 1.0, 7.5] {
            let t = Init::Const(v).init_tensor(&rt, (3, 4), Device::Cpu).unwrap();
            assert_eq!(t.dims(), &[3, 4]);
            assert_eq!(t.dtype(), DType::F32);
            assert!(t.to_f64_vec().unwrap().iter().all(|&x| x == v));
        }
    }

    #[test]
    fn test_uniform_range() {
        let rt = HostRuntime::new();
        let t = Init::Uniform { lo: -2.0, up: 3.0 }
            .init_tensor(&rt, (1000,), Device::Cpu)
            .unwrap();
        assert!(t.to_f64_vec().unwrap().iter().all(|&x| (-2.0..3.0).contains(&x)));
    }

    #[test]
    fn test_kaiming_uniform_rank_one_within_unit() {
        let rt = HostRuntime::new();
        let t = Init::KaimingUniform
            .init_tensor(&rt, (500,), Device::Cpu)
            .unwrap();
        assert!(t.to_f64_vec().unwrap().iter().all(|&x| (-1.0..=1.0).contains(&x)));
    }

    #[test]
    fn test_kaiming_scalar_rejected_before_allocation() {
        let rt = HostRuntime::new();
        let r = Init::KaimingUniform.init_tensor(&rt, (), Device::Cpu);
        assert!(matches!(r, Err(Error::InvalidConfig(_))));
        assert_eq!(rt.stats().allocations, 0);
    }

    #[test]
    fn test_randn_stats() {
        let rt = HostRuntime::new();
        let t = Init::Randn {
            mean: 5.0,
            stdev: 0.1,
        }
        .init_tensor(&rt, (10000,), Device::Cpu)
        .unwrap();
        let v = t.to_f64_vec().unwrap();
        let mean: f64 = v.iter().sum::<f64>() / v.len() as f64;
        assert!((mean - 5.0).abs() < 0.05, "mean {} too far from 5.0", mean);
    }

    #[test]
    fn test_normal_inits_follow_runtime_seed() {
        let sample = |init: Init| {
            let rt = HostRuntime::with_config(HostConfig::default().with_seed(11));
            let t = init.init_tensor(&rt, (4, 3, 2), Device::Cpu).unwrap();
            t.to_f64_vec().unwrap()
        };
        let randn = Init::Randn {
            mean: 1.0,
            stdev: 2.0,
        };
        assert_eq!(sample(randn), sample(randn));
        assert_eq!(sample(Init::GlorotNormal), sample(Init::GlorotNormal));

        let rt = HostRuntime::with_config(HostConfig::default().with_seed(11));
        let mut t = Tensor::zeros(&rt, (4, 3, 2), DType::F32, Device::Cpu).unwrap();
        randn.set(&mut t).unwrap();
        assert_eq!(t.to_f64_vec().unwrap(), sample(randn));
    }

    #[test]
    fn test_glorot_std() {
        // [out=16, in=3, 5, 5]: fan_in 75, fan_out 400
        let std = glorot_std(&Shape::from((16, 3, 5, 5)));
        assert!((std - (2.0 / 475.0f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_set_keeps_shape_and_kind() {
        let rt = HostRuntime::new();
        let mut t = Tensor::zeros(&rt, (2, 3), DType::F64, Device::Cpu).unwrap();
        Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        }
        .set(&mut t)
        .unwrap();
        assert_eq!(t.dims(), &[2, 3]);
        assert_eq!(t.dtype(), DType::F64);
        Init::Const(3.0).set(&mut t).unwrap();
        assert_eq!(t.to_f64_vec().unwrap(), vec![3.0; 6]);
        assert_eq!(rt.stats().live_resources, 1);
    }
}
