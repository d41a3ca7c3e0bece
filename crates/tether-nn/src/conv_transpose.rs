// ConvTranspose — 1D/2D/3D transposed convolution layers
//
// A transposed convolution maps [N, C_in, s...] to [N, C_out, o...], growing
// the spatial extent (the gradient of a convolution with respect to its
// input). The numeric work is one runtime call; this layer owns the
// parameters and the configuration.
//
// PARAMETER SHAPES:
//
//   weight: [C_in, C_out / groups, k...]
//   bias:   [C_out]                        (optional)
//
// CONFIGURATION:
//
//   stride, padding, output_padding and dilation are per-dimension lists.
//   A list of length 1 applies to every spatial dimension; otherwise it must
//   have one entry per kernel dimension.
//
// CONSTRUCTION ORDER:
//
//   Everything is validated before the first allocation. The bias is created
//   first and the weight second; if the weight cannot be created the bias
//   handle is dropped on the error path, so a failed construction leaves no
//   live resources behind.

use tether_core::{ConvTransposeParams, Device, Error, Result, Runtime, Tensor};

use crate::init::Init;
use crate::module::Module;

/// Configuration of a [`ConvTranspose`] layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvTransposeConfig {
    pub stride: Vec<usize>,
    pub padding: Vec<usize>,
    pub output_padding: Vec<usize>,
    pub dilation: Vec<usize>,
    pub groups: usize,
    pub bias: bool,
    pub ws_init: Init,
    pub bs_init: Init,
}

impl Default for ConvTransposeConfig {
    fn default() -> Self {
        ConvTransposeConfig {
            stride: vec![1],
            padding: vec![0],
            output_padding: vec![0],
            dilation: vec![1],
            groups: 1,
            bias: true,
            ws_init: Init::KaimingUniform,
            bs_init: Init::Const(0.0),
        }
    }
}

impl ConvTransposeConfig {
    pub fn stride(mut self, stride: impl Into<Vec<usize>>) -> Self {
        self.stride = stride.into();
        self
    }

    pub fn padding(mut self, padding: impl Into<Vec<usize>>) -> Self {
        self.padding = padding.into();
        self
    }

    pub fn output_padding(mut self, output_padding: impl Into<Vec<usize>>) -> Self {
        self.output_padding = output_padding.into();
        self
    }

    pub fn dilation(mut self, dilation: impl Into<Vec<usize>>) -> Self {
        self.dilation = dilation.into();
        self
    }

    pub fn groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn ws_init(mut self, init: Init) -> Self {
        self.ws_init = init;
        self
    }

    pub fn bs_init(mut self, init: Init) -> Self {
        self.bs_init = init;
        self
    }

    /// Expand the per-dimension lists to `n` spatial dimensions.
    fn expand(&self, n: usize) -> Result<ConvTransposeParams> {
        Ok(ConvTransposeParams {
            stride: expand_list("stride", &self.stride, n)?,
            padding: expand_list("padding", &self.padding, n)?,
            output_padding: expand_list("output_padding", &self.output_padding, n)?,
            dilation: expand_list("dilation", &self.dilation, n)?,
            groups: self.groups,
        })
    }
}

fn expand_list(name: &str, list: &[usize], n: usize) -> Result<Vec<usize>> {
    match list.len() {
        1 => Ok(vec![list[0]; n]),
        len if len == n => Ok(list.to_vec()),
        len => Err(Error::invalid_config(format!(
            "{} has {} entries, expected 1 or {}",
            name, len, n
        ))),
    }
}

/// Transposed convolution over 1, 2 or 3 spatial dimensions.
///
/// # Examples
/// ```ignore
/// let cfg = ConvTransposeConfig::default().stride([2]).padding([1]).output_padding([1]);
/// let up = conv_transpose2d(&rt, Device::Cpu, 16, 8, [3, 3], cfg)?;
/// let y = up.forward(&x)?; // [N, 16, 7, 7] -> [N, 8, 14, 14]
/// ```
#[derive(Debug)]
pub struct ConvTranspose<R: Runtime> {
    ws: Tensor<R>,
    bs: Option<Tensor<R>>,
    config: ConvTransposeConfig,
    params: ConvTransposeParams,
}

impl<R: Runtime> ConvTranspose<R> {
    /// Create a layer with `ksizes.len()` spatial dimensions.
    pub fn new(
        runtime: &R,
        device: Device,
        in_dim: usize,
        out_dim: usize,
        ksizes: &[usize],
        config: ConvTransposeConfig,
    ) -> Result<Self> {
        let n = ksizes.len();
        if n == 0 {
            return Err(Error::invalid_config(
                "conv_transpose needs at least one kernel dimension",
            ));
        }
        if ksizes.contains(&0) {
            return Err(Error::invalid_config(format!(
                "kernel sizes must be positive, got {:?}",
                ksizes
            )));
        }
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::invalid_config("channel counts must be positive"));
        }
        if config.groups == 0 || in_dim % config.groups != 0 || out_dim % config.groups != 0 {
            return Err(Error::invalid_config(format!(
                "groups {} must divide in_dim {} and out_dim {}",
                config.groups, in_dim, out_dim
            )));
        }
        let params = config.expand(n)?;
        params.validate()?;

        let bs = if config.bias {
            Some(config.bs_init.init_tensor(runtime, (out_dim,), device)?)
        } else {
            None
        };
        let mut ws_dims = vec![in_dim, out_dim / config.groups];
        ws_dims.extend_from_slice(ksizes);
        let ws = config.ws_init.init_tensor(runtime, ws_dims, device)?;

        tracing::debug!(in_dim, out_dim, ?ksizes, groups = config.groups, "conv_transpose layer created");
        Ok(ConvTranspose {
            ws,
            bs,
            config,
            params,
        })
    }

    pub fn weight(&self) -> &Tensor<R> {
        &self.ws
    }

    pub fn bias(&self) -> Option<&Tensor<R>> {
        self.bs.as_ref()
    }

    pub fn config(&self) -> &ConvTransposeConfig {
        &self.config
    }

    /// Configuration expanded to one entry per spatial dimension.
    pub fn params(&self) -> &ConvTransposeParams {
        &self.params
    }
}

fn check_kernel_rank(ksizes: &[usize], n: usize) -> Result<()> {
    if ksizes.len() != n {
        return Err(Error::invalid_config(format!(
            "conv_transpose{}d needs {} kernel sizes, got {}",
            n,
            n,
            ksizes.len()
        )));
    }
    Ok(())
}

/// 1D transposed convolution: input `[N, C_in, L]`.
pub fn conv_transpose1d<R: Runtime>(
    runtime: &R,
    device: Device,
    in_dim: usize,
    out_dim: usize,
    ksizes: impl AsRef<[usize]>,
    config: ConvTransposeConfig,
) -> Result<ConvTranspose<R>> {
    check_kernel_rank(ksizes.as_ref(), 1)?;
    ConvTranspose::new(runtime, device, in_dim, out_dim, ksizes.as_ref(), config)
}

/// 2D transposed convolution: input `[N, C_in, H, W]`.
pub fn conv_transpose2d<R: Runtime>(
    runtime: &R,
    device: Device,
    in_dim: usize,
    out_dim: usize,
    ksizes: impl AsRef<[usize]>,
    config: ConvTransposeConfig,
) -> Result<ConvTranspose<R>> {
    check_kernel_rank(ksizes.as_ref(), 2)?;
    ConvTranspose::new(runtime, device, in_dim, out_dim, ksizes.as_ref(), config)
}

/// 3D transposed convolution: input `[N, C_in, D, H, W]`.
pub fn conv_transpose3d<R: Runtime>(
    runtime: &R,
    device: Device,
    in_dim: usize,
    out_dim: usize,
    ksizes: impl AsRef<[usize]>,
    config: ConvTransposeConfig,
) -> Result<ConvTranspose<R>> {
    check_kernel_rank(ksizes.as_ref(), 3)?;
    ConvTranspose::new(runtime, device, in_dim, out_dim, ksizes.as_ref(), config)
}

impl<R: Runtime> Module<R> for ConvTranspose<R> {
    fn forward(&self, xs: &Tensor<R>) -> Result<Tensor<R>> {
        xs.conv_transpose(&self.ws, self.bs.as_ref(), &self.params)
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor<R>)> {
        let mut named = vec![("weight".to_string(), &self.ws)];
        if let Some(bs) = &self.bs {
            named.push(("bias".to_string(), bs));
        }
        named
    }
}

crate::impl_module_t!([R: Runtime] ConvTranspose<R>, R);
