// Host kernels — the numeric work behind HostRuntime
//
// Every kernel works on plain host buffers: packed bytes for the pure data
// movers (narrow, index_select), f64 values for arithmetic. The runtime does
// the decoding, validation against live metadata, and re-encoding.
//
// TRANSPOSED CONVOLUTION:
//
//   input:  [N, C_in, s_1, ..., s_k]
//   weight: [C_in, C_out / groups, k_1, ..., k_k]
//   bias:   [C_out]                                   (optional)
//   output: [N, C_out, o_1, ..., o_k]
//
//   o_d = (s_d - 1) * stride_d - 2 * padding_d
//         + dilation_d * (k_d - 1) + output_padding_d + 1
//
//   Each input element scatters into the output:
//
//     out[n, g*Cg_out + co, x*stride - pad + j*dil] +=
//         in[n, g*Cg_in + ci, x] * w[g*Cg_in + ci, co, j]
//
//   The (input position, kernel tap) → output position table depends only on
//   the spatial geometry, so it is computed once and shared by every batch
//   sample. Batch samples write disjoint output slices and run in parallel.

use rayon::prelude::*;

use tether_core::{ConvTransposeParams, Error, Result};

//  Data movement

/// Gather the given rows of `dim` from a packed row-major buffer.
///
/// `rows` may repeat or reorder entries; each must be below `dims[dim]`.
pub(crate) fn gather_rows(
    bytes: &[u8],
    elem_size: usize,
    dims: &[usize],
    dim: usize,
    rows: &[usize],
) -> Vec<u8> {
    let outer: usize = dims[..dim].iter().product();
    let inner: usize = dims[dim + 1..].iter().product::<usize>() * elem_size;
    let dim_size = dims[dim];

    let mut out = Vec::with_capacity(outer * rows.len() * inner);
    for o in 0..outer {
        let base = o * dim_size * inner;
        for &r in rows {
            let start = base + r * inner;
            out.extend_from_slice(&bytes[start..start + inner]);
        }
    }
    out
}

//  Transposed convolution

/// Spatial extent of the output of a transposed convolution.
pub(crate) fn conv_transpose_output_dims(
    input_spatial: &[usize],
    kernel_spatial: &[usize],
    params: &ConvTransposeParams,
) -> Result<Vec<usize>> {
    let mut out = Vec::with_capacity(input_spatial.len());
    for d in 0..input_spatial.len() {
        let (s, k) = (input_spatial[d] as i64, kernel_spatial[d] as i64);
        let (stride, pad) = (params.stride[d] as i64, params.padding[d] as i64);
        let (dil, out_pad) = (params.dilation[d] as i64, params.output_padding[d] as i64);
        let size = (s - 1) * stride - 2 * pad + dil * (k - 1) + out_pad + 1;
        if size <= 0 {
            return Err(Error::invalid_config(format!(
                "conv_transpose output size along spatial dim {} is {}",
                d, size
            )));
        }
        out.push(size as usize);
    }
    Ok(out)
}

/// Row-major enumeration of every multi-index inside `dims`.
fn multi_indices(dims: &[usize]) -> Vec<Vec<usize>> {
    let total: usize = dims.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut idx = vec![0usize; dims.len()];
    for _ in 0..total {
        out.push(idx.clone());
        for d in (0..dims.len()).rev() {
            idx[d] += 1;
            if idx[d] < dims[d] {
                break;
            }
            idx[d] = 0;
        }
    }
    out
}

fn flat_offset(idx: &[usize], dims: &[usize]) -> usize {
    idx.iter().zip(dims).fold(0, |acc, (&i, &d)| acc * d + i)
}

/// One valid (input position, kernel tap) → output position scatter.
struct Tap {
    input: usize,
    kernel: usize,
    output: usize,
}

fn scatter_taps(
    input_spatial: &[usize],
    kernel_spatial: &[usize],
    output_spatial: &[usize],
    params: &ConvTransposeParams,
) -> Vec<Tap> {
    let inputs = multi_indices(input_spatial);
    let kernels = multi_indices(kernel_spatial);
    let mut taps = Vec::new();
    let mut pos = vec![0usize; output_spatial.len()];
    for x in &inputs {
        'tap: for j in &kernels {
            for d in 0..pos.len() {
                let p = (x[d] * params.stride[d] + j[d] * params.dilation[d]) as i64
                    - params.padding[d] as i64;
                if p < 0 || p >= output_spatial[d] as i64 {
                    continue 'tap;
                }
                pos[d] = p as usize;
            }
            taps.push(Tap {
                input: flat_offset(x, input_spatial),
                kernel: flat_offset(j, kernel_spatial),
                output: flat_offset(&pos, output_spatial),
            });
        }
    }
    taps
}

/// N-d transposed convolution on f64 buffers. Returns the output values and
/// the output dims.
pub(crate) fn conv_transpose(
    input: &[f64],
    in_dims: &[usize],
    weight: &[f64],
    w_dims: &[usize],
    bias: Option<&[f64]>,
    params: &ConvTransposeParams,
) -> Result<(Vec<f64>, Vec<usize>)> {
    params.validate()?;
    let n_spatial = params.spatial_rank();
    if in_dims.len() != n_spatial + 2 {
        return Err(Error::RankMismatch {
            expected: n_spatial + 2,
            got: in_dims.len(),
        });
    }
    if w_dims.len() != n_spatial + 2 {
        return Err(Error::RankMismatch {
            expected: n_spatial + 2,
            got: w_dims.len(),
        });
    }

    let (batch, c_in) = (in_dims[0], in_dims[1]);
    let groups = params.groups;
    if w_dims[0] != c_in {
        return Err(Error::invalid_config(format!(
            "conv_transpose weight has {} input channels, input has {}",
            w_dims[0], c_in
        )));
    }
    if c_in % groups != 0 {
        return Err(Error::invalid_config(format!(
            "conv_transpose input channels {} not divisible by groups {}",
            c_in, groups
        )));
    }
    let cg_in = c_in / groups;
    let cg_out = w_dims[1];
    let c_out = cg_out * groups;

    if let Some(b) = bias {
        if b.len() != c_out {
            return Err(Error::invalid_config(format!(
                "conv_transpose bias has {} entries, expected {}",
                b.len(),
                c_out
            )));
        }
    }

    let in_spatial = &in_dims[2..];
    let k_spatial = &w_dims[2..];
    let out_spatial = conv_transpose_output_dims(in_spatial, k_spatial, params)?;

    let in_plane: usize = in_spatial.iter().product();
    let k_plane: usize = k_spatial.iter().product();
    let out_plane: usize = out_spatial.iter().product();
    let taps = scatter_taps(in_spatial, k_spatial, &out_spatial, params);

    let sample_out = c_out * out_plane;
    let mut output = vec![0.0f64; batch * sample_out];

    if sample_out > 0 {
        output
            .par_chunks_mut(sample_out)
            .enumerate()
            .for_each(|(n, out)| {
                let sample_in = &input[n * c_in * in_plane..(n + 1) * c_in * in_plane];
                for g in 0..groups {
                    for ci in 0..cg_in {
                        let c = g * cg_in + ci;
                        let in_ch = &sample_in[c * in_plane..(c + 1) * in_plane];
                        for co in 0..cg_out {
                            let w_base = (c * cg_out + co) * k_plane;
                            let w_ch = &weight[w_base..w_base + k_plane];
                            let o_base = (g * cg_out + co) * out_plane;
                            let out_ch = &mut out[o_base..o_base + out_plane];
                            for t in &taps {
                                out_ch[t.output] += in_ch[t.input] * w_ch[t.kernel];
                            }
                        }
                    }
                }
                if let Some(b) = bias {
                    for (co, &bv) in b.iter().enumerate() {
                        for v in &mut out[co * out_plane..(co + 1) * out_plane] {
                            *v += bv;
                        }
                    }
                }
            });
    }

    let mut out_dims = vec![batch, c_out];
    out_dims.extend_from_slice(&out_spatial);
    Ok((output, out_dims))
}

//  Metrics

/// Fraction of rows whose argmax (first maximum wins) equals the target.
pub(crate) fn accuracy(logits: &[f64], classes: usize, targets: &[f64]) -> Result<f64> {
    if classes == 0 {
        return Err(Error::EmptyInput("accuracy over zero classes".into()));
    }
    let rows = logits.len() / classes;
    if rows == 0 {
        return Err(Error::EmptyInput("accuracy over zero rows".into()));
    }
    if targets.len() != rows {
        return Err(Error::BatchSizeMismatch {
            data: rows,
            label: targets.len(),
        });
    }
    let mut correct = 0usize;
    for (row, &target) in logits.chunks_exact(classes).zip(targets) {
        let mut best = 0;
        for (i, &v) in row.iter().enumerate() {
            if v > row[best] {
                best = i;
            }
        }
        if best as f64 == target.round() {
            correct += 1;
        }
    }
    Ok(correct as f64 / rows as f64)
}
