use std::fmt;

use crate::error::{Error, Result};

// DType — element kinds understood by the runtime boundary
//
// Every tensor resource carries a DType that fixes its element width. Host
// data crossing the boundary is packed at exactly that width, little-endian,
// in row-major order:
//
//   F16  — 16-bit IEEE half float
//   BF16 — 16-bit brain float
//   F32  — 32-bit float, the default for parameters
//   F64  — 64-bit float
//   U8   — unsigned byte, images and masks
//   U32  — unsigned 32-bit int
//   I64  — signed 64-bit int, labels and permutation indices

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    U8,
    U32,
    I64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 => 2,
            DType::BF16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::U8 => 1,
            DType::U32 => 4,
            DType::I64 => 8,
        }
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Whether this dtype can index another tensor.
    pub fn is_index(&self) -> bool {
        matches!(self, DType::U8 | DType::U32 | DType::I64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::I64 => "i64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — connects Rust element types to the DType enum
//
// Besides the f64 conversions used by generic numeric code, each element type
// knows how to write and read itself at its packed little-endian width.

/// Trait implemented by Rust types that can be stored in a tensor.
pub trait WithDType: Copy + Send + Sync + 'static + std::fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;

    /// Append the little-endian encoding of this value.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one value from exactly `DTYPE.size_in_bytes()` bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! le_codec {
    ($t:ty, $n:expr) => {
        fn write_le(self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.to_le_bytes());
        }
        fn read_le(bytes: &[u8]) -> Self {
            let mut buf = [0u8; $n];
            buf.copy_from_slice(&bytes[..$n]);
            <$t>::from_le_bytes(buf)
        }
    };
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    le_codec!(f32, 4);
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    le_codec!(f64, 8);
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
    le_codec!(half::f16, 2);
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
    le_codec!(half::bf16, 2);
}

impl WithDType for u8 {
    const DTYPE: DType = DType::U8;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as u8
    }
    le_codec!(u8, 1);
}

impl WithDType for u32 {
    const DTYPE: DType = DType::U32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as u32
    }
    le_codec!(u32, 4);
}

impl WithDType for i64 {
    const DTYPE: DType = DType::I64;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as i64
    }
    le_codec!(i64, 8);
}

// Byte codec
//
// `encode`/`decode` work on a concrete element type; the `_f64` variants
// dispatch on a runtime DType and go through f64, which is what the
// initializers and the reference runtime need.

macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DType::F16 => {
                type $t = half::f16;
                $body
            }
            DType::BF16 => {
                type $t = half::bf16;
                $body
            }
            DType::F32 => {
                type $t = f32;
                $body
            }
            DType::F64 => {
                type $t = f64;
                $body
            }
            DType::U8 => {
                type $t = u8;
                $body
            }
            DType::U32 => {
                type $t = u32;
                $body
            }
            DType::I64 => {
                type $t = i64;
                $body
            }
        }
    };
}

/// Pack host values into a tightly packed little-endian buffer.
pub fn encode<T: WithDType>(data: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * T::DTYPE.size_in_bytes());
    for &v in data {
        v.write_le(&mut out);
    }
    out
}

/// Unpack a little-endian buffer into host values.
pub fn decode<T: WithDType>(bytes: &[u8]) -> Result<Vec<T>> {
    let width = T::DTYPE.size_in_bytes();
    if bytes.len() % width != 0 {
        return Err(Error::msg(format!(
            "{} bytes is not a whole number of {} elements",
            bytes.len(),
            T::DTYPE
        )));
    }
    Ok(bytes.chunks_exact(width).map(T::read_le).collect())
}

/// Encode f64 values at the width of `dtype`, converting each element.
pub fn encode_f64(data: &[f64], dtype: DType) -> Vec<u8> {
    with_dtype!(dtype, T => {
        let mut out = Vec::with_capacity(data.len() * dtype.size_in_bytes());
        for &v in data {
            T::from_f64(v).write_le(&mut out);
        }
        out
    })
}

/// Decode a buffer of `dtype` elements into f64 values.
pub fn decode_f64(bytes: &[u8], dtype: DType) -> Result<Vec<f64>> {
    with_dtype!(dtype, T => {
        Ok(decode::<T>(bytes)?.into_iter().map(T::to_f64).collect())
    })
}

/// The value `v` becomes once stored as `dtype`.
pub fn round_to(v: f64, dtype: DType) -> f64 {
    with_dtype!(dtype, T => T::from_f64(v).to_f64())
}
