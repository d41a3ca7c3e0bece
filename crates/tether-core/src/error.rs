use crate::device::Device;
use crate::dtype::DType;
use crate::runtime::ResourceId;
use crate::shape::Shape;

/// All errors that can occur within Tether.
///
/// Every call that crosses the runtime boundary reports failure through this
/// enum. Nothing in the library terminates the process; the caller decides
/// whether to retry, substitute a default or give up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors (e.g. copying [2,3] into [3,2]).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Host data length does not match the declared shape.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Encoded byte buffer does not match `size_in_bytes(dtype) * elem_count(shape)`.
    #[error("byte length mismatch: shape {shape} of {dtype} requires {expected} bytes, got {got}")]
    ByteLengthMismatch {
        shape: Shape,
        dtype: DType,
        expected: usize,
        got: usize,
    },

    /// The shape's byte size does not fit in the address space.
    #[error("shape {shape} of {dtype} is too large to address")]
    ShapeTooLarge { shape: Shape, dtype: DType },

    /// Data and label sources disagree on the leading (batch) dimension.
    #[error("batch size mismatch: data has {data} rows, labels have {label}")]
    BatchSizeMismatch { data: usize, label: usize },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// Rank exceeds what an operation supports.
    #[error("rank {rank} exceeds the supported maximum of {max}")]
    RankTooLarge { rank: usize, max: usize },

    /// Element kind conflicts with the stored or requested kind.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch { expected: DType, got: DType },

    /// Operands live on different devices.
    #[error("device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },

    /// The runtime has no such device.
    #[error("device {0} is not available")]
    DeviceUnavailable(Device),

    /// The runtime could not allocate a resource.
    #[error("allocation of {requested} bytes on {device} failed ({available} bytes available)")]
    AllocationFailure {
        requested: usize,
        available: usize,
        device: Device,
    },

    /// The id does not name a live resource (never issued, or already released).
    #[error("unknown tensor resource {0}")]
    UnknownResource(ResourceId),

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Narrow/slice operation out of bounds.
    #[error("narrow out of bounds: dim {dim}, start {start}, len {len}, dim_size {dim_size}")]
    NarrowOutOfBounds {
        dim: usize,
        start: usize,
        len: usize,
        dim_size: usize,
    },

    /// An index tensor refers past the end of the indexed dimension.
    #[error("index {index} out of bounds for dimension of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    /// Tried to access a scalar from a non-scalar tensor.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    /// A layer or initializer was configured inconsistently.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A reduction ran over zero samples.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create an [`Error::InvalidConfig`] from any string message.
    pub fn invalid_config(s: impl Into<String>) -> Self {
        Error::InvalidConfig(s.into())
    }
}

/// Convenience Result type used throughout Tether.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
