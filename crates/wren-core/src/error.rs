use crate::shape::Shape;

/// Which half of a sweep produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Forward,
    Backward,
}

impl std::fmt::Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::Forward => write!(f, "forward"),
            Pass::Backward => write!(f, "backward"),
        }
    }
}

/// All errors that can occur within wren.
///
/// Tensor arithmetic, graph evaluation, sessions and persistence all report
/// through this one enum so `?` works across crate boundaries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two tensors were required to have the same shape.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Trailing-aligned dimensions differ and neither is 1.
    #[error("shapes {lhs} and {rhs} cannot be broadcast together")]
    BroadcastIncompatible { lhs: Shape, rhs: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// Axis index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Row slice outside of axis 0.
    #[error("slice out of bounds: start {start}, len {len}, rows {rows}")]
    SliceOutOfBounds {
        start: usize,
        len: usize,
        rows: usize,
    },

    /// Tried to read a scalar from a tensor holding more than one value.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    /// Buffer length does not match the requested shape.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Inner dimensions of a matrix product disagree.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// NaN or Inf produced while the finite check level is active.
    #[error("non-finite value in {pass} pass of `{op}`")]
    NonFinite { op: String, pass: Pass },

    /// A node id that does not belong to the graph.
    #[error("unknown node #{0}")]
    UnknownNode(usize),

    /// Node exists but is not a variable.
    #[error("node #{0} is not a variable")]
    NotAVariable(usize),

    /// Node exists but is not a placeholder.
    #[error("node #{0} is not a placeholder")]
    NotAPlaceholder(usize),

    /// Forward evaluation reached a placeholder with no bound tensor.
    #[error("placeholder #{id} ({name}) has no bound tensor")]
    UnboundPlaceholder { id: usize, name: String },

    /// `bind` on a placeholder that already holds a tensor.
    #[error("placeholder #{0} is already bound; use rebind to replace it")]
    PlaceholderAlreadyBound(usize),

    /// Backward requested for a node the last run did not evaluate.
    #[error("node #{0} has not been evaluated in the current run")]
    NotEvaluated(usize),

    /// Underlying I/O failure while persisting tensors.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed persisted tensor text.
    #[error("parse error on line {line}: {msg}")]
    Parse { line: usize, msg: String },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn parse(line: usize, msg: impl Into<String>) -> Self {
        Error::Parse {
            line,
            msg: msg.into(),
        }
    }
}

/// Convenience Result type used throughout wren.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
