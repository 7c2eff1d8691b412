use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    /// Operand dimensions are incompatible for a matrix product or an
    /// elementwise operation. A caller-construction bug, never recovered.
    ShapeMismatch(String),
    /// A hyperparameter or builder argument is out of range.
    InvalidConfig(String),
    /// An input buffer does not satisfy the engine's data contract.
    InvalidData(String),
    /// The operation exists on the interface but this strategy variant does
    /// not support it (e.g. a per-sample call on a batch-only activation).
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShapeMismatch(msg) => write!(f, "shape mismatch: {msg}"),
            Error::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported operation: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
