use crate::graph::node::VectorId;
use thiserror::Error;

/// Error type for every navgraph operation.
///
/// Dangling edges left behind by removal are not errors: traversal skips
/// them. Returning fewer results than requested is not an error either.
#[derive(Error, Debug)]
pub enum Error {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector {0} not found")]
    NotFound(VectorId),

    #[error("corrupt index data: {0}")]
    Corrupt(String),

    #[error("id space exhausted: {0} vectors already allocated")]
    CapacityExceeded(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for navgraph operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Fails with [`Error::DimensionMismatch`] unless `actual == expected`.
    pub fn check_dimension(expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Error::DimensionMismatch { expected, actual })
        }
    }
}
