use derive_more::{Display, Error};

use crate::VariableId;

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum Error {
    /// Data length differs from the element count of the target buffer.
    #[display("tensor element count: {expected}, differs from data length: {got}")]
    ShapeMismatch { expected: usize, got: usize },
    /// A layer received an input whose fixed axis does not match its parameters.
    #[display("dimension {axis} mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        axis: usize,
        expected: usize,
        got: usize,
    },
    #[display("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },
    #[display("network has not been initialized")]
    NotInitialized,
    #[display("network has no layers")]
    EmptyNetwork,
    /// The same variable was requested more than once in a disjoint borrow.
    #[display("variable {id} requested more than once")]
    AliasedVariable { id: VariableId },
    #[display("failed to allocate a buffer of {elements} elements")]
    AllocationFailure { elements: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
