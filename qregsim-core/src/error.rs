//! Error types shared across the qregsim workspace

use thiserror::Error;

/// Errors raised by the amplitude engine, the circuit layer, and the
/// deferred front end.
///
/// All range checks run synchronously on the submitting thread; work that
/// reaches the dispatch queue is already validated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Qubit index at or past the register width
    #[error("qubit index {index} is out of range for a {num_qubits}-qubit register")]
    QubitOutOfRange { index: usize, num_qubits: usize },

    /// Basis-state index, mask, or offset at or past 2^N
    #[error("value {value} is out of range for dimension {dimension}")]
    PermutationOutOfRange { value: usize, dimension: usize },

    /// Contiguous bit range exceeding the register
    #[error("bit range [{start}, {start}+{length}) exceeds {num_qubits} qubits")]
    BitRangeOutOfRange {
        start: usize,
        length: usize,
        num_qubits: usize,
    },

    /// A compose or allocate would exceed the configured maximum width
    #[error("{requested} qubits exceeds the configured maximum of {max}")]
    Capacity { requested: usize, max: usize },

    /// Peer register of incompatible width
    #[error("register width mismatch: expected {expected} qubits, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Operation with no deferred-representation backing
    #[error("{operation} is not implemented for the tensor-network front end")]
    NotImplemented { operation: &'static str },

    /// The same qubit used as both target and control, or repeated in a
    /// sorted power list
    #[error("duplicate qubit {0} in gate operation")]
    DuplicateQubit(usize),

    /// A forced measurement outcome with no amplitude support
    #[error("forced measurement outcome has zero probability")]
    ZeroProbabilityForce,

    /// Aligned amplitude-buffer allocation failure
    #[error("failed to allocate {size} bytes for amplitude storage")]
    Allocation { size: usize },
}

/// Result alias used throughout the workspace
pub type Result<T> = std::result::Result<T, SimError>;
