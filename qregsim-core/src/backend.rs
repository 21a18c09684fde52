//! The gate-application surface a circuit replays onto

use crate::error::Result;
use num_complex::Complex64;
use qregsim_gates::Matrix2x2;

/// Anything that can receive the gates a [`crate::Circuit`] has recorded.
///
/// The amplitude engine is the canonical implementor; tests use lightweight
/// recorders. Implementations validate qubit indices themselves and fail
/// with the shared error type.
pub trait QuantumBackend {
    /// Current register width
    fn qubit_count(&self) -> usize;

    /// Append `length` fresh qubits in |0⟩, returning the index of the
    /// first new qubit.
    fn allocate(&mut self, length: usize) -> Result<usize>;

    /// Pauli-X on `target`
    fn x(&mut self, target: usize) -> Result<()>;

    /// Arbitrary 2×2 on `target`
    fn mtrx(&mut self, matrix: &Matrix2x2, target: usize) -> Result<()>;

    /// 2×2 on `target`, applied when every control is |1⟩
    fn mc_mtrx(&mut self, controls: &[usize], matrix: &Matrix2x2, target: usize) -> Result<()>;

    /// 2×2 on `target`, applied when every control is |0⟩
    fn mac_mtrx(&mut self, controls: &[usize], matrix: &Matrix2x2, target: usize) -> Result<()>;

    /// Exchange two qubits
    fn swap(&mut self, q1: usize, q2: usize) -> Result<()>;

    /// Apply one of 2^|controls| 2×2 matrices to `target`, selected by the
    /// control bit-pattern. `matrices` is the dense table, 4 entries per
    /// pattern in row-major order.
    fn uniformly_controlled_single_bit(
        &mut self,
        controls: &[usize],
        target: usize,
        matrices: &[Complex64],
    ) -> Result<()>;
}
