//! Constant gate matrices and 2×2 matrix utilities
//!
//! Gate payloads throughout the workspace are flat row-major
//! `[Complex64; 4]` arrays: `[m00, m01, m10, m11]`. This crate provides the
//! standard single-qubit matrices as compile-time constants plus the small
//! algebra (products, adjoints, ε-classification) the circuit optimizer and
//! the amplitude engine share.

pub mod matrices;
pub mod matrix_ops;

pub use matrices::{
    HADAMARD, IDENTITY, PAULI_X, PAULI_Y, PAULI_Z, S_DAGGER, S_GATE, T_DAGGER, T_GATE,
};
pub use matrix_ops::{
    adjoint_2x2, invert_payload, is_identity_2x2, is_invert_2x2, is_norm_zero, is_phase_2x2,
    multiply_2x2, Matrix2x2, NORM_EPSILON,
};
