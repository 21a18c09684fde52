//! Pre-computed single-qubit gate matrices
//!
//! All matrices are flat row-major `[m00, m01, m10, m11]`, the same layout
//! the amplitude engine's 2×2 kernel consumes.

use crate::matrix_ops::Matrix2x2;
use num_complex::Complex64;

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);
const I: Complex64 = Complex64::new(0.0, 1.0);
const NEG_I: Complex64 = Complex64::new(0.0, -1.0);
const NEG_ONE: Complex64 = Complex64::new(-1.0, 0.0);

const INV_SQRT2: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Identity
/// I = [[1, 0],
///      [0, 1]]
pub const IDENTITY: Matrix2x2 = [ONE, ZERO, ZERO, ONE];

/// Hadamard
/// H = 1/√2 * [[1,  1],
///             [1, -1]]
pub const HADAMARD: Matrix2x2 = [
    Complex64::new(INV_SQRT2, 0.0),
    Complex64::new(INV_SQRT2, 0.0),
    Complex64::new(INV_SQRT2, 0.0),
    Complex64::new(-INV_SQRT2, 0.0),
];

/// Pauli-X (NOT)
/// X = [[0, 1],
///      [1, 0]]
pub const PAULI_X: Matrix2x2 = [ZERO, ONE, ONE, ZERO];

/// Pauli-Y
/// Y = [[0, -i],
///      [i,  0]]
pub const PAULI_Y: Matrix2x2 = [ZERO, NEG_I, I, ZERO];

/// Pauli-Z
/// Z = [[1,  0],
///      [0, -1]]
pub const PAULI_Z: Matrix2x2 = [ONE, ZERO, ZERO, NEG_ONE];

/// S gate (√Z)
/// S = [[1, 0],
///      [0, i]]
pub const S_GATE: Matrix2x2 = [ONE, ZERO, ZERO, I];

/// S† gate
pub const S_DAGGER: Matrix2x2 = [ONE, ZERO, ZERO, NEG_I];

/// T gate (√S)
/// T = [[1, 0],
///      [0, e^(iπ/4)]]
pub const T_GATE: Matrix2x2 = [ONE, ZERO, ZERO, Complex64::new(INV_SQRT2, INV_SQRT2)];

/// T† gate
pub const T_DAGGER: Matrix2x2 = [ONE, ZERO, ZERO, Complex64::new(INV_SQRT2, -INV_SQRT2)];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix_ops::{adjoint_2x2, is_identity_2x2, multiply_2x2};

    fn assert_unitary(m: &Matrix2x2) {
        let product = multiply_2x2(m, &adjoint_2x2(m));
        assert!(is_identity_2x2(&product), "not unitary: {:?}", m);
    }

    #[test]
    fn test_all_constants_unitary() {
        for m in [
            IDENTITY, HADAMARD, PAULI_X, PAULI_Y, PAULI_Z, S_GATE, S_DAGGER, T_GATE, T_DAGGER,
        ] {
            assert_unitary(&m);
        }
    }

    #[test]
    fn test_s_squared_is_z() {
        let ss = multiply_2x2(&S_GATE, &S_GATE);
        for (a, b) in ss.iter().zip(PAULI_Z.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_t_squared_is_s() {
        let tt = multiply_2x2(&T_GATE, &T_GATE);
        for (a, b) in tt.iter().zip(S_GATE.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_hadamard_self_inverse() {
        let hh = multiply_2x2(&HADAMARD, &HADAMARD);
        assert!(is_identity_2x2(&hh));
    }
}
