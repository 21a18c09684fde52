//! Deferred tensor-network front end for qregsim
//!
//! [`TensorNetwork`] presents the familiar gate/measurement surface of the
//! amplitude engine, but records gates into per-measurement-layer circuits
//! on a single-consumer dispatch worker and only materializes a dense state
//! vector when an amplitude- or measurement-style query demands one. The
//! circuits fuse and reorder gates locally as they are appended, so the
//! replayed history is usually much shorter than the submitted one.
//!
//! # Example
//!
//! ```
//! use qregsim_tensor::TensorNetwork;
//! use qregsim_gates::{HADAMARD, PAULI_X};
//!
//! // GHZ on three qubits, evaluated lazily.
//! let mut net = TensorNetwork::new(3, 0).unwrap();
//! net.mtrx(&HADAMARD, 0).unwrap();
//! net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();
//! net.mc_mtrx(&[1], &PAULI_X, 2).unwrap();
//!
//! assert!((net.prob_all(0b000).unwrap() - 0.5).abs() < 1e-10);
//! assert!((net.prob_all(0b111).unwrap() - 0.5).abs() < 1e-10);
//! ```

pub mod dispatch;
pub mod network;

pub use dispatch::DispatchQueue;
pub use network::{threshold_qubits, TensorNetwork};
