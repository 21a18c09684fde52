//! Core types for the qregsim workspace
//!
//! This crate defines the gate record and the self-optimizing circuit that
//! the deferred front end buffers gates into, the [`QuantumBackend`] trait a
//! circuit replays onto, and the error type every crate in the workspace
//! shares.
//!
//! # Example
//!
//! ```
//! use qregsim_core::{Circuit, CircuitGate};
//! use qregsim_gates::{HADAMARD, PAULI_X};
//! use std::collections::BTreeSet;
//!
//! let mut circuit = Circuit::new();
//! circuit.append(CircuitGate::single(0, &HADAMARD));
//! let controls: BTreeSet<usize> = [0].into_iter().collect();
//! circuit.append(CircuitGate::controlled(1, &PAULI_X, controls, 1).unwrap());
//! assert_eq!(circuit.qubit_count(), 2);
//! ```

pub mod backend;
pub mod circuit;
pub mod error;
pub mod gate;

pub use backend::QuantumBackend;
pub use circuit::Circuit;
pub use error::{Result, SimError};
pub use gate::CircuitGate;
