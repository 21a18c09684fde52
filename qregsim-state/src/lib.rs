//! Dense amplitude engine for qregsim
//!
//! This crate holds the data-parallel heart of the simulator: a 64-byte
//! aligned amplitude store, the partitioned loop primitives the kernels
//! sweep with, and [`QubitEngine`] — gate application through a universal
//! 2×2 kernel, Kronecker composition and Schmidt decomposition, probability
//! queries, and measurement collapse.
//!
//! # Example
//!
//! ```
//! use qregsim_state::QubitEngine;
//! use qregsim_gates::{HADAMARD, PAULI_X};
//!
//! // Bell pair: H on q0, then CNOT(q0 → q1).
//! let mut engine = QubitEngine::new(2, 0).unwrap();
//! engine.mtrx(&HADAMARD, 0).unwrap();
//! engine.mc_mtrx(&[0], &PAULI_X, 1).unwrap();
//!
//! assert!((engine.prob(0).unwrap() - 0.5).abs() < 1e-10);
//! assert!(engine.prob_parity(0b11).unwrap() < 1e-10);
//! ```

pub mod compose;
pub mod engine;
pub mod measure;
pub mod parallel;
pub mod state_vector;

pub use engine::{max_qubits, EngineConfig, QubitEngine};
pub use state_vector::StateVector;
