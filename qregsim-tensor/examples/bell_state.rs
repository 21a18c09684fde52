//! Build a Bell pair through the deferred front end and sample it.

use qregsim_gates::{HADAMARD, PAULI_X};
use qregsim_state::EngineConfig;
use qregsim_tensor::TensorNetwork;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut net = TensorNetwork::with_config(2, 0, EngineConfig::default().with_seed(42))?;

    net.mtrx(&HADAMARD, 0)?;
    net.mc_mtrx(&[0], &PAULI_X, 1)?;

    println!("Bell pair amplitudes:");
    for (index, amp) in net.quantum_state()?.iter().enumerate() {
        println!("  |{:02b}⟩  {:.6} {:+.6}i", index, amp.re, amp.im);
    }

    let counts = net.multi_shot_measure_mask(&[0b01, 0b10], 1024)?;
    println!("\n1024 shots over both qubits:");
    for (outcome, count) in counts {
        println!("  {:02b}: {}", outcome, count);
    }

    let outcome = net.m_all()?;
    println!("\ncollapsed to |{:02b}⟩", outcome);
    Ok(())
}
