//! End-to-end scenarios through the deferred front end

use approx::assert_relative_eq;
use num_complex::Complex64;
use qregsim_gates::{HADAMARD, PAULI_X, S_GATE};
use qregsim_state::EngineConfig;
use qregsim_tensor::TensorNetwork;

const H: f64 = std::f64::consts::FRAC_1_SQRT_2;

fn seeded(qubit_count: usize, perm: usize, seed: u64) -> TensorNetwork {
    TensorNetwork::with_config(qubit_count, perm, EngineConfig::default().with_seed(seed))
        .unwrap()
}

#[test]
fn hadamard_on_zero() {
    let mut net = seeded(1, 0, 100);
    net.mtrx(&HADAMARD, 0).unwrap();

    let amps = net.quantum_state().unwrap();
    assert_relative_eq!(amps[0].re, 0.707107, epsilon = 1e-6);
    assert_relative_eq!(amps[1].re, 0.707107, epsilon = 1e-6);
}

#[test]
fn bell_state() {
    let mut net = seeded(2, 0, 101);
    net.mtrx(&HADAMARD, 0).unwrap();
    net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();

    let amps = net.quantum_state().unwrap();
    assert_relative_eq!(amps[0].re, 0.707107, epsilon = 1e-6);
    assert_relative_eq!(amps[1].norm(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(amps[2].norm(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(amps[3].re, 0.707107, epsilon = 1e-6);

    assert_relative_eq!(net.prob(0).unwrap(), 0.5, epsilon = 1e-6);
    // Both Bell branches have even parity, so a parity sample through the
    // engine must come back even with certainty.
    let mut probs = vec![0.0; 4];
    net.get_probs(&mut probs).unwrap();
    assert_relative_eq!(probs[1] + probs[2], 0.0, epsilon = 1e-6);
}

#[test]
fn swap_via_three_cnots() {
    // CNOT(0→1), CNOT(1→0), CNOT(0→1) on |10⟩ moves the excitation: |01⟩.
    let mut net = seeded(2, 0b10, 102);
    net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();
    net.mc_mtrx(&[1], &PAULI_X, 0).unwrap();
    net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();

    let amps = net.quantum_state().unwrap();
    assert_relative_eq!(amps[0].norm(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(amps[1].norm(), 1.0, epsilon = 1e-6);
    assert_relative_eq!(amps[2].norm(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(amps[3].norm(), 0.0, epsilon = 1e-6);
}

#[test]
fn facade_swap_matches_exchange() {
    let mut net = seeded(2, 0b10, 103);
    net.swap(0, 1).unwrap();
    assert_relative_eq!(net.prob_all(0b01).unwrap(), 1.0, epsilon = 1e-6);
}

#[test]
fn measurement_layering() {
    // H(0); force q0 = 1; H(0). The second H must land in layer 1, and the
    // final state is H|1⟩ on q0 with q1 untouched.
    let mut net = seeded(2, 0, 104);
    net.mtrx(&HADAMARD, 0).unwrap();
    let outcome = net.force_m(0, true, true, true).unwrap();
    assert!(outcome);
    net.mtrx(&HADAMARD, 0).unwrap();

    assert_eq!(net.layer_count(), 2);
    assert_eq!(net.measurement_count(), 1);

    let amps = net.quantum_state().unwrap();
    assert_relative_eq!(amps[0].norm(), 0.707107, epsilon = 1e-6);
    assert_relative_eq!(amps[1].norm(), 0.707107, epsilon = 1e-6);
    assert_relative_eq!(amps[2].norm(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(amps[3].norm(), 0.0, epsilon = 1e-6);
    assert_relative_eq!(net.prob(1).unwrap(), 0.0, epsilon = 1e-6);
}

#[test]
fn ghz_probabilities() {
    let mut net = seeded(3, 0, 105);
    net.mtrx(&HADAMARD, 0).unwrap();
    net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();
    net.mc_mtrx(&[1], &PAULI_X, 2).unwrap();

    assert_relative_eq!(net.prob_all(0b000).unwrap(), 0.5, epsilon = 1e-6);
    assert_relative_eq!(net.prob_all(0b111).unwrap(), 0.5, epsilon = 1e-6);
    for perm in 1..7 {
        assert_relative_eq!(net.prob_all(perm).unwrap(), 0.0, epsilon = 1e-6);
    }
}

#[test]
fn measurement_idempotence() {
    let mut net = seeded(2, 0, 106);
    net.mtrx(&HADAMARD, 0).unwrap();
    net.force_m(0, true, true, true).unwrap();
    assert_relative_eq!(net.prob(0).unwrap(), 1.0, epsilon = 1e-6);
}

#[test]
fn m_all_rebases_history() {
    let mut net = seeded(2, 0, 107);
    net.mtrx(&HADAMARD, 0).unwrap();
    net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();

    let outcome = net.m_all().unwrap();
    assert!(outcome == 0b00 || outcome == 0b11);

    // The history collapsed to a single base-permutation layer.
    assert_eq!(net.layer_count(), 1);
    assert_eq!(net.measurement_count(), 0);
    assert_relative_eq!(net.prob_all(outcome).unwrap(), 1.0, epsilon = 1e-6);
}

#[test]
fn multi_shot_distribution() {
    let mut net = seeded(2, 0, 108);
    net.mtrx(&HADAMARD, 0).unwrap();
    net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();

    let counts = net.multi_shot_measure_mask(&[0b01, 0b10], 2000).unwrap();
    let zeros = counts.get(&0).copied().unwrap_or(0);
    let threes = counts.get(&3).copied().unwrap_or(0);
    assert_eq!(zeros + threes, 2000);
    assert!(zeros > 700 && threes > 700);

    // Sampling must not have collapsed the deferred state.
    assert_relative_eq!(net.prob(0).unwrap(), 0.5, epsilon = 1e-6);
}

#[test]
fn sum_sqr_diff_between_networks() {
    let mut a = seeded(2, 0, 109);
    a.mtrx(&HADAMARD, 0).unwrap();
    a.mc_mtrx(&[0], &PAULI_X, 1).unwrap();

    let mut b = seeded(2, 0, 110);
    b.mtrx(&HADAMARD, 0).unwrap();
    b.mc_mtrx(&[0], &PAULI_X, 1).unwrap();

    assert_relative_eq!(a.sum_sqr_diff(&mut b).unwrap(), 0.0, epsilon = 1e-6);

    let mut c = seeded(2, 0b01, 111);
    assert_relative_eq!(a.sum_sqr_diff(&mut c).unwrap(), 1.0, epsilon = 1e-6);
}

#[test]
fn global_phase_pinning() {
    let mut net = seeded(1, 0, 112);
    net.set_permutation(1, Some(Complex64::new(0.0, 1.0)))
        .unwrap();
    let amp = net.get_amplitude(1).unwrap();
    assert_relative_eq!(amp.im, 1.0, epsilon = 1e-6);
    assert_relative_eq!(amp.re, 0.0, epsilon = 1e-6);
}

#[test]
fn phase_fusion_survives_the_full_path() {
    // S then S on the same qubit is Z by the time the circuit replays.
    let mut net = seeded(1, 0, 113);
    net.mtrx(&HADAMARD, 0).unwrap();
    net.mtrx(&S_GATE, 0).unwrap();
    net.mtrx(&S_GATE, 0).unwrap();

    let amps = net.quantum_state().unwrap();
    assert_relative_eq!(amps[0].re, H, epsilon = 1e-6);
    assert_relative_eq!(amps[1].re, -H, epsilon = 1e-6);
}

#[test]
fn commutation_soundness_through_fusion() {
    // S(q0), H(q1), S(q0): the optimizer commutes the second S backward
    // and fuses. The state must match the literal, unoptimized order.
    let mut optimized = seeded(2, 0, 114);
    optimized.mtrx(&HADAMARD, 0).unwrap();
    optimized.mtrx(&S_GATE, 0).unwrap();
    optimized.mtrx(&HADAMARD, 1).unwrap();
    optimized.mtrx(&S_GATE, 0).unwrap();

    let mut engine = qregsim_state::QubitEngine::with_config(
        2,
        0,
        EngineConfig::default().with_seed(115),
    )
    .unwrap();
    engine.mtrx(&HADAMARD, 0).unwrap();
    engine.mtrx(&S_GATE, 0).unwrap();
    engine.mtrx(&HADAMARD, 1).unwrap();
    engine.mtrx(&S_GATE, 0).unwrap();

    let got = optimized.quantum_state().unwrap();
    let expected = engine.quantum_state().unwrap();
    for (x, y) in got.iter().zip(expected.iter()) {
        assert_relative_eq!(x.re, y.re, epsilon = 1e-6);
        assert_relative_eq!(x.im, y.im, epsilon = 1e-6);
    }
}

#[test]
fn normalization_preserved_over_long_circuit() {
    let mut net = seeded(3, 0, 116);
    for round in 0..4 {
        for q in 0..3 {
            net.mtrx(&HADAMARD, q).unwrap();
        }
        net.mc_mtrx(&[round % 3], &PAULI_X, (round + 1) % 3).unwrap();
    }

    let mut probs = vec![0.0; 8];
    net.get_probs(&mut probs).unwrap();
    let total: f64 = probs.iter().sum();
    assert_relative_eq!(total, 1.0, epsilon = 1e-10);
}
