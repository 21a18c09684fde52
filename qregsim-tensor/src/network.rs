//! Deferred tensor-network front end
//!
//! [`TensorNetwork`] buffers gate submissions into per-measurement-layer
//! circuits instead of applying them eagerly. Each measurement outcome
//! partitions the recorded history: gates touching an already-measured
//! qubit land in the circuit *after* that measurement layer, so the whole
//! history can be replayed deterministically — run circuit 0, force layer-0
//! outcomes, run circuit 1, and so on — whenever a query actually needs
//! amplitudes.
//!
//! Submissions are validated on the calling thread, then enqueued on a
//! single-consumer [`crate::DispatchQueue`]; the worker owns the circuit
//! buffers. State-returning calls block on the queue and materialize the
//! layer stack lazily.

use crate::dispatch::DispatchQueue;
use num_complex::Complex64;
use parking_lot::Mutex;
use qregsim_core::{Circuit, CircuitGate, Result, SimError};
use qregsim_gates::{Matrix2x2, NORM_EPSILON, PAULI_X};
use qregsim_state::{max_qubits, EngineConfig, QubitEngine};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const ZERO_C: Complex64 = Complex64::new(0.0, 0.0);
const ONE_C: Complex64 = Complex64::new(1.0, 0.0);

/// Default qubit count above which partial-qubit queries consume the
/// materialized stack instead of caching it.
const DEFAULT_THRESHOLD_QUBITS: usize = 27;

/// Materialization threshold, overridable through
/// `QREGSIM_TENSOR_THRESHOLD_QB`.
pub fn threshold_qubits() -> usize {
    std::env::var("QREGSIM_TENSOR_THRESHOLD_QB")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_THRESHOLD_QUBITS)
}

/// The per-layer circuit buffers and measurement records, owned by the
/// dispatch worker.
#[derive(Default)]
struct Layers {
    circuits: Vec<Circuit>,
    measurements: Vec<BTreeMap<usize, bool>>,
}

impl Layers {
    fn reset(&mut self) {
        self.circuits.clear();
        self.circuits.push(Circuit::new());
        self.measurements.clear();
    }

    /// Pick the circuit a gate on (`target`, `controls`) belongs to: the
    /// one after the newest measurement layer that touches any of its
    /// qubits, or circuit 0 when no such layer exists.
    fn route(&mut self, target: usize, controls: &[usize]) -> &mut Circuit {
        for i in (0..self.measurements.len()).rev() {
            let record = &self.measurements[i];
            let depends = record.contains_key(&target)
                || controls.iter().any(|c| record.contains_key(c));
            if depends {
                let layer = i + 1;
                if self.circuits.len() == layer {
                    self.circuits.push(Circuit::new());
                }
                return &mut self.circuits[layer];
            }
        }
        &mut self.circuits[0]
    }

    /// Record a measurement outcome: a fresh layer when a circuit already
    /// follows every existing layer, merged into the newest layer
    /// otherwise.
    fn record_measurement(&mut self, qubit: usize, value: bool) {
        if self.measurements.len() < self.circuits.len() {
            let mut record = BTreeMap::new();
            record.insert(qubit, value);
            self.measurements.push(record);
        } else {
            self.measurements
                .last_mut()
                .expect("at least one measurement layer")
                .insert(qubit, value);
        }
    }
}

/// Gate-based register with deferred execution
///
/// # Example
/// ```
/// use qregsim_tensor::TensorNetwork;
/// use qregsim_gates::{HADAMARD, PAULI_X};
///
/// let mut net = TensorNetwork::new(2, 0).unwrap();
/// net.mtrx(&HADAMARD, 0).unwrap();
/// net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();
///
/// // Nothing has touched an amplitude vector yet; the query below
/// // materializes the recorded circuit.
/// assert!((net.prob(0).unwrap() - 0.5).abs() < 1e-10);
/// ```
pub struct TensorNetwork {
    qubit_count: usize,
    layers: Arc<Mutex<Layers>>,
    queue: DispatchQueue,
    layer_stack: Option<QubitEngine>,
    config: EngineConfig,
    rng: StdRng,
    threshold_qubits: usize,
}

impl TensorNetwork {
    /// Register of `qubit_count` qubits in |init_perm⟩ with default
    /// configuration.
    pub fn new(qubit_count: usize, init_perm: usize) -> Result<Self> {
        Self::with_config(qubit_count, init_perm, EngineConfig::default())
    }

    /// Register with explicit engine configuration (shared by every
    /// materialized layer stack).
    pub fn with_config(
        qubit_count: usize,
        init_perm: usize,
        config: EngineConfig,
    ) -> Result<Self> {
        let max = max_qubits();
        if qubit_count > max {
            return Err(SimError::Capacity {
                requested: qubit_count,
                max,
            });
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut layers = Layers::default();
        layers.reset();

        let mut net = Self {
            qubit_count,
            layers: Arc::new(Mutex::new(layers)),
            queue: DispatchQueue::new(),
            layer_stack: None,
            config,
            rng,
            threshold_qubits: threshold_qubits(),
        };
        net.set_permutation(init_perm, None)?;
        Ok(net)
    }

    /// Register width in qubits
    #[inline]
    pub fn qubit_count(&self) -> usize {
        self.qubit_count
    }

    #[inline]
    fn max_q_power(&self) -> usize {
        1usize << self.qubit_count
    }

    fn check_qubit(&self, qubit: usize) -> Result<()> {
        if qubit >= self.qubit_count {
            return Err(SimError::QubitOutOfRange {
                index: qubit,
                num_qubits: self.qubit_count,
            });
        }
        Ok(())
    }

    fn check_perm(&self, value: usize) -> Result<()> {
        if value >= self.max_q_power() {
            return Err(SimError::PermutationOutOfRange {
                value,
                dimension: self.max_q_power(),
            });
        }
        Ok(())
    }

    /// Widen the register to cover every referenced qubit.
    fn check_grow(&mut self, target: usize, controls: &[usize]) -> Result<()> {
        let mut needed = target + 1;
        for &c in controls {
            needed = needed.max(c + 1);
        }
        if needed > self.qubit_count {
            let max = max_qubits();
            if needed > max {
                return Err(SimError::Capacity {
                    requested: needed,
                    max,
                });
            }
            self.qubit_count = needed;
        }
        Ok(())
    }

    fn enqueue_gate(&self, gate: CircuitGate) {
        let layers = Arc::clone(&self.layers);
        self.queue.dispatch(move || {
            let controls = gate.controls_vec();
            layers.lock().route(gate.target(), &controls).append(gate);
        });
    }

    /// Block until every queued submission has been folded into a circuit.
    pub fn finish(&self) {
        self.queue.finish();
    }

    /// Discard queued submissions; in-flight work completes.
    pub fn dump(&self) {
        self.queue.dump();
    }

    /// True when no submission is queued or being folded in.
    pub fn is_finished(&self) -> bool {
        self.queue.is_finished()
    }

    /// Number of circuit layers recorded so far (after draining the queue).
    pub fn layer_count(&mut self) -> usize {
        self.finish();
        self.layers.lock().circuits.len()
    }

    /// Number of measurement layers recorded so far (after draining the
    /// queue).
    pub fn measurement_count(&mut self) -> usize {
        self.finish();
        self.layers.lock().measurements.len()
    }

    // --- gate-submission surface -----------------------------------------

    /// Arbitrary 2×2 on `target`.
    pub fn mtrx(&mut self, matrix: &Matrix2x2, target: usize) -> Result<()> {
        self.layer_stack = None;
        self.check_grow(target, &[])?;
        self.enqueue_gate(CircuitGate::single(target, matrix));
        Ok(())
    }

    /// 2×2 on `target` when every control is |1⟩.
    pub fn mc_mtrx(&mut self, controls: &[usize], matrix: &Matrix2x2, target: usize) -> Result<()> {
        if controls.is_empty() {
            return self.mtrx(matrix, target);
        }
        self.layer_stack = None;
        self.check_grow(target, controls)?;
        let set: BTreeSet<usize> = controls.iter().copied().collect();
        let perm = (1usize << set.len()) - 1;
        self.enqueue_gate(CircuitGate::controlled(target, matrix, set, perm)?);
        Ok(())
    }

    /// 2×2 on `target` when every control is |0⟩.
    pub fn mac_mtrx(
        &mut self,
        controls: &[usize],
        matrix: &Matrix2x2,
        target: usize,
    ) -> Result<()> {
        if controls.is_empty() {
            return self.mtrx(matrix, target);
        }
        self.layer_stack = None;
        self.check_grow(target, controls)?;
        let set: BTreeSet<usize> = controls.iter().copied().collect();
        self.enqueue_gate(CircuitGate::controlled(target, matrix, set, 0)?);
        Ok(())
    }

    /// Diagonal gate diag(top_left, bottom_right) on `target`.
    pub fn phase(
        &mut self,
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        let m: Matrix2x2 = [top_left, ZERO_C, ZERO_C, bottom_right];
        self.mtrx(&m, target)
    }

    /// Anti-diagonal gate on `target`.
    pub fn invert(
        &mut self,
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        let m: Matrix2x2 = [ZERO_C, top_right, bottom_left, ZERO_C];
        self.mtrx(&m, target)
    }

    /// Controlled diagonal gate.
    pub fn mc_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        let m: Matrix2x2 = [top_left, ZERO_C, ZERO_C, bottom_right];
        self.mc_mtrx(controls, &m, target)
    }

    /// Anti-controlled diagonal gate.
    pub fn mac_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        let m: Matrix2x2 = [top_left, ZERO_C, ZERO_C, bottom_right];
        self.mac_mtrx(controls, &m, target)
    }

    /// Controlled anti-diagonal gate.
    pub fn mc_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        let m: Matrix2x2 = [ZERO_C, top_right, bottom_left, ZERO_C];
        self.mc_mtrx(controls, &m, target)
    }

    /// Anti-controlled anti-diagonal gate.
    pub fn mac_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        let m: Matrix2x2 = [ZERO_C, top_right, bottom_left, ZERO_C];
        self.mac_mtrx(controls, &m, target)
    }

    /// Pauli-X on `target`.
    pub fn x(&mut self, target: usize) -> Result<()> {
        self.mtrx(&PAULI_X, target)
    }

    /// Exchange two qubits (expanded to three CNOTs, in canonical qubit
    /// order so adjacent swaps cancel through fusion).
    pub fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        if q1 == q2 {
            return Ok(());
        }
        let (a, b) = if q1 > q2 { (q2, q1) } else { (q1, q2) };
        self.mc_invert(&[b], ONE_C, ONE_C, a)?;
        self.mc_invert(&[a], ONE_C, ONE_C, b)?;
        self.mc_invert(&[b], ONE_C, ONE_C, a)
    }

    /// iSWAP: swap plus an i phase on the singly-excited subspace.
    pub fn i_swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        if q1 == q2 {
            return Ok(());
        }
        self.swap(q1, q2)?;
        self.phase(ONE_C, Complex64::new(0.0, 1.0), q1)?;
        self.phase(ONE_C, Complex64::new(0.0, 1.0), q2)?;
        self.mc_phase(&[q1], ONE_C, Complex64::new(-1.0, 0.0), q2)
    }

    /// Inverse iSWAP.
    pub fn ii_swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        if q1 == q2 {
            return Ok(());
        }
        self.mc_phase(&[q1], ONE_C, Complex64::new(-1.0, 0.0), q2)?;
        self.phase(ONE_C, Complex64::new(0.0, -1.0), q1)?;
        self.phase(ONE_C, Complex64::new(0.0, -1.0), q2)?;
        self.swap(q1, q2)
    }

    /// The fermionic simulation gate, for the angles it reduces cleanly at.
    ///
    /// sin θ ≈ 0 collapses to a controlled phase; sin θ ≈ ∓1 to
    /// iSWAP/inverse-iSWAP plus a controlled phase. Any other angle fails
    /// with `NotImplemented`.
    pub fn f_sim(&mut self, theta: f64, phi: f64, q1: usize, q2: usize) -> Result<()> {
        let sin_theta = theta.sin();
        let exp_i_phi = Complex64::from_polar(1.0, phi);

        if sin_theta * sin_theta <= NORM_EPSILON {
            return self.mc_phase(&[q1], ONE_C, exp_i_phi, q2);
        }

        let diff_neg = 1.0 + sin_theta;
        if diff_neg * diff_neg <= NORM_EPSILON {
            self.i_swap(q1, q2)?;
            return self.mc_phase(&[q1], ONE_C, exp_i_phi, q2);
        }

        let diff_pos = 1.0 - sin_theta;
        if diff_pos * diff_pos <= NORM_EPSILON {
            self.ii_swap(q1, q2)?;
            return self.mc_phase(&[q1], ONE_C, exp_i_phi, q2);
        }

        Err(SimError::NotImplemented {
            operation: "f_sim with an irreducible angle",
        })
    }

    // --- initialization and growth ---------------------------------------

    /// Reset to |perm⟩: queued work is dropped, the history becomes a
    /// single circuit of X gates for the set bits, optionally followed by
    /// a pinned (or randomized) global phase.
    pub fn set_permutation(&mut self, perm: usize, phase: Option<Complex64>) -> Result<()> {
        self.check_perm(perm)?;

        self.dump();
        self.layer_stack = None;
        self.layers.lock().reset();

        for i in 0..self.qubit_count {
            if perm & (1usize << i) != 0 {
                self.x(i)?;
            }
        }

        let phase = match phase {
            Some(p) => Some(p),
            None if self.config.rand_global_phase => {
                let angle = self.rng.gen::<f64>() * 2.0 * std::f64::consts::PI;
                Some(Complex64::from_polar(1.0, angle))
            }
            None => None,
        };

        if let Some(p) = phase {
            if self.qubit_count > 0 {
                self.phase(p, p, 0)?;
            }
        }
        Ok(())
    }

    /// Grow the register by `length` qubits inserted at `start`, moving
    /// displaced qubits up with swap gates.
    pub fn allocate(&mut self, start: usize, length: usize) -> Result<usize> {
        if start > self.qubit_count {
            return Err(SimError::BitRangeOutOfRange {
                start,
                length,
                num_qubits: self.qubit_count,
            });
        }
        let requested = self.qubit_count + length;
        let max = max_qubits();
        if requested > max {
            return Err(SimError::Capacity { requested, max });
        }
        if length == 0 {
            return Ok(start);
        }

        let moved_qubits = self.qubit_count - start;
        self.qubit_count = requested;
        self.layer_stack = None;
        if moved_qubits == 0 {
            return Ok(start);
        }

        for i in 0..moved_qubits {
            let q = start + moved_qubits - (i + 1);
            self.swap(q, q + length)?;
        }
        Ok(start)
    }

    // --- materialization --------------------------------------------------

    /// Build (or reuse) the layer stack: a fresh engine taken through every
    /// circuit and measurement layer in order.
    fn make_layer_stack(&mut self) -> Result<()> {
        if self.layer_stack.is_some() {
            return Ok(());
        }

        let config = EngineConfig {
            seed: Some(self.rng.gen()),
            ..self.config.clone()
        };
        let mut engine = QubitEngine::with_config(self.qubit_count, 0, config)?;

        {
            let guard = self.layers.lock();
            for (i, circuit) in guard.circuits.iter().enumerate() {
                circuit.run(&mut engine)?;
                if i < guard.measurements.len() {
                    let record = &guard.measurements[i];
                    let bits: Vec<usize> = record.keys().copied().collect();
                    let values: Vec<bool> = record.values().copied().collect();
                    engine.force_m_reg(&bits, &values)?;
                }
            }
        }

        self.layer_stack = Some(engine);
        Ok(())
    }

    /// Drain the queue, materialize, and hand the stack to `f`. Queries
    /// naming an explicit qubit subset on a register wider than the
    /// threshold consume the stack instead of caching it.
    fn run_as_amplitudes<T>(
        &mut self,
        qubits: &[usize],
        f: impl FnOnce(&mut QubitEngine) -> Result<T>,
    ) -> Result<T> {
        self.finish();
        self.make_layer_stack()?;

        if !qubits.is_empty() && self.qubit_count > self.threshold_qubits {
            let mut stack = self.layer_stack.take().expect("stack built");
            f(&mut stack)
        } else {
            f(self.layer_stack.as_mut().expect("stack built"))
        }
    }

    // --- state queries ----------------------------------------------------

    /// Amplitude of |perm⟩.
    pub fn get_amplitude(&mut self, perm: usize) -> Result<Complex64> {
        self.check_perm(perm)?;
        self.run_as_amplitudes(&[], |stack| stack.get_amplitude(perm))
    }

    /// Copy the full amplitude vector out.
    pub fn get_quantum_state(&mut self, out: &mut [Complex64]) -> Result<()> {
        self.run_as_amplitudes(&[], |stack| stack.get_quantum_state(out))
    }

    /// The full amplitude vector as a fresh `Vec`.
    pub fn quantum_state(&mut self) -> Result<Vec<Complex64>> {
        self.run_as_amplitudes(&[], |stack| stack.quantum_state())
    }

    /// |aᵢ|² for every basis state.
    pub fn get_probs(&mut self, out: &mut [f64]) -> Result<()> {
        self.run_as_amplitudes(&[], |stack| stack.get_probs(out))
    }

    /// Probability of `qubit` reading |1⟩.
    pub fn prob(&mut self, qubit: usize) -> Result<f64> {
        self.check_qubit(qubit)?;
        self.run_as_amplitudes(&[qubit], |stack| stack.prob(qubit))
    }

    /// Probability of the register reading exactly |perm⟩.
    pub fn prob_all(&mut self, perm: usize) -> Result<f64> {
        self.check_perm(perm)?;
        self.run_as_amplitudes(&[], |stack| stack.prob_all(perm))
    }

    /// 1 − |⟨ψ|φ⟩|² against another deferred register.
    pub fn sum_sqr_diff(&mut self, other: &mut TensorNetwork) -> Result<f64> {
        other.finish();
        other.make_layer_stack()?;
        let peer = other.layer_stack.as_mut().expect("stack built");
        self.run_as_amplitudes(&[], |stack| stack.sum_sqr_diff(peer))
    }

    /// Sample the marginal distribution over the qubits named by
    /// `q_powers`, `shots` times, without collapsing.
    pub fn multi_shot_measure_mask(
        &mut self,
        q_powers: &[usize],
        shots: usize,
    ) -> Result<BTreeMap<usize, usize>> {
        let mut qubits = Vec::with_capacity(q_powers.len());
        for &power in q_powers {
            self.check_perm(power)?;
            qubits.push(power.trailing_zeros() as usize);
        }
        self.run_as_amplitudes(&qubits, |stack| {
            stack.multi_shot_measure_mask(q_powers, shots)
        })
    }

    // --- measurement ------------------------------------------------------

    /// Measure one qubit, optionally forcing the outcome, and record it as
    /// a new (or merged) measurement layer.
    pub fn force_m(
        &mut self,
        qubit: usize,
        result: bool,
        do_force: bool,
        do_apply: bool,
    ) -> Result<bool> {
        self.check_qubit(qubit)?;
        self.finish();
        self.make_layer_stack()?;

        let stack = self.layer_stack.as_mut().expect("stack built");
        let outcome = stack.force_m(qubit, result, do_force, do_apply)?;

        if do_apply {
            self.layers.lock().record_measurement(qubit, outcome);
        }
        Ok(outcome)
    }

    /// Measure one qubit, sampling the outcome.
    pub fn m(&mut self, qubit: usize) -> Result<bool> {
        self.force_m(qubit, false, false, true)
    }

    /// Collapse the whole register and re-base the history on the outcome.
    pub fn m_all(&mut self) -> Result<usize> {
        self.finish();

        let mut result = 0usize;
        if self.qubit_count <= self.threshold_qubits {
            self.make_layer_stack()?;
            result = self.layer_stack.as_mut().expect("stack built").m_all()?;
        } else {
            for qubit in 0..self.qubit_count {
                if self.m(qubit)? {
                    result |= 1usize << qubit;
                }
            }
        }

        self.set_permutation(result, None)?;
        Ok(result)
    }

    // --- operations with no deferred backing -------------------------------

    /// Unsupported: the deferred history cannot absorb an arbitrary dense
    /// state.
    pub fn set_quantum_state(&mut self, _state: &[Complex64]) -> Result<()> {
        Err(SimError::NotImplemented {
            operation: "set_quantum_state",
        })
    }

    /// Unsupported: single-amplitude writes have no circuit representation.
    pub fn set_amplitude(&mut self, _perm: usize, _amp: Complex64) -> Result<()> {
        Err(SimError::NotImplemented {
            operation: "set_amplitude",
        })
    }

    /// Unsupported: composition across deferred registers.
    pub fn compose(&mut self, _other: &mut TensorNetwork, _start: usize) -> Result<usize> {
        Err(SimError::NotImplemented { operation: "compose" })
    }

    /// Unsupported: decomposition of a deferred register.
    pub fn decompose(&mut self, _start: usize, _length: usize) -> Result<TensorNetwork> {
        Err(SimError::NotImplemented {
            operation: "decompose",
        })
    }

    /// Unsupported: disposal of deferred qubits.
    pub fn dispose(&mut self, _start: usize, _length: usize) -> Result<()> {
        Err(SimError::NotImplemented { operation: "dispose" })
    }

    /// Intentionally a no-op: no materialized norm exists to maintain.
    pub fn normalize_state(&mut self) -> Result<()> {
        Ok(())
    }

    /// Intentionally a no-op: no materialized norm exists to maintain.
    pub fn update_running_norm(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for TensorNetwork {
    fn drop(&mut self) {
        self.queue.dump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qregsim_gates::HADAMARD;

    fn seeded(qubit_count: usize, perm: usize, seed: u64) -> TensorNetwork {
        TensorNetwork::with_config(
            qubit_count,
            perm,
            EngineConfig::default().with_seed(seed),
        )
        .unwrap()
    }

    #[test]
    fn test_initial_permutation_recorded_as_gates() {
        let mut net = seeded(3, 0b101, 1);
        assert_relative_eq!(net.prob_all(0b101).unwrap(), 1.0, epsilon = 1e-10);
        assert_eq!(net.layer_count(), 1);
    }

    #[test]
    fn test_gate_growth() {
        let mut net = seeded(1, 0, 2);
        net.x(4).unwrap();
        assert_eq!(net.qubit_count(), 5);
        assert_relative_eq!(net.prob(4).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_route_before_any_measurement() {
        let mut net = seeded(2, 0, 3);
        net.mtrx(&HADAMARD, 0).unwrap();
        net.mc_mtrx(&[0], &PAULI_X, 1).unwrap();
        assert_eq!(net.layer_count(), 1);
        assert_eq!(net.measurement_count(), 0);
    }

    #[test]
    fn test_measurement_creates_layer_for_dependents() {
        let mut net = seeded(2, 0, 4);
        net.mtrx(&HADAMARD, 0).unwrap();
        net.force_m(0, true, true, true).unwrap();
        assert_eq!(net.measurement_count(), 1);

        // A gate on the untouched qubit still lands in circuit 0.
        net.x(1).unwrap();
        assert_eq!(net.layer_count(), 1);

        // A gate on the measured qubit opens circuit 1.
        net.mtrx(&HADAMARD, 0).unwrap();
        assert_eq!(net.layer_count(), 2);
    }

    #[test]
    fn test_consecutive_measurements_merge() {
        let mut net = seeded(2, 0, 5);
        net.mtrx(&HADAMARD, 0).unwrap();
        net.force_m(0, true, true, true).unwrap();
        net.force_m(1, false, true, true).unwrap();
        assert_eq!(net.measurement_count(), 1);
    }

    #[test]
    fn test_set_permutation_resets_history() {
        let mut net = seeded(2, 0, 6);
        net.mtrx(&HADAMARD, 0).unwrap();
        net.force_m(0, true, true, true).unwrap();
        net.mtrx(&HADAMARD, 0).unwrap();
        assert_eq!(net.layer_count(), 2);

        net.set_permutation(0b10, None).unwrap();
        assert_eq!(net.layer_count(), 1);
        assert_eq!(net.measurement_count(), 0);
        assert_relative_eq!(net.prob_all(0b10).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_not_implemented_surface() {
        let mut net = seeded(1, 0, 7);
        assert!(matches!(
            net.set_quantum_state(&[ZERO_C, ZERO_C]),
            Err(SimError::NotImplemented { .. })
        ));
        assert!(matches!(
            net.set_amplitude(0, ONE_C),
            Err(SimError::NotImplemented { .. })
        ));
        assert!(matches!(
            net.dispose(0, 1),
            Err(SimError::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_allocate_at_end() {
        let mut net = seeded(2, 0b11, 8);
        let start = net.allocate(2, 1).unwrap();
        assert_eq!(start, 2);
        assert_eq!(net.qubit_count(), 3);
        assert_relative_eq!(net.prob_all(0b011).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_allocate_in_middle_moves_qubits() {
        let mut net = seeded(2, 0b10, 9);
        net.allocate(1, 1).unwrap();
        assert_eq!(net.qubit_count(), 3);
        // The old q1 moved to q2; the inserted qubit is |0⟩.
        assert_relative_eq!(net.prob_all(0b100).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_out_of_range_validation_is_synchronous() {
        let mut net = seeded(2, 0, 10);
        assert!(matches!(
            net.prob(2),
            Err(SimError::QubitOutOfRange { .. })
        ));
        assert!(matches!(
            net.get_amplitude(4),
            Err(SimError::PermutationOutOfRange { .. })
        ));
    }

    #[test]
    fn test_f_sim_irreducible_angle_rejected() {
        let mut net = seeded(2, 0, 11);
        assert!(matches!(
            net.f_sim(0.3, 0.1, 0, 1),
            Err(SimError::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_f_sim_zero_theta_is_controlled_phase() {
        let mut net = seeded(2, 0b11, 12);
        net.f_sim(0.0, std::f64::consts::PI, 0, 1).unwrap();
        // |11⟩ picks up e^{iπ} = −1.
        let amp = net.get_amplitude(0b11).unwrap();
        assert_relative_eq!(amp.re, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_i_swap_phases_single_excitation() {
        let mut net = seeded(2, 0b01, 13);
        net.i_swap(0, 1).unwrap();
        // |01⟩ → i|10⟩.
        let amp = net.get_amplitude(0b10).unwrap();
        assert_relative_eq!(amp.im, 1.0, epsilon = 1e-6);
        assert_relative_eq!(amp.re, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_i_swap_round_trip() {
        let mut net = seeded(2, 0, 14);
        net.mtrx(&HADAMARD, 0).unwrap();
        net.i_swap(0, 1).unwrap();
        net.ii_swap(0, 1).unwrap();

        let amps = net.quantum_state().unwrap();
        let h = std::f64::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(amps[0].re, h, epsilon = 1e-6);
        assert_relative_eq!(amps[1].re, h, epsilon = 1e-6);
    }
}
