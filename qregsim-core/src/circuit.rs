//! Self-optimizing gate list
//!
//! A [`Circuit`] records gates and performs bounded local optimization on
//! every append: identity gates are dropped, and each new gate walks
//! backward past commuting predecessors looking for a fusion partner. The
//! list is replayed onto a [`QuantumBackend`] with [`Circuit::run`].

use crate::backend::QuantumBackend;
use crate::error::Result;
use crate::gate::CircuitGate;
use qregsim_gates::PAULI_X;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// An ordered gate list with commute-past and fuse-into-adjacent
/// optimization on insert
///
/// Gate nodes are shared handles, so cloning a circuit copies pointers, not
/// payload tables; later fusion into a shared node clones it first.
///
/// # Example
/// ```
/// use qregsim_core::{Circuit, CircuitGate};
/// use qregsim_gates::S_GATE;
///
/// let mut circuit = Circuit::new();
/// circuit.append(CircuitGate::single(0, &S_GATE));
/// circuit.append(CircuitGate::single(0, &S_GATE));
/// // S·S fuses into a single Z-equivalent gate.
/// assert_eq!(circuit.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Circuit {
    qubit_count: usize,
    gates: Vec<Arc<CircuitGate>>,
}

impl Circuit {
    /// Empty circuit; the qubit count grows as gates reference new indices.
    pub fn new() -> Self {
        Self {
            qubit_count: 0,
            gates: Vec::new(),
        }
    }

    /// 1 + the highest qubit index any appended gate has referenced
    #[inline]
    pub fn qubit_count(&self) -> usize {
        self.qubit_count
    }

    /// Number of gates after local optimization
    #[inline]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// True when no gates survive
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Iterate the optimized gate list in application order
    pub fn gates(&self) -> impl Iterator<Item = &CircuitGate> {
        self.gates.iter().map(|g| g.as_ref())
    }

    /// Drop all recorded gates, keeping the qubit count.
    pub fn clear(&mut self) {
        self.gates.clear();
    }

    /// Append a gate, with bounded local optimization.
    ///
    /// Identity gates are discarded. Otherwise the gate walks backward from
    /// the tail: a predecessor with the same target and control set absorbs
    /// it (dropping the fused node if it becomes identity); the first
    /// non-commuting predecessor stops the walk and the gate is inserted
    /// right after it; a gate that commutes past everything lands at the
    /// front.
    pub fn append(&mut self, gate: CircuitGate) {
        if gate.is_identity() {
            return;
        }

        let referenced = gate.max_qubit() + 1;
        if referenced > self.qubit_count {
            self.qubit_count = referenced;
        }

        let mut idx = self.gates.len();
        while idx > 0 {
            let prev = &self.gates[idx - 1];
            if prev.can_combine(&gate) {
                let node = Arc::make_mut(&mut self.gates[idx - 1]);
                node.combine(&gate);
                if node.is_identity() {
                    self.gates.remove(idx - 1);
                }
                return;
            }
            if !prev.can_pass(&gate) {
                self.gates.insert(idx, Arc::new(gate));
                return;
            }
            idx -= 1;
        }

        self.gates.insert(0, Arc::new(gate));
    }

    /// Record a swap of two qubits as three CNOTs.
    ///
    /// Building every swap in the same qubit order raises the chance that
    /// adjacent swaps cancel through the usual fusion path.
    pub fn swap(&mut self, q1: usize, q2: usize) {
        if q1 == q2 {
            return;
        }
        let (q1, q2) = if q1 > q2 { (q2, q1) } else { (q1, q2) };

        let s1: BTreeSet<usize> = [q1].into_iter().collect();
        let s2: BTreeSet<usize> = [q2].into_iter().collect();
        // Constructors cannot fail here: q1 != q2 and perm 1 < 2.
        self.append(CircuitGate::controlled(q1, &PAULI_X, s2.clone(), 1).unwrap());
        self.append(CircuitGate::controlled(q2, &PAULI_X, s1, 1).unwrap());
        self.append(CircuitGate::controlled(q1, &PAULI_X, s2, 1).unwrap());
    }

    /// Replay the recorded gates onto a backend.
    ///
    /// Emission per gate: a single-qubit payload goes out as `mtrx`; a sole
    /// controlled payload at the all-ones pattern as `mc_mtrx`, at the
    /// all-zeros pattern as `mac_mtrx`; any other payload table is expanded
    /// densely for the uniform kernel. Swap records emit `swap`. The backend
    /// is widened first if the circuit references more qubits than it holds.
    pub fn run<B: QuantumBackend>(&self, backend: &mut B) -> Result<()> {
        if backend.qubit_count() < self.qubit_count {
            backend.allocate(self.qubit_count - backend.qubit_count())?;
        }

        for gate in self.gates() {
            let target = gate.target();

            if gate.is_swap() {
                let other = *gate.controls().iter().next().expect("swap has one control");
                backend.swap(target, other)?;
                continue;
            }

            if gate.controls().is_empty() {
                let payload = gate.payloads().get(&0).expect("single gate has key 0");
                backend.mtrx(payload, target)?;
                continue;
            }

            let controls = gate.controls_vec();
            if gate.payloads().len() == 1 {
                let (&perm, payload) = gate.payloads().iter().next().unwrap();
                let all_ones = (1usize << controls.len()) - 1;
                if perm == all_ones {
                    backend.mc_mtrx(&controls, payload, target)?;
                    continue;
                }
                if perm == 0 {
                    backend.mac_mtrx(&controls, payload, target)?;
                    continue;
                }
            }

            let table = gate.uniformly_controlled_payload();
            backend.uniformly_controlled_single_bit(&controls, target, &table)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Circuit({} qubits, {} gates)",
            self.qubit_count,
            self.gates.len()
        )?;
        for (i, gate) in self.gates.iter().enumerate() {
            writeln!(f, "  {}: {:?}", i, gate)?;
        }
        Ok(())
    }
}
