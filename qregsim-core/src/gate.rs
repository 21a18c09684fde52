//! Gate records for the circuit layer
//!
//! A [`CircuitGate`] is one logical gate: a target qubit, an ordered control
//! set, and a table of 2×2 payloads keyed by control bit-pattern. The three
//! semantic shapes are derived from content rather than a tag:
//!
//! - *single-qubit*: empty controls, one payload at key 0;
//! - *uniformly controlled*: non-empty controls, each key selecting the 2×2
//!   applied under that control pattern (missing keys act as identity);
//! - *swap*: empty payload table, target plus exactly one control.

use crate::error::{Result, SimError};
use qregsim_gates::{
    is_identity_2x2, is_norm_zero, multiply_2x2, Matrix2x2, IDENTITY,
};
use num_complex::Complex64;
use smallvec::SmallVec;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One logical gate in a circuit
///
/// Payload keys are control bit-patterns in `[0, 2^|controls|)`; bit `i` of a
/// key corresponds to the `i`-th control in ascending qubit order. The
/// control set never contains the target.
#[derive(Clone, PartialEq)]
pub struct CircuitGate {
    target: usize,
    controls: BTreeSet<usize>,
    payloads: BTreeMap<usize, Matrix2x2>,
}

impl CircuitGate {
    /// Single-qubit gate
    ///
    /// # Example
    /// ```
    /// use qregsim_core::CircuitGate;
    /// use qregsim_gates::HADAMARD;
    ///
    /// let gate = CircuitGate::single(0, &HADAMARD);
    /// assert!(gate.controls().is_empty());
    /// ```
    pub fn single(target: usize, matrix: &Matrix2x2) -> Self {
        let mut payloads = BTreeMap::new();
        payloads.insert(0, *matrix);
        Self {
            target,
            controls: BTreeSet::new(),
            payloads,
        }
    }

    /// Controlled gate: `matrix` applies when the controls hold bit-pattern
    /// `perm`; every other pattern acts as identity.
    ///
    /// # Errors
    /// Fails when the control set contains the target or `perm` is outside
    /// `[0, 2^|controls|)`.
    pub fn controlled(
        target: usize,
        matrix: &Matrix2x2,
        controls: BTreeSet<usize>,
        perm: usize,
    ) -> Result<Self> {
        if controls.contains(&target) {
            return Err(SimError::DuplicateQubit(target));
        }
        if perm >= (1usize << controls.len()) {
            return Err(SimError::PermutationOutOfRange {
                value: perm,
                dimension: 1usize << controls.len(),
            });
        }
        let mut payloads = BTreeMap::new();
        payloads.insert(perm, *matrix);
        Ok(Self {
            target,
            controls,
            payloads,
        })
    }

    /// Uniformly controlled gate from a full payload table
    ///
    /// # Errors
    /// Fails on target/control collision or any out-of-range payload key.
    pub fn uniformly_controlled(
        target: usize,
        payloads: BTreeMap<usize, Matrix2x2>,
        controls: BTreeSet<usize>,
    ) -> Result<Self> {
        if controls.contains(&target) {
            return Err(SimError::DuplicateQubit(target));
        }
        let dimension = 1usize << controls.len();
        if let Some((&key, _)) = payloads.iter().next_back() {
            if key >= dimension {
                return Err(SimError::PermutationOutOfRange {
                    value: key,
                    dimension,
                });
            }
        }
        Ok(Self {
            target,
            controls,
            payloads,
        })
    }

    /// Swap record over two qubits (empty payload table)
    ///
    /// # Errors
    /// Fails when both qubits are the same.
    pub fn swap_record(q1: usize, q2: usize) -> Result<Self> {
        if q1 == q2 {
            return Err(SimError::DuplicateQubit(q1));
        }
        let mut controls = BTreeSet::new();
        controls.insert(q2);
        Ok(Self {
            target: q1,
            controls,
            payloads: BTreeMap::new(),
        })
    }

    /// Target qubit index
    #[inline]
    pub fn target(&self) -> usize {
        self.target
    }

    /// Control set, in ascending qubit order
    #[inline]
    pub fn controls(&self) -> &BTreeSet<usize> {
        &self.controls
    }

    /// Payload table, keyed by control bit-pattern
    #[inline]
    pub fn payloads(&self) -> &BTreeMap<usize, Matrix2x2> {
        &self.payloads
    }

    /// Controls as a vector, ascending
    pub fn controls_vec(&self) -> SmallVec<[usize; 2]> {
        self.controls.iter().copied().collect()
    }

    /// Highest qubit index this gate touches
    pub fn max_qubit(&self) -> usize {
        match self.controls.iter().next_back() {
            Some(&c) => c.max(self.target),
            None => self.target,
        }
    }

    /// Is this gate the identity?
    pub fn is_identity(&self) -> bool {
        if !self.controls.is_empty() || self.payloads.len() != 1 {
            return false;
        }
        match self.payloads.get(&0) {
            Some(p) => is_identity_2x2(p),
            None => false,
        }
    }

    /// Is every payload diagonal (phase-only on the target)?
    ///
    /// Swap records are not phase gates.
    pub fn is_phase(&self) -> bool {
        if self.is_swap() {
            return false;
        }
        self.payloads
            .values()
            .all(|p| is_norm_zero(p[1]) && is_norm_zero(p[2]))
    }

    /// Is every payload anti-diagonal (Pauli-X up to phases)?
    pub fn is_invert(&self) -> bool {
        if self.is_swap() {
            return false;
        }
        self.payloads
            .values()
            .all(|p| is_norm_zero(p[0]) && is_norm_zero(p[3]))
    }

    /// Is this a swap record?
    #[inline]
    pub fn is_swap(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Reset this gate to the explicit identity operator.
    pub fn clear(&mut self) {
        self.controls.clear();
        self.payloads.clear();
        self.payloads.insert(0, IDENTITY);
    }

    /// Can `other` be fused into this gate?
    ///
    /// Requires the same target and an identical control set. Swap records
    /// never fuse.
    pub fn can_combine(&self, other: &CircuitGate) -> bool {
        if self.is_swap() || other.is_swap() {
            return false;
        }
        self.target == other.target && self.controls == other.controls
    }

    /// Fuse `other` (applied after this gate) into this gate.
    ///
    /// Payloads multiply per control-pattern key; keys whose product becomes
    /// identity are erased, and an emptied table collapses to the explicit
    /// identity.
    pub fn combine(&mut self, other: &CircuitGate) {
        for (&perm, late) in &other.payloads {
            match self.payloads.entry(perm) {
                Entry::Vacant(slot) => {
                    slot.insert(*late);
                }
                Entry::Occupied(mut slot) => {
                    let out = multiply_2x2(late, slot.get());
                    if is_identity_2x2(&out) {
                        slot.remove();
                    } else {
                        *slot.get_mut() = out;
                    }
                }
            }
        }

        if self.payloads.is_empty() {
            self.clear();
        }
    }

    /// Fuse `other` into this gate when the shapes allow it.
    pub fn try_combine(&mut self, other: &CircuitGate) -> bool {
        if !self.can_combine(other) {
            return false;
        }
        self.combine(other);
        true
    }

    /// Does `other` commute past this gate?
    ///
    /// True when at least one of:
    /// - their control/target graphs are disjoint;
    /// - `other` targets one of this gate's controls and is phase-only
    ///   (and symmetrically through this gate);
    /// - both target the same qubit and both are phase-only.
    pub fn can_pass(&self, other: &CircuitGate) -> bool {
        if other.controls.contains(&self.target) {
            if !self.is_phase() {
                return false;
            }
            if self.controls.contains(&other.target) {
                return other.is_phase();
            }
            return true;
        }

        if self.controls.contains(&other.target) {
            return other.is_phase();
        }

        self.target != other.target || (self.is_phase() && other.is_phase())
    }

    /// Expand the payload table to the dense 4·2^|controls| array the
    /// uniform kernel consumes, filling missing keys with identity.
    pub fn uniformly_controlled_payload(&self) -> Vec<Complex64> {
        let max_perm = 1usize << self.controls.len();
        let mut table = Vec::with_capacity(4 * max_perm);
        for perm in 0..max_perm {
            match self.payloads.get(&perm) {
                Some(p) => table.extend_from_slice(p),
                None => table.extend_from_slice(&IDENTITY),
            }
        }
        table
    }
}

impl fmt::Debug for CircuitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_swap() {
            let other = self.controls.iter().next().copied().unwrap_or(0);
            return write!(f, "Swap(q{}, q{})", self.target, other);
        }
        write!(f, "Gate(q{}", self.target)?;
        if !self.controls.is_empty() {
            write!(f, ", controls: {:?}", self.controls)?;
        }
        write!(f, ", {} payload(s))", self.payloads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qregsim_gates::{PAULI_X, PAULI_Z, S_GATE};

    fn controls(qs: &[usize]) -> BTreeSet<usize> {
        qs.iter().copied().collect()
    }

    #[test]
    fn test_single_shape() {
        let g = CircuitGate::single(2, &PAULI_X);
        assert_eq!(g.target(), 2);
        assert!(g.controls().is_empty());
        assert!(!g.is_swap());
        assert!(!g.is_identity());
        assert!(g.is_invert());
        assert_eq!(g.max_qubit(), 2);
    }

    #[test]
    fn test_controlled_rejects_target_in_controls() {
        let result = CircuitGate::controlled(1, &PAULI_X, controls(&[1, 2]), 3);
        assert!(matches!(result, Err(SimError::DuplicateQubit(1))));
    }

    #[test]
    fn test_controlled_rejects_bad_perm() {
        let result = CircuitGate::controlled(0, &PAULI_X, controls(&[1]), 2);
        assert!(matches!(
            result,
            Err(SimError::PermutationOutOfRange { .. })
        ));
    }

    #[test]
    fn test_swap_shape() {
        let g = CircuitGate::swap_record(0, 3).unwrap();
        assert!(g.is_swap());
        assert!(!g.is_phase());
        assert!(!g.is_invert());
        assert_eq!(g.max_qubit(), 3);
        assert!(CircuitGate::swap_record(2, 2).is_err());
    }

    #[test]
    fn test_identity_detection() {
        let g = CircuitGate::single(0, &qregsim_gates::IDENTITY);
        assert!(g.is_identity());

        let controlled =
            CircuitGate::controlled(0, &qregsim_gates::IDENTITY, controls(&[1]), 1).unwrap();
        assert!(!controlled.is_identity());
    }

    #[test]
    fn test_combine_s_s_is_z() {
        let mut g = CircuitGate::single(0, &S_GATE);
        let other = CircuitGate::single(0, &S_GATE);
        assert!(g.try_combine(&other));

        let fused = g.payloads().get(&0).unwrap();
        for (a, b) in fused.iter().zip(PAULI_Z.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_combine_x_x_collapses_to_identity() {
        let mut g = CircuitGate::single(0, &PAULI_X);
        let other = CircuitGate::single(0, &PAULI_X);
        assert!(g.try_combine(&other));
        assert!(g.is_identity());
    }

    #[test]
    fn test_combine_requires_matching_controls() {
        let mut g = CircuitGate::controlled(0, &PAULI_X, controls(&[1]), 1).unwrap();
        let peer = CircuitGate::controlled(0, &PAULI_X, controls(&[2]), 1).unwrap();
        assert!(!g.try_combine(&peer));

        let same = CircuitGate::controlled(0, &PAULI_X, controls(&[1]), 1).unwrap();
        assert!(g.try_combine(&same));
        assert!(g.is_identity());
    }

    #[test]
    fn test_combine_merges_distinct_patterns() {
        let mut g = CircuitGate::controlled(0, &PAULI_X, controls(&[1]), 1).unwrap();
        let anti = CircuitGate::controlled(0, &PAULI_Z, controls(&[1]), 0).unwrap();
        assert!(g.try_combine(&anti));
        assert_eq!(g.payloads().len(), 2);
    }

    #[test]
    fn test_swap_fusion_disabled() {
        let mut a = CircuitGate::swap_record(0, 1).unwrap();
        let b = CircuitGate::swap_record(0, 1).unwrap();
        assert!(!a.try_combine(&b));
    }

    #[test]
    fn test_can_pass_disjoint() {
        let a = CircuitGate::single(0, &PAULI_X);
        let b = CircuitGate::single(1, &PAULI_Z);
        assert!(a.can_pass(&b));
    }

    #[test]
    fn test_can_pass_same_target_phase_only() {
        let z = CircuitGate::single(0, &PAULI_Z);
        let s = CircuitGate::single(0, &S_GATE);
        let x = CircuitGate::single(0, &PAULI_X);
        assert!(z.can_pass(&s));
        assert!(!z.can_pass(&x));
        assert!(!x.can_pass(&z));
    }

    #[test]
    fn test_can_pass_phase_through_control() {
        // Z on the control wire of a CNOT commutes with the CNOT.
        let cnot = CircuitGate::controlled(0, &PAULI_X, controls(&[1]), 1).unwrap();
        let z_on_control = CircuitGate::single(1, &PAULI_Z);
        assert!(cnot.can_pass(&z_on_control));

        // X on the control wire does not.
        let x_on_control = CircuitGate::single(1, &PAULI_X);
        assert!(!cnot.can_pass(&x_on_control));
    }

    #[test]
    fn test_can_pass_non_phase_into_controls_blocked() {
        let cnot = CircuitGate::controlled(0, &PAULI_X, controls(&[1]), 1).unwrap();
        // The CNOT's target is a control of the incoming gate, and the CNOT
        // is not phase-only, so the incoming gate cannot pass.
        let incoming = CircuitGate::controlled(2, &PAULI_X, controls(&[0]), 1).unwrap();
        assert!(!cnot.can_pass(&incoming));
    }

    #[test]
    fn test_dense_payload_expansion() {
        let g = CircuitGate::controlled(0, &PAULI_X, controls(&[1, 2]), 3).unwrap();
        let table = g.uniformly_controlled_payload();
        assert_eq!(table.len(), 16);
        // Patterns 0..3 are identity.
        for perm in 0..3 {
            assert!((table[4 * perm] - Complex64::new(1.0, 0.0)).norm() < 1e-12);
            assert!(table[4 * perm + 1].norm() < 1e-12);
        }
        // Pattern 3 carries the X payload.
        assert!(table[12].norm() < 1e-12);
        assert!((table[13] - Complex64::new(1.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_clear_resets_to_identity() {
        let mut g = CircuitGate::controlled(0, &PAULI_X, controls(&[1]), 1).unwrap();
        g.clear();
        assert!(g.is_identity());
    }
}
