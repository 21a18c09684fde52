//! Register composition and decomposition
//!
//! Composition is the Kronecker product over amplitude stores: the combined
//! index carries the original register in its low bits and the appended
//! register above them (or interleaved, for composition at an interior
//! start index). Decomposition is a Schmidt-rank-1 approximation by
//! probability-weighted angle averaging; it is exact when the traced
//! subsystem is separable, and silently lossy otherwise, so callers invoke
//! it only when separability is known.

use crate::engine::{max_qubits, QubitEngine};
use crate::parallel;
use crate::state_vector::StateVector;
use num_complex::Complex64;
use qregsim_core::{Result, SimError};
use rayon::prelude::*;

const ANGLE_PAR_THRESHOLD: usize = 1 << 10;

impl QubitEngine {
    fn check_capacity(&self, requested: usize) -> Result<()> {
        let max = max_qubits();
        if requested > max {
            return Err(SimError::Capacity { requested, max });
        }
        Ok(())
    }

    /// Kronecker-append `other` after this register's last qubit.
    ///
    /// Returns the index the first appended qubit landed on. Both operands
    /// are normalized first when configured to normalize; a zero-state
    /// operand widens this engine into a zero-state register.
    pub fn compose(&mut self, other: &mut QubitEngine) -> Result<usize> {
        let result = self.qubit_count();
        if other.qubit_count() == 0 {
            return Ok(result);
        }

        let n_qubits = self.qubit_count() + other.qubit_count();
        self.check_capacity(n_qubits)?;

        if self.qubit_count() == 0 {
            // Become a copy of the peer.
            self.set_qubit_count(other.qubit_count());
            let state = other.state().cloned();
            self.install_state(state, other.running_norm());
            return Ok(0);
        }

        if self.is_zero_amplitude() || other.is_zero_amplitude() {
            self.set_qubit_count(n_qubits);
            self.zero_amplitudes();
            return Ok(result);
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        if other.do_normalize() && other.running_norm() != Some(1.0) {
            other.normalize_state(None, None, 0.0)?;
        }
        if self.is_zero_amplitude() || other.is_zero_amplitude() {
            self.set_qubit_count(n_qubits);
            self.zero_amplitudes();
            return Ok(result);
        }

        let start_mask = self.max_q_power() - 1;
        let end_mask = (other.max_q_power() - 1) << self.qubit_count();
        let shift = self.qubit_count();
        let n_max_q_power = 1usize << n_qubits;

        let mut combined = StateVector::new(n_qubits)?;
        {
            let dst = combined.shared();
            let a = self.state().expect("store present");
            let b = other.state().expect("store present");
            parallel::par_for(n_max_q_power, |lcv| unsafe {
                dst.write(
                    lcv,
                    a.read(lcv & start_mask) * b.read((lcv & end_mask) >> shift),
                );
            });
        }

        let norm = self.running_norm();
        self.set_qubit_count(n_qubits);
        self.install_state(Some(combined), norm);
        Ok(result)
    }

    /// Kronecker-insert `other` at qubit index `start`.
    pub fn compose_at(&mut self, other: &mut QubitEngine, start: usize) -> Result<usize> {
        if start > self.qubit_count() {
            return Err(SimError::BitRangeOutOfRange {
                start,
                length: 0,
                num_qubits: self.qubit_count(),
            });
        }

        if self.qubit_count() == 0 {
            self.compose(other)?;
            return Ok(0);
        }
        if other.qubit_count() == 0 {
            return Ok(self.qubit_count());
        }

        let o_qubits = other.qubit_count();
        let n_qubits = self.qubit_count() + o_qubits;
        self.check_capacity(n_qubits)?;

        if self.is_zero_amplitude() || other.is_zero_amplitude() {
            self.set_qubit_count(n_qubits);
            self.zero_amplitudes();
            return Ok(start);
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        if other.do_normalize() {
            other.normalize_state(None, None, 0.0)?;
        }
        if self.is_zero_amplitude() || other.is_zero_amplitude() {
            self.set_qubit_count(n_qubits);
            self.zero_amplitudes();
            return Ok(start);
        }

        let n_max_q_power = 1usize << n_qubits;
        let start_mask = (1usize << start) - 1;
        let mid_mask = ((1usize << o_qubits) - 1) << start;
        let end_mask = ((1usize << n_qubits) - 1) & !(start_mask | mid_mask);

        let mut combined = StateVector::new(n_qubits)?;
        {
            let dst = combined.shared();
            let a = self.state().expect("store present");
            let b = other.state().expect("store present");
            parallel::par_for(n_max_q_power, |lcv| unsafe {
                dst.write(
                    lcv,
                    a.read((lcv & start_mask) | ((lcv & end_mask) >> o_qubits))
                        * b.read((lcv & mid_mask) >> start),
                );
            });
        }

        let norm = self.running_norm();
        self.set_qubit_count(n_qubits);
        self.install_state(Some(combined), norm);
        Ok(start)
    }

    /// Kronecker-append every engine in `others`, in order, in one sweep.
    ///
    /// Returns the start index each peer was appended at.
    pub fn compose_many(&mut self, others: &mut [QubitEngine]) -> Result<Vec<usize>> {
        if others.is_empty() {
            return Ok(Vec::new());
        }

        let mut n_qubits = self.qubit_count();
        for other in others.iter() {
            n_qubits += other.qubit_count();
        }
        self.check_capacity(n_qubits)?;

        if self.is_zero_amplitude() || others.iter().any(|o| o.is_zero_amplitude()) {
            let mut offsets = Vec::with_capacity(others.len());
            let mut offset = self.qubit_count();
            for other in others.iter() {
                offsets.push(offset);
                offset += other.qubit_count();
            }
            self.set_qubit_count(n_qubits);
            self.zero_amplitudes();
            return Ok(offsets);
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        for other in others.iter_mut() {
            if other.do_normalize() {
                other.normalize_state(None, None, 0.0)?;
            }
        }
        if self.is_zero_amplitude() || others.iter().any(|o| o.is_zero_amplitude()) {
            let mut offsets = Vec::with_capacity(others.len());
            let mut offset = self.qubit_count();
            for other in others.iter() {
                offsets.push(offset);
                offset += other.qubit_count();
            }
            self.set_qubit_count(n_qubits);
            self.zero_amplitudes();
            return Ok(offsets);
        }

        let start_mask = self.max_q_power() - 1;
        let mut offsets = Vec::with_capacity(others.len());
        let mut masks: Vec<(usize, usize)> = Vec::with_capacity(others.len());
        let mut offset = self.qubit_count();
        for other in others.iter() {
            offsets.push(offset);
            masks.push(((other.max_q_power() - 1) << offset, offset));
            offset += other.qubit_count();
        }

        let n_max_q_power = 1usize << n_qubits;
        let mut combined = StateVector::new(n_qubits)?;
        {
            let dst = combined.shared();
            let a = self.state().expect("store present");
            let sources: Vec<&StateVector> = others
                .iter()
                .map(|o| o.state().expect("store present"))
                .collect();
            parallel::par_for(n_max_q_power, |lcv| unsafe {
                let mut amp = a.read(lcv & start_mask);
                for (src, &(mask, shift)) in sources.iter().zip(masks.iter()) {
                    amp *= src.read((lcv & mask) >> shift);
                }
                dst.write(lcv, amp);
            });
        }

        let norm = self.running_norm();
        self.set_qubit_count(n_qubits);
        self.install_state(Some(combined), norm);
        Ok(offsets)
    }

    /// Split off qubits `[start, start+length)` into a fresh engine.
    ///
    /// This is the probability-weighted angle-averaging projection: exact
    /// for separable subsystems, a rank-1 approximation otherwise.
    pub fn decompose(&mut self, start: usize, length: usize) -> Result<QubitEngine> {
        let mut destination = self.peer(length, 0)?;
        self.decompose_dispose(start, length, Some(&mut destination))?;
        Ok(destination)
    }

    /// Trace out qubits `[start, start+length)`, discarding them.
    pub fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        self.decompose_dispose(start, length, None)
    }

    fn decompose_dispose(
        &mut self,
        start: usize,
        length: usize,
        mut destination: Option<&mut QubitEngine>,
    ) -> Result<()> {
        self.check_bit_range(start, length)?;
        if length == 0 {
            return Ok(());
        }
        if let Some(dest) = destination.as_deref() {
            if dest.qubit_count() != length {
                return Err(SimError::ShapeMismatch {
                    expected: length,
                    actual: dest.qubit_count(),
                });
            }
        }

        let n_length = self.qubit_count() - length;

        if self.is_zero_amplitude() {
            self.set_qubit_count(n_length);
            if let Some(dest) = destination {
                dest.zero_amplitudes();
            }
            return Ok(());
        }

        if n_length == 0 {
            // The whole register moves to the destination.
            let norm = self.running_norm();
            let state = self.take_state();
            if let Some(dest) = destination {
                dest.install_state(state, norm);
            }
            self.set_qubit_count(0);
            self.zero_amplitudes();
            return Ok(());
        }

        if let Some(dest) = destination.as_deref_mut() {
            if dest.is_zero_amplitude() {
                dest.set_permutation(0, None)?;
            }
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        if self.is_zero_amplitude() {
            self.set_qubit_count(n_length);
            if let Some(dest) = destination {
                dest.zero_amplitudes();
            }
            return Ok(());
        }

        let part_power = 1usize << length;
        let remainder_power = 1usize << n_length;
        let start_mask = (1usize << start) - 1;
        let floor = self.amplitude_floor();
        let state = self.state().expect("store present");

        // Marginal probability and |a|²-weighted angle per remainder index.
        let remainder_sides: Vec<(f64, f64)> = (0..remainder_power)
            .into_par_iter()
            .with_min_len(ANGLE_PAR_THRESHOLD)
            .map(|lcv| {
                let low = lcv & start_mask;
                let base = low | ((lcv ^ low) << length);
                let mut prob = 0.0;
                let mut angle = 0.0;
                for k in 0..part_power {
                    let amp = state.read(base | (k << start));
                    let nrm = amp.norm_sqr();
                    prob += nrm;
                    if nrm > floor {
                        angle += amp.arg() * nrm;
                    }
                }
                (prob, angle)
            })
            .collect();

        // The same marginalization for the split-off part, when requested.
        let part_sides: Option<Vec<(f64, f64)>> = destination.as_deref().map(|_| {
            (0..part_power)
                .into_par_iter()
                .with_min_len(ANGLE_PAR_THRESHOLD)
                .map(|lcv| {
                    let base = lcv << start;
                    let mut prob = 0.0;
                    let mut angle = 0.0;
                    for k in 0..remainder_power {
                        let low = k & start_mask;
                        let index = low | base | ((k ^ low) << length);
                        let amp = state.read(index);
                        let nrm = amp.norm_sqr();
                        prob += nrm;
                        if nrm > floor {
                            angle += amp.arg() * nrm;
                        }
                    }
                    (prob, angle)
                })
                .collect()
        });

        if let (Some(dest), Some(sides)) = (destination, part_sides) {
            let mut part_state = StateVector::new(length)?;
            for (lcv, &(prob, angle)) in sides.iter().enumerate() {
                let angle = if prob > floor { angle / prob } else { 0.0 };
                part_state.write(lcv, Complex64::from_polar(prob.sqrt(), angle));
            }
            let norm = dest.running_norm();
            dest.install_state(Some(part_state), norm);
        }

        let mut remainder_state = StateVector::new(n_length)?;
        for (lcv, &(prob, angle)) in remainder_sides.iter().enumerate() {
            let angle = if prob > floor { angle / prob } else { 0.0 };
            remainder_state.write(lcv, Complex64::from_polar(prob.sqrt(), angle));
        }

        let norm = self.running_norm();
        self.set_qubit_count(n_length);
        self.install_state(Some(remainder_state), norm);
        Ok(())
    }

    /// Discard qubits `[start, start+length)` by sharp projection onto
    /// `perm`.
    ///
    /// Only amplitudes consistent with `perm` on the disposed qubits
    /// survive. No renormalization happens here; the running norm is marked
    /// stale and recomputed on demand.
    pub fn dispose_perm(&mut self, start: usize, length: usize, perm: usize) -> Result<()> {
        self.check_bit_range(start, length)?;
        if perm >= (1usize << length) {
            return Err(SimError::PermutationOutOfRange {
                value: perm,
                dimension: 1usize << length,
            });
        }
        if length == 0 {
            return Ok(());
        }

        let n_length = self.qubit_count() - length;

        if self.is_zero_amplitude() {
            self.set_qubit_count(n_length);
            return Ok(());
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        if self.is_zero_amplitude() {
            self.set_qubit_count(n_length);
            return Ok(());
        }

        let remainder_power = 1usize << n_length;
        let skip_mask = (1usize << start) - 1;
        let disposed_res = perm << start;

        let mut remainder_state = StateVector::new(n_length)?;
        {
            let dst = remainder_state.shared();
            let state = self.state().expect("store present");
            parallel::par_for(remainder_power, |i_high| unsafe {
                let i_low = i_high & skip_mask;
                dst.write(
                    i_high,
                    state.read(i_low | ((i_high ^ i_low) << length) | disposed_res),
                );
            });
        }

        self.set_qubit_count(n_length);
        self.install_state(Some(remainder_state), None);
        Ok(())
    }

    /// Swap this engine's upper amplitude half with `other`'s lower half.
    pub fn shuffle_buffers(&mut self, other: &mut QubitEngine) -> Result<()> {
        if self.qubit_count() != other.qubit_count() {
            return Err(SimError::ShapeMismatch {
                expected: self.qubit_count(),
                actual: other.qubit_count(),
            });
        }

        if self.is_zero_amplitude() && other.is_zero_amplitude() {
            return Ok(());
        }

        if self.is_zero_amplitude() {
            let mut store = StateVector::new(self.qubit_count())?;
            store.clear();
            self.install_state(Some(store), None);
        }
        if other.is_zero_amplitude() {
            let mut store = StateVector::new(other.qubit_count())?;
            store.clear();
            other.install_state(Some(store), None);
        }

        self.state_mut()
            .expect("store present")
            .shuffle(other.state_mut().expect("store present"));

        self.set_running_norm(None);
        other.set_running_norm(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qregsim_gates::HADAMARD;

    const H: f64 = std::f64::consts::FRAC_1_SQRT_2;

    #[test]
    fn test_compose_product_state() {
        // |1⟩ ⊗ |0⟩: the appended qubit lands in the high bits.
        let mut a = QubitEngine::new(1, 1).unwrap();
        let mut b = QubitEngine::new(1, 0).unwrap();
        let start = a.compose(&mut b).unwrap();

        assert_eq!(start, 1);
        assert_eq!(a.qubit_count(), 2);
        assert_relative_eq!(a.prob_all(1).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_superposition() {
        let mut a = QubitEngine::new(1, 0).unwrap();
        a.mtrx(&HADAMARD, 0).unwrap();
        let mut b = QubitEngine::new(1, 1).unwrap();
        a.compose(&mut b).unwrap();

        // (|0⟩+|1⟩)/√2 ⊗ |1⟩ → amplitudes at |10⟩ and |11⟩.
        let amps = a.quantum_state().unwrap();
        assert_relative_eq!(amps[0].norm(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(amps[1].norm(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(amps[2].re, H, epsilon = 1e-6);
        assert_relative_eq!(amps[3].re, H, epsilon = 1e-6);
    }

    #[test]
    fn test_compose_into_empty() {
        let mut a = QubitEngine::new(0, 0).unwrap();
        let mut b = QubitEngine::new(2, 3).unwrap();
        let start = a.compose(&mut b).unwrap();

        assert_eq!(start, 0);
        assert_eq!(a.qubit_count(), 2);
        assert_relative_eq!(a.prob_all(3).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_zero_state_widens() {
        let mut a = QubitEngine::new(1, 0).unwrap();
        a.zero_amplitudes();
        let mut b = QubitEngine::new(1, 0).unwrap();
        a.compose(&mut b).unwrap();

        assert_eq!(a.qubit_count(), 2);
        assert!(a.is_zero_amplitude());
    }

    #[test]
    fn test_compose_capacity() {
        let mut a = QubitEngine::new(20, 0).unwrap();
        let mut b = QubitEngine::new(20, 0).unwrap();
        assert!(matches!(
            a.compose(&mut b),
            Err(SimError::Capacity { .. })
        ));
    }

    #[test]
    fn test_compose_at_interleaves() {
        // Insert |1⟩ at index 0 of |01⟩: original q0 moves to q1.
        let mut a = QubitEngine::new(2, 1).unwrap();
        let mut b = QubitEngine::new(1, 1).unwrap();
        let start = a.compose_at(&mut b, 0).unwrap();

        assert_eq!(start, 0);
        assert_eq!(a.qubit_count(), 3);
        // New layout: inserted qubit at bit 0 (|1⟩), old q0 at bit 1 (|1⟩),
        // old q1 at bit 2 (|0⟩).
        assert_relative_eq!(a.prob_all(0b011).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_at_end_matches_compose() {
        let mut a1 = QubitEngine::new(2, 2).unwrap();
        let mut b1 = QubitEngine::new(1, 1).unwrap();
        a1.compose(&mut b1).unwrap();

        let mut a2 = QubitEngine::new(2, 2).unwrap();
        let mut b2 = QubitEngine::new(1, 1).unwrap();
        a2.compose_at(&mut b2, 2).unwrap();

        let s1 = a1.quantum_state().unwrap();
        let s2 = a2.quantum_state().unwrap();
        for (x, y) in s1.iter().zip(s2.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-10);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_compose_many_offsets() {
        let mut a = QubitEngine::new(1, 1).unwrap();
        let mut peers = vec![
            QubitEngine::new(1, 1).unwrap(),
            QubitEngine::new(2, 0).unwrap(),
        ];
        let offsets = a.compose_many(&mut peers).unwrap();

        assert_eq!(offsets, vec![1, 2]);
        assert_eq!(a.qubit_count(), 4);
        assert_relative_eq!(a.prob_all(0b0011).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_kronecker_purity_roundtrip() {
        // Compose then decompose with no entangling gate across the
        // boundary recovers both factors.
        let mut a = QubitEngine::new(1, 0).unwrap();
        a.mtrx(&HADAMARD, 0).unwrap();
        let expected_a = a.quantum_state().unwrap();

        let mut b = QubitEngine::new(1, 1).unwrap();
        a.compose(&mut b).unwrap();

        let mut recovered_b = a.decompose(1, 1).unwrap();
        assert_eq!(a.qubit_count(), 1);

        let got_a = a.quantum_state().unwrap();
        for (x, y) in got_a.iter().zip(expected_a.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-6);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-6);
        }

        assert_relative_eq!(recovered_b.prob_all(1).unwrap(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_decompose_full_register_moves_state() {
        let mut a = QubitEngine::new(2, 3).unwrap();
        let mut dest = a.decompose(0, 2).unwrap();

        assert_eq!(a.qubit_count(), 0);
        assert!(a.is_zero_amplitude());
        assert_relative_eq!(dest.prob_all(3).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_dispose_keeps_remainder() {
        // |101⟩, dispose the middle qubit: remainder |11⟩.
        let mut a = QubitEngine::new(3, 0b101).unwrap();
        a.dispose(1, 1).unwrap();

        assert_eq!(a.qubit_count(), 2);
        assert_relative_eq!(a.prob_all(0b11).unwrap(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_dispose_perm_projects() {
        // Bell-like state (|00⟩+|11⟩)/√2; project q1 onto |1⟩.
        let mut a = QubitEngine::new(2, 0).unwrap();
        a.mtrx(&HADAMARD, 0).unwrap();
        a.mc_mtrx(&[0], &qregsim_gates::PAULI_X, 1).unwrap();

        a.dispose_perm(1, 1, 1).unwrap();
        assert_eq!(a.qubit_count(), 1);
        // Unnormalized projection: the surviving |1⟩ amplitude is 1/√2.
        assert_eq!(a.running_norm(), None);
        let amp = a.get_amplitude(1).unwrap();
        assert_relative_eq!(amp.norm(), H, epsilon = 1e-6);
    }

    #[test]
    fn test_dispose_perm_out_of_range() {
        let mut a = QubitEngine::new(2, 0).unwrap();
        assert!(matches!(
            a.dispose_perm(0, 1, 2),
            Err(SimError::PermutationOutOfRange { .. })
        ));
        assert!(matches!(
            a.dispose_perm(1, 2, 0),
            Err(SimError::BitRangeOutOfRange { .. })
        ));
    }

    #[test]
    fn test_shuffle_buffers() {
        let mut a = QubitEngine::new(1, 0).unwrap();
        let mut b = QubitEngine::new(1, 1).unwrap();
        a.shuffle_buffers(&mut b).unwrap();

        // a's upper half took b's lower half (0), b's lower half took a's
        // upper half (0): a stays |0⟩-weighted, b keeps |1⟩.
        assert_eq!(a.running_norm(), None);
        assert_relative_eq!(a.get_amplitude(0).unwrap().re, 1.0, epsilon = 1e-10);
        assert_relative_eq!(b.get_amplitude(1).unwrap().re, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_shuffle_shape_mismatch() {
        let mut a = QubitEngine::new(1, 0).unwrap();
        let mut b = QubitEngine::new(2, 0).unwrap();
        assert!(matches!(
            a.shuffle_buffers(&mut b),
            Err(SimError::ShapeMismatch { .. })
        ));
    }
}
