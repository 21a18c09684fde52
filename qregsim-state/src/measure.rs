//! Probability queries, measurement, and norm maintenance
//!
//! Probability getters normalize first when the engine is configured to,
//! then reduce per-worker partial sums. Collapses go through
//! [`QubitEngine::apply_m`], which projects and rescales in one sweep and
//! leaves the running norm at 1.

use crate::engine::QubitEngine;
use crate::parallel;
use num_complex::Complex64;
use qregsim_core::{Result, SimError};
use qregsim_gates::NORM_EPSILON;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::BTreeMap;

const INNER_PAR_THRESHOLD: usize = 1 << 12;

#[inline]
fn clamp_prob(p: f64) -> f64 {
    p.clamp(0.0, 1.0)
}

impl QubitEngine {
    /// Probability of measuring `qubit` in |1⟩.
    pub fn prob(&mut self, qubit: usize) -> Result<f64> {
        self.check_qubit(qubit)?;

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        let Some(state) = self.state() else {
            return Ok(0.0);
        };

        if self.qubit_count() == 1 {
            return Ok(clamp_prob(state.read(1).norm_sqr()));
        }

        let q_power = 1usize << qubit;
        let one_chance =
            parallel::par_for_skip_sum(self.max_q_power(), q_power, 1, |lcv| {
                state.read(lcv | q_power).norm_sqr()
            });

        Ok(clamp_prob(one_chance))
    }

    /// Probability of the full register reading exactly |perm⟩.
    pub fn prob_all(&mut self, perm: usize) -> Result<f64> {
        self.check_perm(perm)?;

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        match self.state() {
            Some(state) => Ok(clamp_prob(state.read(perm).norm_sqr())),
            None => Ok(0.0),
        }
    }

    /// Probability that qubits `[start, start+length)` read `perm`.
    pub fn prob_reg(&mut self, start: usize, length: usize, perm: usize) -> Result<f64> {
        self.check_bit_range(start, length)?;
        if perm >= (1usize << length) {
            return Err(SimError::PermutationOutOfRange {
                value: perm,
                dimension: 1usize << length,
            });
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        let Some(state) = self.state() else {
            return Ok(0.0);
        };

        let shifted = perm << start;
        let prob = parallel::par_for_skip_sum(
            self.max_q_power(),
            1usize << start,
            length,
            |lcv| state.read(lcv | shifted).norm_sqr(),
        );

        Ok(clamp_prob(prob))
    }

    /// Probability that the qubits under `mask` read the bit-pattern
    /// `perm` (given in full-register coordinates).
    pub fn prob_mask(&mut self, mask: usize, perm: usize) -> Result<f64> {
        self.check_perm(mask)?;
        self.check_perm(perm)?;

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        let Some(state) = self.state() else {
            return Ok(0.0);
        };

        // Decompose the mask into its set-bit powers, ascending.
        let mut skip_powers: SmallVec<[usize; 8]> = SmallVec::new();
        let mut v = mask;
        while v != 0 {
            let low = v & v.wrapping_neg();
            skip_powers.push(low);
            v ^= low;
        }

        let prob = parallel::par_for_mask_sum(self.max_q_power(), &skip_powers, |lcv| {
            state.read(lcv | perm).norm_sqr()
        });

        Ok(clamp_prob(prob))
    }

    /// Probability that the bits under `mask` have odd parity.
    pub fn prob_parity(&mut self, mask: usize) -> Result<f64> {
        self.check_perm(mask)?;

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        let Some(state) = self.state() else {
            return Ok(0.0);
        };
        if mask == 0 {
            return Ok(0.0);
        }

        let odd_chance = parallel::par_for_sum(self.max_q_power(), |lcv| {
            if (lcv & mask).count_ones() & 1 == 1 {
                state.read(lcv).norm_sqr()
            } else {
                0.0
            }
        });

        Ok(clamp_prob(odd_chance))
    }

    /// Probability of `target` reading |1⟩, conditioned on `control`
    /// reading |`control_state`⟩.
    pub fn ctrl_or_anti_prob(
        &mut self,
        control_state: bool,
        control: usize,
        target: usize,
    ) -> Result<f64> {
        if self.is_zero_amplitude() {
            self.check_qubit(control)?;
            self.check_qubit(target)?;
            return Ok(0.0);
        }

        let mut control_prob = self.prob(control)?;
        if !control_state {
            control_prob = 1.0 - control_prob;
        }

        if control_prob <= NORM_EPSILON {
            return Ok(0.0);
        }
        if (1.0 - control_prob) <= NORM_EPSILON {
            return self.prob(target);
        }

        self.check_qubit(target)?;

        let control_power = 1usize << control;
        let control_mask = if control_state { control_power } else { 0 };
        let target_power = 1usize << target;
        let state = self.state().expect("store present");

        let one_chance = parallel::par_for_skip_sum(
            self.max_q_power(),
            target_power,
            1,
            |lcv| {
                if lcv & control_power == control_mask {
                    state.read(lcv | target_power).norm_sqr()
                } else {
                    0.0
                }
            },
        );

        Ok(clamp_prob(one_chance / control_prob))
    }

    /// Collapse the whole register by cumulative sampling.
    ///
    /// Walks basis states accumulating probability until the drawn value is
    /// crossed (or the remainder vanishes); when floating-point shortfall
    /// exhausts the walk, the last basis state with support wins.
    pub fn m_all(&mut self) -> Result<usize> {
        let rnd = self.rng_f64();
        let mut total = 0.0;
        let mut last_nonzero = self.max_q_power() - 1;

        for perm in 0..self.max_q_power() {
            let part = self.prob_all(perm)?;
            if part > NORM_EPSILON {
                total += part;
                if total > rnd || (1.0 - total) <= NORM_EPSILON {
                    self.set_permutation(perm, None)?;
                    return Ok(perm);
                }
                last_nonzero = perm;
            }
        }

        self.set_permutation(last_nonzero, None)?;
        Ok(last_nonzero)
    }

    /// Measure one qubit, optionally forcing the outcome.
    ///
    /// With `do_force`, `result` is taken as the outcome; otherwise the
    /// outcome is sampled. With `do_apply`, the state collapses onto the
    /// outcome.
    ///
    /// # Errors
    /// `ZeroProbabilityForce` when the applied outcome has no support.
    pub fn force_m(
        &mut self,
        qubit: usize,
        result: bool,
        do_force: bool,
        do_apply: bool,
    ) -> Result<bool> {
        self.check_qubit(qubit)?;

        let prob_one = self.prob(qubit)?;
        let result = if do_force {
            result
        } else {
            self.rng_f64() < prob_one
        };

        if !do_apply {
            return Ok(result);
        }

        let nrmlzr = if result { prob_one } else { 1.0 - prob_one };
        if nrmlzr <= NORM_EPSILON {
            return Err(SimError::ZeroProbabilityForce);
        }

        let q_power = 1usize << qubit;
        let nrm = self.nonunitary_phase() * (1.0 / nrmlzr.sqrt());
        self.apply_m(q_power, if result { q_power } else { 0 }, nrm)?;
        Ok(result)
    }

    /// Jointly force several qubits to recorded outcomes in one projection.
    pub fn force_m_reg(&mut self, bits: &[usize], values: &[bool]) -> Result<()> {
        if bits.len() != values.len() {
            return Err(SimError::ShapeMismatch {
                expected: bits.len(),
                actual: values.len(),
            });
        }
        if bits.is_empty() {
            return Ok(());
        }

        let mut mask = 0usize;
        let mut result = 0usize;
        for (&bit, &value) in bits.iter().zip(values) {
            self.check_qubit(bit)?;
            let power = 1usize << bit;
            if mask & power != 0 {
                return Err(SimError::DuplicateQubit(bit));
            }
            mask |= power;
            if value {
                result |= power;
            }
        }

        let prob = self.prob_mask(mask, result)?;
        if prob <= NORM_EPSILON {
            return Err(SimError::ZeroProbabilityForce);
        }

        let nrm = self.nonunitary_phase() * (1.0 / prob.sqrt());
        self.apply_m(mask, result, nrm)
    }

    /// Force or sample a parity-collapse over the bits under `mask`.
    ///
    /// Survivor norm becomes the new running norm; when automatic
    /// normalization is off, the state is normalized here instead (the
    /// auto-normalizing path defers to the next read).
    pub fn force_m_parity(&mut self, mask: usize, result: bool, do_force: bool) -> Result<bool> {
        self.check_perm(mask)?;
        if self.is_zero_amplitude() || mask == 0 {
            return Ok(false);
        }

        let result = if do_force {
            result
        } else {
            let parity_prob = self.prob_parity(mask)?;
            self.rng_f64() <= parity_prob
        };

        let max_q_power = self.max_q_power();
        let want = u32::from(result);
        let amps = self.state_mut().expect("store present").shared();
        let survivor_norm = parallel::par_for_sum(max_q_power, |lcv| unsafe {
            if (lcv & mask).count_ones() & 1 == want {
                amps.read(lcv).norm_sqr()
            } else {
                amps.write(lcv, Complex64::new(0.0, 0.0));
                0.0
            }
        });

        self.set_running_norm(Some(survivor_norm));

        if survivor_norm <= NORM_EPSILON {
            self.zero_amplitudes();
        } else if !self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }

        Ok(result)
    }

    /// Projection primitive shared by the forced measurements: zero every
    /// amplitude whose bits under `mask` differ from `result`, scale the
    /// survivors by `nrm`.
    pub fn apply_m(&mut self, mask: usize, result: usize, nrm: Complex64) -> Result<()> {
        self.check_perm(mask)?;
        self.check_perm(result)?;
        if self.is_zero_amplitude() {
            return Ok(());
        }

        let max_q_power = self.max_q_power();
        let amps = self.state_mut().expect("store present").shared();

        parallel::par_for(max_q_power, |lcv| unsafe {
            if lcv & mask == result {
                amps.write(lcv, nrm * amps.read(lcv));
            } else {
                amps.write(lcv, Complex64::new(0.0, 0.0));
            }
        });

        self.set_running_norm(Some(1.0));
        Ok(())
    }

    /// Sample the marginal distribution over the qubits named by
    /// `q_powers`, `shots` times, without collapsing.
    ///
    /// Returns outcome → count, outcomes packed with bit `i` taken from
    /// the qubit of `q_powers[i]`.
    pub fn multi_shot_measure_mask(
        &mut self,
        q_powers: &[usize],
        shots: usize,
    ) -> Result<BTreeMap<usize, usize>> {
        for &power in q_powers {
            self.check_perm(power)?;
        }

        let mut results = BTreeMap::new();
        if shots == 0 {
            return Ok(results);
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        let Some(state) = self.state() else {
            return Ok(results);
        };

        // Marginal distribution over the masked bits.
        let mut dist = vec![0.0f64; 1usize << q_powers.len()];
        for (index, amp) in state.amplitudes().iter().enumerate() {
            let prob = amp.norm_sqr();
            if prob == 0.0 {
                continue;
            }
            let mut key = 0usize;
            for (j, &power) in q_powers.iter().enumerate() {
                if index & power != 0 {
                    key |= 1 << j;
                }
            }
            dist[key] += prob;
        }

        let mut cumulative = dist;
        let mut total = 0.0;
        for entry in cumulative.iter_mut() {
            total += *entry;
            *entry = total;
        }

        for _ in 0..shots {
            let draw = self.rng_f64() * total;
            let outcome = cumulative
                .partition_point(|&c| c <= draw)
                .min(cumulative.len() - 1);
            *results.entry(outcome).or_insert(0) += 1;
        }

        Ok(results)
    }

    /// 1 − |⟨ψ|φ⟩|².
    ///
    /// Registers of differing width are maximally different. Both engines
    /// are normalized first when configured to.
    pub fn sum_sqr_diff(&mut self, other: &mut QubitEngine) -> Result<f64> {
        if self.qubit_count() != other.qubit_count() {
            return Ok(1.0);
        }

        if self.do_normalize() {
            self.normalize_state(None, None, 0.0)?;
        }
        if other.do_normalize() {
            other.normalize_state(None, None, 0.0)?;
        }

        if self.is_zero_amplitude() && other.is_zero_amplitude() {
            return Ok(0.0);
        }
        if self.is_zero_amplitude() {
            other.update_running_norm(None)?;
            return Ok(other.running_norm().unwrap_or(0.0));
        }
        if other.is_zero_amplitude() {
            self.update_running_norm(None)?;
            return Ok(self.running_norm().unwrap_or(0.0));
        }

        let a = self.state().expect("store present").amplitudes();
        let b = other.state().expect("store present").amplitudes();
        let inner: Complex64 = a
            .par_iter()
            .zip(b.par_iter())
            .with_min_len(INNER_PAR_THRESHOLD)
            .map(|(x, y)| x.conj() * y)
            .reduce(|| Complex64::new(0.0, 0.0), |u, v| u + v);

        Ok(1.0 - clamp_prob(inner.norm_sqr()))
    }

    /// Scale the state back to unit norm.
    ///
    /// `nrm` overrides the measured norm (recomputed when stale);
    /// `norm_thresh` floors small components first (`None` selects the
    /// engine's amplitude floor); `phase_arg` folds a global phase into the
    /// scale factor. A norm at or below the floor collapses to the
    /// zero-state sentinel.
    pub fn normalize_state(
        &mut self,
        nrm: Option<f64>,
        norm_thresh: Option<f64>,
        phase_arg: f64,
    ) -> Result<()> {
        if self.is_zero_amplitude() {
            return Ok(());
        }

        if self.running_norm().is_none() && nrm.is_none() {
            self.update_running_norm(None)?;
            if self.is_zero_amplitude() {
                return Ok(());
            }
        }

        let nrm = match nrm {
            Some(n) if n >= 0.0 => n,
            _ => self.running_norm().unwrap_or(0.0),
        };

        if nrm <= NORM_EPSILON {
            self.zero_amplitudes();
            return Ok(());
        }
        if (1.0 - nrm).abs() <= NORM_EPSILON && phase_arg * phase_arg <= NORM_EPSILON {
            return Ok(());
        }

        let norm_thresh = norm_thresh.unwrap_or(self.amplitude_floor());
        let scale = Complex64::from_polar(1.0 / nrm.sqrt(), phase_arg);
        let max_q_power = self.max_q_power();
        let amps = self.state_mut().expect("store present").shared();

        if norm_thresh <= 0.0 {
            parallel::par_for(max_q_power, |lcv| unsafe {
                amps.write(lcv, scale * amps.read(lcv));
            });
        } else {
            parallel::par_for(max_q_power, |lcv| unsafe {
                let mut amp = amps.read(lcv);
                if amp.norm_sqr() < norm_thresh {
                    amp = Complex64::new(0.0, 0.0);
                }
                amps.write(lcv, scale * amp);
            });
        }

        self.set_running_norm(Some(1.0));
        Ok(())
    }

    /// Recompute the running norm from the store, flooring components
    /// below `norm_thresh` (`None` selects the engine's amplitude floor).
    pub fn update_running_norm(&mut self, norm_thresh: Option<f64>) -> Result<()> {
        let Some(state) = self.state() else {
            self.set_running_norm(Some(0.0));
            return Ok(());
        };

        let thresh = norm_thresh.unwrap_or(self.amplitude_floor());
        let total = parallel::par_norm(state.amplitudes(), thresh);
        self.set_running_norm(Some(total));

        if total <= NORM_EPSILON {
            self.zero_amplitudes();
        }
        Ok(())
    }
}
