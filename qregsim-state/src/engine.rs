//! The dense amplitude engine
//!
//! [`QubitEngine`] keeps 2^N complex amplitudes (or the zero-state sentinel)
//! together with a lazily-maintained running norm. Every gate funnels into
//! the [`QubitEngine::apply_2x2`] kernel, which sweeps the index space with
//! the target and control bits held fixed and applies one 2×2 to each
//! amplitude pair.

use crate::parallel;
use crate::state_vector::StateVector;
use num_complex::Complex64;
use qregsim_core::{QuantumBackend, Result, SimError};
use qregsim_gates::{
    is_identity_2x2, is_invert_2x2, is_norm_zero, is_phase_2x2, Matrix2x2, NORM_EPSILON, PAULI_X,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use smallvec::SmallVec;

const ZERO_C: Complex64 = Complex64::new(0.0, 0.0);
const ONE_C: Complex64 = Complex64::new(1.0, 0.0);

/// Default hard cap on register width, overridable through
/// `QREGSIM_MAX_CPU_QB`.
const DEFAULT_MAX_QUBITS: usize = 30;

/// Hard cap on engine width in qubits.
///
/// Reads `QREGSIM_MAX_CPU_QB` once per call; malformed values fall back to
/// the default.
pub fn max_qubits() -> usize {
    std::env::var("QREGSIM_MAX_CPU_QB")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_QUBITS)
}

/// Engine construction options
///
/// # Example
/// ```
/// use qregsim_state::EngineConfig;
///
/// let config = EngineConfig::default().with_seed(7).with_normalize(false);
/// assert!(!config.do_normalize);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Renormalize on read and fold 1/√norm into single-qubit gates
    pub do_normalize: bool,
    /// Randomize the (unobservable) global phase on initialization and
    /// measurement collapse
    pub rand_global_phase: bool,
    /// Squared-magnitude floor below which amplitudes are clamped to zero
    pub amplitude_floor: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            do_normalize: true,
            rand_global_phase: false,
            amplitude_floor: NORM_EPSILON,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_normalize(mut self, do_normalize: bool) -> Self {
        self.do_normalize = do_normalize;
        self
    }

    pub fn with_rand_global_phase(mut self, rand_global_phase: bool) -> Self {
        self.rand_global_phase = rand_global_phase;
        self
    }

    pub fn with_amplitude_floor(mut self, amplitude_floor: f64) -> Self {
        self.amplitude_floor = amplitude_floor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Which shape of 2×2 the kernel is applying
#[derive(Clone, Copy, PartialEq)]
enum KernelShape {
    /// Diagonal matrix: multiply in place, never cross offsets
    Phase,
    /// Anti-diagonal matrix: swap the offsets and multiply
    Invert,
    /// Full 2×2 multiply
    Generic,
}

impl KernelShape {
    #[inline]
    fn of(m: &Matrix2x2) -> Self {
        if is_phase_2x2(m) {
            KernelShape::Phase
        } else if is_invert_2x2(m) {
            KernelShape::Invert
        } else {
            KernelShape::Generic
        }
    }

    #[inline]
    fn step(self, m: &Matrix2x2, y0: Complex64, y1: Complex64) -> (Complex64, Complex64) {
        match self {
            KernelShape::Phase => (m[0] * y0, m[3] * y1),
            KernelShape::Invert => (m[1] * y1, m[2] * y0),
            KernelShape::Generic => (m[0] * y0 + m[1] * y1, m[2] * y0 + m[3] * y1),
        }
    }
}

/// Dense state-vector engine over N qubits
///
/// # Example
/// ```
/// use qregsim_state::QubitEngine;
/// use qregsim_gates::HADAMARD;
///
/// let mut engine = QubitEngine::new(1, 0).unwrap();
/// engine.mtrx(&HADAMARD, 0).unwrap();
/// assert!((engine.prob(0).unwrap() - 0.5).abs() < 1e-10);
/// ```
pub struct QubitEngine {
    qubit_count: usize,
    max_q_power: usize,
    state: Option<StateVector>,
    /// `Some(x)`: Σ|aᵢ|² = x up to the floor. `None`: stale, recompute on
    /// demand.
    running_norm: Option<f64>,
    do_normalize: bool,
    rand_global_phase: bool,
    amplitude_floor: f64,
    rng: StdRng,
}

impl QubitEngine {
    /// Engine in basis state |init_perm⟩ with default configuration.
    ///
    /// A width of 0 produces the zero-amplitude engine.
    ///
    /// # Errors
    /// `Capacity` past [`max_qubits`]; `PermutationOutOfRange` for a bad
    /// initial state.
    pub fn new(num_qubits: usize, init_perm: usize) -> Result<Self> {
        Self::with_config(num_qubits, init_perm, EngineConfig::default())
    }

    /// Engine in basis state |init_perm⟩ with explicit configuration.
    pub fn with_config(num_qubits: usize, init_perm: usize, config: EngineConfig) -> Result<Self> {
        let max = max_qubits();
        if num_qubits > max {
            return Err(SimError::Capacity {
                requested: num_qubits,
                max,
            });
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut engine = Self {
            qubit_count: num_qubits,
            max_q_power: 1usize << num_qubits,
            state: None,
            running_norm: Some(0.0),
            do_normalize: config.do_normalize,
            rand_global_phase: config.rand_global_phase,
            amplitude_floor: config.amplitude_floor,
            rng,
        };

        if num_qubits == 0 {
            return Ok(engine);
        }

        engine.set_permutation(init_perm, None)?;
        Ok(engine)
    }

    /// Peer engine with this engine's flags, seeded from this engine's RNG.
    pub(crate) fn peer(&mut self, num_qubits: usize, init_perm: usize) -> Result<Self> {
        let config = EngineConfig {
            do_normalize: self.do_normalize,
            rand_global_phase: self.rand_global_phase,
            amplitude_floor: self.amplitude_floor,
            seed: Some(self.rng.gen()),
        };
        Self::with_config(num_qubits, init_perm, config)
    }

    /// Register width in qubits
    #[inline]
    pub fn qubit_count(&self) -> usize {
        self.qubit_count
    }

    /// 2^qubit_count
    #[inline]
    pub fn max_q_power(&self) -> usize {
        self.max_q_power
    }

    /// True when the engine holds the all-zeros amplitude vector
    #[inline]
    pub fn is_zero_amplitude(&self) -> bool {
        self.state.is_none()
    }

    /// Whether gate application folds in renormalization
    #[inline]
    pub fn do_normalize(&self) -> bool {
        self.do_normalize
    }

    /// The lazily-maintained Σ|aᵢ|², `None` when stale
    #[inline]
    pub fn running_norm(&self) -> Option<f64> {
        self.running_norm
    }

    /// Amplitude floor in use
    #[inline]
    pub fn amplitude_floor(&self) -> f64 {
        self.amplitude_floor
    }

    /// Drop the store; the engine now represents the all-zeros vector.
    pub fn zero_amplitudes(&mut self) {
        self.state = None;
        self.running_norm = Some(0.0);
    }

    pub(crate) fn set_qubit_count(&mut self, num_qubits: usize) {
        self.qubit_count = num_qubits;
        self.max_q_power = 1usize << num_qubits;
    }

    pub(crate) fn state(&self) -> Option<&StateVector> {
        self.state.as_ref()
    }

    pub(crate) fn state_mut(&mut self) -> Option<&mut StateVector> {
        self.state.as_mut()
    }

    pub(crate) fn take_state(&mut self) -> Option<StateVector> {
        self.state.take()
    }

    pub(crate) fn install_state(&mut self, state: Option<StateVector>, running_norm: Option<f64>) {
        self.state = state;
        self.running_norm = running_norm;
    }

    pub(crate) fn set_running_norm(&mut self, running_norm: Option<f64>) {
        self.running_norm = running_norm;
    }

    pub(crate) fn rng_f64(&mut self) -> f64 {
        self.rng.gen()
    }

    #[inline]
    pub(crate) fn check_qubit(&self, qubit: usize) -> Result<()> {
        if qubit >= self.qubit_count {
            return Err(SimError::QubitOutOfRange {
                index: qubit,
                num_qubits: self.qubit_count,
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_perm(&self, value: usize) -> Result<()> {
        if value >= self.max_q_power {
            return Err(SimError::PermutationOutOfRange {
                value,
                dimension: self.max_q_power,
            });
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_bit_range(&self, start: usize, length: usize) -> Result<()> {
        if start.checked_add(length).map_or(true, |end| end > self.qubit_count) {
            return Err(SimError::BitRangeOutOfRange {
                start,
                length,
                num_qubits: self.qubit_count,
            });
        }
        Ok(())
    }

    pub(crate) fn check_controls(&self, controls: &[usize], target: usize) -> Result<()> {
        for &c in controls {
            self.check_qubit(c)?;
            if c == target {
                return Err(SimError::DuplicateQubit(c));
            }
        }
        Ok(())
    }

    /// A uniformly random unit phase when global-phase randomization is on,
    /// 1 otherwise.
    pub(crate) fn nonunitary_phase(&mut self) -> Complex64 {
        if self.rand_global_phase {
            let angle = self.rng.gen::<f64>() * 2.0 * std::f64::consts::PI;
            Complex64::from_polar(1.0, angle)
        } else {
            ONE_C
        }
    }

    /// Reset to the basis state |perm⟩.
    ///
    /// A pinned `phase` is normalized to unit modulus; with no pin, the
    /// phase is 1 unless global-phase randomization is on.
    pub fn set_permutation(&mut self, perm: usize, phase: Option<Complex64>) -> Result<()> {
        self.check_perm(perm)?;

        if self.state.is_none() {
            self.state = Some(StateVector::new(self.qubit_count)?);
        }
        let amp = match phase {
            Some(p) => {
                let magnitude = p.norm();
                if magnitude <= NORM_EPSILON {
                    ONE_C
                } else {
                    p / magnitude
                }
            }
            None => self.nonunitary_phase(),
        };

        let state = self.state.as_mut().expect("store allocated above");
        state.clear();
        state.write(perm, amp);
        self.running_norm = Some(1.0);
        Ok(())
    }

    /// Read one amplitude. Does not normalize.
    pub fn get_amplitude(&self, perm: usize) -> Result<Complex64> {
        self.check_perm(perm)?;
        Ok(match &self.state {
            Some(state) => state.read(perm),
            None => ZERO_C,
        })
    }

    /// Write one amplitude, adjusting a known running norm by the change.
    /// Does not normalize.
    pub fn set_amplitude(&mut self, perm: usize, amp: Complex64) -> Result<()> {
        self.check_perm(perm)?;

        if self.state.is_none() {
            if is_norm_zero(amp) {
                return Ok(());
            }
            let mut store = StateVector::new(self.qubit_count)?;
            store.clear();
            self.state = Some(store);
        }

        let state = self.state.as_mut().expect("store present");
        if let Some(norm) = self.running_norm.as_mut() {
            *norm += amp.norm_sqr() - state.read(perm).norm_sqr();
        }
        state.write(perm, amp);
        Ok(())
    }

    /// Copy the full amplitude vector out, normalizing first when
    /// configured to.
    pub fn get_quantum_state(&mut self, out: &mut [Complex64]) -> Result<()> {
        if out.len() != self.max_q_power {
            return Err(SimError::ShapeMismatch {
                expected: self.max_q_power,
                actual: out.len(),
            });
        }

        if self.state.is_none() {
            out.fill(ZERO_C);
            return Ok(());
        }

        if self.do_normalize {
            self.normalize_state(None, None, 0.0)?;
        }
        if let Some(state) = &self.state {
            state.copy_out(out, 0);
        } else {
            out.fill(ZERO_C);
        }
        Ok(())
    }

    /// The full amplitude vector as a fresh `Vec`.
    pub fn quantum_state(&mut self) -> Result<Vec<Complex64>> {
        let mut out = vec![ZERO_C; self.max_q_power];
        self.get_quantum_state(&mut out)?;
        Ok(out)
    }

    /// Replace the full amplitude vector; the running norm becomes stale.
    pub fn set_quantum_state(&mut self, input: &[Complex64]) -> Result<()> {
        if input.len() != self.max_q_power {
            return Err(SimError::ShapeMismatch {
                expected: self.max_q_power,
                actual: input.len(),
            });
        }

        if self.state.is_none() {
            self.state = Some(StateVector::new(self.qubit_count)?);
        }
        self.state.as_mut().expect("store present").copy_in(input, 0);
        self.running_norm = None;
        Ok(())
    }

    /// |aᵢ|² for every basis state, normalizing first when configured to.
    pub fn get_probs(&mut self, out: &mut [f64]) -> Result<()> {
        if out.len() != self.max_q_power {
            return Err(SimError::ShapeMismatch {
                expected: self.max_q_power,
                actual: out.len(),
            });
        }

        if self.state.is_none() {
            out.fill(0.0);
            return Ok(());
        }

        if self.do_normalize {
            self.normalize_state(None, None, 0.0)?;
        }
        if let Some(state) = &self.state {
            state.get_probs(out);
        } else {
            out.fill(0.0);
        }
        Ok(())
    }

    /// The universal gate kernel.
    ///
    /// Sweeps the compacted index space (all bits in `qpows_sorted` held
    /// at zero), reads the amplitude pair at `lcv + offset1` and
    /// `lcv + offset2`, applies the 2×2, and writes back. Diagonal and
    /// anti-diagonal matrices take reduced-arithmetic paths. With
    /// `do_calc_norm`, per-worker partial norms are reduced into the
    /// running norm after the sweep, and components below the floor are
    /// zeroed when a positive threshold is in effect; `nrm_thresh` of
    /// `None` selects the engine's amplitude floor.
    pub fn apply_2x2(
        &mut self,
        offset1: usize,
        offset2: usize,
        mtrx: &Matrix2x2,
        qpows_sorted: &[usize],
        do_calc_norm: bool,
        nrm_thresh: Option<f64>,
    ) -> Result<()> {
        self.check_perm(offset1)?;
        self.check_perm(offset2)?;
        for (i, &power) in qpows_sorted.iter().enumerate() {
            self.check_perm(power)?;
            if i > 0 && qpows_sorted[i - 1] == power {
                return Err(SimError::DuplicateQubit(power.trailing_zeros() as usize));
            }
        }

        if self.state.is_none() {
            return Ok(());
        }

        let bit_count = qpows_sorted.len();
        let known_positive = matches!(self.running_norm, Some(n) if n > 0.0);
        let do_apply_norm = self.do_normalize && bit_count == 1 && known_positive;
        let do_calc_norm = do_calc_norm && (do_apply_norm || !known_positive);
        let nrm = if do_apply_norm {
            1.0 / self.running_norm.expect("known positive").sqrt()
        } else {
            1.0
        };
        let norm_thresh = nrm_thresh.unwrap_or(self.amplitude_floor);

        let m = *mtrx;
        let shape = KernelShape::of(&m);
        let max_q_power = self.max_q_power;
        let amps = self.state.as_mut().expect("store present").shared();

        if !do_calc_norm {
            parallel::par_for_mask(max_q_power, qpows_sorted, |lcv| unsafe {
                let (y0, y1) = (amps.read(lcv + offset1), amps.read(lcv + offset2));
                let (out0, out1) = shape.step(&m, y0, y1);
                amps.write(lcv + offset1, out0);
                amps.write(lcv + offset2, out1);
            });

            if do_apply_norm {
                self.running_norm = Some(1.0);
            }
            return Ok(());
        }

        let total = if norm_thresh > 0.0 {
            parallel::par_for_mask_sum(max_q_power, qpows_sorted, |lcv| unsafe {
                let (y0, y1) = (amps.read(lcv + offset1), amps.read(lcv + offset2));
                let (mut out0, mut out1) = shape.step(&m, y0, y1);
                out0 *= nrm;
                out1 *= nrm;

                let mut local = 0.0;
                let n0 = out0.norm_sqr();
                if n0 < norm_thresh {
                    out0 = ZERO_C;
                } else {
                    local += n0;
                }
                let n1 = out1.norm_sqr();
                if n1 < norm_thresh {
                    out1 = ZERO_C;
                } else {
                    local += n1;
                }

                amps.write(lcv + offset1, out0);
                amps.write(lcv + offset2, out1);
                local
            })
        } else {
            parallel::par_for_mask_sum(max_q_power, qpows_sorted, |lcv| unsafe {
                let (y0, y1) = (amps.read(lcv + offset1), amps.read(lcv + offset2));
                let (mut out0, mut out1) = shape.step(&m, y0, y1);
                out0 *= nrm;
                out1 *= nrm;
                amps.write(lcv + offset1, out0);
                amps.write(lcv + offset2, out1);
                out0.norm_sqr() + out1.norm_sqr()
            })
        };

        self.running_norm = Some(total);
        if total <= NORM_EPSILON {
            self.zero_amplitudes();
        }
        Ok(())
    }

    /// Arbitrary 2×2 on `target`. Identity matrices are skipped; norm
    /// recalculation happens only for matrices that can change per-pair
    /// norms.
    pub fn mtrx(&mut self, mtrx: &Matrix2x2, target: usize) -> Result<()> {
        self.check_qubit(target)?;
        if is_identity_2x2(mtrx) {
            return Ok(());
        }

        let target_power = 1usize << target;
        let do_calc_norm = self.do_normalize && !(is_phase_2x2(mtrx) || is_invert_2x2(mtrx));
        self.apply_2x2(0, target_power, mtrx, &[target_power], do_calc_norm, None)
    }

    /// Diagonal gate diag(top_left, bottom_right) on `target`.
    pub fn phase(
        &mut self,
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_qubit(target)?;
        if (self.rand_global_phase || is_norm_zero(ONE_C - top_left))
            && is_norm_zero(top_left - bottom_right)
        {
            // A pure global phase, which the engine is free to ignore.
            return Ok(());
        }

        let m: Matrix2x2 = [top_left, ZERO_C, ZERO_C, bottom_right];
        let target_power = 1usize << target;
        self.apply_2x2(0, target_power, &m, &[target_power], false, None)
    }

    /// Anti-diagonal gate on `target`: |0⟩ ↦ bottom_left·|1⟩,
    /// |1⟩ ↦ top_right·|0⟩.
    pub fn invert(
        &mut self,
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.check_qubit(target)?;
        let m: Matrix2x2 = [ZERO_C, top_right, bottom_left, ZERO_C];
        let target_power = 1usize << target;
        self.apply_2x2(0, target_power, &m, &[target_power], false, None)
    }

    /// 2×2 on `target`, applied when every control is |1⟩.
    pub fn mc_mtrx(&mut self, controls: &[usize], mtrx: &Matrix2x2, target: usize) -> Result<()> {
        if controls.is_empty() {
            return self.mtrx(mtrx, target);
        }
        self.check_qubit(target)?;
        self.check_controls(controls, target)?;

        let target_power = 1usize << target;
        let mut control_mask = 0usize;
        let mut qpows: SmallVec<[usize; 4]> = SmallVec::with_capacity(controls.len() + 1);
        for &c in controls {
            let power = 1usize << c;
            control_mask |= power;
            qpows.push(power);
        }
        qpows.push(target_power);
        qpows.sort_unstable();

        self.apply_2x2(
            control_mask,
            control_mask | target_power,
            mtrx,
            &qpows,
            false,
            None,
        )
    }

    /// 2×2 on `target`, applied when every control is |0⟩.
    pub fn mac_mtrx(&mut self, controls: &[usize], mtrx: &Matrix2x2, target: usize) -> Result<()> {
        if controls.is_empty() {
            return self.mtrx(mtrx, target);
        }
        self.check_qubit(target)?;
        self.check_controls(controls, target)?;

        let target_power = 1usize << target;
        let mut qpows: SmallVec<[usize; 4]> = SmallVec::with_capacity(controls.len() + 1);
        for &c in controls {
            qpows.push(1usize << c);
        }
        qpows.push(target_power);
        qpows.sort_unstable();

        self.apply_2x2(0, target_power, mtrx, &qpows, false, None)
    }

    /// Pauli-X on `target`.
    pub fn x(&mut self, target: usize) -> Result<()> {
        self.invert(ONE_C, ONE_C, target)
    }

    /// Exchange two qubits in one anti-diagonal sweep.
    pub fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        if q1 == q2 {
            return self.check_qubit(q1);
        }
        self.check_qubit(q1)?;
        self.check_qubit(q2)?;

        let p1 = 1usize << q1;
        let p2 = 1usize << q2;
        let qpows = if p1 < p2 { [p1, p2] } else { [p2, p1] };
        self.apply_2x2(p1, p2, &PAULI_X, &qpows, false, None)
    }

    /// Bit-flip every qubit set in `mask`.
    pub fn x_mask(&mut self, mask: usize) -> Result<()> {
        self.check_perm(mask)?;
        if self.state.is_none() || mask == 0 {
            return Ok(());
        }
        if mask.is_power_of_two() {
            return self.x(mask.trailing_zeros() as usize);
        }

        let max_q_power = self.max_q_power;
        let other_mask = (max_q_power - 1) ^ mask;
        let amps = self.state.as_mut().expect("store present").shared();

        parallel::par_for(max_q_power, |lcv| unsafe {
            let other_res = lcv & other_mask;
            let set_int = lcv & mask;
            let reset_int = set_int ^ mask;

            // Each pair is visited twice; act only from the higher member.
            if set_int < reset_int {
                return;
            }

            let set_int = set_int | other_res;
            let reset_int = reset_int | other_res;

            let y0 = amps.read(reset_int);
            amps.write(reset_int, amps.read(set_int));
            amps.write(set_int, y0);
        });

        Ok(())
    }

    /// Phase e^{±iθ/2} by the parity of the bits under `mask`.
    pub fn phase_parity(&mut self, radians: f64, mask: usize) -> Result<()> {
        self.check_perm(mask)?;
        if self.state.is_none() || mask == 0 {
            return Ok(());
        }
        if mask.is_power_of_two() {
            let phase_fac = Complex64::from_polar(1.0, radians / 2.0);
            return self.phase(phase_fac.conj(), phase_fac, mask.trailing_zeros() as usize);
        }

        let max_q_power = self.max_q_power;
        let phase_fac = Complex64::from_polar(1.0, radians / 2.0);
        let phase_fac_adj = phase_fac.conj();
        let amps = self.state.as_mut().expect("store present").shared();

        parallel::par_for(max_q_power, |lcv| unsafe {
            let odd = (lcv & mask).count_ones() & 1 == 1;
            let fac = if odd { phase_fac } else { phase_fac_adj };
            amps.write(lcv, fac * amps.read(lcv));
        });

        Ok(())
    }

    /// Phase e^{−iπ·k/2^{n−1}} where k = popcount(index & mask) mod 2^n.
    pub fn phase_root_n_mask(&mut self, n: usize, mask: usize) -> Result<()> {
        self.check_perm(mask)?;
        if self.state.is_none() || n == 0 || mask == 0 {
            return Ok(());
        }

        let radians = -std::f64::consts::PI / (1usize << (n - 1)) as f64;

        if mask.is_power_of_two() {
            return self.phase(
                ONE_C,
                Complex64::from_polar(1.0, radians),
                mask.trailing_zeros() as usize,
            );
        }

        let max_q_power = self.max_q_power;
        let n_phases = 1usize << n;
        let amps = self.state.as_mut().expect("store present").shared();

        parallel::par_for(max_q_power, |lcv| unsafe {
            let steps = ((lcv & mask).count_ones() as usize) % n_phases;
            if steps != 0 {
                let fac = Complex64::from_polar(1.0, radians * steps as f64);
                amps.write(lcv, fac * amps.read(lcv));
            }
        });

        Ok(())
    }

    /// Phase flip (Z) on every qubit set in `mask`.
    pub fn z_mask(&mut self, mask: usize) -> Result<()> {
        self.phase_root_n_mask(1, mask)
    }

    /// Phase e^{±iθ} by the parity of the bits under `mask`.
    pub fn uniform_parity_rz(&mut self, mask: usize, angle: f64) -> Result<()> {
        self.check_perm(mask)?;
        if self.state.is_none() {
            return Ok(());
        }

        let max_q_power = self.max_q_power;
        let phase_fac = Complex64::from_polar(1.0, angle);
        let phase_fac_adj = phase_fac.conj();
        let amps = self.state.as_mut().expect("store present").shared();

        parallel::par_for(max_q_power, |lcv| unsafe {
            let odd = (lcv & mask).count_ones() & 1 == 1;
            let fac = if odd { phase_fac } else { phase_fac_adj };
            amps.write(lcv, fac * amps.read(lcv));
        });

        Ok(())
    }

    /// Controlled variant of [`QubitEngine::uniform_parity_rz`]: the phase
    /// applies only where every control is |1⟩.
    pub fn c_uniform_parity_rz(
        &mut self,
        controls: &[usize],
        mask: usize,
        angle: f64,
    ) -> Result<()> {
        if controls.is_empty() {
            return self.uniform_parity_rz(mask, angle);
        }
        self.check_perm(mask)?;
        for &c in controls {
            self.check_qubit(c)?;
        }
        if self.state.is_none() {
            return Ok(());
        }

        let mut control_powers: SmallVec<[usize; 4]> =
            controls.iter().map(|&c| 1usize << c).collect();
        control_powers.sort_unstable();
        let control_mask: usize = control_powers.iter().sum();

        let max_q_power = self.max_q_power;
        let phase_fac = Complex64::from_polar(1.0, angle);
        let phase_fac_adj = phase_fac.conj();
        let amps = self.state.as_mut().expect("store present").shared();

        parallel::par_for_mask(max_q_power, &control_powers, |lcv| unsafe {
            let odd = (lcv & mask).count_ones() & 1 == 1;
            let fac = if odd { phase_fac } else { phase_fac_adj };
            let index = control_mask | lcv;
            amps.write(index, fac * amps.read(index));
        });

        Ok(())
    }

    /// Apply one of 2^|controls| 2×2 matrices to `target`, selected by the
    /// control bit-pattern.
    ///
    /// `matrices` is the dense table, 4 entries per pattern. `skip_powers`
    /// and `skip_value_mask` let a caller hold a subset of the pattern bits
    /// at fixed values: the selected pattern index is expanded around the
    /// sorted skip powers and OR-ed with the mask before lookup. With no
    /// controls, the single matrix at `skip_value_mask` is applied directly.
    pub fn uniformly_controlled_single_bit(
        &mut self,
        controls: &[usize],
        target: usize,
        matrices: &[Complex64],
        skip_powers: &[usize],
        skip_value_mask: usize,
    ) -> Result<()> {
        if controls.is_empty() {
            let base = skip_value_mask * 4;
            let m: Matrix2x2 = [
                matrices[base],
                matrices[base + 1],
                matrices[base + 2],
                matrices[base + 3],
            ];
            return self.mtrx(&m, target);
        }

        self.check_qubit(target)?;
        self.check_controls(controls, target)?;
        if self.state.is_none() {
            return Ok(());
        }

        let target_power = 1usize << target;
        let q_powers: SmallVec<[usize; 4]> = controls.iter().map(|&c| 1usize << c).collect();

        let known_positive = matches!(self.running_norm, Some(n) if n > 0.0);
        let nrm = if known_positive {
            1.0 / self.running_norm.expect("known positive").sqrt()
        } else {
            1.0
        };
        let apply_nrm = self.do_normalize && (1.0 - nrm).abs() > NORM_EPSILON;

        let max_q_power = self.max_q_power;
        let amps = self.state.as_mut().expect("store present").shared();

        parallel::par_for_skip(max_q_power, target_power, 1, |lcv| unsafe {
            let mut pattern = 0usize;
            for (j, &power) in q_powers.iter().enumerate() {
                if lcv & power != 0 {
                    pattern |= 1 << j;
                }
            }

            let mut index = 0usize;
            let mut high = pattern;
            for &power in skip_powers {
                let low = high & (power - 1);
                index |= low;
                high = (high ^ low) << 1;
            }
            index |= high;

            let base = (index | skip_value_mask) * 4;

            let y0 = amps.read(lcv);
            let y1 = amps.read(lcv | target_power);
            let mut out0 = matrices[base] * y0 + matrices[base + 1] * y1;
            let mut out1 = matrices[base + 2] * y0 + matrices[base + 3] * y1;
            if apply_nrm {
                out0 *= nrm;
                out1 *= nrm;
            }

            amps.write(lcv, out0);
            amps.write(lcv | target_power, out1);
        });

        if self.do_normalize {
            self.running_norm = Some(1.0);
        }
        Ok(())
    }

    /// Append `length` fresh qubits in |0⟩.
    pub fn allocate(&mut self, length: usize) -> Result<usize> {
        if length == 0 {
            return Ok(self.qubit_count);
        }
        let mut fresh = self.peer(length, 0)?;
        self.compose(&mut fresh)
    }
}

impl Clone for QubitEngine {
    fn clone(&self) -> Self {
        Self {
            qubit_count: self.qubit_count,
            max_q_power: self.max_q_power,
            state: self.state.clone(),
            running_norm: self.running_norm,
            do_normalize: self.do_normalize,
            rand_global_phase: self.rand_global_phase,
            amplitude_floor: self.amplitude_floor,
            rng: self.rng.clone(),
        }
    }
}

impl QuantumBackend for QubitEngine {
    fn qubit_count(&self) -> usize {
        self.qubit_count
    }

    fn allocate(&mut self, length: usize) -> Result<usize> {
        QubitEngine::allocate(self, length)
    }

    fn x(&mut self, target: usize) -> Result<()> {
        QubitEngine::x(self, target)
    }

    fn mtrx(&mut self, matrix: &Matrix2x2, target: usize) -> Result<()> {
        QubitEngine::mtrx(self, matrix, target)
    }

    fn mc_mtrx(&mut self, controls: &[usize], matrix: &Matrix2x2, target: usize) -> Result<()> {
        QubitEngine::mc_mtrx(self, controls, matrix, target)
    }

    fn mac_mtrx(&mut self, controls: &[usize], matrix: &Matrix2x2, target: usize) -> Result<()> {
        QubitEngine::mac_mtrx(self, controls, matrix, target)
    }

    fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        QubitEngine::swap(self, q1, q2)
    }

    fn uniformly_controlled_single_bit(
        &mut self,
        controls: &[usize],
        target: usize,
        matrices: &[Complex64],
    ) -> Result<()> {
        QubitEngine::uniformly_controlled_single_bit(self, controls, target, matrices, &[], 0)
    }
}
