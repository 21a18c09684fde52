//! Amplitude storage with aligned memory
//!
//! The store is a flat buffer of 2^N complex amplitudes, allocated with
//! 64-byte alignment so the hot kernels can assume SIMD-friendly layout.
//! The engine treats an *absent* store as the identically-zero vector; this
//! type is always a concrete allocation.

use num_complex::Complex64;
use qregsim_core::{Result, SimError};
use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment requirement for SIMD operations (64 bytes for AVX-512)
const SIMD_ALIGNMENT: usize = 64;

/// Flat buffer of 2^N complex amplitudes with 64-byte alignment
///
/// # Example
///
/// ```
/// use qregsim_state::StateVector;
///
/// let state = StateVector::new(2).unwrap();
/// assert_eq!(state.dimension(), 4);
/// assert_eq!(state.read(0).re, 1.0);
/// ```
pub struct StateVector {
    num_qubits: usize,
    dimension: usize,
    data: NonNull<Complex64>,
    layout: Layout,
}

impl StateVector {
    /// Allocate a store of width 2^`num_qubits`, initialized to |0…0⟩.
    ///
    /// # Errors
    /// Fails with `Allocation` when the aligned buffer cannot be allocated.
    pub fn new(num_qubits: usize) -> Result<Self> {
        let dimension = 1usize
            .checked_shl(num_qubits as u32)
            .ok_or(SimError::Capacity {
                requested: num_qubits,
                max: usize::BITS as usize - 1,
            })?;

        let size = dimension * std::mem::size_of::<Complex64>();
        let layout = Layout::from_size_align(size, SIMD_ALIGNMENT)
            .map_err(|_| SimError::Allocation { size })?;

        let data = unsafe {
            let ptr = alloc(layout) as *mut Complex64;
            if ptr.is_null() {
                return Err(SimError::Allocation { size });
            }

            std::ptr::write_bytes(ptr, 0, dimension);
            *ptr = Complex64::new(1.0, 0.0);

            NonNull::new_unchecked(ptr)
        };

        Ok(Self {
            num_qubits,
            dimension,
            data,
            layout,
        })
    }

    /// Register width in qubits
    #[inline]
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Number of amplitudes (2^num_qubits)
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Read one amplitude
    #[inline]
    pub fn read(&self, index: usize) -> Complex64 {
        debug_assert!(index < self.dimension);
        unsafe { *self.data.as_ptr().add(index) }
    }

    /// Write one amplitude
    #[inline]
    pub fn write(&mut self, index: usize, value: Complex64) {
        debug_assert!(index < self.dimension);
        unsafe { *self.data.as_ptr().add(index) = value }
    }

    /// Read a pair of amplitudes at two offsets
    #[inline]
    pub fn read2(&self, i: usize, j: usize) -> (Complex64, Complex64) {
        (self.read(i), self.read(j))
    }

    /// Write a pair of amplitudes at two offsets
    #[inline]
    pub fn write2(&mut self, i: usize, vi: Complex64, j: usize, vj: Complex64) {
        self.write(i, vi);
        self.write(j, vj);
    }

    /// Zero every amplitude.
    pub fn clear(&mut self) {
        unsafe {
            std::ptr::write_bytes(self.data.as_ptr(), 0, self.dimension);
        }
    }

    /// Copy amplitudes in from a slice starting at `offset`.
    pub fn copy_in(&mut self, source: &[Complex64], offset: usize) {
        debug_assert!(offset + source.len() <= self.dimension);
        self.amplitudes_mut()[offset..offset + source.len()].copy_from_slice(source);
    }

    /// Copy amplitudes out to a slice starting at `offset`.
    pub fn copy_out(&self, dest: &mut [Complex64], offset: usize) {
        debug_assert!(offset + dest.len() <= self.dimension);
        dest.copy_from_slice(&self.amplitudes()[offset..offset + dest.len()]);
    }

    /// Copy a region from another store.
    pub fn copy_from(
        &mut self,
        other: &StateVector,
        src_offset: usize,
        dst_offset: usize,
        length: usize,
    ) {
        debug_assert!(src_offset + length <= other.dimension);
        debug_assert!(dst_offset + length <= self.dimension);
        self.amplitudes_mut()[dst_offset..dst_offset + length]
            .copy_from_slice(&other.amplitudes()[src_offset..src_offset + length]);
    }

    /// Swap this store's upper half with `other`'s lower half.
    ///
    /// Both stores must have equal width; the caller checks.
    pub fn shuffle(&mut self, other: &mut StateVector) {
        debug_assert_eq!(self.dimension, other.dimension);
        let half = self.dimension / 2;
        let upper = &mut self.amplitudes_mut()[half..];
        let lower = &mut other.amplitudes_mut()[..half];
        upper.swap_with_slice(lower);
    }

    /// |aᵢ|² for every amplitude, into `out`.
    pub fn get_probs(&self, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.dimension);
        for (prob, amp) in out.iter_mut().zip(self.amplitudes()) {
            *prob = amp.norm_sqr();
        }
    }

    /// Amplitudes as a slice
    #[inline]
    pub fn amplitudes(&self) -> &[Complex64] {
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.dimension) }
    }

    /// Amplitudes as a mutable slice
    #[inline]
    pub fn amplitudes_mut(&mut self) -> &mut [Complex64] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.dimension) }
    }

    /// Raw pointer for kernel use
    #[inline]
    pub fn as_ptr(&self) -> *const Complex64 {
        self.data.as_ptr()
    }

    /// Mutable raw pointer for kernel use
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut Complex64 {
        self.data.as_ptr()
    }

    /// Shared handle the parallel kernels write through.
    ///
    /// Kernels partition the index space into disjoint (lcv, lcv|power)
    /// pairs, so concurrent writes never alias.
    #[inline]
    pub(crate) fn shared(&mut self) -> SharedAmps {
        SharedAmps {
            ptr: self.data.as_ptr(),
            #[cfg(debug_assertions)]
            len: self.dimension,
        }
    }

    /// True when the buffer start satisfies the SIMD alignment.
    #[inline]
    pub fn is_simd_aligned(&self) -> bool {
        (self.data.as_ptr() as usize) % SIMD_ALIGNMENT == 0
    }
}

impl Drop for StateVector {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr() as *mut u8, self.layout);
        }
    }
}

impl Clone for StateVector {
    fn clone(&self) -> Self {
        let mut copy = StateVector::new(self.num_qubits).expect("allocation for clone");
        copy.copy_in(self.amplitudes(), 0);
        copy
    }
}

// Safety: StateVector owns its buffer and hands out aliasing access only
// through SharedAmps, whose users write disjoint regions.
unsafe impl Send for StateVector {}
unsafe impl Sync for StateVector {}

/// Raw shared view over an amplitude buffer for the parallel kernels
#[derive(Clone, Copy)]
pub(crate) struct SharedAmps {
    ptr: *mut Complex64,
    #[cfg(debug_assertions)]
    len: usize,
}

impl SharedAmps {
    /// # Safety
    /// `index` must be in bounds.
    #[inline]
    pub unsafe fn read(&self, index: usize) -> Complex64 {
        #[cfg(debug_assertions)]
        debug_assert!(index < self.len);
        *self.ptr.add(index)
    }

    /// # Safety
    /// `index` must be in bounds, and no other worker may touch it during
    /// the sweep.
    #[inline]
    pub unsafe fn write(&self, index: usize, value: Complex64) {
        #[cfg(debug_assertions)]
        debug_assert!(index < self.len);
        *self.ptr.add(index) = value;
    }
}

// Safety: disjointness across workers is guaranteed by the loop partition.
unsafe impl Send for SharedAmps {}
unsafe impl Sync for SharedAmps {}
