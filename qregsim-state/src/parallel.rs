//! Data-parallel loop primitives for the amplitude kernels
//!
//! Every engine kernel is a sweep over (a compacted slice of) the 2^N index
//! space. The primitives here partition that space into contiguous
//! per-worker chunks on the rayon pool, with two indexing transforms on top:
//!
//! - *skip*: a contiguous block of bits held at zero, so the sweep visits
//!   only indices where a register slice is clear;
//! - *mask*: a sorted list of single-bit powers held at zero, with the
//!   compact counter expanded around them low-bits-first.
//!
//! The `_sum` variants give each worker a private accumulator and reduce
//! the partials serially after the sweep, which is how the kernels collect
//! running norms without shared mutable state.

use num_complex::Complex64;
use rayon::prelude::*;

/// Number of loop iterations below which a sweep runs inline.
const PARALLEL_THRESHOLD: usize = 1 << 12;

/// Number of parallel workers available to the kernels.
#[inline]
pub fn concurrency_level() -> usize {
    rayon::current_num_threads().max(1)
}

#[inline]
fn chunked_sum<F>(count: usize, f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync,
{
    if count < PARALLEL_THRESHOLD {
        return (0..count).map(f).sum();
    }

    let workers = concurrency_level();
    let chunk = (count + workers - 1) / workers;
    let partials: Vec<f64> = (0..workers)
        .into_par_iter()
        .map(|worker| {
            let start = worker * chunk;
            let end = count.min(start + chunk);
            let mut local = 0.0;
            for i in start..end {
                local += f(i);
            }
            local
        })
        .collect();

    partials.into_iter().sum()
}

#[inline]
fn chunked_for<F>(count: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    if count < PARALLEL_THRESHOLD {
        for i in 0..count {
            f(i);
        }
        return;
    }

    let workers = concurrency_level();
    let chunk = (count + workers - 1) / workers;
    (0..workers).into_par_iter().for_each(|worker| {
        let start = worker * chunk;
        let end = count.min(start + chunk);
        for i in start..end {
            f(i);
        }
    });
}

/// Call `f(lcv)` for every `lcv` in `[0, count)`.
#[inline]
pub fn par_for<F>(count: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    chunked_for(count, f);
}

/// Sum `f(lcv)` over `[0, count)` with per-worker partials.
#[inline]
pub fn par_for_sum<F>(count: usize, f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync,
{
    chunked_sum(count, f)
}

/// Expand a compact counter around a block of `skip_width` zeroed bits
/// starting at `skip_power`.
#[inline]
pub fn expand_skip(compact: usize, skip_power: usize, skip_width: usize) -> usize {
    let low_mask = skip_power - 1;
    let low = compact & low_mask;
    low | ((compact ^ low) << skip_width)
}

/// Call `f` over all indices of a `max_power`-wide space with a
/// `skip_width`-bit block (starting at bit `skip_power`) held at zero.
#[inline]
pub fn par_for_skip<F>(max_power: usize, skip_power: usize, skip_width: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    let count = max_power >> skip_width;
    chunked_for(count, |lcv| f(expand_skip(lcv, skip_power, skip_width)));
}

/// Summing variant of [`par_for_skip`].
#[inline]
pub fn par_for_skip_sum<F>(max_power: usize, skip_power: usize, skip_width: usize, f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync,
{
    let count = max_power >> skip_width;
    chunked_sum(count, |lcv| f(expand_skip(lcv, skip_power, skip_width)))
}

/// Expand a compact counter around the sorted single-bit `skip_powers`,
/// low bits first.
#[inline]
pub fn expand_masked(compact: usize, skip_powers: &[usize]) -> usize {
    let mut index = 0usize;
    let mut high = compact;
    for &power in skip_powers {
        let low = high & (power - 1);
        index |= low;
        high = (high ^ low) << 1;
    }
    index | high
}

/// Call `f` over all indices of a `max_power`-wide space with each of the
/// sorted `skip_powers` bits held at zero.
#[inline]
pub fn par_for_mask<F>(max_power: usize, skip_powers: &[usize], f: F)
where
    F: Fn(usize) + Sync,
{
    let count = max_power >> skip_powers.len();
    chunked_for(count, |lcv| f(expand_masked(lcv, skip_powers)));
}

/// Summing variant of [`par_for_mask`].
#[inline]
pub fn par_for_mask_sum<F>(max_power: usize, skip_powers: &[usize], f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync,
{
    let count = max_power >> skip_powers.len();
    chunked_sum(count, |lcv| f(expand_masked(lcv, skip_powers)))
}

/// Parallel Σ|aᵢ|², excluding components below `norm_thresh` when the
/// threshold is positive.
pub fn par_norm(amplitudes: &[Complex64], norm_thresh: f64) -> f64 {
    if norm_thresh <= 0.0 {
        amplitudes
            .par_iter()
            .with_min_len(PARALLEL_THRESHOLD)
            .map(|amp| amp.norm_sqr())
            .sum()
    } else {
        amplitudes
            .par_iter()
            .with_min_len(PARALLEL_THRESHOLD)
            .map(|amp| {
                let nrm = amp.norm_sqr();
                if nrm < norm_thresh {
                    0.0
                } else {
                    nrm
                }
            })
            .sum()
    }
}
