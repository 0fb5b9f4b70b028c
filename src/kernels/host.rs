//! Host kernel implementations.
//!
//! They serve both as host baselines in the performance reports and as reference results for
//! the device kernels. The parallel implementations rely on the [`rayon`][1] crate.
//!
//! [1]: https://crates.io/crates/rayon

use rayon::prelude::*;

use crate::utils::HarpFloat;

// Sequential midpoint-rule integration of `4 / (1 + x^2)`, seeded with `pi_init` once.
pub fn pi_reduce<T: HarpFloat>(iend: usize, dx: T, pi_init: T) -> T {
    let half = T::from_f64(0.5);
    let mut pi = pi_init;
    for i in 0..iend {
        let x = (T::from_usize(i) + half) * dx;
        pi += dx / (T::one() + x * x);
    }
    T::from_f64(4.0) * pi
}

// Parallel implementation of the π reduction (using `rayon`'s parallel iterators).
pub fn par_pi_reduce<T: HarpFloat>(iend: usize, dx: T, pi_init: T) -> T {
    let half = T::from_f64(0.5);
    let sum = (0..iend)
        .into_par_iter()
        .map(|i| {
            let x = (T::from_usize(i) + half) * dx;
            dx / (T::one() + x * x)
        })
        .reduce(T::zero, |a, b| a + b);
    T::from_f64(4.0) * (pi_init + sum)
}

// Naive in-place Floyd-Warshall over a row-major `n x n` matrix.
pub fn floyd_warshall<T: HarpFloat>(n: usize, m: &mut [T]) {
    for k in 0..n {
        for i in 0..n {
            for j in 0..n {
                let direct = m[j + i * n];
                let through_k = m[k + i * n] + m[j + k * n];
                m[j + i * n] = if direct < through_k { direct } else { through_k };
            }
        }
    }
}

// Parallel Floyd-Warshall: rows are relaxed concurrently for each `k`, against a copy of row `k`.
pub fn par_floyd_warshall<T: HarpFloat>(n: usize, m: &mut [T]) {
    for k in 0..n {
        let row_k = m[k * n..(k + 1) * n].to_vec();
        m.par_chunks_exact_mut(n).for_each(|row| {
            let ik = row[k];
            row.iter_mut().zip(&row_k).for_each(|(ij, kj)| {
                let through_k = ik + *kj;
                *ij = if *ij < through_k { *ij } else { through_k };
            });
        });
    }
}
