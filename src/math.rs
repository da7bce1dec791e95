use itertools::izip;
use multiversion::multiversion;
use rand_distr::StandardNormal;

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn vector_dot(a: &[f64], b: &[f64]) -> f64 {
    assert!(a.len() == b.len());

    let head_length = a.len() - a.len() % 4;
    let (x, x_tail) = a.split_at(head_length);
    let (y, y_tail) = b.split_at(head_length);

    // Four independent accumulators keep the loop vectorizable.
    let mut acc = [0f64; 4];
    for (x, y) in x.chunks_exact(4).zip(y.chunks_exact(4)) {
        acc[0] += x[0] * y[0];
        acc[1] += x[1] * y[1];
        acc[2] += x[2] * y[2];
        acc[3] += x[3] * y[3];
    }

    let mut result = (acc[0] + acc[1]) + (acc[2] + acc[3]);
    for (val1, val2) in x_tail.iter().zip(y_tail) {
        result += *val1 * *val2;
    }
    result
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn axpy(x: &[f64], y: &mut [f64], a: f64) {
    assert!(x.len() == y.len());

    izip!(x, y).for_each(|(x, y)| {
        *y += a * x;
    });
}

#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn axpy_out(x: &[f64], y: &[f64], a: f64, out: &mut [f64]) {
    let n = x.len();
    assert!(y.len() == n);
    assert!(out.len() == n);

    izip!(x, y, out).for_each(|(x, y, out)| {
        *out = a * x + y;
    });
}

#[inline]
pub(crate) fn norm_sq(a: &[f64]) -> f64 {
    vector_dot(a, a)
}

#[inline]
pub(crate) fn norm(a: &[f64]) -> f64 {
    norm_sq(a).sqrt()
}

/// `y + a * x` as a new vector.
pub(crate) fn axpy_new(x: &[f64], y: &[f64], a: f64) -> Vec<f64> {
    let mut out = vec![0f64; x.len()];
    axpy_out(x, y, a, &mut out);
    out
}

pub(crate) fn sub(a: &[f64], b: &[f64]) -> Vec<f64> {
    axpy_new(b, a, -1.)
}

/// A vector of independent standard normal draws.
pub(crate) fn standard_normal<R: rand::Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<f64> {
    (0..len).map(|_| rng.sample(StandardNormal)).collect()
}
