//! Vectorized f32 kernels.
//!
//! NEON (aarch64) and AVX2+FMA (x86_64) versions of the reductions the
//! distance metrics are built from. Falls back to scalar loops on other
//! targets or when AVX2 is unavailable at runtime. Every kernel assumes
//! `a.len() == b.len()`; callers check dimensions first.

/// Squared Euclidean distance between two f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn l2_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_l2_sq_f32(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_l2_sq_f32(a, b) };
        }
    }
    scalar_l2_sq_f32(a, b)
}

/// Dot product between two f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_dot_f32(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_dot_f32(a, b) };
        }
    }
    scalar_dot_f32(a, b)
}

/// Manhattan distance between two f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn l1_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_l1_f32(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_l1_f32(a, b) };
        }
    }
    scalar_l1_f32(a, b)
}

/// Returns `(dot(a, b), |a|², |b|²)` in one pass.
#[inline]
#[allow(unreachable_code)]
pub fn dot_and_norms_f32(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_dot_and_norms_f32(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_dot_and_norms_f32(a, b) };
        }
    }
    scalar_dot_and_norms_f32(a, b)
}

// ============================================================================
// Scalar kernels
// ============================================================================

pub(crate) fn scalar_l2_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

pub(crate) fn scalar_dot_f32(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn scalar_l1_f32(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

pub(crate) fn scalar_dot_and_norms_f32(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    (dot, norm_a, norm_b)
}

// ============================================================================
// NEON implementations (aarch64)
// ============================================================================

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

#[cfg(target_arch = "aarch64")]
unsafe fn neon_l2_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        let d0 = vsubq_f32(vld1q_f32(a_ptr.add(base)), vld1q_f32(b_ptr.add(base)));
        let d1 = vsubq_f32(vld1q_f32(a_ptr.add(base + 4)), vld1q_f32(b_ptr.add(base + 4)));
        s0 = vfmaq_f32(s0, d0, d0);
        s1 = vfmaq_f32(s1, d1, d1);
    }

    let mut sum = vaddvq_f32(vaddq_f32(s0, s1));
    for i in (chunks * 8)..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "aarch64")]
unsafe fn neon_dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        s0 = vfmaq_f32(s0, vld1q_f32(a_ptr.add(base)), vld1q_f32(b_ptr.add(base)));
        s1 = vfmaq_f32(s1, vld1q_f32(a_ptr.add(base + 4)), vld1q_f32(b_ptr.add(base + 4)));
    }

    let mut sum = vaddvq_f32(vaddq_f32(s0, s1));
    for i in (chunks * 8)..len {
        sum += *a_ptr.add(i) * *b_ptr.add(i);
    }
    sum
}

#[cfg(target_arch = "aarch64")]
unsafe fn neon_l1_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        s0 = vaddq_f32(s0, vabdq_f32(vld1q_f32(a_ptr.add(base)), vld1q_f32(b_ptr.add(base))));
        s1 = vaddq_f32(
            s1,
            vabdq_f32(vld1q_f32(a_ptr.add(base + 4)), vld1q_f32(b_ptr.add(base + 4))),
        );
    }

    let mut sum = vaddvq_f32(vaddq_f32(s0, s1));
    for i in (chunks * 8)..len {
        sum += (*a_ptr.add(i) - *b_ptr.add(i)).abs();
    }
    sum
}

#[cfg(target_arch = "aarch64")]
unsafe fn neon_dot_and_norms_f32(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut dot = vdupq_n_f32(0.0);
    let mut na = vdupq_n_f32(0.0);
    let mut nb = vdupq_n_f32(0.0);

    let chunks = len / 4;
    for i in 0..chunks {
        let base = i * 4;
        let av = vld1q_f32(a_ptr.add(base));
        let bv = vld1q_f32(b_ptr.add(base));
        dot = vfmaq_f32(dot, av, bv);
        na = vfmaq_f32(na, av, av);
        nb = vfmaq_f32(nb, bv, bv);
    }

    let mut dot = vaddvq_f32(dot);
    let mut norm_a = vaddvq_f32(na);
    let mut norm_b = vaddvq_f32(nb);
    for i in (chunks * 4)..len {
        let ai = *a_ptr.add(i);
        let bi = *b_ptr.add(i);
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }
    (dot, norm_a, norm_b)
}

// ============================================================================
// AVX2+FMA implementations (x86_64)
// ============================================================================

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Horizontal sum of 8 f32 values in a __m256 register.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn hsum_f32x8(v: __m256) -> f32 {
    let hi128 = _mm256_extractf128_ps(v, 1);
    let lo128 = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo128, hi128);
    let hi64 = _mm_movehl_ps(sum128, sum128);
    let sum64 = _mm_add_ps(sum128, hi64);
    let hi32 = _mm_shuffle_ps(sum64, sum64, 0x55);
    _mm_cvtss_f32(_mm_add_ss(sum64, hi32))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_l2_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let d0 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
        );
        let d1 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base + 8)),
            _mm256_loadu_ps(b_ptr.add(base + 8)),
        );
        s0 = _mm256_fmadd_ps(d0, d0, s0);
        s1 = _mm256_fmadd_ps(d1, d1, s1);
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));
    for i in (chunks * 16)..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_dot_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        s0 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
            s0,
        );
        s1 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(base + 8)),
            _mm256_loadu_ps(b_ptr.add(base + 8)),
            s1,
        );
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));
    for i in (chunks * 16)..len {
        sum += *a_ptr.add(i) * *b_ptr.add(i);
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_l1_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    // Clearing the sign bit is |x| for IEEE floats.
    let abs_mask = _mm256_castsi256_ps(_mm256_set1_epi32(0x7fff_ffff));
    let mut s0 = _mm256_setzero_ps();

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        let d = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
        );
        s0 = _mm256_add_ps(s0, _mm256_and_ps(d, abs_mask));
    }

    let mut sum = hsum_f32x8(s0);
    for i in (chunks * 8)..len {
        sum += (*a_ptr.add(i) - *b_ptr.add(i)).abs();
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_dot_and_norms_f32(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut dot = _mm256_setzero_ps();
    let mut na = _mm256_setzero_ps();
    let mut nb = _mm256_setzero_ps();

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        let av = _mm256_loadu_ps(a_ptr.add(base));
        let bv = _mm256_loadu_ps(b_ptr.add(base));
        dot = _mm256_fmadd_ps(av, bv, dot);
        na = _mm256_fmadd_ps(av, av, na);
        nb = _mm256_fmadd_ps(bv, bv, nb);
    }

    let mut dot = hsum_f32x8(dot);
    let mut norm_a = hsum_f32x8(na);
    let mut norm_b = hsum_f32x8(nb);
    for i in (chunks * 8)..len {
        let ai = *a_ptr.add(i);
        let bi = *b_ptr.add(i);
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }
    (dot, norm_a, norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors(dim: usize) -> (Vec<f32>, Vec<f32>) {
        let a: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.37).sin()).collect();
        let b: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.11).cos() - 0.5).collect();
        (a, b)
    }

    #[test]
    fn test_kernels_match_scalar_across_tail_lengths() {
        for dim in [1, 3, 7, 8, 15, 16, 17, 33, 128, 129] {
            let (a, b) = vectors(dim);
            let tol = 1e-3 * dim as f32;
            assert!((l2_sq_f32(&a, &b) - scalar_l2_sq_f32(&a, &b)).abs() < tol);
            assert!((dot_f32(&a, &b) - scalar_dot_f32(&a, &b)).abs() < tol);
            assert!((l1_f32(&a, &b) - scalar_l1_f32(&a, &b)).abs() < tol);
            let (d, na, nb) = dot_and_norms_f32(&a, &b);
            let (sd, sna, snb) = scalar_dot_and_norms_f32(&a, &b);
            assert!((d - sd).abs() < tol);
            assert!((na - sna).abs() < tol);
            assert!((nb - snb).abs() < tol);
        }
    }

    #[test]
    fn test_empty_slices() {
        assert_eq!(l2_sq_f32(&[], &[]), 0.0);
        assert_eq!(dot_f32(&[], &[]), 0.0);
        assert_eq!(l1_f32(&[], &[]), 0.0);
    }

    #[test]
    fn test_known_values() {
        let a = [1.0f32, 1.0, 2.0, 1.0];
        let b = [1.0f32, 2.0, 1.0, 2.0];
        assert_eq!(l2_sq_f32(&a, &b), 3.0);
        assert_eq!(l1_f32(&a, &b), 3.0);
        assert_eq!(dot_f32(&a, &b), 7.0);
    }
}
