//! Spectral distance metrics: forward scalar sums and per-bin gradients.
//!
//! Every function operates on flattened per-frame half spectra (frame
//! count times stored bins). Forward functions return the raw error sum in
//! `f64`; the caller divides by the element count for the mean and applies
//! the term weight. Gradient functions write one complex bin per input
//! bin in the Wirtinger layout `dL/dRe + i * dL/dIm`, already multiplied
//! by the caller's `scale` (weight over element count).
//!
//! Bins whose squared magnitude underflows [`MAG2_FLOOR`] are treated as
//! silent: their gradient is zero and, for the phase metric, their error
//! contribution is dropped too, since the phase of a silent bin is
//! meaningless. This recovers numerical singularities locally instead of
//! letting NaN/Inf propagate into the composite loss.

use num_complex::Complex32;

use crate::config::AmplitudeScale;

/// Squared-magnitude floor below which a bin counts as silent.
pub const MAG2_FLOOR: f32 = 1e-20;

/// Spectral-amplitude distance: `(|S| - |T|)^2` per bin, or the squared
/// log-magnitude difference on the log scale.
pub fn amplitude_error(src: &[Complex32], tgt: &[Complex32], scale: AmplitudeScale) -> f64 {
    debug_assert_eq!(src.len(), tgt.len());
    let mut acc = 0.0f64;
    match scale {
        AmplitudeScale::Linear => {
            for (s, t) in src.iter().zip(tgt) {
                let d = (s.norm() - t.norm()) as f64;
                acc += d * d;
            }
        }
        AmplitudeScale::Log => {
            for (s, t) in src.iter().zip(tgt) {
                let ms = s.norm_sqr().max(MAG2_FLOOR) as f64;
                let mt = t.norm_sqr().max(MAG2_FLOOR) as f64;
                let d = 0.5 * (ms.ln() - mt.ln());
                acc += d * d;
            }
        }
    }
    acc
}

/// Gradient of [`amplitude_error`] with respect to the source bins.
pub fn amplitude_grad(
    src: &[Complex32],
    tgt: &[Complex32],
    scale_kind: AmplitudeScale,
    scale: f32,
    grad: &mut [Complex32],
) {
    debug_assert_eq!(src.len(), tgt.len());
    debug_assert_eq!(src.len(), grad.len());
    for ((s, t), g) in src.iter().zip(tgt).zip(grad.iter_mut()) {
        let m2 = s.norm_sqr();
        if m2 <= MAG2_FLOOR {
            *g = Complex32::new(0.0, 0.0);
            continue;
        }
        let c = match scale_kind {
            AmplitudeScale::Linear => {
                let ms = m2.sqrt();
                scale * 2.0 * (ms - t.norm()) / ms
            }
            AmplitudeScale::Log => {
                let mt = t.norm_sqr().max(MAG2_FLOOR);
                let d = 0.5 * (m2.ln() - mt.ln());
                scale * 2.0 * d / m2
            }
        };
        *g = Complex32::new(c * s.re, c * s.im);
    }
}

/// Phase distance: `1 - cos(phase(S) - phase(T))` per bin, a bounded
/// differentiable proxy for angular distance.
pub fn phase_error(src: &[Complex32], tgt: &[Complex32]) -> f64 {
    debug_assert_eq!(src.len(), tgt.len());
    let mut acc = 0.0f64;
    for (s, t) in src.iter().zip(tgt) {
        if s.norm_sqr() <= MAG2_FLOOR || t.norm_sqr() <= MAG2_FLOOR {
            continue;
        }
        let d = (s.im.atan2(s.re) - t.im.atan2(t.re)) as f64;
        acc += 1.0 - d.cos();
    }
    acc
}

/// Gradient of [`phase_error`] with respect to the source bins, via the
/// chain rule through `atan2`.
pub fn phase_grad(src: &[Complex32], tgt: &[Complex32], scale: f32, grad: &mut [Complex32]) {
    debug_assert_eq!(src.len(), tgt.len());
    debug_assert_eq!(src.len(), grad.len());
    for ((s, t), g) in src.iter().zip(tgt).zip(grad.iter_mut()) {
        let m2 = s.norm_sqr();
        if m2 <= MAG2_FLOOR || t.norm_sqr() <= MAG2_FLOOR {
            *g = Complex32::new(0.0, 0.0);
            continue;
        }
        let d = s.im.atan2(s.re) - t.im.atan2(t.re);
        let c = scale * d.sin() / m2;
        *g = Complex32::new(-c * s.im, c * s.re);
    }
}

/// Complex-residual-spectrum distance: `|D|^2` per bin of the transform of
/// the time-domain difference signal.
pub fn residual_error(diff: &[Complex32]) -> f64 {
    diff.iter().map(|d| d.norm_sqr() as f64).sum()
}

/// Gradient of [`residual_error`]: the error is a plain quadratic in the
/// difference spectrum, so the gradient is `2 * D`.
pub fn residual_grad(diff: &[Complex32], scale: f32, grad: &mut [Complex32]) {
    debug_assert_eq!(diff.len(), grad.len());
    for (d, g) in diff.iter().zip(grad.iter_mut()) {
        *g = Complex32::new(2.0 * scale * d.re, 2.0 * scale * d.im);
    }
}
