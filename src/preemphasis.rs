//! First-order pre-emphasis filter, its exact inverse, and its exact
//! adjoint.
//!
//! Pre-emphasis flattens the spectral tilt of speech-like signals before
//! analysis: `y[t] = x[t] - alpha * x[t-1]`, `y[0] = x[0]`. The filter is
//! applied identically to the generated and target waveforms, so its
//! adjoint sits at the very end of the backward chain and must be exact —
//! every error term's gradient passes through it.

/// Fixed pre-emphasis coefficient.
pub const PRE_EMPHASIS_ALPHA: f32 = 0.97;

/// In-place pre-emphasis: `y[t] = x[t] - alpha * x[t-1]`.
pub fn pre_emphasis(signal: &mut [f32]) {
    for t in (1..signal.len()).rev() {
        signal[t] -= PRE_EMPHASIS_ALPHA * signal[t - 1];
    }
}

/// Exact inverse of [`pre_emphasis`] (de-emphasis).
pub fn de_emphasis(signal: &mut [f32]) {
    for t in 1..signal.len() {
        let prev = signal[t - 1];
        signal[t] += PRE_EMPHASIS_ALPHA * prev;
    }
}

/// In-place adjoint of [`pre_emphasis`].
///
/// The filter is linear and time-invariant, so the adjoint is its
/// transpose: `gx[t] = gy[t] - alpha * gy[t+1]`, with the final sample
/// receiving only `gy[T-1]`.
pub fn pre_emphasis_adjoint(grad: &mut [f32]) {
    let n = grad.len();
    if n < 2 {
        return;
    }
    for t in 0..n - 1 {
        grad[t] -= PRE_EMPHASIS_ALPHA * grad[t + 1];
    }
}
