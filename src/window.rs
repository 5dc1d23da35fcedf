//! Frame extraction, window functions, and the overlap-add adjoint.
//!
//! A waveform is sliced into `frame_count` overlapping frames of
//! `window.len()` samples spaced `frame_shift` apart, each multiplied
//! element-wise by the window. The adjoint windows a per-frame gradient
//! (the window is self-adjoint under element-wise multiplication) and
//! overlap-adds it back at the frame offsets, summing contributions from
//! overlapping frames.

use itertools::izip;

use crate::config::WindowKind;

/// Number of complete frames of `frame_length` samples spaced
/// `frame_shift` apart that fit in a signal of `len` samples.
///
/// Zero when the signal is shorter than one frame.
pub fn frame_count(len: usize, frame_length: usize, frame_shift: usize) -> usize {
    if len < frame_length {
        0
    } else {
        (len - frame_length) / frame_shift + 1
    }
}

/// Sampled window of the given kind, periodic form.
pub fn window_samples(kind: WindowKind, len: usize) -> Vec<f32> {
    use std::f64::consts::PI;
    (0..len)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / len as f64;
            let w = match kind {
                WindowKind::Rectangular => 1.0,
                WindowKind::Hann => 0.5 - 0.5 * phase.cos(),
                WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
                WindowKind::Blackman => 0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos(),
            };
            w as f32
        })
        .collect()
}

/// Slice `signal` into windowed frames.
///
/// `framed` is row-major with `row_len` columns per frame; columns past
/// the window length are zeroed (transform zero padding). The frame count
/// is `framed.len() / row_len` and every frame must fit inside `signal`;
/// callers size the buffer with [`frame_count`].
pub fn frame_signal(
    signal: &[f32],
    window: &[f32],
    frame_shift: usize,
    row_len: usize,
    framed: &mut [f32],
) {
    let frame_length = window.len();
    assert!(row_len >= frame_length);
    assert_eq!(framed.len() % row_len, 0);
    let frames = framed.len() / row_len;
    for f in 0..frames {
        let offset = f * frame_shift;
        let row = &mut framed[f * row_len..(f + 1) * row_len];
        for (r, &w, &x) in izip!(
            &mut row[..frame_length],
            window,
            &signal[offset..offset + frame_length]
        ) {
            *r = x * w;
        }
        row[frame_length..].fill(0.0);
    }
}

/// Adjoint of [`frame_signal`]: window each per-frame gradient row and
/// overlap-add it into the sample-domain gradient.
pub fn overlap_add(
    frame_grad: &[f32],
    window: &[f32],
    frame_shift: usize,
    row_len: usize,
    grad: &mut [f32],
) {
    let frame_length = window.len();
    assert!(row_len >= frame_length);
    assert_eq!(frame_grad.len() % row_len, 0);
    let frames = frame_grad.len() / row_len;
    for f in 0..frames {
        let offset = f * frame_shift;
        let row = &frame_grad[f * row_len..f * row_len + frame_length];
        for (g, &w, &r) in izip!(&mut grad[offset..offset + frame_length], window, row) {
            *g += r * w;
        }
    }
}
