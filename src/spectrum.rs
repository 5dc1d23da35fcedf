//! Real-to-half-complex spectral transform and its exact adjoint.
//!
//! The forward transform maps a real frame of `fft_length` samples to the
//! `fft_length/2 + 1` non-redundant bins of its conjugate-symmetric
//! spectrum. The adjoint maps a complex gradient over those stored bins
//! back to a real frame-domain gradient: the full spectrum is rebuilt with
//! interior bins split evenly between the two conjugate halves, so that
//! the unnormalized inverse transform is exactly the transpose of the
//! forward map and its output is purely real up to rounding.

use std::sync::Arc;

use num_complex::Complex32;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};

/// One FFT length's worth of plans and scratch, built once at layer
/// construction and reused every minibatch.
pub struct SpectralTransform {
    fft_length: usize,
    bins: usize,
    fwd: Arc<dyn Fft<f32>>,
    inv: Arc<dyn Fft<f32>>,
    buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectralTransform {
    pub fn new(planner: &mut FftPlanner<f32>, fft_length: usize) -> Self {
        assert!(fft_length > 0);
        let fwd = planner.plan_fft_forward(fft_length);
        let inv = planner.plan_fft_inverse(fft_length);
        let scratch_len = fwd
            .get_inplace_scratch_len()
            .max(inv.get_inplace_scratch_len());
        Self {
            fft_length,
            bins: fft_length / 2 + 1,
            fwd,
            inv,
            buf: vec![Complex32::zero(); fft_length],
            scratch: vec![Complex32::zero(); scratch_len],
        }
    }

    pub fn fft_length(&self) -> usize {
        self.fft_length
    }

    /// Stored (non-redundant) bin count, `fft_length/2 + 1`.
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Unnormalized forward transform of one real frame; writes the stored
    /// half-spectrum into `spectrum`.
    pub fn forward(&mut self, frame: &[f32], spectrum: &mut [Complex32]) {
        debug_assert_eq!(frame.len(), self.fft_length);
        debug_assert_eq!(spectrum.len(), self.bins);
        for (b, &x) in self.buf.iter_mut().zip(frame) {
            *b = Complex32::new(x, 0.0);
        }
        self.fwd.process_with_scratch(&mut self.buf, &mut self.scratch);
        spectrum.copy_from_slice(&self.buf[..self.bins]);
    }

    /// Exact adjoint of [`forward`](Self::forward).
    ///
    /// `bin_grad[k]` carries `dL/dRe(X[k]) + i * dL/dIm(X[k])` for the
    /// stored bins; on return `frame_grad[n]` holds `dL/dx[n]`. Interior
    /// bins are halved and mirrored so the folded spectrum counts each
    /// stored bin exactly once; the imaginary gradient at DC and Nyquist
    /// is structurally irrelevant for a real input and drops out.
    pub fn adjoint(&mut self, bin_grad: &[Complex32], frame_grad: &mut [f32]) {
        let n = self.fft_length;
        debug_assert_eq!(bin_grad.len(), self.bins);
        debug_assert_eq!(frame_grad.len(), n);
        self.buf.fill(Complex32::zero());
        self.buf[0] = bin_grad[0];
        for k in 1..self.bins {
            let mirror = n - k;
            if mirror == k {
                self.buf[k] = bin_grad[k];
            } else {
                let half = Complex32::new(0.5 * bin_grad[k].re, 0.5 * bin_grad[k].im);
                self.buf[k] = half;
                self.buf[mirror] = half.conj();
            }
        }
        self.inv.process_with_scratch(&mut self.buf, &mut self.scratch);
        for (g, b) in frame_grad.iter_mut().zip(&self.buf) {
            *g = b.re;
        }
    }
}
