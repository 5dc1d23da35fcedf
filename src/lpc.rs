//! Linear-prediction analysis and its reverse-mode adjoint.
//!
//! Forward: biased autocorrelation up to the LPC order, Levinson-Durbin
//! recursion for prediction coefficients, reflection coefficients, and the
//! per-order prediction-error energies, then the residual by inverse
//! filtering. All intermediate state is kept in `f64`; frames arrive as
//! `f32`.
//!
//! Backward: the recursion is sequential over orders 1..=p, each step
//! depending on the previous step's reflection coefficient, so the adjoint
//! replays that dependency chain strictly in reverse, converting
//! final-coefficient (and final-energy) gradients into autocorrelation
//! gradients order by order, and the autocorrelation adjoint folds those
//! back onto the frame samples. Frames whose zero-lag autocorrelation or
//! intermediate prediction-error energy falls to [`ENERGY_FLOOR`] are
//! degenerate and contribute zero error and zero gradient.

/// Floor under the zero-lag autocorrelation and the prediction-error
/// energy, below which a frame is treated as degenerate.
pub const ENERGY_FLOOR: f64 = 1e-9;

/// Biased autocorrelation of one frame: `r[j] = sum_n x[n] * x[n-j]` for
/// `j` in `0..=lags`.
pub fn autocorrelate(frame: &[f32], lags: usize, out: &mut [f64]) {
    debug_assert!(lags < frame.len());
    debug_assert_eq!(out.len(), lags + 1);
    for (j, r) in out.iter_mut().enumerate() {
        let mut acc = 0.0f64;
        for n in j..frame.len() {
            acc += frame[n] as f64 * frame[n - j] as f64;
        }
        *r = acc;
    }
}

/// Adjoint of [`autocorrelate`]: folds lag-domain gradients back onto the
/// frame samples, accumulating into `frame_grad`.
pub fn autocorrelate_adjoint(frame: &[f32], lag_grad: &[f64], frame_grad: &mut [f64]) {
    debug_assert_eq!(frame.len(), frame_grad.len());
    for (j, &g) in lag_grad.iter().enumerate() {
        if g == 0.0 {
            continue;
        }
        for n in j..frame.len() {
            frame_grad[n] += g * frame[n - j] as f64;
            frame_grad[n - j] += g * frame[n] as f64;
        }
    }
}

/// The full Levinson-Durbin recursion trace for one frame.
///
/// The adjoint needs the coefficient vector of every intermediate order,
/// not just the final one, so the forward pass records one row per order:
/// row `m` holds the coefficients after completing order `m`, with entry 0
/// fixed at the implicit unity tap.
pub struct LevinsonTrace {
    order: usize,
    rows: Vec<f64>,
    /// Reflection coefficients `k_1..k_p` at indices `0..p`.
    pub reflection: Vec<f64>,
    /// Prediction-error energies `E_0..E_p`.
    pub pred_error: Vec<f64>,
    delta: Vec<f64>,
}

impl LevinsonTrace {
    pub fn new(order: usize) -> Self {
        let width = order + 1;
        Self {
            order,
            rows: vec![0.0; width * width],
            reflection: vec![0.0; order],
            pred_error: vec![0.0; width],
            delta: vec![0.0; width],
        }
    }

    /// Final prediction coefficients; entry 0 is 1, entries `1..=order`
    /// are the taps of `res[n] = x[n] + sum_i a_i * x[n-i]`.
    pub fn coefs(&self) -> &[f64] {
        self.row(self.order)
    }

    fn row(&self, m: usize) -> &[f64] {
        let w = self.order + 1;
        &self.rows[m * w..(m + 1) * w]
    }

    fn at(&self, m: usize, i: usize) -> f64 {
        self.rows[m * (self.order + 1) + i]
    }

    fn set(&mut self, m: usize, i: usize, v: f64) {
        self.rows[m * (self.order + 1) + i] = v;
    }

    fn reset(&mut self) {
        self.rows.fill(0.0);
        self.reflection.fill(0.0);
        self.pred_error.fill(0.0);
        self.delta.fill(0.0);
        for m in 0..=self.order {
            self.set(m, 0, 1.0);
        }
    }
}

/// Run the Levinson-Durbin recursion on `autocorr` (length `order + 1`).
///
/// Returns `false` for a degenerate frame (buffers are left zeroed apart
/// from the unity taps); the caller must then skip the frame entirely.
pub fn levinson(autocorr: &[f64], trace: &mut LevinsonTrace) -> bool {
    let p = trace.order;
    debug_assert_eq!(autocorr.len(), p + 1);
    trace.reset();
    if autocorr[0] <= ENERGY_FLOOR {
        return false;
    }
    trace.pred_error[0] = autocorr[0];
    for m in 1..=p {
        let e_prev = trace.pred_error[m - 1];
        if e_prev <= ENERGY_FLOOR {
            return false;
        }
        let mut acc = autocorr[m];
        for i in 1..m {
            acc += trace.at(m - 1, i) * autocorr[m - i];
        }
        let k = -acc / e_prev;
        trace.delta[m] = acc;
        trace.reflection[m - 1] = k;
        for i in 1..m {
            let v = trace.at(m - 1, i) + k * trace.at(m - 1, m - i);
            trace.set(m, i, v);
        }
        trace.set(m, m, k);
        trace.pred_error[m] = e_prev * (1.0 - k * k);
    }
    true
}

/// Reverse-mode adjoint of [`levinson`].
///
/// `coef_grad[i]` (indices `1..=order`) holds the loss gradient with
/// respect to the final prediction coefficients and `final_energy_grad`
/// the gradient with respect to the final prediction-error energy `E_p`.
/// On return `autocorr_grad[j]` holds the gradient with respect to
/// `r[j]`. Must be called with the trace produced by [`levinson`] for the
/// same autocorrelation input.
pub fn levinson_adjoint(
    autocorr: &[f64],
    trace: &LevinsonTrace,
    coef_grad: &[f64],
    final_energy_grad: f64,
    autocorr_grad: &mut [f64],
) {
    let p = trace.order;
    debug_assert_eq!(autocorr.len(), p + 1);
    debug_assert_eq!(coef_grad.len(), p + 1);
    debug_assert_eq!(autocorr_grad.len(), p + 1);
    autocorr_grad.fill(0.0);

    let mut abar = coef_grad.to_vec();
    let mut ebar = vec![0.0f64; p + 1];
    ebar[p] = final_energy_grad;
    let mut scratch = vec![0.0f64; p + 1];

    for m in (1..=p).rev() {
        let e_prev = trace.pred_error[m - 1];
        let k = trace.reflection[m - 1];

        // a^{(m)}_m = k_m, and a^{(m)}_i = a^{(m-1)}_i + k_m a^{(m-1)}_{m-i}
        let mut kbar = abar[m];
        scratch[..m].fill(0.0);
        for i in 1..m {
            let g = abar[i];
            scratch[i] += g;
            scratch[m - i] += g * k;
            kbar += g * trace.at(m - 1, m - i);
        }

        // E_m = E_{m-1} * (1 - k_m^2)
        ebar[m - 1] += ebar[m] * (1.0 - k * k);
        kbar -= ebar[m] * e_prev * 2.0 * k;

        // k_m = -delta_m / E_{m-1}
        let dbar = -kbar / e_prev;
        ebar[m - 1] += kbar * trace.delta[m] / (e_prev * e_prev);

        // delta_m = r[m] + sum_i a^{(m-1)}_i r[m-i]
        autocorr_grad[m] += dbar;
        for i in 1..m {
            autocorr_grad[m - i] += dbar * trace.at(m - 1, i);
            scratch[i] += dbar * autocorr[m - i];
        }

        abar[1..m].copy_from_slice(&scratch[1..m]);
        abar[m] = 0.0;
    }
    // E_0 = r[0]
    autocorr_grad[0] += ebar[0];
}

/// LPC residual by inverse filtering:
/// `res[n] = x[n] + sum_{i=1..=p} a_i * x[n-i]`, with `x[-k] = 0`.
pub fn residual(frame: &[f32], coefs: &[f64], out: &mut [f64]) {
    debug_assert_eq!(frame.len(), out.len());
    let p = coefs.len() - 1;
    for n in 0..frame.len() {
        let mut acc = frame[n] as f64;
        for i in 1..=p.min(n) {
            acc += coefs[i] * frame[n - i] as f64;
        }
        out[n] = acc;
    }
}

/// Adjoint of [`residual`]: accumulates the sample-path gradient into
/// `frame_grad` (coefficients held fixed) and the coefficient-path
/// gradient into `coef_grad` (samples held fixed). The coefficient path
/// continues through [`levinson_adjoint`] and [`autocorrelate_adjoint`].
pub fn residual_adjoint(
    frame: &[f32],
    coefs: &[f64],
    res_grad: &[f64],
    frame_grad: &mut [f64],
    coef_grad: &mut [f64],
) {
    debug_assert_eq!(frame.len(), res_grad.len());
    debug_assert_eq!(frame.len(), frame_grad.len());
    debug_assert_eq!(coefs.len(), coef_grad.len());
    let p = coefs.len() - 1;
    for n in 0..frame.len() {
        let g = res_grad[n];
        if g == 0.0 {
            continue;
        }
        frame_grad[n] += g;
        for i in 1..=p.min(n) {
            frame_grad[n - i] += g * coefs[i];
            coef_grad[i] += g * frame[n - i] as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic noise without pulling in an RNG crate.
    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect()
    }

    /// Synthesize an AR process `x[n] = e[n] - sum a_i x[n-i]` so that the
    /// inverse filter with coefficients `a` whitens it.
    fn ar_signal(len: usize, coefs: &[f64], seed: u32) -> Vec<f32> {
        let e = noise(len, seed);
        let mut x = vec![0.0f32; len];
        for n in 0..len {
            let mut acc = e[n] as f64;
            for (i, &a) in coefs.iter().enumerate() {
                if n > i {
                    acc -= a * x[n - 1 - i] as f64;
                }
            }
            x[n] = acc as f32;
        }
        x
    }

    #[test]
    fn autocorrelation_of_impulse() {
        let frame = [1.0f32, 0.0, 0.0, 0.0];
        let mut r = [0.0f64; 3];
        autocorrelate(&frame, 2, &mut r);
        assert_eq!(r, [1.0, 0.0, 0.0]);
    }

    /// `<autocorrelate(x), g> == <x, adjoint(g)>` would not hold exactly
    /// (autocorrelation is quadratic, not linear), so check the adjoint by
    /// finite differences of `L = sum g_j r_j(x)` instead.
    #[test]
    fn autocorrelate_adjoint_matches_finite_difference() {
        let frame = noise(24, 7);
        let lag_grad = [0.7f64, -0.3, 0.45, 0.2];
        let mut frame_grad = vec![0.0f64; frame.len()];
        autocorrelate_adjoint(&frame, &lag_grad, &mut frame_grad);

        let loss = |f: &[f32]| {
            let mut r = [0.0f64; 4];
            autocorrelate(f, 3, &mut r);
            r.iter().zip(&lag_grad).map(|(a, b)| a * b).sum::<f64>()
        };
        let h = 1e-3f32;
        for idx in [0usize, 5, 11, 23] {
            let mut fp = frame.clone();
            fp[idx] += h;
            let mut fm = frame.clone();
            fm[idx] -= h;
            let fd = (loss(&fp) - loss(&fm)) / (2.0 * h as f64);
            assert!(
                (frame_grad[idx] - fd).abs() < 1e-3,
                "idx {idx}: {} vs {fd}",
                frame_grad[idx]
            );
        }
    }

    #[test]
    fn levinson_recovers_ar2_coefficients() {
        let true_coefs = [-1.2f64, 0.6];
        let x = ar_signal(4096, &true_coefs, 11);
        let mut r = vec![0.0f64; 3];
        autocorrelate(&x, 2, &mut r);
        let mut trace = LevinsonTrace::new(2);
        assert!(levinson(&r, &mut trace));
        let a = trace.coefs();
        assert!((a[1] - true_coefs[0]).abs() < 0.05, "a1 = {}", a[1]);
        assert!((a[2] - true_coefs[1]).abs() < 0.05, "a2 = {}", a[2]);
    }

    #[test]
    fn prediction_error_is_non_increasing() {
        let x = ar_signal(2048, &[-0.9, 0.5, -0.2], 3);
        let order = 8;
        let mut r = vec![0.0f64; order + 1];
        autocorrelate(&x, order, &mut r);
        let mut trace = LevinsonTrace::new(order);
        assert!(levinson(&r, &mut trace));
        for m in 1..=order {
            assert!(
                trace.pred_error[m] <= trace.pred_error[m - 1] + 1e-12,
                "E_{m} = {} > E_{} = {}",
                trace.pred_error[m],
                m - 1,
                trace.pred_error[m - 1]
            );
        }
    }

    #[test]
    fn silent_frame_is_degenerate() {
        let r = vec![0.0f64; 5];
        let mut trace = LevinsonTrace::new(4);
        assert!(!levinson(&r, &mut trace));
    }

    /// Perturb the autocorrelation input directly; everything here is
    /// `f64`, so the finite-difference match is tight.
    #[test]
    fn levinson_adjoint_matches_finite_difference() {
        let x = ar_signal(512, &[-1.1, 0.4], 29);
        let order = 4;
        let mut r = vec![0.0f64; order + 1];
        autocorrelate(&x, order, &mut r);

        let coef_grad = [0.0f64, 0.8, -0.5, 0.3, 0.9];
        let energy_grad = 0.6f64;
        let loss = |r: &[f64]| {
            let mut t = LevinsonTrace::new(order);
            assert!(levinson(r, &mut t));
            let a = t.coefs();
            let mut l = energy_grad * t.pred_error[order];
            for i in 1..=order {
                l += coef_grad[i] * a[i];
            }
            l
        };

        let mut trace = LevinsonTrace::new(order);
        assert!(levinson(&r, &mut trace));
        let mut rbar = vec![0.0f64; order + 1];
        levinson_adjoint(&r, &trace, &coef_grad, energy_grad, &mut rbar);

        let h = 1e-6 * r[0];
        for j in 0..=order {
            let mut rp = r.clone();
            rp[j] += h;
            let mut rm = r.clone();
            rm[j] -= h;
            let fd = (loss(&rp) - loss(&rm)) / (2.0 * h);
            assert!(
                (rbar[j] - fd).abs() < 1e-6 * (1.0 + fd.abs()),
                "lag {j}: {} vs {fd}",
                rbar[j]
            );
        }
    }

    #[test]
    fn residual_whitens_ar_signal() {
        let true_coefs = [-1.2f64, 0.6];
        let x = ar_signal(4096, &true_coefs, 17);
        let order = 2;
        let mut r = vec![0.0f64; order + 1];
        autocorrelate(&x, order, &mut r);
        let mut trace = LevinsonTrace::new(order);
        assert!(levinson(&r, &mut trace));
        let mut res = vec![0.0f64; x.len()];
        residual(&x, trace.coefs(), &mut res);

        let sig_energy: f64 = x.iter().map(|&v| (v as f64).powi(2)).sum();
        let res_energy: f64 = res.iter().map(|v| v * v).sum();
        assert!(
            res_energy < 0.5 * sig_energy,
            "residual energy {res_energy} vs signal energy {sig_energy}"
        );
    }

    #[test]
    fn residual_adjoint_matches_finite_difference_in_sample_path() {
        let x = noise(32, 5);
        let coefs = [1.0f64, -0.8, 0.3];
        let res_grad: Vec<f64> = (0..32).map(|i| ((i % 7) as f64 - 3.0) / 7.0).collect();

        let mut frame_grad = vec![0.0f64; 32];
        let mut coef_grad = vec![0.0f64; 3];
        residual_adjoint(&x, &coefs, &res_grad, &mut frame_grad, &mut coef_grad);

        let loss = |f: &[f32]| {
            let mut res = vec![0.0f64; 32];
            residual(f, &coefs, &mut res);
            res.iter().zip(&res_grad).map(|(a, b)| a * b).sum::<f64>()
        };
        let h = 1e-3f32;
        for idx in [0usize, 1, 15, 31] {
            let mut fp = x.clone();
            fp[idx] += h;
            let mut fm = x.clone();
            fm[idx] -= h;
            let fd = (loss(&fp) - loss(&fm)) / (2.0 * h as f64);
            assert!(
                (frame_grad[idx] - fd).abs() < 1e-3,
                "idx {idx}: {} vs {fd}",
                frame_grad[idx]
            );
        }
    }
}
