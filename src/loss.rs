//! The composite loss layer: per-resolution analysis arenas, the loss
//! term components, and the aggregator that drives both passes.
//!
//! The forward pass computes every enabled error term and their weighted
//! sum; the backward pass recomputes each term's analysis and accumulates
//! the exact sample-domain gradients, in the order
//! metric -> spectral-transform adjoint -> framer adjoint, with the
//! pre-emphasis adjoint and multi-dimensional re-interleaving applied once
//! at the very end. A forward pass must complete before its backward pass
//! starts; the layer holds no other cross-minibatch state.

use itertools::izip;
use log::debug;
use num_complex::Complex32;
use num_traits::Zero;
use rustfft::FftPlanner;

use crate::config::{LossConfig, LpcErrorKind, ResolutionConfig};
use crate::distance;
use crate::error::{LossError, Result};
use crate::lpc::{self, LevinsonTrace};
use crate::preemphasis::{pre_emphasis, pre_emphasis_adjoint};
use crate::spectrum::SpectralTransform;
use crate::window::{frame_count, frame_signal, overlap_add, window_samples};

/// Framing plus transform scratch for one FFT length, minibatch-scoped.
struct SpectrumScratch {
    transform: SpectralTransform,
    framed_src: Vec<f32>,
    framed_tgt: Vec<f32>,
    spec_src: Vec<Complex32>,
    spec_tgt: Vec<Complex32>,
    bin_grad: Vec<Complex32>,
    frame_grad: Vec<f32>,
}

impl SpectrumScratch {
    fn new(planner: &mut FftPlanner<f32>, fft_length: usize, max_frames: usize) -> Self {
        let transform = SpectralTransform::new(planner, fft_length);
        let bins = transform.bins();
        Self {
            transform,
            framed_src: vec![0.0; max_frames * fft_length],
            framed_tgt: vec![0.0; max_frames * fft_length],
            spec_src: vec![Complex32::zero(); max_frames * bins],
            spec_tgt: vec![Complex32::zero(); max_frames * bins],
            bin_grad: vec![Complex32::zero(); max_frames * bins],
            frame_grad: vec![0.0; fft_length],
        }
    }

    fn row(&self) -> usize {
        self.transform.fft_length()
    }

    fn bins(&self) -> usize {
        self.transform.bins()
    }

    fn ensure_frames(&mut self, max_frames: usize) {
        let row = self.row();
        let bins = self.bins();
        if self.framed_src.len() < max_frames * row {
            self.framed_src.resize(max_frames * row, 0.0);
            self.framed_tgt.resize(max_frames * row, 0.0);
            self.spec_src.resize(max_frames * bins, Complex32::zero());
            self.spec_tgt.resize(max_frames * bins, Complex32::zero());
            self.bin_grad.resize(max_frames * bins, Complex32::zero());
        }
    }

    /// Frame and transform both signals into the source/target slots.
    fn analyze_pair(
        &mut self,
        src: &[f32],
        tgt: &[f32],
        window: &[f32],
        frame_shift: usize,
        frames: usize,
    ) {
        let row = self.row();
        let bins = self.bins();
        frame_signal(src, window, frame_shift, row, &mut self.framed_src[..frames * row]);
        frame_signal(tgt, window, frame_shift, row, &mut self.framed_tgt[..frames * row]);
        for f in 0..frames {
            self.transform.forward(
                &self.framed_src[f * row..(f + 1) * row],
                &mut self.spec_src[f * bins..(f + 1) * bins],
            );
            self.transform.forward(
                &self.framed_tgt[f * row..(f + 1) * row],
                &mut self.spec_tgt[f * bins..(f + 1) * bins],
            );
        }
    }

    /// Frame and transform one signal into the source slots only.
    fn analyze_single(&mut self, signal: &[f32], window: &[f32], frame_shift: usize, frames: usize) {
        let row = self.row();
        let bins = self.bins();
        frame_signal(
            signal,
            window,
            frame_shift,
            row,
            &mut self.framed_src[..frames * row],
        );
        for f in 0..frames {
            self.transform.forward(
                &self.framed_src[f * row..(f + 1) * row],
                &mut self.spec_src[f * bins..(f + 1) * bins],
            );
        }
    }

    /// Push the bin-domain gradient through the transform adjoint and
    /// overlap-add it (windowed) into the sample-domain gradient.
    fn accumulate_time_grad(
        &mut self,
        window: &[f32],
        frame_shift: usize,
        frames: usize,
        grad: &mut [f32],
    ) {
        let bins = self.bins();
        let row = self.row();
        for f in 0..frames {
            self.transform
                .adjoint(&self.bin_grad[f * bins..(f + 1) * bins], &mut self.frame_grad);
            let offset = f * frame_shift;
            overlap_add(&self.frame_grad, window, frame_shift, row, &mut grad[offset..]);
        }
    }
}

/// Per-frame LPC scratch, shared by the forward error and the adjoint.
struct LpcScratch {
    order: usize,
    autocorr_src: Vec<f64>,
    autocorr_tgt: Vec<f64>,
    trace_src: LevinsonTrace,
    trace_tgt: LevinsonTrace,
    res_src: Vec<f64>,
    res_tgt: Vec<f64>,
    res_grad: Vec<f64>,
    coef_grad: Vec<f64>,
    lag_grad: Vec<f64>,
    frame_grad: Vec<f64>,
}

impl LpcScratch {
    fn new(order: usize, frame_length: usize) -> Self {
        Self {
            order,
            autocorr_src: vec![0.0; order + 1],
            autocorr_tgt: vec![0.0; order + 1],
            trace_src: LevinsonTrace::new(order),
            trace_tgt: LevinsonTrace::new(order),
            res_src: vec![0.0; frame_length],
            res_tgt: vec![0.0; frame_length],
            res_grad: vec![0.0; frame_length],
            coef_grad: vec![0.0; order + 1],
            lag_grad: vec![0.0; order + 1],
            frame_grad: vec![0.0; frame_length],
        }
    }

    /// Analyze one source/target frame pair. Returns false when either
    /// side is degenerate; the frame then contributes nothing.
    fn analyze_frame(&mut self, fs: &[f32], ft: &[f32]) -> bool {
        lpc::autocorrelate(fs, self.order, &mut self.autocorr_src);
        lpc::autocorrelate(ft, self.order, &mut self.autocorr_tgt);
        lpc::levinson(&self.autocorr_src, &mut self.trace_src)
            && lpc::levinson(&self.autocorr_tgt, &mut self.trace_tgt)
    }
}

/// Per-resolution working arena: precomputed windows, transform plans,
/// and the minibatch-scoped scratch buffers.
pub struct ResolutionArena {
    cfg: ResolutionConfig,
    window: Vec<f32>,
    window_phase: Vec<f32>,
    window_real: Vec<f32>,
    main: SpectrumScratch,
    real: Option<SpectrumScratch>,
    lpc: LpcScratch,
    diff: Vec<f32>,
}

impl ResolutionArena {
    fn new(planner: &mut FftPlanner<f32>, cfg: &ResolutionConfig, capacity: usize) -> Self {
        let max_frames = frame_count(capacity, cfg.frame_length, cfg.frame_shift);
        let window = window_samples(cfg.window, cfg.frame_length);
        let window_phase = window_samples(cfg.window_phase, cfg.frame_length);
        let (real, window_real) = match cfg.fft_length_real_spec {
            Some(n) => (
                Some(SpectrumScratch::new(planner, n, max_frames)),
                window_samples(cfg.window_real_spec.unwrap_or(cfg.window), cfg.frame_length),
            ),
            None => (None, Vec::new()),
        };
        Self {
            window,
            window_phase,
            window_real,
            main: SpectrumScratch::new(planner, cfg.fft_length, max_frames),
            real,
            lpc: LpcScratch::new(cfg.lpc_order, cfg.frame_length),
            diff: vec![0.0; capacity],
            cfg: cfg.clone(),
        }
    }

    pub fn config(&self) -> &ResolutionConfig {
        &self.cfg
    }

    fn ensure_capacity(&mut self, capacity: usize) {
        let max_frames = frame_count(capacity, self.cfg.frame_length, self.cfg.frame_shift);
        self.main.ensure_frames(max_frames);
        if let Some(real) = self.real.as_mut() {
            real.ensure_frames(max_frames);
        }
        if self.diff.len() < capacity {
            self.diff.resize(capacity, 0.0);
        }
    }

    fn frames(&self, len: usize) -> usize {
        frame_count(len, self.cfg.frame_length, self.cfg.frame_shift)
    }
}

/// One differentiable error term of the composite loss.
///
/// Each term owns its forward scalar and its backward gradient
/// contribution; the aggregator composes them instead of inheriting from
/// them. Both signals arrive already flattened and pre-emphasized; the
/// gradient buffer lives in that same domain.
pub trait TrainableLossComponent {
    /// Term name, used for logging.
    fn name(&self) -> &'static str;

    /// Configured weight; a weight of zero marks the term invalid and
    /// skips both passes.
    fn weight(&self, config: &LossConfig) -> f32;

    /// Unweighted scalar error for one sequence.
    fn forward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
    ) -> f64;

    /// Accumulate this term's weighted gradient with respect to the
    /// source samples.
    fn backward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
        grad: &mut [f32],
    );
}

/// Spectral-amplitude distance over the stored half spectrum.
pub struct SpectralAmplitudeTerm;

impl TrainableLossComponent for SpectralAmplitudeTerm {
    fn name(&self) -> &'static str {
        "spectral-amplitude"
    }

    fn weight(&self, config: &LossConfig) -> f32 {
        config.gamma
    }

    fn forward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
    ) -> f64 {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return 0.0;
        }
        arena
            .main
            .analyze_pair(source, target, &arena.window, arena.cfg.frame_shift, frames);
        let n = frames * arena.main.bins();
        distance::amplitude_error(
            &arena.main.spec_src[..n],
            &arena.main.spec_tgt[..n],
            config.spec_distance,
        ) / n as f64
    }

    fn backward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
        grad: &mut [f32],
    ) {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return;
        }
        arena
            .main
            .analyze_pair(source, target, &arena.window, arena.cfg.frame_shift, frames);
        let n = frames * arena.main.bins();
        let scale = self.weight(config) / n as f32;
        distance::amplitude_grad(
            &arena.main.spec_src[..n],
            &arena.main.spec_tgt[..n],
            config.spec_distance,
            scale,
            &mut arena.main.bin_grad[..n],
        );
        arena
            .main
            .accumulate_time_grad(&arena.window, arena.cfg.frame_shift, frames, grad);
    }
}

/// Phase distance, analyzed with the separately configured phase window.
pub struct PhaseTerm;

impl TrainableLossComponent for PhaseTerm {
    fn name(&self) -> &'static str {
        "phase"
    }

    fn weight(&self, config: &LossConfig) -> f32 {
        config.zeta
    }

    fn forward(
        &self,
        _config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
    ) -> f64 {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return 0.0;
        }
        arena.main.analyze_pair(
            source,
            target,
            &arena.window_phase,
            arena.cfg.frame_shift,
            frames,
        );
        let n = frames * arena.main.bins();
        distance::phase_error(&arena.main.spec_src[..n], &arena.main.spec_tgt[..n]) / n as f64
    }

    fn backward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
        grad: &mut [f32],
    ) {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return;
        }
        arena.main.analyze_pair(
            source,
            target,
            &arena.window_phase,
            arena.cfg.frame_shift,
            frames,
        );
        let n = frames * arena.main.bins();
        let scale = self.weight(config) / n as f32;
        distance::phase_grad(
            &arena.main.spec_src[..n],
            &arena.main.spec_tgt[..n],
            scale,
            &mut arena.main.bin_grad[..n],
        );
        arena
            .main
            .accumulate_time_grad(&arena.window_phase, arena.cfg.frame_shift, frames, grad);
    }
}

/// Complex-residual-spectrum distance on the transform of `source -
/// target`. The difference is linear in the source, so the gradient falls
/// straight through the same adjoint chain.
pub struct ResidualSpectrumTerm;

impl ResidualSpectrumTerm {
    fn analyze_diff(arena: &mut ResolutionArena, source: &[f32], target: &[f32], frames: usize) {
        let len = source.len();
        for (d, &a, &b) in izip!(&mut arena.diff[..len], source, target) {
            *d = a - b;
        }
        arena
            .main
            .analyze_single(&arena.diff[..len], &arena.window, arena.cfg.frame_shift, frames);
    }
}

impl TrainableLossComponent for ResidualSpectrumTerm {
    fn name(&self) -> &'static str {
        "residual-spectrum"
    }

    fn weight(&self, config: &LossConfig) -> f32 {
        config.eta
    }

    fn forward(
        &self,
        _config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
    ) -> f64 {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return 0.0;
        }
        Self::analyze_diff(arena, source, target, frames);
        let n = frames * arena.main.bins();
        distance::residual_error(&arena.main.spec_src[..n]) / n as f64
    }

    fn backward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
        grad: &mut [f32],
    ) {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return;
        }
        Self::analyze_diff(arena, source, target, frames);
        let n = frames * arena.main.bins();
        let scale = self.weight(config) / n as f32;
        distance::residual_grad(&arena.main.spec_src[..n], scale, &mut arena.main.bin_grad[..n]);
        arena
            .main
            .accumulate_time_grad(&arena.window, arena.cfg.frame_shift, frames, grad);
    }
}

/// Real-valued-spectrum distance: the amplitude machinery on a second,
/// independently configured transform length and window, probing a
/// different time-frequency resolution.
pub struct RealSpectrumTerm;

impl TrainableLossComponent for RealSpectrumTerm {
    fn name(&self) -> &'static str {
        "real-spectrum"
    }

    fn weight(&self, config: &LossConfig) -> f32 {
        config.kappa
    }

    fn forward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
    ) -> f64 {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return 0.0;
        }
        let Some(scratch) = arena.real.as_mut() else {
            return 0.0;
        };
        scratch.analyze_pair(
            source,
            target,
            &arena.window_real,
            arena.cfg.frame_shift,
            frames,
        );
        let n = frames * scratch.bins();
        distance::amplitude_error(
            &scratch.spec_src[..n],
            &scratch.spec_tgt[..n],
            config.real_spec_distance,
        ) / n as f64
    }

    fn backward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
        grad: &mut [f32],
    ) {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return;
        }
        let weight = self.weight(config);
        let Some(scratch) = arena.real.as_mut() else {
            return;
        };
        scratch.analyze_pair(
            source,
            target,
            &arena.window_real,
            arena.cfg.frame_shift,
            frames,
        );
        let n = frames * scratch.bins();
        let scale = weight / n as f32;
        distance::amplitude_grad(
            &scratch.spec_src[..n],
            &scratch.spec_tgt[..n],
            config.real_spec_distance,
            scale,
            &mut scratch.bin_grad[..n],
        );
        scratch.accumulate_time_grad(&arena.window_real, arena.cfg.frame_shift, frames, grad);
    }
}

/// LPC error on the windowed analysis frames.
pub struct LpcTerm;

impl LpcTerm {
    /// Fixed denominator for the mean: skipped (degenerate) frames still
    /// count, they just contribute zero, which keeps forward and backward
    /// normalization trivially consistent.
    fn denominator(kind: LpcErrorKind, frames: usize, frame_length: usize, order: usize) -> f64 {
        match kind {
            LpcErrorKind::Residual => (frames * frame_length) as f64,
            LpcErrorKind::ResidualEnergy => frames as f64,
            LpcErrorKind::Coefficients => (frames * order) as f64,
        }
    }
}

impl TrainableLossComponent for LpcTerm {
    fn name(&self) -> &'static str {
        "lpc"
    }

    fn weight(&self, config: &LossConfig) -> f32 {
        config.tau
    }

    fn forward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
    ) -> f64 {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return 0.0;
        }
        let fl = arena.cfg.frame_length;
        let row = arena.main.row();
        let shift = arena.cfg.frame_shift;
        frame_signal(source, &arena.window, shift, row, &mut arena.main.framed_src[..frames * row]);
        frame_signal(target, &arena.window, shift, row, &mut arena.main.framed_tgt[..frames * row]);

        let order = arena.lpc.order;
        let mut acc = 0.0f64;
        for f in 0..frames {
            let fs = &arena.main.framed_src[f * row..f * row + fl];
            let ft = &arena.main.framed_tgt[f * row..f * row + fl];
            if !arena.lpc.analyze_frame(fs, ft) {
                continue;
            }
            match config.lpc_error {
                LpcErrorKind::Residual => {
                    lpc::residual(fs, arena.lpc.trace_src.coefs(), &mut arena.lpc.res_src);
                    lpc::residual(ft, arena.lpc.trace_tgt.coefs(), &mut arena.lpc.res_tgt);
                    for (a, b) in arena.lpc.res_src.iter().zip(&arena.lpc.res_tgt) {
                        let d = a - b;
                        acc += d * d;
                    }
                }
                LpcErrorKind::ResidualEnergy => {
                    let d = arena.lpc.trace_src.pred_error[order]
                        - arena.lpc.trace_tgt.pred_error[order];
                    acc += d * d;
                }
                LpcErrorKind::Coefficients => {
                    let a = arena.lpc.trace_src.coefs();
                    let b = arena.lpc.trace_tgt.coefs();
                    for i in 1..=order {
                        let d = a[i] - b[i];
                        acc += d * d;
                    }
                }
            }
        }
        acc / Self::denominator(config.lpc_error, frames, fl, order)
    }

    fn backward(
        &self,
        config: &LossConfig,
        arena: &mut ResolutionArena,
        source: &[f32],
        target: &[f32],
        grad: &mut [f32],
    ) {
        let frames = arena.frames(source.len());
        if frames == 0 {
            return;
        }
        let fl = arena.cfg.frame_length;
        let row = arena.main.row();
        let shift = arena.cfg.frame_shift;
        frame_signal(source, &arena.window, shift, row, &mut arena.main.framed_src[..frames * row]);
        frame_signal(target, &arena.window, shift, row, &mut arena.main.framed_tgt[..frames * row]);

        let order = arena.lpc.order;
        let scale = self.weight(config) as f64 * 2.0
            / Self::denominator(config.lpc_error, frames, fl, order);

        for f in 0..frames {
            let fs = &arena.main.framed_src[f * row..f * row + fl];
            let ft = &arena.main.framed_tgt[f * row..f * row + fl];
            if !arena.lpc.analyze_frame(fs, ft) {
                continue;
            }
            arena.lpc.coef_grad.fill(0.0);
            arena.lpc.frame_grad.fill(0.0);
            let mut energy_grad = 0.0f64;
            match config.lpc_error {
                LpcErrorKind::Residual => {
                    lpc::residual(fs, arena.lpc.trace_src.coefs(), &mut arena.lpc.res_src);
                    lpc::residual(ft, arena.lpc.trace_tgt.coefs(), &mut arena.lpc.res_tgt);
                    for (rg, a, b) in izip!(
                        &mut arena.lpc.res_grad,
                        &arena.lpc.res_src,
                        &arena.lpc.res_tgt
                    ) {
                        *rg = scale * (a - b);
                    }
                    lpc::residual_adjoint(
                        fs,
                        arena.lpc.trace_src.coefs(),
                        &arena.lpc.res_grad,
                        &mut arena.lpc.frame_grad,
                        &mut arena.lpc.coef_grad,
                    );
                }
                LpcErrorKind::ResidualEnergy => {
                    energy_grad = scale
                        * (arena.lpc.trace_src.pred_error[order]
                            - arena.lpc.trace_tgt.pred_error[order]);
                }
                LpcErrorKind::Coefficients => {
                    let a = arena.lpc.trace_src.coefs();
                    let b = arena.lpc.trace_tgt.coefs();
                    for i in 1..=order {
                        arena.lpc.coef_grad[i] = scale * (a[i] - b[i]);
                    }
                }
            }
            lpc::levinson_adjoint(
                &arena.lpc.autocorr_src,
                &arena.lpc.trace_src,
                &arena.lpc.coef_grad,
                energy_grad,
                &mut arena.lpc.lag_grad,
            );
            lpc::autocorrelate_adjoint(fs, &arena.lpc.lag_grad, &mut arena.lpc.frame_grad);

            // fold through the analysis window back onto the samples
            let offset = f * shift;
            for (g, &w, &x) in izip!(
                &mut grad[offset..offset + fl],
                &arena.window,
                &arena.lpc.frame_grad
            ) {
                *g += (x * w as f64) as f32;
            }
        }
    }
}

const TERMS: [&dyn TrainableLossComponent; 5] = [
    &SpectralAmplitudeTerm,
    &PhaseTerm,
    &ResidualSpectrumTerm,
    &RealSpectrumTerm,
    &LpcTerm,
];

/// Weighted per-term contributions of the last forward pass.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LossBreakdown {
    pub total: f64,
    pub waveform_mse: f64,
    pub spectral_amplitude: f64,
    pub phase: f64,
    pub residual_spectrum: f64,
    pub real_spectrum: f64,
    pub lpc: f64,
}

/// The composite loss layer.
///
/// Lifecycle: construct (configuration is validated, buffers are sized),
/// bind the reference waveform once with [`link_target`](Self::link_target),
/// then alternate [`forward`](Self::forward) and
/// [`backward`](Self::backward) once per minibatch.
pub struct DftErrorLayer {
    config: LossConfig,
    arenas: Vec<ResolutionArena>,
    capacity: usize,
    target_bound: bool,
    target_len: usize,
    src_work: Vec<f32>,
    tgt_work: Vec<f32>,
    flat_grad: Vec<f32>,
    grad_out: Vec<f32>,
    cur_len: usize,
    breakdown: LossBreakdown,
}

impl DftErrorLayer {
    /// Build a layer for sequences of at most `max_seq_length` samples
    /// (time steps times channels for multi-dimensional signals). Longer
    /// sequences later simply grow the arenas.
    pub fn new(config: LossConfig, max_seq_length: usize) -> Result<Self> {
        config.validate()?;
        let mut planner = FftPlanner::new();
        let arenas = config
            .resolutions
            .iter()
            .map(|rc| ResolutionArena::new(&mut planner, rc, max_seq_length))
            .collect();
        Ok(Self {
            config,
            arenas,
            capacity: max_seq_length,
            target_bound: false,
            target_len: 0,
            src_work: vec![0.0; max_seq_length],
            tgt_work: vec![0.0; max_seq_length],
            flat_grad: vec![0.0; max_seq_length],
            grad_out: vec![0.0; max_seq_length],
            cur_len: 0,
            breakdown: LossBreakdown::default(),
        })
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Serialize the stored options back into a configuration document.
    pub fn export_json(&self) -> Result<String> {
        self.config.export_json()
    }

    /// Bind the reference waveform. The target is flattened and
    /// pre-emphasized once here; `forward` then only takes the generated
    /// signal.
    pub fn link_target(&mut self, target: &[f32]) -> Result<()> {
        let dim = self.config.signal_dim;
        if target.len() % dim != 0 {
            return Err(LossError::RaggedSignal {
                len: target.len(),
                dim,
            });
        }
        self.ensure_capacity(target.len());
        flatten(target, dim, &mut self.tgt_work[..target.len()]);
        if self.config.pre_emphasis {
            pre_emphasis(&mut self.tgt_work[..target.len()]);
        }
        self.target_len = target.len();
        self.target_bound = true;
        Ok(())
    }

    /// Forward pass: every enabled error term and their weighted sum.
    pub fn forward(&mut self, generated: &[f32]) -> Result<f64> {
        if !self.target_bound {
            return Err(LossError::TargetNotBound);
        }
        if generated.len() != self.target_len {
            return Err(LossError::LengthMismatch {
                generated: generated.len(),
                target: self.target_len,
            });
        }
        let len = generated.len();
        let dim = self.config.signal_dim;
        self.ensure_capacity(len);
        self.cur_len = len;
        flatten(generated, dim, &mut self.src_work[..len]);
        if self.config.pre_emphasis {
            pre_emphasis(&mut self.src_work[..len]);
        }

        let mut bd = LossBreakdown::default();
        let mut weighted = [0.0f64; 5];
        {
            let src = &self.src_work[..len];
            let tgt = &self.tgt_work[..len];
            if self.config.beta > 0.0 && len > 0 {
                let mut acc = 0.0f64;
                for (&s, &t) in src.iter().zip(tgt) {
                    let d = (s - t) as f64;
                    acc += d * d;
                }
                bd.waveform_mse = self.config.beta as f64 * (acc / len as f64);
            }
            for arena in &mut self.arenas {
                for (i, term) in TERMS.iter().enumerate() {
                    let w = term.weight(&self.config) as f64;
                    if w <= 0.0 {
                        continue;
                    }
                    weighted[i] += w * term.forward(&self.config, arena, src, tgt);
                }
            }
        }
        bd.spectral_amplitude = weighted[0];
        bd.phase = weighted[1];
        bd.residual_spectrum = weighted[2];
        bd.real_spectrum = weighted[3];
        bd.lpc = weighted[4];
        bd.total = bd.waveform_mse
            + bd.spectral_amplitude
            + bd.phase
            + bd.residual_spectrum
            + bd.real_spectrum
            + bd.lpc;
        debug!(
            "loss: total={:.6e} mse={:.6e} amp={:.6e} phase={:.6e} res={:.6e} real={:.6e} lpc={:.6e}",
            bd.total,
            bd.waveform_mse,
            bd.spectral_amplitude,
            bd.phase,
            bd.residual_spectrum,
            bd.real_spectrum,
            bd.lpc
        );
        self.breakdown = bd;
        Ok(bd.total)
    }

    /// Backward pass: the exact gradient of the last forward pass's loss
    /// with respect to the generated samples, in the caller's original
    /// (interleaved) layout.
    pub fn backward(&mut self) -> &[f32] {
        let len = self.cur_len;
        let dim = self.config.signal_dim;
        self.flat_grad[..len].fill(0.0);
        {
            let src = &self.src_work[..len];
            let tgt = &self.tgt_work[..len];
            if self.config.beta > 0.0 && len > 0 {
                let c = 2.0 * self.config.beta / len as f32;
                for (g, &s, &t) in izip!(&mut self.flat_grad[..len], src, tgt) {
                    *g += c * (s - t);
                }
            }
            for arena in &mut self.arenas {
                for term in TERMS {
                    if term.weight(&self.config) <= 0.0 {
                        continue;
                    }
                    term.backward(&self.config, arena, src, tgt, &mut self.flat_grad[..len]);
                }
            }
        }
        if self.config.pre_emphasis {
            pre_emphasis_adjoint(&mut self.flat_grad[..len]);
        }
        unflatten(&self.flat_grad[..len], dim, &mut self.grad_out[..len]);
        &self.grad_out[..len]
    }

    /// Weighted per-term contributions of the last forward pass.
    pub fn breakdown(&self) -> LossBreakdown {
        self.breakdown
    }

    /// Gradient buffer of the last backward pass.
    pub fn gradient(&self) -> &[f32] {
        &self.grad_out[..self.cur_len]
    }

    fn ensure_capacity(&mut self, len: usize) {
        if len <= self.capacity {
            return;
        }
        self.capacity = len;
        self.src_work.resize(len, 0.0);
        self.tgt_work.resize(len, 0.0);
        self.flat_grad.resize(len, 0.0);
        self.grad_out.resize(len, 0.0);
        for arena in &mut self.arenas {
            arena.ensure_capacity(len);
        }
    }
}

/// De-interleave a sample-major multi-channel signal into one
/// channel-major stream. Identity for one channel.
fn flatten(signal: &[f32], dim: usize, out: &mut [f32]) {
    debug_assert_eq!(signal.len(), out.len());
    if dim == 1 {
        out.copy_from_slice(signal);
        return;
    }
    let steps = signal.len() / dim;
    for d in 0..dim {
        for t in 0..steps {
            out[d * steps + t] = signal[t * dim + d];
        }
    }
}

/// Inverse of [`flatten`] for the gradient.
fn unflatten(grad: &[f32], dim: usize, out: &mut [f32]) {
    debug_assert_eq!(grad.len(), out.len());
    if dim == 1 {
        out.copy_from_slice(grad);
        return;
    }
    let steps = grad.len() / dim;
    for d in 0..dim {
        for t in 0..steps {
            out[t * dim + d] = grad[d * steps + t];
        }
    }
}
