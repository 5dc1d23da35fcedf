//! Differentiable composite waveform loss for neural vocoder training.
//!
//! [`DftErrorLayer`] compares a generated waveform against a bound
//! reference waveform and produces a scalar loss together with the exact
//! gradient with respect to every generated sample. The loss is a weighted
//! sum of six error families, each evaluated at every configured
//! time-frequency resolution:
//!
//! - time-domain mean squared error,
//! - spectral-amplitude distance (linear or log scale),
//! - phase distance,
//! - complex-residual-spectrum distance,
//! - a secondary real-valued-spectrum distance with its own transform
//!   length and window,
//! - an LPC error (residual, residual-energy, or coefficient form).
//!
//! Gradients are analytic, not autodiff: every stage (pre-emphasis,
//! framing, transform, metric, Levinson-Durbin recursion) carries its
//! exact adjoint, so the backward pass is the true transpose of the
//! forward computation.
//!
//! ```
//! use waveloss::{DftErrorLayer, LossConfig, ResolutionConfig};
//!
//! let config = LossConfig {
//!     beta: 1.0,
//!     gamma: 1.0,
//!     resolutions: vec![ResolutionConfig {
//!         frame_length: 64,
//!         frame_shift: 32,
//!         fft_length: 64,
//!         ..ResolutionConfig::default()
//!     }],
//!     ..LossConfig::default()
//! };
//! let mut layer = DftErrorLayer::new(config, 4096).unwrap();
//!
//! let target: Vec<f32> = (0..256).map(|t| (t as f32 * 0.1).sin()).collect();
//! let generated: Vec<f32> = (0..256).map(|t| (t as f32 * 0.1).sin() * 0.8).collect();
//! layer.link_target(&target).unwrap();
//!
//! let loss = layer.forward(&generated).unwrap();
//! assert!(loss > 0.0);
//! let grad = layer.backward();
//! assert_eq!(grad.len(), generated.len());
//! ```

mod config;
mod distance;
mod error;
mod loss;
mod lpc;
mod preemphasis;
mod spectrum;
mod window;

pub use crate::config::{
    AmplitudeScale, LossConfig, LpcErrorKind, ResolutionConfig, WindowKind,
};
pub use crate::error::{LossError, Result};
pub use crate::preemphasis::{de_emphasis, pre_emphasis, PRE_EMPHASIS_ALPHA};
pub use crate::loss::{
    DftErrorLayer, LossBreakdown, LpcTerm, PhaseTerm, RealSpectrumTerm, ResidualSpectrumTerm,
    ResolutionArena, SpectralAmplitudeTerm, TrainableLossComponent,
};
