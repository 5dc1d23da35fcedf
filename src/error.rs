//! Error types for the waveform loss layer.
//!
//! Configuration problems are fatal at construction: the layer refuses to
//! initialize rather than silently defaulting. Numerical singularities hit
//! during a pass (silent spectral bins, degenerate autocorrelation frames)
//! are not errors; they are recovered locally to zero contributions inside
//! the distance and LPC modules.

use thiserror::Error;

/// Errors raised by layer construction, target binding, and the forward
/// pass.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum LossError {
    /// Frame length of zero samples.
    #[error("frame length must be positive")]
    BadFrameLength,
    /// Frame shift of zero samples.
    #[error("frame shift must be positive")]
    BadFrameShift,
    /// Transform shorter than the frame it analyzes.
    #[error("fft length {fft_length} is shorter than frame length {frame_length}")]
    BadFftLength {
        fft_length: usize,
        frame_length: usize,
    },
    /// LPC order outside `1..frame_length`.
    #[error("lpc order {order} must lie in 1..{frame_length}")]
    BadLpcOrder { order: usize, frame_length: usize },
    /// A loss weight below zero (or NaN).
    #[error("weight `{name}` must be non-negative, got {value}")]
    NegativeWeight { name: &'static str, value: f32 },
    /// Signal dimension of zero channels.
    #[error("signal dimension must be positive")]
    BadSignalDim,
    /// Empty resolution list.
    #[error("at least one analysis resolution is required")]
    NoResolutions,
    /// Real-spectrum distance enabled without a transform length for it.
    #[error("real-spectrum weight is non-zero but no real-spectrum fft length is configured")]
    MissingRealSpecLength,
    /// Generated and target waveforms differ in length. Truncating or
    /// padding silently would corrupt the loss, so this is fatal.
    #[error("generated waveform has {generated} samples but target has {target}")]
    LengthMismatch { generated: usize, target: usize },
    /// `forward` called before `link_target`.
    #[error("no target waveform bound; call link_target first")]
    TargetNotBound,
    /// Multi-dimensional signal whose length is not a whole number of
    /// time steps.
    #[error("signal length {len} is not a multiple of signal dimension {dim}")]
    RaggedSignal { len: usize, dim: usize },
    /// Configuration document (de)serialization failure.
    #[error("configuration document error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for LossError {
    fn from(err: serde_json::Error) -> Self {
        LossError::Json(err.to_string())
    }
}

/// A specialized [`Result`](std::result::Result) type for loss-layer
/// operations.
pub type Result<T> = std::result::Result<T, LossError>;
