//! Layer configuration: loss weights, analysis resolutions, and the
//! distance-kind selectors.
//!
//! The configuration is a plain serde document. The host network hands it
//! to [`crate::DftErrorLayer::new`] and can read it back verbatim through
//! [`LossConfig::export_json`] for reproducibility; no computed state is
//! ever serialized.

use serde::{Deserialize, Serialize};

use crate::error::{LossError, Result};

/// Window applied to a frame before analysis.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Identity window (no taper).
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

/// Scale on which spectral amplitudes are compared.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmplitudeScale {
    #[default]
    Linear,
    Log,
}

/// How the source and target LPC analyses are compared.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LpcErrorKind {
    /// Mean squared difference between the two residual signals.
    #[default]
    Residual,
    /// Squared difference between the final prediction-error energies.
    ResidualEnergy,
    /// Mean squared difference between the coefficient vectors.
    Coefficients,
}

/// One time-frequency analysis resolution.
///
/// Every enabled error family runs once per resolution; summing several
/// resolutions lets the loss probe different time-frequency trade-offs
/// simultaneously.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub frame_length: usize,
    pub frame_shift: usize,
    pub fft_length: usize,
    /// Window for amplitude, residual-spectrum, and LPC analysis.
    pub window: WindowKind,
    /// Window for phase analysis, configured separately.
    pub window_phase: WindowKind,
    pub lpc_order: usize,
    /// Transform length of the secondary real-valued-spectrum distance.
    /// Required when that distance is enabled.
    pub fft_length_real_spec: Option<usize>,
    /// Window for the real-valued-spectrum distance; falls back to
    /// `window` when unset.
    pub window_real_spec: Option<WindowKind>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            frame_length: 512,
            frame_shift: 256,
            fft_length: 512,
            window: WindowKind::Hann,
            window_phase: WindowKind::Hann,
            lpc_order: 16,
            fft_length_real_spec: None,
            window_real_spec: None,
        }
    }
}

/// Full configuration of the composite loss.
///
/// The aggregate loss is
///
/// ```text
/// loss = beta  * waveform MSE
///      + gamma * spectral-amplitude distance
///      + zeta  * phase distance
///      + eta   * residual-spectrum distance
///      + kappa * real-valued-spectrum distance
///      + tau   * lpc error
/// ```
///
/// A weight of zero disables its term entirely; no work is done for it in
/// either pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Waveform MSE weight.
    pub beta: f32,
    /// Spectral-amplitude distance weight.
    pub gamma: f32,
    /// Phase distance weight.
    pub zeta: f32,
    /// Residual-spectrum distance weight.
    pub eta: f32,
    /// Real-valued-spectrum distance weight.
    pub kappa: f32,
    /// LPC error weight.
    pub tau: f32,
    /// Apply first-order pre-emphasis to both waveforms before analysis.
    pub pre_emphasis: bool,
    /// Channels of an interleaved multi-dimensional signal. Flattened to
    /// one channel stream before analysis; gradients are re-interleaved.
    pub signal_dim: usize,
    pub spec_distance: AmplitudeScale,
    pub real_spec_distance: AmplitudeScale,
    pub lpc_error: LpcErrorKind,
    pub resolutions: Vec<ResolutionConfig>,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            beta: 1.0,
            gamma: 0.0,
            zeta: 0.0,
            eta: 0.0,
            kappa: 0.0,
            tau: 0.0,
            pre_emphasis: false,
            signal_dim: 1,
            spec_distance: AmplitudeScale::Linear,
            real_spec_distance: AmplitudeScale::Linear,
            lpc_error: LpcErrorKind::Residual,
            resolutions: Vec::new(),
        }
    }
}

impl LossConfig {
    /// Parse a configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize the stored options back into a configuration document.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every option that would otherwise corrupt a pass.
    ///
    /// Called once at layer construction; any violation refuses the whole
    /// configuration rather than defaulting.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("beta", self.beta),
            ("gamma", self.gamma),
            ("zeta", self.zeta),
            ("eta", self.eta),
            ("kappa", self.kappa),
            ("tau", self.tau),
        ];
        for (name, value) in weights {
            if !(value >= 0.0) {
                return Err(LossError::NegativeWeight { name, value });
            }
        }
        if self.signal_dim == 0 {
            return Err(LossError::BadSignalDim);
        }
        if self.resolutions.is_empty() {
            return Err(LossError::NoResolutions);
        }
        for res in &self.resolutions {
            if res.frame_length == 0 {
                return Err(LossError::BadFrameLength);
            }
            if res.frame_shift == 0 {
                return Err(LossError::BadFrameShift);
            }
            if res.fft_length < res.frame_length {
                return Err(LossError::BadFftLength {
                    fft_length: res.fft_length,
                    frame_length: res.frame_length,
                });
            }
            if self.tau > 0.0 && (res.lpc_order == 0 || res.lpc_order >= res.frame_length) {
                return Err(LossError::BadLpcOrder {
                    order: res.lpc_order,
                    frame_length: res.frame_length,
                });
            }
            if self.kappa > 0.0 {
                match res.fft_length_real_spec {
                    None => return Err(LossError::MissingRealSpecLength),
                    Some(n) if n < res.frame_length => {
                        return Err(LossError::BadFftLength {
                            fft_length: n,
                            frame_length: res.frame_length,
                        })
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> LossConfig {
        LossConfig {
            gamma: 1.0,
            resolutions: vec![ResolutionConfig::default()],
            ..LossConfig::default()
        }
    }

    #[test]
    fn default_config_has_no_resolutions() {
        assert_eq!(LossConfig::default().validate(), Err(LossError::NoResolutions));
    }

    #[test]
    fn valid_config_passes() {
        assert_eq!(base_config().validate(), Ok(()));
    }

    #[test]
    fn negative_weight_rejected() {
        let config = LossConfig {
            zeta: -0.5,
            ..base_config()
        };
        assert_eq!(
            config.validate(),
            Err(LossError::NegativeWeight {
                name: "zeta",
                value: -0.5
            })
        );
    }

    #[test]
    fn nan_weight_rejected() {
        let config = LossConfig {
            tau: f32::NAN,
            ..base_config()
        };
        assert!(matches!(
            config.validate(),
            Err(LossError::NegativeWeight { name: "tau", .. })
        ));
    }

    #[test]
    fn short_fft_rejected() {
        let mut config = base_config();
        config.resolutions[0].fft_length = 256;
        assert_eq!(
            config.validate(),
            Err(LossError::BadFftLength {
                fft_length: 256,
                frame_length: 512,
            })
        );
    }

    #[test]
    fn lpc_order_only_checked_when_enabled() {
        let mut config = base_config();
        config.resolutions[0].lpc_order = 0;
        assert_eq!(config.validate(), Ok(()));
        config.tau = 0.1;
        assert!(matches!(
            config.validate(),
            Err(LossError::BadLpcOrder { order: 0, .. })
        ));
    }

    #[test]
    fn real_spec_needs_its_fft_length() {
        let mut config = base_config();
        config.kappa = 0.2;
        assert_eq!(config.validate(), Err(LossError::MissingRealSpecLength));
        config.resolutions[0].fft_length_real_spec = Some(1024);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn json_round_trip() {
        let mut config = base_config();
        config.zeta = 0.25;
        config.pre_emphasis = true;
        config.lpc_error = LpcErrorKind::Coefficients;
        config.resolutions[0].window_phase = WindowKind::Rectangular;
        let text = config.export_json().unwrap();
        let back = LossConfig::from_json(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config = LossConfig::from_json(
            r#"{"gamma": 2.0, "resolutions": [{"frame_length": 128, "frame_shift": 64, "fft_length": 128}]}"#,
        )
        .unwrap();
        assert_eq!(config.beta, 1.0);
        assert_eq!(config.gamma, 2.0);
        assert_eq!(config.resolutions[0].window, WindowKind::Hann);
        assert_eq!(config.resolutions[0].lpc_order, 16);
    }

    #[test]
    fn unknown_window_name_fails() {
        let parsed = LossConfig::from_json(
            r#"{"resolutions": [{"frame_length": 128, "frame_shift": 64, "fft_length": 128, "window": "welch"}]}"#,
        );
        assert!(parsed.is_err());
    }
}
