//! Energy calibration derived from tracked reference peaks.
//!
//! The detector reports the observed channel positions of two standard
//! reference peaks, Cs-137 at 661.657 keV and K-40 at 1460.822 keV. A
//! quadratic through the origin pinned to those two points maps channel to
//! energy; the hardware-to-library rebin ratio is rescaled by the Cs-137
//! peak's drift from its stored position.

use tracing::{debug, warn};

/// Cs-137 reference energy in keV.
pub const CS137_ENERGY_KEV: f64 = 661.657;

/// K-40 reference energy in keV.
pub const K40_ENERGY_KEV: f64 = 1460.822;

/// Nominal hardware-to-library channel ratio (2048 / 1024).
pub const NOMINAL_RATIO: f64 = 2.0;

/// Calibration-check message from the detector carrying newly observed
/// reference-peak positions and the current gain-control value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcResponse {
    pub cs_peak_channel: f64,
    pub k40_peak_channel: f64,
    pub gain_control: f64,
}

/// Channel-to-energy mapping plus the rebin ratio it implies.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    ratio: f64,
    /// Energy polynomial `[a, b, c]`: `E(x) = a + b*x + c*x^2`. The fit is
    /// through the origin so `a` stays zero.
    coefficients: [f64; 3],
    cs_peak_channel: f64,
    k40_peak_channel: f64,
    gain_control: f64,
}

impl Calibration {
    /// Calibration pinned to the given reference-peak channel positions.
    pub fn from_peaks(cs_peak_channel: f64, k40_peak_channel: f64) -> Self {
        let coefficients = fit_quadratic(cs_peak_channel, k40_peak_channel);
        Self {
            ratio: NOMINAL_RATIO,
            coefficients,
            cs_peak_channel,
            k40_peak_channel,
            gain_control: 0.0,
        }
    }

    /// Hardware-to-library rebin ratio.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Energy polynomial coefficients `[a, b, c]`.
    pub fn coefficients(&self) -> [f64; 3] {
        self.coefficients
    }

    pub fn cs_peak_channel(&self) -> f64 {
        self.cs_peak_channel
    }

    pub fn k40_peak_channel(&self) -> f64 {
        self.k40_peak_channel
    }

    /// Last gain-control value reported by the detector.
    pub fn gain_control(&self) -> f64 {
        self.gain_control
    }

    /// Channel-to-energy evaluation in keV.
    pub fn energy_at(&self, channel: f64) -> f64 {
        let [a, b, c] = self.coefficients;
        a + b * channel + c * channel * channel
    }

    /// Apply a calibration-check response.
    ///
    /// When the observed peak positions have drifted from the stored ones the
    /// energy fit and the rebin ratio are recomputed; the gain-control value
    /// is taken over unconditionally. Non-positive observed peaks mean the
    /// peak search failed, so they never reach the fit; a zero Cs channel
    /// would zero the ratio and collapse every later rebin.
    pub fn apply_gc_response(&mut self, response: &GcResponse) {
        let usable = response.cs_peak_channel > 0.0 && response.k40_peak_channel > 0.0;
        if !usable {
            warn!(
                cs = response.cs_peak_channel,
                k40 = response.k40_peak_channel,
                "non-positive reference peaks, skipping recalibration"
            );
            self.gain_control = response.gain_control;
            return;
        }
        let drifted = response.cs_peak_channel != self.cs_peak_channel
            || response.k40_peak_channel != self.k40_peak_channel;
        if drifted && self.cs_peak_channel > 0.0 {
            debug!(
                cs = response.cs_peak_channel,
                k40 = response.k40_peak_channel,
                "reference peaks drifted, recalibrating"
            );
            self.ratio = NOMINAL_RATIO * response.cs_peak_channel / self.cs_peak_channel;
            self.coefficients =
                fit_quadratic(response.cs_peak_channel, response.k40_peak_channel);
            self.cs_peak_channel = response.cs_peak_channel;
            self.k40_peak_channel = response.k40_peak_channel;
        }
        self.gain_control = response.gain_control;
    }
}

/// Quadratic through the origin pinned to the two reference peaks:
/// `E(x) = b*x + c*x^2` with `E(x1) = E_Cs` and `E(x2) = E_K40`.
fn fit_quadratic(cs_channel: f64, k40_channel: f64) -> [f64; 3] {
    let (x1, x2) = (cs_channel, k40_channel);
    let d = x1 * x2 * (x2 - x1);
    if d == 0.0 {
        return [0.0, 0.0, 0.0];
    }
    let b = (CS137_ENERGY_KEV * x2 * x2 - K40_ENERGY_KEV * x1 * x1) / d;
    let c = (K40_ENERGY_KEV * x1 - CS137_ENERGY_KEV * x2) / d;
    [0.0, b, c]
}
