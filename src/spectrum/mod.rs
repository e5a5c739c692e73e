//! Channel-count spectrum container.
//!
//! Spectra exist at two fixed resolutions: the detector hardware's 2048
//! channels and the isotope library's 1024 channels. The two are distinct
//! types and are never mixed silently; converting between them goes through
//! the explicit [`rebin`] operation.

mod rebin;

pub use rebin::rebin;

use crate::frame::{HARDWARE_CHANNELS, PackageFrame};
use crate::{AcquisitionError, Result};

/// Number of channels in the isotope library's resolution.
pub const LIBRARY_CHANNELS: usize = 1024;

/// Spectrum at detector hardware resolution.
pub type HardwareSpectrum = Spectrum<HARDWARE_CHANNELS>;

/// Spectrum at isotope library resolution.
pub type LibrarySpectrum = Spectrum<LIBRARY_CHANNELS>;

/// A fixed-length array of channel counts plus acquisition metadata.
///
/// Invariant: after [`Spectrum::update`] (which every mutating operation
/// performs), `total_count() == sum(channels) + fill_cps()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum<const N: usize> {
    channels: Box<[f64; N]>,
    acquisition_time: f64,
    real_time: f64,
    total_count: f64,
    fill_cps: f64,
    detector_id: u16,
}

impl<const N: usize> Default for Spectrum<N> {
    fn default() -> Self {
        Self {
            channels: Box::new([0.0; N]),
            acquisition_time: 0.0,
            real_time: 0.0,
            total_count: 0.0,
            fill_cps: 0.0,
            detector_id: 0,
        }
    }
}

impl<const N: usize> Spectrum<N> {
    /// Create an empty spectrum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel counts.
    pub fn channels(&self) -> &[f64; N] {
        &self.channels
    }

    /// Number of channels.
    pub const fn len(&self) -> usize {
        N
    }

    /// Whether the spectrum holds any counts.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0.0
    }

    /// Accumulated acquisition (live) time in seconds.
    pub fn acquisition_time(&self) -> f64 {
        self.acquisition_time
    }

    /// Accumulated real (wall-clock) time in seconds.
    pub fn real_time(&self) -> f64 {
        self.real_time
    }

    pub fn set_real_time(&mut self, seconds: f64) {
        self.real_time = seconds;
    }

    pub fn set_acquisition_time(&mut self, seconds: f64) {
        self.acquisition_time = seconds;
    }

    /// Total count: sum of all channels plus the fill rate.
    pub fn total_count(&self) -> f64 {
        self.total_count
    }

    /// Fill rate in counts per second.
    pub fn fill_cps(&self) -> f64 {
        self.fill_cps
    }

    pub fn set_fill_cps(&mut self, cps: f64) {
        self.fill_cps = cps;
        self.update();
    }

    pub fn detector_id(&self) -> u16 {
        self.detector_id
    }

    pub fn set_detector_id(&mut self, id: u16) {
        self.detector_id = id;
    }

    /// Recompute the total-count invariant from the channel array.
    pub fn update(&mut self) {
        self.total_count = self.channels.iter().sum::<f64>() + self.fill_cps;
    }

    /// Replace the channel array.
    ///
    /// The slice length must match the spectrum's resolution.
    pub fn set_data(&mut self, data: &[f64]) -> Result<()> {
        if data.len() != N {
            return Err(AcquisitionError::config(format!(
                "spectrum data length {} does not match {} channels",
                data.len(),
                N
            )));
        }
        self.channels.copy_from_slice(data);
        self.update();
        Ok(())
    }

    /// Element-wise addition of another spectrum of the same resolution,
    /// summing acquisition time, real time and fill rate.
    pub fn accumulate(&mut self, other: &Self) {
        for (mine, theirs) in self.channels.iter_mut().zip(other.channels.iter()) {
            *mine += *theirs;
        }
        self.acquisition_time += other.acquisition_time;
        self.real_time += other.real_time;
        self.fill_cps += other.fill_cps;
        self.update();
    }

    /// Zero all channels and metadata.
    pub fn reset(&mut self) {
        self.channels.fill(0.0);
        self.acquisition_time = 0.0;
        self.real_time = 0.0;
        self.fill_cps = 0.0;
        self.update();
    }

    /// Serialize the channel array as a comma-separated decimal list.
    ///
    /// Lossless for integer-valued data; within floating rounding otherwise.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(N * 4);
        for (i, value) in self.channels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&value.to_string());
        }
        out
    }

    /// Parse a channel array previously produced by [`Self::to_text`].
    pub fn from_text(text: &str) -> Result<Self> {
        let mut spectrum = Self::new();
        let mut count = 0;
        for (i, token) in text.split(',').enumerate() {
            if i >= N {
                return Err(AcquisitionError::parse(
                    "spectrum text",
                    format!("more than {N} values"),
                ));
            }
            spectrum.channels[i] = token.trim().parse::<f64>().map_err(|e| {
                AcquisitionError::parse("spectrum text", format!("value {i}: {e}"))
            })?;
            count += 1;
        }
        if count != N {
            return Err(AcquisitionError::parse(
                "spectrum text",
                format!("expected {N} values, got {count}"),
            ));
        }
        spectrum.update();
        Ok(spectrum)
    }
}

impl HardwareSpectrum {
    /// Build a hardware-resolution spectrum from a streamed package.
    pub fn from_package(pkg: &PackageFrame) -> Self {
        let mut spectrum = Self::new();
        for (slot, &count) in spectrum.channels.iter_mut().zip(pkg.channels.iter()) {
            *slot = f64::from(count);
        }
        spectrum.real_time = f64::from(pkg.timestamp);
        spectrum.detector_id = pkg.detector_code;
        spectrum.update();
        spectrum
    }
}
