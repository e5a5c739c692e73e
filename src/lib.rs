//! Acquisition core for handheld gamma-spectrometry instruments.
//!
//! Gammalink talks to a scintillation detector head over a serial line and
//! turns its raw byte stream into calibrated, accumulated spectra.
//!
//! # Architecture
//!
//! - **Detector link** ([`link`]): resynchronizing binary framing plus the
//!   command/response handshake, driven by an async task that owns the
//!   serial port
//! - **Spectrum model** ([`spectrum`]): fixed-resolution channel arrays with
//!   count-conserving rebinning between hardware (2048) and library (1024)
//!   resolutions
//! - **Measurement processor** ([`processor`]): calibration, rate smoothing
//!   and per-package spectrum snapshots
//! - **Accumulation engine** ([`accumulation`]): collects snapshots into one
//!   result until a count target or time budget is reached
//!
//! # Quick start
//!
//! ```rust,no_run
//! use gammalink::{
//!     Accumulator, AccumulationConfig, DetectorLink, SerialConfig, processor,
//! };
//!
//! #[tokio::main]
//! async fn main() -> gammalink::Result<()> {
//!     let link = DetectorLink::open(&SerialConfig::new("/dev/ttyUSB0"))?;
//!     let processed = processor::spawn(link.subscribe());
//!
//!     let accumulator =
//!         Accumulator::spawn(AccumulationConfig::by_time(60.0), processed.subscribe())?;
//!     link.start()?;
//!     accumulator.start()?;
//!
//!     let mut results = accumulator.results();
//!     results.changed().await.ok();
//!     if let Some(result) = results.borrow().as_ref() {
//!         println!("{} counts", result.spectrum.total_count());
//!     }
//!     Ok(())
//! }
//! ```

mod error;

pub mod accumulation;
pub mod frame;
pub mod link;
pub mod processor;
pub mod spectrum;
pub mod stream;

pub use error::{AcquisitionError, Result};

pub use accumulation::{
    AccumulationConfig, AccumulationMode, AccumulationResult, AccumulationState, Accumulator,
    SpectrumSnapshot,
};
pub use frame::{HARDWARE_CHANNELS, InfoFrame, PackageFrame};
pub use link::{DetectorLink, LinkEvent, SerialConfig};
pub use processor::{Calibration, GcResponse, MeasurementProcessor, ProcessedSpectrum};
pub use spectrum::{HardwareSpectrum, LIBRARY_CHANNELS, LibrarySpectrum, Spectrum, rebin};
pub use stream::ThrottleExt;
