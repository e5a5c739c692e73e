//! Live measurement processing: packages in, calibrated spectra out.
//!
//! The [`MeasurementProcessor`] core is synchronous and owns the live
//! spectrum state; [`spawn`] wraps it in a task fed from the detector link's
//! event stream. Processed spectra go out two ways: a watch channel holding
//! the newest snapshot for display consumers, and a lossless broadcast
//! subscription for consumers that must see every package, like the
//! accumulation engine. A read event can drain several packages at once, so
//! coalescing the burst would lose counts.

mod calibration;

pub use calibration::{
    CS137_ENERGY_KEV, Calibration, GcResponse, K40_ENERGY_KEV, NOMINAL_RATIO,
};

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::frame::{InfoFrame, PackageFrame};
use crate::link::LinkEvent;
use crate::spectrum::{HardwareSpectrum, LibrarySpectrum, rebin};

/// Number of samples in the counts-per-second smoothing window.
const RATE_WINDOW: usize = 5;

/// Per-package fan-out capacity; sized for several seconds of packages.
const EVENT_CAPACITY: usize = 64;

/// One processed package: both spectrum resolutions plus the rates derived
/// from them. A fresh value is built per package; consumers must not assume
/// object identity across events.
#[derive(Debug, Clone)]
pub struct ProcessedSpectrum {
    /// Library-resolution spectrum, rebinned with the calibration ratio.
    pub library: LibrarySpectrum,
    /// Raw hardware-resolution spectrum.
    pub hardware: HardwareSpectrum,
    /// Instantaneous counts per second.
    pub cps: f64,
    /// Moving-average counts per second over the last few packages.
    pub smoothed_cps: f64,
}

/// Fixed-window moving average over the last [`RATE_WINDOW`] samples.
#[derive(Debug, Default)]
struct RateWindow {
    samples: [f64; RATE_WINDOW],
    len: usize,
    next: usize,
}

impl RateWindow {
    /// Insert a sample and return the average over the filled window.
    fn push(&mut self, value: f64) -> f64 {
        self.samples[self.next] = value;
        self.next = (self.next + 1) % RATE_WINDOW;
        self.len = (self.len + 1).min(RATE_WINDOW);
        self.samples[..self.len].iter().sum::<f64>() / self.len as f64
    }

    fn reset(&mut self) {
        self.len = 0;
        self.next = 0;
    }
}

/// The live measurement state: calibration, the origin (raw hardware)
/// spectrum of the latest package, the rate window and detector properties.
#[derive(Debug, Default)]
pub struct MeasurementProcessor {
    calibration: Option<Calibration>,
    origin: HardwareSpectrum,
    rate: RateWindow,
    gain: u16,
    temperature: i16,
    raw_temperature: i16,
}

impl MeasurementProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processor with calibration already loaded, for callers that restore
    /// it from persistence instead of the handshake.
    pub fn with_calibration(calibration: Calibration) -> Self {
        Self { calibration: Some(calibration), ..Self::default() }
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Raw hardware spectrum of the most recent package.
    pub fn origin(&self) -> &HardwareSpectrum {
        &self.origin
    }

    pub fn gain(&self) -> u16 {
        self.gain
    }

    /// Compensated detector temperature in tenths of a degree.
    pub fn temperature(&self) -> i16 {
        self.temperature
    }

    pub fn raw_temperature(&self) -> i16 {
        self.raw_temperature
    }

    /// Initialize calibration and detector properties from the handshake
    /// info frame.
    pub fn on_info(&mut self, info: &InfoFrame) {
        debug!(
            cs = info.cs_peak_channel,
            k40 = info.k40_peak_channel,
            "calibration loaded from detector info"
        );
        self.calibration = Some(Calibration::from_peaks(
            f64::from(info.cs_peak_channel),
            f64::from(info.k40_peak_channel),
        ));
        self.gain = info.gain;
        self.rate.reset();
    }

    /// Process one streamed package into a calibrated spectrum snapshot.
    ///
    /// Packages arriving before calibration is loaded are rejected.
    pub fn on_package(&mut self, pkg: &PackageFrame) -> Option<ProcessedSpectrum> {
        let Some(calibration) = &self.calibration else {
            debug!("package before calibration loaded, rejecting");
            return None;
        };

        self.origin = HardwareSpectrum::from_package(pkg);

        let mut library = LibrarySpectrum::new();
        rebin(&self.origin, &mut library, calibration.ratio());
        let real_time = f64::from(pkg.timestamp);
        library.set_real_time(real_time);
        library.set_detector_id(pkg.detector_code);
        library.set_fill_cps(f64::from(pkg.pileup_count) / real_time.max(1.0));

        let cps = library.total_count() / real_time.max(1.0);
        let smoothed_cps = self.rate.push(cps);

        self.gain = pkg.gain;
        self.temperature = pkg.temperature;
        self.raw_temperature = pkg.raw_temperature;

        trace!(cps, smoothed_cps, "package processed");
        Some(ProcessedSpectrum { library, hardware: self.origin.clone(), cps, smoothed_cps })
    }

    /// Apply a calibration-check response (see [`Calibration::apply_gc_response`]).
    ///
    /// Ignored until calibration has been loaded.
    pub fn on_gc_response(&mut self, response: &GcResponse) {
        match &mut self.calibration {
            Some(calibration) => calibration.apply_gc_response(response),
            None => debug!("gc response before calibration loaded, ignoring"),
        }
    }
}

/// Channels returned by [`spawn`].
pub struct ProcessorChannels {
    /// Latest processed spectrum; `None` until the first package lands.
    /// Latest-wins, for display consumers.
    pub spectra: watch::Receiver<Option<Arc<ProcessedSpectrum>>>,
    events: broadcast::Sender<Arc<ProcessedSpectrum>>,
    /// Cancellation token for graceful shutdown.
    pub cancel: CancellationToken,
}

impl ProcessorChannels {
    /// Lossless per-package subscription. Every processed spectrum is
    /// delivered, including bursts drained from a single read event.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ProcessedSpectrum>> {
        self.events.subscribe()
    }
}

/// Spawn a processing task fed from a link event subscription.
///
/// The task loads calibration from the handshake's `InfoReceived` event and
/// publishes every processed package on both output channels.
pub fn spawn(events: broadcast::Receiver<LinkEvent>) -> ProcessorChannels {
    let (tx, rx) = watch::channel(None);
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    let task_events = event_tx.clone();
    tokio::spawn(async move {
        processor_task(MeasurementProcessor::new(), events, tx, task_events, task_cancel).await;
    });

    ProcessorChannels { spectra: rx, events: event_tx, cancel }
}

async fn processor_task(
    mut processor: MeasurementProcessor,
    mut events: broadcast::Receiver<LinkEvent>,
    tx: watch::Sender<Option<Arc<ProcessedSpectrum>>>,
    event_tx: broadcast::Sender<Arc<ProcessedSpectrum>>,
    cancel: CancellationToken,
) {
    info!("processor task started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("processor task cancelled");
                break;
            }
            event = events.recv() => event,
        };

        match event {
            Ok(LinkEvent::InfoReceived(info)) => processor.on_info(&info),
            Ok(LinkEvent::PackageReceived(pkg)) => {
                if let Some(processed) = processor.on_package(&pkg) {
                    let processed = Arc::new(processed);
                    // send fails only without subscribers; the watch side
                    // below decides whether anyone is still listening
                    let _ = event_tx.send(Arc::clone(&processed));
                    if tx.send(Some(processed)).is_err() {
                        debug!("spectrum receiver dropped, shutting down");
                        break;
                    }
                }
            }
            Ok(LinkEvent::LinkError(e)) => {
                warn!(error = %e, "link error observed by processor");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "processor lagged behind link events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("link event stream closed");
                break;
            }
        }
    }
    info!("processor task ended");
}
