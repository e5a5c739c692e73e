//! End-to-end acquisition tests over a scripted transport.
//!
//! Time is paused; the runtime auto-advances past armed timers whenever the
//! tasks go idle, which makes handshake timeouts deterministic.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Duration, timeout};
use tokio_stream::wrappers::BroadcastStream;

use gammalink::accumulation::{AccumulationConfig, AccumulationState, Accumulator};
use gammalink::frame::{HARDWARE_CHANNELS, InfoFrame, PackageFrame};
use gammalink::link::{
    CMD_GET_INFO, CMD_START_STREAMING, CMD_STOP_STREAMING, DetectorLink, LinkEvent, Transport,
};
use gammalink::processor::{self, ProcessedSpectrum};
use gammalink::spectrum::{HardwareSpectrum, LIBRARY_CHANNELS, LibrarySpectrum};
use gammalink::stream::ThrottleExt;

/// Transport fed and observed through channels by the test body.
struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    sent: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn read(&mut self, buf: &mut [u8]) -> gammalink::Result<usize> {
        match self.incoming.recv().await {
            Some(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> gammalink::Result<()> {
        let _ = self.sent.send(bytes.to_vec());
        Ok(())
    }
}

/// Spawned link plus the test's ends of the transport channels.
struct Harness {
    link: DetectorLink,
    events: broadcast::Receiver<LinkEvent>,
    feed: mpsc::UnboundedSender<Vec<u8>>,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Harness {
    fn spawn() -> Self {
        let (feed, incoming) = mpsc::unbounded_channel();
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let link = DetectorLink::spawn(MockTransport { incoming, sent: sent_tx });
        let events = link.subscribe();
        Self { link, events, feed, sent }
    }

    async fn expect_sent(&mut self, expected: &[u8]) {
        let bytes = timeout(Duration::from_secs(30), self.sent.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("link task dropped its transport");
        assert_eq!(bytes, expected);
    }

    async fn next_event(&mut self) -> LinkEvent {
        timeout(Duration::from_secs(30), self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed")
    }

    /// Run the full handshake: stop silence, info response, start ack.
    async fn handshake(&mut self) -> Arc<InfoFrame> {
        self.link.start().unwrap();
        self.expect_sent(CMD_STOP_STREAMING).await;
        // silence; the 1000 ms timer fires and advances the handshake
        self.expect_sent(CMD_GET_INFO).await;
        self.feed.send(detector_info().encode().to_vec()).unwrap();
        let info = match self.next_event().await {
            LinkEvent::InfoReceived(info) => info,
            other => panic!("expected InfoReceived, got {other:?}"),
        };
        self.expect_sent(CMD_START_STREAMING).await;
        info
    }
}

fn detector_info() -> InfoFrame {
    InfoFrame {
        gain: 512,
        k40_channel: 1461,
        detector_code: 3,
        cs_peak_channel: 662,
        k40_peak_channel: 1461,
        temperature: Some(245),
        serial: *b"GM4711",
    }
}

fn package(timestamp: u32, counts: u16) -> PackageFrame {
    PackageFrame {
        channels: Box::new([counts; HARDWARE_CHANNELS]),
        neutron_count: 0,
        pileup_count: 0,
        temperature: 245,
        raw_temperature: 1012,
        timestamp,
        detector_code: 3,
        gain: 512,
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_reaches_streaming_and_reports_info() {
    let mut harness = Harness::spawn();
    let info = harness.handshake().await;
    assert_eq!(info.serial_string(), "GM4711");
    assert_eq!(info.cs_peak_channel, 662);
}

#[tokio::test(start_paused = true)]
async fn three_silent_responses_fail_the_link_once() {
    let mut harness = Harness::spawn();
    harness.link.start().unwrap();
    harness.expect_sent(CMD_STOP_STREAMING).await;
    harness.expect_sent(CMD_GET_INFO).await;
    // no info response; two retries resend the identical command
    harness.expect_sent(CMD_GET_INFO).await;
    harness.expect_sent(CMD_GET_INFO).await;
    match harness.next_event().await {
        LinkEvent::LinkError(e) => assert!(e.to_string().contains("attempts")),
        other => panic!("expected LinkError, got {other:?}"),
    }

    // the link is idle again and accepts a new session
    harness.link.start().unwrap();
    harness.expect_sent(CMD_STOP_STREAMING).await;
}

#[tokio::test(start_paused = true)]
async fn packages_stream_across_arbitrary_read_boundaries() {
    let mut harness = Harness::spawn();
    harness.handshake().await;

    // two packages delivered as uneven chunks with garbage up front
    let mut bytes = b"\x00\xff\x00".to_vec();
    bytes.extend_from_slice(&package(1, 2).encode());
    bytes.extend_from_slice(&package(2, 2).encode());
    for chunk in bytes.chunks(1500) {
        harness.feed.send(chunk.to_vec()).unwrap();
    }

    for expected in [1u32, 2] {
        match harness.next_event().await {
            LinkEvent::PackageReceived(pkg) => {
                assert_eq!(pkg.timestamp, expected);
                assert_eq!(pkg.total_count(), u64::from(2u16) * 2048);
            }
            other => panic!("expected PackageReceived, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn pipeline_processes_packages_into_calibrated_spectra() {
    let mut harness = Harness::spawn();
    let channels = processor::spawn(harness.link.subscribe());
    let mut spectra = channels.spectra.clone();

    harness.handshake().await;
    harness.feed.send(package(10, 1).encode()).unwrap();

    timeout(Duration::from_secs(30), spectra.changed()).await.unwrap().unwrap();
    let processed = spectra.borrow_and_update().clone().unwrap();
    // 2048 counts conserved through the rebin to library resolution
    assert_eq!(processed.library.len(), LIBRARY_CHANNELS);
    assert!((processed.library.total_count() - 2048.0).abs() < 1e-6);
    assert_eq!(processed.library.real_time(), 10.0);
    assert!((processed.cps - 204.8).abs() < 1e-6);

    channels.cancel.cancel();
}

fn processed_spectrum(counts_per_channel: f64) -> Arc<ProcessedSpectrum> {
    let mut library = LibrarySpectrum::new();
    library
        .set_data(&[counts_per_channel; LIBRARY_CHANNELS])
        .unwrap();
    let mut hardware = HardwareSpectrum::new();
    hardware
        .set_data(&[counts_per_channel / 2.0; HARDWARE_CHANNELS])
        .unwrap();
    let cps = library.total_count();
    Arc::new(ProcessedSpectrum { library, hardware, cps, smoothed_cps: cps })
}

async fn wait_for_state(
    states: &mut watch::Receiver<AccumulationState>,
    expected: AccumulationState,
) {
    timeout(Duration::from_secs(120), states.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn count_mode_completes_when_target_is_crossed() {
    let (tx, rx) = broadcast::channel(64);
    let accumulator = Accumulator::spawn(AccumulationConfig::by_count(2000.0), rx).unwrap();
    let mut states = accumulator.state();
    let mut results = accumulator.results();

    accumulator.start().unwrap();
    wait_for_state(&mut states, AccumulationState::Measuring).await;

    // 1024 hardware counts per update; the second crosses the target
    tx.send(processed_spectrum(1.0)).unwrap();
    timeout(Duration::from_secs(30), results.changed()).await.unwrap().unwrap();
    tx.send(processed_spectrum(1.0)).unwrap();

    wait_for_state(&mut states, AccumulationState::Idle).await;
    let result = results.borrow().clone().unwrap();
    assert!(result.condition_met);
    assert_eq!(result.samples, 2);
    assert_eq!(result.spectrum.total_count(), 2048.0);
}

#[tokio::test(start_paused = true)]
async fn timed_cycle_completes_on_its_own() {
    let (_tx, rx) = broadcast::channel::<Arc<ProcessedSpectrum>>(64);
    let accumulator = Accumulator::spawn(AccumulationConfig::by_time(10.0), rx).unwrap();
    let mut states = accumulator.state();

    accumulator.start().unwrap();
    wait_for_state(&mut states, AccumulationState::Measuring).await;
    // paused time fast-forwards the 10 s cycle timer
    wait_for_state(&mut states, AccumulationState::Idle).await;

    let result = accumulator.results().borrow().clone().unwrap();
    assert!(result.condition_met);
    assert!((result.elapsed_seconds - 10.0).abs() < 0.5);
}

#[tokio::test(start_paused = true)]
async fn continuous_mode_restarts_after_the_interval() {
    let (tx, rx) = broadcast::channel(64);
    let config = AccumulationConfig::by_time(5.0).continuous(2.0);
    let accumulator = Accumulator::spawn(config, rx).unwrap();
    let mut states = accumulator.state();

    accumulator.start().unwrap();
    wait_for_state(&mut states, AccumulationState::Measuring).await;
    tx.send(processed_spectrum(1.0)).unwrap();

    // first cycle ends, pause, second cycle begins with a fresh snapshot
    wait_for_state(&mut states, AccumulationState::Waiting).await;
    wait_for_state(&mut states, AccumulationState::Measuring).await;
    let result = accumulator.results().borrow().clone().unwrap();
    assert!(result.condition_met);

    accumulator.stop().unwrap();
    wait_for_state(&mut states, AccumulationState::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn manual_stop_leaves_a_consistent_incomplete_result() {
    let (tx, rx) = broadcast::channel(64);
    let accumulator = Accumulator::spawn(AccumulationConfig::by_time(3600.0), rx).unwrap();
    let mut states = accumulator.state();
    let mut results = accumulator.results();

    accumulator.start().unwrap();
    wait_for_state(&mut states, AccumulationState::Measuring).await;
    tx.send(processed_spectrum(1.0)).unwrap();
    timeout(Duration::from_secs(30), results.changed()).await.unwrap().unwrap();

    accumulator.stop().unwrap();
    wait_for_state(&mut states, AccumulationState::Idle).await;
    let result = results.borrow().clone().unwrap();
    assert!(!result.condition_met);
    assert_eq!(result.samples, 1);
    assert_eq!(result.spectrum.total_count(), 1024.0);
}

#[tokio::test(start_paused = true)]
async fn bursts_of_spectra_are_all_accumulated() {
    let (tx, rx) = broadcast::channel(64);
    let accumulator =
        Accumulator::spawn(AccumulationConfig::by_count(1_000_000.0), rx).unwrap();
    let mut states = accumulator.state();
    let mut results = accumulator.results();

    accumulator.start().unwrap();
    wait_for_state(&mut states, AccumulationState::Measuring).await;

    // one read event can drain several packages back to back; every update
    // must reach the engine, not just the newest
    for _ in 0..5 {
        tx.send(processed_spectrum(1.0)).unwrap();
    }

    let result = timeout(
        Duration::from_secs(30),
        results.wait_for(|r| r.as_ref().is_some_and(|r| r.samples == 5)),
    )
    .await
    .expect("timed out waiting for all five updates")
    .unwrap()
    .clone()
    .unwrap();
    assert_eq!(result.spectrum.total_count(), 5120.0);
    assert!(!result.condition_met);
}

#[tokio::test(start_paused = true)]
async fn ui_rate_throttling_keeps_the_freshest_spectrum() {
    let mut harness = Harness::spawn();
    let channels = processor::spawn(harness.link.subscribe());
    let mut spectra = channels.spectra.clone();
    let mut throttled =
        BroadcastStream::new(channels.subscribe()).throttle(Duration::from_millis(500));

    harness.handshake().await;
    for timestamp in 1..=3u32 {
        harness.feed.send(package(timestamp, 1).encode()).unwrap();
    }
    timeout(
        Duration::from_secs(30),
        spectra.wait_for(|s| s.as_ref().is_some_and(|p| p.library.real_time() == 3.0)),
    )
    .await
    .unwrap()
    .unwrap();

    // the burst collapses; the display side sees only the newest snapshot
    let processed = timeout(Duration::from_secs(30), throttled.next())
        .await
        .expect("timed out waiting for a throttled spectrum")
        .expect("spectrum stream closed")
        .expect("display subscriber lagged");
    assert_eq!(processed.library.real_time(), 3.0);

    channels.cancel.cancel();
}
