//! Async driver that runs the accumulation engine against live spectra.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::AccumulationConfig;
use super::engine::{AccumulationEngine, AccumulationResult, AccumulationState, EngineAction};
use crate::processor::ProcessedSpectrum;
use crate::{AcquisitionError, Result};

#[derive(Debug)]
enum EngineCommand {
    Start,
    Stop,
    AdjustTargetTime(f64),
    AdjustTargetCount(f64),
}

/// Handle to a running accumulation task.
///
/// The task exclusively owns the [`AccumulationEngine`] and both of its
/// timers; this handle sends control commands and exposes the engine's state
/// and latest result snapshot on watch channels. Dropping the handle cancels
/// the task.
pub struct Accumulator {
    commands: mpsc::UnboundedSender<EngineCommand>,
    state: watch::Receiver<AccumulationState>,
    results: watch::Receiver<Option<Arc<AccumulationResult>>>,
    cancel: CancellationToken,
}

impl Accumulator {
    /// Spawn the accumulation task over a lossless processed-spectrum
    /// subscription (see `ProcessorChannels::subscribe`).
    ///
    /// The engine must observe every spectrum, so the input is a broadcast
    /// receiver rather than the latest-wins watch channel the display side
    /// uses; a read event that drains several packages at once must
    /// accumulate all of them.
    pub fn spawn(
        config: AccumulationConfig,
        spectra: broadcast::Receiver<Arc<ProcessedSpectrum>>,
    ) -> Result<Self> {
        let engine = AccumulationEngine::new(config)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(AccumulationState::Idle);
        let (result_tx, result_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            accumulation_task(engine, spectra, command_rx, state_tx, result_tx, task_cancel)
                .await;
        });

        Ok(Self { commands: command_tx, state: state_rx, results: result_rx, cancel })
    }

    /// Engine state, updated on every transition.
    pub fn state(&self) -> watch::Receiver<AccumulationState> {
        self.state.clone()
    }

    /// Latest result snapshot; `None` until the first cycle begins.
    pub fn results(&self) -> watch::Receiver<Option<Arc<AccumulationResult>>> {
        self.results.clone()
    }

    pub fn start(&self) -> Result<()> {
        self.send(EngineCommand::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(EngineCommand::Stop)
    }

    /// Shift the cycle duration of a running time-based accumulation.
    pub fn adjust_target_time(&self, delta_seconds: f64) -> Result<()> {
        self.send(EngineCommand::AdjustTargetTime(delta_seconds))
    }

    /// Shift the target count of a running count-based accumulation.
    pub fn adjust_target_count(&self, delta_count: f64) -> Result<()> {
        self.send(EngineCommand::AdjustTargetCount(delta_count))
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| AcquisitionError::config("accumulation task is not running"))
    }
}

impl Drop for Accumulator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accumulation_task(
    mut engine: AccumulationEngine,
    mut spectra: broadcast::Receiver<Arc<ProcessedSpectrum>>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    state_tx: watch::Sender<AccumulationState>,
    result_tx: watch::Sender<Option<Arc<AccumulationResult>>>,
    cancel: CancellationToken,
) {
    info!("accumulation task started");
    let mut timeout: Option<Instant> = None;
    let mut interval: Option<Instant> = None;

    loop {
        let actions = tokio::select! {
            _ = cancel.cancelled() => {
                info!("accumulation task cancelled");
                break;
            }
            command = commands.recv() => {
                let now = Instant::now();
                match command {
                    Some(EngineCommand::Start) => match engine.start(now) {
                        Ok(actions) => actions,
                        Err(e) => {
                            warn!(error = %e, "start rejected");
                            Vec::new()
                        }
                    },
                    Some(EngineCommand::Stop) => engine.stop(now),
                    Some(EngineCommand::AdjustTargetTime(delta)) => {
                        match engine.adjust_target_time(delta, now) {
                            Ok(actions) => actions,
                            Err(e) => {
                                warn!(error = %e, "target time adjustment rejected");
                                Vec::new()
                            }
                        }
                    }
                    Some(EngineCommand::AdjustTargetCount(delta)) => {
                        match engine.adjust_target_count(delta, now) {
                            Ok(actions) => actions,
                            Err(e) => {
                                warn!(error = %e, "target count adjustment rejected");
                                Vec::new()
                            }
                        }
                    }
                    None => {
                        debug!("command sender dropped, shutting down");
                        break;
                    }
                }
            }
            event = spectra.recv() => {
                match event {
                    Ok(processed) => engine.on_spectrum(&processed, Instant::now()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "accumulator lagged behind spectrum events");
                        Vec::new()
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("spectrum stream closed");
                        break;
                    }
                }
            }
            _ = async { sleep_until(timeout.unwrap_or_else(Instant::now)).await },
                if timeout.is_some() =>
            {
                timeout = None;
                engine.on_timeout(Instant::now())
            }
            _ = async { sleep_until(interval.unwrap_or_else(Instant::now)).await },
                if interval.is_some() =>
            {
                interval = None;
                engine.on_interval(Instant::now())
            }
        };

        for action in actions {
            match action {
                EngineAction::ArmTimeout(duration) => timeout = Some(Instant::now() + duration),
                EngineAction::CancelTimeout => timeout = None,
                EngineAction::ArmInterval(duration) => {
                    interval = Some(Instant::now() + duration);
                }
                EngineAction::CancelInterval => interval = None,
                EngineAction::StateChanged(state) => {
                    let _ = state_tx.send(state);
                }
                EngineAction::Updated(result) => {
                    let _ = result_tx.send(Some(result));
                }
            }
        }
    }
    info!("accumulation task ended");
}
