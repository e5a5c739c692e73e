//! Accumulation state machine.
//!
//! Like the link protocol, the engine core is synchronous: callers feed it
//! processed spectra, timer expirations and control calls together with the
//! current time, and it returns the [`EngineAction`]s to perform. The async
//! driver owns the actual timers and channels.

use std::sync::Arc;

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::config::{AccumulationConfig, AccumulationMode};
use crate::processor::ProcessedSpectrum;
use crate::spectrum::{HardwareSpectrum, LibrarySpectrum};
use crate::{AcquisitionError, Result};

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulationState {
    #[default]
    Idle,
    /// Between cycles: either just started or pausing for the continuous
    /// interval.
    Waiting,
    Measuring,
    Completed,
}

/// The accumulating spectrum, at the resolution implied by the mode:
/// hardware resolution for count-based runs, library resolution for
/// time-based runs.
#[derive(Debug, Clone)]
pub enum SpectrumSnapshot {
    Library(LibrarySpectrum),
    Hardware(HardwareSpectrum),
}

impl SpectrumSnapshot {
    fn for_mode(mode: AccumulationMode) -> Self {
        if mode.is_count_based() {
            Self::Hardware(HardwareSpectrum::new())
        } else {
            Self::Library(LibrarySpectrum::new())
        }
    }

    fn accumulate(&mut self, processed: &ProcessedSpectrum) {
        match self {
            Self::Library(s) => s.accumulate(&processed.library),
            Self::Hardware(s) => s.accumulate(&processed.hardware),
        }
    }

    pub fn total_count(&self) -> f64 {
        match self {
            Self::Library(s) => s.total_count(),
            Self::Hardware(s) => s.total_count(),
        }
    }
}

/// One accumulation cycle's outcome, kept current while measuring and
/// frozen by finalization. Replaced wholesale at the start of the next
/// cycle.
#[derive(Debug, Clone)]
pub struct AccumulationResult {
    pub spectrum: SpectrumSnapshot,
    pub started_at: Instant,
    /// Projected finish (`started_at + timeout`); moves under
    /// [`AccumulationEngine::adjust_target_time`].
    pub finishes_at: Instant,
    pub samples: u64,
    /// Displayed counts per second over the cycle so far.
    pub cps: f64,
    pub elapsed_seconds: f64,
    /// Whether the configured stopping condition was met (as opposed to a
    /// safety-bound expiry or a manual stop).
    pub condition_met: bool,
}

/// Side effects requested by an engine transition, in order.
#[derive(Debug)]
pub enum EngineAction {
    /// Arm (or re-arm) the cycle timer.
    ArmTimeout(Duration),
    CancelTimeout,
    /// Arm the continuous inter-cycle pause timer.
    ArmInterval(Duration),
    CancelInterval,
    /// Publish a state transition.
    StateChanged(AccumulationState),
    /// Publish the current result snapshot.
    Updated(Arc<AccumulationResult>),
}

/// The accumulation engine core.
#[derive(Debug)]
pub struct AccumulationEngine {
    config: AccumulationConfig,
    state: AccumulationState,
    result: Option<AccumulationResult>,
}

impl AccumulationEngine {
    pub fn new(config: AccumulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, state: AccumulationState::Idle, result: None })
    }

    pub fn state(&self) -> AccumulationState {
        self.state
    }

    pub fn config(&self) -> &AccumulationConfig {
        &self.config
    }

    /// Last result snapshot, surviving completion and manual stop until the
    /// next cycle begins.
    pub fn result(&self) -> Option<&AccumulationResult> {
        self.result.as_ref()
    }

    /// Begin a run. Only valid from `Idle`.
    pub fn start(&mut self, now: Instant) -> Result<Vec<EngineAction>> {
        if self.state != AccumulationState::Idle {
            return Err(AcquisitionError::config(format!(
                "start() is only valid from Idle (current state {:?})",
                self.state
            )));
        }
        debug!(mode = ?self.config.mode, "starting accumulation");
        let mut actions = Vec::new();
        self.set_state(AccumulationState::Waiting, &mut actions);
        self.begin_cycle(now, &mut actions);
        Ok(actions)
    }

    /// Feed one processed spectrum. Ignored outside `Measuring`.
    pub fn on_spectrum(
        &mut self,
        processed: &ProcessedSpectrum,
        now: Instant,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if self.state != AccumulationState::Measuring {
            return actions;
        }
        let Some(result) = self.result.as_mut() else {
            return actions;
        };

        result.spectrum.accumulate(processed);
        result.samples += 1;
        result.elapsed_seconds = (now - result.started_at).as_secs_f64();
        result.cps = result.spectrum.total_count() / result.elapsed_seconds.max(1.0);
        actions.push(EngineAction::Updated(Arc::new(result.clone())));

        // The count threshold beats a pending safety timer.
        if self.config.mode.is_count_based()
            && result.spectrum.total_count() >= self.config.target_count
        {
            self.finalize(true, now, &mut actions);
        }
        actions
    }

    /// Cycle timer expiry: the stopping condition for time-based modes, a
    /// safety-bound expiry for count-based modes.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if self.state != AccumulationState::Measuring {
            warn!(state = ?self.state, "spurious accumulation timeout");
            return actions;
        }
        let condition_met = self.config.mode.is_time_based();
        self.finalize(condition_met, now, &mut actions);
        actions
    }

    /// Continuous inter-cycle pause expiry: begin the next cycle.
    pub fn on_interval(&mut self, now: Instant) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if self.state != AccumulationState::Waiting {
            warn!(state = ?self.state, "spurious interval timer");
            return actions;
        }
        self.begin_cycle(now, &mut actions);
        actions
    }

    /// Manual stop from any state: cancel both timers and go idle. From
    /// `Measuring` the cycle is finalized as condition-not-met first, so
    /// observers see the same `Completed` passage as a safety-bound expiry
    /// and a consistent, if incomplete, result.
    pub fn stop(&mut self, now: Instant) -> Vec<EngineAction> {
        debug!(state = ?self.state, "stopping accumulation");
        let mut actions = vec![EngineAction::CancelInterval];
        if self.state == AccumulationState::Measuring {
            self.finalize(false, now, &mut actions);
        } else {
            actions.push(EngineAction::CancelTimeout);
            self.set_state(AccumulationState::Idle, &mut actions);
        }
        actions
    }

    /// Shift the configured cycle duration; time-based modes only. The
    /// duration is floored at one second. While measuring, the timer is
    /// re-armed with the remaining time, or the cycle completes immediately
    /// if the new target has already elapsed.
    pub fn adjust_target_time(
        &mut self,
        delta_seconds: f64,
        now: Instant,
    ) -> Result<Vec<EngineAction>> {
        if !self.config.mode.is_time_based() {
            return Err(AcquisitionError::config(
                "target time adjustment requires a time-based mode",
            ));
        }
        self.config.timeout_seconds = (self.config.timeout_seconds + delta_seconds).max(1.0);

        let mut actions = Vec::new();
        if let Some(result) = self.result.as_mut() {
            result.finishes_at =
                result.started_at + Duration::from_secs_f64(self.config.timeout_seconds);
            if self.state == AccumulationState::Measuring {
                if result.finishes_at <= now {
                    self.finalize(true, now, &mut actions);
                } else {
                    actions.push(EngineAction::ArmTimeout(result.finishes_at - now));
                    actions.push(EngineAction::Updated(Arc::new(result.clone())));
                }
            }
        }
        Ok(actions)
    }

    /// Shift the target count; count-based modes only. The target is floored
    /// at one count. While measuring, the cycle completes immediately if the
    /// accumulated count already meets the new target.
    pub fn adjust_target_count(
        &mut self,
        delta_count: f64,
        now: Instant,
    ) -> Result<Vec<EngineAction>> {
        if !self.config.mode.is_count_based() {
            return Err(AcquisitionError::config(
                "target count adjustment requires a count-based mode",
            ));
        }
        self.config.target_count = (self.config.target_count + delta_count).max(1.0);

        let mut actions = Vec::new();
        let reached = self.state == AccumulationState::Measuring
            && self
                .result
                .as_ref()
                .is_some_and(|r| r.spectrum.total_count() >= self.config.target_count);
        if reached {
            self.finalize(true, now, &mut actions);
        }
        Ok(actions)
    }

    /// Allocate a fresh snapshot and enter `Measuring`, arming the cycle
    /// timer when the mode calls for one.
    fn begin_cycle(&mut self, now: Instant, actions: &mut Vec<EngineAction>) {
        let timeout = Duration::from_secs_f64(self.config.timeout_seconds);
        self.result = Some(AccumulationResult {
            spectrum: SpectrumSnapshot::for_mode(self.config.mode),
            started_at: now,
            finishes_at: now + timeout,
            samples: 0,
            cps: 0.0,
            elapsed_seconds: 0.0,
            condition_met: false,
        });

        let wants_timer =
            self.config.mode.is_time_based() || self.config.timeout_seconds > 0.0;
        if wants_timer {
            actions.push(EngineAction::ArmTimeout(timeout));
        }
        self.set_state(AccumulationState::Measuring, actions);
    }

    /// Close the current cycle, then either pause for the next one
    /// (continuous modes, condition met) or go idle.
    fn finalize(&mut self, condition_met: bool, now: Instant, actions: &mut Vec<EngineAction>) {
        actions.push(EngineAction::CancelTimeout);
        if let Some(result) = self.result.as_mut() {
            result.elapsed_seconds = (now - result.started_at).as_secs_f64();
            result.cps = result.spectrum.total_count() / result.elapsed_seconds.max(1.0);
            result.condition_met = condition_met;
            actions.push(EngineAction::Updated(Arc::new(result.clone())));
        }
        self.set_state(AccumulationState::Completed, actions);

        if self.config.mode.is_continuous() && condition_met {
            self.set_state(AccumulationState::Waiting, actions);
            if self.config.interval_seconds > 0.0 {
                actions.push(EngineAction::ArmInterval(Duration::from_secs_f64(
                    self.config.interval_seconds,
                )));
            } else {
                self.begin_cycle(now, actions);
            }
        } else {
            self.set_state(AccumulationState::Idle, actions);
        }
    }

    fn set_state(&mut self, state: AccumulationState, actions: &mut Vec<EngineAction>) {
        if self.state != state {
            self.state = state;
            actions.push(EngineAction::StateChanged(state));
        }
    }
}
