//! Accumulation run configuration.

use serde::{Deserialize, Serialize};

use crate::{AcquisitionError, Result};

/// Stopping rule for an accumulation run.
///
/// Count-based modes accumulate at hardware resolution and stop at a target
/// total count; time-based modes accumulate at library resolution and stop
/// when the timeout elapses. Continuous modes start a fresh cycle after each
/// completed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumulationMode {
    ByCount,
    ByTime,
    ContinuousByCount,
    ContinuousByTime,
}

impl AccumulationMode {
    pub fn is_continuous(self) -> bool {
        matches!(self, Self::ContinuousByCount | Self::ContinuousByTime)
    }

    pub fn is_count_based(self) -> bool {
        matches!(self, Self::ByCount | Self::ContinuousByCount)
    }

    pub fn is_time_based(self) -> bool {
        !self.is_count_based()
    }
}

/// Immutable run parameters, fixed before `start()` except through the
/// engine's explicit adjustment calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulationConfig {
    pub mode: AccumulationMode,
    /// Target total count for count-based modes.
    pub target_count: f64,
    /// Cycle duration for time-based modes; optional safety bound for
    /// count-based modes (zero disables it).
    pub timeout_seconds: f64,
    /// Pause between cycles in continuous modes; zero restarts immediately.
    pub interval_seconds: f64,
}

impl AccumulationConfig {
    /// Time-based run of `timeout_seconds` per cycle.
    pub fn by_time(timeout_seconds: f64) -> Self {
        Self {
            mode: AccumulationMode::ByTime,
            target_count: 0.0,
            timeout_seconds,
            interval_seconds: 0.0,
        }
    }

    /// Count-based run stopping at `target_count`, with no safety bound.
    pub fn by_count(target_count: f64) -> Self {
        Self {
            mode: AccumulationMode::ByCount,
            target_count,
            timeout_seconds: 0.0,
            interval_seconds: 0.0,
        }
    }

    pub fn continuous(mut self, interval_seconds: f64) -> Self {
        self.mode = match self.mode {
            AccumulationMode::ByCount | AccumulationMode::ContinuousByCount => {
                AccumulationMode::ContinuousByCount
            }
            AccumulationMode::ByTime | AccumulationMode::ContinuousByTime => {
                AccumulationMode::ContinuousByTime
            }
        };
        self.interval_seconds = interval_seconds;
        self
    }

    /// Count-based safety bound (see [`Self::timeout_seconds`]).
    pub fn with_safety_timeout(mut self, timeout_seconds: f64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode.is_count_based() && self.target_count < 1.0 {
            return Err(AcquisitionError::config(format!(
                "target count {} must be at least 1",
                self.target_count
            )));
        }
        if self.mode.is_time_based() && self.timeout_seconds < 1.0 {
            return Err(AcquisitionError::config(format!(
                "timeout {} s must be at least 1 s",
                self.timeout_seconds
            )));
        }
        if self.interval_seconds < 0.0 || self.timeout_seconds < 0.0 {
            return Err(AcquisitionError::config("negative durations are not allowed"));
        }
        Ok(())
    }
}
