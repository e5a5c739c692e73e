//! Error types for the acquisition core.
//!
//! All errors implement the `std::error::Error` trait and carry structured
//! context for diagnostics and recovery decisions.
//!
//! ## Error Categories
//!
//! - **Framing Errors**: header/tail mismatch or wrong frame size; the frame
//!   is dropped and the link keeps running
//! - **Timeout Errors**: a command received no response within its window
//! - **Link Errors**: retry exhaustion or a dead transport; fatal to the
//!   current session, the link returns to idle
//! - **Config Errors**: invalid or mode-mismatched configuration, rejected
//!   locally
//! - **Transport Errors**: serial port I/O failures
//! - **Parse Errors**: malformed frame contents past the framing checks
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use gammalink::AcquisitionError;
//!
//! let error = AcquisitionError::timeout(std::time::Duration::from_millis(1000), 1);
//! if error.is_retryable() {
//!     // resend the same command
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for acquisition operations.
pub type Result<T, E = AcquisitionError> = std::result::Result<T, E>;

/// Main error type for acquisition operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AcquisitionError {
    #[error("Framing error in {context}: {details}")]
    Framing { context: String, details: String },

    #[error("Command timed out after {duration:?} (attempt {attempt})")]
    Timeout { duration: Duration, attempt: u32 },

    #[error("Detector link failed: {reason}")]
    Link {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Serial transport error during {operation}")]
    Transport {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },
}

impl AcquisitionError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Framing and parse errors are recoverable in the sense that the stream
    /// resynchronizes on its own, but the *frame* is lost for good, so they
    /// classify as non-retryable. Timeouts retry with the identical command
    /// until the retry budget is spent.
    pub fn is_retryable(&self) -> bool {
        match self {
            AcquisitionError::Timeout { .. } => true,
            AcquisitionError::Framing { .. } => false,
            AcquisitionError::Link { .. } => false,
            AcquisitionError::Config { .. } => false,
            AcquisitionError::Transport { .. } => false,
            AcquisitionError::Parse { .. } => false,
        }
    }

    /// Returns whether this error ends the current link session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AcquisitionError::Link { .. } | AcquisitionError::Transport { .. })
    }

    /// Helper constructor for framing errors.
    pub fn framing(context: impl Into<String>, details: impl Into<String>) -> Self {
        AcquisitionError::Framing { context: context.into(), details: details.into() }
    }

    /// Helper constructor for command timeouts.
    pub fn timeout(duration: Duration, attempt: u32) -> Self {
        AcquisitionError::Timeout { duration, attempt }
    }

    /// Helper constructor for link failures.
    pub fn link_failed(reason: impl Into<String>) -> Self {
        AcquisitionError::Link { reason: reason.into(), source: None }
    }

    /// Helper constructor for link failures with an underlying cause.
    pub fn link_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        AcquisitionError::Link { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        AcquisitionError::Config { reason: reason.into() }
    }

    /// Helper constructor for transport errors.
    pub fn transport(operation: impl Into<String>, source: std::io::Error) -> Self {
        AcquisitionError::Transport { operation: operation.into(), source }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        AcquisitionError::Parse { context: context.into(), details: details.into() }
    }
}

impl From<std::io::Error> for AcquisitionError {
    fn from(err: std::io::Error) -> Self {
        AcquisitionError::Transport { operation: "i/o".to_string(), source: err }
    }
}
